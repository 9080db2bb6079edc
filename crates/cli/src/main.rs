mod config;
mod error;

use std::path::{Path, PathBuf};

use alloy_primitives::{Address, U256};
use chain::{Networks, PermissionValidator, RpcProvider};
use chrono::{Duration, Local, TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use policy::PolicyRegistry;
use runtime::transaction::{LazyKeyHolder, PaymasterClient, TransactionSender};
use runtime::{AbilityRegistry, Executor, InvocationRequest, InvocationResponse};
use storage::{Event, EventKind, EventStore, SpendLedger};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "agentkey.toml";
const JOURNAL_FILE: &str = "events.db";
const LEDGER_FILE: &str = "ledger.db";

#[derive(Parser)]
#[command(name = "agentkey")]
#[command(about = "Run abilities for delegated keys under on-chain permissions and policies", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered abilities and their policy slots
    Abilities,
    /// Ask the delegation registry what a delegatee may run
    Permissions {
        #[arg(long)]
        delegatee: Address,
        /// Delegator key token ID
        #[arg(long)]
        token_id: U256,
        /// Ability identifier
        #[arg(long)]
        ability: String,
    },
    /// Run everything short of execution for a request
    Precheck {
        /// Invocation request JSON file
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Run a request through the full protocol
    Execute {
        /// Invocation request JSON file
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Show recorded spend for a delegator and app
    Ledger {
        #[arg(long)]
        delegator: Address,
        #[arg(long)]
        app: u64,
        /// Look back this many hours
        #[arg(long, default_value = "24")]
        hours: i64,
    },
    /// Show journaled invocations, or the events of one
    Logs {
        /// Invocation ID (prefix match supported)
        #[arg(short, long)]
        invocation: Option<String>,
        /// Filter by event kind (precheck, permission_check, policy_evaluated, ...)
        #[arg(short, long)]
        kind: Option<String>,
        /// Show only the last N invocations
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Abilities => cmd_abilities(),
        Commands::Permissions {
            delegatee,
            token_id,
            ability,
        } => cmd_permissions(&cli.config, delegatee, token_id, &ability).await,
        Commands::Precheck { request } => {
            let executor = build_executor(&Config::load(&cli.config)?)?;
            let response = executor.precheck(read_request(&request)?).await;
            report(&response)
        }
        Commands::Execute { request } => {
            let executor = build_executor(&Config::load(&cli.config)?)?;
            let response = executor.execute(read_request(&request)?).await;
            report(&response)
        }
        Commands::Ledger {
            delegator,
            app,
            hours,
        } => cmd_ledger(&Config::load(&cli.config)?, delegator, app, hours),
        Commands::Logs {
            invocation,
            kind,
            limit,
        } => {
            let config = Config::load(&cli.config)?;
            match invocation {
                Some(prefix) => cmd_logs(&config, &prefix, kind.as_deref()),
                None => cmd_invocations(&config, limit),
            }
        }
    }
}

fn cmd_abilities() -> Result<()> {
    let policies = PolicyRegistry::builtin()?;
    let abilities = AbilityRegistry::builtin(&policies)?;

    for ability in abilities.iter() {
        println!("{}", ability.identifier());
        for slot in ability.definition().slots() {
            let mapping: Vec<_> = slot
                .mapping()
                .iter()
                .map(|(from, to)| format!("{from} -> {to}"))
                .collect();
            println!("  {:<40}  {}", slot.identifier(), mapping.join(", "));
        }
    }
    Ok(())
}

async fn cmd_permissions(
    config_path: &Path,
    delegatee: Address,
    token_id: U256,
    ability: &str,
) -> Result<()> {
    let config = Config::load(config_path)?;
    let (network, registry) = config.registry()?;
    let validator = PermissionValidator::new(RpcProvider::new(&network.rpc_url)?, registry);

    let delegation = validator.query(delegatee, token_id, ability).await?;
    println!("{}", serde_json::to_string_pretty(&delegation)?);
    Ok(())
}

fn build_executor(config: &Config) -> Result<Executor<RpcProvider, LazyKeyHolder, PaymasterClient>> {
    let policies = PolicyRegistry::builtin()?;
    let abilities = AbilityRegistry::builtin(&policies)?;

    let mut networks = Networks::new();
    for (name, network) in &config.networks {
        networks.insert(name.clone(), RpcProvider::new(&network.rpc_url)?);
    }

    let (registry_network, registry) = config.registry()?;
    let permissions =
        PermissionValidator::new(RpcProvider::new(&registry_network.rpc_url)?, registry);

    let mut sender = TransactionSender::new(LazyKeyHolder::new(&config.key_holder.url));
    if let Some(sponsor) = config.sponsor()? {
        let mut paymaster =
            PaymasterClient::new(sponsor.url, sponsor.api_key).map_err(runtime::Error::from)?;
        if let Some(policy_id) = sponsor.policy_id {
            paymaster = paymaster.with_policy(policy_id);
        }
        sender = sender.with_paymaster(paymaster);
    }

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let journal = EventStore::open(data_dir.join(JOURNAL_FILE))?;
    let ledger = SpendLedger::open(data_dir.join(LEDGER_FILE))?;

    info!(
        networks = config.networks.len(),
        registry = %registry,
        sponsored = sender.is_sponsored(),
        data_dir = %data_dir.display(),
        "Executor ready"
    );
    Ok(Executor::new(
        abilities,
        networks,
        permissions,
        sender,
        journal,
        ledger,
    ))
}

fn read_request(path: &Path) -> Result<InvocationRequest> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| Error::InvalidRequest {
        path: path.to_path_buf(),
        source,
    })
}

fn report(response: &InvocationResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if response.is_success() {
        Ok(())
    } else {
        Err(Error::Unsuccessful {
            stage: response.stage(),
        })
    }
}

fn cmd_ledger(config: &Config, delegator: Address, app: u64, hours: i64) -> Result<()> {
    let path = existing(config, LEDGER_FILE)?;
    let ledger = SpendLedger::open(path)?;
    let since = Utc::now() - Duration::hours(hours);
    let totals = ledger.totals(&delegator.to_string(), app, since)?;

    if totals.is_empty() {
        println!("Nothing recorded for {delegator} on app {app} in the last {hours}h.");
        return Ok(());
    }

    println!("{:<48}  {:>12}  ENTRIES", "SCOPE", "TOTAL");
    println!("{}", "-".repeat(72));
    for total in totals {
        println!("{:<48}  {:>12.2}  {}", total.scope, total.total, total.entries);
    }
    Ok(())
}

fn cmd_invocations(config: &Config, limit: usize) -> Result<()> {
    let store = EventStore::open(existing(config, JOURNAL_FILE)?)?;
    let invocations = store.list_invocations()?;

    if invocations.is_empty() {
        println!("No invocations found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<8}  {:<6}  ABILITY",
        "INVOCATION ID", "STARTED", "OUTCOME", "EVENTS"
    );
    println!("{}", "-".repeat(100));

    for summary in invocations.into_iter().take(limit) {
        let started = Local
            .from_utc_datetime(&summary.started_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        println!(
            "{:<36}  {:<16}  {:<8}  {:<6}  {}",
            summary.id,
            started,
            summary.outcome.as_deref().unwrap_or("RUNNING"),
            summary.event_count,
            summary.ability.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}

fn cmd_logs(config: &Config, prefix: &str, kind_filter: Option<&str>) -> Result<()> {
    let store = EventStore::open(existing(config, JOURNAL_FILE)?)?;

    let invocations = store.list_invocations()?;
    let matching: Vec<_> = invocations
        .iter()
        .filter(|s| s.id.to_string().starts_with(prefix))
        .collect();

    let invocation_id = match matching.as_slice() {
        [] => {
            return Err(Error::InvocationNotFound {
                prefix: prefix.to_string(),
            });
        }
        [only] => only.id,
        _ => {
            return Err(Error::AmbiguousInvocation {
                prefix: prefix.to_string(),
                matches: matching.iter().map(|s| s.id.to_string()).collect(),
            });
        }
    };

    let events = store.load_events(invocation_id, kind_filter)?;

    if events.is_empty() {
        println!("No events found for invocation {invocation_id}");
        return Ok(());
    }

    println!("Invocation: {invocation_id}\n");

    for event in events {
        print_event(&event);
    }

    Ok(())
}

fn print_event(event: &Event) {
    let time = Local
        .from_utc_datetime(&event.timestamp.naive_utc())
        .format("%H:%M:%S");

    match &event.kind {
        EventKind::InvocationStart {
            ability,
            delegator,
            delegatee,
            app_id,
            app_version,
        } => {
            println!("[{time}] === {ability} for {delegator} by {delegatee} (app {app_id} v{app_version}) ===");
        }
        EventKind::Precheck { success } => {
            println!("[{time}] PRECHECK: {}", verdict(*success, "ok", "failed"));
        }
        EventKind::PermissionCheck { permitted, error } => match error {
            Some(error) => println!("[{time}] PERMISSION: denied ({error})"),
            None => println!("[{time}] PERMISSION: {}", verdict(*permitted, "granted", "denied")),
        },
        EventKind::PolicyEvaluated { policy, allow } => {
            println!("[{time}] POLICY {policy}: {}", verdict(*allow, "allow", "deny"));
        }
        EventKind::Execute { success, output } => {
            let output = output.as_ref().map(|o| o.to_string()).unwrap_or_default();
            println!("[{time}] EXECUTE: {} {output}", verdict(*success, "ok", "failed"));
        }
        EventKind::PolicyCommitted { policy, allow } => {
            println!("[{time}] COMMIT {policy}: {}", verdict(*allow, "ok", "failed"));
        }
        EventKind::InvocationEnd { outcome } => {
            println!("[{time}] === {outcome} ===");
        }
    }
}

fn verdict(ok: bool, yes: &'static str, no: &'static str) -> &'static str {
    if ok { yes } else { no }
}

fn existing(config: &Config, file: &str) -> Result<PathBuf> {
    let path = config.data_dir().join(file);
    if !path.exists() {
        return Err(Error::DatabaseNotFound { path });
    }
    Ok(path)
}
