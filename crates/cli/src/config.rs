//! Configuration loading from agentkey.toml.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use alloy_primitives::Address;
use serde::Deserialize;

/// Environment variable overriding `sponsor.api_key`.
pub const SPONSOR_API_KEY_ENV: &str = "AGENTKEY_SPONSOR_API_KEY";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Network hosting the delegation registry.
    pub registry_network: String,

    /// EVM networks by name. Ability parameters pick one with `chain`.
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,

    #[serde(default)]
    pub key_holder: KeyHolderConfig,

    /// Gas sponsorship. Transactions are self-funded when disabled.
    #[serde(default)]
    pub sponsor: SponsorConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    /// Delegation registry contract, if this network hosts one.
    pub registry_address: Option<Address>,
}

/// Remote key-holder endpoint.
#[derive(Debug, Deserialize)]
pub struct KeyHolderConfig {
    #[serde(default = "default_key_holder_url")]
    pub url: String,
}

impl Default for KeyHolderConfig {
    fn default() -> Self {
        Self {
            url: default_key_holder_url(),
        }
    }
}

fn default_key_holder_url() -> String {
    "http://127.0.0.1:7450".to_string()
}

#[derive(Debug, Deserialize, Default)]
pub struct SponsorConfig {
    #[serde(default)]
    pub enabled: bool,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub policy_id: Option<String>,
}

/// Resolved sponsorship settings.
#[derive(Debug, PartialEq, Eq)]
pub struct Sponsor<'a> {
    pub url: &'a str,
    pub api_key: &'a str,
    pub policy_id: Option<&'a str>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StorageConfig {
    /// Directory for the journal and spend ledger.
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file, applying environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&content)?;
        if let Ok(api_key) = std::env::var(SPONSOR_API_KEY_ENV) {
            config.sponsor.api_key = Some(api_key);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check cross-field requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.registry()?;
        self.sponsor()?;
        Ok(())
    }

    /// The registry network and the registry contract address.
    pub fn registry(&self) -> Result<(&NetworkConfig, Address), ConfigError> {
        let network = self
            .networks
            .get(&self.registry_network)
            .ok_or_else(|| ConfigError::UnknownNetwork(self.registry_network.clone()))?;
        let address = network
            .registry_address
            .ok_or_else(|| ConfigError::MissingRegistryAddress(self.registry_network.clone()))?;
        Ok((network, address))
    }

    /// Sponsorship settings, or `None` when transactions pay their own gas.
    pub fn sponsor(&self) -> Result<Option<Sponsor<'_>>, ConfigError> {
        if !self.sponsor.enabled {
            return Ok(None);
        }
        let url = self
            .sponsor
            .url
            .as_deref()
            .ok_or(ConfigError::IncompleteSponsor("url"))?;
        let api_key = self
            .sponsor
            .api_key
            .as_deref()
            .ok_or(ConfigError::IncompleteSponsor("api_key"))?;
        Ok(Some(Sponsor {
            url,
            api_key,
            policy_id: self.sponsor.policy_id.as_deref(),
        }))
    }

    /// Directory for the journal and ledger databases.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .or_else(default_data_dir)
            .unwrap_or_else(|| ".agentkey".into())
    }
}

/// Platform data directory, used when `storage.path` is unset.
pub fn default_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/agentkey"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("agentkey"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("agentkey"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("registry_network '{0}' is not a configured network")]
    UnknownNetwork(String),

    #[error("network '{0}' hosts the registry but has no registry_address")]
    MissingRegistryAddress(String),

    #[error("sponsorship is enabled but sponsor.{0} is not set")]
    IncompleteSponsor(&'static str),
}
