//! SQLite-backed persistence for the execution kernel.
//!
//! Two stores live here:
//!
//! 1. **Invocation journal** ([`EventStore`]): an append-only record of every
//!    stage an invocation passed through (precheck, permission check, each
//!    policy decision, execution, commits). It answers "why was this denied?"
//!    after the fact.
//!
//! 2. **Spend ledger** ([`SpendLedger`]): the side-effect store policies
//!    commit to after a successful execution (amounts spent, executions
//!    counted) and read back over a sliding window when evaluating.
//!
//! # Example
//!
//! ```no_run
//! use chrono::{Duration, Utc};
//! use storage::{Event, EventKind, EventStore, InvocationId, LedgerKey, SpendLedger};
//!
//! let journal = EventStore::open("agentkey.db")?;
//! let id = InvocationId::new();
//! journal.append(&Event::new(id, EventKind::Precheck { success: true }))?;
//!
//! let ledger = SpendLedger::open("agentkey.db")?;
//! let key = LedgerKey::new("0x1111111111111111111111111111111111111111", 7, "spending-limit");
//! ledger.record(&key, 5.0, Utc::now())?;
//! let spent = ledger.total_since(&key, Utc::now() - Duration::days(1))?;
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod event;
mod ledger;
mod store;

pub use error::{Error, Result};
pub use event::{Event, EventKind, InvocationId};
pub use ledger::{LedgerKey, ScopeTotal, SpendLedger};
pub use store::{EventStore, InvocationSummary};
