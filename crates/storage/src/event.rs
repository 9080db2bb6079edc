//! Event types for the invocation journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for one ability invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(pub Uuid);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of event that occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// An invocation was accepted.
    InvocationStart {
        ability: String,
        delegator: String,
        delegatee: String,
        app_id: u64,
        app_version: u64,
    },
    /// The ability precheck ran.
    Precheck { success: bool },
    /// The delegation registry was consulted.
    PermissionCheck {
        permitted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// One policy was evaluated.
    PolicyEvaluated { policy: String, allow: bool },
    /// The ability executed.
    Execute {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
    },
    /// A policy commit ran after a successful execution.
    PolicyCommitted { policy: String, allow: bool },
    /// The invocation reached a terminal state.
    InvocationEnd { outcome: String },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvocationStart { .. } => "invocation_start",
            Self::Precheck { .. } => "precheck",
            Self::PermissionCheck { .. } => "permission_check",
            Self::PolicyEvaluated { .. } => "policy_evaluated",
            Self::Execute { .. } => "execute",
            Self::PolicyCommitted { .. } => "policy_committed",
            Self::InvocationEnd { .. } => "invocation_end",
        }
    }
}

/// An event in the invocation journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub invocation_id: InvocationId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(invocation_id: InvocationId, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            invocation_id,
            timestamp: Utc::now(),
            kind,
        }
    }
}
