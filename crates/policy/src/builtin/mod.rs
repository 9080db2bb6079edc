//! Built-in policies.

pub mod contract_whitelist;
pub mod rate_limit;
pub mod spending_limit;

use chrono::{DateTime, Duration, Utc};
use schema::{DecisionSchemas, Schema, Stage};
use serde_json::Value;

use crate::Result;

fn schema(name: String, document: Value) -> Result<Schema> {
    Ok(Schema::new(name, document)?)
}

/// Allow/deny schemas named `<policy>/<stage>/<outcome>`.
fn decisions(policy: &str, stage: Stage, allow: Value, deny: Value) -> Result<DecisionSchemas> {
    Ok(DecisionSchemas::new(
        stage,
        schema(format!("{policy}/{stage}/allow"), allow)?,
        schema(format!("{policy}/{stage}/deny"), deny)?,
    ))
}

/// Start of a sliding window ending at `now`.
fn window_start(now: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
    Duration::try_seconds(seconds)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
