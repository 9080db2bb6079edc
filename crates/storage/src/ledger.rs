//! Spend ledger backing policy commits.
//!
//! Policies record what an invocation consumed (an amount spent, one
//! execution) after the ability succeeded, and read totals back over a
//! sliding window when evaluating the next invocation.
//!
//! Amounts are stored as integer micro-units so that sums are exact.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::{Error, Result};

/// Whose consumption an entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    /// Delegator key address, lowercase hex.
    pub delegator: String,
    pub app_id: u64,
    /// Policy-defined bucket, e.g. `spending-limit`.
    pub scope: String,
}

impl LedgerKey {
    pub fn new(delegator: impl Into<String>, app_id: u64, scope: impl Into<String>) -> Self {
        Self {
            delegator: delegator.into().to_lowercase(),
            app_id,
            scope: scope.into(),
        }
    }
}

/// Totals for one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeTotal {
    pub scope: String,
    pub total: f64,
    pub entries: u64,
}

/// Micro-units per recorded unit.
const SCALE: f64 = 1_000_000.0;

/// SQLite-backed spend ledger.
pub struct SpendLedger {
    conn: Mutex<Connection>,
}

impl SpendLedger {
    /// Open or create a ledger at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Create an in-memory ledger (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ledger (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                delegator TEXT NOT NULL,
                app_id INTEGER NOT NULL,
                scope TEXT NOT NULL,
                amount INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ledger_key
                ON ledger(delegator, app_id, scope, recorded_at);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Poisoned)
    }

    /// Record `amount` against `key` at `at`.
    pub fn record(&self, key: &LedgerKey, amount: f64, at: DateTime<Utc>) -> Result<()> {
        let micros = to_micros(amount)?;
        self.conn()?.execute(
            "INSERT INTO ledger (delegator, app_id, scope, amount, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.delegator,
                column_id(key.app_id)?,
                key.scope,
                micros,
                timestamp(at),
            ],
        )?;
        debug!(
            delegator = %key.delegator,
            app_id = key.app_id,
            scope = %key.scope,
            amount,
            "Ledger entry recorded"
        );
        Ok(())
    }

    /// Sum of amounts recorded at or after `since`.
    pub fn total_since(&self, key: &LedgerKey, since: DateTime<Utc>) -> Result<f64> {
        let total: i64 = self.conn()?.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM ledger
             WHERE delegator = ?1 AND app_id = ?2 AND scope = ?3 AND recorded_at >= ?4",
            params![key.delegator, column_id(key.app_id)?, key.scope, timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(from_micros(total))
    }

    /// Number of entries recorded at or after `since`.
    pub fn count_since(&self, key: &LedgerKey, since: DateTime<Utc>) -> Result<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM ledger
             WHERE delegator = ?1 AND app_id = ?2 AND scope = ?3 AND recorded_at >= ?4",
            params![key.delegator, column_id(key.app_id)?, key.scope, timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Per-scope totals for a delegator and app since `since`.
    pub fn totals(
        &self,
        delegator: &str,
        app_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<ScopeTotal>> {
        let app_id = column_id(app_id)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT scope, SUM(amount), COUNT(*) FROM ledger
             WHERE delegator = ?1 AND app_id = ?2 AND recorded_at >= ?3
             GROUP BY scope ORDER BY scope",
        )?;
        let totals = stmt
            .query_map(
                params![delegator.to_lowercase(), app_id, timestamp(since)],
                |row| {
                    Ok(ScopeTotal {
                        scope: row.get(0)?,
                        total: from_micros(row.get(1)?),
                        entries: u64::try_from(row.get::<_, i64>(2)?).unwrap_or_default(),
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(totals)
    }
}

fn column_id(app_id: u64) -> Result<i64> {
    i64::try_from(app_id).map_err(|_| Error::AppIdOutOfRange(app_id))
}

fn to_micros(amount: f64) -> Result<i64> {
    let micros = (amount * SCALE).round();
    // The upper bound is exclusive: i64::MAX rounds up to 2^63 as f64.
    if !micros.is_finite() || micros < 0.0 || micros >= i64::MAX as f64 {
        return Err(Error::InvalidAmount(amount));
    }
    Ok(micros as i64)
}

fn from_micros(micros: i64) -> f64 {
    micros as f64 / SCALE
}

// Fixed-width so that string comparison orders by time.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(scope: &str) -> LedgerKey {
        LedgerKey::new("0xAbCd000000000000000000000000000000000001", 7, scope)
    }

    #[test]
    fn sums_within_window() {
        let ledger = SpendLedger::in_memory().unwrap();
        let now = Utc::now();
        ledger
            .record(&key("spending-limit"), 40.0, now - Duration::hours(30))
            .unwrap();
        ledger
            .record(&key("spending-limit"), 90.0, now - Duration::hours(1))
            .unwrap();
        ledger.record(&key("spending-limit"), 5.0, now).unwrap();

        let since = now - Duration::hours(24);
        assert_eq!(ledger.total_since(&key("spending-limit"), since).unwrap(), 95.0);
        assert_eq!(ledger.count_since(&key("spending-limit"), since).unwrap(), 2);
    }

    #[test]
    fn scopes_and_delegators_are_isolated() {
        let ledger = SpendLedger::in_memory().unwrap();
        let now = Utc::now();
        ledger.record(&key("spending-limit"), 10.0, now).unwrap();
        ledger.record(&key("rate-limit:swap"), 1.0, now).unwrap();
        let other = LedgerKey::new("0x9999999999999999999999999999999999999999", 7, "spending-limit");
        ledger.record(&other, 50.0, now).unwrap();

        let since = now - Duration::minutes(1);
        assert_eq!(ledger.total_since(&key("spending-limit"), since).unwrap(), 10.0);
        assert_eq!(ledger.total_since(&other, since).unwrap(), 50.0);

        let totals = ledger
            .totals("0xABCD000000000000000000000000000000000001", 7, since)
            .unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].scope, "rate-limit:swap");
        assert_eq!(totals[1].total, 10.0);
    }

    #[test]
    fn repeated_fractional_spends_sum_exactly() {
        let ledger = SpendLedger::in_memory().unwrap();
        let now = Utc::now();
        for _ in 0..10 {
            ledger.record(&key("spending-limit"), 0.1, now).unwrap();
        }
        let since = now - Duration::minutes(1);
        assert_eq!(ledger.total_since(&key("spending-limit"), since).unwrap(), 1.0);
    }

    #[test]
    fn rejects_app_ids_beyond_column_range() {
        let ledger = SpendLedger::in_memory().unwrap();
        let now = Utc::now();
        let key = LedgerKey::new("0x1111111111111111111111111111111111111111", u64::MAX, "spending-limit");

        assert!(matches!(
            ledger.record(&key, 1.0, now),
            Err(Error::AppIdOutOfRange(id)) if id == u64::MAX
        ));
        assert!(matches!(
            ledger.total_since(&key, now),
            Err(Error::AppIdOutOfRange(_))
        ));
        assert!(matches!(
            ledger.count_since(&key, now),
            Err(Error::AppIdOutOfRange(_))
        ));
        assert!(matches!(
            ledger.totals(&key.delegator, u64::MAX, now),
            Err(Error::AppIdOutOfRange(_))
        ));
    }

    #[test]
    fn rejects_unrecordable_amounts() {
        let ledger = SpendLedger::in_memory().unwrap();
        let now = Utc::now();
        for amount in [f64::NAN, f64::INFINITY, -1.0, 1e300] {
            assert!(matches!(
                ledger.record(&key("spending-limit"), amount, now),
                Err(Error::InvalidAmount(_))
            ));
        }
    }

    #[test]
    fn empty_ledger_totals_zero() {
        let ledger = SpendLedger::in_memory().unwrap();
        let since = Utc::now() - Duration::days(1);
        assert_eq!(ledger.total_since(&key("spending-limit"), since).unwrap(), 0.0);
        assert_eq!(ledger.count_since(&key("spending-limit"), since).unwrap(), 0);
    }
}
