//! SQLite invocation journal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use tracing::warn;

use crate::{Error, Event, EventKind, InvocationId, Result};

/// Summary of one journaled invocation.
#[derive(Debug, Clone)]
pub struct InvocationSummary {
    pub id: InvocationId,
    pub ability: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
    pub event_count: usize,
}

/// SQLite-backed event store.
pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    /// Open or create an event store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Create an in-memory event store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                invocation_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_invocation
                ON events(invocation_id, seq);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Poisoned)
    }

    /// Append an event to the store.
    pub fn append(&self, event: &Event) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO events (id, invocation_id, timestamp, kind, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id.to_string(),
                event.invocation_id.to_string(),
                event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                event.kind.name(),
                serde_json::to_string(&event.kind)?,
            ],
        )?;
        Ok(())
    }

    /// Load all events for an invocation in append order.
    pub fn load_invocation(&self, invocation_id: InvocationId) -> Result<Vec<Event>> {
        self.load_events(invocation_id, None)
    }

    /// Load events for an invocation, optionally filtered by kind name.
    pub fn load_events(
        &self,
        invocation_id: InvocationId,
        kind: Option<&str>,
    ) -> Result<Vec<Event>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, invocation_id, timestamp, data FROM events
             WHERE invocation_id = ?1 AND (?2 IS NULL OR kind = ?2) ORDER BY seq",
        )?;

        let rows = stmt
            .query_map(params![invocation_id.to_string(), kind], |row| {
                let id: String = row.get(0)?;
                let invocation_id: String = row.get(1)?;
                let timestamp: String = row.get(2)?;
                let data: String = row.get(3)?;
                Ok((id, invocation_id, timestamp, data))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, invocation_id, timestamp, data)| {
                decode_event(&id, &invocation_id, &timestamp, &data).inspect_err(|e| {
                    warn!(event_id = %id, error = %e, "Unreadable journal row");
                })
            })
            .collect()
    }

    /// List journaled invocations, most recent first.
    pub fn list_invocations(&self) -> Result<Vec<InvocationSummary>> {
        let conn = self.conn()?;

        let mut bookends: HashMap<String, (Option<String>, Option<String>)> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT invocation_id, data FROM events
                 WHERE kind IN ('invocation_start', 'invocation_end')",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (invocation_id, data) = row?;
                let entry = bookends.entry(invocation_id).or_default();
                match serde_json::from_str::<EventKind>(&data)? {
                    EventKind::InvocationStart { ability, .. } => entry.0 = Some(ability),
                    EventKind::InvocationEnd { outcome } => entry.1 = Some(outcome),
                    _ => {}
                }
            }
        }

        let mut stmt = conn.prepare(
            "SELECT invocation_id, MIN(timestamp), MAX(timestamp), COUNT(*),
                    SUM(kind = 'invocation_end')
             FROM events GROUP BY invocation_id ORDER BY MIN(timestamp) DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let summaries = rows
            .into_iter()
            .filter_map(|(id, first, last, count, ended)| {
                let (ability, outcome) = bookends.remove(&id).unwrap_or_default();
                Some(InvocationSummary {
                    id: InvocationId(id.parse().ok()?),
                    ability,
                    started_at: first.parse().ok()?,
                    ended_at: if ended > 0 { last.parse().ok() } else { None },
                    outcome,
                    event_count: usize::try_from(count).unwrap_or_default(),
                })
            })
            .collect();

        Ok(summaries)
    }
}

fn decode_event(id: &str, invocation_id: &str, timestamp: &str, data: &str) -> Result<Event> {
    let corrupt = |reason: String| Error::Corrupt {
        id: id.to_string(),
        reason,
    };
    Ok(Event {
        id: id.parse().map_err(|e| corrupt(format!("event id: {e}")))?,
        invocation_id: InvocationId(
            invocation_id
                .parse()
                .map_err(|e| corrupt(format!("invocation id: {e}")))?,
        ),
        timestamp: timestamp
            .parse()
            .map_err(|e| corrupt(format!("timestamp: {e}")))?,
        kind: serde_json::from_str(data).map_err(|e| corrupt(format!("event data: {e}")))?,
    })
}
