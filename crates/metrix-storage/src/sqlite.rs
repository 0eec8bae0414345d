use crate::error::{Result, StorageError};
use crate::{merge, StorageEngine};
use metrix_common::types::{Metric, MetricKind, MetricValue};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    name TEXT PRIMARY KEY,
    mtype TEXT NOT NULL,
    delta INTEGER,
    value REAL
);
";

// Totals are merged in Rust so an overflowing counter is refused before it
// reaches the table.
const WRITE: &str = "
INSERT INTO metrics (name, mtype, delta, value) VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(name) DO UPDATE SET
    delta = excluded.delta,
    value = excluded.value
";

const SELECT_ONE: &str = "SELECT name, mtype, delta, value FROM metrics WHERE name = ?1";

type Row = (String, String, Option<i64>, Option<f64>);

/// Database-backed storage on a single SQLite file.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "Opened metrics database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode((name, mtype, delta, value): Row) -> Result<Metric> {
    let kind: MetricKind = mtype.parse().map_err(|reason| StorageError::Corrupt {
        name: name.clone(),
        reason,
    })?;
    let value = match (kind, delta, value) {
        (MetricKind::Counter, Some(delta), _) => MetricValue::Counter(delta),
        (MetricKind::Gauge, _, Some(value)) => MetricValue::Gauge(value),
        _ => {
            return Err(StorageError::Corrupt {
                name,
                reason: format!("{kind} row has no stored value"),
            })
        }
    };
    Ok(Metric { id: name, value })
}

fn select(conn: &Connection, name: &str) -> Result<Option<Metric>> {
    let row = conn
        .prepare_cached(SELECT_ONE)?
        .query_row([name], read_row)
        .optional()?;
    row.map(decode).transpose()
}

/// Read, merge and write back. Callers hold a transaction.
fn upsert(conn: &Connection, metric: Metric) -> Result<Metric> {
    let current = select(conn, &metric.id)?;
    let merged = merge(current.as_ref(), metric)?;
    let (delta, value) = match merged.value {
        MetricValue::Counter(delta) => (Some(delta), None),
        MetricValue::Gauge(value) => (None, Some(value)),
    };
    conn.prepare_cached(WRITE)?.execute(rusqlite::params![
        &merged.id,
        merged.kind().as_str(),
        delta,
        value
    ])?;
    Ok(merged)
}

impl StorageEngine for SqliteStorage {
    fn update(&self, metric: Metric) -> Result<Metric> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let merged = upsert(&tx, metric)?;
        tx.commit()?;
        Ok(merged)
    }

    fn bulk_update(&self, metrics: Vec<Metric>) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for metric in metrics {
            upsert(&tx, metric)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Metric>> {
        let conn = self.lock();
        select(&conn, name)
    }

    fn get_all(&self) -> Result<Vec<Metric>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("SELECT name, mtype, delta, value FROM metrics")?;
        let rows = stmt.query_map([], read_row)?;
        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(decode(row?)?);
        }
        Ok(metrics)
    }

    fn ping(&self) -> Result<()> {
        let conn = self.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}
