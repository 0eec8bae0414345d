//! Persistence backends for the metrix collector server.
//!
//! All backends share the same update semantics: counters add the incoming
//! delta to the stored total, gauges replace the stored value, and a name
//! stays bound to the kind it was first written with. Three variants are
//! provided: [`memory::MemStorage`], [`file::FileStorage`] (JSON snapshot on
//! top of the in-memory map) and [`sqlite::SqliteStorage`].

pub mod error;
pub mod file;
pub mod memory;
pub mod sqlite;


use error::{Result, StorageError};
use metrix_common::types::{Metric, MetricValue};

/// Metric persistence backend.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because every HTTP handler holds the same instance.
pub trait StorageEngine: Send + Sync {
    /// Applies one update and returns the stored result.
    fn update(&self, metric: Metric) -> Result<Metric>;

    /// Applies a batch of updates in order. Either every update is applied or
    /// none is.
    fn bulk_update(&self, metrics: Vec<Metric>) -> Result<()>;

    /// Looks up a metric by name.
    fn get(&self, name: &str) -> Result<Option<Metric>>;

    /// Returns every stored metric, in unspecified order.
    fn get_all(&self) -> Result<Vec<Metric>>;

    /// Checks that the backend is reachable.
    fn ping(&self) -> Result<()>;

    /// Flushes pending state and releases resources. Further calls are
    /// allowed but not required to succeed.
    fn close(&self) -> Result<()>;
}

/// Combines a stored metric with an incoming update.
pub(crate) fn merge(current: Option<&Metric>, update: Metric) -> Result<Metric> {
    let Some(current) = current else {
        return Ok(update);
    };
    match (current.value, update.value) {
        (MetricValue::Counter(total), MetricValue::Counter(delta)) => match total.checked_add(delta) {
            Some(sum) => Ok(Metric::counter(update.id, sum)),
            None => Err(StorageError::CounterOverflow {
                name: update.id,
                total,
                delta,
            }),
        },
        (MetricValue::Gauge(_), MetricValue::Gauge(_)) => Ok(update),
        (stored, requested) => Err(StorageError::KindMismatch {
            name: update.id,
            stored: stored.kind(),
            requested: requested.kind(),
        }),
    }
}
