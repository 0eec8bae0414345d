use metrix_common::types::{Metric, MetricKind, MetricValue};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// A rejected update. The stored metric is left as it was.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpdateError {
    /// The name is already bound to the other kind.
    #[error("metric '{name}' is a {stored}, {requested} update ignored")]
    KindMismatch {
        name: String,
        stored: MetricKind,
        requested: MetricKind,
    },

    #[error("counter '{name}' would overflow ({total} + {delta}), update ignored")]
    CounterOverflow { name: String, total: i64, delta: i64 },
}

/// Current value of every metric the agent has sampled.
///
/// The lock is held only for the map operation itself, never across I/O.
///
/// # Examples
///
/// ```
/// use metrix_agent::store::MetricStore;
/// use metrix_common::types::Metric;
///
/// let store = MetricStore::new();
/// store.update_counter("PollCount", 1).unwrap();
/// store.update_counter("PollCount", 2).unwrap();
/// store.update_gauge("CPU", 42.5).unwrap();
/// assert_eq!(store.get("PollCount"), Some(Metric::counter("PollCount", 3)));
/// assert!(store.update_gauge("PollCount", 1.0).is_err());
/// ```
#[derive(Debug, Default)]
pub struct MetricStore {
    metrics: Mutex<HashMap<String, Metric>>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the map, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Metric>> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds `delta` to the running total, starting from zero.
    pub fn update_counter(&self, name: &str, delta: i64) -> Result<(), UpdateError> {
        let mut map = self.lock();
        let Some(existing) = map.get_mut(name) else {
            map.insert(name.to_string(), Metric::counter(name, delta));
            return Ok(());
        };
        match &mut existing.value {
            MetricValue::Counter(total) => match total.checked_add(delta) {
                Some(sum) => {
                    *total = sum;
                    Ok(())
                }
                None => Err(UpdateError::CounterOverflow {
                    name: name.to_string(),
                    total: *total,
                    delta,
                }),
            },
            MetricValue::Gauge(_) => Err(UpdateError::KindMismatch {
                name: name.to_string(),
                stored: MetricKind::Gauge,
                requested: MetricKind::Counter,
            }),
        }
    }

    /// Replaces the stored reading.
    pub fn update_gauge(&self, name: &str, value: f64) -> Result<(), UpdateError> {
        let mut map = self.lock();
        let Some(existing) = map.get_mut(name) else {
            map.insert(name.to_string(), Metric::gauge(name, value));
            return Ok(());
        };
        match &mut existing.value {
            MetricValue::Gauge(current) => {
                *current = value;
                Ok(())
            }
            MetricValue::Counter(_) => Err(UpdateError::KindMismatch {
                name: name.to_string(),
                stored: MetricKind::Counter,
                requested: MetricKind::Gauge,
            }),
        }
    }

    /// Applies a collector reading: counters are deltas, gauges are values.
    pub fn apply(&self, metric: Metric) -> Result<(), UpdateError> {
        match metric.value {
            MetricValue::Counter(delta) => self.update_counter(&metric.id, delta),
            MetricValue::Gauge(value) => self.update_gauge(&metric.id, value),
        }
    }

    /// Point-in-time copy of every metric, sorted by name.
    pub fn snapshot(&self) -> Vec<Metric> {
        let mut metrics: Vec<Metric> = self.lock().values().cloned().collect();
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        metrics
    }

    pub fn get(&self, name: &str) -> Option<Metric> {
        self.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
