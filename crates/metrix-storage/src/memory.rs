use crate::error::Result;
use crate::{merge, StorageEngine};
use metrix_common::types::Metric;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Mutex-guarded in-process map. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemStorage {
    metrics: Mutex<HashMap<String, Metric>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a storage pre-populated with `metrics`, later entries winning.
    pub fn with_metrics(metrics: impl IntoIterator<Item = Metric>) -> Self {
        let map = metrics.into_iter().map(|m| (m.id.clone(), m)).collect();
        Self {
            metrics: Mutex::new(map),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Metric>> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StorageEngine for MemStorage {
    fn update(&self, metric: Metric) -> Result<Metric> {
        let mut map = self.lock();
        let merged = merge(map.get(&metric.id), metric)?;
        map.insert(merged.id.clone(), merged.clone());
        Ok(merged)
    }

    fn bulk_update(&self, metrics: Vec<Metric>) -> Result<()> {
        let mut map = self.lock();
        // Stage against a scratch map so a rejected entry leaves the store untouched.
        let mut staged: HashMap<String, Metric> = HashMap::new();
        for metric in metrics {
            let current = staged.get(&metric.id).or_else(|| map.get(&metric.id));
            let merged = merge(current, metric)?;
            staged.insert(merged.id.clone(), merged);
        }
        map.extend(staged);
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Metric>> {
        Ok(self.lock().get(name).cloned())
    }

    fn get_all(&self) -> Result<Vec<Metric>> {
        Ok(self.lock().values().cloned().collect())
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
