use crate::Collector;
use anyhow::Result;
use metrix_common::types::Metric;
use rand::Rng;

/// Emits `RandomValue` (uniform in `[0, 100)`) and a `PollCount` delta of 1
/// on every tick.
#[derive(Debug, Default)]
pub struct PollCollector;

impl PollCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Collector for PollCollector {
    fn name(&self) -> &str {
        "poll"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let random: f64 = rand::thread_rng().gen_range(0.0..100.0);
        Ok(vec![
            Metric::gauge("RandomValue", random),
            Metric::counter("PollCount", 1),
        ])
    }
}
