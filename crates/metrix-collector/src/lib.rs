//! Statistics sources for the metrix agent's sampler.
//!
//! Each [`Collector`] reads one category of host or process statistics and
//! returns them as [`Metric`] updates. Gauges carry the latest reading,
//! counters carry the delta to add to the running total.

pub mod cpu;
pub mod memory;
pub mod poll;
pub mod runtime;

use anyhow::Result;
use metrix_common::types::Metric;

/// A statistics source polled once per sampler tick.
pub trait Collector: Send + Sync {
    /// Short name used in log fields (e.g. `"cpu"`).
    fn name(&self) -> &str;

    /// Reads current values.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying OS query yields no usable data.
    fn collect(&mut self) -> Result<Vec<Metric>>;
}

/// The default collector set: runtime, poll, memory and cpu.
pub fn default_collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(runtime::RuntimeCollector::new()),
        Box::new(poll::PollCollector::new()),
        Box::new(memory::MemoryCollector::new()),
        Box::new(cpu::CpuCollector::new()),
    ]
}
