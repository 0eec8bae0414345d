use crate::Collector;
use anyhow::{bail, Result};
use metrix_common::types::Metric;
use sysinfo::System;

/// `TotalMemory` and `FreeMemory` of the host, in bytes.
pub struct MemoryCollector {
    system: System,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            bail!("operating system reported no memory information");
        }
        Ok(vec![
            Metric::gauge("TotalMemory", total as f64),
            Metric::gauge("FreeMemory", self.system.free_memory() as f64),
        ])
    }
}
