use crate::Collector;
use anyhow::{bail, Result};
use metrix_common::types::Metric;
use sysinfo::System;

/// `CPUUtilization1` for the whole host plus `CPUCore{N}Utilization` per
/// logical core, numbered from 0.
///
/// Usage is computed between consecutive refreshes, so the first reading
/// after construction may be zero.
pub struct CpuCollector {
    system: System,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_cpu_all();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            bail!("operating system reported no CPUs");
        }

        let mut points = Vec::with_capacity(cpus.len() + 1);
        points.push(Metric::gauge(
            "CPUUtilization1",
            self.system.global_cpu_usage() as f64,
        ));
        for (i, cpu) in cpus.iter().enumerate() {
            points.push(Metric::gauge(
                format!("CPUCore{i}Utilization"),
                cpu.cpu_usage() as f64,
            ));
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_gauge_then_one_per_core() {
        let mut collector = CpuCollector::new();
        let Ok(metrics) = collector.collect() else {
            return;
        };
        assert_eq!(metrics[0].id, "CPUUtilization1");
        assert_eq!(metrics[1].id, "CPUCore0Utilization");
        let mut ids: Vec<_> = metrics.iter().map(|m| m.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), metrics.len());
    }
}
