use crate::Collector;
use anyhow::Result;
use metrix_common::types::Metric;
use sysinfo::{Disks, Networks, Pid, ProcessesToUpdate, System};

/// Every gauge name the runtime collector can emit.
pub const RUNTIME_GAUGES: [&str; 30] = [
    "ProcessResidentMemory",
    "ProcessVirtualMemory",
    "ProcessCpuUsage",
    "ProcessDiskReadBytes",
    "ProcessDiskWrittenBytes",
    "ProcessTotalDiskReadBytes",
    "ProcessTotalDiskWrittenBytes",
    "ProcessRunTime",
    "ProcessStartTime",
    "UsedMemory",
    "AvailableMemory",
    "TotalSwap",
    "UsedSwap",
    "FreeSwap",
    "LoadAverage1",
    "LoadAverage5",
    "LoadAverage15",
    "Uptime",
    "BootTime",
    "LogicalCpuCount",
    "NetworkBytesReceived",
    "NetworkBytesTransmitted",
    "NetworkPacketsReceived",
    "NetworkPacketsTransmitted",
    "NetworkErrorsReceived",
    "NetworkErrorsTransmitted",
    "NetworkInterfaces",
    "DiskTotalSpace",
    "DiskAvailableSpace",
    "DiskCount",
];

/// Statistics about the agent process itself and the host it runs on.
///
/// Never fails: when the agent's own process entry cannot be read the
/// process gauges are left out of that tick.
pub struct RuntimeCollector {
    system: System,
    networks: Networks,
    disks: Disks,
    pid: Option<Pid>,
}

impl RuntimeCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    fn process_gauges(&mut self, out: &mut Vec<Metric>) {
        let Some(pid) = self.pid else {
            return;
        };
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let Some(process) = self.system.process(pid) else {
            return;
        };
        let disk = process.disk_usage();
        out.extend([
            Metric::gauge("ProcessResidentMemory", process.memory() as f64),
            Metric::gauge("ProcessVirtualMemory", process.virtual_memory() as f64),
            Metric::gauge("ProcessCpuUsage", process.cpu_usage() as f64),
            Metric::gauge("ProcessDiskReadBytes", disk.read_bytes as f64),
            Metric::gauge("ProcessDiskWrittenBytes", disk.written_bytes as f64),
            Metric::gauge("ProcessTotalDiskReadBytes", disk.total_read_bytes as f64),
            Metric::gauge(
                "ProcessTotalDiskWrittenBytes",
                disk.total_written_bytes as f64,
            ),
            Metric::gauge("ProcessRunTime", process.run_time() as f64),
            Metric::gauge("ProcessStartTime", process.start_time() as f64),
        ]);
    }
}

impl Default for RuntimeCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let mut out = Vec::with_capacity(RUNTIME_GAUGES.len());
        self.process_gauges(&mut out);

        self.system.refresh_memory();
        out.extend([
            Metric::gauge("UsedMemory", self.system.used_memory() as f64),
            Metric::gauge("AvailableMemory", self.system.available_memory() as f64),
            Metric::gauge("TotalSwap", self.system.total_swap() as f64),
            Metric::gauge("UsedSwap", self.system.used_swap() as f64),
            Metric::gauge("FreeSwap", self.system.free_swap() as f64),
        ]);

        let load = System::load_average();
        out.extend([
            Metric::gauge("LoadAverage1", load.one),
            Metric::gauge("LoadAverage5", load.five),
            Metric::gauge("LoadAverage15", load.fifteen),
            Metric::gauge("Uptime", System::uptime() as f64),
            Metric::gauge("BootTime", System::boot_time() as f64),
            Metric::gauge("LogicalCpuCount", self.system.cpus().len() as f64),
        ]);

        self.networks.refresh();
        // [bytes rx, bytes tx, packets rx, packets tx, errors rx, errors tx]
        let mut totals = [0u64; 6];
        for (_, data) in self.networks.iter() {
            let readings = [
                data.total_received(),
                data.total_transmitted(),
                data.total_packets_received(),
                data.total_packets_transmitted(),
                data.total_errors_on_received(),
                data.total_errors_on_transmitted(),
            ];
            for (total, reading) in totals.iter_mut().zip(readings) {
                *total = total.saturating_add(reading);
            }
        }
        out.extend([
            Metric::gauge("NetworkBytesReceived", totals[0] as f64),
            Metric::gauge("NetworkBytesTransmitted", totals[1] as f64),
            Metric::gauge("NetworkPacketsReceived", totals[2] as f64),
            Metric::gauge("NetworkPacketsTransmitted", totals[3] as f64),
            Metric::gauge("NetworkErrorsReceived", totals[4] as f64),
            Metric::gauge("NetworkErrorsTransmitted", totals[5] as f64),
            Metric::gauge("NetworkInterfaces", self.networks.iter().count() as f64),
        ]);

        self.disks.refresh();
        let (total, available) = self.disks.iter().fold((0u64, 0u64), |(t, a), disk| {
            (
                t.saturating_add(disk.total_space()),
                a.saturating_add(disk.available_space()),
            )
        });
        out.extend([
            Metric::gauge("DiskTotalSpace", total as f64),
            Metric::gauge("DiskAvailableSpace", available as f64),
            Metric::gauge("DiskCount", self.disks.iter().count() as f64),
        ]);

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_common::types::MetricKind;
    use std::collections::HashSet;

    #[test]
    fn emits_only_known_gauges_once() {
        let mut collector = RuntimeCollector::new();
        let metrics = collector.collect().unwrap();

        let mut seen = HashSet::new();
        for metric in &metrics {
            assert_eq!(metric.kind(), MetricKind::Gauge, "{}", metric.id);
            assert!(RUNTIME_GAUGES.contains(&metric.id.as_str()), "{}", metric.id);
            assert!(seen.insert(metric.id.clone()), "duplicate {}", metric.id);
        }
        // Host gauges are always present.
        for name in ["UsedMemory", "LoadAverage1", "LogicalCpuCount", "DiskCount"] {
            assert!(seen.contains(name), "missing {name}");
        }
    }

    #[test]
    fn gauge_names_are_unique() {
        let unique: HashSet<_> = RUNTIME_GAUGES.iter().collect();
        assert_eq!(unique.len(), RUNTIME_GAUGES.len());
    }
}
