use crate::collectors::{CrgSample, DiskScan};
use prometheus::core::Collector;
use prometheus::{
    opts, Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

pub struct Metrics {
    registry: Registry,
    started: Instant,
    pub agent_cpu_load_percent: Gauge,
    pub agent_ram_usage_percent: Gauge,
    pub agent_gpu_avg_utilization_percent: Gauge,
    pub agent_gpu_count: IntGauge,
    pub agent_disk_used_gb: Gauge,
    pub agent_disk_total_gb: Gauge,
    pub agent_idle: IntGauge,
    pub agent_gpu_backend: GaugeVec,
    pub agent_crg_cycles_total: IntCounter,
    pub agent_disk_scans_total: IntCounter,
    pub agent_stats_requests_total: IntCounter,
    pub agent_collect_errors_total: IntCounterVec,
    pub agent_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let agent_cpu_load_percent = Gauge::with_opts(opts!(
            "agent_cpu_load_percent",
            "Aggregate CPU load from the last sample"
        ))?;
        let agent_ram_usage_percent =
            Gauge::with_opts(opts!("agent_ram_usage_percent", "RAM usage in percent"))?;
        let agent_gpu_avg_utilization_percent = Gauge::with_opts(opts!(
            "agent_gpu_avg_utilization_percent",
            "Mean GPU utilization across devices"
        ))?;
        let agent_gpu_count =
            IntGauge::with_opts(opts!("agent_gpu_count", "Number of detected GPUs"))?;
        let agent_disk_used_gb = Gauge::with_opts(opts!(
            "agent_disk_used_gb",
            "Used space across reported partitions in GB"
        ))?;
        let agent_disk_total_gb = Gauge::with_opts(opts!(
            "agent_disk_total_gb",
            "Capacity across reported partitions in GB"
        ))?;
        let agent_idle = IntGauge::with_opts(opts!(
            "agent_idle",
            "1 while the agent samples at the idle interval"
        ))?;
        let agent_gpu_backend = GaugeVec::new(
            opts!("agent_gpu_backend", "Active GPU backend, set to 1"),
            &["backend"],
        )?;
        let agent_crg_cycles_total = IntCounter::with_opts(opts!(
            "agent_crg_cycles_total",
            "Completed CPU/RAM/GPU sampling cycles"
        ))?;
        let agent_disk_scans_total = IntCounter::with_opts(opts!(
            "agent_disk_scans_total",
            "Disk scans completed without tool errors"
        ))?;
        let agent_stats_requests_total = IntCounter::with_opts(opts!(
            "agent_stats_requests_total",
            "Requests served by /api/stats"
        ))?;
        let agent_collect_errors_total = IntCounterVec::new(
            opts!(
                "agent_collect_errors_total",
                "Collection errors by source"
            ),
            &["source"],
        )?;
        let agent_uptime_seconds =
            Gauge::with_opts(opts!("agent_uptime_seconds", "Agent uptime in seconds"))?;

        register(&registry, &agent_cpu_load_percent)?;
        register(&registry, &agent_ram_usage_percent)?;
        register(&registry, &agent_gpu_avg_utilization_percent)?;
        register(&registry, &agent_gpu_count)?;
        register(&registry, &agent_disk_used_gb)?;
        register(&registry, &agent_disk_total_gb)?;
        register(&registry, &agent_idle)?;
        register(&registry, &agent_gpu_backend)?;
        register(&registry, &agent_crg_cycles_total)?;
        register(&registry, &agent_disk_scans_total)?;
        register(&registry, &agent_stats_requests_total)?;
        register(&registry, &agent_collect_errors_total)?;
        register(&registry, &agent_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started: Instant::now(),
            agent_cpu_load_percent,
            agent_ram_usage_percent,
            agent_gpu_avg_utilization_percent,
            agent_gpu_count,
            agent_disk_used_gb,
            agent_disk_total_gb,
            agent_idle,
            agent_gpu_backend,
            agent_crg_cycles_total,
            agent_disk_scans_total,
            agent_stats_requests_total,
            agent_collect_errors_total,
            agent_uptime_seconds,
        }))
    }

    /// Failed sources are counted in `agent_collect_errors_total`; their zeroed
    /// fields still update the gauges.
    pub fn observe_crg(&self, sample: &CrgSample) {
        self.agent_cpu_load_percent.set(f64::from(sample.cpu.load));
        self.agent_ram_usage_percent
            .set(f64::from(sample.ram.usage_percent()));
        self.agent_gpu_avg_utilization_percent
            .set(f64::from(sample.gpu.avg_util));
        self.agent_gpu_count.set(sample.gpus.len() as i64);
        self.agent_crg_cycles_total.inc();
        for source in &sample.errors {
            self.inc_collect_error(source);
        }
    }

    pub fn observe_disk(&self, scan: &DiskScan) {
        self.agent_disk_used_gb.set(scan.stats.used);
        self.agent_disk_total_gb.set(scan.stats.total);
        if scan.errors.is_empty() {
            self.agent_disk_scans_total.inc();
        }
        for source in &scan.errors {
            self.inc_collect_error(source);
        }
    }

    pub fn set_idle(&self, idle: bool) {
        self.agent_idle.set(i64::from(idle));
    }

    pub fn set_gpu_backend(&self, backend: &str) {
        self.agent_gpu_backend.reset();
        self.agent_gpu_backend.with_label_values(&[backend]).set(1.0);
    }

    pub fn inc_stats_request(&self) {
        self.agent_stats_requests_total.inc();
    }

    pub fn inc_collect_error(&self, source: &str) {
        self.agent_collect_errors_total
            .with_label_values(&[source])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.agent_uptime_seconds
            .set(self.started.elapsed().as_secs_f64().floor());

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{SOURCE_DF, SOURCE_GPU, SOURCE_PROC};
    use crate::state::{CpuStats, DiskStats, GpuDeviceStats, GpuStats, RamStats};

    fn encoded(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode_metrics().expect("encode")).expect("utf8")
    }

    #[test]
    fn crg_sample_updates_gauges() {
        let metrics = Metrics::new().expect("metrics");
        metrics.observe_crg(&CrgSample {
            cpu: CpuStats {
                load: 37,
                ..CpuStats::default()
            },
            ram: RamStats {
                used: 4.0,
                total: 16.0,
                kind: "DDR4".to_string(),
            },
            gpu: GpuStats {
                avg_util: 55,
                ..GpuStats::default()
            },
            gpus: vec![GpuDeviceStats::default(), GpuDeviceStats::default()],
            ..CrgSample::default()
        });

        assert_eq!(metrics.agent_cpu_load_percent.get(), 37.0);
        assert_eq!(metrics.agent_ram_usage_percent.get(), 25.0);
        assert_eq!(metrics.agent_gpu_avg_utilization_percent.get(), 55.0);
        assert_eq!(metrics.agent_gpu_count.get(), 2);
        assert_eq!(metrics.agent_crg_cycles_total.get(), 1);
    }

    #[test]
    fn backend_label_is_exclusive() {
        let metrics = Metrics::new().expect("metrics");
        metrics.set_gpu_backend("nvml");
        metrics.set_gpu_backend("nvidia-smi");

        let text = encoded(&metrics);
        assert!(text.contains("agent_gpu_backend{backend=\"nvidia-smi\"} 1"));
        assert!(!text.contains("backend=\"nvml\""));
    }

    #[test]
    fn encodes_all_families() {
        let metrics = Metrics::new().expect("metrics");
        metrics.set_idle(true);
        metrics.inc_collect_error("disk");
        metrics.inc_stats_request();
        metrics.observe_disk(&DiskScan {
            stats: DiskStats {
                total: 512.0,
                used: 128.5,
                ..DiskStats::default()
            },
            errors: Vec::new(),
        });

        let text = encoded(&metrics);
        assert!(text.contains("agent_idle 1"));
        assert!(text.contains("agent_collect_errors_total{source=\"disk\"} 1"));
        assert!(text.contains("agent_stats_requests_total 1"));
        assert!(text.contains("agent_disk_used_gb 128.5"));
        assert!(text.contains("agent_disk_scans_total 1"));
        assert!(text.contains("agent_uptime_seconds"));
    }

    #[test]
    fn failed_sources_are_counted() {
        let metrics = Metrics::new().expect("metrics");
        metrics.observe_crg(&CrgSample {
            errors: vec![SOURCE_PROC, SOURCE_GPU],
            ..CrgSample::default()
        });
        metrics.observe_disk(&DiskScan {
            errors: vec![SOURCE_DF],
            ..DiskScan::default()
        });

        let errors = &metrics.agent_collect_errors_total;
        assert_eq!(errors.with_label_values(&[SOURCE_PROC]).get(), 1);
        assert_eq!(errors.with_label_values(&[SOURCE_GPU]).get(), 1);
        assert_eq!(errors.with_label_values(&[SOURCE_DF]).get(), 1);
        assert_eq!(metrics.agent_crg_cycles_total.get(), 1);
        assert_eq!(metrics.agent_disk_scans_total.get(), 0);
    }
}
