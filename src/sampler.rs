//! Background sampling loops.
//!
//! The CRG loop (CPU, RAM, GPU) runs on an interval chosen by the activity state:
//!
//! | transition    | new interval                |
//! |---------------|-----------------------------|
//! | Active → Idle | `monitor.idleIntervalCRGSec` |
//! | Idle → Active | `monitor.intervalCRGSec`     |
//!
//! The disk loop runs on its own fixed interval regardless of activity.
//! Collection runs on the blocking pool; the snapshot lock is taken only to
//! store the finished result. Shutdown is observed between cycles.

use crate::activity::{ActivityState, ActivityTracker, WakeReceiver};
use crate::collectors::{CrgCollector, DiskCollector};
use crate::config::MonitorConfig;
use crate::metrics::Metrics;
use crate::state::SnapshotStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrgIntervals {
    pub active: Duration,
    pub idle: Duration,
}

impl CrgIntervals {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self {
            active: cfg.active_interval(),
            idle: cfg.idle_interval(),
        }
    }

    pub fn for_state(&self, state: ActivityState) -> Duration {
        match state {
            ActivityState::Active => self.active,
            ActivityState::Idle => self.idle,
        }
    }
}

pub fn spawn_crg_sampler(
    collector: Arc<dyn CrgCollector>,
    store: Arc<SnapshotStore>,
    activity: Arc<ActivityTracker>,
    metrics: Arc<Metrics>,
    intervals: CrgIntervals,
    mut wake: WakeReceiver,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut period = intervals.active;
        // first tick completes immediately, so the snapshot is populated at startup
        let mut ticker = ticker(interval(period));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("stopping CRG sampler");
                    break;
                }
                _ = ticker.tick() => {}
                Some(()) = wake.recv() => {
                    debug!("CRG sampler woken by client access");
                }
            }

            if let Some(transition) = activity.evaluate() {
                info!(from = ?transition.from, to = ?transition.to, "monitor state changed");
                metrics.set_idle(transition.to == ActivityState::Idle);

                let next = intervals.for_state(transition.to);
                if next != period {
                    info!(
                        from_secs = period.as_secs_f64(),
                        to_secs = next.as_secs_f64(),
                        "CRG interval changed"
                    );
                    period = next;
                    ticker = ticker_after(period);
                }
            }

            run_crg_cycle(&collector, &store, &metrics).await;
        }
    })
}

pub fn spawn_disk_scanner(
    collector: Arc<dyn DiskCollector>,
    store: Arc<SnapshotStore>,
    metrics: Arc<Metrics>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_hours = period.as_secs_f64() / 3600.0, "disk scan interval fixed");
        let mut ticker = ticker(interval(period));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("stopping disk scanner");
                    break;
                }
                _ = ticker.tick() => {
                    run_disk_scan(&collector, &store, &metrics).await;
                }
            }
        }
    })
}

async fn run_crg_cycle(
    collector: &Arc<dyn CrgCollector>,
    store: &SnapshotStore,
    metrics: &Metrics,
) {
    let collector = collector.clone();
    match tokio::task::spawn_blocking(move || collector.collect_crg()).await {
        Ok(sample) => {
            if !sample.errors.is_empty() {
                debug!(failed = ?sample.errors, "CRG sample incomplete");
            }
            metrics.observe_crg(&sample);
            store.apply_crg(sample, clock_hms()).await;
        }
        Err(err) => {
            error!(error = %err, "CRG sampling task failed");
            metrics.inc_collect_error("crg");
        }
    }
}

async fn run_disk_scan(
    collector: &Arc<dyn DiskCollector>,
    store: &SnapshotStore,
    metrics: &Metrics,
) {
    let collector = collector.clone();
    match tokio::task::spawn_blocking(move || collector.collect_disk()).await {
        Ok(scan) => {
            info!(
                partitions = scan.stats.partitions.len(),
                users = scan.stats.users.len(),
                failed = ?scan.errors,
                "disk scan finished"
            );
            metrics.observe_disk(&scan);
            store.apply_disk(scan.stats).await;
        }
        Err(err) => {
            error!(error = %err, "disk scan task failed");
            metrics.inc_collect_error("disk");
        }
    }
}

fn ticker(mut interval: Interval) -> Interval {
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn ticker_after(period: Duration) -> Interval {
    ticker(interval_at(Instant::now() + period, period))
}

fn clock_hms() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::disk::DiskScanner;
    use crate::collectors::{CrgSample, DiskScan, SOURCE_DF, SOURCE_DU, SOURCE_GPU};
    use crate::config::DiskConfig;
    use crate::state::{CpuStats, DiskStats, HistoryStats, Snapshot, SystemInfo};
    use std::future::Future;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingCollector {
        calls: AtomicU32,
    }

    impl CountingCollector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CrgCollector for CountingCollector {
        fn collect_crg(&self) -> CrgSample {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            CrgSample {
                cpu: CpuStats {
                    load: n % 100,
                    ..CpuStats::default()
                },
                ..CrgSample::default()
            }
        }
    }

    impl DiskCollector for CountingCollector {
        fn collect_disk(&self) -> DiskScan {
            self.calls.fetch_add(1, Ordering::SeqCst);
            DiskScan {
                stats: DiskStats {
                    total: 123.0,
                    ..DiskStats::default()
                },
                errors: Vec::new(),
            }
        }
    }

    struct GpuLessCollector;

    impl CrgCollector for GpuLessCollector {
        fn collect_crg(&self) -> CrgSample {
            CrgSample {
                errors: vec![SOURCE_GPU],
                ..CrgSample::default()
            }
        }
    }

    fn store() -> Arc<SnapshotStore> {
        let history = HistoryStats::new(&MonitorConfig::default());
        Arc::new(SnapshotStore::new(Snapshot::new(SystemInfo::default(), history)))
    }

    async fn wait_until<F, Fut>(mut cond: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if cond().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn transition_table_picks_interval_by_state() {
        let intervals = CrgIntervals::from_config(&MonitorConfig::default());
        assert_eq!(intervals.for_state(ActivityState::Active), Duration::from_secs(2));
        assert_eq!(intervals.for_state(ActivityState::Idle), Duration::from_secs(300));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn idle_sampler_resamples_immediately_on_access() {
        let collector = CountingCollector::new();
        let store = store();
        let (tracker, wake) = ActivityTracker::new(Duration::from_millis(100));
        let activity = Arc::new(tracker);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_crg_sampler(
            collector.clone(),
            store.clone(),
            activity.clone(),
            Metrics::new().expect("metrics"),
            CrgIntervals {
                active: Duration::from_millis(20),
                idle: Duration::from_secs(3600),
            },
            wake,
            shutdown_rx,
        );

        let idle = wait_until(|| {
            let activity = activity.clone();
            async move { activity.state() == ActivityState::Idle }
        })
        .await;
        assert!(idle);

        // let the cycle that noticed the transition finish
        tokio::time::sleep(Duration::from_millis(50)).await;
        let idle_calls = collector.calls();
        assert!(idle_calls >= 2);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(collector.calls(), idle_calls, "no sampling while idle");
        let before = store.snapshot().await.cpu.load;

        assert!(activity.record_access());
        let resampled = wait_until(|| {
            let store = store.clone();
            async move { store.snapshot().await.cpu.load != before }
        })
        .await;
        assert!(resampled, "access while idle must trigger a sample");
        assert_eq!(activity.state(), ActivityState::Active);

        let _ = shutdown_tx.send(true);
        handle.await.expect("sampler task");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disk_scan_runs_at_startup() {
        let collector = CountingCollector::new();
        let store = store();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_disk_scanner(
            collector.clone(),
            store.clone(),
            Metrics::new().expect("metrics"),
            Duration::from_secs(3600),
            shutdown_rx,
        );

        let scanned = wait_until(|| {
            let store = store.clone();
            async move { store.snapshot().await.disk.total == 123.0 }
        })
        .await;
        assert!(scanned);

        let _ = shutdown_tx.send(true);
        handle.await.expect("disk task");
        assert_eq!(collector.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_disk_tools_are_counted_as_errors() {
        let scanner = Arc::new(DiskScanner::with_programs(
            DiskConfig::default(),
            "/nonexistent/df",
            "/nonexistent/du",
        ));
        let metrics = Metrics::new().expect("metrics");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_disk_scanner(
            scanner,
            store(),
            metrics.clone(),
            Duration::from_secs(3600),
            shutdown_rx,
        );

        let counted = wait_until(|| {
            let metrics = metrics.clone();
            async move {
                metrics
                    .agent_collect_errors_total
                    .with_label_values(&[SOURCE_DU])
                    .get()
                    == 1
            }
        })
        .await;
        assert!(counted);

        let _ = shutdown_tx.send(true);
        handle.await.expect("disk task");

        let errors = &metrics.agent_collect_errors_total;
        assert_eq!(errors.with_label_values(&[SOURCE_DF]).get(), 1);
        assert_eq!(errors.with_label_values(&[SOURCE_DU]).get(), 1);
        let text = String::from_utf8(metrics.encode_metrics().expect("encode")).expect("utf8");
        assert!(text.contains("agent_collect_errors_total{source=\"df\"} 1"));
        assert!(text.contains("agent_disk_scans_total 0"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_crg_sources_are_counted_per_cycle() {
        let metrics = Metrics::new().expect("metrics");
        let (tracker, wake) = ActivityTracker::new(Duration::ZERO);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_crg_sampler(
            Arc::new(GpuLessCollector),
            store(),
            Arc::new(tracker),
            metrics.clone(),
            CrgIntervals {
                active: Duration::from_millis(20),
                idle: Duration::from_secs(3600),
            },
            wake,
            shutdown_rx,
        );

        let counted = wait_until(|| {
            let metrics = metrics.clone();
            async move { metrics.agent_crg_cycles_total.get() >= 3 }
        })
        .await;
        assert!(counted);

        let _ = shutdown_tx.send(true);
        handle.await.expect("sampler task");
        assert_eq!(
            metrics
                .agent_collect_errors_total
                .with_label_values(&[SOURCE_GPU])
                .get(),
            metrics.agent_crg_cycles_total.get()
        );
    }
}
