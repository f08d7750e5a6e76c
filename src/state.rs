use crate::collectors::CrgSample;
use crate::config::MonitorConfig;
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::collections::VecDeque;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Snapshot {
    pub system: SystemInfo,
    pub cpu: CpuStats,
    pub ram: RamStats,
    pub gpu: GpuStats,
    pub gpus: Vec<GpuDeviceStats>,
    pub disk: DiskStats,
    pub history: HistoryStats,
    pub updated: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub hostname: String,
    pub os: String,
    pub kernel: String,
    pub uptime: String,
    pub load_avg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CpuStats {
    pub load: u32,
    pub model: String,
    pub cores: u32,
    pub threads: u32,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct RamStats {
    pub used: f64,
    pub total: f64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl RamStats {
    /// Used share of total, rounded down; zero when total is unknown.
    pub fn usage_percent(&self) -> u32 {
        if self.total <= 0.0 {
            return 0;
        }
        (self.used / self.total * 100.0).clamp(0.0, 100.0) as u32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuStats {
    pub name: String,
    pub cuda: String,
    pub mem_total: u64,
    pub mem_used: u64,
    pub avg_util: u32,
    pub avg_mem_util: u32,
    pub power_total: u32,
    pub avg_temp: u32,
    pub max_temp: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuDeviceStats {
    pub id: u32,
    pub util: u32,
    pub mem_util: u32,
    pub mem_used: u64,
    pub mem_total: u64,
    pub temp: u32,
    pub power: u32,
    pub fan: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DiskStats {
    pub total: f64,
    pub used: f64,
    pub partitions: Vec<Partition>,
    pub users: Vec<UserUsage>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Partition {
    pub path: String,
    pub label: String,
    pub used: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct UserUsage {
    pub name: String,
    pub used: f64,
}

/// Fixed-capacity FIFO of integer samples, oldest first. Always full: it starts
/// zero-filled and every push evicts the oldest value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRing {
    values: VecDeque<u32>,
    capacity: usize,
}

impl HistoryRing {
    /// A zero capacity is raised to one so the ring always holds the latest sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::from(vec![0; capacity]),
            capacity,
        }
    }

    pub fn push(&mut self, value: u32) {
        if self.len() >= self.capacity() {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn latest(&self) -> Option<u32> {
        self.values.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.values.iter().copied()
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Serialize for HistoryRing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for value in self.iter() {
            seq.serialize_element(&value)?;
        }
        seq.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub cpu_load: HistoryRing,
    pub gpu_load: HistoryRing,
    pub ram_load: HistoryRing,
}

impl HistoryStats {
    pub fn new(cfg: &MonitorConfig) -> Self {
        Self {
            cpu_load: HistoryRing::new(cfg.history_cpu),
            gpu_load: HistoryRing::new(cfg.history_gpu),
            ram_load: HistoryRing::new(cfg.history_ram),
        }
    }
}

impl Snapshot {
    pub fn new(system: SystemInfo, history: HistoryStats) -> Self {
        Self {
            system,
            history,
            ..Self::default()
        }
    }

    pub fn apply_crg(&mut self, sample: CrgSample, updated: String) {
        self.history.cpu_load.push(sample.cpu.load);
        self.history.gpu_load.push(sample.gpu.avg_util);
        self.history.ram_load.push(sample.ram.usage_percent());

        self.cpu = sample.cpu;
        self.ram = sample.ram;
        self.gpu = sample.gpu;
        self.gpus = sample.gpus;
        self.system.uptime = sample.uptime;
        self.system.load_avg = sample.load_avg;
        self.updated = updated;
    }

    pub fn apply_disk(&mut self, disk: DiskStats) {
        self.disk = disk;
    }
}

/// The one shared snapshot. Writers hold the lock only to assign fields; readers
/// only to serialize.
pub struct SnapshotStore {
    inner: RwLock<Snapshot>,
}

impl SnapshotStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub async fn apply_crg(&self, sample: CrgSample, updated: String) {
        self.inner.write().await.apply_crg(sample, updated);
    }

    pub async fn apply_disk(&self, disk: DiskStats) {
        self.inner.write().await.apply_disk(disk);
    }

    pub async fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let guard = self.inner.read().await;
        serde_json::to_vec(&*guard)
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.read().await.clone()
    }
}

pub fn floor_1dp(value: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return 0.0;
    }
    (value * 10.0).floor() / 10.0
}
