use crate::state::CpuStats;
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuIdentity {
    pub model: String,
    pub cores: u32,
    pub threads: u32,
}

/// Aggregate tick counters from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

pub struct CpuSampler {
    cpuinfo_path: PathBuf,
    stat_path: PathBuf,
    gap: Duration,
    identity: OnceCell<CpuIdentity>,
}

impl CpuSampler {
    pub fn new(gap: Duration) -> Self {
        Self::with_paths("/proc/cpuinfo", "/proc/stat", gap)
    }

    pub fn with_paths(
        cpuinfo_path: impl Into<PathBuf>,
        stat_path: impl Into<PathBuf>,
        gap: Duration,
    ) -> Self {
        Self {
            cpuinfo_path: cpuinfo_path.into(),
            stat_path: stat_path.into(),
            gap,
            identity: OnceCell::new(),
        }
    }

    pub fn identity(&self) -> &CpuIdentity {
        self.identity.get_or_init(|| {
            let text = fs::read_to_string(&self.cpuinfo_path).unwrap_or_else(|err| {
                debug!(path = %self.cpuinfo_path.display(), error = %err, "cpuinfo unavailable");
                String::new()
            });
            let identity = parse_cpuinfo(&text);
            info!(
                model = %identity.model,
                cores = identity.cores,
                threads = identity.threads,
                "cpu identity loaded"
            );
            identity
        })
    }

    /// Blocks for the sampling gap between the two counter reads. Fails unless both
    /// reads parse.
    pub fn sample(&self) -> io::Result<CpuStats> {
        let first = self.read_times()?;
        thread::sleep(self.gap);
        let second = self.read_times()?;

        Ok(CpuStats {
            load: load_percent(first, second),
            ..self.unloaded()
        })
    }

    /// Identity fields with a zero load.
    pub fn unloaded(&self) -> CpuStats {
        let identity = self.identity().clone();
        CpuStats {
            load: 0,
            model: identity.model,
            cores: identity.cores,
            threads: identity.threads,
        }
    }

    fn read_times(&self) -> io::Result<CpuTimes> {
        let text = fs::read_to_string(&self.stat_path)?;
        parse_proc_stat(&text).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no aggregate cpu line in {}", self.stat_path.display()),
            )
        })
    }
}

pub fn parse_cpuinfo(text: &str) -> CpuIdentity {
    let mut model = String::new();
    let mut sockets = HashSet::new();
    let mut cores_per_socket = 0_u32;
    let mut threads = 0_u32;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "processor" => threads += 1,
            "model name" => model = value.to_string(),
            "physical id" => {
                sockets.insert(value.to_string());
            }
            "cpu cores" => {
                cores_per_socket = cores_per_socket.max(value.parse().unwrap_or(0));
            }
            _ => {}
        }
    }

    let socket_count = sockets.len().max(1) as u32;
    let cores = if cores_per_socket > 0 {
        socket_count * cores_per_socket
    } else {
        threads / 2
    };

    let model = if model.is_empty() {
        "Unknown CPU".to_string()
    } else if socket_count > 1 {
        format!("{socket_count}x {model}")
    } else {
        model
    };

    CpuIdentity {
        model,
        cores,
        threads,
    }
}

pub fn parse_proc_stat(text: &str) -> Option<CpuTimes> {
    let line = text.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }

    let ticks: Vec<u64> = fields.map(|v| v.parse().unwrap_or(0)).collect();
    if ticks.len() < 4 {
        return None;
    }

    Some(CpuTimes {
        idle: ticks[3],
        total: ticks.iter().sum(),
    })
}

pub fn load_percent(first: CpuTimes, second: CpuTimes) -> u32 {
    let total = second.total.saturating_sub(first.total);
    if total == 0 {
        return 0;
    }
    let idle = second.idle.saturating_sub(first.idle).min(total);
    let load = 100.0 * (1.0 - idle as f64 / total as f64);
    load.clamp(0.0, 100.0) as u32
}
