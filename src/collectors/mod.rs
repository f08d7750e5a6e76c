pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod memory;
pub mod system;

use crate::config::Config;
use crate::state::{CpuStats, DiskStats, GpuDeviceStats, GpuStats, RamStats};
use cpu::CpuSampler;
use disk::DiskScanner;
use gpu::GpuAggregator;
use memory::MemoryReader;
use std::process::Command;
use system::SystemReader;
use thiserror::Error;
use tracing::debug;

/// `source` labels for `agent_collect_errors_total`.
pub const SOURCE_PROC: &str = "proc";
pub const SOURCE_GPU: &str = "gpu";
pub const SOURCE_DF: &str = "df";
pub const SOURCE_DU: &str = "du";

/// One CPU/RAM/GPU sampling pass, assigned to the snapshot as a unit.
#[derive(Debug, Clone, Default)]
pub struct CrgSample {
    pub cpu: CpuStats,
    pub ram: RamStats,
    pub gpu: GpuStats,
    pub gpus: Vec<GpuDeviceStats>,
    pub uptime: String,
    pub load_avg: f64,
    /// Sources that failed this pass; their fields hold zero values.
    pub errors: Vec<&'static str>,
}

/// One disk pass plus the tools that failed during it.
#[derive(Debug, Clone, Default)]
pub struct DiskScan {
    pub stats: DiskStats,
    pub errors: Vec<&'static str>,
}

/// High-frequency collection. Implementations may block; callers run them off the runtime.
pub trait CrgCollector: Send + Sync + 'static {
    fn collect_crg(&self) -> CrgSample;
}

pub trait DiskCollector: Send + Sync + 'static {
    fn collect_disk(&self) -> DiskScan;
}

pub struct HostCollector {
    cpu: CpuSampler,
    memory: MemoryReader,
    gpu: GpuAggregator,
    system: SystemReader,
    disk: DiskScanner,
}

impl HostCollector {
    pub fn new(cfg: &Config) -> Self {
        Self {
            cpu: CpuSampler::new(cfg.monitor.cpu_sample_gap()),
            memory: MemoryReader::new(cfg.monitor.ram_type.clone()),
            gpu: GpuAggregator::probe(&cfg.gpu.smi_path),
            system: SystemReader::new(),
            disk: DiskScanner::new(cfg.disk.clone()),
        }
    }

    pub fn gpu_backend(&self) -> &'static str {
        self.gpu.backend_name()
    }

    pub fn system(&self) -> &SystemReader {
        &self.system
    }

    /// Partition-only scan, used where the per-user `du` walk would be too slow.
    pub fn collect_partitions(&self) -> Result<DiskStats, ToolError> {
        self.disk.scan_partitions()
    }
}

impl CrgCollector for HostCollector {
    fn collect_crg(&self) -> CrgSample {
        let mut errors = Vec::new();

        let cpu = self.cpu.sample().unwrap_or_else(|err| {
            debug!(error = %err, "cpu load unavailable");
            errors.push(SOURCE_PROC);
            self.cpu.unloaded()
        });
        let ram = self.memory.read().unwrap_or_else(|err| {
            debug!(error = %err, "memory usage unavailable");
            errors.push(SOURCE_PROC);
            self.memory.unavailable()
        });
        let (gpu, gpus) = self.gpu.collect().unwrap_or_else(|err| {
            debug!(backend = self.gpu.backend_name(), error = %err, "GPU read failed");
            errors.push(SOURCE_GPU);
            (GpuStats::default(), Vec::new())
        });
        let (uptime, load_avg) = self.system.dynamic();

        errors.dedup();
        CrgSample {
            cpu,
            ram,
            gpu,
            gpus,
            uptime,
            load_avg,
            errors,
        }
    }
}

impl DiskCollector for HostCollector {
    fn collect_disk(&self) -> DiskScan {
        self.disk.collect_disk()
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Status {
        program: String,
        status: std::process::ExitStatus,
    },
}

/// Runs an external tool and returns its stdout. A non-zero exit is an error
/// unless `lenient` is set and the tool still printed something.
pub fn run_tool(program: &str, args: &[&str], lenient: bool) -> Result<String, ToolError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() && !(lenient && !output.stdout.is_empty()) {
        return Err(ToolError::Status {
            program: program.to_string(),
            status: output.status,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub(crate) fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.parse::<f64>().ok()
}

pub(crate) fn parse_u32_loose(input: &str) -> u32 {
    parse_f64_loose(input)
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v.min(u32::MAX as f64) as u32)
        .unwrap_or(0)
}

pub(crate) fn parse_u64_loose(input: &str) -> u64 {
    parse_f64_loose(input)
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_parsing_tolerates_units_and_placeholders() {
        assert_eq!(parse_f64_loose(" 41.52 "), Some(41.52));
        assert_eq!(parse_f64_loose("250.00 W"), Some(250.0));
        assert_eq!(parse_f64_loose("[N/A]"), None);
        assert_eq!(parse_u32_loose("[Not Supported]"), 0);
        assert_eq!(parse_u32_loose("87.9"), 87);
        assert_eq!(parse_u64_loose("-3"), 0);
    }

    #[test]
    fn missing_tool_is_a_spawn_error() {
        let err = run_tool("/nonexistent/labmd-tool", &[], true).expect_err("must fail");
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
