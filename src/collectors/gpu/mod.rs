//! GPU telemetry behind two interchangeable backends.
//!
//! The native NVML backend is probed once when the aggregator is built. If the
//! library cannot be loaded or the devices cannot be enumerated, the `nvidia-smi`
//! backend is used for the rest of the process lifetime.

#[cfg(feature = "nvml")]
pub mod nvml;
pub mod smi;

use crate::collectors::ToolError;
use crate::state::{GpuDeviceStats, GpuStats};
use once_cell::sync::OnceCell;
use smi::SmiProvider;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, warn};

pub(crate) const BYTES_PER_MIB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum GpuError {
    #[cfg(feature = "nvml")]
    #[error("NVML error: {0}")]
    Nvml(#[from] nvml_wrapper::error::NvmlError),
    #[cfg(any(test, not(feature = "nvml")))]
    #[error("native GPU backend is not compiled in")]
    NativeDisabled,
    #[error(transparent)]
    Tool(#[from] ToolError),
}

pub trait GpuProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn list_devices(&self) -> Result<Vec<GpuDeviceStats>, GpuError>;
    /// Driver-reported CUDA version as `major.minor`.
    fn cuda_version(&self) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GpuStaticInfo {
    name: String,
    cuda: String,
    mem_total: u64,
}

pub struct GpuAggregator {
    provider: Box<dyn GpuProvider>,
    static_info: OnceCell<GpuStaticInfo>,
}

impl GpuAggregator {
    pub fn probe(smi_path: &str) -> Self {
        let smi_path = smi_path.to_string();
        Self::select(native_provider, move || Box::new(SmiProvider::new(smi_path)))
    }

    pub fn select<N, F>(native: N, fallback: F) -> Self
    where
        N: FnOnce() -> Result<Box<dyn GpuProvider>, GpuError>,
        F: FnOnce() -> Box<dyn GpuProvider>,
    {
        let provider = match native() {
            Ok(provider) => provider,
            Err(err) => {
                warn!(
                    error = %err,
                    "native GPU backend unavailable, falling back to command-line tool"
                );
                fallback()
            }
        };
        info!(backend = provider.name(), "GPU backend selected");
        Self::with_provider(provider)
    }

    pub fn with_provider(provider: Box<dyn GpuProvider>) -> Self {
        Self {
            provider,
            static_info: OnceCell::new(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.provider.name()
    }

    /// An empty device list is not an error; it yields the zero aggregate.
    pub fn collect(&self) -> Result<(GpuStats, Vec<GpuDeviceStats>), GpuError> {
        let devices = self.provider.list_devices()?;
        if devices.is_empty() {
            return Ok((GpuStats::default(), devices));
        }

        let static_info = self.static_info.get_or_init(|| GpuStaticInfo {
            name: display_name(&devices),
            cuda: self
                .provider
                .cuda_version()
                .map(|v| format!("CUDA {v}"))
                .unwrap_or_else(|| "--".to_string()),
            mem_total: devices.iter().map(|d| d.mem_total).sum(),
        });

        Ok((aggregate(&devices, static_info), devices))
    }
}

#[cfg(feature = "nvml")]
fn native_provider() -> Result<Box<dyn GpuProvider>, GpuError> {
    Ok(Box::new(nvml::NvmlProvider::init()?))
}

#[cfg(not(feature = "nvml"))]
fn native_provider() -> Result<Box<dyn GpuProvider>, GpuError> {
    Err(GpuError::NativeDisabled)
}

fn aggregate(devices: &[GpuDeviceStats], static_info: &GpuStaticInfo) -> GpuStats {
    let count = devices.len().max(1) as u64;
    let mean = |f: fn(&GpuDeviceStats) -> u32| {
        (devices.iter().map(|d| u64::from(f(d))).sum::<u64>() / count) as u32
    };

    GpuStats {
        name: static_info.name.clone(),
        cuda: static_info.cuda.clone(),
        mem_total: static_info.mem_total,
        mem_used: devices.iter().map(|d| d.mem_used).sum(),
        avg_util: mean(|d| d.util),
        avg_mem_util: mean(|d| d.mem_util),
        power_total: devices.iter().map(|d| d.power).sum(),
        avg_temp: mean(|d| d.temp),
        max_temp: devices.iter().map(|d| d.temp).max().unwrap_or(0),
    }
}

/// `"RTX 4090"`, `"4x RTX 4090"`, or `"<largest card> ..."` for mixed models.
pub fn display_name(devices: &[GpuDeviceStats]) -> String {
    let Some(first) = devices.first() else {
        return "No GPU".to_string();
    };

    let models: HashSet<&str> = devices.iter().map(|d| d.name.as_str()).collect();
    if models.len() == 1 {
        return if devices.len() > 1 {
            format!("{}x {}", devices.len(), first.name)
        } else {
            first.name.clone()
        };
    }

    let largest = devices
        .iter()
        .fold(first, |best, d| if d.mem_total > best.mem_total { d } else { best });
    format!("{} ...", largest.name)
}
