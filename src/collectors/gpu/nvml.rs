use super::{GpuError, GpuProvider, BYTES_PER_MIB};
use crate::state::GpuDeviceStats;
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::Nvml;
use tracing::{debug, info};

pub struct NvmlProvider {
    nvml: Nvml,
    device_count: u32,
}

impl NvmlProvider {
    /// Loads the library and enumerates devices; either failure rules NVML out.
    pub fn init() -> Result<Self, GpuError> {
        let nvml = Nvml::init()?;
        let device_count = nvml.device_count()?;
        info!(devices = device_count, "NVML initialized");
        Ok(Self { nvml, device_count })
    }
}

impl GpuProvider for NvmlProvider {
    fn name(&self) -> &'static str {
        "nvml"
    }

    fn list_devices(&self) -> Result<Vec<GpuDeviceStats>, GpuError> {
        let mut devices = Vec::with_capacity(self.device_count as usize);

        for index in 0..self.device_count {
            let device = match self.nvml.device_by_index(index) {
                Ok(device) => device,
                Err(err) => {
                    debug!(index, error = %err, "NVML device handle unavailable");
                    continue;
                }
            };

            let utilization = device.utilization_rates().ok();
            let memory = device.memory_info().ok();

            devices.push(GpuDeviceStats {
                id: index,
                util: utilization.as_ref().map(|u| u.gpu).unwrap_or(0),
                mem_util: utilization.as_ref().map(|u| u.memory).unwrap_or(0),
                mem_used: memory.as_ref().map(|m| m.used / BYTES_PER_MIB).unwrap_or(0),
                mem_total: memory.as_ref().map(|m| m.total / BYTES_PER_MIB).unwrap_or(0),
                temp: device.temperature(TemperatureSensor::Gpu).unwrap_or(0),
                // milliwatts
                power: device.power_usage().map(|mw| mw / 1000).unwrap_or(0),
                fan: device.fan_speed(0).unwrap_or(0),
                name: device.name().unwrap_or_default(),
            });
        }

        Ok(devices)
    }

    fn cuda_version(&self) -> Option<String> {
        // encoded as major * 1000 + minor * 10
        let version = self.nvml.sys_cuda_driver_version().ok()?;
        Some(format!("{}.{}", version / 1000, (version % 1000) / 10))
    }
}
