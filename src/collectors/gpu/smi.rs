use super::{GpuError, GpuProvider};
use crate::collectors::{parse_u32_loose, parse_u64_loose, run_tool};
use crate::state::GpuDeviceStats;

const QUERY: &str = concat!(
    "--query-gpu=index,name,memory.total,temperature.gpu,",
    "utilization.gpu,utilization.memory,memory.used,power.draw,fan.speed"
);
const FORMAT: &str = "--format=csv,noheader,nounits";

pub struct SmiProvider {
    program: String,
}

impl SmiProvider {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl GpuProvider for SmiProvider {
    fn name(&self) -> &'static str {
        "nvidia-smi"
    }

    fn list_devices(&self) -> Result<Vec<GpuDeviceStats>, GpuError> {
        let text = run_tool(&self.program, &[QUERY, FORMAT], false)?;
        Ok(parse_query_output(&text))
    }

    fn cuda_version(&self) -> Option<String> {
        let text = run_tool(&self.program, &[], false).ok()?;
        parse_cuda_version(&text)
    }
}

pub fn parse_query_output(text: &str) -> Vec<GpuDeviceStats> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(|v| v.trim()).collect();
            if parts.len() < 9 {
                return None;
            }

            Some(GpuDeviceStats {
                id: parse_u32_loose(parts[0]),
                name: parts[1].to_string(),
                mem_total: parse_u64_loose(parts[2]),
                temp: parse_u32_loose(parts[3]),
                util: parse_u32_loose(parts[4]),
                mem_util: parse_u32_loose(parts[5]),
                mem_used: parse_u64_loose(parts[6]),
                power: parse_u32_loose(parts[7]),
                fan: parse_u32_loose(parts[8]),
            })
        })
        .collect()
}

/// Extracts `12.2` from the `CUDA Version: 12.2` banner field.
pub fn parse_cuda_version(text: &str) -> Option<String> {
    const MARKER: &str = "CUDA Version:";
    let start = text.find(MARKER)? + MARKER.len();
    let version: String = text[start..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}
