use crate::state::{floor_1dp, RamStats};
use std::fs;
use std::io;
use std::path::PathBuf;

const KIB_PER_GIB: f64 = 1024.0 * 1024.0;

pub struct MemoryReader {
    meminfo_path: PathBuf,
    ram_type: String,
}

impl MemoryReader {
    pub fn new(ram_type: Option<String>) -> Self {
        Self::with_path("/proc/meminfo", ram_type)
    }

    pub fn with_path(meminfo_path: impl Into<PathBuf>, ram_type: Option<String>) -> Self {
        Self {
            meminfo_path: meminfo_path.into(),
            ram_type: ram_type.unwrap_or_else(|| "Unknown".to_string()),
        }
    }

    pub fn read(&self) -> io::Result<RamStats> {
        let text = fs::read_to_string(&self.meminfo_path)?;
        Ok(parse_meminfo(&text, &self.ram_type))
    }

    /// Zero usage with the configured module type.
    pub fn unavailable(&self) -> RamStats {
        parse_meminfo("", &self.ram_type)
    }
}

pub fn parse_meminfo(text: &str, ram_type: &str) -> RamStats {
    let total_kb = meminfo_value(text, "MemTotal");
    let available_kb = meminfo_value(text, "MemAvailable");
    let used_kb = total_kb.saturating_sub(available_kb);

    RamStats {
        used: floor_1dp(used_kb as f64 / KIB_PER_GIB),
        total: floor_1dp(total_kb as f64 / KIB_PER_GIB),
        kind: ram_type.to_string(),
    }
}

fn meminfo_value(text: &str, key: &str) -> u64 {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim() == key)
        .and_then(|(_, v)| v.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "\
MemTotal:       32768000 kB
MemFree:         1000000 kB
MemAvailable:   16384000 kB
Buffers:          200000 kB
";

    #[test]
    fn converts_kib_to_gib_rounding_down() {
        let ram = parse_meminfo(MEMINFO, "DDR4");
        assert_eq!(ram.total, 31.2);
        assert_eq!(ram.used, 15.6);
        assert_eq!(ram.kind, "DDR4");
        assert_eq!(ram.usage_percent(), 50);
    }

    #[test]
    fn missing_fields_are_zero() {
        let ram = parse_meminfo("MemTotal: garbage kB\n", "Unknown");
        assert_eq!(ram.total, 0.0);
        assert_eq!(ram.used, 0.0);
        assert_eq!(ram.usage_percent(), 0);
    }

    #[test]
    fn unreadable_source_is_an_error() {
        let reader = MemoryReader::with_path("/nonexistent/meminfo", None);
        assert!(reader.read().is_err());
        let ram = reader.unavailable();
        assert_eq!(ram.total, 0.0);
        assert_eq!(ram.kind, "Unknown");
    }
}
