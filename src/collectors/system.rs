use crate::state::SystemInfo;
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{System, SystemExt};

pub struct SystemReader {
    system: Mutex<System>,
}

impl SystemReader {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Identity fields do not change while the process runs; read them once at startup.
    pub fn static_info(&self) -> SystemInfo {
        let system = self.system.lock().unwrap_or_else(|p| p.into_inner());
        let os = system
            .long_os_version()
            .or_else(|| system.name())
            .unwrap_or_else(|| "--".to_string());
        let mut info = SystemInfo {
            hostname: system.host_name().unwrap_or_else(|| "--".to_string()),
            os,
            kernel: system.kernel_version().unwrap_or_else(|| "--".to_string()),
            ..SystemInfo::default()
        };
        info.uptime = format_uptime(system.uptime());
        info.load_avg = round_2dp(system.load_average().one);
        info
    }

    /// Uptime string and 1-minute load average, refreshed every CRG cycle.
    pub fn dynamic(&self) -> (String, f64) {
        let system = self.system.lock().unwrap_or_else(|p| p.into_inner());
        (
            format_uptime(system.uptime()),
            round_2dp(system.load_average().one),
        )
    }
}

impl Default for SystemReader {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_uptime(seconds: u64) -> String {
    if seconds < 60 {
        return "< 1m".to_string();
    }
    humantime::format_duration(Duration::from_secs(seconds - seconds % 60)).to_string()
}

fn round_2dp(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}
