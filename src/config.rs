use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/labmd/config.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_lab_name")]
    pub lab_name: String,
    #[serde(default = "default_dist_path")]
    pub dist_path: String,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default = "default_version", skip_deserializing)]
    pub version: String,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub disk: DiskConfig,
    #[serde(default)]
    pub gpu: GpuConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(rename = "intervalCRGSec", default = "default_interval_crg_sec")]
    pub interval_crg_sec: u64,
    #[serde(rename = "idleIntervalCRGSec", default = "default_idle_interval_crg_sec")]
    pub idle_interval_crg_sec: u64,
    #[serde(default = "default_idle_timeout_sec")]
    pub idle_timeout_sec: u64,
    #[serde(default = "default_interval_disk_hours")]
    pub interval_disk_hours: f64,
    #[serde(rename = "historyCPU", default = "default_history_len")]
    pub history_cpu: usize,
    #[serde(rename = "historyGPU", default = "default_history_len")]
    pub history_gpu: usize,
    #[serde(rename = "historyRAM", default = "default_history_len")]
    pub history_ram: usize,
    #[serde(default)]
    pub ram_type: Option<String>,
    #[serde(default = "default_cpu_sample_ms")]
    pub cpu_sample_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskConfig {
    #[serde(default = "default_included_partitions")]
    pub included_partitions: BTreeMap<String, String>,
    #[serde(default)]
    pub ignored_partitions: Vec<String>,
    #[serde(default = "default_ignored_users")]
    pub ignored_users: Vec<String>,
    #[serde(default = "default_home_root")]
    pub home_root: String,
    #[serde(default = "default_max_users_to_list")]
    pub max_users_to_list: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuConfig {
    #[serde(default = "default_smi_path")]
    pub smi_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            project_name: default_project_name(),
            lab_name: default_lab_name(),
            dist_path: default_dist_path(),
            admin: AdminConfig::default(),
            version: default_version(),
            monitor: MonitorConfig::default(),
            disk: DiskConfig::default(),
            gpu: GpuConfig::default(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_crg_sec: default_interval_crg_sec(),
            idle_interval_crg_sec: default_idle_interval_crg_sec(),
            idle_timeout_sec: default_idle_timeout_sec(),
            interval_disk_hours: default_interval_disk_hours(),
            history_cpu: default_history_len(),
            history_gpu: default_history_len(),
            history_ram: default_history_len(),
            ram_type: None,
            cpu_sample_ms: default_cpu_sample_ms(),
        }
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            included_partitions: default_included_partitions(),
            ignored_partitions: Vec::new(),
            ignored_users: default_ignored_users(),
            home_root: default_home_root(),
            max_users_to_list: default_max_users_to_list(),
        }
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            smi_path: default_smi_path(),
        }
    }
}

impl MonitorConfig {
    pub fn active_interval(&self) -> Duration {
        Duration::from_secs(self.interval_crg_sec)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_crg_sec)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_sec)
    }

    pub fn disk_interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_disk_hours * 3600.0)
    }

    pub fn cpu_sample_gap(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`Config::load_from_file`], but a missing file yields the built-in defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load_from_file(path.as_ref()) {
            Err(ConfigError::Read { path, source }) if source.kind() == ErrorKind::NotFound => {
                warn!(path = %path, "config file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }

        validate_monitor(&self.monitor)?;
        validate_disk(&self.disk)?;

        if self.gpu.smi_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "gpu.smiPath must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_monitor(cfg: &MonitorConfig) -> Result<(), ConfigError> {
    check_range("monitor.intervalCRGSec", cfg.interval_crg_sec, 1, 60)?;
    check_range("monitor.idleIntervalCRGSec", cfg.idle_interval_crg_sec, 10, 600)?;
    if cfg.idle_timeout_sec != 0 && !(10..=3600).contains(&cfg.idle_timeout_sec) {
        return Err(ConfigError::Validation(format!(
            "monitor.idleTimeoutSec must be 0 (never idle) or within 10..=3600, got {}",
            cfg.idle_timeout_sec
        )));
    }
    if !(0.1..=24.0).contains(&cfg.interval_disk_hours) {
        return Err(ConfigError::Validation(format!(
            "monitor.intervalDiskHours must be within 0.1..=24, got {}",
            cfg.interval_disk_hours
        )));
    }
    check_range("monitor.historyCPU", cfg.history_cpu as u64, 5, 100)?;
    check_range("monitor.historyGPU", cfg.history_gpu as u64, 5, 100)?;
    check_range("monitor.historyRAM", cfg.history_ram as u64, 5, 100)?;
    check_range("monitor.cpuSampleMs", cfg.cpu_sample_ms, 50, 1000)?;
    Ok(())
}

fn validate_disk(cfg: &DiskConfig) -> Result<(), ConfigError> {
    check_range("disk.maxUsersToList", cfg.max_users_to_list as u64, 1, 50)?;
    if cfg.home_root.trim().is_empty() {
        return Err(ConfigError::Validation(
            "disk.homeRoot must not be empty".to_string(),
        ));
    }
    for path in cfg.included_partitions.keys() {
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "disk.includedPartitions key '{path}' must be an absolute mount point"
            )));
        }
    }
    Ok(())
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    Err(ConfigError::Validation(format!(
        "{name} must be within {min}..={max}, got {value}"
    )))
}

fn default_listen() -> String {
    "0.0.0.0:8088".to_string()
}

fn default_project_name() -> String {
    "LabDash".to_string()
}

fn default_lab_name() -> String {
    "Lab Dashboard".to_string()
}

fn default_dist_path() -> String {
    "/usr/share/labmd/dist".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

const fn default_interval_crg_sec() -> u64 {
    2
}

const fn default_idle_interval_crg_sec() -> u64 {
    300
}

const fn default_idle_timeout_sec() -> u64 {
    60
}

const fn default_interval_disk_hours() -> f64 {
    4.0
}

const fn default_history_len() -> usize {
    20
}

const fn default_cpu_sample_ms() -> u64 {
    200
}

fn default_included_partitions() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("/".to_string(), "System Root".to_string()),
        ("/home".to_string(), "User Home".to_string()),
    ])
}

fn default_ignored_users() -> Vec<String> {
    vec!["lost+found".to_string()]
}

fn default_home_root() -> String {
    "/home".to_string()
}

const fn default_max_users_to_list() -> usize {
    12
}

fn default_smi_path() -> String {
    "nvidia-smi".to_string()
}
