use crate::collectors::{run_tool, DiskCollector, DiskScan, ToolError, SOURCE_DF, SOURCE_DU};
use crate::config::DiskConfig;
use crate::state::{floor_1dp, DiskStats, Partition, UserUsage};
use tracing::{debug, warn};

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

pub struct DiskScanner {
    cfg: DiskConfig,
    df_program: String,
    du_program: String,
}

impl DiskScanner {
    pub fn new(cfg: DiskConfig) -> Self {
        Self::with_programs(cfg, "df", "du")
    }

    pub fn with_programs(
        cfg: DiskConfig,
        df_program: impl Into<String>,
        du_program: impl Into<String>,
    ) -> Self {
        Self {
            cfg,
            df_program: df_program.into(),
            du_program: du_program.into(),
        }
    }

    /// Partitions plus per-user usage under the home root.
    pub fn scan(&self) -> DiskScan {
        let mut scan = DiskScan::default();

        match self.scan_partitions() {
            Ok(stats) => scan.stats = stats,
            Err(err) => {
                warn!(error = %err, "partition scan failed");
                scan.errors.push(SOURCE_DF);
            }
        }
        match self.scan_users() {
            Ok(users) => scan.stats.users = users,
            Err(err) => {
                warn!(error = %err, root = %self.cfg.home_root, "user usage scan failed");
                scan.errors.push(SOURCE_DU);
            }
        }

        scan
    }

    pub fn scan_partitions(&self) -> Result<DiskStats, ToolError> {
        let text = run_tool(&self.df_program, &["-B1"], false)?;
        Ok(parse_df(&text, &self.cfg))
    }

    pub fn scan_users(&self) -> Result<Vec<UserUsage>, ToolError> {
        let root = self.cfg.home_root.as_str();
        let text = run_tool(&self.du_program, &["-d", "1", "-B1", root], true)?;
        Ok(parse_du(&text, &self.cfg))
    }
}

impl DiskCollector for DiskScanner {
    fn collect_disk(&self) -> DiskScan {
        self.scan()
    }
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    floor_1dp(bytes as f64 / BYTES_PER_GIB)
}

/// Parses `df -B1` output into the configured partitions and their totals.
pub fn parse_df(text: &str, cfg: &DiskConfig) -> DiskStats {
    let mut stats = DiskStats::default();

    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            continue;
        }
        let mount = fields[5..].join(" ");
        if cfg.ignored_partitions.iter().any(|p| *p == mount) {
            continue;
        }
        let Some(label) = cfg.included_partitions.get(&mount) else {
            continue;
        };

        let total = bytes_to_gb(fields[1].parse().unwrap_or(0));
        let used = bytes_to_gb(fields[2].parse().unwrap_or(0));
        stats.total += total;
        stats.used += used;
        stats.partitions.push(Partition {
            path: mount,
            label: label.clone(),
            used,
            total,
        });
    }

    stats.total = round_1dp(stats.total);
    stats.used = round_1dp(stats.used);
    stats
}

/// Parses `du -d 1 -B1 <root>` output into the top users by usage.
pub fn parse_du(text: &str, cfg: &DiskConfig) -> Vec<UserUsage> {
    let root = cfg.home_root.trim_end_matches('/');

    let mut users: Vec<UserUsage> = text
        .lines()
        .filter_map(|line| {
            let (size, path) = line.trim().split_once(char::is_whitespace)?;
            let path = path.trim().trim_end_matches('/');
            if path.is_empty() || path == root {
                return None;
            }
            let name = path.rsplit('/').next().unwrap_or(path);
            if cfg.ignored_users.iter().any(|u| u == name) {
                return None;
            }
            let Ok(bytes) = size.parse::<u64>() else {
                debug!(line = %line, "skipping unparseable du line");
                return None;
            };
            Some(UserUsage {
                name: name.to_string(),
                used: bytes_to_gb(bytes),
            })
        })
        .collect();

    users.sort_by(|a, b| b.used.total_cmp(&a.used));
    if cfg.max_users_to_list > 0 {
        users.truncate(cfg.max_users_to_list);
    }
    users
}

fn round_1dp(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn disk_cfg() -> DiskConfig {
        DiskConfig {
            included_partitions: BTreeMap::from([
                ("/".to_string(), "System Root".to_string()),
                ("/home".to_string(), "User Home".to_string()),
                ("/data".to_string(), "Data".to_string()),
            ]),
            ignored_partitions: vec!["/data".to_string()],
            ..DiskConfig::default()
        }
    }

    fn df_output() -> String {
        format!(
            "Filesystem 1B-blocks Used Available Use% Mounted on\n\
             /dev/nvme0n1p2 {} {} 0 40% /\n\
             tmpfs {} {} 0 1% /run\n\
             /dev/sda1 {} {} 0 50% /home\n\
             /dev/sdb1 {} {} 0 10% /data\n",
            100 * GIB,
            40 * GIB,
            8 * GIB,
            GIB,
            2000 * GIB,
            1000 * GIB + GIB / 2,
            500 * GIB,
            50 * GIB,
        )
    }

    #[test]
    fn keeps_only_included_and_not_ignored_mounts() {
        let stats = parse_df(&df_output(), &disk_cfg());
        let paths: Vec<&str> = stats.partitions.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/home"]);
        assert_eq!(stats.partitions[0].label, "System Root");
        assert_eq!(stats.partitions[1].used, 1000.5);
        assert_eq!(stats.total, 2100.0);
        assert_eq!(stats.used, 1040.5);
    }

    #[test]
    fn gb_conversion_rounds_down() {
        assert_eq!(bytes_to_gb(GIB + GIB / 100 * 96), 1.9);
        assert_eq!(bytes_to_gb(0), 0.0);
    }

    #[test]
    fn mount_points_with_spaces_are_joined() {
        let mut cfg = disk_cfg();
        cfg.included_partitions
            .insert("/mnt/big disk".to_string(), "Big".to_string());
        let text = format!("/dev/sdc1 {} {} 0 1% /mnt/big disk\n", 10 * GIB, GIB);
        let stats = parse_df(&text, &cfg);
        assert_eq!(stats.partitions.len(), 1);
        assert_eq!(stats.partitions[0].label, "Big");
    }

    #[test]
    fn users_are_sorted_and_truncated() {
        let mut text = String::new();
        for i in 1..=15_u64 {
            text.push_str(&format!("{}\t/home/user{i:02}\n", i * GIB));
        }
        text.push_str(&format!("{}\t/home/lost+found\n", 999 * GIB));
        text.push_str(&format!("{}\t/home\n", 5000 * GIB));

        let users = parse_du(&text, &disk_cfg());
        assert_eq!(users.len(), 12);
        assert_eq!(users[0].name, "user15");
        assert_eq!(users[0].used, 15.0);
        assert!(users.iter().all(|u| users[0].used >= u.used));
        assert!(users.windows(2).all(|w| w[0].used >= w[1].used));
        assert!(users.iter().all(|u| u.name != "lost+found" && u.name != "home"));
    }

    #[test]
    fn root_with_trailing_slash_is_still_skipped() {
        let mut cfg = disk_cfg();
        cfg.home_root = "/home/".to_string();
        let users = parse_du(&format!("{}\t/home/alice\n{}\t/home\n", GIB, 2 * GIB), &cfg);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "alice");
    }

    #[test]
    fn tool_failures_are_reported_with_empty_results() {
        let scanner = DiskScanner::with_programs(disk_cfg(), "/nonexistent/df", "/nonexistent/du");
        let scan = scanner.scan();
        assert_eq!(scan.errors, vec![SOURCE_DF, SOURCE_DU]);
        assert!(scan.stats.partitions.is_empty());
        assert!(scan.stats.users.is_empty());
        assert_eq!(scan.stats.total, 0.0);
    }
}
