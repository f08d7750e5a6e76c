mod activity;
mod collectors;
mod config;
mod http;
mod metrics;
mod sampler;
mod state;

use activity::ActivityTracker;
use axum::serve;
use clap::{Parser, Subcommand};
use collectors::{CrgCollector, HostCollector};
use config::{Config, DEFAULT_CONFIG_PATH};
use http::HttpAppState;
use metrics::Metrics;
use sampler::CrgIntervals;
use state::{HistoryStats, Snapshot, SnapshotStore};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "labmd")]
#[command(version, about = "Lab host telemetry agent")]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent (default).
    Server {
        /// Serve the API only; the dashboard is hosted elsewhere.
        #[arg(long)]
        skip_frontend: bool,
    },
    /// Print the effective configuration and a one-shot system overview.
    Info,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load_or_default(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Command::Server {
        skip_frontend: false,
    }) {
        Command::Info => {
            let config_path = cli.config;
            // sampling sleeps and GPU queries block
            let report = tokio::task::spawn_blocking(move || print_info(&config_path, &cfg));
            if let Err(err) = report.await {
                error!(error = %err, "info report failed");
                std::process::exit(1);
            }
        }
        Command::Server { skip_frontend } => run_server(cfg, skip_frontend).await,
    }
}

async fn run_server(cfg: Config, skip_frontend: bool) {
    info!(
        project = %cfg.project_name,
        version = %cfg.version,
        listen = %cfg.listen,
        "starting labmd"
    );
    info!(
        crg_active_secs = cfg.monitor.interval_crg_sec,
        crg_idle_secs = cfg.monitor.idle_interval_crg_sec,
        idle_timeout_secs = cfg.monitor.idle_timeout_sec,
        disk_hours = cfg.monitor.interval_disk_hours,
        "monitor settings"
    );

    let dist = if skip_frontend {
        info!("skipping dashboard assets, serving the API only");
        None
    } else {
        let dir = PathBuf::from(&cfg.dist_path);
        if !dir.is_dir() {
            error!(path = %dir.display(), "dashboard directory not found");
            std::process::exit(1);
        }
        info!(path = %dir.display(), "dashboard assets loaded");
        Some(dir)
    };

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, %addr, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let collector = {
        let cfg = cfg.clone();
        match tokio::task::spawn_blocking(move || HostCollector::new(&cfg)).await {
            Ok(c) => Arc::new(c),
            Err(err) => {
                error!(error = %err, "failed to initialize collectors");
                std::process::exit(1);
            }
        }
    };
    metrics.set_gpu_backend(collector.gpu_backend());

    let store = Arc::new(SnapshotStore::new(Snapshot::new(
        collector.system().static_info(),
        HistoryStats::new(&cfg.monitor),
    )));
    let (activity, wake) = ActivityTracker::new(cfg.monitor.idle_timeout());
    let activity = Arc::new(activity);
    let cfg = Arc::new(cfg);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let crg_task = sampler::spawn_crg_sampler(
        collector.clone(),
        store.clone(),
        activity.clone(),
        metrics.clone(),
        CrgIntervals::from_config(&cfg.monitor),
        wake,
        shutdown_rx.clone(),
    );
    let disk_task = sampler::spawn_disk_scanner(
        collector.clone(),
        store.clone(),
        metrics.clone(),
        cfg.monitor.disk_interval(),
        shutdown_rx.clone(),
    );

    let http_task = {
        let app = http::build_router(
            HttpAppState {
                metrics,
                store,
                activity,
                config: cfg.clone(),
            },
            dist,
        );
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            info!(%addr, "HTTP server listening");
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = crg_task.await;
    let _ = disk_task.await;
    let _ = http_task.await;
}

fn print_info(config_path: &str, cfg: &Config) {
    let collector = HostCollector::new(cfg);
    let monitor = &cfg.monitor;

    println!("=== labmd configuration ===");
    println!("Version:        {}", cfg.version);
    println!("Project Name:   {}", cfg.project_name);
    println!("Lab Name:       {}", cfg.lab_name);
    println!("Listen:         {}", cfg.listen);

    println!("=== Paths ===");
    let config_note = if Path::new(config_path).exists() {
        ""
    } else {
        " (not found, using defaults)"
    };
    println!("Config:         {config_path}{config_note}");
    println!("Frontend Dist:  {}", cfg.dist_path);

    println!("=== Monitor Settings ===");
    println!(
        "CRG Interval:   {}s (active) / {}s (idle)",
        monitor.interval_crg_sec, monitor.idle_interval_crg_sec
    );
    println!("Disk Interval:  {:.1}h", monitor.interval_disk_hours);
    println!("Idle Timeout:   {}s", monitor.idle_timeout_sec);
    println!(
        "History Size:   CPU={}, GPU={}, RAM={}",
        monitor.history_cpu, monitor.history_gpu, monitor.history_ram
    );
    println!("GPU Backend:    {}", collector.gpu_backend());

    println!("=== System Overview ===");
    let system = collector.system().static_info();
    println!("Hostname:     {}", system.hostname);
    println!("OS:           {}", system.os);
    println!("Kernel:       {}", system.kernel);
    println!("Uptime:       {}", system.uptime);

    let sample = collector.collect_crg();
    if !sample.cpu.model.is_empty() {
        println!("CPU:          {}", sample.cpu.model);
        println!(
            "CPU Cores:    {} cores / {} threads",
            sample.cpu.cores, sample.cpu.threads
        );
    }
    println!("RAM:          {:.1}GB ({})", sample.ram.total, sample.ram.kind);
    if !sample.gpus.is_empty() {
        println!("GPU:          {}", sample.gpu.name);
        println!("GPU Memory:   {}MB", sample.gpu.mem_total);
        println!("CUDA:         {}", sample.gpu.cuda);
    }

    let disk = match collector.collect_partitions() {
        Ok(disk) => disk,
        Err(err) => {
            println!("Disk:         unavailable ({err})");
            return;
        }
    };
    if disk.total > 0.0 {
        println!(
            "Disk:         {:.2}TB / {:.2}TB ({:.1}%)",
            disk.used / 1000.0,
            disk.total / 1000.0,
            disk.used / disk.total * 100.0
        );
    }
    for partition in &disk.partitions {
        println!(
            "  {:<12} {:<16} {:.1}GB / {:.1}GB",
            partition.path, partition.label, partition.used, partition.total
        );
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
