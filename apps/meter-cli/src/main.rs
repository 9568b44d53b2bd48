use anyhow::Result;
use clap::{Parser, Subcommand};
use meter_registry::{
    load_config_file, DeviceRegistry, DriverCatalog, DriverParams, MeterEntry, MeterTable,
    MetricsHub,
};
use meter_transport::{SerialLink, TtyLink};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "meter",
    version,
    about = "Metering hardware helper",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports
    Ports,
    /// Start one device, poll it a few times and print its record as JSON
    Probe {
        /// Driver name (p1ib, wimbib, temperx232, mock)
        #[arg(long)]
        driver: String,
        /// Driver parameters, e.g. "ip=192.168.1.40,multiplier=1000"
        #[arg(long, default_value = "")]
        params: String,
        /// Refresh cycles after initialization
        #[arg(long, default_value_t = 0u32)]
        refreshes: u32,
        /// Seconds between refresh cycles
        #[arg(long, default_value_t = 1.0)]
        interval: f64,
    },
    /// Validate a configuration file and show how each entry would be started
    Config {
        /// Path to a JSON or YAML configuration file
        #[arg(long, default_value = "/etc/config.json")]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Probe {
            driver,
            params,
            refreshes,
            interval,
        } => probe(&driver, &params, refreshes, interval),
        Commands::Config { file } => check_config(&file),
    }
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn list_ports() -> Result<()> {
    let ports = TtyLink::list()?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{}\t{}", port.name, port.driver);
    }
    Ok(())
}

fn probe(driver: &str, params: &str, refreshes: u32, interval: f64) -> Result<()> {
    let catalog = DriverCatalog::builtin();
    if catalog.get(driver).is_none() {
        anyhow::bail!(
            "unknown driver: {driver} (known: {})",
            catalog.names().join(", ")
        );
    }
    let pause = Duration::try_from_secs_f64(interval)
        .map_err(|e| anyhow::anyhow!("invalid interval {interval}: {e}"))?;
    let entries = [MeterEntry {
        driver: driver.to_string(),
        parameters: params.to_string(),
    }];

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let hub = MetricsHub::new().map_err(|e| anyhow::anyhow!("metrics init: {e}"))?;
        let mut registry = DeviceRegistry::start(&entries, &catalog, hub.dev.clone()).await;
        let Some(mut record) = registry.record(1) else {
            registry.shutdown().await;
            anyhow::bail!("device did not come up; run with RUST_LOG=debug for details");
        };
        for cycle in 1..=refreshes {
            tokio::time::sleep(pause).await;
            if registry.refresh_all().await > 0 {
                error!(cycle, "refresh failed");
            }
            if let Some(latest) = registry.record(1) {
                record = latest;
            }
        }
        registry.shutdown().await;
        println!("{}", serde_json::to_string_pretty(&record)?);
        info!(
            polls_ok = hub.dev.polls_ok.get(),
            polls_failed = hub.dev.polls_failed.get(),
            "probe done"
        );
        Ok::<_, anyhow::Error>(())
    })
}

fn check_config(file: &Path) -> Result<()> {
    let cfg = load_config_file(file)?;
    let catalog = DriverCatalog::builtin();
    println!(
        "{}: {} meter(s), poll interval {}s",
        file.display(),
        cfg.meters.len(),
        cfg.poll_interval_secs
    );
    let mut unknown = 0;
    for (i, entry) in cfg.meters.iter().enumerate() {
        let params = DriverParams::parse(&entry.parameters);
        let status = if catalog.get(&entry.driver).is_some() {
            "ok"
        } else {
            unknown += 1;
            "unknown driver"
        };
        let target = params
            .ip()
            .or_else(|| params.device())
            .unwrap_or("-");
        println!("{}\t{}\t{}\t{}", i + 1, entry.driver, target, status);
    }
    if unknown > 0 {
        println!("{unknown} entr{} will be skipped", if unknown == 1 { "y" } else { "ies" });
    }
    Ok(())
}
