use anyhow::Result;
use clap::Parser;
use meter_registry::{load_config_file, DeviceRegistry, DriverCatalog, MeterTable, MetricsHub};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "meter-daemon")]
#[command(about = "Polls the configured meters and keeps their records current")]
struct Args {
    /// Configuration file; `.yml`/`.yaml` is read as YAML, anything else as JSON
    #[arg(short, long, default_value = "/etc/config.json")]
    config: PathBuf,

    /// Poll interval in seconds, overriding the configuration file
    #[arg(long)]
    interval: Option<u64>,

    /// Print the metrics exposition when shutting down
    #[arg(long)]
    dump_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let args = Args::parse();

    info!("meter-daemon starting");
    let config = load_config_file(&args.config)?;
    let interval = args
        .interval
        .map(|s| Duration::from_secs(s.max(1)))
        .unwrap_or_else(|| config.poll_interval());
    info!(
        config = %args.config.display(),
        meters = config.meters.len(),
        ?interval,
        "configuration loaded"
    );

    let hub = MetricsHub::new().map_err(|e| anyhow::anyhow!("Failed to create metrics: {}", e))?;
    let catalog = DriverCatalog::builtin();
    let mut registry = DeviceRegistry::start(&config.meters, &catalog, hub.dev.clone()).await;

    for index in 1..=registry.record_count() {
        match registry.record(index) {
            Some(rec) => info!(
                device = index,
                driver = %rec.driver,
                identity = %rec.identity,
                channels = rec.channels.len(),
                "device ready"
            ),
            None => warn!(device = index, "device unavailable"),
        }
    }

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                stop.cancel();
            }
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    });

    registry.run(interval, cancel).await;
    registry.shutdown().await;

    if args.dump_metrics {
        print!("{}", hub.encode_text());
    }
    info!("meter-daemon stopped");
    Ok(())
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
