use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use hrstream::config::Config;
use hrstream::logging;
use hrstream::prelude::*;


const SIMULATED_NAME: &str = "Simulated HRM";
const SIMULATED_ADDRESS: &str = "00:00:00:00:00:01";

#[derive(Parser)]
#[command(name = "hrstream", about = "Stream heart rate from a Bluetooth LE heart rate monitor")]
struct Cli {
    /// JSON configuration file; defaults are used when it does not exist
    #[arg(long, default_value = "hrstream.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List nearby named BLE devices
    Scan {
        #[arg(long)]
        timeout: Option<f64>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Connect to a heart rate monitor and print every reading
    Stream {
        /// Platform address as printed by `scan`
        #[arg(long, conflicts_with = "index")]
        address: Option<String>,
        /// Position in a fresh scan, starting at 1
        #[arg(long)]
        index: Option<usize>,
        #[arg(long, requires = "address")]
        name: Option<String>,
    },
    /// Run the full pipeline against a simulated heart rate monitor
    Simulate {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    logging::init_logger(&config.log)?;

    match cli.command {
        Command::Scan { timeout, limit } => {
            let transport: Arc<dyn Transport> = Arc::new(BtleTransport::new(config.connect_timeout()).await?);
            let scanner = Scanner::new(transport, DeviceRegistry::new()).with_keywords(config.name_keywords.clone());
            let timeout = match timeout {
                Some(secs) => Duration::try_from_secs_f64(secs)?,
                None => config.scan_timeout(),
            };

            let found = scanner.try_scan(timeout, limit.unwrap_or(config.scan_limit)).await?;
            if found.is_empty() {
                println!("No named BLE devices found");
            }
            for (i, device) in found.iter().enumerate() {
                println!("{}. {} | {}", i + 1, device.name, device.address);
            }
        }
        Command::Stream { address, index, name } => {
            let transport: Arc<dyn Transport> = Arc::new(BtleTransport::new(config.connect_timeout()).await?);
            let registry = DeviceRegistry::new();

            match address {
                Some(address) => registry.set_device(address, name)?,
                None => {
                    let scanner = Scanner::new(transport.clone(), registry.clone())
                        .with_keywords(config.name_keywords.clone());
                    scanner.try_scan(config.scan_timeout(), config.scan_limit).await?;
                    select_from_scan(&registry, index.unwrap_or(1))?;
                }
            }

            run_session(transport, registry, &config, None).await?;
        }
        Command::Simulate { seconds } => {
            let transport = FakeTransport::new()
                .with_advertisement(Some(SIMULATED_NAME), SIMULATED_ADDRESS)
                .with_random_heart_rate(Duration::from_millis(800));
            let transport: Arc<dyn Transport> = Arc::new(transport);
            let registry = DeviceRegistry::new();

            Scanner::new(transport.clone(), registry.clone())
                .try_scan(Duration::ZERO, config.scan_limit)
                .await?;
            select_from_scan(&registry, 1)?;

            run_session(transport, registry, &config, Some(Duration::from_secs(seconds))).await?;
        }
    }
    Ok(())
}

fn select_from_scan(registry: &DeviceRegistry, index: usize) -> Result<()> {
    let results = registry.last_scan_results();
    let Some(device) = index.checked_sub(1).and_then(|i| results.get(i)) else {
        bail!("no device at position {index}, {} found", results.len());
    };
    registry.set_device(device.address.clone(), Some(device.name.clone()))?;
    Ok(())
}

/// Streams until Ctrl-C, the link drops, or `limit` elapses.
async fn run_session(
    transport: Arc<dyn Transport>,
    registry: DeviceRegistry,
    config: &Config,
    limit: Option<Duration>,
) -> Result<()> {
    let sink = ReadingSink::with_callback(|bpm| println!("heartbeat: {bpm}"))
        .logging_to(DailyLog::new(&config.log_dir));
    let monitor = HrMonitor::new(transport, registry.clone(), sink).with_poll_interval(config.poll_interval());

    if let Some(device) = registry.selected() {
        println!("Selected: {} ({})", device.name.as_deref().unwrap_or("Unknown"), device.address);
    }
    monitor.connect().await?;

    let mut state = monitor.watch_state();
    let link_lost = async move {
        let _ = state.wait_for(|s| *s != ConnectionState::Streaming).await.map(|_| ());
    };
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = link_lost => println!("Device disconnected"),
        _ = deadline => info!("Time limit reached"),
    }

    monitor.disconnect().await;
    println!("Last heart rate: {} ({})", monitor.latest_bpm(), monitor.state().label());
    Ok(())
}
