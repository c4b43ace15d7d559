use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use si446x_rs::logging::{init_logger, log_debug, log_error, log_info, log_warn};
use si446x_rs::radio::{Notification, RadioConfig, ServiceBuilder, TRANSITIONS};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "si446x-cli")]
#[command(about = "CLI tool for the Si446x packet radio driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the driver until Ctrl-C
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Seconds between status reports, 0 for none
        #[arg(short, long, default_value = "0")]
        status_interval: u64,
    },
    /// Print the transition table
    Table,
    /// Load and validate a configuration file
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<RadioConfig> {
    match path {
        Some(path) => RadioConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => {
            log_warn("no --config given, using defaults");
            Ok(RadioConfig::default())
        }
    }
}

#[cfg(feature = "raspberry-pi")]
fn spawn_service(config: &RadioConfig) -> Result<si446x_rs::radio::Service> {
    use si446x_rs::radio::hal::RaspberryPiTransport;
    use std::sync::Arc;

    let builder = ServiceBuilder::new();
    let line = builder.interrupt_line();
    let transport = RaspberryPiTransport::new(config.spi_bus, &config.pins)
        .context("opening Si446x on SPI")?
        .with_interrupt_callback(Arc::new(move || line.raise()));
    Ok(builder.spawn(transport, config)?)
}

#[cfg(not(feature = "raspberry-pi"))]
fn spawn_service(config: &RadioConfig) -> Result<si446x_rs::radio::Service> {
    log_warn("built without raspberry-pi support, running against the simulated chip");
    Ok(ServiceBuilder::new().spawn(si446x_rs::radio::MockTransport::new(), config)?)
}

async fn run(config: RadioConfig, status_interval: u64) -> Result<()> {
    let mut service = spawn_service(&config)?;
    let handle = service.handle.clone();

    if !config.start_on_boot {
        let outcome = handle.control("TURNON").await?;
        log_info(&format!("TURNON -> {outcome}"));
    }

    let period = Duration::from_secs(status_interval.max(1));
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log_info("interrupted, powering down");
                handle.shutdown().await?;
                break;
            }
            notification = service.notifications.recv() => match notification {
                Some(Notification::NewStatus(label)) => log_info(&format!("status {label}")),
                Some(Notification::Receive { buffer, rssi }) => log_info(&format!(
                    "received {} bytes rssi 0x{:02x}: {}",
                    buffer.len(),
                    rssi,
                    si446x_rs::util::format_hex_compact(&buffer)
                )),
                Some(Notification::SendComplete(condition)) => {
                    log_info(&format!("send complete: {condition}"))
                }
                None => break,
            },
            _ = ticker.tick(), if status_interval > 0 => {
                log_info(&handle.status().await?.to_string());
            }
        }
    }

    match service.task.await.context("driver task panicked")? {
        Ok(()) => Ok(()),
        Err(e) => {
            log_error(&format!("driver failed: {e}"));
            Err(e.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            status_interval,
        } => {
            let config = load_config(config.as_ref())?;
            run(config, status_interval).await?;
        }
        Commands::Table => {
            for row in TRANSITIONS.iter() {
                let actions: Vec<String> = row.actions.iter().map(|a| format!("{a:?}")).collect();
                println!(
                    "{:<12} {:<15} {:<16} -> {}",
                    row.from.to_string(),
                    row.event.to_string(),
                    actions.join(","),
                    row.to
                );
            }
        }
        Commands::CheckConfig { config } => {
            let loaded = load_config(Some(&config))?;
            log_debug(&format!("{loaded:?}"));
            for list in loaded.config_lists()? {
                println!("{} list: {} strings", list.name(), list.len());
            }
            println!("{}", serde_json::to_string_pretty(&loaded)?);
        }
    }

    Ok(())
}
