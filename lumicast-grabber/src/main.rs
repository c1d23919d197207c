//! lumicast-grabber: entry point.
//!
//! ```text
//! lumicast-grabber                  Capture and stream until Ctrl-C
//! lumicast-grabber --config <path>  Load a custom config TOML
//! lumicast-grabber --gen-config     Write default config to stdout
//! lumicast-grabber --list-monitors  Print adapters and their outputs
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lumicast_core::{Notification, Notifier, enumerate_monitors};
use lumicast_grabber::config::{GrabberConfig, LoggingConfig};
use lumicast_grabber::service::GrabberService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "lumicast-grabber",
    version,
    about = "Stream the desktop to Hyperion ambient-lighting servers"
)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "lumicast-grabber.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// List graphics adapters and their monitors, then exit.
    #[arg(long)]
    list_monitors: bool,
}

// ── Logging ──────────────────────────────────────────────────────

fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    if config.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", GrabberConfig::default().to_toml()?);
        return Ok(());
    }

    // --list-monitors: enumerate and exit.
    if cli.list_monitors {
        for adapter in enumerate_monitors()? {
            print!("{adapter}");
        }
        return Ok(());
    }

    let config = GrabberConfig::load(&cli.config)?;
    init_logging(&config.logging)?;

    info!("lumicast-grabber v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "capture: {} adapter {} monitor {}, 1/{} scale, {} fps max",
        config.capture.method,
        config.capture.settings.adapter_index,
        config.capture.settings.monitor_index,
        config.capture.settings.scaling_factor,
        config.capture.settings.max_fps
    );
    for server in &config.servers {
        info!("server: {server}");
    }

    // Surface operator notifications through the log.
    let (notifier, mut notifications) = Notifier::channel(32);
    tokio::spawn(async move {
        while let Some(note) = notifications.recv().await {
            match note {
                Notification::Info(msg) => info!("{msg}"),
                Notification::Error(msg) => warn!("{msg}"),
            }
        }
    });

    let handle = GrabberService::new(config.to_pipeline_config())
        .with_notifier(notifier)
        .spawn()?;

    // Ctrl-C handler.
    let control = handle.control();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        control.shutdown();
    });

    handle.wait().await?;
    Ok(())
}
