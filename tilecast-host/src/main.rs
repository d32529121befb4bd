//! tilecast-host: entry point.
//!
//! ```text
//! tilecast-host                      Serve the configured image
//! tilecast-host --config <path>      Load a custom config TOML
//! tilecast-host --port COM4 --image logo.png
//! tilecast-host --inspect            Build and verify the catalog, no serial I/O
//! tilecast-host --gen-config         Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tilecast_host::config::HostConfig;
use tilecast_host::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tilecast-host", about = "Serve images to a serial tile display")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tilecast.toml")]
    config: PathBuf,

    /// Serial device, overriding `serial.port`.
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overriding `serial.baud`.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Image file, overriding `image.path`.
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Build the catalog, log a summary and exit without opening the port.
    #[arg(long)]
    inspect: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply CLI overrides.
    let mut config = HostConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    if let Some(baud) = cli.baud {
        config.serial.baud = baud;
    }
    if let Some(image) = cli.image {
        config.image.path = image;
    }

    // Init tracing.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tilecast-host v{}", env!("CARGO_PKG_VERSION"));
    info!("image: {}", config.image.path.display());
    info!("protocol: {}", config.protocol.generation);

    let service = HostService::new(config);
    if cli.inspect {
        service.inspect()?;
        return Ok(());
    }

    // Ctrl-C handler.
    let stop = service.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, stopping after the current packet");
        stop.cancel();
    });

    let summary = service.run().await?;
    info!(
        "done ({:?}): {} packets sent",
        summary.end, summary.stats.packets_sent
    );

    Ok(())
}
