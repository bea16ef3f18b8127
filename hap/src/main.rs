mod accessories;
mod bridge;
mod logging;
mod metrics;
mod settings;
mod sync;

pub use bridge::start_bridge;

use anyhow::{Context, Result};
use clap::Parser;
use clap_derive::Parser;
use logging::{LogConfig, RotationPeriod, setup_logging};
use settings::{Settings, parse_pin};
use tracing::{info, warn};

#[derive(Parser, Debug)]
pub struct Params {
    /// Hostname or IP address of the HS1xx plug
    #[clap(long, env = "HS1XX_HOST")]
    host: String,
    /// Port number of the plug (default: 9999)
    #[clap(long, default_value = "9999")]
    port: u16,
    /// HomeKit setup code, e.g. 123-45-678 (overrides settings and stored pairing config)
    #[clap(long)]
    pin: Option<String>,
    /// Settings file path (if not set, it will use default settings)
    #[clap(long)]
    settings: Option<String>,
    /// Directory for rolling log files (if not set, logs to stdout only)
    #[clap(long)]
    log_dir: Option<String>,
    /// Log rotation period: minutely, hourly, daily, never
    #[clap(long, default_value = "daily")]
    log_rotation: RotationPeriod,
    /// Number of log files to keep, 0 keeps all of them
    #[clap(long, default_value = "7")]
    max_log_files: usize,
    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(short, long)]
    verbose: bool,
}

fn load_settings(path: Option<&str>) -> Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings file {path}")),
        Err(e) => {
            warn!("Failed to read settings file {path} ({e}), using default settings");
            Ok(Settings::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let params = Params::parse();

    let log_config = params.log_dir.clone().map(|log_dir| LogConfig {
        log_dir,
        rotation: params.log_rotation,
        max_log_files: params.max_log_files,
        ..Default::default()
    });
    let _log_guard = setup_logging(log_config, params.verbose)?;

    let settings = load_settings(params.settings.as_deref())?;
    let pin = params.pin.as_deref().map(parse_pin).transpose()?;

    if let Some(port) = settings.metrics_port {
        metrics::init_metrics(port).context("Failed to start metrics exporter")?;
        metrics::Metrics::set_bridge_info(env!("CARGO_PKG_VERSION"));
        info!("Metrics available at http://0.0.0.0:{port}/metrics");
    }

    start_bridge(params.host.as_str(), params.port, pin, settings).await?;

    Ok(())
}
