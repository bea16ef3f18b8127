mod commands;
mod utils;

use clap::{Parser, Subcommand};
use hs1xx_client_rs::Hs1xxClientError;

#[derive(Subcommand, Debug, Default, Clone)]
enum Commands {
    /// Print the decoded device status
    #[default]
    Info,
    /// Print the raw system information reply
    Raw,
    /// Switch the relay on
    On,
    /// Switch the relay off
    Off,
    /// Poll the device and print every relay change
    Watch {
        #[arg(long, default_value = "5")]
        interval: u64,
    },
}

#[derive(Parser, Debug)]
struct Params {
    /// Hostname or IP address of the plug
    #[clap(long, env = "HS1XX_HOST")]
    host: String,
    /// Port number of the plug (default: 9999)
    #[clap(long, default_value = "9999")]
    port: u16,
    /// Request timeout in seconds
    #[clap(long, default_value = "5")]
    timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> Result<(), Hs1xxClientError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let params = Params::parse();

    match params.command.clone().unwrap_or_default() {
        Commands::Info => commands::get_device_info(params).await?,
        Commands::Raw => commands::get_raw_info(params).await?,
        Commands::On => commands::switch_relay(params, true).await?,
        Commands::Off => commands::switch_relay(params, false).await?,
        Commands::Watch { interval } => commands::watch(params, interval).await?,
    }

    Ok(())
}
