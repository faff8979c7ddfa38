use anyhow::Result;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tuyacam_rs::resolve_address;

/// Locate a camera on the local network via UDP broadcast.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The device id (gwId) to look for.
    #[arg(short, long)]
    device_id: String,
    /// How long to wait for a reply, in seconds.
    #[arg(short, long, default_value_t = 5)]
    timeout_secs: u64,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn setup_logging(verbosity: &Verbosity<InfoLevel>) {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).without_time())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.verbose);

    let address =
        resolve_address(&cli.device_id, Duration::from_secs(cli.timeout_secs)).await?;
    println!("{address}");
    Ok(())
}
