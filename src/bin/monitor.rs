use anyhow::Result;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::net::IpAddr;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tuyacam_rs::{CameraConfig, CameraEvent, ControlConnection};

/// Connect to a camera, print its status, and follow motion events until
/// Ctrl+C.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The device id (gwId).
    #[arg(short, long)]
    device_id: String,
    /// The 16-character local key.
    #[arg(short, long)]
    local_key: String,
    /// Camera address; resolved via discovery when omitted.
    #[arg(short, long)]
    address: Option<IpAddr>,
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

    let mut config = CameraConfig::new(cli.device_id, &cli.local_key)?;
    config.address = cli.address;

    let conn = ControlConnection::new(config);
    let mut events = conn.subscribe();
    conn.connect().await?;

    let status = conn.get_status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    let motion_detection = conn.motion_enabled().await;
    info!(motion_detection, "camera reachable");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(CameraEvent::MotionDetected) => println!("motion detected"),
                Ok(CameraEvent::MotionCleared) => println!("motion cleared"),
                Ok(CameraEvent::Status(payload)) => println!("status: {payload}"),
                Ok(CameraEvent::Disconnected { reason }) => {
                    println!("disconnected: {reason}");
                    break;
                }
                Ok(CameraEvent::Connected) => {}
                Err(_) => break,
            },
            _ = signal::ctrl_c() => {
                info!("stopping");
                break;
            }
        }
    }

    conn.disconnect();
    Ok(())
}
