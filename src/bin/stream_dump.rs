use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tuyacam_rs::{CameraConfig, StreamConnection};

/// Start the video stream and dump the raw elementary stream to a file.
///
/// The output is Annex-B encoded video, playable with e.g.
/// `ffplay -f h264 out.264`.
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
    /// Output path for the elementary stream.
    #[arg(short, long, default_value = "out.264")]
    output: PathBuf,
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

    let mut out = File::create(&cli.output)
        .await
        .with_context(|| format!("failed to create {:?}", cli.output))?;

    let conn = StreamConnection::new(config);
    let mut video = conn.start().await?;
    info!(output = ?cli.output, "streaming; press Ctrl+C to stop");

    let mut units = 0u64;
    let mut bytes = 0u64;
    loop {
        tokio::select! {
            unit = video.recv() => match unit {
                Some(unit) => {
                    units += 1;
                    bytes += unit.len() as u64;
                    out.write_all(&unit).await?;
                }
                None => {
                    info!("stream ended");
                    break;
                }
            },
            _ = signal::ctrl_c() => {
                info!("stopping");
                break;
            }
        }
    }

    conn.stop().await;
    out.flush().await?;
    info!(units, bytes, "done");
    Ok(())
}
