//! One-shot UDP device discovery.
//!
//! Cameras answer a broadcast probe carrying their device id. Any datagram
//! that contains the id string is accepted as a reply and the sender's
//! source address becomes the device's address.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout};
use tracing::{debug, info};

use crate::constants::DISCOVERY_PORTS;
use crate::error::CamError;

#[derive(Serialize)]
struct DiscoveryProbe<'a> {
    #[serde(rename = "gwId")]
    gw_id: &'a str,
}

/// Broadcast for `device_id` and return the address it answers from.
pub async fn resolve_address(device_id: &str, wait: Duration) -> Result<IpAddr, CamError> {
    let targets: Vec<SocketAddr> = DISCOVERY_PORTS
        .iter()
        .map(|&port| (Ipv4Addr::BROADCAST, port).into())
        .collect();
    resolve_via(device_id, &targets, wait).await
}

/// Probe the given targets; the broadcast addresses in production, a
/// loopback responder in tests.
pub(crate) async fn resolve_via(
    device_id: &str,
    targets: &[SocketAddr],
    wait: Duration,
) -> Result<IpAddr, CamError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let probe = serde_json::to_vec(&DiscoveryProbe { gw_id: device_id })?;
    for target in targets {
        socket.send_to(&probe, target).await?;
        debug!(%target, "sent discovery probe");
    }

    let deadline = Instant::now() + wait;
    let mut buf = [0u8; 1500];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CamError::DiscoveryTimeout);
        }
        match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                if contains(&buf[..len], device_id.as_bytes()) {
                    info!(device_id, address = %from.ip(), "device discovered");
                    return Ok(from.ip());
                }
                debug!(from = %from, "ignoring datagram without our device id");
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(CamError::DiscoveryTimeout),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
