//! Connection configuration.

use std::net::IpAddr;
use std::time::Duration;

use crate::constants::{
    COMMAND_TIMEOUT, CONNECT_TIMEOUT, CONTROL_PORT, HEARTBEAT_INTERVAL, MEDIA_PORT, MOTION_DWELL,
};
use crate::error::CamError;

/// What to do with an inbound frame whose trailing CRC does not match.
///
/// Real devices have been observed sending incorrect checksums, so the
/// default tolerates them; `Enforce` drops the frame instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumPolicy {
    #[default]
    Ignore,
    Enforce,
}

/// Everything a connection needs to know about one camera.
///
/// Read-only after construction; both connections share a clone.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub device_id: String,
    pub local_key: [u8; 16],
    /// Statically configured address. `None` means resolve via discovery.
    pub address: Option<IpAddr>,
    pub control_port: u16,
    pub media_port: u16,
    pub checksum_policy: ChecksumPolicy,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub motion_dwell: Duration,
}

impl CameraConfig {
    pub fn new(device_id: impl Into<String>, local_key: &str) -> Result<Self, CamError> {
        let key: [u8; 16] = local_key
            .as_bytes()
            .try_into()
            .map_err(|_| CamError::InvalidKey)?;
        Ok(Self {
            device_id: device_id.into(),
            local_key: key,
            address: None,
            control_port: CONTROL_PORT,
            media_port: MEDIA_PORT,
            checksum_policy: ChecksumPolicy::default(),
            connect_timeout: CONNECT_TIMEOUT,
            command_timeout: COMMAND_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            motion_dwell: MOTION_DWELL,
        })
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_must_be_16_bytes() {
        assert!(CameraConfig::new("dev", "0123456789abcdef").is_ok());
        assert!(matches!(
            CameraConfig::new("dev", "short"),
            Err(CamError::InvalidKey)
        ));
        assert!(matches!(
            CameraConfig::new("dev", "0123456789abcdef0"),
            Err(CamError::InvalidKey)
        ));
    }

    #[test]
    fn defaults_match_protocol_numbers() {
        let cfg = CameraConfig::new("dev", "0123456789abcdef").unwrap();
        assert_eq!(cfg.control_port, 6668);
        assert_eq!(cfg.media_port, 6669);
        assert_eq!(cfg.checksum_policy, ChecksumPolicy::Ignore);
        assert!(cfg.address.is_none());
    }
}
