//! Typed command payloads.
//!
//! Commands carry a JSON envelope merging the device identity with the data
//! points being set or queried. Responses come back as JSON, NUL-padded by
//! some firmware revisions; [`decode_payload`] strips the padding before
//! parsing.

use num_enum::{FromPrimitive, IntoPrimitive};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CamError;

/// Data-point codes reported and controlled on this device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u32)]
pub enum Dp {
    /// Mirror the picture vertically
    Flip = 103,
    /// Infrared night vision mode
    NightVision = 108,
    /// Motion was detected (reported, not settable)
    MotionDetected = 115,
    /// Stop an in-progress PTZ move
    PtzStop = 116,
    /// Pan/tilt control, takes a direction code string
    PtzControl = 119,
    /// Motion detection on/off
    MotionSwitch = 134,
    /// Recording / stream production on/off
    Record = 150,

    #[num_enum(catch_all)]
    Unknown(u32),
}

impl Dp {
    /// The JSON object key this data point uses ("134", "150", ...).
    pub fn key(self) -> String {
        u32::from(self).to_string()
    }
}

/// Pan/tilt directions, mapped to the device's string codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtzDirection {
    Up,
    Right,
    Down,
    Left,
}

impl PtzDirection {
    pub fn code(self) -> &'static str {
        match self {
            PtzDirection::Up => "0",
            PtzDirection::Right => "2",
            PtzDirection::Down => "4",
            PtzDirection::Left => "6",
        }
    }
}

/// The JSON envelope wrapped around every control-channel command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandEnvelope {
    #[serde(rename = "gwId")]
    pub gw_id: String,
    #[serde(rename = "devId")]
    pub dev_id: String,
    pub uid: String,
    pub t: u64,
    pub dps: Map<String, Value>,
}

impl CommandEnvelope {
    /// Build an envelope carrying `dps` for the given device.
    pub fn new(device_id: &str, dps: Map<String, Value>) -> Self {
        Self {
            gw_id: device_id.to_string(),
            dev_id: device_id.to_string(),
            uid: device_id.to_string(),
            t: chrono::Utc::now().timestamp().max(0) as u64,
            dps,
        }
    }

    /// An empty data-point query (full status).
    pub fn query(device_id: &str) -> Self {
        Self::new(device_id, Map::new())
    }

    /// Set a single data point.
    pub fn set(device_id: &str, dp: Dp, value: impl Into<Value>) -> Self {
        let mut dps = Map::new();
        dps.insert(dp.key(), value.into());
        Self::new(device_id, dps)
    }
}

/// The payload sent on the media port to request or end the stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest {
    #[serde(rename = "devId")]
    pub dev_id: String,
    pub t: u64,
    pub quality: u8,
}

impl StreamRequest {
    /// High-quality mode, requested when the stream starts.
    pub const QUALITY_HD: u8 = 2;

    pub fn start(device_id: &str) -> Self {
        Self {
            dev_id: device_id.to_string(),
            t: chrono::Utc::now().timestamp().max(0) as u64,
            quality: Self::QUALITY_HD,
        }
    }

    pub fn stop(device_id: &str) -> Self {
        Self {
            quality: 0,
            ..Self::start(device_id)
        }
    }
}

/// Parse a decrypted control-channel payload.
///
/// NUL padding on either end is stripped first. An empty payload decodes to
/// `Value::Null` rather than an error, since heartbeat replies carry none.
pub fn decode_payload(plain: &[u8]) -> Result<Value, CamError> {
    let start = plain.iter().position(|&b| b != 0).unwrap_or(plain.len());
    let end = plain.iter().rposition(|&b| b != 0).map_or(start, |i| i + 1);
    let trimmed = &plain[start..end];
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(trimmed)
        .map_err(|e| CamError::Decode(format!("payload is not valid JSON: {e}")))
}

/// Whether a reported DP value should count as "on" / "happened".
pub fn dp_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty() && s != "0" && s != "false",
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_identity_fields() {
        let env = CommandEnvelope::set("bf1234567890", Dp::Record, true);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["gwId"], "bf1234567890");
        assert_eq!(v["devId"], "bf1234567890");
        assert_eq!(v["uid"], "bf1234567890");
        assert!(v["t"].as_u64().unwrap() > 0);
        assert_eq!(v["dps"]["150"], json!(true));
    }

    #[test]
    fn query_envelope_has_empty_dps() {
        let env = CommandEnvelope::query("dev");
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["dps"], json!({}));
    }

    #[test]
    fn dp_keys_are_decimal_strings() {
        assert_eq!(Dp::MotionSwitch.key(), "134");
        assert_eq!(Dp::MotionDetected.key(), "115");
        assert_eq!(Dp::Unknown(999).key(), "999");
    }

    #[test]
    fn ptz_codes() {
        assert_eq!(PtzDirection::Up.code(), "0");
        assert_eq!(PtzDirection::Right.code(), "2");
        assert_eq!(PtzDirection::Down.code(), "4");
        assert_eq!(PtzDirection::Left.code(), "6");
    }

    #[test]
    fn decode_strips_nul_padding() {
        let mut padded = vec![0u8; 3];
        padded.extend_from_slice(br#"{"dps":{"134":true}}"#);
        padded.extend_from_slice(&[0u8; 5]);
        let v = decode_payload(&padded).unwrap();
        assert_eq!(v["dps"]["134"], json!(true));
    }

    #[test]
    fn decode_empty_is_null() {
        assert_eq!(decode_payload(&[]).unwrap(), Value::Null);
        assert_eq!(decode_payload(&[0, 0, 0]).unwrap(), Value::Null);
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(decode_payload(b"\x01\x02\x03").is_err());
    }

    #[test]
    fn truthiness() {
        assert!(dp_truthy(Some(&json!(true))));
        assert!(dp_truthy(Some(&json!(1))));
        assert!(dp_truthy(Some(&json!("1"))));
        assert!(!dp_truthy(Some(&json!(false))));
        assert!(!dp_truthy(Some(&json!(0))));
        assert!(!dp_truthy(Some(&json!(""))));
        assert!(!dp_truthy(Some(&Value::Null)));
        assert!(!dp_truthy(None));
    }

    #[test]
    fn stream_request_quality() {
        let start = StreamRequest::start("dev");
        assert_eq!(start.quality, StreamRequest::QUALITY_HD);
        let stop = StreamRequest::stop("dev");
        assert_eq!(stop.quality, 0);
    }
}
