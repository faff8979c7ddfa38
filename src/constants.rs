// Protocol constants for the local camera protocol

use std::time::Duration;

/// TCP port for the command/control channel
pub const CONTROL_PORT: u16 = 6668;

/// TCP port for the media/stream channel
pub const MEDIA_PORT: u16 = 6669;

/// UDP ports probed during discovery
pub const DISCOVERY_PORTS: [u16; 2] = [6666, 6667];

/// 4-byte marker opening every frame
pub const MAGIC_HEADER: u32 = 0x0000_55AA;

/// 4-byte marker closing every frame
pub const MAGIC_FOOTER: u32 = 0x0000_AA55;

/// Big-endian byte form of [`MAGIC_HEADER`], used for resync scans
pub const MAGIC_HEADER_BYTES: [u8; 4] = MAGIC_HEADER.to_be_bytes();

/// Size of the fixed frame header: magic + command + sequence + length
pub const HEADER_SIZE: usize = 16;

/// Trailing bytes counted into `payload_length`: checksum + footer
pub const PAYLOAD_OVERHEAD: usize = 8;

/// Minimum buffered bytes before the parser will look at a frame
pub const MIN_SCAN_SIZE: usize = 20;

/// Upper bound on `payload_length`; anything larger is treated as corruption
pub const MAX_PAYLOAD_SIZE: usize = 2 * 1024 * 1024;

/// Annex-B start code expected in front of every video access unit
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Suffix mixed into the local key to derive the media-channel session key
pub const STREAM_KEY_SUFFIX: &[u8] = b"stream";

/// Timeout for opening either TCP connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Window a command waits for its matching response
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between keep-alive heartbeats on the control channel
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Client-side dwell before a motion event is considered cleared
pub const MOTION_DWELL: Duration = Duration::from_secs(30);

/// Grace delay between the stream-stop command and socket close
pub const STOP_GRACE: Duration = Duration::from_millis(500);

/// Default wait for a discovery reply
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
