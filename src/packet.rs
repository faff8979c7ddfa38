//! Wire framing for both channels.
//!
//! Every exchange is one frame:
//!
//! ```text
//! magic_header    u32 BE  0x0000_55AA
//! command         u32 BE
//! sequence        u32 BE
//! payload_length  u32 BE  = len(encrypted_payload) + 8
//! encrypted_payload       variable
//! checksum        u32 BE  CRC-32 over everything before it
//! magic_footer    u32 BE  0x0000_AA55
//! ```
//!
//! `try_parse` consumes from the front of a buffer and never enforces the
//! checksum itself; a parsed [`Frame`] records whether it matched and the
//! connection applies its configured policy.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::debug;

use crate::constants::{
    HEADER_SIZE, MAGIC_FOOTER, MAGIC_HEADER, MAGIC_HEADER_BYTES, MAX_PAYLOAD_SIZE, MIN_SCAN_SIZE,
    PAYLOAD_OVERHEAD,
};

/// Command codes seen on the wire.
///
/// The low codes travel on the control channel; the 0x3x codes only appear
/// on the media port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u32)]
pub enum CommandType {
    /// Set data points
    Control = 0x07,
    /// Unsolicited status push from the device
    Status = 0x08,
    /// Keep-alive
    HeartBeat = 0x09,
    /// Query data points
    DpQuery = 0x0a,

    /// Request the video stream (media port)
    StreamStart = 0x30,
    /// One video payload (media port)
    StreamData = 0x31,
    /// End the video stream (media port)
    StreamStop = 0x32,

    #[num_enum(catch_all)]
    Unknown(u32),
}

/// One parsed frame. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command: CommandType,
    pub sequence: u32,
    pub payload: Bytes,
    checksum: u32,
    checksum_valid: bool,
}

impl Frame {
    /// Whether the trailing CRC matched the frame contents on receipt.
    pub fn checksum_ok(&self) -> bool {
        self.checksum_valid
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }
}

/// Result of one scan over the front of a receive buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// A complete frame; `consumed` bytes can be dropped from the buffer.
    Frame { frame: Frame, consumed: usize },
    /// The buffer holds a prefix of a frame; wait for more socket data.
    NeedMoreData,
    /// The buffer front is not frame-aligned. `resume_at` is the offset of
    /// the next magic-header candidate; `None` means discard everything.
    Desync { resume_at: Option<usize> },
}

/// Serialize one frame, computing a fresh checksum.
pub fn encode(command: CommandType, sequence: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + PAYLOAD_OVERHEAD);
    buf.put_u32(MAGIC_HEADER);
    buf.put_u32(command.into());
    buf.put_u32(sequence);
    buf.put_u32((payload.len() + PAYLOAD_OVERHEAD) as u32);
    buf.put_slice(payload);
    let crc = crc32fast::hash(&buf);
    buf.put_u32(crc);
    buf.put_u32(MAGIC_FOOTER);
    buf.freeze()
}

/// Try to parse one frame from the front of `buf`.
pub fn try_parse(buf: &[u8]) -> ScanOutcome {
    if buf.len() < MIN_SCAN_SIZE {
        return ScanOutcome::NeedMoreData;
    }

    if buf[..4] != MAGIC_HEADER_BYTES {
        return ScanOutcome::Desync {
            resume_at: find_magic(&buf[1..]).map(|i| i + 1),
        };
    }

    let payload_length = read_u32(buf, 12) as usize;
    if payload_length < PAYLOAD_OVERHEAD || payload_length > MAX_PAYLOAD_SIZE {
        // A length the frame cannot legally have means the magic match was
        // coincidental or the header itself is corrupt; scan past it.
        return ScanOutcome::Desync {
            resume_at: find_magic(&buf[1..]).map(|i| i + 1),
        };
    }

    let total = HEADER_SIZE + payload_length;
    if buf.len() < total {
        return ScanOutcome::NeedMoreData;
    }

    let command = CommandType::from_primitive(read_u32(buf, 4));
    let sequence = read_u32(buf, 8);
    let payload = Bytes::copy_from_slice(&buf[HEADER_SIZE..total - PAYLOAD_OVERHEAD]);
    let checksum = read_u32(buf, total - 8);
    let checksum_valid = crc32fast::hash(&buf[..total - PAYLOAD_OVERHEAD]) == checksum;

    ScanOutcome::Frame {
        frame: Frame {
            command,
            sequence,
            payload,
            checksum,
            checksum_valid,
        },
        consumed: total,
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    buf.windows(MAGIC_HEADER_BYTES.len())
        .position(|w| w == MAGIC_HEADER_BYTES)
}

/// Accumulating receive buffer for one connection.
///
/// Socket reads are appended with [`extend`](Self::extend) and complete
/// frames drained with [`next_frame`](Self::next_frame), which silently
/// discards garbage until it finds the next magic header.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match try_parse(&self.buf) {
                ScanOutcome::Frame { frame, consumed } => {
                    self.buf.advance(consumed);
                    return Some(frame);
                }
                ScanOutcome::NeedMoreData => return None,
                ScanOutcome::Desync {
                    resume_at: Some(offset),
                } => {
                    debug!(skipped = offset, "resyncing to next magic header");
                    self.buf.advance(offset);
                }
                ScanOutcome::Desync { resume_at: None } => {
                    debug!(discarded = self.buf.len(), "no magic header in buffer");
                    self.buf.clear();
                    return None;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
