//! The media connection: a second socket to the device's stream port that
//! turns the inbound byte stream back into discrete video access units.
//!
//! The channel runs under its own session key (`MD5(local_key ‖ "stream")`)
//! and some firmware sends individual video frames entirely unencrypted, so
//! decryption is best-effort: when it fails the raw bytes are passed
//! through rather than dropped, trading correctness for stream continuity.

use std::sync::Arc;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::command::StreamRequest;
use crate::config::{CameraConfig, ChecksumPolicy};
use crate::constants::{DISCOVERY_TIMEOUT, START_CODE, STOP_GRACE};
use crate::crypto::CamCipher;
use crate::discovery;
use crate::error::CamError;
use crate::packet::{self, CommandType, FrameBuffer};

struct StreamLink {
    write_half: OwnedWriteHalf,
    reader: JoinHandle<()>,
    cipher: CamCipher,
}

/// Client handle for the media channel.
pub struct StreamConnection {
    config: CameraConfig,
    link: Arc<Mutex<Option<StreamLink>>>,
}

impl StreamConnection {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            link: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.link
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|link| !link.reader.is_finished())
    }

    /// Connect to the media port, request the stream, and return the
    /// channel video payloads arrive on.
    ///
    /// Resolves as soon as the request is written; the device never
    /// acknowledges it.
    pub async fn start(&self) -> Result<mpsc::Receiver<Bytes>, CamError> {
        if let Some(link) = self.link.lock().unwrap().take() {
            debug!("discarding previous stream link");
            link.reader.abort();
        }

        let address = match self.config.address {
            Some(address) => address,
            None => {
                discovery::resolve_address(&self.config.device_id, DISCOVERY_TIMEOUT).await?
            }
        };

        info!(%address, port = self.config.media_port, "opening stream connection");
        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect((address, self.config.media_port)),
        )
        .await??;
        let (read_half, mut write_half) = stream.into_split();

        let session_key = CamCipher::stream_key(&self.config.local_key);
        let cipher = CamCipher::new(&session_key);

        let request = StreamRequest::start(&self.config.device_id);
        let encrypted = cipher.encrypt(&serde_json::to_vec(&request)?);
        // The media channel stamps frames with the wall clock instead of a
        // counter; the field is never used for correlation on this port.
        let frame = packet::encode(CommandType::StreamStart, unix_sequence(), &encrypted);
        write_half.write_all(&frame).await?;

        let (video_tx, video_rx) = mpsc::channel(64);
        let reader = tokio::spawn(read_loop(
            read_half,
            cipher.clone(),
            self.config.checksum_policy,
            video_tx,
            Arc::clone(&self.link),
        ));

        *self.link.lock().unwrap() = Some(StreamLink {
            write_half,
            reader,
            cipher,
        });

        Ok(video_rx)
    }

    /// Ask the device to stop, wait a short grace period, then close.
    ///
    /// The stop command is best-effort; a failed write still tears the
    /// connection down.
    pub async fn stop(&self) {
        let link = self.link.lock().unwrap().take();
        let Some(mut link) = link else {
            return;
        };

        let request = StreamRequest::stop(&self.config.device_id);
        match serde_json::to_vec(&request) {
            Ok(plain) => {
                let encrypted = link.cipher.encrypt(&plain);
                let frame = packet::encode(CommandType::StreamStop, unix_sequence(), &encrypted);
                if let Err(e) = link.write_half.write_all(&frame).await {
                    debug!(%e, "stream-stop write failed");
                }
            }
            Err(e) => debug!(%e, "stream-stop encode failed"),
        }

        tokio::time::sleep(STOP_GRACE).await;
        link.reader.abort();
        info!("stream connection closed");
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        if let Some(link) = self.link.lock().unwrap().take() {
            link.reader.abort();
        }
    }
}

fn unix_sequence() -> u32 {
    chrono::Utc::now().timestamp().max(0) as u32
}

/// Prepend the Annex-B start code when the device left it out.
fn with_start_code(payload: Vec<u8>) -> Bytes {
    if payload.starts_with(&START_CODE) || payload.starts_with(&START_CODE[1..]) {
        return Bytes::from(payload);
    }
    let mut unit = Vec::with_capacity(START_CODE.len() + payload.len());
    unit.extend_from_slice(&START_CODE);
    unit.extend_from_slice(&payload);
    Bytes::from(unit)
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    cipher: CamCipher,
    policy: ChecksumPolicy,
    video_tx: mpsc::Sender<Bytes>,
    link: Arc<Mutex<Option<StreamLink>>>,
) {
    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; 16 * 1024];
    'socket: loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                info!("stream closed by device");
                break;
            }
            Ok(n) => {
                frames.extend(&chunk[..n]);
                while let Some(frame) = frames.next_frame() {
                    if policy == ChecksumPolicy::Enforce && !frame.checksum_ok() {
                        warn!(sequence = frame.sequence, "dropping video frame with bad checksum");
                        continue;
                    }
                    if frame.command != CommandType::StreamData {
                        debug!(command = ?frame.command, "dropping non-stream frame");
                        continue;
                    }
                    // Best-effort decrypt: plaintext fallback keeps the
                    // stream alive on firmware that skips encryption.
                    let payload = match cipher.decrypt(&frame.payload) {
                        Ok(plain) => plain,
                        Err(_) => frame.payload.to_vec(),
                    };
                    if video_tx.send(with_start_code(payload)).await.is_err() {
                        debug!("video consumer gone, stopping reader");
                        break 'socket;
                    }
                }
            }
            Err(e) => {
                warn!(%e, "stream read error");
                break;
            }
        }
    }
    // Socket is gone; make is_streaming() reflect it.
    link.lock().unwrap().take();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Frame;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use serde_json::Value;
    use tokio::net::TcpListener;

    fn test_config(port: u16) -> CameraConfig {
        let mut cfg = CameraConfig::new("cam42", "0123456789abcdef")
            .unwrap()
            .with_address(IpAddr::from(Ipv4Addr::LOCALHOST));
        cfg.media_port = port;
        cfg
    }

    fn stream_cipher() -> CamCipher {
        CamCipher::new(&CamCipher::stream_key(b"0123456789abcdef"))
    }

    async fn read_frame(sock: &mut TcpStream) -> Frame {
        let mut frames = FrameBuffer::new();
        // One byte per read so the helper stops exactly at the frame
        // boundary and never consumes bytes belonging to the next frame
        // (which a fresh FrameBuffer on the following call would drop).
        let mut chunk = [0u8; 1];
        loop {
            if let Some(frame) = frames.next_frame() {
                return frame;
            }
            let n = sock.read(&mut chunk).await.unwrap();
            assert!(n > 0, "socket closed while waiting for a frame");
            frames.extend(&chunk[..n]);
        }
    }

    #[test]
    fn start_code_prefixing() {
        assert_eq!(
            with_start_code(vec![0x42, 0x43]).as_ref(),
            &[0, 0, 0, 1, 0x42, 0x43]
        );
        // Already marked: 4-byte and 3-byte start codes both pass through.
        assert_eq!(
            with_start_code(vec![0, 0, 0, 1, 0x42]).as_ref(),
            &[0, 0, 0, 1, 0x42]
        );
        assert_eq!(
            with_start_code(vec![0, 0, 1, 0x42]).as_ref(),
            &[0, 0, 1, 0x42]
        );
    }

    #[tokio::test]
    async fn stream_start_and_video_decode() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let cipher = stream_cipher();

            let frame = read_frame(&mut sock).await;
            assert_eq!(frame.command, CommandType::StreamStart);
            let plain = cipher.decrypt(&frame.payload).unwrap();
            let request: Value = serde_json::from_slice(&plain).unwrap();
            assert_eq!(request["devId"], "cam42");
            assert_eq!(request["quality"], 2);

            // A non-stream frame first (must be dropped)...
            let noise = cipher.encrypt(br#"{"dps":{}}"#);
            sock.write_all(&packet::encode(CommandType::Status, 1, &noise))
                .await
                .unwrap();
            // ...then one encrypted video frame without a start code.
            let video = cipher.encrypt(b"fake-h264-access-unit");
            sock.write_all(&packet::encode(CommandType::StreamData, 2, &video))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(sock);
        });

        let conn = StreamConnection::new(test_config(port));
        let mut video = conn.start().await.unwrap();
        assert!(conn.is_streaming());

        let unit = timeout(Duration::from_secs(1), video.recv())
            .await
            .expect("video before deadline")
            .expect("channel open");
        let mut expected = START_CODE.to_vec();
        expected.extend_from_slice(b"fake-h264-access-unit");
        assert_eq!(unit.as_ref(), expected);

        // The non-stream frame must not have produced a second unit.
        assert!(
            timeout(Duration::from_millis(200), video.recv())
                .await
                .is_err(),
            "exactly one video event expected"
        );

        server.abort();
    }

    #[tokio::test]
    async fn undecryptable_video_passes_through_raw() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _request = read_frame(&mut sock).await;
            // 21 bytes: not block-aligned, so decryption cannot succeed.
            sock.write_all(&packet::encode(
                CommandType::StreamData,
                7,
                b"\x00\x00\x00\x01raw-plain-unit...",
            ))
            .await
            .unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(sock);
        });

        let conn = StreamConnection::new(test_config(port));
        let mut video = conn.start().await.unwrap();

        let unit = timeout(Duration::from_secs(1), video.recv())
            .await
            .expect("video before deadline")
            .expect("channel open");
        assert_eq!(unit.as_ref(), b"\x00\x00\x00\x01raw-plain-unit...");

        server.abort();
    }

    #[tokio::test]
    async fn stop_sends_stream_stop_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let cipher = stream_cipher();
            let start = read_frame(&mut sock).await;
            assert_eq!(start.command, CommandType::StreamStart);
            let stop = read_frame(&mut sock).await;
            assert_eq!(stop.command, CommandType::StreamStop);
            let plain = cipher.decrypt(&stop.payload).unwrap();
            let request: Value = serde_json::from_slice(&plain).unwrap();
            assert_eq!(request["quality"], 0);
        });

        let conn = StreamConnection::new(test_config(port));
        let _video = conn.start().await.unwrap();
        conn.stop().await;
        assert!(!conn.is_streaming());

        server.await.unwrap();
    }
}
