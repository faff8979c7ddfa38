//! The control connection: one long-lived socket to the device's command
//! port, carrying sequence-correlated commands, keep-alive heartbeats, and
//! unsolicited status pushes.
//!
//! All socket writes funnel through a single writer task so heartbeats and
//! commands never interleave on the wire. The reader task owns the frame
//! buffer and routes decoded payloads either to the pending command that
//! registered the sequence number or to the event channel.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::command::{CommandEnvelope, Dp, PtzDirection, decode_payload, dp_truthy};
use crate::config::{CameraConfig, ChecksumPolicy};
use crate::constants::DISCOVERY_TIMEOUT;
use crate::crypto::CamCipher;
use crate::discovery;
use crate::error::CamError;
use crate::packet::{self, CommandType, Frame, FrameBuffer};

/// Lifecycle of the control link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Events surfaced to collaborators.
#[derive(Debug, Clone)]
pub enum CameraEvent {
    Connected,
    Disconnected { reason: String },
    /// Full payload of an unsolicited status push.
    Status(Value),
    MotionDetected,
    /// Fired by the client-side dwell timer, not by the device.
    MotionCleared,
}

struct Link {
    writer_tx: mpsc::Sender<Bytes>,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared {
    cipher: CamCipher,
    policy: ChecksumPolicy,
    heartbeat_interval: Duration,
    motion_dwell: Duration,
    state: Mutex<LinkState>,
    pending: Mutex<HashMap<u32, oneshot::Sender<Value>>>,
    seq: AtomicU32,
    events: broadcast::Sender<CameraEvent>,
    link: Mutex<Option<Link>>,
    motion_clear: Mutex<Option<JoinHandle<()>>>,
}

/// Client handle for the command channel.
pub struct ControlConnection {
    config: CameraConfig,
    shared: Arc<Shared>,
}

impl ControlConnection {
    pub fn new(config: CameraConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            cipher: CamCipher::new(&config.local_key),
            policy: config.checksum_policy,
            heartbeat_interval: config.heartbeat_interval,
            motion_dwell: config.motion_dwell,
            state: Mutex::new(LinkState::Disconnected),
            pending: Mutex::new(HashMap::new()),
            seq: AtomicU32::new(1),
            events,
            link: Mutex::new(None),
            motion_clear: Mutex::new(None),
        });
        Self { config, shared }
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.lock().unwrap()
    }

    /// Subscribe to connection and device events.
    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.shared.events.subscribe()
    }

    /// Open the control socket and start the reader, writer, and heartbeat
    /// tasks. A no-op when already connecting or connected.
    pub async fn connect(&self) -> Result<(), CamError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            match *state {
                LinkState::Disconnected => *state = LinkState::Connecting,
                LinkState::Connecting | LinkState::Connected => return Ok(()),
            }
        }

        let result = self.connect_inner().await;
        if result.is_err() {
            let mut state = self.shared.state.lock().unwrap();
            if *state == LinkState::Connecting {
                *state = LinkState::Disconnected;
            }
        }
        result
    }

    async fn connect_inner(&self) -> Result<(), CamError> {
        let address = match self.config.address {
            Some(address) => address,
            None => {
                discovery::resolve_address(&self.config.device_id, DISCOVERY_TIMEOUT).await?
            }
        };

        info!(%address, port = self.config.control_port, "opening control connection");
        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect((address, self.config.control_port)),
        )
        .await??;
        let (read_half, write_half) = stream.into_split();

        let (writer_tx, writer_rx) = mpsc::channel::<Bytes>(32);
        let writer = tokio::spawn(write_loop(write_half, writer_rx));
        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&self.shared)));
        let heartbeat = tokio::spawn(heartbeat_loop(writer_tx.clone(), Arc::clone(&self.shared)));

        *self.shared.link.lock().unwrap() = Some(Link {
            writer_tx,
            tasks: vec![writer, reader, heartbeat],
        });

        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != LinkState::Connecting {
                // The socket died while we were still wiring tasks up.
                drop(state);
                self.shared.teardown("connection closed during setup");
                return Err(CamError::Disconnected);
            }
            *state = LinkState::Connected;
        }
        let _ = self.shared.events.send(CameraEvent::Connected);
        Ok(())
    }

    /// Close the socket, cancel the heartbeat and dwell timers, and fail
    /// every in-flight command.
    pub fn disconnect(&self) {
        self.shared.teardown("disconnected by client");
    }

    /// Send one command and wait for the response matching its sequence
    /// number.
    pub async fn send_command(
        &self,
        command: CommandType,
        dps: Map<String, Value>,
    ) -> Result<Value, CamError> {
        if *self.shared.state.lock().unwrap() != LinkState::Connected {
            return Err(CamError::NotConnected);
        }
        let writer_tx = match self.shared.link.lock().unwrap().as_ref() {
            Some(link) => link.writer_tx.clone(),
            None => return Err(CamError::NotConnected),
        };

        let envelope = CommandEnvelope::new(&self.config.device_id, dps);
        let plain = serde_json::to_vec(&envelope)?;
        let encrypted = self.shared.cipher.encrypt(&plain);
        let sequence = self.shared.seq.fetch_add(1, Ordering::SeqCst);
        let frame = packet::encode(command, sequence, &encrypted);

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(sequence, tx);
        debug!(?command, sequence, "sending command");

        if writer_tx.send(frame).await.is_err() {
            self.shared.pending.lock().unwrap().remove(&sequence);
            return Err(CamError::Disconnected);
        }

        match timeout(self.config.command_timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            // Sender dropped: the connection tore down underneath us.
            Ok(Err(_)) => Err(CamError::Disconnected),
            Err(_) => {
                self.shared.pending.lock().unwrap().remove(&sequence);
                warn!(?command, sequence, "command timed out");
                Err(CamError::CommandTimeout)
            }
        }
    }

    /// Query the full data-point state.
    pub async fn get_status(&self) -> Result<Value, CamError> {
        self.send_command(CommandType::DpQuery, Map::new()).await
    }

    /// Whether motion detection is switched on. Any failure reads as
    /// `false` rather than an error.
    pub async fn motion_enabled(&self) -> bool {
        match self.get_status().await {
            Ok(status) => dp_truthy(
                status
                    .get("dps")
                    .and_then(|dps| dps.get(Dp::MotionSwitch.key())),
            ),
            Err(e) => {
                debug!(%e, "motion query failed, reporting disabled");
                false
            }
        }
    }

    pub async fn set_motion_detection(&self, enabled: bool) -> Result<(), CamError> {
        self.set_dp(Dp::MotionSwitch, enabled).await
    }

    /// Turn on stream production on the device side.
    pub async fn enable_recording(&self) -> Result<(), CamError> {
        self.set_dp(Dp::Record, true).await
    }

    pub async fn ptz(&self, direction: PtzDirection) -> Result<(), CamError> {
        self.set_dp(Dp::PtzControl, direction.code()).await
    }

    pub async fn ptz_stop(&self) -> Result<(), CamError> {
        self.set_dp(Dp::PtzStop, true).await
    }

    async fn set_dp(&self, dp: Dp, value: impl Into<Value>) -> Result<(), CamError> {
        let mut dps = Map::new();
        dps.insert(dp.key(), value.into());
        self.send_command(CommandType::Control, dps).await.map(|_| ())
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.shared.pending.lock().unwrap().len()
    }
}

impl Drop for ControlConnection {
    fn drop(&mut self) {
        self.shared.teardown("connection handle dropped");
    }
}

impl Shared {
    /// Idempotent shutdown: always reclaims tasks and timers, reports the
    /// state change only once.
    fn teardown(&self, reason: &str) {
        let was_up = {
            let mut state = self.state.lock().unwrap();
            let prev = *state;
            *state = LinkState::Disconnected;
            prev != LinkState::Disconnected
        };

        if let Some(link) = self.link.lock().unwrap().take() {
            for task in link.tasks {
                task.abort();
            }
        }
        if let Some(timer) = self.motion_clear.lock().unwrap().take() {
            timer.abort();
        }
        // Dropping the senders wakes every waiter with a Disconnected error.
        self.pending.lock().unwrap().clear();

        if was_up {
            info!(reason, "control connection closed");
            let _ = self.events.send(CameraEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    fn handle_frame(&self, frame: Frame) {
        if !frame.checksum_ok() {
            match self.policy {
                ChecksumPolicy::Enforce => {
                    warn!(command = ?frame.command, sequence = frame.sequence,
                        "dropping frame with bad checksum");
                    return;
                }
                ChecksumPolicy::Ignore => {
                    debug!(command = ?frame.command, sequence = frame.sequence,
                        "ignoring bad checksum");
                }
            }
        }

        let payload = if frame.payload.is_empty() {
            Value::Null
        } else {
            let plain = match self.cipher.decrypt(&frame.payload) {
                Ok(plain) => plain,
                Err(e) => {
                    warn!(%e, sequence = frame.sequence, "dropping undecryptable frame");
                    return;
                }
            };
            match decode_payload(&plain) {
                Ok(value) => value,
                Err(e) => {
                    warn!(%e, sequence = frame.sequence, "dropping unparseable frame");
                    return;
                }
            }
        };

        let waiter = self.pending.lock().unwrap().remove(&frame.sequence);
        if let Some(tx) = waiter {
            debug!(sequence = frame.sequence, "matched response");
            let _ = tx.send(payload);
            return;
        }

        match frame.command {
            CommandType::Status => self.handle_status(payload),
            other => {
                debug!(command = ?other, sequence = frame.sequence, "unsolicited frame")
            }
        }
    }

    fn handle_status(&self, payload: Value) {
        let motion = dp_truthy(
            payload
                .get("dps")
                .and_then(|dps| dps.get(Dp::MotionDetected.key())),
        );
        let _ = self.events.send(CameraEvent::Status(payload));
        if motion {
            info!("motion detected");
            let _ = self.events.send(CameraEvent::MotionDetected);
            self.arm_motion_clear();
        }
    }

    /// (Re)start the dwell timer; a fresh motion push extends the window.
    fn arm_motion_clear(&self) {
        let mut slot = self.motion_clear.lock().unwrap();
        if let Some(old) = slot.take() {
            old.abort();
        }
        let events = self.events.clone();
        let dwell = self.motion_dwell;
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(dwell).await;
            debug!("motion dwell elapsed");
            let _ = events.send(CameraEvent::MotionCleared);
        }));
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<Bytes>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_half.write_all(&frame).await {
            warn!(%e, "socket write failed");
            break;
        }
    }
}

async fn read_loop(mut read_half: OwnedReadHalf, shared: Arc<Shared>) {
    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; 4096];
    let reason = loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => break "connection closed by device".to_string(),
            Ok(n) => {
                frames.extend(&chunk[..n]);
                while let Some(frame) = frames.next_frame() {
                    shared.handle_frame(frame);
                }
            }
            Err(e) => break format!("read error: {e}"),
        }
    };
    shared.teardown(&reason);
}

/// Fire-and-forget keep-alives; a missed heartbeat is logged, never fatal.
async fn heartbeat_loop(writer_tx: mpsc::Sender<Bytes>, shared: Arc<Shared>) {
    let mut ticker = interval(shared.heartbeat_interval);
    ticker.tick().await; // the first tick completes immediately
    loop {
        ticker.tick().await;
        let sequence = shared.seq.fetch_add(1, Ordering::SeqCst);
        let frame = packet::encode(CommandType::HeartBeat, sequence, &[]);
        debug!(sequence, "heartbeat");
        if writer_tx.send(frame).await.is_err() {
            debug!("writer gone, stopping heartbeat");
            break;
        }
    }
}
