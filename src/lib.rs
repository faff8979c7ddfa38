//! Local-network client for a Tuya-protocol security camera.
//!
//! Talks to the device directly, no cloud: a control channel (TCP 6668)
//! for commands, status, and motion notifications, and a media channel
//! (TCP 6669) delivering the raw video elementary stream. Devices with no
//! statically configured address are located with a UDP broadcast probe.

pub mod command;
pub mod config;
pub mod constants;
pub mod control;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod packet;
pub mod stream;

pub use command::{Dp, PtzDirection};
pub use config::{CameraConfig, ChecksumPolicy};
pub use control::{CameraEvent, ControlConnection, LinkState};
pub use discovery::resolve_address;
pub use error::CamError;
pub use stream::StreamConnection;
