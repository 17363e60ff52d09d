//! UAVTalk controller link
//!
//! Everything between the flight controller's byte stream and the typed
//! bus: CRC-8 integrity, frame recovery from an unreliable stream, the
//! link adapters (USB HID and TCP), the reader/writer task pair with
//! reconnect, the session-establishment state machine, and the optional
//! raw relay for a desktop GCS.
//!
//! # Modules
//!
//! - [`crc`]: CRC-8 table and checksum
//! - [`framing`]: incremental deframer and outbound frame encoder
//! - [`link`]: blocking transport adapters
//! - [`transport`]: reader/writer tasks and the reconnect loop
//! - [`session`]: handshake and session state machine
//! - [`relay`]: raw frame relay listener

pub mod crc;
pub mod framing;
pub mod link;
pub mod relay;
pub mod session;
pub mod transport;

pub use framing::{Deframer, FrameError};
pub use link::LinkConfig;
pub use session::Session;
pub use transport::LinkEvent;
