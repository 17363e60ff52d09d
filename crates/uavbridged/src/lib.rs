//! uavbridged - UAVTalk telemetry bridge daemon
//!
//! This daemon terminates the UAVTalk link to a flight controller and
//! re-publishes typed object updates to local subscribers over a JSON
//! websocket:
//! - definition catalog loaded from XML at startup
//! - session handshake and enumeration against the controller
//! - ownership-aware fan-out between the link and N subscribers

pub mod config;
pub mod dispatcher;
pub mod websocket;

pub use config::Config;
pub use dispatcher::{Connection, Dispatcher, DispatcherHandle};
