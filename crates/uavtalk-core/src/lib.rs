//! UAVTalk Core Library
//!
//! This crate provides the schema side of the UAVTalk telemetry bridge:
//! object definitions parsed from the XML catalog, the ObjectID hash that
//! identifies them on the wire, and the codec that converts binary payloads
//! to and from field-keyed value trees.
//!
//! # Modules
//!
//! - [`types`]: Object definitions, packets, and dispatcher bus messages
//! - [`catalog`]: Definition catalog with normalization and Meta synthesis
//! - [`codec`]: Payload encoding/decoding against a definition
//! - [`objectid`]: ObjectID derivation hash
//! - [`xml`]: XML object-definition parsing
//! - [`error`]: Error types

pub mod catalog;
pub mod codec;
pub mod error;
pub mod objectid;
pub mod types;
pub mod xml;

#[cfg(test)]
mod test_vectors;

pub use catalog::Catalog;
pub use error::{CodecError, SchemaError};
pub use types::*;
