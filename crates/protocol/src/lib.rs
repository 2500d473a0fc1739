//! Murmur wire protocol
//!
//! This crate defines the envelope and body types exchanged between murmur
//! nodes and the network harness: one JSON object per line, with the body
//! discriminated by its `type` field.

pub mod errors;
pub mod message;

pub use errors::{ErrorCode, ProtocolError};
pub use message::{Body, Envelope, Payload, RawEnvelope, Topology};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
