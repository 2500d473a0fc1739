//! Unique ID service
//!
//! Answers `generate` with a random 128-bit identifier. Shares nothing with
//! the broadcast engine.

use async_trait::async_trait;
use rand::RngCore;

use murmur_protocol::{Payload, ProtocolError};

use crate::runtime::Service;

/// Stateless `generate` handler.
#[derive(Debug, Default)]
pub struct UniqueIds;

impl UniqueIds {
    pub fn new() -> Self {
        Self
    }

    /// A fresh identifier, hex encoded.
    pub fn next_id(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

#[async_trait]
impl Service for UniqueIds {
    async fn handle(&self, _src: &str, payload: Payload) -> Result<Payload, ProtocolError> {
        match payload {
            Payload::Generate => Ok(Payload::GenerateOk { id: self.next_id() }),
            other => Err(ProtocolError::NotSupported {
                kind: other.kind().to_string(),
            }),
        }
    }
}
