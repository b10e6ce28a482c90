//! Pluggable byte-stream processors
//!
//! A pre-processor transforms fully serialized outgoing requests; a
//! post-processor transforms incoming bytes before response framing.
//! The HAP session channel implements both directions.

use super::HttpError;
use crate::protocol::hap::HapSession;

/// Transforms raw bytes on their way in and out of a connection.
pub trait ConnectionProcessor: Send {
    /// Process serialized outgoing bytes (e.g. encrypt).
    fn outgoing(&mut self, data: &[u8]) -> Result<Vec<u8>, HttpError>;

    /// Process received bytes before framing (e.g. decrypt).
    fn incoming(&mut self, data: &[u8]) -> Result<Vec<u8>, HttpError>;
}

/// Pass-through processor used before session security is established.
#[derive(Default)]
pub struct NoopProcessor;

impl ConnectionProcessor for NoopProcessor {
    fn outgoing(&mut self, data: &[u8]) -> Result<Vec<u8>, HttpError> {
        Ok(data.to_vec())
    }

    fn incoming(&mut self, data: &[u8]) -> Result<Vec<u8>, HttpError> {
        Ok(data.to_vec())
    }
}

impl ConnectionProcessor for HapSession {
    fn outgoing(&mut self, data: &[u8]) -> Result<Vec<u8>, HttpError> {
        self.encrypt(data)
            .map_err(|e| HttpError::Processor(e.to_string()))
    }

    fn incoming(&mut self, data: &[u8]) -> Result<Vec<u8>, HttpError> {
        self.decrypt(data)
            .map_err(|e| HttpError::Processor(e.to_string()))
    }
}
