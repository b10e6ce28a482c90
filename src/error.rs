//! Error types

use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AtvError>;

/// Main error type for all public operations.
#[derive(Debug, thiserror::Error)]
pub enum AtvError {
    /// Device discovery failed (scan failure, sleep-proxy timeout).
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Authentication failed (SRP proof mismatch, bad signature, wrong PIN).
    #[error("authentication failed: {message} (code {code:?})")]
    Authentication {
        /// Human-readable description
        message: String,
        /// Protocol-specific sub-code, when the device reported one
        code: Option<u8>,
    },

    /// Payload decryption failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Device refused pairing (disabled, busy, wrong PIN).
    #[error("pairing failed: {0}")]
    Pairing(String),

    /// Device temporarily rejects with a suggested minimum retry delay.
    #[error("device busy, back off for {0:?}")]
    BackOff(Duration),

    /// Socket lost or keep-alive timed out.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed frame or unexpected protocol state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Device acknowledged a command but reported failure.
    #[error("command failed: error {error_code}, handler status {handler_status}")]
    Command {
        /// `SendError` value from the device
        error_code: i32,
        /// `HandlerReturnStatus` value from the device
        handler_status: i32,
    },

    /// No configured protocol implements the requested operation.
    #[error("operation not supported by any connected protocol")]
    NotSupported,

    /// Argument rejected at the facade boundary.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// AirPlay device requires device authentication but no credentials exist.
    #[error("device authentication required but no credentials provided")]
    DeviceAuthRequired,

    /// Operation timed out.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AtvError {
    /// Shorthand for an [`AtvError::Authentication`] without a sub-code.
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            code: None,
        }
    }

    /// True when retrying the same operation may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BackOff(_) | Self::Timeout(_) | Self::Connection(_) | Self::Io(_)
        )
    }
}

impl From<crate::protocol::crypto::CryptoError> for AtvError {
    fn from(err: crate::protocol::crypto::CryptoError) -> Self {
        use crate::protocol::crypto::CryptoError;
        match err {
            CryptoError::DecryptionFailed(msg) => Self::Decryption(msg),
            other => Self::auth(other.to_string()),
        }
    }
}

impl From<crate::protocol::hap::HapError> for AtvError {
    fn from(err: crate::protocol::hap::HapError) -> Self {
        use crate::protocol::hap::HapError;
        match &err {
            HapError::BackOff(delay) => Self::BackOff(*delay),
            HapError::DeviceError { code } => Self::Authentication {
                message: "device rejected pairing".to_string(),
                code: Some(*code),
            },
            HapError::InvalidState { .. } | HapError::Tlv(_) => Self::Protocol(err.to_string()),
            _ => Self::auth(err.to_string()),
        }
    }
}

impl From<crate::mdns::DnsError> for AtvError {
    fn from(err: crate::mdns::DnsError) -> Self {
        Self::Discovery(err.to_string())
    }
}

impl From<crate::net::HttpError> for AtvError {
    fn from(err: crate::net::HttpError) -> Self {
        use crate::net::HttpError;
        match err {
            HttpError::Io(e) => Self::Io(e),
            HttpError::Timeout(d) => Self::Timeout(d),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<crate::storage::StorageError> for AtvError {
    fn from(err: crate::storage::StorageError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(AtvError::BackOff(Duration::from_secs(5)).is_recoverable());
        assert!(AtvError::Timeout(Duration::from_secs(1)).is_recoverable());
        assert!(!AtvError::NotSupported.is_recoverable());
        assert!(!AtvError::auth("bad PIN").is_recoverable());
    }

    #[test]
    fn auth_helper_has_no_code() {
        match AtvError::auth("mismatch") {
            AtvError::Authentication { code, .. } => assert!(code.is_none()),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
