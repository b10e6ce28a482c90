//! HAP pairing and session security
//!
//! Implements the Pair-Setup and Pair-Verify handshakes shared by MRP,
//! Companion, AirPlay 2 and RAOP, plus the per-connection encrypted
//! channel used after a handshake completes.

pub mod session;
pub mod setup;
pub mod tlv8;
pub mod verify;

#[cfg(test)]
mod tests;

pub use session::HapSession;
pub use setup::PairSetup;
pub use tlv8::{Tlv8Decoder, Tlv8Encoder, TlvError, TlvType};
pub use verify::PairVerify;

use crate::protocol::crypto::CryptoError;
use std::time::Duration;

/// Handshake progress for one pairing session.
///
/// Any message received out of order destroys the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet
    Idle,
    /// M1 sent, expecting M2
    M1Sent,
    /// M3 sent, expecting M4
    M3Sent,
    /// M5 sent, expecting M6
    M5Sent,
    /// Session keys derived
    Established,
    /// Handshake aborted
    Failed,
}

/// Outcome of feeding one message to a handshake.
#[derive(Debug)]
pub enum HandshakeStep {
    /// Send this message to the device
    Send(Vec<u8>),
    /// Handshake complete; session keys are available
    Done(SessionKeys),
}

/// Directional session keys derived at the end of a handshake.
#[derive(Clone)]
pub struct SessionKeys {
    /// Key for encrypting data we send (`Control-Write-Encryption-Key`)
    pub output_key: [u8; 32],
    /// Key for decrypting data we receive (`Control-Read-Encryption-Key`)
    pub input_key: [u8; 32],
    /// Raw shared secret, used for audio stream keys
    pub shared_secret: [u8; 32],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// Pairing method constants carried in TLV `Method` entries.
pub mod methods {
    /// Pair-Setup
    pub const PAIR_SETUP: u8 = 0;
    /// Pair-Setup with MFi auth
    pub const PAIR_SETUP_AUTH: u8 = 1;
    /// Pair-Verify
    pub const PAIR_VERIFY: u8 = 2;
}

/// Error codes reported by devices in TLV `Error` entries.
pub mod error_codes {
    pub const UNKNOWN: u8 = 0x01;
    pub const AUTHENTICATION: u8 = 0x02;
    pub const BACKOFF: u8 = 0x03;
    pub const MAX_PEERS: u8 = 0x04;
    pub const MAX_TRIES: u8 = 0x05;
    pub const UNAVAILABLE: u8 = 0x06;
    pub const BUSY: u8 = 0x07;
}

/// HAP handshake errors
#[derive(Debug, thiserror::Error)]
pub enum HapError {
    #[error("unexpected message in state {state:?}: expected M{expected}")]
    InvalidState {
        state: HandshakeState,
        expected: u8,
    },

    #[error("bad PIN")]
    BadPin,

    #[error("PIN required but not provided")]
    PinRequired,

    #[error("device signature verification failed")]
    SignatureVerificationFailed,

    #[error("device returned error code {code}")]
    DeviceError { code: u8 },

    #[error("device busy, retry after {0:?}")]
    BackOff(Duration),

    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl HapError {
    /// Translate a device TLV error entry, honoring back-off and
    /// retry-delay information when present.
    #[must_use]
    pub fn from_device(code: u8, retry_delay: Option<Duration>) -> Self {
        match code {
            error_codes::AUTHENTICATION => Self::BadPin,
            error_codes::BACKOFF | error_codes::BUSY | error_codes::MAX_TRIES => {
                Self::BackOff(retry_delay.unwrap_or(Duration::from_secs(60)))
            }
            _ => Self::DeviceError { code },
        }
    }
}
