//! HTTP/1.1 and RTSP/1.0 connection plumbing
//!
//! One connection type carries both protocols; the framing is shared
//! and only the status line differs. Pluggable processors encrypt
//! outgoing bytes after serialization and decrypt incoming bytes
//! before framing, which is how HAP channel security slots in.

pub mod connection;
pub mod message;
pub mod processor;

#[cfg(test)]
mod tests;

pub use connection::HttpConnection;
pub use message::{Headers, HttpRequest, HttpResponse};
pub use processor::{ConnectionProcessor, NoopProcessor};

use std::time::Duration;
use thiserror::Error;

/// Default reply timeout: a connection without an answer for this long
/// is considered dead.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(20);

/// HTTP/RTSP plumbing errors
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid status line: {0}")]
    InvalidStatusLine(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid chunked encoding")]
    InvalidChunk,

    #[error("response too large: {0} bytes")]
    ResponseTooLarge(usize),

    #[error("connection closed by peer")]
    Closed,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("processor failed: {0}")]
    Processor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
