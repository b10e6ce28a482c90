//! Multicast and unicast DNS-SD engine
//!
//! A from-scratch DNS-over-UDP client. General zeroconf crates cannot
//! bundle several questions in one request, cannot target a specific
//! host for unicast scanning and do not surface the
//! `_device-info._tcp.local.` pseudo-record, all of which the scanner
//! relies on.

pub mod engine;
pub mod message;
pub mod publish;

#[cfg(test)]
mod tests;

pub use engine::{DiscoveredService, HostResponse, multicast_scan, unicast_scan};
pub use message::{DnsMessage, Question, RecordData, ResourceRecord, classes, types};
pub use publish::announce_service;

use thiserror::Error;

/// DNS engine errors
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("truncated DNS message at offset {0}")]
    Truncated(usize),

    #[error("bad compression pointer")]
    BadPointer,

    #[error("label too long: {0} bytes")]
    LabelTooLong(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
