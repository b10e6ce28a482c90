//! DMAP/DAAP protocol: HTTP control plus tag/length/value payloads

pub mod codec;
pub mod pairing;
pub mod protocol;
pub mod push;
pub mod tags;

#[cfg(test)]
mod tests;

pub use codec::{DmapError, DmapItem, DmapLookup, DmapValue, decode, encode, first};
pub use pairing::DmapPairing;
pub use protocol::DmapClient;
pub use push::DmapPushUpdater;
