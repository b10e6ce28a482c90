//! Media Remote Protocol: length-prefixed protobuf over HAP-encrypted TCP

pub mod connection;
pub mod framing;
pub mod messages;
pub mod player;
pub mod protocol;

#[cfg(test)]
mod tests;

pub use connection::MrpConnection;
pub use messages::{Payload, ProtocolMessage};
pub use player::PlayerRegistry;
pub use protocol::MrpClient;
