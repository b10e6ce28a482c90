//! One-shot mDNS service announcements
//!
//! Used by the DMAP pairing flow, which must publish a Bonjour service
//! for the device to find and connect back to.

use super::message::{
    DnsMessage, FLAGS_RESPONSE, RecordData, ResourceRecord, classes, types,
};
use super::DnsError;
use super::engine::{MDNS_GROUP, MDNS_PORT};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, UdpSocket as StdUdpSocket};
use tokio::net::UdpSocket;
use tracing::debug;

const ANNOUNCE_TTL: u32 = 120;

/// Best-effort local IPv4 used in published A records.
///
/// # Errors
///
/// Returns an error when no route to the multicast group exists.
pub fn local_address() -> Result<Ipv4Addr, DnsError> {
    // Routing trick: connecting a UDP socket picks the outgoing address
    let socket = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((MDNS_GROUP, MDNS_PORT))?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(addr) => Ok(addr),
        IpAddr::V6(_) => Ok(Ipv4Addr::LOCALHOST),
    }
}

/// Announce a service instance on the local link.
///
/// Sends an unsolicited response with PTR, SRV, TXT and A records,
/// repeated twice as responders conventionally do.
///
/// # Errors
///
/// Returns [`DnsError`] when the records cannot be sent.
pub async fn announce_service(
    service_type: &str,
    instance_name: &str,
    port: u16,
    properties: HashMap<String, String>,
) -> Result<(), DnsError> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "atvlink".to_string());
    let target = format!("{host}.local");
    let instance = format!("{instance_name}.{service_type}");
    let address = local_address()?;

    let message = DnsMessage {
        flags: FLAGS_RESPONSE,
        answers: vec![ResourceRecord {
            name: service_type.to_string(),
            rtype: types::PTR,
            rclass: classes::IN,
            ttl: ANNOUNCE_TTL,
            data: RecordData::Ptr(instance.clone()),
        }],
        additionals: vec![
            ResourceRecord {
                name: instance.clone(),
                rtype: types::SRV,
                rclass: classes::CACHE_FLUSH,
                ttl: ANNOUNCE_TTL,
                data: RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port,
                    target: target.clone(),
                },
            },
            ResourceRecord {
                name: instance,
                rtype: types::TXT,
                rclass: classes::CACHE_FLUSH,
                ttl: ANNOUNCE_TTL,
                data: RecordData::Txt(properties),
            },
            ResourceRecord {
                name: target,
                rtype: types::A,
                rclass: classes::CACHE_FLUSH,
                ttl: ANNOUNCE_TTL,
                data: RecordData::A(address),
            },
        ],
        ..DnsMessage::default()
    };

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    let encoded = message.encode();
    for _ in 0..2 {
        socket.send_to(&encoded, (MDNS_GROUP, MDNS_PORT)).await?;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    debug!(%address, "announced service {instance_name}.{service_type}");
    Ok(())
}
