//! Multicast and unicast DNS-SD scanning

use super::message::{DnsMessage, Question, RecordData, types};
use super::DnsError;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval, timeout_at};
use tracing::{debug, trace};

/// mDNS multicast group
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
/// mDNS port
pub const MDNS_PORT: u16 = 5353;

/// Pseudo-service carrying the device model in a TXT record.
pub const DEVICE_INFO_SERVICE: &str = "_device-info._tcp.local";
/// Service advertised by sleep proxies answering for sleeping peers.
pub const SLEEP_PROXY_SERVICE: &str = "_sleep-proxy._udp.local";

/// Ports probed by the TCP wake knock before unicast scanning.
const KNOCK_PORTS: [u16; 4] = [3689, 7000, 49152, 32498];

/// Keep each query packet under a conservative single-packet budget.
const MAX_QUERY_BYTES: usize = 1200;

/// One service instance discovered on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    /// Service type, e.g. `_airplay._tcp.local`
    pub service_type: String,
    /// Instance name with the type suffix stripped
    pub name: String,
    /// TCP port from the SRV record
    pub port: u16,
    /// TXT properties
    pub properties: HashMap<String, String>,
}

/// Everything learned about one responding host.
#[derive(Debug, Clone)]
pub struct HostResponse {
    /// Host address (A record, falling back to the packet source)
    pub address: IpAddr,
    /// Services discovered so far
    pub services: Vec<DiscoveredService>,
    /// Model from the `_device-info` pseudo-record
    pub model: Option<String>,
    /// Response came from a sleep proxy answering for a sleeping device
    pub deep_sleep: bool,
}

/// Incremental per-host record aggregation.
///
/// Responses may arrive split across several packets; records are
/// merged until the scan window closes or the caller stops listening.
#[derive(Default)]
pub(crate) struct Aggregate {
    instances: HashMap<String, HashSet<String>>,
    locations: HashMap<String, (u16, String)>,
    properties: HashMap<String, HashMap<String, String>>,
    addresses: HashMap<String, Ipv4Addr>,
    model: Option<String>,
    is_sleep_proxy: bool,
    saw_zero_ttl_address: bool,
}

impl Aggregate {
    fn merge(&mut self, message: &DnsMessage) {
        for record in message.all_records() {
            match &record.data {
                RecordData::Ptr(instance) => {
                    let service_type = record.name.trim_end_matches('.').to_string();
                    if service_type == SLEEP_PROXY_SERVICE {
                        self.is_sleep_proxy = true;
                        continue;
                    }
                    let entry = self.instances.entry(service_type).or_default();
                    if record.ttl == 0 {
                        // Goodbye message removes the service
                        entry.remove(instance.trim_end_matches('.'));
                    } else {
                        entry.insert(instance.trim_end_matches('.').to_string());
                    }
                }
                RecordData::Srv { port, target, .. } => {
                    self.locations.insert(
                        record.name.trim_end_matches('.').to_string(),
                        (*port, target.trim_end_matches('.').to_string()),
                    );
                }
                RecordData::Txt(properties) => {
                    let name = record.name.trim_end_matches('.');
                    if name.ends_with(DEVICE_INFO_SERVICE) {
                        if let Some(model) = properties.get("model") {
                            self.model = Some(model.clone());
                        }
                        continue;
                    }
                    self.properties
                        .entry(name.to_string())
                        .or_default()
                        .extend(properties.clone());
                }
                RecordData::A(addr) => {
                    if addr.is_link_local() {
                        continue;
                    }
                    if record.ttl == 0 {
                        self.saw_zero_ttl_address = true;
                    }
                    self.addresses
                        .insert(record.name.trim_end_matches('.').to_string(), *addr);
                }
                RecordData::Raw(_) => {}
            }
        }
    }

    fn response(&self, source: IpAddr) -> HostResponse {
        let mut services = Vec::new();
        for (service_type, instances) in &self.instances {
            for instance in instances {
                let name = instance
                    .strip_suffix(service_type.as_str())
                    .map_or(instance.as_str(), |n| n.trim_end_matches('.'));
                let port = self.locations.get(instance).map_or(0, |(port, _)| *port);
                services.push(DiscoveredService {
                    service_type: service_type.clone(),
                    name: name.to_string(),
                    port,
                    properties: self.properties.get(instance).cloned().unwrap_or_default(),
                });
            }
        }
        services.sort_by(|a, b| a.service_type.cmp(&b.service_type));

        let address = self
            .addresses
            .values()
            .next()
            .copied()
            .map_or(source, IpAddr::V4);

        HostResponse {
            address,
            services,
            model: self.model.clone(),
            deep_sleep: self.is_sleep_proxy && self.saw_zero_ttl_address,
        }
    }
}

/// Bundle PTR questions into as few packets as possible.
///
/// Every request also asks for `_device-info._tcp.local.`; when the
/// combined request would exceed a single UDP packet it is split, but
/// all questions of one packet stay together.
#[must_use]
pub fn build_queries(service_types: &[String]) -> Vec<DnsMessage> {
    let mut all: Vec<String> = service_types.to_vec();
    if !all.iter().any(|s| s == DEVICE_INFO_SERVICE) {
        all.push(DEVICE_INFO_SERVICE.to_string());
    }

    let mut messages = Vec::new();
    let mut pending: Vec<Question> = Vec::new();
    for service in all {
        pending.push(Question::ptr(service, true));
        let candidate = DnsMessage::query(pending.clone());
        if candidate.encode().len() > MAX_QUERY_BYTES && pending.len() > 1 {
            let overflow = pending.pop();
            messages.push(DnsMessage::query(std::mem::take(&mut pending)));
            pending.extend(overflow);
        }
    }
    if !pending.is_empty() {
        messages.push(DnsMessage::query(pending));
    }
    messages
}

fn accept_packet(
    data: &[u8],
    source: SocketAddr,
    aggregates: &mut HashMap<IpAddr, Aggregate>,
) -> Option<HostResponse> {
    if source.ip() == IpAddr::V4(MDNS_GROUP) {
        return None;
    }
    if let IpAddr::V4(v4) = source.ip()
        && v4.is_link_local()
    {
        return None;
    }
    let message = match DnsMessage::decode(data) {
        Ok(message) => message,
        Err(err) => {
            debug!(%source, "dropping malformed mDNS packet: {err}");
            return None;
        }
    };
    if message.answers.is_empty() && message.additionals.is_empty() {
        return None;
    }

    trace!(%source, answers = message.answers.len(), "mDNS response");
    let aggregate = aggregates.entry(source.ip()).or_default();
    aggregate.merge(&message);
    Some(aggregate.response(source.ip()))
}

/// Scan the local link via multicast.
///
/// Emits an updated [`HostResponse`] whenever a host's aggregate
/// changes; ends at the timeout or as soon as the receiver is dropped.
///
/// # Errors
///
/// Returns [`DnsError`] when the socket cannot be created.
pub async fn multicast_scan(
    service_types: &[String],
    scan_timeout: Duration,
    sender: mpsc::Sender<HostResponse>,
) -> Result<(), DnsError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    let queries: Vec<Vec<u8>> = build_queries(service_types)
        .iter()
        .map(DnsMessage::encode)
        .collect();

    let deadline = Instant::now() + scan_timeout;
    let mut resend = interval(Duration::from_secs(1));
    let mut aggregates: HashMap<IpAddr, Aggregate> = HashMap::new();
    let mut buf = vec![0u8; 9000];

    loop {
        tokio::select! {
            _ = resend.tick() => {
                for query in &queries {
                    socket.send_to(query, (MDNS_GROUP, MDNS_PORT)).await?;
                }
            }
            received = timeout_at(deadline, socket.recv_from(&mut buf)) => {
                let Ok(received) = received else {
                    return Ok(());
                };
                let (len, source) = received?;
                if let Some(response) = accept_packet(&buf[..len], source, &mut aggregates)
                    && sender.send(response).await.is_err()
                {
                    // Caller aborted the scan
                    return Ok(());
                }
            }
        }
    }
}

/// Keep knocking TCP ports on a host to wake it from deep sleep.
async fn wake_knock(address: IpAddr) {
    let mut tick = interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        for port in KNOCK_PORTS {
            // A SYN is enough; outcome does not matter
            let _ = tokio::time::timeout(
                Duration::from_millis(250),
                TcpStream::connect((address, port)),
            )
            .await;
        }
    }
}

/// Scan specific hosts via unicast DNS.
///
/// A TCP knock runs alongside each host's query loop so that sleeping
/// devices wake up and answer before the window closes.
///
/// # Errors
///
/// Returns [`DnsError`] when the socket cannot be created.
pub async fn unicast_scan(
    hosts: &[IpAddr],
    service_types: &[String],
    scan_timeout: Duration,
    sender: mpsc::Sender<HostResponse>,
) -> Result<(), DnsError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    let queries: Vec<Vec<u8>> = build_queries(service_types)
        .iter()
        .map(DnsMessage::encode)
        .collect();

    let knockers: Vec<_> = hosts
        .iter()
        .map(|host| tokio::spawn(wake_knock(*host)))
        .collect();

    let deadline = Instant::now() + scan_timeout;
    let mut resend = interval(Duration::from_secs(1));
    let mut aggregates: HashMap<IpAddr, Aggregate> = HashMap::new();
    let mut buf = vec![0u8; 9000];

    let result = loop {
        tokio::select! {
            _ = resend.tick() => {
                let mut failed = None;
                'send: for host in hosts {
                    for query in &queries {
                        if let Err(err) = socket.send_to(query, (*host, MDNS_PORT)).await {
                            failed = Some(err);
                            break 'send;
                        }
                    }
                }
                if let Some(err) = failed {
                    break Err(err.into());
                }
            }
            received = timeout_at(deadline, socket.recv_from(&mut buf)) => {
                let Ok(received) = received else {
                    break Ok(());
                };
                let (len, source) = match received {
                    Ok(received) => received,
                    Err(err) => break Err(err.into()),
                };
                if !hosts.contains(&source.ip()) {
                    continue;
                }
                if let Some(response) = accept_packet(&buf[..len], source, &mut aggregates)
                    && sender.send(response).await.is_err()
                {
                    break Ok(());
                }
            }
        }
    };

    for knocker in knockers {
        knocker.abort();
    }
    result
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Feed one raw packet through the aggregation path.
    pub fn feed(
        data: &[u8],
        source: SocketAddr,
        aggregates: &mut HashMap<IpAddr, Aggregate>,
    ) -> Option<HostResponse> {
        accept_packet(data, source, aggregates)
    }
}
