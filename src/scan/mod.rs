//! Service discovery: mDNS responses to device configurations

pub mod parsers;

#[cfg(test)]
mod tests;

use crate::error::Result;
use crate::mdns::{HostResponse, multicast_scan, unicast_scan};
use crate::types::{DeviceConfiguration, Protocol};
use parsers::{config_from_response, scan_service_types};
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Default scan window.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Scan parameters.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Specific hosts to scan (enables unicast mode)
    pub hosts: Vec<IpAddr>,
    /// Stop early as soon as any of these identifiers is seen
    pub identifiers: HashSet<String>,
    /// Restrict to these protocols (empty means all)
    pub protocols: HashSet<Protocol>,
    /// Scan window; default 3 seconds
    pub timeout: Option<Duration>,
}

fn wanted(options: &ScanOptions, config: &DeviceConfiguration) -> bool {
    if options.identifiers.is_empty() {
        return false;
    }
    config
        .identifiers()
        .iter()
        .any(|id| options.identifiers.contains(*id))
}

/// Merge a new configuration into the result set, fusing devices that
/// share any identifier.
fn merge_result(results: &mut Vec<DeviceConfiguration>, config: DeviceConfiguration) {
    if let Some(existing) = results.iter_mut().find(|c| c.same_device(&config)) {
        for service in config.services() {
            existing.add_service(service.clone());
        }
        if existing.device_info.raw_model.is_none() {
            existing.device_info.raw_model = config.device_info.raw_model.clone();
        }
        existing.deep_sleep |= config.deep_sleep;
    } else {
        results.push(config);
    }
}

/// Drop devices exposing only AirPlay: without a control protocol or an
/// audio receiver there is nothing to talk to.
fn suppress_airplay_only(results: Vec<DeviceConfiguration>) -> Vec<DeviceConfiguration> {
    results
        .into_iter()
        .filter(|config| {
            config.services().iter().any(|s| {
                matches!(
                    s.protocol,
                    Protocol::Mrp | Protocol::Dmap | Protocol::Companion | Protocol::Raop
                )
            })
        })
        .collect()
}

/// Discover devices on the network.
///
/// With `hosts` set the scan is unicast (including the wake knock for
/// sleeping devices); otherwise multicast. When `identifiers` is
/// non-empty the scan aborts as soon as any listed identifier is seen.
///
/// # Errors
///
/// Returns [`AtvError::Discovery`](crate::AtvError::Discovery) when the
/// scan sockets cannot be created.
pub async fn scan(options: ScanOptions) -> Result<Vec<DeviceConfiguration>> {
    let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
    let service_types = scan_service_types(&options.protocols);

    let (tx, mut rx) = mpsc::channel::<HostResponse>(32);
    let engine = if options.hosts.is_empty() {
        tokio::spawn({
            let service_types = service_types.clone();
            async move { multicast_scan(&service_types, timeout, tx).await }
        })
    } else {
        let hosts = options.hosts.clone();
        tokio::spawn({
            let service_types = service_types.clone();
            async move { unicast_scan(&hosts, &service_types, timeout, tx).await }
        })
    };

    let mut latest: std::collections::HashMap<IpAddr, DeviceConfiguration> =
        std::collections::HashMap::new();
    while let Some(response) = rx.recv().await {
        let Some(config) = config_from_response(&response) else {
            continue;
        };
        if wanted(&options, &config) {
            debug!("identifier match, aborting scan early");
            drop(rx);
            let _ = engine.await;
            return Ok(vec![config]);
        }
        latest.insert(response.address, config);
    }
    let _ = engine.await;

    let mut results = Vec::new();
    for (_, config) in latest {
        merge_result(&mut results, config);
    }
    let mut results = suppress_airplay_only(results);

    if !options.identifiers.is_empty() {
        results.retain(|config| wanted(&options, config));
    }
    results.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(results)
}
