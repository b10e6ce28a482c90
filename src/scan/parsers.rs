//! Protocol-specific interpretation of discovered services

use crate::mdns::{DiscoveredService, HostResponse};
use crate::protocol::airplay::AirPlayFeatures;
use crate::types::{DeviceConfiguration, PairingRequirement, Protocol, Service};
use std::collections::HashSet;

/// Zeroconf service types and the protocols they map to.
const SERVICE_TABLE: [(&str, Protocol); 7] = [
    ("_mediaremotetv._tcp.local", Protocol::Mrp),
    ("_touch-able._tcp.local", Protocol::Dmap),
    ("_appletv-v2._tcp.local", Protocol::Dmap),
    ("_hscp._tcp.local", Protocol::Dmap),
    ("_airplay._tcp.local", Protocol::AirPlay),
    ("_raop._tcp.local", Protocol::Raop),
    ("_companion-link._tcp.local", Protocol::Companion),
];

/// Service types to query for a protocol filter (empty means all).
#[must_use]
pub fn scan_service_types(protocols: &HashSet<Protocol>) -> Vec<String> {
    SERVICE_TABLE
        .iter()
        .filter(|(_, protocol)| protocols.is_empty() || protocols.contains(protocol))
        .map(|(service_type, _)| (*service_type).to_string())
        .collect()
}

fn parse_mrp(discovered: &DiscoveredService) -> Service {
    let mut service = Service::new(Protocol::Mrp, discovered.port);
    service.identifier = discovered.properties.get("UniqueIdentifier").cloned();
    service.properties = discovered.properties.clone();
    service.pairing = PairingRequirement::Mandatory;
    service
}

fn parse_dmap(discovered: &DiscoveredService) -> Service {
    let mut service = Service::new(Protocol::Dmap, discovered.port);
    service.identifier = discovered
        .properties
        .get("hG")
        .cloned()
        .or_else(|| Some(discovered.name.clone()).filter(|n| !n.is_empty()));
    service.properties = discovered.properties.clone();
    service.pairing = PairingRequirement::Mandatory;
    service
}

fn parse_airplay(discovered: &DiscoveredService) -> Service {
    let mut service = Service::new(Protocol::AirPlay, discovered.port);
    service.identifier = discovered.properties.get("deviceid").cloned();
    let features = discovered
        .properties
        .get("features")
        .and_then(|f| AirPlayFeatures::parse(f))
        .unwrap_or_default();
    service.pairing = if discovered.properties.get("acl").map(String::as_str) == Some("1") {
        // Access control blocks new pairings entirely
        PairingRequirement::Disabled
    } else if features.transient_pairing {
        PairingRequirement::NotNeeded
    } else if features.homekit_pairing || features.airplay2 {
        PairingRequirement::Mandatory
    } else {
        PairingRequirement::NotNeeded
    };
    service.properties = discovered.properties.clone();
    service
}

fn parse_raop(discovered: &DiscoveredService) -> Service {
    let mut service = Service::new(Protocol::Raop, discovered.port);
    // Instance names look like AABBCCDDEEFF@Living Room
    service.identifier = discovered
        .name
        .split_once('@')
        .map(|(id, _)| id.to_string())
        .filter(|id| !id.is_empty());
    service.pairing = if discovered
        .properties
        .get("et")
        .is_some_and(|et| et.split(',').any(|e| e.trim() == "4"))
    {
        PairingRequirement::Mandatory
    } else {
        PairingRequirement::NotNeeded
    };
    service.properties = discovered.properties.clone();
    service
}

fn parse_companion(discovered: &DiscoveredService) -> Service {
    let mut service = Service::new(Protocol::Companion, discovered.port);
    // Companion carries no stable identifier; fusion relies on others
    service.properties = discovered.properties.clone();
    service.pairing = PairingRequirement::Mandatory;
    service
}

fn display_name(discovered: &DiscoveredService, protocol: Protocol) -> Option<String> {
    match protocol {
        Protocol::Mrp => discovered.properties.get("Name").cloned(),
        Protocol::Dmap => discovered
            .properties
            .get("CtlN")
            .cloned()
            .or_else(|| Some(discovered.name.clone())),
        Protocol::Raop => discovered
            .name
            .split_once('@')
            .map(|(_, name)| name.to_string()),
        _ => Some(discovered.name.clone()).filter(|n| !n.is_empty()),
    }
}

/// Assemble a configuration from everything one host responded with.
///
/// Returns `None` when the host exposed nothing we understand.
#[must_use]
pub fn config_from_response(response: &HostResponse) -> Option<DeviceConfiguration> {
    let mut config = DeviceConfiguration::new(response.address, String::new());
    config.deep_sleep = response.deep_sleep;
    config.device_info.raw_model = response.model.clone();

    let mut found = false;
    for discovered in &response.services {
        let service_type = discovered.service_type.trim_end_matches('.');
        let Some((_, protocol)) = SERVICE_TABLE
            .iter()
            .find(|(name, _)| *name == service_type)
        else {
            continue;
        };
        if discovered.port == 0 {
            continue;
        }
        found = true;

        let service = match protocol {
            Protocol::Mrp => parse_mrp(discovered),
            Protocol::Dmap => parse_dmap(discovered),
            Protocol::AirPlay => parse_airplay(discovered),
            Protocol::Raop => parse_raop(discovered),
            Protocol::Companion => parse_companion(discovered),
        };

        // Device-level facts carried in service records
        if config.name.is_empty()
            && let Some(name) = display_name(discovered, *protocol)
        {
            config.name = name;
        }
        if config.device_info.mac.is_none() {
            config.device_info.mac = discovered.properties.get("deviceid").cloned();
        }
        if config.device_info.version.is_none() {
            config.device_info.version = discovered
                .properties
                .get("osvers")
                .or_else(|| discovered.properties.get("ov"))
                .cloned();
        }
        if config.device_info.build_number.is_none() {
            config.device_info.build_number =
                discovered.properties.get("SystemBuildVersion").cloned();
        }

        config.add_service(service);
    }

    if !found {
        return None;
    }
    if config.name.is_empty() {
        config.name = "Unknown device".to_string();
    }
    Some(config)
}
