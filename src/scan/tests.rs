use super::parsers::{config_from_response, scan_service_types};
use crate::mdns::{DiscoveredService, HostResponse};
use crate::types::{PairingRequirement, Protocol};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};

fn txt(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn response(services: Vec<DiscoveredService>) -> HostResponse {
    HostResponse {
        address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
        services,
        model: Some("AppleTV6,2".to_string()),
        deep_sleep: false,
    }
}

fn mrp_service() -> DiscoveredService {
    DiscoveredService {
        service_type: "_mediaremotetv._tcp.local".to_string(),
        name: "Vardagsrum".to_string(),
        port: 49_152,
        properties: txt(&[
            ("UniqueIdentifier", "mrp-unique-id"),
            ("Name", "Vardagsrum"),
            ("SystemBuildVersion", "20K71"),
        ]),
    }
}

fn airplay_service() -> DiscoveredService {
    DiscoveredService {
        service_type: "_airplay._tcp.local".to_string(),
        name: "Vardagsrum".to_string(),
        port: 7000,
        properties: txt(&[
            ("deviceid", "AA:BB:CC:DD:EE:FF"),
            ("features", "0x4A7FCA00,0x000B0000"),
            ("osvers", "16.1"),
        ]),
    }
}

fn raop_service() -> DiscoveredService {
    DiscoveredService {
        service_type: "_raop._tcp.local".to_string(),
        name: "AABBCCDDEEFF@Vardagsrum".to_string(),
        port: 7000,
        properties: txt(&[("et", "0,3,5"), ("am", "AppleTV6,2")]),
    }
}

#[test]
fn all_protocols_by_default() {
    let types = scan_service_types(&HashSet::new());
    assert_eq!(types.len(), 7);
    assert!(types.iter().any(|t| t == "_mediaremotetv._tcp.local"));
}

#[test]
fn protocol_filter_restricts_service_types() {
    let types = scan_service_types(&HashSet::from([Protocol::Raop]));
    assert_eq!(types, vec!["_raop._tcp.local".to_string()]);

    let dmap = scan_service_types(&HashSet::from([Protocol::Dmap]));
    assert_eq!(dmap.len(), 3);
}

#[test]
fn builds_fused_configuration() {
    let config = config_from_response(&response(vec![
        mrp_service(),
        airplay_service(),
        raop_service(),
    ]))
    .unwrap();

    assert_eq!(config.name, "Vardagsrum");
    assert_eq!(config.services().len(), 3);
    assert_eq!(config.device_info.raw_model.as_deref(), Some("AppleTV6,2"));
    assert_eq!(config.device_info.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    assert_eq!(config.device_info.version.as_deref(), Some("16.1"));
    assert_eq!(config.device_info.build_number.as_deref(), Some("20K71"));

    // Identifier ranking: MRP first, then AirPlay, then RAOP
    assert_eq!(
        config.identifiers()[..3],
        ["mrp-unique-id", "AA:BB:CC:DD:EE:FF", "AABBCCDDEEFF"]
    );
}

#[test]
fn raop_identifier_from_instance_name() {
    let config = config_from_response(&response(vec![raop_service()])).unwrap();
    let service = config.service(Protocol::Raop).unwrap();
    assert_eq!(service.identifier.as_deref(), Some("AABBCCDDEEFF"));
    assert_eq!(config.name, "Vardagsrum");
    assert_eq!(service.pairing, PairingRequirement::NotNeeded);
}

#[test]
fn raop_mfi_encryption_requires_pairing() {
    let mut raop = raop_service();
    raop.properties
        .insert("et".to_string(), "0,4".to_string());
    let config = config_from_response(&response(vec![raop])).unwrap();
    assert_eq!(
        config.service(Protocol::Raop).unwrap().pairing,
        PairingRequirement::Mandatory
    );
}

#[test]
fn airplay_pairing_requirement_from_features() {
    // Transient-capable: no pairing needed
    let config = config_from_response(&response(vec![airplay_service()])).unwrap();
    assert_eq!(
        config.service(Protocol::AirPlay).unwrap().pairing,
        PairingRequirement::NotNeeded
    );

    // Access control on: pairing disabled
    let mut acl = airplay_service();
    acl.properties.insert("acl".to_string(), "1".to_string());
    let config = config_from_response(&response(vec![acl])).unwrap();
    assert_eq!(
        config.service(Protocol::AirPlay).unwrap().pairing,
        PairingRequirement::Disabled
    );
}

#[test]
fn unknown_services_yield_nothing() {
    let config = config_from_response(&response(vec![DiscoveredService {
        service_type: "_printer._tcp.local".to_string(),
        name: "Printer".to_string(),
        port: 631,
        properties: HashMap::new(),
    }]));
    assert!(config.is_none());
}

mod scan_flow {
    use super::super::{ScanOptions, scan};
    use std::time::Duration;

    /// Scanning an empty network returns quickly with no results.
    /// Environments without multicast routing fail the send, which is
    /// equally acceptable here; only the timing matters.
    #[tokio::test]
    async fn empty_network_scan() {
        let options = ScanOptions {
            timeout: Some(Duration::from_millis(200)),
            ..ScanOptions::default()
        };
        let started = std::time::Instant::now();
        let results = scan(options).await.unwrap_or_default();
        assert!(results.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

mod fusion {
    use super::super::{merge_result, suppress_airplay_only};
    use super::*;
    use crate::types::{DeviceConfiguration, Service};

    fn config_with(protocol: Protocol, id: &str, name: &str) -> DeviceConfiguration {
        let mut config =
            DeviceConfiguration::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), name);
        let mut service = Service::new(protocol, 7000);
        service.identifier = Some(id.to_string());
        config.add_service(service);
        config
    }

    #[test]
    fn shared_identifier_fuses_into_one_result() {
        let mut results = Vec::new();
        let mut first = config_with(Protocol::Mrp, "shared", "TV");
        first.add_service({
            let mut s = Service::new(Protocol::AirPlay, 7000);
            s.identifier = Some("shared".to_string());
            s
        });
        merge_result(&mut results, first);
        merge_result(&mut results, config_with(Protocol::AirPlay, "shared", "TV"));
        merge_result(&mut results, config_with(Protocol::Raop, "other", "Speaker"));

        assert_eq!(results.len(), 2);
        // No two results share an identifier after fusion
        for (i, a) in results.iter().enumerate() {
            for b in results.iter().skip(i + 1) {
                assert!(!a.same_device(b));
            }
        }
    }

    #[test]
    fn airplay_only_devices_are_suppressed() {
        let airplay_only = config_with(Protocol::AirPlay, "a", "Screen");
        let with_raop = {
            let mut config = config_with(Protocol::AirPlay, "b", "Speaker");
            config.add_service(Service::new(Protocol::Raop, 7000));
            config
        };
        let with_companion = {
            let mut config = config_with(Protocol::AirPlay, "c", "Box");
            config.add_service(Service::new(Protocol::Companion, 49153));
            config
        };

        let kept = suppress_airplay_only(vec![airplay_only, with_raop, with_companion]);
        let names: Vec<&str> = kept.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Speaker", "Box"]);
    }
}
