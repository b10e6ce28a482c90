use super::*;
use std::net::{IpAddr, Ipv4Addr};

fn addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))
}

fn service_with_id(protocol: Protocol, id: &str) -> Service {
    let mut service = Service::new(protocol, 7000);
    service.identifier = Some(id.to_string());
    service
}

#[test]
fn identifier_ranking_prefers_mrp() {
    let mut config = DeviceConfiguration::new(addr(), "Living Room");
    config.add_service(service_with_id(Protocol::Raop, "raop-id"));
    config.add_service(service_with_id(Protocol::AirPlay, "airplay-id"));
    config.add_service(service_with_id(Protocol::Mrp, "mrp-id"));
    config.device_info.mac = Some("AA:BB:CC:DD:EE:FF".to_string());

    assert_eq!(
        config.identifiers(),
        vec!["mrp-id", "airplay-id", "raop-id", "AA:BB:CC:DD:EE:FF"]
    );
    assert_eq!(config.identifier(), Some("mrp-id"));
}

#[test]
fn same_device_by_any_shared_identifier() {
    let mut a = DeviceConfiguration::new(addr(), "A");
    a.add_service(service_with_id(Protocol::Mrp, "one"));
    a.add_service(service_with_id(Protocol::Raop, "two"));

    let mut b = DeviceConfiguration::new(addr(), "B");
    b.add_service(service_with_id(Protocol::Raop, "two"));

    let mut c = DeviceConfiguration::new(addr(), "C");
    c.add_service(service_with_id(Protocol::Raop, "three"));

    assert!(a.same_device(&b));
    assert!(!a.same_device(&c));
}

#[test]
fn add_service_merges_same_protocol() {
    let mut config = DeviceConfiguration::new(addr(), "Device");
    let mut first = Service::new(Protocol::AirPlay, 7000);
    first
        .properties
        .insert("model".to_string(), "AppleTV6,2".to_string());
    config.add_service(first);

    let mut second = Service::new(Protocol::AirPlay, 7001);
    second.identifier = Some("AA:BB:CC:DD:EE:FF".to_string());
    config.add_service(second);

    assert_eq!(config.services().len(), 1);
    let merged = config.service(Protocol::AirPlay).unwrap();
    assert_eq!(merged.port, 7001);
    assert_eq!(merged.identifier.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    assert_eq!(merged.properties.get("model").unwrap(), "AppleTV6,2");
}

#[test]
fn not_ready_without_identifier() {
    let mut config = DeviceConfiguration::new(addr(), "Device");
    config.add_service(Service::new(Protocol::Companion, 49152));
    assert!(!config.ready());

    config.add_service(service_with_id(Protocol::Mrp, "id"));
    assert!(config.ready());
}

#[test]
fn playing_hash_depends_on_content_only() {
    let mut playing = PlayingState {
        title: Some("Song".to_string()),
        artist: Some("Artist".to_string()),
        total_time: Some(180),
        ..Default::default()
    };
    let baseline = playing.hash();

    // Position/state changes do not alter the content hash
    playing.position = Some(42);
    playing.device_state = DeviceState::Paused;
    assert_eq!(playing.hash(), baseline);

    playing.title = Some("Other Song".to_string());
    assert_ne!(playing.hash(), baseline);
}

#[test]
fn round_time_rejects_nan_and_negative() {
    assert_eq!(PlayingState::round_time(f64::NAN), None);
    assert_eq!(PlayingState::round_time(-1.0), None);
    assert_eq!(PlayingState::round_time(12.6), Some(13));
}

#[test]
fn hap_credentials_round_trip() {
    let creds = HapCredentials {
        ltpk: [0x11; 32],
        ltsk: [0x22; 32],
        pair_id: b"4D797A9E-9A5B-4A55".to_vec(),
        peer_pk: [0x33; 32],
    };
    let text = creds.to_string();
    let parsed: HapCredentials = text.parse().unwrap();
    assert_eq!(parsed, creds);

    match text.parse::<Credentials>().unwrap() {
        Credentials::Hap(hap) => assert_eq!(hap, creds),
        other => panic!("wrong kind: {other:?}"),
    }
}

#[test]
fn legacy_credentials_round_trip() {
    let creds = LegacyCredentials {
        identifier: [0xAB; 8],
        private_key: [0xCD; 32],
    };
    let parsed: LegacyCredentials = creds.to_string().parse().unwrap();
    assert_eq!(parsed, creds);
}

#[test]
fn dmap_credentials_forms() {
    let guid: DmapCredentials = "0x0000000012345678".parse().unwrap();
    assert_eq!(guid, DmapCredentials::PairingGuid(0x1234_5678));
    assert_eq!(guid.to_string(), "0x0000000012345678");

    let hsgid: DmapCredentials = "12345678-90ab-cdef-1234-567890abcdef".parse().unwrap();
    assert!(matches!(hsgid, DmapCredentials::Hsgid(_)));

    assert!("garbage".parse::<DmapCredentials>().is_err());
}

#[test]
fn model_lookup() {
    assert_eq!(config::model_name("AppleTV6,2"), "Apple TV 4K");
    assert_eq!(config::model_name("Unknown9,9"), "Unknown9,9");
}
