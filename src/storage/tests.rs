use super::*;
use crate::types::{Credentials, DeviceConfiguration, Protocol, Service};
use std::net::{IpAddr, Ipv4Addr};

fn config_with_airplay() -> DeviceConfiguration {
    let mut config =
        DeviceConfiguration::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), "Device D");
    let mut service = Service::new(Protocol::AirPlay, 7000);
    service.identifier = Some("AA:BB:CC:DD:EE:FF".to_string());
    config.add_service(service);
    config
}

#[test]
fn default_fields_are_omitted_from_json() {
    let mut model = StorageModel::default();
    model.devices.insert(
        "id".to_string(),
        DeviceSettings {
            name: Some("TV".to_string()),
            ..DeviceSettings::default()
        },
    );
    let json = serde_json::to_string(&model).unwrap();
    assert!(json.contains("\"version\":1"));
    assert!(json.contains("\"name\":\"TV\""));
    // No protocol table, no nulls
    assert!(!json.contains("protocols"));
    assert!(!json.contains("null"));
}

#[test]
fn settings_round_trip() {
    let mut model = StorageModel::default();
    let mut settings = DeviceSettings {
        name: Some("TV".to_string()),
        mac: Some("AA:BB:CC:DD:EE:FF".to_string()),
        ..DeviceSettings::default()
    };
    settings.protocol_mut(Protocol::Raop).password = Some("secret".to_string());
    settings.protocol_mut(Protocol::Mrp).credentials = Some("00:11".to_string());
    model.devices.insert("id".to_string(), settings);

    let json = serde_json::to_vec(&model).unwrap();
    let loaded: StorageModel = serde_json::from_slice(&json).unwrap();
    assert_eq!(loaded, model);
}

#[tokio::test]
async fn update_settings_only_marks_real_changes() {
    let mut storage = MemoryStorage::new();
    let mut config = config_with_airplay();
    config.service_mut(Protocol::AirPlay).unwrap().password = Some("X".to_string());

    storage.update_settings(&config);
    assert!(storage.changed());
    storage.save().await.unwrap();
    assert!(!storage.changed());

    // Same values again: not dirty
    storage.update_settings(&config);
    assert!(!storage.changed());

    // A different value: dirty again
    config.service_mut(Protocol::AirPlay).unwrap().password = Some("Y".to_string());
    storage.update_settings(&config);
    assert!(storage.changed());
}

#[tokio::test]
async fn storage_overwrites_config_on_apply() {
    let mut storage = MemoryStorage::new();

    // Stored record has password "X"
    let mut stored_config = config_with_airplay();
    stored_config.service_mut(Protocol::AirPlay).unwrap().password = Some("X".to_string());
    storage.update_settings(&stored_config);
    storage.save().await.unwrap();

    // Caller configures "Y" in memory; storage wins on connect
    let mut config = config_with_airplay();
    config.service_mut(Protocol::AirPlay).unwrap().password = Some("Y".to_string());
    let settings = storage.get_settings(&config);
    apply_settings(&mut config, &settings);
    assert_eq!(
        config.service(Protocol::AirPlay).unwrap().password.as_deref(),
        Some("X")
    );

    // Connecting with the stored value does not dirty the record
    storage.update_settings(&config);
    assert!(!storage.changed());
}

#[tokio::test]
async fn absent_fields_preserve_config_values() {
    let mut storage = MemoryStorage::new();
    let mut config = config_with_airplay();
    config.service_mut(Protocol::AirPlay).unwrap().password = Some("keep-me".to_string());

    // Stored record exists but has no password
    let settings = storage.get_settings(&config);
    apply_settings(&mut config, &settings);
    assert_eq!(
        config.service(Protocol::AirPlay).unwrap().password.as_deref(),
        Some("keep-me")
    );
}

#[tokio::test]
async fn file_backend_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");

    let mut config = config_with_airplay();
    let credentials: Credentials = format!(
        "{}:{}:{}:{}",
        hex::encode([1u8; 32]),
        hex::encode([2u8; 32]),
        hex::encode(b"pair-id"),
        hex::encode([3u8; 32]),
    )
    .parse()
    .unwrap();
    config.service_mut(Protocol::AirPlay).unwrap().credentials = Some(credentials.clone());

    {
        let mut storage = FileStorage::new(&path);
        storage.load().await.unwrap();
        storage.update_settings(&config);
        storage.save().await.unwrap();
    }

    let mut reloaded = FileStorage::new(&path);
    reloaded.load().await.unwrap();
    let settings = reloaded.get_settings(&config);
    assert_eq!(
        settings.protocol(Protocol::AirPlay).credentials.as_deref(),
        Some(credentials.to_string().as_str())
    );

    let mut fresh = config_with_airplay();
    apply_settings(&mut fresh, &settings);
    assert_eq!(
        fresh.service(Protocol::AirPlay).unwrap().credentials,
        Some(credentials)
    );
}

#[test]
fn missing_file_loads_empty() {
    let mut storage = FileStorage::new("/nonexistent/never/devices.json");
    tokio_test::block_on(async {
        storage.load().await.unwrap();
    });
    assert!(!storage.changed());
}
