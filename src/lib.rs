//! # atvlink
//!
//! A pure Rust client library for Apple TV, HomePod and AirPort-class
//! devices. One device handle unifies the four reverse-engineered
//! control protocols — DMAP, MRP, Companion and RAOP/AirPlay — behind
//! remote-control, metadata, power, apps, keyboard, audio and streaming
//! capabilities.
//!
//! ## Example
//!
//! ```rust,no_run
//! use atvlink::{ScanOptions, connect, scan};
//!
//! # async fn example() -> Result<(), atvlink::AtvError> {
//! let devices = scan(ScanOptions::default()).await?;
//!
//! if let Some(config) = devices.into_iter().next() {
//!     let device = connect(config, None).await?;
//!     device.play_pause().await?;
//!     device.close();
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod error;
pub mod interface;
pub mod state;
pub mod storage;
pub mod types;

// Protocol internals are public for advanced use but not re-exported
pub mod audio;
pub mod facade;
pub mod mdns;
pub mod net;
pub mod pairing;
pub mod protocol;
pub mod scan;

mod util;

// Re-exports
pub use error::AtvError;
pub use facade::AppleTv;
pub use interface::{FeatureInfo, FeatureName, FeatureState, InputAction, PowerState};
pub use pairing::PairingHandler;
pub use scan::{ScanOptions, scan};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use types::{Credentials, DeviceConfiguration, PlayingState, Protocol, Service};

use crate::error::Result;
use crate::facade::stacks::{AirPlayStack, CompanionStack, DmapStack, MrpStack, RaopStack, SetupData};
use crate::protocol::airplay::{AirPlayFeatures, open_mrp_tunnel};
use crate::protocol::dmap::{DmapClient, DmapPushUpdater};
use crate::protocol::mrp::MrpClient;
use crate::protocol::raop::StreamProperties;
use crate::state::StateProducer;
use crate::types::credentials::DmapCredentials;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Scan and record newly seen devices in storage.
///
/// # Errors
///
/// Same as [`scan`]; storage failures surface as well.
pub async fn scan_with_storage(
    options: ScanOptions,
    storage: &mut dyn Storage,
) -> Result<Vec<DeviceConfiguration>> {
    let results = scan(options).await?;
    for config in &results {
        storage.update_settings(config);
    }
    if storage.changed() {
        storage.save().await?;
    }
    Ok(results)
}

/// Start pairing a protocol on a device.
///
/// Drive the returned handler: `begin`, supply the PIN, `finish`, then
/// persist with [`complete_pairing`].
///
/// # Errors
///
/// Fails when the protocol cannot pair (absent, disabled, transport
/// failure).
pub async fn pair(
    config: &DeviceConfiguration,
    protocol: Protocol,
) -> Result<Box<dyn PairingHandler>> {
    pairing::pairing_handler(config, protocol, "atvlink").await
}

/// Store the credentials of a finished pairing into the configuration
/// and, when given, write them through to storage.
///
/// # Errors
///
/// Fails when the handler has not paired or storage cannot save.
pub async fn complete_pairing(
    config: &mut DeviceConfiguration,
    protocol: Protocol,
    handler: &dyn PairingHandler,
    storage: Option<&mut dyn Storage>,
) -> Result<()> {
    let credentials = handler
        .credentials()
        .ok_or_else(|| AtvError::Pairing("pairing not completed".to_string()))?;
    if let Some(service) = config.service_mut(protocol) {
        service.credentials = Some(credentials);
    }
    if let Some(storage) = storage {
        storage.update_settings(config);
        storage.save().await?;
    }
    Ok(())
}

fn service_addr(config: &DeviceConfiguration, service: &Service) -> SocketAddr {
    SocketAddr::new(config.address, service.port)
}

/// Connect to a device and return the unified handle.
///
/// With storage given, the stored record overwrites matching
/// configuration fields before any protocol is brought up. Each
/// configured protocol stack registers its capabilities; calls on the
/// handle go to the best provider. Close with [`AppleTv::close`].
///
/// # Errors
///
/// Fails when the configuration has no identifier or a configured
/// protocol cannot be brought up.
pub async fn connect(
    mut config: DeviceConfiguration,
    storage: Option<&mut dyn Storage>,
) -> Result<AppleTv> {
    if let Some(storage) = storage {
        let settings = storage.get_settings(&config);
        storage::apply_settings(&mut config, &settings);
    }
    if !config.ready() {
        return Err(AtvError::Discovery(
            "configuration has no usable identifier".to_string(),
        ));
    }

    let producer = Arc::new(StateProducer::new());
    let mut setups: Vec<SetupData> = Vec::new();

    // MRP: direct service, or tunneled through AirPlay 2 on tvOS 15+
    let airplay_service = config.service(Protocol::AirPlay).cloned();
    if let Some(service) = config.service(Protocol::Mrp) {
        let credentials = service
            .credentials
            .as_ref()
            .and_then(Credentials::as_hap)
            .ok_or_else(|| AtvError::auth("MRP requires credentials, pair first"))?;
        let client = MrpClient::connect(
            service_addr(&config, service),
            credentials,
            producer.clone(),
        )
        .await?;
        setups.push(MrpStack::setup(Arc::new(client)));
    } else if let Some(service) = &airplay_service
        && let Some(credentials) = service.credentials.as_ref().and_then(Credentials::as_hap)
    {
        debug!("no MRP service, tunneling through AirPlay");
        let connection =
            open_mrp_tunnel(service_addr(&config, service), credentials).await?;
        let client = MrpClient::handshake(connection, None, producer.clone()).await?;
        setups.push(MrpStack::setup(Arc::new(client)));
    }

    // DMAP: control session plus a dedicated long-poll session
    if let Some(service) = config.service(Protocol::Dmap) {
        let credentials: Option<DmapCredentials> = service
            .credentials
            .as_ref()
            .and_then(|c| c.as_dmap().cloned());
        let remote = service_addr(&config, service);

        let mut control = DmapClient::connect(remote, credentials.clone()).await?;
        control.login().await?;
        let mut poller = DmapClient::connect(remote, credentials).await?;
        poller.login().await?;

        let push = DmapPushUpdater::new(poller, producer.clone());
        setups.push(DmapStack::setup(control, push));
    }

    // Companion
    if let Some(service) = config.service(Protocol::Companion)
        && let Some(credentials) = service.credentials.as_ref().and_then(Credentials::as_hap)
    {
        let client = protocol::companion::CompanionClient::connect(
            service_addr(&config, service),
            credentials,
            producer.clone(),
        )
        .await?;
        setups.push(CompanionStack::setup(Arc::new(client)));
    }

    // AirPlay (playback surface; also used above as MRP tunnel host)
    if let Some(service) = &airplay_service {
        let device_auth_required = service
            .properties
            .get("features")
            .and_then(|f| AirPlayFeatures::parse(f))
            .is_some_and(|f| f.device_auth);
        let client = protocol::airplay::AirPlayClient::connect(
            service_addr(&config, service),
            service.credentials.as_ref(),
            device_auth_required,
        )
        .await?;
        setups.push(AirPlayStack::setup(client));
    }

    // RAOP
    if let Some(service) = config.service(Protocol::Raop) {
        setups.push(RaopStack::setup(
            service_addr(&config, service),
            StreamProperties::default(),
            service.password.clone(),
        ));
    }

    if setups.is_empty() {
        return Err(AtvError::NotSupported);
    }

    debug!(
        "connected to {} with {} protocol(s)",
        config.name,
        setups.len()
    );
    Ok(AppleTv::new(config, producer, setups))
}
