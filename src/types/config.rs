//! Device configuration assembled during discovery

use super::credentials::Credentials;
use std::collections::HashMap;
use std::net::IpAddr;

/// Control/streaming protocols spoken by this library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    /// Media Remote Protocol (tvOS 4th gen and later)
    Mrp,
    /// Digital Media Access Protocol (legacy Apple TV, Music app)
    Dmap,
    /// Companion link (app launching, power, keyboard)
    Companion,
    /// AirPlay (video, credentials host, MRP tunnel)
    AirPlay,
    /// Remote Audio Output Protocol (AirTunes)
    Raop,
}

impl Protocol {
    /// All protocols, in default relaying priority order.
    pub const ALL: [Self; 5] = [
        Self::Mrp,
        Self::Dmap,
        Self::Companion,
        Self::AirPlay,
        Self::Raop,
    ];

    /// Short lowercase name used in storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mrp => "mrp",
            Self::Dmap => "dmap",
            Self::Companion => "companion",
            Self::AirPlay => "airplay",
            Self::Raop => "raop",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether and how a service requires pairing before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingRequirement {
    /// Protocol has no pairing concept
    Unsupported,
    /// Device has pairing disabled (e.g. access control)
    Disabled,
    /// Connection works without credentials
    #[default]
    NotNeeded,
    /// Works without credentials but pairing unlocks functionality
    Optional,
    /// Credentials are required to connect
    Mandatory,
}

/// One protocol endpoint discovered on a device.
#[derive(Debug, Clone)]
pub struct Service {
    /// Protocol spoken on this endpoint
    pub protocol: Protocol,
    /// TCP port
    pub port: u16,
    /// Stable service identifier extracted from protocol-specific records
    pub identifier: Option<String>,
    /// Raw zeroconf TXT properties
    pub properties: HashMap<String, String>,
    /// Credentials for this service, when paired
    pub credentials: Option<Credentials>,
    /// Access password, when the device has one set
    pub password: Option<String>,
    /// Pairing requirement derived from discovery data
    pub pairing: PairingRequirement,
}

impl Service {
    /// Create a service with empty properties.
    #[must_use]
    pub fn new(protocol: Protocol, port: u16) -> Self {
        Self {
            protocol,
            port,
            identifier: None,
            properties: HashMap::new(),
            credentials: None,
            password: None,
            pairing: PairingRequirement::default(),
        }
    }

    /// Merge another discovery record for the same endpoint.
    ///
    /// Existing credentials and password are preserved; properties from
    /// `other` win on key collision (a later record is fresher).
    pub fn merge(&mut self, other: Service) {
        self.port = other.port;
        if self.identifier.is_none() {
            self.identifier = other.identifier;
        }
        self.properties.extend(other.properties);
        if other.credentials.is_some() {
            self.credentials = other.credentials;
        }
        if other.password.is_some() {
            self.password = other.password;
        }
        self.pairing = other.pairing;
    }
}

/// Hardware/software identity fused from discovery records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    /// Internal model string, e.g. `AppleTV6,2`
    pub raw_model: Option<String>,
    /// MAC address in `AA:BB:CC:DD:EE:FF` form
    pub mac: Option<String>,
    /// Operating system name, e.g. `tvOS`
    pub operating_system: Option<String>,
    /// OS version, e.g. `16.1`
    pub version: Option<String>,
    /// OS build number, e.g. `20K71`
    pub build_number: Option<String>,
}

impl DeviceInfo {
    /// Marketing name for the internal model string, falling back to the
    /// raw model when unknown.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.raw_model.as_deref().map(model_name)
    }
}

/// Map internal model identifiers to friendly names.
#[must_use]
pub fn model_name(model: &str) -> &str {
    match model {
        "AudioAccessory1,1" | "AudioAccessory1,2" => "HomePod",
        "AudioAccessory5,1" => "HomePod mini",
        "AudioAccessory6,1" => "HomePod (2nd generation)",
        "AppleTV3,1" | "AppleTV3,2" => "Apple TV (3rd generation)",
        "AppleTV5,3" => "Apple TV (4th generation)",
        "AppleTV6,2" => "Apple TV 4K",
        "AppleTV11,1" => "Apple TV 4K (2nd generation)",
        "AppleTV14,1" => "Apple TV 4K (3rd generation)",
        "AirPort4,107" | "AirPort10,115" => "AirPort Express",
        _ => model,
    }
}

/// Identity of one physical device on the network.
///
/// Created by the scanner, enriched by storage on load. A configuration
/// is addressable once at least one service carries a non-empty
/// identifier.
#[derive(Debug, Clone)]
pub struct DeviceConfiguration {
    /// Display name
    pub name: String,
    /// Primary network address
    pub address: IpAddr,
    /// Hardware/software identity
    pub device_info: DeviceInfo,
    /// Device answered via a sleep proxy and must be woken before use
    pub deep_sleep: bool,
    services: Vec<Service>,
}

impl DeviceConfiguration {
    /// Create an empty configuration for an address.
    #[must_use]
    pub fn new(address: IpAddr, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address,
            device_info: DeviceInfo::default(),
            deep_sleep: false,
            services: Vec::new(),
        }
    }

    /// All services on this device.
    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Look up the service for a protocol.
    #[must_use]
    pub fn service(&self, protocol: Protocol) -> Option<&Service> {
        self.services.iter().find(|s| s.protocol == protocol)
    }

    /// Mutable lookup, used by storage overlay.
    pub fn service_mut(&mut self, protocol: Protocol) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.protocol == protocol)
    }

    /// Add a service, merging with an existing record for the same
    /// protocol.
    pub fn add_service(&mut self, service: Service) {
        if let Some(existing) = self.service_mut(service.protocol) {
            existing.merge(service);
        } else {
            self.services.push(service);
        }
    }

    /// Stable identifiers, most preferred first: MRP, DMAP, AirPlay,
    /// RAOP, then MAC address.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for protocol in [
            Protocol::Mrp,
            Protocol::Dmap,
            Protocol::AirPlay,
            Protocol::Raop,
        ] {
            if let Some(id) = self.service(protocol).and_then(|s| s.identifier.as_deref())
                && !id.is_empty()
            {
                out.push(id);
            }
        }
        if let Some(mac) = self.device_info.mac.as_deref() {
            out.push(mac);
        }
        out
    }

    /// Best available identifier.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.identifiers().first().copied()
    }

    /// Two configurations describe the same device when they share any
    /// identifier.
    #[must_use]
    pub fn same_device(&self, other: &Self) -> bool {
        let ours = self.identifiers();
        other.identifiers().iter().any(|id| ours.contains(id))
    }

    /// True once at least one service carries a non-empty identifier.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.identifier().is_some()
    }
}

impl std::fmt::Display for DeviceConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.name, self.address)?;
        for service in &self.services {
            write!(f, "\n  {} port {}", service.protocol, service.port)?;
        }
        Ok(())
    }
}
