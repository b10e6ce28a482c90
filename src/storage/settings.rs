//! Serialized settings model

use crate::types::Protocol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-protocol stored fields. Defaults are omitted from the wire so
/// changing a default later reaches existing records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// Serialized credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    /// Access password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Port override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ProtocolSettings {
    /// True when every field is the default.
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Per-protocol settings table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolTable {
    /// MRP settings
    #[serde(default, skip_serializing_if = "ProtocolSettings::is_default")]
    pub mrp: ProtocolSettings,
    /// AirPlay settings
    #[serde(default, skip_serializing_if = "ProtocolSettings::is_default")]
    pub airplay: ProtocolSettings,
    /// Companion settings
    #[serde(default, skip_serializing_if = "ProtocolSettings::is_default")]
    pub companion: ProtocolSettings,
    /// RAOP settings
    #[serde(default, skip_serializing_if = "ProtocolSettings::is_default")]
    pub raop: ProtocolSettings,
    /// DMAP settings
    #[serde(default, skip_serializing_if = "ProtocolSettings::is_default")]
    pub dmap: ProtocolSettings,
}

/// One stored device record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// MAC address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Per-protocol fields
    #[serde(default, skip_serializing_if = "is_default_table")]
    pub protocols: ProtocolTable,
}

fn is_default_table(table: &ProtocolTable) -> bool {
    *table == ProtocolTable::default()
}

impl DeviceSettings {
    /// Borrow the settings slot for a protocol.
    #[must_use]
    pub fn protocol(&self, protocol: Protocol) -> &ProtocolSettings {
        match protocol {
            Protocol::Mrp => &self.protocols.mrp,
            Protocol::AirPlay => &self.protocols.airplay,
            Protocol::Companion => &self.protocols.companion,
            Protocol::Raop => &self.protocols.raop,
            Protocol::Dmap => &self.protocols.dmap,
        }
    }

    /// Mutable settings slot for a protocol.
    pub fn protocol_mut(&mut self, protocol: Protocol) -> &mut ProtocolSettings {
        match protocol {
            Protocol::Mrp => &mut self.protocols.mrp,
            Protocol::AirPlay => &mut self.protocols.airplay,
            Protocol::Companion => &mut self.protocols.companion,
            Protocol::Raop => &mut self.protocols.raop,
            Protocol::Dmap => &mut self.protocols.dmap,
        }
    }
}

fn default_version() -> u32 {
    1
}

/// Top-level persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageModel {
    /// Layout version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Records keyed by device identifier
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceSettings>,
}

impl Default for StorageModel {
    fn default() -> Self {
        Self {
            version: 1,
            devices: BTreeMap::new(),
        }
    }
}
