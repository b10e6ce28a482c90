//! Credential wire forms for all protocols

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Credential parse errors.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("unrecognized credential format")]
    UnknownFormat,

    #[error("invalid hex in credentials: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("wrong field length: expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// Credentials produced by HAP Pair-Setup (MRP, Companion, AirPlay 2,
/// RAOP).
///
/// Wire form: `HEX64:HEX64:HEX_PAIRID:HEX_PEER`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HapCredentials {
    /// Our long-term Ed25519 public key
    pub ltpk: [u8; 32],
    /// Our long-term Ed25519 secret key
    pub ltsk: [u8; 32],
    /// Pairing identifier assigned during setup
    pub pair_id: Vec<u8>,
    /// Device's long-term Ed25519 public key
    pub peer_pk: [u8; 32],
}

impl fmt::Display for HapCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            hex::encode(self.ltpk),
            hex::encode(self.ltsk),
            hex::encode(&self.pair_id),
            hex::encode(self.peer_pk)
        )
    }
}

fn fixed<const N: usize>(data: &[u8]) -> Result<[u8; N], CredentialsError> {
    <[u8; N]>::try_from(data).map_err(|_| CredentialsError::WrongLength {
        expected: N,
        actual: data.len(),
    })
}

impl FromStr for HapCredentials {
    type Err = CredentialsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            return Err(CredentialsError::UnknownFormat);
        }
        Ok(Self {
            ltpk: fixed(&hex::decode(parts[0])?)?,
            ltsk: fixed(&hex::decode(parts[1])?)?,
            pair_id: hex::decode(parts[2])?,
            peer_pk: fixed(&hex::decode(parts[3])?)?,
        })
    }
}

/// Legacy AirPlay credentials (`identifier:private_key`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyCredentials {
    /// Fixed 8-byte device identifier
    pub identifier: [u8; 8],
    /// Ed25519 private key
    pub private_key: [u8; 32],
}

impl fmt::Display for LegacyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            hex::encode(self.identifier),
            hex::encode(self.private_key)
        )
    }
}

impl FromStr for LegacyCredentials {
    type Err = CredentialsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 {
            return Err(CredentialsError::UnknownFormat);
        }
        Ok(Self {
            identifier: fixed(&hex::decode(parts[0])?)?,
            private_key: fixed(&hex::decode(parts[1])?)?,
        })
    }
}

/// DMAP credentials: a pairing GUID from explicit pairing or an HSGID
/// from a Home Sharing account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmapCredentials {
    /// `0xHHHHHHHHHHHHHHHH` pairing GUID
    PairingGuid(u64),
    /// Home Sharing group id (UUID form)
    Hsgid(String),
}

impl fmt::Display for DmapCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PairingGuid(guid) => write!(f, "0x{guid:016X}"),
            Self::Hsgid(hsgid) => f.write_str(hsgid),
        }
    }
}

impl FromStr for DmapCredentials {
    type Err = CredentialsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(hex_part) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            let guid = u64::from_str_radix(hex_part, 16)
                .map_err(|_| CredentialsError::UnknownFormat)?;
            return Ok(Self::PairingGuid(guid));
        }
        // HSGID is a UUID-shaped opaque token
        if s.len() == 36 && s.bytes().filter(|&b| b == b'-').count() == 4 {
            return Ok(Self::Hsgid(s.to_string()));
        }
        Err(CredentialsError::UnknownFormat)
    }
}

/// Opaque per-service credential bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// HAP 4-tuple
    Hap(HapCredentials),
    /// Legacy AirPlay pair
    Legacy(LegacyCredentials),
    /// DMAP GUID or HSGID
    Dmap(DmapCredentials),
}

impl Credentials {
    /// Borrow as HAP credentials, when of that kind.
    #[must_use]
    pub fn as_hap(&self) -> Option<&HapCredentials> {
        match self {
            Self::Hap(hap) => Some(hap),
            _ => None,
        }
    }

    /// Borrow as DMAP credentials, when of that kind.
    #[must_use]
    pub fn as_dmap(&self) -> Option<&DmapCredentials> {
        match self {
            Self::Dmap(dmap) => Some(dmap),
            _ => None,
        }
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hap(c) => c.fmt(f),
            Self::Legacy(c) => c.fmt(f),
            Self::Dmap(c) => c.fmt(f),
        }
    }
}

impl FromStr for Credentials {
    type Err = CredentialsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.bytes().filter(|&b| b == b':').count() {
            3 => Ok(Self::Hap(s.parse()?)),
            1 => Ok(Self::Legacy(s.parse()?)),
            0 => Ok(Self::Dmap(s.parse()?)),
            _ => Err(CredentialsError::UnknownFormat),
        }
    }
}
