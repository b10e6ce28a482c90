//! AirPlay feature-bit parsing from TXT records

/// Capabilities parsed from the `features` TXT value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AirPlayFeatures {
    /// Audio streaming supported
    pub audio: bool,
    /// Video playback supported
    pub video: bool,
    /// AirPlay 2 (unified pairing) supported
    pub airplay2: bool,
    /// HomeKit pairing supported
    pub homekit_pairing: bool,
    /// Transient pairing supported (session keys without credentials)
    pub transient_pairing: bool,
    /// Legacy MFi device authentication required
    pub device_auth: bool,
    /// Raw 64-bit bitmask
    pub raw: u64,
}

fn parse_hex(s: &str) -> Option<u64> {
    let s = s.trim();
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

impl AirPlayFeatures {
    /// Parse a `features` TXT value.
    ///
    /// The value is either one hex number or two comma-separated 32-bit
    /// halves (`0xLOW,0xHIGH`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let raw = if let Some((low, high)) = value.split_once(',') {
            (parse_hex(high)? << 32) | parse_hex(low)?
        } else {
            parse_hex(value)?
        };
        Some(Self::from_bits(raw))
    }

    /// Interpret the raw bitmask.
    #[must_use]
    pub fn from_bits(raw: u64) -> Self {
        Self {
            video: raw & (1 << 0) != 0,
            audio: raw & (1 << 9) != 0,
            device_auth: raw & (1 << 26) != 0,
            homekit_pairing: raw & (1 << 46) != 0,
            airplay2: raw & (1 << 48) != 0,
            transient_pairing: raw & (1 << 51) != 0,
            raw,
        }
    }
}
