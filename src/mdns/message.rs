//! DNS wire format: messages, questions and resource records

use super::DnsError;
use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Record types used by DNS-SD
pub mod types {
    /// IPv4 address
    pub const A: u16 = 1;
    /// Domain name pointer
    pub const PTR: u16 = 12;
    /// Text strings
    pub const TXT: u16 = 16;
    /// Service locator
    pub const SRV: u16 = 33;
    /// Any record
    pub const ANY: u16 = 255;
}

/// Record classes
pub mod classes {
    /// Internet class
    pub const IN: u16 = 1;
    /// Cache-flush bit set by mDNS responders
    pub const CACHE_FLUSH: u16 = 0x8001;
}

/// Flag word for a standard response with authoritative answer.
pub const FLAGS_RESPONSE: u16 = 0x8400;

const MAX_LABEL: usize = 63;
const POINTER_MASK: u8 = 0xC0;

/// One question entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Queried name, dot-separated with trailing dot optional
    pub name: String,
    /// Record type
    pub qtype: u16,
    /// Unicast-response requested (QU bit)
    pub unicast_response: bool,
}

impl Question {
    /// PTR question for a service type.
    #[must_use]
    pub fn ptr(name: impl Into<String>, unicast_response: bool) -> Self {
        Self {
            name: name.into(),
            qtype: types::PTR,
            unicast_response,
        }
    }
}

/// Typed resource record payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    /// IPv4 address
    A(Ipv4Addr),
    /// Pointer to another name
    Ptr(String),
    /// Key/value TXT properties (`key=value` strings; bare keys map to
    /// an empty value)
    Txt(HashMap<String, String>),
    /// Service instance location
    Srv {
        /// Priority
        priority: u16,
        /// Weight
        weight: u16,
        /// TCP port
        port: u16,
        /// Target host name
        target: String,
    },
    /// Anything else, kept raw
    Raw(Vec<u8>),
}

/// One resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Record name
    pub name: String,
    /// Record type
    pub rtype: u16,
    /// Record class (cache-flush bit preserved)
    pub rclass: u16,
    /// Time to live; zero announces removal ("goodbye")
    pub ttl: u32,
    /// Payload
    pub data: RecordData,
}

/// A full DNS message.
#[derive(Debug, Clone, Default)]
pub struct DnsMessage {
    /// Transaction id (zero for mDNS)
    pub id: u16,
    /// Header flags
    pub flags: u16,
    /// Question section
    pub questions: Vec<Question>,
    /// Answer section
    pub answers: Vec<ResourceRecord>,
    /// Authority section
    pub authorities: Vec<ResourceRecord>,
    /// Additional section
    pub additionals: Vec<ResourceRecord>,
}

fn encode_name(name: &str, buf: &mut Vec<u8>) {
    for label in name.trim_end_matches('.').split('.') {
        let bytes = label.as_bytes();
        debug_assert!(bytes.len() <= MAX_LABEL);
        #[allow(clippy::cast_possible_truncation)]
        buf.push(bytes.len().min(MAX_LABEL) as u8);
        buf.extend_from_slice(&bytes[..bytes.len().min(MAX_LABEL)]);
    }
    buf.push(0);
}

fn decode_name(data: &[u8], pos: &mut usize) -> Result<String, DnsError> {
    let mut labels: Vec<String> = Vec::new();
    let mut cursor = *pos;
    let mut jumped = false;
    let mut hops = 0;

    loop {
        let len_byte = *data.get(cursor).ok_or(DnsError::Truncated(cursor))?;

        if len_byte & POINTER_MASK == POINTER_MASK {
            // Compression pointer: 14-bit offset
            let low = *data.get(cursor + 1).ok_or(DnsError::Truncated(cursor))?;
            let offset = (usize::from(len_byte & 0x3F) << 8) | usize::from(low);
            if !jumped {
                *pos = cursor + 2;
                jumped = true;
            }
            if offset >= data.len() {
                return Err(DnsError::BadPointer);
            }
            hops += 1;
            if hops > 32 {
                return Err(DnsError::BadPointer);
            }
            cursor = offset;
            continue;
        }

        if len_byte == 0 {
            if !jumped {
                *pos = cursor + 1;
            }
            break;
        }

        let len = usize::from(len_byte);
        let start = cursor + 1;
        let end = start + len;
        if end > data.len() {
            return Err(DnsError::Truncated(cursor));
        }
        labels.push(String::from_utf8_lossy(&data[start..end]).into_owned());
        cursor = end;
    }

    Ok(labels.join("."))
}

fn decode_txt(data: &[u8]) -> HashMap<String, String> {
    let mut properties = HashMap::new();
    let mut pos = 0;
    while pos < data.len() {
        let len = usize::from(data[pos]);
        pos += 1;
        let end = (pos + len).min(data.len());
        let entry = String::from_utf8_lossy(&data[pos..end]);
        if !entry.is_empty() {
            match entry.split_once('=') {
                Some((key, value)) => {
                    properties.insert(key.to_string(), value.to_string());
                }
                None => {
                    properties.insert(entry.into_owned(), String::new());
                }
            }
        }
        pos = end;
    }
    properties
}

fn encode_txt(properties: &HashMap<String, String>, buf: &mut Vec<u8>) {
    let mut keys: Vec<&String> = properties.keys().collect();
    keys.sort();
    for key in keys {
        let value = &properties[key];
        let entry = if value.is_empty() {
            key.clone()
        } else {
            format!("{key}={value}")
        };
        let bytes = entry.as_bytes();
        #[allow(clippy::cast_possible_truncation)]
        buf.push(bytes.len().min(255) as u8);
        buf.extend_from_slice(&bytes[..bytes.len().min(255)]);
    }
}

impl ResourceRecord {
    fn decode(data: &[u8], pos: &mut usize) -> Result<Self, DnsError> {
        let name = decode_name(data, pos)?;
        if *pos + 10 > data.len() {
            return Err(DnsError::Truncated(*pos));
        }
        let rtype = BigEndian::read_u16(&data[*pos..]);
        let rclass = BigEndian::read_u16(&data[*pos + 2..]);
        let ttl = BigEndian::read_u32(&data[*pos + 4..]);
        let rdlen = usize::from(BigEndian::read_u16(&data[*pos + 8..]));
        *pos += 10;

        if *pos + rdlen > data.len() {
            return Err(DnsError::Truncated(*pos));
        }
        let rdata_start = *pos;
        let rdata = &data[rdata_start..rdata_start + rdlen];
        *pos += rdlen;

        let payload = match rtype {
            types::A if rdlen == 4 => {
                RecordData::A(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]))
            }
            types::PTR => {
                let mut ptr_pos = rdata_start;
                RecordData::Ptr(decode_name(data, &mut ptr_pos)?)
            }
            types::TXT => RecordData::Txt(decode_txt(rdata)),
            types::SRV if rdlen >= 6 => {
                let mut target_pos = rdata_start + 6;
                RecordData::Srv {
                    priority: BigEndian::read_u16(rdata),
                    weight: BigEndian::read_u16(&rdata[2..]),
                    port: BigEndian::read_u16(&rdata[4..]),
                    target: decode_name(data, &mut target_pos)?,
                }
            }
            _ => RecordData::Raw(rdata.to_vec()),
        };

        Ok(Self {
            name,
            rtype,
            rclass,
            ttl,
            data: payload,
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        encode_name(&self.name, buf);
        let mut fixed = [0u8; 8];
        BigEndian::write_u16(&mut fixed[0..], self.rtype);
        BigEndian::write_u16(&mut fixed[2..], self.rclass);
        BigEndian::write_u32(&mut fixed[4..], self.ttl);
        buf.extend_from_slice(&fixed);

        let mut rdata = Vec::new();
        match &self.data {
            RecordData::A(addr) => rdata.extend_from_slice(&addr.octets()),
            RecordData::Ptr(target) => encode_name(target, &mut rdata),
            RecordData::Txt(properties) => encode_txt(properties, &mut rdata),
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                let mut head = [0u8; 6];
                BigEndian::write_u16(&mut head[0..], *priority);
                BigEndian::write_u16(&mut head[2..], *weight);
                BigEndian::write_u16(&mut head[4..], *port);
                rdata.extend_from_slice(&head);
                encode_name(target, &mut rdata);
            }
            RecordData::Raw(bytes) => rdata.extend_from_slice(bytes),
        }

        let mut len = [0u8; 2];
        #[allow(clippy::cast_possible_truncation)]
        BigEndian::write_u16(&mut len, rdata.len() as u16);
        buf.extend_from_slice(&len);
        buf.extend_from_slice(&rdata);
    }
}

impl DnsMessage {
    /// Build a query message from questions.
    #[must_use]
    pub fn query(questions: Vec<Question>) -> Self {
        Self {
            questions,
            ..Self::default()
        }
    }

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(512);
        let mut header = [0u8; 12];
        BigEndian::write_u16(&mut header[0..], self.id);
        BigEndian::write_u16(&mut header[2..], self.flags);
        #[allow(clippy::cast_possible_truncation)]
        {
            BigEndian::write_u16(&mut header[4..], self.questions.len() as u16);
            BigEndian::write_u16(&mut header[6..], self.answers.len() as u16);
            BigEndian::write_u16(&mut header[8..], self.authorities.len() as u16);
            BigEndian::write_u16(&mut header[10..], self.additionals.len() as u16);
        }
        buf.extend_from_slice(&header);

        for question in &self.questions {
            encode_name(&question.name, &mut buf);
            let mut tail = [0u8; 4];
            BigEndian::write_u16(&mut tail[0..], question.qtype);
            let qclass = if question.unicast_response {
                classes::IN | 0x8000
            } else {
                classes::IN
            };
            BigEndian::write_u16(&mut tail[2..], qclass);
            buf.extend_from_slice(&tail);
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            record.encode(&mut buf);
        }
        buf
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DnsError`] on truncation or malformed compression.
    pub fn decode(data: &[u8]) -> Result<Self, DnsError> {
        if data.len() < 12 {
            return Err(DnsError::Truncated(data.len()));
        }
        let id = BigEndian::read_u16(&data[0..]);
        let flags = BigEndian::read_u16(&data[2..]);
        let qd_count = BigEndian::read_u16(&data[4..]);
        let an_count = BigEndian::read_u16(&data[6..]);
        let ns_count = BigEndian::read_u16(&data[8..]);
        let ar_count = BigEndian::read_u16(&data[10..]);

        let mut pos = 12;
        let mut questions = Vec::with_capacity(usize::from(qd_count));
        for _ in 0..qd_count {
            let name = decode_name(data, &mut pos)?;
            if pos + 4 > data.len() {
                return Err(DnsError::Truncated(pos));
            }
            let qtype = BigEndian::read_u16(&data[pos..]);
            let qclass = BigEndian::read_u16(&data[pos + 2..]);
            pos += 4;
            questions.push(Question {
                name,
                qtype,
                unicast_response: qclass & 0x8000 != 0,
            });
        }

        let mut read_records = |count: u16, pos: &mut usize| -> Result<Vec<ResourceRecord>, DnsError> {
            let mut records = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                records.push(ResourceRecord::decode(data, pos)?);
            }
            Ok(records)
        };

        let answers = read_records(an_count, &mut pos)?;
        let authorities = read_records(ns_count, &mut pos)?;
        let additionals = read_records(ar_count, &mut pos)?;

        Ok(Self {
            id,
            flags,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    /// All records across answer, authority and additional sections.
    pub fn all_records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
    }
}
