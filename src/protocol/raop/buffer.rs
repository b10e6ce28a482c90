//! Ring buffer of recently sent packets for retransmission

use bytes::Bytes;
use std::collections::VecDeque;

/// One buffered, fully encoded audio packet.
#[derive(Debug, Clone)]
pub struct BufferedPacket {
    /// Sequence number
    pub sequence: u16,
    /// RTP timestamp
    pub timestamp: u32,
    /// Encoded packet, ready for rewrapping
    pub data: Bytes,
}

/// Fixed-capacity ring of the most recent packets.
pub struct PacketBuffer {
    capacity: usize,
    packets: VecDeque<BufferedPacket>,
}

impl PacketBuffer {
    /// Default capacity: about eight seconds of audio at RAOP rates.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Create a ring with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            packets: VecDeque::with_capacity(capacity),
        }
    }

    /// Buffer a packet, evicting the oldest when full.
    pub fn push(&mut self, packet: BufferedPacket) {
        if self.packets.len() >= self.capacity {
            self.packets.pop_front();
        }
        self.packets.push_back(packet);
    }

    /// Look up one sequence number.
    #[must_use]
    pub fn get(&self, sequence: u16) -> Option<&BufferedPacket> {
        self.packets.iter().find(|p| p.sequence == sequence)
    }

    /// Packets for a NACK range, in sequence order. Missing entries are
    /// silently absent.
    #[must_use]
    pub fn get_range(&self, first_sequence: u16, count: u16) -> Vec<&BufferedPacket> {
        (0..count)
            .filter_map(|offset| self.get(first_sequence.wrapping_add(offset)))
            .collect()
    }

    /// Drop everything (after flush).
    pub fn clear(&mut self) {
        self.packets.clear();
    }

    /// Number of buffered packets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
