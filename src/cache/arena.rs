//! Fixed-capacity ring arena holding prefetched packets
//!
//! Packets are copied into an owned byte buffer at a write cursor. The occupied
//! region runs from the oldest resident slot to the write cursor and may wrap
//! past the physical end of the buffer. Every placement decision is a bounds
//! check on the cursor pair; callers only ever get copies back out.

use std::collections::VecDeque;

use crate::types::{Packet, PacketShape};

/// Byte range of one resident packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) index: usize,
    pub(crate) offset: usize,
    pub(crate) len: usize,
    shape: Option<PacketShape>,
}

pub(crate) struct Arena {
    buf: Vec<u8>,
    slots: VecDeque<Slot>,
    write_offset: usize,
    resident_bytes: usize,
}

impl Arena {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { buf: vec![0; capacity], slots: VecDeque::new(), write_offset: 0, resident_bytes: 0 }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether a packet of `len` bytes could ever be stored
    pub(crate) fn can_ever_hold(&self, len: usize) -> bool {
        len > 0 && len <= self.capacity()
    }

    /// Offset where `len` bytes would go right now, if anywhere
    fn placement(&self, len: usize) -> Option<usize> {
        if !self.can_ever_hold(len) {
            return None;
        }
        let Some(start) = self.slots.front().map(|slot| slot.offset) else {
            return Some(0);
        };
        if self.write_offset > start {
            // occupied [start, write); free space at the tail, then at the head
            if self.write_offset + len <= self.capacity() {
                Some(self.write_offset)
            } else if len <= start {
                Some(0)
            } else {
                None
            }
        } else if self.write_offset + len <= start {
            // wrapped: free space is [write, start)
            Some(self.write_offset)
        } else {
            None
        }
    }

    /// Copy `packet` in as the newest slot; `false` if it does not fit now
    pub(crate) fn push(&mut self, index: usize, packet: &Packet) -> bool {
        let len = packet.len();
        let Some(offset) = self.placement(len) else {
            return false;
        };
        self.buf[offset..offset + len].copy_from_slice(packet.as_bytes());
        self.slots.push_back(Slot { index, offset, len, shape: packet.shape() });
        self.write_offset = offset + len;
        self.resident_bytes += len;
        true
    }

    /// Release the oldest slot; its bytes stay readable until the next push
    pub(crate) fn pop_front(&mut self) -> Option<Slot> {
        let slot = self.slots.pop_front()?;
        self.resident_bytes -= slot.len;
        if self.slots.is_empty() {
            self.write_offset = 0;
        }
        Some(slot)
    }

    /// Copy a slot's bytes out into a standalone packet
    pub(crate) fn read(&self, slot: &Slot) -> Packet {
        Packet::copied_from(&self.buf[slot.offset..slot.offset + slot.len], slot.shape)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.write_offset = 0;
        self.resident_bytes = 0;
    }

    #[cfg(test)]
    fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }
}
