//! The buffer matrix (spec §3 Send/Receive buffer, §4.1 C2).
//!
//! Send slots are purely local (only this peer ever reads or writes its own
//! send buffer before shipping it out). Receive slots are the remote-writable
//! half: peer `d`'s receive region has one segment per source peer, and a
//! sender `s` writes into `d`'s segment `s` through a one-sided [`ByteRegion`]
//! put.

use std::sync::Arc;

use exstack_region::ByteRegion;

/// Per-destination local send buffers: `capacity` packages of `item_size`
/// bytes, one segment per destination peer.
pub struct SendSlots {
    capacity: usize,
    item_size: usize,
    data: Vec<u8>,
}

impl SendSlots {
    /// Allocates zeroed send slots for `peers` destinations.
    pub fn new(peers: usize, capacity: usize, item_size: usize) -> Self {
        SendSlots {
            capacity,
            item_size,
            data: vec![0u8; peers * capacity * item_size],
        }
    }

    /// Maximum packages a single slot can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writes `item` (exactly `item_size` bytes) at `index` within `dest`'s slot.
    pub fn write(&mut self, dest: usize, index: usize, item: &[u8]) {
        debug_assert_eq!(item.len(), self.item_size);
        debug_assert!(index < self.capacity);
        let base = (dest * self.capacity + index) * self.item_size;
        self.data[base..base + self.item_size].copy_from_slice(item);
    }

    /// The first `count` packages of `dest`'s slot, as raw bytes.
    pub fn filled(&self, dest: usize, count: usize) -> &[u8] {
        debug_assert!(count <= self.capacity);
        let base = dest * self.capacity * self.item_size;
        &self.data[base..base + count * self.item_size]
    }
}

/// Per-source receive buffers, addressable by every peer's one-sided writes:
/// peer `d`'s region segment `s` is where peer `s` writes what it ships to `d`.
pub struct RecvSlots {
    capacity: usize,
    item_size: usize,
    region: Arc<ByteRegion>,
}

impl RecvSlots {
    /// Wraps a collectively-allocated region sized for `peers` sources.
    pub fn new(region: Arc<ByteRegion>, capacity: usize, item_size: usize) -> Self {
        RecvSlots { capacity, item_size, region }
    }

    /// Maximum packages a single slot can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// One-sided write of `count` packages (`bytes`) into `dest`'s segment for this sender.
    pub fn ship(&self, self_peer: usize, dest: usize, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.capacity * self.item_size);
        let offset = self_peer * self.capacity * self.item_size;
        self.region.put(dest, offset, bytes);
    }

    /// Reads item `index` from this peer's own segment for source `src`.
    pub fn read(&self, self_peer: usize, src: usize, index: usize) -> &[u8] {
        debug_assert!(index < self.capacity);
        let base = src * self.capacity * self.item_size + index * self.item_size;
        &self.region.local(self_peer)[base..base + self.item_size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_slots_round_trip() {
        let mut slots = SendSlots::new(3, 4, 2);
        slots.write(1, 0, &[9, 9]);
        slots.write(1, 1, &[8, 8]);
        assert_eq!(slots.filled(1, 2), &[9, 9, 8, 8]);
        assert_eq!(slots.filled(0, 0), &[] as &[u8]);
    }

    #[test]
    fn recv_slots_ship_and_read() {
        let region = Arc::new(ByteRegion::new(2, 2 * 4 * 2));
        let recv = RecvSlots::new(Arc::clone(&region), 4, 2);
        recv.ship(0, 1, &[1, 2, 3, 4]);
        assert_eq!(recv.read(1, 0, 0), &[1, 2]);
        assert_eq!(recv.read(1, 0, 1), &[3, 4]);
    }
}
