//! Symmetric per-peer memory regions, addressable by every peer in a session.
//!
//! A [`ByteRegion`] models the PGAS notion of a *symmetric* allocation: each peer
//! holds a same-shaped local slice, and any peer may write into any other peer's
//! slice through a one-sided [`ByteRegion::put`]. An [`AtomicRegion`] is the same
//! idea specialized to arrays of 64-bit words, so that flags and cursors that are
//! written by remote peers and read locally (can-send flags, message-queue
//! cursors, done-wait vectors) have well-defined concurrent semantics without a
//! lock.
//!
//! Both types are building blocks for a `Transport` implementation; they do not
//! themselves know about peers, barriers, or collective allocation order — see
//! `exstack::transport` for that.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, Ordering};

/// A symmetric allocation of raw bytes, one same-sized slice per peer.
///
/// # Safety
///
/// Interior mutability here is not protected by any lock: callers must ensure
/// that concurrent writers never target overlapping byte ranges of the same
/// peer's slice. The aggregation engine upholds this by construction (a given
/// destination slot is written by exactly one source peer between drains).
pub struct ByteRegion {
    per_peer: Vec<UnsafeCell<Box<[u8]>>>,
}

// SAFETY: access is only ever performed through `put`/`local` with the
// disjoint-writer discipline documented on the type.
unsafe impl Sync for ByteRegion {}

impl ByteRegion {
    /// Allocates a region with `peers` slices, each `bytes_per_peer` bytes, zeroed.
    pub fn new(peers: usize, bytes_per_peer: usize) -> Self {
        let per_peer = (0..peers)
            .map(|_| UnsafeCell::new(vec![0u8; bytes_per_peer].into_boxed_slice()))
            .collect();
        ByteRegion { per_peer }
    }

    /// The number of peer slices in this region.
    pub fn peers(&self) -> usize {
        self.per_peer.len()
    }

    /// The number of bytes in each peer's slice.
    pub fn slice_len(&self) -> usize {
        // All slices are allocated with the same length in `new`.
        unsafe { (*self.per_peer[0].get()).len() }
    }

    /// One-sided write of `src` into peer `dst`'s slice at byte offset `offset`.
    ///
    /// Completion implies `src` may be reused by the caller; the write is
    /// immediately visible to any peer that subsequently reads `dst`'s slice
    /// (see the module docs for the disjoint-writer requirement this relies on).
    pub fn put(&self, dst: usize, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= self.slice_len(), "put out of bounds");
        // SAFETY: protocol guarantees no other writer targets this range concurrently.
        unsafe {
            let dst_slice = &mut *self.per_peer[dst].get();
            dst_slice[offset..offset + src.len()].copy_from_slice(src);
        }
    }

    /// Read-only view of the local peer's own slice.
    ///
    /// Only the owning peer should call this: it assumes no concurrent remote
    /// write is in flight to the returned range, which the engine ensures by
    /// draining a source's buffer only after observing its delivery.
    pub fn local(&self, peer: usize) -> &[u8] {
        // SAFETY: caller is the owning peer, engine serializes writes/reads per protocol.
        unsafe { &*self.per_peer[peer].get() }
    }
}

/// A symmetric allocation of 64-bit atomic words, one same-length array per peer.
pub struct AtomicRegion {
    per_peer: Vec<Box<[AtomicI64]>>,
}

impl AtomicRegion {
    /// Allocates a region with `peers` arrays of `words_per_peer` words, each `init`.
    pub fn new(peers: usize, words_per_peer: usize, init: i64) -> Self {
        let per_peer = (0..peers)
            .map(|_| (0..words_per_peer).map(|_| AtomicI64::new(init)).collect())
            .collect();
        AtomicRegion { per_peer }
    }

    /// The number of peer arrays in this region.
    pub fn peers(&self) -> usize {
        self.per_peer.len()
    }

    /// Atomically adds `delta` to peer `dst`'s word at `index`, returning the
    /// previous value. Globally visible before this call returns.
    pub fn fetch_add(&self, dst: usize, index: usize, delta: i64) -> i64 {
        self.per_peer[dst][index].fetch_add(delta, Ordering::AcqRel)
    }

    /// Single-word store with release semantics, visible to any subsequent
    /// acquire read by any peer.
    pub fn put(&self, dst: usize, index: usize, value: i64) {
        self.per_peer[dst][index].store(value, Ordering::Release);
    }

    /// Compare-and-swap on peer `dst`'s word at `index`.
    pub fn compare_exchange(&self, dst: usize, index: usize, current: i64, new: i64) -> Result<i64, i64> {
        self.per_peer[dst][index].compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    /// Acquire-ordered read of the local peer's own word.
    pub fn read(&self, peer: usize, index: usize) -> i64 {
        self.per_peer[peer][index].load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_local_is_visible() {
        let region = ByteRegion::new(3, 16);
        region.put(1, 4, &[1, 2, 3, 4]);
        assert_eq!(&region.local(1)[4..8], &[1, 2, 3, 4]);
        assert_eq!(&region.local(0)[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn atomic_fetch_add_and_read() {
        let region = AtomicRegion::new(2, 4, 0);
        assert_eq!(region.fetch_add(0, 2, 5), 0);
        assert_eq!(region.read(0, 2), 5);
        assert_eq!(region.fetch_add(0, 2, 5), 5);
        assert_eq!(region.read(0, 2), 10);
    }

    #[test]
    fn atomic_compare_exchange() {
        let region = AtomicRegion::new(1, 1, 1);
        assert_eq!(region.compare_exchange(0, 0, 1, 0), Ok(1));
        assert_eq!(region.compare_exchange(0, 0, 1, 0), Err(0));
    }
}
