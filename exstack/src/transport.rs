//! The transport capability consumed by the aggregation engines (spec §6).
//!
//! `Transport` supplies identity, collective symmetric allocation, and a
//! collective barrier. Once a [`ByteRegion`]/[`AtomicRegion`] has been
//! collectively allocated, one-sided `put`/`fetch_add` operations happen
//! directly on the region (see the `exstack-region` crate) rather than
//! through the transport — the transport's job ends at handing every peer
//! the same symmetric allocation.
//!
//! This mirrors the split in the teacher crate between an `Allocate` that
//! hands out channel endpoints and the endpoints (`Push`/`Pull`) that then do
//! the actual data movement.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use exstack_region::{AtomicRegion, ByteRegion};

/// Abstract PGAS transport capability (spec §6).
///
/// Implementations must guarantee that allocation calls issued in the same
/// relative order by every peer resolve to the *same* underlying region —
/// this is what makes `alloc_bytes`/`alloc_atomics` collective. Engines in
/// this crate always call them in a fixed sequence at session construction,
/// so this requirement reduces to "call the same sequence of allocation
/// methods on every peer," which collective session construction already
/// demands.
pub trait Transport: Send + Sync {
    /// Number of peers `P` in the session.
    fn num_peers(&self) -> usize;
    /// This peer's identity in `[0, P)`.
    fn self_peer(&self) -> usize;
    /// Collectively allocates a symmetric byte region with `bytes_per_peer`
    /// bytes addressable at each peer.
    fn alloc_bytes(&self, bytes_per_peer: usize) -> Arc<ByteRegion>;
    /// Collectively allocates a symmetric atomic-word region, each word
    /// initialized to `init`.
    fn alloc_atomics(&self, words_per_peer: usize, init: i64) -> Arc<AtomicRegion>;
    /// Collective barrier: all prior one-sided operations from every peer
    /// complete before any peer returns.
    fn barrier(&self);
}

/// An intra-process, multi-threaded `Transport`, built the way the teacher's
/// `allocator::process::Process` builds intra-process channels: a registry
/// of collectively-indexed allocations (first caller creates the entry,
/// everyone else finds it already there) plus a shared barrier.
pub struct ThreadTransport {
    index: usize,
    peers: usize,
    barrier: Arc<Barrier>,
    registry: Arc<Mutex<HashMap<usize, Arc<dyn Any + Send + Sync>>>>,
    local_epoch: AtomicUsize,
}

impl ThreadTransport {
    /// Builds `peers` transports sharing a barrier and allocation registry,
    /// one per simulated peer. Each returned transport is `Send` and meant to
    /// be moved to its own worker thread.
    pub fn new_vector(peers: usize) -> Vec<ThreadTransport> {
        let barrier = Arc::new(Barrier::new(peers));
        let registry = Arc::new(Mutex::new(HashMap::new()));
        (0..peers)
            .map(|index| ThreadTransport {
                index,
                peers,
                barrier: Arc::clone(&barrier),
                registry: Arc::clone(&registry),
                local_epoch: AtomicUsize::new(0),
            })
            .collect()
    }

    fn next_key(&self) -> usize {
        self.local_epoch.fetch_add(1, Ordering::Relaxed)
    }
}

impl Transport for ThreadTransport {
    fn num_peers(&self) -> usize {
        self.peers
    }

    fn self_peer(&self) -> usize {
        self.index
    }

    fn alloc_bytes(&self, bytes_per_peer: usize) -> Arc<ByteRegion> {
        let key = self.next_key();
        let mut registry = self.registry.lock().expect("allocation registry poisoned");
        let entry = registry
            .entry(key)
            .or_insert_with(|| Arc::new(ByteRegion::new(self.peers, bytes_per_peer)) as Arc<dyn Any + Send + Sync>);
        Arc::clone(entry)
            .downcast::<ByteRegion>()
            .unwrap_or_else(|_| panic!("allocation {key} was not a ByteRegion; peers called alloc methods out of order"))
    }

    fn alloc_atomics(&self, words_per_peer: usize, init: i64) -> Arc<AtomicRegion> {
        let key = self.next_key();
        let mut registry = self.registry.lock().expect("allocation registry poisoned");
        let entry = registry.entry(key).or_insert_with(|| {
            Arc::new(AtomicRegion::new(self.peers, words_per_peer, init)) as Arc<dyn Any + Send + Sync>
        });
        Arc::clone(entry)
            .downcast::<AtomicRegion>()
            .unwrap_or_else(|_| panic!("allocation {key} was not an AtomicRegion; peers called alloc methods out of order"))
    }

    fn barrier(&self) {
        self.barrier.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn collective_alloc_resolves_to_same_region() {
        let transports = ThreadTransport::new_vector(3);
        let handles: Vec<_> = transports
            .into_iter()
            .map(|t| {
                thread::spawn(move || {
                    let region = t.alloc_bytes(16);
                    region.put(t.self_peer(), 0, &[t.self_peer() as u8]);
                    t.barrier();
                    region.peers()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 3);
        }
    }

    #[test]
    fn barrier_releases_all_threads() {
        let transports = ThreadTransport::new_vector(4);
        let handles: Vec<_> = transports
            .into_iter()
            .map(|t| thread::spawn(move || t.barrier()))
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
