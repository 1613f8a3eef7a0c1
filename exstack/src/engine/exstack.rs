//! The classic, barrier-synchronized ExStack engine (spec §4.2, component C3).
//!
//! Operates in rounds of `push*; exchange; pop*`. `exchange` and `proceed`
//! both contain a collective barrier: every peer must call them in the same
//! program order (spec §5).

use std::sync::Arc;

use exstack_region::AtomicRegion;
use exstack_logging::Logger;

use crate::buffer::{RecvSlots, SendSlots};
use crate::error::{Result, SessionError};
use crate::logging::{SessionEvent, SessionSetup};
use crate::permutation::FlushOrder;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Active,
    Draining,
    Done,
}

/// Remembers enough of the last `pop`/`pull` to support one `unpop`/`unpull`.
struct UndoPop {
    src: usize,
}

/// A barrier-synchronized aggregation session.
pub struct ExStack<T: Transport> {
    transport: T,
    index: usize,
    peers: usize,
    capacity: usize,
    item_size: usize,

    send: SendSlots,
    recv: RecvSlots,
    counts: Arc<AtomicRegion>, // peers x peers: counts[d][s] = packages `s` shipped to `d`.
    wait_done: Arc<AtomicRegion>, // peers x peers: wait_done[p][s] = s's declared done status, as seen by p.

    push_cnt: Vec<usize>,
    pop_cnt: Vec<usize>,
    filled: Vec<usize>,
    first_ne_rcv: usize,

    flush: FlushOrder,
    state: State,
    undo: Option<UndoPop>,
    logger: Option<Logger<SessionEvent>>,
}

impl<T: Transport> ExStack<T> {
    /// Collectively initializes a session. `capacity` and `item_size` must
    /// match across every peer; mismatch is detected here and reported as a
    /// [`SessionError::ParameterMismatch`] (spec §7).
    pub fn init(transport: T, capacity: usize, item_size: usize) -> Result<Self> {
        assert!(capacity >= 1, "capacity must be at least 1");
        assert!((1..=65536).contains(&item_size), "item_size must be in [1, 65536]");

        let peers = transport.num_peers();
        let index = transport.self_peer();

        // Collective equality check: broadcast (capacity, item_size) and verify agreement.
        let params = transport.alloc_atomics(peers * 2, -1);
        params.put(index, index * 2, capacity as i64);
        params.put(index, index * 2 + 1, item_size as i64);
        transport.barrier();
        for other in 0..peers {
            let other_capacity = params.read(index, other * 2) as usize;
            let other_item_size = params.read(index, other * 2 + 1) as usize;
            if other_capacity != capacity || other_item_size != item_size {
                return Err(SessionError::ParameterMismatch {
                    local: (capacity, item_size),
                    remote: (other_capacity, other_item_size),
                });
            }
        }

        let recv_region = transport.alloc_bytes(peers * capacity * item_size);
        let counts = transport.alloc_atomics(peers, 0);
        let wait_done = transport.alloc_atomics(peers, 0);

        Ok(ExStack {
            send: SendSlots::new(peers, capacity, item_size),
            recv: RecvSlots::new(recv_region, capacity, item_size),
            counts,
            wait_done,
            push_cnt: vec![0; peers],
            pop_cnt: vec![0; peers],
            filled: vec![0; peers],
            first_ne_rcv: peers,
            flush: FlushOrder::new(peers, index),
            state: State::Fresh,
            undo: None,
            logger: None,
            transport,
            index,
            peers,
            capacity,
            item_size,
        })
    }

    /// Attaches a logger; see `exstack::logging`.
    pub fn set_logger(&mut self, logger: Logger<SessionEvent>) {
        self.logger = Some(logger);
    }

    fn log(&self, event: SessionEvent) {
        if let Some(logger) = &self.logger {
            logger.log(event);
        }
    }

    fn mark_active(&mut self) {
        if self.state == State::Fresh {
            self.state = State::Active;
            self.log(SessionEvent::State { to: "ACTIVE" });
        }
    }

    /// This peer's index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of peers in the session.
    pub fn peers(&self) -> usize {
        self.peers
    }

    /// Writes `item` into the send slot for `dest`. Returns `false` (no
    /// network activity, no state change) if that slot is full.
    pub fn push(&mut self, item: &[u8], dest: usize) -> bool {
        assert_eq!(item.len(), self.item_size, "item must be exactly item_size bytes");
        assert!(dest < self.peers, "destination out of range");
        if self.push_cnt[dest] == self.capacity {
            return false;
        }
        self.send.write(dest, self.push_cnt[dest], item);
        self.push_cnt[dest] += 1;
        self.mark_active();
        self.log(SessionEvent::Push { dest });
        true
    }

    /// Remaining room in the send slot for `dest`.
    pub fn headroom(&self, dest: usize) -> usize {
        self.capacity - self.push_cnt[dest]
    }

    /// Minimum remaining room across all destinations.
    pub fn min_headroom(&self) -> usize {
        (0..self.peers).map(|d| self.headroom(d)).min().unwrap_or(self.capacity)
    }

    /// Collective: ships every peer's filled send slots to their destinations,
    /// then makes the shipped items available to `pop`/`pull`.
    pub fn exchange(&mut self) {
        let order = self.flush.order().to_vec();
        for dest in order {
            let count = self.push_cnt[dest];
            self.counts.put(dest, self.index, count as i64);
            if count > 0 {
                let bytes = self.send.filled(dest, count).to_vec();
                self.recv.ship(self.index, dest, &bytes);
                self.log(SessionEvent::Shipped { dest, count, last: false });
            }
        }
        self.transport.barrier();

        for src in 0..self.peers {
            self.filled[src] = self.counts.read(self.index, src) as usize;
            self.pop_cnt[src] = 0;
        }
        self.first_ne_rcv = (0..self.peers).find(|&s| self.filled[s] > self.pop_cnt[s]).unwrap_or(self.peers);
        for d in 0..self.peers {
            self.push_cnt[d] = 0;
        }
        self.undo = None;
    }

    fn advance_first_ne_rcv(&mut self, from: usize) {
        let mut next = from;
        while next < self.peers && self.pop_cnt[next] >= self.filled[next] {
            next += 1;
        }
        self.first_ne_rcv = next;
    }

    /// Pops one item into `out`, returning its source peer, or `None` if every
    /// receive buffer is drained.
    pub fn pop(&mut self, out: &mut [u8]) -> Option<usize> {
        assert_eq!(out.len(), self.item_size);
        self.advance_first_ne_rcv(self.first_ne_rcv);
        if self.first_ne_rcv == self.peers {
            return None;
        }
        let src = self.first_ne_rcv;
        let idx = self.pop_cnt[src];
        out.copy_from_slice(self.recv.read(self.index, src, idx));
        self.pop_cnt[src] += 1;
        self.advance_first_ne_rcv(src);
        self.undo = Some(UndoPop { src });
        self.mark_active();
        self.log(SessionEvent::Pop { src });
        Some(src)
    }

    /// Same cursor movement as `pop`, but returns a reference into the
    /// receive slot instead of copying.
    pub fn pull(&mut self) -> Option<(&[u8], usize)> {
        self.advance_first_ne_rcv(self.first_ne_rcv);
        if self.first_ne_rcv == self.peers {
            return None;
        }
        let src = self.first_ne_rcv;
        let idx = self.pop_cnt[src];
        self.pop_cnt[src] += 1;
        self.advance_first_ne_rcv(src);
        self.undo = Some(UndoPop { src });
        Some((self.recv.read(self.index, src, idx), src))
    }

    /// Undoes the single most recent `pop`. Valid at most once per pop; a
    /// second consecutive call without an intervening pop is a programming
    /// error and panics (spec §7 "fatal assertion").
    pub fn unpop(&mut self) {
        let undo = self
            .undo
            .take()
            .expect("unpop called with no preceding pop/pull since the last exchange or unpop");
        self.pop_cnt[undo.src] -= 1;
        self.first_ne_rcv = undo.src;
    }

    /// Alias for [`ExStack::unpop`]: `pull` and `pop` share one undo slot.
    pub fn unpull(&mut self) {
        self.unpop();
    }

    /// Announces whether this peer may push more, and reports whether the
    /// session may still have work in flight. Returns `false` only once every
    /// peer has passed `done=true` *and* every send buffer was empty going
    /// into the barrier (spec requires clients to `exchange` first).
    ///
    /// Idempotent once `DONE`: repeated calls return `false` with no side
    /// effects (no broadcast, no barrier), which is safe only because every
    /// peer reaches `DONE` in the same round (the preceding barrier
    /// synchronizes the AND-reduction), so all peers skip the barrier
    /// together on subsequent calls.
    pub fn proceed(&mut self, done: bool) -> bool {
        if self.state == State::Done {
            return false;
        }
        if done && self.state != State::Draining {
            self.state = State::Draining;
            self.log(SessionEvent::State { to: "DRAINING" });
        }

        let value = if done { 1 } else { 0 };
        for dest in 0..self.peers {
            self.wait_done.put(dest, self.index, value);
        }
        self.transport.barrier();

        let all_done = (0..self.peers).all(|s| self.wait_done.read(self.index, s) == 1);
        if all_done {
            self.state = State::Done;
            self.log(SessionEvent::State { to: "DONE" });
        }
        self.log(SessionEvent::Proceed { done_requested: done, more_work: !all_done });
        !all_done
    }

    /// Collective: returns the session to `FRESH` without reallocating.
    pub fn reset(&mut self) {
        for d in 0..self.peers {
            self.push_cnt[d] = 0;
            self.pop_cnt[d] = 0;
            self.filled[d] = 0;
            self.wait_done.put(d, self.index, 0);
        }
        self.first_ne_rcv = self.peers;
        self.undo = None;
        self.flush.reseed();
        self.state = State::Fresh;
        self.transport.barrier();
        self.log(SessionEvent::State { to: "FRESH" });
    }

    /// Collective: releases the session. All peers must call this together.
    pub fn clear(self) {
        self.transport.barrier();
    }

    /// Setup metadata suitable for a logging sink.
    pub fn setup(&self) -> SessionSetup {
        SessionSetup { index: self.index, peers: self.peers, barrier_free: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ThreadTransport;
    use std::thread;

    fn run<F>(peers: usize, capacity: usize, item_size: usize, body: F)
    where
        F: Fn(ExStack<ThreadTransport>) + Send + Sync + Clone + 'static,
    {
        let transports = ThreadTransport::new_vector(peers);
        let handles: Vec<_> = transports
            .into_iter()
            .map(|t| {
                let body = body.clone();
                thread::spawn(move || {
                    let session = ExStack::init(t, capacity, item_size).expect("init");
                    body(session);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn s1_two_peers_four_items_in_order() {
        run(2, 4, 8, |mut s| {
            if s.index() == 0 {
                for v in 1u64..=4 {
                    assert!(s.push(&v.to_le_bytes(), 1));
                }
            }
            s.exchange();
            if s.index() == 1 {
                let mut received = Vec::new();
                let mut buf = [0u8; 8];
                while let Some(src) = s.pop(&mut buf) {
                    assert_eq!(src, 0);
                    received.push(u64::from_le_bytes(buf));
                }
                assert_eq!(received, vec![1, 2, 3, 4]);
            }
            assert_eq!(s.proceed(true), false, "one round, nothing left to do");
        });
    }

    #[test]
    fn s5_push_to_self_p1() {
        run(1, 8, 8, |mut s| {
            for v in 0u64..8 {
                assert!(s.push(&v.to_le_bytes(), 0));
            }
            s.exchange();
            let mut buf = [0u8; 8];
            let mut out = Vec::new();
            while let Some(_) = s.pop(&mut buf) {
                out.push(u64::from_le_bytes(buf));
            }
            assert_eq!(out, (0u64..8).collect::<Vec<_>>());
            assert_eq!(s.proceed(true), false);
        });
    }

    #[test]
    fn unpop_restores_state_then_fails_if_called_twice() {
        run(2, 4, 8, |mut s| {
            if s.index() == 0 {
                assert!(s.push(&1u64.to_le_bytes(), 1));
            }
            s.exchange();
            if s.index() == 1 {
                let mut buf = [0u8; 8];
                let src = s.pop(&mut buf).expect("one item available");
                assert_eq!(src, 0);
                s.unpop();
                let mut buf2 = [0u8; 8];
                let src2 = s.pop(&mut buf2).expect("item restored by unpop");
                assert_eq!(src2, 0);
                assert_eq!(buf2, buf);
                s.unpop();
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| s.unpop()));
                assert!(result.is_err(), "second consecutive unpop must panic");
            }
            s.proceed(true);
        });
    }

    #[test]
    fn headroom_monotone_and_resets_after_exchange() {
        run(1, 4, 4, |mut s| {
            assert_eq!(s.headroom(0), 4);
            s.push(&[0u8; 4], 0);
            assert_eq!(s.headroom(0), 3);
            s.push(&[0u8; 4], 0);
            assert_eq!(s.headroom(0), 2);
            s.exchange();
            assert_eq!(s.headroom(0), 4);
            let mut buf = [0u8; 4];
            while s.pop(&mut buf).is_some() {}
            s.proceed(true);
        });
    }

    #[test]
    fn attached_logger_observes_push_ship_pop_and_state_events() {
        use std::cell::RefCell;
        use std::rc::Rc;
        use std::time::Instant;

        run(2, 4, 8, |mut s| {
            let events: Rc<RefCell<Vec<SessionEvent>>> = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&events);
            let logger = Logger::<SessionEvent>::new(
                Instant::now(),
                Box::new(move |_elapsed, batch| {
                    sink.borrow_mut().extend(batch.iter().map(|(_, event)| *event));
                }),
            );
            s.set_logger(logger.clone());

            if s.index() == 0 {
                assert!(s.push(&7u64.to_le_bytes(), 1));
            }
            s.exchange();
            if s.index() == 1 {
                let mut buf = [0u8; 8];
                assert_eq!(s.pop(&mut buf), Some(0));
            }
            assert!(!s.proceed(true));
            logger.flush();

            let log = events.borrow();
            if s.index() == 0 {
                assert!(log.contains(&SessionEvent::Push { dest: 1 }));
                assert!(log.contains(&SessionEvent::Shipped { dest: 1, count: 1, last: false }));
            }
            if s.index() == 1 {
                assert!(log.contains(&SessionEvent::Pop { src: 0 }));
            }
            assert!(log.contains(&SessionEvent::State { to: "ACTIVE" }));
            assert!(log.contains(&SessionEvent::State { to: "DRAINING" }));
            assert!(log.contains(&SessionEvent::State { to: "DONE" }));
            assert!(log.contains(&SessionEvent::Proceed { done_requested: true, more_work: false }));
        });
    }
}
