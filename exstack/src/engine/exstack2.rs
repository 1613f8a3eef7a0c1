//! The barrier-free ExStack2 engine (spec §4.3, component C4).
//!
//! Each peer's view is independent: it fills send buffers, ships them when
//! full (or on request), and independently drains received buffers.
//! Synchronization uses only one-sided writes and atomic fetch-and-adds — no
//! barrier ever appears in `push`/`send`/`pop`/`pull`. `proceed` itself is
//! barrier-free too: it spin-polls the message queue rather than rendezvousing.

use std::collections::VecDeque;
use std::sync::Arc;

use exstack_region::AtomicRegion;
use exstack_logging::Logger;

use crate::buffer::{RecvSlots, SendSlots};
use crate::error::{Result, SessionError};
use crate::logging::{SessionEvent, SessionSetup};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Active,
    Draining,
    Done,
}

#[derive(Debug, Clone, Copy)]
struct ActiveBuffer {
    src: usize,
    cnt: usize,
}

struct UndoPop {
    src: usize,
    crossed_boundary: bool,
}

fn next_pow2(mut n: usize) -> usize {
    let mut p = 1;
    while p < n {
        p <<= 1;
    }
    p
}

fn encode_word(count: usize, sender: usize, last: bool) -> i64 {
    ((count as i64) << 32) | ((sender as i64) << 1) | (last as i64)
}

fn decode_word(word: i64) -> (usize, usize, bool) {
    let count = (word >> 32) as usize;
    let sender = ((word >> 1) & 0x7fff_ffff) as usize;
    let last = word & 1 != 0;
    (count, sender, last)
}

/// A barrier-free aggregation session.
///
/// The can-send flag and message queue live one-per-destination, written by
/// remote senders and read locally — see the module docs on [`crate::region`]
/// (re-exported here as `exstack_region`) for the ordering these rely on.
pub struct ExStack2<T: Transport> {
    transport: T,
    index: usize,
    peers: usize,
    capacity: usize,
    item_size: usize,
    queue_len: usize,

    send: SendSlots,
    recv: RecvSlots,
    can_send: Arc<AtomicRegion>, // peers x peers, can_send[dest][sender]
    num_msgs: Arc<AtomicRegion>, // peers x 1, num_msgs[dest][0]
    queue: Arc<AtomicRegion>,    // peers x queue_len, queue[dest][k mod Q]

    push_cnt: Vec<usize>,
    push_trigger: Vec<usize>,
    pop_cnt: Vec<usize>,

    num_made_active: usize,
    num_popped: usize,
    num_done_sending: usize,
    active: VecDeque<ActiveBuffer>,

    announced: bool,
    state: State,
    undo: Option<UndoPop>,
    logger: Option<Logger<SessionEvent>>,
}

impl<T: Transport> ExStack2<T> {
    /// Collectively initializes a session; see [`super::exstack::ExStack::init`]
    /// for the parameter-mismatch check, identical here.
    pub fn init(transport: T, capacity: usize, item_size: usize) -> Result<Self> {
        assert!(capacity >= 1, "capacity must be at least 1");
        assert!((1..=65536).contains(&item_size), "item_size must be in [1, 65536]");

        let peers = transport.num_peers();
        let index = transport.self_peer();
        let queue_len = next_pow2(2 * peers);

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
        let can_send = transport.alloc_atomics(peers, 1);
        let num_msgs = transport.alloc_atomics(1, 0);
        let queue = transport.alloc_atomics(queue_len, 0);
        transport.barrier();

        Ok(ExStack2 {
            send: SendSlots::new(peers, capacity, item_size),
            recv: RecvSlots::new(recv_region, capacity, item_size),
            can_send,
            num_msgs,
            queue,
            push_cnt: vec![0; peers],
            push_trigger: vec![capacity; peers],
            pop_cnt: vec![0; peers],
            num_made_active: 0,
            num_popped: 0,
            num_done_sending: 0,
            active: VecDeque::with_capacity(peers),
            announced: false,
            state: State::Fresh,
            undo: None,
            logger: None,
            transport,
            index,
            peers,
            capacity,
            item_size,
            queue_len,
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

    /// Ships the current contents of the send slot for `dest` (possibly
    /// empty, for a `last` announcement): spins on `can_send[dest]`, writes
    /// the payload, then publishes it on `dest`'s message queue.
    ///
    /// Ordering: the payload write happens before the `num_msgs` fetch-add
    /// that reserves this entry's queue slot, and that fetch-add happens
    /// before the word describing it is written — both are plain program
    /// order on this peer, each landing through a region `put`/`fetch_add`
    /// with release semantics, so a receiver that observes the queue word (an
    /// acquire read) also observes the payload.
    fn send(&mut self, dest: usize, last: bool) {
        while self.can_send.compare_exchange(dest, self.index, 1, 0).is_err() {
            std::thread::yield_now();
        }
        let count = self.push_cnt[dest];
        if count > 0 {
            let bytes = self.send.filled(dest, count).to_vec();
            self.recv.ship(self.index, dest, &bytes);
        }
        let k = self.num_msgs.fetch_add(dest, 0, 1);
        let word = encode_word(count, self.index, last);
        self.queue.put(dest, (k as usize) % self.queue_len, word);
        self.push_cnt[dest] = 0;
        self.push_trigger[dest] = self.capacity;
        self.log(SessionEvent::Shipped { dest, count, last });
    }

    /// Writes `item` into the send slot for `dest`. If this fills the slot to
    /// its trigger (by default, `capacity`), a send is issued automatically
    /// before returning. Returns `false` if the slot is already full and its
    /// trigger equals capacity (would overflow; call `send` — exposed here as
    /// [`ExStack2::flush`] — explicitly first).
    pub fn push(&mut self, item: &[u8], dest: usize) -> bool {
        assert_eq!(item.len(), self.item_size, "item must be exactly item_size bytes");
        assert!(dest < self.peers, "destination out of range");
        if self.push_cnt[dest] == self.capacity && self.push_trigger[dest] == self.capacity {
            return false;
        }
        self.send.write(dest, self.push_cnt[dest], item);
        self.push_cnt[dest] += 1;
        self.mark_active();
        self.log(SessionEvent::Push { dest });
        if self.push_cnt[dest] == self.push_trigger[dest] {
            self.send(dest, false);
        }
        true
    }

    /// Explicitly flushes the send slot for `dest`, even if not full.
    pub fn flush(&mut self, dest: usize) {
        self.send(dest, false);
    }

    /// Advances `num_made_active` by observing newly arrived queue entries up
    /// to the locally-cached `num_msgs`, recording non-empty ones in the
    /// active buffer queue and immediately releasing `can_send` for
    /// zero-count ("last"-only) announcements, which have nothing to drain.
    fn scan_queue(&mut self) {
        let observed = self.num_msgs.read(self.index, 0) as usize;
        while self.num_made_active < observed {
            let word = self.queue.read(self.index, self.num_made_active % self.queue_len);
            let (cnt, src, last) = decode_word(word);
            if last {
                self.num_done_sending += 1;
            }
            if cnt == 0 {
                self.can_send.put(self.index, src, 1);
            } else {
                self.active.push_back(ActiveBuffer { src, cnt });
            }
            self.num_made_active += 1;
        }
    }

    /// Pops one item into `out`, returning its source peer, or `None` if no
    /// active buffer is currently available to drain.
    pub fn pop(&mut self, out: &mut [u8]) -> Option<usize> {
        assert_eq!(out.len(), self.item_size);
        self.scan_queue();
        let current = *self.active.front()?;
        let idx = self.pop_cnt[current.src];
        out.copy_from_slice(self.recv.read(self.index, current.src, idx));
        self.pop_cnt[current.src] += 1;
        let crossed = self.pop_cnt[current.src] == current.cnt;
        if crossed {
            self.pop_cnt[current.src] = 0;
            self.can_send.put(self.index, current.src, 1);
            self.active.pop_front();
            self.num_popped += 1;
        }
        self.undo = Some(UndoPop { src: current.src, crossed_boundary: crossed });
        self.mark_active();
        self.log(SessionEvent::Pop { src: current.src });
        Some(current.src)
    }

    /// Same cursor movement as `pop`, but returns a reference into the
    /// receive slot instead of copying.
    pub fn pull(&mut self) -> Option<(&[u8], usize)> {
        self.scan_queue();
        let current = *self.active.front()?;
        let idx = self.pop_cnt[current.src];
        self.pop_cnt[current.src] += 1;
        let crossed = self.pop_cnt[current.src] == current.cnt;
        if crossed {
            self.pop_cnt[current.src] = 0;
            self.can_send.put(self.index, current.src, 1);
            self.active.pop_front();
            self.num_popped += 1;
        }
        self.undo = Some(UndoPop { src: current.src, crossed_boundary: crossed });
        Some((self.recv.read(self.index, current.src, idx), current.src))
    }

    /// Undoes the single most recent `pop`, unless it crossed a buffer
    /// boundary (fully drained and released a buffer) — ExStack2 does not
    /// support unwinding across a boundary, unlike ExStack; both cases are
    /// fatal assertions per the engine's error model.
    pub fn unpop(&mut self) {
        let undo = self
            .undo
            .take()
            .expect("unpop called with no preceding pop/pull since the last scan");
        assert!(!undo.crossed_boundary, "unpop across a drained buffer boundary is not supported");
        self.pop_cnt[undo.src] -= 1;
    }

    /// Alias for [`ExStack2::unpop`].
    pub fn unpull(&mut self) {
        self.unpop();
    }

    /// Announces, on first call with `done_pushing=true`, a last-flagged send
    /// to every destination (even if empty), then opportunistically scans for
    /// arrivals. Returns `false` only once every peer has done the same *and*
    /// every local buffer (send and active) is empty.
    pub fn proceed(&mut self, done_pushing: bool) -> bool {
        if self.state == State::Done {
            return false;
        }
        if done_pushing && !self.announced {
            self.announced = true;
            self.state = State::Draining;
            self.log(SessionEvent::State { to: "DRAINING" });
            for dest in 0..self.peers {
                self.send(dest, true);
            }
        }
        self.scan_queue();

        let sends_empty = (0..self.peers).all(|d| self.push_cnt[d] == 0);
        let buffers_drained = self.active.is_empty();
        let all_done = self.num_done_sending == self.peers && sends_empty && buffers_drained;

        if all_done {
            self.state = State::Done;
            self.log(SessionEvent::State { to: "DONE" });
        }
        self.log(SessionEvent::Proceed { done_requested: done_pushing, more_work: !all_done });
        !all_done
    }

    /// Collective: returns the session to `FRESH` without reallocating.
    pub fn reset(&mut self) {
        for dest in 0..self.peers {
            self.push_cnt[dest] = 0;
            self.push_trigger[dest] = self.capacity;
            self.pop_cnt[dest] = 0;
        }
        for sender in 0..self.peers {
            self.can_send.put(self.index, sender, 1);
        }
        self.num_msgs.put(self.index, 0, 0);
        self.active.clear();
        self.num_made_active = 0;
        self.num_popped = 0;
        self.num_done_sending = 0;
        self.announced = false;
        self.undo = None;
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
        SessionSetup { index: self.index, peers: self.peers, barrier_free: true }
    }
}
