//! The two aggregation engines and the surface shared between them (spec §4.4).

pub mod exstack;
pub mod exstack2;

pub use exstack::ExStack;
pub use exstack2::ExStack2;

use crate::transport::Transport;

/// Operations with identical semantics across [`ExStack`] and [`ExStack2`].
///
/// `exchange`, `headroom`, and `min_headroom` are specific to the
/// barrier-synchronized engine and are exposed only as `ExStack` inherent
/// methods, not part of this shared surface.
pub trait Session {
    /// This peer's index.
    fn index(&self) -> usize;
    /// Number of peers in the session.
    fn peers(&self) -> usize;
    /// Writes `item` into the send slot for `dest`.
    fn push(&mut self, item: &[u8], dest: usize) -> bool;
    /// Pops one item, returning its source peer.
    fn pop(&mut self, out: &mut [u8]) -> Option<usize>;
    /// Zero-copy `pop`: returns a reference into the receive slot instead of copying.
    fn pull(&mut self) -> Option<(&[u8], usize)>;
    /// Undoes the single most recent `pop`/`pull`.
    fn unpop(&mut self);
    /// Alias for `unpop`; `pop` and `pull` share one undo slot.
    fn unpull(&mut self);
    /// Reports whether the session may still have work in flight.
    fn proceed(&mut self, done: bool) -> bool;
    /// Collective: returns the session to `FRESH` without reallocating.
    fn reset(&mut self);
    /// Collective: releases the session.
    fn clear(self)
    where
        Self: Sized;
}

impl<T: Transport> Session for ExStack<T> {
    fn index(&self) -> usize {
        ExStack::index(self)
    }
    fn peers(&self) -> usize {
        ExStack::peers(self)
    }
    fn push(&mut self, item: &[u8], dest: usize) -> bool {
        ExStack::push(self, item, dest)
    }
    fn pop(&mut self, out: &mut [u8]) -> Option<usize> {
        ExStack::pop(self, out)
    }
    fn pull(&mut self) -> Option<(&[u8], usize)> {
        ExStack::pull(self)
    }
    fn unpop(&mut self) {
        ExStack::unpop(self)
    }
    fn unpull(&mut self) {
        ExStack::unpull(self)
    }
    fn proceed(&mut self, done: bool) -> bool {
        ExStack::proceed(self, done)
    }
    fn reset(&mut self) {
        ExStack::reset(self)
    }
    fn clear(self) {
        ExStack::clear(self)
    }
}

impl<T: Transport> Session for ExStack2<T> {
    fn index(&self) -> usize {
        ExStack2::index(self)
    }
    fn peers(&self) -> usize {
        ExStack2::peers(self)
    }
    fn push(&mut self, item: &[u8], dest: usize) -> bool {
        ExStack2::push(self, item, dest)
    }
    fn pop(&mut self, out: &mut [u8]) -> Option<usize> {
        ExStack2::pop(self, out)
    }
    fn pull(&mut self) -> Option<(&[u8], usize)> {
        ExStack2::pull(self)
    }
    fn unpop(&mut self) {
        ExStack2::unpop(self)
    }
    fn unpull(&mut self) {
        ExStack2::unpull(self)
    }
    fn proceed(&mut self, done: bool) -> bool {
        ExStack2::proceed(self, done)
    }
    fn reset(&mut self) {
        ExStack2::reset(self)
    }
    fn clear(self) {
        ExStack2::clear(self)
    }
}
