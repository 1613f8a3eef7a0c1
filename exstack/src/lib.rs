//! Bulk-synchronous and barrier-free all-to-all package aggregation.
//!
//! Two engines share one contract: a client repeatedly [`engine::Session::push`]es
//! fixed-size packages tagged with a destination peer, the engine ships
//! coalesced per-destination buffers to their targets, and the client drains
//! arrivals with [`engine::Session::pop`]/[`engine::Session::pull`].
//! [`engine::ExStack`] does this in barrier-synchronized rounds
//! (`push*; exchange; pop*`); [`engine::ExStack2`] does it continuously, with
//! no barrier anywhere in the hot path, using a shared message queue to track
//! arriving buffers.
//!
//! Both engines sit on top of a [`transport::Transport`]: identity, collective
//! symmetric allocation, and a collective barrier. [`transport::ThreadTransport`]
//! is a genuine intra-process implementation suitable for embedding either
//! engine in a multi-threaded program and for this crate's own tests.

pub mod args;
pub mod buffer;
pub mod engine;
pub mod error;
pub mod logging;
pub mod permutation;
pub mod transport;

pub use engine::{ExStack, ExStack2, Session};
pub use error::SessionError;
pub use transport::{ThreadTransport, Transport};
