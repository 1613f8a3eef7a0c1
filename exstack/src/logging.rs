//! Session-level event types for the `exstack-logging` core.
//!
//! Mirrors the split in the teacher crate between the generic logging core
//! (`exstack-logging`'s `Registry`/`Logger<T>`) and a thin per-crate module
//! declaring what gets logged (here: pushes, buffer shipment, pops, and
//! `proceed`/state-machine transitions).

/// Identifies a session for logging purposes.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct SessionSetup {
    /// This peer's index.
    pub index: usize,
    /// Number of peers in the session.
    pub peers: usize,
    /// `true` for ExStack2 (barrier-free), `false` for ExStack.
    pub barrier_free: bool,
}

/// Observable events a session may log.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SessionEvent {
    /// An item was pushed toward `dest`.
    Push {
        /// Destination peer.
        dest: usize,
    },
    /// A buffer was shipped to `dest`, carrying `count` items.
    ///
    /// For ExStack this happens once per destination per `exchange`; for
    /// ExStack2 once per `send` (trigger-driven or explicit).
    Shipped {
        /// Destination peer.
        dest: usize,
        /// Number of packages in the shipment.
        count: usize,
        /// Whether this was the sender's last shipment to `dest`.
        last: bool,
    },
    /// An item was popped, originating from `src`.
    Pop {
        /// Source peer.
        src: usize,
    },
    /// A `proceed` call returned.
    Proceed {
        /// Whether the caller declared it is done pushing.
        done_requested: bool,
        /// Whether the session reports more work may remain.
        more_work: bool,
    },
    /// The session's state machine transitioned.
    State {
        /// Human-readable name of the new state (`"ACTIVE"`, `"DRAINING"`, `"DONE"`, `"FRESH"`).
        to: &'static str,
    },
}
