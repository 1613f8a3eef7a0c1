//! Errors for the handful of genuinely exceptional, non-retriable conditions.
//!
//! Buffer-full and empty-on-pop are *expected* outcomes of normal operation and
//! stay return-code based (`bool`/`Option`), matching the engine's contract.
//! This type is reserved for init-time failures; `Transport` itself (see
//! `crate::transport`) is infallible by construction, so there is no
//! transport-level variant here — see SPEC_FULL.md §7/DESIGN.md for why.

use std::fmt;

/// A fatal error for a session: peers disagreed on parameters at collective init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Peers disagreed on `capacity` or `item_size` at collective init.
    ParameterMismatch {
        /// What this peer saw.
        local: (usize, usize),
        /// What some other peer saw instead.
        remote: (usize, usize),
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ParameterMismatch { local, remote } => write!(
                f,
                "session parameter mismatch: local (capacity, item_size) = {local:?}, remote = {remote:?}"
            ),
        }
    }
}

impl std::error::Error for SessionError {}

/// Convenience alias for fallible session construction.
pub type Result<T> = std::result::Result<T, SessionError>;
