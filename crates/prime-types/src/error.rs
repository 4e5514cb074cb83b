//! Shared error type for value-type construction failures.

use thiserror::Error;

/// Errors raised while constructing or validating core Prime/ITRC value types.
#[derive(Debug, Error)]
pub enum Error {
    #[error("replica id {0} out of range for N={1}")]
    ReplicaIdOutOfRange(u32, u32),

    #[error("cluster membership invalid: N={n} must be >= 3f+2k+1 (f={f}, k={k})")]
    InvalidMembership { n: u32, f: u32, k: u32 },

    #[error("malformed hash: expected {expected} bytes, got {got}")]
    MalformedHash { expected: usize, got: usize },

    #[error("ordinal event_idx {event_idx} exceeds event_tot {event_tot}")]
    OrdinalEventIndexOutOfRange { event_idx: u32, event_tot: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
