//! # prime-crypto: signing, threshold signatures, and checkpoint encryption
//!
//! Three independent concerns live here, matching §4.7/§4.8/§6 of the
//! design:
//! - [`envelope`]: per-replica Ed25519 signing of every wire message.
//! - [`threshold`]: the `f+1`-of-`N` threshold-signature contract shared by
//!   the pre-Prime (client-submission) and post-Prime (reply) TC keys.
//! - [`checkpoint`]: AES-256-GCM encryption of checkpoint payloads.
//! - [`digest`]: BLAKE3 digests for message/payload hashing.

pub mod checkpoint;
pub mod digest;
pub mod envelope;
pub mod error;
pub mod threshold;

pub use error::{Error, Result};
