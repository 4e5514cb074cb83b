//! # prime-types: core value types for the Prime/ITRC control plane
//!
//! This crate contains the identifiers and small value types shared by every
//! other crate in the workspace:
//! - Membership identifiers ([`ReplicaId`], [`ClientId`])
//! - Ordering identifiers ([`Incarnation`], [`PoSeq`], [`Ordinal`], [`View`])
//! - Cryptographic digest type ([`Hash`])
//! - Cluster membership parameters ([`ClusterParams`], [`NodeRole`])
//!
//! Every type here is `Copy` and carries no I/O; they are pure data.

pub mod error;

pub use error::{Error, Result};

use std::fmt::{self, Debug, Display};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================================================
// ReplicaId / ClientId
// ============================================================================

/// A replica's 1-based position in the cluster membership (`1..=N`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(u32);

impl ReplicaId {
    /// Constructs a replica id. Does not validate against any particular `N`;
    /// use [`ClusterParams::contains`] at the call site where `N` is known.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ReplicaId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Identifier of a client (HMI/RTU) submitting updates. Distinct namespace
/// from [`ReplicaId`] — a client is never a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

// ============================================================================
// Incarnation / PoSeq
// ============================================================================

/// A replica's incarnation number. Monotonically increasing per replica,
/// drawn from wall-clock seconds at the start of recovery (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Incarnation(u64);

impl Incarnation {
    pub const ZERO: Incarnation = Incarnation(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Draws a fresh incarnation from the current wall clock (used at
    /// `Startup`/`Recovery` boot, never in normal operation).
    pub fn from_wall_clock_now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch")
            .as_secs();
        Self(secs)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for Incarnation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inc{}", self.0)
    }
}

/// `(incarnation, seq_num)`, ordered lexicographically. Resets to
/// `(inc, 0)` whenever a replica adopts a new incarnation (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoSeq {
    pub incarnation: Incarnation,
    pub seq_num: u64,
}

impl PoSeq {
    pub const fn new(incarnation: Incarnation, seq_num: u64) -> Self {
        Self {
            incarnation,
            seq_num,
        }
    }

    /// The first sequence number of a fresh incarnation.
    pub const fn start_of(incarnation: Incarnation) -> Self {
        Self {
            incarnation,
            seq_num: 0,
        }
    }

    /// The next `PoSeq` in the same incarnation.
    pub fn next(self) -> Self {
        Self {
            incarnation: self.incarnation,
            seq_num: self.seq_num + 1,
        }
    }
}

impl Display for PoSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.incarnation.0, self.seq_num)
    }
}

// ============================================================================
// Ordinal
// ============================================================================

/// `(ord_num, event_idx, event_tot)`. `ord_num` selects a Pre-Prepare slot;
/// `event_idx`/`event_tot` indexes one event within that slot's ordered batch
/// of delivered `(origin, seq)` pairs (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ordinal {
    pub ord_num: u64,
    pub event_idx: u32,
    pub event_tot: u32,
}

impl Ordinal {
    pub const GENESIS: Ordinal = Ordinal {
        ord_num: 0,
        event_idx: 0,
        event_tot: 0,
    };

    pub fn new(ord_num: u64, event_idx: u32, event_tot: u32) -> Result<Self> {
        if event_tot > 0 && event_idx >= event_tot {
            return Err(Error::OrdinalEventIndexOutOfRange {
                event_idx,
                event_tot,
            });
        }
        Ok(Self {
            ord_num,
            event_idx,
            event_tot,
        })
    }

    /// A synthetic `ClientNoOp` ordinal: `event_tot = 1` per spec boundary rule.
    pub fn no_op(ord_num: u64) -> Self {
        Self {
            ord_num,
            event_idx: 0,
            event_tot: 1,
        }
    }

    pub fn is_last_event(self) -> bool {
        self.event_tot == 0 || self.event_idx + 1 == self.event_tot
    }

    /// The ordinal slot number this entry belongs to, ignoring event index.
    pub fn slot(self) -> u64 {
        self.ord_num
    }
}

impl Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}/{}]", self.ord_num, self.event_idx, self.event_tot)
    }
}

// ============================================================================
// View
// ============================================================================

/// Monotonically increasing view number. `leader_of(view, n) = ((view-1) mod n) + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct View(u64);

impl View {
    pub const INITIAL: View = View(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Deterministic leader election for this view over `n` replicas.
    pub fn leader_of(self, n: u32) -> ReplicaId {
        debug_assert!(n > 0);
        let idx = (self.0.saturating_sub(1)) % u64::from(n);
        ReplicaId::new(idx as u32 + 1)
    }
}

impl Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ============================================================================
// Hash
// ============================================================================

pub const HASH_LENGTH: usize = 32;

/// A 32-byte cryptographic digest. Algorithm-agnostic at this layer; callers
/// pick BLAKE3 or SHA-256 in `prime-crypto` and wrap the output here.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_LENGTH]);

    pub fn from_bytes(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn try_from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HASH_LENGTH {
            return Err(Error::MalformedHash {
                expected: HASH_LENGTH,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; HASH_LENGTH];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "...)")
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<[u8; HASH_LENGTH]> for Hash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ============================================================================
// Nonce
// ============================================================================

/// An opaque anti-replay nonce carried on recovery/catchup messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nonce(u64);

impl Nonce {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

// ============================================================================
// Cluster membership
// ============================================================================

/// Control-Center vs Data-Center membership role (glossary: CC/DC replica).
/// Only CC replicas run pre-Prime threshold aggregation and may originate
/// client replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    ControlCenter,
    DataCenter,
}

impl NodeRole {
    pub fn is_control_center(self) -> bool {
        matches!(self, NodeRole::ControlCenter)
    }
}

/// The `(N, f, k)` membership parameters: `N` replicas tolerating `f`
/// Byzantine and `k` simultaneously-recovering replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterParams {
    pub n: u32,
    pub f: u32,
    pub k: u32,
}

impl ClusterParams {
    pub fn new(n: u32, f: u32, k: u32) -> Result<Self> {
        let min_n = 3 * f + 2 * k + 1;
        if n < min_n {
            return Err(Error::InvalidMembership { n, f, k });
        }
        Ok(Self { n, f, k })
    }

    pub fn contains(self, id: ReplicaId) -> bool {
        id.as_u32() >= 1 && id.as_u32() <= self.n
    }

    /// `2f+k+1` — used for PO-Certificate formation, commit quorum, RB echo
    /// and RB deliver thresholds, VC_List/view-installation quorums, reset
    /// quorums, checkpoint stability.
    pub fn big_quorum(self) -> u32 {
        2 * self.f + self.k + 1
    }

    /// `2f+k` — prepare-certificate threshold (matching Prepares, excluding
    /// the Pre-Prepare itself which supplies the `+1`).
    pub fn prepare_quorum(self) -> u32 {
        2 * self.f + self.k
    }

    /// `f+1` — threshold-signature reconstruction threshold, RB "amplify"
    /// threshold, checkpoint "correct" threshold.
    pub fn small_quorum(self) -> u32 {
        self.f + 1
    }

    /// `f+k+1` — suspect-leader quorum constant (`tat_leader`/`tat_acceptable`
    /// rank), jump-mismatch reset threshold, simultaneous-`Startup` abort
    /// threshold.
    pub fn suspect_quorum(self) -> u32 {
        self.f + self.k + 1
    }

    pub fn iter_replicas(self) -> impl Iterator<Item = ReplicaId> {
        (1..=self.n).map(ReplicaId::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_leader_wraps_around_membership() {
        assert_eq!(View::new(1).leader_of(4), ReplicaId::new(1));
        assert_eq!(View::new(4).leader_of(4), ReplicaId::new(4));
        assert_eq!(View::new(5).leader_of(4), ReplicaId::new(1));
        assert_eq!(View::new(6).leader_of(4), ReplicaId::new(2));
    }

    #[test]
    fn po_seq_orders_lexicographically() {
        let a = PoSeq::new(Incarnation::new(1), 9);
        let b = PoSeq::new(Incarnation::new(2), 0);
        assert!(a < b, "higher incarnation always wins regardless of seq_num");
    }

    #[test]
    fn cluster_params_rejects_undersized_membership() {
        assert!(ClusterParams::new(3, 1, 0).is_err());
        assert!(ClusterParams::new(4, 1, 0).is_ok());
    }

    #[test]
    fn cluster_params_trivial_single_replica() {
        let params = ClusterParams::new(1, 0, 0).expect("N=1,f=0,k=0 is valid");
        assert_eq!(params.big_quorum(), 1);
        assert_eq!(params.small_quorum(), 1);
    }

    #[test]
    fn ordinal_rejects_event_idx_past_tot() {
        assert!(Ordinal::new(1, 2, 2).is_err());
        assert!(Ordinal::new(1, 1, 2).is_ok());
    }

    #[test]
    fn no_op_ordinal_has_event_tot_one() {
        let o = Ordinal::no_op(7);
        assert_eq!(o.event_tot, 1);
        assert!(o.is_last_event());
    }
}
