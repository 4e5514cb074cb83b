//! Wire message taxonomy for the ITRC layer (§6): everything Prime itself
//! never interprets — threshold-signature shares/finals, checkpoints, and
//! update transfer — carried as opaque bytes inside Prime's ordinal delivery
//! or exchanged directly between ITRC masters over the overlay network.

use serde::{Deserialize, Serialize};

use prime_types::{ClientId, Hash, Ordinal, PoSeq, ReplicaId};

/// One replica's partial signature over `(key, payload)`, for either the
/// pre-Prime (keyed by `(ClientId, PoSeq)`) or post-Prime (keyed by
/// `Ordinal`) threshold key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcShare<K> {
    pub key: K,
    pub from: ReplicaId,
    pub share_index: usize,
    pub share_bytes: Vec<u8>,
    pub payload_digest: Hash,
}

/// A combined threshold signature ready to forward to the external network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcFinal<K> {
    pub key: K,
    pub signature_bytes: Vec<u8>,
    pub payload_digest: Hash,
}

pub type PostPrimeShare = TcShare<u64>;
pub type PostPrimeFinal = TcFinal<u64>;
pub type PrePrimeShare = TcShare<(ClientId, PoSeq)>;
pub type PrePrimeFinal = TcFinal<(ClientId, PoSeq)>;

/// Broadcast by a CC replica once it has encrypted an application snapshot
/// at a checkpoint boundary (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub ord: Ordinal,
    pub latest_update_vector: Vec<PoSeq>,
    pub iv: [u8; 12],
    pub ciphertext: Vec<u8>,
    pub from: ReplicaId,
}

/// A request from a recovering replica for an application snapshot, issued
/// internally to the local SCADA layer (`SM_IPC_INJECT_<id>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCheckpoint {
    pub ord: Ordinal,
}

/// Addressed at a specific replica, signals it should enter update-transfer
/// recovery starting at `ord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimeStateTransfer {
    pub target: ReplicaId,
    pub ord: Ordinal,
}

/// One buffered update resent to a recovering replica, replaying everything
/// after the most recent stable checkpoint up to `recovery_ord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTransfer {
    pub ord: Ordinal,
    pub payload: Vec<u8>,
    pub digest: Hash,
    pub from: ReplicaId,
}

/// Internal IPC signal that recovery has completed and normal operation may
/// resume (`SM_IPC_INJECT_<id>` -> `Itrc_Master`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateXfer {
    pub recovery_ord: Ordinal,
}
