//! Wire message taxonomy (§6).
//!
//! Every message is wrapped in a [`Message`] envelope and signed over its
//! canonical (`postcard`) encoding before being handed to the transport.
//! [`MessagePayload`] is a tagged variant — one arm per wire type — rather
//! than the original's untyped `type` + `body[len]` pair; `parse` is
//! `serde`/`postcard`, `validate` lives in each module's `process_*`
//! function, and `apply` is the state transition itself (§9 guidance).

use serde::{Deserialize, Serialize};

use prime_crypto::envelope::{EnvelopeSignature, ReplicaSigningKey, ReplicaVerifyingKey};
use prime_crypto::Error as CryptoError;
use prime_types::{ClientId, Hash, Incarnation, Nonce, Ordinal, PoSeq, ReplicaId, View};

/// A signed envelope carrying one protocol message. `to = None` means
/// broadcast to every replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub from: ReplicaId,
    pub to: Option<ReplicaId>,
    pub payload: MessagePayload,
    pub signature: Option<EnvelopeSignature>,
}

impl Message {
    pub fn targeted(from: ReplicaId, to: ReplicaId, payload: MessagePayload) -> Self {
        Self {
            from,
            to: Some(to),
            payload,
            signature: None,
        }
    }

    pub fn broadcast(from: ReplicaId, payload: MessagePayload) -> Self {
        Self {
            from,
            to: None,
            payload,
            signature: None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    pub fn is_targeted_at(&self, id: ReplicaId) -> bool {
        matches!(self.to, Some(t) if t == id)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Canonical bytes signed over: everything except the signature field.
    fn signable_bytes(&self) -> Vec<u8> {
        postcard::to_allocvec(&(self.from, self.to, &self.payload))
            .expect("postcard encoding of a Message never fails")
    }

    pub fn sign(&mut self, key: &ReplicaSigningKey) {
        let bytes = self.signable_bytes();
        self.signature = Some(key.sign(&bytes));
    }

    pub fn verify(&self, key: &ReplicaVerifyingKey) -> Result<(), CryptoError> {
        let sig = self.signature.as_ref().ok_or(CryptoError::SignatureInvalid)?;
        let bytes = self.signable_bytes();
        key.verify(&bytes, sig)
    }

    pub fn view(&self) -> Option<View> {
        self.payload.view()
    }

    pub fn name(&self) -> &'static str {
        self.payload.name()
    }
}

/// One arm per wire type named in §6. Non-`Prime`-internal SCADA-level
/// payloads (`UPDATE`, `TC_*`, `CHECKPOINT`, `UPDATE_TRANSFER`,
/// `CREATE_CHECKPOINT`, `STATE_XFER`) live in `itrc` instead, since they are
/// not part of Prime's own ordering protocol — Prime only carries them as
/// opaque bytes inside a `PoRequest`/ordinal delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessagePayload {
    // -- Pre-Order (§4.1) --
    PoRequest(PoRequest),
    PoAckPart(PoAckPart),
    PoAru(PoAru),

    // -- Order (§4.2) --
    PrePrepare(PrePrepare),
    Prepare(Prepare),
    Commit(Commit),

    // -- Suspect-Leader (§4.3) --
    RttMeasure(RttMeasure),
    RttReport(RttReport),
    NewLeader(NewLeader),
    NewLeaderProof(NewLeaderProof),

    // -- View Change / Replay / Reliable Broadcast (§4.4/§4.5) --
    RbInit(RbInit),
    RbEcho(RbEcho),
    RbReady(RbReady),
    Report(Report),
    PcSet(PcSet),
    VcList(VcList),
    VcPartialSig(VcPartialSig),
    VcProof(VcProof),
    Replay(Replay),
    ReplayPrepare(ReplayPrepare),
    ReplayCommit(ReplayCommit),

    // -- Proactive Recovery / Reset (§4.5) --
    NewIncarnation(NewIncarnation),
    IncarnationAck(IncarnationAck),
    IncarnationCert(IncarnationCert),
    PendingState(PendingState),
    PendingShare(PendingShare),
    ResetVote(ResetVote),
    ResetShare(ResetShare),
    ResetProposal(ResetProposal),
    ResetPrepare(ResetPrepare),
    ResetCommit(ResetCommit),
    ResetNewLeader(ResetNewLeader),
    ResetNewLeaderProof(ResetNewLeaderProof),
    ResetViewChange(ResetViewChange),
    ResetNewView(ResetNewView),
    ResetCert(ResetCert),

    // -- Catchup (§4.6) --
    CatchupRequest(CatchupRequest),
    OrdCert(OrdCert),
    PoCert(PoCert),
    Jump(Jump),
}

impl MessagePayload {
    pub fn view(&self) -> Option<View> {
        match self {
            MessagePayload::PrePrepare(m) => Some(m.view),
            MessagePayload::Prepare(m) => Some(m.view),
            MessagePayload::Commit(m) => Some(m.view),
            MessagePayload::NewLeader(m) => Some(m.new_view),
            MessagePayload::NewLeaderProof(m) => Some(m.new_view),
            MessagePayload::VcList(m) => Some(m.view),
            MessagePayload::VcProof(m) => Some(m.view),
            MessagePayload::Replay(m) => Some(m.view),
            MessagePayload::ReplayPrepare(m) => Some(m.view),
            MessagePayload::ReplayCommit(m) => Some(m.view),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessagePayload::PoRequest(_) => "PO_REQUEST",
            MessagePayload::PoAckPart(_) => "PO_ACK",
            MessagePayload::PoAru(_) => "PO_ARU",
            MessagePayload::PrePrepare(_) => "PRE_PREPARE",
            MessagePayload::Prepare(_) => "PREPARE",
            MessagePayload::Commit(_) => "COMMIT",
            MessagePayload::RttMeasure(_) => "RTT_MEASURE",
            MessagePayload::RttReport(_) => "RTT_REPORT",
            MessagePayload::NewLeader(_) => "NEW_LEADER",
            MessagePayload::NewLeaderProof(_) => "NEW_LEADER_PROOF",
            MessagePayload::RbInit(_) => "RB_INIT",
            MessagePayload::RbEcho(_) => "RB_ECHO",
            MessagePayload::RbReady(_) => "RB_READY",
            MessagePayload::Report(_) => "REPORT",
            MessagePayload::PcSet(_) => "PC_SET",
            MessagePayload::VcList(_) => "VC_LIST",
            MessagePayload::VcPartialSig(_) => "VC_PARTIAL_SIG",
            MessagePayload::VcProof(_) => "VC_PROOF",
            MessagePayload::Replay(_) => "REPLAY",
            MessagePayload::ReplayPrepare(_) => "REPLAY_PREPARE",
            MessagePayload::ReplayCommit(_) => "REPLAY_COMMIT",
            MessagePayload::NewIncarnation(_) => "NEW_INCARNATION",
            MessagePayload::IncarnationAck(_) => "INCARNATION_ACK",
            MessagePayload::IncarnationCert(_) => "INCARNATION_CERT",
            MessagePayload::PendingState(_) => "PENDING_STATE",
            MessagePayload::PendingShare(_) => "PENDING_SHARE",
            MessagePayload::ResetVote(_) => "RESET_VOTE",
            MessagePayload::ResetShare(_) => "RESET_SHARE",
            MessagePayload::ResetProposal(_) => "RESET_PROPOSAL",
            MessagePayload::ResetPrepare(_) => "RESET_PREPARE",
            MessagePayload::ResetCommit(_) => "RESET_COMMIT",
            MessagePayload::ResetNewLeader(_) => "RESET_NEWLEADER",
            MessagePayload::ResetNewLeaderProof(_) => "RESET_NEWLEADERPROOF",
            MessagePayload::ResetViewChange(_) => "RESET_VIEWCHANGE",
            MessagePayload::ResetNewView(_) => "RESET_NEWVIEW",
            MessagePayload::ResetCert(_) => "RESET_CERT",
            MessagePayload::CatchupRequest(_) => "CATCHUP_REQUEST",
            MessagePayload::OrdCert(_) => "ORD_CERT",
            MessagePayload::PoCert(_) => "PO_CERT",
            MessagePayload::Jump(_) => "JUMP",
        }
    }
}

// ============================================================================
// Pre-Order
// ============================================================================

/// A client-update batch from its originating replica (§4.1 `Submit`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoRequest {
    pub server: ReplicaId,
    pub seq: PoSeq,
    pub digest: Hash,
    pub payload: Vec<u8>,
}

/// One replica's acknowledgement of a `PoRequest`, carrying the acking
/// replica's preinstalled-incarnation snapshot at ack time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoAckPart {
    pub origin: ReplicaId,
    pub seq: PoSeq,
    pub digest: Hash,
    pub acker: ReplicaId,
    pub preinstalled_vector: Vec<Incarnation>,
}

/// Cumulative-knowledge broadcast: one row of the proof matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoAru {
    pub replica: ReplicaId,
    pub cum_aru: Vec<PoSeq>,
}

// ============================================================================
// Order
// ============================================================================

/// One fragment of a leader's Pre-Prepare; receivers reassemble `total_parts`
/// fragments before the Ord-Slot can advance past `PartialPP`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrePrepare {
    pub view: View,
    pub seq: u64,
    pub last_executed: Vec<PoSeq>,
    pub proposal_digest: Hash,
    pub part_index: u32,
    pub total_parts: u32,
    pub matrix_fragment: Vec<PoAru>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prepare {
    pub view: View,
    pub seq: u64,
    pub pp_digest: Hash,
    pub preinstalled_vector: Vec<Incarnation>,
    pub replica: ReplicaId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub view: View,
    pub seq: u64,
    pub pp_digest: Hash,
    pub preinstalled_vector: Vec<Incarnation>,
    pub replica: ReplicaId,
}

// ============================================================================
// Suspect-Leader
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RttMeasure {
    pub from: ReplicaId,
    pub nonce: Nonce,
    pub sent_at_ns: u64,
}

/// `TAT-UB` broadcast: this replica's upper-bound RTT to every peer, reduced
/// via Marzullo's algorithm (`crate::marzullo`) into `alpha_i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RttReport {
    pub replica: ReplicaId,
    pub alpha_upper_bounds: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLeader {
    pub new_view: View,
    pub replica: ReplicaId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLeaderProof {
    pub new_view: View,
    pub voters: Vec<ReplicaId>,
}

// ============================================================================
// Reliable Broadcast (§4.5 Bracha echo/ready)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbInit {
    pub sender: ReplicaId,
    pub rb_seq: u64,
    pub view: View,
    pub digest: Hash,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbEcho {
    pub sender: ReplicaId,
    pub rb_seq: u64,
    pub view: View,
    pub digest: Hash,
    pub echoer: ReplicaId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbReady {
    pub sender: ReplicaId,
    pub rb_seq: u64,
    pub view: View,
    pub digest: Hash,
    pub reader: ReplicaId,
}

// ============================================================================
// View Change / Replay
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub view: View,
    pub replica: ReplicaId,
    pub exec_aru: u64,
    pub pc_set_size: u32,
}

/// A prepare certificate for one committed-but-not-executed ordinal, carried
/// through view change per §4.4 step 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcSet {
    pub view: View,
    pub replica: ReplicaId,
    pub seq: u64,
    pub pp_digest: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcList {
    pub view: View,
    pub replica: ReplicaId,
    pub list: Vec<ReplicaId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcPartialSig {
    pub view: View,
    pub replica: ReplicaId,
    pub start_seq: u64,
    pub share: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcProof {
    pub view: View,
    pub start_seq: u64,
    pub threshold_sig: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replay {
    pub view: View,
    pub list: Vec<ReplicaId>,
    pub start_seq: u64,
    pub threshold_sig: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayPrepare {
    pub view: View,
    pub replica: ReplicaId,
    pub digest: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayCommit {
    pub view: View,
    pub replica: ReplicaId,
    pub digest: Hash,
}

// ============================================================================
// Proactive Recovery / Reset
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIncarnation {
    pub replica: ReplicaId,
    pub incarnation: Incarnation,
    pub timestamp_ns: u64,
    pub nonce: Nonce,
    pub key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncarnationAck {
    pub replica: ReplicaId,
    pub acked_replica: ReplicaId,
    pub acked_incarnation: Incarnation,
    pub digest: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncarnationCert {
    pub acked_replica: ReplicaId,
    pub acked_incarnation: Incarnation,
    pub acks: Vec<ReplicaId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingState {
    pub replica: ReplicaId,
    pub nonce: Nonce,
    pub total_shares: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingShare {
    pub replica: ReplicaId,
    pub nonce: Nonce,
    pub share_index: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetVote {
    pub replica: ReplicaId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetShare {
    pub replica: ReplicaId,
    pub voters: Vec<ReplicaId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetProposal {
    pub leader: ReplicaId,
    pub shares: Vec<ResetShare>,
    pub proposal_digest: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetPrepare {
    pub replica: ReplicaId,
    pub proposal_digest: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetCommit {
    pub replica: ReplicaId,
    pub proposal_digest: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetNewLeader {
    pub replica: ReplicaId,
    pub new_view: View,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetNewLeaderProof {
    pub new_view: View,
    pub voters: Vec<ReplicaId>,
    pub carried_proposal: Option<ResetProposal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetViewChange {
    pub replica: ReplicaId,
    pub new_view: View,
    pub carried_proposal: Option<ResetProposal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetNewView {
    pub new_view: View,
    pub proposal: ResetProposal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetCert {
    pub proposal_digest: Hash,
    pub member_count: u32,
}

// ============================================================================
// Catchup
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatchupFlag {
    Catchup,
    Jump,
    Periodic,
    Recovery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchupRequest {
    pub requester: ReplicaId,
    pub flag: CatchupFlag,
    pub aru: u64,
    pub po_aru: Vec<PoSeq>,
    pub proposal_digest: Hash,
    pub nonce: Nonce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdCert {
    pub seq: u64,
    pub view: View,
    pub pp_digest: Hash,
    pub last_executed: Vec<PoSeq>,
    pub made_eligible: Vec<PoSeq>,
    pub matrix: Vec<PoAru>,
    pub commits: Vec<ReplicaId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoCert {
    pub origin: ReplicaId,
    pub seq: PoSeq,
    pub digest: Hash,
    pub payload: Vec<u8>,
    pub acks: Vec<ReplicaId>,
}

/// A proof that the replying replica is in a different global incarnation
/// (`seq = 0`) or the latest ordinal certificate for a far-behind requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jump {
    pub proposal_digest: Hash,
    pub cert: Option<OrdCert>,
}

/// Client-facing identifier carried alongside a `PoRequest` payload so the
/// ITRC layer knows who to reply to; Prime itself never interprets it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClientRef {
    pub client: ClientId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_crypto::envelope::ReplicaSigningKey;

    fn sample_prepare() -> MessagePayload {
        MessagePayload::Prepare(Prepare {
            view: View::new(1),
            seq: 5,
            pp_digest: Hash::ZERO,
            preinstalled_vector: vec![Incarnation::ZERO],
            replica: ReplicaId::new(1),
        })
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let sk = ReplicaSigningKey::deterministic_for_tests(1);
        let mut msg = Message::broadcast(ReplicaId::new(1), sample_prepare());
        msg.sign(&sk);
        assert!(msg.verify(&sk.verifying_key()).is_ok());
    }

    #[test]
    fn tampering_with_payload_breaks_verification() {
        let sk = ReplicaSigningKey::deterministic_for_tests(1);
        let mut msg = Message::broadcast(ReplicaId::new(1), sample_prepare());
        msg.sign(&sk);
        if let MessagePayload::Prepare(p) = &mut msg.payload {
            p.seq = 999;
        }
        assert!(msg.verify(&sk.verifying_key()).is_err());
    }

    #[test]
    fn postcard_round_trips_through_bytes() {
        let msg = Message::targeted(ReplicaId::new(1), ReplicaId::new(2), sample_prepare());
        let bytes = postcard::to_allocvec(&msg).unwrap();
        let back: Message = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back.name(), "PREPARE");
        assert_eq!(back.view(), Some(View::new(1)));
    }

    #[test]
    fn broadcast_vs_targeted() {
        let b = Message::broadcast(ReplicaId::new(1), sample_prepare());
        assert!(b.is_broadcast());
        let t = Message::targeted(ReplicaId::new(1), ReplicaId::new(2), sample_prepare());
        assert!(t.is_targeted_at(ReplicaId::new(2)));
        assert!(!t.is_targeted_at(ReplicaId::new(3)));
    }
}
