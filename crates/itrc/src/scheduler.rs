//! The three ITRC scheduler tasks (§5): `Itrc_Master`, `Itrc_Prime_Inject`,
//! and `Itrc_Client`. Each is modeled here as a plain FCIS-style struct with
//! explicit `tick`/`on_*` methods — the actual select-loop, socket I/O, and
//! thread-per-task startup belong to the `prime-node` shell, which owns the
//! mio event loop and drives these structs from it.

use std::collections::VecDeque;

use prime_crypto::threshold::TcPublicKeySet;
use prime_types::{ClientId, ClusterParams, Ordinal, PoSeq, ReplicaId};

use crate::checkpoint::{is_checkpoint_boundary, CheckpointTracker};
use crate::message::{Checkpoint, PostPrimeFinal, PostPrimeShare, PrePrimeFinal, PrePrimeShare};
use crate::tc_queue::TcQueue;

/// Caps how many client submissions may be in flight (awaiting pre-Prime TC
/// aggregation + Prime ordering) before `Itrc_Prime_Inject` stops accepting
/// new ones from the SCADA layer.
pub const MAX_PO_IN_FLIGHT: usize = 64;

/// Caps how many `UpdateTransfer` entries `Itrc_Master` will emit per
/// scheduler turn, so one recovering replica cannot starve normal traffic.
pub const MAX_UPDATE_TRANSFER_PER_TURN: usize = 3;

/// Upper bound on one cooperative `select` wait inside the shell's event
/// loop (§5): scheduler tasks must not block longer than this so timers and
/// the other two tasks keep making progress.
pub const SELECT_TIMEOUT_MS: u64 = 10;

/// `Itrc_Prime_Inject`: accepts client submissions, aggregates pre-Prime TC
/// shares, and feeds the result to Prime's Pre-Order.
pub struct ItrcPrimeInject {
    own: ReplicaId,
    pre_prime: TcQueue<(ClientId, PoSeq)>,
    in_flight: usize,
    ready_ready: bool,
}

impl ItrcPrimeInject {
    pub fn new(own: ReplicaId, tc_history: usize) -> Self {
        Self {
            own,
            pre_prime: TcQueue::new(tc_history),
            in_flight: 0,
            ready_ready: false,
        }
    }

    pub fn mark_ready(&mut self) {
        self.ready_ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready_ready
    }

    /// True when a new client submission should be accepted; false applies
    /// backpressure until `on_injected` drains the in-flight count.
    pub fn can_accept(&self) -> bool {
        self.in_flight < MAX_PO_IN_FLIGHT
    }

    pub fn note_submitted(&mut self) {
        self.in_flight += 1;
    }

    pub fn note_injected(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Feeds one replica's pre-Prime TC share; returns the combined
    /// signature once `f+1` matching shares have arrived, ready to attach
    /// to the client request handed to Prime.
    pub fn on_pre_prime_share(
        &mut self,
        share: PrePrimeShare,
        pks: &TcPublicKeySet,
    ) -> Option<PrePrimeFinal> {
        let parsed = prime_crypto::threshold::TcShare::from_bytes(&share.share_bytes).ok()?;
        let raw = self.pre_prime.insert_share(
            share.key,
            share.share_index,
            parsed,
            share.payload_digest,
            pks,
        )?;
        Some(PrePrimeFinal {
            key: share.key,
            signature_bytes: raw.to_bytes(),
            payload_digest: share.payload_digest,
        })
    }

    pub fn own(&self) -> ReplicaId {
        self.own
    }
}

/// `Itrc_Master`: consumes Prime's committed output, aggregates post-Prime
/// TC replies, drives checkpoint creation/observation, and forwards
/// committed application updates to the local SCADA layer over IPC.
pub struct ItrcMaster {
    own: ReplicaId,
    params: ClusterParams,
    post_prime: TcQueue<u64>,
    checkpoints: CheckpointTracker,
    applied_ord: u64,
    outbound_update_transfer: VecDeque<crate::message::UpdateTransfer>,
    ready_ready: bool,
}

impl ItrcMaster {
    pub fn new(own: ReplicaId, params: ClusterParams, tc_history: usize) -> Self {
        Self {
            own,
            params,
            post_prime: TcQueue::new(tc_history),
            checkpoints: CheckpointTracker::new(params),
            applied_ord: 0,
            outbound_update_transfer: VecDeque::new(),
            ready_ready: false,
        }
    }

    pub fn mark_ready(&mut self) {
        self.ready_ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready_ready
    }

    /// Called once Prime delivers ordinal `ord` with `payload` already
    /// applied to the SCADA state machine. Advances `applied_ord` only when
    /// `ord` is exactly the next one — out-of-order or duplicate ordinals
    /// are marked SKIP instead of producing a `TC_Final` (§4.7 contiguity
    /// rule).
    pub fn on_ordinal_applied(&mut self, ord: Ordinal, payload_digest: prime_types::Hash) {
        if ord.ord_num == self.applied_ord + 1 && ord.is_last_event() {
            self.applied_ord = ord.ord_num;
        } else {
            self.post_prime.mark_skip(ord.ord_num);
        }
        let _ = payload_digest;
    }

    /// Feeds one replica's post-Prime TC share for ordinal `ord.ord_num`.
    pub fn on_post_prime_share(
        &mut self,
        share: PostPrimeShare,
        pks: &TcPublicKeySet,
    ) -> Option<PostPrimeFinal> {
        if self.post_prime.is_skipped(share.key) {
            return None;
        }
        let parsed = prime_crypto::threshold::TcShare::from_bytes(&share.share_bytes).ok()?;
        let raw = self.post_prime.insert_share(
            share.key,
            share.share_index,
            parsed,
            share.payload_digest,
            pks,
        )?;
        Some(PostPrimeFinal {
            key: share.key,
            signature_bytes: raw.to_bytes(),
            payload_digest: share.payload_digest,
        })
    }

    /// Whether `ord` lands on a checkpoint boundary and a snapshot should be
    /// requested from the SCADA layer.
    pub fn should_checkpoint(&self, ord: Ordinal) -> bool {
        is_checkpoint_boundary(ord)
    }

    pub fn observe_checkpoint(&mut self, msg: &Checkpoint) -> usize {
        self.checkpoints.observe(msg)
    }

    pub fn stable_checkpoint(&self) -> Option<(Ordinal, prime_types::Hash)> {
        self.checkpoints.stable_checkpoint()
    }

    pub fn queue_update_transfer(&mut self, entry: crate::message::UpdateTransfer) {
        self.outbound_update_transfer.push_back(entry);
    }

    /// Drains at most [`MAX_UPDATE_TRANSFER_PER_TURN`] queued entries this
    /// scheduler turn, so recovery traffic cannot starve normal operation.
    pub fn drain_update_transfer_turn(&mut self) -> Vec<crate::message::UpdateTransfer> {
        let mut out = Vec::new();
        for _ in 0..MAX_UPDATE_TRANSFER_PER_TURN {
            match self.outbound_update_transfer.pop_front() {
                Some(e) => out.push(e),
                None => break,
            }
        }
        out
    }

    pub fn applied_ord(&self) -> u64 {
        self.applied_ord
    }

    pub fn own(&self) -> ReplicaId {
        self.own
    }
}

/// `Itrc_Client`: the client-side task that verifies a `TC_Final` reply
/// against the cluster's public key set before accepting it as authoritative.
pub struct ItrcClient {
    pks: TcPublicKeySet,
}

impl ItrcClient {
    pub fn new(pks: TcPublicKeySet) -> Self {
        Self { pks }
    }

    pub fn verify(&self, final_sig: &PostPrimeFinal, message: &[u8]) -> bool {
        match prime_crypto::threshold::TcFinal::from_bytes(&final_sig.signature_bytes) {
            Ok(raw) => self.pks.verify_final(message, &raw),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_backpressure_blocks_once_in_flight_cap_reached() {
        let mut inject = ItrcPrimeInject::new(ReplicaId::new(1), 100);
        for _ in 0..MAX_PO_IN_FLIGHT {
            assert!(inject.can_accept());
            inject.note_submitted();
        }
        assert!(!inject.can_accept());
        inject.note_injected();
        assert!(inject.can_accept());
    }

    #[test]
    fn master_marks_non_contiguous_ordinal_as_skip() {
        let params = ClusterParams::new(4, 1, 0).unwrap();
        let mut master = ItrcMaster::new(ReplicaId::new(1), params, 100);
        master.on_ordinal_applied(Ordinal::no_op(1), prime_types::Hash::ZERO);
        assert_eq!(master.applied_ord(), 1);
        master.on_ordinal_applied(Ordinal::no_op(5), prime_types::Hash::ZERO);
        assert_eq!(master.applied_ord(), 1, "gap must not advance applied_ord");
        assert!(master.post_prime.is_skipped(5));
    }

    #[test]
    fn update_transfer_drains_in_bounded_batches() {
        let params = ClusterParams::new(4, 1, 0).unwrap();
        let mut master = ItrcMaster::new(ReplicaId::new(1), params, 100);
        for i in 0..(MAX_UPDATE_TRANSFER_PER_TURN * 2) {
            master.queue_update_transfer(crate::message::UpdateTransfer {
                ord: Ordinal::no_op(i as u64),
                payload: vec![],
                digest: prime_types::Hash::ZERO,
                from: ReplicaId::new(1),
            });
        }
        let first = master.drain_update_transfer_turn();
        assert_eq!(first.len(), MAX_UPDATE_TRANSFER_PER_TURN);
        let second = master.drain_update_transfer_turn();
        assert_eq!(second.len(), MAX_UPDATE_TRANSFER_PER_TURN);
        assert!(master.drain_update_transfer_turn().is_empty());
    }
}
