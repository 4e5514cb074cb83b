//! Proactive Recovery & System Reset (§4.5).
//!
//! Every replica may restart under a fresh incarnation. This module tracks
//! the four-state recovery status machine, the new-incarnation join
//! protocol for rejoining a running system, the fresh-system reset protocol,
//! and the abort condition that returns a replica to `Startup`.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use prime_types::{ClusterParams, Hash, Incarnation, Nonce, ReplicaId, View};

use crate::message::{
    IncarnationAck, IncarnationCert, Jump, NewIncarnation, PendingShare, PendingState,
    ResetCert, ResetNewLeader, ResetNewLeaderProof, ResetNewView, ResetProposal, ResetShare,
    ResetVote, ResetViewChange,
};

pub const RECOVERY_UPDATE_TIMESTAMP: Duration = Duration::from_secs(2);
pub const RECOVERY_PERIOD: Duration = Duration::from_secs(30);
pub const SYSTEM_RESET_MIN_WAIT: Duration = Duration::from_secs(5);
/// If the reset leader (view 1's leader) hasn't produced a `ResetProposal`
/// this long after the reset-share quorum formed, replicas rotate leaders
/// via `ResetNewLeader`. Spec gives no `tat_leader`/`alpha_i`-style formula
/// for this case (only for the normal-view Suspect-Leader protocol), so a
/// flat timeout is used instead.
pub const RESET_LEADER_SUSPECT_WAIT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStatus {
    Startup,
    Reset,
    Recovery,
    Normal,
}

/// Tracks one in-flight Jump-quorum collection during the new-incarnation
/// join protocol (§4.5 steps 4-5).
#[derive(Default)]
struct JumpCollector {
    by_digest: BTreeMap<Hash, BTreeSet<ReplicaId>>,
    certs: BTreeMap<Hash, Jump>,
    pending_total_shares: BTreeMap<ReplicaId, u32>,
    pending_shares: BTreeMap<ReplicaId, BTreeMap<u32, Vec<u8>>>,
}

pub struct Recovery {
    pub own: ReplicaId,
    pub params: ClusterParams,
    pub status: RecoveryStatus,
    pub preinstalled_incarnation: BTreeMap<ReplicaId, Incarnation>,
    pub installed_incarnation: BTreeMap<ReplicaId, Incarnation>,
    last_recovery_time: BTreeMap<ReplicaId, Duration>,
    incarnation_acks: BTreeMap<ReplicaId, BTreeSet<ReplicaId>>,
    startup_peers: BTreeSet<ReplicaId>,
    jump: JumpCollector,
    jump_mismatch_digests: BTreeSet<Hash>,

    // System reset state.
    reset_votes: BTreeSet<ReplicaId>,
    reset_shares: BTreeMap<ReplicaId, ResetShare>,
    reset_started_at_ns: Option<u64>,
    reset_proposal_sent: bool,
    accepted_proposal: Option<ResetProposal>,
    reset_prepares: BTreeSet<ReplicaId>,
    reset_commits: BTreeSet<ReplicaId>,
    pub reset_cert: Option<ResetCert>,

    // Reset-leader rotation (carries over `accepted_proposal`, mirrors the
    // normal-view NewLeader/NewLeaderProof vote-quorum-proof shape).
    reset_leader_view: View,
    reset_new_leader_sent: bool,
    reset_new_leader_votes: BTreeMap<View, BTreeSet<ReplicaId>>,
    reset_view_change_votes: BTreeMap<View, BTreeMap<ReplicaId, Option<ResetProposal>>>,
}

impl Recovery {
    pub fn new(own: ReplicaId, params: ClusterParams) -> Self {
        Self {
            own,
            params,
            status: RecoveryStatus::Startup,
            preinstalled_incarnation: BTreeMap::new(),
            installed_incarnation: BTreeMap::new(),
            last_recovery_time: BTreeMap::new(),
            incarnation_acks: BTreeMap::new(),
            startup_peers: BTreeSet::new(),
            jump: JumpCollector::default(),
            jump_mismatch_digests: BTreeSet::new(),
            reset_votes: BTreeSet::new(),
            reset_shares: BTreeMap::new(),
            reset_started_at_ns: None,
            reset_proposal_sent: false,
            accepted_proposal: None,
            reset_prepares: BTreeSet::new(),
            reset_commits: BTreeSet::new(),
            reset_cert: None,
            reset_leader_view: View::new(1),
            reset_new_leader_sent: false,
            reset_new_leader_votes: BTreeMap::new(),
            reset_view_change_votes: BTreeMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // New-incarnation join protocol
    // ------------------------------------------------------------------

    pub fn begin_new_incarnation(&mut self, now_ns: u64, nonce: Nonce, key: Vec<u8>) -> NewIncarnation {
        self.status = RecoveryStatus::Recovery;
        NewIncarnation {
            replica: self.own,
            incarnation: Incarnation::from_wall_clock_now(),
            timestamp_ns: now_ns,
            nonce,
            key,
        }
    }

    /// A normal replica's response: only acks if the timestamp is within
    /// clock bounds and `RECOVERY_PERIOD` has elapsed since that replica's
    /// last recovery.
    pub fn on_new_incarnation(
        &mut self,
        msg: &NewIncarnation,
        now: Duration,
        clock_tolerance: Duration,
        digest_of_key: Hash,
    ) -> Option<IncarnationAck> {
        let declared = Duration::from_nanos(msg.timestamp_ns);
        let within_bounds = now.abs_diff(declared) <= clock_tolerance;
        let elapsed_ok = self
            .last_recovery_time
            .get(&msg.replica)
            .is_none_or(|last| now.saturating_sub(*last) >= RECOVERY_PERIOD);
        if !within_bounds || !elapsed_ok {
            return None;
        }
        Some(IncarnationAck {
            replica: self.own,
            acked_replica: msg.replica,
            acked_incarnation: msg.incarnation,
            digest: digest_of_key,
        })
    }

    /// On `big_quorum` acks, assembles an `IncarnationCert`.
    pub fn on_incarnation_ack(&mut self, ack: IncarnationAck) -> Option<IncarnationCert> {
        let acks = self.incarnation_acks.entry(ack.acked_replica).or_default();
        acks.insert(ack.replica);
        if acks.len() as u32 >= self.params.big_quorum() {
            Some(IncarnationCert {
                acked_replica: ack.acked_replica,
                acked_incarnation: ack.acked_incarnation,
                acks: acks.iter().copied().collect(),
            })
        } else {
            None
        }
    }

    /// Every correct recipient adopts the preinstalled incarnation and
    /// clears the recovering replica's stale pending state.
    pub fn on_incarnation_cert(&mut self, cert: &IncarnationCert, now: Duration) {
        self.preinstalled_incarnation
            .insert(cert.acked_replica, cert.acked_incarnation);
        self.last_recovery_time.insert(cert.acked_replica, now);
        if cert.acked_replica == self.own {
            self.installed_incarnation
                .insert(self.own, cert.acked_incarnation);
        }
    }

    /// Step 4: the recovering replica requests catchup under `FLAG_RECOVERY`
    /// (built by `catchup::build_request`); this just records the nonce used
    /// so matching responses can be correlated.
    pub fn on_jump_response(
        &mut self,
        responder: ReplicaId,
        jump: Jump,
    ) -> Option<(Hash, Jump)> {
        let digest = jump.proposal_digest;
        self.jump.by_digest.entry(digest).or_default().insert(responder);
        self.jump.certs.entry(digest).or_insert_with(|| jump.clone());
        if self.jump.by_digest[&digest].len() as u32 >= self.params.big_quorum() {
            Some((digest, self.jump.certs[&digest].clone()))
        } else {
            None
        }
    }

    pub fn on_pending_state(&mut self, state: PendingState) {
        self.jump
            .pending_total_shares
            .insert(state.replica, state.total_shares);
    }

    pub fn on_pending_share(&mut self, share: PendingShare) {
        self.jump
            .pending_shares
            .entry(share.replica)
            .or_default()
            .insert(share.share_index, share.data);
    }

    /// True once the recovering replica has received the full `PendingState`
    /// (all shares) from `responder`.
    pub fn pending_state_complete(&self, responder: ReplicaId) -> bool {
        let Some(total) = self.jump.pending_total_shares.get(&responder) else {
            return false;
        };
        self.jump
            .pending_shares
            .get(&responder)
            .is_some_and(|shares| shares.len() as u32 == *total)
    }

    /// §4.5 abort condition (part 2): tracks Jump responses whose proposal
    /// digest differs from the recovering replica's own. Once `f+k+1`
    /// distinct mismatching digests are observed, the replica must reset.
    pub fn record_jump_mismatch(&mut self, their_digest: Hash) -> bool {
        self.jump_mismatch_digests.insert(their_digest);
        self.jump_mismatch_digests.len() as u32 >= self.params.suspect_quorum()
    }

    pub fn complete_join(&mut self) {
        self.status = RecoveryStatus::Normal;
        self.jump = JumpCollector::default();
        self.jump_mismatch_digests.clear();
    }

    // ------------------------------------------------------------------
    // Abort condition (part 1): simultaneous Startup
    // ------------------------------------------------------------------

    pub fn observe_peer_startup(&mut self, peer: ReplicaId) -> bool {
        self.startup_peers.insert(peer);
        self.startup_peers.len() as u32 >= self.params.suspect_quorum()
    }

    /// A full local reset: return to `Startup`, drop all recovery/reset
    /// bookkeeping. Callers must also reset Pre-Order/Order/View-Change
    /// state (`PR_Reset_Prime`, §7.4).
    pub fn reset_prime(&mut self) {
        *self = Recovery::new(self.own, self.params);
    }

    // ------------------------------------------------------------------
    // System reset (fresh start)
    // ------------------------------------------------------------------

    /// A replica in `Startup` answers a peer's `NewIncarnation` with a vote
    /// for a fresh system formation instead of an ack. `now_ns` marks the
    /// reset clock's origin the first time the quorum fires, so the
    /// `SYSTEM_RESET_MIN_WAIT` gate downstream measures real elapsed time
    /// rather than a value the caller would otherwise have to fake.
    pub fn on_reset_vote(&mut self, vote: ResetVote, now_ns: u64) -> Option<ResetShare> {
        if self.status != RecoveryStatus::Startup {
            return None;
        }
        self.reset_votes.insert(vote.replica);
        if self.reset_votes.len() as u32 >= self.params.big_quorum() {
            self.status = RecoveryStatus::Reset;
            self.reset_started_at_ns.get_or_insert(now_ns);
            Some(ResetShare {
                replica: self.own,
                voters: self.reset_votes.iter().copied().collect(),
            })
        } else {
            None
        }
    }

    pub fn on_reset_share(&mut self, share: ResetShare) {
        self.reset_shares.insert(share.replica, share);
    }

    /// Elapsed time since this replica's reset clock started (the moment
    /// `on_reset_vote` first reached quorum), or `Duration::ZERO` if the
    /// reset hasn't started yet — callers gate on the real clock instead of
    /// a placeholder.
    pub fn elapsed_since_reset(&self, now_ns: u64) -> Duration {
        match self.reset_started_at_ns {
            Some(start) => Duration::from_nanos(now_ns.saturating_sub(start)),
            None => Duration::ZERO,
        }
    }

    pub fn proposal_sent(&self) -> bool {
        self.reset_proposal_sent
    }

    pub fn mark_proposal_sent(&mut self) {
        self.reset_proposal_sent = true;
    }

    /// The leader of view 1, after `SYSTEM_RESET_MIN_WAIT`, forms a
    /// `ResetProposal` over every known share once `big_quorum` have
    /// arrived.
    pub fn build_reset_proposal(&self, leader: ReplicaId, elapsed: Duration) -> Option<ResetProposal> {
        if elapsed < SYSTEM_RESET_MIN_WAIT {
            return None;
        }
        if self.reset_shares.len() as u32 < self.params.big_quorum() {
            return None;
        }
        let shares: Vec<ResetShare> = self.reset_shares.values().cloned().collect();
        let digest = prime_crypto::digest::digest(
            &postcard::to_allocvec(&shares).expect("reset shares encode"),
        );
        Some(ResetProposal {
            leader,
            shares,
            proposal_digest: digest,
        })
    }

    /// Non-leaders process the proposal only after the minimum delay and
    /// only if it covers their own share and every share they know about.
    pub fn accept_reset_proposal(&mut self, proposal: &ResetProposal, elapsed: Duration) -> bool {
        if elapsed < SYSTEM_RESET_MIN_WAIT {
            return false;
        }
        let proposal_replicas: BTreeSet<ReplicaId> =
            proposal.shares.iter().map(|s| s.replica).collect();
        let accepted = proposal_replicas.contains(&self.own)
            && self.reset_shares.keys().all(|r| proposal_replicas.contains(r));
        if accepted {
            self.accepted_proposal = Some(proposal.clone());
        }
        accepted
    }

    pub fn accepted_proposal(&self) -> Option<&ResetProposal> {
        self.accepted_proposal.as_ref()
    }

    pub fn on_reset_prepare(&mut self, replica: ReplicaId) -> bool {
        self.reset_prepares.insert(replica);
        self.reset_prepares.len() as u32 >= self.params.prepare_quorum()
    }

    /// On `big_quorum` `ResetCommit`s the `ResetCert` is adopted by all
    /// correct members as the global-incarnation proof, and `ARU=0, view=1`
    /// becomes the starting global state.
    pub fn on_reset_commit(&mut self, replica: ReplicaId, proposal: &ResetProposal) -> Option<ResetCert> {
        self.reset_commits.insert(replica);
        if self.reset_commits.len() as u32 >= self.params.big_quorum() {
            let cert = ResetCert {
                proposal_digest: proposal.proposal_digest,
                member_count: proposal.shares.len() as u32,
            };
            self.reset_cert = Some(cert.clone());
            self.status = RecoveryStatus::Normal;
            Some(cert)
        } else {
            None
        }
    }

    pub fn starting_view(&self) -> View {
        View::INITIAL
    }

    // ------------------------------------------------------------------
    // Reset-leader rotation: if the reset leader is too slow to produce a
    // `ResetProposal`, replicas rotate via `ResetNewLeader` ->
    // `ResetNewLeaderProof` -> `ResetViewChange` -> `ResetNewView`, carrying
    // over `accepted_proposal` if one was already prepared (§4.5).
    // ------------------------------------------------------------------

    pub fn reset_leader_view(&self) -> View {
        self.reset_leader_view
    }

    /// Whether the current reset leader should be suspected: we are past
    /// `RESET_LEADER_SUSPECT_WAIT` since the reset clock started, have a
    /// `ResetShare` quorum, but no proposal has been accepted yet, and we
    /// haven't already voted in this reset-leader view.
    pub fn should_suspect_reset_leader(&self, elapsed: Duration) -> bool {
        !self.reset_new_leader_sent
            && self.accepted_proposal.is_none()
            && self.reset_shares.len() as u32 >= self.params.big_quorum()
            && elapsed >= RESET_LEADER_SUSPECT_WAIT
    }

    pub fn mark_reset_new_leader_sent(&mut self) {
        self.reset_new_leader_sent = true;
    }

    /// On `big_quorum` matching `ResetNewLeader` votes for the same
    /// `new_view`, builds the proof, carrying over any already-accepted
    /// proposal.
    pub fn on_reset_new_leader(&mut self, vote: ResetNewLeader) -> Option<ResetNewLeaderProof> {
        let set = self.reset_new_leader_votes.entry(vote.new_view).or_default();
        set.insert(vote.replica);
        if set.len() as u32 >= self.params.big_quorum() {
            Some(ResetNewLeaderProof {
                new_view: vote.new_view,
                voters: set.iter().copied().collect(),
                carried_proposal: self.accepted_proposal.clone(),
            })
        } else {
            None
        }
    }

    /// Every replica, on a valid proof, broadcasts `ResetViewChange` for the
    /// new reset-leader view, carrying over whichever proposal (ours or the
    /// proof's) is non-`None`.
    pub fn on_reset_new_leader_proof(&mut self, proof: &ResetNewLeaderProof) -> Option<ResetViewChange> {
        if proof.new_view <= self.reset_leader_view {
            return None;
        }
        let carried = proof.carried_proposal.clone().or_else(|| self.accepted_proposal.clone());
        Some(ResetViewChange {
            replica: self.own,
            new_view: proof.new_view,
            carried_proposal: carried,
        })
    }

    /// On `big_quorum` `ResetViewChange`s for the same `new_view`, the new
    /// reset leader forms a `ResetNewView` carrying whichever already-
    /// prepared proposal a voter supplied (first one seen wins — all
    /// correct voters that carry one carry the same accepted proposal).
    pub fn on_reset_view_change(&mut self, vc: ResetViewChange) -> Option<ResetNewView> {
        let carried = vc.carried_proposal.clone();
        let bucket = self.reset_view_change_votes.entry(vc.new_view).or_default();
        bucket.insert(vc.replica, carried);
        if bucket.len() as u32 >= self.params.big_quorum() {
            let proposal = bucket
                .values()
                .find_map(|p| p.clone())
                .or_else(|| self.accepted_proposal.clone())?;
            Some(ResetNewView {
                new_view: vc.new_view,
                proposal,
            })
        } else {
            None
        }
    }

    /// Installs the rotated reset-leader view and the carried-over proposal
    /// (if any) as this replica's accepted proposal, mirroring
    /// `accept_reset_proposal`'s bookkeeping without re-checking the
    /// min-wait gate (the rotation itself only happens after that gate
    /// already elapsed once).
    pub fn on_reset_new_view(&mut self, new_view: &ResetNewView) {
        if new_view.new_view <= self.reset_leader_view {
            return;
        }
        self.reset_leader_view = new_view.new_view;
        self.reset_new_leader_sent = false;
        self.accepted_proposal = Some(new_view.proposal.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ClusterParams {
        ClusterParams::new(4, 1, 0).unwrap()
    }

    #[test]
    fn simultaneous_startup_triggers_abort_condition() {
        let mut r = Recovery::new(ReplicaId::new(1), params());
        assert!(!r.observe_peer_startup(ReplicaId::new(2)));
        assert!(r.observe_peer_startup(ReplicaId::new(3)), "f+k+1=2 reached");
    }

    #[test]
    fn incarnation_ack_quorum_forms_cert() {
        let mut r = Recovery::new(ReplicaId::new(1), params());
        let acked = ReplicaId::new(2);
        let inc = Incarnation::new(500);
        for id in [1u32, 2, 3] {
            let cert = r.on_incarnation_ack(IncarnationAck {
                replica: ReplicaId::new(id),
                acked_replica: acked,
                acked_incarnation: inc,
                digest: Hash::ZERO,
            });
            if id == 3 {
                assert!(cert.is_some());
            } else {
                assert!(cert.is_none());
            }
        }
    }

    #[test]
    fn jump_mismatch_count_triggers_reset() {
        let mut r = Recovery::new(ReplicaId::new(4), params());
        let digest_a = Hash::from_bytes([1u8; 32]);
        let digest_b = Hash::from_bytes([2u8; 32]);
        assert!(!r.record_jump_mismatch(digest_a));
        assert!(r.record_jump_mismatch(digest_b), "f+k+1=2 distinct mismatches");
    }

    #[test]
    fn reset_proposal_requires_min_wait() {
        let mut r = Recovery::new(ReplicaId::new(1), params());
        for id in [1u32, 2, 3] {
            r.on_reset_share(ResetShare {
                replica: ReplicaId::new(id),
                voters: vec![],
            });
        }
        assert!(r
            .build_reset_proposal(ReplicaId::new(1), Duration::from_secs(1))
            .is_none());
        assert!(r
            .build_reset_proposal(ReplicaId::new(1), SYSTEM_RESET_MIN_WAIT)
            .is_some());
    }
}
