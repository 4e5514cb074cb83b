//! Order (§4.2): the leader-driven Pre-Prepare / Prepare / Commit pipeline
//! that assigns a total order to PO-Requests made eligible by the proof
//! matrix.

use std::collections::BTreeMap;

use prime_crypto::digest;
use prime_types::{ClusterParams, Hash, Incarnation, PoSeq, ReplicaId, View};

use crate::message::{Commit, OrdCert, PoAru, Prepare, PrePrepare};
use crate::pre_order::proof_aru;

/// §4.2 state diagram. Transitions are idempotent and may only advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Empty,
    PartialPp,
    CollectedAllParts,
    PreparedCert,
    CommittedCert,
    Executed,
}

/// The branch an Ord-Slot took to reach `CommittedCert`: ordinary client
/// traffic, a prepare certificate carried over view change, or one of the
/// two Replay-synthesized no-op kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Commit,
    PcSet,
    NoOp,
    NoOpPlus,
}

#[derive(Debug, Clone)]
pub struct OrdSlot {
    pub seq: u64,
    pub view: View,
    pub phase: Phase,
    pub kind: SlotKind,
    fragments: BTreeMap<u32, PrePrepare>,
    total_parts: Option<u32>,
    pub pp_digest: Option<Hash>,
    pub last_executed: Vec<PoSeq>,
    pub made_eligible: Vec<PoSeq>,
    preinstalled_vector: Option<Vec<Incarnation>>,
    prepares: BTreeMap<ReplicaId, Prepare>,
    commits: BTreeMap<ReplicaId, Commit>,
    pub cert: Option<OrdCert>,
}

impl OrdSlot {
    fn empty(seq: u64) -> Self {
        Self {
            seq,
            view: View::new(0),
            phase: Phase::Empty,
            kind: SlotKind::Commit,
            fragments: BTreeMap::new(),
            total_parts: None,
            pp_digest: None,
            last_executed: Vec::new(),
            made_eligible: Vec::new(),
            preinstalled_vector: None,
            prepares: BTreeMap::new(),
            commits: BTreeMap::new(),
            cert: None,
        }
    }

    /// Advances `self.phase` to `target` unless already at or past it
    /// (transitions only ever move forward, §4.2).
    fn advance_to(&mut self, target: Phase) {
        if target > self.phase {
            self.phase = target;
        }
    }
}

pub struct Order {
    pub own: ReplicaId,
    pub params: ClusterParams,
    pub member_order: Vec<ReplicaId>,
    pub slots: BTreeMap<u64, OrdSlot>,
    /// `DATA.ORD.seq`: next sequence number the leader will assign.
    pub next_seq: u64,
    /// Last matrix successfully enqueued in a Pre-Prepare (leader only);
    /// `PeriodicProofMatrix` re-sends only when the matrix changes.
    last_sent_matrix_digest: Option<Hash>,
    /// `ppARU` (glossary): the largest ordinal for which a Prepare has been
    /// sent contiguously — i.e. the highest `seq` with no gap in
    /// `CollectedAllParts` below it.
    pp_aru: u64,
    /// The largest ordinal that has reached `PreparedCert`, contiguously.
    high_prepared: u64,
    /// The ordinal this replica last landed on via a Jump, or `0` if it has
    /// never jumped. Ordinals at or below this were synthesized rather than
    /// individually certified, and are never re-requested incrementally.
    stable_catchup: u64,
}

impl Order {
    pub fn new(own: ReplicaId, params: ClusterParams, member_order: Vec<ReplicaId>) -> Self {
        let mut slots = BTreeMap::new();
        slots.insert(0, {
            let mut s = OrdSlot::empty(0);
            s.phase = Phase::Executed;
            s.made_eligible = vec![PoSeq::start_of(Incarnation::ZERO); member_order.len()];
            s
        });
        Self {
            own,
            params,
            member_order,
            slots,
            next_seq: 1,
            last_sent_matrix_digest: None,
            pp_aru: 0,
            high_prepared: 0,
            stable_catchup: 0,
        }
    }

    pub fn pp_aru(&self) -> u64 {
        self.pp_aru
    }

    pub fn high_prepared(&self) -> u64 {
        self.high_prepared
    }

    pub fn stable_catchup(&self) -> u64 {
        self.stable_catchup
    }

    /// Jump-landing (§4.6): adopts `landing` as the new present, discarding
    /// all Ord-Slot state at or below it and replacing it with a single
    /// synthesized `Executed` slot carrying the cert's `made_eligible` /
    /// `last_executed` vectors (already the `max(last_executed, proof_aru)`
    /// values the certifying quorum computed when the cert formed — see
    /// `on_pre_prepare_fragment`). Advances `ppARU`/`high_prepared` to the
    /// landing point since nothing below it can still be pending, and GCs
    /// every slot the jump subsumes.
    pub fn land_jump(&mut self, landing: &crate::catchup::JumpLanding) {
        let cutoff = landing.seq;
        if cutoff < self.stable_catchup {
            return; // a later jump already landed further ahead
        }
        self.slots.retain(|seq, _| *seq > cutoff);
        self.slots.insert(cutoff, {
            let mut s = OrdSlot::empty(cutoff);
            s.view = landing.view;
            s.phase = Phase::Executed;
            s.last_executed = landing.last_executed.clone();
            s.made_eligible = landing.made_eligible.clone();
            s
        });
        self.next_seq = self.next_seq.max(cutoff + 1);
        self.pp_aru = self.pp_aru.max(cutoff);
        self.high_prepared = self.high_prepared.max(cutoff);
        self.stable_catchup = cutoff;
    }

    fn column_index(&self, replica: ReplicaId) -> Option<usize> {
        self.member_order.iter().position(|r| *r == replica)
    }

    fn slot_mut(&mut self, seq: u64) -> &mut OrdSlot {
        self.slots.entry(seq).or_insert_with(|| OrdSlot::empty(seq))
    }

    /// **Leader behavior.** Builds a Pre-Prepare (possibly fragmented) for
    /// `next_seq` if the matrix changed since the last send. `fragment_size`
    /// caps how many matrix rows go in each `PrePrepare` part.
    pub fn leader_build_pre_prepare(
        &mut self,
        view: View,
        matrix: &[PoAru],
        fragment_size: usize,
    ) -> Option<Vec<PrePrepare>> {
        let matrix_digest = digest::digest(
            &postcard::to_allocvec(matrix).expect("matrix encodes"),
        );
        if Some(matrix_digest) == self.last_sent_matrix_digest {
            return None;
        }
        self.last_sent_matrix_digest = Some(matrix_digest);

        let seq = self.next_seq;
        let prev_made_eligible = self
            .slots
            .get(&(seq - 1))
            .map(|s| s.made_eligible.clone())
            .unwrap_or_default();
        let proposal_digest = digest::digest(format!("{seq}:{matrix_digest}").as_bytes());

        let chunks: Vec<&[PoAru]> = if fragment_size == 0 {
            vec![matrix]
        } else {
            matrix.chunks(fragment_size).collect()
        };
        let total_parts = chunks.len().max(1) as u32;
        let fragments: Vec<PrePrepare> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| PrePrepare {
                view,
                seq,
                last_executed: prev_made_eligible.clone(),
                proposal_digest,
                part_index: i as u32,
                total_parts,
                matrix_fragment: chunk.to_vec(),
            })
            .collect();
        self.next_seq += 1;
        Some(fragments)
    }

    /// **Non-leader behavior.** Accumulates one Pre-Prepare fragment.
    /// Returns a `Prepare` once all parts for `seq = ppARU+1` are collected
    /// and validation passes; `Ok(None)` means defer (installed incarnations
    /// not yet caught up), `Err` means refuse (backwards progress, §4.2).
    pub fn on_pre_prepare_fragment(
        &mut self,
        frag: PrePrepare,
        installed_incarnations: &[Incarnation],
    ) -> Result<Option<Prepare>, &'static str> {
        let seq = frag.seq;
        let view = frag.view;
        let proposal_digest = frag.proposal_digest;
        let last_executed = frag.last_executed.clone();
        let part_index = frag.part_index;
        let total_parts = frag.total_parts;

        let slot = self.slot_mut(seq);
        if slot.phase >= Phase::CollectedAllParts {
            return Ok(None); // already advanced; idempotent no-op
        }
        slot.view = view;
        slot.total_parts = Some(total_parts);
        slot.fragments.insert(part_index, frag);
        if slot.fragments.len() as u32 != total_parts {
            slot.advance_to(Phase::PartialPp);
            return Ok(None);
        }

        // All parts in. Validate installed incarnations cover every row.
        let mut matrix: Vec<PoAru> = Vec::new();
        for i in 0..total_parts {
            let part = slot.fragments.get(&i).expect("contiguous by total_parts");
            matrix.extend(part.matrix_fragment.iter().cloned());
        }
        for row in &matrix {
            if let Some(col) = self.column_index(row.replica) {
                if let Some(installed) = installed_incarnations.get(col) {
                    if let Some(latest) = row.cum_aru.last() {
                        if *installed < latest.incarnation {
                            return Ok(None); // defer
                        }
                    }
                }
            }
        }

        let prev_made_eligible = self
            .slots
            .get(&(seq.saturating_sub(1)))
            .map(|s| s.made_eligible.clone())
            .unwrap_or_default();
        if !prev_made_eligible.is_empty() && prev_made_eligible != last_executed {
            return Err("backwards progress: last_executed does not match previous made_eligible");
        }

        let made_eligible: Vec<PoSeq> = (0..self.member_order.len())
            .map(|j| {
                let lhs = last_executed.get(j).copied().unwrap_or(PoSeq::start_of(Incarnation::ZERO));
                let rhs = proof_aru(j, &matrix, self.params);
                lhs.max(rhs)
            })
            .collect();

        let pp_digest = digest::digest(proposal_digest.to_string().as_bytes());

        let slot = self.slot_mut(seq);
        slot.last_executed = last_executed;
        slot.made_eligible = made_eligible;
        slot.pp_digest = Some(pp_digest);
        slot.advance_to(Phase::CollectedAllParts);
        if seq == self.pp_aru + 1 {
            self.pp_aru = seq;
        }

        Ok(Some(Prepare {
            view,
            seq,
            pp_digest,
            preinstalled_vector: installed_incarnations.to_vec(),
            replica: self.own,
        }))
    }

    /// On `prepare_quorum` (`2f+k`) matching Prepares plus the Pre-Prepare
    /// itself, emits a Commit. Mismatched `preinstalled_vector` or digest are
    /// silently dropped per §4.2's tie-break rule.
    pub fn on_prepare(&mut self, prepare: Prepare) -> Option<Commit> {
        let seq = prepare.seq;
        let slot = self.slots.get_mut(&seq)?;
        if slot.phase < Phase::CollectedAllParts || slot.pp_digest != Some(prepare.pp_digest) {
            return None;
        }
        if let Some(snapshot) = &slot.preinstalled_vector {
            if *snapshot != prepare.preinstalled_vector {
                return None;
            }
        } else {
            slot.preinstalled_vector = Some(prepare.preinstalled_vector.clone());
        }
        slot.prepares.insert(prepare.replica, prepare);
        if slot.phase >= Phase::PreparedCert {
            return None; // already emitted
        }
        let matching = slot
            .prepares
            .values()
            .filter(|p| slot.preinstalled_vector.as_deref() == Some(p.preinstalled_vector.as_slice()))
            .count() as u32;
        if matching >= self.params.prepare_quorum() {
            slot.advance_to(Phase::PreparedCert);
            let commit = Commit {
                view: slot.view,
                seq,
                pp_digest: slot.pp_digest.expect("set at CollectedAllParts"),
                preinstalled_vector: slot.preinstalled_vector.clone().unwrap_or_default(),
                replica: self.own,
            };
            if seq == self.high_prepared + 1 {
                self.high_prepared = seq;
            }
            Some(commit)
        } else {
            None
        }
    }

    /// On `big_quorum` (`2f+k+1`) matching Commits, the slot is ordered and
    /// an `OrdCert` is formed.
    pub fn on_commit(&mut self, commit: Commit, matrix: &[PoAru]) -> bool {
        let seq = commit.seq;
        let Some(slot) = self.slots.get_mut(&seq) else {
            return false;
        };
        if slot.pp_digest != Some(commit.pp_digest) {
            return false;
        }
        slot.commits.insert(commit.replica, commit);
        if slot.phase >= Phase::CommittedCert {
            return false;
        }
        let matching = slot.commits.len() as u32;
        if matching >= self.params.big_quorum() {
            slot.advance_to(Phase::CommittedCert);
            slot.cert = Some(OrdCert {
                seq,
                view: slot.view,
                pp_digest: slot.pp_digest.expect("set at CollectedAllParts"),
                last_executed: slot.last_executed.clone(),
                made_eligible: slot.made_eligible.clone(),
                matrix: matrix.to_vec(),
                commits: slot.commits.keys().copied().collect(),
            });
            true
        } else {
            false
        }
    }

    /// A slot is ready to execute iff the previous slot is executed and
    /// `has_po_request` confirms every referenced `(origin, seq)` is local.
    pub fn ready_to_execute(
        &self,
        seq: u64,
        has_po_request: impl Fn(ReplicaId, PoSeq) -> bool,
    ) -> bool {
        let Some(slot) = self.slots.get(&seq) else {
            return false;
        };
        if slot.phase < Phase::CommittedCert {
            return false;
        }
        let Some(prev) = self.slots.get(&(seq.saturating_sub(1))) else {
            return false;
        };
        if prev.phase != Phase::Executed {
            return false;
        }
        for (idx, replica) in self.member_order.iter().enumerate() {
            let from = prev.made_eligible.get(idx).copied().unwrap_or(PoSeq::start_of(Incarnation::ZERO));
            let to = slot.made_eligible.get(idx).copied().unwrap_or(from);
            let mut cursor = from;
            while cursor < to {
                cursor = cursor.next();
                if !has_po_request(*replica, cursor) {
                    return false;
                }
            }
        }
        true
    }

    /// Executes `seq`, returning the `(origin, seq)` pairs to deliver
    /// downstream in canonical order (origin ascending, seq ascending).
    pub fn execute(&mut self, seq: u64) -> Vec<(ReplicaId, PoSeq)> {
        let prev_made_eligible = self
            .slots
            .get(&(seq.saturating_sub(1)))
            .map(|s| s.made_eligible.clone())
            .unwrap_or_default();
        let member_order = self.member_order.clone();
        let Some(slot) = self.slots.get_mut(&seq) else {
            return Vec::new();
        };
        let mut delivered = Vec::new();
        for (idx, replica) in member_order.iter().enumerate() {
            let from = prev_made_eligible.get(idx).copied().unwrap_or(PoSeq::start_of(Incarnation::ZERO));
            let to = slot.made_eligible.get(idx).copied().unwrap_or(from);
            let mut cursor = from;
            while cursor < to {
                cursor = cursor.next();
                delivered.push((*replica, cursor));
            }
        }
        slot.advance_to(Phase::Executed);
        delivered
    }

    pub fn phase(&self, seq: u64) -> Option<Phase> {
        self.slots.get(&seq).map(|s| s.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ClusterParams {
        ClusterParams::new(4, 1, 0).unwrap()
    }

    fn members() -> Vec<ReplicaId> {
        (1..=4).map(ReplicaId::new).collect()
    }

    #[test]
    fn phase_never_regresses() {
        let mut slot = OrdSlot::empty(1);
        slot.advance_to(Phase::CollectedAllParts);
        slot.advance_to(Phase::Empty);
        assert_eq!(slot.phase, Phase::CollectedAllParts);
    }

    #[test]
    fn full_pipeline_orders_a_slot() {
        let p = params();
        let mut order = Order::new(ReplicaId::new(1), p, members());
        let matrix = vec![PoAru {
            replica: ReplicaId::new(1),
            cum_aru: vec![
                PoSeq::new(Incarnation::new(1), 1),
                PoSeq::start_of(Incarnation::ZERO),
                PoSeq::start_of(Incarnation::ZERO),
                PoSeq::start_of(Incarnation::ZERO),
            ],
        }];
        let fragments = order
            .leader_build_pre_prepare(View::new(1), &matrix, 0)
            .expect("matrix changed, must produce a pre-prepare");
        assert_eq!(fragments.len(), 1);

        let installed = vec![Incarnation::ZERO; 4];
        let prepare_self = order
            .on_pre_prepare_fragment(fragments[0].clone(), &installed)
            .unwrap()
            .unwrap();

        // 2f+k = 2 matching prepares needed (replica 1's own + one more).
        assert!(order.on_prepare(prepare_self).is_none());
        let commit = order
            .on_prepare(Prepare {
                view: View::new(1),
                seq: 1,
                pp_digest: order.slots[&1].pp_digest.unwrap(),
                preinstalled_vector: installed.clone(),
                replica: ReplicaId::new(2),
            })
            .expect("quorum reached, commit must be emitted");

        assert!(!order.on_commit(commit.clone(), &matrix)); // 1 of 3
        assert!(!order.on_commit(
            Commit {
                replica: ReplicaId::new(2),
                ..commit.clone()
            },
            &matrix
        )); // 2 of 3
        assert!(order.on_commit(
            Commit {
                replica: ReplicaId::new(3),
                ..commit
            },
            &matrix
        )); // 3 of 3: big_quorum reached
        assert_eq!(order.phase(1), Some(Phase::CommittedCert));
        assert!(order.ready_to_execute(1, |_, _| true));
    }
}
