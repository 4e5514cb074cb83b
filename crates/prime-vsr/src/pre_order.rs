//! Pre-Order (§4.1): per-originator FIFO sequencing of client updates and
//! aggregation of cross-replica knowledge into the proof matrix.

use std::collections::BTreeMap;

use prime_crypto::digest;
use prime_types::{ClusterParams, Hash, Incarnation, PoSeq, ReplicaId};

use crate::message::{PoAckPart, PoAru, PoRequest};

/// Outstanding local PO-Requests are capped at this many in flight (unbounded
/// would let a single slow-to-execute replica OOM the cluster).
pub const MAX_PO_IN_FLIGHT: u64 = 256;

/// A PO-Slot: at most one request, up to N acks, and an optional certificate
/// (§3). Once `certificate` is `Some`, `request`'s content is immutable —
/// enforced by never overwriting `request` once set.
#[derive(Debug, Clone, Default)]
pub struct PoSlot {
    pub request: Option<PoRequest>,
    pub acks: BTreeMap<ReplicaId, PoAckPart>,
    pub certified: bool,
}

impl PoSlot {
    /// Counts acks whose `preinstalled_vector` matches `snapshot` exactly —
    /// only matching snapshots may combine into a certificate (§4.1).
    fn matching_ack_count(&self, snapshot: &[Incarnation]) -> u32 {
        self.acks
            .values()
            .filter(|a| a.preinstalled_vector == snapshot)
            .count() as u32
    }
}

pub struct PreOrder {
    pub own: ReplicaId,
    pub params: ClusterParams,
    /// This replica's own last-submitted `PoSeq`, as an originator.
    pub max_sent: PoSeq,
    /// This replica's own executed watermark, for §4.1 flow control.
    pub po_seq_executed: PoSeq,
    /// `cum_aru[origin]`: the highest `PoSeq` this replica has certified for
    /// `origin`. Monotonic per origin.
    pub cum_aru: BTreeMap<ReplicaId, PoSeq>,
    pub slots: BTreeMap<(ReplicaId, PoSeq), PoSlot>,
    /// Latest `PoAru` broadcast observed from every replica, the raw
    /// material for `PeriodicProofMatrix`.
    latest_po_aru: BTreeMap<ReplicaId, PoAru>,
}

impl PreOrder {
    pub fn new(own: ReplicaId, params: ClusterParams, starting_incarnation: Incarnation) -> Self {
        Self {
            own,
            params,
            max_sent: PoSeq::start_of(starting_incarnation),
            po_seq_executed: PoSeq::start_of(starting_incarnation),
            cum_aru: BTreeMap::new(),
            slots: BTreeMap::new(),
            latest_po_aru: BTreeMap::new(),
        }
    }

    /// Resets local sequencing state to a fresh incarnation on recovery
    /// (§3: "resets to `(inc,0)` on recovery").
    pub fn reset_to_incarnation(&mut self, incarnation: Incarnation) {
        self.max_sent = PoSeq::start_of(incarnation);
        self.po_seq_executed = PoSeq::start_of(incarnation);
        self.slots.clear();
    }

    fn admits_new_submission(&self) -> bool {
        self.max_sent.seq_num - self.po_seq_executed.seq_num < MAX_PO_IN_FLIGHT
    }

    /// *Submit(update)* — batches a locally-originated client update into a
    /// `PoRequest`, subject to the in-flight flow-control cap.
    pub fn submit(&mut self, payload: Vec<u8>) -> Option<PoRequest> {
        if !self.admits_new_submission() {
            return None;
        }
        let seq = self.max_sent.next();
        self.max_sent = seq;
        let req = PoRequest {
            server: self.own,
            seq,
            digest: digest::digest(&payload),
            payload,
        };
        self.slots.entry((self.own, seq)).or_default().request = Some(req.clone());
        Some(req)
    }

    /// *ProcessPORequest(m)* — validates origin/monotonicity and stores the
    /// payload, emitting a `PoAckPart` to broadcast.
    pub fn process_po_request(
        &mut self,
        req: PoRequest,
        preinstalled_vector: Vec<Incarnation>,
    ) -> Option<PoAckPart> {
        if !self.params.contains(req.server) {
            return None;
        }
        let known = self.cum_aru.get(&req.server).copied();
        if let Some(known) = known {
            if req.seq <= known {
                return None; // stale or duplicate-of-certified: ignore
            }
        }
        let slot = self.slots.entry((req.server, req.seq)).or_default();
        match &slot.request {
            Some(existing) if existing.digest != req.digest => {
                // Conflicting PoRequest for the same (server, seq): evidence
                // of a faulty origin. Dropped here; escalation to leader
                // suspicion happens at the replica level (§7.2).
                return None;
            }
            Some(_) => {}
            None => slot.request = Some(req.clone()),
        }
        Some(PoAckPart {
            origin: req.server,
            seq: req.seq,
            digest: req.digest,
            acker: self.own,
            preinstalled_vector,
        })
    }

    /// *ProcessPOAckPart* — on `big_quorum` matching acks, forms an implicit
    /// PO-Certificate and advances `cum_aru[origin]` monotonically. Returns
    /// `true` the first time the slot becomes certified.
    pub fn process_po_ack_part(&mut self, ack: PoAckPart) -> bool {
        let snapshot = ack.preinstalled_vector.clone();
        let key = (ack.origin, ack.seq);
        let slot = self.slots.entry(key).or_default();
        slot.acks.insert(ack.acker, ack);
        if slot.certified {
            return false;
        }
        if slot.matching_ack_count(&snapshot) >= self.params.big_quorum() {
            slot.certified = true;
            let entry = self.cum_aru.entry(key.0).or_insert(PoSeq::start_of(key.1.incarnation));
            if key.1 > *entry {
                *entry = key.1;
            }
            true
        } else {
            false
        }
    }

    /// *PeriodicPOARU* — broadcasts `cum_aru[·]` as a signed vector.
    pub fn periodic_po_aru(&self, member_order: &[ReplicaId]) -> PoAru {
        PoAru {
            replica: self.own,
            cum_aru: member_order
                .iter()
                .map(|r| {
                    self.cum_aru
                        .get(r)
                        .copied()
                        .unwrap_or(PoSeq::start_of(Incarnation::ZERO))
                })
                .collect(),
        }
    }

    pub fn observe_po_aru(&mut self, aru: PoAru) {
        self.latest_po_aru.insert(aru.replica, aru);
    }

    /// *PeriodicProofMatrix* — the leader's snapshot of every replica's
    /// latest `PoAru`, the input to `proof_aru`.
    pub fn current_matrix(&self) -> Vec<PoAru> {
        self.latest_po_aru.values().cloned().collect()
    }

    pub fn slot(&self, origin: ReplicaId, seq: PoSeq) -> Option<&PoSlot> {
        self.slots.get(&(origin, seq))
    }

    pub fn has_request(&self, origin: ReplicaId, seq: PoSeq) -> bool {
        self.slots
            .get(&(origin, seq))
            .is_some_and(|s| s.request.is_some())
    }

    pub fn request_digest(&self, origin: ReplicaId, seq: PoSeq) -> Option<Hash> {
        self.slots
            .get(&(origin, seq))
            .and_then(|s| s.request.as_ref())
            .map(|r| r.digest)
    }

    /// Jump-landing cleanup (§4.6): adopts `made_eligible` as a new floor
    /// for `cum_aru[j]` per origin, and drops every PO-Slot the jump
    /// subsumes — `(origin, seq)` pairs at or below the new floor are
    /// already accounted for by the landing ordinal's certificate and will
    /// never be individually requested or acked again.
    pub fn adopt_made_eligible(&mut self, made_eligible: &[PoSeq], member_order: &[ReplicaId]) {
        for (idx, origin) in member_order.iter().enumerate() {
            let Some(floor) = made_eligible.get(idx).copied() else {
                continue;
            };
            let entry = self.cum_aru.entry(*origin).or_insert(floor);
            if floor > *entry {
                *entry = floor;
            }
            let floor = *entry;
            self.slots.retain(|(o, seq), _| *o != *origin || *seq > floor);
        }
    }
}

/// `proof_aru(j, matrix)`: the `(f+1)`-th largest value among `matrix[i][j]`
/// — the largest `PoSeq` that at least `f+1` replicas have ack'd for origin
/// `j` (§4.1). `column_index` is `j`'s 0-based position in the fixed member
/// ordering used to build every `PoAru.cum_aru` vector.
pub fn proof_aru(column_index: usize, matrix: &[PoAru], params: ClusterParams) -> PoSeq {
    let mut values: Vec<PoSeq> = matrix
        .iter()
        .filter_map(|row| row.cum_aru.get(column_index).copied())
        .collect();
    values.sort_unstable_by(|a, b| b.cmp(a)); // descending
    let rank = params.small_quorum() as usize; // f+1
    values
        .get(rank - 1)
        .copied()
        .unwrap_or(PoSeq::start_of(Incarnation::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn po_aru(replica: u32, vals: &[(u64, u64)]) -> PoAru {
        PoAru {
            replica: ReplicaId::new(replica),
            cum_aru: vals
                .iter()
                .map(|(inc, seq)| PoSeq::new(Incarnation::new(*inc), *seq))
                .collect(),
        }
    }

    #[test]
    fn proof_aru_is_f_plus_1th_largest() {
        let params = ClusterParams::new(4, 1, 0).unwrap();
        // column 0 values across 4 reporters: 5,5,3,1 -> f+1=2nd largest = 5
        let matrix = vec![
            po_aru(1, &[(1, 5)]),
            po_aru(2, &[(1, 5)]),
            po_aru(3, &[(1, 3)]),
            po_aru(4, &[(1, 1)]),
        ];
        assert_eq!(proof_aru(0, &matrix, params), PoSeq::new(Incarnation::new(1), 5));
    }

    #[test]
    fn submit_respects_in_flight_cap() {
        let params = ClusterParams::new(4, 1, 0).unwrap();
        let mut po = PreOrder::new(ReplicaId::new(1), params, Incarnation::new(1));
        for _ in 0..MAX_PO_IN_FLIGHT {
            assert!(po.submit(vec![1]).is_some());
        }
        assert!(po.submit(vec![1]).is_none(), "cap must block further submissions");
    }

    #[test]
    fn duplicate_po_request_is_harmless_conflicting_is_dropped() {
        let params = ClusterParams::new(4, 1, 0).unwrap();
        let mut po = PreOrder::new(ReplicaId::new(2), params, Incarnation::new(1));
        let seq = PoSeq::new(Incarnation::new(1), 1);
        let origin = ReplicaId::new(3);
        let req = PoRequest {
            server: origin,
            seq,
            digest: digest::digest(b"a"),
            payload: b"a".to_vec(),
        };
        assert!(po.process_po_request(req.clone(), vec![]).is_some());
        // identical replay: still produces an ack (harmless)
        assert!(po.process_po_request(req.clone(), vec![]).is_some());
        // conflicting digest for same (origin, seq): dropped
        let conflicting = PoRequest {
            digest: digest::digest(b"b"),
            payload: b"b".to_vec(),
            ..req
        };
        assert!(po.process_po_request(conflicting, vec![]).is_none());
    }

    #[test]
    fn quorum_acks_certify_and_advance_cum_aru() {
        let params = ClusterParams::new(4, 1, 0).unwrap();
        let mut po = PreOrder::new(ReplicaId::new(1), params, Incarnation::new(1));
        let origin = ReplicaId::new(2);
        let seq = PoSeq::new(Incarnation::new(1), 1);
        let snapshot = vec![Incarnation::ZERO; 4];
        for acker in [1u32, 2, 3] {
            let became_certified = po.process_po_ack_part(PoAckPart {
                origin,
                seq,
                digest: Hash::ZERO,
                acker: ReplicaId::new(acker),
                preinstalled_vector: snapshot.clone(),
            });
            if acker == 3 {
                // big_quorum for (f=1,k=0) is 3
                assert!(became_certified);
            }
        }
        assert_eq!(po.cum_aru.get(&origin), Some(&seq));
    }
}
