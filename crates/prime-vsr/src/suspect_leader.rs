//! Suspect-Leader (§4.3): judges the current leader's timeliness and drives
//! leader replacement.

use std::collections::BTreeMap;

use prime_types::{ClusterParams, ReplicaId, View};

use crate::marzullo::{smallest_interval, Bound, Tuple};
use crate::message::{NewLeader, NewLeaderProof};

/// Variability factor applied to `tat_acceptable` in the suspicion rule.
pub const K_LAT: f64 = 2.0;

/// Floor under `tat_acceptable`, in nanoseconds, so a fully-synchronized
/// cluster does not suspect a leader over measurement noise alone.
pub const MIN_RTT_NS: u64 = 5_000_000;

pub struct SuspectLeader {
    pub own: ReplicaId,
    pub params: ClusterParams,
    pub member_order: Vec<ReplicaId>,
    /// Reported max turnaround time per replica for the current view.
    turnaround_reports: BTreeMap<ReplicaId, u64>,
    /// Freshest lowest-observed RTT bound per peer, consumed by Marzullo's
    /// algorithm to derive this replica's own `alpha_i` upper bound.
    rtt_bounds: BTreeMap<ReplicaId, (i64, i64)>,
    /// `TAT-UB` broadcast by each peer: their own alpha vector.
    peer_alpha_reports: BTreeMap<ReplicaId, u64>,
    new_leader_votes: BTreeMap<View, Vec<ReplicaId>>,
}

impl SuspectLeader {
    pub fn new(own: ReplicaId, params: ClusterParams, member_order: Vec<ReplicaId>) -> Self {
        Self {
            own,
            params,
            member_order,
            turnaround_reports: BTreeMap::new(),
            rtt_bounds: BTreeMap::new(),
            peer_alpha_reports: BTreeMap::new(),
            new_leader_votes: BTreeMap::new(),
        }
    }

    pub fn report_turnaround(&mut self, replica: ReplicaId, tat_ns: u64) {
        self.turnaround_reports.insert(replica, tat_ns);
    }

    pub fn observe_rtt_sample(&mut self, peer: ReplicaId, rtt_ns: i64, tolerance_ns: i64) {
        let entry = self.rtt_bounds.entry(peer).or_insert((i64::MAX, i64::MIN));
        let lower = rtt_ns - tolerance_ns;
        let upper = rtt_ns + tolerance_ns;
        entry.0 = entry.0.min(lower);
        entry.1 = entry.1.max(upper);
    }

    /// `tat_leader`: the `(f+k+1)`-th largest reported turnaround time.
    pub fn tat_leader(&self) -> u64 {
        nth_largest(self.turnaround_reports.values().copied(), self.params.suspect_quorum())
    }

    /// `alpha_i`: this replica's upper bound on RTT to every peer, reduced
    /// via Marzullo's smallest-consistent-interval over observed samples.
    pub fn alpha_i(&self) -> u64 {
        let mut tuples: Vec<Tuple> = Vec::new();
        for (peer, (lower, upper)) in &self.rtt_bounds {
            tuples.push(Tuple {
                source: *peer,
                offset: *lower,
                bound: Bound::Lower,
            });
            tuples.push(Tuple {
                source: *peer,
                offset: *upper,
                bound: Bound::Upper,
            });
        }
        if tuples.is_empty() {
            return MIN_RTT_NS;
        }
        let interval = smallest_interval(&mut tuples);
        (interval.upper_bound.max(0) as u64).max(MIN_RTT_NS)
    }

    pub fn observe_peer_alpha(&mut self, peer: ReplicaId, alpha: u64) {
        self.peer_alpha_reports.insert(peer, alpha);
    }

    /// `tat_acceptable`: the `(f+k+1)`-th largest of the alpha-vector
    /// broadcast by each replica (`TAT-UB`), floored at `MIN_RTT_NS`.
    pub fn tat_acceptable(&self) -> u64 {
        let mut values: Vec<u64> = self.peer_alpha_reports.values().copied().collect();
        values.push(self.alpha_i());
        nth_largest(values.into_iter(), self.params.suspect_quorum()).max(MIN_RTT_NS)
    }

    /// The suspicion rule: `tat_leader > tat_acceptable * K_LAT + pre_prepare_period`.
    pub fn leader_suspected(&self, pre_prepare_period_ns: u64) -> bool {
        let bound = (self.tat_acceptable() as f64 * K_LAT) as u64 + pre_prepare_period_ns;
        self.tat_leader() > bound
    }

    pub fn broadcast_new_leader(&self, view: View) -> NewLeader {
        NewLeader {
            new_view: view.next(),
            replica: self.own,
        }
    }

    /// Records one `NewLeader` vote; returns a `NewLeaderProof` once
    /// `big_quorum` matching votes for the same `new_view` are collected.
    pub fn on_new_leader(&mut self, msg: NewLeader) -> Option<NewLeaderProof> {
        let voters = self.new_leader_votes.entry(msg.new_view).or_default();
        if !voters.contains(&msg.replica) {
            voters.push(msg.replica);
        }
        if voters.len() as u32 >= self.params.big_quorum() {
            Some(NewLeaderProof {
                new_view: msg.new_view,
                voters: voters.clone(),
            })
        } else {
            None
        }
    }

    /// Clears per-view bookkeeping on successful view installation.
    pub fn reset_for_new_view(&mut self) {
        self.turnaround_reports.clear();
        self.new_leader_votes.clear();
    }
}

fn nth_largest(values: impl Iterator<Item = u64>, rank: u32) -> u64 {
    let mut v: Vec<u64> = values.collect();
    v.sort_unstable_by(|a, b| b.cmp(a));
    v.get(rank as usize - 1).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ClusterParams {
        ClusterParams::new(4, 1, 0).unwrap() // suspect_quorum = f+k+1 = 2
    }

    #[test]
    fn tat_leader_is_nth_largest_report() {
        let mut sl = SuspectLeader::new(ReplicaId::new(1), params(), (1..=4).map(ReplicaId::new).collect());
        sl.report_turnaround(ReplicaId::new(1), 100);
        sl.report_turnaround(ReplicaId::new(2), 300);
        sl.report_turnaround(ReplicaId::new(3), 200);
        assert_eq!(sl.tat_leader(), 200); // 2nd largest of {300,200,100}
    }

    #[test]
    fn suspicion_rule_fires_when_leader_is_slow() {
        let mut sl = SuspectLeader::new(ReplicaId::new(1), params(), (1..=4).map(ReplicaId::new).collect());
        sl.report_turnaround(ReplicaId::new(1), 2_000_000_000);
        sl.report_turnaround(ReplicaId::new(2), 2_000_000_000);
        assert!(sl.leader_suspected(10_000_000));
    }

    #[test]
    fn new_leader_quorum_forms_proof() {
        let mut sl = SuspectLeader::new(ReplicaId::new(1), params(), (1..=4).map(ReplicaId::new).collect());
        for id in [1u32, 2] {
            assert!(sl
                .on_new_leader(NewLeader {
                    new_view: View::new(2),
                    replica: ReplicaId::new(id),
                })
                .is_none());
        }
        let proof = sl
            .on_new_leader(NewLeader {
                new_view: View::new(2),
                replica: ReplicaId::new(3),
            })
            .expect("big_quorum of 3 reached with three distinct voters");
        assert_eq!(proof.voters.len(), 3);
    }
}
