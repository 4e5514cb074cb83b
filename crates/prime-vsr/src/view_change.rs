//! View Change / Replay (§4.4): once a new view is preinstalled, every
//! replica exchanges `Report`/`PcSet` via reliable broadcast, assembles a
//! `VC_List`, threshold-signs a start sequence, and the new leader installs
//! the view with a `Replay`.

use std::collections::{BTreeMap, BTreeSet};

use prime_types::{ReplicaId, View};

use crate::message::{PcSet, Replay, ReplayCommit, ReplayPrepare, Report, VcList, VcPartialSig, VcProof};
use prime_types::ClusterParams;

/// Canonical bytes the view-change threshold key signs over: the pair that
/// uniquely identifies a Replay attempt within a view.
pub fn vc_partial_sig_message(view: View, start_seq: u64) -> Vec<u8> {
    postcard::to_allocvec(&(view, start_seq)).expect("(View, u64) always encodes")
}

#[derive(Default)]
struct ReplicaReportState {
    report: Option<Report>,
    pc_sets: Vec<PcSet>,
}

pub struct ViewChange {
    pub own: ReplicaId,
    pub params: ClusterParams,
    pub view: View,
    reports: BTreeMap<ReplicaId, ReplicaReportState>,
    vc_list_sent: bool,
    vc_lists_seen: BTreeMap<ReplicaId, VcList>,
    partial_sigs: BTreeMap<u64, BTreeMap<ReplicaId, VcPartialSig>>,
    /// The `list` that produced a given `start_seq`, remembered so the new
    /// leader can rebuild a `Replay` once the matching `VcProof` combines
    /// (`VcProof` itself carries no `list`, §4.4 step 6).
    lists_by_start_seq: BTreeMap<u64, Vec<ReplicaId>>,
    /// `start_seq`s this replica has already emitted a `VcPartialSig` for,
    /// so a repeated/duplicate `VcList` doesn't re-sign.
    partial_sig_sent: BTreeSet<u64>,
    replay_prepares: BTreeMap<View, BTreeSet<ReplicaId>>,
    replay_commits: BTreeMap<View, BTreeSet<ReplicaId>>,
}

impl ViewChange {
    pub fn new(own: ReplicaId, params: ClusterParams, view: View) -> Self {
        Self {
            own,
            params,
            view,
            reports: BTreeMap::new(),
            vc_list_sent: false,
            vc_lists_seen: BTreeMap::new(),
            partial_sigs: BTreeMap::new(),
            lists_by_start_seq: BTreeMap::new(),
            partial_sig_sent: BTreeSet::new(),
            replay_prepares: BTreeMap::new(),
            replay_commits: BTreeMap::new(),
        }
    }

    pub fn own_report(&self, exec_aru: u64, pc_set_size: u32) -> Report {
        Report {
            view: self.view,
            replica: self.own,
            exec_aru,
            pc_set_size,
        }
    }

    pub fn on_report(&mut self, report: Report) {
        if report.view != self.view {
            return;
        }
        self.reports.entry(report.replica).or_default().report = Some(report);
    }

    pub fn on_pc_set(&mut self, pc_set: PcSet) {
        if pc_set.view != self.view {
            return;
        }
        self.reports
            .entry(pc_set.replica)
            .or_default()
            .pc_sets
            .push(pc_set);
    }

    /// Whether `replica`'s state is complete: its `Report` arrived, all
    /// `pc_set_size` `PcSet`s arrived, and (via `caught_up`) this replica has
    /// locally executed up to that report's `exec_aru`.
    fn is_complete(&self, replica: ReplicaId, caught_up: impl Fn(u64) -> bool) -> bool {
        let Some(state) = self.reports.get(&replica) else {
            return false;
        };
        let Some(report) = &state.report else {
            return false;
        };
        state.pc_sets.len() as u32 >= report.pc_set_size && caught_up(report.exec_aru)
    }

    /// On collecting complete state from `big_quorum` replicas, broadcasts a
    /// `VcList`. Only emitted once per view.
    pub fn maybe_build_vc_list(&mut self, caught_up: impl Fn(u64) -> bool) -> Option<VcList> {
        if self.vc_list_sent {
            return None;
        }
        let complete: Vec<ReplicaId> = self
            .reports
            .keys()
            .copied()
            .filter(|r| self.is_complete(*r, &caught_up))
            .collect();
        if complete.len() as u32 >= self.params.big_quorum() {
            self.vc_list_sent = true;
            Some(VcList {
                view: self.view,
                replica: self.own,
                list: complete,
            })
        } else {
            None
        }
    }

    pub fn on_vc_list(&mut self, list: VcList) {
        if list.view == self.view {
            self.vc_lists_seen.insert(list.replica, list);
        }
    }

    /// `startSeq = max(execARU across list) + 1`, once this replica also has
    /// complete state for every member of the observed list.
    pub fn start_seq_for(&self, list: &VcList, caught_up: impl Fn(u64) -> bool) -> Option<u64> {
        let mut max_aru = 0u64;
        for replica in &list.list {
            let state = self.reports.get(replica)?;
            let report = state.report.as_ref()?;
            if state.pc_sets.len() as u32 != report.pc_set_size {
                return None;
            }
            if !caught_up(report.exec_aru) {
                return None;
            }
            max_aru = max_aru.max(report.exec_aru);
        }
        Some(max_aru + 1)
    }

    /// Remembers which `list` produced `start_seq`, for `list_for` once a
    /// `VcProof` over that `start_seq` eventually combines.
    pub fn remember_list(&mut self, start_seq: u64, list: Vec<ReplicaId>) {
        self.lists_by_start_seq.entry(start_seq).or_insert(list);
    }

    pub fn list_for(&self, start_seq: u64) -> Option<Vec<ReplicaId>> {
        self.lists_by_start_seq.get(&start_seq).cloned()
    }

    /// Whether this replica has already broadcast a `VcPartialSig` for
    /// `start_seq` (only ever signs once per `start_seq`).
    pub fn has_sent_partial_sig(&self, start_seq: u64) -> bool {
        self.partial_sig_sent.contains(&start_seq)
    }

    pub fn mark_partial_sig_sent(&mut self, start_seq: u64) {
        self.partial_sig_sent.insert(start_seq);
    }

    pub fn make_partial_sig(&self, start_seq: u64, share_bytes: Vec<u8>) -> VcPartialSig {
        VcPartialSig {
            view: self.view,
            replica: self.own,
            start_seq,
            share: share_bytes,
        }
    }

    /// Collects partial signatures keyed by `start_seq`; returns the set
    /// once `big_quorum` matching shares have arrived (caller combines them
    /// via `prime_crypto::threshold`).
    pub fn on_partial_sig(&mut self, sig: VcPartialSig) -> Option<Vec<VcPartialSig>> {
        if sig.view != self.view {
            return None;
        }
        let bucket = self.partial_sigs.entry(sig.start_seq).or_default();
        bucket.insert(sig.replica, sig);
        if bucket.len() as u32 >= self.params.big_quorum() {
            Some(bucket.values().cloned().collect())
        } else {
            None
        }
    }

    pub fn build_vc_proof(&self, start_seq: u64, threshold_sig: Vec<u8>) -> VcProof {
        VcProof {
            view: self.view,
            start_seq,
            threshold_sig,
        }
    }

    /// The new leader, on a valid `VcProof`, broadcasts `Replay`.
    pub fn build_replay(&self, list: Vec<ReplicaId>, proof: VcProof) -> Replay {
        Replay {
            view: self.view,
            list,
            start_seq: proof.start_seq,
            threshold_sig: proof.threshold_sig,
        }
    }

    pub fn on_replay_prepare(&mut self, prepare: ReplayPrepare) -> Option<ReplayCommit> {
        let set = self.replay_prepares.entry(prepare.view).or_default();
        set.insert(prepare.replica);
        if set.len() as u32 >= self.params.prepare_quorum() {
            Some(ReplayCommit {
                view: prepare.view,
                replica: self.own,
                digest: prepare.digest,
            })
        } else {
            None
        }
    }

    /// On `big_quorum` matching `ReplayCommit`s, the view is installed.
    pub fn on_replay_commit(&mut self, commit: ReplayCommit) -> bool {
        let set = self.replay_commits.entry(commit.view).or_default();
        set.insert(commit.replica);
        set.len() as u32 >= self.params.big_quorum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_types::Hash;

    fn params() -> ClusterParams {
        ClusterParams::new(4, 1, 0).unwrap()
    }

    #[test]
    fn vc_list_forms_once_quorum_complete() {
        let view = View::new(2);
        let mut vc = ViewChange::new(ReplicaId::new(1), params(), view);
        for id in [1u32, 2, 3] {
            vc.on_report(Report {
                view,
                replica: ReplicaId::new(id),
                exec_aru: 10,
                pc_set_size: 0,
            });
        }
        let list = vc
            .maybe_build_vc_list(|aru| aru <= 10)
            .expect("3 complete reports reach big_quorum");
        assert_eq!(list.list.len(), 3);
        // Second call is a no-op (only emitted once per view).
        assert!(vc.maybe_build_vc_list(|aru| aru <= 10).is_none());
    }

    #[test]
    fn replay_prepare_then_commit_installs_view() {
        let view = View::new(2);
        let mut vc = ViewChange::new(ReplicaId::new(1), params(), view);
        let digest = Hash::ZERO;
        assert!(vc
            .on_replay_prepare(ReplayPrepare {
                view,
                replica: ReplicaId::new(1),
                digest
            })
            .is_none());
        let commit = vc
            .on_replay_prepare(ReplayPrepare {
                view,
                replica: ReplicaId::new(2),
                digest,
            })
            .expect("prepare_quorum of 2 reached");
        assert!(!vc.on_replay_commit(commit.clone()));
        assert!(!vc.on_replay_commit(ReplayCommit {
            replica: ReplicaId::new(2),
            ..commit.clone()
        }));
        assert!(vc.on_replay_commit(ReplayCommit {
            replica: ReplicaId::new(3),
            ..commit
        }));
    }
}
