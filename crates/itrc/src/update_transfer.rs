//! Recovery via update transfer (§4.8 tail): a replica that falls behind
//! its stable checkpoint is handed the checkpoint plus every update since,
//! rather than replaying the whole ordinal history from genesis.

use std::collections::BTreeMap;

use prime_crypto::digest;
use prime_types::{ClusterParams, Hash, Ordinal, ReplicaId};

use crate::message::UpdateTransfer;

/// One ordinal's worth of buffered transfer entries, collected until `f+1`
/// byte-identical (digest-matched) copies arrive.
#[derive(Default)]
struct PendingOrdinal {
    by_digest: BTreeMap<Hash, (Vec<u8>, std::collections::BTreeSet<ReplicaId>)>,
}

impl PendingOrdinal {
    fn record(&mut self, entry: &UpdateTransfer) -> usize {
        let slot = self
            .by_digest
            .entry(entry.digest)
            .or_insert_with(|| (entry.payload.clone(), Default::default()));
        slot.1.insert(entry.from);
        slot.1.len()
    }
}

/// Tracks a single in-progress recovery: replaying from the last stable
/// checkpoint up to `recovery_ord`.
pub struct UpdateTransferState {
    params: ClusterParams,
    recovery_ord: Ordinal,
    /// True while this replica is actively collecting transfer entries and
    /// must not emit any outgoing TC replies (§4.8: "refuses to emit while
    /// collecting").
    collecting_signal: bool,
    pending: BTreeMap<u64, PendingOrdinal>,
    accepted: BTreeMap<u64, Vec<u8>>,
}

impl UpdateTransferState {
    pub fn begin(params: ClusterParams, recovery_ord: Ordinal) -> Self {
        Self {
            params,
            recovery_ord,
            collecting_signal: true,
            pending: BTreeMap::new(),
            accepted: BTreeMap::new(),
        }
    }

    pub fn recovery_ord(&self) -> Ordinal {
        self.recovery_ord
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting_signal
    }

    /// Records one replica's copy of ordinal `entry.ord`'s update. Returns
    /// `true` once this ordinal has reached `f+1` matching copies and is
    /// now part of the accepted replay set.
    pub fn observe(&mut self, entry: &UpdateTransfer) -> bool {
        if entry.ord.ord_num > self.recovery_ord.ord_num {
            return false; // beyond what this recovery needs
        }
        if self.accepted.contains_key(&entry.ord.ord_num) {
            return true;
        }
        debug_assert_eq!(entry.digest, digest::digest(&entry.payload));

        let slot = self.pending.entry(entry.ord.ord_num).or_default();
        let tally = slot.record(entry);
        if tally >= self.params.small_quorum() as usize {
            let (payload, _) = slot.by_digest[&entry.digest].clone();
            self.accepted.insert(entry.ord.ord_num, payload);
            self.pending.remove(&entry.ord.ord_num);
            true
        } else {
            false
        }
    }

    /// True once every ordinal from `from_exclusive+1` to `recovery_ord`
    /// has been accepted: the replica can now apply the checkpoint and
    /// replay the accumulated updates in order.
    pub fn is_contiguous_from(&self, from_exclusive: u64) -> bool {
        ((from_exclusive + 1)..=self.recovery_ord.ord_num).all(|n| self.accepted.contains_key(&n))
    }

    /// Returns the accepted updates in ordinal order once contiguous,
    /// consuming this tracker — the caller applies the checkpoint first and
    /// then replays these in order.
    pub fn into_ordered_replay(self, from_exclusive: u64) -> Vec<Vec<u8>> {
        ((from_exclusive + 1)..=self.recovery_ord.ord_num)
            .filter_map(|n| self.accepted.get(&n).cloned())
            .collect()
    }

    /// Clears the collecting flag once recovery has completed: outgoing TC
    /// replies may resume.
    pub fn finish(&mut self) {
        self.collecting_signal = false;
    }
}

/// Drops a buffered IPC response whose ordinal is at or before the recovery
/// boundary: it was already folded into the transferred checkpoint/replay.
pub fn should_drop_buffered_response(recovery_ord: Ordinal, ord: Ordinal) -> bool {
    ord.ord_num <= recovery_ord.ord_num
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ClusterParams {
        ClusterParams::new(4, 1, 0).unwrap()
    }

    fn entry(ord_num: u64, from: u32, payload: &[u8]) -> UpdateTransfer {
        UpdateTransfer {
            ord: Ordinal::no_op(ord_num),
            payload: payload.to_vec(),
            digest: digest::digest(payload),
            from: ReplicaId::new(from),
        }
    }

    #[test]
    fn f_plus_one_matching_copies_accept_an_ordinal() {
        let mut state = UpdateTransferState::begin(params(), Ordinal::no_op(5));
        assert!(!state.observe(&entry(3, 1, b"x")));
        assert!(state.observe(&entry(3, 2, b"x")));
    }

    #[test]
    fn mismatched_copies_do_not_combine() {
        let mut state = UpdateTransferState::begin(params(), Ordinal::no_op(5));
        assert!(!state.observe(&entry(3, 1, b"x")));
        assert!(!state.observe(&entry(3, 2, b"y")));
    }

    #[test]
    fn completion_requires_every_ordinal_contiguous() {
        let mut state = UpdateTransferState::begin(params(), Ordinal::no_op(3));
        state.observe(&entry(2, 1, b"a"));
        state.observe(&entry(2, 2, b"a"));
        assert!(!state.is_contiguous_from(0));
        state.observe(&entry(3, 1, b"b"));
        state.observe(&entry(3, 2, b"b"));
        state.observe(&entry(1, 1, b"c"));
        state.observe(&entry(1, 2, b"c"));
        assert!(state.is_contiguous_from(0));
        let replay = state.into_ordered_replay(0);
        assert_eq!(replay, vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn buffered_responses_at_or_before_recovery_ord_are_dropped() {
        let recovery_ord = Ordinal::no_op(10);
        assert!(should_drop_buffered_response(recovery_ord, Ordinal::no_op(10)));
        assert!(should_drop_buffered_response(recovery_ord, Ordinal::no_op(5)));
        assert!(!should_drop_buffered_response(recovery_ord, Ordinal::no_op(11)));
    }
}
