//! Checkpoint creation and stabilization (§4.8).
//!
//! A checkpoint is created locally every `CHECKPOINT_PERIOD` ordinals,
//! encrypted, and broadcast as a ciphertext digest. Once `f+1` replicas
//! report the same digest for an ordinal it is `correct`; once `2f+k+1`
//! agree it is `stable` and the update log behind it may be purged.

use std::collections::BTreeMap;

use prime_crypto::checkpoint::{self, CheckpointIv, CheckpointKey};
use prime_crypto::digest;
use prime_types::{ClusterParams, Hash, Ordinal, PoSeq, ReplicaId};

use crate::error::{Error, Result};
use crate::message::Checkpoint;

/// Number of ordinals between checkpoint boundaries (§4.8). Chosen to match
/// the spec's illustrative default; a deployment may override via config.
pub const CHECKPOINT_PERIOD: u64 = 100;

/// True at exactly the slot boundary where a checkpoint should be taken:
/// the ordinal's event index is the last event in its batch, and its
/// `ord_num` lands on the period.
pub fn is_checkpoint_boundary(ord: Ordinal) -> bool {
    ord.is_last_event() && ord.ord_num > 0 && ord.ord_num % CHECKPOINT_PERIOD == 0
}

struct Votes {
    by_digest: BTreeMap<Hash, std::collections::BTreeSet<ReplicaId>>,
}

impl Votes {
    fn new() -> Self {
        Self {
            by_digest: BTreeMap::new(),
        }
    }

    fn record(&mut self, digest: Hash, from: ReplicaId) -> usize {
        self.by_digest.entry(digest).or_default().insert(from);
        self.by_digest[&digest].len()
    }
}

/// One replica's local checkpoint/stabilization tracking.
pub struct CheckpointTracker {
    params: ClusterParams,
    votes: BTreeMap<Ordinal, Votes>,
    correct: BTreeMap<Ordinal, Hash>,
    stable: Option<(Ordinal, Hash)>,
}

impl CheckpointTracker {
    pub fn new(params: ClusterParams) -> Self {
        Self {
            params,
            votes: BTreeMap::new(),
            correct: BTreeMap::new(),
            stable: None,
        }
    }

    /// Encrypts `snapshot` under a fresh key/IV and produces the outgoing
    /// [`Checkpoint`] broadcast. The key is returned separately: it is never
    /// put on the wire, only shared out-of-band (or retained locally) so a
    /// replica can later decrypt its own ciphertext during update transfer.
    pub fn create(
        &self,
        own: ReplicaId,
        ord: Ordinal,
        latest_update_vector: Vec<PoSeq>,
        snapshot: &[u8],
    ) -> Result<(Checkpoint, CheckpointKey)> {
        let key = CheckpointKey::generate();
        let iv = CheckpointIv::generate();
        let ciphertext = checkpoint::encrypt(key, iv, snapshot).map_err(Error::Crypto)?;
        let msg = Checkpoint {
            ord,
            latest_update_vector,
            iv: iv.as_bytes(),
            ciphertext,
            from: own,
        };
        Ok((msg, key))
    }

    /// Records an observed checkpoint broadcast (from self or a peer) and
    /// returns the vote tally so far for its ordinal/digest pair.
    pub fn observe(&mut self, msg: &Checkpoint) -> usize {
        let d = digest::digest(&msg.ciphertext);
        let votes = self.votes.entry(msg.ord).or_insert_with(Votes::new);
        let tally = votes.record(d, msg.from);

        if tally >= self.params.small_quorum() as usize {
            self.correct.insert(msg.ord, d);
        }
        if tally >= self.params.big_quorum() as usize {
            self.promote_to_stable(msg.ord, d);
        }
        tally
    }

    /// Monotonic stabilization (I5): never replace a stable checkpoint at a
    /// later ordinal with one from an earlier one.
    fn promote_to_stable(&mut self, ord: Ordinal, d: Hash) {
        let should_replace = match self.stable {
            Some((stable_ord, _)) => ord.ord_num > stable_ord.ord_num,
            None => true,
        };
        if should_replace {
            self.stable = Some((ord, d));
        }
    }

    pub fn is_correct(&self, ord: Ordinal) -> bool {
        self.correct.contains_key(&ord)
    }

    pub fn stable_checkpoint(&self) -> Option<(Ordinal, Hash)> {
        self.stable
    }

    /// Ordinals whose update-log entries may now be purged: everything at or
    /// before the stable checkpoint.
    pub fn purge_horizon(&self) -> Option<u64> {
        self.stable.map(|(ord, _)| ord.ord_num)
    }
}

/// Decrypts an applied checkpoint's snapshot during update transfer, given
/// the key the local replica encrypted it under (or received out-of-band
/// alongside the cluster's keys directory).
pub fn decrypt(msg: &Checkpoint, key: CheckpointKey) -> Result<Vec<u8>> {
    let iv = CheckpointIv::from_bytes(msg.iv);
    checkpoint::decrypt(key, iv, &msg.ciphertext).map_err(Error::Crypto)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ClusterParams {
        ClusterParams::new(4, 1, 0).unwrap()
    }

    #[test]
    fn boundary_detection_matches_period() {
        assert!(is_checkpoint_boundary(Ordinal::no_op(CHECKPOINT_PERIOD)));
        assert!(!is_checkpoint_boundary(Ordinal::no_op(CHECKPOINT_PERIOD + 1)));
        assert!(!is_checkpoint_boundary(Ordinal::no_op(0)));
    }

    #[test]
    fn quorum_of_matching_digests_becomes_correct_then_stable() {
        let mut tracker = CheckpointTracker::new(params());
        let ord = Ordinal::no_op(CHECKPOINT_PERIOD);
        let ciphertext = vec![1, 2, 3];

        for i in 1..=2u32 {
            let msg = Checkpoint {
                ord,
                latest_update_vector: vec![],
                iv: [0u8; 12],
                ciphertext: ciphertext.clone(),
                from: ReplicaId::new(i),
            };
            tracker.observe(&msg);
        }
        assert!(tracker.is_correct(ord), "f+1=2 matching reports must be correct");
        assert!(tracker.stable_checkpoint().is_none());

        for i in 3..=4u32 {
            let msg = Checkpoint {
                ord,
                latest_update_vector: vec![],
                iv: [0u8; 12],
                ciphertext: ciphertext.clone(),
                from: ReplicaId::new(i),
            };
            tracker.observe(&msg);
        }
        assert_eq!(tracker.stable_checkpoint().map(|(o, _)| o), Some(ord));
    }

    #[test]
    fn stable_checkpoint_never_regresses() {
        let mut tracker = CheckpointTracker::new(params());
        let later = Ordinal::no_op(2 * CHECKPOINT_PERIOD);
        let earlier = Ordinal::no_op(CHECKPOINT_PERIOD);

        for ord in [later, earlier] {
            for i in 1..=4u32 {
                let msg = Checkpoint {
                    ord,
                    latest_update_vector: vec![],
                    iv: [0u8; 12],
                    ciphertext: vec![9],
                    from: ReplicaId::new(i),
                };
                tracker.observe(&msg);
            }
        }
        assert_eq!(tracker.stable_checkpoint().map(|(o, _)| o), Some(later));
    }
}
