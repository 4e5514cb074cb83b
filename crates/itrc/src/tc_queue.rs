//! Generic threshold-signature aggregation queue (§9 re-architecture
//! guidance: "Encapsulate a `TcQueue<K>` generic over the key type"). Both
//! the pre-Prime (keyed by `(ClientId, PoSeq)`) and post-Prime (keyed by
//! `Ordinal`/`u64`) aggregators are instances of the same contract.

use std::collections::BTreeMap;

use prime_crypto::threshold::{TcFinal, TcPublicKeySet, TcShare};
use prime_types::Hash;

#[derive(Default)]
struct Entry {
    shares: BTreeMap<usize, TcShare>,
    payload_digest: Option<Hash>,
    skipped: bool,
    finalized: bool,
}

/// Bounds how many keys are retained; older entries are evicted once the
/// queue exceeds this many distinct keys (`TC_HISTORY`, §4.7).
pub struct TcQueue<K: Ord + Copy> {
    entries: BTreeMap<K, Entry>,
    history: usize,
}

impl<K: Ord + Copy> TcQueue<K> {
    pub fn new(history: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            history,
        }
    }

    fn evict_if_over_budget(&mut self) {
        while self.entries.len() > self.history {
            let Some(oldest) = self.entries.keys().next().copied() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    /// Records a share for `k`; once `public_key_set.threshold_count()`
    /// matching shares (same `payload_digest`) have arrived, combines them
    /// into a `TcFinal` and marks the entry finalized. Returns `None` if the
    /// entry is already finalized or marked SKIP.
    pub fn insert_share(
        &mut self,
        k: K,
        index: usize,
        share: TcShare,
        payload_digest: Hash,
        public_key_set: &TcPublicKeySet,
    ) -> Option<TcFinal> {
        let entry = self.entries.entry(k).or_default();
        if entry.finalized || entry.skipped {
            return None;
        }
        if let Some(existing) = entry.payload_digest {
            if existing != payload_digest {
                return None; // conflicting payload for this key: drop
            }
        } else {
            entry.payload_digest = Some(payload_digest);
        }
        entry.shares.insert(index, share);
        self.evict_if_over_budget();

        let entry = self.entries.get_mut(&k)?;
        if entry.shares.len() < public_key_set.threshold_count() {
            return None;
        }
        let shares: Vec<(usize, TcShare)> = entry.shares.iter().map(|(i, s)| (*i, s.clone())).collect();
        match public_key_set.combine(&shares) {
            Ok(final_sig) => {
                entry.finalized = true;
                Some(final_sig)
            }
            Err(_) => None,
        }
    }

    /// Marks `k` as a no-op/duplicate/state-transfer result: it consumes a
    /// queue slot without ever producing a `TcFinal` (§4.7 step 4).
    pub fn mark_skip(&mut self, k: K) {
        let entry = self.entries.entry(k).or_default();
        entry.skipped = true;
        self.evict_if_over_budget();
    }

    pub fn is_finalized(&self, k: K) -> bool {
        self.entries.get(&k).is_some_and(|e| e.finalized)
    }

    pub fn is_skipped(&self, k: K) -> bool {
        self.entries.get(&k).is_some_and(|e| e.skipped)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_crypto::threshold::TcDealer;

    #[test]
    fn f_plus_one_shares_finalize_a_key() {
        let dealer = TcDealer::generate(1); // threshold=1 -> need 2 shares
        let pks = TcPublicKeySet::new(dealer.public_key_set());
        let mut queue: TcQueue<u64> = TcQueue::new(10);
        let digest = Hash::from_bytes([7u8; 32]);

        let s0 = dealer.share_for(0).sign_share(b"payload");
        let s1 = dealer.share_for(1).sign_share(b"payload");

        assert!(queue.insert_share(1, 0, s0, digest, &pks).is_none());
        assert!(queue.insert_share(1, 1, s1, digest, &pks).is_some());
        assert!(queue.is_finalized(1));
    }

    #[test]
    fn conflicting_payload_digest_is_dropped() {
        let dealer = TcDealer::generate(1);
        let pks = TcPublicKeySet::new(dealer.public_key_set());
        let mut queue: TcQueue<u64> = TcQueue::new(10);
        let d1 = Hash::from_bytes([1u8; 32]);
        let d2 = Hash::from_bytes([2u8; 32]);

        let s0 = dealer.share_for(0).sign_share(b"payload");
        assert!(queue.insert_share(5, 0, s0, d1, &pks).is_none());
        let s1 = dealer.share_for(1).sign_share(b"payload");
        assert!(queue.insert_share(5, 1, s1, d2, &pks).is_none());
    }

    #[test]
    fn skip_consumes_slot_without_finalizing() {
        let dealer = TcDealer::generate(1);
        let pks = TcPublicKeySet::new(dealer.public_key_set());
        let mut queue: TcQueue<u64> = TcQueue::new(10);
        queue.mark_skip(3);
        assert!(queue.is_skipped(3));
        let s0 = dealer.share_for(0).sign_share(b"payload");
        assert!(queue
            .insert_share(3, 0, s0, Hash::ZERO, &pks)
            .is_none());
        assert!(!queue.is_finalized(3));
    }

    #[test]
    fn history_bound_evicts_oldest_key() {
        let dealer = TcDealer::generate(1);
        let pks = TcPublicKeySet::new(dealer.public_key_set());
        let mut queue: TcQueue<u64> = TcQueue::new(2);
        queue.mark_skip(1);
        queue.mark_skip(2);
        queue.mark_skip(3);
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_skipped(1), "oldest key must be evicted");
        let _ = pks;
    }
}
