//! Threshold-signature contract used by both ITRC keys (§4.7, §6).
//!
//! The original system signs with threshold-RSA; no maintained Rust crate
//! implements that scheme (see `DESIGN.md`). `TcKeySet`/`TcShare`/`TcFinal`
//! expose exactly the contract spec.md names — `sign_share` / `combine` /
//! `verify`, threshold `f+1` of `N` — backed by pairing-based BLS threshold
//! signatures (`blsttc`). Callers never see a curve point or field element;
//! they see shares and a final signature as opaque, serializable bytes.

use blsttc::{PublicKeySet, PublicKeyShare, SecretKeySet, SecretKeyShare, Signature, SignatureShare};
use rand::rngs::OsRng;

use crate::error::{Error, Result};

/// The full key-generation authority's view: used only by the offline
/// dealer/config tool that provisions a cluster's keys directory, never by a
/// running replica.
pub struct TcDealer {
    secret_set: SecretKeySet,
}

impl TcDealer {
    /// `threshold` is `f` (so that `f+1` shares are required to reconstruct),
    /// matching spec.md's "threshold = f+1, total = N".
    pub fn generate(threshold: usize) -> Self {
        Self {
            secret_set: SecretKeySet::random(threshold, &mut OsRng),
        }
    }

    pub fn public_key_set(&self) -> PublicKeySet {
        self.secret_set.public_keys()
    }

    /// Derives shareholder `id`'s secret share (1-based `ReplicaId` cast to
    /// `usize - 1` by the caller, since `blsttc` indexes shares from 0).
    pub fn share_for(&self, index: usize) -> TcSecretShare {
        TcSecretShare(self.secret_set.secret_key_share(index))
    }
}

/// One replica's persistent secret share of a threshold key.
#[derive(Clone)]
pub struct TcSecretShare(SecretKeyShare);

impl TcSecretShare {
    pub fn sign_share(&self, message: &[u8]) -> TcShare {
        TcShare(self.0.sign(message))
    }

    /// Serializes for storage in a replica's keys directory. Secret share
    /// material, never distributed to peers.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::MalformedKey("threshold secret share must be 32 bytes"))?;
        SecretKeyShare::from_bytes(arr)
            .map(TcSecretShare)
            .map_err(|_| Error::MalformedKey("threshold secret share is not a valid scalar"))
    }
}

/// A single replica's partial signature over a message (an ordinal+payload
/// for the post-Prime key, a PoSeq+payload for the pre-Prime key).
#[derive(Debug, Clone)]
pub struct TcShare(SignatureShare);

impl TcShare {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    /// Parses a share received over the wire. Fails with
    /// [`Error::MalformedKey`] if `bytes` is not a valid compressed G2 point
    /// of the expected length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 96] = bytes
            .try_into()
            .map_err(|_| Error::MalformedKey("threshold share must be 96 bytes"))?;
        SignatureShare::from_bytes(arr)
            .map(TcShare)
            .map_err(|_| Error::MalformedKey("threshold share is not a valid curve point"))
    }
}

/// The combined threshold signature, ready for delivery to a client or for
/// inclusion in a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcFinal(Signature);

impl TcFinal {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    /// Parses a combined signature received over the wire (e.g. a
    /// `TC_Final` forwarded by another replica rather than combined
    /// locally).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 96] = bytes
            .try_into()
            .map_err(|_| Error::MalformedKey("threshold signature must be 96 bytes"))?;
        Signature::from_bytes(arr)
            .map(TcFinal)
            .map_err(|_| Error::MalformedKey("threshold signature is not a valid curve point"))
    }
}

/// The public side of a threshold key: verifies individual shares and
/// combines `f+1` of them into a [`TcFinal`]. Shared by every replica and the
/// client; distributed out-of-band with the keys directory.
#[derive(Clone)]
pub struct TcPublicKeySet {
    inner: PublicKeySet,
    threshold: usize,
}

impl TcPublicKeySet {
    pub fn new(inner: PublicKeySet) -> Self {
        let threshold = inner.threshold();
        Self { inner, threshold }
    }

    /// Serializes for distribution alongside a replica's keys directory
    /// (§6: the public key set is shared by every replica and client, never
    /// the secret key shares).
    pub fn to_bytes(&self) -> Vec<u8> {
        postcard::to_allocvec(&self.inner).expect("threshold public key set always serializes")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner: PublicKeySet = postcard::from_bytes(bytes)
            .map_err(|_| Error::MalformedKey("threshold public key set is malformed"))?;
        Ok(Self::new(inner))
    }

    /// Minimum number of shares required to combine (`f+1`).
    pub fn threshold_count(&self) -> usize {
        self.threshold + 1
    }

    pub fn share_verifier(&self, index: usize) -> TcPublicKeyShare {
        TcPublicKeyShare(self.inner.public_key_share(index))
    }

    pub fn verify_final(&self, message: &[u8], sig: &TcFinal) -> bool {
        self.inner.public_key().verify(&sig.0, message)
    }

    /// Combines shares keyed by shareholder index. Returns
    /// [`Error::InsufficientShares`] if fewer than `f+1` were supplied;
    /// `blsttc` itself returns a malformed result rather than erroring on
    /// too few shares, so the count is checked here first (the spec's
    /// "exactly f+1 matching shares must suffice; f must not" boundary).
    pub fn combine(&self, shares: &[(usize, TcShare)]) -> Result<TcFinal> {
        if shares.len() < self.threshold_count() {
            return Err(Error::InsufficientShares {
                have: shares.len(),
                need: self.threshold_count(),
            });
        }
        let refs: Vec<(usize, &SignatureShare)> =
            shares.iter().map(|(i, s)| (*i, &s.0)).collect();
        self.inner
            .combine_signatures(refs)
            .map(TcFinal)
            .map_err(|_| Error::BadShare(u32::MAX))
    }
}

/// Verifies one shareholder's partial signature before admitting it into a
/// TC-Queue entry (rejects a forged/corrupt share early, per §4.7/§4.8).
pub struct TcPublicKeyShare(PublicKeyShare);

impl TcPublicKeyShare {
    pub fn verify(&self, message: &[u8], share: &TcShare) -> bool {
        self.0.verify(&share.0, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f_plus_one_shares_combine_but_f_does_not() {
        // N=4, f=1: threshold=1 means 2 shares (f+1) needed.
        let dealer = TcDealer::generate(1);
        let pks = TcPublicKeySet::new(dealer.public_key_set());
        let msg = b"ordinal=1|payload";

        let s0 = dealer.share_for(0).sign_share(msg);
        let s1 = dealer.share_for(1).sign_share(msg);

        assert!(pks.combine(&[(0, s0.clone())]).is_err(), "f shares must not suffice");
        let finalsig = pks
            .combine(&[(0, s0), (1, s1)])
            .expect("f+1 shares must combine");
        assert!(pks.verify_final(msg, &finalsig));
    }

    #[test]
    fn share_verification_rejects_wrong_message() {
        let dealer = TcDealer::generate(1);
        let pks = TcPublicKeySet::new(dealer.public_key_set());
        let share = dealer.share_for(0).sign_share(b"correct");
        assert!(pks.share_verifier(0).verify(b"correct", &share));
        assert!(!pks.share_verifier(0).verify(b"wrong", &share));
    }

    #[test]
    fn secret_share_round_trips_through_bytes() {
        let dealer = TcDealer::generate(1);
        let share = dealer.share_for(0);
        let bytes = share.to_bytes();
        let parsed = TcSecretShare::from_bytes(&bytes).unwrap();
        let msg = b"round trip";
        assert_eq!(share.sign_share(msg).to_bytes(), parsed.sign_share(msg).to_bytes());
    }

    #[test]
    fn trivial_single_replica_threshold() {
        // f=0,k=0,N=1: threshold=0 means a single share suffices.
        let dealer = TcDealer::generate(0);
        let pks = TcPublicKeySet::new(dealer.public_key_set());
        let msg = b"solo";
        let s0 = dealer.share_for(0).sign_share(msg);
        let finalsig = pks.combine(&[(0, s0)]).expect("single share suffices at f=0");
        assert!(pks.verify_final(msg, &finalsig));
    }
}
