//! Catchup (§4.6): lets a replica that has fallen behind — or just
//! rejoined under a fresh incarnation — request and receive the ordinal and
//! PO certificates it is missing, or jump directly to a recent ordinal when
//! it is too far behind (or in the wrong global incarnation) for incremental
//! replay to make sense.

use std::collections::BTreeMap;
use std::time::Duration;

use prime_types::{ClusterParams, Hash, PoSeq, ReplicaId};

use crate::message::{CatchupFlag, CatchupRequest, Jump, OrdCert, PoCert};

/// Minimum spacing between two catchup responses sent to the same
/// requester, to bound the work a correct replica spends serving laggards.
pub const CATCHUP_PERIOD: Duration = Duration::from_millis(500);

/// If a requester's `ARU` is this far behind ours, skip incremental replay
/// and hand them a `Jump` to our latest ordinal certificate instead.
pub const CATCHUP_HISTORY: u64 = 1000;

pub struct CatchupRequester {
    pub own: ReplicaId,
    pub params: ClusterParams,
    pending_nonce: Option<prime_types::Nonce>,
}

impl CatchupRequester {
    pub fn new(own: ReplicaId, params: ClusterParams) -> Self {
        Self {
            own,
            params,
            pending_nonce: None,
        }
    }

    pub fn build_request(
        &mut self,
        flag: CatchupFlag,
        aru: u64,
        po_aru: Vec<PoSeq>,
        our_proposal_digest: Hash,
        nonce: prime_types::Nonce,
    ) -> CatchupRequest {
        self.pending_nonce = Some(nonce);
        CatchupRequest {
            requester: self.own,
            flag,
            aru,
            po_aru,
            proposal_digest: our_proposal_digest,
            nonce,
        }
    }

    pub fn is_our_response(&self, nonce: prime_types::Nonce) -> bool {
        self.pending_nonce == Some(nonce)
    }
}

/// Per-responder rate limiting and the response-construction policy.
pub struct CatchupResponder {
    pub own: ReplicaId,
    last_response: BTreeMap<ReplicaId, Duration>,
}

impl CatchupResponder {
    pub fn new(own: ReplicaId) -> Self {
        Self {
            own,
            last_response: BTreeMap::new(),
        }
    }

    fn rate_limited(&self, requester: ReplicaId, now: Duration) -> bool {
        self.last_response
            .get(&requester)
            .is_some_and(|last| now.saturating_sub(*last) < CATCHUP_PERIOD)
    }

    /// Decides what to send back for a `CatchupRequest`, or `None` if the
    /// request is rate-limited.
    ///
    /// - Mismatched `proposal_digest` (this replica is in a different
    ///   global incarnation than the requester): reply `Jump` with no cert,
    ///   signalling "start over from ordinal 0".
    /// - `flag == Jump`, `flag == Recovery`, or the requester is more than
    ///   `CATCHUP_HISTORY` ordinals behind: reply `Jump` carrying our latest
    ///   `OrdCert`.
    /// - Otherwise: reply with the individual ordinal/PO certs covering
    ///   `(request.aru, our_aru]`.
    pub fn handle_request(
        &mut self,
        request: &CatchupRequest,
        our_proposal_digest: Hash,
        our_aru: u64,
        latest_cert: Option<&OrdCert>,
        now: Duration,
    ) -> Option<CatchupResponse> {
        if self.rate_limited(request.requester, now) {
            return None;
        }
        self.last_response.insert(request.requester, now);

        if request.proposal_digest != our_proposal_digest {
            return Some(CatchupResponse::Jump(Jump {
                proposal_digest: our_proposal_digest,
                cert: None,
            }));
        }

        let far_behind = our_aru.saturating_sub(request.aru) > CATCHUP_HISTORY;
        if matches!(request.flag, CatchupFlag::Jump | CatchupFlag::Recovery) || far_behind {
            return Some(CatchupResponse::Jump(Jump {
                proposal_digest: our_proposal_digest,
                cert: latest_cert.cloned(),
            }));
        }

        Some(CatchupResponse::Range {
            from_exclusive: request.aru,
            to_inclusive: our_aru,
        })
    }
}

/// What a responder decided to send; the caller (the `replica` module) turns
/// `Range` into the concrete sequence of `OrdCert`/`PoCert` messages by
/// walking its own slot tables.
pub enum CatchupResponse {
    Jump(Jump),
    Range { from_exclusive: u64, to_inclusive: u64 },
}

/// Jump-landing: adopts a certificate as the new present, discarding any
/// Ord-Slot state below it. Returns the `made_eligible` vector the
/// `Order`/`PreOrder` modules should adopt as their new floor.
pub fn land_jump(cert: &OrdCert) -> JumpLanding {
    JumpLanding {
        seq: cert.seq,
        view: cert.view,
        made_eligible: cert.made_eligible.clone(),
        last_executed: cert.last_executed.clone(),
    }
}

pub struct JumpLanding {
    pub seq: u64,
    pub view: prime_types::View,
    pub made_eligible: Vec<PoSeq>,
    pub last_executed: Vec<PoSeq>,
}

/// The PO-cert side of catching up: folds a batch of certified `PoRequest`s
/// into a set of origin/seq pairs now known-certified, for the caller to
/// merge into its `PreOrder` slot table.
pub fn po_certs_to_known(certs: &[PoCert]) -> Vec<(ReplicaId, PoSeq)> {
    certs.iter().map(|c| (c.origin, c.seq)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_types::{Nonce, View};

    fn params() -> ClusterParams {
        ClusterParams::new(4, 1, 0).unwrap()
    }

    #[test]
    fn mismatched_digest_yields_bare_jump() {
        let mut responder = CatchupResponder::new(ReplicaId::new(1));
        let request = CatchupRequest {
            requester: ReplicaId::new(2),
            flag: CatchupFlag::Catchup,
            aru: 5,
            po_aru: vec![],
            proposal_digest: Hash::from_bytes([1u8; 32]),
            nonce: Nonce::new(1),
        };
        let resp = responder
            .handle_request(&request, Hash::from_bytes([2u8; 32]), 10, None, Duration::ZERO)
            .unwrap();
        match resp {
            CatchupResponse::Jump(jump) => assert!(jump.cert.is_none()),
            _ => panic!("expected a bare Jump on digest mismatch"),
        }
    }

    #[test]
    fn far_behind_requester_gets_latest_cert_jump() {
        let mut responder = CatchupResponder::new(ReplicaId::new(1));
        let digest = Hash::from_bytes([9u8; 32]);
        let cert = OrdCert {
            seq: 5000,
            view: View::new(1),
            pp_digest: Hash::ZERO,
            last_executed: vec![],
            made_eligible: vec![],
            matrix: vec![],
            commits: vec![],
        };
        let request = CatchupRequest {
            requester: ReplicaId::new(2),
            flag: CatchupFlag::Catchup,
            aru: 1,
            po_aru: vec![],
            proposal_digest: digest,
            nonce: Nonce::new(1),
        };
        let resp = responder
            .handle_request(&request, digest, 5000, Some(&cert), Duration::ZERO)
            .unwrap();
        match resp {
            CatchupResponse::Jump(jump) => assert_eq!(jump.cert.unwrap().seq, 5000),
            _ => panic!("expected a Jump to the latest cert"),
        }
    }

    #[test]
    fn nearby_requester_gets_a_range() {
        let mut responder = CatchupResponder::new(ReplicaId::new(1));
        let digest = Hash::from_bytes([9u8; 32]);
        let request = CatchupRequest {
            requester: ReplicaId::new(2),
            flag: CatchupFlag::Catchup,
            aru: 10,
            po_aru: vec![],
            proposal_digest: digest,
            nonce: Nonce::new(1),
        };
        let resp = responder
            .handle_request(&request, digest, 15, None, Duration::ZERO)
            .unwrap();
        match resp {
            CatchupResponse::Range {
                from_exclusive,
                to_inclusive,
            } => {
                assert_eq!(from_exclusive, 10);
                assert_eq!(to_inclusive, 15);
            }
            _ => panic!("expected a Range response"),
        }
    }

    #[test]
    fn rate_limit_suppresses_repeat_response() {
        let mut responder = CatchupResponder::new(ReplicaId::new(1));
        let digest = Hash::from_bytes([3u8; 32]);
        let request = CatchupRequest {
            requester: ReplicaId::new(2),
            flag: CatchupFlag::Catchup,
            aru: 10,
            po_aru: vec![],
            proposal_digest: digest,
            nonce: Nonce::new(1),
        };
        assert!(responder
            .handle_request(&request, digest, 15, None, Duration::from_secs(1))
            .is_some());
        assert!(responder
            .handle_request(&request, digest, 15, None, Duration::from_millis(1100))
            .is_none());
        assert!(responder
            .handle_request(&request, digest, 15, None, Duration::from_secs(2))
            .is_some());
    }

    #[test]
    fn requester_recognizes_its_own_response_by_nonce() {
        let mut req = CatchupRequester::new(ReplicaId::new(1), params());
        let nonce = Nonce::new(42);
        req.build_request(CatchupFlag::Periodic, 3, vec![], Hash::ZERO, nonce);
        assert!(req.is_our_response(nonce));
        assert!(!req.is_our_response(Nonce::new(43)));
    }
}
