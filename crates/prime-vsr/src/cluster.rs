//! Cluster membership configuration: the `(N, f, k)` parameters plus the
//! per-replica addressing/role/key material every subsystem needs.

use std::collections::BTreeMap;

use prime_crypto::envelope::ReplicaVerifyingKey;
use prime_types::{ClusterParams, NodeRole, ReplicaId};

/// Static, replicated configuration: every correct replica holds an
/// identical copy. Built once at startup by `prime-cluster::config` and
/// threaded through every handler (§9 re-architecture guidance: "thread a
/// single context through every handler").
#[derive(Clone)]
pub struct ClusterConfig {
    pub params: ClusterParams,
    members: BTreeMap<ReplicaId, MemberInfo>,
}

#[derive(Clone)]
pub struct MemberInfo {
    pub role: NodeRole,
    pub verifying_key: ReplicaVerifyingKey,
}

impl ClusterConfig {
    pub fn new(params: ClusterParams, members: BTreeMap<ReplicaId, MemberInfo>) -> Self {
        debug_assert_eq!(members.len() as u32, params.n);
        Self { params, members }
    }

    pub fn contains(&self, id: ReplicaId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn role_of(&self, id: ReplicaId) -> Option<NodeRole> {
        self.members.get(&id).map(|m| m.role)
    }

    pub fn verifying_key_of(&self, id: ReplicaId) -> Option<&ReplicaVerifyingKey> {
        self.members.get(&id).map(|m| &m.verifying_key)
    }

    pub fn iter_members(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.members.keys().copied()
    }

    pub fn is_control_center(&self, id: ReplicaId) -> bool {
        matches!(self.role_of(id), Some(NodeRole::ControlCenter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_crypto::envelope::ReplicaSigningKey;

    fn test_config(n: u32, f: u32, k: u32) -> ClusterConfig {
        let params = ClusterParams::new(n, f, k).unwrap();
        let members = params
            .iter_replicas()
            .map(|id| {
                let sk = ReplicaSigningKey::deterministic_for_tests(id.as_u32());
                (
                    id,
                    MemberInfo {
                        role: NodeRole::ControlCenter,
                        verifying_key: sk.verifying_key(),
                    },
                )
            })
            .collect();
        ClusterConfig::new(params, members)
    }

    #[test]
    fn contains_reflects_membership() {
        let cfg = test_config(4, 1, 0);
        assert!(cfg.contains(ReplicaId::new(1)));
        assert!(!cfg.contains(ReplicaId::new(5)));
    }
}
