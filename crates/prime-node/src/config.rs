//! Bridges `prime-cluster`'s on-disk `ClusterConfig` and this replica's own
//! key material into the `prime_vsr::cluster::ClusterConfig` the ordering
//! engine needs to verify peer signatures.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use prime_crypto::envelope::{ReplicaSigningKey, ReplicaVerifyingKey};
use prime_crypto::threshold::{TcPublicKeySet, TcSecretShare};
use prime_types::{ClusterParams, ReplicaId};
use prime_vsr::cluster::{ClusterConfig as VsrClusterConfig, MemberInfo};

use crate::cli::Cli;
use crate::error::{NodeError, Result};

const SIGNING_KEY_FILE: &str = "signing.key";
const VERIFYING_KEY_FILE: &str = "verifying.pub";
const THRESHOLD_PKS_FILE: &str = "threshold_pks.bin";
const VC_SHARE_FILE: &str = "vc_share.bin";
const VC_PKS_FILE: &str = "vc_pks.bin";

/// Everything this replica needs to run: its own id/signing key, the cluster
/// membership other replicas verify against, and the overlay addresses to
/// dial.
pub struct ReplicaConfig {
    pub own: ReplicaId,
    pub signing_key: ReplicaSigningKey,
    pub membership: VsrClusterConfig,
    pub peer_addrs: BTreeMap<ReplicaId, String>,
    /// The ITRC threshold public key set, distributed out-of-band with the
    /// keys directory (§6) — every replica and client holds an identical
    /// copy, never the secret shares.
    pub threshold_pks: TcPublicKeySet,
    /// This replica's share of the dedicated view-change threshold key
    /// (§4.4), distinct from the ITRC pre-/post-Prime keys above since
    /// every replica — not just control centers — participates in view
    /// change.
    pub vc_secret_share: TcSecretShare,
    pub vc_pks: TcPublicKeySet,
}

fn read_verifying_key(keys_dir: &Path) -> Result<ReplicaVerifyingKey> {
    let path = keys_dir.join(VERIFYING_KEY_FILE);
    let bytes = fs::read(&path)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| NodeError::MissingSigningKey(path.clone()))?;
    Ok(ReplicaVerifyingKey::from_bytes(&arr)?)
}

fn read_signing_key(keys_dir: &Path) -> Result<ReplicaSigningKey> {
    let path = keys_dir.join(SIGNING_KEY_FILE);
    let bytes =
        fs::read(&path).map_err(|_| NodeError::MissingSigningKey(path.clone()))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| NodeError::MissingSigningKey(path.clone()))?;
    Ok(ReplicaSigningKey::from_bytes(&arr))
}

impl ReplicaConfig {
    /// Loads the cluster config named by `--config`, validates `own` is a
    /// member, and reads every member's verifying key plus this replica's
    /// own signing key.
    pub fn load(cli: &Cli) -> Result<Self> {
        let cluster = prime_cluster::ClusterConfig::load(&cli.config)?;
        let params = ClusterParams::new(cluster.n, cluster.f, cluster.k)?;

        let own = ReplicaId::new(cli.id);
        let own_node = cluster
            .node(own)
            .ok_or(NodeError::UnknownReplica(cli.id))?
            .clone();
        if own_node.role.is_control_center() && cli.spines_ext_addr.is_none() {
            return Err(NodeError::MissingExternalAddress);
        }

        let mut members = BTreeMap::new();
        let mut peer_addrs = BTreeMap::new();
        for node in &cluster.nodes {
            let id = ReplicaId::new(node.id);
            let verifying_key = read_verifying_key(&node.keys_dir)?;
            members.insert(
                id,
                MemberInfo {
                    role: node.role,
                    verifying_key,
                },
            );
            peer_addrs.insert(id, node.spines_int_addr.clone());
        }

        let signing_key = read_signing_key(&own_node.keys_dir)?;
        let membership = VsrClusterConfig::new(params, members);

        let pks_path = own_node.keys_dir.join(THRESHOLD_PKS_FILE);
        let pks_bytes =
            fs::read(&pks_path).map_err(|_| NodeError::MissingSigningKey(pks_path.clone()))?;
        let threshold_pks = TcPublicKeySet::from_bytes(&pks_bytes)?;

        let vc_pks_path = own_node.keys_dir.join(VC_PKS_FILE);
        let vc_pks_bytes =
            fs::read(&vc_pks_path).map_err(|_| NodeError::MissingSigningKey(vc_pks_path.clone()))?;
        let vc_pks = TcPublicKeySet::from_bytes(&vc_pks_bytes)?;

        let vc_share_path = own_node.keys_dir.join(VC_SHARE_FILE);
        let vc_share_bytes = fs::read(&vc_share_path)
            .map_err(|_| NodeError::MissingSigningKey(vc_share_path.clone()))?;
        let vc_secret_share = TcSecretShare::from_bytes(&vc_share_bytes)?;

        Ok(Self {
            own,
            signing_key,
            membership,
            peer_addrs,
            threshold_pks,
            vc_secret_share,
            vc_pks,
        })
    }
}
