//! Cluster configuration loading (SPEC_FULL §6 AMBIENT Configuration):
//! `N`, `f`, `k`, and per-replica `NodeConfig` (CC/DC role, overlay
//! addresses, key paths), loaded from a TOML file via the `config`/`toml`
//! crates.

use std::fs;
use std::path::{Path, PathBuf};

use prime_types::{ClusterParams, NodeRole, ReplicaId};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration for a single replica (spec §6 CLI contract: `<id>
/// <spines_int_addr:port> [<spines_ext_addr:port>]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: u32,
    pub role: NodeRole,
    /// Internal-overlay address (`spines_int_addr:port`).
    pub spines_int_addr: String,
    /// External-overlay address, required when `role` is `ControlCenter`.
    pub spines_ext_addr: Option<String>,
    /// Directory holding this replica's signing/threshold keys.
    pub keys_dir: PathBuf,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.role.is_control_center() && self.spines_ext_addr.is_none() {
            return Err(Error::MissingExternalAddress(self.id));
        }
        Ok(())
    }
}

/// A whole cluster's static configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub n: u32,
    pub f: u32,
    pub k: u32,
    pub nodes: Vec<NodeConfig>,
}

impl ClusterConfig {
    /// Validates membership (`N >= 3f+2k+1`, per-node CC address
    /// requirement) without touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        ClusterParams::new(self.n, self.f, self.k)?;
        for node in &self.nodes {
            node.validate()?;
        }
        Ok(())
    }

    pub fn params(&self) -> Result<ClusterParams> {
        Ok(ClusterParams::new(self.n, self.f, self.k)?)
    }

    /// Loads and validates a cluster config from `path` via the `config`
    /// crate's TOML source.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotInitialized(path.to_path_buf()));
        }
        let loaded: Self = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Writes this config to `path` as TOML (used by cluster bootstrap
    /// tooling, not by a running replica).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn node(&self, id: ReplicaId) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == id.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(n: u32, f: u32, k: u32) -> ClusterConfig {
        let nodes = (1..=n)
            .map(|id| NodeConfig {
                id,
                role: if id == 1 {
                    NodeRole::ControlCenter
                } else {
                    NodeRole::DataCenter
                },
                spines_int_addr: format!("127.0.0.1:{}", 8100 + id),
                spines_ext_addr: if id == 1 {
                    Some(format!("10.0.0.{id}:9000"))
                } else {
                    None
                },
                keys_dir: PathBuf::from(format!("/etc/prime/keys/{id}")),
            })
            .collect();
        ClusterConfig { n, f, k, nodes }
    }

    #[test]
    fn valid_membership_passes_validation() {
        let cfg = sample(4, 1, 0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn undersized_membership_is_rejected() {
        let cfg = sample(2, 1, 0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn control_center_without_external_address_is_rejected() {
        let mut cfg = sample(4, 1, 0);
        cfg.nodes[0].spines_ext_addr = None;
        assert!(matches!(
            cfg.validate(),
            Err(Error::MissingExternalAddress(1))
        ));
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.toml");
        let cfg = sample(4, 1, 0);
        cfg.save(&path).unwrap();

        let loaded = ClusterConfig::load(&path).unwrap();
        assert_eq!(loaded.n, 4);
        assert_eq!(loaded.nodes.len(), 4);
    }

    #[test]
    fn missing_file_reports_not_initialized() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.toml");
        assert!(matches!(
            ClusterConfig::load(&path),
            Err(Error::NotInitialized(_))
        ));
    }
}
