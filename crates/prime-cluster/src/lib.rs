//! Cluster configuration loading and local multi-replica process
//! supervision for Prime/ITRC.
//!
//! - [`config`]: `N`/`f`/`k` membership and per-replica [`NodeConfig`]
//!   (CC/DC role, overlay addresses, key paths), loaded from TOML.
//! - [`node`]: spawns and supervises a single `prime-node` replica process.
//! - [`supervisor`]: runs a whole cluster's worth of replicas and restarts
//!   crashed ones until told to shut down.

pub mod config;
pub mod error;
pub mod node;
pub mod supervisor;

pub use config::{ClusterConfig, NodeConfig};
pub use error::{Error, Result};
pub use node::{NodeProcess, NodeStatus};
pub use supervisor::ClusterSupervisor;

use std::path::Path;

/// Loads a cluster config from `path` and starts every configured replica.
pub fn start_cluster(path: &Path) -> Result<ClusterSupervisor> {
    let config = ClusterConfig::load(path)?;
    let mut supervisor = ClusterSupervisor::new(config);
    supervisor.start_all()?;
    Ok(supervisor)
}

/// Stops every replica in a running cluster.
pub fn stop_cluster(supervisor: &mut ClusterSupervisor) -> Result<()> {
    supervisor.stop_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_types::NodeRole;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn sample_config(n: u32) -> ClusterConfig {
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
        ClusterConfig { n, f: 1, k: 0, nodes }
    }

    #[test]
    fn start_cluster_loads_config_and_spawns_every_node() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.toml");
        sample_config(4).save(&path).unwrap();

        let mut supervisor = start_cluster(&path).unwrap();
        assert_eq!(supervisor.config().nodes.len(), 4);
        stop_cluster(&mut supervisor).unwrap();
    }

    #[test]
    fn start_cluster_reports_missing_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.toml");
        assert!(matches!(
            start_cluster(&path),
            Err(Error::NotInitialized(_))
        ));
    }
}
