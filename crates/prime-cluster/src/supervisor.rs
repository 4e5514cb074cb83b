//! Supervises every replica process in a cluster: starts them all, polls
//! liveness, restarts crashed ones with backoff, and shuts the cluster down
//! cleanly on `SIGINT`/`SIGTERM`.

use std::collections::BTreeMap;
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::config::ClusterConfig;
use crate::node::{NodeProcess, NodeStatus};
use crate::{Error, Result};

pub struct ClusterSupervisor {
    config: ClusterConfig,
    nodes: BTreeMap<u32, NodeProcess>,
    running: bool,
}

impl ClusterSupervisor {
    pub fn new(config: ClusterConfig) -> Self {
        let nodes = config
            .nodes
            .iter()
            .cloned()
            .map(|node_config| (node_config.id, NodeProcess::new(node_config)))
            .collect();

        Self {
            config,
            nodes,
            running: false,
        }
    }

    pub fn start_all(&mut self) -> Result<()> {
        for (id, node) in &mut self.nodes {
            match node.start() {
                Ok(()) => tracing::info!(replica = id, "started"),
                Err(e) => tracing::warn!(replica = id, error = %e, "failed to start"),
            }
        }
        self.running = true;
        Ok(())
    }

    pub fn start_node(&mut self, id: u32) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(Error::NodeNotFound(id))?;
        node.start()?;
        tracing::info!(replica = id, "started");
        Ok(())
    }

    pub fn stop_all(&mut self) -> Result<()> {
        for (id, node) in &mut self.nodes {
            if let Err(e) = node.stop() {
                tracing::warn!(replica = id, error = %e, "failed to stop cleanly");
            }
        }
        self.running = false;
        Ok(())
    }

    pub fn stop_node(&mut self, id: u32) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(Error::NodeNotFound(id))?;
        node.stop()
    }

    pub fn status(&mut self) -> Vec<(u32, NodeStatus)> {
        self.nodes
            .iter_mut()
            .map(|(id, node)| {
                if node.status == NodeStatus::Running && !node.is_alive() {
                    node.status = NodeStatus::Crashed;
                }
                (*id, node.status)
            })
            .collect()
    }

    pub fn running_count(&mut self) -> usize {
        self.status()
            .into_iter()
            .filter(|(_, status)| *status == NodeStatus::Running)
            .count()
    }

    /// Polls every node once, restarting any that crashed since the last
    /// poll. Call this on a fixed tick from the cluster CLI's own loop.
    pub fn tick(&mut self) {
        for (id, node) in &mut self.nodes {
            if node.status == NodeStatus::Running && !node.is_alive() {
                tracing::warn!(replica = id, "crashed, restarting");
                node.status = NodeStatus::Crashed;
                if let Err(e) = node.restart() {
                    tracing::warn!(replica = id, error = %e, "restart failed");
                } else {
                    tracing::info!(replica = id, "restarted");
                }
            }
        }
    }

    /// Runs the poll-and-restart loop until `SIGINT`/`SIGTERM`, then stops
    /// every node and returns.
    pub fn monitor_until_signal(&mut self, poll_period: Duration) -> Result<()> {
        let mut signals =
            Signals::new([SIGINT, SIGTERM]).map_err(|e| Error::Config(e.to_string()))?;

        loop {
            if signals.pending().next().is_some() {
                tracing::info!("received shutdown signal, stopping cluster");
                return self.stop_all();
            }
            self.tick();
            if !self.running {
                return Ok(());
            }
            std::thread::sleep(poll_period);
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_types::NodeRole;
    use std::path::PathBuf;

    fn sample_config() -> ClusterConfig {
        let nodes = (1..=4)
            .map(|id| crate::config::NodeConfig {
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
                keys_dir: PathBuf::from(format!("/tmp/keys-{id}")),
            })
            .collect();
        ClusterConfig {
            n: 4,
            f: 1,
            k: 0,
            nodes,
        }
    }

    #[test]
    fn supervisor_tracks_every_configured_node() {
        let supervisor = ClusterSupervisor::new(sample_config());
        assert_eq!(supervisor.nodes.len(), 4);
        assert!(!supervisor.running);
    }

    #[test]
    fn start_and_stop_an_unknown_node_errors() {
        let mut supervisor = ClusterSupervisor::new(sample_config());
        assert!(matches!(
            supervisor.start_node(99),
            Err(Error::NodeNotFound(99))
        ));
        assert!(matches!(
            supervisor.stop_node(99),
            Err(Error::NodeNotFound(99))
        ));
    }

    #[test]
    fn status_reports_all_nodes_stopped_initially() {
        let mut supervisor = ClusterSupervisor::new(sample_config());
        let status = supervisor.status();
        assert_eq!(status.len(), 4);
        assert!(status
            .iter()
            .all(|(_, s)| *s == NodeStatus::Stopped));
    }
}
