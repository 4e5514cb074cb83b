//! Prime/ITRC replica daemon.
//!
//! Wires the Prime ordering engine (`prime_vsr`), the ITRC threshold-signed
//! channel (`itrc`), and the SCADA core boundary (`scada_stub`) together
//! behind one `mio` event loop, per the three-scheduler-task model of §5.

pub mod bounded_queue;
pub mod cli;
pub mod config;
pub mod error;
pub mod ipc;
pub mod runtime;

pub use cli::Cli;
pub use config::ReplicaConfig;
pub use error::{NodeError, Result};
pub use runtime::ReplicaRuntime;

use std::path::PathBuf;

/// Loads the replica's config and runs its event loop until shutdown.
pub fn run(cli: Cli) -> Result<()> {
    let config = ReplicaConfig::load(&cli)?;
    let ipc_dir = ipc_dir_for(&cli);
    let mut runtime = ReplicaRuntime::new(config, ipc_dir)?;
    tracing::info!(replica = cli.id, addr = %cli.spines_int_addr, "replica starting");
    runtime.run()
}

fn ipc_dir_for(cli: &Cli) -> PathBuf {
    cli.data_dir.join("ipc")
}
