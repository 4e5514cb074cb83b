//! Command-line contract (spec §6): `<id> <spines_int_addr:port>
//! [<spines_ext_addr:port>]` plus the ambient flags the rest of this
//! workspace's binaries carry.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "prime-node", about = "Prime/ITRC BFT replica daemon")]
pub struct Cli {
    /// This replica's 1-based id within the cluster (`1..=N`).
    pub id: u32,

    /// Internal overlay address (`host:port`) this replica listens on for
    /// replica-to-replica Prime/ITRC traffic.
    pub spines_int_addr: String,

    /// External overlay address (`host:port`), required when this replica's
    /// configured role is Control Center.
    pub spines_ext_addr: Option<String>,

    /// Path to the cluster's TOML config (`ClusterConfig`: N/f/k, roles,
    /// addresses, key directories).
    #[arg(long, default_value = "cluster.toml")]
    pub config: PathBuf,

    /// Directory holding persisted checkpoints and update-transfer state.
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Log verbosity (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
