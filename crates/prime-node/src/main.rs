//! `prime-node` binary entry point.
//!
//! Exit codes (spec §6): non-zero on undersized cluster membership (`N <
//! 3f+2k+1`), a Control Center replica missing its external overlay address,
//! or an id that is not a member of the loaded cluster config.

use clap::Parser;
use prime_node::{Cli, NodeError};

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = prime_node::run(cli) {
        tracing::error!(error = %err, "replica exited with a fatal error");
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &NodeError) -> i32 {
    match err {
        NodeError::Membership(_) => 2,
        NodeError::MissingExternalAddress => 3,
        NodeError::UnknownReplica(_) => 4,
        _ => 1,
    }
}
