//! Replica daemon error types.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cluster configuration error: {0}")]
    Cluster(#[from] prime_cluster::Error),

    #[error("cluster membership invalid: {0}")]
    Membership(#[from] prime_types::Error),

    #[error("replica key material error: {0}")]
    Crypto(#[from] prime_crypto::Error),

    #[error("wire encoding error: {0}")]
    Encoding(#[from] postcard::Error),

    #[error("signing key not found at {0}")]
    MissingSigningKey(PathBuf),

    #[error("replica id {0} is not a member of the loaded cluster config")]
    UnknownReplica(u32),

    #[error("this replica is a Control Center and requires an external overlay address")]
    MissingExternalAddress,

    #[error("cluster membership too small: N={n} must be >= 3f+2k+1 (f={f}, k={k})")]
    UndersizedMembership { n: u32, f: u32, k: u32 },

    #[error("failed to bind IPC socket {path}: {source}")]
    IpcBindFailed {
        path: String,
        source: std::io::Error,
    },
}
