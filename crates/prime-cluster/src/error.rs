//! Error types for cluster configuration and process supervision.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cluster config not found at {0}")]
    NotInitialized(PathBuf),

    #[error("replica {0} is already running")]
    NodeAlreadyRunning(u32),

    #[error("replica {0} not found in cluster config")]
    NodeNotFound(u32),

    #[error("replica {0} failed to start: {1}")]
    NodeStartFailed(u32, String),

    #[error("replica {0} crashed with exit code {1:?}")]
    NodeCrashed(u32, Option<i32>),

    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    #[error("cluster membership invalid: {0}")]
    InvalidMembership(#[from] prime_types::Error),

    #[error("CC replica {0} is missing a required external address")]
    MissingExternalAddress(u32),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
