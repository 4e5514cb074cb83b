use thiserror::Error;

/// Errors raised by the Prime ordering engine. Per §7 of the design, almost
/// none of these ever propagate out of a processing routine — they are
/// logged and the offending message is dropped. The few that are fatal
/// (configuration) are surfaced to the binary's `main` for a non-zero exit.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cluster membership invalid: {0}")]
    InvalidMembership(#[from] prime_types::Error),

    #[error("cryptographic failure: {0}")]
    Crypto(#[from] prime_crypto::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
