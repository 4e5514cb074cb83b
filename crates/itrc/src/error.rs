use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cryptographic failure: {0}")]
    Crypto(#[from] prime_crypto::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
