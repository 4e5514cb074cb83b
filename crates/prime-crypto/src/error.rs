use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("malformed key material: {0}")]
    MalformedKey(&'static str),

    #[error("threshold signature share from shareholder {0} failed verification")]
    BadShare(u32),

    #[error("not enough shares to reconstruct signature: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    #[error("checkpoint payload decryption failed (wrong key or tampered ciphertext)")]
    DecryptionFailed,
}

pub type Result<T> = std::result::Result<T, Error>;
