//! BLAKE3 digests over wire bodies, wrapped as [`prime_types::Hash`].

use prime_types::Hash;

/// Hashes `bytes` with BLAKE3 and returns a [`Hash`].
pub fn digest(bytes: &[u8]) -> Hash {
    let out = blake3::hash(bytes);
    Hash::from_bytes(*out.as_bytes())
}

/// Incremental hasher for multi-part messages (e.g. fragmented Pre-Prepares).
#[derive(Default)]
pub struct Digester(blake3::Hasher);

impl Digester {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(bytes);
        self
    }

    pub fn finalize(&self) -> Hash {
        Hash::from_bytes(*self.0.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(digest(b"pre-prepare-body"), digest(b"pre-prepare-body"));
        assert_ne!(digest(b"a"), digest(b"b"));
    }

    #[test]
    fn digester_matches_one_shot() {
        let mut d = Digester::new();
        d.update(b"foo").update(b"bar");
        assert_eq!(d.finalize(), digest(b"foobar"));
    }
}
