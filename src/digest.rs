use std::fmt::{Debug, Display, Formatter};

use sha2::{Digest as _, Sha256};

pub const DIGEST_LEN: usize = 32;

/// SHA-256 value. The index publishes one of these as its trust anchor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update_bytes(bytes);
        hasher.finalize()
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // First 4 bytes are plenty to tell nodes apart in tree dumps.
        write!(f, "{}..", hex::encode(&self.0[..4]))
    }
}

/// Folds a sequence of digests (or raw bytes) into one.
#[derive(Clone, Default)]
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, digest: &Digest) {
        self.0.update(digest.0);
    }

    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> Digest {
        Digest(self.0.finalize().into())
    }
}
