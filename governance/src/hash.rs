//! Domain-separated SHA-256 digests
//!
//! Every variable-length field is length-prefixed so that no two distinct
//! field sequences share an encoding.

use num_bigint::BigUint;
use sha2::{Digest, Sha256};

pub struct FieldHasher {
    inner: Sha256,
}

impl FieldHasher {
    pub fn new(domain: &str) -> Self {
        let mut hasher = Self {
            inner: Sha256::new(),
        };
        hasher.bytes(domain.as_bytes());
        hasher
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update((data.len() as u64).to_be_bytes());
        self.inner.update(data);
        self
    }

    pub fn str(&mut self, data: &str) -> &mut Self {
        self.bytes(data.as_bytes())
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    pub fn uint(&mut self, value: &BigUint) -> &mut Self {
        self.bytes(&value.to_bytes_be())
    }

    pub fn finish(self) -> [u8; 32] {
        self.inner.finalize().into()
    }

    pub fn finish_hex(self) -> String {
        hex::encode(self.finish())
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix_prevents_ambiguity() {
        let mut a = FieldHasher::new("T");
        a.str("ab").str("c");
        let mut b = FieldHasher::new("T");
        b.str("a").str("bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_domain_separates() {
        let mut a = FieldHasher::new("A");
        a.u64(1);
        let mut b = FieldHasher::new("B");
        b.u64(1);
        assert_ne!(a.finish_hex(), b.finish_hex());
    }
}
