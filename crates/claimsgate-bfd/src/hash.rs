//! One-way hashing of beneficiary identifiers for identifier lookups.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::BfdError;

const HASH_LEN: usize = 32;

/// PBKDF2-HMAC-SHA256 keyed by the shared pepper.
#[derive(Clone)]
pub struct IdentifierHasher {
    pepper: Vec<u8>,
    iterations: u32,
}

impl std::fmt::Debug for IdentifierHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierHasher")
            .field("pepper", &"****")
            .field("iterations", &self.iterations)
            .finish()
    }
}

impl IdentifierHasher {
    /// `pepper_hex` is the hex form of the salt bytes.
    pub fn new(pepper_hex: &str, iterations: u32) -> Result<Self, BfdError> {
        if iterations == 0 {
            return Err(BfdError::Hash("iteration count must be positive".into()));
        }
        let pepper = hex::decode(pepper_hex.trim())
            .map_err(|e| BfdError::Hash(format!("pepper is not valid hex: {e}")))?;
        if pepper.is_empty() {
            return Err(BfdError::Hash("pepper is empty".into()));
        }
        Ok(Self { pepper, iterations })
    }

    /// Lowercase hex of the 32-byte derived key.
    pub fn hash(&self, raw_id: &str) -> String {
        let mut out = [0u8; HASH_LEN];
        pbkdf2_hmac::<Sha256>(raw_id.as_bytes(), &self.pepper, self.iterations, &mut out);
        hex::encode(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_published_pbkdf2_sha256_vector() {
        // P = "passwd", S = "salt", c = 1
        let hasher = IdentifierHasher::new("73616c74", 1).unwrap();
        assert_eq!(
            hasher.hash("passwd"),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn output_is_stable_and_salted() {
        let a = IdentifierHasher::new("6b6579", 1000).unwrap();
        let b = IdentifierHasher::new("6b6580", 1000).unwrap();
        let h = a.hash("1S00A00AA00");
        assert_eq!(h.len(), 64);
        assert_eq!(h, a.hash("1S00A00AA00"));
        assert_ne!(h, b.hash("1S00A00AA00"));
    }

    #[test]
    fn rejects_bad_pepper() {
        assert!(IdentifierHasher::new("not-hex", 10).is_err());
        assert!(IdentifierHasher::new("", 10).is_err());
        assert!(IdentifierHasher::new("00", 0).is_err());
    }

    #[test]
    fn debug_hides_pepper() {
        let hasher = IdentifierHasher::new("73616c74", 1).unwrap();
        assert!(!format!("{hasher:?}").contains("73616c74"));
    }
}
