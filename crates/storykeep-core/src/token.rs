//! Capability token generation and hashing.
//!
//! A capability token is an unguessable URL-safe string. The stores index
//! tokens by their Blake3 hash, so request-time lookup never does a string
//! comparison against secret material; the final hash comparison goes
//! through [`TokenHash`] equality, which is constant-time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of random bytes in a generated token (256 bits of entropy,
/// well above the 128-bit floor the access design requires).
pub const TOKEN_BYTES: usize = 32;

/// Generate a cryptographically random, URL-safe capability token.
pub fn generate_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Blake3 hash of a capability token. Lookup key for token stores.
#[derive(Clone, Copy, Hash, Serialize, Deserialize)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    /// Hash the presented token string.
    pub fn of(token: &str) -> Self {
        Self(*blake3::hash(token.as_bytes()).as_bytes())
    }

    /// Reconstruct from raw stored bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes for persistence.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding, used when an API key hash stands in for an actor id
    /// in the audit log.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl PartialEq for TokenHash {
    fn eq(&self, other: &Self) -> bool {
        // blake3::Hash equality is constant-time
        blake3::Hash::from(self.0) == blake3::Hash::from(other.0)
    }
}

impl Eq for TokenHash {}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_url_safe_and_long_enough() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_roundtrip() {
        let token = generate_token();
        let hash = TokenHash::of(&token);
        let recovered = TokenHash::from_bytes(*hash.as_bytes());
        assert_eq!(hash, recovered);
        assert_eq!(TokenHash::from_hex(&hash.to_hex()).unwrap(), hash);
    }

    #[test]
    fn test_different_tokens_hash_differently() {
        assert_ne!(TokenHash::of("a"), TokenHash::of("b"));
    }
}
