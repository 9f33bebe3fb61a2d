//! Peer and payload identifiers handed out by the transport, plus pairing-token derivation.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Transport-assigned endpoint handle. Opaque; never shown to the user as a name.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NeighborId(String);

impl NeighborId {
    pub fn new(id: impl Into<String>) -> Self {
        NeighborId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NeighborId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NeighborId {
    fn from(id: &str) -> Self {
        NeighborId::new(id)
    }
}

/// Transport-assigned payload handle, unique per outbound or inbound payload.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PayloadId(pub i64);

impl PayloadId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PayloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of digits in a derived pairing token.
pub const PAIRING_TOKEN_DIGITS: usize = 4;

/// Derive the short code both sides display while authenticating.
/// Order independent: `pairing_token(a, b) == pairing_token(b, a)`.
/// Only for transports that do not supply their own token.
pub fn pairing_token(a: &NeighborId, b: &NeighborId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(b"nearshare-pairing-v1");
    hasher.update(lo.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(hi.as_str().as_bytes());
    let digest = hasher.finalize();
    let n = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    format!("{:04}", n % 10u32.pow(PAIRING_TOKEN_DIGITS as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_token_symmetric() {
        let a = NeighborId::new("A1b2");
        let b = NeighborId::new("Zz09");
        assert_eq!(pairing_token(&a, &b), pairing_token(&b, &a));
    }

    #[test]
    fn pairing_token_is_four_digits() {
        let token = pairing_token(&"ep1".into(), &"ep2".into());
        assert_eq!(token.len(), PAIRING_TOKEN_DIGITS);
        assert!(token.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn pairing_token_depends_on_both_ids() {
        let a = NeighborId::new("ep1");
        let tokens: std::collections::HashSet<String> = (0..50)
            .map(|i| pairing_token(&a, &NeighborId::new(format!("peer{i}"))))
            .collect();
        assert!(tokens.len() > 1);
    }
}
