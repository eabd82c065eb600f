//! Node identity types.

use rand::Rng;

/// Entropy of a freshly generated [`NodeId`] unless configured otherwise.
pub const DEFAULT_ID_BITS: u32 = 64;

/// Alphabet used for generated ids: six bits per character.
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Identifier of one running zonar process.
///
/// Generated ids are `⌈bits / 6⌉` characters drawn from a 64-character
/// alphabet, so they never contain whitespace and travel as a single wire
/// token. Ids received from peers are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    /// Generate a random id carrying at least `bits` bits of entropy.
    #[must_use]
    pub fn random(bits: u32) -> Self {
        let len = bits.max(1).div_ceil(6) as usize;
        let mut rng = rand::thread_rng();
        let id = (0..len)
            .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
            .collect();
        Self(id)
    }

    /// Wrap an id taken off the wire.
    #[must_use]
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::random(DEFAULT_ID_BITS)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_unique() {
        let a = NodeId::default();
        let b = NodeId::default();
        assert_ne!(a, b);
    }

    #[test]
    fn node_id_length_follows_entropy() {
        assert_eq!(NodeId::random(64).as_str().len(), 11);
        assert_eq!(NodeId::random(60).as_str().len(), 10);
        assert_eq!(NodeId::random(6).as_str().len(), 1);
        assert_eq!(NodeId::random(0).as_str().len(), 1);
    }

    #[test]
    fn node_id_uses_alphabet() {
        let id = NodeId::random(600);
        assert!(id.as_str().bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn node_id_display() {
        let id = NodeId::from_string("abc-_9".to_string());
        assert_eq!(id.to_string(), "abc-_9");
    }
}
