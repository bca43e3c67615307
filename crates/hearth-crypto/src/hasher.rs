use hearth_types::Cid;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g., `"hearth-event-v1"`) that is
/// prepended to every hash computation, so a metadata event and a key
/// fingerprint over identical bytes never collide. Plain block CIDs are not
/// domain-separated; see [`Cid::from_bytes`].
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for merkle-clock metadata events.
    pub const EVENT: Self = Self {
        domain: "hearth-event-v1",
    };
    /// Hasher for deterministic encryption IVs.
    pub const IV: Self = Self {
        domain: "hearth-iv-v1",
    };
    /// Hasher for key fingerprints.
    pub const KEY: Self = Self {
        domain: "hearth-key-v1",
    };

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Cid {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Cid::from_hash(*hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"hello world";
        assert_eq!(ContentHasher::EVENT.hash(data), ContentHasher::EVENT.hash(data));
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        let event = ContentHasher::EVENT.hash(data);
        let iv = ContentHasher::IV.hash(data);
        let key = ContentHasher::KEY.hash(data);
        assert_ne!(event, iv);
        assert_ne!(event, key);
        assert_ne!(iv, key);
    }

    #[test]
    fn domain_hash_differs_from_plain_cid() {
        assert_ne!(ContentHasher::EVENT.hash(b"x"), Cid::from_bytes(b"x"));
    }
}
