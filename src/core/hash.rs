//! Stable Hashing
//!
//! Provides the hashes that must agree across peers and builds:
//! - Field identifiers (`ConfigHash`) derived from fixed field names
//! - State digests for convergence checks between peers
//! - Lobby password hashes (`hash_bytes`)

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Domain separator for field identifiers.
const FIELD_DOMAIN: &[u8] = b"COLONY_SYNC_FIELD_V1";

/// Incremental hasher over replicated state.
///
/// Wraps SHA-256 with typed update helpers.
/// Order of updates is part of the digest.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for world field state.
    pub fn for_world_state() -> Self {
        Self::new(b"COLONY_SYNC_STATE_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 value (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an f32 value by its bit pattern.
    #[inline]
    pub fn update_f32(&mut self, value: f32) {
        self.hasher.update(value.to_bits().to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u64(value.len() as u64);
        self.hasher.update(value.as_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Plain SHA-256 of arbitrary data, no domain tag.
pub fn hash_bytes(data: &[u8]) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive the wire identifier of a replicated field from its fixed name.
///
/// Takes the first four bytes of a domain-separated SHA-256, so the value
/// depends only on the name string and never on the platform, the
/// process or the build.
pub fn config_hash(field_name: &str) -> i32 {
    let digest = hash_with_domain(FIELD_DOMAIN, field_name.as_bytes());
    i32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

// =============================================================================
// TESTS
// =============================================================================
