//! 20-byte content hash — the blob table's key and the unit of content
//! addressing throughout the archive.
//!
//! SHA-1 computation itself is treated as an opaque collaborator (see
//! spec §1): this module only defines the fixed-width value type, its
//! ordering, and a thin streaming wrapper around the `sha1` crate. Nothing
//! here depends on SHA-1's internals beyond "produces 20 bytes".

use sha1::{Digest, Sha1};
use std::fmt;

/// Width in bytes of every hash in this format.
pub const HASH_LEN: usize = 20;

/// A 20-byte content hash with a total lexicographic ordering.
///
/// The all-zero value is the sentinel for "empty stream" (§3) and never
/// names a blob in the blob table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    #[inline]
    pub fn is_empty_stream(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != HASH_LEN {
            return None;
        }
        let mut buf = [0u8; HASH_LEN];
        buf.copy_from_slice(bytes);
        Some(Hash(buf))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hash a single in-memory buffer in one shot.
    pub fn of(data: &[u8]) -> Self {
        let mut h = StreamingHash::new();
        h.update(data);
        h.finish()
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Incremental SHA-1 computation used by the ingest paths and by the
/// extract-time verification helper (`blob::source::extract`), both of
/// which stream content rather than holding it all in memory at once.
pub struct StreamingHash(Sha1);

impl StreamingHash {
    pub fn new() -> Self {
        Self(Sha1::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finish(self) -> Hash {
        let digest = self.0.finalize();
        let mut buf = [0u8; HASH_LEN];
        buf.copy_from_slice(&digest);
        Hash(buf)
    }
}

impl Default for StreamingHash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic() {
        let a = Hash([0u8; HASH_LEN]);
        let mut b = [0u8; HASH_LEN];
        b[HASH_LEN - 1] = 1;
        let b = Hash(b);
        assert!(a < b);
    }

    #[test]
    fn zero_is_empty_stream_sentinel() {
        assert!(Hash::ZERO.is_empty_stream());
        assert!(!Hash::of(b"x").is_empty_stream());
    }

    #[test]
    fn streaming_matches_one_shot() {
        let mut h = StreamingHash::new();
        h.update(b"hello, ");
        h.update(b"world");
        assert_eq!(h.finish(), Hash::of(b"hello, world"));
    }
}
