//! Directory-tree ingest (§4.I): the two paths that turn an external
//! source into the directory-node shape the catalog stores.

pub mod fs;
pub mod volume;

pub use fs::ingest_fs_tree;
pub use volume::{ingest_volume_tree, VolumeDriverError};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("blob table error: {0}")]
    Blob(#[from] crate::blob::BlobError),
    #[error("reparse attribute payload shorter than 8 bytes")]
    ReparsePayloadTooShort,
    #[error("volume driver failure: {0}")]
    VolumeDriver(#[from] VolumeDriverError),
}

/// A simple `*`-wildcard exclusion list, evaluated per path before node
/// creation (§4.I); a matching path's whole subtree is skipped.
#[derive(Debug, Clone, Default)]
pub struct ExclusionPatterns(Vec<String>);

impl ExclusionPatterns {
    pub fn new(patterns: impl IntoIterator<Item = String>) -> Self {
        Self(patterns.into_iter().collect())
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.0.iter().any(|p| matches_pattern(p, path))
    }
}

/// Minimal glob matcher supporting only the `*` wildcard, applied to a
/// full path string. Good enough for "skip this subtree" exclusion rules
/// without pulling in a general-purpose glob engine for one use site.
fn matches_pattern(pattern: &str, path: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == path;
    }

    let mut rest = path;
    if !parts[0].is_empty() {
        match rest.strip_prefix(parts[0]) {
            Some(r) => rest = r,
            None => return false,
        }
    }

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    let last = parts[parts.len() - 1];
    last.is_empty() || rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matching() {
        let ex = ExclusionPatterns::new(["/pagefile.sys".to_string(), "*/Temp/*".to_string()]);
        assert!(ex.is_excluded("/pagefile.sys"));
        assert!(ex.is_excluded("/Windows/Temp/foo.log"));
        assert!(!ex.is_excluded("/Windows/System32/foo.dll"));
    }
}
