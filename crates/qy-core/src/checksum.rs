//! Content hashing for files, nodes and manifests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compute the hex SHA-256 of a string's UTF-8 bytes
pub fn compute_checksum(s: &str) -> String {
    compute_checksum_bytes(s.as_bytes())
}

/// Compute the hex SHA-256 of raw bytes
pub fn compute_checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Algorithm name used by [`FileHash::empty`]. Never equal to anything.
pub const NONE_ALGORITHM: &str = "none";

/// Algorithm name used for oversized seeds hashed by path.
pub const PATH_ALGORITHM: &str = "path";

/// Stable identity of a file's contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHash {
    /// Algorithm name: `sha256`, `path` or `none`
    pub name: String,
    /// Hex digest
    pub checksum: String,
}

impl FileHash {
    /// Sentinel hash that compares unequal to every other hash, itself included
    pub fn empty() -> Self {
        Self {
            name: NONE_ALGORITHM.to_string(),
            checksum: String::new(),
        }
    }

    /// Hash over the UTF-8 bytes of textual contents
    pub fn from_contents(contents: &str) -> Self {
        Self {
            name: "sha256".to_string(),
            checksum: compute_checksum(contents),
        }
    }

    /// Hash standing in for contents too large to read into memory
    pub fn path(path: &str) -> Self {
        Self {
            name: PATH_ALGORITHM.to_string(),
            checksum: path.to_string(),
        }
    }
}

impl Default for FileHash {
    fn default() -> Self {
        FileHash::empty()
    }
}

impl PartialEq for FileHash {
    fn eq(&self, other: &Self) -> bool {
        self.name != NONE_ALGORITHM && self.name == other.name && self.checksum == other.checksum
    }
}
