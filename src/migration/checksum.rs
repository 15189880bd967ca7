//! Checksum calculation for revision files

use sha2::{Digest, Sha256};

/// Hexadecimal SHA-256 of `content`
#[must_use]
pub fn checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
