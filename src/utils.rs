//! Utility functions for hashsnap
//!
//! Small helpers shared by the library and the `hsnap` binary: content
//! hashing and human readable sizes.
//!
//! ## Example Usage
//!
//! ```rust
//! use hashsnap::utils::{format_bytes, hash_data};
//!
//! let digest = hash_data(b"abc");
//! assert_eq!(digest.to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
//! assert_eq!(format_bytes(1536), "1.50 KB");
//! ```

use crate::types::Digest;
use sha1::{Digest as _, Sha1};

/// Read buffer used when streaming file content into the hasher
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Hash arbitrary data using SHA-1
///
/// # Arguments
///
/// * `data` - Byte slice to hash
///
/// # Returns
///
/// The 20 byte SHA-1 digest of `data`.
pub fn hash_data(data: &[u8]) -> Digest {
    let mut hasher = Sha1::new();
    hasher.update(data);
    Digest(hasher.finalize().into())
}

/// Format bytes in human-readable form
///
/// Uses 1024 as the conversion factor. Values below 1 KB are shown as whole
/// numbers, larger values with two decimals.
///
/// # Example
///
/// ```rust
/// use hashsnap::utils::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 B");
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1_048_576), "1.00 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_data() {
        let hash1 = hash_data(b"Hello, World!");
        let hash2 = hash_data(b"Hello, World!");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.to_hex().len(), 40);
        assert_ne!(hash1, hash_data(b"Hello, World?"));

        // Well known SHA-1 of the empty input
        assert_eq!(
            hash_data(b"").to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
        assert_eq!(format_bytes(1_099_511_627_776), "1.00 TB");
    }
}
