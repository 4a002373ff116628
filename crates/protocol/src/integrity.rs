//! Checksums and hashes used at the protocol boundary
//!
//! Two independent uses of `crc32fast` live here: a CRC32-IEEE digest for
//! verifying the hub-config document pulled from the backend, and a 32-bit
//! URI hash used as the on-wire handle for a device-visible resource path.
//! Both use the same underlying crate; `crc32fast::Hasher` defaults to the
//! IEEE polynomial, which is what the digest check requires.

use crc32fast::Hasher;

/// CRC32-IEEE digest of a byte string, matching the digest the hub-config
/// puller compares against the value the backend reports.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// 32-bit hash of a device-visible URI path, used as the on-wire handle in
/// constrained and observation requests instead of sending the path itself.
pub fn uri_hash(uri: &str) -> u32 {
    crc32_ieee(uri.as_bytes())
}

/// Lowercase hex rendering of a CRC32 value, matching the
/// `deviceservice.<hex>` key format used by the narrow config store.
pub fn hex_digest(value: u32) -> String {
    format!("{value:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_ieee_is_deterministic() {
        assert_eq!(crc32_ieee(b"hello"), crc32_ieee(b"hello"));
        assert_ne!(crc32_ieee(b"hello"), crc32_ieee(b"world"));
    }

    #[test]
    fn uri_hash_matches_crc32_of_path() {
        assert_eq!(uri_hash("/aa/bb"), crc32_ieee(b"/aa/bb"));
    }

    #[test]
    fn hex_digest_is_zero_padded_lowercase() {
        assert_eq!(hex_digest(0x0000_00ab), "000000ab");
    }
}
