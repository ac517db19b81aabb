//! Content digests used to build stable cache keys.
//!
//! Image queries must hash to the same value whether they arrive as a
//! data-URL or as bare base64, so both forms are decoded to raw bytes
//! before hashing.

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::types::strip_data_url;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Digest of an image payload in either data-URL or base64 form.
///
/// Payloads that are not valid base64 are hashed as their transport text.
pub fn image_digest(payload: &str) -> String {
    let body = strip_data_url(payload);
    match base64::engine::general_purpose::STANDARD.decode(body) {
        Ok(bytes) => sha256_hex(&bytes),
        Err(_) => sha256_hex(body.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        let hash = sha256_hex(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn data_url_and_base64_hash_identically() {
        let data_url = "data:image/jpeg;base64,aGVsbG8gd29ybGQ=";
        let bare = "aGVsbG8gd29ybGQ=";
        assert_eq!(image_digest(data_url), image_digest(bare));
        assert_eq!(image_digest(bare), sha256_hex(b"hello world"));
    }

    #[test]
    fn different_images_hash_differently() {
        assert_ne!(image_digest("aGVsbG8="), image_digest("d29ybGQ="));
    }

    #[test]
    fn invalid_base64_still_hashes() {
        assert_eq!(image_digest("not base64!"), sha256_hex(b"not base64!"));
    }
}
