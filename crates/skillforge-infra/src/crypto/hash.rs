//! SHA-256 input fingerprinting for resume matching.
//!
//! Implements the `InputFingerprinter` trait from `skillforge-core` using the
//! `sha2` crate (RustCrypto ecosystem).

use sha2::{Digest, Sha256};

use skillforge_core::fingerprint::{InputFingerprinter, normalize_input};

/// SHA-256 implementation of `InputFingerprinter`.
///
/// Hashes the normalized input, so CRLF/LF differences and surrounding
/// whitespace do not prevent a resume.
pub struct Sha256Fingerprinter;

impl Sha256Fingerprinter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Sha256Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl InputFingerprinter for Sha256Fingerprinter {
    fn fingerprint(&self, input: &str) -> String {
        let digest = Sha256::digest(normalize_input(input).as_bytes());
        format!("{:x}", digest)
    }
}
