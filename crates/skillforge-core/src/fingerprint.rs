//! InputFingerprinter trait for computing resume-matching keys.
//!
//! Defined in skillforge-core so the claim protocol can match inputs without
//! coupling to a specific hashing algorithm. The `Sha256Fingerprinter`
//! adapter lives in skillforge-infra.

/// Abstraction over input fingerprinting.
///
/// Two submissions of the same logical input must produce the same
/// fingerprint, so implementations hash `normalize_input(input)` rather than
/// the raw payload.
pub trait InputFingerprinter: Send + Sync {
    /// Compute a hex-encoded fingerprint of the given input.
    fn fingerprint(&self, input: &str) -> String;
}

/// Canonical form of an input before hashing: LF line endings, no
/// surrounding whitespace.
pub fn normalize_input(input: &str) -> String {
    input.replace("\r\n", "\n").trim().to_string()
}
