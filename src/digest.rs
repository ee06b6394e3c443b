//! SHA-1 helpers for the container format's integrity fields.
//!
//! Every header and every index segment carries a trailing SHA-1 over the
//! bytes that precede it; readers recompute and compare on open, writers
//! fill it in on finalize. This is a thin wrapper so call sites read as
//! `digest::sha1(bytes)` rather than pulling in the `sha1` crate's `Digest`
//! trait everywhere.

use sha1::{Digest, Sha1};

pub const SHA1_SIZE: usize = 20;

pub fn sha1(data: &[u8]) -> [u8; SHA1_SIZE] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compare `data`'s SHA-1 against `expected`, returning whether they match.
/// A segment whose `expected` digest is all zero is treated as unchecked,
/// matching archives that leave empty dat files' per-block hash table
/// zeroed.
pub fn verify(data: &[u8], expected: &[u8; SHA1_SIZE]) -> bool {
    if expected.iter().all(|&b| b == 0) {
        return true;
    }
    sha1(data) == *expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // SHA-1("abc")
        let digest = sha1(b"abc");
        assert_eq!(
            hex::encode(digest),
            "a9993e364706816aba3e25717850c26c9cd0d89"
        );
    }

    #[test]
    fn all_zero_expected_is_treated_as_unchecked() {
        assert!(verify(b"anything at all", &[0u8; SHA1_SIZE]));
    }

    #[test]
    fn mismatch_is_detected() {
        let d = sha1(b"hello");
        assert!(!verify(b"goodbye", &d));
    }
}
