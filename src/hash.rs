//! Pseudonymization of ledger lookup keys
//!
//! Lookup keys such as a record's `primaryKey` are replaced by their SHA3-384
//! digest before a record leaves this node. The digest is one-way: nothing in
//! the read path ever needs the original value back.

use sha3::{Digest, Sha3_384};
use thiserror::Error;

/// Length in hex characters of every digest produced by [`hash_lookup_key`].
pub const LOOKUP_HASH_HEX_LEN: usize = 96;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("Cannot hash an empty lookup key")]
    EmptyInput,
}

/// Hash a lookup key into a lowercase hex SHA3-384 digest.
///
/// The input is hashed as UTF-8 bytes. The output is always
/// [`LOOKUP_HASH_HEX_LEN`] characters long.
pub fn hash_lookup_key(input: &str) -> Result<String, HashError> {
    if input.is_empty() {
        return Err(HashError::EmptyInput);
    }

    let digest = Sha3_384::digest(input.as_bytes());
    Ok(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_golden_value() {
        let hashed = hash_lookup_key("Test").unwrap();
        assert_eq!(
            hashed,
            "da73bfcba560692a019f52c37de4d5e3ab49ca39c6a75594e3c39d805388c4de9d0ff3927eb9e197536f5b0b3a515f0a"
        );
    }

    #[test]
    fn test_fixed_length_lowercase_hex() {
        for input in ["a", "COURSE-1", "a much longer lookup key with spaces and ünïcødé"] {
            let hashed = hash_lookup_key(input).unwrap();
            assert_eq!(hashed.len(), LOOKUP_HASH_HEX_LEN);
            assert!(hashed
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }

    #[test]
    fn test_deterministic_and_distinct() {
        assert_eq!(
            hash_lookup_key("COURSE-1").unwrap(),
            hash_lookup_key("COURSE-1").unwrap()
        );
        assert_ne!(
            hash_lookup_key("COURSE-1").unwrap(),
            hash_lookup_key("COURSE-2").unwrap()
        );
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(hash_lookup_key(""), Err(HashError::EmptyInput));
    }
}
