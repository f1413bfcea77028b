//! In-memory handling of plaintext data keys
//!
//! A [`PlaintextKey`] holds the key in its stored (base64) form inside a
//! zeroizing buffer. Raw key bytes only exist inside [`with_plaintext`]: they are
//! decoded into a second zeroizing buffer, handed to the caller's closure, and
//! wiped when the scope ends, including when the closure panics.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("Plaintext key is empty")]
    Empty,
    #[error("Plaintext key is not valid base64")]
    Malformed,
}

/// A plaintext data key in its base64 storage encoding.
///
/// Never printed: `Debug` is redacted. Dropping the value wipes the buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct PlaintextKey {
    encoded: Zeroizing<String>,
}

impl PlaintextKey {
    /// Wrap an already base64-encoded key, taking ownership of the buffer.
    pub fn from_encoded(encoded: String) -> Self {
        Self {
            encoded: Zeroizing::new(encoded),
        }
    }

    /// Encode raw key bytes.
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self::from_encoded(BASE64.encode(raw))
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.trim().is_empty()
    }

    /// The stored form of the key. Only secret stores should call this.
    pub fn expose_encoded(&self) -> &str {
        &self.encoded
    }

    /// Number of raw key bytes, without keeping the decoded bytes around.
    pub fn decoded_len(&self) -> Result<usize, SecretError> {
        with_plaintext(self, |bytes| bytes.len())
    }
}

impl fmt::Debug for PlaintextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlaintextKey([REDACTED])")
    }
}

/// Decode `key` into a protected buffer and run `f` over the raw bytes.
///
/// The buffer is zeroed before this function returns on every path.
pub fn with_plaintext<R>(key: &PlaintextKey, f: impl FnOnce(&[u8]) -> R) -> Result<R, SecretError> {
    let encoded = key.encoded.trim();
    if encoded.is_empty() {
        return Err(SecretError::Empty);
    }

    // Reserve up front so decoding never reallocates and leaves stale copies.
    let mut buffer = Zeroizing::new(Vec::with_capacity(encoded.len()));
    BASE64
        .decode_vec(encoded, &mut buffer)
        .map_err(|_| SecretError::Malformed)?;
    if buffer.is_empty() {
        return Err(SecretError::Empty);
    }

    Ok(f(&buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_scoped_access_sees_raw_bytes() {
        let key = PlaintextKey::from_bytes(&[7u8; 32]);
        let sum = with_plaintext(&key, |bytes| bytes.iter().map(|b| *b as u32).sum::<u32>()).unwrap();
        assert_eq!(sum, 7 * 32);
        assert_eq!(key.decoded_len().unwrap(), 32);
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = PlaintextKey::from_encoded("c2VjcmV0LWtleS1tYXRlcmlhbA==".to_string());
        let printed = format!("{key:?}");
        assert!(!printed.contains("c2VjcmV0"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn test_empty_and_malformed() {
        assert_eq!(
            with_plaintext(&PlaintextKey::from_encoded(String::new()), |_| ()),
            Err(SecretError::Empty)
        );
        assert_eq!(
            with_plaintext(&PlaintextKey::from_encoded("   ".to_string()), |_| ()),
            Err(SecretError::Empty)
        );
        assert_eq!(
            with_plaintext(&PlaintextKey::from_encoded("not base64!".to_string()), |_| ()),
            Err(SecretError::Malformed)
        );
    }

    #[test]
    fn test_panicking_closure_propagates() {
        let key = PlaintextKey::from_bytes(&[1u8; 16]);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            with_plaintext(&key, |_| -> () { panic!("closure failed") }).ok();
        }));
        assert!(outcome.is_err());
        // The guard is still usable afterwards.
        assert_eq!(key.decoded_len().unwrap(), 16);
    }
}
