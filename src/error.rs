//! Unified error type for the envelope API
//!
//! Leaf modules keep their own error enums. Everything crossing the public
//! API is folded into [`EnvelopeError`], whose variants are the closed set of
//! failure kinds the surrounding gateway maps to a record rejection.
//!
//! # Example
//!
//! ```no_run
//! use dlt_envelope::EnvelopeError;
//!
//! fn reject(err: &EnvelopeError) -> String {
//!     match err.suggestion() {
//!         Some(hint) => format!("{err} ({hint})"),
//!         None => err.to_string(),
//!     }
//! }
//! ```

use thiserror::Error;

use crate::cipher::CipherError;
use crate::hash::HashError;
use crate::issuer::IssuerError;
use crate::store::StoreError;

/// Unified error type for all envelope operations
///
/// # Error Categories
///
/// - **InvalidInput**: empty or missing required input, rejected before any store or issuer call
/// - **DecryptionFailed**: malformed envelope, bad padding, or a payload that does not parse
/// - **KeyStoreDesync**: metadata says the key is active but the secret store has nothing
/// - **UnknownCounterparty**: a sealed record names a counterparty this node holds no key for
/// - **KeyUnavailable**: the key this node holds cannot be used
/// - **KeyIssuerUnavailable**: the remote key issuer failed or rejected the call
/// - **StoreUnavailable**: the local metadata or secret backend failed
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key store desync for counterparty '{code}': metadata is active but no plaintext key is stored")]
    KeyStoreDesync { code: String },

    #[error("Unknown counterparty '{code}': no key record is held locally")]
    UnknownCounterparty { code: String },

    #[error("Key unavailable for counterparty '{code}': {reason}")]
    KeyUnavailable { code: String, reason: String },

    #[error("Key issuer unavailable: {0}")]
    KeyIssuerUnavailable(#[from] IssuerError),

    #[error("Key store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl EnvelopeError {
    /// Returns true if the same request may succeed when retried later
    ///
    /// Only remote and backend failures qualify; nothing is retried internally.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::KeyIssuerUnavailable(e) => e.is_retryable(),
            Self::StoreUnavailable(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns a suggestion for resolving this error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::InvalidInput(_) => Some("Correct the record and resubmit it"),
            Self::KeyStoreDesync { .. } => {
                Some("Restore the counterparty's secret or remove its key record so a new key is issued")
            }
            Self::UnknownCounterparty { .. } => {
                Some("Encrypt at least one record for this counterparty on this node first")
            }
            Self::KeyIssuerUnavailable(e) => e.suggestion(),
            Self::StoreUnavailable(_) => Some("Check the metadata file and secrets directory"),
            _ => None,
        }
    }

    /// Returns a stable code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::DecryptionFailed(_) => "DECRYPTION_FAILED",
            Self::KeyStoreDesync { .. } => "KEY_STORE_DESYNC",
            Self::UnknownCounterparty { .. } => "UNKNOWN_COUNTERPARTY",
            Self::KeyUnavailable { .. } => "KEY_UNAVAILABLE",
            Self::KeyIssuerUnavailable(_) => "KEY_ISSUER_UNAVAILABLE",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }
}

impl From<HashError> for EnvelopeError {
    fn from(err: HashError) -> Self {
        EnvelopeError::InvalidInput(err.to_string())
    }
}

impl From<CipherError> for EnvelopeError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::EmptyKey | CipherError::EmptyCiphertext | CipherError::InvalidKeyLength(_) => {
                EnvelopeError::InvalidInput(err.to_string())
            }
            CipherError::InvalidIvLength(_)
            | CipherError::MisalignedCiphertext(_)
            | CipherError::Padding => EnvelopeError::DecryptionFailed(err.to_string()),
        }
    }
}
