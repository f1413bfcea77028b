//! Persistence seams for key metadata and plaintext key material
//!
//! Metadata and secrets live in two independent stores addressed by the
//! counterparty code. Neither store decides staleness; that belongs to
//! [`crate::lifecycle::KeyLifecycleManager`].

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::model::KeyRecord;
use crate::secret::PlaintextKey;

pub mod file;
pub mod memory;

pub use file::{FileMetadataStore, FileSecretStore};
pub use memory::{InMemoryMetadataStore, InMemorySecretStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt document at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid counterparty code for storage: '{0}'")]
    InvalidName(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// False when the request itself can never be stored.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::InvalidName(_))
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Non-secret key metadata, one record per counterparty code.
#[async_trait]
pub trait KeyMetadataStore: Send + Sync + fmt::Debug {
    /// Loads the record for `code`, if any.
    async fn get(&self, code: &str) -> Result<Option<KeyRecord>, StoreError>;

    /// Inserts or replaces the record keyed by its counterparty code.
    async fn upsert(&self, record: &KeyRecord) -> Result<(), StoreError>;
}

/// Durable vault for plaintext data keys. Never enumerated.
#[async_trait]
pub trait SecretStore: Send + Sync + fmt::Debug {
    async fn get(&self, code: &str) -> Result<Option<PlaintextKey>, StoreError>;

    async fn put(&self, code: &str, key: &PlaintextKey) -> Result<(), StoreError>;
}
