//! Commonly used types and traits
//!
//! ```rust
//! use dlt_envelope::prelude::*;
//!
//! let digest = hash_lookup_key("COURSE-1").unwrap();
//! assert_eq!(digest.len(), LOOKUP_HASH_HEX_LEN);
//! ```

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{ConfigError, GatewayConfig, KeyIssuerConfig, StorageConfig};
pub use crate::envelope::EnvelopeProcessor;
pub use crate::error::EnvelopeError;
pub use crate::hash::{hash_lookup_key, HashError, LOOKUP_HASH_HEX_LEN};
pub use crate::issuer::{HttpKeyIssuer, IssuedKey, IssuerError, KeyIssuer};
pub use crate::lifecycle::{KeyLifecycleManager, ResolvedKey};
pub use crate::model::{Counterparty, Envelope, KeyRecord, KeyState, Payload, RequestRecord};
pub use crate::secret::{with_plaintext, PlaintextKey, SecretError};

// Store traits are needed in scope to call `get`/`put`/`upsert` directly.
pub use crate::store::{
    FileMetadataStore, FileSecretStore, InMemoryMetadataStore, InMemorySecretStore,
    KeyMetadataStore, SecretStore, StoreError,
};
