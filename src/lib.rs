//! Envelope encryption and data-key lifecycle for ledger-bound records
//!
//! Before a record is written to the ledger its `header.primaryKey` is
//! replaced by a SHA3-384 digest and its payload is sealed with AES-CBC under
//! the counterparty's data key. Keys are issued by a remote service, cached
//! in a local metadata store plus a secret store, and rotated lazily once
//! their validity window has passed.
//!
//! ```no_run
//! use dlt_envelope::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_env()?;
//! config.validate()?;
//!
//! let keys = KeyLifecycleManager::new(
//!     Arc::new(FileMetadataStore::new(&config.storage.metadata_path)),
//!     Arc::new(FileSecretStore::new(&config.storage.secrets_dir)?),
//!     Arc::new(HttpKeyIssuer::from_config(&config.key_issuer)?),
//! );
//! let processor = EnvelopeProcessor::new(Arc::new(keys));
//!
//! let sealed = processor
//!     .format_for_write(r#"{"header":{"primaryKey":"COURSE-1","trainingPartnerUen":"199900001A","trainingPartnerCode":"T01"},"payload":{"a":1}}"#)
//!     .await?;
//! # let _ = sealed;
//! # Ok(())
//! # }
//! ```

pub mod cipher;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod issuer;
pub mod lifecycle;
pub mod model;
pub mod prelude;
pub mod secret;
pub mod store;

pub use envelope::EnvelopeProcessor;
pub use error::EnvelopeError;
pub use lifecycle::{KeyLifecycleManager, ResolvedKey};
pub use model::{Counterparty, Envelope, KeyRecord, KeyState, Payload, RequestRecord};
