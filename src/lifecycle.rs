//! Data-key lifecycle: cache-aside over the metadata store, secret store and
//! remote key issuer
//!
//! Per counterparty code a key moves ABSENT → ACTIVE → STALE → (rotation) →
//! ACTIVE. Staleness is checked lazily on every access against the injected
//! [`Clock`]; nothing expires in the background.
//!
//! Any path that writes both stores writes the secret first and the metadata
//! second, and only after the issuer has returned a usable key. A failed
//! issuer call therefore leaves both stores untouched. Each counterparty code
//! has an async read/write lock: writers hold it exclusively, so concurrent
//! callers racing on an ABSENT or STALE key trigger exactly one issue call.
//! Readers hold it shared while loading the record and its secret, so a
//! record is never paired with a secret another writer put in the meantime.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::EnvelopeError;
use crate::issuer::{IssuedKey, KeyIssuer};
use crate::model::{Counterparty, KeyRecord, KeyState};
use crate::secret::{PlaintextKey, SecretError};
use crate::store::{KeyMetadataStore, SecretStore, StoreError};

/// A key ready for encryption: its metadata and the plaintext.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub record: KeyRecord,
    pub plaintext: PlaintextKey,
}

type KeyLock = Arc<tokio::sync::RwLock<()>>;

#[derive(Debug)]
pub struct KeyLifecycleManager {
    metadata: Arc<dyn KeyMetadataStore>,
    secrets: Arc<dyn SecretStore>,
    issuer: Arc<dyn KeyIssuer>,
    clock: Arc<dyn Clock>,
    key_locks: Mutex<HashMap<String, KeyLock>>,
}

impl KeyLifecycleManager {
    pub fn new(
        metadata: Arc<dyn KeyMetadataStore>,
        secrets: Arc<dyn SecretStore>,
        issuer: Arc<dyn KeyIssuer>,
    ) -> Self {
        Self::with_clock(metadata, secrets, issuer, Arc::new(SystemClock))
    }

    pub fn with_clock(
        metadata: Arc<dyn KeyMetadataStore>,
        secrets: Arc<dyn SecretStore>,
        issuer: Arc<dyn KeyIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            metadata,
            secrets,
            issuer,
            clock,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Current state of the key for `code`. Read-only.
    pub async fn state_of(&self, code: &str) -> Result<KeyState, EnvelopeError> {
        let record = self.load_record("state_of", code).await?;
        Ok(KeyState::of(record.as_ref(), self.clock.now()))
    }

    /// Returns a currently valid key for encrypting on behalf of the
    /// counterparty, minting or rotating one through the issuer when the
    /// stored key is absent or stale.
    pub async fn resolve_for_encryption(
        &self,
        uen: &str,
        code: &str,
    ) -> Result<ResolvedKey, EnvelopeError> {
        let party = Counterparty::new(uen, code)?;
        let lock = self.key_lock(code);

        {
            let _shared = lock.read().await;
            if let Some(record) = self.load_record("resolve_for_encryption", code).await? {
                if record.state_at(self.clock.now()) == KeyState::Active {
                    return self.load_active(record).await;
                }
            }
        }

        let _guard = lock.write().await;

        // Another caller may have rotated while this one waited.
        let record = self.load_record("resolve_for_encryption", code).await?;
        let state = KeyState::of(record.as_ref(), self.clock.now());
        if let (KeyState::Active, Some(record)) = (state, record) {
            return self.load_active(record).await;
        }

        info!(code, ?state, "issuing new data key");
        let issued = self.issuer.issue(&party).await.map_err(|e| {
            error!(code, error = %e, "key issue failed");
            EnvelopeError::from(e)
        })?;
        let resolved = self
            .persist_issued("resolve_for_encryption", &party, issued)
            .await?;
        info!(
            code,
            key = %fingerprint(&resolved.record.wrapped_key_reference),
            valid_until = %resolved.record.valid_until,
            "data key rotated"
        );
        Ok(resolved)
    }

    /// Returns the plaintext of the key a sealed record names.
    ///
    /// A reference matching the stored record is served locally. A
    /// different reference belongs to a key this node has rotated past; it is
    /// resolved through the issuer and becomes the stored record.
    pub async fn resolve_for_decryption(
        &self,
        uen: &str,
        code: &str,
        presented_reference: &str,
    ) -> Result<PlaintextKey, EnvelopeError> {
        let party = Counterparty::new(uen, code)?;
        if presented_reference.trim().is_empty() {
            return Err(EnvelopeError::InvalidInput(
                "envelope carries an empty key reference".to_string(),
            ));
        }

        let lock = self.key_lock(code);

        {
            let _shared = lock.read().await;
            let record = self
                .load_record("resolve_for_decryption", code)
                .await?
                .ok_or_else(|| {
                    warn!(code, "sealed record names a counterparty with no local key");
                    EnvelopeError::UnknownCounterparty {
                        code: code.to_string(),
                    }
                })?;
            if record.wrapped_key_reference == presented_reference {
                return self.load_matching(&record).await;
            }
        }

        let _guard = lock.write().await;

        if let Some(record) = self.load_record("resolve_for_decryption", code).await? {
            if record.wrapped_key_reference == presented_reference {
                return self.load_matching(&record).await;
            }
        }

        info!(
            code,
            key = %fingerprint(presented_reference),
            "resolving historical data key"
        );
        let issued = self
            .issuer
            .resolve(&party, presented_reference)
            .await
            .map_err(|e| {
                error!(code, error = %e, "key resolve failed");
                EnvelopeError::from(e)
            })?;
        let resolved = self.persist_issued("resolve_for_decryption", &party, issued).await?;
        Ok(resolved.plaintext)
    }

    fn key_lock(&self, code: &str) -> KeyLock {
        self.key_locks
            .lock()
            .entry(code.to_string())
            .or_default()
            .clone()
    }

    async fn load_record(
        &self,
        operation: &'static str,
        code: &str,
    ) -> Result<Option<KeyRecord>, EnvelopeError> {
        self.metadata
            .get(code)
            .await
            .map_err(|e| store_failure(operation, code, e))
    }

    async fn load_active(&self, record: KeyRecord) -> Result<ResolvedKey, EnvelopeError> {
        let code = record.counterparty_code.clone();
        let plaintext = self
            .secrets
            .get(&code)
            .await
            .map_err(|e| store_failure("resolve_for_encryption", &code, e))?
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                error!(
                    code = %code,
                    key = %fingerprint(&record.wrapped_key_reference),
                    "active key record has no stored secret"
                );
                EnvelopeError::KeyStoreDesync { code: code.clone() }
            })?;
        check_key_material(&record, &plaintext)?;
        debug!(code = %code, "using active data key");
        Ok(ResolvedKey { record, plaintext })
    }

    async fn load_matching(&self, record: &KeyRecord) -> Result<PlaintextKey, EnvelopeError> {
        let code = &record.counterparty_code;
        let plaintext = self
            .secrets
            .get(code)
            .await
            .map_err(|e| store_failure("resolve_for_decryption", code, e))?
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                error!(code = %code, "stored secret is missing or empty");
                EnvelopeError::KeyUnavailable {
                    code: code.clone(),
                    reason: "plaintext key is missing or empty".to_string(),
                }
            })?;
        check_key_material(record, &plaintext)?;
        Ok(plaintext)
    }

    async fn persist_issued(
        &self,
        operation: &'static str,
        party: &Counterparty,
        issued: IssuedKey,
    ) -> Result<ResolvedKey, EnvelopeError> {
        let IssuedKey { record, plaintext } = issued;
        if record.counterparty_code != party.code {
            return Err(EnvelopeError::KeyUnavailable {
                code: party.code.clone(),
                reason: format!("issuer returned a key for '{}'", record.counterparty_code),
            });
        }
        check_key_material(&record, &plaintext)?;
        if record.state_at(self.clock.now()) != KeyState::Active {
            warn!(code = %party.code, valid_until = %record.valid_until, "issued key is already expired");
        }

        self.secrets
            .put(&party.code, &plaintext)
            .await
            .map_err(|e| store_failure(operation, &party.code, e))?;
        self.metadata
            .upsert(&record)
            .await
            .map_err(|e| store_failure(operation, &party.code, e))?;

        Ok(ResolvedKey { record, plaintext })
    }
}

/// Checks the plaintext decodes to an AES key of the advertised length.
fn check_key_material(record: &KeyRecord, plaintext: &PlaintextKey) -> Result<(), EnvelopeError> {
    let unavailable = |reason: String| {
        error!(code = %record.counterparty_code, reason = %reason, "unusable data key");
        EnvelopeError::KeyUnavailable {
            code: record.counterparty_code.clone(),
            reason,
        }
    };

    let decoded_len = plaintext.decoded_len().map_err(|e| match e {
        SecretError::Empty => unavailable("plaintext key is empty".to_string()),
        SecretError::Malformed => unavailable("plaintext key is not valid base64".to_string()),
    })?;
    if decoded_len != record.key_length_bytes {
        return Err(unavailable(format!(
            "key is {decoded_len} bytes but numberOfBytes is {}",
            record.key_length_bytes
        )));
    }
    if !matches!(decoded_len, 16 | 24 | 32) {
        return Err(unavailable(format!(
            "{decoded_len}-byte key is not a valid AES key size"
        )));
    }
    Ok(())
}

fn store_failure(operation: &'static str, code: &str, err: StoreError) -> EnvelopeError {
    error!(operation, code, error = %err, "key store failure");
    EnvelopeError::StoreUnavailable(err)
}

/// Short, non-reversible tag for a wrapped key reference, safe to log.
pub(crate) fn fingerprint(reference: &str) -> String {
    let digest = Sha256::digest(reference.as_bytes());
    hex::encode(&digest[..6])
}
