//! In-process stores, used by tests and single-node setups without a vault

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{KeyMetadataStore, SecretStore, StoreError};
use crate::model::KeyRecord;
use crate::secret::PlaintextKey;

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<String, KeyRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl KeyMetadataStore for InMemoryMetadataStore {
    async fn get(&self, code: &str) -> Result<Option<KeyRecord>, StoreError> {
        Ok(self.records.read().get(code).cloned())
    }

    async fn upsert(&self, record: &KeyRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(record.counterparty_code.clone(), record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<String, PlaintextKey>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the secret for `code`, returning whether one was held.
    pub fn remove(&self, code: &str) -> bool {
        self.secrets.write().remove(code).is_some()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, code: &str) -> Result<Option<PlaintextKey>, StoreError> {
        Ok(self.secrets.read().get(code).cloned())
    }

    async fn put(&self, code: &str, key: &PlaintextKey) -> Result<(), StoreError> {
        self.secrets.write().insert(code.to_string(), key.clone());
        Ok(())
    }
}
