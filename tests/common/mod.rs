//! Common test utilities for dlt-envelope integration tests
//!
//! Provides a recording in-process key issuer and fixtures for wiring a
//! lifecycle manager over in-memory stores.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub use dlt_envelope::prelude::*;

pub const TEST_UEN: &str = "199900001A";
pub const TEST_CODE: &str = "T01";

/// Fixed start instant for manual clocks.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

/// In-process key issuer that mints random keys and counts its calls.
///
/// Every key it hands out stays resolvable by its wrapped reference, the way
/// the real service can unwrap any key it issued.
#[derive(Debug)]
pub struct RecordingIssuer {
    clock: Arc<ManualClock>,
    validity: Duration,
    issued: Mutex<HashMap<String, (KeyRecord, PlaintextKey)>>,
    issue_calls: AtomicUsize,
    resolve_calls: AtomicUsize,
    failing: AtomicBool,
    delay: Option<std::time::Duration>,
}

impl RecordingIssuer {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            validity: Duration::days(30),
            issued: Mutex::new(HashMap::new()),
            issue_calls: AtomicUsize::new(0),
            resolve_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: None,
        }
    }

    /// Sleep before answering, widening race windows.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn issue_calls(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst)
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    /// The plaintext handed out under `reference`, if this issuer minted it.
    pub fn key_for(&self, reference: &str) -> Option<PlaintextKey> {
        self.issued.lock().get(reference).map(|(_, key)| key.clone())
    }

    /// Make every subsequent call fail with a timeout.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    async fn pause(&self) -> Result<(), IssuerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(IssuerError::Timeout { timeout_secs: 30 });
        }
        Ok(())
    }
}

#[async_trait]
impl KeyIssuer for RecordingIssuer {
    async fn issue(&self, party: &Counterparty) -> Result<IssuedKey, IssuerError> {
        let n = self.issue_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.pause().await?;

        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let record = KeyRecord {
            counterparty_code: party.code.clone(),
            counterparty_uen: party.uen.clone(),
            wrapped_key_reference: format!("wrapped-{}-{n}", party.code),
            valid_until: self.clock.now() + self.validity,
            key_length_bytes: raw.len(),
        };
        let plaintext = PlaintextKey::from_bytes(&raw);
        self.issued.lock().insert(
            record.wrapped_key_reference.clone(),
            (record.clone(), plaintext.clone()),
        );
        Ok(IssuedKey { record, plaintext })
    }

    async fn resolve(
        &self,
        party: &Counterparty,
        wrapped_key_reference: &str,
    ) -> Result<IssuedKey, IssuerError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;

        let held = self.issued.lock().get(wrapped_key_reference).cloned();
        match held {
            Some((record, plaintext)) if record.counterparty_code == party.code => {
                Ok(IssuedKey { record, plaintext })
            }
            _ => Err(IssuerError::Rejected {
                status: 404,
                description: "unknown key".to_string(),
            }),
        }
    }
}

/// A lifecycle manager over fresh in-memory stores.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub issuer: Arc<RecordingIssuer>,
    pub metadata: Arc<InMemoryMetadataStore>,
    pub secrets: Arc<InMemorySecretStore>,
    pub keys: Arc<KeyLifecycleManager>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(epoch()));
        Self::with_issuer(clock.clone(), RecordingIssuer::new(clock))
    }

    pub fn with_issuer(clock: Arc<ManualClock>, issuer: RecordingIssuer) -> Self {
        let issuer = Arc::new(issuer);
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let secrets = Arc::new(InMemorySecretStore::new());
        let keys = Arc::new(KeyLifecycleManager::with_clock(
            metadata.clone(),
            secrets.clone(),
            issuer.clone(),
            clock.clone(),
        ));
        Self {
            clock,
            issuer,
            metadata,
            secrets,
            keys,
        }
    }

    pub fn processor(&self) -> EnvelopeProcessor {
        EnvelopeProcessor::new(self.keys.clone())
    }
}

/// A write request for the default counterparty.
pub fn write_request(primary_key: &str, payload: serde_json::Value) -> String {
    serde_json::json!({
        "header": {
            "primaryKey": primary_key,
            "eventType": "Attendance",
            "trainingPartnerUen": TEST_UEN,
            "trainingPartnerCode": TEST_CODE
        },
        "payload": payload
    })
    .to_string()
}
