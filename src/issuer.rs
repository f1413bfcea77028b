//! Client contract for the remote key-issuing service
//!
//! The issuer mints a fresh data key for a counterparty, or resolves a
//! historical wrapped key reference back to its plaintext. Both calls are a
//! JSON `POST` carrying the counterparty UEN in a `uen` header:
//!
//! ```text
//! POST <issue-path>    {"trainingPartner":{"code":"T01"}}
//! POST <resolve-path>  {"trainingPartner":{"code":"T01"},"key":{"encryptedKey":"..."}}
//!
//! 200 {"status":200,"data":{"key":{"encryptedKey","validUpTo","numberOfBytes","plainKey"},
//!                           "trainingPartner":{"code","uen"}}}
//! ```
//!
//! No call is retried here; every failure surfaces to the caller.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::KeyIssuerConfig;
use crate::model::{parse_timestamp, Counterparty, KeyRecord, NumberOrString};
use crate::secret::PlaintextKey;

/// Header carrying the counterparty's registration number.
pub const UEN_HEADER: &str = "uen";

/// Default transport timeout for issuer calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Key issuer did not answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Key issuer rejected the request with status {status}: {description}")]
    Rejected { status: i64, description: String },

    #[error("Invalid response from key issuer: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(String),
}

impl IssuerError {
    /// Returns true if this error might be resolved by retrying the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, IssuerError::Http { status, .. } if *status >= 500)
            || matches!(self, IssuerError::Timeout { .. } | IssuerError::Request(_))
    }

    /// Returns a suggestion for how to fix this error, if available
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            IssuerError::AuthenticationFailed | IssuerError::AccessDenied(_) => {
                Some("Check that this node is registered with the key issuer")
            }
            IssuerError::Timeout { .. } => {
                Some("Check network connectivity or increase the key issuer timeout")
            }
            IssuerError::InvalidResponse(_) => Some("Verify key issuer version compatibility"),
            _ => None,
        }
    }
}

/// A key handed out by the issuer: metadata plus the plaintext.
pub struct IssuedKey {
    pub record: KeyRecord,
    pub plaintext: PlaintextKey,
}

impl fmt::Debug for IssuedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedKey")
            .field("record", &self.record)
            .field("plaintext", &self.plaintext)
            .finish()
    }
}

/// Remote key-issuing service.
#[async_trait]
pub trait KeyIssuer: Send + Sync + fmt::Debug {
    /// Mints a new data key for the counterparty.
    async fn issue(&self, party: &Counterparty) -> Result<IssuedKey, IssuerError>;

    /// Resolves a specific historical wrapped key reference.
    async fn resolve(
        &self,
        party: &Counterparty,
        wrapped_key_reference: &str,
    ) -> Result<IssuedKey, IssuerError>;
}

#[derive(Serialize)]
struct PartnerRef<'a> {
    code: &'a str,
}

#[derive(Serialize)]
struct KeyRef<'a> {
    #[serde(rename = "encryptedKey")]
    encrypted_key: &'a str,
}

#[derive(Serialize)]
struct IssuerRequest<'a> {
    #[serde(rename = "trainingPartner")]
    training_partner: PartnerRef<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<KeyRef<'a>>,
}

#[derive(Deserialize)]
struct IssuerResponse {
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    data: Option<IssuerData>,
}

#[derive(Deserialize)]
struct IssuerData {
    key: IssuedKeyBody,
    #[serde(rename = "trainingPartner")]
    training_partner: IssuedPartner,
}

#[derive(Deserialize)]
struct IssuedKeyBody {
    #[serde(rename = "encryptedKey")]
    encrypted_key: String,
    #[serde(rename = "validUpTo")]
    valid_up_to: String,
    #[serde(rename = "numberOfBytes")]
    number_of_bytes: NumberOrString,
    #[serde(rename = "plainKey")]
    plain_key: String,
}

#[derive(Deserialize)]
struct IssuedPartner {
    code: String,
    #[serde(default)]
    uen: Option<String>,
}

impl IssuerResponse {
    fn into_issued(self, party: &Counterparty) -> Result<IssuedKey, IssuerError> {
        if let Some(status) = self.status {
            if status != 200 {
                return Err(IssuerError::Rejected {
                    status,
                    description: self.description.unwrap_or_default(),
                });
            }
        }

        let data = self
            .data
            .ok_or_else(|| IssuerError::InvalidResponse("missing 'data'".to_string()))?;
        if data.training_partner.code != party.code {
            return Err(IssuerError::InvalidResponse(format!(
                "key issued for counterparty '{}', expected '{}'",
                data.training_partner.code, party.code
            )));
        }

        let key = data.key;
        if key.encrypted_key.trim().is_empty() {
            return Err(IssuerError::InvalidResponse(
                "empty 'encryptedKey'".to_string(),
            ));
        }
        if key.plain_key.trim().is_empty() {
            return Err(IssuerError::InvalidResponse("empty 'plainKey'".to_string()));
        }
        let valid_until = parse_timestamp(&key.valid_up_to).ok_or_else(|| {
            IssuerError::InvalidResponse(format!("unparseable 'validUpTo': {}", key.valid_up_to))
        })?;
        let key_length_bytes = key.number_of_bytes.to_usize().ok_or_else(|| {
            IssuerError::InvalidResponse("'numberOfBytes' is not a number".to_string())
        })?;

        Ok(IssuedKey {
            record: KeyRecord {
                counterparty_code: data.training_partner.code,
                counterparty_uen: data
                    .training_partner
                    .uen
                    .filter(|uen| !uen.trim().is_empty())
                    .unwrap_or_else(|| party.uen.clone()),
                wrapped_key_reference: key.encrypted_key,
                valid_until,
                key_length_bytes,
            },
            plaintext: PlaintextKey::from_encoded(key.plain_key),
        })
    }
}

/// HTTP client for the key issuer
#[derive(Debug, Clone)]
pub struct HttpKeyIssuer {
    http_client: Client,
    issue_url: String,
    resolve_url: String,
    timeout: Duration,
}

impl HttpKeyIssuer {
    /// Create a new issuer client
    ///
    /// `issue_path` and `resolve_path` are joined onto `base_url` unless they
    /// are absolute URLs themselves.
    pub fn new(
        base_url: &str,
        issue_path: &str,
        resolve_path: &str,
        timeout: Duration,
    ) -> Result<Self, IssuerError> {
        if base_url.trim().is_empty() {
            return Err(IssuerError::Request("key issuer base URL is empty".to_string()));
        }
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IssuerError::Request(e.to_string()))?;

        Ok(Self {
            http_client,
            issue_url: join_url(base_url, issue_path),
            resolve_url: join_url(base_url, resolve_path),
            timeout,
        })
    }

    pub fn from_config(config: &KeyIssuerConfig) -> Result<Self, IssuerError> {
        Self::new(
            &config.base_url,
            &config.issue_path,
            &config.resolve_path,
            config.timeout(),
        )
    }

    async fn post(
        &self,
        url: &str,
        party: &Counterparty,
        body: &IssuerRequest<'_>,
    ) -> Result<IssuedKey, IssuerError> {
        debug!(url, code = %party.code, "calling key issuer");
        let response = self
            .http_client
            .post(url)
            .header(UEN_HEADER, &party.uen)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(url, status = status.as_u16(), "key issuer returned an error status");
            return Err(match status.as_u16() {
                401 => IssuerError::AuthenticationFailed,
                403 => IssuerError::AccessDenied(error_body),
                code => IssuerError::Http {
                    status: code,
                    message: error_body,
                },
            });
        }

        // The body carries the plaintext key; keep it in a wiping buffer.
        let body = Zeroizing::new(
            response
                .text()
                .await
                .map_err(|e| self.transport_error(e))?,
        );
        let parsed: IssuerResponse = serde_json::from_str(&body)
            .map_err(|e| IssuerError::InvalidResponse(e.to_string()))?;
        parsed.into_issued(party)
    }

    fn transport_error(&self, err: reqwest::Error) -> IssuerError {
        if err.is_timeout() {
            IssuerError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            IssuerError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl KeyIssuer for HttpKeyIssuer {
    async fn issue(&self, party: &Counterparty) -> Result<IssuedKey, IssuerError> {
        let body = IssuerRequest {
            training_partner: PartnerRef { code: &party.code },
            key: None,
        };
        self.post(&self.issue_url, party, &body).await
    }

    async fn resolve(
        &self,
        party: &Counterparty,
        wrapped_key_reference: &str,
    ) -> Result<IssuedKey, IssuerError> {
        let body = IssuerRequest {
            training_partner: PartnerRef { code: &party.code },
            key: Some(KeyRef {
                encrypted_key: wrapped_key_reference,
            }),
        };
        self.post(&self.resolve_url, party, &body).await
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}
