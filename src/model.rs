//! Records exchanged with the ledger and persisted by the key stores

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::EnvelopeError;

/// Header field carrying the lookup key that gets pseudonymized.
pub const PRIMARY_KEY_FIELD: &str = "primaryKey";
/// Header field carrying the counterparty's registration number.
pub const COUNTERPARTY_UEN_FIELD: &str = "trainingPartnerUen";
/// Header field carrying the counterparty code (key cache partition).
pub const COUNTERPARTY_CODE_FIELD: &str = "trainingPartnerCode";

/// Identity of the counterparty whose data key protects a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Counterparty {
    pub uen: String,
    pub code: String,
}

impl Counterparty {
    pub fn new(uen: impl Into<String>, code: impl Into<String>) -> Result<Self, EnvelopeError> {
        let uen = uen.into();
        let code = code.into();
        if uen.trim().is_empty() {
            return Err(EnvelopeError::InvalidInput(format!(
                "{COUNTERPARTY_UEN_FIELD} must not be empty"
            )));
        }
        if code.trim().is_empty() {
            return Err(EnvelopeError::InvalidInput(format!(
                "{COUNTERPARTY_CODE_FIELD} must not be empty"
            )));
        }
        Ok(Self { uen, code })
    }
}

/// Lifecycle state of a counterparty's data key at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// No key record is held for the counterparty.
    Absent,
    /// `now < valid_until`.
    Active,
    /// `now >= valid_until`; the key must be rotated before the next encryption.
    Stale,
}

impl KeyState {
    pub fn of(record: Option<&KeyRecord>, now: DateTime<Utc>) -> Self {
        match record {
            None => KeyState::Absent,
            Some(record) => record.state_at(now),
        }
    }
}

/// Non-secret metadata about a counterparty's current data key.
///
/// Serialized with the document field names used by the metadata collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    #[serde(rename = "trainingPartnerCode")]
    pub counterparty_code: String,
    #[serde(rename = "trainingPartnerUen")]
    pub counterparty_uen: String,
    #[serde(rename = "encryptedKey")]
    pub wrapped_key_reference: String,
    #[serde(rename = "validUpTo", with = "timestamp")]
    pub valid_until: DateTime<Utc>,
    #[serde(rename = "numberOfBytes", deserialize_with = "number_or_string")]
    pub key_length_bytes: usize,
}

impl KeyRecord {
    pub fn state_at(&self, now: DateTime<Utc>) -> KeyState {
        if now < self.valid_until {
            KeyState::Active
        } else {
            KeyState::Stale
        }
    }
}

/// Encrypted replacement for a record payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    /// Wrapped key reference of the data key that sealed `record`.
    #[serde(rename = "dataKey")]
    pub data_key_reference: String,
    /// Base64 of the 16-byte CBC IV.
    pub iv: String,
    /// Base64 of the ciphertext.
    pub record: String,
}

/// Record payload, either sealed or in the clear.
///
/// Decoding tries [`Envelope`] first. A plain object with exactly the fields
/// `dataKey`, `iv` and `record` (all strings) is therefore indistinguishable
/// from a sealed payload and reads as `Sealed`; writing one is refused as
/// already sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Sealed(Envelope),
    Plain(Value),
}

impl Payload {
    pub fn as_envelope(&self) -> Option<&Envelope> {
        match self {
            Payload::Sealed(envelope) => Some(envelope),
            Payload::Plain(_) => None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, Payload::Sealed(_))
    }
}

/// A ledger record: a free-form header plus a payload.
///
/// Top-level fields other than `header` and `payload` are carried through
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub header: Map<String, Value>,
    pub payload: Payload,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestRecord {
    /// Non-empty string value of a header field.
    pub fn header_text(&self, field: &str) -> Option<&str> {
        self.header
            .get(field)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Counterparty named by the header.
    pub fn counterparty(&self) -> Result<Counterparty, EnvelopeError> {
        let uen = self.header_text(COUNTERPARTY_UEN_FIELD).ok_or_else(|| {
            EnvelopeError::InvalidInput(format!("header.{COUNTERPARTY_UEN_FIELD} is missing"))
        })?;
        let code = self.header_text(COUNTERPARTY_CODE_FIELD).ok_or_else(|| {
            EnvelopeError::InvalidInput(format!("header.{COUNTERPARTY_CODE_FIELD} is missing"))
        })?;
        Counterparty::new(uen, code)
    }
}

/// Parse a validity timestamp as sent by the key issuer.
///
/// Accepts RFC 3339, and naive `YYYY-MM-DDTHH:MM:SS[.fff]` or
/// `YYYY-MM-DD HH:MM:SS` forms which are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

mod timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum NumberOrString {
    Number(u64),
    Text(String),
}

impl NumberOrString {
    pub(crate) fn to_usize(&self) -> Option<usize> {
        match self {
            NumberOrString::Number(n) => usize::try_from(*n).ok(),
            NumberOrString::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let value = NumberOrString::deserialize(deserializer)?;
    value
        .to_usize()
        .ok_or_else(|| serde::de::Error::custom("numberOfBytes is not a number"))
}
