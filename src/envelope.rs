//! Record rewriting on the way to and from the ledger
//!
//! On write, `header.primaryKey` is replaced by its SHA3-384 digest and the
//! payload object is sealed into an [`Envelope`] under the counterparty's
//! current data key. On read, every item of a `data` batch is opened with the
//! key its envelope names. All input is validated before any store or issuer
//! call is made.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cipher;
use crate::error::EnvelopeError;
use crate::hash::hash_lookup_key;
use crate::lifecycle::{fingerprint, KeyLifecycleManager};
use crate::model::{Counterparty, Envelope, Payload, RequestRecord, PRIMARY_KEY_FIELD};
use crate::secret::{with_plaintext, PlaintextKey, SecretError};

#[derive(Debug, Clone)]
pub struct EnvelopeProcessor {
    keys: Arc<KeyLifecycleManager>,
}

impl EnvelopeProcessor {
    pub fn new(keys: Arc<KeyLifecycleManager>) -> Self {
        Self { keys }
    }

    pub fn lifecycle(&self) -> &KeyLifecycleManager {
        &self.keys
    }

    /// Pseudonymize and seal a record given as JSON text.
    pub async fn format_for_write(&self, input: &str) -> Result<RequestRecord, EnvelopeError> {
        let span = info_span!("format_for_write", request_id = %Uuid::new_v4());
        async {
            let record = parse_request(input)?;
            self.seal_record(record).await.map_err(|e| {
                error!(error = %e, "format_for_write failed");
                e
            })
        }
        .instrument(span)
        .await
    }

    /// Open every sealed item of a ledger read response given as JSON text.
    ///
    /// Accepts `{"data": [...]}` or `{"result": {"data": [...]}}`; every other
    /// field is returned untouched. The first item that cannot be opened fails
    /// the whole batch.
    pub async fn format_for_read(&self, input: &str) -> Result<String, EnvelopeError> {
        let span = info_span!("format_for_read", request_id = %Uuid::new_v4());
        async {
            let mut response = parse_json(input)?;
            let items = data_items(&mut response)?;

            let records = items
                .iter()
                .enumerate()
                .map(|(index, item)| parse_sealed_item(index, item))
                .collect::<Result<Vec<_>, _>>()?;
            debug!(items = records.len(), "opening batch");

            for (index, record) in records.into_iter().enumerate() {
                let opened = self.open_record(record).await.map_err(|e| {
                    error!(item = index, error = %e, "format_for_read failed");
                    e
                })?;
                items[index] = serde_json::to_value(&opened)
                    .map_err(|e| EnvelopeError::DecryptionFailed(e.to_string()))?;
            }

            serde_json::to_string(&response)
                .map_err(|e| EnvelopeError::DecryptionFailed(e.to_string()))
        }
        .instrument(span)
        .await
    }

    /// Pseudonymize a ledger read query so its lookup key matches what
    /// [`format_for_write`](Self::format_for_write) stored.
    ///
    /// Only `header.primaryKey` is rewritten. The payload, which queries may
    /// omit, is left as-is and no key is looked up.
    pub fn format_query(&self, input: &str) -> Result<Value, EnvelopeError> {
        let _span = info_span!("format_query", request_id = %Uuid::new_v4()).entered();
        let mut query = parse_json(input)?;
        let header = query
            .get_mut("header")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| EnvelopeError::InvalidInput("header must be a JSON object".to_string()))?;
        let hashed = hash_lookup_key(&primary_key_value(header.get(PRIMARY_KEY_FIELD))?)?;
        header.insert(PRIMARY_KEY_FIELD.to_string(), Value::String(hashed));
        debug!("query pseudonymized");
        Ok(query)
    }

    /// Hash the lookup key and seal the payload of a parsed record.
    pub async fn seal_record(&self, mut record: RequestRecord) -> Result<RequestRecord, EnvelopeError> {
        let hashed = hash_lookup_key(&primary_key_text(&record)?)?;
        let party = record.counterparty()?;
        let payload = match &record.payload {
            Payload::Plain(value @ Value::Object(_)) => value,
            Payload::Plain(_) => {
                return Err(EnvelopeError::InvalidInput(
                    "payload must be a JSON object".to_string(),
                ))
            }
            Payload::Sealed(_) => {
                return Err(EnvelopeError::InvalidInput(
                    "payload is already sealed".to_string(),
                ))
            }
        };
        let plaintext = Zeroizing::new(
            serde_json::to_vec(payload).map_err(|e| EnvelopeError::InvalidInput(e.to_string()))?,
        );
        record
            .header
            .insert(PRIMARY_KEY_FIELD.to_string(), Value::String(hashed));

        let resolved = self
            .keys
            .resolve_for_encryption(&party.uen, &party.code)
            .await?;
        let (iv, ciphertext) = use_key(&party, &resolved.plaintext, |key| {
            cipher::encrypt(key, &plaintext)
        })??;

        debug!(
            code = %party.code,
            key = %fingerprint(&resolved.record.wrapped_key_reference),
            "payload sealed"
        );
        record.payload = Payload::Sealed(Envelope {
            data_key_reference: resolved.record.wrapped_key_reference,
            iv: BASE64.encode(iv),
            record: BASE64.encode(ciphertext),
        });
        Ok(record)
    }

    /// Replace a sealed payload with the decrypted JSON value.
    pub async fn open_record(&self, mut record: RequestRecord) -> Result<RequestRecord, EnvelopeError> {
        let party = record.counterparty()?;
        let envelope = match &record.payload {
            Payload::Sealed(envelope) => envelope,
            Payload::Plain(_) => {
                return Err(EnvelopeError::InvalidInput(
                    "payload is not a sealed envelope".to_string(),
                ))
            }
        };
        let (iv, ciphertext) = decode_envelope(envelope)?;

        let key = self
            .keys
            .resolve_for_decryption(&party.uen, &party.code, &envelope.data_key_reference)
            .await?;
        let plaintext = Zeroizing::new(use_key(&party, &key, |key| {
            cipher::decrypt(key, &iv, &ciphertext)
        })??);

        let payload: Value = serde_json::from_slice(&plaintext).map_err(|e| {
            EnvelopeError::DecryptionFailed(format!("decrypted payload is not JSON: {e}"))
        })?;
        record.payload = Payload::Plain(payload);
        Ok(record)
    }
}

fn use_key<R>(
    party: &Counterparty,
    key: &PlaintextKey,
    f: impl FnOnce(&[u8]) -> Result<R, cipher::CipherError>,
) -> Result<Result<R, EnvelopeError>, EnvelopeError> {
    with_plaintext(key, |raw| f(raw).map_err(EnvelopeError::from)).map_err(|e| {
        let reason = match e {
            SecretError::Empty => "plaintext key is empty",
            SecretError::Malformed => "plaintext key is not valid base64",
        };
        EnvelopeError::KeyUnavailable {
            code: party.code.clone(),
            reason: reason.to_string(),
        }
    })
}

fn parse_json(input: &str) -> Result<Value, EnvelopeError> {
    if input.trim().is_empty() {
        return Err(EnvelopeError::InvalidInput("input is empty".to_string()));
    }
    serde_json::from_str(input)
        .map_err(|e| EnvelopeError::InvalidInput(format!("input is not valid JSON: {e}")))
}

fn parse_request(input: &str) -> Result<RequestRecord, EnvelopeError> {
    let value = parse_json(input)?;
    let record: RequestRecord = serde_json::from_value(value)
        .map_err(|e| EnvelopeError::InvalidInput(format!("malformed record: {e}")))?;
    // Fail before any key lookup.
    primary_key_text(&record)?;
    record.counterparty()?;
    Ok(record)
}

fn primary_key_text(record: &RequestRecord) -> Result<String, EnvelopeError> {
    primary_key_value(record.header.get(PRIMARY_KEY_FIELD))
}

fn primary_key_value(value: Option<&Value>) -> Result<String, EnvelopeError> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(EnvelopeError::InvalidInput(format!(
            "header.{PRIMARY_KEY_FIELD} is missing or empty"
        ))),
    }
}

fn data_items(response: &mut Value) -> Result<&mut Vec<Value>, EnvelopeError> {
    let has_top_level = response.get("data").is_some();
    let data = if has_top_level {
        response.get_mut("data")
    } else {
        response.get_mut("result").and_then(|result| result.get_mut("data"))
    };
    match data {
        Some(Value::Array(items)) if !items.is_empty() => Ok(items),
        Some(Value::Array(_)) => Err(EnvelopeError::InvalidInput(
            "data array is empty".to_string(),
        )),
        _ => Err(EnvelopeError::InvalidInput(
            "response carries no data array".to_string(),
        )),
    }
}

fn parse_sealed_item(index: usize, item: &Value) -> Result<RequestRecord, EnvelopeError> {
    let record: RequestRecord = serde_json::from_value(item.clone())
        .map_err(|e| EnvelopeError::InvalidInput(format!("data[{index}] is malformed: {e}")))?;
    record.counterparty()?;
    match record.payload.as_envelope() {
        Some(envelope) if !envelope.data_key_reference.trim().is_empty() => Ok(record),
        Some(_) => Err(EnvelopeError::InvalidInput(format!(
            "data[{index}] envelope has an empty dataKey"
        ))),
        None => Err(EnvelopeError::InvalidInput(format!(
            "data[{index}] payload is not a sealed envelope"
        ))),
    }
}

fn decode_envelope(envelope: &Envelope) -> Result<(Vec<u8>, Vec<u8>), EnvelopeError> {
    let iv = BASE64
        .decode(envelope.iv.trim())
        .map_err(|e| EnvelopeError::DecryptionFailed(format!("iv is not valid base64: {e}")))?;
    if iv.len() != cipher::IV_SIZE {
        return Err(EnvelopeError::DecryptionFailed(format!(
            "iv is {} bytes, expected {}",
            iv.len(),
            cipher::IV_SIZE
        )));
    }
    let ciphertext = BASE64
        .decode(envelope.record.trim())
        .map_err(|e| EnvelopeError::DecryptionFailed(format!("record is not valid base64: {e}")))?;
    Ok((iv, ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_rejects_before_lookup() {
        assert!(matches!(parse_request(""), Err(EnvelopeError::InvalidInput(_))));
        assert!(matches!(parse_request("   "), Err(EnvelopeError::InvalidInput(_))));
        assert!(matches!(parse_request("{"), Err(EnvelopeError::InvalidInput(_))));
        assert!(matches!(
            parse_request(r#"{"header":{},"payload":{}}"#),
            Err(EnvelopeError::InvalidInput(_))
        ));
        assert!(matches!(
            parse_request(
                r#"{"header":{"primaryKey":"","trainingPartnerUen":"U","trainingPartnerCode":"C"},"payload":{}}"#
            ),
            Err(EnvelopeError::InvalidInput(_))
        ));
        assert!(parse_request(
            r#"{"header":{"primaryKey":42,"trainingPartnerUen":"U","trainingPartnerCode":"C"},"payload":{}}"#
        )
        .is_ok());
    }

    #[test]
    fn test_data_items_shapes() {
        let mut flat = json!({"data": [{"a": 1}], "bookmark": "x"});
        assert_eq!(data_items(&mut flat).unwrap().len(), 1);

        let mut nested = json!({"result": {"data": [{"a": 1}, {"b": 2}]}});
        assert_eq!(data_items(&mut nested).unwrap().len(), 2);

        let mut empty = json!({"data": []});
        assert!(matches!(
            data_items(&mut empty),
            Err(EnvelopeError::InvalidInput(_))
        ));

        let mut missing = json!({"result": {}});
        assert!(data_items(&mut missing).is_err());
    }

    #[test]
    fn test_decode_envelope_failures() {
        let bad_iv = Envelope {
            data_key_reference: "k".to_string(),
            iv: "***".to_string(),
            record: BASE64.encode([0u8; 16]),
        };
        assert!(matches!(
            decode_envelope(&bad_iv),
            Err(EnvelopeError::DecryptionFailed(_))
        ));

        let short_iv = Envelope {
            iv: BASE64.encode([0u8; 8]),
            ..bad_iv.clone()
        };
        assert!(matches!(
            decode_envelope(&short_iv),
            Err(EnvelopeError::DecryptionFailed(_))
        ));

        let bad_record = Envelope {
            iv: BASE64.encode([0u8; 16]),
            record: "not base64!".to_string(),
            ..bad_iv
        };
        assert!(matches!(
            decode_envelope(&bad_record),
            Err(EnvelopeError::DecryptionFailed(_))
        ));
    }
}
