use async_trait::async_trait;
use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dlt_envelope::prelude::*;
use dlt_envelope::cipher;
use rand::{rngs::OsRng, RngCore};
use serde_json::json;
use std::sync::Arc;

// Issuer that always hands out the same long-lived key.
#[derive(Debug)]
struct StaticIssuer {
    plaintext: PlaintextKey,
}

#[async_trait]
impl KeyIssuer for StaticIssuer {
    async fn issue(&self, party: &Counterparty) -> Result<IssuedKey, IssuerError> {
        Ok(IssuedKey {
            record: KeyRecord {
                counterparty_code: party.code.clone(),
                counterparty_uen: party.uen.clone(),
                wrapped_key_reference: "bench-key".to_string(),
                valid_until: Utc::now() + Duration::days(365),
                key_length_bytes: 32,
            },
            plaintext: self.plaintext.clone(),
        })
    }

    async fn resolve(&self, party: &Counterparty, _reference: &str) -> Result<IssuedKey, IssuerError> {
        self.issue(party).await
    }
}

fn create_test_payload(fields: usize) -> serde_json::Value {
    let mut payload = serde_json::Map::new();
    for i in 0..fields {
        payload.insert(format!("field{i}"), json!(format!("value-{i}-{}", "x".repeat(32))));
    }
    serde_json::Value::Object(payload)
}

fn create_processor() -> EnvelopeProcessor {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    let keys = KeyLifecycleManager::new(
        Arc::new(InMemoryMetadataStore::new()),
        Arc::new(InMemorySecretStore::new()),
        Arc::new(StaticIssuer {
            plaintext: PlaintextKey::from_bytes(&raw),
        }),
    );
    EnvelopeProcessor::new(Arc::new(keys))
}

fn write_request(payload: &serde_json::Value) -> String {
    json!({
        "header": {
            "primaryKey": "COURSE-1",
            "trainingPartnerUen": "199900001A",
            "trainingPartnerCode": "T01"
        },
        "payload": payload
    })
    .to_string()
}

// Benchmark: raw cipher
fn bench_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("cipher");
    let mut key = [0u8; cipher::AES256_KEY_SIZE];
    OsRng.fill_bytes(&mut key);

    for size_kb in [1, 10, 100].iter() {
        let data = vec![0u8; size_kb * 1024];
        group.throughput(Throughput::Bytes((size_kb * 1024) as u64));
        group.bench_with_input(BenchmarkId::new("encrypt", size_kb), size_kb, |b, _| {
            b.iter(|| cipher::encrypt(black_box(&key), black_box(&data)).expect("encrypt"));
        });

        let (iv, ciphertext) = cipher::encrypt(&key, &data).expect("encrypt");
        group.bench_with_input(BenchmarkId::new("decrypt", size_kb), size_kb, |b, _| {
            b.iter(|| cipher::decrypt(black_box(&key), &iv, black_box(&ciphertext)).expect("decrypt"));
        });
    }

    group.finish();
}

// Benchmark: full write/read path with a warm key cache
fn bench_seal_open(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let processor = create_processor();
    let mut group = c.benchmark_group("seal_open");

    for fields in [4, 64, 512].iter() {
        let request = write_request(&create_test_payload(*fields));
        let sealed = runtime
            .block_on(processor.format_for_write(&request))
            .expect("Failed to seal");
        let response = json!({ "data": [sealed] }).to_string();

        group.throughput(Throughput::Bytes(request.len() as u64));
        group.bench_with_input(BenchmarkId::new("format_for_write", fields), fields, |b, _| {
            b.to_async(&runtime)
                .iter(|| async { processor.format_for_write(black_box(&request)).await.expect("seal") });
        });
        group.bench_with_input(BenchmarkId::new("format_for_read", fields), fields, |b, _| {
            b.to_async(&runtime)
                .iter(|| async { processor.format_for_read(black_box(&response)).await.expect("open") });
        });
    }

    group.finish();
}

fn bench_hash(c: &mut Criterion) {
    c.bench_function("hash_lookup_key", |b| {
        b.iter(|| hash_lookup_key(black_box("COURSE-1-2024-RUN-10293")).expect("hash"))
    });
}

criterion_group!(benches, bench_cipher, bench_seal_open, bench_hash);
criterion_main!(benches);
