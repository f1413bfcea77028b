//! File-backed stores
//!
//! Metadata lives in a single JSON collection file. Each plaintext key lives in
//! its own document under the secrets directory. Every write goes through a
//! temp file in the target directory followed by a rename, so readers never
//! observe a half-written document.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use super::{KeyMetadataStore, SecretStore, StoreError};
use crate::model::KeyRecord;
use crate::secret::PlaintextKey;

const SECRET_ENCODING: &str = "Base-64";

fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

    // NamedTempFile is created owner-read/write only on Unix.
    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
    tmp.write_all(contents).map_err(|e| StoreError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Runs filesystem work on the blocking pool, off the async workers.
async fn run_blocking<T, F>(task: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| StoreError::Backend(format!("blocking store task failed: {e}")))?
}

/// Metadata collection persisted as a JSON array of key documents.
#[derive(Debug)]
pub struct FileMetadataStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_all(path: &Path) -> Result<Vec<KeyRecord>, StoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl KeyMetadataStore for FileMetadataStore {
    async fn get(&self, code: &str) -> Result<Option<KeyRecord>, StoreError> {
        let path = self.path.clone();
        let records = run_blocking(move || load_all(&path)).await?;
        Ok(records
            .into_iter()
            .find(|record| record.counterparty_code == code))
    }

    async fn upsert(&self, record: &KeyRecord) -> Result<(), StoreError> {
        let path = self.path.clone();
        let write_lock = Arc::clone(&self.write_lock);
        let record = record.clone();
        run_blocking(move || {
            let _guard = write_lock.lock();
            let mut records = load_all(&path)?;
            match records
                .iter_mut()
                .find(|held| held.counterparty_code == record.counterparty_code)
            {
                Some(held) => *held = record,
                None => records.push(record),
            }
            let contents = serde_json::to_vec_pretty(&records)?;
            atomic_write(&path, &contents)
        })
        .await
    }
}

#[derive(Serialize)]
struct SecretDocumentRef<'a> {
    #[serde(rename = "plainDataKey")]
    plain_data_key: &'a str,
    encoding: &'a str,
}

#[derive(Deserialize)]
struct SecretDocument {
    #[serde(rename = "plainDataKey")]
    plain_data_key: String,
    #[serde(default)]
    encoding: Option<String>,
}

/// One secret document per counterparty code under a directory.
#[derive(Debug)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    fn secret_path(&self, code: &str) -> Result<PathBuf, StoreError> {
        let valid = !code.is_empty()
            && !code.starts_with('.')
            && code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StoreError::InvalidName(code.to_string()));
        }
        Ok(self.dir.join(format!("{code}.json")))
    }
}

fn read_secret(path: &Path) -> Result<Option<PlaintextKey>, StoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => Zeroizing::new(raw),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let document: SecretDocument =
        serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    if let Some(encoding) = document.encoding.as_deref() {
        if encoding != SECRET_ENCODING {
            return Err(StoreError::Corrupt {
                path: path.display().to_string(),
                reason: format!("unsupported encoding '{encoding}'"),
            });
        }
    }
    Ok(Some(PlaintextKey::from_encoded(document.plain_data_key)))
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, code: &str) -> Result<Option<PlaintextKey>, StoreError> {
        let path = self.secret_path(code)?;
        run_blocking(move || read_secret(&path)).await
    }

    async fn put(&self, code: &str, key: &PlaintextKey) -> Result<(), StoreError> {
        let path = self.secret_path(code)?;
        let contents = Zeroizing::new(serde_json::to_vec(&SecretDocumentRef {
            plain_data_key: key.expose_encoded(),
            encoding: SECRET_ENCODING,
        })?);
        run_blocking(move || atomic_write(&path, &contents)).await
    }
}
