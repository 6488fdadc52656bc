//! Byte storage for uploaded consent documents and time-limited URLs to them.

use crate::errors::CountersignError;
use crate::settings::Storage as StorageCfg;
use crate::validation;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

type HmacSha256 = Hmac<Sha256>;

/// Prefix every stored consent document lives under.
pub const DOCUMENT_PREFIX: &str = "consent-documents";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: i64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stores `bytes` and returns the path to reference them by.
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<String, CountersignError>;

    async fn exists(&self, path: &str) -> Result<bool, CountersignError>;

    async fn read(&self, path: &str) -> Result<Vec<u8>, CountersignError>;

    /// URL granting read access to `path` until `now + ttl_secs`.
    fn signed_url(&self, path: &str, ttl_secs: i64) -> Result<SignedUrl, CountersignError>;

    /// Checks a signature produced by [`DocumentStore::signed_url`].
    fn verify_signature(&self, path: &str, expires_at: i64, signature: &str, now: i64) -> bool;
}

/// Stores documents on the local filesystem and signs URLs with HMAC-SHA256
/// over `path|expires_at`.
pub struct LocalDocumentStore {
    root: PathBuf,
    secret: Vec<u8>,
    base_url: String,
}

impl LocalDocumentStore {
    pub fn new(cfg: &StorageCfg, base_url: String) -> Result<Self, CountersignError> {
        std::fs::create_dir_all(cfg.root.join(DOCUMENT_PREFIX))?;

        let secret = match &cfg.signing_secret {
            Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
            _ => {
                tracing::warn!(
                    "storage.signing_secret is not set; generated a per-process key, signed URLs will not survive a restart"
                );
                let mut bytes = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                bytes
            }
        };

        Ok(Self {
            root: cfg.root.clone(),
            secret,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, CountersignError> {
        let path = validation::storage_path("filePath", path)?;
        Ok(self.root.join(Path::new(path)))
    }

    fn mac(&self, path: &str, expires_at: i64) -> Result<HmacSha256, CountersignError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| CountersignError::Other(format!("invalid signing secret: {e}")))?;
        mac.update(path.as_bytes());
        mac.update(b"|");
        mac.update(expires_at.to_string().as_bytes());
        Ok(mac)
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<String, CountersignError> {
        let mut nonce = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce);
        let path = format!(
            "{}/{}-{}",
            DOCUMENT_PREFIX,
            hex::encode(nonce),
            sanitize_file_name(file_name)
        );

        let target = self.resolve(&path)?;
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| CountersignError::Transient(format!("document write failed: {e}")))?;

        tracing::debug!(%path, size = bytes.len(), "stored consent document");
        Ok(path)
    }

    async fn exists(&self, path: &str) -> Result<bool, CountersignError> {
        let target = self.resolve(path)?;
        match tokio::fs::metadata(&target).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CountersignError::Transient(format!(
                "document lookup failed: {e}"
            ))),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, CountersignError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                CountersignError::NotFound("Document not found".to_string()),
            ),
            Err(e) => Err(CountersignError::Transient(format!(
                "document read failed: {e}"
            ))),
        }
    }

    fn signed_url(&self, path: &str, ttl_secs: i64) -> Result<SignedUrl, CountersignError> {
        validation::storage_path("filePath", path)?;
        let expires_at = Utc::now().timestamp() + ttl_secs;
        let signature = hex::encode(self.mac(path, expires_at)?.finalize().into_bytes());
        let encoded_path: Vec<String> = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();

        Ok(SignedUrl {
            url: format!(
                "{}/files/{}?expires={}&signature={}",
                self.base_url,
                encoded_path.join("/"),
                expires_at,
                signature
            ),
            expires_at,
        })
    }

    fn verify_signature(&self, path: &str, expires_at: i64, signature: &str, now: i64) -> bool {
        if expires_at < now {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        let Ok(mac) = self.mac(path, expires_at) else {
            return false;
        };
        let expected = mac.finalize().into_bytes();
        expected.as_slice().ct_eq(provided.as_slice()).into()
    }
}

/// Keeps ASCII letters, digits, dot, dash and underscore; everything else
/// becomes `_`.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.chars().take(120).collect()
    }
}

/// Signed URLs keyed by storage path, reused until shortly before they expire.
#[derive(Clone)]
pub struct SignedUrlCache {
    ttl_secs: i64,
    entries: Arc<RwLock<HashMap<String, SignedUrl>>>,
}

/// Entries beyond this count trigger a sweep of expired ones on insert.
const CACHE_SWEEP_THRESHOLD: usize = 1024;

impl SignedUrlCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl_secs,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Remaining lifetime below which a cached URL is treated as stale.
    fn refresh_margin(&self) -> i64 {
        (self.ttl_secs / 10).clamp(1, 60)
    }

    pub async fn get(
        &self,
        store: &dyn DocumentStore,
        path: &str,
    ) -> Result<SignedUrl, CountersignError> {
        self.get_at(store, path, Utc::now().timestamp()).await
    }

    pub async fn get_at(
        &self,
        store: &dyn DocumentStore,
        path: &str,
        now: i64,
    ) -> Result<SignedUrl, CountersignError> {
        if let Some(cached) = self.entries.read().await.get(path) {
            if cached.expires_at - self.refresh_margin() > now {
                return Ok(cached.clone());
            }
        }

        let fresh = store.signed_url(path, self.ttl_secs)?;
        let mut entries = self.entries.write().await;
        if entries.len() >= CACHE_SWEEP_THRESHOLD {
            entries.retain(|_, url| url.expires_at > now);
        }
        entries.insert(path.to_string(), fresh.clone());
        Ok(fresh)
    }
}
