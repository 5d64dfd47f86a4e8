//! Content-addressed blob I/O for original files (C1).
//!
//! Objects are addressed by their SHA-256 content hash; the caller (C6, the
//! ingestion pipeline, and the `/files` upload handler in C10) computes the
//! hash and passes it as the key. Two backends are supported: a local
//! filesystem store for single-node deployments, and an S3-compatible store
//! (AWS S3, MinIO, LocalStack) signed with AWS Signature Version 4 using only
//! pure-Rust `hmac`/`sha2` — no C library signing dependency.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Config, ObjectStoreBackend, S3ObjectStoreConfig};

/// Compute the content-addressed key for a blob: its hex-encoded SHA-256
/// hash. Stable across backends so a file's `object_key` (§3) never needs to
/// change if the backend is migrated.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
}

pub fn create_object_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    match config.object_store.backend {
        ObjectStoreBackend::Local => {
            let local = config
                .object_store
                .local
                .as_ref()
                .context("object_store.local must be set when backend = \"local\"")?;
            Ok(Arc::new(LocalObjectStore::new(local.root.clone())))
        }
        ObjectStoreBackend::S3 => {
            let s3 = config
                .object_store
                .s3
                .as_ref()
                .context("object_store.s3 must be set when backend = \"s3\"")?;
            Ok(Arc::new(S3ObjectStore::new(s3.clone())?))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Local filesystem backend
// ═══════════════════════════════════════════════════════════════════════

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Shard by the first two hex characters so a single directory never
    /// accumulates millions of entries.
    fn path_for(&self, key: &str) -> PathBuf {
        let shard = &key[..key.len().min(2)];
        self.root.join(shard).join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("object not found: {}", key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// S3 backend — AWS SigV4 signed PUT/GET/DELETE
// ═══════════════════════════════════════════════════════════════════════

type HmacSha256 = Hmac<Sha256>;

pub struct S3ObjectStore {
    config: S3ObjectStoreConfig,
    client: reqwest::Client,
}

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        Ok(Self {
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID")
                .context("AWS_ACCESS_KEY_ID environment variable not set")?,
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY")
                .context("AWS_SECRET_ACCESS_KEY environment variable not set")?,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

impl S3ObjectStore {
    pub fn new(config: S3ObjectStoreConfig) -> Result<Self> {
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    fn host(&self) -> String {
        if let Some(ref endpoint) = self.config.endpoint_url {
            endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        } else {
            format!("{}.s3.{}.amazonaws.com", self.config.bucket, self.config.region)
        }
    }

    fn object_key(&self, key: &str) -> String {
        if self.config.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.config.prefix.trim_end_matches('/'), key)
        }
    }

    fn signed_request(
        &self,
        method: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(String, Vec<(String, String)>)> {
        let creds = AwsCredentials::from_env()?;
        let host = self.host();
        let encoded_key = uri_encode(&self.object_key(key));
        let url = format!("https://{}/{}", host, encoded_key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(payload);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String =
            headers.iter().map(|(k, v)| format!("{}:{}\n", k, v)).collect();

        let canonical_uri = format!("/{}", encoded_key);
        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&creds.secret_access_key, &date_stamp, &self.config.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut out_headers = vec![
            ("Authorization".to_string(), authorization),
            ("x-amz-content-sha256".to_string(), payload_hash),
            ("x-amz-date".to_string(), amz_date),
        ];
        if let Some(ref token) = creds.session_token {
            out_headers.push(("x-amz-security-token".to_string(), token.clone()));
        }

        Ok((url, out_headers))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let (url, headers) = self.signed_request("PUT", key, bytes)?;
        let mut req = self.client.put(&url).body(bytes.to_vec());
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.context("S3 PutObject request failed")?;
        if !resp.status().is_success() {
            bail!("S3 PutObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let (url, headers) = self.signed_request("GET", key, b"")?;
        let mut req = self.client.get(&url);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.context("S3 GetObject request failed")?;
        if !resp.status().is_success() {
            bail!("S3 GetObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let (url, headers) = self.signed_request("DELETE", key, b"")?;
        let mut req = self.client.delete(&url);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.context("S3 DeleteObject request failed")?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            bail!("S3 DeleteObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }
        Ok(())
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic_and_distinguishes_input() {
        let a = content_hash(b"hello world");
        let b = content_hash(b"hello world");
        let c = content_hash(b"goodbye world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn local_store_round_trips_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf());
        let key = content_hash(b"payload");
        store.put(&key, b"payload").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), b"payload");
        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.is_err());
    }

    #[tokio::test]
    async fn local_store_delete_is_idempotent_on_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf());
        store.delete("never-existed").await.unwrap();
    }
}
