//! Remote store client.
//!
//! [`RemoteStore`] is the seam to the remote key-value service: a pure
//! key -> opaque-value map with prefix listing, no value parsing on the
//! server side. [`HttpRemoteStore`] talks to the KV HTTP surface with an
//! authenticated session token; [`InMemoryRemoteStore`] backs tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, SyncError};

/// Remote key-value store: independent per-key atomic writes, no
/// cross-key transactions.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// List keys matching a prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// KV-over-HTTP client with a bearer session token.
pub struct HttpRemoteStore {
    base_url: String,
    session_token: String,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        Self::new(
            &config.remote_url,
            &config.session_token,
            config.request_timeout,
        )
    }

    pub fn new(base_url: &str, session_token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("building HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session_token: session_token.to_string(),
            client,
        })
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/kv/{}", self.base_url, key)
    }

    fn map_err(e: reqwest::Error, key: &str) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout(format!("request for {}: {}", key, e))
        } else {
            SyncError::Network(format!("request for {}: {}", key, e))
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .client
            .get(self.key_url(key))
            .bearer_auth(&self.session_token)
            .send()
            .await
            .map_err(|e| Self::map_err(e, key))?;

        match resp.status().as_u16() {
            404 => Ok(None),
            s if (200..300).contains(&s) => {
                let bytes = resp.bytes().await.map_err(|e| Self::map_err(e, key))?;
                Ok(Some(bytes.to_vec()))
            }
            s => {
                warn!("KV GET {} failed: {}", key, s);
                Err(SyncError::Remote {
                    status: s,
                    key: key.to_string(),
                })
            }
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let resp = self
            .client
            .put(self.key_url(key))
            .bearer_auth(&self.session_token)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| Self::map_err(e, key))?;

        let status = resp.status();
        if !status.is_success() {
            warn!("KV PUT {} failed: {}", key, status);
            return Err(SyncError::Remote {
                status: status.as_u16(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let url = format!("{}/kv", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("prefix", prefix)])
            .bearer_auth(&self.session_token)
            .send()
            .await
            .map_err(|e| Self::map_err(e, prefix))?;

        let status = resp.status();
        if !status.is_success() {
            warn!("KV LIST {} failed: {}", prefix, status);
            return Err(SyncError::Remote {
                status: status.as_u16(),
                key: prefix.to_string(),
            });
        }
        resp.json::<Vec<String>>()
            .await
            .map_err(|e| Self::map_err(e, prefix))
    }
}

/// In-memory remote store for tests. Counts writes so tests can assert
/// "no network writes happened".
#[derive(Default)]
pub struct InMemoryRemoteStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    puts: AtomicU64,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of put calls observed.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_prefix_listing() {
        let store = InMemoryRemoteStore::new();
        store.put("a/1", b"x").await.unwrap();
        store.put("a/2", b"y").await.unwrap();
        store.put("b/1", b"z").await.unwrap();
        assert_eq!(store.list("a/").await.unwrap(), vec!["a/1", "a/2"]);
        assert!(store.list("c/").await.unwrap().is_empty());
        assert_eq!(store.put_count(), 3);
    }

    #[tokio::test]
    async fn in_memory_get_missing() {
        let store = InMemoryRemoteStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }
}
