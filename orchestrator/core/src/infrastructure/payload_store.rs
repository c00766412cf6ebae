// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local Filesystem Payload Store
//!
//! Content-addressable storage for execution inputs and results. Each blob is
//! written once under `<base>/<first two hex chars>/<sha256>` and addressed by
//! `payload://sha256/<hex>`. Saving identical content twice yields the same
//! URI and touches the disk once.
//!
//! **Limitations:**
//! - Single node only; the directory must be shared for multi-node setups
//! - No garbage collection of payloads whose executions were purged

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::payload::{PayloadError, PayloadReader, PayloadStore, StoredPayload};

const URI_PREFIX: &str = "payload://sha256/";

pub struct FilePayloadStore {
    base_path: PathBuf,
}

impl FilePayloadStore {
    /// Creates the base directory if needed.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, PayloadError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        self.base_path.join(&digest[..2]).join(digest)
    }

    fn digest_from_uri(uri: &str) -> Result<&str, PayloadError> {
        let digest = uri
            .strip_prefix(URI_PREFIX)
            .ok_or_else(|| PayloadError::InvalidUri(uri.to_string()))?;
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PayloadError::InvalidUri(uri.to_string()));
        }
        Ok(digest)
    }
}

#[async_trait]
impl PayloadStore for FilePayloadStore {
    async fn save_bytes(&self, bytes: &[u8]) -> Result<StoredPayload, PayloadError> {
        let digest = hex::encode(Sha256::digest(bytes));
        let path = self.path_for(&digest);
        let stored = StoredPayload {
            uri: format!("{}{}", URI_PREFIX, digest),
            size: bytes.len() as u64,
            sha256: digest.clone(),
        };

        if fs::try_exists(&path).await? {
            debug!(uri = %stored.uri, "Payload already stored");
            return Ok(stored);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a unique temp file first so readers never see a partial blob.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;

        debug!(uri = %stored.uri, size = stored.size, "Stored payload");
        Ok(stored)
    }

    async fn open(&self, uri: &str) -> Result<PayloadReader, PayloadError> {
        let digest = Self::digest_from_uri(uri)?;
        match fs::File::open(self.path_for(digest)).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PayloadError::NotFound(uri.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePayloadStore::new(dir.path()).unwrap();

        let stored = store.save_json(&json!({"question": "meaning of life"})).await.unwrap();
        assert!(stored.uri.starts_with("payload://sha256/"));

        let value = store.read_json(&stored.uri).await.unwrap();
        assert_eq!(value, json!({"question": "meaning of life"}));
    }

    #[tokio::test]
    async fn test_identical_content_shares_uri() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePayloadStore::new(dir.path()).unwrap();

        let a = store.save_bytes(b"same").await.unwrap();
        let b = store.save_bytes(b"same").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.size, 4);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_uris() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePayloadStore::new(dir.path()).unwrap();

        let missing = format!("payload://sha256/{}", "0".repeat(64));
        assert!(matches!(store.open(&missing).await, Err(PayloadError::NotFound(_))));
        assert!(matches!(
            store.open("payload://sha256/../../etc/passwd").await,
            Err(PayloadError::InvalidUri(_))
        ));
        assert!(matches!(
            store.open("s3://bucket/key").await,
            Err(PayloadError::InvalidUri(_))
        ));
    }
}
