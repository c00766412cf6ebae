// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Payload Store Contract
//!
//! Execution inputs and results are kept out of the execution row. The store
//! hands back a dereferenceable URI that the row references instead.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPayload {
    pub uri: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Payload not found: {0}")]
    NotFound(String),

    #[error("Invalid payload URI: {0}")]
    InvalidUri(String),

    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payload I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PayloadReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Persists `bytes` and returns where they can be read back from.
    async fn save_bytes(&self, bytes: &[u8]) -> Result<StoredPayload, PayloadError>;

    /// Opens a previously stored payload for streaming.
    async fn open(&self, uri: &str) -> Result<PayloadReader, PayloadError>;

    async fn read_bytes(&self, uri: &str) -> Result<Bytes, PayloadError> {
        let mut reader = self.open(uri).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn save_json(&self, value: &serde_json::Value) -> Result<StoredPayload, PayloadError> {
        let bytes = serde_json::to_vec(value)?;
        self.save_bytes(&bytes).await
    }

    async fn read_json(&self, uri: &str) -> Result<serde_json::Value, PayloadError> {
        let bytes = self.read_bytes(uri).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
