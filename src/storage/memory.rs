//! In-process backing store
//!
//! Clones share the same document. Useful for tests and for embedding the
//! coordination layer where no other process needs to see it.

use super::DocumentStore;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MemoryStore {
    bytes: Arc<RwLock<Option<Vec<u8>>>>,
    key: String,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            bytes: Arc::new(RwLock::new(None)),
            key: format!("memory:{}", Uuid::new_v4()),
        }
    }

    /// Create a store that already holds `bytes`
    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        let store = Self::new();
        Self {
            bytes: Arc::new(RwLock::new(Some(bytes.into()))),
            ..store
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn key(&self) -> &str {
        &self.key
    }

    async fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.bytes.read().await.clone())
    }

    async fn save(&self, bytes: &[u8]) -> Result<()> {
        *self.bytes.write().await = Some(bytes.to_vec());
        Ok(())
    }
}
