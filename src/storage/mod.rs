//! Storage layer for the coordination document
//!
//! Provides the abstraction over the backing medium and its implementations.
//! Stores move whole documents as bytes; parsing and validation happen in
//! [`CommunicationsFile`](crate::communications::CommunicationsFile) so every
//! medium reports malformed content the same way.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;
use async_trait::async_trait;

/// Backing medium for the coordination document
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Identity of the backing medium
    ///
    /// Handles with equal keys share one write queue within the process.
    fn key(&self) -> &str;

    /// Load the persisted bytes, `None` if nothing has been persisted yet
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the persisted document in a single step
    async fn save(&self, bytes: &[u8]) -> Result<()>;
}
