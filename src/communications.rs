//! Shared Communications Document
//!
//! Sole owner of the persisted coordination document. Every other component
//! reaches the document through [`CommunicationsFile`].
//!
//! # Design
//!
//! - Every operation is one whole-document read, in-memory transform and
//!   whole-document write
//! - Operations on the same backing key are serialized through a FIFO queue
//!   shared by every handle in the process
//! - Before writing, the persisted revision is re-read; if another process
//!   moved it, the transform is replayed on the fresh document
//! - Across processes the last writer still wins inside that window

use crate::config::CommsConfig;
use crate::error::{CommsError, Result};
use crate::storage::{DocumentStore, FileStore, MemoryStore};
use crate::types::{
    validate_agent_name, AgentRecord, AgentStatus, CompletionOutcome, CoordinationDocument,
    DocumentMeta, PendingRequest, RequestId, StatusUpdate,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Mutex as QueueLock;
use tracing::{debug, info, warn};

/// Default number of replays when the revision moves underneath a write
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Per-key write queues shared by every live handle in this process
///
/// Entries die with the last handle on their key and are pruned on lookup.
static WRITE_QUEUES: Lazy<Mutex<HashMap<String, Weak<QueueLock<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn queue_for(key: &str) -> Arc<QueueLock<()>> {
    let mut queues = WRITE_QUEUES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    queues.retain(|_, queue| queue.strong_count() > 0);

    if let Some(queue) = queues.get(key).and_then(Weak::upgrade) {
        return queue;
    }

    let queue = Arc::new(QueueLock::new(()));
    queues.insert(key.to_string(), Arc::downgrade(&queue));
    queue
}

#[cfg(test)]
fn queue_handle_count(key: &str) -> usize {
    WRITE_QUEUES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(key)
        .map_or(0, Weak::strong_count)
}

/// Only the revision is needed for the conflict check
#[derive(Deserialize)]
struct RevisionProbe {
    meta: DocumentMeta,
}

/// Handle to the shared coordination document
///
/// Cheap to clone; clones and independently opened handles on the same
/// path share one ordering queue.
#[derive(Clone)]
pub struct CommunicationsFile {
    store: Arc<dyn DocumentStore>,
    queue: Arc<QueueLock<()>>,
    max_conflict_retries: u32,
}

impl fmt::Debug for CommunicationsFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommunicationsFile")
            .field("store", &self.store.key())
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish()
    }
}

impl CommunicationsFile {
    /// Open the document at `path`; the file is created on first access
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_store(Arc::new(FileStore::new(path)))
    }

    /// Document held only in this process
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Use an arbitrary backing medium
    pub fn with_store(store: Arc<dyn DocumentStore>) -> Self {
        let queue = queue_for(store.key());
        Self {
            store,
            queue,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    /// Open the document named by configuration
    pub fn from_config(config: &CommsConfig) -> Self {
        Self::open(&config.communications.path)
            .with_max_conflict_retries(config.communications.max_conflict_retries)
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Identity of the backing medium
    pub fn store_key(&self) -> &str {
        self.store.key()
    }

    /// Current document, created and persisted first if the store is empty
    pub async fn read_raw(&self) -> Result<CoordinationDocument> {
        let _turn = self.queue.lock().await;
        let (document, _) = self.load_or_init().await?;
        Ok(document)
    }

    /// Set or merge the status of `name`
    pub async fn update_agent(&self, name: &str, update: StatusUpdate) -> Result<AgentStatus> {
        validate_agent_name(name)?;
        debug!("Updating status for {}", name);

        self.mutate(name, |doc| {
            let record = doc.record_mut(name);
            let status = update.clone().apply(record.status.take(), Utc::now());
            record.status = Some(status.clone());
            status
        })
        .await
    }

    /// Persisted record of `name`, `None` if it has no entry yet
    pub async fn get_agent(&self, name: &str) -> Result<Option<AgentRecord>> {
        let document = self.read_raw().await?;
        Ok(document.agents.get(name).cloned())
    }

    /// All persisted agent records by name
    pub async fn list_agents(&self) -> Result<BTreeMap<String, AgentRecord>> {
        Ok(self.read_raw().await?.agents)
    }

    /// Queue a request from `from_agent` on `to_agent`'s record
    pub async fn add_request(
        &self,
        from_agent: &str,
        to_agent: &str,
        request: &str,
    ) -> Result<RequestId> {
        validate_agent_name(from_agent)?;
        validate_agent_name(to_agent)?;
        debug!("Adding request {} -> {}: {}", from_agent, to_agent, request);

        self.mutate(from_agent, |doc| doc.push_request(from_agent, to_agent, request))
            .await
    }

    /// Pending requests addressed to `name`, oldest first
    pub async fn get_requests_for_agent(&self, name: &str) -> Result<Vec<PendingRequest>> {
        Ok(self.read_raw().await?.requests_for(name))
    }

    /// Complete the oldest pending request on `completer` matching
    /// `(requester, request)` and deliver `result` to the requester
    ///
    /// The delivery is appended even when nothing matched; check
    /// [`CompletionOutcome::matched`] to tell the cases apart.
    pub async fn complete_request(
        &self,
        completer: &str,
        requester: &str,
        request: &str,
        result: &str,
    ) -> Result<CompletionOutcome> {
        validate_agent_name(completer)?;
        validate_agent_name(requester)?;

        let outcome = self
            .mutate(completer, |doc| {
                doc.complete_by_text(completer, requester, request, result, Utc::now())
            })
            .await?;

        log_completion(completer, requester, &outcome);
        Ok(outcome)
    }

    /// Complete a request by id; preferred over text matching
    pub async fn complete_request_by_id(
        &self,
        completer: &str,
        requester: &str,
        id: RequestId,
        result: &str,
    ) -> Result<CompletionOutcome> {
        validate_agent_name(completer)?;
        validate_agent_name(requester)?;

        let outcome = self
            .mutate(completer, |doc| {
                doc.complete_by_id(completer, requester, id, result, Utc::now())
            })
            .await?;

        log_completion(completer, requester, &outcome);
        Ok(outcome)
    }

    /// Withdraw a pending request without delivering anything
    pub async fn remove_request(
        &self,
        from_agent: &str,
        to_agent: &str,
        request: &str,
    ) -> Result<bool> {
        self.mutate(from_agent, |doc| doc.remove_request(from_agent, to_agent, request))
            .await
    }

    /// Drop processed deliveries for `name`
    pub async fn clear_deliveries(&self, name: &str) -> Result<bool> {
        self.mutate(name, |doc| doc.clear_deliveries(name)).await
    }

    /// Remove an agent's record entirely
    pub async fn remove_agent(&self, name: &str) -> Result<bool> {
        self.mutate(name, |doc| doc.remove_agent(name)).await
    }

    /// Replace the document with an empty one
    pub async fn reset(&self) -> Result<()> {
        let _turn = self.queue.lock().await;
        let bytes = CoordinationDocument::default().to_json_pretty()?;
        self.store.save(&bytes).await?;
        info!("Reset coordination document {}", self.store.key());
        Ok(())
    }

    /// SHA-256 hex fingerprint of the persisted document
    pub async fn content_hash(&self) -> Result<String> {
        Ok(self.fingerprinted_meta().await?.0)
    }

    /// Fingerprint and metadata taken from the same persisted bytes
    pub async fn fingerprinted_meta(&self) -> Result<(String, DocumentMeta)> {
        let _turn = self.queue.lock().await;
        let (document, bytes) = self.load_or_init().await?;
        Ok((fingerprint(&bytes), document.meta))
    }

    /// Current document and the exact bytes it was read from
    ///
    /// Must be called with the queue held.
    async fn load_or_init(&self) -> Result<(CoordinationDocument, Vec<u8>)> {
        match self.store.load().await? {
            Some(bytes) if !is_blank(&bytes) => {
                let document = CoordinationDocument::from_slice(&bytes)?;
                Ok((document, bytes))
            }
            _ => {
                let document = CoordinationDocument::default();
                let bytes = document.to_json_pretty()?;
                self.store.save(&bytes).await?;
                info!("Initialized coordination document {}", self.store.key());
                Ok((document, bytes))
            }
        }
    }

    /// Revision currently persisted, `None` if the store is empty
    async fn persisted_revision(&self) -> Result<Option<u64>> {
        match self.store.load().await? {
            Some(bytes) if !is_blank(&bytes) => {
                let probe: RevisionProbe = serde_json::from_slice(&bytes)?;
                Ok(Some(probe.meta.revision))
            }
            _ => Ok(None),
        }
    }

    /// Run one read-modify-write as a single queued unit
    async fn mutate<T, F>(&self, actor: &str, mut transform: F) -> Result<T>
    where
        F: FnMut(&mut CoordinationDocument) -> T,
    {
        let _turn = self.queue.lock().await;
        let mut conflicts = 0;

        loop {
            let (mut document, _) = self.load_or_init().await?;
            let base_revision = document.meta.revision;

            let output = transform(&mut document);
            document.stamp(actor, Utc::now())?;

            match self.persisted_revision().await? {
                Some(current) if current != base_revision => {
                    conflicts += 1;
                    if conflicts > self.max_conflict_retries {
                        return Err(CommsError::Conflict {
                            retries: self.max_conflict_retries,
                        });
                    }
                    warn!(
                        "Revision moved from {} to {} during update by {}, retrying ({}/{})",
                        base_revision, current, actor, conflicts, self.max_conflict_retries
                    );
                    continue;
                }
                _ => {}
            }

            let bytes = document.to_json_pretty()?;
            self.store.save(&bytes).await?;
            debug!("Persisted revision {} by {}", document.meta.revision, actor);
            return Ok(output);
        }
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_whitespace())
}

fn fingerprint(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn log_completion(completer: &str, requester: &str, outcome: &CompletionOutcome) {
    if outcome.matched {
        debug!("{} completed a request for {}", completer, requester);
    } else {
        warn!(
            "{} delivered to {} without a matching pending request",
            completer, requester
        );
    }
}
