//! Background Change Watcher
//!
//! Long-running task that polls the coordination document's fingerprint and
//! broadcasts a [`ChangeEvent`] whenever it changes, including changes made
//! by other processes.
//!
//! # Design
//!
//! - The first poll only records a baseline
//! - Poll failures are logged and retried on the next tick
//! - Subscribers that fall behind skip missed events (broadcast semantics)
//! - Gracefully shuts down on [`FileWatcher::stop`]

use crate::communications::CommunicationsFile;
use crate::error::{CommsError, Result};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Notification that the shared document changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Agent recorded as the last writer, if any
    pub updated_by: Option<String>,

    /// Revision after the change
    pub revision: u64,

    /// Fingerprint after the change
    pub hash: String,
}

impl ChangeEvent {
    /// True if the change was not written by `agent`
    pub fn is_foreign(&self, agent: &str) -> bool {
        self.updated_by.as_deref() != Some(agent)
    }
}

/// Watcher handle for controlling the background task
pub struct FileWatcher {
    /// Event fan-out
    events: broadcast::Sender<ChangeEvent>,

    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,

    /// Task handle
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl FileWatcher {
    /// Create and spawn a new watcher task
    ///
    /// # Arguments
    ///
    /// * `comms` - Document to watch
    /// * `poll_interval` - Time between fingerprint checks
    /// * `capacity` - Events buffered per subscriber
    pub fn spawn(comms: CommunicationsFile, poll_interval: Duration, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let sender = events.clone();
        let task_handle = tokio::spawn(async move {
            run_watch_loop(comms, poll_interval, sender, shutdown_rx).await;
        });

        Self {
            events,
            shutdown_tx,
            task_handle: Some(task_handle),
        }
    }

    /// Receive future change events
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Sender side, for handing out to agents
    pub fn sender(&self) -> broadcast::Sender<ChangeEvent> {
        self.events.clone()
    }

    /// Stop the watcher task gracefully
    pub async fn stop(&mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| CommsError::Other(format!("Failed to stop watcher task: {}", e)))?;
        }

        tracing::info!("Watcher stopped");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn abort_task(&self) {
        if let Some(handle) = &self.task_handle {
            handle.abort();
        }
    }

    /// Check if task is running
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Run the polling loop until shutdown
async fn run_watch_loop(
    comms: CommunicationsFile,
    poll_interval: Duration,
    events: broadcast::Sender<ChangeEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut timer = interval(poll_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_hash: Option<String> = None;

    tracing::info!("Watching {} every {:?}", comms.store_key(), poll_interval);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match poll_once(&comms, last_hash.as_deref()).await {
                    Ok((hash, Some(event))) => {
                        tracing::debug!(
                            "Document changed (revision {}, by {:?})",
                            event.revision,
                            event.updated_by
                        );
                        // No receivers is fine; agents subscribe lazily
                        let _ = events.send(event);
                        last_hash = Some(hash);
                    }
                    Ok((hash, None)) => {
                        last_hash = Some(hash);
                    }
                    Err(e) => {
                        tracing::warn!("Watcher poll failed: {}", e);
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                tracing::debug!("Watcher received shutdown signal");
                break;
            }
        }
    }
}

/// Fingerprint the document, producing an event if it differs from `last_hash`
async fn poll_once(
    comms: &CommunicationsFile,
    last_hash: Option<&str>,
) -> Result<(String, Option<ChangeEvent>)> {
    let (hash, meta) = comms.fingerprinted_meta().await?;

    match last_hash {
        None => Ok((hash, None)),
        Some(previous) if previous == hash => Ok((hash, None)),
        Some(_) => {
            let event = ChangeEvent {
                updated_by: meta.last_updated_by,
                revision: meta.revision,
                hash: hash.clone(),
            };
            Ok((hash, Some(event)))
        }
    }
}
