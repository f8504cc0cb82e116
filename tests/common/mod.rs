//! Common test utilities and helpers

#![allow(dead_code)]

use agentcomm_core::{CommunicationsFile, Coordinator, WatcherSettings};
use std::path::PathBuf;
use tempfile::TempDir;

/// Temporary directory holding a not-yet-created coordination document
pub struct TestWorkspace {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("communications.json");
        Self { dir, path }
    }

    /// Fresh handle on the workspace document
    pub fn open(&self) -> CommunicationsFile {
        CommunicationsFile::open(&self.path)
    }

    /// Started coordinator without a background watcher
    pub async fn started_coordinator(&self) -> Coordinator {
        let settings = WatcherSettings {
            enabled: false,
            ..Default::default()
        };
        let coordinator = Coordinator::with_watcher(self.open(), settings);
        coordinator
            .start()
            .await
            .expect("Failed to start coordinator");
        coordinator
    }

    /// Persisted document as generic JSON
    pub fn raw_json(&self) -> serde_json::Value {
        let bytes = std::fs::read(&self.path).expect("Failed to read document");
        serde_json::from_slice(&bytes).expect("Document is not JSON")
    }

    /// Overwrite the document with arbitrary bytes
    pub fn write_raw(&self, contents: &str) {
        std::fs::write(&self.path, contents).expect("Failed to write document");
    }
}
