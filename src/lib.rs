//! AgentComm - File-Based Coordination for Cooperating Agents
//!
//! Several named agents, in one process or many, coordinate through a single
//! shared JSON document:
//! - Each agent publishes its mission and current task
//! - Agents send text requests to each other
//! - Completing a request removes it and hands the result back as a delivery
//!
//! # Architecture
//!
//! - **Types**: The document model and its pure transforms
//! - **Storage**: Backing media (file on disk, in-process memory)
//! - **Communications**: Serialized read-modify-write over a store
//! - **Coordinator**: Agent lifecycle and registry
//! - **Agent**: Per-agent protocol client
//! - **Watcher**: Background change notifications
//!
//! # Example
//!
//! ```ignore
//! use agentcomm_core::{CommunicationsFile, Coordinator, TaskAgent};
//!
//! #[tokio::main]
//! async fn main() -> agentcomm_core::Result<()> {
//!     let coordinator = Coordinator::new(CommunicationsFile::open("communications.json"));
//!     coordinator.start().await?;
//!
//!     let researcher = coordinator.create_agent(TaskAgent::new, "researcher").await?;
//!     let coder = coordinator.create_agent(TaskAgent::new, "coder").await?;
//!
//!     researcher.request("coder", "Implement auth API").await?;
//!     for req in coder.get_pending_requests().await? {
//!         coder.complete_request(&req.from_agent, &req.request, "Done").await?;
//!     }
//!
//!     println!("{:?}", researcher.get_my_deliveries().await?);
//!     coordinator.stop().await
//! }
//! ```

pub mod agent;
pub mod communications;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod storage;
pub mod types;
pub mod watcher;

pub use agent::TaskAgent;
pub use communications::CommunicationsFile;
pub use config::{CommsConfig, CommunicationsSettings, WatcherSettings};
pub use coordinator::{Agent, AgentContext, Coordinator, CoordinatorState};
pub use error::{CommsError, Result};
pub use storage::{DocumentStore, FileStore, MemoryStore};
pub use types::{
    AgentRecord, AgentStatus, CompletionOutcome, CoordinationDocument, Delivery,
    DeliverySummary, DocumentMeta, PendingRequest, RequestId, StatusUpdate,
};
pub use watcher::{ChangeEvent, FileWatcher};
