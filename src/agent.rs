//! Task Agent
//!
//! Protocol client used by or on behalf of one named agent. All traffic goes
//! through the shared document; there is no direct channel between agents.

use crate::communications::CommunicationsFile;
use crate::coordinator::{Agent, AgentContext};
use crate::error::Result;
use crate::types::{
    AgentRecord, AgentStatus, CompletionOutcome, DeliverySummary, PendingRequest, RequestId,
    StatusUpdate,
};
use crate::watcher::ChangeEvent;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::info;

/// Agent that sends, receives and completes requests
#[derive(Debug)]
pub struct TaskAgent {
    name: String,
    comms: CommunicationsFile,
    events: RwLock<Option<broadcast::Sender<ChangeEvent>>>,
}

impl TaskAgent {
    /// Bind an agent to its coordinator context
    pub fn new(context: AgentContext) -> Self {
        Self {
            name: context.name,
            comms: context.comms,
            events: RwLock::new(context.events),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask `target` to do `request`
    ///
    /// Returns once the request is persisted. The outcome arrives later
    /// through [`get_my_deliveries`](Self::get_my_deliveries).
    pub async fn request(&self, target: &str, request: &str) -> Result<RequestId> {
        let id = self.comms.add_request(&self.name, target, request).await?;
        info!("[{}] Sent request to {}: {}", self.name, target, request);
        Ok(id)
    }

    /// Requests addressed to this agent, oldest first; does not consume them
    pub async fn get_pending_requests(&self) -> Result<Vec<PendingRequest>> {
        self.comms.get_requests_for_agent(&self.name).await
    }

    /// Complete `request` from `requester`, delivering `result` to them
    pub async fn complete_request(
        &self,
        requester: &str,
        request: &str,
        result: &str,
    ) -> Result<CompletionOutcome> {
        let outcome = self
            .comms
            .complete_request(&self.name, requester, request, result)
            .await?;
        info!("[{}] Completed request for {}: {}", self.name, requester, result);
        Ok(outcome)
    }

    /// Complete the request with id `id` from `requester`
    pub async fn complete_request_by_id(
        &self,
        requester: &str,
        id: RequestId,
        result: &str,
    ) -> Result<CompletionOutcome> {
        let outcome = self
            .comms
            .complete_request_by_id(&self.name, requester, id, result)
            .await?;
        info!("[{}] Completed request {} for {}", self.name, id, requester);
        Ok(outcome)
    }

    /// Deliveries received so far, in arrival order
    pub async fn get_my_deliveries(&self) -> Result<Vec<DeliverySummary>> {
        Ok(self
            .comms
            .get_agent(&self.name)
            .await?
            .map(|record| record.delivery_summaries())
            .unwrap_or_default())
    }

    /// Clear deliveries after processing them
    pub async fn acknowledge_deliveries(&self) -> Result<()> {
        self.comms.clear_deliveries(&self.name).await?;
        Ok(())
    }

    /// Withdraw a request this agent sent to `target`
    pub async fn withdraw_request(&self, target: &str, request: &str) -> Result<bool> {
        self.comms.remove_request(&self.name, target, request).await
    }

    /// Publish mission and current task
    pub async fn report_status(&self, mission: &str, working_on: &str) -> Result<AgentStatus> {
        self.update_status(StatusUpdate::new(mission, working_on)).await
    }

    /// Publish any subset of status fields
    pub async fn update_status(&self, update: StatusUpdate) -> Result<AgentStatus> {
        self.comms.update_agent(&self.name, update).await
    }

    /// Persisted records of every agent except this one
    pub async fn other_agents(&self) -> Result<BTreeMap<String, AgentRecord>> {
        let mut agents = self.comms.list_agents().await?;
        agents.remove(&self.name);
        Ok(agents)
    }

    /// Status another agent last published
    pub async fn agent_status(&self, name: &str) -> Result<Option<AgentStatus>> {
        Ok(self
            .comms
            .get_agent(name)
            .await?
            .and_then(|record| record.status))
    }

    /// Change notifications; `None` without a watcher or after shutdown
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }
}

impl Agent for TaskAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn shutdown(&self) {
        self.events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}
