//! Core data types for the coordination document
//!
//! This module defines the persisted document shared by all agents, the
//! per-agent record, and the request/delivery entries exchanged between
//! agents. The in-memory shapes differ from the persisted layout in one
//! place: deliveries are stored as `added: [[fromAgent, description], ...]`
//! pairs, with completion times kept in a parallel `addedAt` list.

use crate::error::{CommsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Schema version written into every new document
pub const SCHEMA_VERSION: &str = "1.0";

/// Top-level key holding document metadata; cannot be used as an agent name
pub const META_KEY: &str = "meta";

/// Unique identifier for pending requests
///
/// Assigned at creation time. Older documents may carry requests without
/// an id; those can only be completed by text match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Create a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a request ID from a string
    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    /// Schema version, always [`SCHEMA_VERSION`]
    pub version: String,

    /// Incremented on every persisted mutation
    #[serde(default)]
    pub revision: u64,

    /// Time of the last persisted mutation
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub last_updated: Option<DateTime<Utc>>,

    /// Agent that performed the last persisted mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_by: Option<String>,
}

impl Default for DocumentMeta {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            revision: 0,
            last_updated: None,
            last_updated_by: None,
        }
    }
}

/// Self-reported status of an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Overall goal
    #[serde(default)]
    pub mission: String,

    /// Current task
    #[serde(default)]
    pub working_on: String,

    /// Most recently completed work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<String>,

    /// Planned next step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Partial status update
///
/// Fields left as `None` keep their current value. A fresh record starts
/// from empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub mission: Option<String>,
    pub working_on: Option<String>,
    pub done: Option<String>,
    pub next: Option<String>,
}

impl StatusUpdate {
    /// Full mission/working-on update
    pub fn new(mission: impl Into<String>, working_on: impl Into<String>) -> Self {
        Self {
            mission: Some(mission.into()),
            working_on: Some(working_on.into()),
            ..Default::default()
        }
    }

    pub fn with_done(mut self, done: impl Into<String>) -> Self {
        self.done = Some(done.into());
        self
    }

    /// True when no field would change
    pub fn is_empty(&self) -> bool {
        self.mission.is_none()
            && self.working_on.is_none()
            && self.done.is_none()
            && self.next.is_none()
    }

    /// Merge this update over an existing status, stamping `updated_at`
    pub fn apply(self, existing: Option<AgentStatus>, now: DateTime<Utc>) -> AgentStatus {
        let mut status = existing.unwrap_or_else(|| AgentStatus {
            mission: String::new(),
            working_on: String::new(),
            done: None,
            next: None,
            updated_at: now,
        });

        if let Some(mission) = self.mission {
            status.mission = mission;
        }
        if let Some(working_on) = self.working_on {
            status.working_on = working_on;
        }
        if self.done.is_some() {
            status.done = self.done;
        }
        if self.next.is_some() {
            status.next = self.next;
        }
        status.updated_at = now;
        status
    }
}

/// A unit of work one agent asked another to perform
///
/// Stored on the target agent's record; `from_agent` names the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    pub from_agent: String,

    pub request: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn new(from_agent: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            id: Some(RequestId::new()),
            from_agent: from_agent.into(),
            request: request.into(),
            created_at: Utc::now(),
        }
    }

    /// Text-identity match used by legacy completion
    pub fn matches(&self, from_agent: &str, request: &str) -> bool {
        self.from_agent == from_agent && self.request == request
    }
}

/// Completion record appended to the requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub from_agent: String,
    pub description: String,
    /// `None` for deliveries read from documents without `addedAt`
    pub completed_at: Option<DateTime<Utc>>,
}

/// Caller-facing projection of a [`Delivery`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySummary {
    pub from_agent: String,
    pub description: String,
}

impl From<&Delivery> for DeliverySummary {
    fn from(delivery: &Delivery) -> Self {
        Self {
            from_agent: delivery.from_agent.clone(),
            description: delivery.description.clone(),
        }
    }
}

/// Result of completing a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    /// Whether a pending request was found and removed
    pub matched: bool,

    /// Id of the removed request, when it had one
    pub request_id: Option<RequestId>,
}

/// Everything the document holds for one agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AgentRecordWire", into = "AgentRecordWire")]
pub struct AgentRecord {
    pub status: Option<AgentStatus>,
    pub requests: Vec<PendingRequest>,
    pub deliveries: Vec<Delivery>,
}

impl AgentRecord {
    /// Simplified deliveries in arrival order
    pub fn delivery_summaries(&self) -> Vec<DeliverySummary> {
        self.deliveries.iter().map(DeliverySummary::from).collect()
    }
}

/// Persisted shape of [`AgentRecord`]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentRecordWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<AgentStatus>,

    #[serde(default)]
    requests: Vec<PendingRequest>,

    #[serde(default)]
    added: Vec<Vec<String>>,

    /// Epoch-ms per `added` entry, 0 where unknown
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    added_at: Vec<i64>,
}

impl TryFrom<AgentRecordWire> for AgentRecord {
    type Error = String;

    fn try_from(wire: AgentRecordWire) -> std::result::Result<Self, Self::Error> {
        let mut deliveries = Vec::with_capacity(wire.added.len());

        for (index, entry) in wire.added.into_iter().enumerate() {
            let mut fields = entry.into_iter();
            let (Some(from_agent), Some(description)) = (fields.next(), fields.next()) else {
                return Err(format!(
                    "added[{}] must be a [fromAgent, description] pair",
                    index
                ));
            };

            let completed_at = wire
                .added_at
                .get(index)
                .filter(|ms| **ms > 0)
                .and_then(|ms| DateTime::from_timestamp_millis(*ms));

            deliveries.push(Delivery {
                from_agent,
                description,
                completed_at,
            });
        }

        Ok(Self {
            status: wire.status,
            requests: wire.requests,
            deliveries,
        })
    }
}

impl From<AgentRecord> for AgentRecordWire {
    fn from(record: AgentRecord) -> Self {
        let added_at = if record.deliveries.iter().any(|d| d.completed_at.is_some()) {
            record
                .deliveries
                .iter()
                .map(|d| d.completed_at.map_or(0, |t| t.timestamp_millis()))
                .collect()
        } else {
            Vec::new()
        };

        Self {
            status: record.status,
            requests: record.requests,
            added: record
                .deliveries
                .into_iter()
                .map(|d| vec![d.from_agent, d.description])
                .collect(),
            added_at,
        }
    }
}

/// Root of the shared coordination document
///
/// Persisted with agents flattened next to `meta`:
/// `{"meta": {...}, "<agentName>": {...}, ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationDocument {
    pub meta: DocumentMeta,

    #[serde(flatten)]
    pub agents: BTreeMap<String, AgentRecord>,
}

impl Default for CoordinationDocument {
    fn default() -> Self {
        Self {
            meta: DocumentMeta::default(),
            agents: BTreeMap::new(),
        }
    }
}

impl CoordinationDocument {
    /// Parse a persisted document, rejecting unknown schema versions
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let document: CoordinationDocument = serde_json::from_slice(bytes)?;
        if document.meta.version != SCHEMA_VERSION {
            return Err(CommsError::Parse(format!(
                "unsupported schema version {:?} (expected {:?})",
                document.meta.version, SCHEMA_VERSION
            )));
        }
        Ok(document)
    }

    /// Serialize for persistence
    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Record for `name`, created empty if missing
    pub fn record_mut(&mut self, name: &str) -> &mut AgentRecord {
        self.agents.entry(name.to_string()).or_default()
    }

    /// Bump the revision and record who wrote last
    pub fn stamp(&mut self, updated_by: &str, now: DateTime<Utc>) -> Result<()> {
        self.meta.revision = self
            .meta
            .revision
            .checked_add(1)
            .ok_or_else(|| CommsError::Parse("revision overflow".to_string()))?;
        self.meta.last_updated = Some(now);
        self.meta.last_updated_by = Some(updated_by.to_string());
        Ok(())
    }

    pub fn set_status(&mut self, name: &str, update: StatusUpdate, now: DateTime<Utc>) {
        let record = self.record_mut(name);
        record.status = Some(update.apply(record.status.take(), now));
    }

    /// Append a request to the target's queue, returning its id
    pub fn push_request(&mut self, from_agent: &str, to_agent: &str, text: &str) -> RequestId {
        let request = PendingRequest::new(from_agent, text);
        let id = request.id.unwrap_or_default();
        self.record_mut(to_agent).requests.push(request);
        id
    }

    /// Pending requests addressed to `name`, oldest first
    pub fn requests_for(&self, name: &str) -> Vec<PendingRequest> {
        self.agents
            .get(name)
            .map(|record| record.requests.clone())
            .unwrap_or_default()
    }

    /// Remove the oldest request on the completer matching `(requester, text)`
    /// and append a delivery to the requester whether or not one matched
    pub fn complete_by_text(
        &mut self,
        completer: &str,
        requester: &str,
        text: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> CompletionOutcome {
        let removed = self.take_request(completer, |r| r.matches(requester, text));
        self.deliver(completer, requester, description, now);
        outcome(removed)
    }

    /// Like [`complete_by_text`](Self::complete_by_text) but matching on id
    pub fn complete_by_id(
        &mut self,
        completer: &str,
        requester: &str,
        id: RequestId,
        description: &str,
        now: DateTime<Utc>,
    ) -> CompletionOutcome {
        let removed = self.take_request(completer, |r| {
            r.id == Some(id) && r.from_agent == requester
        });
        self.deliver(completer, requester, description, now);
        outcome(removed)
    }

    /// Withdraw a request without producing a delivery
    pub fn remove_request(&mut self, from_agent: &str, to_agent: &str, text: &str) -> bool {
        self.take_request(to_agent, |r| r.matches(from_agent, text))
            .is_some()
    }

    /// Drop all deliveries for `name`; false if the agent has no record
    pub fn clear_deliveries(&mut self, name: &str) -> bool {
        match self.agents.get_mut(name) {
            Some(record) => {
                record.deliveries.clear();
                true
            }
            None => false,
        }
    }

    pub fn remove_agent(&mut self, name: &str) -> bool {
        self.agents.remove(name).is_some()
    }

    fn take_request<F>(&mut self, owner: &str, predicate: F) -> Option<PendingRequest>
    where
        F: Fn(&PendingRequest) -> bool,
    {
        let record = self.agents.get_mut(owner)?;
        let index = record.requests.iter().position(predicate)?;
        Some(record.requests.remove(index))
    }

    fn deliver(&mut self, completer: &str, requester: &str, description: &str, now: DateTime<Utc>) {
        self.record_mut(requester).deliveries.push(Delivery {
            from_agent: completer.to_string(),
            description: description.to_string(),
            completed_at: Some(now),
        });
    }
}

fn outcome(removed: Option<PendingRequest>) -> CompletionOutcome {
    CompletionOutcome {
        matched: removed.is_some(),
        request_id: removed.and_then(|r| r.id),
    }
}

/// Reject names that cannot be used as document keys
pub fn validate_agent_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name == META_KEY {
        return Err(CommsError::InvalidAgentName(name.to_string()));
    }
    Ok(())
}
