//! Agent Coordinator
//!
//! Lifecycle registry for the agents of one process, bound to a single
//! shared [`CommunicationsFile`].
//!
//! # Lifecycle
//!
//! `Created -> Started -> Stopped`. Agents can only be created while
//! started; a stopped coordinator cannot be started again.

use crate::communications::CommunicationsFile;
use crate::config::{CommsConfig, WatcherSettings};
use crate::error::{CommsError, Result};
use crate::types::{validate_agent_name, AgentRecord};
use crate::watcher::{ChangeEvent, FileWatcher};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

/// Coordinator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Created,
    Started,
    Stopped,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorState::Created => write!(f, "Created"),
            CoordinatorState::Started => write!(f, "Started"),
            CoordinatorState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Everything an agent is bound to at creation time
#[derive(Debug, Clone)]
pub struct AgentContext {
    /// Unique name, also the agent's key in the shared document
    pub name: String,

    /// Shared document handle
    pub comms: CommunicationsFile,

    /// Change notifications, when the coordinator runs a watcher
    pub events: Option<broadcast::Sender<ChangeEvent>>,
}

/// A participant registered with a [`Coordinator`]
pub trait Agent: Send + Sync + 'static {
    /// Name the agent was registered under
    fn name(&self) -> &str;

    /// Release per-agent resources; called once by [`Coordinator::stop`]
    fn shutdown(&self) {}
}

struct RegisteredAgent {
    agent: Arc<dyn Agent>,
    concrete: Arc<dyn Any + Send + Sync>,
}

struct CoordinatorInner {
    state: CoordinatorState,
    agents: HashMap<String, RegisteredAgent>,
    watcher: Option<FileWatcher>,
}

/// Central coordinator that manages agent lifecycles
pub struct Coordinator {
    comms: CommunicationsFile,
    watcher_settings: WatcherSettings,
    inner: Mutex<CoordinatorInner>,
}

impl Coordinator {
    /// Coordinator over `comms` with default watcher settings
    pub fn new(comms: CommunicationsFile) -> Self {
        Self::with_watcher(comms, WatcherSettings::default())
    }

    pub fn with_watcher(comms: CommunicationsFile, watcher_settings: WatcherSettings) -> Self {
        Self {
            comms,
            watcher_settings,
            inner: Mutex::new(CoordinatorInner {
                state: CoordinatorState::Created,
                agents: HashMap::new(),
                watcher: None,
            }),
        }
    }

    pub fn from_config(config: &CommsConfig) -> Self {
        Self::with_watcher(
            CommunicationsFile::from_config(config),
            config.watcher.clone(),
        )
    }

    /// Shared document handle
    pub fn comms(&self) -> &CommunicationsFile {
        &self.comms
    }

    pub async fn state(&self) -> CoordinatorState {
        self.inner.lock().await.state
    }

    /// Establish the backing document and begin accepting agents
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CoordinatorState::Started => return Ok(()),
            CoordinatorState::Stopped => {
                return Err(CommsError::InvalidTransition {
                    from: CoordinatorState::Stopped.to_string(),
                    to: CoordinatorState::Started.to_string(),
                })
            }
            CoordinatorState::Created => {}
        }

        self.comms.read_raw().await?;

        if self.watcher_settings.enabled {
            inner.watcher = Some(FileWatcher::spawn(
                self.comms.clone(),
                self.watcher_settings.poll_interval(),
                self.watcher_settings.channel_capacity,
            ));
        }

        inner.state = CoordinatorState::Started;
        info!("Coordinator started on {}", self.comms.store_key());
        Ok(())
    }

    /// Stop the watcher, shut down every agent and close the registry
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == CoordinatorState::Stopped {
            return Ok(());
        }

        // Stopped even if the watcher fails to shut down cleanly
        inner.state = CoordinatorState::Stopped;
        let watcher = inner.watcher.take();

        for (name, registered) in inner.agents.drain() {
            debug!("Shutting down agent {}", name);
            registered.agent.shutdown();
        }

        if let Some(mut watcher) = watcher {
            watcher.stop().await?;
        }

        info!("Coordinator stopped");
        Ok(())
    }

    /// Build and register an agent named `name`
    ///
    /// ```ignore
    /// let coder = coordinator.create_agent(TaskAgent::new, "coder").await?;
    /// ```
    pub async fn create_agent<A, F>(&self, constructor: F, name: &str) -> Result<Arc<A>>
    where
        A: Agent,
        F: FnOnce(AgentContext) -> A,
    {
        let mut inner = self.inner.lock().await;

        if inner.state != CoordinatorState::Started {
            return Err(CommsError::NotStarted);
        }
        validate_agent_name(name)?;
        if inner.agents.contains_key(name) {
            return Err(CommsError::DuplicateAgent(name.to_string()));
        }

        let context = AgentContext {
            name: name.to_string(),
            comms: self.comms.clone(),
            events: inner.watcher.as_ref().map(FileWatcher::sender),
        };
        let agent = Arc::new(constructor(context));

        inner.agents.insert(
            name.to_string(),
            RegisteredAgent {
                agent: agent.clone(),
                concrete: agent.clone(),
            },
        );

        info!("Created agent {}", name);
        Ok(agent)
    }

    /// Registered agent by name
    pub async fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        let inner = self.inner.lock().await;
        inner.agents.get(name).map(|r| r.agent.clone())
    }

    /// Registered agent by name, if it has concrete type `A`
    pub async fn get_agent_as<A: Agent>(&self, name: &str) -> Option<Arc<A>> {
        let inner = self.inner.lock().await;
        let concrete = inner.agents.get(name)?.concrete.clone();
        concrete.downcast::<A>().ok()
    }

    /// Names of registered agents, sorted
    pub async fn agent_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Persisted state of every agent in the shared document
    pub async fn all_status(&self) -> Result<BTreeMap<String, AgentRecord>> {
        self.comms.list_agents().await
    }

    /// Change notifications, when the watcher is running
    pub async fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        let inner = self.inner.lock().await;
        inner.watcher.as_ref().map(FileWatcher::subscribe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::TaskAgent;
    use crate::types::StatusUpdate;

    fn quiet_coordinator() -> Coordinator {
        let settings = WatcherSettings {
            enabled: false,
            ..Default::default()
        };
        Coordinator::with_watcher(CommunicationsFile::in_memory(), settings)
    }

    struct Probe {
        name: String,
        stopped: std::sync::atomic::AtomicBool,
    }

    impl Agent for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn shutdown(&self) {
            self.stopped
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_create_requires_start() {
        let coordinator = quiet_coordinator();

        let err = coordinator
            .create_agent(TaskAgent::new, "coder")
            .await
            .unwrap_err();
        assert!(matches!(err, CommsError::NotStarted));
    }

    #[tokio::test]
    async fn test_lifecycle_checked_before_name() {
        let coordinator = quiet_coordinator();
        assert!(matches!(
            coordinator.create_agent(TaskAgent::new, "meta").await,
            Err(CommsError::NotStarted)
        ));

        coordinator.start().await.unwrap();
        assert!(matches!(
            coordinator.create_agent(TaskAgent::new, "meta").await,
            Err(CommsError::InvalidAgentName(_))
        ));
    }

    #[tokio::test]
    async fn test_start_initializes_document() {
        let coordinator = quiet_coordinator();
        coordinator.start().await.unwrap();

        assert_eq!(coordinator.state().await, CoordinatorState::Started);
        let doc = coordinator.comms().read_raw().await.unwrap();
        assert_eq!(doc.meta.version, "1.0");
    }

    #[tokio::test]
    async fn test_duplicate_agent_rejected() {
        let coordinator = quiet_coordinator();
        coordinator.start().await.unwrap();

        coordinator
            .create_agent(TaskAgent::new, "coder")
            .await
            .unwrap();
        let err = coordinator
            .create_agent(TaskAgent::new, "coder")
            .await
            .unwrap_err();
        assert!(matches!(err, CommsError::DuplicateAgent(name) if name == "coder"));

        // Names are case-sensitive
        coordinator
            .create_agent(TaskAgent::new, "Coder")
            .await
            .unwrap();
        assert_eq!(coordinator.agent_names().await, vec!["Coder", "coder"]);
    }

    #[tokio::test]
    async fn test_get_agent() {
        let coordinator = quiet_coordinator();
        coordinator.start().await.unwrap();
        coordinator
            .create_agent(TaskAgent::new, "coder")
            .await
            .unwrap();

        let agent = coordinator.get_agent("coder").await.unwrap();
        assert_eq!(agent.name(), "coder");
        assert!(coordinator.get_agent("missing").await.is_none());

        let typed = coordinator.get_agent_as::<TaskAgent>("coder").await.unwrap();
        assert_eq!(typed.name(), "coder");
    }

    #[tokio::test]
    async fn test_registry_is_separate_from_document() {
        let coordinator = quiet_coordinator();
        coordinator.start().await.unwrap();
        let coder = coordinator
            .create_agent(TaskAgent::new, "coder")
            .await
            .unwrap();

        // Registered but never written
        assert!(coordinator.comms().get_agent("coder").await.unwrap().is_none());

        coder.report_status("ship", "tests").await.unwrap();
        let status = coordinator.all_status().await.unwrap();
        assert_eq!(status["coder"].status.as_ref().unwrap().mission, "ship");

        // Written but never registered
        coordinator
            .comms()
            .update_agent("external", StatusUpdate::new("m", "w"))
            .await
            .unwrap();
        assert!(coordinator.get_agent("external").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_shuts_down_agents() {
        let coordinator = quiet_coordinator();
        coordinator.start().await.unwrap();

        let probe = coordinator
            .create_agent(
                |ctx| Probe {
                    name: ctx.name,
                    stopped: Default::default(),
                },
                "probe",
            )
            .await
            .unwrap();

        coordinator.stop().await.unwrap();

        assert!(probe.stopped.load(std::sync::atomic::Ordering::SeqCst));
        assert!(coordinator.get_agent("probe").await.is_none());
        assert!(matches!(
            coordinator.create_agent(TaskAgent::new, "late").await,
            Err(CommsError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_cannot_restart() {
        let coordinator = quiet_coordinator();
        coordinator.start().await.unwrap();
        coordinator.start().await.unwrap();
        coordinator.stop().await.unwrap();
        coordinator.stop().await.unwrap();

        assert!(matches!(
            coordinator.start().await,
            Err(CommsError::InvalidTransition { .. })
        ));
        assert_eq!(coordinator.state().await, CoordinatorState::Stopped);
    }

    #[tokio::test]
    async fn test_watcher_follows_lifecycle() {
        let settings = WatcherSettings {
            enabled: true,
            poll_interval_ms: 10,
            channel_capacity: 8,
        };
        let coordinator = Coordinator::with_watcher(CommunicationsFile::in_memory(), settings);

        assert!(coordinator.subscribe().await.is_none());
        coordinator.start().await.unwrap();
        assert!(coordinator.subscribe().await.is_some());

        coordinator.stop().await.unwrap();
        assert!(coordinator.subscribe().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_completes_when_watcher_fails() {
        let settings = WatcherSettings {
            enabled: true,
            poll_interval_ms: 10,
            channel_capacity: 8,
        };
        let coordinator = Coordinator::with_watcher(CommunicationsFile::in_memory(), settings);
        coordinator.start().await.unwrap();
        coordinator
            .create_agent(TaskAgent::new, "coder")
            .await
            .unwrap();

        // A cancelled watcher task makes its shutdown report an error
        coordinator
            .inner
            .lock()
            .await
            .watcher
            .as_ref()
            .unwrap()
            .abort_task();

        assert!(matches!(coordinator.stop().await, Err(CommsError::Other(_))));
        assert_eq!(coordinator.state().await, CoordinatorState::Stopped);
        assert!(coordinator.get_agent("coder").await.is_none());
        assert!(coordinator.subscribe().await.is_none());

        // Already stopped
        coordinator.stop().await.unwrap();
    }
}
