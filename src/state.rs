//! AppState (§2, §10.5): the process-wide aggregate of Session Store, Timer
//! Service, Pacer, LLM Client, optional profile provider, and resolved
//! config, shared behind `Arc` across every connection.

use std::sync::Arc;

use crate::channel::ChannelRegistry;
use crate::config::AppConfig;
use crate::llm::LlmClient;
use crate::orchestrator::Orchestrator;
use crate::pacer::Pacer;
use crate::profile::ProfileProvider;
use crate::session::SessionStore;
use crate::timer::TimerService;

pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub timers: Arc<TimerService>,
    pub pacer: Arc<Pacer>,
    pub channels: Arc<ChannelRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>, profile: Arc<dyn ProfileProvider>) -> Arc<Self> {
        let sessions = Arc::new(SessionStore::new());
        let timers = Arc::new(TimerService::new());
        let pacer = Arc::new(Pacer::new(sessions.clone()));
        let channels = Arc::new(ChannelRegistry::new());
        let orchestrator = Orchestrator::new(
            sessions.clone(),
            timers.clone(),
            pacer.clone(),
            llm,
            profile,
            channels.clone(),
        );

        Arc::new(Self {
            sessions,
            timers,
            pacer,
            channels,
            orchestrator,
            config,
        })
    }

    /// `aiEnabled` for the health endpoint (§6).
    pub fn ai_enabled(&self) -> bool {
        self.config.llm.is_enabled()
    }

    /// `activeUsers` for the health endpoint (§6).
    pub async fn active_users(&self) -> usize {
        self.sessions.active_count().await
    }
}
