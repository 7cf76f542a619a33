//! Orchestrator (§4.5): the per-connection state machine tying Session Store,
//! Timer Service, Pacer, and LLM Client together. Consumes the five client
//! events and drives every sub-flow (InterruptFlow, GroupDelayFlow,
//! RegenerateNow) and the two Pacer callbacks.
//!
//! Each connection's session is guarded by its own mutex (§5); this struct
//! holds no per-connection state of its own beyond the shared registries, so
//! handling one user's event never blocks another's.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelRegistry};
use crate::error::OrchestratorError;
use crate::llm::LlmClient;
use crate::pacer::{DeliveryChannel, Pacer, PacerCallbacks};
use crate::profile::ProfileProvider;
use crate::session::{ConnectionId, Role, SessionStore};
use crate::timer::{TimerName, TimerService};

pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    timers: Arc<TimerService>,
    pacer: Arc<Pacer>,
    llm: Arc<dyn LlmClient>,
    profile: Arc<dyn ProfileProvider>,
    channels: Arc<ChannelRegistry>,
    self_ref: OnceCell<std::sync::Weak<Orchestrator>>,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        timers: Arc<TimerService>,
        pacer: Arc<Pacer>,
        llm: Arc<dyn LlmClient>,
        profile: Arc<dyn ProfileProvider>,
        channels: Arc<ChannelRegistry>,
    ) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            sessions,
            timers,
            pacer,
            llm,
            profile,
            channels,
            self_ref: OnceCell::new(),
        });
        let _ = orchestrator.self_ref.set(Arc::downgrade(&orchestrator));
        orchestrator
    }

    /// An owned handle to self, for capturing in spawned timer/pacer
    /// callbacks that must outlive the call that scheduled them.
    fn arc_self(&self) -> Arc<Orchestrator> {
        self.self_ref
            .get()
            .and_then(std::sync::Weak::upgrade)
            .expect("orchestrator constructed via Orchestrator::new")
    }

    // ------------------------------------------------------------------
    // Client events (§4.5)
    // ------------------------------------------------------------------

    /// `UserMessage(text)`.
    pub async fn user_message(&self, id: ConnectionId, text: String) {
        let timestamp = chrono::Utc::now();
        if let Some(channel) = self.channels.get(id).await {
            channel
                .send_message_received(&uuid::Uuid::new_v4().to_string(), &text, timestamp)
                .await;
        }

        let buffer_complete = {
            let handle = self.sessions.get_or_create(id).await;
            let mut session = handle.lock().await;
            session.append(Role::User, text);
            session.end_update.user_messaged_since_last_end_update = true;
            session.typing.is_typing = false;
            session.typing.should_use_idle_timer = false;
            session.end_update.timer_active = false;
            session.buffer.is_complete()
        };

        self.timers.cancel_typing_group(id);
        self.timers.cancel_end_update(id);

        if self.pacer.is_sending(id) && !buffer_complete {
            self.interrupt_flow(id).await;
        } else {
            self.regenerate_now(id).await;
        }
    }

    /// `TypingStatus(isTyping)`.
    pub async fn typing_status(&self, id: ConnectionId, is_typing: bool) {
        if is_typing {
            self.timers.cancel_typing_group(id);
            self.timers.cancel_group_delay(id);

            let end_update_was_active = {
                let handle = self.sessions.get_or_create(id).await;
                let mut session = handle.lock().await;
                session.typing.is_typing = true;
                session.typing.last_typing_time = Some(chrono::Utc::now());
                let was_active = session.end_update.timer_active;
                if was_active {
                    session.end_update.timer_active = false;
                    session.typing.should_use_idle_timer = true;
                }
                was_active
            };
            if end_update_was_active {
                self.timers.cancel_end_update(id);
            }

            let orchestrator = self.arc_self();
            self.timers.set(id, TimerName::MaxTyping, move || async move {
                orchestrator.on_max_typing_fire(id).await;
            });
        } else {
            self.timers.cancel(id, TimerName::TypingIdle);
            self.timers.cancel(id, TimerName::MaxTyping);

            let should_use_idle_timer = {
                let handle = self.sessions.get_or_create(id).await;
                let mut session = handle.lock().await;
                session.typing.is_typing = false;
                session.typing.last_typing_time = Some(chrono::Utc::now());
                session.typing.should_use_idle_timer
            };

            if should_use_idle_timer {
                let orchestrator = self.arc_self();
                self.timers.set(id, TimerName::TypingIdle, move || async move {
                    orchestrator.on_typing_idle_fire(id).await;
                });
            }
        }
    }

    /// `Stop`.
    pub async fn stop(&self, id: ConnectionId) {
        self.timers.cancel_all(id);
        self.pacer.stop(id);
        {
            let handle = self.sessions.get_or_create(id).await;
            handle.lock().await.buffer.mark_complete();
        }
        if let Some(channel) = self.channels.get(id).await {
            channel.send_ai_complete().await;
        }
    }

    /// `EndChat`: Stop, then Cleanup.
    pub async fn end_chat(&self, id: ConnectionId) {
        self.stop(id).await;
        self.cleanup(id).await;
    }

    /// `Disconnect`: Cleanup only (no `ai_complete`, unlike EndChat's Stop).
    pub async fn disconnect(&self, id: ConnectionId) {
        self.cleanup(id).await;
    }

    async fn cleanup(&self, id: ConnectionId) {
        self.timers.cleanup(id);
        self.pacer.cleanup(id);
        self.sessions.clear(&id).await;
        self.channels.remove(id).await;
    }

    // ------------------------------------------------------------------
    // Sub-flows (§4.5)
    // ------------------------------------------------------------------

    async fn interrupt_flow(&self, id: ConnectionId) {
        info!(connection = %id, "buffer sending; running relevance check");

        let (recent_history, sent_blocks, pending_blocks) = {
            let handle = self.sessions.get_or_create(id).await;
            let session = handle.lock().await;
            (
                session.history_tail(Some(20)),
                session.buffer.blocks_before_cursor().to_vec(),
                session.buffer.blocks_from_cursor().to_vec(),
            )
        };

        let relevant = self
            .llm
            .relevance_check(&recent_history, &sent_blocks, &pending_blocks)
            .await;

        if !relevant {
            let handle = self.sessions.get_or_create(id).await;
            let mut session = handle.lock().await;
            session.update_check.needs_update = false;
            session.update_check.last_check_time = Some(chrono::Utc::now());
            return;
        }

        let group_complete_now = {
            let handle = self.sessions.get_or_create(id).await;
            let mut session = handle.lock().await;
            session.update_check.needs_update = true;
            session.update_check.last_check_time = Some(chrono::Utc::now());
            session.buffer.is_current_group_complete()
        };

        if group_complete_now {
            self.pacer.stop(id);
            self.group_delay_flow(id).await;
        } else {
            let handle = self.sessions.get_or_create(id).await;
            handle.lock().await.update_check.waiting_for_group = true;
            // Pacer drains the current group; `on_group_complete` below clears
            // `waiting_for_group` and starts GroupDelayFlow itself.
        }
    }

    async fn group_delay_flow(&self, id: ConnectionId) {
        let orchestrator = self.arc_self();
        self.timers.set(id, TimerName::GroupDelay, move || async move {
            orchestrator.on_group_delay_fire(id).await;
        });
    }

    async fn on_group_delay_fire(&self, id: ConnectionId) {
        // `should_use_idle_timer` gates both branches below: setting it here
        // is what lets the shared `on_typing_idle_fire` callback recognize a
        // flow-initiated idle timer regardless of which caller started it.
        let is_typing = {
            let handle = self.sessions.get_or_create(id).await;
            let mut session = handle.lock().await;
            session.typing.should_use_idle_timer = true;
            session.typing.is_typing
        };

        if is_typing {
            return;
        }

        let orchestrator = self.arc_self();
        self.timers.set(id, TimerName::TypingIdle, move || async move {
            orchestrator.on_typing_idle_fire(id).await;
        });
    }

    async fn regenerate_now(&self, id: ConnectionId) {
        info!(connection = %id, "generating response");

        self.timers.cancel_all(id);
        self.pacer.stop(id);

        let (history, pending_blocks) = {
            let handle = self.sessions.get_or_create(id).await;
            let session = handle.lock().await;
            (session.history.clone(), session.buffer.blocks_from_cursor().to_vec())
        };

        let profile = self.profile.fetch(&id.to_string()).await;
        if profile.is_none() {
            debug!(connection = %id, "no profile context for this regeneration");
        }

        let blocks = match self.llm.generate_buffer(&history, &pending_blocks, profile.as_ref()).await {
            Ok(blocks) => blocks,
            Err(e) => {
                let err = OrchestratorError::LlmFailed(e);
                warn!(connection = %id, error = %err, "generate_buffer failed");
                {
                    let handle = self.sessions.get_or_create(id).await;
                    handle.lock().await.buffer.mark_complete();
                }
                if let Some(channel) = self.channels.get(id).await {
                    channel
                        .send_error("failed to generate a response", Some(err.to_string()))
                        .await;
                }
                return;
            }
        };

        // Discard a response that arrived after the channel went away rather
        // than installing a buffer nobody will ever see (§5 ordering).
        let channel = match self.channels.get(id).await {
            Some(channel) if channel.is_connected() => channel,
            _ => {
                let err = OrchestratorError::TransportDead;
                warn!(connection = %id, error = %err, "dropping generated buffer, channel is gone");
                return;
            }
        };

        {
            let handle = self.sessions.get_or_create(id).await;
            let mut session = handle.lock().await;
            session.install_buffer(blocks);
            session.update_check.needs_update = false;
            session.update_check.waiting_for_group = false;
        }

        let callbacks: Arc<dyn PacerCallbacks> = self.arc_self();
        let delivery: Arc<dyn DeliveryChannel> = channel;
        self.pacer.start(id, delivery, callbacks).await;
    }

    async fn on_max_typing_fire(&self, id: ConnectionId) {
        let handle = self.sessions.get_or_create(id).await;
        handle.lock().await.end_update.user_messaged_since_last_end_update = false;
        drop(handle);
        self.regenerate_now(id).await;
    }

    /// Shared by the plain `TypingStatus(false)` path and GroupDelayFlow's
    /// settle path; both set `should_use_idle_timer` before arming this timer,
    /// so a single callback covers both origins.
    async fn on_typing_idle_fire(&self, id: ConnectionId) {
        let should_fire = {
            let handle = self.sessions.get_or_create(id).await;
            let mut session = handle.lock().await;
            if session.typing.should_use_idle_timer {
                session.typing.should_use_idle_timer = false;
                session.end_update.user_messaged_since_last_end_update = false;
                true
            } else {
                false
            }
        };
        if should_fire {
            self.regenerate_now(id).await;
        }
    }

    async fn on_end_update_fire(&self, id: ConnectionId) {
        {
            let handle = self.sessions.get_or_create(id).await;
            let mut session = handle.lock().await;
            session.end_update.user_messaged_since_last_end_update = false;
            session.end_update.timer_active = false;
        }
        self.regenerate_now(id).await;
    }
}

#[async_trait]
impl PacerCallbacks for Orchestrator {
    async fn on_group_complete(&self, id: ConnectionId, group: i64) {
        debug!(connection = %id, group, "group complete");

        let should_start_delay = {
            let handle = self.sessions.get_or_create(id).await;
            let mut session = handle.lock().await;
            if session.update_check.needs_update && session.update_check.waiting_for_group {
                session.update_check.waiting_for_group = false;
                true
            } else {
                false
            }
        };

        if should_start_delay {
            self.group_delay_flow(id).await;
        }
    }

    async fn on_buffer_complete(&self, id: ConnectionId) {
        if let Some(channel) = self.channels.get(id).await {
            channel.send_ai_complete().await;
        }

        let (needs_update, user_messaged) = {
            let handle = self.sessions.get_or_create(id).await;
            let session = handle.lock().await;
            (
                session.update_check.needs_update,
                session.end_update.user_messaged_since_last_end_update,
            )
        };

        if needs_update {
            self.group_delay_flow(id).await;
        } else if user_messaged {
            {
                let handle = self.sessions.get_or_create(id).await;
                let mut session = handle.lock().await;
                session.end_update.timer_active = true;
                session.end_update.timer_start_time = Some(chrono::Utc::now());
            }
            let orchestrator = self.arc_self();
            self.timers.set(id, TimerName::EndUpdate, move || async move {
                orchestrator.on_end_update_fire(id).await;
            });
        }
    }
}
