//! Pacer (§4.3): serializes blocks from a connection's Buffer onto the
//! delivery channel, honoring per-block typing time and firing group/complete
//! callbacks that re-enter the Orchestrator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::session::{ConnectionId, Role, SessionStore};

/// The delivery channel the Pacer (and Orchestrator) emit over. Implemented by
/// the transport's connection wrapper; both sides must check `is_connected`
/// before emitting (§5 shared resources).
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Emit one `ai_block` event. Returns `false` if the send itself failed
    /// (the channel is considered dead from that point on).
    async fn send_ai_block(&self, text: &str, group: i64, timestamp: DateTime<Utc>) -> bool;
}

/// Callbacks invoked by the Pacer on group transitions and buffer completion;
/// implemented by the Orchestrator.
#[async_trait]
pub trait PacerCallbacks: Send + Sync {
    async fn on_group_complete(&self, id: ConnectionId, group: i64);
    async fn on_buffer_complete(&self, id: ConnectionId);
}

struct Chain {
    cancel: CancellationToken,
    is_sending: Arc<AtomicBool>,
}

/// At most one emission chain per connection at any time (§4.3 concurrency
/// guarantee).
#[derive(Default)]
pub struct Pacer {
    sessions: Arc<SessionStore>,
    chains: Mutex<HashMap<ConnectionId, Chain>>,
}

impl Pacer {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self {
            sessions,
            chains: Mutex::new(HashMap::new()),
        }
    }

    /// `Start`: validates channel liveness, resets the paused flag, and begins
    /// the emission loop, implicitly cancelling any prior chain for `id`.
    pub async fn start(
        &self,
        id: ConnectionId,
        channel: Arc<dyn DeliveryChannel>,
        callbacks: Arc<dyn PacerCallbacks>,
    ) {
        self.stop(id);

        if !channel.is_connected() {
            return;
        }

        let handle = self.sessions.get_or_create(id).await;
        handle.lock().await.buffer.set_paused(false);

        let cancel = CancellationToken::new();
        let is_sending = Arc::new(AtomicBool::new(false));
        self.chains.lock().insert(
            id,
            Chain {
                cancel: cancel.clone(),
                is_sending: is_sending.clone(),
            },
        );

        let sessions = self.sessions.clone();
        tokio::spawn(run_chain(sessions, id, channel, callbacks, cancel, is_sending));
    }

    /// `Stop`: cancel the scheduled next-block firing; no callbacks fire.
    pub fn stop(&self, id: ConnectionId) {
        if let Some(chain) = self.chains.lock().remove(&id) {
            chain.cancel.cancel();
        }
    }

    /// `Pause`: cancel next-block firing and mark the buffer paused.
    pub async fn pause(&self, id: ConnectionId) {
        self.stop(id);
        let handle = self.sessions.get_or_create(id).await;
        handle.lock().await.buffer.set_paused(true);
    }

    /// `Resume`: clear paused; if it was set, restart the emission loop.
    pub async fn resume(
        &self,
        id: ConnectionId,
        channel: Arc<dyn DeliveryChannel>,
        callbacks: Arc<dyn PacerCallbacks>,
    ) {
        let was_paused = {
            let handle = self.sessions.get_or_create(id).await;
            let mut session = handle.lock().await;
            let was_paused = session.buffer.is_paused();
            session.buffer.set_paused(false);
            was_paused
        };
        if was_paused {
            self.start(id, channel, callbacks).await;
        }
    }

    /// `IsSending`: true when a next-block firing is pending (the loop is in
    /// its between-block sleep).
    pub fn is_sending(&self, id: ConnectionId) -> bool {
        self.chains
            .lock()
            .get(&id)
            .map(|c| c.is_sending.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// `Cleanup`: Stop plus release any retained channel reference.
    pub fn cleanup(&self, id: ConnectionId) {
        self.stop(id);
    }
}

async fn run_chain(
    sessions: Arc<SessionStore>,
    id: ConnectionId,
    channel: Arc<dyn DeliveryChannel>,
    callbacks: Arc<dyn PacerCallbacks>,
    cancel: CancellationToken,
    is_sending: Arc<AtomicBool>,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        // Step 1: channel liveness.
        if !channel.is_connected() {
            return;
        }

        let handle = sessions.get_or_create(id).await;

        enum Step {
            Paused,
            Interrupted,
            Complete,
            Emit(crate::session::Block),
        }

        let step = {
            let session = handle.lock().await;
            if session.buffer.is_paused() {
                Step::Paused
            } else if session.update_check.needs_update && !session.update_check.waiting_for_group {
                Step::Interrupted
            } else {
                match session.buffer.peek() {
                    None => Step::Complete,
                    Some(block) => Step::Emit(block.clone()),
                }
            }
        };

        match step {
            // Step 2/3: paused, or the Orchestrator has requested a clean
            // interrupt. Either way the loop releases without firing callbacks.
            Step::Paused | Step::Interrupted => return,

            // Step 4: nothing left to send.
            Step::Complete => {
                callbacks.on_buffer_complete(id).await;
                return;
            }

            // Steps 5-7: emit, advance, fire group callback, schedule next step.
            Step::Emit(block) => {
                if !channel.send_ai_block(&block.text, block.group, Utc::now()).await {
                    return;
                }

                let (previous_group, new_group) = {
                    let mut session = handle.lock().await;
                    session.append(Role::Model, block.text.clone());
                    session.buffer.advance()
                };

                if previous_group != new_group {
                    if let Some(group) = previous_group {
                        callbacks.on_group_complete(id, group).await;
                    }
                }

                let delay_ms = block.effective_delay_ms();
                is_sending.store(true, Ordering::SeqCst);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        is_sending.store(false, Ordering::SeqCst);
                        return;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
                is_sending.store(false, Ordering::SeqCst);
            }
        }
    }
}
