//! Session Store (§4.1): a process-wide map from connection id to per-connection
//! state, with lazy creation and explicit deletion.
//!
//! Each session is guarded by its own `tokio::sync::Mutex`, giving the
//! per-connection actor discipline described in §5 without a dedicated task per
//! connection: whoever holds a session's lock is the only one mutating it, and
//! the outer map is only ever locked for the duration of a lookup/insert/remove.

mod types;

pub use types::{Block, Buffer, EndUpdateState, HistoryEntry, Role, Session, TypingState, UpdateCheckState};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

/// The connection-unique identifier assigned by the transport at accept time;
/// the sole session key (§6).
pub type ConnectionId = Uuid;

/// A cloneable handle to one connection's guarded session.
#[derive(Clone)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.0.lock().await
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<ConnectionId, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `getOrCreate`: returns the handle for `id`, creating an empty session if
    /// none exists yet.
    pub async fn get_or_create(&self, id: ConnectionId) -> SessionHandle {
        if let Some(session) = self.sessions.read().await.get(&id) {
            return SessionHandle(session.clone());
        }
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(Session::default())))
            .clone();
        SessionHandle(session)
    }

    /// `clear`: explicit deletion on disconnect/end-chat.
    pub async fn clear(&self, id: &ConnectionId) {
        self.sessions.write().await.remove(id);
    }

    /// Count of live sessions, for the health endpoint's `activeUsers`.
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_id() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        let a = store.get_or_create(id).await;
        {
            let mut session = a.lock().await;
            session.append(Role::User, "hi");
        }
        let b = store.get_or_create(id).await;
        let session = b.lock().await;
        assert_eq!(session.history.len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_session() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        store.get_or_create(id).await;
        assert_eq!(store.active_count().await, 1);
        store.clear(&id).await;
        assert_eq!(store.active_count().await, 0);
    }

    #[tokio::test]
    async fn distinct_ids_are_independent() {
        let store = SessionStore::new();
        let a = store.get_or_create(Uuid::new_v4()).await;
        let b = store.get_or_create(Uuid::new_v4()).await;
        a.lock().await.append(Role::User, "only in a");
        assert_eq!(b.lock().await.history.len(), 0);
    }
}
