//! Session store
//!
//! Maps a conversation key to its session. Sessions live in memory only and
//! are replaced, not removed, when they go idle past the timeout.
//!
//! Each session sits behind its own mutex. `get_or_create_session` hands out
//! an owned guard, so one exchange for a key runs to completion before the
//! next one for the same key starts; different keys do not contend.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;

use crate::memory::{Session, SessionKey};

/// Exclusive access to one session for the duration of an exchange
pub type SessionGuard = OwnedMutexGuard<Session>;

/// Trait for session storage
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the live session for `key`, or a fresh one if it is absent or
    /// has been idle longer than the timeout.
    async fn get_or_create_session(&self, key: &SessionKey, now: DateTime<Utc>) -> SessionGuard;

    /// Number of keys currently held
    async fn session_count(&self) -> usize;
}

/// In-memory session store
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionKey, Arc<Mutex<Session>>>>>,
    system_prompt: String,
    timeout: Duration,
}

impl InMemorySessionStore {
    pub fn new(system_prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            system_prompt: system_prompt.into(),
            timeout,
        }
    }

    async fn slot(&self, key: &SessionKey, now: DateTime<Utc>) -> Arc<Mutex<Session>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(slot) = sessions.get(key) {
                return Arc::clone(slot);
            }
        }

        let mut sessions = self.sessions.write().await;
        let slot = sessions.entry(key.clone()).or_insert_with(|| {
            let session = Session::new(&self.system_prompt, now);
            info!(key = %key, session_id = %session.session_id, "Created session");
            Arc::new(Mutex::new(session))
        });

        Arc::clone(slot)
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create_session(&self, key: &SessionKey, now: DateTime<Utc>) -> SessionGuard {
        let slot = self.slot(key, now).await;
        let mut session = slot.lock_owned().await;

        if session.is_expired(now, self.timeout) {
            let fresh = Session::new(&self.system_prompt, now);
            info!(
                key = %key,
                expired_session_id = %session.session_id,
                expired_created_at = %session.created_at,
                session_id = %fresh.session_id,
                "Session idle past timeout, starting fresh"
            );
            *session = fresh;
        }

        session
    }

    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
