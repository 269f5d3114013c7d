//! Process-wide bookkeeping of live sessions.
//!
//! Routing never consults the registry; the broker does that. It exists so
//! operators can see what is running and so shutdown can close every
//! session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::session::{Session, SessionState};

/// Serializable view of one live session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: String,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Lifecycle state at snapshot time.
    pub state: SessionState,
}

/// Mutex-guarded map of live sessions keyed by id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly started session.
    pub fn insert(&self, session: Arc<Session>) {
        let mut sessions = self.lock();
        sessions.insert(session.id().to_owned(), session);
        info!(active_sessions = sessions.len(), "session registered");
    }

    /// Forget a session; returns it if it was tracked.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.lock();
        let removed = sessions.remove(id);
        if removed.is_some() {
            info!(active_sessions = sessions.len(), "session unregistered");
        }
        removed
    }

    /// Look up a live session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().get(id).cloned()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Summaries of every live session, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .lock()
            .values()
            .map(|session| SessionSummary {
                id: session.id().to_owned(),
                started_at: session.started_at(),
                state: session.state(),
            })
            .collect();
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Ask every live session to close.
    ///
    /// Sessions remove themselves once their teardown finishes.
    pub fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.lock().values().cloned().collect();
        for session in sessions {
            session.close();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
