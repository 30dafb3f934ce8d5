use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapter::SessionAdapter;
use crate::clock::Clock;
use crate::short_id;

/// Live session plus its bookkeeping
#[derive(Debug)]
struct SessionRecord {
    adapter: Arc<SessionAdapter>,
    server_name: String,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
}

/// Point-in-time copy of one session's metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl SessionSnapshot {
    fn of(session_id: &str, record: &SessionRecord) -> Self {
        Self {
            session_id: session_id.to_string(),
            name: record.server_name.clone(),
            created_at: record.created_at,
            last_used: record.last_used_at,
        }
    }
}

/// Session id -> live provider session.
///
/// The registry owns every adapter it holds; callers get an `Arc` only for
/// the duration of one call. Closing always happens after the entry has left
/// the map so no shard lock is held across an await.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionRecord>,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
        }
    }

    /// Adapter for `session_id`, if one is live
    pub fn checkout(&self, session_id: &str) -> Option<Arc<SessionAdapter>> {
        self.sessions
            .get(session_id)
            .map(|record| Arc::clone(&record.adapter))
    }

    pub fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions
            .get(session_id)
            .map(|record| SessionSnapshot::of(session_id, &record))
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Register a live session. A record already stored under the same id is
    /// replaced and its adapter closed.
    pub async fn put(&self, session_id: &str, adapter: SessionAdapter, server_name: &str) {
        let now = self.clock.now();
        let record = SessionRecord {
            adapter: Arc::new(adapter),
            server_name: server_name.to_string(),
            created_at: now,
            last_used_at: now,
        };

        let displaced = self.sessions.insert(session_id.to_string(), record);
        info!(
            target: "session_registry",
            session = %short_id(session_id),
            server = %server_name,
            "Session registered"
        );

        if let Some(old) = displaced {
            debug!(target: "session_registry", session = %short_id(session_id), "Closing displaced session");
            old.adapter.close().await;
        }
    }

    /// Bump last-used-at. Returns false when the session is gone.
    pub fn touch(&self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut record) => {
                record.last_used_at = self.clock.now();
                true
            }
            None => false,
        }
    }

    /// Remove and close a session. Unknown ids are a no-op.
    pub async fn remove(&self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, record)) => {
                record.adapter.close().await;
                info!(target: "session_registry", session = %short_id(session_id), "Session removed");
                true
            }
            None => false,
        }
    }

    /// Remove and close a session only if it is still idle past `timeout` at
    /// `now`. A concurrent `touch` wins over the sweep.
    pub async fn remove_if_idle(&self, session_id: &str, now: DateTime<Utc>, timeout: Duration) -> bool {
        let removed = self
            .sessions
            .remove_if(session_id, |_, record| now.signed_duration_since(record.last_used_at) > timeout);

        match removed {
            Some((_, record)) => {
                record.adapter.close().await;
                true
            }
            None => false,
        }
    }

    /// Ids of sessions idle longer than `timeout` at `now`
    pub fn idle_since(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| now.signed_duration_since(entry.last_used_at) > timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Snapshot of every live session, oldest first
    pub fn list_all(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|entry| SessionSnapshot::of(entry.key(), entry.value()))
            .collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        all
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Remove and close every session. Returns how many were closed.
    pub async fn drain(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for id in ids {
            if self.remove(&id).await {
                closed += 1;
            }
        }
        closed
    }
}
