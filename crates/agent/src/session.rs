//! Session lifecycle: storage, TTL and capacity eviction, run exclusivity.
//!
//! Eviction is opportunistic. Callers invoke [`SessionManager::maybe_evict`]
//! on their hot paths and it does real work at most once per interval.
//! Time is read through an injected [`Clock`] so the policy is testable
//! without sleeping.

use async_trait::async_trait;
use carepilot_config::SessionConfig;
use carepilot_core::clock::{Clock, SystemClock};
use carepilot_core::error::SessionError;
use carepilot_core::session::{Session, SessionStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info};

// ── Store ─────────────────────────────────────────────────────────────────

/// Process-local session storage.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn put(&self, session: Session) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    async fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.write().await.remove(id)
    }

    async fn list(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

// ── Policy ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    /// Sessions idle longer than this are expired.
    pub ttl: Duration,
    /// Live-session cap enforced after expiry.
    pub max_sessions: usize,
    /// Minimum time between eviction passes.
    pub interval: Duration,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(30),
            max_sessions: 30,
            interval: Duration::minutes(5),
        }
    }
}

impl From<&SessionConfig> for EvictionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            ttl: Duration::minutes(config.ttl_minutes as i64),
            max_sessions: config.max_sessions,
            interval: Duration::minutes(config.eviction_interval_minutes as i64),
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────

/// Owns every live session.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    policy: EvictionPolicy,
    last_eviction: Mutex<Option<DateTime<Utc>>>,
    active: Arc<Mutex<HashSet<String>>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>, policy: EvictionPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            last_eviction: Mutex::new(None),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// In-memory store on the system clock.
    pub fn in_memory(policy: EvictionPolicy) -> Self {
        Self::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(SystemClock),
            policy,
        )
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Create and store a fresh session in `Planning`.
    pub async fn create(&self, goal: impl Into<String>) -> Session {
        let session = Session::new(goal, self.now());
        self.store.put(session.clone()).await;
        debug!(session_id = %session.id, "Session created");
        session
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.store.get(id).await
    }

    /// Like [`get`](Self::get) but an absent id is an error.
    pub async fn require(&self, id: &str) -> Result<Session, SessionError> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Persist `session`, stamping `updated_at` with the current time.
    pub async fn save(&self, mut session: Session) {
        session.touch(self.now());
        self.store.put(session).await;
    }

    pub async fn remove(&self, id: &str) -> Option<Session> {
        self.store.remove(id).await
    }

    pub async fn len(&self) -> usize {
        self.store.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.store.is_empty().await
    }

    /// Claim exclusive run rights on a session.
    ///
    /// Fails with [`SessionError::Busy`] while another guard for the same
    /// id is alive.
    pub fn try_acquire(&self, id: &str) -> Result<RunGuard, SessionError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(id.to_string()) {
            return Err(SessionError::Busy(id.to_string()));
        }
        Ok(RunGuard {
            id: id.to_string(),
            active: self.active.clone(),
        })
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }

    /// Run an eviction pass if the interval has elapsed since the last one.
    ///
    /// The first call always runs. Returns the evicted session ids.
    pub async fn maybe_evict(&self) -> Vec<String> {
        let now = self.now();
        {
            let mut last = self.last_eviction.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = *last
                && now - previous < self.policy.interval
            {
                return Vec::new();
            }
            *last = Some(now);
        }
        self.evict_at(now).await
    }

    /// Expire idle sessions, then trim the oldest until within the cap.
    ///
    /// Sessions with an active run are never evicted. Each removal claims
    /// the session's run guard and re-reads it first, so a session that
    /// was picked up or touched since the pass began is kept.
    async fn evict_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let ttl = self.policy.ttl;
        let mut sessions: Vec<(String, DateTime<Utc>)> = self
            .store
            .list()
            .await
            .into_iter()
            .filter(|s| !self.is_running(&s.id))
            .map(|s| (s.id, s.updated_at))
            .collect();
        let mut evicted = Vec::new();

        let (stale, fresh): (Vec<_>, Vec<_>) = sessions
            .drain(..)
            .partition(|(_, updated_at)| now - *updated_at > ttl);
        sessions = fresh;
        for (id, _) in stale {
            if self.evict_one(&id, |current| now - current.updated_at > ttl).await {
                evicted.push(id);
            }
        }
        let expired = evicted.len();

        let mut live = self.store.len().await;
        if live > self.policy.max_sessions {
            sessions.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            for (id, seen) in sessions {
                if live <= self.policy.max_sessions {
                    break;
                }
                if self.evict_one(&id, |current| current.updated_at == seen).await {
                    live -= 1;
                    evicted.push(id);
                }
            }
        }

        if !evicted.is_empty() {
            let remaining = self.store.len().await;
            info!(
                expired,
                over_capacity = evicted.len() - expired,
                remaining,
                "Evicted sessions"
            );
        }
        evicted
    }

    /// Remove `id` if no run holds it and its current state still passes
    /// `evictable`.
    async fn evict_one<F>(&self, id: &str, evictable: F) -> bool
    where
        F: Fn(&Session) -> bool,
    {
        let Ok(_guard) = self.try_acquire(id) else {
            debug!(session_id = id, "Session picked up mid-pass, keeping it");
            return false;
        };
        match self.store.get(id).await {
            Some(current) if evictable(&current) => self.store.remove(id).await.is_some(),
            _ => false,
        }
    }
}

/// Exclusive run rights on one session; released on drop.
#[derive(Debug)]
pub struct RunGuard {
    id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunGuard {
    pub fn session_id(&self) -> &str {
        &self.id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}
