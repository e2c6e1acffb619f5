//! Session Defaults Store
//!
//! Per-session remembered filter values and query history. Callers own the
//! store and pass it where needed; there is no process-wide instance.
//!
//! ## Session Lifecycle
//!
//! 1. `create_session()` → SessionId (UUID v4)
//! 2. `remember()` / `store_query()` record state and refresh the session
//! 3. `merge_defaults()` fills filter keys the caller left out
//! 4. `clear_session()` or expiry → gone
//!
//! ## Expiry
//!
//! A session expires `ttl` after its last write. Expiry is lazy: reads treat
//! an expired session as absent and drop it. `sweep()` removes every
//! expired session at once; nothing runs it on a timer.

use crate::config::SessionConfig;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Unique session identifier
pub type SessionId = String;

/// One remembered query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Session {
    defaults: Map<String, Value>,
    history: VecDeque<HistoryEntry>,
    last_accessed: Instant,
}

impl Session {
    fn new() -> Self {
        Session {
            defaults: Map::new(),
            history: VecDeque::new(),
            last_accessed: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }

    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.duration_since(self.last_accessed) > ttl)
    }
}

/// Thread-safe session store
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    /// None = sessions never expire
    ttl: Option<Duration>,
    max_history: usize,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        let ttl = (config.ttl_secs > 0).then(|| Duration::from_secs(config.ttl_secs));
        Self::with_ttl(ttl, config.max_history)
    }

    pub fn with_ttl(ttl: Option<Duration>, max_history: usize) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            max_history,
        }
    }

    pub fn create_session(&self) -> SessionId {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.write().insert(id.clone(), Session::new());
        tracing::debug!(session = %id, "session created");
        id
    }

    /// Live session check; drops the session if it has expired
    pub fn has_session(&self, id: &str) -> bool {
        self.read(id, |_| ()).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Remember a default filter value. Unknown ids start a new session.
    pub fn remember(&self, id: &str, key: &str, value: Value) {
        self.write(id, |session| {
            session.defaults.insert(key.to_string(), value);
        });
    }

    pub fn forget(&self, id: &str, key: &str) -> Option<Value> {
        self.write(id, |session| session.defaults.remove(key)).flatten()
    }

    pub fn defaults(&self, id: &str) -> Map<String, Value> {
        self.read(id, |session| session.defaults.clone())
            .unwrap_or_default()
    }

    /// `filters` plus every remembered default whose key the caller did not
    /// supply. Explicit filters win.
    pub fn merge_defaults(&self, id: &str, filters: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = filters.clone();
        for (key, value) in self.defaults(id) {
            merged.entry(key).or_insert(value);
        }
        merged
    }

    /// Append to the session's query history, oldest entries evicted past
    /// `max_history`. Empty ids are ignored.
    pub fn store_query(&self, id: &str, query: &str) {
        let max_history = self.max_history;
        self.write(id, |session| {
            session.history.push_back(HistoryEntry {
                query: query.to_string(),
                timestamp: Utc::now(),
            });
            while max_history > 0 && session.history.len() > max_history {
                session.history.pop_front();
            }
        });
    }

    /// Query strings, oldest first; `max` keeps only the most recent
    pub fn query_history(&self, id: &str, max: Option<usize>) -> Vec<String> {
        self.read(id, |session| {
            let skip = max.map_or(0, |max| session.history.len().saturating_sub(max));
            session
                .history
                .iter()
                .skip(skip)
                .map(|entry| entry.query.clone())
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn full_history(&self, id: &str) -> Vec<HistoryEntry> {
        self.read(id, |session| session.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns whether the session existed
    pub fn clear_session(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Remove every expired session
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(self.ttl, now));
        let reaped = before - sessions.len();
        drop(sessions);

        if reaped > 0 {
            tracing::info!(reaped, "expired sessions swept");
        }
        reaped
    }

    fn read<R>(&self, id: &str, f: impl FnOnce(&Session) -> R) -> Option<R> {
        let now = Instant::now();
        {
            let sessions = self.sessions.read();
            let session = sessions.get(id)?;
            if !session.is_expired(self.ttl, now) {
                return Some(f(session));
            }
        }
        self.expire(id, now);
        None
    }

    fn write<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        if id.is_empty() {
            return None;
        }
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let session = sessions.entry(id.to_string()).or_insert_with(Session::new);
        if session.is_expired(self.ttl, now) {
            *session = Session::new();
        }
        session.touch();
        Some(f(session))
    }

    fn expire(&self, id: &str, now: Instant) {
        let mut sessions = self.sessions.write();
        if sessions
            .get(id)
            .is_some_and(|session| session.is_expired(self.ttl, now))
        {
            sessions.remove(id);
            tracing::debug!(session = %id, "session expired");
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_create_session_ids_are_unique() {
        let store = SessionStore::default();
        let a = store.create_session();
        let b = store.create_session();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
        assert_eq!(store.session_count(), 2);
    }

    #[test]
    fn test_merge_fills_missing_keys_only() {
        let store = SessionStore::default();
        let id = store.create_session();
        store.remember(&id, "ent_id", json!("000"));
        store.remember(&id, "limit", json!(10));

        let merged = store.merge_defaults(&id, &map(json!({"limit": 3, "variables": ["revenue"]})));
        assert_eq!(merged["ent_id"], json!("000"));
        assert_eq!(merged["limit"], json!(3));
        assert_eq!(merged["variables"], json!(["revenue"]));
    }

    #[test]
    fn test_merge_unknown_session_is_identity() {
        let store = SessionStore::default();
        let filters = map(json!({"table": "users"}));
        assert_eq!(store.merge_defaults("nope", &filters), filters);
    }

    #[test]
    fn test_forget_default() {
        let store = SessionStore::default();
        let id = store.create_session();
        store.remember(&id, "ent_id", json!("000"));
        assert_eq!(store.forget(&id, "ent_id"), Some(json!("000")));
        assert!(store.defaults(&id).is_empty());
    }

    #[test]
    fn test_history_capped() {
        let store = SessionStore::with_ttl(None, 3);
        let id = store.create_session();
        for q in ["q1", "q2", "q3", "q4", "q5"] {
            store.store_query(&id, q);
        }
        assert_eq!(store.query_history(&id, None), vec!["q3", "q4", "q5"]);
        assert_eq!(store.query_history(&id, Some(2)), vec!["q4", "q5"]);
        assert_eq!(store.full_history(&id).len(), 3);
    }

    #[test]
    fn test_empty_id_ignored() {
        let store = SessionStore::default();
        store.store_query("", "show tables");
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_lazy_expiry_on_read() {
        let store = SessionStore::with_ttl(Some(Duration::from_millis(20)), 50);
        let id = store.create_session();
        store.remember(&id, "ent_id", json!("000"));
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(store.session_count(), 1);
        assert!(store.defaults(&id).is_empty());
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_sweep_removes_expired() {
        let store = SessionStore::with_ttl(Some(Duration::from_millis(20)), 50);
        store.create_session();
        store.create_session();
        std::thread::sleep(Duration::from_millis(60));
        let fresh = store.create_session();

        assert_eq!(store.sweep(), 2);
        assert!(store.has_session(&fresh));
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let store = SessionStore::with_ttl(None, 50);
        let id = store.create_session();
        assert_eq!(store.sweep(), 0);
        assert!(store.has_session(&id));
    }

    #[test]
    fn test_clear_session() {
        let store = SessionStore::default();
        let id = store.create_session();
        assert!(store.clear_session(&id));
        assert!(!store.clear_session(&id));
        assert!(!store.has_session(&id));
    }
}
