//! The shared session store.
//!
//! One map for the whole process, keyed by call sid. Each session sits
//! behind its own `tokio::sync::Mutex` so mutation is serialized per call
//! while different calls proceed independently. The outer `RwLock` only
//! guards map membership and is never held across an await on a session.

use crate::session::CallSession;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// A shared handle to one session.
pub type SessionHandle = Arc<Mutex<CallSession>>;

/// Task-safe map of call sid → session.
///
/// Initialized once at process start and passed to the relay and dispatch
/// pipeline as a collaborator (no ambient global state).
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a session for a call, driven into the initial
    /// stage.
    ///
    /// If a session already exists for this call sid (a duplicate stream
    /// start), the existing one is replaced and the replacement is logged.
    pub async fn create(&self, call_sid: &str) -> SessionHandle {
        let handle = Arc::new(Mutex::new(CallSession::new(call_sid)));
        let previous = self
            .inner
            .write()
            .await
            .insert(call_sid.to_string(), handle.clone());
        if previous.is_some() {
            tracing::warn!(call_sid, "replaced existing session for duplicate stream start");
        }
        handle
    }

    /// Looks up the session for a call.
    pub async fn get(&self, call_sid: &str) -> Option<SessionHandle> {
        self.inner.read().await.get(call_sid).cloned()
    }

    /// Removes and returns the session for a call.
    pub async fn remove(&self, call_sid: &str) -> Option<SessionHandle> {
        self.inner.write().await.remove(call_sid)
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Evicts sessions idle longer than `ttl`; returns the evicted call sids.
    ///
    /// Each candidate's own mutex is acquired with `try_lock` before
    /// removal: a session with an in-flight dispatch holds its lock, so the
    /// sweep skips it and reconsiders it on the next pass. Eviction can
    /// therefore never race live mutation of the same session.
    pub async fn evict_idle(&self, ttl: Duration) -> Vec<String> {
        let candidates: Vec<(String, SessionHandle)> = {
            let map = self.inner.read().await;
            map.iter()
                .map(|(sid, handle)| (sid.clone(), handle.clone()))
                .collect()
        };

        let mut evicted = Vec::new();
        for (call_sid, handle) in candidates {
            let expired = match handle.try_lock() {
                Ok(session) => session.idle_for() > ttl,
                Err(_) => false, // in use right now, not idle
            };

            if expired {
                // Re-check under the write lock: a dispatch may have touched
                // the session between our read and here.
                let mut map = self.inner.write().await;
                let still_expired = match map.get(&call_sid) {
                    Some(h) => match h.try_lock() {
                        Ok(session) => session.idle_for() > ttl,
                        Err(_) => false,
                    },
                    None => false,
                };
                if still_expired {
                    map.remove(&call_sid);
                    evicted.push(call_sid);
                }
            }
        }

        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "evicted idle sessions");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_get_remove_round_trip() {
        let store = SessionStore::new();
        store.create("CA300").await;

        assert!(store.get("CA300").await.is_some());
        assert_eq!(store.len().await, 1);

        store.remove("CA300").await;
        assert!(store.get("CA300").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let store = SessionStore::new();
        store.create("CA301").await;
        store.create("CA302").await;

        {
            let handle = store.get("CA301").await.unwrap();
            let mut session = handle.lock().await;
            session.caller = Some("+15550001111".to_string());
        }

        let other = store.get("CA302").await.unwrap();
        assert!(other.lock().await.caller.is_none());
    }

    #[tokio::test]
    async fn evict_idle_removes_only_expired_sessions() {
        let store = SessionStore::new();
        store.create("CA-idle").await;
        store.create("CA-live").await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        // Only CA-live sees activity before the sweep.
        {
            let handle = store.get("CA-live").await.unwrap();
            handle.lock().await.touch();
        }

        let evicted = store.evict_idle(Duration::from_millis(25)).await;
        assert_eq!(evicted, vec!["CA-idle".to_string()]);
        assert!(store.get("CA-idle").await.is_none());
        assert!(store.get("CA-live").await.is_some());
    }

    #[tokio::test]
    async fn evict_idle_skips_sessions_with_inflight_work() {
        let store = SessionStore::new();
        let handle = store.create("CA-busy").await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        // Hold the session lock as an in-flight dispatch would.
        let guard = handle.lock().await;
        let evicted = store.evict_idle(Duration::from_millis(25)).await;
        assert!(evicted.is_empty(), "locked session must survive the sweep");
        drop(guard);

        let evicted = store.evict_idle(Duration::from_millis(25)).await;
        assert_eq!(evicted, vec!["CA-busy".to_string()]);
    }
}
