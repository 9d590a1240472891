//! Active session registry

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;

use ax_protocol::SessionId;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Session limit reached ({max} active sessions)")]
pub struct SessionLimitExceeded {
    pub max: usize,
}

/// What an active session is attached to
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub alloc_id: String,
    pub task: String,
    pub command: Vec<String>,
    pub started_at: Instant,
}

/// Tracks active exec sessions and hands out session ids
pub struct SessionRegistry {
    /// Next session ID to allocate
    next_session_id: AtomicU32,
    sessions: DashMap<SessionId, SessionInfo>,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            // 0 is never handed out so it can mean "no session" in logs
            next_session_id: AtomicU32::new(1),
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    /// Register a session; it stays active until the guard is dropped
    pub fn register(
        self: &Arc<Self>,
        info: SessionInfo,
    ) -> Result<SessionGuard, SessionLimitExceeded> {
        if let Some(max) = self.max_sessions {
            if self.sessions.len() >= max {
                return Err(SessionLimitExceeded { max });
            }
        }

        let id = SessionId::new(self.next_session_id.fetch_add(1, Ordering::SeqCst));
        tracing::debug!(session = %id, alloc = %info.alloc_id, task = %info.task, "Session registered");
        self.sessions.insert(id, info);

        Ok(SessionGuard {
            id,
            registry: Arc::clone(self),
        })
    }

    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.get(&id).map(|r| r.value().clone())
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Keeps a session registered for as long as it lives
pub struct SessionGuard {
    id: SessionId,
    registry: Arc<SessionRegistry>,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some((id, info)) = self.registry.sessions.remove(&self.id) {
            tracing::debug!(
                session = %id,
                elapsed = ?info.started_at.elapsed(),
                "Session unregistered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> SessionInfo {
        SessionInfo {
            alloc_id: "abcd".into(),
            task: "web".into(),
            command: vec!["/bin/sh".into()],
            started_at: Instant::now(),
        }
    }

    #[test]
    fn test_ids_are_unique_and_nonzero() {
        let registry = Arc::new(SessionRegistry::default());
        let a = registry.register(info()).unwrap();
        let b = registry.register(info()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id().as_u32(), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_guard_drop_unregisters() {
        let registry = Arc::new(SessionRegistry::default());
        let guard = registry.register(info()).unwrap();
        let id = guard.id();
        assert_eq!(registry.get(id).unwrap().task, "web");

        drop(guard);
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_limit() {
        let registry = Arc::new(SessionRegistry::new(Some(1)));
        let first = registry.register(info()).unwrap();
        let err = registry.register(info()).err().unwrap();
        assert_eq!(err.max, 1);

        drop(first);
        assert!(registry.register(info()).is_ok());
    }
}
