//! # Session Registry
//!
//! Maps connection identifiers to their sessions. Creation happens on connect,
//! destruction on disconnect, and at most one session exists per identifier.
//!
//! ## Locking:
//! The map sits behind one coarse mutex that is held only for insert, remove
//! and lookup. Each session has its own mutex, so decoding on one connection
//! never blocks another. The map lock is never held while a session lock is
//! taken.

use crate::audio::lock;
use crate::audio::session::{ConnectionId, Session, SessionPhase, SessionStats};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// A session shared between the registry and the connection driving it.
pub type SharedSession = Arc<Mutex<Session>>;

/// Why a connection could not be registered.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    /// Only possible if the transport reuses an id; kept as a defensive check.
    #[error("session {0} already exists")]
    DuplicateSession(ConnectionId),

    #[error("maximum concurrent sessions ({0}) reached")]
    CapacityReached(usize),
}

/// Snapshot of a session taken at teardown.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: ConnectionId,
    pub last_phase: SessionPhase,
    pub connected_seconds: f64,
    pub decoder_released: bool,
    /// Start of the recognition that was still running at teardown, if any
    pub listening_since: Option<chrono::DateTime<chrono::Utc>>,
    pub stats: SessionStats,
}

/// Counts of live sessions by phase.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrySummary {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub connected: usize,
    pub listening: usize,
    pub stopped: usize,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<ConnectionId, SharedSession>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Register a new connection with a fresh `Connected` session.
    ///
    /// ## Returns:
    /// - **Ok(session)**: the session now stored under `id`
    /// - **Err(DuplicateSession)**: `id` is already registered
    /// - **Err(CapacityReached)**: the concurrent session limit is hit
    pub fn on_connect(&self, id: ConnectionId) -> Result<SharedSession, RegistryError> {
        let mut sessions = lock(&self.sessions);

        if sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateSession(id));
        }

        if sessions.len() >= self.max_sessions {
            return Err(RegistryError::CapacityReached(self.max_sessions));
        }

        let session = Arc::new(Mutex::new(Session::new(id.clone())));
        sessions.insert(id.clone(), session.clone());
        debug!(connection = %id, active = sessions.len(), "Session registered");

        Ok(session)
    }

    /// Remove the session for `id`, releasing its decoder before returning.
    ///
    /// Unknown ids are logged and ignored: the session was already cleaned up,
    /// or the connection never registered.
    pub fn on_disconnect(&self, id: &ConnectionId) -> Option<SessionSummary> {
        let removed = lock(&self.sessions).remove(id);

        let Some(session) = removed else {
            warn!(connection = %id, "Disconnect for unknown session ignored");
            return None;
        };

        let mut session = lock(&session);
        let last_phase = session.phase();
        let listening_since = session.listening_since();
        let decoder_released = session.release_decoder();
        let connected_seconds = (chrono::Utc::now() - session.connected_at()).num_milliseconds()
            as f64
            / 1000.0;

        Some(SessionSummary {
            id: session.id().clone(),
            last_phase,
            connected_seconds,
            decoder_released,
            listening_since,
            stats: session.stats().clone(),
        })
    }

    pub fn get(&self, id: &ConnectionId) -> Option<SharedSession> {
        lock(&self.sessions).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count live sessions by phase.
    pub fn summary(&self) -> RegistrySummary {
        // Clone the handles first so no session lock is taken under the map lock.
        let sessions: Vec<SharedSession> = lock(&self.sessions).values().cloned().collect();

        let mut summary = RegistrySummary {
            total_sessions: sessions.len(),
            max_sessions: self.max_sessions,
            ..RegistrySummary::default()
        };

        for session in &sessions {
            match lock(session).phase() {
                SessionPhase::Connected => summary.connected += 1,
                SessionPhase::Listening => summary.listening += 1,
                SessionPhase::Stopped => summary.stopped += 1,
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::session::Command;
    use crate::transcription::testing::CountingFactory;

    #[test]
    fn test_connect_creates_connected_session() {
        let registry = SessionRegistry::new(4);
        let id = ConnectionId::new();

        let session = registry.on_connect(id.clone()).unwrap();
        assert_eq!(lock(&session).phase(), SessionPhase::Connected);
        assert!(registry.get(&id).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_connect_is_rejected() {
        let registry = SessionRegistry::new(4);
        let id = ConnectionId::new();

        registry.on_connect(id.clone()).unwrap();
        let err = registry.on_connect(id.clone()).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateSession(id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_capacity_limit() {
        let registry = SessionRegistry::new(1);
        registry.on_connect(ConnectionId::new()).unwrap();

        let err = registry.on_connect(ConnectionId::new()).unwrap_err();
        assert_eq!(err, RegistryError::CapacityReached(1));
    }

    #[test]
    fn test_disconnect_releases_decoder() {
        let factory = CountingFactory::new();
        let registry = SessionRegistry::new(4);
        let id = ConnectionId::new();

        let session = registry.on_connect(id.clone()).unwrap();
        lock(&session).handle(Command::Start, &factory).unwrap();
        assert_eq!(factory.live(), 1);

        let summary = registry.on_disconnect(&id).unwrap();
        assert!(summary.decoder_released);
        assert_eq!(summary.last_phase, SessionPhase::Listening);
        assert_eq!(summary.id, id);
        assert!(summary.listening_since.is_some());
        assert_eq!(factory.live(), 0);
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_disconnect_unknown_is_noop() {
        let registry = SessionRegistry::new(4);
        registry.on_connect(ConnectionId::new()).unwrap();

        assert!(registry.on_disconnect(&ConnectionId::new()).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_summary_counts_by_phase() {
        let factory = CountingFactory::new();
        let registry = SessionRegistry::new(8);

        registry.on_connect(ConnectionId::new()).unwrap();
        let listening = registry.on_connect(ConnectionId::new()).unwrap();
        let stopped = registry.on_connect(ConnectionId::new()).unwrap();
        lock(&listening).handle(Command::Start, &factory).unwrap();
        lock(&stopped).handle(Command::Stop, &factory).unwrap();

        let summary = registry.summary();
        assert_eq!(summary.total_sessions, 3);
        assert_eq!(summary.connected, 1);
        assert_eq!(summary.listening, 1);
        assert_eq!(summary.stopped, 1);
        assert_eq!(summary.max_sessions, 8);
    }
}
