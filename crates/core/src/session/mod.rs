//! RTSP client session state (RFC 2326 §3, §12.37).
//!
//! A session is created during SETUP and destroyed by TEARDOWN or TCP
//! disconnect. It tracks:
//!
//! - A unique session ID (hex string, returned in the `Session` header).
//! - The stream path it was SETUP against, so the delivery loop can find
//!   the session's cursor without re-parsing URIs.
//! - The playback state: Ready -> Playing <-> Paused.
//! - Negotiated transport parameters (client/server UDP ports).
//!
//! Session lifecycle (RFC 2326 §A.1):
//!
//! ```text
//! SETUP          -> Ready
//! PLAY           -> Playing
//! PAUSE          -> Paused   (from Playing)
//! PLAY           -> Playing  (from Paused)
//! TEARDOWN       -> (removed)
//! TCP disconnect -> (removed, via cleanup)
//! ```

pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{Result, ServerError};
pub use transport::Transport;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

const SERVER_PORT_MIN: u64 = 5000;
const SERVER_PORT_MAX: u64 = 65534;

/// Default session timeout in seconds (RFC 2326 §12.37). Advertised in
/// the `Session` header; clients keep the session alive with requests.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Created via SETUP, not yet playing.
    Ready,
    /// Media is being delivered.
    Playing,
    /// Delivery suspended; the session's cursor keeps accumulating
    /// (bounded), so resume starts near live.
    Paused,
}

/// A single client session bound to one camera stream.
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier (16-char hex string).
    pub id: String,
    /// The RTSP URI from the SETUP request.
    pub uri: String,
    /// Path of the stream this session is attached to (e.g. `/front-cam`).
    pub stream_path: String,
    /// Transport parameters negotiated during SETUP.
    pub transport: RwLock<Option<Transport>>,
    /// Current playback state.
    pub state: RwLock<SessionState>,
    /// Timeout advertised in the `Session` response header.
    pub timeout_secs: u64,
}

impl Session {
    pub fn new(uri: &str, stream_path: &str) -> Self {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        Session {
            id: format!("{id:016X}"),
            uri: uri.to_string(),
            stream_path: stream_path.to_string(),
            transport: RwLock::new(None),
            state: RwLock::new(SessionState::Ready),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }

    pub fn set_transport(&self, transport: Transport) {
        tracing::debug!(session_id = %self.id, client_addr = %transport.client_addr, "transport configured");
        *self.transport.write() = Some(transport);
    }

    pub fn get_transport(&self) -> Option<Transport> {
        self.transport.read().clone()
    }

    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(session_id = %self.id, old_state = ?*self.state.read(), new_state = ?state, "state transition");
        *self.state.write() = state;
    }

    pub fn get_state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn is_playing(&self) -> bool {
        *self.state.read() == SessionState::Playing
    }

    /// `Session` response header value per RFC 2326 §12.37, e.g.
    /// `"0000000000000001;timeout=60"`.
    pub fn header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }
}

/// Thread-safe registry of active client sessions.
///
/// Read performance matters: the delivery loop resolves sessions on
/// every tick, so the map sits behind a `parking_lot::RwLock`.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    next_server_port: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_server_port: Arc::new(AtomicU64::new(SERVER_PORT_MIN)),
        }
    }

    /// Create and register a session for the given URI and stream path.
    pub fn create(&self, uri: &str, stream_path: &str) -> Arc<Session> {
        let session = Arc::new(Session::new(uri, stream_path));
        let id = session.id.clone();
        self.sessions.write().insert(id.clone(), session.clone());

        let total = self.sessions.read().len();
        tracing::debug!(session_id = %id, uri, stream_path, total_sessions = total, "session created");

        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove and return a session by ID (TEARDOWN).
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            let total = self.sessions.read().len();
            tracing::debug!(session_id = %id, total_sessions = total, "session removed");
        }
        removed
    }

    /// Remove several sessions at once (TCP disconnect cleanup).
    pub fn remove_many(&self, ids: &[String]) -> usize {
        let mut sessions = self.sessions.write();
        let mut removed = 0;
        for id in ids {
            if sessions.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, remaining = sessions.len(), "batch session cleanup");
        }
        removed
    }

    /// Remove and return every session (server shutdown).
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.write();
        sessions.drain().map(|(_, s)| s).collect()
    }

    /// Allocate a pair of (RTP, RTCP) server ports.
    ///
    /// Monotonic counter from 5000, wrapping at 65534. Per RFC 3550 §11,
    /// RTP ports are even and RTCP = RTP + 1.
    pub fn allocate_server_ports(&self) -> Result<(u16, u16)> {
        let rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);

        if rtp > SERVER_PORT_MAX {
            tracing::warn!(rtp, "port range exhausted, wrapping to {SERVER_PORT_MIN}");
            self.next_server_port
                .store(SERVER_PORT_MIN, Ordering::SeqCst);
            let rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);
            if rtp > SERVER_PORT_MAX {
                return Err(ServerError::PortRangeExhausted);
            }
            return Ok((rtp as u16, rtp as u16 + 1));
        }

        Ok((rtp as u16, rtp as u16 + 1))
    }

    pub fn playing_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_playing())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_states() {
        let session = Session::new("rtsp://host/front-cam", "/front-cam");
        assert_eq!(session.get_state(), SessionState::Ready);
        assert!(!session.is_playing());

        session.set_state(SessionState::Playing);
        assert!(session.is_playing());

        session.set_state(SessionState::Paused);
        assert!(!session.is_playing());
    }

    #[test]
    fn header_value_includes_timeout() {
        let session = Session::new("rtsp://host/front-cam", "/front-cam");
        let value = session.header_value();
        assert!(value.starts_with(&session.id));
        assert!(value.ends_with(";timeout=60"));
    }

    #[test]
    fn registry_create_get_remove() {
        let registry = SessionRegistry::new();
        let session = registry.create("rtsp://host/front-cam", "/front-cam");
        assert!(registry.get(&session.id).is_some());
        assert!(registry.remove(&session.id).is_some());
        assert!(registry.get(&session.id).is_none());
    }

    #[test]
    fn drain_empties_registry() {
        let registry = SessionRegistry::new();
        registry.create("rtsp://host/a", "/a");
        registry.create("rtsp://host/b", "/b");
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn server_ports_are_even_odd_pairs() {
        let registry = SessionRegistry::new();
        let (rtp, rtcp) = registry.allocate_server_ports().unwrap();
        assert_eq!(rtcp, rtp + 1);
        assert_eq!(rtp % 2, 0);

        let (next_rtp, _) = registry.allocate_server_ports().unwrap();
        assert_eq!(next_rtp, rtp + 2);
    }

    #[test]
    fn playing_filter() {
        let registry = SessionRegistry::new();
        let a = registry.create("rtsp://host/a", "/a");
        registry.create("rtsp://host/b", "/b");
        a.set_state(SessionState::Playing);
        let playing = registry.playing_sessions();
        assert_eq!(playing.len(), 1);
        assert_eq!(playing[0].id, a.id);
    }
}
