//! Session types shared with the server layer.
//!
//! The transport (accepting connections, telnet negotiation) lives outside
//! this crate; the core only sees per-session input lines (submitted
//! through the scheduler) and queues per-session output (drained from the
//! world). These types carry what both sides need to agree on.

use chrono::{DateTime, Local};

/// Connection lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Connected,
    Authenticating,
    Playing,
    Disconnecting,
    Disconnected,
}

/// One server-layer session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: u64,
    pub player: Option<String>,
    pub connected_at: DateTime<Local>,
    pub state: SessionState,
}

impl Session {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            player: None,
            connected_at: Local::now(),
            state: SessionState::Connected,
        }
    }

    /// Whether the session still accepts input.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connected | SessionState::Authenticating | SessionState::Playing
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let mut s = Session::new(1);
        assert_eq!(s.state, SessionState::Connected);
        assert!(s.is_active());
        s.state = SessionState::Playing;
        s.player = Some("fulana".into());
        assert!(s.is_active());
        s.state = SessionState::Disconnected;
        assert!(!s.is_active());
    }
}
