//! Session Role & Authority
//!
//! Tracks whether this peer is offline, hosting or connected as a client,
//! and enforces the legal transitions between those states:
//!
//! ```text
//! Offline ──host──▶ Hosting ──stop──▶ Idle ──host──▶ Hosting
//!    │
//!    └──join──▶ Joining ──connected──▶ Connected ──disconnect──▶ Disconnected ──join──▶ Joining
//! ```
//!
//! Any state may `reset` back to `Offline`. Only `Hosting` and `Connected`
//! count as an active session.

use std::fmt;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Unique session identifier.
pub type SessionId = Uuid;

/// Which side of the authority model this peer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The single authoritative peer.
    Host,
    /// A peer relaying its changes through the host.
    Client,
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session.
    Offline,
    /// Hosting a session.
    Hosting,
    /// Stopped hosting.
    Idle,
    /// Waiting for the host to accept.
    Joining,
    /// Connected to a host.
    Connected,
    /// Lost or left the host.
    Disconnected,
}

impl SessionState {
    /// Role of this peer in the state, if it has one.
    pub fn role(self) -> Option<Role> {
        match self {
            SessionState::Hosting | SessionState::Idle => Some(Role::Host),
            SessionState::Joining | SessionState::Connected | SessionState::Disconnected => {
                Some(Role::Client)
            }
            SessionState::Offline => None,
        }
    }

    /// Whether replicated changes flow in this state.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Hosting | SessionState::Connected)
    }

    fn can_move_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (_, Offline)
                | (Offline | Idle, Hosting)
                | (Hosting, Idle)
                | (Offline | Disconnected, Joining)
                | (Joining, Connected)
                | (Joining | Connected, Disconnected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Transition not allowed from the current state.
    #[error("cannot move from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },

    /// Lobby has no free slot.
    #[error("session is full")]
    SessionFull,

    /// Wrong lobby password.
    #[error("wrong password")]
    WrongPassword,
}

/// Outcome of a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before.
    pub from: SessionState,
    /// State after.
    pub to: SessionState,
}

impl Transition {
    /// Whether an active session ended.
    pub fn left_session(&self) -> bool {
        self.from.is_active() && !self.to.is_active()
    }

    /// Whether a new active session started.
    pub fn entered_session(&self) -> bool {
        !self.from.is_active() && self.to.is_active()
    }
}

/// The current session of this peer.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    id: Option<SessionId>,
    epoch: u64,
    started_at: Option<DateTime<Utc>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Start offline.
    pub fn new() -> Self {
        Self {
            state: SessionState::Offline,
            id: None,
            epoch: 0,
            started_at: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current role.
    pub fn role(&self) -> Option<Role> {
        self.state.role()
    }

    /// Whether this peer is the host of an active session.
    pub fn is_host(&self) -> bool {
        self.state == SessionState::Hosting
    }

    /// Whether this peer is a client connected to a host.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Whether replicated changes flow.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Identifier of the current or last session.
    pub fn id(&self) -> Option<SessionId> {
        self.id
    }

    /// Incremented every time a session starts.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// When the current session started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Start hosting.
    pub fn host(&mut self) -> Result<Transition, SessionError> {
        self.move_to(SessionState::Hosting)
    }

    /// Stop hosting, keeping the host role.
    pub fn stop_hosting(&mut self) -> Result<Transition, SessionError> {
        self.move_to(SessionState::Idle)
    }

    /// Begin joining a host.
    pub fn join(&mut self) -> Result<Transition, SessionError> {
        self.move_to(SessionState::Joining)
    }

    /// The host accepted us.
    pub fn connected(&mut self) -> Result<Transition, SessionError> {
        self.move_to(SessionState::Connected)
    }

    /// Lost or left the host.
    pub fn disconnect(&mut self) -> Result<Transition, SessionError> {
        self.move_to(SessionState::Disconnected)
    }

    /// Back to offline from anywhere.
    pub fn reset(&mut self) -> Transition {
        let from = self.state;
        self.state = SessionState::Offline;
        Transition { from, to: SessionState::Offline }
    }

    fn move_to(&mut self, to: SessionState) -> Result<Transition, SessionError> {
        let from = self.state;
        if !from.can_move_to(to) {
            return Err(SessionError::InvalidTransition { from, to });
        }
        self.state = to;

        let transition = Transition { from, to };
        if transition.entered_session() {
            self.epoch += 1;
            let id = Uuid::new_v4();
            self.id = Some(id);
            self.started_at = Some(Utc::now());
            info!(%id, epoch = self.epoch, state = %to, "Session started");
        } else if transition.left_session() {
            info!(from = %from, to = %to, "Session ended");
        }
        Ok(transition)
    }
}
