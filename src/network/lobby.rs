//! Lobby Join Gate
//!
//! Before joining, a client asks for the lobby's metadata to learn whether
//! a password is required. The answer may never come, so the wait is a
//! [`TimedPoll`]; on timeout the client joins directly and lets the host
//! decide. The host decides with [`LobbyMetadata::admit`] during the
//! connection handshake.

use std::time::Instant;
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::config::ClientSettings;
use crate::core::hash::hash_bytes;
use super::poll::{PollOutcome, TimedPoll};
use super::session::SessionError;

/// Shortest accepted lobby password.
pub const MIN_PASSWORD_LEN: usize = 4;

/// What a host publishes about its lobby.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyMetadata {
    /// Display name.
    pub name: String,
    /// Host display name.
    pub host_name: String,
    /// Peers currently in the session, host included.
    pub player_count: usize,
    /// Lobby capacity.
    pub max_players: usize,
    /// SHA-256 hex of the password; empty when there is none.
    pub password_hash: String,
    /// Colony name.
    pub colony_name: String,
    /// Current cycle.
    pub cycle: u32,
}

impl LobbyMetadata {
    /// Whether joining needs a password.
    pub fn has_password(&self) -> bool {
        !self.password_hash.is_empty()
    }

    /// Whether the lobby has no free slot.
    pub fn is_full(&self) -> bool {
        self.player_count >= self.max_players
    }

    /// Host-side check of a joining peer's password hash. Capacity first.
    pub fn admit(&self, offered_hash: &str) -> Result<(), SessionError> {
        if self.is_full() {
            return Err(SessionError::SessionFull);
        }
        if offered_hash != self.password_hash {
            return Err(SessionError::WrongPassword);
        }
        Ok(())
    }
}

/// Hash a lobby password. The empty password hashes to the empty string.
pub fn hash_password(password: &str) -> String {
    if password.is_empty() {
        return String::new();
    }
    hex::encode(hash_bytes(password.as_bytes()))
}

/// Whether a password may be set on a lobby. Empty means no password.
pub fn is_valid_password(password: &str) -> bool {
    password.is_empty() || password.chars().count() >= MIN_PASSWORD_LEN
}

/// What the join flow should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDecision {
    /// Metadata says a password is needed.
    PromptPassword(LobbyMetadata),
    /// Metadata arrived and no password is needed.
    JoinDirectly(LobbyMetadata),
    /// No metadata in time (or cancelled); join and let the host decide.
    GaveUp,
}

/// Waits for lobby metadata, one tick at a time.
#[derive(Debug, Clone)]
pub struct LobbyJoin {
    poll: TimedPoll,
    decision: Option<JoinDecision>,
}

impl LobbyJoin {
    /// Start waiting at `now` with the client's timeout and interval.
    pub fn new(now: Instant, settings: &ClientSettings) -> Self {
        Self {
            poll: TimedPoll::new(
                now,
                settings.metadata_timeout(),
                settings.metadata_poll_interval(),
            ),
            decision: None,
        }
    }

    /// Advance the wait. `fetch` returns the metadata if it has arrived.
    /// Once a decision is made it is returned on every later call.
    pub fn step(
        &mut self,
        now: Instant,
        fetch: impl FnOnce() -> Option<LobbyMetadata>,
    ) -> Option<JoinDecision> {
        if let Some(decision) = &self.decision {
            return Some(decision.clone());
        }

        let decision = match self.poll.poll(now, fetch) {
            PollOutcome::Pending => return None,
            PollOutcome::Ready(meta) if meta.has_password() => {
                debug!(lobby = %meta.name, "Lobby requires a password");
                JoinDecision::PromptPassword(meta)
            }
            PollOutcome::Ready(meta) => {
                debug!(lobby = %meta.name, "Lobby is open");
                JoinDecision::JoinDirectly(meta)
            }
            PollOutcome::TimedOut => {
                warn!(
                    waited_ms = self.poll.elapsed(now).as_millis() as u64,
                    "No lobby metadata, joining directly"
                );
                JoinDecision::GaveUp
            }
            PollOutcome::Cancelled => {
                info!("Lobby metadata wait cancelled");
                JoinDecision::GaveUp
            }
        };
        self.decision = Some(decision.clone());
        Some(decision)
    }

    /// Stop waiting. The next step yields `GaveUp`.
    pub fn cancel(&mut self) {
        self.poll.cancel();
    }
}
