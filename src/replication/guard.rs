//! Reentrancy Guard
//!
//! While a received envelope is replayed into the simulation, the changes
//! that replay produces must not be captured and sent again. The guard is
//! a plain flag owned by one [`ReplicationContext`]; acquisition is scoped
//! so the flag drops back to false on every exit path, unwinding included.

use std::cell::Cell;

use crate::network::session::{Role, Session};
use crate::sim::{SimChange, Simulation};

/// Flag set while one remote envelope is being applied.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    held: Cell<bool>,
}

impl ReplayGuard {
    /// New, released guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a replay is in progress.
    pub fn is_held(&self) -> bool {
        self.held.get()
    }

    /// Acquire for the lifetime of the returned scope.
    ///
    /// Returns `None` if already held; a nested acquisition is a no-op.
    #[must_use = "the guard is released as soon as the scope is dropped"]
    pub fn enter(&self) -> Option<GuardScope<'_>> {
        if self.held.replace(true) {
            return None;
        }
        Some(GuardScope { guard: self })
    }

    /// Force the flag down. Only used when tearing a session down.
    pub fn reset(&self) {
        self.held.set(false);
    }

    /// Run `apply` against the simulation with the guard held, then hand
    /// every change it produced to `observe` before releasing.
    ///
    /// `state` is lent to both closures in turn. Returns `None` without
    /// running anything if the guard is already held.
    pub fn replay<S, C, R>(
        &self,
        sim: &mut S,
        state: &mut C,
        apply: impl FnOnce(&mut S, &mut C) -> R,
        mut observe: impl FnMut(&S, &mut C, SimChange),
    ) -> Option<R>
    where
        S: Simulation + ?Sized,
        C: ?Sized,
    {
        let _scope = self.enter()?;
        let result = apply(&mut *sim, &mut *state);
        for change in sim.drain_changes() {
            observe(&*sim, &mut *state, change);
        }
        Some(result)
    }
}

/// Holds a [`ReplayGuard`] until dropped.
#[derive(Debug)]
pub struct GuardScope<'a> {
    guard: &'a ReplayGuard,
}

impl Drop for GuardScope<'_> {
    fn drop(&mut self) {
        self.guard.held.set(false);
    }
}

/// Role, session and replay state for one peer.
///
/// Passed explicitly to every replication entry point so independent peers
/// can live in one process.
#[derive(Debug, Default)]
pub struct ReplicationContext {
    /// Replay guard.
    pub guard: ReplayGuard,
    /// Session state machine.
    pub session: Session,
}

impl ReplicationContext {
    /// Offline context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a remote envelope is being applied.
    pub fn is_applying_remote(&self) -> bool {
        self.guard.is_held()
    }

    /// Role in the current session.
    pub fn role(&self) -> Option<Role> {
        self.session.role()
    }

    /// Whether changes flow right now.
    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }
}
