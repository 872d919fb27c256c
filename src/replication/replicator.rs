//! Replicator
//!
//! One peer's replication engine. Owns the context (guard and session),
//! the identity registry, the dispatch table and the router, and is
//! driven from the simulation thread:
//!
//! ```text
//! poll(sim)
//!   ├─ capture: drain local changes ─▶ interceptor ─▶ route (client→host | host→clients)
//!   └─ receive: ≤ max_messages_per_poll transport events
//!        └─ envelope ─▶ resolve target ─▶ [guard] handler ─▶ suppressed echo [/guard]
//!                                         └─ host only: relay once through the same route
//! ```
//!
//! Every drop named in the error taxonomy (stale target, unknown field,
//! bad payload, undecodable bytes, wrong sender) is logged and counted
//! here; none of them escape as an error.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, SyncConfig};
use crate::core::ids::{Cell, NetId, ObjectHandle, PeerId};
use crate::network::protocol::{CodecError, Envelope};
use crate::network::router::{Inbound, RouteError, Router};
use crate::network::session::{Role, Session, SessionError, SessionState, Transition};
use crate::network::transport::{Transport, TransportError, TransportEvent};
use crate::replication::dispatch::{ApplyError, DispatchError, DispatchTable};
use crate::replication::guard::ReplicationContext;
use crate::replication::handlers::{self, standard_table};
use crate::replication::identity::{IdentityError, IdentityRegistry};
use crate::replication::interceptor::{self, Capture};
use crate::replication::stats::ReplicationStats;
use crate::sim::SettingsSurface;

/// Errors surfaced by the replicator's own API.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Illegal session transition.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Dispatch table failed its startup checks.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Identity registry refused an operation.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Routing failed.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Codec failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Configuration invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Replication engine for one peer.
pub struct Replicator<S, T> {
    ctx: ReplicationContext,
    registry: IdentityRegistry,
    dispatch: DispatchTable<S>,
    router: Router<T>,
    stats: ReplicationStats,
    max_messages_per_poll: usize,
    enforce_cell_check: bool,
}

impl<S: SettingsSurface, T: Transport> Replicator<S, T> {
    /// Replicator with the standard handler set.
    pub fn new(config: &SyncConfig, transport: T) -> Result<Self, ReplicationError> {
        Self::with_table(config, transport, standard_table()?)
    }

    /// Replicator with a custom dispatch table. The table must be complete.
    pub fn with_table(
        config: &SyncConfig,
        transport: T,
        dispatch: DispatchTable<S>,
    ) -> Result<Self, ReplicationError> {
        dispatch.ensure_complete()?;
        Ok(Self {
            ctx: ReplicationContext::new(),
            registry: IdentityRegistry::new(config.replication.deterministic_building_ids),
            dispatch,
            router: Router::new(transport),
            stats: ReplicationStats::default(),
            max_messages_per_poll: config.host.max_messages_per_poll.max(1),
            enforce_cell_check: config.replication.enforce_cell_check,
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Replication context.
    pub fn context(&self) -> &ReplicationContext {
        &self.ctx
    }

    /// Session state machine.
    pub fn session(&self) -> &Session {
        &self.ctx.session
    }

    /// Current role.
    pub fn role(&self) -> Option<Role> {
        self.ctx.role()
    }

    /// Identity registry.
    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    /// Counters.
    pub fn stats(&self) -> &ReplicationStats {
        &self.stats
    }

    /// Transport.
    pub fn transport(&self) -> &T {
        self.router.transport()
    }

    /// Transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        self.router.transport_mut()
    }

    /// Bind an id the host announced out of band (for example in a spawn message).
    pub fn adopt(&mut self, net_id: NetId, object: ObjectHandle) {
        self.registry.learn(net_id, object);
    }

    // =========================================================================
    // SESSION
    // =========================================================================

    /// Start hosting. Changes committed before this point are not sent.
    pub fn host(&mut self, sim: &mut S) -> Result<(), ReplicationError> {
        self.capture(sim);
        let transition = self.ctx.session.host()?;
        self.on_transition(transition);
        Ok(())
    }

    /// Stop hosting.
    pub fn stop_hosting(&mut self, sim: &mut S) -> Result<(), ReplicationError> {
        self.capture(sim);
        let transition = self.ctx.session.stop_hosting()?;
        self.on_transition(transition);
        Ok(())
    }

    /// Begin joining a host.
    pub fn join(&mut self) -> Result<(), ReplicationError> {
        let transition = self.ctx.session.join()?;
        self.on_transition(transition);
        Ok(())
    }

    /// The host accepted this client. Changes committed before this point are not sent.
    pub fn connected(&mut self, sim: &mut S) -> Result<(), ReplicationError> {
        self.capture(sim);
        let transition = self.ctx.session.connected()?;
        self.on_transition(transition);
        Ok(())
    }

    /// Lost or left the host.
    pub fn disconnect(&mut self, sim: &mut S) -> Result<(), ReplicationError> {
        self.capture(sim);
        let transition = self.ctx.session.disconnect()?;
        self.on_transition(transition);
        Ok(())
    }

    /// Drop back to offline from any state.
    pub fn reset(&mut self) {
        let transition = self.ctx.session.reset();
        self.on_transition(transition);
    }

    fn on_transition(&mut self, transition: Transition) {
        if !(transition.entered_session() || transition.left_session()) {
            return;
        }
        self.registry.clear();
        self.ctx.guard.reset();

        if transition.left_session() {
            let discarded = self
                .router
                .transport_mut()
                .drain(usize::MAX)
                .into_iter()
                .filter(|event| matches!(event, TransportEvent::Message { .. }))
                .count();
            self.stats.dropped_inactive += discarded as u64;
            info!(discarded, state = %transition.to, "Left session");
        }
    }

    // =========================================================================
    // CAPTURE
    // =========================================================================

    /// Send every change the simulation committed since the last call.
    /// Returns how many envelopes went out.
    pub fn capture(&mut self, sim: &mut S) -> usize {
        let mut sent = 0;
        for change in sim.drain_changes() {
            let capture = interceptor::capture(&self.ctx, &mut self.registry, &*sim, change);
            capture.record(&mut self.stats);
            if let Capture::Send(envelope) = capture {
                if self.emit(&envelope) {
                    sent += 1;
                }
            }
        }
        sent
    }

    /// The one outbound path, shared by local capture and host relay.
    fn emit(&mut self, envelope: &Envelope) -> bool {
        match self.router.route(&self.ctx.session, envelope) {
            Ok(()) => {
                self.stats.sent += 1;
                true
            }
            Err(error) => {
                self.stats.send_failures += 1;
                warn!(%error, "Send failed");
                false
            }
        }
    }

    // =========================================================================
    // RECEIVE
    // =========================================================================

    /// One simulation tick: capture local changes, then apply at most
    /// `max_messages_per_poll` inbound events. Returns how many were processed.
    pub fn poll(&mut self, sim: &mut S) -> usize {
        self.capture(sim);

        let inbound = self.router.receive(&self.ctx.session, self.max_messages_per_poll);
        let processed = inbound.len();
        for item in inbound {
            match item {
                Inbound::Envelope { from, envelope } => {
                    self.stats.received += 1;
                    self.handle_envelope(sim, from, envelope);
                }
                Inbound::Undecodable { .. } => {
                    self.stats.received += 1;
                    self.stats.dropped_undecodable += 1;
                }
                Inbound::Unauthorized { from } => {
                    self.stats.received += 1;
                    self.stats.dropped_unauthorized += 1;
                    debug!(%from, "Envelope from non-host peer dropped");
                }
                Inbound::Membership(event) => self.handle_membership(sim, event),
            }
        }
        processed
    }

    fn handle_membership(&mut self, sim: &mut S, event: TransportEvent) {
        match event {
            TransportEvent::PeerJoined(peer) => info!(%peer, "Peer joined"),
            TransportEvent::PeerLeft(peer) => info!(%peer, "Peer left"),
            TransportEvent::HostLost => {
                warn!("Connection to host lost");
                let state = self.ctx.session.state();
                if matches!(state, SessionState::Joining | SessionState::Connected) {
                    if let Err(error) = self.disconnect(sim) {
                        warn!(%error, "Disconnect failed");
                    }
                }
            }
            TransportEvent::Message { .. } => {}
        }
    }

    /// Apply one decoded envelope received from `from`.
    pub fn handle_envelope(&mut self, sim: &mut S, from: PeerId, envelope: Envelope) {
        let Some(role) = self.ctx.role().filter(|_| self.ctx.is_active()) else {
            self.stats.dropped_inactive += 1;
            debug!(%from, "Envelope outside session dropped");
            return;
        };

        // Local changes go out before the replay so the guard cannot swallow them.
        self.capture(sim);

        match envelope {
            Envelope::Config(mut env) => {
                let Some((object, net_id)) = self.locate(sim, role, env.net_id, env.cell) else {
                    return;
                };
                let result = self.replay(sim, |sim, registry, dispatch| {
                    dispatch.apply(sim, registry, object, &env).map(|_| ())
                });
                if self.settle(result, net_id) && role == Role::Host {
                    env.net_id = net_id;
                    env.cell = sim.anchor_cell(object).unwrap_or(Cell::INVALID);
                    self.relay(Envelope::Config(env));
                }
            }
            Envelope::Assignment(mut env) => {
                let located = self.locate(sim, role, env.building_net_id, env.cell);
                let Some((building, net_id)) = located else {
                    return;
                };
                let result = self.replay(sim, |sim, registry, _| {
                    handlers::apply_assignment(sim, registry, building, &env)
                });
                if self.settle(result, net_id) && role == Role::Host {
                    env.building_net_id = net_id;
                    env.cell = sim.anchor_cell(building).unwrap_or(Cell::INVALID);
                    self.relay(Envelope::Assignment(env));
                }
            }
            Envelope::ChoreAssignment(env) => {
                let Some(worker) = self.registry.resolve(env.net_id, &*sim) else {
                    self.stats.dropped_stale += 1;
                    debug!(net_id = %env.net_id, "Chore for unknown worker dropped");
                    return;
                };
                let result = self.replay(sim, |sim, _, _| handlers::apply_chore(sim, worker, &env));
                if self.settle(result, env.net_id) && role == Role::Host {
                    self.relay(Envelope::ChoreAssignment(env));
                }
            }
        }
    }

    /// Resolve a target and check it still sits where the sender saw it.
    fn locate(
        &mut self,
        sim: &S,
        role: Role,
        net_id: NetId,
        cell: Cell,
    ) -> Option<(ObjectHandle, NetId)> {
        let Some((object, resolved)) = self.registry.resolve_target(net_id, cell, role, sim) else {
            self.stats.dropped_stale += 1;
            debug!(%net_id, %cell, "Stale target dropped");
            return None;
        };
        if self.enforce_cell_check && cell.is_valid() {
            if let Some(anchor) = sim.anchor_cell(object) {
                if anchor != cell {
                    self.stats.dropped_stale += 1;
                    debug!(%net_id, expected = %cell, actual = %anchor, "Target moved, dropped");
                    return None;
                }
            }
        }
        Some((object, resolved))
    }

    /// Run `apply` with the guard held; changes it produces are observed
    /// by the interceptor, which suppresses them.
    fn replay(
        &mut self,
        sim: &mut S,
        apply: impl FnOnce(&mut S, &IdentityRegistry, &DispatchTable<S>) -> Result<(), ApplyError>,
    ) -> Option<Result<(), ApplyError>> {
        let Self { ctx, registry, dispatch, stats, .. } = self;
        let ctx: &ReplicationContext = ctx;
        let dispatch: &DispatchTable<S> = dispatch;
        ctx.guard.replay(
            sim,
            registry,
            |sim, registry| apply(sim, &*registry, dispatch),
            |sim, registry, change| interceptor::capture(ctx, registry, sim, change).record(stats),
        )
    }

    /// Count the outcome of a replay. Returns true if it applied.
    fn settle(&mut self, result: Option<Result<(), ApplyError>>, net_id: NetId) -> bool {
        match result {
            Some(Ok(())) => {
                self.stats.applied += 1;
                true
            }
            Some(Err(ApplyError::UnknownField(hash))) => {
                self.stats.dropped_unknown_field += 1;
                debug!(%net_id, hash, "Unknown field dropped");
                false
            }
            Some(Err(ApplyError::UnresolvedReference(reference))) => {
                self.stats.dropped_stale += 1;
                debug!(%net_id, %reference, "Unresolved reference dropped");
                false
            }
            Some(Err(error)) => {
                self.stats.dropped_rejected += 1;
                debug!(%net_id, %error, "Envelope rejected");
                false
            }
            None => {
                self.stats.echo_suppressed += 1;
                debug!(%net_id, "Nested replay ignored");
                false
            }
        }
    }

    /// Host only: re-broadcast an applied client envelope, exactly once.
    fn relay(&mut self, envelope: Envelope) {
        if self.emit(&envelope) {
            self.stats.relayed += 1;
        }
    }
}
