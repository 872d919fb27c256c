//! Mutation Interceptor
//!
//! The capture half of replication. Every committed change the simulation
//! reports passes through [`capture`], which decides, in this order:
//!
//! 1. replay in progress: suppress (the anti-echo rule);
//! 2. no active session: drop;
//! 3. otherwise name the target and build the envelope.
//!
//! Spawn and destroy events only maintain the identity registry.

use tracing::{debug, error, trace};

use crate::core::ids::{Cell, NetId, ObjectHandle};
use crate::network::protocol::{
    AssignmentEnvelope, ChoreAssignmentEnvelope, ConfigEnvelope, Envelope,
};
use crate::network::session::Role;
use crate::replication::guard::ReplicationContext;
use crate::replication::identity::{IdentityError, IdentityRegistry};
use crate::replication::stats::ReplicationStats;
use crate::sim::{AssignTarget, FieldChange, SimChange, Simulation};

/// What became of one observed change.
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    /// Ready to route.
    Send(Envelope),
    /// Observed during a replay.
    Suppressed,
    /// No active session.
    Inactive,
    /// This peer has no way to name the target or a referenced object.
    Unidentified,
    /// Registry bookkeeping only.
    Lifecycle,
}

impl Capture {
    /// Count this outcome.
    pub fn record(&self, stats: &mut ReplicationStats) {
        match self {
            Capture::Send(_) => stats.captured += 1,
            Capture::Suppressed => stats.echo_suppressed += 1,
            Capture::Inactive => stats.dropped_inactive += 1,
            Capture::Unidentified => stats.dropped_unidentified += 1,
            Capture::Lifecycle => {}
        }
    }
}

/// Turn one committed change into an outbound envelope, if it should be sent.
pub fn capture<S: Simulation + ?Sized>(
    ctx: &ReplicationContext,
    registry: &mut IdentityRegistry,
    sim: &S,
    change: SimChange,
) -> Capture {
    match change {
        SimChange::Spawned { object, kind } => {
            if ctx.is_active() && kind.replicates_on_spawn() {
                if let Some(role) = ctx.role() {
                    match registry.register(object, role, sim) {
                        Ok(net_id) => trace!(%object, %net_id, ?kind, "Registered on spawn"),
                        Err(error) => trace!(%object, %error, "Spawned without identity"),
                    }
                }
            }
            return Capture::Lifecycle;
        }
        SimChange::Destroyed { object } => {
            registry.unregister(object);
            return Capture::Lifecycle;
        }
        _ => {}
    }

    if ctx.is_applying_remote() {
        return Capture::Suppressed;
    }
    let Some(role) = ctx.role().filter(|_| ctx.is_active()) else {
        return Capture::Inactive;
    };

    let built = match change {
        SimChange::Field(field) => config_envelope(registry, sim, role, field),
        SimChange::Assigned { building, target } => {
            assignment_envelope(registry, sim, role, building, target)
        }
        SimChange::ChoreAssigned(order) => name(registry, sim, role, order.worker).map(|id| {
            Envelope::ChoreAssignment(ChoreAssignmentEnvelope {
                net_id: id,
                chore_type_id: order.chore_type,
                target_position: order.target_position,
                target_cell: order.target_cell,
                prefab_id: order.prefab_id,
            })
        }),
        SimChange::Spawned { .. } | SimChange::Destroyed { .. } => return Capture::Lifecycle,
    };

    match built {
        Some(envelope) => Capture::Send(envelope),
        None => Capture::Unidentified,
    }
}

/// Id of the object, or `UNASSIGNED` for an anchored object a client
/// cannot name yet (the host resolves it by cell).
fn target_id<S: Simulation + ?Sized>(
    registry: &mut IdentityRegistry,
    sim: &S,
    role: Role,
    object: ObjectHandle,
) -> Option<(NetId, Cell)> {
    let cell = sim.anchor_cell(object).unwrap_or(Cell::INVALID);
    match registry.register(object, role, sim) {
        Ok(net_id) => Some((net_id, cell)),
        Err(IdentityError::ClientCannotAllocate(_)) if cell.is_valid() => {
            Some((NetId::UNASSIGNED, cell))
        }
        Err(error) => {
            debug!(%object, %error, "Cannot name object");
            None
        }
    }
}

/// Id of an object referenced from a payload. No cell fallback.
fn name<S: Simulation + ?Sized>(
    registry: &mut IdentityRegistry,
    sim: &S,
    role: Role,
    object: ObjectHandle,
) -> Option<NetId> {
    match registry.register(object, role, sim) {
        Ok(net_id) => Some(net_id),
        Err(error) => {
            debug!(%object, %error, "Cannot name referenced object");
            None
        }
    }
}

fn config_envelope<S: Simulation + ?Sized>(
    registry: &mut IdentityRegistry,
    sim: &S,
    role: Role,
    change: FieldChange,
) -> Option<Envelope> {
    let FieldChange { object, field, value } = change;

    if value.config_type() != field.expected_type() {
        error!(%field, value = ?value, "Field reported with wrong value type");
        debug_assert!(false, "{} reported with {:?}", field, value);
        return None;
    }

    let reference = match value.referenced_object() {
        Some(other) => name(registry, sim, role, other)?,
        None => NetId::UNASSIGNED,
    };
    let (net_id, cell) = target_id(registry, sim, role, object)?;

    let mut envelope =
        ConfigEnvelope::new(net_id, cell, field.config_hash(), field.expected_type());
    value.write_payload(&mut envelope, reference);
    trace!(%field, %net_id, %object, "Captured field");
    Some(Envelope::Config(envelope))
}

fn assignment_envelope<S: Simulation + ?Sized>(
    registry: &mut IdentityRegistry,
    sim: &S,
    role: Role,
    building: ObjectHandle,
    target: AssignTarget<ObjectHandle>,
) -> Option<Envelope> {
    let target = match target {
        AssignTarget::Unassigned => AssignTarget::Unassigned,
        AssignTarget::Group(group) => AssignTarget::Group(group),
        AssignTarget::Member(member) => AssignTarget::Member(name(registry, sim, role, member)?),
    };
    let (net_id, cell) = target_id(registry, sim, role, building)?;
    Some(Envelope::Assignment(AssignmentEnvelope::new(net_id, cell, &target)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::ConfigType;
    use crate::replication::field::FieldId;
    use crate::sim::{ColonyWorld, DoorState, ObjectKind, SettingsSurface};

    fn hosting() -> ReplicationContext {
        let mut ctx = ReplicationContext::new();
        ctx.session.host().unwrap();
        ctx
    }

    fn connected() -> ReplicationContext {
        let mut ctx = ReplicationContext::new();
        ctx.session.join().unwrap();
        ctx.session.connected().unwrap();
        ctx
    }

    fn capture_all(
        ctx: &ReplicationContext,
        registry: &mut IdentityRegistry,
        world: &mut ColonyWorld,
    ) -> Vec<Capture> {
        world
            .drain_changes()
            .into_iter()
            .map(|change| capture(ctx, registry, &*world, change))
            .collect()
    }

    #[test]
    fn test_host_captures_with_allocated_id() {
        let ctx = hosting();
        let mut registry = IdentityRegistry::new(false);
        let mut world = ColonyWorld::new();
        let door = world.spawn_building(ObjectKind::Door, Cell(12)).unwrap();
        world.set_door_state(door, DoorState::Opened).unwrap();

        let captures = capture_all(&ctx, &mut registry, &mut world);
        assert_eq!(captures[0], Capture::Lifecycle);
        let Capture::Send(Envelope::Config(env)) = &captures[1] else {
            panic!("expected config envelope, got {:?}", captures[1]);
        };
        assert_eq!(env.net_id, NetId(1));
        assert_eq!(env.cell, Cell(12));
        assert_eq!(env.config_hash, FieldId::DoorState.config_hash());
        assert_eq!(env.config_type, ConfigType::Float);
        assert_eq!(env.choice(), Some(1));
    }

    #[test]
    fn test_nothing_captured_while_guard_held() {
        let ctx = hosting();
        let mut registry = IdentityRegistry::new(false);
        let mut world = ColonyWorld::new();
        let door = world.spawn_building(ObjectKind::Door, Cell(12)).unwrap();
        world.drain_changes();

        let _scope = ctx.guard.enter().unwrap();
        world.set_door_state(door, DoorState::Locked).unwrap();
        world.set_default_permission(door, "public", crate::sim::Permission::Neither).unwrap();

        let captures = capture_all(&ctx, &mut registry, &mut world);
        assert_eq!(captures, vec![Capture::Suppressed, Capture::Suppressed]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_nothing_captured_offline() {
        let ctx = ReplicationContext::new();
        let mut registry = IdentityRegistry::new(false);
        let mut world = ColonyWorld::new();
        let valve = world.spawn_building(ObjectKind::Valve, Cell(3)).unwrap();
        world.drain_changes();
        world.set_flow_rate(valve, 1.0).unwrap();

        assert_eq!(capture_all(&ctx, &mut registry, &mut world), vec![Capture::Inactive]);
    }

    #[test]
    fn test_client_sends_unassigned_with_cell() {
        let ctx = connected();
        let mut registry = IdentityRegistry::new(false);
        let mut world = ColonyWorld::new();
        let valve = world.spawn_building(ObjectKind::Valve, Cell(3)).unwrap();
        world.drain_changes();
        world.set_flow_rate(valve, 1.0).unwrap();

        let captures = capture_all(&ctx, &mut registry, &mut world);
        let Capture::Send(Envelope::Config(env)) = &captures[0] else {
            panic!("expected config envelope");
        };
        assert_eq!(env.net_id, NetId::UNASSIGNED);
        assert_eq!(env.cell, Cell(3));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_client_cannot_name_unknown_duplicant() {
        let ctx = connected();
        let mut registry = IdentityRegistry::new(true);
        let mut world = ColonyWorld::new();
        let door = world.spawn_building(ObjectKind::Door, Cell(3)).unwrap();
        let dupe = world.spawn_mobile(ObjectKind::Minion);
        world.drain_changes();
        world.set_member_permission(door, dupe, crate::sim::Permission::GoLeft).unwrap();

        assert_eq!(capture_all(&ctx, &mut registry, &mut world), vec![Capture::Unidentified]);

        registry.learn(NetId(8), dupe);
        world.set_member_permission(door, dupe, crate::sim::Permission::GoLeft).unwrap();
        let captures = capture_all(&ctx, &mut registry, &mut world);
        let Capture::Send(Envelope::Config(env)) = &captures[0] else {
            panic!("expected config envelope");
        };
        assert_eq!(env.referenced_id(), NetId(8));
        assert!(env.net_id.is_deterministic());
    }

    #[test]
    fn test_spawn_registers_storage_eagerly_and_destroy_unregisters() {
        let ctx = hosting();
        let mut registry = IdentityRegistry::new(false);
        let mut world = ColonyWorld::new();
        let locker = world.spawn_building(ObjectKind::StorageLocker, Cell(30)).unwrap();
        let door = world.spawn_building(ObjectKind::Door, Cell(31)).unwrap();
        capture_all(&ctx, &mut registry, &mut world);

        assert!(registry.net_id_of(locker).is_some());
        assert!(registry.net_id_of(door).is_none());

        world.destroy(locker);
        assert_eq!(capture_all(&ctx, &mut registry, &mut world), vec![Capture::Lifecycle]);
        assert!(registry.is_empty());
    }
}
