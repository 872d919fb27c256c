//! Whole-session scenarios: one host and its clients, each with its own
//! copy of the same colony, wired through the in-process transport.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use colony_sync::core::hash::StateHash;
use colony_sync::core::ids::{Cell, NetId, ObjectHandle, ObjectLayer, PeerId};
use colony_sync::network::loopback::{LoopbackHub, LoopbackTransport, SendLog};
use colony_sync::network::protocol::{ConfigEnvelope, Envelope};
use colony_sync::network::router::Router;
use colony_sync::network::session::SessionState;
use colony_sync::network::transport::Transport;
use colony_sync::replication::{
    capture, standard_table, Capture, FieldId, FieldValue, IdentityRegistry, ReplicationContext,
    Replicator,
};
use colony_sync::sim::{
    AssignTarget, ChoreOrder, ColonyWorld, DoorState, ObjectKind, Permission, RangeBound,
    SettingsSurface,
    Simulation, TimerPart,
};
use colony_sync::SyncConfig;

type Peer = Replicator<ColonyWorld, LoopbackTransport>;

// =============================================================================
// FIXTURES
// =============================================================================

#[derive(Clone, Copy)]
struct Handles {
    switch: ObjectHandle,
    battery: ObjectHandle,
    sensor: ObjectHandle,
    valve: ObjectHandle,
    limit: ObjectHandle,
    panel: ObjectHandle,
    locker: ObjectHandle,
    door: ObjectHandle,
    fabricator: ObjectHandle,
    timer: ObjectHandle,
    counter: ObjectHandle,
    cot: ObjectHandle,
    dupe: ObjectHandle,
}

fn spawn(world: &mut ColonyWorld, kind: ObjectKind, cell: i32) -> ObjectHandle {
    world.spawn_building(kind, Cell(cell)).unwrap()
}

/// A save with one object for every replicated field.
fn save() -> (ColonyWorld, Handles) {
    let mut world = ColonyWorld::new();
    let handles = Handles {
        switch: spawn(&mut world, ObjectKind::LogicSwitch, 10),
        battery: spawn(&mut world, ObjectKind::SmartBattery, 11),
        sensor: spawn(&mut world, ObjectKind::ThresholdSensor, 12),
        valve: spawn(&mut world, ObjectKind::Valve, 13),
        limit: spawn(&mut world, ObjectKind::LimitValve, 14),
        panel: spawn(&mut world, ObjectKind::SliderPanel, 15),
        locker: spawn(&mut world, ObjectKind::StorageLocker, 16),
        door: spawn(&mut world, ObjectKind::Door, 17),
        fabricator: spawn(&mut world, ObjectKind::Fabricator, 18),
        timer: spawn(&mut world, ObjectKind::TimerSensor, 19),
        counter: spawn(&mut world, ObjectKind::Counter, 20),
        cot: spawn(&mut world, ObjectKind::Assignable, 21),
        dupe: world.spawn_mobile(ObjectKind::Minion),
    };
    world.drain_changes();
    (world, handles)
}

/// Change one field through the local setter path.
fn touch(world: &mut ColonyWorld, h: &Handles, field: FieldId) {
    match field {
        FieldId::LogicState => world.set_logic_state(h.switch, true),
        FieldId::Activate => world.set_activation_range(h.battery, RangeBound::Activate, 80.0),
        FieldId::Deactivate => world.set_activation_range(h.battery, RangeBound::Deactivate, 20.0),
        FieldId::Threshold => world.set_threshold(h.sensor, 35.0),
        FieldId::ThresholdDirection => world.set_activate_above(h.sensor, true),
        FieldId::FlowRate => world.set_flow_rate(h.valve, 2.5),
        FieldId::Slider => world.set_slider(h.panel, 2, 0.75),
        FieldId::Checkbox => world.set_checkbox(h.locker, true),
        FieldId::Capacity => world.set_capacity(h.locker, 5_000.0),
        FieldId::DoorState => world.set_door_state(h.door, DoorState::Locked),
        FieldId::LimitValve => world.set_limit(h.limit, 500.0),
        FieldId::TimerStart => world.set_timer(h.timer, TimerPart::StartTime, 0.25),
        FieldId::TimerDuration => world.set_timer(h.timer, TimerPart::Duration, 0.5),
        FieldId::FilterTag => world.set_filter_tag(h.locker, "Metal"),
        FieldId::AccessDefault => {
            world.set_default_permission(h.door, "public", Permission::Neither)
        }
        FieldId::AccessMember => world.set_member_permission(h.door, h.dupe, Permission::GoRight),
        FieldId::AccessClear => world.clear_member_permission(h.door, h.dupe),
        FieldId::RecipeQueue => world.set_recipe_queue(h.fabricator, "Steel", 3),
        FieldId::CounterReset => world.reset_counter(h.counter),
    }
    .unwrap();
}

/// Config envelope as a client without ids would send it.
fn by_cell(
    world: &ColonyWorld,
    object: ObjectHandle,
    field: FieldId,
    value: FieldValue,
) -> Envelope {
    let cell = world.anchor_cell(object).unwrap();
    let mut env =
        ConfigEnvelope::new(NetId::UNASSIGNED, cell, field.config_hash(), field.expected_type());
    value.write_payload(&mut env, NetId::UNASSIGNED);
    Envelope::Config(env)
}

/// One of five numeric edits on distinct fields.
fn numeric(world: &ColonyWorld, h: &Handles, slot: usize, value: f32) -> Envelope {
    let (object, field, value) = match slot {
        0 => (h.sensor, FieldId::Threshold, value),
        1 => (h.valve, FieldId::FlowRate, value / 10.0),
        2 => (h.limit, FieldId::LimitValve, value),
        3 => (h.locker, FieldId::Capacity, value),
        _ => (h.battery, FieldId::Activate, value),
    };
    by_cell(world, object, field, FieldValue::Number(value))
}

/// The same envelope addressed the way the host sends it.
fn from_host(envelope: Envelope) -> Envelope {
    match envelope {
        Envelope::Config(mut env) => {
            env.net_id = NetId::deterministic(env.cell, ObjectLayer::Building).unwrap();
            Envelope::Config(env)
        }
        other => other,
    }
}

fn config(deterministic: bool) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.replication.deterministic_building_ids = deterministic;
    config
}

fn lone_host(world: &mut ColonyWorld) -> Peer {
    let mut host = Peer::new(&SyncConfig::default(), LoopbackHub::new().host()).unwrap();
    host.host(world).unwrap();
    host
}

/// Host at index 0, clients after it.
struct Lan {
    hub: LoopbackHub,
    peers: Vec<Peer>,
    worlds: Vec<ColonyWorld>,
}

impl Lan {
    fn start(save: &ColonyWorld, clients: usize, config: &SyncConfig) -> Self {
        let hub = LoopbackHub::new();
        let mut worlds = vec![save.clone()];
        let mut host = Peer::new(config, hub.host()).unwrap();
        host.host(&mut worlds[0]).unwrap();
        let mut peers = vec![host];

        for _ in 0..clients {
            let mut world = save.clone();
            let mut client = Peer::new(config, hub.connect()).unwrap();
            client.join().unwrap();
            client.connected(&mut world).unwrap();
            peers.push(client);
            worlds.push(world);
        }
        Self { hub, peers, worlds }
    }

    fn settle(&mut self) {
        for _ in 0..4 {
            for (peer, world) in self.peers.iter_mut().zip(self.worlds.iter_mut()) {
                peer.poll(world);
            }
        }
    }

    fn sent(&self, index: usize) -> SendLog {
        self.hub.sent_by(self.peers[index].transport().peer_id())
    }

    /// Capture on the host and hand the id it gave `object` to every client.
    fn announce(&mut self, object: ObjectHandle) {
        self.peers[0].capture(&mut self.worlds[0]);
        let net_id = self.peers[0].registry().net_id_of(object).unwrap();
        for client in self.peers.iter_mut().skip(1) {
            client.adopt(net_id, object);
        }
    }

    /// Push raw envelope bytes from the host to one client.
    fn deliver(&self, client: usize, envelope: &Envelope) {
        let to = self.peers[client].transport().peer_id();
        self.peers[0].transport().send_unicast(to, &envelope.encode().unwrap()).unwrap();
    }

    fn digests(&self) -> Vec<StateHash> {
        self.worlds.iter().map(|w| w.digest()).collect()
    }

    fn converged(&self) -> bool {
        self.digests().windows(2).all(|pair| pair[0] == pair[1])
    }
}

// =============================================================================
// CONVERGENCE
// =============================================================================

#[test]
fn test_client_edit_reaches_everyone_with_one_broadcast() {
    for deterministic in [true, false] {
        let (save, h) = save();
        let mut lan = Lan::start(&save, 2, &config(deterministic));

        lan.worlds[1].set_threshold(h.sensor, 5.0).unwrap();
        lan.settle();

        for world in &lan.worlds {
            assert_eq!(world.settings(h.sensor).unwrap().threshold, 5.0);
        }
        assert!(lan.converged());

        let host = lan.peers[0].stats();
        assert_eq!(host.applied, 1);
        assert_eq!(host.echo_suppressed, 1);
        assert_eq!(host.relayed, 1);
        assert_eq!(lan.sent(0).broadcasts, 1);
        assert_eq!(lan.sent(1).unicasts, 1);
        assert_eq!(lan.sent(2).unicasts, 0);

        // Host never unicasts to a host, clients never broadcast.
        assert_eq!(lan.sent(0).unicasts, 0);
        assert_eq!(lan.sent(1).broadcasts, 0);
        assert_eq!(lan.sent(2).broadcasts, 0);
    }
}

#[test]
fn test_without_deterministic_ids_clients_learn_host_ids() {
    let (save, h) = save();
    let mut lan = Lan::start(&save, 2, &config(false));

    lan.worlds[2].set_flow_rate(h.valve, 4.0).unwrap();
    lan.settle();

    assert_eq!(lan.peers[2].registry().net_id_of(h.valve), Some(NetId(1)));
    assert_eq!(lan.peers[1].registry().net_id_of(h.valve), Some(NetId(1)));
    assert_eq!(lan.peers[0].registry().net_id_of(h.valve), Some(NetId(1)));
    assert!(lan.converged());
}

#[test]
fn test_every_field_from_host_converges() {
    let (save, h) = save();
    let mut lan = Lan::start(&save, 2, &config(true));

    lan.worlds[0].set_member_permission(h.door, h.dupe, Permission::GoLeft).unwrap();
    lan.announce(h.dupe);
    for field in FieldId::ALL {
        touch(&mut lan.worlds[0], &h, field);
    }
    lan.settle();

    assert!(lan.converged());
    assert_eq!(lan.sent(0).broadcasts, 1 + FieldId::ALL.len() as u64);
    assert_eq!(lan.peers[1].stats().applied, 1 + FieldId::ALL.len() as u64);
    assert_eq!(lan.peers[1].stats().dropped(), 0);
}

#[test]
fn test_every_field_from_client_is_relayed_once() {
    let (save, h) = save();
    let mut lan = Lan::start(&save, 2, &config(true));

    lan.worlds[0].set_member_permission(h.door, h.dupe, Permission::GoLeft).unwrap();
    lan.announce(h.dupe);
    lan.settle();

    for field in FieldId::ALL {
        touch(&mut lan.worlds[1], &h, field);
    }
    lan.settle();

    assert!(lan.converged());
    assert_eq!(lan.peers[0].stats().relayed, FieldId::ALL.len() as u64);
    assert_eq!(lan.sent(0).broadcasts, 1 + FieldId::ALL.len() as u64);
    assert_eq!(lan.sent(1).unicasts, FieldId::ALL.len() as u64);
    assert_eq!(lan.worlds[2].settings(h.door).unwrap().member_permissions.get(&h.dupe), None);
}

#[test]
fn test_assignment_and_chore_converge() {
    let (save, h) = save();
    let mut lan = Lan::start(&save, 2, &config(true));

    lan.worlds[1].assign(h.cot, AssignTarget::Group("public".to_string())).unwrap();
    lan.settle();
    for world in &lan.worlds {
        assert_eq!(
            world.settings(h.cot).unwrap().owner,
            Some(AssignTarget::Group("public".to_string()))
        );
    }
    assert_eq!(lan.peers[0].stats().relayed, 1);

    lan.worlds[0].assign(h.cot, AssignTarget::Member(h.dupe)).unwrap();
    lan.announce(h.dupe);
    lan.worlds[0]
        .assign_chore(ChoreOrder {
            worker: h.dupe,
            chore_type: "Dig".to_string(),
            target_position: [4.0, 7.5, 0.0],
            target_cell: Cell(40),
            prefab_id: String::new(),
        })
        .unwrap();
    lan.settle();

    assert!(lan.converged());
    let chore = lan.worlds[2].settings(h.dupe).unwrap().chore.as_ref();
    assert_eq!(chore.map(|c| c.chore_type.as_str()), Some("Dig"));
}

#[test]
fn test_conflicting_edits_end_in_host_order() {
    let (save, h) = save();
    let mut lan = Lan::start(&save, 2, &config(true));

    lan.worlds[1].set_door_state(h.door, DoorState::Locked).unwrap();
    lan.worlds[2].set_door_state(h.door, DoorState::Opened).unwrap();
    lan.settle();

    assert!(lan.converged());
    assert_eq!(lan.worlds[0].settings(h.door).unwrap().door, DoorState::Opened);
}

#[test]
fn test_cleared_filter_tag_converges() {
    let (save, h) = save();
    let mut lan = Lan::start(&save, 2, &config(true));

    lan.worlds[0].set_filter_tag(h.locker, "Metal").unwrap();
    lan.settle();
    lan.worlds[0].set_filter_tag(h.locker, "").unwrap();
    lan.settle();
    assert!(lan.converged());

    lan.worlds[1].set_filter_tag(h.locker, "Ice").unwrap();
    lan.settle();
    lan.worlds[2].set_filter_tag(h.locker, "").unwrap();
    lan.settle();

    assert!(lan.converged());
    for (world, peer) in lan.worlds.iter().zip(&lan.peers) {
        assert_eq!(world.settings(h.locker).unwrap().filter_tag.as_deref(), Some(""));
        assert_eq!(peer.stats().dropped_rejected, 0);
    }
}

#[test]
fn test_building_past_id_range_gets_host_id() {
    let (mut save, h) = save();
    let far = spawn(&mut save, ObjectKind::Valve, 1_000_000);
    save.drain_changes();
    let mut lan = Lan::start(&save, 2, &config(true));

    lan.worlds[0].set_flow_rate(far, 2.0).unwrap();
    lan.settle();
    lan.worlds[1].set_flow_rate(far, 3.0).unwrap();
    lan.worlds[2].set_flow_rate(h.valve, 1.0).unwrap();
    lan.settle();

    assert!(lan.converged());
    for (world, peer) in lan.worlds.iter().zip(&lan.peers) {
        assert_eq!(world.settings(far).unwrap().flow_rate, 3.0);
        assert_eq!(peer.registry().net_id_of(far), Some(NetId(1)));
        assert_eq!(peer.stats().dropped_unidentified, 0);
    }
}

// =============================================================================
// NO ECHO / DISPATCH COMPLETENESS
// =============================================================================

#[test]
fn test_nothing_leaves_while_guard_held() {
    let (mut world, h) = save();
    let hub = LoopbackHub::new();
    let router = Router::new(hub.host());
    let _client = hub.connect();
    let mut ctx = ReplicationContext::new();
    ctx.session.host().unwrap();
    let mut registry = IdentityRegistry::new(true);

    let scope = ctx.guard.enter().unwrap();
    for field in FieldId::ALL {
        touch(&mut world, &h, field);
        for change in world.drain_changes() {
            let outcome = capture(&ctx, &mut registry, &world, change);
            assert_eq!(outcome, Capture::Suppressed, "{} escaped the guard", field);
            if let Capture::Send(envelope) = outcome {
                router.route(&ctx.session, &envelope).unwrap();
            }
        }
    }
    drop(scope);

    assert_eq!(hub.sent_by(router.transport().peer_id()), SendLog::default());
    assert!(registry.is_empty());
}

#[test]
fn test_every_captured_field_has_a_handler() {
    let (mut world, h) = save();
    let table = standard_table::<ColonyWorld>().unwrap();
    let mut ctx = ReplicationContext::new();
    ctx.session.host().unwrap();
    let mut registry = IdentityRegistry::new(true);

    for field in FieldId::ALL {
        touch(&mut world, &h, field);
        let changes = world.drain_changes();
        assert_eq!(changes.len(), 1);
        for change in changes {
            let captured = capture(&ctx, &mut registry, &world, change);
            let Capture::Send(Envelope::Config(env)) = captured else {
                panic!("{} was not captured", field);
            };
            assert_eq!(table.field_for(env.config_hash), Some(field));
            assert_eq!(env.config_type, field.expected_type());
        }
    }
}

// =============================================================================
// FAULTS
// =============================================================================

#[test]
fn test_unknown_target_is_dropped_and_later_envelopes_still_apply() {
    let (save, h) = save();
    let mut lan = Lan::start(&save, 1, &config(true));

    let mut bogus = ConfigEnvelope::new(
        NetId(42),
        Cell::INVALID,
        FieldId::Threshold.config_hash(),
        FieldId::Threshold.expected_type(),
    );
    bogus.value = 9.0;
    lan.deliver(1, &Envelope::Config(bogus));
    lan.peers[1].poll(&mut lan.worlds[1]);

    assert_eq!(lan.peers[1].stats().dropped_stale, 1);
    assert!(lan.peers[1].registry().is_empty());
    assert_eq!(lan.worlds[1].settings(h.sensor).unwrap().threshold, 0.0);

    lan.worlds[0].set_threshold(h.sensor, 7.0).unwrap();
    lan.settle();
    assert_eq!(lan.worlds[1].settings(h.sensor).unwrap().threshold, 7.0);
    assert!(lan.converged());
}

#[test]
fn test_duplicate_delivery_matches_single_delivery() {
    let (save, h) = save();
    let mut once = Lan::start(&save, 1, &config(true));
    let mut twice = Lan::start(&save, 1, &config(true));

    let batch = [
        from_host(by_cell(&save, h.counter, FieldId::CounterReset, FieldValue::Trigger)),
        from_host(numeric(&save, &h, 0, 12.5)),
    ];

    for (lan, copies) in [(&mut once, 1), (&mut twice, 2)] {
        for _ in 0..3 {
            lan.worlds[1].pulse_counter(h.counter).unwrap();
        }
        for envelope in &batch {
            for _ in 0..copies {
                lan.deliver(1, envelope);
            }
        }
        lan.peers[1].poll(&mut lan.worlds[1]);
        assert_eq!(lan.worlds[1].settings(h.counter).unwrap().count, 0);
    }

    assert_eq!(once.worlds[1].digest(), twice.worlds[1].digest());
    assert_eq!(once.peers[1].stats().applied, 2);
    assert_eq!(twice.peers[1].stats().applied, 4);
    assert_eq!(twice.sent(1).unicasts, 0);
}

#[test]
fn test_host_loss_ends_client_session() {
    let (save, h) = save();
    let mut lan = Lan::start(&save, 1, &config(true));
    lan.worlds[0].set_threshold(h.sensor, 3.0).unwrap();
    lan.settle();
    assert!(!lan.peers[1].registry().is_empty());

    drop(lan.peers.remove(0));
    lan.worlds.remove(0);
    lan.peers[0].poll(&mut lan.worlds[0]);

    assert_eq!(lan.peers[0].session().state(), SessionState::Disconnected);
    assert!(lan.peers[0].registry().is_empty());

    lan.worlds[0].set_threshold(h.sensor, 8.0).unwrap();
    lan.peers[0].poll(&mut lan.worlds[0]);
    assert_eq!(lan.peers[0].stats().dropped_inactive, 1);
    assert_eq!(lan.sent(0).unicasts, 0);
}

#[test]
fn test_bounded_drain_per_poll() {
    let (save, h) = save();
    let mut config = config(true);
    config.host.max_messages_per_poll = 2;
    let mut lan = Lan::start(&save, 1, &config);

    for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
        lan.deliver(1, &from_host(numeric(&save, &h, 0, value)));
    }
    assert_eq!(lan.peers[1].poll(&mut lan.worlds[1]), 2);
    assert_eq!(lan.worlds[1].settings(h.sensor).unwrap().threshold, 2.0);
    assert_eq!(lan.peers[1].poll(&mut lan.worlds[1]), 2);
    assert_eq!(lan.peers[1].poll(&mut lan.worlds[1]), 1);
    assert_eq!(lan.worlds[1].settings(h.sensor).unwrap().threshold, 5.0);
}

// =============================================================================
// DELIVERY ORDER
// =============================================================================

#[test]
fn test_independent_edits_converge_in_any_order() {
    let (save, h) = save();
    let batch: Vec<Envelope> =
        (0..5).map(|slot| numeric(&save, &h, slot, 4.0 + slot as f32)).collect();

    let mut reference = save.clone();
    let mut peer = lone_host(&mut reference);
    for envelope in &batch {
        peer.handle_envelope(&mut reference, PeerId(1), envelope.clone());
    }

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..16 {
        let mut order = batch.clone();
        order.shuffle(&mut rng);

        let mut world = save.clone();
        let mut peer = lone_host(&mut world);
        for envelope in order {
            peer.handle_envelope(&mut world, PeerId(1), envelope);
        }
        assert_eq!(world.digest(), reference.digest());
    }
}

/// Up to 24 (slot, value) edits for [`numeric`].
fn numeric_edits() -> impl Strategy<Value = Vec<(usize, f32)>> {
    prop::collection::vec((0usize..5, 0.0f32..100.0), 1..24)
}

proptest! {
    #[test]
    fn duplicate_delivery_is_idempotent(edits in numeric_edits()) {
        let (save, h) = save();
        let mut once = save.clone();
        let mut twice = save.clone();
        let mut a = lone_host(&mut once);
        let mut b = lone_host(&mut twice);

        for (slot, value) in edits {
            let envelope = numeric(&save, &h, slot, value);
            a.handle_envelope(&mut once, PeerId(1), envelope.clone());
            b.handle_envelope(&mut twice, PeerId(1), envelope.clone());
            b.handle_envelope(&mut twice, PeerId(1), envelope);
        }

        prop_assert_eq!(once.digest(), twice.digest());
        prop_assert_eq!(a.stats().dropped(), 0);
    }
}
