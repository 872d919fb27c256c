//! Colony Sync Demo
//!
//! Runs one host and two clients over the in-process transport, each with
//! its own copy of the same colony, makes a few conflicting edits and
//! checks that every peer ends up with the same state digest.

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use colony_sync::{
    network::loopback::{LoopbackHub, LoopbackTransport},
    sim::{DoorState, ObjectKind, Permission},
    Cell, ColonyWorld, Replicator, SettingsSurface, SyncConfig, VERSION,
};

type Peer = Replicator<ColonyWorld, LoopbackTransport>;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Colony Sync v{}", VERSION);

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let mut config = SyncConfig::load_or_create(&path)
                .with_context(|| format!("loading {}", path))?;
            config.apply_env()?;
            config
        }
        None => SyncConfig::from_env()?,
    };

    demo_session(&config)
}

/// Demo function to exercise one session end to end.
fn demo_session(config: &SyncConfig) -> Result<()> {
    info!("=== Starting Demo Session ===");

    // Every peer loads the same save.
    let mut save = ColonyWorld::new();
    let door = save.spawn_building(ObjectKind::Door, Cell(1_204))?;
    let sensor = save.spawn_building(ObjectKind::ThresholdSensor, Cell(1_310))?;
    let valve = save.spawn_building(ObjectKind::Valve, Cell(2_048))?;
    let locker = save.spawn_building(ObjectKind::StorageLocker, Cell(2_100))?;
    let dupe = save.spawn_mobile(ObjectKind::Minion);

    let hub = LoopbackHub::new();
    let mut worlds = vec![save.clone(), save.clone(), save];
    let mut peers: Vec<Peer> = Vec::new();

    let mut host = Peer::new(config, hub.host())?;
    host.host(&mut worlds[0])?;
    peers.push(host);
    for world in worlds.iter_mut().skip(1) {
        let mut client = Peer::new(config, hub.connect())?;
        client.join()?;
        client.connected(world)?;
        peers.push(client);
    }
    info!("Host and {} clients in session", peers.len() - 1);

    // The host names the duplicant and announces it; clients adopt the id.
    worlds[0].set_member_permission(door, dupe, Permission::GoLeft)?;
    peers[0].capture(&mut worlds[0]);
    let dupe_id = peers[0]
        .registry()
        .net_id_of(dupe)
        .context("host did not name the duplicant")?;
    for client in peers.iter_mut().skip(1) {
        client.adopt(dupe_id, dupe);
    }

    // Local edits on every peer, some touching the same building.
    worlds[1].set_door_state(door, DoorState::Locked)?;
    worlds[2].set_door_state(door, DoorState::Opened)?;
    worlds[1].set_threshold(sensor, 35.0)?;
    worlds[2].set_flow_rate(valve, 2.5)?;
    worlds[0].set_capacity(locker, 5_000.0)?;
    worlds[2].set_filter_tag(locker, "Metal")?;

    for tick in 0..8 {
        let mut processed = 0;
        for (peer, world) in peers.iter_mut().zip(worlds.iter_mut()) {
            processed += peer.poll(world);
        }
        info!("Tick {}: {} inbound events", tick, processed);
    }

    info!("=== Session Complete ===");
    let digests: Vec<String> = worlds.iter().map(|w| hex::encode(w.digest())).collect();
    for (i, (peer, digest)) in peers.iter().zip(&digests).enumerate() {
        info!("Peer {} ({:?}) digest: {}", i, peer.role(), &digest[..16]);
        info!("Peer {} stats: {}", i, serde_json::to_string(peer.stats())?);
    }

    if digests.windows(2).any(|pair| pair[0] != pair[1]) {
        bail!("peers diverged");
    }
    info!("All peers converged");
    Ok(())
}
