//! # Colony Sync
//!
//! Host-authoritative state replication for retrofitting multiplayer onto a
//! single-player colony simulation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        COLONY SYNC                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Identifiers and stable hashes            │
//! │  ├── ids.rs       - NetId, Cell, ObjectHandle, PeerId        │
//! │  └── hash.rs      - Field hashes and state digests           │
//! │                                                              │
//! │  sim/             - Simulation boundary                      │
//! │  ├── mod.rs       - Simulation / SettingsSurface traits      │
//! │  └── colony.rs    - In-memory reference world                │
//! │                                                              │
//! │  replication/     - Capture, apply, relay                    │
//! │  ├── identity.rs  - NetId registry                           │
//! │  ├── guard.rs     - Replay guard (anti-echo)                 │
//! │  ├── field.rs     - Replicated fields and values             │
//! │  ├── dispatch.rs  - Field → handler table                    │
//! │  ├── handlers.rs  - Standard handler set                     │
//! │  ├── interceptor.rs - Change feed → envelopes                │
//! │  └── replicator.rs  - Per-peer engine                        │
//! │                                                              │
//! │  network/         - Sessions and transports                  │
//! │  ├── session.rs   - Session state machine                    │
//! │  ├── protocol.rs  - Envelope wire format                     │
//! │  ├── router.rs    - Role-checked routing                     │
//! │  ├── loopback.rs  - In-process transport                     │
//! │  ├── server.rs    - WebSocket transport                      │
//! │  ├── poll.rs      - Bounded, cancellable waits               │
//! │  └── lobby.rs     - Lobby join gate                          │
//! │                                                              │
//! │  config.rs        - Settings file and env overrides          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! The host owns the truth. A client's local change travels to the host
//! only; the host applies it and broadcasts it once to every client. A
//! change applied from the network is never captured again, so nothing
//! echoes back.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod network;
pub mod replication;
pub mod sim;

// Re-export commonly used types
pub use config::{SyncConfig, ConfigError};
pub use core::ids::{Cell, NetId, ObjectHandle, PeerId};
pub use network::protocol::{ConfigEnvelope, Envelope};
pub use network::session::{Role, Session, SessionState};
pub use network::transport::Transport;
pub use replication::{FieldId, FieldValue, ReplicationError, ReplicationStats, Replicator};
pub use sim::{ColonyWorld, SettingsSurface, Simulation};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
