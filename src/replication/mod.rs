//! Replication Layer
//!
//! Host-authoritative replication of building settings, assignments and
//! chore orders. Local changes are captured from the simulation's change
//! feed, routed by role, and applied on remote peers under the replay
//! guard so they are never captured a second time.

pub mod dispatch;
pub mod field;
pub mod guard;
pub mod handlers;
pub mod identity;
pub mod interceptor;
pub mod replicator;
pub mod stats;

pub use dispatch::{ApplyError, ConfigHandler, DispatchError, DispatchTable};
pub use field::{FieldId, FieldValue};
pub use guard::{GuardScope, ReplayGuard, ReplicationContext};
pub use handlers::standard_table;
pub use identity::{IdentityError, IdentityOrigin, IdentityRegistry, NetworkIdentity};
pub use interceptor::{capture, Capture};
pub use replicator::{ReplicationError, Replicator};
pub use stats::ReplicationStats;
