//! Core primitives.
//!
//! Identifier newtypes and the stable hashes every peer must agree on.
//! Nothing in this module knows about sessions, roles or transports.

pub mod hash;
pub mod ids;

// Re-export core types
pub use hash::{config_hash, StateHash, StateHasher};
pub use ids::{Cell, NetId, ObjectHandle, ObjectLayer, PeerId};
