//! Identity Registry
//!
//! Maps simulation objects to stable cross-peer [`NetId`]s and back.
//!
//! The host is the only allocator. Clients learn ids from envelopes the
//! host sends, either directly (the id is already bound locally) or through
//! the cell fallback: an unknown id arriving with the cell of a building
//! that has no identity yet is bound to that building. Buildings may also
//! take a location-derived id that every peer computes on its own.
//!
//! Handles are weak: a mapping never keeps an object alive, and resolving
//! an id whose object died reports "not found".

use std::collections::HashMap;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::core::ids::{Cell, NetId, ObjectHandle, ObjectLayer};
use crate::network::session::Role;
use crate::sim::Simulation;

/// How an identity came to exist on this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityOrigin {
    /// Allocated by this peer as host.
    Allocated,
    /// Derived from the object's cell and layer.
    Deterministic,
    /// Taken from an envelope sent by the host.
    Learned,
}

/// One replicated object.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkIdentity {
    /// Cross-peer handle.
    pub net_id: NetId,
    /// Local object. Weak: may refer to a destroyed object.
    pub object: ObjectHandle,
    /// How the id was obtained.
    pub origin: IdentityOrigin,
    /// Registry epoch at registration.
    pub epoch: u64,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

/// Identity errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Clients never mint ids.
    #[error("client cannot allocate an id for {0}")]
    ClientCannotAllocate(ObjectHandle),

    /// Allocation reached the deterministic range.
    #[error("net id space exhausted")]
    Exhausted,

    /// The object has no cell that can be encoded into an id.
    #[error("{0} has no deterministic id")]
    NotDeterministic(ObjectHandle),

    /// The id is already bound to another live object.
    #[error("{net_id} already bound to {existing}")]
    Conflict {
        /// Contested id.
        net_id: NetId,
        /// Object currently holding it.
        existing: ObjectHandle,
    },
}

/// Bidirectional `NetId` / object map.
#[derive(Debug)]
pub struct IdentityRegistry {
    by_id: HashMap<NetId, NetworkIdentity>,
    by_object: HashMap<ObjectHandle, NetId>,
    next_id: i32,
    epoch: u64,
    deterministic_buildings: bool,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl IdentityRegistry {
    /// Create an empty registry.
    ///
    /// With `deterministic_buildings`, anchored buildings get
    /// location-derived ids on both roles instead of host allocation.
    pub fn new(deterministic_buildings: bool) -> Self {
        Self {
            by_id: HashMap::new(),
            by_object: HashMap::new(),
            next_id: 1,
            epoch: 0,
            deterministic_buildings,
        }
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Bumped by every [`IdentityRegistry::clear`].
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Identity record for an id.
    pub fn identity(&self, net_id: NetId) -> Option<&NetworkIdentity> {
        self.by_id.get(&net_id)
    }

    /// Id of an object, if it has one. Does not check liveness.
    pub fn net_id_of(&self, object: ObjectHandle) -> Option<NetId> {
        self.by_object.get(&object).copied()
    }

    /// Live object for an id, or `None` if unknown or destroyed.
    pub fn resolve<S: Simulation + ?Sized>(&self, net_id: NetId, sim: &S) -> Option<ObjectHandle> {
        let identity = self.by_id.get(&net_id)?;
        if sim.is_alive(identity.object) {
            Some(identity.object)
        } else {
            trace!(%net_id, object = %identity.object, "Resolved to destroyed object");
            None
        }
    }

    /// Return the object's id, creating one if this peer may.
    ///
    /// Idempotent. Anchored buildings get their deterministic id when that
    /// mode is on and the cell has one; anything else needs the host role.
    pub fn register<S: Simulation + ?Sized>(
        &mut self,
        object: ObjectHandle,
        role: Role,
        sim: &S,
    ) -> Result<NetId, IdentityError> {
        if let Some(existing) = self.net_id_of(object) {
            return Ok(existing);
        }

        if self.deterministic_buildings {
            let building = sim.kind_of(object).map(|k| k.is_building()).unwrap_or(false);
            if let (true, Some(cell)) = (building, sim.anchor_cell(object)) {
                // Cells past the id range fall back to the role rules.
                match self.register_deterministic(object, cell, ObjectLayer::Building, sim) {
                    Err(IdentityError::NotDeterministic(_)) => {}
                    result => return result,
                }
            }
        }

        match role {
            Role::Host => self.allocate(object),
            Role::Client => Err(IdentityError::ClientCannotAllocate(object)),
        }
    }

    /// Allocate the next host id for an object.
    pub fn allocate(&mut self, object: ObjectHandle) -> Result<NetId, IdentityError> {
        if let Some(existing) = self.net_id_of(object) {
            return Ok(existing);
        }
        if self.next_id >= NetId::DETERMINISTIC_BASE {
            return Err(IdentityError::Exhausted);
        }

        let net_id = NetId(self.next_id);
        self.next_id += 1;
        self.insert(net_id, object, IdentityOrigin::Allocated);
        debug!(%net_id, %object, "Allocated identity");
        Ok(net_id)
    }

    /// Bind an object to its location-derived id.
    pub fn register_deterministic<S: Simulation + ?Sized>(
        &mut self,
        object: ObjectHandle,
        cell: Cell,
        layer: ObjectLayer,
        sim: &S,
    ) -> Result<NetId, IdentityError> {
        if let Some(existing) = self.net_id_of(object) {
            return Ok(existing);
        }
        let net_id = NetId::deterministic(cell, layer)
            .ok_or(IdentityError::NotDeterministic(object))?;

        if let Some(holder) = self.by_id.get(&net_id).map(|i| i.object) {
            if sim.is_alive(holder) {
                return Err(IdentityError::Conflict { net_id, existing: holder });
            }
            self.by_object.remove(&holder);
        }

        self.insert(net_id, object, IdentityOrigin::Deterministic);
        debug!(%net_id, %object, %cell, "Registered deterministic identity");
        Ok(net_id)
    }

    /// Bind an id announced by the host, overriding stale local bindings.
    pub fn learn(&mut self, net_id: NetId, object: ObjectHandle) {
        if self.net_id_of(object) == Some(net_id) {
            return;
        }
        if let Some(old) = self.by_object.remove(&object) {
            warn!(%object, old = %old, new = %net_id, "Overriding identity with host id");
            self.by_id.remove(&old);
        }
        if let Some(previous) = self.by_id.remove(&net_id) {
            warn!(%net_id, old = %previous.object, new = %object, "Rebinding id to new object");
            self.by_object.remove(&previous.object);
        }
        self.insert(net_id, object, IdentityOrigin::Learned);
        debug!(%net_id, %object, "Learned identity");
    }

    /// Remove an object's identity. Returns the id it had.
    pub fn unregister(&mut self, object: ObjectHandle) -> Option<NetId> {
        let net_id = self.by_object.remove(&object)?;
        self.by_id.remove(&net_id);
        trace!(%net_id, %object, "Unregistered identity");
        Some(net_id)
    }

    /// Drop identities whose objects no longer exist. Returns how many.
    pub fn prune<S: Simulation + ?Sized>(&mut self, sim: &S) -> usize {
        let dead: Vec<ObjectHandle> = self
            .by_object
            .keys()
            .copied()
            .filter(|object| !sim.is_alive(*object))
            .collect();
        for object in &dead {
            self.unregister(*object);
        }
        dead.len()
    }

    /// Forget everything and restart allocation. Used between sessions.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_object.clear();
        self.next_id = 1;
        self.epoch += 1;
    }

    /// Resolve the target of an incoming envelope.
    ///
    /// Tries the id first, then the building at `cell`:
    /// - an unidentified building is bound to the sender's id on a client,
    ///   or registered on the host when the sender had no id;
    /// - on a client, a building bound to a different id is rebound to the
    ///   host's id;
    /// - on the host, an id it never issued is stale unless it is the
    ///   building's deterministic id.
    ///
    /// Returns the object and the id it is now known by.
    pub fn resolve_target<S: Simulation + ?Sized>(
        &mut self,
        net_id: NetId,
        cell: Cell,
        role: Role,
        sim: &S,
    ) -> Option<(ObjectHandle, NetId)> {
        if net_id.is_assigned() {
            if let Some(object) = self.resolve(net_id, sim) {
                return Some((object, net_id));
            }
        }
        if !cell.is_valid() {
            return None;
        }
        let object = sim.object_at(cell, ObjectLayer::Building)?;
        let existing = self.net_id_of(object);

        match (role, existing) {
            (_, Some(known)) if !net_id.is_assigned() || known == net_id => Some((object, known)),
            (Role::Client, _) if net_id.is_assigned() => {
                self.learn(net_id, object);
                Some((object, net_id))
            }
            (Role::Client, _) => None,
            (Role::Host, Some(_)) => None,
            (Role::Host, None) if !net_id.is_assigned() => {
                self.register(object, Role::Host, sim).ok().map(|id| (object, id))
            }
            (Role::Host, None) => {
                if NetId::deterministic(cell, ObjectLayer::Building) == Some(net_id) {
                    self.register_deterministic(object, cell, ObjectLayer::Building, sim)
                        .ok()
                        .map(|id| (object, id))
                } else {
                    None
                }
            }
        }
    }

    fn insert(&mut self, net_id: NetId, object: ObjectHandle, origin: IdentityOrigin) {
        self.by_object.insert(object, net_id);
        self.by_id.insert(
            net_id,
            NetworkIdentity {
                net_id,
                object,
                origin,
                epoch: self.epoch,
                registered_at: Utc::now(),
            },
        );
    }
}
