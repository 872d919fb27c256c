//! Identifier Types
//!
//! Newtypes for the handles that cross the replication boundary.
//! `NetId` and `Cell` travel on the wire as `i32`; `ObjectHandle` and
//! `PeerId` are local to one process and never serialized into envelopes.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Stable cross-peer handle of a replicated simulation object.
///
/// Zero is reserved for "not yet assigned"; a client that observes a
/// mutation on an object it has no identity for sends `UNASSIGNED` and
/// lets the host resolve the target by cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NetId(pub i32);

impl NetId {
    /// Placeholder carried by envelopes whose sender has no id for the target.
    pub const UNASSIGNED: NetId = NetId(0);

    /// First id of the deterministic building range.
    pub const DETERMINISTIC_BASE: i32 = 1_000_000_000;

    /// Stride between object layers inside the deterministic range.
    pub const LAYER_STRIDE: i32 = 1_000_000;

    /// Create from a raw wire value.
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw wire value.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Whether this id refers to an actual object.
    pub const fn is_assigned(self) -> bool {
        self.0 > 0
    }

    /// Whether this id was derived from a building location.
    pub const fn is_deterministic(self) -> bool {
        self.0 >= Self::DETERMINISTIC_BASE
    }

    /// Derive the location-based id of a building.
    ///
    /// Every peer loads the same save, so a building at a given cell and
    /// layer gets the same id everywhere without the host announcing it.
    /// Returns `None` for cells outside the encodable range.
    pub fn deterministic(cell: Cell, layer: ObjectLayer) -> Option<Self> {
        if !cell.is_valid() || cell.0 >= Self::LAYER_STRIDE {
            return None;
        }
        Some(Self(Self::DETERMINISTIC_BASE + cell.0 + layer.index() * Self::LAYER_STRIDE))
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Linear world grid position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Cell(pub i32);

impl Cell {
    /// Marker for "no anchored position" (mobile objects).
    pub const INVALID: Cell = Cell(-1);

    /// Whether the cell lies on the grid.
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell {}", self.0)
    }
}

/// The simulation's own key for an object.
///
/// Holding a handle does not keep the object alive; liveness is always
/// checked against the simulation before use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle(pub u64);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Transport-level peer identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

/// Grid layer an object occupies.
///
/// Several objects may share a cell as long as they sit on different
/// layers (a door and the wire running through it).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectLayer {
    /// Duplicants and critters.
    Minion = 0,
    /// Complete buildings.
    Building = 1,
    /// Power and automation wiring.
    Wire = 2,
    /// Liquid and gas pipes.
    Conduit = 3,
    /// Loose items on the floor.
    Pickupable = 4,
}

impl ObjectLayer {
    /// Numeric layer index used in deterministic ids.
    pub const fn index(self) -> i32 {
        self as i32
    }
}
