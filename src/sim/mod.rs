//! Simulation Boundary
//!
//! The replication core never owns the simulation. It talks to it through
//! two traits:
//!
//! - [`Simulation`]: object lookup, liveness and the post-mutation change
//!   feed (one typed event per committed field write).
//! - [`SettingsSurface`]: the idempotent setters a local caller would use.
//!   Replayed envelopes go through exactly these methods.
//!
//! [`colony::ColonyWorld`] is an in-memory implementation used by the
//! demo binary and the tests.

pub mod colony;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::ids::{Cell, ObjectHandle, ObjectLayer};
use crate::replication::field::{FieldId, FieldValue};

pub use colony::ColonyWorld;

// =============================================================================
// OBJECT KINDS
// =============================================================================

/// Object kinds the replication layer distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Mechanized or manual door.
    Door,
    /// Temperature/pressure/germ sensor with a threshold.
    ThresholdSensor,
    /// Battery with activate/deactivate charge range.
    SmartBattery,
    /// Liquid or gas valve with a flow rate.
    Valve,
    /// Valve that stops after a fixed amount.
    LimitValve,
    /// Manual signal switch.
    LogicSwitch,
    /// Storage locker (capacity, filter, sweep-only checkbox).
    StorageLocker,
    /// Generic container.
    Container,
    /// Planter box or pedestal.
    Receptacle,
    /// Painting or sculpture.
    Artable,
    /// Recipe-driven crafting station.
    Fabricator,
    /// Cycle timer sensor.
    TimerSensor,
    /// Signal counter.
    Counter,
    /// Assignable furniture (cots, lavatories, massage tables).
    Assignable,
    /// Building with several indexed slider controls.
    SliderPanel,
    /// Duplicant.
    Minion,
    /// Loose debris.
    Debris,
}

impl ObjectKind {
    /// Kinds whose identity is registered eagerly when they spawn.
    pub fn replicates_on_spawn(self) -> bool {
        matches!(
            self,
            ObjectKind::Container
                | ObjectKind::StorageLocker
                | ObjectKind::Receptacle
                | ObjectKind::Artable
        )
    }

    /// Whether the object sits on the building layer at a fixed cell.
    pub fn is_building(self) -> bool {
        !matches!(self, ObjectKind::Minion | ObjectKind::Debris)
    }

    /// Grid layer for this kind.
    pub fn layer(self) -> ObjectLayer {
        match self {
            ObjectKind::Minion => ObjectLayer::Minion,
            ObjectKind::Debris => ObjectLayer::Pickupable,
            _ => ObjectLayer::Building,
        }
    }
}

// =============================================================================
// DOMAIN VALUES
// =============================================================================

/// Requested door control state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DoorState {
    /// Opens for traffic, closes otherwise.
    #[default]
    Auto = 0,
    /// Held open.
    Opened = 1,
    /// Locked shut.
    Locked = 2,
}

impl DoorState {
    /// Decode the integer carried in an envelope.
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(DoorState::Auto),
            1 => Some(DoorState::Opened),
            2 => Some(DoorState::Locked),
            _ => None,
        }
    }
}

/// Door access permission for a group or a single duplicant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Permission {
    /// Pass in both directions.
    #[default]
    Both = 0,
    /// Pass leftwards only.
    GoLeft = 1,
    /// Pass rightwards only.
    GoRight = 2,
    /// No passage.
    Neither = 3,
}

impl Permission {
    /// Decode the integer carried in an envelope.
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Permission::Both),
            1 => Some(Permission::GoLeft),
            2 => Some(Permission::GoRight),
            3 => Some(Permission::Neither),
            _ => None,
        }
    }
}

/// Which end of a smart battery's activation range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeBound {
    /// Charge level that turns the output on.
    Activate,
    /// Charge level that turns the output off.
    Deactivate,
}

/// Which timer sensor setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerPart {
    /// Start of the active window (fraction of a cycle).
    StartTime,
    /// Length of the active window (fraction of a cycle).
    Duration,
}

/// Who an assignable building belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignTarget<T> {
    /// Nobody.
    Unassigned,
    /// A single duplicant.
    Member(T),
    /// A named assignment group (for example "public").
    Group(String),
}

/// A chore handed to a specific worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChoreOrder {
    /// Worker performing the chore.
    pub worker: ObjectHandle,
    /// Chore type identifier.
    pub chore_type: String,
    /// World-space target position.
    pub target_position: [f32; 3],
    /// Target cell.
    pub target_cell: Cell,
    /// Prefab of the target object, empty if none.
    pub prefab_id: String,
}

// =============================================================================
// CHANGE FEED
// =============================================================================

/// One committed write to a replicated field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldChange {
    /// Object whose field changed.
    pub object: ObjectHandle,
    /// Which field.
    pub field: FieldId,
    /// The value now committed.
    pub value: FieldValue,
}

/// Events emitted by the simulation after a mutation has been committed.
#[derive(Clone, Debug, PartialEq)]
pub enum SimChange {
    /// A replicated field was written.
    Field(FieldChange),
    /// An assignable building changed owner.
    Assigned {
        /// The assignable building.
        building: ObjectHandle,
        /// New owner.
        target: AssignTarget<ObjectHandle>,
    },
    /// A chore was handed to a worker.
    ChoreAssigned(ChoreOrder),
    /// An object entered the world.
    Spawned {
        /// New object.
        object: ObjectHandle,
        /// Its kind.
        kind: ObjectKind,
    },
    /// An object left the world.
    Destroyed {
        /// Removed object.
        object: ObjectHandle,
    },
}

// =============================================================================
// TRAITS
// =============================================================================

/// Simulation errors surfaced by setters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// No live object with this handle.
    #[error("unknown object {0}")]
    UnknownObject(ObjectHandle),

    /// The object has no component for this setting.
    #[error("{object} does not support {setting}")]
    Unsupported {
        /// Target object.
        object: ObjectHandle,
        /// Setting that was attempted.
        setting: &'static str,
    },

    /// Value outside the accepted range.
    #[error("{setting} value {value} out of range")]
    OutOfRange {
        /// Setting that was attempted.
        setting: &'static str,
        /// Rejected value.
        value: f32,
    },

    /// Recipe id not offered by this fabricator.
    #[error("unknown recipe {0}")]
    UnknownRecipe(String),

    /// Assignment group does not exist.
    #[error("unknown assignment group {0}")]
    UnknownGroup(String),

    /// A building already occupies the cell.
    #[error("{0} already occupied")]
    Occupied(Cell),
}

/// Read access and change feed of the simulation.
pub trait Simulation {
    /// Whether the object still exists.
    fn is_alive(&self, object: ObjectHandle) -> bool;

    /// Kind of a live object.
    fn kind_of(&self, object: ObjectHandle) -> Option<ObjectKind>;

    /// Cell a stationary object is anchored to; `None` for mobile objects.
    fn anchor_cell(&self, object: ObjectHandle) -> Option<Cell>;

    /// Object occupying a cell on a layer.
    fn object_at(&self, cell: Cell, layer: ObjectLayer) -> Option<ObjectHandle>;

    /// Take all changes committed since the last call, in commit order.
    fn drain_changes(&mut self) -> Vec<SimChange>;
}

/// The setters a local player would call. Each must be idempotent.
pub trait SettingsSurface: Simulation {
    /// Turn a manual switch on or off.
    fn set_logic_state(&mut self, object: ObjectHandle, on: bool) -> Result<(), SimError>;

    /// Set one end of an activation range.
    fn set_activation_range(
        &mut self,
        object: ObjectHandle,
        bound: RangeBound,
        value: f32,
    ) -> Result<(), SimError>;

    /// Set a sensor threshold.
    fn set_threshold(&mut self, object: ObjectHandle, value: f32) -> Result<(), SimError>;

    /// Choose whether the sensor fires above or below the threshold.
    fn set_activate_above(&mut self, object: ObjectHandle, above: bool) -> Result<(), SimError>;

    /// Set a valve flow rate.
    fn set_flow_rate(&mut self, object: ObjectHandle, rate: f32) -> Result<(), SimError>;

    /// Set one slider of a multi-slider control.
    fn set_slider(&mut self, object: ObjectHandle, index: i32, value: f32) -> Result<(), SimError>;

    /// Set a checkbox control.
    fn set_checkbox(&mut self, object: ObjectHandle, checked: bool) -> Result<(), SimError>;

    /// Set user storage capacity.
    fn set_capacity(&mut self, object: ObjectHandle, capacity: f32) -> Result<(), SimError>;

    /// Request a door control state.
    fn set_door_state(&mut self, object: ObjectHandle, state: DoorState) -> Result<(), SimError>;

    /// Set a limit valve's limit.
    fn set_limit(&mut self, object: ObjectHandle, limit: f32) -> Result<(), SimError>;

    /// Set part of a timer sensor's window.
    fn set_timer(
        &mut self,
        object: ObjectHandle,
        part: TimerPart,
        value: f32,
    ) -> Result<(), SimError>;

    /// Select a filter tag.
    fn set_filter_tag(&mut self, object: ObjectHandle, tag: &str) -> Result<(), SimError>;

    /// Set the default permission for a group.
    fn set_default_permission(
        &mut self,
        object: ObjectHandle,
        group: &str,
        permission: Permission,
    ) -> Result<(), SimError>;

    /// Set a permission override for a single duplicant.
    fn set_member_permission(
        &mut self,
        object: ObjectHandle,
        member: ObjectHandle,
        permission: Permission,
    ) -> Result<(), SimError>;

    /// Remove a duplicant's permission override.
    fn clear_member_permission(
        &mut self,
        object: ObjectHandle,
        member: ObjectHandle,
    ) -> Result<(), SimError>;

    /// Set how many of a recipe are queued.
    fn set_recipe_queue(
        &mut self,
        object: ObjectHandle,
        recipe: &str,
        count: i32,
    ) -> Result<(), SimError>;

    /// Reset a counter to zero.
    fn reset_counter(&mut self, object: ObjectHandle) -> Result<(), SimError>;

    /// Assign a building to a duplicant or group, or unassign it.
    fn assign(
        &mut self,
        building: ObjectHandle,
        target: AssignTarget<ObjectHandle>,
    ) -> Result<(), SimError>;

    /// Hand a chore to a worker.
    fn assign_chore(&mut self, order: ChoreOrder) -> Result<(), SimError>;
}
