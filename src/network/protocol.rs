//! Protocol Messages
//!
//! Wire format for replication envelopes.
//!
//! Every message is `[kind: u8][version: u8][body]`, where the body is the
//! envelope struct serialized with bincode as a fixed-order tuple
//! (little-endian integers, length-prefixed strings). JSON is available
//! for debugging dumps only.

use std::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::core::ids::{Cell, NetId};
use crate::sim::AssignTarget;

/// Current body layout version for every envelope kind.
pub const WIRE_VERSION: u8 = 1;

/// Upper bound on an encoded envelope; larger inputs are rejected before decoding.
pub const MAX_ENVELOPE_BYTES: usize = 4096;

// =============================================================================
// CONFIG TYPE
// =============================================================================

/// Selects how the payload slots of a [`ConfigEnvelope`] are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConfigType {
    /// `value` is 0.0 or 1.0.
    Boolean = 0,
    /// `value` is a plain number (integral for enums).
    Float = 1,
    /// `string_value` carries the payload; `value` may carry a secondary choice.
    String = 2,
    /// `slider_index` is a secondary integer (slider index or referenced `NetId`).
    SliderIndex = 3,
    /// `string_value` is a recipe id and `value` its queued count.
    RecipeQueue = 4,
}

impl ConfigType {
    /// Decode the wire byte.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ConfigType::Boolean),
            1 => Some(ConfigType::Float),
            2 => Some(ConfigType::String),
            3 => Some(ConfigType::SliderIndex),
            4 => Some(ConfigType::RecipeQueue),
            _ => None,
        }
    }
}

impl Serialize for ConfigType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for ConfigType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        ConfigType::from_u8(raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown config type {}", raw)))
    }
}

// =============================================================================
// ENVELOPES
// =============================================================================

/// The generic field-update envelope.
///
/// One shape serves every replicated field; `config_hash` names the field
/// and `config_type` says which payload slots are meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEnvelope {
    /// Target object.
    pub net_id: NetId,
    /// Where the sender believed the target to be (`Cell::INVALID` for mobile objects).
    pub cell: Cell,
    /// Identifier of the logical field being updated.
    pub config_hash: i32,
    /// Numeric payload.
    pub value: f32,
    /// Payload interpretation.
    pub config_type: ConfigType,
    /// String payload, empty unless `config_type` uses it.
    pub string_value: String,
    /// Secondary integer slot.
    pub slider_index: i32,
}

impl ConfigEnvelope {
    /// Envelope with empty payload slots for a target and field.
    pub fn new(net_id: NetId, cell: Cell, config_hash: i32, config_type: ConfigType) -> Self {
        Self {
            net_id,
            cell,
            config_hash,
            value: 0.0,
            config_type,
            string_value: String::new(),
            slider_index: 0,
        }
    }

    /// Boolean payload (`value > 0.5`).
    pub fn flag(&self) -> bool {
        self.value > 0.5
    }

    /// Integral payload, if `value` holds a whole number.
    pub fn choice(&self) -> Option<i32> {
        let v = self.value;
        if v.is_finite() && v.fract() == 0.0 && v >= i32::MIN as f32 && v <= i32::MAX as f32 {
            Some(v as i32)
        } else {
            None
        }
    }

    /// String payload, if non-empty.
    pub fn text(&self) -> Option<&str> {
        if self.string_value.is_empty() {
            None
        } else {
            Some(&self.string_value)
        }
    }

    /// Object referenced through the secondary slot.
    pub fn referenced_id(&self) -> NetId {
        NetId(self.slider_index)
    }
}

/// Assignment of a building to a duplicant or group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentEnvelope {
    /// Building being assigned.
    pub building_net_id: NetId,
    /// Building cell for staleness checks and fallback lookup.
    pub cell: Cell,
    /// Assigned duplicant, or [`AssignmentEnvelope::NO_ASSIGNEE`].
    pub assignee_net_id: NetId,
    /// Assignment group, empty unless assigning to a group.
    pub group_id: String,
}

impl AssignmentEnvelope {
    /// Assignee sentinel for "nobody".
    pub const NO_ASSIGNEE: NetId = NetId(-1);

    /// Build from a resolved target.
    pub fn new(building_net_id: NetId, cell: Cell, target: &AssignTarget<NetId>) -> Self {
        let (assignee_net_id, group_id) = match target {
            AssignTarget::Unassigned => (Self::NO_ASSIGNEE, String::new()),
            AssignTarget::Member(id) => (*id, String::new()),
            AssignTarget::Group(group) => (Self::NO_ASSIGNEE, group.clone()),
        };
        Self {
            building_net_id,
            cell,
            assignee_net_id,
            group_id,
        }
    }

    /// Interpret the assignee fields. A group wins over a member id.
    pub fn target(&self) -> AssignTarget<NetId> {
        if !self.group_id.is_empty() {
            AssignTarget::Group(self.group_id.clone())
        } else if self.assignee_net_id.is_assigned() {
            AssignTarget::Member(self.assignee_net_id)
        } else {
            AssignTarget::Unassigned
        }
    }
}

/// A chore handed to a specific worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoreAssignmentEnvelope {
    /// Worker receiving the chore.
    pub net_id: NetId,
    /// Chore type identifier.
    pub chore_type_id: String,
    /// World-space target position.
    pub target_position: [f32; 3],
    /// Target cell.
    pub target_cell: Cell,
    /// Prefab of the target, empty if none.
    pub prefab_id: String,
}

/// Message kind byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// [`ConfigEnvelope`].
    Config = 1,
    /// [`AssignmentEnvelope`].
    Assignment = 2,
    /// [`ChoreAssignmentEnvelope`].
    ChoreAssignment = 3,
}

impl EnvelopeKind {
    /// Decode the kind byte.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(EnvelopeKind::Config),
            2 => Some(EnvelopeKind::Assignment),
            3 => Some(EnvelopeKind::ChoreAssignment),
            _ => None,
        }
    }
}

/// Any replication message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Generic field update.
    Config(ConfigEnvelope),
    /// Building assignment.
    Assignment(AssignmentEnvelope),
    /// Chore assignment.
    ChoreAssignment(ChoreAssignmentEnvelope),
}

impl Envelope {
    /// Kind byte of this envelope.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Config(_) => EnvelopeKind::Config,
            Envelope::Assignment(_) => EnvelopeKind::Assignment,
            Envelope::ChoreAssignment(_) => EnvelopeKind::ChoreAssignment,
        }
    }

    /// Primary target of the envelope.
    pub fn target(&self) -> NetId {
        match self {
            Envelope::Config(e) => e.net_id,
            Envelope::Assignment(e) => e.building_net_id,
            Envelope::ChoreAssignment(e) => e.net_id,
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Config(e) => {
                write!(f, "config {} hash={} {:?}", e.net_id, e.config_hash, e.config_type)
            }
            Envelope::Assignment(e) => write!(f, "assignment {}", e.building_net_id),
            Envelope::ChoreAssignment(e) => write!(f, "chore {} {}", e.net_id, e.chore_type_id),
        }
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// No bytes at all.
    #[error("empty message")]
    Empty,

    /// Message exceeds [`MAX_ENVELOPE_BYTES`].
    #[error("message of {0} bytes exceeds limit")]
    TooLarge(usize),

    /// Kind byte not recognized.
    #[error("unknown envelope kind {0}")]
    UnknownKind(u8),

    /// Body layout version not supported.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    /// Body failed to decode.
    #[error("malformed envelope body: {0}")]
    Malformed(#[from] bincode::Error),

    /// JSON debug encoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Envelope {
    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![self.kind() as u8, WIRE_VERSION];
        match self {
            Envelope::Config(e) => bincode::serialize_into(&mut out, e)?,
            Envelope::Assignment(e) => bincode::serialize_into(&mut out, e)?,
            Envelope::ChoreAssignment(e) => bincode::serialize_into(&mut out, e)?,
        }
        Ok(out)
    }

    /// Deserialize from the binary wire format.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() > MAX_ENVELOPE_BYTES {
            return Err(CodecError::TooLarge(data.len()));
        }
        let (&kind, rest) = data.split_first().ok_or(CodecError::Empty)?;
        let kind = EnvelopeKind::from_u8(kind).ok_or(CodecError::UnknownKind(kind))?;
        let (&version, body) = rest.split_first().ok_or(CodecError::Empty)?;
        if version != WIRE_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        Ok(match kind {
            EnvelopeKind::Config => Envelope::Config(bincode::deserialize(body)?),
            EnvelopeKind::Assignment => Envelope::Assignment(bincode::deserialize(body)?),
            EnvelopeKind::ChoreAssignment => Envelope::ChoreAssignment(bincode::deserialize(body)?),
        })
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(s)?)
    }
}
