//! Replicated Field Catalog
//!
//! Every field that rides the generic envelope is a [`FieldId`] variant.
//! The wire identifier is derived from a fixed name string, so sender and
//! receiver agree on it without sharing any runtime state, and the
//! dispatch table can check at startup that every variant has a handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::core::hash::config_hash;
use crate::core::ids::{NetId, ObjectHandle};
use crate::network::protocol::{ConfigEnvelope, ConfigType};

/// Logical field carried by a [`ConfigEnvelope`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldId {
    /// Manual switch on/off.
    LogicState,
    /// Smart battery activation level.
    Activate,
    /// Smart battery deactivation level.
    Deactivate,
    /// Sensor threshold value.
    Threshold,
    /// Sensor fires above (1) or below (0) the threshold.
    ThresholdDirection,
    /// Valve flow rate.
    FlowRate,
    /// One slider of a multi-slider control.
    Slider,
    /// Checkbox control.
    Checkbox,
    /// User storage capacity.
    Capacity,
    /// Requested door state.
    DoorState,
    /// Limit valve limit.
    LimitValve,
    /// Timer sensor window start.
    TimerStart,
    /// Timer sensor window length.
    TimerDuration,
    /// Selected filter tag.
    FilterTag,
    /// Default access permission for a group.
    AccessDefault,
    /// Access permission override for one duplicant.
    AccessMember,
    /// Removal of a duplicant's access override.
    AccessClear,
    /// Queued count of one recipe.
    RecipeQueue,
    /// Counter reset trigger.
    CounterReset,
}

impl FieldId {
    /// Every replicated field.
    pub const ALL: [FieldId; 19] = [
        FieldId::LogicState,
        FieldId::Activate,
        FieldId::Deactivate,
        FieldId::Threshold,
        FieldId::ThresholdDirection,
        FieldId::FlowRate,
        FieldId::Slider,
        FieldId::Checkbox,
        FieldId::Capacity,
        FieldId::DoorState,
        FieldId::LimitValve,
        FieldId::TimerStart,
        FieldId::TimerDuration,
        FieldId::FilterTag,
        FieldId::AccessDefault,
        FieldId::AccessMember,
        FieldId::AccessClear,
        FieldId::RecipeQueue,
        FieldId::CounterReset,
    ];

    /// Fixed wire name. Changing one breaks compatibility with older peers.
    pub const fn name(self) -> &'static str {
        match self {
            FieldId::LogicState => "LogicState",
            FieldId::Activate => "Activate",
            FieldId::Deactivate => "Deactivate",
            FieldId::Threshold => "Threshold",
            FieldId::ThresholdDirection => "ThresholdDir",
            FieldId::FlowRate => "Rate",
            FieldId::Slider => "Slider",
            FieldId::Checkbox => "Checkbox",
            FieldId::Capacity => "Capacity",
            FieldId::DoorState => "DoorState",
            FieldId::LimitValve => "LimitValve",
            FieldId::TimerStart => "StartTime",
            FieldId::TimerDuration => "Duration",
            FieldId::FilterTag => "FilterTag",
            FieldId::AccessDefault => "AccessControlDefault",
            FieldId::AccessMember => "AccessControlMinion",
            FieldId::AccessClear => "AccessControlClear",
            FieldId::RecipeQueue => "RecipeQueue",
            FieldId::CounterReset => "CounterReset",
        }
    }

    /// Wire identifier (`config_hash` slot of the envelope).
    pub fn config_hash(self) -> i32 {
        // ALL is in declaration order
        hash_table()[self as usize].0
    }

    /// Field for a wire identifier.
    pub fn from_config_hash(hash: i32) -> Option<FieldId> {
        hash_lookup().get(&hash).copied()
    }

    /// Payload interpretation this field always uses.
    pub const fn expected_type(self) -> ConfigType {
        match self {
            FieldId::LogicState
            | FieldId::ThresholdDirection
            | FieldId::Checkbox
            | FieldId::CounterReset => ConfigType::Boolean,
            FieldId::Activate
            | FieldId::Deactivate
            | FieldId::Threshold
            | FieldId::FlowRate
            | FieldId::Capacity
            | FieldId::DoorState
            | FieldId::LimitValve
            | FieldId::TimerStart
            | FieldId::TimerDuration => ConfigType::Float,
            FieldId::FilterTag | FieldId::AccessDefault => ConfigType::String,
            FieldId::Slider | FieldId::AccessMember | FieldId::AccessClear => {
                ConfigType::SliderIndex
            }
            FieldId::RecipeQueue => ConfigType::RecipeQueue,
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn hash_table() -> &'static [(i32, FieldId); 19] {
    static TABLE: OnceLock<[(i32, FieldId); 19]> = OnceLock::new();
    TABLE.get_or_init(|| FieldId::ALL.map(|field| (config_hash(field.name()), field)))
}

fn hash_lookup() -> &'static HashMap<i32, FieldId> {
    static LOOKUP: OnceLock<HashMap<i32, FieldId>> = OnceLock::new();
    LOOKUP.get_or_init(|| hash_table().iter().copied().collect())
}

// =============================================================================
// FIELD VALUES
// =============================================================================

/// Committed value of a replicated field, as reported by the change feed.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// On/off.
    Flag(bool),
    /// Plain number.
    Number(f32),
    /// Small enum index (door state, permission).
    Choice(i32),
    /// Tag or identifier string.
    Tag(String),
    /// One slider of several.
    Slider {
        /// Which slider.
        index: i32,
        /// Its value.
        value: f32,
    },
    /// A string key with an associated choice (group permission).
    TaggedChoice {
        /// Key, e.g. the group name.
        tag: String,
        /// Choice index.
        choice: i32,
    },
    /// A choice that refers to another object (member permission).
    Member {
        /// Referenced object.
        member: ObjectHandle,
        /// Choice index.
        choice: i32,
    },
    /// A bare reference to another object.
    Reference(ObjectHandle),
    /// Queued count of a recipe.
    Recipe {
        /// Recipe id.
        recipe: String,
        /// Queued count.
        count: i32,
    },
    /// Fire-once action with no payload.
    Trigger,
}

impl FieldValue {
    /// Payload interpretation of this value.
    pub fn config_type(&self) -> ConfigType {
        match self {
            FieldValue::Flag(_) | FieldValue::Trigger => ConfigType::Boolean,
            FieldValue::Number(_) | FieldValue::Choice(_) => ConfigType::Float,
            FieldValue::Tag(_) | FieldValue::TaggedChoice { .. } => ConfigType::String,
            FieldValue::Slider { .. } | FieldValue::Member { .. } | FieldValue::Reference(_) => {
                ConfigType::SliderIndex
            }
            FieldValue::Recipe { .. } => ConfigType::RecipeQueue,
        }
    }

    /// Object this value points at, if any.
    pub fn referenced_object(&self) -> Option<ObjectHandle> {
        match self {
            FieldValue::Member { member, .. } => Some(*member),
            FieldValue::Reference(object) => Some(*object),
            _ => None,
        }
    }

    /// Write this value into the payload slots of an envelope.
    ///
    /// `reference` is the `NetId` of [`FieldValue::referenced_object`];
    /// it is ignored for values without a reference.
    pub fn write_payload(&self, envelope: &mut ConfigEnvelope, reference: NetId) {
        envelope.config_type = self.config_type();
        match self {
            FieldValue::Flag(on) => envelope.value = if *on { 1.0 } else { 0.0 },
            FieldValue::Trigger => envelope.value = 1.0,
            FieldValue::Number(v) => envelope.value = *v,
            FieldValue::Choice(c) => envelope.value = *c as f32,
            FieldValue::Tag(tag) => envelope.string_value = tag.clone(),
            FieldValue::Slider { index, value } => {
                envelope.slider_index = *index;
                envelope.value = *value;
            }
            FieldValue::TaggedChoice { tag, choice } => {
                envelope.string_value = tag.clone();
                envelope.value = *choice as f32;
            }
            FieldValue::Member { choice, .. } => {
                envelope.slider_index = reference.raw();
                envelope.value = *choice as f32;
            }
            FieldValue::Reference(_) => envelope.slider_index = reference.raw(),
            FieldValue::Recipe { recipe, count } => {
                envelope.string_value = recipe.clone();
                envelope.value = *count as f32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::Cell;
    use std::collections::HashSet;

    #[test]
    fn test_wire_names_are_unique() {
        let names: HashSet<_> = FieldId::ALL.iter().map(|f| f.name()).collect();
        assert_eq!(names.len(), FieldId::ALL.len());
    }

    #[test]
    fn test_all_is_in_declaration_order() {
        for (i, field) in FieldId::ALL.iter().enumerate() {
            assert_eq!(*field as usize, i);
        }
    }

    #[test]
    fn test_config_hashes_are_unique_and_reversible() {
        let hashes: HashSet<_> = FieldId::ALL.iter().map(|f| f.config_hash()).collect();
        assert_eq!(hashes.len(), FieldId::ALL.len());

        for field in FieldId::ALL {
            assert_eq!(FieldId::from_config_hash(field.config_hash()), Some(field));
        }
    }

    #[test]
    fn test_config_hash_matches_name_hash() {
        assert_eq!(FieldId::DoorState.config_hash(), config_hash("DoorState"));
        assert_eq!(FieldId::FlowRate.config_hash(), config_hash("Rate"));
    }

    #[test]
    fn test_unknown_hash() {
        let unused = config_hash("NotAField");
        assert_eq!(FieldId::from_config_hash(unused), None);
    }

    #[test]
    fn test_member_payload_uses_secondary_slot() {
        let mut env = ConfigEnvelope::new(NetId(3), Cell(10), 0, ConfigType::Float);
        let value = FieldValue::Member { member: ObjectHandle(9), choice: 2 };
        value.write_payload(&mut env, NetId(77));

        assert_eq!(env.config_type, ConfigType::SliderIndex);
        assert_eq!(env.referenced_id(), NetId(77));
        assert_eq!(env.choice(), Some(2));
    }

    #[test]
    fn test_recipe_payload() {
        let mut env = ConfigEnvelope::new(NetId(3), Cell(10), 0, ConfigType::Float);
        let recipe = FieldValue::Recipe { recipe: "Steel".into(), count: 4 };
        recipe.write_payload(&mut env, NetId::UNASSIGNED);

        assert_eq!(env.config_type, ConfigType::RecipeQueue);
        assert_eq!(env.text(), Some("Steel"));
        assert_eq!(env.choice(), Some(4));
    }

    #[test]
    fn test_value_types_match_fields() {
        let pairs = [
            (FieldId::LogicState, FieldValue::Flag(true)),
            (FieldId::Threshold, FieldValue::Number(20.0)),
            (FieldId::DoorState, FieldValue::Choice(2)),
            (FieldId::FilterTag, FieldValue::Tag("Water".into())),
            (FieldId::Slider, FieldValue::Slider { index: 1, value: 0.5 }),
            (FieldId::AccessDefault, FieldValue::TaggedChoice { tag: "public".into(), choice: 0 }),
            (FieldId::AccessMember, FieldValue::Member { member: ObjectHandle(1), choice: 3 }),
            (FieldId::AccessClear, FieldValue::Reference(ObjectHandle(1))),
            (FieldId::RecipeQueue, FieldValue::Recipe { recipe: "Steel".into(), count: 1 }),
            (FieldId::CounterReset, FieldValue::Trigger),
        ];
        for (field, value) in pairs {
            assert_eq!(field.expected_type(), value.config_type(), "{}", field);
        }
    }
}
