//! Dispatch Table
//!
//! Maps the `config_hash` of a generic envelope to the handler that
//! replays it. Built once at startup; a duplicate registration or a
//! field without a handler is a load-time error, never a runtime one.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::core::ids::{NetId, ObjectHandle};
use crate::network::protocol::{ConfigEnvelope, ConfigType};
use crate::replication::field::FieldId;
use crate::replication::identity::IdentityRegistry;
use crate::sim::SimError;

/// Replays one generic envelope onto its resolved target.
pub type ConfigHandler<S> =
    fn(&mut S, &IdentityRegistry, ObjectHandle, &ConfigEnvelope) -> Result<(), ApplyError>;

/// Startup configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Two handlers for one field.
    #[error("duplicate handler for {0}")]
    DuplicateHandler(FieldId),

    /// Fields that would be captured but could never be applied.
    #[error("no handler registered for {0:?}")]
    MissingHandlers(Vec<FieldId>),
}

/// Reasons an envelope could not be applied. All of them mean "drop".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplyError {
    /// No handler for this hash.
    #[error("unknown field hash {0}")]
    UnknownField(i32),

    /// Payload type does not match the field.
    #[error("{field} expects {expected:?}, got {actual:?}")]
    TypeMismatch {
        /// Target field.
        field: FieldId,
        /// Type the field uses.
        expected: ConfigType,
        /// Type carried by the envelope.
        actual: ConfigType,
    },

    /// Payload slots hold a value the field cannot take.
    #[error("bad payload for {field}: {reason}")]
    BadPayload {
        /// Target field.
        field: FieldId,
        /// What was wrong.
        reason: &'static str,
    },

    /// A referenced object is unknown on this peer.
    #[error("unresolved reference {0}")]
    UnresolvedReference(NetId),

    /// The simulation refused the value.
    #[error("simulation rejected value: {0}")]
    Rejected(#[from] SimError),
}

struct Entry<S> {
    field: FieldId,
    handler: ConfigHandler<S>,
}

/// `config_hash` to handler map for a simulation type.
pub struct DispatchTable<S> {
    handlers: HashMap<i32, Entry<S>>,
}

impl<S> Default for DispatchTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for DispatchTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<FieldId> = self.handlers.values().map(|e| e.field).collect();
        fields.sort();
        f.debug_struct("DispatchTable").field("fields", &fields).finish()
    }
}

impl<S> DispatchTable<S> {
    /// Empty table.
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Register the handler for a field.
    pub fn register(
        &mut self,
        field: FieldId,
        handler: ConfigHandler<S>,
    ) -> Result<(), DispatchError> {
        let hash = field.config_hash();
        if self.handlers.contains_key(&hash) {
            return Err(DispatchError::DuplicateHandler(field));
        }
        self.handlers.insert(hash, Entry { field, handler });
        Ok(())
    }

    /// Number of registered fields.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Whether a handler exists for a hash.
    pub fn handles(&self, config_hash: i32) -> bool {
        self.handlers.contains_key(&config_hash)
    }

    /// Check that every replicated field has a handler.
    pub fn ensure_complete(&self) -> Result<(), DispatchError> {
        let missing: Vec<FieldId> = FieldId::ALL
            .into_iter()
            .filter(|field| !self.handles(field.config_hash()))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::MissingHandlers(missing))
        }
    }

    /// Field a hash belongs to, if it has a handler.
    pub fn field_for(&self, config_hash: i32) -> Option<FieldId> {
        self.handlers.get(&config_hash).map(|e| e.field)
    }

    /// Look up, type-check and run the handler for an envelope.
    ///
    /// Callers hold the replay guard around this call.
    pub fn apply(
        &self,
        sim: &mut S,
        registry: &IdentityRegistry,
        object: ObjectHandle,
        envelope: &ConfigEnvelope,
    ) -> Result<FieldId, ApplyError> {
        let entry = self
            .handlers
            .get(&envelope.config_hash)
            .ok_or(ApplyError::UnknownField(envelope.config_hash))?;

        let expected = entry.field.expected_type();
        if envelope.config_type != expected {
            return Err(ApplyError::TypeMismatch {
                field: entry.field,
                expected,
                actual: envelope.config_type,
            });
        }

        (entry.handler)(sim, registry, object, envelope)?;
        debug!(field = %entry.field, %object, net_id = %envelope.net_id, "Applied field");
        Ok(entry.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::Cell;
    use crate::sim::{ColonyWorld, ObjectKind, SettingsSurface};

    fn set_switch(
        world: &mut ColonyWorld,
        _: &IdentityRegistry,
        object: ObjectHandle,
        envelope: &ConfigEnvelope,
    ) -> Result<(), ApplyError> {
        world.set_logic_state(object, envelope.flag())?;
        Ok(())
    }

    fn switch_envelope(on: bool) -> ConfigEnvelope {
        let mut env = ConfigEnvelope::new(
            NetId(1),
            Cell(3),
            FieldId::LogicState.config_hash(),
            ConfigType::Boolean,
        );
        env.value = if on { 1.0 } else { 0.0 };
        env
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut table = DispatchTable::<ColonyWorld>::new();
        table.register(FieldId::LogicState, set_switch).unwrap();
        assert_eq!(
            table.register(FieldId::LogicState, set_switch),
            Err(DispatchError::DuplicateHandler(FieldId::LogicState))
        );
    }

    #[test]
    fn test_incomplete_table_reports_missing() {
        let mut table = DispatchTable::<ColonyWorld>::new();
        table.register(FieldId::LogicState, set_switch).unwrap();

        match table.ensure_complete() {
            Err(DispatchError::MissingHandlers(missing)) => {
                assert_eq!(missing.len(), FieldId::ALL.len() - 1);
                assert!(!missing.contains(&FieldId::LogicState));
            }
            other => panic!("expected missing handlers, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_runs_handler() {
        let mut world = ColonyWorld::new();
        let switch = world.spawn_building(ObjectKind::LogicSwitch, Cell(3)).unwrap();
        let registry = IdentityRegistry::default();
        let mut table = DispatchTable::<ColonyWorld>::new();
        table.register(FieldId::LogicState, set_switch).unwrap();

        let field = table.apply(&mut world, &registry, switch, &switch_envelope(true)).unwrap();
        assert_eq!(field, FieldId::LogicState);
        assert!(world.settings(switch).unwrap().logic_on);
    }

    #[test]
    fn test_apply_unknown_hash_and_type_mismatch() {
        let mut world = ColonyWorld::new();
        let switch = world.spawn_building(ObjectKind::LogicSwitch, Cell(3)).unwrap();
        let registry = IdentityRegistry::default();
        let mut table = DispatchTable::<ColonyWorld>::new();
        table.register(FieldId::LogicState, set_switch).unwrap();

        let mut unknown = switch_envelope(true);
        unknown.config_hash = FieldId::Threshold.config_hash();
        assert_eq!(
            table.apply(&mut world, &registry, switch, &unknown),
            Err(ApplyError::UnknownField(unknown.config_hash))
        );

        let mut wrong_type = switch_envelope(true);
        wrong_type.config_type = ConfigType::String;
        assert!(matches!(
            table.apply(&mut world, &registry, switch, &wrong_type),
            Err(ApplyError::TypeMismatch { field: FieldId::LogicState, .. })
        ));
        assert!(!world.settings(switch).unwrap().logic_on);
    }

    #[test]
    fn test_simulation_rejection_is_apply_error() {
        let mut world = ColonyWorld::new();
        let door = world.spawn_building(ObjectKind::Door, Cell(3)).unwrap();
        let registry = IdentityRegistry::default();
        let mut table = DispatchTable::<ColonyWorld>::new();
        table.register(FieldId::LogicState, set_switch).unwrap();

        assert!(matches!(
            table.apply(&mut world, &registry, door, &switch_envelope(true)),
            Err(ApplyError::Rejected(SimError::Unsupported { .. }))
        ));
    }
}
