//! Field Handlers
//!
//! The apply half of every replicated field: decode the envelope payload
//! and call the same setter a local player would. Setters are idempotent,
//! so a duplicated or re-ordered envelope settles to the same state.

use crate::core::ids::ObjectHandle;
use crate::network::protocol::{AssignmentEnvelope, ChoreAssignmentEnvelope, ConfigEnvelope};
use crate::replication::dispatch::{ApplyError, DispatchError, DispatchTable};
use crate::replication::field::FieldId;
use crate::replication::identity::IdentityRegistry;
use crate::sim::{
    AssignTarget, ChoreOrder, DoorState, Permission, RangeBound, SettingsSurface, Simulation,
    TimerPart,
};

/// Dispatch table with a handler for every [`FieldId`].
pub fn standard_table<S: SettingsSurface>() -> Result<DispatchTable<S>, DispatchError> {
    let mut table = DispatchTable::new();
    table.register(FieldId::LogicState, apply_logic_state::<S>)?;
    table.register(FieldId::Activate, apply_activate::<S>)?;
    table.register(FieldId::Deactivate, apply_deactivate::<S>)?;
    table.register(FieldId::Threshold, apply_threshold::<S>)?;
    table.register(FieldId::ThresholdDirection, apply_threshold_direction::<S>)?;
    table.register(FieldId::FlowRate, apply_flow_rate::<S>)?;
    table.register(FieldId::Slider, apply_slider::<S>)?;
    table.register(FieldId::Checkbox, apply_checkbox::<S>)?;
    table.register(FieldId::Capacity, apply_capacity::<S>)?;
    table.register(FieldId::DoorState, apply_door_state::<S>)?;
    table.register(FieldId::LimitValve, apply_limit::<S>)?;
    table.register(FieldId::TimerStart, apply_timer_start::<S>)?;
    table.register(FieldId::TimerDuration, apply_timer_duration::<S>)?;
    table.register(FieldId::FilterTag, apply_filter_tag::<S>)?;
    table.register(FieldId::AccessDefault, apply_access_default::<S>)?;
    table.register(FieldId::AccessMember, apply_access_member::<S>)?;
    table.register(FieldId::AccessClear, apply_access_clear::<S>)?;
    table.register(FieldId::RecipeQueue, apply_recipe_queue::<S>)?;
    table.register(FieldId::CounterReset, apply_counter_reset::<S>)?;
    table.ensure_complete()?;
    Ok(table)
}

// =============================================================================
// PAYLOAD HELPERS
// =============================================================================

fn whole(field: FieldId, envelope: &ConfigEnvelope) -> Result<i32, ApplyError> {
    envelope.choice().ok_or(ApplyError::BadPayload { field, reason: "expected a whole number" })
}

fn text(field: FieldId, envelope: &ConfigEnvelope) -> Result<&str, ApplyError> {
    envelope.text().ok_or(ApplyError::BadPayload { field, reason: "empty string" })
}

fn permission(field: FieldId, envelope: &ConfigEnvelope) -> Result<Permission, ApplyError> {
    Permission::from_index(whole(field, envelope)?)
        .ok_or(ApplyError::BadPayload { field, reason: "unknown permission" })
}

fn member<S: Simulation>(
    sim: &S,
    registry: &IdentityRegistry,
    envelope: &ConfigEnvelope,
) -> Result<ObjectHandle, ApplyError> {
    let id = envelope.referenced_id();
    registry.resolve(id, sim).ok_or(ApplyError::UnresolvedReference(id))
}

// =============================================================================
// GENERIC FIELDS
// =============================================================================

fn apply_logic_state<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_logic_state(obj, env.flag())?)
}

fn apply_activate<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_activation_range(obj, RangeBound::Activate, env.value)?)
}

fn apply_deactivate<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_activation_range(obj, RangeBound::Deactivate, env.value)?)
}

fn apply_threshold<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_threshold(obj, env.value)?)
}

fn apply_threshold_direction<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_activate_above(obj, env.flag())?)
}

fn apply_flow_rate<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_flow_rate(obj, env.value)?)
}

fn apply_slider<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_slider(obj, env.slider_index, env.value)?)
}

fn apply_checkbox<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_checkbox(obj, env.flag())?)
}

fn apply_capacity<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_capacity(obj, env.value)?)
}

fn apply_door_state<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    let field = FieldId::DoorState;
    let state = DoorState::from_index(whole(field, env)?)
        .ok_or(ApplyError::BadPayload { field, reason: "unknown door state" })?;
    Ok(sim.set_door_state(obj, state)?)
}

fn apply_limit<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_limit(obj, env.value)?)
}

fn apply_timer_start<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_timer(obj, TimerPart::StartTime, env.value)?)
}

fn apply_timer_duration<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.set_timer(obj, TimerPart::Duration, env.value)?)
}

fn apply_filter_tag<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    // An empty tag clears the filter.
    Ok(sim.set_filter_tag(obj, &env.string_value)?)
}

fn apply_access_default<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    let field = FieldId::AccessDefault;
    let group = text(field, env)?;
    let permission = permission(field, env)?;
    Ok(sim.set_default_permission(obj, group, permission)?)
}

fn apply_access_member<S: SettingsSurface>(
    sim: &mut S,
    registry: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    let permission = permission(FieldId::AccessMember, env)?;
    let member = member(&*sim, registry, env)?;
    Ok(sim.set_member_permission(obj, member, permission)?)
}

fn apply_access_clear<S: SettingsSurface>(
    sim: &mut S,
    registry: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    let member = member(&*sim, registry, env)?;
    Ok(sim.clear_member_permission(obj, member)?)
}

fn apply_recipe_queue<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    env: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    let field = FieldId::RecipeQueue;
    let count = whole(field, env)?;
    Ok(sim.set_recipe_queue(obj, text(field, env)?, count)?)
}

fn apply_counter_reset<S: SettingsSurface>(
    sim: &mut S,
    _: &IdentityRegistry,
    obj: ObjectHandle,
    _: &ConfigEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.reset_counter(obj)?)
}

// =============================================================================
// SPECIALIZED ENVELOPES
// =============================================================================

/// Apply a building assignment.
///
/// A member assignee must resolve on this peer, otherwise the whole
/// envelope is dropped.
pub fn apply_assignment<S: SettingsSurface>(
    sim: &mut S,
    registry: &IdentityRegistry,
    building: ObjectHandle,
    envelope: &AssignmentEnvelope,
) -> Result<(), ApplyError> {
    let target = match envelope.target() {
        AssignTarget::Unassigned => AssignTarget::Unassigned,
        AssignTarget::Group(group) => AssignTarget::Group(group),
        AssignTarget::Member(id) => {
            let member = registry.resolve(id, &*sim).ok_or(ApplyError::UnresolvedReference(id))?;
            AssignTarget::Member(member)
        }
    };
    Ok(sim.assign(building, target)?)
}

/// Apply a chore assignment to a resolved worker.
pub fn apply_chore<S: SettingsSurface>(
    sim: &mut S,
    worker: ObjectHandle,
    envelope: &ChoreAssignmentEnvelope,
) -> Result<(), ApplyError> {
    Ok(sim.assign_chore(ChoreOrder {
        worker,
        chore_type: envelope.chore_type_id.clone(),
        target_position: envelope.target_position,
        target_cell: envelope.target_cell,
        prefab_id: envelope.prefab_id.clone(),
    })?)
}
