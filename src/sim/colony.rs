//! In-Memory Colony
//!
//! A small stand-in for the real engine: an object grid with liveness,
//! anchored cells, per-kind settings and a post-mutation change feed.
//! Uses BTreeMap for deterministic iteration order so two worlds built
//! from the same save produce the same [`ColonyWorld::digest`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::hash::{StateHash, StateHasher};
use crate::core::ids::{Cell, ObjectHandle, ObjectLayer};
use crate::replication::field::{FieldId, FieldValue};
use super::{
    AssignTarget, ChoreOrder, DoorState, FieldChange, ObjectKind, Permission, RangeBound,
    SettingsSurface, SimChange, SimError, Simulation, TimerPart,
};

/// Largest user capacity a storage building accepts (kg).
pub const MAX_STORAGE_CAPACITY: f32 = 20_000.0;

/// Largest valve flow rate (kg/s).
pub const MAX_FLOW_RATE: f32 = 10.0;

/// Number of sliders on a slider panel.
pub const SLIDER_COUNT: i32 = 4;

/// Recipe queue count meaning "repeat forever".
pub const QUEUE_FOREVER: i32 = -1;

/// Assignment groups every colony starts with.
pub const DEFAULT_GROUPS: [&str; 2] = ["public", "ranching"];

/// Recipes fabricators offer unless configured otherwise.
pub const DEFAULT_RECIPES: [&str; 4] = ["Steel", "Glass", "Insulite", "Plastic"];

// =============================================================================
// OBJECT STATE
// =============================================================================

/// Replicated settings of one object. Only the ones its kind supports are ever written.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    /// Manual switch state.
    pub logic_on: bool,
    /// Battery activation level (percent).
    pub activate: f32,
    /// Battery deactivation level (percent).
    pub deactivate: f32,
    /// Sensor threshold.
    pub threshold: f32,
    /// Sensor fires above the threshold.
    pub activate_above: bool,
    /// Valve flow rate.
    pub flow_rate: f32,
    /// Slider values by index.
    pub sliders: BTreeMap<i32, f32>,
    /// Checkbox state.
    pub checkbox: bool,
    /// User storage capacity.
    pub capacity: f32,
    /// Requested door state.
    pub door: DoorState,
    /// Limit valve limit.
    pub limit: f32,
    /// Timer window start.
    pub timer_start: f32,
    /// Timer window length.
    pub timer_duration: f32,
    /// Selected filter tag.
    pub filter_tag: Option<String>,
    /// Default permission per group (absent = [`Permission::Both`]).
    pub default_permissions: BTreeMap<String, Permission>,
    /// Per-duplicant permission overrides.
    pub member_permissions: BTreeMap<ObjectHandle, Permission>,
    /// Queued recipe counts.
    pub recipe_queue: BTreeMap<String, i32>,
    /// Counter value.
    pub count: i32,
    /// Current owner of an assignable building.
    pub owner: Option<AssignTarget<ObjectHandle>>,
    /// Current chore of a duplicant.
    pub chore: Option<ChoreOrder>,
}

impl Settings {
    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_bool(self.logic_on);
        hasher.update_f32(self.activate);
        hasher.update_f32(self.deactivate);
        hasher.update_f32(self.threshold);
        hasher.update_bool(self.activate_above);
        hasher.update_f32(self.flow_rate);
        hasher.update_u64(self.sliders.len() as u64);
        for (index, value) in &self.sliders {
            hasher.update_i32(*index);
            hasher.update_f32(*value);
        }
        hasher.update_bool(self.checkbox);
        hasher.update_f32(self.capacity);
        hasher.update_i32(self.door as i32);
        hasher.update_f32(self.limit);
        hasher.update_f32(self.timer_start);
        hasher.update_f32(self.timer_duration);
        hasher.update_str(self.filter_tag.as_deref().unwrap_or(""));
        hasher.update_u64(self.default_permissions.len() as u64);
        for (group, permission) in &self.default_permissions {
            hasher.update_str(group);
            hasher.update_i32(*permission as i32);
        }
        hasher.update_u64(self.member_permissions.len() as u64);
        for (member, permission) in &self.member_permissions {
            hasher.update_u64(member.0);
            hasher.update_i32(*permission as i32);
        }
        hasher.update_u64(self.recipe_queue.len() as u64);
        for (recipe, count) in &self.recipe_queue {
            hasher.update_str(recipe);
            hasher.update_i32(*count);
        }
        hasher.update_i32(self.count);
        match &self.owner {
            None => hasher.update_u8(0),
            Some(AssignTarget::Unassigned) => hasher.update_u8(1),
            Some(AssignTarget::Member(member)) => {
                hasher.update_u8(2);
                hasher.update_u64(member.0);
            }
            Some(AssignTarget::Group(group)) => {
                hasher.update_u8(3);
                hasher.update_str(group);
            }
        }
        match &self.chore {
            None => hasher.update_u8(0),
            Some(order) => {
                hasher.update_u8(1);
                hasher.update_str(&order.chore_type);
                hasher.update_i32(order.target_cell.0);
                hasher.update_str(&order.prefab_id);
            }
        }
    }
}

/// One object in the world.
#[derive(Clone, Debug, PartialEq)]
pub struct WorldObject {
    /// Object kind.
    pub kind: ObjectKind,
    /// Anchored cell (buildings only).
    pub cell: Option<Cell>,
    /// Replicated settings.
    pub settings: Settings,
}

// =============================================================================
// WORLD
// =============================================================================

/// In-memory colony simulation.
#[derive(Clone, Debug)]
pub struct ColonyWorld {
    objects: BTreeMap<ObjectHandle, WorldObject>,
    grid: HashMap<(Cell, ObjectLayer), ObjectHandle>,
    groups: BTreeSet<String>,
    recipes: BTreeSet<String>,
    next_handle: u64,
    changes: Vec<SimChange>,
}

impl Default for ColonyWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ColonyWorld {
    /// Create an empty world with the default groups and recipes.
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            grid: HashMap::new(),
            groups: DEFAULT_GROUPS.iter().map(|g| g.to_string()).collect(),
            recipes: DEFAULT_RECIPES.iter().map(|r| r.to_string()).collect(),
            next_handle: 1,
            changes: Vec::new(),
        }
    }

    /// Place a building at a cell.
    pub fn spawn_building(
        &mut self,
        kind: ObjectKind,
        cell: Cell,
    ) -> Result<ObjectHandle, SimError> {
        if !kind.is_building() {
            return Err(SimError::Unsupported {
                object: ObjectHandle(self.next_handle),
                setting: "anchored placement",
            });
        }
        if !cell.is_valid() {
            return Err(SimError::OutOfRange { setting: "cell", value: cell.0 as f32 });
        }
        let key = (cell, kind.layer());
        if self.grid.contains_key(&key) {
            return Err(SimError::Occupied(cell));
        }

        let handle = self.insert(kind, Some(cell));
        self.grid.insert(key, handle);
        Ok(handle)
    }

    /// Add a mobile object (duplicant or debris).
    pub fn spawn_mobile(&mut self, kind: ObjectKind) -> ObjectHandle {
        self.insert(kind, None)
    }

    fn insert(&mut self, kind: ObjectKind, cell: Option<Cell>) -> ObjectHandle {
        let handle = ObjectHandle(self.next_handle);
        self.next_handle += 1;
        self.objects.insert(handle, WorldObject { kind, cell, settings: Settings::default() });
        self.changes.push(SimChange::Spawned { object: handle, kind });
        handle
    }

    /// Remove an object. Returns false if it was already gone.
    pub fn destroy(&mut self, object: ObjectHandle) -> bool {
        let Some(removed) = self.objects.remove(&object) else {
            return false;
        };
        if let Some(cell) = removed.cell {
            self.grid.remove(&(cell, removed.kind.layer()));
        }
        // Dangling references to the removed object
        for other in self.objects.values_mut() {
            other.settings.member_permissions.remove(&object);
            if other.settings.owner == Some(AssignTarget::Member(object)) {
                other.settings.owner = Some(AssignTarget::Unassigned);
            }
        }
        self.changes.push(SimChange::Destroyed { object });
        true
    }

    /// Add an assignment group.
    pub fn add_group(&mut self, group: &str) {
        self.groups.insert(group.to_string());
    }

    /// Add a recipe fabricators can queue.
    pub fn add_recipe(&mut self, recipe: &str) {
        self.recipes.insert(recipe.to_string());
    }

    /// Object state.
    pub fn object(&self, object: ObjectHandle) -> Option<&WorldObject> {
        self.objects.get(&object)
    }

    /// Settings of a live object.
    pub fn settings(&self, object: ObjectHandle) -> Option<&Settings> {
        self.objects.get(&object).map(|o| &o.settings)
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Advance a counter by one signal pulse. Local simulation activity, not replicated.
    pub fn pulse_counter(&mut self, object: ObjectHandle) -> Result<i32, SimError> {
        let settings = self.settings_mut(object, "counter", &[ObjectKind::Counter])?;
        settings.count += 1;
        Ok(settings.count)
    }

    /// Digest of every object and its replicated settings.
    ///
    /// Handles are part of the digest, so only worlds built from the same
    /// save in the same order are comparable.
    pub fn digest(&self) -> StateHash {
        let mut hasher = StateHasher::for_world_state();
        hasher.update_u64(self.objects.len() as u64);
        for (handle, object) in &self.objects {
            hasher.update_u64(handle.0);
            hasher.update_u8(object.kind as u8);
            hasher.update_i32(object.cell.unwrap_or(Cell::INVALID).0);
            object.settings.hash_into(&mut hasher);
        }
        hasher.finalize()
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn settings_mut(
        &mut self,
        object: ObjectHandle,
        setting: &'static str,
        kinds: &[ObjectKind],
    ) -> Result<&mut Settings, SimError> {
        let entry = self.objects.get_mut(&object).ok_or(SimError::UnknownObject(object))?;
        if !kinds.contains(&entry.kind) {
            return Err(SimError::Unsupported { object, setting });
        }
        Ok(&mut entry.settings)
    }

    fn require_minion(&self, member: ObjectHandle) -> Result<(), SimError> {
        match self.kind_of(member) {
            Some(ObjectKind::Minion) => Ok(()),
            _ => Err(SimError::UnknownObject(member)),
        }
    }

    fn commit(&mut self, object: ObjectHandle, field: FieldId, value: FieldValue) {
        self.changes.push(SimChange::Field(FieldChange { object, field, value }));
    }
}

fn in_range(setting: &'static str, value: f32, min: f32, max: f32) -> Result<f32, SimError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(value)
    } else {
        Err(SimError::OutOfRange { setting, value })
    }
}

fn non_negative(setting: &'static str, value: f32) -> Result<f32, SimError> {
    in_range(setting, value, 0.0, f32::MAX)
}

const STORAGE: [ObjectKind; 2] = [ObjectKind::StorageLocker, ObjectKind::Container];

// =============================================================================
// SIMULATION TRAITS
// =============================================================================

impl Simulation for ColonyWorld {
    fn is_alive(&self, object: ObjectHandle) -> bool {
        self.objects.contains_key(&object)
    }

    fn kind_of(&self, object: ObjectHandle) -> Option<ObjectKind> {
        self.objects.get(&object).map(|o| o.kind)
    }

    fn anchor_cell(&self, object: ObjectHandle) -> Option<Cell> {
        self.objects.get(&object).and_then(|o| o.cell)
    }

    fn object_at(&self, cell: Cell, layer: ObjectLayer) -> Option<ObjectHandle> {
        self.grid.get(&(cell, layer)).copied()
    }

    fn drain_changes(&mut self) -> Vec<SimChange> {
        std::mem::take(&mut self.changes)
    }
}

impl SettingsSurface for ColonyWorld {
    fn set_logic_state(&mut self, object: ObjectHandle, on: bool) -> Result<(), SimError> {
        self.settings_mut(object, "logic state", &[ObjectKind::LogicSwitch])?.logic_on = on;
        self.commit(object, FieldId::LogicState, FieldValue::Flag(on));
        Ok(())
    }

    fn set_activation_range(
        &mut self,
        object: ObjectHandle,
        bound: RangeBound,
        value: f32,
    ) -> Result<(), SimError> {
        let value = in_range("activation range", value, 0.0, 100.0)?;
        let settings = self.settings_mut(object, "activation range", &[ObjectKind::SmartBattery])?;
        let field = match bound {
            RangeBound::Activate => {
                settings.activate = value;
                FieldId::Activate
            }
            RangeBound::Deactivate => {
                settings.deactivate = value;
                FieldId::Deactivate
            }
        };
        self.commit(object, field, FieldValue::Number(value));
        Ok(())
    }

    fn set_threshold(&mut self, object: ObjectHandle, value: f32) -> Result<(), SimError> {
        let value = in_range("threshold", value, f32::MIN, f32::MAX)?;
        self.settings_mut(object, "threshold", &[ObjectKind::ThresholdSensor])?.threshold = value;
        self.commit(object, FieldId::Threshold, FieldValue::Number(value));
        Ok(())
    }

    fn set_activate_above(&mut self, object: ObjectHandle, above: bool) -> Result<(), SimError> {
        self.settings_mut(object, "threshold direction", &[ObjectKind::ThresholdSensor])?
            .activate_above = above;
        self.commit(object, FieldId::ThresholdDirection, FieldValue::Flag(above));
        Ok(())
    }

    fn set_flow_rate(&mut self, object: ObjectHandle, rate: f32) -> Result<(), SimError> {
        let rate = in_range("flow rate", rate, 0.0, MAX_FLOW_RATE)?;
        self.settings_mut(object, "flow rate", &[ObjectKind::Valve])?.flow_rate = rate;
        self.commit(object, FieldId::FlowRate, FieldValue::Number(rate));
        Ok(())
    }

    fn set_slider(&mut self, object: ObjectHandle, index: i32, value: f32) -> Result<(), SimError> {
        if !(0..SLIDER_COUNT).contains(&index) {
            return Err(SimError::OutOfRange { setting: "slider index", value: index as f32 });
        }
        let value = in_range("slider", value, f32::MIN, f32::MAX)?;
        self.settings_mut(object, "slider", &[ObjectKind::SliderPanel])?
            .sliders
            .insert(index, value);
        self.commit(object, FieldId::Slider, FieldValue::Slider { index, value });
        Ok(())
    }

    fn set_checkbox(&mut self, object: ObjectHandle, checked: bool) -> Result<(), SimError> {
        self.settings_mut(object, "checkbox", &STORAGE)?.checkbox = checked;
        self.commit(object, FieldId::Checkbox, FieldValue::Flag(checked));
        Ok(())
    }

    fn set_capacity(&mut self, object: ObjectHandle, capacity: f32) -> Result<(), SimError> {
        let capacity = in_range("capacity", capacity, 0.0, MAX_STORAGE_CAPACITY)?;
        self.settings_mut(object, "capacity", &STORAGE)?.capacity = capacity;
        self.commit(object, FieldId::Capacity, FieldValue::Number(capacity));
        Ok(())
    }

    fn set_door_state(&mut self, object: ObjectHandle, state: DoorState) -> Result<(), SimError> {
        self.settings_mut(object, "door state", &[ObjectKind::Door])?.door = state;
        self.commit(object, FieldId::DoorState, FieldValue::Choice(state as i32));
        Ok(())
    }

    fn set_limit(&mut self, object: ObjectHandle, limit: f32) -> Result<(), SimError> {
        let limit = non_negative("limit", limit)?;
        self.settings_mut(object, "limit", &[ObjectKind::LimitValve])?.limit = limit;
        self.commit(object, FieldId::LimitValve, FieldValue::Number(limit));
        Ok(())
    }

    fn set_timer(
        &mut self,
        object: ObjectHandle,
        part: TimerPart,
        value: f32,
    ) -> Result<(), SimError> {
        let value = non_negative("timer", value)?;
        let settings = self.settings_mut(object, "timer", &[ObjectKind::TimerSensor])?;
        let field = match part {
            TimerPart::StartTime => {
                settings.timer_start = value;
                FieldId::TimerStart
            }
            TimerPart::Duration => {
                settings.timer_duration = value;
                FieldId::TimerDuration
            }
        };
        self.commit(object, field, FieldValue::Number(value));
        Ok(())
    }

    fn set_filter_tag(&mut self, object: ObjectHandle, tag: &str) -> Result<(), SimError> {
        let kinds = [ObjectKind::StorageLocker, ObjectKind::Container, ObjectKind::Receptacle];
        self.settings_mut(object, "filter tag", &kinds)?.filter_tag = Some(tag.to_string());
        self.commit(object, FieldId::FilterTag, FieldValue::Tag(tag.to_string()));
        Ok(())
    }

    fn set_default_permission(
        &mut self,
        object: ObjectHandle,
        group: &str,
        permission: Permission,
    ) -> Result<(), SimError> {
        if !self.groups.contains(group) {
            return Err(SimError::UnknownGroup(group.to_string()));
        }
        self.settings_mut(object, "access control", &[ObjectKind::Door])?
            .default_permissions
            .insert(group.to_string(), permission);
        self.commit(
            object,
            FieldId::AccessDefault,
            FieldValue::TaggedChoice { tag: group.to_string(), choice: permission as i32 },
        );
        Ok(())
    }

    fn set_member_permission(
        &mut self,
        object: ObjectHandle,
        member: ObjectHandle,
        permission: Permission,
    ) -> Result<(), SimError> {
        self.require_minion(member)?;
        self.settings_mut(object, "access control", &[ObjectKind::Door])?
            .member_permissions
            .insert(member, permission);
        let value = FieldValue::Member { member, choice: permission as i32 };
        self.commit(object, FieldId::AccessMember, value);
        Ok(())
    }

    fn clear_member_permission(
        &mut self,
        object: ObjectHandle,
        member: ObjectHandle,
    ) -> Result<(), SimError> {
        self.require_minion(member)?;
        self.settings_mut(object, "access control", &[ObjectKind::Door])?
            .member_permissions
            .remove(&member);
        self.commit(object, FieldId::AccessClear, FieldValue::Reference(member));
        Ok(())
    }

    fn set_recipe_queue(
        &mut self,
        object: ObjectHandle,
        recipe: &str,
        count: i32,
    ) -> Result<(), SimError> {
        if !self.recipes.contains(recipe) {
            return Err(SimError::UnknownRecipe(recipe.to_string()));
        }
        if count < QUEUE_FOREVER {
            return Err(SimError::OutOfRange { setting: "recipe count", value: count as f32 });
        }
        let queue =
            &mut self.settings_mut(object, "recipe queue", &[ObjectKind::Fabricator])?.recipe_queue;
        if count == 0 {
            queue.remove(recipe);
        } else {
            queue.insert(recipe.to_string(), count);
        }
        let value = FieldValue::Recipe { recipe: recipe.to_string(), count };
        self.commit(object, FieldId::RecipeQueue, value);
        Ok(())
    }

    fn reset_counter(&mut self, object: ObjectHandle) -> Result<(), SimError> {
        self.settings_mut(object, "counter", &[ObjectKind::Counter])?.count = 0;
        self.commit(object, FieldId::CounterReset, FieldValue::Trigger);
        Ok(())
    }

    fn assign(
        &mut self,
        building: ObjectHandle,
        target: AssignTarget<ObjectHandle>,
    ) -> Result<(), SimError> {
        match &target {
            AssignTarget::Member(member) => self.require_minion(*member)?,
            AssignTarget::Group(group) if !self.groups.contains(group) => {
                return Err(SimError::UnknownGroup(group.clone()));
            }
            _ => {}
        }
        self.settings_mut(building, "assignment", &[ObjectKind::Assignable])?.owner =
            Some(target.clone());
        self.changes.push(SimChange::Assigned { building, target });
        Ok(())
    }

    fn assign_chore(&mut self, order: ChoreOrder) -> Result<(), SimError> {
        self.settings_mut(order.worker, "chore", &[ObjectKind::Minion])?.chore =
            Some(order.clone());
        self.changes.push(SimChange::ChoreAssigned(order));
        Ok(())
    }
}
