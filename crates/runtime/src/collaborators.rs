//! Collaborator seams consumed by the orchestration core.
//!
//! The filter predicates and lifecycle operations query participants,
//! regions, and settings through these traits. In-memory defaults are
//! provided; hosts can inject their own implementations through the
//! instance builder.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use session_core::{ActorId, ParticipantEntry, Position, RegionId, Role};

/// Membership and roles of the actors inside one instance.
pub trait ParticipantDirectory {
    /// Adds an actor. Returns false if the actor was already present.
    fn add(&mut self, actor: ActorId, role: Role) -> bool;

    /// Removes an actor. Returns false if the actor was not present.
    fn remove(&mut self, actor: ActorId) -> bool;

    fn contains(&self, actor: ActorId) -> bool;

    fn role(&self, actor: ActorId) -> Option<Role>;

    /// Changes an existing actor's role. Returns false if absent.
    fn set_role(&mut self, actor: ActorId, role: Role) -> bool;

    /// Defensive copy used for eviction and persistence; callers mutate the
    /// directory while walking the snapshot.
    fn snapshot(&self) -> Vec<ParticipantEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spatial regions owned by one instance.
pub trait RegionDirectory {
    fn contains(&self, region: RegionId) -> bool;

    fn contains_at(&self, region: RegionId, position: Position) -> bool;
}

/// Typed named settings of one instance.
pub trait SettingsStore {
    fn get(&self, name: &str) -> Option<Value>;

    fn set(&mut self, name: &str, value: Value);

    fn snapshot(&self) -> serde_json::Map<String, Value>;

    fn replace(&mut self, values: serde_json::Map<String, Value>);

    fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_i64()
    }

    fn get_str(&self, name: &str) -> Option<String> {
        Some(self.get(name)?.as_str()?.to_owned())
    }
}

/// Default in-memory participant directory with deterministic iteration
/// order.
#[derive(Default)]
pub struct Roster {
    entries: BTreeMap<ActorId, Role>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParticipantDirectory for Roster {
    fn add(&mut self, actor: ActorId, role: Role) -> bool {
        if self.entries.contains_key(&actor) {
            return false;
        }
        self.entries.insert(actor, role);
        true
    }

    fn remove(&mut self, actor: ActorId) -> bool {
        self.entries.remove(&actor).is_some()
    }

    fn contains(&self, actor: ActorId) -> bool {
        self.entries.contains_key(&actor)
    }

    fn role(&self, actor: ActorId) -> Option<Role> {
        self.entries.get(&actor).copied()
    }

    fn set_role(&mut self, actor: ActorId, role: Role) -> bool {
        match self.entries.get_mut(&actor) {
            Some(slot) => {
                *slot = role;
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> Vec<ParticipantEntry> {
        self.entries
            .iter()
            .map(|(&actor, &role)| ParticipantEntry { actor, role })
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Axis-aligned bounding box in block coordinates, inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub min: Position,
    pub max: Position,
}

impl Bounds {
    pub fn new(min: Position, max: Position) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, position: Position) -> bool {
        position.x >= self.min.x
            && position.x <= self.max.x
            && position.y >= self.min.y
            && position.y <= self.max.y
            && position.z >= self.min.z
            && position.z <= self.max.z
    }
}

/// Default in-memory region directory.
#[derive(Default)]
pub struct RegionSet {
    regions: HashMap<RegionId, Bounds>,
}

impl RegionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: RegionId, bounds: Bounds) {
        self.regions.insert(region, bounds);
    }
}

impl RegionDirectory for RegionSet {
    fn contains(&self, region: RegionId) -> bool {
        self.regions.contains_key(&region)
    }

    fn contains_at(&self, region: RegionId, position: Position) -> bool {
        self.regions
            .get(&region)
            .is_some_and(|bounds| bounds.contains(position))
    }
}

/// Default in-memory settings store backed by a JSON map.
#[derive(Default)]
pub struct Settings {
    values: serde_json::Map<String, Value>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for Settings {
    fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_owned(), value);
    }

    fn snapshot(&self) -> serde_json::Map<String, Value> {
        self.values.clone()
    }

    fn replace(&mut self, values: serde_json::Map<String, Value>) {
        self.values = values;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roster_rejects_duplicate_actors() {
        let mut roster = Roster::new();
        assert!(roster.add(ActorId(1), Role::Playing));
        assert!(!roster.add(ActorId(1), Role::Observing));
        assert_eq!(roster.role(ActorId(1)), Some(Role::Playing));
    }

    #[test]
    fn bounds_are_inclusive() {
        let bounds = Bounds::new(Position::new(0, 0, 0), Position::new(10, 10, 10));
        assert!(bounds.contains(Position::new(0, 0, 0)));
        assert!(bounds.contains(Position::new(10, 10, 10)));
        assert!(!bounds.contains(Position::new(11, 5, 5)));
    }

    #[test]
    fn settings_typed_getters_coerce_json_values() {
        let mut settings = Settings::new();
        settings.set("team_size", json!(4));
        settings.set("friendly_fire", json!(false));
        settings.set("map", json!("crossfire"));

        assert_eq!(settings.get_i64("team_size"), Some(4));
        assert_eq!(settings.get_bool("friendly_fire"), Some(false));
        assert_eq!(settings.get_str("map").as_deref(), Some("crossfire"));
        assert_eq!(settings.get_i64("missing"), None);
    }
}
