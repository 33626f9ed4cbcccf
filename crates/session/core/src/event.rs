//! Event model: typed event tags, capability flags, and the event payload.
//!
//! Capability flags are a declared property of a registration, not of an
//! event class hierarchy: a listener states which optional payload fields it
//! relies on, and the registry compiles those flags into filter predicates.
//! An event derives its own capability set from which optional fields are
//! actually populated.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ActorId, Position, RegionId};

/// Type tag for an event.
///
/// Lifecycle variants are emitted by the orchestration engine itself;
/// everything a minigame defines goes through [`EventType::Custom`] with a
/// static name chosen by the game code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    /// An actor joined the instance's participant set.
    ParticipantAdded,
    /// An actor left (or was evicted from) the participant set.
    ParticipantRemoved,
    /// A participant's role changed (e.g. playing → observing).
    RoleChanged,
    /// The instance froze its clock.
    Paused,
    /// The instance resumed its clock.
    Unpaused,
    /// A phase transition completed.
    PhaseChanged,
    /// The instance was torn down. Terminal.
    Closed,
    /// Game-defined event type.
    Custom(&'static str),
}

impl EventType {
    pub fn name(&self) -> &'static str {
        match self {
            EventType::ParticipantAdded => "participant_added",
            EventType::ParticipantRemoved => "participant_removed",
            EventType::RoleChanged => "role_changed",
            EventType::Paused => "paused",
            EventType::Unpaused => "unpaused",
            EventType::PhaseChanged => "phase_changed",
            EventType::Closed => "closed",
            EventType::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// Capability tags a listener can require at registration time.
    ///
    /// Role refinements (`IS_PARTICIPATING` / `IS_OBSERVING` / `IS_ADMIN`)
    /// imply `HAS_ACTOR`; `IN_BOUNDS` implies `HAS_REGION`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capability: u8 {
        /// Event carries an actor who is in the instance's participant set.
        const HAS_ACTOR = 1 << 0;
        /// The actor's current role is `Playing`.
        const IS_PARTICIPATING = 1 << 1;
        /// The actor's current role is `Observing`.
        const IS_OBSERVING = 1 << 2;
        /// The actor's current role is `Admin`.
        const IS_ADMIN = 1 << 3;
        /// Event carries a region in the instance's region set.
        const HAS_REGION = 1 << 4;
        /// Event position (if any) lies inside the named region's bounds.
        const IN_BOUNDS = 1 << 5;
        /// Event is scoped to this exact instance (uuid identity).
        const SCOPED_TO_SELF = 1 << 6;
    }
}

/// Role of an actor within one instance.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Playing,
    Observing,
    Admin,
}

/// A tagged event payload.
///
/// Optional fields carry the actor, spatial context, and owning-instance
/// reference; [`GameEvent::capabilities`] reports which of them are set.
#[derive(Clone, Debug)]
pub struct GameEvent {
    pub kind: EventType,
    pub actor: Option<ActorId>,
    pub region: Option<RegionId>,
    pub position: Option<Position>,
    /// Uuid of the instance this event is scoped to, if any.
    pub source: Option<Uuid>,
}

impl GameEvent {
    pub fn new(kind: EventType) -> Self {
        Self {
            kind,
            actor: None,
            region: None,
            position: None,
            source: None,
        }
    }

    pub fn with_actor(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_region(mut self, region: RegionId) -> Self {
        self.region = Some(region);
        self
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn scoped_to(mut self, instance: Uuid) -> Self {
        self.source = Some(instance);
        self
    }

    /// Capability tags derived from the populated optional fields.
    pub fn capabilities(&self) -> Capability {
        let mut caps = Capability::empty();
        if self.actor.is_some() {
            caps |= Capability::HAS_ACTOR;
        }
        if self.region.is_some() {
            caps |= Capability::HAS_REGION;
            if self.position.is_some() {
                caps |= Capability::IN_BOUNDS;
            }
        }
        if self.source.is_some() {
            caps |= Capability::SCOPED_TO_SELF;
        }
        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_follow_populated_fields() {
        let bare = GameEvent::new(EventType::Custom("block_broken"));
        assert_eq!(bare.capabilities(), Capability::empty());

        let full = GameEvent::new(EventType::Custom("block_broken"))
            .with_actor(ActorId(7))
            .with_region(RegionId(1))
            .at(Position::new(1, 64, -3))
            .scoped_to(Uuid::new_v4());
        assert_eq!(
            full.capabilities(),
            Capability::HAS_ACTOR
                | Capability::HAS_REGION
                | Capability::IN_BOUNDS
                | Capability::SCOPED_TO_SELF
        );
    }

    #[test]
    fn region_without_position_is_not_in_bounds() {
        let event = GameEvent::new(EventType::Custom("region_entered")).with_region(RegionId(2));
        assert!(event.capabilities().contains(Capability::HAS_REGION));
        assert!(!event.capabilities().contains(Capability::IN_BOUNDS));
    }

    #[test]
    fn role_round_trips_through_strings() {
        use std::str::FromStr;
        assert_eq!(Role::Playing.to_string(), "playing");
        assert_eq!(Role::from_str("admin").unwrap(), Role::Admin);
    }
}
