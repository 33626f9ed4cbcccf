//! Canonical data model for the session orchestration engine.
//!
//! `session-core` defines the event model, phase state machine, and persisted
//! document types shared between the runtime and offline tools. The stateful
//! orchestration (listener registries, schedulers, instance lifecycle) lives
//! in the `runtime` crate and is built from the types re-exported here.
pub mod document;
pub mod error;
pub mod event;
pub mod phase;
pub mod types;

pub use document::{
    InstanceDocument, ParticipantEntry, ParticipantsDocument, QueueEntry, SchedulerDocument,
    SettingsDocument, TaskDefinition, TaskKind, TaskPayload,
};
pub use error::ConfigurationError;
pub use event::{Capability, EventType, GameEvent, Role};
pub use phase::{Phase, PhaseTracker};
pub use types::{ActorId, BatchOutcome, Position, RegionId, Tick};
