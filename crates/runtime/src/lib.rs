//! Session orchestration runtime.
//!
//! Hosts build an [`Instance`] per running minigame session, register
//! listeners and scheduled tasks against it, and drive it one server tick
//! at a time. An [`InstanceDirectory`] owns the full set of instances and
//! forwards their lifecycle events to process-wide subscribers. The
//! [`persistence`] module captures instances into fragment bundles and
//! revives them across restarts.
//!
//! Everything here is single-threaded by design: callbacks receive
//! `&mut Instance` and may freely re-enter the runtime (register listeners,
//! schedule tasks, transition phases) because every dispatch path operates
//! on snapshots.

pub mod collaborators;
mod error;
pub mod events;
mod instance;
pub mod persistence;
mod scheduler;
mod task;

pub use session_core::{
    ActorId, BatchOutcome, Capability, EventType, GameEvent, Phase, Position, RegionId, Role, Tick,
};

pub use error::{ConfigurationError, PersistenceError, Result, RuntimeError};
pub use events::ListenerSpec;
pub use instance::{Instance, InstanceBuilder, InstanceDirectory};
pub use persistence::{
    FileInstanceRepository, InstanceBundle, LoadReport, TaskFactory, TaskPersistenceContext,
};
pub use task::{TaskHandle, TaskRef, TaskSave, TaskWork};
