//! Scheduled task model: work callbacks, savability, and identity handles.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use session_core::TaskKind;

use crate::instance::Instance;

/// Stable identity assigned to a task instance when it is first scheduled.
///
/// The handle, never memory identity, is the deduplication key on both the
/// serialize and deserialize paths: one task scheduled at several due ticks
/// is persisted once and revived as one shared instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// How a task describes itself at the persistence boundary.
pub enum TaskSave {
    /// Revived through the factory registered under `factory_id`.
    Known { factory_id: String, payload: Value },
    /// Opaque bytes the task encodes for itself.
    Opaque(Vec<u8>),
    /// Dropped on save with a warning. Bounded, documented data loss.
    Unsavable,
}

/// Work executed by the tick scheduler.
///
/// Plain closures implement this and are `Unsavable`; tasks that must
/// survive a restart implement `save` alongside a registered
/// [`TaskFactory`](crate::persistence::TaskFactory).
pub trait TaskWork {
    fn run(&self, instance: &mut Instance) -> anyhow::Result<()>;

    fn save(&self) -> TaskSave {
        TaskSave::Unsavable
    }
}

impl<F> TaskWork for F
where
    F: Fn(&mut Instance) -> anyhow::Result<()> + 'static,
{
    fn run(&self, instance: &mut Instance) -> anyhow::Result<()> {
        self(instance)
    }
}

/// One task instance, shared between every due tick it is scheduled at.
pub struct ScheduledTask {
    handle: TaskHandle,
    kind: TaskKind,
    cancelled: Cell<bool>,
    work: Box<dyn TaskWork>,
}

impl ScheduledTask {
    pub(crate) fn new(handle: TaskHandle, kind: TaskKind, work: Box<dyn TaskWork>) -> Self {
        Self {
            handle,
            kind,
            cancelled: Cell::new(false),
            work,
        }
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    /// Marks the task cancelled. Cancellation is cooperative: the flag is
    /// checked immediately before execution, so cancelling after the due
    /// tick has already run is a no-op.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub(crate) fn run(&self, instance: &mut Instance) -> anyhow::Result<()> {
        self.work.run(instance)
    }

    pub(crate) fn save(&self) -> TaskSave {
        self.work.save()
    }
}

/// Cloneable reference to a scheduled task, used to cancel it from game
/// logic (e.g. a user-facing "cancel countdown" action).
#[derive(Clone)]
pub struct TaskRef(pub(crate) Rc<ScheduledTask>);

impl TaskRef {
    pub fn handle(&self) -> TaskHandle {
        self.0.handle()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Cancels every pending occurrence of this task, including loop
    /// occurrences that have not come due yet.
    pub fn cancel(&self) {
        self.0.cancel();
    }
}
