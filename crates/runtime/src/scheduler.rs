//! Two-tier tick scheduler.
//!
//! Each instance owns two independent delay-keyed queues: the session queue
//! lives for the whole instance, the phase queue is cleared on every phase
//! transition. Both map absolute due ticks to ordered task lists and are
//! advanced together, one tick at a time.

use std::collections::BTreeMap;
use std::rc::Rc;

use session_core::{TaskKind, Tick};

use crate::task::{ScheduledTask, TaskHandle, TaskRef, TaskWork};

/// Which of the two queues an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum QueueKind {
    Session,
    Phase,
}

/// Delay-keyed task queue: absolute due tick to tasks in insertion order.
#[derive(Default)]
pub(crate) struct TaskQueue {
    by_tick: BTreeMap<Tick, Vec<Rc<ScheduledTask>>>,
    /// Bumped on every `cancel_all`. Tasks drained for execution carry the
    /// epoch they were drained under, so a clear that happens mid-tick also
    /// invalidates already-drained tasks that have not run yet.
    epoch: u64,
}

impl TaskQueue {
    fn insert(&mut self, due: Tick, task: Rc<ScheduledTask>) {
        self.by_tick.entry(due).or_default().push(task);
    }

    fn drain_due(&mut self, now: Tick) -> Vec<Rc<ScheduledTask>> {
        let mut due = Vec::new();
        let mut remaining = self.by_tick.split_off(&(now + 1));
        for (_, tasks) in std::mem::take(&mut self.by_tick) {
            due.extend(tasks);
        }
        std::mem::swap(&mut self.by_tick, &mut remaining);
        due
    }

    /// Marks every pending task cancelled and removes all entries,
    /// not-yet-due loop occurrences included.
    fn cancel_all(&mut self) {
        for tasks in self.by_tick.values() {
            for task in tasks {
                task.cancel();
            }
        }
        self.by_tick.clear();
        self.epoch += 1;
    }

    pub(crate) fn pending(&self) -> impl Iterator<Item = (Tick, &Rc<ScheduledTask>)> {
        self.by_tick
            .iter()
            .flat_map(|(tick, tasks)| tasks.iter().map(move |t| (*tick, t)))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_tick.is_empty()
    }
}

/// One task drained for execution, tagged with where it came from.
///
/// The tag lets the tick loop recheck the source queue's epoch right before
/// running the task: a `cancel_all` triggered by an earlier task in the same
/// tick (phase transition, close) invalidates the rest of the batch.
pub(crate) struct DueTask {
    pub(crate) queue: QueueKind,
    pub(crate) epoch: u64,
    pub(crate) task: Rc<ScheduledTask>,
}

/// Two-tier scheduler advanced once per server tick.
pub struct TickScheduler {
    clock: Tick,
    next_handle: u64,
    stopped: bool,
    session: TaskQueue,
    phase: TaskQueue,
}

impl TickScheduler {
    pub(crate) fn new() -> Self {
        Self {
            clock: Tick::ZERO,
            next_handle: 0,
            stopped: false,
            session: TaskQueue::default(),
            phase: TaskQueue::default(),
        }
    }

    pub fn clock(&self) -> Tick {
        self.clock
    }

    fn alloc(&mut self, kind: TaskKind, work: Box<dyn TaskWork>) -> Rc<ScheduledTask> {
        let handle = TaskHandle(self.next_handle);
        self.next_handle += 1;
        Rc::new(ScheduledTask::new(handle, kind, work))
    }

    fn queue_mut(&mut self, queue: QueueKind) -> &mut TaskQueue {
        match queue {
            QueueKind::Session => &mut self.session,
            QueueKind::Phase => &mut self.phase,
        }
    }

    /// Absolute due tick for a requested delay. A zero delay is clamped to
    /// one tick: tasks scheduled during a tick run on later ticks only.
    fn due_tick(&self, delay: u64) -> Tick {
        self.clock + delay.max(1)
    }

    pub(crate) fn schedule(
        &mut self,
        queue: QueueKind,
        delay: u64,
        work: Box<dyn TaskWork>,
    ) -> TaskHandle {
        let due = self.due_tick(delay);
        let task = self.alloc(TaskKind::OneShot, work);
        let handle = task.handle();
        self.queue_mut(queue).insert(due, task);
        handle
    }

    pub(crate) fn schedule_cancellable(
        &mut self,
        queue: QueueKind,
        delay: u64,
        work: Box<dyn TaskWork>,
    ) -> TaskRef {
        let due = self.due_tick(delay);
        let task = self.alloc(TaskKind::Cancellable, work);
        self.queue_mut(queue).insert(due, Rc::clone(&task));
        TaskRef(task)
    }

    /// Schedules one shared task at every occurrence of a loop:
    /// `{delay, delay+interval, delay+2·interval, …}` not exceeding
    /// `delay + total`. Materializing all occurrences up front means
    /// cancelling the returned [`TaskRef`] (or clearing the queue) purges
    /// the whole loop in one call.
    pub(crate) fn schedule_loop(
        &mut self,
        queue: QueueKind,
        delay: u64,
        interval: u64,
        total: u64,
        work: Box<dyn TaskWork>,
    ) -> TaskRef {
        let task = self.alloc(TaskKind::Loop, work);

        let bound = delay + total;
        let mut offset = delay;
        loop {
            let due = self.clock + offset.max(1);
            self.queue_mut(queue).insert(due, Rc::clone(&task));
            if interval == 0 {
                break;
            }
            offset += interval;
            if offset > bound {
                break;
            }
        }

        TaskRef(task)
    }

    pub(crate) fn cancel_all(&mut self, queue: QueueKind) {
        self.queue_mut(queue).cancel_all();
    }

    /// Clears both queues and permanently stops the scheduler. Terminal.
    pub(crate) fn stop(&mut self) {
        self.session.cancel_all();
        self.phase.cancel_all();
        self.stopped = true;
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Advances the clock by one tick and returns every task now due, in
    /// session-queue-before-phase-queue order, insertion order within each.
    pub(crate) fn advance(&mut self) -> Vec<DueTask> {
        if self.stopped {
            return Vec::new();
        }
        self.clock = self.clock + 1;
        let session_epoch = self.session.epoch;
        let phase_epoch = self.phase.epoch;
        let mut due: Vec<DueTask> = self
            .session
            .drain_due(self.clock)
            .into_iter()
            .map(|task| DueTask {
                queue: QueueKind::Session,
                epoch: session_epoch,
                task,
            })
            .collect();
        due.extend(self.phase.drain_due(self.clock).into_iter().map(|task| {
            DueTask {
                queue: QueueKind::Phase,
                epoch: phase_epoch,
                task,
            }
        }));
        due
    }

    /// Current epoch of a queue; drained tasks whose recorded epoch is older
    /// were invalidated by a clear and must not run.
    pub(crate) fn epoch(&self, queue: QueueKind) -> u64 {
        match queue {
            QueueKind::Session => self.session.epoch,
            QueueKind::Phase => self.phase.epoch,
        }
    }

    pub(crate) fn queue(&self, queue: QueueKind) -> &TaskQueue {
        match queue {
            QueueKind::Session => &self.session,
            QueueKind::Phase => &self.phase,
        }
    }

    pub(crate) fn next_handle(&self) -> u64 {
        self.next_handle
    }

    // Restore-path hooks used by the persistence context.

    pub(crate) fn set_clock(&mut self, clock: Tick) {
        self.clock = clock;
    }

    pub(crate) fn set_next_handle(&mut self, next_handle: u64) {
        self.next_handle = next_handle;
    }

    pub(crate) fn insert_restored(
        &mut self,
        queue: QueueKind,
        due: Tick,
        task: Rc<ScheduledTask>,
    ) {
        self.queue_mut(queue).insert(due, task);
    }
}
