//! One running minigame session: phase state machine, listener registry,
//! schedulers, and lifecycle.
//!
//! All orchestration flows through [`Instance`]: listeners and tasks receive
//! `&mut Instance` and may re-enter it (register more listeners, schedule
//! more tasks, request a phase transition). Every dispatch path snapshots
//! before invoking callbacks, so mid-iteration mutation is safe.

mod directory;

pub use directory::InstanceDirectory;

use serde_json::Value;
use uuid::Uuid;

use session_core::{
    ActorId, BatchOutcome, ConfigurationError, EventType, GameEvent, InstanceDocument, Phase,
    PhaseTracker, Role, Tick,
};

use crate::collaborators::{
    ParticipantDirectory, RegionDirectory, RegionSet, Roster, Settings, SettingsStore,
};
use crate::events::{ListenerSpec, ScopedEventRegistry, dispatch};
use crate::scheduler::{QueueKind, TickScheduler};
use crate::task::{TaskHandle, TaskRef, TaskWork};

type EndOfPhaseFn = Box<dyn FnOnce(&mut Instance)>;

/// One running minigame session.
pub struct Instance {
    id: String,
    uuid: Uuid,
    parameters: Value,
    custom: Value,
    initialized: bool,
    started: bool,
    paused: bool,
    closed: bool,
    phases: PhaseTracker,
    registry: ScopedEventRegistry,
    scheduler: TickScheduler,
    end_of_phase: Vec<EndOfPhaseFn>,
    participants: Box<dyn ParticipantDirectory>,
    regions: Box<dyn RegionDirectory>,
    settings: Box<dyn SettingsStore>,
    outbox: Vec<GameEvent>,
}

impl Instance {
    pub fn builder(id: impl Into<String>) -> InstanceBuilder {
        InstanceBuilder::new(id)
    }

    // ------------------------------------------------------------------
    // Identity and state accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn custom(&self) -> &Value {
        &self.custom
    }

    pub fn set_custom(&mut self, value: Value) {
        self.custom = value;
    }

    pub fn phase(&self) -> &Phase {
        self.phases.current()
    }

    pub fn allowed_phases(&self) -> &[Phase] {
        self.phases.allowed()
    }

    /// Looks up a declared phase by id.
    pub fn find_phase(&self, id: &str) -> Option<Phase> {
        self.phases.find(id).cloned()
    }

    pub fn clock(&self) -> Tick {
        self.scheduler.clock()
    }

    /// Ticks this instance has lived through; frozen while paused.
    pub fn uptime(&self) -> u64 {
        self.scheduler.clock().0
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn participants(&self) -> &dyn ParticipantDirectory {
        self.participants.as_ref()
    }

    pub fn participants_mut(&mut self) -> &mut dyn ParticipantDirectory {
        self.participants.as_mut()
    }

    pub fn regions(&self) -> &dyn RegionDirectory {
        self.regions.as_ref()
    }

    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }

    pub fn settings_mut(&mut self) -> &mut dyn SettingsStore {
        self.settings.as_mut()
    }

    fn ensure_open(&self) -> Result<(), ConfigurationError> {
        if self.closed {
            Err(ConfigurationError::Closed)
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Event registration and dispatch
    // ------------------------------------------------------------------

    /// Registers a listener in the persistent bucket.
    pub fn on(
        &mut self,
        spec: ListenerSpec,
        callback: impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()> + 'static,
    ) -> Result<(), ConfigurationError> {
        self.ensure_open()?;
        self.registry.register(spec, callback);
        Ok(())
    }

    /// Registers a listener in the phase bucket; destroyed on the next
    /// transition regardless of which phase is entered.
    pub fn on_phase_scoped(
        &mut self,
        spec: ListenerSpec,
        callback: impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()> + 'static,
    ) -> Result<(), ConfigurationError> {
        self.ensure_open()?;
        self.registry.register_phase_scoped(spec, callback);
        Ok(())
    }

    /// Persistent listener gated to fire only while the current phase is in
    /// `phases`. Never destroyed by transitions; it resumes if the phase
    /// returns into the set.
    pub fn on_for_phases(
        &mut self,
        spec: ListenerSpec,
        phases: Vec<Phase>,
        callback: impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()> + 'static,
    ) -> Result<(), ConfigurationError> {
        self.ensure_open()?;
        self.registry.register_for_phases(spec, phases, callback);
        Ok(())
    }

    /// Persistent listener gated to the ordinal range `[start, end]`.
    pub fn on_for_phase_range(
        &mut self,
        spec: ListenerSpec,
        start: &Phase,
        end: &Phase,
        callback: impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()> + 'static,
    ) -> Result<(), ConfigurationError> {
        self.ensure_open()?;
        self.registry
            .register_for_phase_range(spec, start, end, callback);
        Ok(())
    }

    /// Dispatches an event to this instance's listeners.
    pub fn broadcast(&mut self, event: &GameEvent) {
        if self.closed {
            return;
        }
        let snapshot = self.registry.matching(event.kind);
        dispatch(&snapshot, event, self);
    }

    /// Broadcasts locally and queues the event for the process-wide bus.
    pub fn emit(&mut self, event: GameEvent) {
        self.broadcast(&event);
        self.outbox.push(event);
    }

    fn emit_lifecycle(&mut self, kind: EventType, actor: Option<ActorId>) {
        let mut event = GameEvent::new(kind).scoped_to(self.uuid);
        event.actor = actor;
        // Lifecycle events must reach subscribers even while tearing down,
        // so they bypass the closed check in broadcast.
        let snapshot = self.registry.matching(event.kind);
        dispatch(&snapshot, &event, self);
        self.outbox.push(event);
    }

    /// Drains events queued for the process-wide bus.
    pub(crate) fn drain_outbox(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.outbox)
    }

    // ------------------------------------------------------------------
    // Phase transitions
    // ------------------------------------------------------------------

    /// Queues a callback to run on the next phase transition, before the new
    /// phase is entered. Callbacks run in FIFO registration order.
    pub fn at_phase_end(
        &mut self,
        callback: impl FnOnce(&mut Instance) + 'static,
    ) -> Result<(), ConfigurationError> {
        self.ensure_open()?;
        self.end_of_phase.push(Box::new(callback));
        Ok(())
    }

    /// Transitions to `next`, returning the phase that was left.
    ///
    /// On success, in order: the phase-lifetime scheduler is cleared, the
    /// phase listener bucket is destroyed, queued end-of-phase callbacks run
    /// FIFO, the phase is updated, and a [`EventType::PhaseChanged`] event is
    /// broadcast. On failure nothing changes.
    pub fn set_phase(&mut self, next: Phase) -> Result<Phase, ConfigurationError> {
        self.ensure_open()?;
        if !self.phases.is_allowed(&next) {
            return Err(ConfigurationError::PhaseNotAllowed {
                phase: next.id,
                allowed: self.phases.allowed().iter().map(|p| p.id.clone()).collect(),
            });
        }

        self.scheduler.cancel_all(QueueKind::Phase);
        self.registry.clear_phase_scoped();

        let callbacks = std::mem::take(&mut self.end_of_phase);
        for callback in callbacks {
            callback(self);
        }

        let previous = self.phases.transition(next)?;
        self.started = true;

        tracing::debug!(
            target: "runtime::instance",
            instance = %self.uuid,
            from = %previous,
            to = %self.phases.current(),
            "phase transition"
        );
        self.emit_lifecycle(EventType::PhaseChanged, None);

        Ok(previous)
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    /// Adds an actor to the participant set. Returns false (without an
    /// event) if the actor was already present.
    pub fn add_participant(
        &mut self,
        actor: ActorId,
        role: Role,
    ) -> Result<bool, ConfigurationError> {
        self.ensure_open()?;
        if !self.participants.add(actor, role) {
            return Ok(false);
        }
        self.emit_lifecycle(EventType::ParticipantAdded, Some(actor));
        Ok(true)
    }

    /// Adds a batch of actors, reporting success/failure counts instead of
    /// raising on duplicates.
    pub fn add_participants(
        &mut self,
        batch: impl IntoIterator<Item = (ActorId, Role)>,
    ) -> Result<BatchOutcome, ConfigurationError> {
        self.ensure_open()?;
        let mut outcome = BatchOutcome::default();
        for (actor, role) in batch {
            outcome.record(self.add_participant(actor, role)?);
        }
        Ok(outcome)
    }

    pub fn remove_participant(&mut self, actor: ActorId) -> Result<bool, ConfigurationError> {
        self.ensure_open()?;
        if !self.participants.remove(actor) {
            return Ok(false);
        }
        self.emit_lifecycle(EventType::ParticipantRemoved, Some(actor));
        Ok(true)
    }

    pub fn set_role(&mut self, actor: ActorId, role: Role) -> Result<bool, ConfigurationError> {
        self.ensure_open()?;
        if !self.participants.set_role(actor, role) {
            return Ok(false);
        }
        self.emit_lifecycle(EventType::RoleChanged, Some(actor));
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Pausing and ticking
    // ------------------------------------------------------------------

    /// Pauses or resumes the instance. Pausing freezes the tick counter
    /// entirely: paused time never counts toward scheduling delays.
    pub fn set_paused(&mut self, paused: bool) -> Result<(), ConfigurationError> {
        self.ensure_open()?;
        if self.paused == paused {
            return Ok(());
        }
        self.paused = paused;
        let kind = if paused {
            EventType::Paused
        } else {
            EventType::Unpaused
        };
        self.emit_lifecycle(kind, None);
        Ok(())
    }

    /// Advances the instance by one server tick and runs every task that
    /// came due. A task that fails is logged and skipped; remaining due
    /// tasks still run.
    ///
    /// Tasks may transition the phase or close the instance mid-tick. Each
    /// remaining task is therefore checked against the closed flag and its
    /// source queue's epoch right before it runs: tasks drained before a
    /// same-tick `cancel_all` (phase transition, close) never execute.
    pub fn tick(&mut self) {
        if self.closed || self.paused {
            return;
        }
        let due = self.scheduler.advance();
        for entry in due {
            if self.closed {
                break;
            }
            if entry.task.is_cancelled() || self.scheduler.epoch(entry.queue) != entry.epoch {
                continue;
            }
            if let Err(error) = entry.task.run(self) {
                tracing::warn!(
                    target: "runtime::scheduler",
                    instance = %self.uuid,
                    task = %entry.task.handle(),
                    error = ?error,
                    "scheduled task failed"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Schedules a task on the instance-lifetime queue.
    pub fn schedule(
        &mut self,
        delay: u64,
        work: impl TaskWork + 'static,
    ) -> Result<TaskHandle, ConfigurationError> {
        self.ensure_open()?;
        Ok(self
            .scheduler
            .schedule(QueueKind::Session, delay, Box::new(work)))
    }

    /// Schedules a task on the phase-lifetime queue; purged on the next
    /// phase transition.
    pub fn schedule_in_phase(
        &mut self,
        delay: u64,
        work: impl TaskWork + 'static,
    ) -> Result<TaskHandle, ConfigurationError> {
        self.ensure_open()?;
        Ok(self
            .scheduler
            .schedule(QueueKind::Phase, delay, Box::new(work)))
    }

    /// Instance-lifetime task that can be cancelled through the returned
    /// reference up until its due tick.
    pub fn schedule_cancellable(
        &mut self,
        delay: u64,
        work: impl TaskWork + 'static,
    ) -> Result<TaskRef, ConfigurationError> {
        self.ensure_open()?;
        Ok(self
            .scheduler
            .schedule_cancellable(QueueKind::Session, delay, Box::new(work)))
    }

    /// Instance-lifetime loop: fires at `{delay, delay+interval, …}` up to
    /// `delay + total`, all occurrences materialized up front.
    pub fn schedule_loop(
        &mut self,
        delay: u64,
        interval: u64,
        total: u64,
        work: impl TaskWork + 'static,
    ) -> Result<TaskRef, ConfigurationError> {
        self.ensure_open()?;
        Ok(self
            .scheduler
            .schedule_loop(QueueKind::Session, delay, interval, total, Box::new(work)))
    }

    /// Phase-lifetime loop.
    pub fn schedule_loop_in_phase(
        &mut self,
        delay: u64,
        interval: u64,
        total: u64,
        work: impl TaskWork + 'static,
    ) -> Result<TaskRef, ConfigurationError> {
        self.ensure_open()?;
        Ok(self
            .scheduler
            .schedule_loop(QueueKind::Phase, delay, interval, total, Box::new(work)))
    }

    /// Cancels every pending instance-lifetime task.
    pub fn cancel_session_tasks(&mut self) {
        self.scheduler.cancel_all(QueueKind::Session);
    }

    /// Cancels every pending phase-lifetime task.
    pub fn cancel_phase_tasks(&mut self) {
        self.scheduler.cancel_all(QueueKind::Phase);
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Tears the instance down. Terminal: no further phase transitions,
    /// scheduling, or event registration is permitted afterwards.
    ///
    /// Evicts every participant (emitting [`EventType::ParticipantRemoved`]
    /// for each), emits [`EventType::Closed`], then purges both schedulers
    /// and all listener buckets.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        for entry in self.participants.snapshot() {
            if self.participants.remove(entry.actor) {
                self.emit_lifecycle(EventType::ParticipantRemoved, Some(entry.actor));
            }
        }

        self.emit_lifecycle(EventType::Closed, None);

        self.scheduler.stop();
        self.registry.clear_all();
        self.end_of_phase.clear();
        self.closed = true;

        tracing::debug!(target: "runtime::instance", instance = %self.uuid, "instance closed");
    }

    // ------------------------------------------------------------------
    // Internal hooks
    // ------------------------------------------------------------------

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub(crate) fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    pub(crate) fn scheduler_mut(&mut self) -> &mut TickScheduler {
        &mut self.scheduler
    }

    pub(crate) fn registry(&self) -> &ScopedEventRegistry {
        &self.registry
    }

    pub(crate) fn root_document(&self) -> InstanceDocument {
        InstanceDocument {
            id: self.id.clone(),
            initialized: self.initialized,
            started: self.started,
            phase: self.phases.current().id.clone(),
            uptime: self.uptime(),
            paused: self.paused,
            uuid: self.uuid,
            parameters: self.parameters.clone(),
        }
    }

    pub(crate) fn apply_root_document(&mut self, doc: &InstanceDocument) {
        self.uuid = doc.uuid;
        self.started = doc.started;
        self.paused = doc.paused;
        self.parameters = doc.parameters.clone();

        if doc.phase == Phase::none().id {
            return;
        }
        match self.phases.find(&doc.phase).cloned() {
            Some(phase) => {
                // Restores raw state; transition side effects (clearing,
                // callbacks, events) do not replay on load.
                let _ = self.phases.transition(phase);
            }
            None => {
                tracing::warn!(
                    target: "runtime::persistence",
                    instance = %self.uuid,
                    phase = %doc.phase,
                    "persisted phase is not in the declared set, staying at none"
                );
            }
        }
    }
}

/// Builder for [`Instance`] with injectable collaborators.
pub struct InstanceBuilder {
    id: String,
    allowed_phases: Vec<Phase>,
    parameters: Value,
    participants: Box<dyn ParticipantDirectory>,
    regions: Box<dyn RegionDirectory>,
    settings: Box<dyn SettingsStore>,
}

impl InstanceBuilder {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            allowed_phases: Vec::new(),
            parameters: Value::Null,
            participants: Box::new(Roster::new()),
            regions: Box::new(RegionSet::new()),
            settings: Box::new(Settings::new()),
        }
    }

    /// Declares the finite phase set. The `none` sentinel is implicit and
    /// must not be declared.
    pub fn allowed_phases(mut self, phases: Vec<Phase>) -> Self {
        self.allowed_phases = phases;
        self
    }

    /// Creation parameters, persisted verbatim in the root document.
    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn participants(mut self, participants: impl ParticipantDirectory + 'static) -> Self {
        self.participants = Box::new(participants);
        self
    }

    pub fn regions(mut self, regions: impl RegionDirectory + 'static) -> Self {
        self.regions = Box::new(regions);
        self
    }

    pub fn settings(mut self, settings: impl SettingsStore + 'static) -> Self {
        self.settings = Box::new(settings);
        self
    }

    pub fn build(self) -> Instance {
        Instance {
            id: self.id,
            uuid: Uuid::new_v4(),
            parameters: self.parameters,
            custom: Value::Null,
            initialized: false,
            started: false,
            paused: false,
            closed: false,
            phases: PhaseTracker::new(self.allowed_phases),
            registry: ScopedEventRegistry::new(),
            scheduler: TickScheduler::new(),
            end_of_phase: Vec::new(),
            participants: self.participants,
            regions: self.regions,
            settings: self.settings,
            outbox: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use session_core::Capability;

    fn arena() -> Instance {
        Instance::builder("arena")
            .allowed_phases(vec![
                Phase::new("lobby", 0),
                Phase::new("playing", 1),
                Phase::new("end", 2),
            ])
            .build()
    }

    fn counter() -> (Rc<Cell<u32>>, impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()>) {
        let count = Rc::new(Cell::new(0));
        let captured = Rc::clone(&count);
        (count, move |_: &GameEvent, _: &mut Instance| {
            captured.set(captured.get() + 1);
            Ok(())
        })
    }

    #[test]
    fn delay_fires_exactly_on_the_due_tick() {
        let mut instance = arena();
        let fired = Rc::new(Cell::new(0u32));
        let captured = Rc::clone(&fired);
        instance
            .schedule(5, move |_: &mut Instance| -> anyhow::Result<()> {
                captured.set(captured.get() + 1);
                Ok(())
            })
            .unwrap();

        for _ in 0..4 {
            instance.tick();
        }
        assert_eq!(fired.get(), 0);
        instance.tick();
        assert_eq!(fired.get(), 1);
        instance.tick();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn loop_fires_at_declared_occurrences_only() {
        let mut instance = arena();
        let ticks = Rc::new(std::cell::RefCell::new(Vec::new()));
        let captured = Rc::clone(&ticks);
        instance
            .schedule_loop(5, 10, 25, move |i: &mut Instance| -> anyhow::Result<()> {
                captured.borrow_mut().push(i.clock().0);
                Ok(())
            })
            .unwrap();

        for _ in 0..60 {
            instance.tick();
        }
        assert_eq!(*ticks.borrow(), vec![5, 15, 25]);
    }

    #[test]
    fn cancelling_before_due_tick_prevents_execution() {
        let mut instance = arena();
        let fired = Rc::new(Cell::new(0u32));
        let captured = Rc::clone(&fired);
        let task = instance
            .schedule_cancellable(3, move |_: &mut Instance| -> anyhow::Result<()> {
                captured.set(captured.get() + 1);
                Ok(())
            })
            .unwrap();

        task.cancel();
        for _ in 0..5 {
            instance.tick();
        }
        assert_eq!(fired.get(), 0);
        // Cancelling after the fact is a no-op.
        task.cancel();
    }

    #[test]
    fn pause_freezes_the_clock_and_delays() {
        let mut instance = arena();
        let fired = Rc::new(Cell::new(0u32));
        let captured = Rc::clone(&fired);
        instance
            .schedule(2, move |_: &mut Instance| -> anyhow::Result<()> {
                captured.set(captured.get() + 1);
                Ok(())
            })
            .unwrap();

        instance.tick();
        instance.set_paused(true).unwrap();
        for _ in 0..10 {
            instance.tick();
        }
        assert_eq!(instance.clock(), Tick(1));
        assert_eq!(fired.get(), 0);

        instance.set_paused(false).unwrap();
        instance.tick();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn failing_task_does_not_starve_other_due_tasks() {
        let mut instance = arena();
        instance
            .schedule(1, |_: &mut Instance| -> anyhow::Result<()> {
                anyhow::bail!("task exploded")
            })
            .unwrap();
        let fired = Rc::new(Cell::new(0u32));
        let captured = Rc::clone(&fired);
        instance
            .schedule(1, move |_: &mut Instance| -> anyhow::Result<()> {
                captured.set(captured.get() + 1);
                Ok(())
            })
            .unwrap();

        instance.tick();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn transition_clears_phase_bucket_and_phase_queue() {
        let mut instance = arena();
        let (count, listener) = counter();
        instance
            .on_phase_scoped(ListenerSpec::new(EventType::Custom("hit")), listener)
            .unwrap();
        let fired = Rc::new(Cell::new(0u32));
        let captured = Rc::clone(&fired);
        instance
            .schedule_in_phase(1, move |_: &mut Instance| -> anyhow::Result<()> {
                captured.set(captured.get() + 1);
                Ok(())
            })
            .unwrap();

        instance.set_phase(Phase::new("lobby", 0)).unwrap();

        instance.broadcast(&GameEvent::new(EventType::Custom("hit")));
        instance.tick();
        assert_eq!(count.get(), 0);
        assert_eq!(fired.get(), 0);
        assert_eq!(instance.registry().phase_scoped_len(), 0);
    }

    #[test]
    fn same_tick_phase_tasks_do_not_outlive_a_transition() {
        let mut instance = arena();
        instance.set_phase(Phase::new("lobby", 0)).unwrap();

        // Both come due on the same tick; the first one leaves the phase.
        instance
            .schedule_in_phase(1, |i: &mut Instance| -> anyhow::Result<()> {
                i.set_phase(Phase::new("playing", 1))?;
                Ok(())
            })
            .unwrap();
        let fired = Rc::new(Cell::new(0u32));
        let captured = Rc::clone(&fired);
        instance
            .schedule_in_phase(1, move |_: &mut Instance| -> anyhow::Result<()> {
                captured.set(captured.get() + 1);
                Ok(())
            })
            .unwrap();

        instance.tick();
        assert_eq!(instance.phase().id, "playing");
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn same_tick_session_tasks_survive_a_transition() {
        let mut instance = arena();
        instance.set_phase(Phase::new("lobby", 0)).unwrap();

        let fired = Rc::new(Cell::new(0u32));
        let captured = Rc::clone(&fired);
        instance
            .schedule(1, move |i: &mut Instance| -> anyhow::Result<()> {
                i.set_phase(Phase::new("playing", 1))?;
                captured.set(captured.get() + 1);
                Ok(())
            })
            .unwrap();
        let captured = Rc::clone(&fired);
        instance
            .schedule(1, move |_: &mut Instance| -> anyhow::Result<()> {
                captured.set(captured.get() + 1);
                Ok(())
            })
            .unwrap();

        // The transition clears the phase queue only; the session queue's
        // same-tick batch keeps running.
        instance.tick();
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn close_mid_tick_halts_the_remaining_due_tasks() {
        let mut instance = arena();
        instance
            .schedule(1, |i: &mut Instance| -> anyhow::Result<()> {
                i.close();
                Ok(())
            })
            .unwrap();
        let fired = Rc::new(Cell::new(0u32));
        let captured = Rc::clone(&fired);
        instance
            .schedule(1, move |_: &mut Instance| -> anyhow::Result<()> {
                captured.set(captured.get() + 1);
                Ok(())
            })
            .unwrap();

        instance.tick();
        assert!(instance.is_closed());
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn rejected_transition_leaves_everything_untouched() {
        let mut instance = arena();
        let (count, listener) = counter();
        instance
            .on_phase_scoped(ListenerSpec::new(EventType::Custom("hit")), listener)
            .unwrap();

        let err = instance.set_phase(Phase::new("overtime", 9)).unwrap_err();
        assert!(matches!(err, ConfigurationError::PhaseNotAllowed { .. }));
        assert!(instance.phase().is_none());

        // The phase bucket survived the failed transition.
        instance.broadcast(&GameEvent::new(EventType::Custom("hit")));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn end_of_phase_callbacks_run_fifo_before_the_new_phase() {
        let mut instance = arena();
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let captured = Rc::clone(&order);
            instance
                .at_phase_end(move |i: &mut Instance| {
                    // Still in the old phase while end-of-phase tasks run.
                    captured.borrow_mut().push((label, i.phase().id.clone()));
                })
                .unwrap();
        }

        instance.set_phase(Phase::new("lobby", 0)).unwrap();
        let seen = order.borrow();
        assert_eq!(
            *seen,
            vec![
                ("first", "none".to_string()),
                ("second", "none".to_string()),
                ("third", "none".to_string()),
            ]
        );
        drop(seen);

        // The queue was consumed; the next transition runs nothing extra.
        order.borrow_mut().clear();
        instance.set_phase(Phase::new("playing", 1)).unwrap();
        assert!(order.borrow().is_empty());
    }

    #[test]
    fn capability_filter_requires_known_participant() {
        let mut instance = arena();
        let (count, listener) = counter();
        instance
            .on(
                ListenerSpec::new(EventType::Custom("eliminated"))
                    .require(Capability::HAS_ACTOR),
                listener,
            )
            .unwrap();

        let stranger = GameEvent::new(EventType::Custom("eliminated")).with_actor(ActorId(99));
        instance.broadcast(&stranger);
        assert_eq!(count.get(), 0);

        instance.add_participant(ActorId(99), Role::Playing).unwrap();
        instance.broadcast(&stranger);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn role_capability_refines_participation() {
        let mut instance = arena();
        let (count, listener) = counter();
        instance
            .on(
                ListenerSpec::new(EventType::Custom("scored"))
                    .require(Capability::IS_PARTICIPATING),
                listener,
            )
            .unwrap();

        instance.add_participant(ActorId(1), Role::Observing).unwrap();
        let event = GameEvent::new(EventType::Custom("scored")).with_actor(ActorId(1));
        instance.broadcast(&event);
        assert_eq!(count.get(), 0);

        instance.set_role(ActorId(1), Role::Playing).unwrap();
        instance.broadcast(&event);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn scoped_to_self_requires_identity_match() {
        let mut instance = arena();
        let (count, listener) = counter();
        instance
            .on(
                ListenerSpec::new(EventType::Custom("finished"))
                    .require(Capability::SCOPED_TO_SELF),
                listener,
            )
            .unwrap();

        let foreign = GameEvent::new(EventType::Custom("finished")).scoped_to(Uuid::new_v4());
        instance.broadcast(&foreign);
        assert_eq!(count.get(), 0);

        let own = GameEvent::new(EventType::Custom("finished")).scoped_to(instance.uuid());
        instance.broadcast(&own);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn close_is_terminal() {
        let mut instance = arena();
        instance.add_participant(ActorId(1), Role::Playing).unwrap();
        instance.close();

        assert!(instance.is_closed());
        assert_eq!(instance.participants().len(), 0);
        assert!(matches!(
            instance.set_phase(Phase::new("lobby", 0)),
            Err(ConfigurationError::Closed)
        ));
        assert!(matches!(
            instance.schedule(1, |_: &mut Instance| -> anyhow::Result<()> { Ok(()) }),
            Err(ConfigurationError::Closed)
        ));
        assert!(matches!(
            instance.on(ListenerSpec::new(EventType::Custom("x")), |_, _| Ok(())),
            Err(ConfigurationError::Closed)
        ));

        // Ticking a closed instance is a no-op, not an error.
        instance.tick();
        assert_eq!(instance.clock(), Tick::ZERO);

        // close() twice stays silent.
        instance.close();
    }

    #[test]
    fn close_emits_removal_then_closed_events() {
        let mut instance = arena();
        instance.add_participant(ActorId(1), Role::Playing).unwrap();
        instance.add_participant(ActorId(2), Role::Observing).unwrap();
        instance.drain_outbox();

        instance.close();
        let kinds: Vec<EventType> = instance
            .drain_outbox()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventType::ParticipantRemoved,
                EventType::ParticipantRemoved,
                EventType::Closed,
            ]
        );
    }

    #[test]
    fn listener_can_request_phase_transition_mid_dispatch() {
        let mut instance = arena();
        instance.set_phase(Phase::new("lobby", 0)).unwrap();

        // The first listener transitions; the second is phase-scoped and
        // must be silenced by the mid-dispatch clear.
        instance
            .on(
                ListenerSpec::new(EventType::Custom("start")).priority(-10),
                |_, i: &mut Instance| {
                    i.set_phase(Phase::new("playing", 1))?;
                    Ok(())
                },
            )
            .unwrap();
        let (count, listener) = counter();
        instance
            .on_phase_scoped(ListenerSpec::new(EventType::Custom("start")), listener)
            .unwrap();

        instance.broadcast(&GameEvent::new(EventType::Custom("start")));
        assert_eq!(instance.phase().id, "playing");
        assert_eq!(count.get(), 0);
    }
}
