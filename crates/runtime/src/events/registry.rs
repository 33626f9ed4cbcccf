//! Per-instance listener registry with capability filtering and two
//! independently lifetime-managed buckets.
//!
//! The persistent bucket survives phase transitions; the phase-scoped bucket
//! is destroyed atomically on every transition. Phase-gated registrations
//! (`register_for_phases` / `register_for_phase_range`) go to the persistent
//! bucket wrapped with a predicate on the current phase: they stop firing
//! outside their declared phases and resume if the phase returns into range.

use std::rc::Rc;

use session_core::{Capability, EventType, GameEvent, Phase};

use crate::events::bus::{EventBus, ListenerEntry, ListenerFn};
use crate::instance::Instance;

/// Registration-time description of a listener.
#[derive(Clone, Copy, Debug)]
pub struct ListenerSpec {
    pub event_type: EventType,
    pub priority: i32,
    pub capabilities: Capability,
    pub main_thread: bool,
}

impl ListenerSpec {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            priority: 0,
            capabilities: Capability::empty(),
            main_thread: true,
        }
    }

    /// Lower priorities run earlier; ties preserve registration order.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Capability flags compiled into filter predicates at registration.
    pub fn require(mut self, capabilities: Capability) -> Self {
        self.capabilities |= capabilities;
        self
    }

    /// Marks the listener safe to run off the host's main thread.
    pub fn off_thread(mut self) -> Self {
        self.main_thread = false;
        self
    }
}

/// Filter predicates selected from capability flags at registration time.
///
/// Compiled once per registration; dispatch evaluates them against the
/// owning instance's collaborators without any per-event lookup of which
/// predicates apply.
#[derive(Clone, Copy, Debug)]
struct CompiledFilter {
    caps: Capability,
}

impl CompiledFilter {
    fn new(caps: Capability) -> Self {
        Self { caps }
    }

    fn accept(&self, event: &GameEvent, instance: &Instance) -> bool {
        let caps = self.caps;
        if caps.is_empty() {
            return true;
        }

        let wants_actor = caps.intersects(
            Capability::HAS_ACTOR
                | Capability::IS_PARTICIPATING
                | Capability::IS_OBSERVING
                | Capability::IS_ADMIN,
        );
        if wants_actor {
            let Some(actor) = event.actor else {
                return false;
            };
            let Some(role) = instance.participants().role(actor) else {
                return false;
            };
            use session_core::Role;
            if caps.contains(Capability::IS_PARTICIPATING) && role != Role::Playing {
                return false;
            }
            if caps.contains(Capability::IS_OBSERVING) && role != Role::Observing {
                return false;
            }
            if caps.contains(Capability::IS_ADMIN) && role != Role::Admin {
                return false;
            }
        }

        if caps.intersects(Capability::HAS_REGION | Capability::IN_BOUNDS) {
            let Some(region) = event.region else {
                return false;
            };
            let inside = match (caps.contains(Capability::IN_BOUNDS), event.position) {
                (true, Some(position)) => instance.regions().contains_at(region, position),
                _ => instance.regions().contains(region),
            };
            if !inside {
                return false;
            }
        }

        if caps.contains(Capability::SCOPED_TO_SELF) && event.source != Some(instance.uuid()) {
            return false;
        }

        true
    }
}

/// Phase predicate attached to gated registrations in the persistent bucket.
enum PhaseGate {
    Always,
    OneOf(Vec<Phase>),
    Range { start: i32, end: i32 },
}

impl PhaseGate {
    fn allows(&self, current: &Phase) -> bool {
        match self {
            PhaseGate::Always => true,
            PhaseGate::OneOf(phases) => phases.iter().any(|p| p.is_at(current)),
            PhaseGate::Range { start, end } => {
                current.ordinal >= *start && current.ordinal <= *end
            }
        }
    }
}

/// Per-instance wrapper around the two listener buckets.
pub struct ScopedEventRegistry {
    persistent: EventBus<Instance>,
    phase_scoped: EventBus<Instance>,
}

impl ScopedEventRegistry {
    pub(crate) fn new() -> Self {
        Self {
            persistent: EventBus::new(),
            phase_scoped: EventBus::new(),
        }
    }

    fn wrap(
        spec: ListenerSpec,
        gate: PhaseGate,
        callback: impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()> + 'static,
    ) -> ListenerFn<Instance> {
        let filter = CompiledFilter::new(spec.capabilities);
        Box::new(move |event, instance| {
            if !gate.allows(instance.phase()) {
                return Ok(());
            }
            if !filter.accept(event, instance) {
                return Ok(());
            }
            callback(event, instance)
        })
    }

    fn register_in(
        bus: &mut EventBus<Instance>,
        spec: ListenerSpec,
        gate: PhaseGate,
        callback: impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()> + 'static,
    ) {
        let wrapped = Self::wrap(spec, gate, callback);
        bus.register(spec.event_type, spec.priority, spec.main_thread, wrapped);
    }

    /// Persistent bucket: survives every phase transition.
    pub(crate) fn register(
        &mut self,
        spec: ListenerSpec,
        callback: impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()> + 'static,
    ) {
        Self::register_in(&mut self.persistent, spec, PhaseGate::Always, callback);
    }

    /// Phase bucket: destroyed on the next transition, whichever phase is
    /// entered.
    pub(crate) fn register_phase_scoped(
        &mut self,
        spec: ListenerSpec,
        callback: impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()> + 'static,
    ) {
        Self::register_in(&mut self.phase_scoped, spec, PhaseGate::Always, callback);
    }

    /// Persistent bucket, firing only while the current phase is in `phases`.
    pub(crate) fn register_for_phases(
        &mut self,
        spec: ListenerSpec,
        phases: Vec<Phase>,
        callback: impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()> + 'static,
    ) {
        Self::register_in(&mut self.persistent, spec, PhaseGate::OneOf(phases), callback);
    }

    /// Persistent bucket, firing only while the current phase's ordinal lies
    /// in `[start, end]`.
    pub(crate) fn register_for_phase_range(
        &mut self,
        spec: ListenerSpec,
        start: &Phase,
        end: &Phase,
        callback: impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()> + 'static,
    ) {
        let gate = PhaseGate::Range {
            start: start.ordinal,
            end: end.ordinal,
        };
        Self::register_in(&mut self.persistent, spec, gate, callback);
    }

    /// Merged, ordered snapshot across both buckets.
    ///
    /// Order is `(priority, bucket, registration order)` with the persistent
    /// bucket before the phase-scoped bucket at equal priority.
    pub(crate) fn matching(&self, event_type: EventType) -> Vec<Rc<ListenerEntry<Instance>>> {
        let mut entries: Vec<(u8, Rc<ListenerEntry<Instance>>)> = Vec::new();
        entries.extend(
            self.persistent
                .listeners_for(event_type)
                .into_iter()
                .map(|e| (0u8, e)),
        );
        entries.extend(
            self.phase_scoped
                .listeners_for(event_type)
                .into_iter()
                .map(|e| (1u8, e)),
        );
        entries.sort_by_key(|(bucket, e)| (e.priority(), *bucket, e.seq()));
        entries.into_iter().map(|(_, e)| e).collect()
    }

    pub(crate) fn clear_phase_scoped(&mut self) {
        self.phase_scoped.clear();
    }

    pub(crate) fn clear_all(&mut self) {
        self.persistent.clear();
        self.phase_scoped.clear();
    }

    pub(crate) fn phase_scoped_len(&self) -> usize {
        self.phase_scoped.len()
    }
}
