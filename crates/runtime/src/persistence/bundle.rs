//! Capturing and reapplying the durable state of one instance.

use serde_json::Value;

use session_core::{
    InstanceDocument, ParticipantsDocument, SchedulerDocument, SettingsDocument,
};

use crate::instance::Instance;
use crate::persistence::TaskPersistenceContext;

/// Everything that failed softly during a load.
///
/// A load either errors hard (the root fragment is unreadable) or succeeds
/// with a report: fragments that fell back to defaults and tasks that could
/// not be revived.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Fragment names that failed to read or parse and were replaced by
    /// their defaults.
    pub degraded_fragments: Vec<String>,
    /// Queue entries dropped because their task could not be revived.
    pub dropped_tasks: u32,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.degraded_fragments.is_empty() && self.dropped_tasks == 0
    }

    pub fn merge(&mut self, other: LoadReport) {
        self.degraded_fragments.extend(other.degraded_fragments);
        self.dropped_tasks += other.dropped_tasks;
    }
}

/// The full durable state of one instance, one field per fragment file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceBundle {
    pub instance: InstanceDocument,
    pub scheduler: SchedulerDocument,
    pub participants: ParticipantsDocument,
    pub settings: SettingsDocument,
    pub custom: Value,
}

impl InstanceBundle {
    /// Captures a consistent snapshot of a live instance.
    pub fn capture(instance: &Instance, ctx: &TaskPersistenceContext) -> Self {
        Self {
            instance: instance.root_document(),
            scheduler: ctx.snapshot(instance.scheduler()),
            participants: ParticipantsDocument {
                entries: instance.participants().snapshot(),
            },
            settings: SettingsDocument {
                values: instance.settings().snapshot(),
            },
            custom: instance.custom().clone(),
        }
    }

    /// Reapplies this bundle onto a freshly built instance.
    ///
    /// The instance must have been built with the same declared phase set
    /// and collaborators; the bundle restores raw state without replaying
    /// lifecycle side effects (no events are emitted for restored
    /// participants, no transition callbacks run for the restored phase).
    pub fn apply_to(&self, instance: &mut Instance, ctx: &TaskPersistenceContext) -> LoadReport {
        let mut report = LoadReport::default();

        instance.apply_root_document(&self.instance);
        ctx.restore(&self.scheduler, instance.scheduler_mut(), &mut report);
        for entry in &self.participants.entries {
            instance.participants_mut().add(entry.actor, entry.role);
        }
        instance.settings_mut().replace(self.settings.values.clone());
        instance.set_custom(self.custom.clone());
        instance.mark_initialized();

        report
    }
}
