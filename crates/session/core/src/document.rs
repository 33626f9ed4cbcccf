//! Persisted document types.
//!
//! One durable bundle per instance, composed of independently-loadable named
//! fragments. Each struct here maps to one fragment file; the runtime's
//! persistence layer is responsible for degraded loads (a fragment that
//! fails to parse is skipped and defaults applied).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::event::Role;
use crate::types::ActorId;

/// How a scheduled task behaves at run time.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    OneShot,
    Cancellable,
    Loop,
}

/// Root fragment: identity and lifecycle flags of one instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceDocument {
    pub id: String,
    pub initialized: bool,
    pub started: bool,
    pub phase: String,
    pub uptime: u64,
    pub paused: bool,
    pub uuid: Uuid,
    pub parameters: Value,
}

/// Durable form of one task instance, written once per identity handle.
///
/// The handle is the sole deduplication key: a task scheduled at several due
/// ticks appears once here and is referenced by handle from the queue
/// entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub handle: u64,
    pub kind: TaskKind,
    pub payload: TaskPayload,
}

/// Savable representation of a task's state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Reconstructed through the factory registered under `factory_id`.
    Known { factory_id: String, payload: Value },
    /// Opaque bytes the task produced for itself. Revivable only when the
    /// loading side registers an opaque decoder.
    Opaque { bytes: Vec<u8> },
}

/// One pending occurrence in a scheduler queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub due: u64,
    pub handle: u64,
}

/// Scheduled-tasks fragment: both queues plus the deduplicated definitions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerDocument {
    pub clock: u64,
    pub next_handle: u64,
    pub session: Vec<QueueEntry>,
    pub phase: Vec<QueueEntry>,
    pub definitions: Vec<TaskDefinition>,
}

impl SchedulerDocument {
    pub fn definition(&self, handle: u64) -> Option<&TaskDefinition> {
        self.definitions.iter().find(|d| d.handle == handle)
    }
}

/// Participants fragment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantsDocument {
    pub entries: Vec<ParticipantEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEntry {
    pub actor: ActorId,
    pub role: Role,
}

/// Settings fragment: typed values keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    pub values: serde_json::Map<String, Value>,
}

impl Default for InstanceDocument {
    fn default() -> Self {
        Self {
            id: String::new(),
            initialized: false,
            started: false,
            phase: crate::phase::Phase::none().id,
            uptime: 0,
            paused: false,
            uuid: Uuid::nil(),
            parameters: Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_payload_serializes_with_form_tag() {
        let payload = TaskPayload::Known {
            factory_id: "countdown".into(),
            payload: serde_json::json!({ "remaining": 10 }),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["form"], "known");
        assert_eq!(json["factory_id"], "countdown");

        let back: TaskPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn scheduler_document_looks_up_definitions_by_handle() {
        let doc = SchedulerDocument {
            clock: 40,
            next_handle: 3,
            session: vec![QueueEntry { due: 45, handle: 2 }],
            phase: vec![],
            definitions: vec![TaskDefinition {
                handle: 2,
                kind: TaskKind::OneShot,
                payload: TaskPayload::Opaque { bytes: vec![1, 2] },
            }],
        };
        assert!(doc.definition(2).is_some());
        assert!(doc.definition(7).is_none());
    }
}
