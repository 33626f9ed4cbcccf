//! Task revival across a save/load cycle.
//!
//! Closures cannot be serialized, so durable tasks describe themselves as a
//! factory id plus a JSON payload (or opaque bytes) and are reconstructed
//! here on load. Tasks that stay `Unsavable` are dropped at save time with
//! a warning.

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use session_core::{QueueEntry, SchedulerDocument, TaskDefinition, TaskPayload, Tick};

use crate::persistence::LoadReport;
use crate::scheduler::{QueueKind, TickScheduler};
use crate::task::{ScheduledTask, TaskHandle, TaskSave, TaskWork};

/// Reconstructs one family of savable tasks from its persisted payload.
pub trait TaskFactory {
    /// Stable id matched against [`TaskPayload::Known::factory_id`].
    fn id(&self) -> &str;

    fn revive(&self, payload: &Value) -> anyhow::Result<Box<dyn TaskWork>>;
}

pub type OpaqueDecoder = Box<dyn Fn(&[u8]) -> anyhow::Result<Box<dyn TaskWork>>>;

/// Registry of task factories consulted on save and load.
#[derive(Default)]
pub struct TaskPersistenceContext {
    factories: HashMap<String, Box<dyn TaskFactory>>,
    opaque_decoder: Option<OpaqueDecoder>,
}

impl TaskPersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory; a factory registered later under the same id
    /// replaces the earlier one.
    pub fn register_factory(&mut self, factory: impl TaskFactory + 'static) {
        let id = factory.id().to_owned();
        if self.factories.insert(id.clone(), Box::new(factory)).is_some() {
            tracing::warn!(
                target: "runtime::persistence",
                factory = %id,
                "task factory replaced"
            );
        }
    }

    /// Installs the decoder used to revive [`TaskPayload::Opaque`] blobs.
    /// Without one, opaque tasks are dropped on load.
    pub fn set_opaque_decoder(
        &mut self,
        decoder: impl Fn(&[u8]) -> anyhow::Result<Box<dyn TaskWork>> + 'static,
    ) {
        self.opaque_decoder = Some(Box::new(decoder));
    }

    /// Captures both scheduler queues into a durable document.
    ///
    /// Each task identity is written once regardless of how many due ticks
    /// reference it; queue entries point back at it by handle. Cancelled
    /// tasks and unsavable tasks are omitted.
    pub(crate) fn snapshot(&self, scheduler: &TickScheduler) -> SchedulerDocument {
        let mut definitions = Vec::new();
        let mut savable: HashMap<u64, bool> = HashMap::new();

        let mut capture = |queue: QueueKind| -> Vec<QueueEntry> {
            let mut entries = Vec::new();
            for (due, task) in scheduler.queue(queue).pending() {
                if task.is_cancelled() {
                    continue;
                }
                let handle = task.handle().0;
                let keep = match savable.get(&handle) {
                    Some(&keep) => keep,
                    None => {
                        let keep = match task.save() {
                            TaskSave::Known { factory_id, payload } => {
                                definitions.push(TaskDefinition {
                                    handle,
                                    kind: task.kind(),
                                    payload: TaskPayload::Known { factory_id, payload },
                                });
                                true
                            }
                            TaskSave::Opaque(bytes) => {
                                definitions.push(TaskDefinition {
                                    handle,
                                    kind: task.kind(),
                                    payload: TaskPayload::Opaque { bytes },
                                });
                                true
                            }
                            TaskSave::Unsavable => {
                                tracing::warn!(
                                    target: "runtime::persistence",
                                    task = %task.handle(),
                                    "unsavable task dropped from snapshot"
                                );
                                false
                            }
                        };
                        savable.insert(handle, keep);
                        keep
                    }
                };
                if keep {
                    entries.push(QueueEntry { due: due.0, handle });
                }
            }
            entries
        };

        let session = capture(QueueKind::Session);
        let phase = capture(QueueKind::Phase);

        SchedulerDocument {
            clock: scheduler.clock().0,
            next_handle: scheduler.next_handle(),
            session,
            phase,
            definitions,
        }
    }

    /// Rebuilds both queues from a durable document.
    ///
    /// A definition is revived at most once; every queue entry referencing
    /// the same handle shares the revived task instance, so cancelling it
    /// still purges every occurrence. Definitions that cannot be revived
    /// (missing factory, failing factory, opaque blob without a decoder)
    /// are dropped and counted in `report`; the rest of the document loads.
    pub(crate) fn restore(
        &self,
        doc: &SchedulerDocument,
        scheduler: &mut TickScheduler,
        report: &mut LoadReport,
    ) {
        scheduler.set_clock(Tick(doc.clock));
        scheduler.set_next_handle(doc.next_handle);

        let mut revived: HashMap<u64, Option<Rc<ScheduledTask>>> = HashMap::new();
        let mut restore_queue = |queue: QueueKind, entries: &[QueueEntry]| {
            for entry in entries {
                let task = revived
                    .entry(entry.handle)
                    .or_insert_with(|| match self.revive(doc, entry.handle) {
                        Ok(task) => Some(task),
                        Err(error) => {
                            tracing::warn!(
                                target: "runtime::persistence",
                                task = %TaskHandle(entry.handle),
                                error = ?error,
                                "dropping task that could not be revived"
                            );
                            report.dropped_tasks += 1;
                            None
                        }
                    });
                if let Some(task) = task {
                    scheduler.insert_restored(queue, Tick(entry.due), Rc::clone(task));
                }
            }
        };

        restore_queue(QueueKind::Session, &doc.session);
        restore_queue(QueueKind::Phase, &doc.phase);
    }

    fn revive(&self, doc: &SchedulerDocument, handle: u64) -> anyhow::Result<Rc<ScheduledTask>> {
        let definition = doc
            .definition(handle)
            .ok_or_else(|| anyhow::anyhow!("no definition for handle {handle}"))?;
        let work = match &definition.payload {
            TaskPayload::Known { factory_id, payload } => {
                let factory = self
                    .factories
                    .get(factory_id)
                    .ok_or_else(|| anyhow::anyhow!("no factory registered as {factory_id:?}"))?;
                factory.revive(payload)?
            }
            TaskPayload::Opaque { bytes } => {
                let decoder = self
                    .opaque_decoder
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("opaque payload but no decoder installed"))?;
                decoder(bytes)?
            }
        };
        Ok(Rc::new(ScheduledTask::new(
            TaskHandle(handle),
            definition.kind,
            work,
        )))
    }
}
