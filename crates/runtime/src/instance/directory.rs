//! Process-wide registry of running instances.
//!
//! The directory owns every [`Instance`], drives their ticks, fans external
//! events out to them, and forwards the lifecycle events each instance
//! queues in its outbox to a process-wide bus that external layers
//! subscribe to.

use std::collections::HashMap;

use uuid::Uuid;

use session_core::{EventType, GameEvent};

use crate::events::{EventBus, dispatch};
use crate::instance::Instance;

/// Owns and drives every running instance.
#[derive(Default)]
pub struct InstanceDirectory {
    instances: HashMap<Uuid, Instance>,
    bus: EventBus<InstanceDirectory>,
}

impl InstanceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts an instance, marking it initialized and returning its uuid.
    pub fn insert(&mut self, mut instance: Instance) -> Uuid {
        instance.mark_initialized();
        let uuid = instance.uuid();
        tracing::debug!(
            target: "runtime::directory",
            instance = %uuid,
            id = instance.id(),
            "instance registered"
        );
        self.instances.insert(uuid, instance);
        uuid
    }

    pub fn get(&self, uuid: Uuid) -> Option<&Instance> {
        self.instances.get(&uuid)
    }

    pub fn get_mut(&mut self, uuid: Uuid) -> Option<&mut Instance> {
        self.instances.get_mut(&uuid)
    }

    /// Finds a running instance by its configured id.
    pub fn find_by_id(&self, id: &str) -> Option<&Instance> {
        self.instances.values().find(|i| i.id() == id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn uuids(&self) -> Vec<Uuid> {
        self.instances.keys().copied().collect()
    }

    /// Subscribes to the process-wide bus. Every lifecycle event any
    /// instance emits passes through here after local dispatch.
    pub fn subscribe(
        &mut self,
        event_type: EventType,
        priority: i32,
        callback: impl Fn(&GameEvent, &mut InstanceDirectory) -> anyhow::Result<()> + 'static,
    ) {
        self.bus.register(event_type, priority, true, Box::new(callback));
    }

    /// Advances every instance by one tick, then forwards the lifecycle
    /// events their callbacks produced.
    pub fn tick_all(&mut self) {
        for uuid in self.uuids() {
            if let Some(instance) = self.instances.get_mut(&uuid) {
                instance.tick();
            }
        }
        self.pump_outboxes();
    }

    /// Delivers an external event to every instance, then to process-wide
    /// subscribers.
    pub fn broadcast(&mut self, event: &GameEvent) {
        for uuid in self.uuids() {
            if let Some(instance) = self.instances.get_mut(&uuid) {
                instance.broadcast(event);
            }
        }
        self.pump_outboxes();
        let snapshot = self.bus.listeners_for(event.kind);
        dispatch(&snapshot, event, self);
    }

    /// Drains every instance outbox into the process-wide bus.
    pub fn pump_outboxes(&mut self) {
        loop {
            let mut pending = Vec::new();
            for uuid in self.uuids() {
                if let Some(instance) = self.instances.get_mut(&uuid) {
                    pending.extend(instance.drain_outbox());
                }
            }
            if pending.is_empty() {
                break;
            }
            // Subscribers may cause further emissions, so keep draining
            // until the outboxes settle.
            for event in pending {
                let snapshot = self.bus.listeners_for(event.kind);
                dispatch(&snapshot, &event, self);
            }
        }
    }

    /// Closes one instance and removes it from the directory.
    pub fn close(&mut self, uuid: Uuid) -> bool {
        let Some(mut instance) = self.instances.remove(&uuid) else {
            return false;
        };
        instance.close();
        let events = instance.drain_outbox();
        for event in events {
            let snapshot = self.bus.listeners_for(event.kind);
            dispatch(&snapshot, &event, self);
        }
        true
    }

    /// Closes every instance. The directory is empty afterwards.
    pub fn shutdown(&mut self) {
        for uuid in self.uuids() {
            self.close(uuid);
        }
        tracing::info!(target: "runtime::directory", "all instances closed");
    }
}
