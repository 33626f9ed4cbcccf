//! Priority-ordered event bus.
//!
//! Listener lists are keyed by event type and dispatched in ascending
//! `(priority, registration order)`. The bus is generic over the dispatch
//! context so the same machinery serves both per-instance buckets
//! (`EventBus<Instance>`) and the process-wide bus external layers subscribe
//! to (`EventBus<InstanceDirectory>`).

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use session_core::{EventType, GameEvent};

pub type ListenerFn<C> = Box<dyn Fn(&GameEvent, &mut C) -> anyhow::Result<()>>;

/// One registered listener.
pub struct ListenerEntry<C> {
    priority: i32,
    seq: u64,
    main_thread: bool,
    removed: Cell<bool>,
    callback: ListenerFn<C>,
}

impl<C> ListenerEntry<C> {
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Whether this listener must run on the host's main thread. Dispatch
    /// here is always synchronous; the flag is metadata for hosts that
    /// offload listener work.
    pub fn requires_main_thread(&self) -> bool {
        self.main_thread
    }

    pub fn is_removed(&self) -> bool {
        self.removed.get()
    }

    pub(crate) fn invoke(&self, event: &GameEvent, ctx: &mut C) -> anyhow::Result<()> {
        (self.callback)(event, ctx)
    }
}

/// Typed fan-out of events to registered listener lists.
pub struct EventBus<C> {
    listeners: HashMap<EventType, Vec<Rc<ListenerEntry<C>>>>,
    next_seq: u64,
}

impl<C> EventBus<C> {
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Registers a listener. Registration never fails; ties in priority
    /// preserve registration order.
    pub fn register(
        &mut self,
        event_type: EventType,
        priority: i32,
        main_thread: bool,
        callback: ListenerFn<C>,
    ) {
        let entry = Rc::new(ListenerEntry {
            priority,
            seq: self.next_seq,
            main_thread,
            removed: Cell::new(false),
            callback,
        });
        self.next_seq += 1;
        self.listeners.entry(event_type).or_default().push(entry);
    }

    /// Returns the merged, ordered listener list for one event type.
    ///
    /// The returned snapshot is what downstream registries splice filtered
    /// listeners into at the correct priority, and what dispatch iterates:
    /// listeners registered or cleared mid-dispatch never affect an
    /// in-flight snapshot beyond their `removed` flag.
    pub fn listeners_for(&self, event_type: EventType) -> Vec<Rc<ListenerEntry<C>>> {
        let mut entries: Vec<Rc<ListenerEntry<C>>> = self
            .listeners
            .get(&event_type)
            .map(|list| list.iter().filter(|e| !e.is_removed()).cloned().collect())
            .unwrap_or_default();
        entries.sort_by_key(|e| (e.priority(), e.seq()));
        entries
    }

    /// Marks every entry removed and drops the listener table.
    pub fn clear(&mut self) {
        for list in self.listeners.values() {
            for entry in list {
                entry.removed.set(true);
            }
        }
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Invokes a listener snapshot against one event.
///
/// A listener that returns an error is logged and skipped; it never aborts
/// dispatch to subsequent listeners for the same event. Entries removed
/// after the snapshot was taken (e.g. by a phase transition triggered from
/// an earlier listener) are silenced by their `removed` flag.
pub fn dispatch<C>(entries: &[Rc<ListenerEntry<C>>], event: &GameEvent, ctx: &mut C) {
    for entry in entries {
        if entry.is_removed() {
            continue;
        }
        if let Err(error) = entry.invoke(event, ctx) {
            tracing::warn!(
                target: "runtime::events",
                event = %event.kind,
                error = ?error,
                "listener failed, continuing dispatch"
            );
        }
    }
}
