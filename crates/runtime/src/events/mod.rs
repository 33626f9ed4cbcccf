//! Event dispatch: the priority-ordered bus and the per-instance scoped
//! registry built on top of it.

mod bus;
mod registry;

pub use bus::{EventBus, ListenerEntry, ListenerFn, dispatch};
pub use registry::{ListenerSpec, ScopedEventRegistry};
