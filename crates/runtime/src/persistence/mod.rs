//! Durable state: capturing live instances into fragment bundles, reviving
//! them, and the filesystem repository that stores them.

mod bundle;
mod context;
mod file;

pub use bundle::{InstanceBundle, LoadReport};
pub use context::{OpaqueDecoder, TaskFactory, TaskPersistenceContext};
pub use file::FileInstanceRepository;
