pub mod admission;
pub mod job;
pub mod store;

pub use admission::{Admission, Scheduler};
pub use job::{CommandSpec, JobResult, JobState, LOST, NOT_FINISHED, SPAWN_FAILED};
pub use store::ResultStore;
