pub mod config;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod worker;

pub use config::{RetentionPolicy, SessionConfig};
pub use error::{CmdqueueError, Result};
pub use scheduler::{CommandSpec, JobResult, JobState};
pub use session::{Session, SessionRegistry, SubmitOutcome, TerminateOutcome, Ticket};
