//! Process execution for admitted jobs.
//!
//! - [`ProcessRunner::spawn`] starts the argv of a [`CommandSpec`](crate::scheduler::CommandSpec)
//!   with stdout/stderr piped
//! - [`RunningProcess::wait`] drains both pipes, waits for exit and sends
//!   SIGTERM when its cancellation token fires
//!
//! Signal deaths are reported as the negated signal number, so a process
//! stopped by SIGTERM ends with exit code `-15`.

pub mod executor;

pub use executor::{ProcessOutput, ProcessRunner, RunningProcess};
