//! Session-scoped job engine.
//!
//! A [`Session`] owns everything a caller's jobs share: the result store,
//! the scheduler with its wait queue, and the table of live processes. All
//! of it sits behind one mutex that is only held for short map and counter
//! updates, never across an `.await`.
//!
//! # Job lifecycle
//!
//! 1. [`Session::enqueue`] takes a free slot, or queues the job under a
//!    negative placeholder id
//! 2. [`Ticket::run`] waits for admission (queued jobs only), spawns the
//!    process and re-keys the record under the real pid
//! 3. Once the process exits its output and exit code are written back and
//!    the slot is handed to the oldest queued job
//!
//! [`Session::terminate`] removes queued jobs outright and asks running
//! ones to stop with SIGTERM.

mod lease;
pub mod registry;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{RetentionPolicy, SessionConfig};
use crate::error::{CmdqueueError, Result};
use crate::scheduler::{Admission, JobResult, ResultStore, Scheduler, LOST, SPAWN_FAILED};
use crate::worker::ProcessRunner;

use lease::SlotLease;
pub use registry::SessionRegistry;

/// How a submission ended.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// The job was admitted and its process reached a terminal state.
    /// Carries the final record.
    Started(JobResult),
    /// The job was removed while still queued and never ran.
    Cancelled,
}

impl SubmitOutcome {
    pub fn job(&self) -> Option<&JobResult> {
        match self {
            SubmitOutcome::Started(job) => Some(job),
            SubmitOutcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SubmitOutcome::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// A queued (or failed, negative id) record was removed
    Dequeued,
    /// SIGTERM was requested for a running process
    Signalled,
    /// Nothing to do: unknown id or process already gone
    NotFound,
}

#[derive(Debug)]
struct ProcessEntry {
    token: CancellationToken,
    launch: u64,
}

#[derive(Debug)]
pub(crate) struct EngineState {
    store: ResultStore,
    scheduler: Scheduler,
    processes: HashMap<i64, ProcessEntry>,
    retention: RetentionPolicy,
    next_launch: u64,
    closed: bool,
}

pub(crate) fn lock_state(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    // State stays consistent across a panic in another holder: every
    // critical section is a handful of map and counter updates
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one session. Clones share the same state.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    config: Arc<SessionConfig>,
    runner: ProcessRunner,
    state: Arc<Mutex<EngineState>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_id(Uuid::new_v4(), config)
    }

    pub fn with_id(id: Uuid, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let state = EngineState {
            store: ResultStore::new(),
            scheduler: Scheduler::new(config.max_concurrent),
            processes: HashMap::new(),
            retention: config.retention,
            next_launch: 0,
            closed: false,
        };
        Ok(Self {
            id,
            config: Arc::new(config),
            runner: ProcessRunner::new(),
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        lock_state(&self.state)
    }

    /// Register a submission of catalog entry `index`.
    ///
    /// The job takes a free slot right away, or gets the next placeholder
    /// id and joins the back of the queue. Nothing is spawned until the
    /// returned ticket is run. An out-of-range index is rejected without
    /// touching any state.
    pub fn enqueue(&self, index: usize) -> Result<Ticket> {
        let command = self.config.command(index)?.clone();

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(CmdqueueError::SessionClosed);
        }

        let stage = if state.scheduler.try_admit() {
            tracing::debug!(session = %self.id, command = %command, "Job admitted immediately");
            Stage::Admitted {
                job: JobResult::new(command),
                lease: SlotLease::new(self.state.clone()),
            }
        } else {
            let (id, rx) = state.scheduler.enqueue(&mut state.store, command);
            Stage::Queued { id, rx }
        };
        drop(guard);

        Ok(Ticket {
            session: self.clone(),
            stage,
        })
    }

    /// Submit catalog entry `index` and wait until it finishes or is
    /// cancelled.
    pub async fn submit(&self, index: usize) -> Result<SubmitOutcome> {
        Ok(self.enqueue(index)?.run().await)
    }

    /// Submit catalog entry `index` and drive it on a background task.
    ///
    /// Submission order is fixed before this returns, so calling it
    /// repeatedly queues jobs in call order.
    pub fn submit_detached(&self, index: usize) -> Result<JoinHandle<SubmitOutcome>> {
        let ticket = self.enqueue(index)?;
        Ok(tokio::spawn(ticket.run()))
    }

    /// Spawn an admitted job and track it to completion.
    async fn launch(&self, mut job: JobResult, mut lease: SlotLease) -> JobResult {
        let process = match self.runner.spawn(&job.command) {
            Ok(process) => process,
            Err(e) => {
                tracing::warn!(session = %self.id, command = %job.command, error = %e, "Job failed to start");
                let mut guard = self.lock();
                let state = &mut *guard;
                job.id = state.scheduler.allocate_placeholder();
                job.mark_failed(SPAWN_FAILED, e.to_string());
                state.store.insert(job.clone());
                lease.settle(state);
                return job;
            }
        };

        let pid = process.pid();
        let token = CancellationToken::new();
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let launch = state.next_launch;
            state.next_launch += 1;

            // A finished record may still sit under a recycled pid
            if state.store.remove(pid).is_some() {
                tracing::debug!(pid, "Replacing finished record for reused pid");
            }
            job.mark_started(pid);
            state.store.insert(job.clone());
            state.processes.insert(
                pid,
                ProcessEntry {
                    token: token.clone(),
                    launch,
                },
            );
            lease.attach(pid, launch);

            if state.closed {
                token.cancel();
            }
        }
        tracing::info!(session = %self.id, job_id = pid, queued_id = ?job.queued_id, "Job running");

        let outcome = process.wait(token).await;

        let mut guard = self.lock();
        let state = &mut *guard;
        let mut finished = state.store.get(pid).cloned().unwrap_or(job);
        match outcome {
            Ok(output) => {
                finished.mark_exited(output.stdout, output.stderr, output.exit_code);
            }
            Err(e) => {
                tracing::error!(session = %self.id, job_id = pid, error = %e, "Lost track of job");
                finished.mark_failed(LOST, e.to_string());
            }
        }
        state.store.insert(finished.clone());
        lease.settle(state);

        tracing::info!(
            session = %self.id,
            job_id = pid,
            state = %finished.state(),
            exit_code = finished.exit_code,
            "Job completed"
        );
        finished
    }

    /// Cancel a queued job or signal a running one.
    ///
    /// Negative ids are removed from the store immediately; the submission
    /// waiting on them resolves to [`SubmitOutcome::Cancelled`]. For
    /// non-negative ids SIGTERM is requested and the call returns without
    /// waiting for the process to exit.
    pub fn terminate(&self, id: i64) -> TerminateOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;

        if id < 0 {
            if state.store.remove(id).is_none() {
                return TerminateOutcome::NotFound;
            }
            state.scheduler.cancel(id);
            tracing::info!(session = %self.id, job_id = id, "Queued job removed");
            return TerminateOutcome::Dequeued;
        }

        match state.processes.get(&id) {
            Some(entry) => {
                entry.token.cancel();
                tracing::info!(session = %self.id, job_id = id, "Termination requested");
                TerminateOutcome::Signalled
            }
            None => TerminateOutcome::NotFound,
        }
    }

    /// Remove a finished or failed record from the store.
    pub fn dismiss(&self, id: i64) -> Result<JobResult> {
        let mut state = self.lock();
        match state.store.get(id).map(JobResult::is_finished) {
            None => Err(CmdqueueError::JobNotFound(id)),
            Some(false) => Err(CmdqueueError::JobNotFinished(id)),
            Some(true) => state.store.remove(id).ok_or(CmdqueueError::JobNotFound(id)),
        }
    }

    /// Close the session: queued jobs are cancelled and running processes
    /// are sent SIGTERM. Running jobs still record their exit. Further
    /// submissions fail with [`CmdqueueError::SessionClosed`].
    pub fn shutdown(&self) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return;
        }
        state.closed = true;

        let cancelled = state.scheduler.cancel_all(&mut state.store);
        for entry in state.processes.values() {
            entry.token.cancel();
        }
        tracing::info!(
            session = %self.id,
            cancelled = cancelled.len(),
            signalled = state.processes.len(),
            "Session shut down"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn get(&self, id: i64) -> Option<JobResult> {
        self.lock().store.get(id).cloned()
    }

    pub fn pending_view(&self) -> Vec<i64> {
        self.lock().store.pending_view()
    }

    pub fn active_view(&self) -> Vec<i64> {
        self.lock().store.active_view()
    }

    pub fn combined_view(&self) -> Vec<i64> {
        self.lock().store.combined_view()
    }

    /// Snapshot of every record in display order.
    pub fn jobs(&self) -> Vec<JobResult> {
        let state = self.lock();
        state
            .store
            .combined_view()
            .into_iter()
            .filter_map(|id| state.store.get(id).cloned())
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.lock().scheduler.running()
    }

    pub fn queued_count(&self) -> usize {
        self.lock().scheduler.waiting()
    }
}

enum Stage {
    Admitted { job: JobResult, lease: SlotLease },
    Queued {
        id: i64,
        rx: oneshot::Receiver<Admission>,
    },
    Done,
}

/// A registered submission that has not run yet.
///
/// Dropping a ticket gives up its slot, or its place in the queue.
pub struct Ticket {
    session: Session,
    stage: Stage,
}

impl Ticket {
    /// Placeholder id while the job is queued.
    pub fn placeholder_id(&self) -> Option<i64> {
        match &self.stage {
            Stage::Queued { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn is_queued(&self) -> bool {
        self.placeholder_id().is_some()
    }

    /// Wait for admission if needed, then run the job to completion.
    pub async fn run(mut self) -> SubmitOutcome {
        let admission = match &mut self.stage {
            Stage::Queued { rx, .. } => Some(rx.await),
            _ => None,
        };
        match admission {
            Some(Ok(Admission::Admitted(job))) => {
                self.stage = Stage::Admitted {
                    job,
                    lease: SlotLease::new(self.session.state.clone()),
                };
            }
            Some(Ok(Admission::Cancelled)) | Some(Err(_)) => {
                self.stage = Stage::Done;
                return SubmitOutcome::Cancelled;
            }
            None => {}
        }

        match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Admitted { job, lease } => {
                SubmitOutcome::Started(self.session.launch(job, lease).await)
            }
            _ => SubmitOutcome::Cancelled,
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let Stage::Queued { id, mut rx } = std::mem::replace(&mut self.stage, Stage::Done) else {
            // An unlaunched lease releases its slot on drop
            return;
        };

        rx.close();
        match rx.try_recv() {
            // Admitted after we stopped listening; give the slot back
            Ok(Admission::Admitted(_)) => drop(SlotLease::new(self.session.state.clone())),
            Ok(Admission::Cancelled) => {}
            Err(_) => {
                let mut guard = self.session.lock();
                let state = &mut *guard;
                state.store.remove(id);
                state.scheduler.cancel(id);
            }
        }
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("session", &self.session.id)
            .field("placeholder_id", &self.placeholder_id())
            .finish()
    }
}
