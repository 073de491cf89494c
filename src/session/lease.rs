use std::sync::{Arc, Mutex};

use crate::scheduler::LOST;
use crate::session::{lock_state, EngineState};

/// One admission slot held by a job between admission and reaping.
///
/// Settling the lease gives the slot back to the scheduler exactly once.
/// If the lease is dropped without being settled, for example because the
/// future driving the job was dropped, the slot is still released and a
/// record left mid-flight is marked [`LOST`].
#[derive(Debug)]
pub(crate) struct SlotLease {
    state: Arc<Mutex<EngineState>>,
    process: Option<(i64, u64)>,
    armed: bool,
}

impl SlotLease {
    pub(crate) fn new(state: Arc<Mutex<EngineState>>) -> Self {
        Self {
            state,
            process: None,
            armed: true,
        }
    }

    /// Tie the lease to a process table entry.
    pub(crate) fn attach(&mut self, pid: i64, launch: u64) {
        self.process = Some((pid, launch));
    }

    /// Release the slot while the caller already holds the state lock.
    pub(crate) fn settle(mut self, state: &mut EngineState) {
        self.armed = false;
        release(state, self.process);
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        let mut guard = lock_state(&self.state);
        let state = &mut *guard;
        if let Some((pid, _)) = self.process {
            if let Some(record) = state.store.get_mut(pid) {
                if !record.is_finished() {
                    tracing::warn!(pid, "Job dropped before its process exited");
                    record.mark_failed(LOST, "submission dropped before the process exited".to_string());
                }
            }
        }
        release(state, self.process);
    }
}

fn release(state: &mut EngineState, process: Option<(i64, u64)>) {
    if let Some((pid, launch)) = process {
        // The pid may already belong to a newer launch
        if state.processes.get(&pid).is_some_and(|p| p.launch == launch) {
            state.processes.remove(&pid);
        }
    }
    state.scheduler.release(&mut state.store);
    let evicted = state.store.enforce_retention(&state.retention);
    if evicted > 0 {
        tracing::debug!(evicted, "Evicted finished jobs");
    }
}
