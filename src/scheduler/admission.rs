//! Admission control for a session.
//!
//! A job either takes a free slot at submission time or gets a negative
//! placeholder id and joins the wait queue. Placeholders are allocated
//! from a counter that only decreases, so the front of the queue is always
//! the numerically largest placeholder still waiting. Releasing a slot
//! hands it straight to the front waiter; the scheduler never polls.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::scheduler::job::{CommandSpec, JobResult};
use crate::scheduler::store::ResultStore;

/// How a queued job's wait ended.
#[derive(Debug)]
pub enum Admission {
    /// A slot was handed over; the record has been taken out of the store
    /// and is ready to launch.
    Admitted(JobResult),
    Cancelled,
}

#[derive(Debug)]
struct Waiter {
    id: i64,
    tx: oneshot::Sender<Admission>,
}

#[derive(Debug)]
pub struct Scheduler {
    max_concurrent: usize,
    running: usize,
    next_placeholder: i64,
    waiters: VecDeque<Waiter>,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            running: 0,
            next_placeholder: -1,
            waiters: VecDeque::new(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    /// Take a slot if one is free and nobody is ahead in the queue.
    pub fn try_admit(&mut self) -> bool {
        if self.running < self.max_concurrent && self.waiters.is_empty() {
            self.running += 1;
            true
        } else {
            false
        }
    }

    /// Hand out the next placeholder id.
    pub fn allocate_placeholder(&mut self) -> i64 {
        let id = self.next_placeholder;
        self.next_placeholder -= 1;
        id
    }

    /// Queue `command` behind every job already waiting.
    pub fn enqueue(
        &mut self,
        store: &mut ResultStore,
        command: CommandSpec,
    ) -> (i64, oneshot::Receiver<Admission>) {
        let id = self.allocate_placeholder();
        store.insert(JobResult::queued(command, id));

        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter { id, tx });
        tracing::debug!(job_id = id, waiting = self.waiters.len(), "Job queued");
        (id, rx)
    }

    /// Give a slot back and pass it on to queued jobs.
    pub fn release(&mut self, store: &mut ResultStore) {
        debug_assert!(self.running > 0, "released a slot that was never taken");
        self.running = self.running.saturating_sub(1);
        self.admit_waiting(store);
    }

    /// Admit queued jobs, oldest first, while slots are free.
    fn admit_waiting(&mut self, store: &mut ResultStore) {
        while self.running < self.max_concurrent {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            // Entries removed by cancellation are skipped
            let Some(job) = store.remove(waiter.id) else {
                continue;
            };

            self.running += 1;
            if waiter.tx.send(Admission::Admitted(job)).is_err() {
                // Submitter went away before its turn came
                self.running -= 1;
                tracing::debug!(job_id = waiter.id, "Dropping abandoned queued job");
                continue;
            }
            tracing::debug!(job_id = waiter.id, running = self.running, "Job admitted");
        }
    }

    /// Resolve the waiter for `id` as cancelled. Returns false if no such
    /// waiter exists.
    pub fn cancel(&mut self, id: i64) -> bool {
        let Some(pos) = self.waiters.iter().position(|w| w.id == id) else {
            return false;
        };
        if let Some(waiter) = self.waiters.remove(pos) {
            let _ = waiter.tx.send(Admission::Cancelled);
        }
        true
    }

    /// Cancel every waiter, removing their placeholder entries. Returns the
    /// ids that were cancelled.
    pub fn cancel_all(&mut self, store: &mut ResultStore) -> Vec<i64> {
        self.waiters
            .drain(..)
            .map(|waiter| {
                store.remove(waiter.id);
                let _ = waiter.tx.send(Admission::Cancelled);
                waiter.id
            })
            .collect()
    }
}
