use std::collections::{BTreeMap, HashMap};

use crate::config::RetentionPolicy;
use crate::scheduler::job::JobResult;

#[derive(Debug)]
struct Entry {
    seq: u64,
    job: JobResult,
}

/// Job records keyed by id, remembering insertion order.
///
/// Replacing the record stored under an existing id keeps its original
/// position, so a running job that finishes does not jump ahead of jobs
/// started after it.
#[derive(Debug, Default)]
pub struct ResultStore {
    entries: HashMap<i64, Entry>,
    order: BTreeMap<u64, i64>,
    next_seq: u64,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record under `job.id`.
    pub fn insert(&mut self, job: JobResult) {
        let id = job.id;
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.job = job;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, id);
        self.entries.insert(id, Entry { seq, job });
    }

    pub fn remove(&mut self, id: i64) -> Option<JobResult> {
        let entry = self.entries.remove(&id)?;
        self.order.remove(&entry.seq);
        Some(entry.job)
    }

    pub fn get(&self, id: i64) -> Option<&JobResult> {
        self.entries.get(&id).map(|e| &e.job)
    }

    pub fn get_mut(&mut self, id: i64) -> Option<&mut JobResult> {
        self.entries.get_mut(&id).map(|e| &mut e.job)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &JobResult> + '_ {
        self.order.values().filter_map(|id| self.get(*id))
    }

    /// Queued ids, ascending. Placeholders are handed out in decreasing
    /// order, so the most recently queued job comes first.
    pub fn pending_view(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .entries
            .values()
            .filter(|e| e.job.is_queued())
            .map(|e| e.job.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Every non-queued id, most recently inserted first.
    pub fn active_view(&self) -> Vec<i64> {
        self.iter()
            .rev()
            .filter(|job| !job.is_queued())
            .map(|job| job.id)
            .collect()
    }

    /// Display order: pending jobs, then running and finished ones.
    pub fn combined_view(&self) -> Vec<i64> {
        let mut ids = self.pending_view();
        ids.extend(self.active_view());
        ids
    }

    /// Drop the oldest terminal records beyond the policy cap. Returns the
    /// number of records evicted.
    pub fn enforce_retention(&mut self, policy: &RetentionPolicy) -> usize {
        let Some(max_finished) = policy.max_finished else {
            return 0;
        };
        let finished: Vec<i64> = self
            .iter()
            .filter(|job| job.is_finished())
            .map(|job| job.id)
            .collect();
        let excess = finished.len().saturating_sub(max_finished);
        for id in &finished[..excess] {
            self.remove(*id);
        }
        excess
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::CommandSpec;

    fn queued(id: i64) -> JobResult {
        JobResult::queued(CommandSpec::new(["true"]), id)
    }

    fn running(pid: i64) -> JobResult {
        let mut job = JobResult::new(CommandSpec::new(["true"]));
        job.mark_started(pid);
        job
    }

    fn finished(pid: i64) -> JobResult {
        let mut job = running(pid);
        job.mark_exited(String::new(), String::new(), 0);
        job
    }

    #[test]
    fn insert_get_remove() {
        let mut store = ResultStore::new();
        store.insert(queued(-1));
        store.insert(running(100));

        assert_eq!(store.len(), 2);
        assert!(store.contains(-1));
        assert_eq!(store.get(100).unwrap().id, 100);

        let removed = store.remove(-1).unwrap();
        assert_eq!(removed.id, -1);
        assert!(!store.contains(-1));
        assert!(store.remove(-1).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replacing_keeps_position() {
        let mut store = ResultStore::new();
        store.insert(running(10));
        store.insert(running(20));
        store.insert(finished(10));

        let ids: Vec<i64> = store.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![10, 20]);
        assert!(store.get(10).unwrap().is_finished());
    }

    #[test]
    fn pending_view_sorted_ascending() {
        let mut store = ResultStore::new();
        store.insert(queued(-1));
        store.insert(queued(-2));
        store.insert(running(5));
        store.insert(queued(-3));

        assert_eq!(store.pending_view(), vec![-3, -2, -1]);
    }

    #[test]
    fn active_view_most_recent_first() {
        let mut store = ResultStore::new();
        store.insert(running(30));
        store.insert(queued(-1));
        store.insert(running(10));
        store.insert(finished(20));

        assert_eq!(store.active_view(), vec![20, 10, 30]);
    }

    #[test]
    fn combined_view_pending_then_active() {
        let mut store = ResultStore::new();
        store.insert(running(7));
        store.insert(queued(-1));
        store.insert(queued(-2));
        store.insert(running(3));

        assert_eq!(store.combined_view(), vec![-2, -1, 3, 7]);
    }

    #[test]
    fn failed_spawn_with_negative_id_is_active() {
        let mut store = ResultStore::new();
        let mut failed = JobResult::new(CommandSpec::new(["/missing"]));
        failed.id = -4;
        failed.mark_failed(crate::scheduler::job::SPAWN_FAILED, "nope".to_string());
        store.insert(queued(-1));
        store.insert(failed);

        assert_eq!(store.pending_view(), vec![-1]);
        assert_eq!(store.active_view(), vec![-4]);
    }

    #[test]
    fn retention_evicts_oldest_finished() {
        let mut store = ResultStore::new();
        store.insert(finished(1));
        store.insert(running(2));
        store.insert(finished(3));
        store.insert(queued(-1));
        store.insert(finished(4));

        let evicted = store.enforce_retention(&RetentionPolicy {
            max_finished: Some(2),
        });

        assert_eq!(evicted, 1);
        assert!(!store.contains(1));
        assert!(store.contains(2));
        assert!(store.contains(3));
        assert!(store.contains(4));
        assert!(store.contains(-1));
    }

    #[test]
    fn unbounded_retention_keeps_everything() {
        let mut store = ResultStore::new();
        for pid in 0..10 {
            store.insert(finished(pid));
        }
        assert_eq!(store.enforce_retention(&RetentionPolicy::unbounded()), 0);
        assert_eq!(store.len(), 10);
    }
}
