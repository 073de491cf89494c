use cmdqueue::scheduler::{Admission, CommandSpec, JobResult, JobState, ResultStore, Scheduler};

fn cmd(n: usize) -> CommandSpec {
    CommandSpec::new(["echo".to_string(), n.to_string()])
}

/// Pretend the admitted job ran: give it a pid in the store.
fn start(store: &mut ResultStore, mut job: JobResult, pid: i64) {
    job.id = pid;
    job.started_at = Some(chrono::Utc::now());
    store.insert(job);
}

#[test]
fn test_fifo_admission_over_many_releases() {
    let mut store = ResultStore::new();
    let mut sched = Scheduler::new(2);
    assert!(sched.try_admit());
    assert!(sched.try_admit());

    let mut receivers: Vec<_> = (0..6).map(|n| sched.enqueue(&mut store, cmd(n))).collect();
    let ids: Vec<i64> = receivers.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![-1, -2, -3, -4, -5, -6]);

    let mut admitted = Vec::new();
    for _ in 0..6 {
        sched.release(&mut store);
        for (id, rx) in receivers.iter_mut() {
            if let Ok(Admission::Admitted(job)) = rx.try_recv() {
                assert_eq!(job.id, *id);
                admitted.push(*id);
            }
        }
    }

    // Oldest placeholder (closest to zero) always goes first
    assert_eq!(admitted, vec![-1, -2, -3, -4, -5, -6]);
    assert_eq!(sched.waiting(), 0);
    assert!(store.is_empty());
}

#[test]
fn test_running_never_exceeds_budget() {
    let mut store = ResultStore::new();
    let mut sched = Scheduler::new(3);

    let mut receivers = Vec::new();
    for n in 0..10 {
        if !sched.try_admit() {
            receivers.push(sched.enqueue(&mut store, cmd(n)));
        }
        assert!(sched.running() <= 3);
    }
    assert_eq!(sched.running(), 3);
    assert_eq!(sched.waiting(), 7);

    for _ in 0..10 {
        sched.release(&mut store);
        assert!(sched.running() <= 3);
    }
    assert_eq!(sched.running(), 0);
}

#[test]
fn test_cancelled_placeholder_is_never_admitted() {
    let mut store = ResultStore::new();
    let mut sched = Scheduler::new(1);
    assert!(sched.try_admit());

    let (c, mut rx_c) = sched.enqueue(&mut store, cmd(1));
    let (d, mut rx_d) = sched.enqueue(&mut store, cmd(2));

    // terminate(c): entry removed, waiter resolved
    assert!(store.remove(c).is_some());
    assert!(sched.cancel(c));
    assert!(matches!(rx_c.try_recv(), Ok(Admission::Cancelled)));

    sched.release(&mut store);
    match rx_d.try_recv() {
        Ok(Admission::Admitted(job)) => assert_eq!(job.id, d),
        other => panic!("expected {} to be admitted, got {:?}", d, other),
    }
}

#[test]
fn test_views_follow_job_lifecycle() {
    let mut store = ResultStore::new();
    let mut sched = Scheduler::new(1);

    assert!(sched.try_admit());
    start(&mut store, JobResult::new(cmd(0)), 100);
    let (_c, mut rx_c) = sched.enqueue(&mut store, cmd(1));
    let (_d, _rx_d) = sched.enqueue(&mut store, cmd(2));

    assert_eq!(store.pending_view(), vec![-2, -1]);
    assert_eq!(store.active_view(), vec![100]);
    assert_eq!(store.combined_view(), vec![-2, -1, 100]);

    // First job exits, slot goes to -1 which starts as pid 200
    let first = store.get_mut(100).unwrap();
    first.stdout = "0\n".to_string();
    first.exit_code = 0;
    sched.release(&mut store);
    let Ok(Admission::Admitted(job)) = rx_c.try_recv() else {
        panic!("-1 should have been admitted");
    };
    start(&mut store, job, 200);

    assert_eq!(store.pending_view(), vec![-2]);
    assert_eq!(store.active_view(), vec![200, 100]);
    assert_eq!(store.get(200).unwrap().queued_id, Some(-1));
    assert_eq!(store.get(200).unwrap().state(), JobState::Running);
    assert_eq!(store.get(100).unwrap().state(), JobState::Finished);
}
