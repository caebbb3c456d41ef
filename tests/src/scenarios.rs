//! End-to-end scenarios across pool shapes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use clotho::interrupt;
use clotho::prelude::*;
use rand::seq::SliceRandom;

use crate::support::{builder, finish, Event, RecordingListener};

#[derive(Debug)]
struct LedgerError(&'static str);

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ledger error: {}", self.0)
    }
}

impl std::error::Error for LedgerError {}

#[test]
fn test_direct_handoff_blocks_second_submission() {
    let executor = builder("handoff", 0, 1).queue_capacity(0).build().unwrap();
    assert_eq!(executor.pool().queue_kind(), clotho::QueueKind::DirectHandoff);

    let first = executor
        .submit(|| {
            thread::sleep(Duration::from_millis(100));
            Ok(1)
        })
        .unwrap();

    let start = Instant::now();
    let second = executor.submit(|| Ok(2)).unwrap();
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(50), "second submission returned after {waited:?}");

    assert_eq!(first.get().unwrap(), 1);
    assert_eq!(second.get().unwrap(), 2);
    finish(&executor);
    assert_eq!(executor.task_count(), 2);
    assert_eq!(executor.completed_task_count(), 2);
    assert_eq!(executor.pool().largest_pool_size(), 1);
}

#[test]
fn test_thousand_results_through_completion_service() {
    let executor = builder("thousand", 2, 2).build().unwrap();
    let service = executor.completion_service::<u32>();
    for i in 0..1000 {
        service.submit(move || Ok(i)).unwrap();
    }

    let mut seen = HashSet::new();
    for _ in 0..1000 {
        let value = service.take().unwrap().get().unwrap();
        assert!(seen.insert(value), "value {value} delivered twice");
    }
    assert_eq!(seen, (0..1000).collect::<HashSet<_>>());
    assert!(service.poll().is_none());

    finish(&executor);
    assert_eq!(executor.task_count(), 1000);
    assert_eq!(executor.completed_task_count(), 1000);
}

#[test]
fn test_bounded_queue_rejects_third_task() {
    let executor = builder("bounded", 1, 1).queue_capacity(1).build().unwrap();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    let first = executor
        .submit(move || {
            gate_rx.recv()?;
            Ok("first")
        })
        .unwrap();
    let second = executor.submit(|| Ok("second")).unwrap();
    let third = executor.submit(|| Ok("third"));
    assert!(matches!(third, Err(ExecutorError::Rejected(_))));
    assert_eq!(executor.task_count(), 2);

    gate_tx.send(()).unwrap();
    assert_eq!(first.get().unwrap(), "first");
    assert_eq!(second.get().unwrap(), "second");
    finish(&executor);
    assert_eq!(executor.completed_task_count(), 2);
}

#[test]
fn test_failure_reaches_future_and_listener() {
    let executor = builder("failing", 1, 1).build().unwrap();
    let listener = RecordingListener::new();
    let before = executor.completed_task_count();

    let task = executor
        .submit_with_listener(|| -> Result<u32, BoxError> { Err(Box::new(LedgerError("unbalanced"))) }, listener.clone())
        .unwrap();

    match task.get() {
        Err(TaskError::TaskFailed(cause)) => {
            assert_eq!(cause.downcast_ref::<LedgerError>().unwrap().0, "unbalanced");
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
    assert_eq!(task.state(), TaskState::Failed);
    assert_eq!(
        listener.events(task.id()),
        vec![
            Event::Submitted,
            Event::Starting,
            Event::Done(Some("Task failed: ledger error: unbalanced".into()))
        ]
    );

    finish(&executor);
    assert_eq!(executor.completed_task_count(), before + 1);
}

#[test]
fn test_shutdown_now_stops_long_task() {
    let executor = builder("abrupt", 1, 1).build().unwrap();
    let (started_tx, started_rx) = mpsc::channel();

    let long = executor
        .submit(move || -> Result<(), BoxError> {
            started_tx.send(())?;
            loop {
                interrupt::sleep(Duration::from_secs(10))?;
            }
        })
        .unwrap();
    started_rx.recv().unwrap();
    let queued: Vec<_> = (0..3).map(|i| executor.submit(move || Ok(i)).unwrap()).collect();

    let drained = executor.shutdown_now();
    assert_eq!(drained.len(), 3);
    assert!(drained.iter().all(|t| t.state() == TaskState::CancelledBeforeStart));
    assert_eq!(executor.pool().queue_len(), 0);
    assert!(executor.await_termination(Duration::from_secs(10)));

    match long.get() {
        Err(TaskError::Cancelled) => {}
        Err(TaskError::TaskFailed(cause)) => assert!(cause.downcast_ref::<clotho::Interrupted>().is_some()),
        other => panic!("expected cancellation or interruption, got {other:?}"),
    }
    for task in queued {
        assert!(matches!(task.get(), Err(TaskError::Cancelled)));
    }
}

#[test]
fn test_completion_order_follows_finish_time() {
    let mut delays: Vec<u64> = (0..=10).map(|i| i * 5).collect();
    delays.shuffle(&mut rand::thread_rng());

    let executor = builder("ordering", delays.len(), delays.len()).build().unwrap();
    let service = executor.completion_service::<u64>();
    for &delay in &delays {
        service
            .submit(move || {
                thread::sleep(Duration::from_millis(delay));
                Ok(delay)
            })
            .unwrap();
    }

    let mut previous: Option<Instant> = None;
    let mut order = Vec::new();
    for _ in 0..delays.len() {
        let task = service.take().unwrap();
        let ended = task.timings().ended_at.unwrap();
        if let Some(previous) = previous {
            assert!(ended >= previous, "completion queue out of finishing order");
        }
        previous = Some(ended);
        order.push(task.get().unwrap());
    }
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(order, sorted);
    finish(&executor);
}

#[test]
fn test_counters_stay_ordered_while_submitting() {
    let executor = builder("counter-sampling", 4, 4).build().unwrap();
    let stop = AtomicBool::new(false);

    let violations = thread::scope(|scope| {
        let sampler = scope.spawn(|| {
            let mut violations = 0_u64;
            while !stop.load(Ordering::SeqCst) {
                let completed = executor.completed_task_count();
                let accepted = executor.task_count();
                if completed > accepted {
                    violations += 1;
                }
            }
            violations
        });
        for _ in 0..50_000 {
            executor.execute(|| {}).unwrap();
        }
        finish(&executor);
        stop.store(true, Ordering::SeqCst);
        sampler.join().unwrap()
    });

    assert_eq!(violations, 0, "completed count overtook the accepted count");
    assert_eq!(executor.task_count(), 50_000);
    assert_eq!(executor.completed_task_count(), 50_000);
}
