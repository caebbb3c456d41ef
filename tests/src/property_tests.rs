//! Property-based tests over submission, counters and listener ordering.

use std::thread;
use std::time::Duration;

use clotho::prelude::*;
use clotho::QueueKind;
use proptest::prelude::*;
use quickcheck::{QuickCheck, TestResult};

use crate::support::{builder, finish, is_valid_prefix, RecordingListener};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every submitted value comes back unchanged from its own future.
    #[test]
    fn prop_values_survive_the_pool(values in prop::collection::vec(any::<i64>(), 1..40), workers in 1usize..4) {
        let executor = builder("prop-values", workers, workers).build().unwrap();
        let tasks: Vec<_> = values
            .iter()
            .map(|&value| executor.submit(move || Ok(value)).unwrap())
            .collect();

        for (task, &expected) in tasks.iter().zip(&values) {
            prop_assert_eq!(task.get().unwrap(), expected);
        }
        finish(&executor);
    }

    /// `task_count` grows by exactly the number of admitted tasks and
    /// `completed_task_count` catches up once the pool has drained.
    #[test]
    fn prop_counters_track_admissions(batches in prop::collection::vec(1usize..20, 1..5)) {
        let executor = builder("prop-counters", 2, 2).build().unwrap();
        let mut expected = 0_u64;
        let mut previous = 0_u64;

        for batch in batches {
            for _ in 0..batch {
                executor.execute(|| {}).unwrap();
            }
            expected += batch as u64;
            let observed = executor.task_count();
            prop_assert_eq!(observed, expected);
            prop_assert!(observed >= previous);
            previous = observed;
        }

        finish(&executor);
        prop_assert_eq!(executor.completed_task_count(), expected);
        prop_assert!(executor.completed_task_count() <= executor.task_count());
    }

    /// The queue discipline depends only on the raw capacity and core size.
    #[test]
    fn prop_queue_selection(raw in prop_oneof![Just(0_i64), 1_i64..64, Just(i64::from(i32::MAX)), Just(i64::MAX)], core in 0usize..3) {
        let executor = builder("prop-queue", core, 3).queue_capacity(raw).build().unwrap();
        let expected = match raw {
            0 => QueueKind::DirectHandoff,
            r if r >= i64::from(i32::MAX) && core == 0 => QueueKind::DirectHandoff,
            r if r >= i64::from(i32::MAX) => QueueKind::Unbounded,
            r => QueueKind::Bounded(usize::try_from(r).unwrap()),
        };
        prop_assert_eq!(executor.pool().queue_kind(), expected);
        finish(&executor);
    }
}

/// For any mix of cancellations and failures, each task's listener sees an
/// allowed lifecycle sequence ending in exactly one terminal callback.
fn listener_sequences_are_well_formed(plan: Vec<(bool, bool)>) -> TestResult {
    if plan.is_empty() {
        return TestResult::discard();
    }
    let plan: Vec<_> = plan.into_iter().take(16).collect();

    let executor = match builder("qc-listener", 1, 1).build() {
        Ok(executor) => executor,
        Err(_) => return TestResult::failed(),
    };
    let listener = RecordingListener::new();

    let mut ids = Vec::new();
    for &(cancel, fail) in &plan {
        let submitted = executor.submit_with_listener(
            move || -> Result<(), BoxError> {
                thread::sleep(Duration::from_millis(1));
                if fail {
                    Err("planned failure".into())
                } else {
                    Ok(())
                }
            },
            listener.clone(),
        );
        let Ok(task) = submitted else {
            return TestResult::failed();
        };
        if cancel {
            task.cancel(false);
        }
        ids.push(task.id());
    }
    finish(&executor);

    let ok = ids.iter().all(|&id| {
        let events = listener.events(id);
        is_valid_prefix(&events) && events.iter().filter(|e| e.is_terminal()).count() == 1
    });
    TestResult::from_bool(ok)
}

#[test]
fn qc_listener_sequences_are_well_formed() {
    QuickCheck::new()
        .tests(20)
        .quickcheck(listener_sequences_are_well_formed as fn(Vec<(bool, bool)>) -> TestResult);
}
