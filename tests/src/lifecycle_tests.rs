//! Task lifecycle, context propagation, hang detection and admission policies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use clotho::context::{local, RestorationToken};
use clotho::prelude::*;
use clotho::{
    interrupt, Admission, AdmissionAttempt, ContextHandle, ContextProvider, ContextService, LocalContextProvider,
    RejectionHandler,
};
use parking_lot::Mutex;

use crate::support::{builder, eventually, finish, Event, RecordingListener};

#[test]
fn test_adapter_refuses_lifecycle_but_submits() {
    struct FollowUp {
        sender: Mutex<mpsc::Sender<ExecutorError>>,
        follow_ups: Mutex<Vec<ManagedTask<&'static str>>>,
    }

    impl TaskListener for FollowUp {
        fn task_done(&self, _task: &dyn TaskView, executor: &ManagedExecutorAdapter, _failure: Option<&TaskError>) {
            if let Err(err) = executor.shutdown() {
                let _ = self.sender.lock().send(err);
            }
            if let Ok(task) = executor.submit(|| Ok("follow-up")) {
                self.follow_ups.lock().push(task);
            }
        }
    }

    let executor = builder("adapter", 2, 2).build().unwrap();
    let (tx, rx) = mpsc::channel();
    let listener = Arc::new(FollowUp {
        sender: Mutex::new(tx),
        follow_ups: Mutex::new(Vec::new()),
    });

    let task = executor.submit_with_listener(|| Ok(()), listener.clone()).unwrap();
    task.get().unwrap();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ExecutorError::NotPermitted("shutdown")
    );
    assert!(!executor.is_shutdown());

    let follow_up = listener.follow_ups.lock().pop().unwrap();
    assert_eq!(follow_up.get().unwrap(), "follow-up");
    finish(&executor);
}

#[test]
fn test_context_travels_with_task() {
    let executor = builder("context", 1, 1)
        .context_service(ContextService::new("local", LocalContextProvider))
        .build()
        .unwrap();

    local::set("tenant", "acme");
    let acme = executor.submit(|| Ok(local::get("tenant"))).unwrap();
    local::set("tenant", "globex");
    let globex = executor.submit(|| Ok(local::get("tenant"))).unwrap();
    local::remove("tenant");

    assert_eq!(acme.get().unwrap().as_deref(), Some("acme"));
    assert_eq!(globex.get().unwrap().as_deref(), Some("globex"));
    assert_eq!(local::get("tenant"), None);

    // a submitter without a tenant does not see a previous task's value
    let anonymous = executor.submit(|| Ok(local::get("tenant"))).unwrap();
    assert_eq!(anonymous.get().unwrap(), None);

    finish(&executor);
}

struct BrokenProvider;

impl ContextProvider for BrokenProvider {
    fn capture(&self) -> ContextHandle {
        ContextHandle::new(())
    }

    fn apply(&self, _handle: &ContextHandle) -> Result<RestorationToken, BoxError> {
        Err("security context unavailable".into())
    }

    fn restore(&self, _token: RestorationToken) {}
}

#[test]
fn test_context_failure_aborts_task() {
    let executor = builder("broken-context", 1, 1)
        .context_service(ContextService::new("broken", BrokenProvider))
        .build()
        .unwrap();
    let listener = RecordingListener::new();
    let service = executor.completion_service::<u32>();
    let ran = Arc::new(AtomicUsize::new(0));

    let task = {
        let ran = ran.clone();
        service
            .submit_with_listener(
                move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                },
                listener.clone(),
            )
            .unwrap()
    };

    assert!(matches!(task.get(), Err(TaskError::Aborted(_))));
    assert_eq!(task.state(), TaskState::Aborted);
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    let events = listener.events(task.id());
    assert_eq!(events.len(), 3);
    assert_eq!(events[..2], [Event::Submitted, Event::Starting]);
    assert!(matches!(events[2], Event::Aborted(_)));

    // the completion callback still fires for an admitted task
    let delivered = service.poll_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(delivered.id(), task.id());
    finish(&executor);
}

#[test]
fn test_cancel_running_task_with_interrupt() {
    let executor = builder("cancel", 1, 1).build().unwrap();
    let listener = RecordingListener::new();
    let (started_tx, started_rx) = mpsc::channel();

    let task = executor
        .submit_with_listener(
            move || -> Result<u32, BoxError> {
                started_tx.send(())?;
                loop {
                    interrupt::check_interrupted()?;
                    thread::sleep(Duration::from_millis(1));
                }
            },
            listener.clone(),
        )
        .unwrap();
    started_rx.recv().unwrap();

    assert!(task.cancel(true));
    assert!(task.is_cancelled());
    assert!(matches!(task.get(), Err(TaskError::Cancelled)));
    assert_eq!(task.state(), TaskState::Cancelled);
    assert!(!task.cancel(true));
    assert_eq!(
        listener.events(task.id()),
        vec![Event::Submitted, Event::Starting, Event::Done(Some("Task was cancelled".into()))]
    );

    // the worker's flag is cleared before its next task
    let next = executor.submit(|| Ok(interrupt::is_interrupted())).unwrap();
    assert!(!next.get().unwrap());
    finish(&executor);
}

#[test]
fn test_cancel_queued_task() {
    let executor = builder("cancel-queued", 1, 1).build().unwrap();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let blocker = executor
        .submit(move || {
            gate_rx.recv()?;
            Ok(())
        })
        .unwrap();
    let listener = RecordingListener::new();
    let queued = executor.submit_runnable_with_listener(|| {}, 9_u8, listener.clone()).unwrap();

    assert!(queued.cancel(false));
    assert_eq!(queued.state(), TaskState::CancelledBeforeStart);
    assert!(queued.is_done());
    assert_eq!(
        listener.events(queued.id()),
        vec![Event::Submitted, Event::Done(Some("Task was cancelled".into()))]
    );

    gate_tx.send(()).unwrap();
    blocker.get().unwrap();
    finish(&executor);
    assert_eq!(queued.state(), TaskState::CancelledBeforeStart);
}

#[test]
fn test_cancelled_task_frees_bounded_queue_slot() {
    let executor = builder("cancel-frees-slot", 1, 1).queue_capacity(1).build().unwrap();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let blocker = executor
        .submit(move || {
            gate_rx.recv()?;
            Ok(())
        })
        .unwrap();
    let queued = executor.submit(|| Ok("queued")).unwrap();
    assert_eq!(executor.pool().queue_len(), 1);

    assert!(queued.cancel(false));
    assert_eq!(executor.pool().queue_len(), 0);
    let replacement = executor.submit(|| Ok("replacement")).unwrap();

    gate_tx.send(()).unwrap();
    blocker.get().unwrap();
    assert_eq!(replacement.get().unwrap(), "replacement");
    assert!(matches!(queued.get(), Err(TaskError::Cancelled)));
    finish(&executor);
    assert_eq!(executor.completed_task_count(), 2);
}

#[test]
fn test_panicking_listener_is_contained() {
    struct Grumpy;

    impl TaskListener for Grumpy {
        fn task_starting(&self, _task: &dyn TaskView, _executor: &ManagedExecutorAdapter) {
            panic!("listener exploded");
        }
    }

    let executor = builder("grumpy", 1, 1).build().unwrap();
    let task = executor.submit_with_listener(|| Ok(5), Arc::new(Grumpy)).unwrap();
    assert_eq!(task.get().unwrap(), 5);
    assert_eq!(task.state(), TaskState::Succeeded);
    finish(&executor);
}

#[test]
fn test_hung_tasks_are_reported_not_killed() {
    let executor = builder("hung", 1, 1)
        .hung_task_threshold(Duration::from_millis(20))
        .build()
        .unwrap();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let task = executor
        .submit(move || {
            gate_rx.recv()?;
            Ok("finished")
        })
        .unwrap();

    assert!(eventually(Duration::from_secs(5), || executor.hung_task_ids() == vec![task.id()]));
    assert!(task.is_hung());
    assert!(!task.is_done());

    gate_tx.send(()).unwrap();
    assert_eq!(task.get().unwrap(), "finished");
    finish(&executor);
    assert!(executor.hung_task_ids().is_empty());
}

#[test]
fn test_long_running_executor_suppresses_hang_detection() {
    let executor = builder("long-running", 1, 1)
        .hung_task_threshold(Duration::from_millis(1))
        .long_running_tasks(true)
        .build()
        .unwrap();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let task = executor
        .submit(move || {
            gate_rx.recv()?;
            Ok(())
        })
        .unwrap();
    thread::sleep(Duration::from_millis(30));
    assert!(executor.hung_task_ids().is_empty());
    assert!(!task.is_hung());
    gate_tx.send(()).unwrap();
    task.get().unwrap();
    finish(&executor);
}

#[test]
fn test_thread_lifetime_cap_rotates_workers() {
    let executor = builder("rotating", 1, 1)
        .thread_lifetime(Duration::from_millis(1))
        .build()
        .unwrap();
    let mut names = Vec::new();
    for _ in 0..4 {
        let task = executor
            .submit(|| {
                thread::sleep(Duration::from_millis(3));
                Ok(thread::current().name().map(str::to_string))
            })
            .unwrap();
        names.push(task.get().unwrap().unwrap());
    }
    assert!(names.iter().all(|n| n.starts_with("rotating-worker-")));
    for pair in names.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
    finish(&executor);
    assert_eq!(executor.completed_task_count(), 4);
}

#[test]
fn test_retry_abort_admits_once_room_frees_up() {
    let executor = builder("retry", 1, 1)
        .queue_capacity(1)
        .reject_policy(RejectPolicy::RetryAbort {
            attempts: 200,
            interval: Duration::from_millis(5),
        })
        .build()
        .unwrap();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let first = executor
        .submit(move || {
            gate_rx.recv()?;
            Ok(1)
        })
        .unwrap();
    let second = executor.submit(|| Ok(2)).unwrap();

    let opener = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        gate_tx.send(()).unwrap();
    });
    let third = executor.submit(|| Ok(3)).unwrap();
    opener.join().unwrap();

    assert_eq!(first.get().unwrap() + second.get().unwrap() + third.get().unwrap(), 6);
    finish(&executor);
    assert_eq!(executor.task_count(), 3);
}

#[test]
fn test_custom_rejection_handler() {
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl RejectionHandler for Counting {
        fn on_reject(&self, attempt: &mut dyn AdmissionAttempt) -> Admission {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Admission::Rejected(format!("{} is saturated", attempt.pool_name()))
        }
    }

    let handler = Arc::new(Counting::default());
    let executor = builder("custom", 1, 1)
        .queue_capacity(1)
        .reject_policy(RejectPolicy::Custom(handler.clone()))
        .build()
        .unwrap();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    executor
        .execute(move || {
            let _ = gate_rx.recv();
        })
        .unwrap();
    executor.execute(|| {}).unwrap();

    let listener = RecordingListener::new();
    let refused = executor.submit_with_listener(|| Ok(()), listener.clone());
    assert_eq!(refused.unwrap_err(), ExecutorError::Rejected("custom is saturated".into()));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    let all = listener.all();
    assert_eq!(all.len(), 1);
    let events = all.values().next().unwrap();
    assert_eq!(events[0], Event::Submitted);
    assert!(matches!(events[1], Event::Aborted(_)));

    gate_tx.send(()).unwrap();
    finish(&executor);
}

#[test]
fn test_invalid_configuration_is_rejected() {
    assert!(matches!(
        builder("bad", 0, 0).build(),
        Err(ExecutorError::InvalidArgument(_))
    ));
    assert!(matches!(
        builder("bad", 4, 2).build(),
        Err(ExecutorError::InvalidArgument(_))
    ));
    assert!(matches!(
        builder("bad", 1, 1).queue_capacity(-1).build(),
        Err(ExecutorError::InvalidArgument(_))
    ));
}

#[test]
fn test_get_on_worker_observes_interrupt() {
    let executor = builder("nested", 2, 2).build().unwrap();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let blocked = executor
        .submit(move || {
            gate_rx.recv()?;
            Ok(0_u32)
        })
        .unwrap();

    let waiter = {
        let blocked = blocked.clone();
        executor
            .submit(move || match blocked.get() {
                Err(TaskError::Interrupted) => Ok(true),
                _ => Ok(false),
            })
            .unwrap()
    };
    thread::sleep(Duration::from_millis(30));
    assert!(waiter.cancel(true));
    assert!(matches!(waiter.get(), Err(TaskError::Cancelled)));

    gate_tx.send(()).unwrap();
    assert_eq!(blocked.get().unwrap(), 0);
    finish(&executor);
}
