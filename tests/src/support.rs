//! Shared fixtures for the integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clotho::prelude::*;
use clotho::{ExecutorBuilder, TaskId};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builder preconfigured with a test name and small pool.
pub fn builder(name: &str, core: usize, max: usize) -> ExecutorBuilder {
    init_tracing();
    ManagedExecutor::builder()
        .name(name)
        .core_pool_size(core)
        .max_pool_size(max)
}

/// One recorded listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Submitted,
    Starting,
    Done(Option<String>),
    Aborted(String),
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Aborted(_))
    }
}

/// Listener that records every callback per task.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<HashMap<TaskId, Vec<Event>>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self, id: TaskId) -> Vec<Event> {
        self.events.lock().get(&id).cloned().unwrap_or_default()
    }

    pub fn all(&self) -> HashMap<TaskId, Vec<Event>> {
        self.events.lock().clone()
    }

    fn record(&self, task: &dyn TaskView, event: Event) {
        self.events.lock().entry(task.id()).or_default().push(event);
    }
}

impl TaskListener for RecordingListener {
    fn task_submitted(&self, task: &dyn TaskView, _executor: &ManagedExecutorAdapter) {
        self.record(task, Event::Submitted);
    }

    fn task_starting(&self, task: &dyn TaskView, _executor: &ManagedExecutorAdapter) {
        self.record(task, Event::Starting);
    }

    fn task_done(&self, task: &dyn TaskView, _executor: &ManagedExecutorAdapter, failure: Option<&TaskError>) {
        self.record(task, Event::Done(failure.map(ToString::to_string)));
    }

    fn task_aborted(&self, task: &dyn TaskView, _executor: &ManagedExecutorAdapter, failure: &TaskError) {
        self.record(task, Event::Aborted(failure.to_string()));
    }
}

/// Whether `events` is a prefix of one of the allowed lifecycle sequences.
pub fn is_valid_prefix(events: &[Event]) -> bool {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    if terminals > 1 {
        return false;
    }
    match events {
        [] | [Event::Submitted] | [Event::Submitted, Event::Starting] => true,
        [Event::Submitted, Event::Done(_)] | [Event::Submitted, Event::Aborted(_)] => true,
        [Event::Submitted, Event::Starting, last] => last.is_terminal(),
        _ => false,
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Shut down and wait for every worker to exit.
pub fn finish(executor: &ManagedExecutor) {
    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(10)), "executor did not terminate");
}
