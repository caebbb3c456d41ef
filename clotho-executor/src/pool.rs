//! The managed thread pool.
//!
//! Workers are created on demand up to the core size, then work is queued, then
//! extra workers are created up to the maximum. Workers above the core size
//! exit after `keep_alive` of idleness; any worker older than the lifetime cap
//! retires after its current task and is replaced if the pool needs it.
//!
//! The worker set and the shutdown phase share one mutation lock. Counters are
//! atomics and may be read stale.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clotho_core::{Admission, AdmissionAttempt, ExecutorConfig, ExecutorError, ExecutorResult, QueueKind, RejectPolicy, RejectionHandler, TaskId};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::queue::WorkQueue;
use crate::task::{Runnable, TaskView};
use crate::thread_factory::{ManagedThread, ManagedThreadFactory};

pub(crate) type Job = Arc<dyn Runnable>;

/// Shutdown phase of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PoolPhase {
    /// Accepting and running work
    Running,
    /// No new work; queued work still runs
    Shutdown,
    /// No new work; queue drained, workers interrupted
    Stop,
    /// All workers have exited
    Terminated,
}

struct WorkerSet {
    workers: HashMap<usize, ManagedThread>,
    phase: PoolPhase,
    largest: usize,
}

struct RunningEntry {
    job: Job,
    hung_threshold: Option<Duration>,
}

struct PoolShared {
    name: String,
    core: usize,
    max: usize,
    keep_alive: Duration,
    lifetime: Option<Duration>,
    handoff_timeout: Duration,
    queue: WorkQueue<Job>,
    factory: ManagedThreadFactory,
    reject_policy: RejectPolicy,
    workers: Mutex<WorkerSet>,
    terminated: Condvar,
    running: Mutex<HashMap<usize, RunningEntry>>,
    task_count: AtomicU64,
    completed: AtomicU64,
}

/// Thread pool executing managed tasks.
pub struct ManagedThreadPool {
    shared: Arc<PoolShared>,
}

impl ManagedThreadPool {
    /// Create a pool from a validated configuration. No threads start until
    /// work arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::InvalidArgument`] when the configuration does
    /// not validate.
    pub fn new(config: &ExecutorConfig) -> ExecutorResult<Self> {
        config.validate()?;
        let shared = Arc::new(PoolShared {
            name: config.name.clone(),
            core: config.core_pool_size,
            max: config.max_pool_size,
            keep_alive: config.keep_alive,
            lifetime: config.lifetime_cap(),
            handoff_timeout: config.handoff_timeout,
            queue: WorkQueue::new(config.queue_kind()),
            factory: ManagedThreadFactory::new(config.name.clone(), config.hung_threshold(), config.thread_stack_size),
            reject_policy: config.reject_policy.clone(),
            workers: Mutex::new(WorkerSet {
                workers: HashMap::new(),
                phase: PoolPhase::Running,
                largest: 0,
            }),
            terminated: Condvar::new(),
            running: Mutex::new(HashMap::new()),
            task_count: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        });
        debug!(
            pool = %shared.name,
            core = shared.core,
            max = shared.max,
            queue = ?shared.queue.kind(),
            "thread pool created"
        );
        Ok(Self { shared })
    }

    /// Admit a task, applying the rejection policy when it cannot be placed.
    ///
    /// The task is counted before any worker can see it and uncounted if it is
    /// refused, so `completed_task_count() <= task_count()` holds for any reader
    /// that loads the completed count first.
    pub(crate) fn execute(&self, job: Job) -> ExecutorResult<()> {
        let id = job.id();
        self.shared.task_count.fetch_add(1, Ordering::SeqCst);
        let result = self.place(job, id);
        if result.is_err() {
            self.shared.task_count.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }

    fn place(&self, job: Job, id: TaskId) -> ExecutorResult<()> {
        let job = match self.shared.admit(job) {
            Ok(()) => {
                debug!(pool = %self.shared.name, task = %id, "task admitted");
                return Ok(());
            }
            Err(job) => job,
        };

        if self.is_shutdown() {
            return Err(ExecutorError::Rejected(format!("{} is shut down", self.shared.name)));
        }

        let mut attempt = PendingAdmission {
            shared: &self.shared,
            id,
            job: Some(job),
        };
        match self.shared.reject_policy.on_reject(&mut attempt) {
            Admission::Admitted if attempt.job.is_none() => {
                debug!(pool = %self.shared.name, task = %id, "task admitted on retry");
                Ok(())
            }
            Admission::Admitted => {
                warn!(pool = %self.shared.name, task = %id, "rejection handler reported admission without retrying");
                Err(ExecutorError::Rejected(format!("{} refused {id}", self.shared.name)))
            }
            Admission::Rejected(reason) => {
                warn!(pool = %self.shared.name, task = %id, %reason, "task rejected");
                Err(ExecutorError::Rejected(reason))
            }
        }
    }

    /// Stop admission; queued and running work completes.
    pub fn shutdown(&self) {
        {
            let mut set = self.shared.workers.lock();
            if set.phase == PoolPhase::Running {
                set.phase = PoolPhase::Shutdown;
                info!(pool = %self.shared.name, "shutdown requested");
            }
        }
        self.shared.queue.close();
        self.shared.try_terminate();
    }

    /// Stop admission, cancel queued work and interrupt every worker.
    ///
    /// Returns the tasks removed from the queue, each now cancelled.
    pub fn shutdown_now(&self) -> Vec<Arc<dyn TaskView>> {
        {
            let mut set = self.shared.workers.lock();
            if set.phase < PoolPhase::Stop {
                set.phase = PoolPhase::Stop;
                info!(pool = %self.shared.name, "immediate shutdown requested");
            }
        }
        self.shared.factory.interrupt_all();
        self.shared.queue.close();
        let drained = self.shared.queue.drain();
        for job in &drained {
            job.cancel(false);
        }
        self.shared.try_terminate();
        drained.into_iter().map(Runnable::into_view).collect()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.workers.lock().phase != PoolPhase::Running
    }

    /// Whether shutdown has begun but workers are still live.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        matches!(self.phase(), PoolPhase::Shutdown | PoolPhase::Stop)
    }

    /// Whether every worker has exited after shutdown.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.phase() == PoolPhase::Terminated
    }

    /// Current shutdown phase.
    #[must_use]
    pub fn phase(&self) -> PoolPhase {
        self.shared.workers.lock().phase
    }

    /// Block until terminated or `timeout` elapses; `true` if terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = self.shared.workers.lock();
        while set.phase != PoolPhase::Terminated {
            if self.shared.terminated.wait_until(&mut set, deadline).timed_out() {
                return set.phase == PoolPhase::Terminated;
            }
        }
        true
    }

    /// Sweep running tasks and return those past their worker's hung threshold.
    ///
    /// A task is logged the first time it is found hung. Hung tasks are never
    /// interrupted.
    pub fn hung_tasks(&self) -> Vec<TaskId> {
        let running = self.shared.running.lock();
        let mut hung = Vec::new();
        for entry in running.values() {
            let Some(threshold) = entry.hung_threshold else {
                continue;
            };
            let Some(started) = entry.job.timings().started_at else {
                continue;
            };
            let elapsed = started.elapsed();
            if elapsed > threshold {
                if entry.job.mark_hung() {
                    warn!(
                        pool = %self.shared.name,
                        task = %entry.job.id(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        threshold_ms = threshold.as_millis() as u64,
                        "task appears hung"
                    );
                }
                hung.push(entry.job.id());
            }
        }
        hung
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Tasks admitted so far, including any currently being placed.
    #[must_use]
    pub fn task_count(&self) -> u64 {
        self.shared.task_count.load(Ordering::SeqCst)
    }

    /// Tasks that finished running on a worker.
    #[must_use]
    pub fn completed_task_count(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Remove a queued task so it stops holding a queue slot. Returns `false`
    /// if a worker already took it.
    pub(crate) fn remove(&self, id: TaskId) -> bool {
        let removed = self.shared.queue.remove_where(|job| job.id() == id).is_some();
        if removed {
            debug!(pool = %self.shared.name, task = %id, "cancelled task removed from queue");
        }
        removed
    }

    /// Live worker threads.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.shared.workers.lock().workers.len()
    }

    /// Workers currently running a task.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.running.lock().len()
    }

    /// Most workers ever live at once.
    #[must_use]
    pub fn largest_pool_size(&self) -> usize {
        self.shared.workers.lock().largest
    }

    /// Tasks waiting in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Queue discipline in use.
    #[must_use]
    pub fn queue_kind(&self) -> QueueKind {
        self.shared.queue.kind()
    }

    /// Snapshot of live worker threads.
    #[must_use]
    pub fn threads(&self) -> Vec<ManagedThread> {
        self.shared.factory.live_threads()
    }
}

impl std::fmt::Debug for ManagedThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedThreadPool")
            .field("name", &self.shared.name)
            .field("phase", &self.phase())
            .field("pool_size", &self.pool_size())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl PoolShared {
    /// Admission steps short of the rejection policy; hands the job back on refusal.
    fn admit(self: &Arc<Self>, job: Job) -> Result<(), Job> {
        let job = {
            let mut set = self.workers.lock();
            if set.phase != PoolPhase::Running {
                return Err(job);
            }
            if set.workers.len() < self.core {
                match self.add_worker(&mut set, Some(job)) {
                    Ok(()) | Err(None) => return Ok(()),
                    // spawn failed; try the queue instead
                    Err(Some(job)) => job,
                }
            } else {
                job
            }
        };

        let job = match self.enqueue(job) {
            Ok(()) => return Ok(()),
            Err(job) => job,
        };

        let job = {
            let mut set = self.workers.lock();
            if set.phase == PoolPhase::Running && set.workers.len() < self.max {
                match self.add_worker(&mut set, Some(job)) {
                    Ok(()) => return Ok(()),
                    Err(Some(job)) => job,
                    Err(None) => return Ok(()),
                }
            } else {
                job
            }
        };

        if self.queue.kind() == QueueKind::DirectHandoff && !self.handoff_timeout.is_zero() {
            return self.queue.offer_timeout(job, self.handoff_timeout);
        }
        Err(job)
    }

    /// Non-blocking enqueue; starts a worker if the pool has none.
    fn enqueue(self: &Arc<Self>, job: Job) -> Result<(), Job> {
        self.queue.offer(job)?;
        let mut set = self.workers.lock();
        if set.workers.is_empty() && set.phase < PoolPhase::Stop {
            // a failed spawn leaves the task queued for the next worker
            let _ = self.add_worker(&mut set, None);
        }
        Ok(())
    }

    /// Start a worker, optionally with its first task. On failure the task is
    /// handed back.
    fn add_worker(self: &Arc<Self>, set: &mut WorkerSet, first: Option<Job>) -> Result<(), Option<Job>> {
        if set.workers.len() >= self.max {
            return Err(first);
        }
        // the first task travels through this slot so a failed spawn can return it
        let handoff = Arc::new(Mutex::new(first));
        let shared = self.clone();
        let slot = handoff.clone();
        match self.factory.spawn(move |thread| {
            let first = slot.lock().take();
            run_worker(&shared, &thread, first);
        }) {
            Ok(thread) => {
                set.workers.insert(thread.id(), thread);
                set.largest = set.largest.max(set.workers.len());
                Ok(())
            }
            Err(err) => {
                warn!(pool = %self.name, error = %err, "could not start worker");
                let first = handoff.lock().take();
                Err(first)
            }
        }
    }

    /// Next task for `thread`, or `None` when the worker should exit.
    fn next_task(&self, thread: &ManagedThread) -> Option<Job> {
        loop {
            let timed = {
                let set = self.workers.lock();
                if set.phase >= PoolPhase::Stop {
                    return None;
                }
                set.workers.len() > self.core
            };

            let polled = if timed {
                self.queue.poll(Some(self.keep_alive))
            } else {
                self.queue.poll(None)
            };
            if polled.is_some() {
                return polled;
            }
            if self.queue.is_closed() && self.queue.is_empty() {
                return None;
            }

            // keep-alive expired
            let mut set = self.workers.lock();
            if set.workers.len() > self.core && (set.workers.len() > 1 || self.queue.is_empty()) {
                set.workers.remove(&thread.id());
                debug!(pool = %self.name, thread = thread.name(), "idle worker exiting");
                return None;
            }
        }
    }

    fn worker_exited(self: &Arc<Self>, thread: &ManagedThread, retired: bool) {
        {
            let mut set = self.workers.lock();
            set.workers.remove(&thread.id());
            let running = set.phase == PoolPhase::Running;
            let pending = !self.queue.is_empty();
            let needed = (running && set.workers.len() < self.core) || (pending && set.workers.is_empty());
            if needed && set.phase < PoolPhase::Stop {
                if retired {
                    debug!(pool = %self.name, thread = thread.name(), "replacing retired worker");
                }
                let _ = self.add_worker(&mut set, None);
            }
        }
        debug!(pool = %self.name, thread = thread.name(), "worker exited");
        self.try_terminate();
    }

    fn try_terminate(self: &Arc<Self>) {
        let mut set = self.workers.lock();
        if !matches!(set.phase, PoolPhase::Shutdown | PoolPhase::Stop) || !set.workers.is_empty() {
            return;
        }
        if !self.queue.is_empty() {
            if set.phase == PoolPhase::Shutdown {
                // queued work outlived the last worker
                let _ = self.add_worker(&mut set, None);
            }
            return;
        }
        set.phase = PoolPhase::Terminated;
        info!(pool = %self.name, "terminated");
        self.terminated.notify_all();
    }
}

fn run_worker(shared: &Arc<PoolShared>, thread: &ManagedThread, first: Option<Job>) {
    let mut task = first;
    let mut retired = false;
    loop {
        let Some(job) = task.take().or_else(|| shared.next_task(thread)) else {
            break;
        };

        if shared.workers.lock().phase >= PoolPhase::Stop {
            thread.interrupt();
        } else {
            thread.interrupt_handle().clear();
        }

        shared.running.lock().insert(
            thread.id(),
            RunningEntry {
                job: job.clone(),
                hung_threshold: thread.hung_threshold(),
            },
        );
        job.run();
        shared.running.lock().remove(&thread.id());
        shared.completed.fetch_add(1, Ordering::SeqCst);

        if thread.is_expired(shared.lifetime) {
            debug!(pool = %shared.name, thread = thread.name(), age_ms = thread.age().as_millis() as u64, "worker reached its lifetime cap");
            retired = true;
            break;
        }
    }
    shared.worker_exited(thread, retired);
}

/// A refused job offered back to the rejection policy.
struct PendingAdmission<'a> {
    shared: &'a Arc<PoolShared>,
    id: TaskId,
    job: Option<Job>,
}

impl AdmissionAttempt for PendingAdmission<'_> {
    fn task_id(&self) -> TaskId {
        self.id
    }

    fn pool_name(&self) -> &str {
        &self.shared.name
    }

    fn is_shutdown(&self) -> bool {
        self.shared.workers.lock().phase != PoolPhase::Running
    }

    fn retry(&mut self) -> bool {
        let Some(job) = self.job.take() else {
            return true;
        };
        match self.shared.admit(job) {
            Ok(()) => true,
            Err(job) => {
                self.job = Some(job);
                false
            }
        }
    }
}
