//! A fixed-size pool of worker threads.
//!
//! The pool moves through [`PoolState::Created`], [`PoolState::Running`]
//! (optionally [`PoolState::Paused`]), [`PoolState::ShuttingDown`] and
//! [`PoolState::Terminated`]. Tasks are only accepted while running or paused.
//! A panic inside a task is caught at the task boundary, recorded as a
//! [`TaskFault`], and reported by the next [`ThreadPool::join`]; the worker that
//! ran the task keeps serving the queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::error::{Error, Result, TaskFault};

/// Locks a mutex, recovering the guard if a previous holder panicked.
///
/// Task bodies never run while one of the pool's locks is held, so a poisoned
/// lock still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Job {
    name: String,
    task: Task,
}

/// The lifecycle state of a [`ThreadPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolState {
    /// Constructed, no worker threads spawned yet.
    Created,
    /// Accepting and executing tasks.
    Running,
    /// Accepting tasks, but workers do not start new ones until resumed.
    Paused,
    /// Rejecting tasks; workers drain the remaining queue and exit.
    ShuttingDown,
    /// All workers have exited.
    Terminated,
}

/// Thread pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub threads: usize,
    /// Prefix for worker thread names.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            name: "worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// A default configuration with the given number of threads.
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Default::default()
        }
    }
}

/// A cooperative cancellation flag shared between a pool and the work it runs.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    /// Creates a cleared flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that running work stop at its next boundary.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears a previous abort request.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Returns `true` if an abort has been requested.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The result of waiting for the pool to go idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStatus {
    /// Every submitted task finished. Contains the faults recorded since the last join.
    Completed {
        /// Tasks that panicked.
        faults: Vec<TaskFault>,
    },
    /// The wait elapsed with tasks still outstanding.
    TimedOut {
        /// Number of submitted tasks that have not finished.
        pending: usize,
    },
}

/// The result of shutting down a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Every worker exited.
    Terminated {
        /// Faults recorded since the last join.
        faults: Vec<TaskFault>,
    },
    /// The wait elapsed before all workers exited. Workers are not killed;
    /// they keep draining the queue in the background.
    NotTerminated {
        /// Number of submitted tasks that have not finished.
        pending: usize,
    },
}

/// A snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub threads: usize,
    /// Tasks that ran to completion.
    pub completed: u64,
    /// Tasks that panicked.
    pub faulted: u64,
    /// Tasks submitted but not yet finished.
    pub pending: usize,
}

#[derive(Debug)]
struct Status {
    state: PoolState,
    pending: usize,
    live_workers: usize,
}

struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
    faults: Mutex<Vec<TaskFault>>,
    completed: AtomicU64,
    faulted: AtomicU64,
}

impl Shared {
    fn wait_while_paused(&self) {
        let mut status = lock(&self.status);
        while status.state == PoolState::Paused {
            status = self
                .changed
                .wait(status)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish_task(&self) {
        let mut status = lock(&self.status);
        status.pending -= 1;
        self.changed.notify_all();
    }

    fn worker_exited(&self) {
        let mut status = lock(&self.status);
        status.live_workers -= 1;
        self.changed.notify_all();
    }

    /// Blocks until `done` holds or `timeout` elapses, returning the final status check.
    fn wait_until(
        &self,
        timeout: Option<Duration>,
        done: impl Fn(&Status) -> bool,
    ) -> (bool, usize) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut status = lock(&self.status);
        loop {
            if done(&status) {
                return (true, status.pending);
            }
            status = match deadline {
                None => self
                    .changed
                    .wait(status)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return (false, status.pending);
                    }
                    self.changed
                        .wait_timeout(status, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn take_faults(&self) -> Vec<TaskFault> {
        std::mem::take(&mut *lock(&self.faults))
    }
}

/// A fixed-size pool of worker threads sharing one task queue.
pub struct ThreadPool {
    config: PoolConfig,
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    abort: AbortFlag,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl ThreadPool {
    /// Creates a pool in the [`PoolState::Created`] state.
    ///
    /// Returns [`Error::ZeroThreads`] if the configuration requests no workers.
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.threads == 0 {
            return Err(Error::ZeroThreads);
        }
        let (sender, receiver) = crossbeam_channel::unbounded();
        Ok(Self {
            config,
            shared: Arc::new(Shared {
                status: Mutex::new(Status {
                    state: PoolState::Created,
                    pending: 0,
                    live_workers: 0,
                }),
                changed: Condvar::new(),
                faults: Mutex::new(Vec::new()),
                completed: AtomicU64::new(0),
                faulted: AtomicU64::new(0),
            }),
            sender: Mutex::new(Some(sender)),
            receiver,
            workers: Mutex::new(Vec::new()),
            abort: AbortFlag::new(),
        })
    }

    /// Creates and starts a pool.
    pub fn start_new(config: PoolConfig) -> Result<Self> {
        let pool = Self::new(config)?;
        pool.start()?;
        Ok(pool)
    }

    /// Spawns the worker threads and moves the pool to [`PoolState::Running`].
    ///
    /// If a thread cannot be spawned, the pool is terminated: workers already
    /// spawned exit and the pool cannot be started again.
    pub fn start(&self) -> Result<()> {
        let name = self.config.name.clone();
        self.start_with(|index, work| {
            thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(work)
        })
    }

    fn start_with<S>(&self, mut spawn: S) -> Result<()>
    where
        S: FnMut(usize, Task) -> std::io::Result<JoinHandle<()>>,
    {
        let mut status = lock(&self.shared.status);
        if status.state != PoolState::Created {
            return Err(Error::Rejected {
                state: status.state,
            });
        }

        let mut workers = lock(&self.workers);
        for index in 0..self.config.threads {
            let shared = self.shared.clone();
            let receiver = self.receiver.clone();
            match spawn(index, Box::new(move || worker_loop(shared, receiver))) {
                Ok(handle) => {
                    workers.push(handle);
                    status.live_workers += 1;
                }
                Err(err) => {
                    tracing::error!(spawned = index, "failed to spawn worker thread: {}", err);
                    status.state = PoolState::Terminated;
                    // Spawned workers see a closed, empty queue and exit.
                    lock(&self.sender).take();
                    self.shared.changed.notify_all();
                    return Err(err.into());
                }
            }
        }
        status.state = PoolState::Running;
        tracing::debug!(threads = self.config.threads, "thread pool running");
        Ok(())
    }

    /// The number of worker threads.
    #[inline]
    pub fn threads(&self) -> usize {
        self.config.threads
    }

    /// The current lifecycle state.
    pub fn state(&self) -> PoolState {
        lock(&self.shared.status).state
    }

    /// The abort flag checked by the parallel patterns running on this pool.
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Requests that parallel patterns stop dispatching new chunks.
    pub fn request_abort(&self) {
        tracing::debug!("abort requested");
        self.abort.request();
    }

    /// Clears a previous abort request.
    pub fn clear_abort(&self) {
        self.abort.clear();
    }

    /// Submits a task for execution.
    ///
    /// Returns [`Error::Rejected`] unless the pool is running or paused.
    pub fn submit(
        &self,
        name: impl Into<String>,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let mut status = lock(&self.shared.status);
        match status.state {
            PoolState::Running | PoolState::Paused => {}
            state => return Err(Error::Rejected { state }),
        }
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(Error::Rejected {
                state: status.state,
            });
        };
        sender
            .send(Job {
                name: name.into(),
                task: Box::new(task),
            })
            .map_err(|_| Error::Disconnected)?;
        status.pending += 1;
        Ok(())
    }

    /// Stops workers from starting new tasks until [`ThreadPool::resume`] is called.
    ///
    /// Tasks already executing run to completion. Has no effect unless the pool is running.
    pub fn pause(&self) {
        let mut status = lock(&self.shared.status);
        if status.state == PoolState::Running {
            status.state = PoolState::Paused;
            tracing::debug!("thread pool paused");
        }
    }

    /// Resumes a paused pool.
    pub fn resume(&self) {
        let mut status = lock(&self.shared.status);
        if status.state == PoolState::Paused {
            status.state = PoolState::Running;
            self.shared.changed.notify_all();
            tracing::debug!("thread pool resumed");
        }
    }

    /// Blocks until every submitted task has finished, or until `timeout` elapses.
    ///
    /// Waiting is cooperative: in-flight tasks are never cancelled. On completion,
    /// the faults recorded since the previous join are returned.
    ///
    /// Joining a paused pool with outstanding tasks and no timeout blocks until
    /// another thread resumes it.
    pub fn join(&self, timeout: Option<Duration>) -> JoinStatus {
        let (done, pending) = self.shared.wait_until(timeout, |s| s.pending == 0);
        if done {
            JoinStatus::Completed {
                faults: self.shared.take_faults(),
            }
        } else {
            JoinStatus::TimedOut { pending }
        }
    }

    /// Rejects further submissions, lets the workers drain the queue, and waits
    /// up to `timeout` for them to exit.
    ///
    /// Workers are never killed. If they have not exited when the wait elapses,
    /// [`Termination::NotTerminated`] is returned and a later call may complete
    /// the shutdown.
    pub fn shutdown(&self, timeout: Option<Duration>) -> Termination {
        self.begin_shutdown();

        let (done, pending) = self.shared.wait_until(timeout, |s| s.live_workers == 0);
        if !done {
            tracing::warn!(pending, "thread pool did not terminate within the timeout");
            return Termination::NotTerminated { pending };
        }

        for handle in lock(&self.workers).drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread exited with a panic");
            }
        }
        lock(&self.shared.status).state = PoolState::Terminated;
        tracing::debug!("thread pool terminated");
        Termination::Terminated {
            faults: self.shared.take_faults(),
        }
    }

    fn begin_shutdown(&self) {
        let mut status = lock(&self.shared.status);
        match status.state {
            PoolState::ShuttingDown | PoolState::Terminated => return,
            PoolState::Created => {
                status.state = PoolState::Terminated;
            }
            PoolState::Running | PoolState::Paused => {
                status.state = PoolState::ShuttingDown;
            }
        }
        // Workers exit once the queue is empty and the last sender is gone.
        lock(&self.sender).take();
        self.shared.changed.notify_all();
        tracing::debug!("thread pool shutting down");
    }

    /// A snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            threads: self.config.threads,
            completed: self.shared.completed.load(Ordering::Relaxed),
            faulted: self.shared.faulted.load(Ordering::Relaxed),
            pending: lock(&self.shared.status).pending,
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.begin_shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, receiver: Receiver<Job>) {
    loop {
        shared.wait_while_paused();
        let Ok(Job { name, task }) = receiver.recv() else {
            break;
        };
        // A pause may have been requested while blocked on the queue.
        shared.wait_while_paused();

        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                let fault = TaskFault::from_panic(name, payload);
                tracing::error!("{}", fault);
                shared.faulted.fetch_add(1, Ordering::Relaxed);
                lock(&shared.faults).push(fault);
            }
        }
        shared.finish_task();
    }
    shared.worker_exited();
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use crossbeam_channel::bounded;
    use test_log::test;

    use super::*;

    fn counting_pool(threads: usize) -> (ThreadPool, Arc<AtomicUsize>) {
        (
            ThreadPool::start_new(PoolConfig::with_threads(threads)).unwrap(),
            Arc::new(AtomicUsize::new(0)),
        )
    }

    #[test]
    fn join_waits_for_all_submitted_tasks() {
        let (pool, count) = counting_pool(4);
        for i in 0..64 {
            let count = count.clone();
            pool.submit(format!("task {i}"), move || {
                thread::sleep(Duration::from_millis(1));
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        assert_eq!(pool.join(None), JoinStatus::Completed { faults: vec![] });
        assert_eq!(count.load(Ordering::SeqCst), 64);
        assert_eq!(pool.stats().completed, 64);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let (pool, _) = counting_pool(2);
        assert!(matches!(
            pool.shutdown(Some(Duration::from_secs(10))),
            Termination::Terminated { .. }
        ));
        assert_eq!(pool.state(), PoolState::Terminated);
        assert!(matches!(
            pool.submit("late", || {}),
            Err(Error::Rejected {
                state: PoolState::Terminated
            })
        ));
    }

    #[test]
    fn submit_before_start_is_rejected() {
        let pool = ThreadPool::new(PoolConfig::with_threads(1)).unwrap();
        assert_eq!(pool.state(), PoolState::Created);
        assert!(pool.submit("early", || {}).is_err());
        pool.start().unwrap();
        assert!(pool.start().is_err());
        pool.submit("on time", || {}).unwrap();
        assert!(matches!(pool.join(None), JoinStatus::Completed { .. }));
    }

    #[test]
    fn failed_start_terminates_the_pool() {
        let pool = ThreadPool::new(PoolConfig::with_threads(3)).unwrap();
        let result = pool.start_with(|index, work| {
            if index == 2 {
                return Err(std::io::Error::other("no more threads"));
            }
            thread::Builder::new().spawn(work)
        });
        assert!(matches!(result, Err(Error::Spawn(_))));
        assert_eq!(pool.state(), PoolState::Terminated);
        assert!(pool.start().is_err());
        assert!(pool.submit("late", || {}).is_err());
        assert!(matches!(
            pool.shutdown(Some(Duration::from_secs(5))),
            Termination::Terminated { .. }
        ));
        assert!(lock(&pool.workers).is_empty());
    }

    #[test]
    fn zero_threads_is_a_configuration_error() {
        assert!(matches!(
            ThreadPool::new(PoolConfig::with_threads(0)),
            Err(Error::ZeroThreads)
        ));
    }

    #[test]
    fn panicking_task_does_not_affect_siblings() {
        let (pool, count) = counting_pool(2);
        pool.submit("bad", || panic!("boom")).unwrap();
        for _ in 0..10 {
            let count = count.clone();
            pool.submit("good", move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        let JoinStatus::Completed { faults } = pool.join(None) else {
            panic!("join should complete without a timeout");
        };
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].task, "bad");
        assert_eq!(faults[0].message, "boom");
        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert_eq!(pool.stats().faulted, 1);

        // Faults are reported once.
        assert_eq!(pool.join(None), JoinStatus::Completed { faults: vec![] });
    }

    #[test]
    fn join_times_out_without_cancelling() {
        let (pool, count) = counting_pool(1);
        let (s, r) = bounded::<()>(0);
        let count_clone = count.clone();
        pool.submit("blocked", move || {
            r.recv().unwrap();
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(
            pool.join(Some(Duration::from_millis(20))),
            JoinStatus::TimedOut { pending: 1 }
        );
        s.send(()).unwrap();
        assert!(matches!(pool.join(None), JoinStatus::Completed { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_reports_not_terminated_on_timeout() {
        let (pool, _) = counting_pool(1);
        let (s, r) = bounded::<()>(0);
        pool.submit("blocked", move || r.recv().unwrap()).unwrap();

        assert_eq!(
            pool.shutdown(Some(Duration::from_millis(20))),
            Termination::NotTerminated { pending: 1 }
        );
        assert_eq!(pool.state(), PoolState::ShuttingDown);
        assert!(pool.submit("late", || {}).is_err());

        s.send(()).unwrap();
        assert!(matches!(
            pool.shutdown(None),
            Termination::Terminated { .. }
        ));
    }

    #[test]
    fn paused_pool_holds_queued_tasks() {
        let (pool, count) = counting_pool(2);
        pool.pause();
        assert_eq!(pool.state(), PoolState::Paused);
        for _ in 0..8 {
            let count = count.clone();
            pool.submit("queued", move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        assert_eq!(
            pool.join(Some(Duration::from_millis(30))),
            JoinStatus::TimedOut { pending: 8 }
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);

        pool.resume();
        assert!(matches!(pool.join(None), JoinStatus::Completed { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn shutdown_drains_the_queue() {
        let (pool, count) = counting_pool(3);
        for _ in 0..30 {
            let count = count.clone();
            pool.submit("drained", move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert!(matches!(
            pool.shutdown(None),
            Termination::Terminated { .. }
        ));
        assert_eq!(count.load(Ordering::SeqCst), 30);
    }
}
