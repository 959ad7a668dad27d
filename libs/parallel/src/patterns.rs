//! Parallel for, reduce and while, built on a [`ThreadPool`].
//!
//! All three patterns block the calling thread until the work they dispatched
//! has finished. They must not be called from inside a task running on the
//! same pool, since the caller would occupy a worker while waiting on it.
//!
//! The pool's [`AbortFlag`](crate::pool::AbortFlag) is checked before each
//! chunk is dispatched and again when it starts. Once an abort is requested, no
//! new chunk starts, chunks already running finish, and the pattern returns
//! [`Error::Aborted`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{Error, Result, TaskFault};
use crate::pool::{lock, ThreadPool};
use crate::range::Domain;

/// How long an idle [`parallel_while`] worker blocks waiting for new items
/// before re-checking the abort flag and the pending count.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

enum ChunkOutcome<T> {
    Done(T),
    Skipped,
    Faulted(TaskFault),
}

/// Runs `f` over every chunk on the pool and returns the results in chunk order.
fn run_chunks<C, T, F>(pool: &ThreadPool, label: &str, chunks: Vec<C>, f: F) -> Result<Vec<T>>
where
    C: Send + 'static,
    T: Send + 'static,
    F: Fn(C) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let abort = pool.abort_flag();
    let window = pool.threads() * 2;
    let total = chunks.len();

    let (s, r) = crossbeam_channel::unbounded();
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut faults = Vec::new();
    let mut aborted = false;
    let mut in_flight = 0;
    let mut chunks = chunks.into_iter().enumerate();

    tracing::debug!(chunks = total, "{}: dispatching", label);
    loop {
        while in_flight < window && !aborted {
            if abort.is_set() {
                aborted = true;
                break;
            }
            let Some((index, chunk)) = chunks.next() else {
                break;
            };
            let (f, s, abort) = (f.clone(), s.clone(), abort.clone());
            let name = format!("{label}[{index}]");
            pool.submit(name.clone(), move || {
                let outcome = if abort.is_set() {
                    ChunkOutcome::Skipped
                } else {
                    match panic::catch_unwind(AssertUnwindSafe(|| f(chunk))) {
                        Ok(value) => ChunkOutcome::Done(value),
                        Err(payload) => ChunkOutcome::Faulted(TaskFault::from_panic(name, payload)),
                    }
                };
                // The receiver outlives every dispatched chunk.
                let _ = s.send((index, outcome));
            })?;
            in_flight += 1;
        }

        if in_flight == 0 {
            break;
        }
        let (index, outcome) = r.recv().map_err(|_| Error::Disconnected)?;
        in_flight -= 1;
        match outcome {
            ChunkOutcome::Done(value) => results[index] = Some(value),
            ChunkOutcome::Skipped => aborted = true,
            ChunkOutcome::Faulted(fault) => {
                tracing::error!("{}", fault);
                faults.push(fault);
            }
        }
    }

    if !faults.is_empty() {
        return Err(Error::TaskFaults(faults));
    }
    if aborted {
        tracing::debug!("{}: aborted", label);
        return Err(Error::Aborted);
    }
    Ok(results.into_iter().flatten().collect())
}

/// Runs `body` on every chunk of `domain` concurrently.
///
/// Returns once all chunks have completed. No ordering is guaranteed between chunks.
///
/// # Examples
///
/// ```
/// # use std::sync::{Arc, atomic::{AtomicI64, Ordering}};
/// # use parallel::{patterns::parallel_for, pool::{PoolConfig, ThreadPool}, range::Range};
/// let pool = ThreadPool::start_new(PoolConfig::with_threads(4)).unwrap();
/// let sum = Arc::new(AtomicI64::new(0));
/// let sum_clone = sum.clone();
/// parallel_for(&pool, &Range::unit(0, 100).unwrap().chunked(8).unwrap(), move |chunk| {
///     sum_clone.fetch_add(chunk.iter().sum::<i64>(), Ordering::SeqCst);
/// })
/// .unwrap();
/// assert_eq!(sum.load(Ordering::SeqCst), 4950);
/// ```
pub fn parallel_for<D, F>(pool: &ThreadPool, domain: &D, body: F) -> Result<()>
where
    D: Domain,
    F: Fn(D::Chunk) + Send + Sync + 'static,
{
    run_chunks(pool, "parallel_for", domain.chunks(), body).map(|_| ())
}

/// Maps every chunk of `domain` to a partial result and combines the partials.
///
/// Partials are combined pairwise in chunk order, independent of the order in
/// which chunks complete. `combine` must be associative; for the result to be
/// independent of the chunk size it must also be commutative.
///
/// Returns `None` for an empty domain.
pub fn parallel_reduce<D, T, M, C>(
    pool: &ThreadPool,
    domain: &D,
    map: M,
    combine: C,
) -> Result<Option<T>>
where
    D: Domain,
    T: Send + 'static,
    M: Fn(D::Chunk) -> T + Send + Sync + 'static,
    C: Fn(T, T) -> T,
{
    let mut partials = run_chunks(pool, "parallel_reduce", domain.chunks(), map)?;
    while partials.len() > 1 {
        let mut next = Vec::with_capacity(partials.len().div_ceil(2));
        let mut iter = partials.into_iter();
        while let Some(a) = iter.next() {
            next.push(match iter.next() {
                Some(b) => combine(a, b),
                None => a,
            });
        }
        partials = next;
    }
    Ok(partials.pop())
}

/// A concurrent work queue consumed by [`parallel_while`].
///
/// The queue counts items that were pushed but not yet fully processed, so
/// that [`parallel_while`] can tell an empty queue from a finished one.
#[derive(Debug)]
pub struct WorkQueue<T> {
    s: Sender<T>,
    r: Receiver<T>,
    pending: Arc<AtomicUsize>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        let (s, r) = crossbeam_channel::unbounded();
        Self {
            s,
            r,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<T> WorkQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item to the back of the queue.
    pub fn push(&self, item: T) {
        self.feeder().push(item);
    }

    /// The number of queued items.
    pub fn len(&self) -> usize {
        self.r.len()
    }

    /// Returns `true` if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }

    /// A handle for adding items to the queue from worker bodies.
    pub fn feeder(&self) -> Feeder<T> {
        Feeder {
            s: self.s.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<T> FromIterator<T> for WorkQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let queue = Self::new();
        for item in iter {
            queue.push(item);
        }
        queue
    }
}

/// Adds items to a [`WorkQueue`] while [`parallel_while`] is draining it.
#[derive(Debug)]
pub struct Feeder<T> {
    s: Sender<T>,
    pending: Arc<AtomicUsize>,
}

impl<T> Clone for Feeder<T> {
    fn clone(&self) -> Self {
        Self {
            s: self.s.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<T> Feeder<T> {
    /// Adds an item to the queue.
    pub fn push(&self, item: T) {
        // Counted before it becomes visible, so a worker never sees it queued but uncounted.
        self.pending.fetch_add(1, Ordering::SeqCst);
        // Fails only after the queue has been drained and dropped.
        if self.s.send(item).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Drains `queue` on every worker of the pool, running `body` on each item.
///
/// `body` may push new items through the [`Feeder`] it is given. An item
/// counts as pending from its push until `body` has returned for it, so
/// workers stop once no item is pending: the queue is empty and no running
/// `body` can push more.
pub fn parallel_while<T, F>(pool: &ThreadPool, queue: WorkQueue<T>, body: F) -> Result<()>
where
    T: Send + 'static,
    F: Fn(T, &Feeder<T>) + Send + Sync + 'static,
{
    let abort = pool.abort_flag();
    let faults = Arc::new(Mutex::new(Vec::new()));
    let feeder = queue.feeder();
    let WorkQueue { s, r, pending } = queue;
    drop(s);

    let workers: Vec<usize> = (0..pool.threads()).collect();
    let faults_clone = faults.clone();
    run_chunks(pool, "parallel_while", workers, move |worker| {
        let mut processed = 0usize;
        while !abort.is_set() && pending.load(Ordering::SeqCst) > 0 {
            match r.recv_timeout(POLL_INTERVAL) {
                Ok(item) => {
                    if let Err(payload) =
                        panic::catch_unwind(AssertUnwindSafe(|| body(item, &feeder)))
                    {
                        let fault =
                            TaskFault::from_panic(format!("parallel_while[{worker}]"), payload);
                        tracing::error!("{}", fault);
                        lock(&faults_clone).push(fault);
                    }
                    processed += 1;
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
        }
        tracing::trace!(worker, processed, "parallel_while worker done");
    })?;

    let faults = std::mem::take(&mut *lock(&faults));
    if !faults.is_empty() {
        return Err(Error::TaskFaults(faults));
    }
    if pool.abort_flag().is_set() {
        return Err(Error::Aborted);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicI64;
    use std::thread;

    use test_log::test;

    use super::*;
    use crate::pool::PoolConfig;
    use crate::range::{BlockedRange, Range};

    fn pool(threads: usize) -> ThreadPool {
        ThreadPool::start_new(PoolConfig::with_threads(threads)).unwrap()
    }

    #[test]
    fn parallel_for_visits_every_index_once() {
        let pool = pool(4);
        let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..1000).map(|_| AtomicUsize::new(0)).collect());
        let hits_clone = hits.clone();
        parallel_for(
            &pool,
            &Range::unit(0, 1000).unwrap().chunked(37).unwrap(),
            move |chunk| {
                for i in chunk.iter() {
                    hits_clone[i as usize].fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .unwrap();
        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn parallel_for_over_blocked_range() {
        let pool = pool(3);
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let domain = BlockedRange::new(
            Range::unit(0, 9).unwrap(),
            Range::unit(0, 11).unwrap(),
            4,
            4,
        )
        .unwrap();
        parallel_for(&pool, &domain, move |block| {
            count_clone.fetch_add(block.len(), Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 99);
    }

    #[test]
    fn reduce_is_independent_of_chunking_and_threads() {
        let range = Range::unit(-500, 1500).unwrap();
        let expected: i64 = range.iter().map(|i| i * i % 97).sum();

        for threads in [1, 2, 8] {
            let pool = pool(threads);
            for chunk in [1, 7, 64, 2000, 5000] {
                let sum = parallel_reduce(
                    &pool,
                    &range.chunked(chunk).unwrap(),
                    |chunk| chunk.iter().map(|i| i * i % 97).sum::<i64>(),
                    |a, b| a + b,
                )
                .unwrap();
                assert_eq!(sum, Some(expected), "threads={threads} chunk={chunk}");
            }
        }
    }

    #[test]
    fn reduce_of_empty_domain_is_none() {
        let pool = pool(2);
        let out = parallel_reduce(
            &pool,
            &Range::unit(3, 3).unwrap().chunked(4).unwrap(),
            |chunk| chunk.len(),
            |a, b| a + b,
        )
        .unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn reduce_combines_in_chunk_order() {
        // String concatenation is associative but not commutative.
        let pool = pool(4);
        let out = parallel_reduce(
            &pool,
            &Range::unit(0, 26).unwrap().chunked(3).unwrap(),
            |chunk| {
                thread::sleep(Duration::from_millis((26 - chunk.start()) as u64 % 5));
                chunk
                    .iter()
                    .map(|i| char::from(b'a' + i as u8))
                    .collect::<String>()
            },
            |a, b| a + &b,
        )
        .unwrap();
        assert_eq!(out.as_deref(), Some("abcdefghijklmnopqrstuvwxyz"));
    }

    #[test]
    fn panicking_chunk_is_reported() {
        let pool = pool(2);
        let result = parallel_for(
            &pool,
            &Range::unit(0, 10).unwrap().chunked(1).unwrap(),
            |chunk| {
                if chunk.start() == 4 {
                    panic!("bad chunk");
                }
            },
        );
        let Err(Error::TaskFaults(faults)) = result else {
            panic!("expected a task fault");
        };
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].task, "parallel_for[4]");

        // The pool is still usable.
        parallel_for(&pool, &Range::unit(0, 10).unwrap().chunked(1).unwrap(), |_| {}).unwrap();
    }

    #[test]
    fn abort_stops_dispatching_new_chunks() {
        let pool = pool(1);
        let abort = pool.abort_flag();
        let started = Arc::new(AtomicUsize::new(0));
        let started_clone = started.clone();
        let result = parallel_for(
            &pool,
            &Range::unit(0, 100).unwrap().chunked(1).unwrap(),
            move |chunk| {
                started_clone.fetch_add(1, Ordering::SeqCst);
                if chunk.start() == 3 {
                    abort.request();
                }
            },
        );
        assert!(matches!(result, Err(Error::Aborted)));
        // Only chunks dispatched before the request can start.
        assert!(started.load(Ordering::SeqCst) <= 5);

        pool.clear_abort();
        parallel_for(&pool, &Range::unit(0, 4).unwrap().chunked(1).unwrap(), |_| {}).unwrap();
    }

    #[test]
    fn parallel_while_processes_fed_items() {
        // Each item n > 0 feeds n - 1 twice: a binary tree of 2^(depth+1) - 1 items.
        for threads in [1, 4] {
            let pool = pool(threads);
            let queue: WorkQueue<u32> = [6].into_iter().collect();
            let count = Arc::new(AtomicUsize::new(0));
            let sum = Arc::new(AtomicI64::new(0));
            let (count_clone, sum_clone) = (count.clone(), sum.clone());
            parallel_while(&pool, queue, move |n, feeder| {
                count_clone.fetch_add(1, Ordering::SeqCst);
                sum_clone.fetch_add(n as i64, Ordering::SeqCst);
                if n > 0 {
                    feeder.push(n - 1);
                    feeder.push(n - 1);
                }
            })
            .unwrap();
            assert_eq!(count.load(Ordering::SeqCst), 127);
            // sum over levels k of 2^k * (6 - k)
            assert_eq!(sum.load(Ordering::SeqCst), 120);
        }
    }

    #[test]
    fn parallel_while_returns_once_drained() {
        for threads in [1, 4, 8] {
            let (s, r) = crossbeam_channel::bounded(1);
            thread::spawn(move || {
                let pool = pool(threads);
                let queue: WorkQueue<u32> = [1, 2, 3].into_iter().collect();
                let _ = s.send(parallel_while(&pool, queue, |_, _| {}));
            });
            let result = r
                .recv_timeout(Duration::from_secs(5))
                .unwrap_or_else(|_| panic!("{threads} threads: parallel_while did not return"));
            result.unwrap();
        }
    }

    #[test]
    fn parallel_while_finishes_after_a_panicking_body() {
        let pool = pool(4);
        let queue: WorkQueue<u32> = (0..20).collect();
        let result = parallel_while(&pool, queue, |n, feeder| {
            if n == 7 {
                panic!("bad item");
            }
            if n < 5 {
                feeder.push(n + 100);
            }
        });
        let Err(Error::TaskFaults(faults)) = result else {
            panic!("expected a task fault");
        };
        assert_eq!(faults.len(), 1);
    }

    #[test]
    fn parallel_while_on_empty_queue_returns() {
        let pool = pool(3);
        parallel_while(&pool, WorkQueue::<u8>::new(), |_, _| {}).unwrap();
    }
}
