//! Bounded worker pool
//!
//! Every work item runs as its own tokio task once it holds a semaphore
//! permit. Each item gets a fixed number of attempts with no backoff. A
//! single reporter task consumes completion events in completion order and
//! forwards them to the [`ProgressSink`]; closing the event channel and
//! awaiting the reporter guarantees the last event is rendered before the
//! pool returns.
//!
//! Failure policy:
//! - [`FailurePolicy::Abort`]: the first item that exhausts its attempts
//!   stops admission of new items. In-flight siblings are drained, then the
//!   item's [`Error::ItemFailed`] is returned.
//! - [`FailurePolicy::Continue`]: the item is counted as failed and its
//!   result slot stays empty.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, warn};

use oc_core::{Aggregate, Error, FailurePolicy, ProgressSink, Result};

/// Run `op` up to `max_attempts` times, returning the first success
pub async fn with_retry<T, F, Fut>(label: &str, max_attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = max_attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(item = label, attempt, max = attempts, error = %err, "attempt failed");
                last = Some(err);
            }
        }
    }
    let source = last.unwrap_or_else(|| Error::General("no attempt was made".into()));
    warn!(item = label, attempts, "retry budget exhausted");
    Err(Error::ItemFailed {
        item: label.to_string(),
        attempts,
        source: Box::new(source),
    })
}

/// Lock-free outcome counters shared by the tasks of one bulk operation
#[derive(Debug, Default)]
pub struct Tally {
    finish: AtomicU64,
    skip: AtomicU64,
}

impl Tally {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn finish(&self) {
        self.add_finished(1);
    }

    pub fn add_finished(&self, n: u64) {
        self.finish.fetch_add(n, Ordering::Relaxed);
    }

    pub fn skip(&self) {
        self.skip.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finished(&self) -> u64 {
        self.finish.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skip.load(Ordering::Relaxed)
    }

    /// Snapshot as an aggregate; `with_skip` is false for operations without a skip outcome
    pub fn aggregate(&self, total: u64, with_skip: bool) -> Aggregate {
        Aggregate {
            total,
            finish: self.finished(),
            skip: with_skip.then(|| self.skipped()),
        }
    }
}

/// What [`WorkerPool::finish`] hands back
#[derive(Debug)]
pub struct PoolReport<R> {
    /// One slot per submitted item, in submission order; empty when the item failed
    pub results: Vec<Option<R>>,
    /// Items that exhausted their attempts under [`FailurePolicy::Continue`]
    pub failed: u64,
}

impl<R> PoolReport<R> {
    /// All results, or `None` if any slot is empty
    pub fn into_complete(self) -> Option<Vec<R>> {
        self.results.into_iter().collect()
    }
}

type Joined<R> = (usize, Result<R>);

/// Semaphore-gated pool of tokio tasks
pub struct WorkerPool<R> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Joined<R>>,
    results: Vec<Option<R>>,
    policy: FailurePolicy,
    max_attempts: u32,
    failed: u64,
    fatal: Option<Error>,
    total: Arc<AtomicU64>,
    events: Option<mpsc::Sender<()>>,
    reporter: Option<JoinHandle<u64>>,
}

impl<R: Send + 'static> WorkerPool<R> {
    /// Start a pool of `threads` workers for `total` expected items
    pub fn new(
        threads: usize,
        total: u64,
        policy: FailurePolicy,
        max_attempts: u32,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let threads = threads.max(1);
        let total = Arc::new(AtomicU64::new(total));
        let (tx, mut rx) = mpsc::channel::<()>(1);

        let reporter_total = Arc::clone(&total);
        let reporter = tokio::spawn(async move {
            let mut done = 0u64;
            while rx.recv().await.is_some() {
                done += 1;
                progress.advance(done, reporter_total.load(Ordering::Relaxed));
            }
            progress.finish(done, reporter_total.load(Ordering::Relaxed));
            done
        });

        debug!(threads, policy = ?policy, max_attempts, "worker pool started");

        Self {
            semaphore: Arc::new(Semaphore::new(threads)),
            tasks: JoinSet::new(),
            results: Vec::new(),
            policy,
            max_attempts,
            failed: 0,
            fatal: None,
            total,
            events: Some(tx),
            reporter: Some(reporter),
        }
    }

    /// Grow the expected item count, for sources enumerated page by page
    pub fn add_total(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Admit one work item, waiting for a free worker
    ///
    /// Returns the fatal error if an earlier item failed under
    /// [`FailurePolicy::Abort`]; in-flight items have been drained by then.
    pub async fn submit<F, Fut>(&mut self, label: impl Into<String>, work: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.reap_ready();
        if self.fatal.is_some() {
            return Err(self.abort().await);
        }

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::General("Worker pool closed".into()))?;

        // A sibling may have failed while we waited for the permit
        self.reap_ready();
        if self.fatal.is_some() {
            drop(permit);
            return Err(self.abort().await);
        }

        let index = self.results.len();
        self.results.push(None);

        let label = label.into();
        let events = self.events.clone();
        let policy = self.policy;
        let max_attempts = self.max_attempts;
        debug!(item = %label, index, "work item admitted");

        self.tasks.spawn(async move {
            let _permit = permit;
            let outcome = with_retry(&label, max_attempts, work).await;
            if outcome.is_ok() || policy == FailurePolicy::Continue {
                if let Some(events) = events {
                    let _ = events.send(()).await;
                }
            }
            (index, outcome)
        });
        Ok(())
    }

    /// Wait for every admitted item; the pool stays usable afterwards
    pub async fn drain(&mut self) -> Result<()> {
        self.join_all().await;
        if self.fatal.is_some() {
            return Err(self.abort().await);
        }
        Ok(())
    }

    /// Wait for every item and for the reporter, then hand back the results
    pub async fn finish(mut self) -> Result<PoolReport<R>> {
        self.join_all().await;
        self.close_reporter().await;
        if let Some(err) = self.fatal.take() {
            return Err(err);
        }
        Ok(PoolReport {
            results: std::mem::take(&mut self.results),
            failed: self.failed,
        })
    }

    fn reap_ready(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.record(joined);
        }
    }

    async fn join_all(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            self.record(joined);
        }
    }

    fn record(&mut self, joined: std::result::Result<Joined<R>, JoinError>) {
        let err = match joined {
            Ok((index, Ok(value))) => {
                self.results[index] = Some(value);
                return;
            }
            Ok((_, Err(err))) => err,
            Err(join_err) => Error::General(format!("Worker task failed: {join_err}")),
        };

        match self.policy {
            FailurePolicy::Continue => self.failed += 1,
            FailurePolicy::Abort => {
                if self.fatal.is_none() {
                    warn!(error = %err, "aborting: no further items will be admitted");
                    self.fatal = Some(err);
                }
            }
        }
    }

    async fn abort(&mut self) -> Error {
        self.join_all().await;
        self.close_reporter().await;
        self.fatal
            .take()
            .unwrap_or_else(|| Error::General("Worker pool aborted".into()))
    }

    async fn close_reporter(&mut self) {
        self.events.take();
        if let Some(reporter) = self.reporter.take() {
            let _ = reporter.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(u64, u64)>>,
        finished: Mutex<Option<(u64, u64)>>,
    }

    impl ProgressSink for Recorder {
        fn advance(&self, done: u64, total: u64) {
            self.events.lock().unwrap().push((done, total));
        }

        fn finish(&self, done: u64, total: u64) {
            *self.finished.lock().unwrap() = Some((done, total));
        }
    }

    fn pool<R: Send + 'static>(threads: usize, total: u64, policy: FailurePolicy) -> WorkerPool<R> {
        WorkerPool::new(threads, total, policy, 3, Arc::new(oc_core::NoProgress))
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let value = with_retry("item", 3, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Connection("reset".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_wraps_last_error() {
        let err = with_retry::<(), _, _>("part 2", 3, || async {
            Err(Error::Connection("reset".into()))
        })
        .await
        .unwrap_err();
        match err {
            Error::ItemFailed { item, attempts, source } => {
                assert_eq!(item, "part 2");
                assert_eq!(attempts, 3);
                assert!(matches!(*source, Error::Connection(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool = pool::<()>(3, 20, FailurePolicy::Abort);

        for i in 0..20 {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            pool.submit(format!("item {i}"), move || {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();
        }
        let report = pool.finish().await.unwrap();

        assert_eq!(report.results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_land_in_submission_slots() {
        let mut pool = pool::<usize>(8, 8, FailurePolicy::Abort);
        for i in 0..8usize {
            pool.submit(format!("item {i}"), move || async move {
                // Later items finish first
                tokio::time::sleep(Duration::from_millis((8 - i as u64) * 3)).await;
                Ok(i * 10)
            })
            .await
            .unwrap();
        }
        let values = pool.finish().await.unwrap().into_complete().unwrap();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[tokio::test]
    async fn test_abort_stops_admission() {
        let executed = Arc::new(AtomicUsize::new(0));
        let mut pool = pool::<()>(1, 50, FailurePolicy::Abort);

        let mut outcome = Ok(());
        for i in 0..50 {
            let executed = Arc::clone(&executed);
            let submitted = pool
                .submit(format!("item {i}"), move || {
                    let executed = Arc::clone(&executed);
                    async move {
                        executed.fetch_add(1, Ordering::SeqCst);
                        if i == 0 {
                            Err(Error::Connection("reset".into()))
                        } else {
                            Ok(())
                        }
                    }
                })
                .await;
            if submitted.is_err() {
                outcome = submitted;
                break;
            }
        }
        let err = match outcome {
            Err(err) => err,
            Ok(()) => pool.finish().await.unwrap_err(),
        };

        assert!(matches!(err, Error::ItemFailed { attempts: 3, .. }));
        // Three attempts of the failing item, nothing admitted after it
        assert!(executed.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test]
    async fn test_continue_counts_failures() {
        let mut pool = pool::<usize>(4, 10, FailurePolicy::Continue);
        for i in 0..10usize {
            pool.submit(format!("item {i}"), move || async move {
                if i % 3 == 0 {
                    Err(Error::from_status(500, "InternalError"))
                } else {
                    Ok(i)
                }
            })
            .await
            .unwrap();
        }
        let report = pool.finish().await.unwrap();

        assert_eq!(report.failed, 4);
        assert_eq!(report.results.iter().filter(|r| r.is_none()).count(), 4);
        assert_eq!(report.results[1], Some(1));
        assert!(report.into_complete().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_progress_is_monotonic_and_complete_before_return() {
        let recorder = Arc::new(Recorder::default());
        let mut pool: WorkerPool<()> =
            WorkerPool::new(5, 0, FailurePolicy::Abort, 3, recorder.clone());

        for page in 0..3 {
            pool.add_total(4);
            for i in 0..4 {
                pool.submit(format!("page {page} item {i}"), move || async move {
                    tokio::time::sleep(Duration::from_millis(((i * 7) % 5) as u64)).await;
                    Ok(())
                })
                .await
                .unwrap();
            }
            pool.drain().await.unwrap();
        }
        pool.finish().await.unwrap();

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events.len(), 12);
        for (i, (done, _)) in events.iter().enumerate() {
            assert_eq!(*done, i as u64 + 1);
        }
        assert_eq!(*recorder.finished.lock().unwrap(), Some((12, 12)));
    }

    #[test]
    fn test_tally_aggregate() {
        let tally = Tally::new();
        tally.finish();
        tally.add_finished(2);
        tally.skip();

        let agg = tally.aggregate(5, true);
        assert_eq!(agg.finish, 3);
        assert_eq!(agg.skip, Some(1));
        assert_eq!(agg.fail(), 1);

        assert_eq!(tally.aggregate(5, false).skip, None);
    }
}
