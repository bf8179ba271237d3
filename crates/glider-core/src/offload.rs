//! Blocking-task offload bridge.
//!
//! Command handlers run on a single-threaded cooperative scheduler. Anything
//! that blocks (spawning `yt-dlp` and waiting for it, file I/O) goes through
//! [`OffloadBridge`], which runs it on a fixed pool of worker threads and hands
//! the result back through a oneshot channel. Awaiting the handle suspends only
//! the calling task.
//!
//! Cancellation is at-least-run: dropping an [`OffloadHandle`] (or hitting a
//! deadline, or tearing down the runtime) does not interrupt a job that a
//! worker already picked up. It runs to completion and its result is discarded.

use std::{
    any::Any,
    convert::Infallible,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    task::{Context, Poll},
    thread,
    time::Duration,
};

use crossbeam_channel::{unbounded, Sender};
use tokio::sync::oneshot;

use crate::{errors::Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Failure of an offloaded call.
///
/// `Failed` carries the operation's own error value untouched; the other
/// variants are raised by the bridge itself.
#[derive(Debug, thiserror::Error)]
pub enum OffloadError<E = Infallible> {
    #[error("{0}")]
    Failed(E),

    #[error("offloaded operation panicked: {0}")]
    Panicked(String),

    #[error("offloaded operation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("worker pool is closed")]
    Closed,
}

impl<E> OffloadError<E> {
    /// The operation's own error, if that is what failed.
    pub fn into_cause(self) -> Option<E> {
        match self {
            OffloadError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl OffloadError<Infallible> {
    fn widen<E>(self) -> OffloadError<E> {
        match self {
            OffloadError::Failed(never) => match never {},
            OffloadError::Panicked(m) => OffloadError::Panicked(m),
            OffloadError::TimedOut(d) => OffloadError::TimedOut(d),
            OffloadError::Closed => OffloadError::Closed,
        }
    }
}

/// Process-wide pool of blocking workers.
pub struct OffloadBridge {
    queue: Sender<Job>,
    size: usize,
    deadline: Option<Duration>,
}

impl OffloadBridge {
    /// Start `workers` threads (at least one). They exit once the bridge is
    /// dropped and the queue has drained.
    pub fn new(workers: usize) -> Result<Self> {
        let size = workers.max(1);
        let (queue, jobs) = unbounded::<Job>();

        for i in 0..size {
            let jobs = jobs.clone();
            thread::Builder::new()
                .name(format!("glider-worker-{i}"))
                .spawn(move || {
                    while let Ok(job) = jobs.recv() {
                        job();
                    }
                })
                .map_err(|e| Error::External(format!("failed to start worker {i}: {e}")))?;
        }

        tracing::debug!(workers = size, "offload pool started");
        Ok(Self {
            queue,
            size,
            deadline: None,
        })
    }

    /// Default deadline applied by [`run`](Self::run) and [`try_run`](Self::try_run).
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue `op` on the pool. Never blocks; the returned handle resolves when
    /// a worker has run it.
    pub fn submit<F, T>(&self, op: F) -> OffloadHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(op)).map_err(panic_message);
            if tx.send(outcome).is_err() {
                tracing::debug!("offloaded job finished with no awaiting task");
            }
        });

        // On a closed queue the job (and its sender) is dropped here, so the
        // handle resolves to `Closed`.
        if self.queue.send(job).is_err() {
            tracing::warn!("offload pool is closed; job dropped");
        }

        OffloadHandle { rx }
    }

    /// Run `op` on the pool and return its value.
    pub async fn run<F, T>(&self, op: F) -> std::result::Result<T, OffloadError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match self.deadline {
            Some(d) => self.run_with_deadline(d, op).await,
            None => self.submit(op).await,
        }
    }

    /// Like [`run`](Self::run) but gives up waiting after `deadline`.
    pub async fn run_with_deadline<F, T>(
        &self,
        deadline: Duration,
        op: F,
    ) -> std::result::Result<T, OffloadError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(deadline, self.submit(op)).await {
            Ok(res) => res,
            Err(_) => Err(OffloadError::TimedOut(deadline)),
        }
    }

    /// Run a fallible `op`; its `Err(e)` comes back as `OffloadError::Failed(e)`.
    pub async fn try_run<F, T, E>(&self, op: F) -> std::result::Result<T, OffloadError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        flatten(self.run(op).await)
    }

    pub async fn try_run_with_deadline<F, T, E>(
        &self,
        deadline: Duration,
        op: F,
    ) -> std::result::Result<T, OffloadError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        flatten(self.run_with_deadline(deadline, op).await)
    }
}

fn flatten<T, E>(
    res: std::result::Result<std::result::Result<T, E>, OffloadError>,
) -> std::result::Result<T, OffloadError<E>> {
    match res {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(OffloadError::Failed(e)),
        Err(e) => Err(e.widen()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

/// Pending result of a submitted job.
pub struct OffloadHandle<T> {
    rx: oneshot::Receiver<std::result::Result<T, String>>,
}

impl<T> Future for OffloadHandle<T> {
    type Output = std::result::Result<T, OffloadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(v))) => Poll::Ready(Ok(v)),
            Poll::Ready(Ok(Err(msg))) => Poll::Ready(Err(OffloadError::Panicked(msg))),
            Poll::Ready(Err(_)) => Poll::Ready(Err(OffloadError::Closed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    #[derive(Debug, PartialEq)]
    struct Boom(u32);

    #[tokio::test]
    async fn run_returns_value_unchanged() {
        let bridge = OffloadBridge::new(2).unwrap();
        let v = bridge.run(|| vec![1, 2, 3]).await.unwrap();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn scheduler_keeps_ticking_while_job_blocks() {
        let bridge = OffloadBridge::new(1).unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));

        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        bridge
            .run(|| thread::sleep(Duration::from_millis(200)))
            .await
            .unwrap();
        ticker.abort();

        assert!(ticks.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn try_run_keeps_original_error() {
        let bridge = OffloadBridge::new(1).unwrap();
        let err = bridge
            .try_run(|| -> std::result::Result<(), Boom> { Err(Boom(7)) })
            .await
            .unwrap_err();
        assert_eq!(err.into_cause(), Some(Boom(7)));
    }

    #[tokio::test]
    async fn more_jobs_than_workers_all_complete_once() {
        let bridge = OffloadBridge::new(2).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..16usize)
            .map(|i| {
                let seen = seen.clone();
                bridge.submit(move || {
                    thread::sleep(Duration::from_millis(5));
                    seen.lock().unwrap().push(i);
                    i
                })
            })
            .collect();

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }

        assert_eq!(results, (0..16).collect::<Vec<_>>());
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn single_worker_completes_in_submission_order() {
        let bridge = OffloadBridge::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5usize)
            .map(|i| {
                let order = order.clone();
                bridge.submit(move || order.lock().unwrap().push(i))
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn panic_is_reported_and_worker_survives() {
        let bridge = OffloadBridge::new(1).unwrap();
        let err = bridge
            .run(|| -> u8 { panic!("kaboom") })
            .await
            .unwrap_err();
        assert!(matches!(err, OffloadError::Panicked(ref m) if m == "kaboom"));

        assert_eq!(bridge.run(|| 5u8).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn deadline_reports_timeout() {
        let bridge = OffloadBridge::new(1).unwrap();
        let err = bridge
            .try_run_with_deadline(Duration::from_millis(20), || {
                thread::sleep(Duration::from_millis(300));
                Ok::<_, Boom>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OffloadError::TimedOut(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn bridge_deadline_applies_to_run() {
        let bridge = OffloadBridge::new(1)
            .unwrap()
            .with_deadline(Duration::from_millis(20));
        let err = bridge
            .run(|| thread::sleep(Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert!(matches!(err, OffloadError::TimedOut(_)));
    }
}
