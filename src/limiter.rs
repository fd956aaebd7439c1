//! Bounded parallel execution with FIFO queueing.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Caps the number of futures executing at once. Callers past the cap
/// queue and resume in FIFO order (tokio's semaphore is fair). A failing
/// or panicking task releases its slot on drop, so it never consumes a
/// future slot.
#[derive(Clone)]
pub(crate) struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyLimiter {
    pub(crate) fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Runs `fut` once a slot is available.
    pub(crate) async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("limiter semaphore closed");
        fut.await
    }

    pub(crate) fn max(&self) -> usize {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn caps_parallelism_and_batches_work() {
        let limiter = ConcurrencyLimiter::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let start = tokio::time::Instant::now();
        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let limiter = limiter.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    limiter
                        .run(async {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        // ceil(5/2) = 3 batches of ~50ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(400), "elapsed {:?}", elapsed);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_task_frees_its_slot() {
        let limiter = ConcurrencyLimiter::new(1);
        let handle = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .run(async {
                        panic!("task failure");
                    })
                    .await
            })
        };
        assert!(handle.await.is_err());
        // the slot must be usable again
        let value = limiter.run(async { 42 }).await;
        assert_eq!(value, 42);
        assert_eq!(limiter.max(), 1);
    }
}
