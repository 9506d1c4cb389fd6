//! Per-cluster work queue.
//!
//! Every mutating operation on a DataCenter (a reconciliation pass or a task
//! step) runs as a unit submitted under the DataCenter's [`ClusterKey`]:
//!
//! - at most one unit runs per key at any time
//! - units of one key run in submission order
//! - units of different keys run concurrently, bounded by the pool size
//!
//! A failed unit is logged and handed back to the submitter. It is never
//! retried here; the next watch event or requeue triggers a fresh attempt.

use crate::error::{OperatorError, OperatorResult};
use crate::names::ClusterKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Semaphore, mpsc, oneshot};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Inner {
    queues: Mutex<HashMap<ClusterKey, mpsc::UnboundedSender<Job>>>,
    permits: Arc<Semaphore>,
}

/// Serializes units per cluster key on a bounded worker pool.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

/// Resolves to the result of a submitted unit.
pub struct UnitHandle<T> {
    key: ClusterKey,
    description: String,
    rx: oneshot::Receiver<OperatorResult<T>>,
}

impl<T> UnitHandle<T> {
    /// Wait for the unit to finish.
    pub async fn result(self) -> OperatorResult<T> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(OperatorError::Unit {
                key: self.key.to_string(),
                description: self.description,
                cause: "unit dropped before completion".into(),
            }),
        }
    }
}

impl WorkQueue {
    /// Queue running at most `pool_size` units at once across all keys.
    pub fn new(pool_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(pool_size.max(1))),
            }),
        }
    }

    /// Number of keys with queued or running units.
    pub fn active_keys(&self) -> usize {
        self.inner.queues.lock().len()
    }

    /// Queue `unit` behind every unit already submitted for `key`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit<T, F>(
        &self,
        key: ClusterKey,
        description: impl Into<String>,
        unit: F,
    ) -> UnitHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = OperatorResult<T>> + Send + 'static,
    {
        let description = description.into();
        let (tx, rx) = oneshot::channel();

        let job_key = key.clone();
        let job_description = description.clone();
        let job: Job = Box::pin(async move {
            let result = match tokio::spawn(unit).await {
                Ok(result) => result,
                Err(e) => Err(OperatorError::Unit {
                    key: job_key.to_string(),
                    description: job_description.clone(),
                    cause: if e.is_panic() {
                        "unit panicked".to_string()
                    } else {
                        e.to_string()
                    },
                }),
            };
            if let Err(e) = &result {
                tracing::error!(
                    key = %job_key,
                    unit = %job_description,
                    error = %e,
                    "Work unit failed"
                );
            }
            let _ = tx.send(result);
        });

        self.enqueue(key.clone(), job);

        UnitHandle {
            key,
            description,
            rx,
        }
    }

    fn enqueue(&self, key: ClusterKey, job: Job) {
        let mut queues = self.inner.queues.lock();

        let job = match queues.get(&key) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                // drainer is gone without deregistering; start a new one
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        // cannot fail, the receiver is alive
        let _ = sender.send(job);
        queues.insert(key.clone(), sender);
        drop(queues);

        tracing::debug!(key = %key, "Starting work queue drainer");
        tokio::spawn(drain(self.inner.clone(), key, receiver));
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(16)
    }
}

async fn drain(inner: Arc<Inner>, key: ClusterKey, mut receiver: mpsc::UnboundedReceiver<Job>) {
    loop {
        let job = match receiver.try_recv() {
            Ok(job) => job,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                // Re-check under the lock so a concurrent submit either lands
                // in this receiver or starts a new drainer.
                let mut queues = inner.queues.lock();
                match receiver.try_recv() {
                    Ok(job) => job,
                    Err(_) => {
                        queues.remove(&key);
                        tracing::debug!(key = %key, "Work queue drainer idle, exiting");
                        return;
                    }
                }
            }
        };

        let permit = match inner.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        job.await;
        drop(permit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn returns_unit_result() {
        let queue = WorkQueue::new(2);
        let handle = queue.submit(ClusterKey::new("db", "dc1"), "answer", async { Ok(42) });
        assert_eq!(handle.result().await.expect("result"), 42);
    }

    #[tokio::test]
    async fn panic_becomes_unit_error() {
        let queue = WorkQueue::new(2);
        let handle = queue.submit(ClusterKey::new("db", "dc1"), "boom", async {
            if true {
                panic!("boom");
            }
            Ok(())
        });

        let err = handle.result().await.expect_err("panic should surface as error");
        assert!(matches!(err, OperatorError::Unit { .. }));
        assert!(err.to_string().contains("panicked"));

        let next = queue.submit(ClusterKey::new("db", "dc1"), "after", async { Ok(1) });
        assert_eq!(next.result().await.expect("queue keeps draining"), 1);
    }

    #[tokio::test]
    async fn same_key_units_run_in_order() {
        let queue = WorkQueue::new(4);
        let order = Arc::new(Mutex::new(Vec::new()));
        let key = ClusterKey::new("db", "dc1");

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = order.clone();
                queue.submit(key.clone(), format!("unit-{i}"), async move {
                    tokio::time::sleep(Duration::from_millis(5 * (5 - i) as u64)).await;
                    order.lock().push(i);
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.result().await.expect("unit");
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn drainer_exits_when_idle() {
        let queue = WorkQueue::new(1);
        queue
            .submit(ClusterKey::new("db", "dc1"), "one", async { Ok(()) })
            .result()
            .await
            .expect("unit");

        for _ in 0..50 {
            if queue.active_keys() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(queue.active_keys(), 0);
    }

    #[tokio::test]
    async fn pool_size_bounds_concurrency() {
        let queue = WorkQueue::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let running = running.clone();
                let max_seen = max_seen.clone();
                queue.submit(ClusterKey::new("db", format!("dc{i}")), "work", async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.result().await.expect("unit");
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn distinct_keys_run_concurrently() {
        let queue = WorkQueue::new(4);
        // each unit only finishes once the other one is running too
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let handles: Vec<_> = ["dc1", "dc2"]
            .into_iter()
            .map(|name| {
                let barrier = barrier.clone();
                queue.submit(ClusterKey::new("db", name), "work", async move {
                    tokio::time::timeout(Duration::from_secs(5), barrier.wait())
                        .await
                        .map(|_| ())
                        .map_err(|_| OperatorError::InvalidConfig("units did not overlap".into()))
                })
            })
            .collect();

        for handle in handles {
            handle.result().await.expect("units overlap");
        }
    }
}
