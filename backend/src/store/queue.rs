//! Write-behind replication of captured opening lines.
//!
//! Captures are committed locally first; this queue carries them to the
//! remote layer on its own schedule. The worker is the only writer to the
//! remote layer and never reports back to the request that enqueued.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::{self, Receiver, Sender, error::SendTimeoutError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::WriteBehindConfig;
use crate::error::AppError;
use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;
use crate::store::remote::RemoteStore;
use crate::store::snapshot::LineSnapshot;

pub type WriteBehindItem = (String, LineSnapshot);

/// Producer side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct WriteBehindQueue {
    tx: Sender<WriteBehindItem>,
    enqueue_timeout: std::time::Duration,
    counters: Counters,
}

impl WriteBehindQueue {
    /// Enqueues a capture for remote replication.
    ///
    /// Waits at most `enqueue_timeout` on a full queue, then gives up with
    /// `QueueSaturated`. The local capture is unaffected either way.
    pub async fn enqueue(&self, key: String, snap: LineSnapshot) -> Result<(), AppError> {
        match self.tx.send_timeout((key, snap), self.enqueue_timeout).await {
            Ok(()) => {
                Counters::incr(&self.counters.queue_enqueued);
                Ok(())
            }
            Err(SendTimeoutError::Timeout((key, _))) | Err(SendTimeoutError::Closed((key, _))) => {
                Counters::incr(&self.counters.queue_dropped);
                Err(AppError::QueueSaturated { key })
            }
        }
    }
}

/// Creates the queue and spawns its single consumer.
///
/// The worker exits after every `WriteBehindQueue` clone is dropped and the
/// remaining backlog has been written.
pub fn spawn_write_behind(
    remote: Arc<dyn RemoteStore>,
    cfg: WriteBehindConfig,
    counters: Counters,
) -> (WriteBehindQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(cfg.capacity.max(1));

    let queue = WriteBehindQueue {
        tx,
        enqueue_timeout: cfg.enqueue_timeout,
        counters: counters.clone(),
    };

    let worker = WriteBehindWorker {
        remote,
        cfg,
        counters,
    };
    let handle = tokio::spawn(worker.run(rx).instrument(info_span!("write_behind")));

    (queue, handle)
}

struct WriteBehindWorker {
    remote: Arc<dyn RemoteStore>,
    cfg: WriteBehindConfig,
    counters: Counters,
}

/// A failed batch parked until its next attempt is due.
struct PendingRetry {
    items: Vec<WriteBehindItem>,
    attempts: u32,
    due: Instant,
}

impl WriteBehindWorker {
    async fn run(self, mut rx: Receiver<WriteBehindItem>) {
        let max_batch = self.cfg.batch_size.max(1);
        let mut retries: VecDeque<PendingRetry> = VecDeque::new();
        let mut open = true;

        info!(
            capacity = self.cfg.capacity,
            batch_size = max_batch,
            "write-behind worker started"
        );

        while open || !retries.is_empty() {
            if open {
                // Wake for the next due retry even when the queue is idle.
                let wait = retries
                    .front()
                    .map(|r| r.due.saturating_duration_since(Instant::now()))
                    .map_or(self.cfg.flush_every, |d| d.min(self.cfg.flush_every));

                match timeout(wait, rx.recv()).await {
                    Ok(Some(item)) => {
                        let mut batch = Vec::with_capacity(max_batch);
                        batch.push(item);
                        while batch.len() < max_batch {
                            match rx.try_recv() {
                                Ok(item) => batch.push(item),
                                Err(_) => break,
                            }
                        }
                        self.attempt(batch, 0, &mut retries).await;
                    }
                    Ok(None) => {
                        open = false;
                        info!(pending_retries = retries.len(), "write-behind queue closed");
                    }
                    Err(_) => {}
                }
            } else if let Some(next) = retries.front() {
                sleep_until(next.due).await;
            }

            let now = Instant::now();
            while retries.front().is_some_and(|r| r.due <= now) {
                let Some(retry) = retries.pop_front() else {
                    break;
                };
                self.attempt(retry.items, retry.attempts, &mut retries).await;
            }
        }

        info!("write-behind worker drained; exiting");
    }

    /// One write of `items`. A failure parks the batch for `retry_backoff`
    /// so the queue keeps draining meanwhile; after `max_attempts` the batch
    /// is dropped.
    async fn attempt(
        &self,
        items: Vec<WriteBehindItem>,
        prior_attempts: u32,
        retries: &mut VecDeque<PendingRetry>,
    ) {
        let attempt = prior_attempts + 1;
        let max_attempts = self.cfg.max_attempts.max(1);

        let res = warn_if_slow(
            "remote_set_if_absent_many",
            std::time::Duration::from_millis(500),
            self.remote.set_if_absent_many(items.as_slice()),
        )
        .await;

        match res {
            Ok(stored) => {
                Counters::add(&self.counters.remote_written, stored);
                debug!(
                    batch = items.len(),
                    stored,
                    already_present = items.len() as u64 - stored.min(items.len() as u64),
                    "write-behind batch replicated"
                );
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    error = ?e,
                    attempt,
                    batch = items.len(),
                    "write-behind batch failed; retrying later"
                );
                retries.push_back(PendingRetry {
                    items,
                    attempts: attempt,
                    due: Instant::now() + self.cfg.retry_backoff,
                });
            }
            Err(e) => {
                error!(
                    error = ?e,
                    attempts = attempt,
                    batch = items.len(),
                    "write-behind batch dropped; remote replica lags"
                );
                Counters::incr(&self.counters.remote_batches_failed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingRemote {
        rows: Mutex<HashMap<String, LineSnapshot>>,
        calls: Mutex<Vec<usize>>,
        fail_first: AtomicU32,
    }

    #[async_trait]
    impl RemoteStore for RecordingRemote {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            Ok(self.rows.lock().get(key).map(|s| s.encode().unwrap()))
        }

        async fn set_if_absent(&self, key: &str, snap: &LineSnapshot) -> anyhow::Result<bool> {
            let mut rows = self.rows.lock();
            if rows.contains_key(key) {
                return Ok(false);
            }
            rows.insert(key.to_string(), *snap);
            Ok(true)
        }

        async fn set_if_absent_many(&self, entries: &[(String, LineSnapshot)]) -> anyhow::Result<u64> {
            self.calls.lock().push(entries.len());
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("remote offline");
            }
            let mut stored = 0;
            for (k, s) in entries {
                if self.set_if_absent(k, s).await? {
                    stored += 1;
                }
            }
            Ok(stored)
        }
    }

    fn cfg() -> WriteBehindConfig {
        WriteBehindConfig {
            capacity: 64,
            batch_size: 4,
            flush_every: Duration::from_millis(20),
            enqueue_timeout: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(5),
            max_attempts: 3,
        }
    }

    fn snap(price: f64) -> LineSnapshot {
        LineSnapshot::new(Some(price), None, 1)
    }

    #[tokio::test]
    async fn drains_everything_and_caps_batch_size() {
        let remote = Arc::new(RecordingRemote::default());
        let counters = Counters::default();
        let (queue, handle) = spawn_write_behind(remote.clone(), cfg(), counters.clone());

        for i in 0..10 {
            queue.enqueue(format!("k{i}"), snap(1.5)).await.unwrap();
        }
        drop(queue);
        handle.await.unwrap();

        assert_eq!(remote.rows.lock().len(), 10);
        assert!(remote.calls.lock().iter().all(|n| *n <= 4));
        assert_eq!(Counters::read(&counters.remote_written), 10);
        assert_eq!(Counters::read(&counters.queue_enqueued), 10);
    }

    #[tokio::test]
    async fn remote_write_never_overwrites_existing_value() {
        let remote = Arc::new(RecordingRemote::default());
        remote.rows.lock().insert("k".into(), snap(1.8));

        let (queue, handle) = spawn_write_behind(remote.clone(), cfg(), Counters::default());
        queue.enqueue("k".into(), snap(2.4)).await.unwrap();
        drop(queue);
        handle.await.unwrap();

        assert_eq!(remote.rows.lock()["k"].price, Some(1.8));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let remote = Arc::new(RecordingRemote::default());
        remote.fail_first.store(2, Ordering::SeqCst);
        let counters = Counters::default();

        let (queue, handle) = spawn_write_behind(remote.clone(), cfg(), counters.clone());
        queue.enqueue("k".into(), snap(1.5)).await.unwrap();
        drop(queue);
        handle.await.unwrap();

        assert_eq!(remote.calls.lock().len(), 3);
        assert!(remote.rows.lock().contains_key("k"));
        assert_eq!(Counters::read(&counters.remote_batches_failed), 0);
    }

    #[tokio::test]
    async fn batch_is_dropped_after_max_attempts() {
        let remote = Arc::new(RecordingRemote::default());
        remote.fail_first.store(10, Ordering::SeqCst);
        let counters = Counters::default();

        let (queue, handle) = spawn_write_behind(remote.clone(), cfg(), counters.clone());
        queue.enqueue("k".into(), snap(1.5)).await.unwrap();
        drop(queue);
        handle.await.unwrap();

        assert_eq!(remote.calls.lock().len(), 3);
        assert!(remote.rows.lock().is_empty());
        assert_eq!(Counters::read(&counters.remote_batches_failed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_keeps_draining_while_a_batch_waits_to_retry() {
        let remote = Arc::new(RecordingRemote::default());
        remote.fail_first.store(1, Ordering::SeqCst);
        let counters = Counters::default();
        let cfg = WriteBehindConfig {
            retry_backoff: Duration::from_secs(5),
            ..cfg()
        };

        let (queue, handle) = spawn_write_behind(remote.clone(), cfg, counters.clone());
        queue.enqueue("first".into(), snap(1.5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        queue.enqueue("second".into(), snap(1.6)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The failed batch is parked; later items are not held behind it.
        assert!(remote.rows.lock().contains_key("second"));
        assert!(!remote.rows.lock().contains_key("first"));

        drop(queue);
        handle.await.unwrap();

        assert!(remote.rows.lock().contains_key("first"));
        assert_eq!(Counters::read(&counters.remote_written), 2);
        assert_eq!(Counters::read(&counters.remote_batches_failed), 0);
    }

    #[tokio::test]
    async fn full_queue_skips_enqueue_after_bound() {
        // No consumer: the receiver is held but never polled.
        let (tx, _rx) = mpsc::channel(1);
        let counters = Counters::default();
        let queue = WriteBehindQueue {
            tx,
            enqueue_timeout: Duration::from_millis(5),
            counters: counters.clone(),
        };

        queue.enqueue("a".into(), snap(1.5)).await.unwrap();
        let err = queue.enqueue("b".into(), snap(1.5)).await.unwrap_err();

        assert!(matches!(err, AppError::QueueSaturated { ref key } if key == "b"));
        assert_eq!(Counters::read(&counters.queue_dropped), 1);
    }
}
