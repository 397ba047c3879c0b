use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    // freshness cache
    pub cache_hits: Arc<AtomicU64>,
    pub cache_misses: Arc<AtomicU64>,

    // opening line reads, by the layer that answered
    pub local_hits: Arc<AtomicU64>,
    pub file_hits: Arc<AtomicU64>,
    pub remote_hits: Arc<AtomicU64>,
    pub misses: Arc<AtomicU64>,

    // capture outcomes
    pub captures: Arc<AtomicU64>,
    pub capture_conflicts: Arc<AtomicU64>,

    // degradations
    pub malformed: Arc<AtomicU64>,
    pub remote_read_errors: Arc<AtomicU64>,

    // write-behind
    pub queue_enqueued: Arc<AtomicU64>,
    pub queue_dropped: Arc<AtomicU64>,
    pub remote_written: Arc<AtomicU64>,
    pub remote_batches_failed: Arc<AtomicU64>,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
