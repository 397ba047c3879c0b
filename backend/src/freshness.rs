use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::AppError;
use crate::metrics::counters::Counters;
use crate::odds::{EventList, LiveDataSource};
use crate::time::now_secs;

#[derive(Clone)]
struct CacheEntry {
    data: Arc<EventList>,
    fetched_at: i64,
}

/// Short-TTL memoization of upstream fetches, keyed by (sport, bookmaker).
///
/// Entries are replaced wholesale once expired; failed fetches are never
/// cached.
pub struct FreshnessCache {
    source: Arc<dyn LiveDataSource>,
    ttl_secs: i64,
    entries: Mutex<HashMap<(String, String), CacheEntry>>,
    counters: Counters,
}

impl FreshnessCache {
    pub fn new(source: Arc<dyn LiveDataSource>, ttl_secs: i64, counters: Counters) -> Self {
        Self {
            source,
            ttl_secs,
            entries: Mutex::new(HashMap::new()),
            counters,
        }
    }

    /// Serves the cached event list for (sport, bookmaker) or fetches a new one.
    #[instrument(skip(self))]
    pub async fn get_or_fetch(
        &self,
        sport: &str,
        bookmaker: &str,
    ) -> Result<Arc<EventList>, AppError> {
        let cache_key = (sport.to_string(), bookmaker.to_string());
        let now = now_secs();

        let cached = self.entries.lock().get(&cache_key).cloned();
        if let Some(entry) = cached {
            if now - entry.fetched_at < self.ttl_secs {
                Counters::incr(&self.counters.cache_hits);
                debug!(age_secs = now - entry.fetched_at, "freshness cache hit");
                return Ok(entry.data);
            }
        }

        Counters::incr(&self.counters.cache_misses);

        let data = Arc::new(self.source.fetch_live(sport, bookmaker).await?);

        self.entries.lock().insert(
            cache_key,
            CacheEntry {
                data: Arc::clone(&data),
                fetched_at: now_secs(),
            },
        );

        debug!(events = data.len(), "freshness cache refilled");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odds::{Event, OddsApiError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LiveDataSource for CountingSource {
        async fn fetch_live(&self, sport: &str, _: &str) -> Result<EventList, OddsApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OddsApiError::RateLimited);
            }
            Ok(vec![Event {
                id: "e1".into(),
                sport_key: sport.into(),
                commence_time: "2025-06-01T23:05:00Z".into(),
                home_team: Some("Home".into()),
                away_team: Some("Away".into()),
                bookmakers: vec![],
            }])
        }
    }

    fn source(fail: bool) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn serves_from_cache_within_ttl() {
        let src = source(false);
        let cache = FreshnessCache::new(src.clone(), 60, Counters::default());

        cache.get_or_fetch("baseball_mlb", "draftkings").await.unwrap();
        cache.get_or_fetch("baseball_mlb", "draftkings").await.unwrap();

        assert_eq!(src.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_is_keyed_by_sport_and_bookmaker() {
        let src = source(false);
        let cache = FreshnessCache::new(src.clone(), 60, Counters::default());

        cache.get_or_fetch("baseball_mlb", "draftkings").await.unwrap();
        cache.get_or_fetch("baseball_mlb", "fanduel").await.unwrap();
        cache.get_or_fetch("basketball_wnba", "draftkings").await.unwrap();

        assert_eq!(src.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let src = source(false);
        let cache = FreshnessCache::new(src.clone(), 0, Counters::default());

        cache.get_or_fetch("baseball_mlb", "draftkings").await.unwrap();
        cache.get_or_fetch("baseball_mlb", "draftkings").await.unwrap();

        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_surface_and_are_not_cached() {
        let src = source(true);
        let cache = FreshnessCache::new(src.clone(), 60, Counters::default());

        let err = cache.get_or_fetch("baseball_mlb", "draftkings").await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamUnavailable(OddsApiError::RateLimited)));

        let _ = cache.get_or_fetch("baseball_mlb", "draftkings").await;
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
    }
}
