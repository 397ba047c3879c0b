use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::odds::{BOOKMAKERS, SPORTS};

#[derive(Clone, Debug)]
pub struct AppConfig {
    // =========================
    // Upstream provider
    // =========================
    /// Base URL of the odds provider (without trailing slash).
    pub odds_api_url: String,

    /// API key appended to every upstream request.
    pub odds_api_key: String,

    /// Region filter passed through to the provider.
    pub odds_regions: String,

    /// Upstream market keys requested on every fetch.
    pub odds_markets: Vec<String>,

    /// Bookmaker used when a request names none.
    pub default_bookmaker: String,

    /// Sports the binary keeps warm.
    pub sports: Vec<String>,

    /// Cadence of the binary's per-sport refresh loop.
    pub poll_interval: Duration,

    // =========================
    // Freshness cache
    // =========================
    /// How long a fetched event list is served before the provider is asked again.
    ///
    /// The provider is rate-limited; bursts of requests for the same
    /// (sport, bookmaker) inside this window never reach it.
    pub freshness_ttl_secs: i64,

    // =========================
    // Opening line store
    // =========================
    /// Local durable file. `None` keeps captures process-local only.
    pub opening_file: Option<PathBuf>,

    /// Minimum spacing between checks of the file's modification time.
    pub file_refresh: Duration,

    /// Remote layer database URL. `None` disables the remote layer and
    /// the write-behind worker.
    pub remote_store_url: Option<String>,

    /// Budget for a single remote read. A timeout is treated as a miss.
    pub remote_read_timeout: Duration,

    pub write_behind: WriteBehindConfig,
}

/// Tuning for the write-behind worker that replicates captures remotely.
#[derive(Clone, Debug)]
pub struct WriteBehindConfig {
    /// Queue bound. Once full, producers wait at most `enqueue_timeout`.
    pub capacity: usize,

    /// Max keys handed to one remote set-if-absent call.
    pub batch_size: usize,

    /// Periodic wake of the worker when the queue is idle.
    pub flush_every: Duration,

    /// Longest a producer blocks on a full queue before the write is skipped.
    ///
    /// A skipped write is still captured locally; only the remote replica lags.
    pub enqueue_timeout: Duration,

    /// Fixed sleep between attempts of a failing batch.
    pub retry_backoff: Duration,

    /// Attempts per batch before it is dropped and logged.
    pub max_attempts: u32,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            batch_size: 500,
            flush_every: Duration::from_millis(500),
            enqueue_timeout: Duration::from_millis(50),
            retry_backoff: Duration::from_millis(1_000),
            max_attempts: 3,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let opening_file = std::env::var("OPENING_FILE")
            .unwrap_or_else(|_| "odds_log.json".to_string());
        let opening_file = (!opening_file.trim().is_empty()).then(|| PathBuf::from(opening_file));

        let remote_store_url = std::env::var("REMOTE_STORE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let defaults = WriteBehindConfig::default();

        let default_bookmaker = std::env::var("DEFAULT_BOOKMAKER")
            .map(|b| b.trim().to_lowercase())
            .unwrap_or_else(|_| "draftkings".to_string());
        if !is_known_bookmaker(&default_bookmaker) {
            warn!(bookmaker = %default_bookmaker, "default bookmaker is not in the catalogue");
        }

        Self {
            odds_api_url: std::env::var("ODDS_API_URL")
                .unwrap_or_else(|_| "https://api.the-odds-api.com/v4".to_string()),
            odds_api_key: std::env::var("THE_ODDS_API_KEY").unwrap_or_default(),
            odds_regions: std::env::var("ODDS_REGIONS").unwrap_or_else(|_| "us".to_string()),
            odds_markets: env_list("ODDS_MARKETS").unwrap_or_else(|| {
                ["h2h", "spreads", "totals"].map(str::to_string).to_vec()
            }),
            default_bookmaker,
            sports: env_list("SPORTS").unwrap_or_else(catalogue_sports),
            poll_interval: Duration::from_secs(env_or("POLL_INTERVAL_SECS", 60)),

            freshness_ttl_secs: env_or("FRESHNESS_TTL_SECS", 30),

            opening_file,
            file_refresh: Duration::from_secs(env_or("FILE_REFRESH_SECS", 30)),
            remote_store_url,
            remote_read_timeout: Duration::from_millis(env_or("REMOTE_READ_TIMEOUT_MS", 2_000)),

            write_behind: WriteBehindConfig {
                capacity: env_or("WRITE_BEHIND_CAPACITY", defaults.capacity),
                batch_size: env_or("WRITE_BEHIND_BATCH", defaults.batch_size),
                flush_every: Duration::from_millis(env_or("WRITE_BEHIND_FLUSH_MS", 500)),
                enqueue_timeout: Duration::from_millis(env_or("WRITE_BEHIND_ENQUEUE_MS", 50)),
                retry_backoff: Duration::from_millis(env_or("WRITE_BEHIND_RETRY_MS", 1_000)),
                max_attempts: env_or("WRITE_BEHIND_ATTEMPTS", defaults.max_attempts),
            },
        }
    }
}

/// Parses `name` into `T`, falling back to `default` when unset or invalid.
fn env_or<T: FromStr + Copy + std::fmt::Debug>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(var = name, value = %raw, ?default, "invalid config value; using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Comma-separated list; `None` when unset or empty.
fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Every sport in the catalogue, in catalogue order.
pub fn catalogue_sports() -> Vec<String> {
    SPORTS.iter().map(|s| s.key.to_string()).collect()
}

pub fn is_known_bookmaker(key: &str) -> bool {
    BOOKMAKERS.iter().any(|b| b.key == key)
}
