use std::sync::Arc;

use openline::{
    config::AppConfig,
    db::Db,
    freshness::FreshnessCache,
    logger::init_tracing,
    metrics::counters::Counters,
    odds::OddsApiClient,
    report::DriftReporter,
    store::{DurableFile, OpeningLineStore, RemoteStore, SqlxRemoteStore, spawn_write_behind},
};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Builds the opening line store from config. When a remote layer is
/// configured, also returns the write-behind worker handle.
async fn init_store(
    cfg: &AppConfig,
    counters: &Counters,
) -> anyhow::Result<(OpeningLineStore, Option<JoinHandle<()>>)> {
    let mut store = OpeningLineStore::new(counters.clone());

    if let Some(path) = &cfg.opening_file {
        store = store.with_file(DurableFile::open(path, cfg.file_refresh).await?);
    }

    let Some(url) = &cfg.remote_store_url else {
        tracing::info!("no remote store configured; opening lines stay on this instance");
        return Ok((store, None));
    };

    let worker = match connect_remote(url).await {
        Ok(remote) => {
            let (queue, worker) =
                spawn_write_behind(remote.clone(), cfg.write_behind.clone(), counters.clone());
            store = store.with_remote(remote, queue, cfg.remote_read_timeout);
            Some(worker)
        }
        Err(e) => {
            // Remote is best-effort; run on local layers.
            tracing::warn!(error = ?e, "remote store unreachable at startup; running local-only");
            None
        }
    };

    Ok((store, worker))
}

async fn connect_remote(url: &str) -> anyhow::Result<Arc<dyn RemoteStore>> {
    let db = Db::connect(url).await?;
    db.migrate().await?;
    Ok(Arc::new(SqlxRemoteStore::new(db.pool, db.dialect)))
}

/// Keeps one sport warm for the default bookmaker, capturing opening lines
/// as soon as they appear upstream.
fn start_poll_loop(
    reporter: Arc<DriftReporter>,
    sport: String,
    bookmaker: String,
    cfg: &AppConfig,
) -> JoinHandle<()> {
    let every = cfg.poll_interval;

    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            match reporter.report(&sport, &bookmaker).await {
                Ok(events) => {
                    tracing::debug!(sport = %sport, events = events.len(), "poll complete");
                }
                Err(e) => {
                    tracing::error!(error = %e, sport = %sport, "poll failed");
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting openline...");

    let cfg = AppConfig::from_env();
    let counters = Counters::default();

    let (store, worker) = init_store(&cfg, &counters).await?;
    let store = Arc::new(store);

    let client = OddsApiClient::new(
        cfg.odds_api_url.clone(),
        cfg.odds_api_key.clone(),
        cfg.odds_regions.clone(),
        &cfg.odds_markets,
    )?;
    let cache = Arc::new(FreshnessCache::new(
        Arc::new(client),
        cfg.freshness_ttl_secs,
        counters.clone(),
    ));

    let reporter = Arc::new(DriftReporter::new(cache, Arc::clone(&store)));

    let pollers: Vec<JoinHandle<()>> = cfg
        .sports
        .iter()
        .map(|sport| {
            start_poll_loop(
                Arc::clone(&reporter),
                sport.clone(),
                cfg.default_bookmaker.clone(),
                &cfg,
            )
        })
        .collect();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    for poller in &pollers {
        poller.abort();
    }
    for poller in pollers {
        let _ = poller.await;
    }

    if let Err(e) = store.flush().await {
        tracing::error!(error = %e, "final opening file flush failed");
    }

    // Dropping the last store handle closes the write-behind queue.
    drop(reporter);
    drop(store);
    if let Some(worker) = worker {
        if tokio::time::timeout(std::time::Duration::from_secs(10), worker)
            .await
            .is_err()
        {
            tracing::warn!("write-behind worker did not drain in time");
        }
    }

    tracing::info!(
        captures = Counters::read(&counters.captures),
        remote_written = Counters::read(&counters.remote_written),
        "openline stopped"
    );

    Ok(())
}
