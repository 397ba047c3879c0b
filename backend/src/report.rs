//! Per-request orchestration: live odds in, opening-vs-live drift out.
//!
//! Data flow:
//! FreshnessCache → keys → OpeningLineStore (batch read, capture misses)
//! → drift → EventReport

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Instrument, debug, info, warn};

use crate::drift::{DriftRecord, compute_drift};
use crate::error::AppError;
use crate::freshness::FreshnessCache;
use crate::logger::{TraceId, request_span};
use crate::odds::{Event, MarketType};
use crate::store::{LineSnapshot, OpeningLineStore, SelectionKey};
use crate::time::now_secs;

/// One fixture with drift per market type per selection.
#[derive(Clone, Debug, Serialize)]
pub struct EventReport {
    pub event_id: String,
    pub matchup: String,
    pub home_team: String,
    pub away_team: String,
    /// Kickoff as sent by the provider.
    pub commence_time: String,
    /// Parsed kickoff; `None` when the provider's timestamp is unparsable.
    pub kickoff: Option<DateTime<Utc>>,
    pub markets: BTreeMap<MarketType, Vec<DriftRecord>>,
}

/// A selection observed in the current fetch.
struct Observed {
    key: SelectionKey,
    live: LineSnapshot,
}

pub struct DriftReporter {
    cache: Arc<FreshnessCache>,
    store: Arc<OpeningLineStore>,
}

impl DriftReporter {
    pub fn new(cache: Arc<FreshnessCache>, store: Arc<OpeningLineStore>) -> Self {
        Self { cache, store }
    }

    pub fn store(&self) -> &Arc<OpeningLineStore> {
        &self.store
    }

    /// Builds the drift report for one (sport, bookmaker) request.
    ///
    /// Only an upstream failure is returned as an error, and in that case
    /// the store is left untouched.
    pub async fn report(&self, sport: &str, bookmaker: &str) -> Result<Vec<EventReport>, AppError> {
        let span = request_span(&TraceId::default(), sport, bookmaker);
        self.report_inner(sport, bookmaker).instrument(span).await
    }

    async fn report_inner(
        &self,
        sport: &str,
        bookmaker: &str,
    ) -> Result<Vec<EventReport>, AppError> {
        let events = self.cache.get_or_fetch(sport, bookmaker).await?;
        let now = now_secs();

        // Events usable for this bookmaker, with their observed selections.
        let mut fixtures: Vec<(&Event, String, String, Vec<Observed>)> = Vec::new();
        for event in events.iter() {
            let (Some(home), Some(away)) = (event.home_team.as_ref(), event.away_team.as_ref())
            else {
                debug!(event_id = %event.id, "skipping event without both teams");
                continue;
            };
            let Some(book) = event.bookmaker(bookmaker) else {
                continue;
            };

            let mut observed = Vec::new();
            for market in &book.markets {
                let Some(market_type) = MarketType::from_api_key(&market.key) else {
                    continue;
                };
                for outcome in &market.outcomes {
                    let point = if market_type.is_point_based() {
                        outcome.point
                    } else {
                        None
                    };
                    let key = SelectionKey::new(sport, &event.id, market_type, &outcome.name, bookmaker);
                    let live = LineSnapshot::new(outcome.price, point, now);

                    // An unpriced or invalid quote can neither open a line nor be compared.
                    if outcome.price.is_none() || live.validate(key.as_str()).is_err() {
                        debug!(key = %key, "skipping selection without a valid price");
                        continue;
                    }
                    observed.push(Observed { key, live });
                }
            }

            fixtures.push((event, home.clone(), away.clone(), observed));
        }

        let keys: Vec<SelectionKey> = fixtures
            .iter()
            .flat_map(|(_, _, _, obs)| obs.iter().map(|o| o.key.clone()))
            .collect();

        let mut openings = self.store.batch_get(&keys).await;

        let mut captured = 0usize;
        for (_, _, _, obs) in &fixtures {
            for o in obs {
                if matches!(openings.get(&o.key), Some(Some(_))) {
                    continue;
                }
                if self.store.set_if_absent(&o.key, o.live).await {
                    captured += 1;
                }
                // Whoever won the capture, read back the value that is kept.
                let kept = self.store.get(&o.key).await.unwrap_or(o.live);
                openings.insert(o.key.clone(), Some(kept));
            }
        }

        let mut reports: Vec<EventReport> = fixtures
            .into_iter()
            .map(|(event, home, away, obs)| {
                let mut markets: BTreeMap<MarketType, Vec<DriftRecord>> = BTreeMap::new();
                for o in obs {
                    let open = openings
                        .get(&o.key)
                        .copied()
                        .flatten()
                        .unwrap_or(o.live);
                    markets
                        .entry(o.key.market())
                        .or_default()
                        .push(compute_drift(o.key, open, o.live));
                }

                EventReport {
                    event_id: event.id.clone(),
                    matchup: format!("{home} vs {away}"),
                    home_team: home,
                    away_team: away,
                    commence_time: event.commence_time.clone(),
                    kickoff: parse_kickoff(&event.commence_time),
                    markets,
                }
            })
            .collect();

        sort_by_kickoff(&mut reports);

        if let Err(e) = self.store.flush().await {
            warn!(error = %e, "opening file flush failed; captures kept in memory");
        }

        info!(
            events = reports.len(),
            selections = keys.len(),
            captured,
            "drift report built"
        );

        Ok(reports)
    }
}

fn parse_kickoff(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Earliest kickoff first; unparsable kickoffs last, in their original order.
pub fn sort_by_kickoff(reports: &mut [EventReport]) {
    reports.sort_by_key(|r| (r.kickoff.is_none(), r.kickoff));
}
