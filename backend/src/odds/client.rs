use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::odds::LiveDataSource;
use crate::odds::errors::OddsApiError;
use crate::odds::types::EventList;

#[derive(Clone)]
pub struct OddsApiClient {
    http: Client,
    url: String,
    api_key: String,
    regions: String,
    markets: String,
}

impl OddsApiClient {
    pub fn new(
        url: String,
        api_key: String,
        regions: String,
        markets: &[String],
    ) -> Result<Self, OddsApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            regions,
            markets: markets.join(","),
        })
    }
}

#[async_trait]
impl LiveDataSource for OddsApiClient {
    #[instrument(skip(self), level = "debug")]
    async fn fetch_live(&self, sport: &str, bookmaker: &str) -> Result<EventList, OddsApiError> {
        let url = format!("{}/sports/{}/odds", self.url, sport);

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("regions", self.regions.as_str()),
                ("markets", self.markets.as_str()),
                ("bookmakers", bookmaker),
                ("oddsFormat", "decimal"),
                ("apiKey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS => return Err(OddsApiError::RateLimited),
            s => return Err(OddsApiError::Status(s.as_u16())),
        }

        let body = resp.text().await?;
        let events: EventList = serde_json::from_str(&body)
            .map_err(|e| OddsApiError::InvalidResponse(e.to_string()))?;

        debug!(events = events.len(), "odds fetched");

        Ok(events)
    }
}
