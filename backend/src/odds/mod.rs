pub mod client;
pub mod errors;
pub mod types;

use async_trait::async_trait;

pub use client::OddsApiClient;
pub use errors::OddsApiError;
pub use types::*;

/// The rate-limited upstream feed of live odds.
#[async_trait]
pub trait LiveDataSource: Send + Sync + 'static {
    async fn fetch_live(&self, sport: &str, bookmaker: &str) -> Result<EventList, OddsApiError>;
}
