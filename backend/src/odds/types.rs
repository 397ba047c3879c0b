use serde::{Deserialize, Serialize};

pub type EventList = Vec<Event>;

/// One fixture as returned by `GET /sports/{sport}/odds`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub sport_key: String,
    /// RFC 3339 kickoff, e.g. `2025-06-01T23:05:00Z`.
    #[serde(default)]
    pub commence_time: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    #[serde(default)]
    pub bookmakers: Vec<Bookmaker>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Bookmaker {
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub markets: Vec<Market>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Market {
    pub key: String,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

/// A selectable outcome. Prices are decimal odds.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Outcome {
    pub name: String,
    pub price: Option<f64>,
    pub point: Option<f64>,
}

impl Event {
    pub fn bookmaker(&self, key: &str) -> Option<&Bookmaker> {
        self.bookmakers.iter().find(|b| b.key == key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Moneyline,
    Spread,
    Total,
}

impl MarketType {
    /// Maps an upstream market key. Unsupported markets yield `None`.
    pub fn from_api_key(key: &str) -> Option<Self> {
        match key {
            "h2h" => Some(Self::Moneyline),
            "spreads" => Some(Self::Spread),
            "totals" => Some(Self::Total),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Moneyline => "moneyline",
            Self::Spread => "spread",
            Self::Total => "total",
        }
    }

    /// Spread and total markets drift on the line, not the price.
    pub fn is_point_based(&self) -> bool {
        matches!(self, Self::Spread | Self::Total)
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct CatalogEntry {
    pub key: &'static str,
    pub title: &'static str,
}

pub const SPORTS: &[CatalogEntry] = &[
    CatalogEntry { key: "baseball_mlb", title: "MLB" },
    CatalogEntry { key: "mma_mixed_martial_arts", title: "MMA" },
    CatalogEntry { key: "basketball_wnba", title: "WNBA" },
    CatalogEntry { key: "americanfootball_nfl", title: "NFL" },
    CatalogEntry { key: "americanfootball_ncaaf", title: "NCAAF" },
];

pub const BOOKMAKERS: &[CatalogEntry] = &[
    CatalogEntry { key: "betonlineag", title: "BetOnlineAg" },
    CatalogEntry { key: "draftkings", title: "DraftKings" },
    CatalogEntry { key: "fanduel", title: "FanDuel" },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_provider_payload_and_ignores_unknown_fields() {
        let raw = r#"[{
            "id": "e1",
            "sport_key": "americanfootball_nfl",
            "sport_title": "NFL",
            "commence_time": "2025-09-07T17:00:00Z",
            "home_team": "Chicago Bears",
            "away_team": "Green Bay Packers",
            "bookmakers": [{
                "key": "draftkings",
                "title": "DraftKings",
                "last_update": "2025-09-01T10:00:00Z",
                "markets": [
                    {"key": "h2h", "outcomes": [{"name": "Chicago Bears", "price": 2.1}]},
                    {"key": "spreads", "outcomes": [{"name": "Chicago Bears", "price": 1.91, "point": 3.5}]}
                ]
            }]
        }]"#;

        let events: EventList = serde_json::from_str(raw).unwrap();
        assert_eq!(events.len(), 1);

        let bk = events[0].bookmaker("draftkings").unwrap();
        assert_eq!(bk.markets.len(), 2);
        assert_eq!(bk.markets[1].outcomes[0].point, Some(3.5));
        assert!(events[0].bookmaker("fanduel").is_none());
    }

    #[test]
    fn market_keys_map_to_market_types() {
        assert_eq!(MarketType::from_api_key("h2h"), Some(MarketType::Moneyline));
        assert_eq!(MarketType::from_api_key("spreads"), Some(MarketType::Spread));
        assert_eq!(MarketType::from_api_key("totals"), Some(MarketType::Total));
        assert_eq!(MarketType::from_api_key("outrights"), None);
        assert!(!MarketType::Moneyline.is_point_based());
        assert!(MarketType::Total.is_point_based());
    }
}
