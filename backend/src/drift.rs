//! Opening-vs-live comparison for a single selection.
//!
//! Pure and infallible: a missing operand produces a neutral zero drift.

use serde::Serialize;

use crate::odds::MarketType;
use crate::store::key::SelectionKey;
use crate::store::snapshot::{LiveSnapshot, OpeningSnapshot};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DriftRecord {
    pub key: SelectionKey,
    pub open: OpeningSnapshot,
    pub live: LiveSnapshot,
    /// American-odds display form of the opening price, e.g. `"+110"`.
    pub open_american: Option<String>,
    pub live_american: Option<String>,
    /// `round((live - open) * 100)` on decimal prices.
    pub price_diff: Option<i64>,
    /// `round(live - open, 1)` on lines; point-based markets only.
    pub point_diff: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftDirection {
    Up,
    Down,
    Flat,
}

impl DriftRecord {
    /// Direction the line moved. Moneyline follows the price; spread and
    /// total follow the point.
    pub fn direction(&self) -> DriftDirection {
        let delta = if self.key.market().is_point_based() {
            self.point_diff.unwrap_or(0.0)
        } else {
            self.price_diff.unwrap_or(0) as f64
        };

        if delta > 0.0 {
            DriftDirection::Up
        } else if delta < 0.0 {
            DriftDirection::Down
        } else {
            DriftDirection::Flat
        }
    }
}

pub fn compute_drift(key: SelectionKey, open: OpeningSnapshot, live: LiveSnapshot) -> DriftRecord {
    let market = key.market();

    let price_diff = Some(match (open.price, live.price) {
        (Some(o), Some(l)) => ((l - o) * 100.0).round() as i64,
        _ => 0,
    });

    let point_diff = match market {
        MarketType::Moneyline => None,
        MarketType::Spread | MarketType::Total => Some(match (open.point, live.point) {
            (Some(o), Some(l)) => round1(l - o),
            _ => 0.0,
        }),
    };

    DriftRecord {
        open_american: open.price.and_then(format_american),
        live_american: live.price.and_then(format_american),
        key,
        open,
        live,
        price_diff,
        point_diff,
    }
}

/// Decimal odds to American odds. Prices at or below 1.0 have no American
/// equivalent.
pub fn decimal_to_american(decimal: f64) -> Option<i64> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return None;
    }
    if decimal >= 2.0 {
        Some(((decimal - 1.0) * 100.0).round() as i64)
    } else {
        Some(-(100.0 / (decimal - 1.0)).round() as i64)
    }
}

pub fn format_american(decimal: f64) -> Option<String> {
    decimal_to_american(decimal).map(|v| {
        if v >= 0 {
            format!("+{v}")
        } else {
            v.to_string()
        }
    })
}

fn round1(v: f64) -> f64 {
    let r = (v * 10.0).round() / 10.0;
    // avoid "-0.0" in payloads
    if r == 0.0 { 0.0 } else { r }
}
