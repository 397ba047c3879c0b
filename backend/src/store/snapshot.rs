use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A priced observation of one selection.
///
/// `price` is decimal odds; `point` is only present for spread and total
/// markets.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineSnapshot {
    pub price: Option<f64>,
    pub point: Option<f64>,
    pub captured_at: i64,
}

/// The first snapshot ever captured for a key. Never changes once stored.
pub type OpeningSnapshot = LineSnapshot;

/// The snapshot derived from the most recent fetch.
pub type LiveSnapshot = LineSnapshot;

impl LineSnapshot {
    pub fn new(price: Option<f64>, point: Option<f64>, captured_at: i64) -> Self {
        Self {
            price,
            point,
            captured_at,
        }
    }

    /// Strict decode of a stored payload. Anything that is not a well-formed
    /// snapshot is rejected, and callers treat the key as absent.
    pub fn decode(key: &str, raw: &str) -> Result<Self, AppError> {
        let snap: LineSnapshot =
            serde_json::from_str(raw).map_err(|e| AppError::MalformedSnapshot {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        snap.validate(key)?;
        Ok(snap)
    }

    /// Same as [`LineSnapshot::decode`] for an already-parsed JSON value.
    pub fn from_value(key: &str, value: serde_json::Value) -> Result<Self, AppError> {
        let snap: LineSnapshot =
            serde_json::from_value(value).map_err(|e| AppError::MalformedSnapshot {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        snap.validate(key)?;
        Ok(snap)
    }

    pub fn encode(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Rejects non-finite values and decimal prices at or below 1.0.
    pub fn validate(&self, key: &str) -> Result<(), AppError> {
        let malformed = |reason: &str| AppError::MalformedSnapshot {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if let Some(price) = self.price {
            if !price.is_finite() || price <= 1.0 {
                return Err(malformed("price is not a valid decimal price"));
            }
        }
        if let Some(point) = self.point {
            if !point.is_finite() {
                return Err(malformed("point is not finite"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_accepts_well_formed_payload() {
        let snap = LineSnapshot::decode("k", r#"{"price":1.91,"point":-3.5,"captured_at":1700000000}"#)
            .unwrap();

        assert_eq!(snap, LineSnapshot::new(Some(1.91), Some(-3.5), 1_700_000_000));
    }

    #[test]
    fn decode_fails_closed_on_garbage() {
        for raw in [
            "",
            "not json",
            "{'price': 1.9}",
            r#"{"price":"1.9","point":null,"captured_at":1}"#,
            r#"{"price":1.9,"point":null}"#,
            r#"{"price":1.9,"point":null,"captured_at":1,"__import__":"os"}"#,
            r#"{"price":0.5,"point":null,"captured_at":1}"#,
        ] {
            let err = LineSnapshot::decode("k", raw).unwrap_err();
            assert!(
                matches!(err, AppError::MalformedSnapshot { .. }),
                "expected malformed for {raw:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn encode_then_decode_preserves_missing_fields() {
        let snap = LineSnapshot::new(Some(2.5), None, 42);
        let raw = snap.encode().unwrap();

        assert_eq!(LineSnapshot::decode("k", &raw).unwrap(), snap);
    }
}
