use std::fmt;

use serde::Serialize;

use crate::odds::MarketType;

const DELIM: char = '|';
const ESCAPE: char = '\\';

/// Identity of one opening line: `(sport, event, market, selection, book)`.
///
/// Components are normalized on construction, and the storage form escapes
/// the delimiter so distinct keys never encode to the same string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct SelectionKey {
    sport: String,
    event_id: String,
    market: MarketType,
    selection: String,
    bookmaker: String,
    #[serde(skip)]
    encoded: String,
}

impl SelectionKey {
    pub fn new(
        sport: &str,
        event_id: &str,
        market: MarketType,
        selection: &str,
        bookmaker: &str,
    ) -> Self {
        let sport = sport.trim().to_lowercase();
        let event_id = event_id.trim().to_string();
        let selection = normalize_selection(selection);
        let bookmaker = bookmaker.trim().to_lowercase();

        let encoded = [
            sport.as_str(),
            event_id.as_str(),
            market.as_str(),
            selection.as_str(),
            bookmaker.as_str(),
        ]
        .iter()
        .map(|c| escape(c))
        .collect::<Vec<_>>()
        .join("|");

        Self {
            sport,
            event_id,
            market,
            selection,
            bookmaker,
            encoded,
        }
    }

    /// Stable storage form used by every layer of the store.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn market(&self) -> MarketType {
        self.market
    }

    pub fn selection(&self) -> &str {
        &self.selection
    }
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// Lower-cases and collapses runs of whitespace to a single space.
pub fn normalize_selection(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for ch in component.chars() {
        if ch == DELIM || ch == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn selection_names_are_case_and_whitespace_normalized() {
        let a = SelectionKey::new("nfl", "e1", MarketType::Moneyline, "  Green  Bay\tPackers ", "dk");
        let b = SelectionKey::new("nfl", "e1", MarketType::Moneyline, "green bay packers", "dk");

        assert_eq!(a, b);
        assert_eq!(a.as_str(), b.as_str());
        assert_eq!(a.selection(), "green bay packers");
    }

    #[test]
    fn market_type_is_part_of_identity() {
        let ml = SelectionKey::new("nfl", "e1", MarketType::Moneyline, "Over", "dk");
        let tot = SelectionKey::new("nfl", "e1", MarketType::Total, "Over", "dk");

        assert_ne!(ml.as_str(), tot.as_str());
    }

    #[test]
    fn delimiter_inside_a_component_does_not_collide() {
        let a = SelectionKey::new("nfl", "e|1", MarketType::Spread, "x", "dk");
        let b = SelectionKey::new("nfl", "e", MarketType::Spread, "1|x", "dk");

        assert_ne!(a.as_str(), b.as_str());
        assert_eq!(a.as_str(), r"nfl|e\|1|spread|x|dk");
    }

    proptest! {
        #[test]
        fn encoding_is_injective(
            e1 in "[a-z|\\\\]{0,6}", s1 in "[a-z|\\\\]{0,6}",
            e2 in "[a-z|\\\\]{0,6}", s2 in "[a-z|\\\\]{0,6}",
        ) {
            let a = SelectionKey::new("mlb", &e1, MarketType::Moneyline, &s1, "dk");
            let b = SelectionKey::new("mlb", &e2, MarketType::Moneyline, &s2, "dk");

            prop_assert_eq!(a.as_str() == b.as_str(), e1 == e2 && s1 == s2);
        }
    }
}
