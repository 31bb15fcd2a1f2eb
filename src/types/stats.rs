use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::types::exchange::Exchange;
use crate::types::symbol::Symbol;
use crate::types::tick::PriceTick;

/// Min/max/average rollup over one aggregation window. Rows are immutable:
/// every window produces new records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub exchange: Exchange,
    #[serde(rename = "pair")]
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub min: f64,
    pub max: f64,
    pub average: f64,
}

impl PriceStats {
    /// Single linear scan. Returns `None` for an empty window.
    pub fn from_ticks(
        exchange: Exchange,
        symbol: Symbol,
        timestamp: DateTime<Utc>,
        ticks: &[PriceTick],
    ) -> Option<Self> {
        let (min, max, average) = summarize(ticks.iter().map(|t| t.price))?;
        Some(PriceStats { exchange, symbol, timestamp, min, max, average })
    }
}

/// Returns `(min, max, mean)` of the given prices, `None` when empty.
pub fn summarize(prices: impl IntoIterator<Item = f64>) -> Option<(f64, f64, f64)> {
    let mut iter = prices.into_iter();
    let first = iter.next()?;

    let (mut min, mut max, mut sum, mut count) = (first, first, first, 1usize);
    for price in iter {
        if price < min {
            min = price;
        }
        if price > max {
            max = price;
        }
        sum += price;
        count += 1;
    }

    Some((min, max, sum / count as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_window_has_no_rollup() {
        assert!(summarize(Vec::new()).is_none());
        assert!(PriceStats::from_ticks(Exchange::Exchange1, Symbol::BtcUsdt, Utc::now(), &[]).is_none());
    }

    #[test]
    fn test_single_observation() {
        assert_eq!(summarize([100_000.0]), Some((100_000.0, 100_000.0, 100_000.0)));
    }

    #[test]
    fn test_known_window() {
        let (min, max, avg) = summarize([3.0, 1.0, 2.0, 6.0]).unwrap();
        assert_eq!(min, 1.0);
        assert_eq!(max, 6.0);
        assert_eq!(avg, 3.0);
    }

    proptest! {
        #[test]
        fn prop_rollup_matches_definition(prices in prop::collection::vec(0.0f64..1e6, 1..200)) {
            let (min, max, avg) = summarize(prices.iter().copied()).unwrap();

            let expected_min = prices.iter().copied().fold(f64::INFINITY, f64::min);
            let expected_max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let expected_avg = prices.iter().sum::<f64>() / prices.len() as f64;

            prop_assert_eq!(min, expected_min);
            prop_assert_eq!(max, expected_max);
            prop_assert!((avg - expected_avg).abs() <= 1e-9 * expected_avg.abs().max(1.0));
        }
    }
}
