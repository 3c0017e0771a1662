use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

/// One aggregated level of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
    /// Cumulative size from the top of the book down to this level
    pub total: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal, total: Decimal) -> Self {
        Self { price, size, total }
    }
}

/// A single level mutation carried by an update frame. Zero size removes the level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub price: Decimal,
    pub size: Decimal,
    pub total: Decimal,
}

impl LevelChange {
    pub fn new(price: Decimal, size: Decimal, total: Decimal) -> Self {
        Self { price, size, total }
    }

    #[inline]
    pub fn is_removal(&self) -> bool {
        self.size.is_zero()
    }
}

/// Identity of one synchronized book: a market at a price granularity.
///
/// Each granularity is an independent sequence space, so two keys for the
/// same market never share state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub market_id: String,
    pub granularity: u32,
}

impl SubscriptionKey {
    pub fn new(market_id: impl Into<String>, granularity: u32) -> Self {
        Self {
            market_id: market_id.into(),
            granularity,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.market_id, self.granularity)
    }
}

/// Parses `MARKET:GRANULARITY`. A bare `MARKET` means granularity 1.
impl FromStr for SubscriptionKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::InvalidSubscription(s.to_string());

        let (market, granularity) = match s.rsplit_once(':') {
            Some((market, g)) => (market, g.trim().parse::<u32>().map_err(|_| invalid())?),
            None => (s, 1),
        };
        let market = market.trim();
        if market.is_empty() || granularity == 0 {
            return Err(invalid());
        }
        Ok(Self::new(market, granularity))
    }
}

/// Locally maintained book for one subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookState {
    /// Sorted best (highest) first
    pub bids: Vec<PriceLevel>,
    /// Sorted best (lowest) first
    pub asks: Vec<PriceLevel>,
    pub mid_price: Option<Decimal>,
    pub last_sequence: u64,
    /// When the book last changed, from the snapshot timestamp or local apply time
    pub updated_at: Option<DateTime<Utc>>,
}

impl BookState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn side_mut(&mut self, side: Side) -> &mut Vec<PriceLevel> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Best ask minus best bid, when both sides are present.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Full book returned by the snapshot service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub sequence: u64,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Body of a snapshot request sent over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub market_id: String,
    pub granularity: u32,
    pub depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: i64, size: i64) -> PriceLevel {
        PriceLevel::new(Decimal::from(price), Decimal::from(size), Decimal::from(size))
    }

    #[test]
    fn test_subscription_key_parse() {
        let key: SubscriptionKey = "BTC-YES:5".parse().unwrap();
        assert_eq!(key, SubscriptionKey::new("BTC-YES", 5));
        assert_eq!(key.to_string(), "BTC-YES:5");

        let bare: SubscriptionKey = " ETH-NO ".parse().unwrap();
        assert_eq!(bare.granularity, 1);
    }

    #[test]
    fn test_subscription_key_parse_rejects_garbage() {
        assert!("BTC:zero".parse::<SubscriptionKey>().is_err());
        assert!("BTC:0".parse::<SubscriptionKey>().is_err());
        assert!(":5".parse::<SubscriptionKey>().is_err());
        assert!("".parse::<SubscriptionKey>().is_err());
    }

    #[test]
    fn test_spread_and_best_levels() {
        let mut book = BookState::new();
        assert_eq!(book.spread(), None);
        assert!(book.is_empty());

        book.bids = vec![level(98, 50), level(97, 10)];
        book.asks = vec![level(99, 40)];
        assert_eq!(book.best_bid().map(|l| l.price), Some(Decimal::from(98)));
        assert_eq!(book.best_ask().map(|l| l.price), Some(Decimal::from(99)));
        assert_eq!(book.spread(), Some(Decimal::from(1)));
    }

    #[test]
    fn test_snapshot_accepts_numeric_levels() {
        let json = r#"{
            "sequence": 100,
            "bids": [{"price": 0.98, "size": 50, "total": 50}],
            "asks": [{"price": "0.99", "size": "40", "total": "40"}]
        }"#;
        let snapshot: BookSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.sequence, 100);
        assert_eq!(snapshot.bids[0].price, "0.98".parse::<Decimal>().unwrap());
        assert_eq!(snapshot.asks[0].size, Decimal::from(40));
        assert!(snapshot.timestamp.is_none());
    }

    #[test]
    fn test_removal_change() {
        assert!(LevelChange::new(Decimal::ONE, Decimal::ZERO, Decimal::ZERO).is_removal());
        assert!(!LevelChange::new(Decimal::ONE, Decimal::ONE, Decimal::ONE).is_removal());
    }
}
