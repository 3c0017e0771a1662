use chrono::Utc;
use rust_decimal::Decimal;

use crate::codec::BookUpdate;
use crate::types::{BookSnapshot, BookState, LevelChange, PriceLevel, Side};

/// Prices closer than this are the same level.
pub const PRICE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 9);

/// Floor `price` to its bucket: `floor(price / (granularity * tick)) * (granularity * tick)`.
///
/// Granularity 1 is the raw tick grid and leaves prices untouched.
pub fn bucket_price(price: Decimal, granularity: u32, tick_size: Decimal) -> Decimal {
    if granularity <= 1 {
        return price;
    }
    let Some(width) = tick_size.checked_mul(Decimal::from(granularity)) else {
        return price;
    };
    if width <= Decimal::ZERO {
        return price;
    }
    price
        .checked_div(width)
        .and_then(|buckets| buckets.floor().checked_mul(width))
        .map(|bucketed| bucketed.normalize())
        .unwrap_or(price)
}

/// Apply level changes to one side, then re-sort and truncate it.
pub fn apply_changes(
    levels: &mut Vec<PriceLevel>,
    side: Side,
    changes: &[LevelChange],
    granularity: u32,
    tick_size: Decimal,
    depth: usize,
) {
    for change in changes {
        let price = bucket_price(change.price, granularity, tick_size);
        let existing = levels
            .iter()
            .position(|level| (level.price - price).abs() <= PRICE_EPSILON);

        if change.is_removal() {
            if let Some(idx) = existing {
                levels.remove(idx);
            }
            continue;
        }

        let level = PriceLevel::new(price, change.size, change.total);
        match existing {
            Some(idx) => levels[idx] = level,
            None => levels.push(level),
        }
    }
    normalize_side(levels, side, depth);
}

/// Sort best-first and keep at most `depth` levels.
pub fn normalize_side(levels: &mut Vec<PriceLevel>, side: Side, depth: usize) {
    match side {
        Side::Bid => levels.sort_by(|a, b| b.price.cmp(&a.price)),
        Side::Ask => levels.sort_by(|a, b| a.price.cmp(&b.price)),
    }
    levels.truncate(depth);
}

/// Average of best bid and best ask, or the lone best price when one side is empty.
pub fn mid_price(bids: &[PriceLevel], asks: &[PriceLevel]) -> Option<Decimal> {
    match (bids.first(), asks.first()) {
        (Some(bid), Some(ask)) => {
            let (low, high) = if bid.price <= ask.price {
                (bid.price, ask.price)
            } else {
                (ask.price, bid.price)
            };
            high.checked_sub(low)
                .map(|spread| (low + spread / Decimal::TWO).normalize())
        }
        (Some(bid), None) => Some(bid.price),
        (None, Some(ask)) => Some(ask.price),
        (None, None) => None,
    }
}

/// Book maintenance for one granularity.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    granularity: u32,
    tick_size: Decimal,
    depth: usize,
}

impl Aggregator {
    pub fn new(granularity: u32, tick_size: Decimal, depth: usize) -> Self {
        Self {
            granularity,
            tick_size,
            depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn apply(&self, book: &mut BookState, update: &BookUpdate) {
        for (side, changes) in [(Side::Bid, &update.bids), (Side::Ask, &update.asks)] {
            apply_changes(
                book.side_mut(side),
                side,
                changes,
                self.granularity,
                self.tick_size,
                self.depth,
            );
        }
        book.mid_price = mid_price(&book.bids, &book.asks);
        book.updated_at = Some(Utc::now());
    }

    /// Replace the whole book with a snapshot.
    ///
    /// Snapshot levels are already aggregated at this granularity; they are
    /// only sorted and cut to depth here.
    pub fn install(&self, book: &mut BookState, snapshot: BookSnapshot) {
        let BookSnapshot {
            sequence,
            mut bids,
            mut asks,
            timestamp,
        } = snapshot;
        normalize_side(&mut bids, Side::Bid, self.depth);
        normalize_side(&mut asks, Side::Ask, self.depth);

        book.mid_price = mid_price(&bids, &asks);
        book.bids = bids;
        book.asks = asks;
        book.last_sequence = sequence;
        book.updated_at = Some(timestamp.unwrap_or_else(Utc::now));
    }
}
