use parking_lot::RwLock;
use slab::Slab;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::orderbook::error::{OrderBookError, OrderBookResult};
use crate::orderbook::price_level::{Ladder, OrderNode, PriceLadder, PriceLevel, PriceLevelUpdate, UpdateKind};
use crate::orderbook::types::{
    BookSnapshot, Order, OrderId, Price, PriceLevelInfo, Quantity, Side, StopPriceMode, Symbol,
};

/// Externally published prices that can be written without owning the book
#[derive(Debug, Default)]
pub struct SharedPrices {
    mark: RwLock<Price>,
    index: RwLock<Price>,
}

impl SharedPrices {
    pub fn mark(&self) -> Price {
        *self.mark.read()
    }

    pub fn set_mark(&self, price: Price) {
        *self.mark.write() = price;
    }

    pub fn index(&self) -> Price {
        *self.index.read()
    }

    pub fn set_index(&self, price: Price) {
        *self.index.write() = price;
    }
}

/// Per-symbol order book: six price ladders over one order arena
#[derive(Debug)]
pub struct OrderBook {
    symbol: Symbol,

    // Indexed by `Ladder::index()`
    pub(crate) ladders: [PriceLadder; 6],

    // Resting orders and the id lookup into the arena
    pub(crate) orders: Slab<OrderNode>,
    pub(crate) index: HashMap<OrderId, usize>,

    prices: Arc<SharedPrices>,
    stop_price_mode: StopPriceMode,
    matching_override: Option<bool>,

    // Market state
    pub(crate) last_bid: Price,
    pub(crate) last_ask: Price,
    pub(crate) matching_bid: Price,
    pub(crate) matching_ask: Price,
    pub(crate) trailing_bid: Price,
    pub(crate) trailing_ask: Price,
    sequence: u64,
}

impl OrderBook {
    pub fn new(symbol: Symbol) -> Self {
        info!(symbol_id = symbol.id, name = %symbol.name, "Creating new order book");

        Self {
            symbol,
            ladders: Ladder::ALL.map(PriceLadder::new),
            orders: Slab::new(),
            index: HashMap::new(),
            prices: Arc::new(SharedPrices::default()),
            stop_price_mode: StopPriceMode::Market,
            matching_override: None,
            last_bid: Price::ZERO,
            last_ask: Price::MAX,
            matching_bid: Price::ZERO,
            matching_ask: Price::MAX,
            trailing_bid: Price::ZERO,
            trailing_ask: Price::MAX,
            sequence: 0,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub(crate) fn set_symbol(&mut self, symbol: Symbol) {
        self.symbol = symbol;
    }

    /// Handle to the mark/index prices shared with other threads
    pub fn shared_prices(&self) -> Arc<SharedPrices> {
        Arc::clone(&self.prices)
    }

    pub fn stop_price_mode(&self) -> StopPriceMode {
        self.stop_price_mode
    }

    pub fn set_stop_price_mode(&mut self, mode: StopPriceMode) {
        self.stop_price_mode = mode;
    }

    pub fn matching_override(&self) -> Option<bool> {
        self.matching_override
    }

    pub fn set_matching_override(&mut self, matching: Option<bool>) {
        self.matching_override = matching;
    }

    /// Effective automatic matching given the global flag
    pub fn is_matching(&self, global: bool) -> bool {
        self.matching_override.unwrap_or(global)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of resting orders across all ladders
    pub fn total_orders(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.index.contains_key(&id)
    }

    /// Lookup a resting order by id in O(1)
    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.index.get(&id).and_then(|&key| self.orders.get(key)).map(|node| &node.order)
    }

    /// Ladder an order currently rests in
    pub fn ladder_of(&self, id: OrderId) -> Option<Ladder> {
        self.index.get(&id).and_then(|&key| self.orders.get(key)).map(|node| node.ladder)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> + '_ {
        self.orders.iter().map(|(_, node)| &node.order)
    }

    pub fn ladder(&self, ladder: Ladder) -> &PriceLadder {
        &self.ladders[ladder.index()]
    }

    pub fn best(&self, ladder: Ladder) -> Option<&PriceLevel> {
        self.ladders[ladder.index()].best()
    }

    /// Find the price level at an exact price
    pub fn level(&self, ladder: Ladder, price: Price) -> OrderBookResult<&PriceLevel> {
        self.ladders[ladder.index()]
            .get(price)
            .ok_or(OrderBookError::PriceLevelNotFound)
    }

    /// Orders queued at one level in time priority
    pub fn orders_at(&self, ladder: Ladder, price: Price) -> Vec<&Order> {
        match self.ladders[ladder.index()].get(price) {
            Some(level) => level.iter(&self.orders).map(|(_, order)| order).collect(),
            None => Vec::new(),
        }
    }

    /// Get current best bid price
    pub fn best_bid(&self) -> Option<Price> {
        self.ladders[Ladder::Bid.index()].best_price()
    }

    /// Get current best ask price
    pub fn best_ask(&self) -> Option<Price> {
        self.ladders[Ladder::Ask.index()].best_price()
    }

    /// Get current spread
    pub fn spread(&self) -> Option<Price> {
        match (self.best_ask(), self.best_bid()) {
            (Some(ask), Some(bid)) if ask > bid => Some(ask - bid),
            _ => None,
        }
    }

    pub fn mark_price(&self) -> Price {
        self.prices.mark()
    }

    pub fn set_mark_price(&self, price: Price) {
        self.prices.set_mark(price);
    }

    pub fn index_price(&self) -> Price {
        self.prices.index()
    }

    pub fn set_index_price(&self, price: Price) {
        self.prices.set_index(price);
    }

    /// Last execution price on the buy side, zero before any trade
    pub fn last_bid_price(&self) -> Price {
        self.last_bid
    }

    /// Last execution price on the sell side, `MAX` before any trade
    pub fn last_ask_price(&self) -> Price {
        self.last_ask
    }

    pub fn market_price_bid(&self) -> Price {
        self.matching_bid.max(self.best_bid().unwrap_or(Price::ZERO))
    }

    pub fn market_price_ask(&self) -> Price {
        self.matching_ask.min(self.best_ask().unwrap_or(Price::MAX))
    }

    pub fn trailing_price_bid(&self) -> Price {
        self.last_bid.min(self.best_bid().unwrap_or(Price::ZERO))
    }

    pub fn trailing_price_ask(&self) -> Price {
        self.last_ask.max(self.best_ask().unwrap_or(Price::MAX))
    }

    /// Price that triggers plain stop orders of `side`, `None` when unavailable
    pub fn stop_reference(&self, side: Side) -> Option<Price> {
        let price = match (self.stop_price_mode, side) {
            (StopPriceMode::Market, Side::Buy) => self.market_price_ask(),
            (StopPriceMode::Market, Side::Sell) => self.market_price_bid(),
            (StopPriceMode::Mark, _) => self.mark_price(),
            (StopPriceMode::Index, _) => self.index_price(),
        };
        available_price(price)
    }

    /// Price that drives trailing stop orders of `side`, `None` when unavailable
    pub fn trailing_reference(&self, side: Side) -> Option<Price> {
        let price = match side {
            Side::Buy => self.trailing_price_ask(),
            Side::Sell => self.trailing_price_bid(),
        };
        available_price(price)
    }

    pub(crate) fn update_last_price(&mut self, price: Price) {
        self.last_bid = price;
        self.last_ask = price;
    }

    pub(crate) fn update_matching_price(&mut self, price: Price) {
        self.matching_bid = price;
        self.matching_ask = price;
    }

    pub(crate) fn reset_matching_price(&mut self) {
        self.matching_bid = Price::ZERO;
        self.matching_ask = Price::MAX;
    }

    /// Generate order book snapshot with at most `depth` levels per side
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        let collect = |ladder: Ladder| -> Vec<PriceLevelInfo> {
            self.ladders[ladder.index()]
                .iter()
                .take(depth)
                .map(|level| PriceLevelInfo {
                    price: level.price,
                    volume: level.volume,
                    visible: level.visible,
                    order_count: level.order_count,
                })
                .collect()
        };

        BookSnapshot {
            symbol_id: self.symbol.id,
            sequence: self.sequence,
            bids: collect(Ladder::Bid),
            asks: collect(Ladder::Ask),
            last_bid_price: self.last_bid,
            last_ask_price: self.last_ask,
        }
    }

    /// Get statistics
    pub fn get_stats(&self) -> OrderBookStats {
        let stop_orders = [
            Ladder::BuyStop,
            Ladder::SellStop,
            Ladder::TrailingBuyStop,
            Ladder::TrailingSellStop,
        ]
        .iter()
        .flat_map(|&ladder| self.ladders[ladder.index()].iter())
        .map(|level| level.order_count)
        .sum();

        OrderBookStats {
            symbol_id: self.symbol.id,
            total_orders: self.total_orders(),
            stop_orders,
            bid_levels: self.ladders[Ladder::Bid.index()].len(),
            ask_levels: self.ladders[Ladder::Ask.index()].len(),
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            spread: self.spread(),
            sequence: self.sequence,
        }
    }

    // Arena and ladder primitives

    pub(crate) fn key_of(&self, id: OrderId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub(crate) fn order_at(&self, key: usize) -> Option<&Order> {
        self.orders.get(key).map(|node| &node.order)
    }

    /// Queue an order at the back of its level, creating the level if needed
    pub(crate) fn link_order(&mut self, order: Order, ladder: Ladder) -> PriceLevelUpdate {
        let id = order.id;
        let node = OrderNode::new(order, ladder);
        let price = node.level_price;
        let key = self.orders.insert(node);
        self.index.insert(id, key);

        let (level, created) = self.ladders[ladder.index()].level_or_create(price);
        level.push_back(&mut self.orders, key);

        let kind = if created { UpdateKind::Add } else { UpdateKind::Update };
        self.current_update(ladder, price, kind)
    }

    /// Remove an order from its level and the arena, dropping an emptied level
    pub(crate) fn unlink_order(&mut self, key: usize) -> Option<(Order, PriceLevelUpdate)> {
        let (ladder, price) = {
            let node = self.orders.get(key)?;
            (node.ladder, node.level_price)
        };

        let prices = &mut self.ladders[ladder.index()];
        let emptied = match prices.get_mut(price) {
            Some(level) => {
                level.unlink(&mut self.orders, key);
                level.is_empty()
            }
            None => false,
        };

        let update = if emptied {
            let top = prices.is_top(price);
            prices.remove(price);
            PriceLevelUpdate {
                kind: UpdateKind::Delete,
                ladder,
                side: ladder.side(),
                price,
                volume: Quantity::ZERO,
                visible: Quantity::ZERO,
                order_count: 0,
                top,
                sequence: self.next_sequence(),
            }
        } else {
            self.current_update(ladder, price, UpdateKind::Update)
        };

        let node = self.orders.remove(key);
        self.index.remove(&node.order.id);
        Some((node.order, update))
    }

    /// Mutate a queued order in place, keeping its level totals consistent.
    /// The closure must not move the order to another price.
    pub(crate) fn adjust_order<F>(&mut self, key: usize, f: F) -> Option<PriceLevelUpdate>
    where
        F: FnOnce(&mut Order),
    {
        let node = self.orders.get_mut(key)?;
        let before = (node.order.rest_quantity, node.order.visible_quantity());
        f(&mut node.order);
        let after = (node.order.rest_quantity, node.order.visible_quantity());
        let (ladder, price) = (node.ladder, node.level_price);

        self.ladders[ladder.index()].get_mut(price)?.adjust(before, after);
        Some(self.current_update(ladder, price, UpdateKind::Update))
    }

    fn current_update(&mut self, ladder: Ladder, price: Price, kind: UpdateKind) -> PriceLevelUpdate {
        let prices = &self.ladders[ladder.index()];
        let (volume, visible, order_count) = prices
            .get(price)
            .map(|level| (level.volume, level.visible, level.order_count))
            .unwrap_or((Quantity::ZERO, Quantity::ZERO, 0));
        let top = prices.is_top(price);

        PriceLevelUpdate {
            kind,
            ladder,
            side: ladder.side(),
            price,
            volume,
            visible,
            order_count,
            top,
            sequence: self.next_sequence(),
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

fn available_price(price: Price) -> Option<Price> {
    if price.is_zero() || price.is_max() {
        None
    } else {
        Some(price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBookStats {
    pub symbol_id: u32,
    pub total_orders: usize,
    pub stop_orders: usize,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub spread: Option<Price>,
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::types::Limits;
    use crate::utils::fixed_point::FixedPoint;

    fn fp(s: &str) -> FixedPoint {
        s.parse().unwrap()
    }

    fn create_book() -> OrderBook {
        OrderBook::new(Symbol::new(
            1,
            "TEST",
            Limits::new(fp("1"), fp("1000"), fp("1")),
            Limits::new(fp("1"), fp("1000"), fp("1")),
        ))
    }

    fn create_limit_order(id: OrderId, side: Side, price: &str, quantity: &str) -> Order {
        Order::limit(id, 1, side, fp(price), fp(quantity))
    }

    #[test]
    fn test_empty_book() {
        let book = create_book();
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.spread(), None);
        assert_eq!(book.total_orders(), 0);
        assert_eq!(book.market_price_bid(), Price::ZERO);
        assert_eq!(book.market_price_ask(), Price::MAX);
        assert_eq!(book.stop_reference(Side::Buy), None);
        assert_eq!(book.stop_reference(Side::Sell), None);
        assert_eq!(book.trailing_reference(Side::Buy), None);
    }

    #[test]
    fn test_link_and_unlink() {
        let mut book = create_book();

        let update = book.link_order(create_limit_order(1, Side::Buy, "100", "10"), Ladder::Bid);
        assert_eq!(update.kind, UpdateKind::Add);
        assert!(update.top);
        assert_eq!(update.volume, fp("10"));

        let update = book.link_order(create_limit_order(2, Side::Buy, "100", "5"), Ladder::Bid);
        assert_eq!(update.kind, UpdateKind::Update);
        assert_eq!(update.volume, fp("15"));
        assert_eq!(update.order_count, 2);

        book.link_order(create_limit_order(3, Side::Sell, "101", "7"), Ladder::Ask);

        assert_eq!(book.best_bid(), Some(fp("100")));
        assert_eq!(book.best_ask(), Some(fp("101")));
        assert_eq!(book.spread(), Some(fp("1")));
        assert_eq!(book.total_orders(), 3);

        let key = book.key_of(1).unwrap();
        let (order, update) = book.unlink_order(key).unwrap();
        assert_eq!(order.id, 1);
        assert_eq!(update.kind, UpdateKind::Update);
        assert_eq!(update.volume, fp("5"));

        let key = book.key_of(2).unwrap();
        let (_, update) = book.unlink_order(key).unwrap();
        assert_eq!(update.kind, UpdateKind::Delete);
        assert!(update.top);
        assert_eq!(book.best_bid(), None);
        assert!(book.order(2).is_none());
        assert_eq!(book.level(Ladder::Bid, fp("100")), Err(OrderBookError::PriceLevelNotFound));
    }

    #[test]
    fn test_adjust_order() {
        let mut book = create_book();
        book.link_order(create_limit_order(1, Side::Sell, "50", "10").with_max_visible(fp("4")), Ladder::Ask);

        let key = book.key_of(1).unwrap();
        let update = book
            .adjust_order(key, |order| {
                order.rest_quantity -= fp("8");
                order.quantity -= fp("8");
            })
            .unwrap();

        assert_eq!(update.volume, fp("2"));
        assert_eq!(update.visible, fp("2"));
        assert_eq!(book.order(1).unwrap().rest_quantity, fp("2"));
    }

    #[test]
    fn test_price_time_priority() {
        let mut book = create_book();
        book.link_order(create_limit_order(1, Side::Buy, "100", "1"), Ladder::Bid);
        book.link_order(create_limit_order(2, Side::Buy, "100", "2"), Ladder::Bid);
        book.link_order(create_limit_order(3, Side::Buy, "100", "3"), Ladder::Bid);

        let ids: Vec<_> = book.orders_at(Ladder::Bid, fp("100")).iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let mut book = create_book();
        let first = book.link_order(create_limit_order(1, Side::Buy, "100", "1"), Ladder::Bid);
        let second = book.link_order(create_limit_order(2, Side::Buy, "99", "1"), Ladder::Bid);
        assert!(second.sequence > first.sequence);
        assert!(!second.top);
        assert_eq!(book.sequence(), second.sequence);
    }

    #[test]
    fn test_reference_prices() {
        let mut book = create_book();
        book.link_order(create_limit_order(1, Side::Buy, "99", "1"), Ladder::Bid);
        book.link_order(create_limit_order(2, Side::Sell, "101", "1"), Ladder::Ask);

        assert_eq!(book.stop_reference(Side::Buy), Some(fp("101")));
        assert_eq!(book.stop_reference(Side::Sell), Some(fp("99")));

        book.update_matching_price(fp("105"));
        assert_eq!(book.market_price_bid(), fp("105"));
        assert_eq!(book.market_price_ask(), fp("101"));
        book.reset_matching_price();
        assert_eq!(book.market_price_bid(), fp("99"));

        book.update_last_price(fp("100"));
        assert_eq!(book.trailing_price_bid(), fp("99"));
        assert_eq!(book.trailing_price_ask(), fp("101"));

        book.set_stop_price_mode(StopPriceMode::Mark);
        assert_eq!(book.stop_reference(Side::Buy), None);
        book.shared_prices().set_mark(fp("98"));
        assert_eq!(book.stop_reference(Side::Buy), Some(fp("98")));
        assert_eq!(book.mark_price(), fp("98"));
    }

    #[test]
    fn test_snapshot_and_stats() {
        let mut book = create_book();
        book.link_order(create_limit_order(1, Side::Buy, "99", "1"), Ladder::Bid);
        book.link_order(create_limit_order(2, Side::Buy, "98", "2"), Ladder::Bid);
        book.link_order(create_limit_order(3, Side::Sell, "101", "3"), Ladder::Ask);
        book.link_order(Order::stop(4, 1, Side::Buy, fp("110"), fp("1")), Ladder::BuyStop);

        let snapshot = book.snapshot(1);
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.bids[0].price, fp("99"));
        assert_eq!(snapshot.asks[0].volume, fp("3"));

        let stats = book.get_stats();
        assert_eq!(stats.total_orders, 4);
        assert_eq!(stats.stop_orders, 1);
        assert_eq!(stats.bid_levels, 2);
        assert_eq!(stats.spread, Some(fp("2")));
    }
}
