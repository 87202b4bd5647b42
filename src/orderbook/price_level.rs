use crate::orderbook::types::{Order, OrderType, Price, Quantity, Side};
use serde::{Deserialize, Serialize};
use slab::Slab;
use std::collections::BTreeMap;
use std::ops::Bound;

/// One of the six price-ordered indices of a book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ladder {
    Bid,
    Ask,
    BuyStop,
    SellStop,
    TrailingBuyStop,
    TrailingSellStop,
}

impl Ladder {
    pub const ALL: [Ladder; 6] = [
        Ladder::Bid,
        Ladder::Ask,
        Ladder::BuyStop,
        Ladder::SellStop,
        Ladder::TrailingBuyStop,
        Ladder::TrailingSellStop,
    ];

    pub fn index(self) -> usize {
        match self {
            Ladder::Bid => 0,
            Ladder::Ask => 1,
            Ladder::BuyStop => 2,
            Ladder::SellStop => 3,
            Ladder::TrailingBuyStop => 4,
            Ladder::TrailingSellStop => 5,
        }
    }

    pub fn side(self) -> Side {
        match self {
            Ladder::Bid | Ladder::BuyStop | Ladder::TrailingBuyStop => Side::Buy,
            Ladder::Ask | Ladder::SellStop | Ladder::TrailingSellStop => Side::Sell,
        }
    }

    /// Buy-side ladders put the highest price on top
    pub fn is_descending(self) -> bool {
        self.side() == Side::Buy
    }

    /// Bid and ask ladders carry the public depth
    pub fn is_market_data(self) -> bool {
        matches!(self, Ladder::Bid | Ladder::Ask)
    }

    /// Ladder an order rests in; market orders never rest
    pub fn for_order(order: &Order) -> Option<Ladder> {
        let ladder = match (order.order_type, order.side) {
            (OrderType::Limit, Side::Buy) => Ladder::Bid,
            (OrderType::Limit, Side::Sell) => Ladder::Ask,
            (OrderType::Stop | OrderType::StopLimit, Side::Buy) => Ladder::BuyStop,
            (OrderType::Stop | OrderType::StopLimit, Side::Sell) => Ladder::SellStop,
            (OrderType::TrailingStop | OrderType::TrailingStopLimit, Side::Buy) => Ladder::TrailingBuyStop,
            (OrderType::TrailingStop | OrderType::TrailingStopLimit, Side::Sell) => Ladder::TrailingSellStop,
            (OrderType::Market, _) => return None,
        };
        Some(ladder)
    }

    /// Price an order is keyed by in this ladder
    pub fn key_price(self, order: &Order) -> Price {
        if self.is_market_data() {
            order.price
        } else {
            order.stop_price
        }
    }
}

/// Arena slot of a resting order with its FIFO links
#[derive(Debug, Clone)]
pub(crate) struct OrderNode {
    pub order: Order,
    pub ladder: Ladder,
    pub level_price: Price,
    prev: Option<usize>,
    next: Option<usize>,
}

impl OrderNode {
    pub fn new(order: Order, ladder: Ladder) -> Self {
        let level_price = ladder.key_price(&order);
        Self {
            order,
            ladder,
            level_price,
            prev: None,
            next: None,
        }
    }

    pub fn next(&self) -> Option<usize> {
        self.next
    }
}

/// Represents a price level in the order book
/// All orders at this price level maintain time priority (FIFO)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Price,
    pub volume: Quantity,
    pub visible: Quantity,
    pub order_count: usize,
    head: Option<usize>,
    tail: Option<usize>,
}

impl PriceLevel {
    pub fn new(price: Price) -> Self {
        Self {
            price,
            volume: Quantity::ZERO,
            visible: Quantity::ZERO,
            order_count: 0,
            head: None,
            tail: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order_count == 0
    }

    pub(crate) fn front(&self) -> Option<usize> {
        self.head
    }

    /// Append an order to the queue (maintains time priority)
    pub(crate) fn push_back(&mut self, nodes: &mut Slab<OrderNode>, key: usize) {
        let tail = self.tail;
        if let Some(node) = nodes.get_mut(key) {
            node.prev = tail;
            node.next = None;
            self.volume += node.order.rest_quantity;
            self.visible += node.order.visible_quantity();
        } else {
            return;
        }
        match tail.and_then(|t| nodes.get_mut(t)) {
            Some(prev) => prev.next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.order_count += 1;
    }

    /// Detach an order from the queue in O(1)
    pub(crate) fn unlink(&mut self, nodes: &mut Slab<OrderNode>, key: usize) {
        let (prev, next) = match nodes.get_mut(key) {
            Some(node) => {
                self.volume -= node.order.rest_quantity.min(self.volume);
                self.visible -= node.order.visible_quantity().min(self.visible);
                let links = (node.prev, node.next);
                node.prev = None;
                node.next = None;
                links
            }
            None => return,
        };
        match prev.and_then(|p| nodes.get_mut(p)) {
            Some(node) => node.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| nodes.get_mut(n)) {
            Some(node) => node.prev = prev,
            None => self.tail = prev,
        }
        self.order_count -= 1;
    }

    /// Account for an in-place change of one queued order
    pub(crate) fn adjust(&mut self, before: (Quantity, Quantity), after: (Quantity, Quantity)) {
        self.volume = self.volume - before.0.min(self.volume) + after.0;
        self.visible = self.visible - before.1.min(self.visible) + after.1;
    }

    /// Iterate queued orders in arrival order
    pub(crate) fn iter<'a>(&self, nodes: &'a Slab<OrderNode>) -> QueueIter<'a> {
        QueueIter {
            nodes,
            cursor: self.head,
        }
    }
}

pub(crate) struct QueueIter<'a> {
    nodes: &'a Slab<OrderNode>,
    cursor: Option<usize>,
}

impl<'a> Iterator for QueueIter<'a> {
    type Item = (usize, &'a Order);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cursor?;
        let node = self.nodes.get(key)?;
        self.cursor = node.next;
        Some((key, &node.order))
    }
}

/// Price-ordered index of levels with a cached top of book
#[derive(Debug, Clone)]
pub struct PriceLadder {
    ladder: Ladder,
    levels: BTreeMap<Price, PriceLevel>,
    best: Option<Price>,
}

impl PriceLadder {
    pub fn new(ladder: Ladder) -> Self {
        Self {
            ladder,
            levels: BTreeMap::new(),
            best: None,
        }
    }

    pub fn ladder(&self) -> Ladder {
        self.ladder
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Top of book in O(1)
    pub fn best(&self) -> Option<&PriceLevel> {
        self.best.and_then(|price| self.levels.get(&price))
    }

    pub fn best_price(&self) -> Option<Price> {
        self.best
    }

    pub fn get(&self, price: Price) -> Option<&PriceLevel> {
        self.levels.get(&price)
    }

    pub(crate) fn get_mut(&mut self, price: Price) -> Option<&mut PriceLevel> {
        self.levels.get_mut(&price)
    }

    pub fn is_top(&self, price: Price) -> bool {
        self.best == Some(price)
    }

    fn is_better(&self, price: Price, than: Price) -> bool {
        if self.ladder.is_descending() {
            price > than
        } else {
            price < than
        }
    }

    /// Fetch the level at `price`, creating it lazily. The flag tells whether it is new.
    pub(crate) fn level_or_create(&mut self, price: Price) -> (&mut PriceLevel, bool) {
        let created = !self.levels.contains_key(&price);
        if created {
            let better = match self.best {
                Some(best) => self.is_better(price, best),
                None => true,
            };
            if better {
                self.best = Some(price);
            }
        }
        let level = self.levels.entry(price).or_insert_with(|| PriceLevel::new(price));
        (level, created)
    }

    pub(crate) fn remove(&mut self, price: Price) -> Option<PriceLevel> {
        let level = self.levels.remove(&price)?;
        if self.best == Some(price) {
            self.best = if self.ladder.is_descending() {
                self.levels.keys().next_back().copied()
            } else {
                self.levels.keys().next().copied()
            };
        }
        Some(level)
    }

    /// Levels in priority order, best first
    pub fn iter(&self) -> Box<dyn Iterator<Item = &PriceLevel> + '_> {
        if self.ladder.is_descending() {
            Box::new(self.levels.values().rev())
        } else {
            Box::new(self.levels.values())
        }
    }

    /// Next level after `price` in priority order
    pub fn next_after(&self, price: Price) -> Option<&PriceLevel> {
        if self.ladder.is_descending() {
            self.levels.range(..price).next_back().map(|(_, level)| level)
        } else {
            self.levels
                .range((Bound::Excluded(price), Bound::Unbounded))
                .next()
                .map(|(_, level)| level)
        }
    }

    /// Levels priced at or below `price`, lowest first
    pub fn ascending_to(&self, price: Price) -> impl Iterator<Item = &PriceLevel> + '_ {
        self.levels.range(..=price).map(|(_, level)| level)
    }

    /// Levels priced at or above `price`, highest first
    pub fn descending_to(&self, price: Price) -> impl Iterator<Item = &PriceLevel> + '_ {
        self.levels.range(price..).rev().map(|(_, level)| level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    Add,
    Update,
    Delete,
}

/// Resulting state of a price level after an order mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevelUpdate {
    pub kind: UpdateKind,
    pub ladder: Ladder,
    pub side: Side,
    pub price: Price,
    pub volume: Quantity,
    pub visible: Quantity,
    pub order_count: usize,
    /// Level is (or was, for deletes) the top of its ladder
    pub top: bool,
    pub sequence: u64,
}
