//! Matching algorithm: crossing resting orders, aggressor matching, all-or-none
//! chains, stop activation and trailing stop recalculation.
//!
//! Everything here runs on the thread that owns the book and reports through
//! the handler of the `MatchContext` it is given.

use tracing::trace;

use crate::orderbook::book::OrderBook;
use crate::orderbook::handler::MatchContext;
use crate::orderbook::price_level::{Ladder, PriceLevel, PriceLevelUpdate, UpdateKind};
use crate::orderbook::types::{Order, OrderId, OrderType, Price, Quantity, Side, TimeInForce};

/// One order taking part in an all-or-none chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChainLeg {
    pub key: usize,
    pub price: Price,
    pub quantity: Quantity,
}

/// Candidate order on one side of a crossed book
#[derive(Debug, Clone, Copy)]
struct Candidate {
    key: usize,
    price: Price,
    rest: Quantity,
    capped: Quantity,
    aon: bool,
}

/// Whether a stop order fires at `reference`.
///
/// Classic buy stops and take-profit sells fire when the price rises to the
/// stop; take-profit buys and classic sell stops fire when it falls to it.
pub fn stop_triggered(order: &Order, reference: Price) -> bool {
    match (order.side, order.take_profit) {
        (Side::Buy, false) | (Side::Sell, true) => reference >= order.stop_price,
        (Side::Buy, true) | (Side::Sell, false) => reference <= order.stop_price,
    }
}

/// Take-profit classification of a stop placed against `reference`
pub fn is_take_profit(side: Side, stop_price: Price, reference: Price) -> bool {
    match side {
        Side::Buy => stop_price < reference,
        Side::Sell => stop_price > reference,
    }
}

/// New stop price of a trailing order for the given market reference.
/// The stop only ever tightens and only by at least the trailing step.
pub fn trailing_stop_price(order: &Order, reference: Price) -> Price {
    let old_price = order.stop_price;
    match order.side {
        Side::Buy => {
            let new_price = reference + order.trailing_distance;
            if new_price < old_price && old_price - new_price >= order.trailing_step {
                return new_price;
            }
        }
        Side::Sell => {
            let new_price = reference.saturating_sub(order.trailing_distance);
            if new_price > old_price && new_price - old_price >= order.trailing_step {
                return new_price;
            }
        }
    }
    old_price
}

/// Move the stop of a trailing order, dragging a stop-limit price along with it
pub(crate) fn move_trailing_stop(order: &mut Order, new_stop: Price) {
    if order.is_trailing_stop_limit() {
        order.price = if order.price >= order.stop_price {
            new_stop + (order.price - order.stop_price)
        } else {
            new_stop.saturating_sub(order.stop_price - order.price)
        };
    }
    order.stop_price = new_stop;
}

fn crosses(side: Side, limit: Price, level_price: Price) -> bool {
    match side {
        Side::Buy => limit >= level_price,
        Side::Sell => limit <= level_price,
    }
}

impl OrderBook {
    fn lot_step(&self) -> Quantity {
        self.symbol().lot_limits.step
    }

    /// Publish a price level mutation; only bid/ask levels are market data
    pub(crate) fn emit_level(&self, ctx: &MatchContext<'_>, update: &PriceLevelUpdate) {
        if !update.ladder.is_market_data() {
            return;
        }
        match update.kind {
            UpdateKind::Add => ctx.handler.on_add_price_level(self, update),
            UpdateKind::Update => ctx.handler.on_update_price_level(self, update),
            UpdateKind::Delete => ctx.handler.on_delete_price_level(self, update),
        }
        ctx.handler.on_update_order_book(self, update.top);
    }

    /// Run matching when it is active for this book, then forget the
    /// prices reached during the operation
    pub(crate) fn finish(&mut self, ctx: &MatchContext<'_>) {
        if self.is_matching(ctx.matching) {
            self.match_book(ctx);
        }
        self.reset_matching_price();
    }

    /// One full matching pass regardless of the matching flags
    pub fn run_matching(&mut self, ctx: &MatchContext<'_>) {
        self.match_book(ctx);
        self.reset_matching_price();
    }

    /// Cross the book and activate stops until neither makes progress
    pub(crate) fn match_book(&mut self, ctx: &MatchContext<'_>) {
        loop {
            self.cross(ctx);
            if !self.activate_stop_orders(ctx) {
                break;
            }
        }
    }

    fn front_key(&self, ladder: Ladder) -> Option<usize> {
        self.best(ladder).and_then(PriceLevel::front)
    }

    /// Resolve a crossed book between resting orders
    fn cross(&mut self, ctx: &MatchContext<'_>) {
        let step = self.lot_step();
        loop {
            match (self.best_bid(), self.best_ask()) {
                (Some(bid), Some(ask)) if bid >= ask => {}
                _ => return,
            }
            let (Some(bid_key), Some(ask_key)) = (self.front_key(Ladder::Bid), self.front_key(Ladder::Ask)) else {
                return;
            };
            let (Some(bid), Some(ask)) = (self.order_at(bid_key), self.order_at(ask_key)) else {
                return;
            };

            if bid.is_aon() || ask.is_aon() {
                match self.cross_chain() {
                    Some((bids, asks)) => {
                        self.execute_cross_chain(ctx, bids, asks);
                        continue;
                    }
                    None => return,
                }
            }

            // The earlier order sets the price
            let (maker_key, taker_key, price) = if bid.id < ask.id {
                (bid_key, ask_key, bid.price)
            } else {
                (ask_key, bid_key, ask.price)
            };

            let bid_capped = bid.capped_quantity(price, step);
            let ask_capped = ask.capped_quantity(price, step);
            if bid_capped.is_zero() {
                self.cancel_exhausted(ctx, bid_key);
                continue;
            }
            if ask_capped.is_zero() {
                self.cancel_exhausted(ctx, ask_key);
                continue;
            }

            let quantity = bid_capped.min(ask_capped);
            self.trade_resting(ctx, maker_key, taker_key, price, quantity);
        }
    }

    /// Resting orders of one side that can take part in a cross
    fn cross_candidates(&self, ladder: Ladder, bound: Price) -> Vec<Candidate> {
        let step = self.lot_step();
        let side = ladder.side();
        let mut candidates = Vec::new();
        for level in self.ladder(ladder).iter() {
            if !crosses(side, level.price, bound) {
                break;
            }
            for (key, order) in level.iter(&self.orders) {
                candidates.push(Candidate {
                    key,
                    price: level.price,
                    rest: order.rest_quantity,
                    capped: order.capped_quantity(level.price, step),
                    aon: order.is_aon(),
                });
            }
        }
        candidates
    }

    /// Find a set of bid and ask orders that fill each other exactly, with
    /// every all-or-none order in the set filled completely.
    ///
    /// The side that currently requires more is "long"; the other side keeps
    /// adding orders until it matches. When an all-or-none order overshoots,
    /// the roles swap.
    pub(crate) fn cross_chain(&self) -> Option<(Vec<ChainLeg>, Vec<ChainLeg>)> {
        let (best_bid, best_ask) = (self.best_bid()?, self.best_ask()?);
        let sides = [
            self.cross_candidates(Ladder::Bid, best_ask),
            self.cross_candidates(Ladder::Ask, best_bid),
        ];
        let (bid_front, ask_front) = (sides[0].first()?, sides[1].first()?);

        let mut long = if bid_front.aon && ask_front.aon {
            if ask_front.rest > bid_front.rest {
                1
            } else {
                0
            }
        } else if ask_front.aon {
            1
        } else {
            0
        };

        let mut next = [0usize, 0usize];
        let mut totals = [Quantity::ZERO, Quantity::ZERO];
        let mut deepest = [Price::ZERO, Price::ZERO];
        let mut legs: [Vec<ChainLeg>; 2] = [Vec::new(), Vec::new()];

        let first = sides[long][0];
        if first.capped < first.rest {
            return None;
        }
        legs[long].push(ChainLeg {
            key: first.key,
            price: first.price,
            quantity: first.rest,
        });
        totals[long] = first.rest;
        deepest[long] = first.price;
        next[long] = 1;

        loop {
            let short = 1 - long;
            if totals[short] == totals[long] {
                let [bids, asks] = legs;
                return Some((bids, asks));
            }

            let candidate = *sides[short].get(next[short])?;
            next[short] += 1;

            // Deeper orders must still cross the deepest order on the other side
            if !deepest[long].is_zero() {
                let crossing = if short == 0 {
                    candidate.price >= deepest[long]
                } else {
                    candidate.price <= deepest[long]
                };
                if !crossing {
                    return None;
                }
            }

            let need = totals[long] - totals[short];
            let quantity = if candidate.aon {
                if candidate.capped < candidate.rest {
                    return None;
                }
                candidate.rest
            } else {
                candidate.capped.min(need)
            };
            if quantity.is_zero() {
                continue;
            }

            legs[short].push(ChainLeg {
                key: candidate.key,
                price: candidate.price,
                quantity,
            });
            totals[short] += quantity;
            deepest[short] = candidate.price;

            if totals[short] > totals[long] {
                long = short;
            }
        }
    }

    /// Execute a cross chain pairwise in priority order
    fn execute_cross_chain(&mut self, ctx: &MatchContext<'_>, mut bids: Vec<ChainLeg>, mut asks: Vec<ChainLeg>) {
        let (mut i, mut j) = (0, 0);
        while i < bids.len() && j < asks.len() {
            let quantity = bids[i].quantity.min(asks[j].quantity);
            let (bid_key, ask_key) = (bids[i].key, asks[j].key);

            if let (Some(bid), Some(ask)) = (self.order_at(bid_key), self.order_at(ask_key)) {
                let (maker_key, taker_key, price) = if bid.id < ask.id {
                    (bid_key, ask_key, bid.price)
                } else {
                    (ask_key, bid_key, ask.price)
                };
                self.trade_resting(ctx, maker_key, taker_key, price, quantity);
            }

            bids[i].quantity -= quantity;
            asks[j].quantity -= quantity;
            if bids[i].quantity.is_zero() {
                i += 1;
            }
            if asks[j].quantity.is_zero() {
                j += 1;
            }
        }
    }

    /// Trade two resting orders against each other
    fn trade_resting(
        &mut self,
        ctx: &MatchContext<'_>,
        maker_key: usize,
        taker_key: usize,
        price: Price,
        quantity: Quantity,
    ) {
        let quote = price * quantity;
        if let (Some(maker), Some(taker)) = (self.order_at(maker_key), self.order_at(taker_key)) {
            trace!(maker = maker.id, taker = taker.id, %price, %quantity, "Crossing resting orders");
            ctx.handler.on_execute_trade(self, maker, taker, price, quantity, quote);
        }
        self.execute_resting(ctx, maker_key, price, quantity, quote, quote);
        self.execute_resting(ctx, taker_key, price, quantity, quote, quote);
    }

    /// Apply an execution to a resting order, removing it once filled
    pub(crate) fn execute_resting(
        &mut self,
        ctx: &MatchContext<'_>,
        key: usize,
        price: Price,
        quantity: Quantity,
        quote: Quantity,
        debit_quote: Quantity,
    ) {
        let Some(order) = self.order_at(key) else {
            return;
        };
        ctx.handler.on_execute_order(self, order, price, quantity, quote);
        let filled = quantity >= order.rest_quantity;
        let linked = order.linked_order_id;

        self.update_last_price(price);
        self.update_matching_price(price);

        if filled {
            if let Some((mut order, update)) = self.unlink_order(key) {
                order.fill_with_debit(quantity, quote, debit_quote);
                self.emit_level(ctx, &update);
                ctx.handler.on_delete_order(self, &order);
            }
        } else if let Some(update) = self.adjust_order(key, |o| o.fill_with_debit(quantity, quote, debit_quote)) {
            self.emit_level(ctx, &update);
            if let Some(order) = self.order_at(key) {
                ctx.handler.on_update_order(self, order);
            }
            if let Some(node) = self.orders.get_mut(key) {
                node.order.linked_order_id = None;
            }
        }

        self.delete_linked(ctx, linked);
    }

    /// Remove a resting order whose locked budget can no longer pay for a fill
    fn cancel_exhausted(&mut self, ctx: &MatchContext<'_>, key: usize) {
        if let Some((order, update)) = self.unlink_order(key) {
            trace!(order = order.id, "Removing order with exhausted budget");
            self.emit_level(ctx, &update);
            ctx.handler.on_delete_order(self, &order);
            self.delete_linked(ctx, order.linked_order_id);
        }
    }

    /// Delete the sibling of a linked pair if it is still in the book
    pub(crate) fn delete_linked(&mut self, ctx: &MatchContext<'_>, id: Option<OrderId>) {
        let Some(key) = id.and_then(|id| self.key_of(id)) else {
            return;
        };
        if let Some((order, update)) = self.unlink_order(key) {
            trace!(order = order.id, "Deleting linked order");
            self.emit_level(ctx, &update);
            ctx.handler.on_delete_order(self, &order);
        }
    }

    /// Match an incoming order that is not in the book against the contra side
    pub(crate) fn match_aggressor(&mut self, ctx: &MatchContext<'_>, order: &mut Order) {
        if order.is_fok() || order.is_aon() {
            if let Some(legs) = self.aggressor_chain(order) {
                for leg in legs {
                    let quote = leg.price * leg.quantity;
                    self.fill_aggressor(ctx, leg.key, order, leg.price, leg.quantity, quote);
                }
            }
            return;
        }

        let contra = match order.side {
            Side::Buy => Ladder::Ask,
            Side::Sell => Ladder::Bid,
        };
        let step = self.lot_step();

        while !order.is_executed() {
            let Some(level) = self.best(contra) else {
                return;
            };
            let price = level.price;
            if !crosses(order.side, order.price, price) {
                return;
            }
            let Some(key) = level.front() else {
                return;
            };
            let Some(resting) = self.order_at(key) else {
                return;
            };

            let resting_capped = resting.capped_quantity(price, step);
            if resting_capped.is_zero() {
                self.cancel_exhausted(ctx, key);
                continue;
            }

            let capped = order.capped_quantity(price, step);
            if capped.is_zero() {
                return;
            }

            // A resting all-or-none order is either taken whole or blocks the level
            let quantity = if resting.is_aon() {
                if resting.rest_quantity > capped || resting_capped < resting.rest_quantity {
                    return;
                }
                resting.rest_quantity
            } else {
                resting_capped.min(capped)
            };

            let quote = price * quantity;
            self.fill_aggressor(ctx, key, order, price, quantity, quote);
        }
    }

    /// Exact fill for an all-or-none or fill-or-kill aggressor, if the book has one
    pub(crate) fn aggressor_chain(&self, order: &Order) -> Option<Vec<ChainLeg>> {
        let contra = match order.side {
            Side::Buy => Ladder::Ask,
            Side::Sell => Ladder::Bid,
        };
        let step = self.lot_step();
        let required = order.rest_quantity;
        if required.is_zero() {
            return None;
        }

        let mut total = Quantity::ZERO;
        let mut cost = Quantity::ZERO;
        let mut legs = Vec::new();

        for level in self.ladder(contra).iter() {
            if !crosses(order.side, order.price, level.price) {
                break;
            }
            for (key, resting) in level.iter(&self.orders) {
                let capped = resting.capped_quantity(level.price, step);
                let quantity = if resting.is_aon() {
                    if capped < resting.rest_quantity {
                        return None;
                    }
                    resting.rest_quantity
                } else {
                    capped.min(required - total)
                };
                if quantity.is_zero() {
                    continue;
                }

                total += quantity;
                cost += level.price * quantity;
                legs.push(ChainLeg {
                    key,
                    price: level.price,
                    quantity,
                });

                if total > required {
                    return None;
                }
                if total == required {
                    let affordable = match order.side {
                        Side::Buy => order.available.is_max() || cost <= order.available,
                        Side::Sell => order.available.is_max() || total <= order.available,
                    };
                    return affordable.then_some(legs);
                }
            }
        }
        None
    }

    /// Execute an incoming order against one resting order
    fn fill_aggressor(
        &mut self,
        ctx: &MatchContext<'_>,
        key: usize,
        order: &mut Order,
        price: Price,
        quantity: Quantity,
        quote: Quantity,
    ) {
        if let Some(resting) = self.order_at(key) {
            trace!(maker = resting.id, taker = order.id, %price, %quantity, "Matching incoming order");
            ctx.handler.on_execute_trade(self, resting, order, price, quantity, quote);
        }
        self.execute_resting(ctx, key, price, quantity, quote, quote);

        ctx.handler.on_execute_order(self, order, price, quantity, quote);
        self.update_last_price(price);
        self.update_matching_price(price);
        order.fill(quantity, quote);

        let linked = order.linked_order_id.take();
        self.delete_linked(ctx, linked);
    }

    /// Price bound of a market order: contra top of book widened by the slippage
    pub(crate) fn market_bound(&self, order: &Order) -> Price {
        match order.side {
            Side::Buy => match self.best_ask() {
                Some(top) => top + order.slippage,
                None => Price::MAX,
            },
            Side::Sell => match self.best_bid() {
                Some(top) => top.saturating_sub(order.slippage),
                None => Price::ZERO,
            },
        }
    }

    /// Match a market order as a bounded immediate order
    pub(crate) fn execute_market(&mut self, ctx: &MatchContext<'_>, order: &mut Order) {
        let bound = self.market_bound(order);

        if order.quantity.is_zero() && !order.quote_quantity.is_zero() {
            let unbounded = order.slippage >= self.symbol().price_limits.max;
            let sizing_price = if unbounded || bound.is_max() || bound.is_zero() {
                match order.side {
                    Side::Buy => self.best_ask(),
                    Side::Sell => self.best_bid(),
                }
            } else {
                Some(bound)
            };
            let quantity = sizing_price
                .and_then(|price| order.quote_quantity.checked_div(price))
                .map(|quantity| quantity.floor_to(self.lot_step()))
                .unwrap_or(Quantity::ZERO);
            order.quantity = quantity;
            order.rest_quantity = quantity;
        }

        order.price = bound;
        if !order.rest_quantity.is_zero() {
            self.match_aggressor(ctx, order);
        }
    }

    /// Park the remainder of a limit order or drop it when it cannot rest
    pub(crate) fn rest_or_discard(&mut self, ctx: &MatchContext<'_>, order: Order) {
        let can_rest = !order.is_executed()
            && !order.is_ioc()
            && !order.is_fok()
            && !order.capped_quantity(order.price, self.lot_step()).is_zero();

        match Ladder::for_order(&order) {
            Some(ladder) if can_rest => {
                let update = self.link_order(order, ladder);
                self.emit_level(ctx, &update);
            }
            _ => ctx.handler.on_delete_order(self, &order),
        }
    }

    /// Activate triggered stops on both sides until none fire
    pub(crate) fn activate_stop_orders(&mut self, ctx: &MatchContext<'_>) -> bool {
        let mut result = false;
        loop {
            let mut activated = self.activate_side(ctx, Side::Buy);
            self.recalculate_trailing(ctx, Side::Buy);
            activated |= self.activate_side(ctx, Side::Sell);
            self.recalculate_trailing(ctx, Side::Sell);

            if !activated {
                return result;
            }
            result = true;
        }
    }

    fn activate_side(&mut self, ctx: &MatchContext<'_>, side: Side) -> bool {
        let mut activated = false;
        while let Some(key) = self.next_triggered(side) {
            let Some((order, update)) = self.unlink_order(key) else {
                break;
            };
            self.emit_level(ctx, &update);
            self.activate_order(ctx, order);
            activated = true;
        }
        activated
    }

    /// First stop order of `side` whose trigger condition currently holds
    pub(crate) fn next_triggered(&self, side: Side) -> Option<usize> {
        let (stops, trailing) = match side {
            Side::Buy => (Ladder::BuyStop, Ladder::TrailingBuyStop),
            Side::Sell => (Ladder::SellStop, Ladder::TrailingSellStop),
        };
        if let Some(key) = self
            .stop_reference(side)
            .and_then(|reference| self.triggered_in(stops, reference))
        {
            return Some(key);
        }
        self.trailing_reference(side)
            .and_then(|reference| self.triggered_in(trailing, reference))
    }

    fn triggered_in(&self, ladder: Ladder, reference: Price) -> Option<usize> {
        let prices = self.ladder(ladder);
        let (rising, falling): (Vec<&PriceLevel>, Vec<&PriceLevel>) = (
            prices.ascending_to(reference).collect(),
            prices.descending_to(reference).collect(),
        );

        // Stops at or below the reference fire on a rise, at or above on a fall
        let (first, second) = match ladder.side() {
            Side::Buy => ((rising, false), (falling, true)),
            Side::Sell => ((falling, false), (rising, true)),
        };
        for (levels, take_profit) in [first, second] {
            for level in levels {
                for (key, order) in level.iter(&self.orders) {
                    if order.take_profit == take_profit && stop_triggered(order, reference) {
                        return Some(key);
                    }
                }
            }
        }
        None
    }

    /// Whether a stop order would fire right now
    pub(crate) fn is_triggered(&self, order: &Order) -> bool {
        let reference = if order.is_trailing() {
            self.trailing_reference(order.side)
        } else {
            self.stop_reference(order.side)
        };
        reference.is_some_and(|reference| stop_triggered(order, reference))
    }

    /// Convert an activated stop into a market or limit order and match it
    pub(crate) fn activate_order(&mut self, ctx: &MatchContext<'_>, mut order: Order) {
        trace!(order = order.id, stop_price = %order.stop_price, "Activating stop order");

        let linked = order.linked_order_id.take();
        self.delete_linked(ctx, linked);

        match order.order_type {
            OrderType::Stop | OrderType::TrailingStop => {
                order.order_type = OrderType::Market;
                order.price = Price::ZERO;
                order.stop_price = Price::ZERO;
                order.time_in_force = if order.is_fok() || order.is_aon() {
                    TimeInForce::Fok
                } else {
                    TimeInForce::Ioc
                };
                ctx.handler.on_update_order(self, &order);
                self.execute_market(ctx, &mut order);
                ctx.handler.on_delete_order(self, &order);
            }
            _ => {
                order.order_type = OrderType::Limit;
                order.stop_price = Price::ZERO;
                ctx.handler.on_update_order(self, &order);
                self.match_aggressor(ctx, &mut order);
                self.rest_or_discard(ctx, order);
            }
        }
    }

    /// Move trailing stops of `side` after the trailing reference improved
    pub(crate) fn recalculate_trailing(&mut self, ctx: &MatchContext<'_>, side: Side) {
        let ladder = match side {
            Side::Buy => {
                let new_price = self.trailing_price_ask();
                if new_price >= self.trailing_ask {
                    return;
                }
                self.trailing_ask = new_price;
                Ladder::TrailingBuyStop
            }
            Side::Sell => {
                let new_price = self.trailing_price_bid();
                if new_price <= self.trailing_bid {
                    return;
                }
                self.trailing_bid = new_price;
                Ladder::TrailingSellStop
            }
        };
        let Some(reference) = self.trailing_reference(side) else {
            return;
        };

        let keys: Vec<usize> = self
            .ladder(ladder)
            .iter()
            .flat_map(|level| level.iter(&self.orders).map(|(key, _)| key))
            .collect();

        for key in keys {
            let Some(order) = self.order_at(key) else {
                continue;
            };
            let new_stop = trailing_stop_price(order, reference);
            if new_stop == order.stop_price {
                continue;
            }
            if let Some((mut order, _)) = self.unlink_order(key) {
                trace!(order = order.id, old = %order.stop_price, new = %new_stop, "Moving trailing stop");
                move_trailing_stop(&mut order, new_stop);
                ctx.handler.on_update_order(self, &order);
                self.link_order(order, ladder);
            }
        }
    }
}
