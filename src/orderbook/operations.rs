use tracing::debug;

use crate::orderbook::book::OrderBook;
use crate::orderbook::error::{OrderBookError, OrderBookResult};
use crate::orderbook::handler::MatchContext;
use crate::orderbook::matching::{is_take_profit, move_trailing_stop, trailing_stop_price};
use crate::orderbook::price_level::Ladder;
use crate::orderbook::types::{Order, OrderId, OrderType, Price, Quantity, Side, TimeInForce};

/// Order lifecycle operations. Every public operation validates first and
/// only then touches the book, so a failed call leaves no trace.
impl OrderBook {
    /// Add a new order to the book
    pub fn add_order(&mut self, ctx: &MatchContext<'_>, order: Order) -> OrderBookResult<()> {
        debug!("Adding order: {:?}", order);

        let order = self.prepare_order(order)?;
        self.insert_order(ctx, order);
        self.finish(ctx);
        Ok(())
    }

    /// Add a one-cancels-other pair: a stop (or stop-limit) leg and a limit leg
    pub fn add_orders_pair(&mut self, ctx: &MatchContext<'_>, stop: Order, limit: Order) -> OrderBookResult<()> {
        debug!("Adding OCO pair: stop {} / limit {}", stop.id, limit.id);

        if !matches!(stop.order_type, OrderType::Stop | OrderType::StopLimit) || !limit.is_limit() {
            return Err(OrderBookError::InvalidOrderType);
        }
        let (mut stop, mut limit) = self.prepare_pair(stop, limit)?;

        let side = stop.side;
        let reference = self.stop_reference(side);
        let ordered = match side {
            Side::Buy => {
                limit.price < stop.stop_price
                    && reference.map_or(true, |r| limit.price < r && r < stop.stop_price)
            }
            Side::Sell => {
                stop.stop_price < limit.price
                    && reference.map_or(true, |r| stop.stop_price < r && r < limit.price)
            }
        };
        if !ordered {
            return Err(OrderBookError::InvalidLinkedPrices);
        }

        stop.take_profit = false;
        stop.linked_order_id = Some(limit.id);
        limit.linked_order_id = Some(stop.id);

        self.insert_pair(ctx, limit, stop);
        self.finish(ctx);
        Ok(())
    }

    /// Add a take-profit / stop-loss pair of stop-limit orders
    pub fn add_tpsl(&mut self, ctx: &MatchContext<'_>, take_profit: Order, stop_loss: Order) -> OrderBookResult<()> {
        self.add_tpsl_legs(ctx, take_profit, stop_loss, OrderType::StopLimit)
    }

    /// Add a take-profit / stop-loss pair of stop (market on trigger) orders
    pub fn add_tpsl_market(
        &mut self,
        ctx: &MatchContext<'_>,
        take_profit: Order,
        stop_loss: Order,
    ) -> OrderBookResult<()> {
        self.add_tpsl_legs(ctx, take_profit, stop_loss, OrderType::Stop)
    }

    fn add_tpsl_legs(
        &mut self,
        ctx: &MatchContext<'_>,
        take_profit: Order,
        stop_loss: Order,
        order_type: OrderType,
    ) -> OrderBookResult<()> {
        debug!(
            "Adding TP/SL pair: take-profit {} / stop-loss {}",
            take_profit.id, stop_loss.id
        );

        if take_profit.order_type != order_type || stop_loss.order_type != order_type {
            return Err(OrderBookError::InvalidOrderType);
        }
        let (mut take_profit, mut stop_loss) = self.prepare_pair(take_profit, stop_loss)?;

        let side = take_profit.side;
        let (tp, sl) = (take_profit.stop_price, stop_loss.stop_price);
        let reference = self.stop_reference(side);
        let ordered = match side {
            Side::Sell => sl < tp && reference.map_or(true, |r| sl < r && r < tp),
            Side::Buy => tp < sl && reference.map_or(true, |r| tp < r && r < sl),
        };
        if !ordered {
            return Err(OrderBookError::InvalidLinkedPrices);
        }

        take_profit.take_profit = true;
        stop_loss.take_profit = false;
        take_profit.linked_order_id = Some(stop_loss.id);
        stop_loss.linked_order_id = Some(take_profit.id);

        self.insert_pair(ctx, stop_loss, take_profit);
        self.finish(ctx);
        Ok(())
    }

    /// Shrink the rest quantity of an order, deleting it when nothing is left
    pub fn reduce_order(&mut self, ctx: &MatchContext<'_>, id: OrderId, quantity: Quantity) -> OrderBookResult<()> {
        debug!("Reducing order {} by {}", id, quantity);

        if quantity.is_zero() {
            return Err(OrderBookError::InvalidQuantity);
        }
        let key = self.key_of(id).ok_or(OrderBookError::OrderNotFound)?;
        let rest = self.order_at(key).map(|o| o.rest_quantity).unwrap_or_default();
        let reduce = quantity.min(rest);

        if reduce == rest {
            self.delete_with_sibling(ctx, key);
        } else {
            if let Some(update) = self.adjust_order(key, |o| {
                o.quantity -= reduce;
                o.rest_quantity -= reduce;
            }) {
                self.emit_level(ctx, &update);
            }
            if let Some(order) = self.order_at(key) {
                ctx.handler.on_update_order(self, order);
            }
        }

        self.finish(ctx);
        Ok(())
    }

    /// Amend price and quantity; `new_quantity` becomes the new rest quantity
    pub fn modify_order(
        &mut self,
        ctx: &MatchContext<'_>,
        id: OrderId,
        new_price: Price,
        new_quantity: Quantity,
    ) -> OrderBookResult<()> {
        debug!("Modifying order {} to {} @ {}", id, new_quantity, new_price);

        let key = self.amendable(id, new_price, new_quantity)?;
        let executed = self.order_at(key).map(|o| o.executed_quantity).unwrap_or_default();
        self.check_amend_available(key, new_price, new_quantity)?;

        self.reprice(ctx, key, new_price, executed + new_quantity, new_quantity);
        self.finish(ctx);
        Ok(())
    }

    /// Amend price and total quantity. The rest can never exceed what is left
    /// after executions already applied, so in-flight amendments cannot overfill.
    pub fn mitigate_order(
        &mut self,
        ctx: &MatchContext<'_>,
        id: OrderId,
        new_price: Price,
        new_quantity: Quantity,
    ) -> OrderBookResult<()> {
        debug!("Mitigating order {} to {} @ {}", id, new_quantity, new_price);

        let key = self.amendable(id, new_price, new_quantity)?;
        let executed = self.order_at(key).map(|o| o.executed_quantity).unwrap_or_default();
        let rest = new_quantity.saturating_sub(executed);

        if rest.is_zero() {
            self.delete_with_sibling(ctx, key);
        } else {
            self.check_amend_available(key, new_price, rest)?;
            self.reprice(ctx, key, new_price, new_quantity, rest);
        }
        self.finish(ctx);
        Ok(())
    }

    /// Replace an order with a fresh one under a new id
    pub fn replace_order(
        &mut self,
        ctx: &MatchContext<'_>,
        id: OrderId,
        new_id: OrderId,
        new_price: Price,
        new_quantity: Quantity,
    ) -> OrderBookResult<()> {
        debug!("Replacing order {} with {}: {} @ {}", id, new_id, new_quantity, new_price);

        if new_id == 0 {
            return Err(OrderBookError::InvalidOrderId);
        }
        if new_id != id && self.contains(new_id) {
            return Err(OrderBookError::DuplicateOrder);
        }
        let key = self.amendable(id, new_price, new_quantity)?;
        self.check_amend_available(key, new_price, new_quantity)?;

        let Some((old, update)) = self.unlink_order(key) else {
            return Err(OrderBookError::OrderNotFound);
        };
        self.emit_level(ctx, &update);
        ctx.handler.on_delete_order(self, &old);

        let order = Order {
            id: new_id,
            price: new_price,
            quantity: new_quantity,
            rest_quantity: new_quantity,
            executed_quantity: Quantity::ZERO,
            executed_quote_quantity: Quantity::ZERO,
            ..old
        };
        if let Some(sibling) = order.linked_order_id.and_then(|sibling| self.key_of(sibling)) {
            if let Some(node) = self.orders.get_mut(sibling) {
                node.order.linked_order_id = Some(new_id);
            }
        }

        self.add_limit(ctx, order);
        self.finish(ctx);
        Ok(())
    }

    /// Cancel an order and its linked sibling
    pub fn delete_order(&mut self, ctx: &MatchContext<'_>, id: OrderId) -> OrderBookResult<()> {
        debug!("Deleting order: {}", id);

        let key = self.key_of(id).ok_or(OrderBookError::OrderNotFound)?;
        self.delete_with_sibling(ctx, key);
        self.finish(ctx);
        Ok(())
    }

    /// Manually execute an order at its own price
    pub fn execute_order(&mut self, ctx: &MatchContext<'_>, id: OrderId, quantity: Quantity) -> OrderBookResult<()> {
        debug!("Executing order {} for {}", id, quantity);
        self.execute_manual(ctx, id, None, quantity)
    }

    /// Manually execute an order at the given price
    pub fn execute_order_by_price(
        &mut self,
        ctx: &MatchContext<'_>,
        id: OrderId,
        price: Price,
        quantity: Quantity,
    ) -> OrderBookResult<()> {
        debug!("Executing order {} for {} @ {}", id, quantity, price);

        if price.is_zero() || price.is_max() {
            return Err(OrderBookError::InvalidPrice);
        }
        self.execute_manual(ctx, id, Some(price), quantity)
    }

    /// React to a new mark or index price
    pub fn on_reference_price_changed(&mut self, ctx: &MatchContext<'_>, force: bool) {
        if force {
            self.run_matching(ctx);
        } else {
            self.finish(ctx);
        }
    }

    fn execute_manual(
        &mut self,
        ctx: &MatchContext<'_>,
        id: OrderId,
        price: Option<Price>,
        quantity: Quantity,
    ) -> OrderBookResult<()> {
        if ctx.matching {
            return Err(OrderBookError::MatchingEnabled);
        }
        if quantity.is_zero() {
            return Err(OrderBookError::InvalidQuantity);
        }
        let key = self.key_of(id).ok_or(OrderBookError::OrderNotFound)?;
        let Some(order) = self.order_at(key) else {
            return Err(OrderBookError::OrderNotFound);
        };

        let own_price = if order.price.is_zero() {
            order.stop_price
        } else {
            order.price
        };
        let exec_price = price.unwrap_or(own_price);
        let debit_price = if price.is_some() && ctx.debit_at_order_price {
            own_price
        } else {
            exec_price
        };

        let step = self.symbol().lot_limits.step;
        let executed = quantity
            .min(order.rest_quantity)
            .floor_to(step)
            .min(order.capped_quantity(debit_price, step));

        if !executed.is_zero() {
            let quote = exec_price * executed;
            let debit_quote = debit_price * executed;
            self.execute_resting(ctx, key, exec_price, executed, quote, debit_quote);
        }

        self.finish(ctx);
        Ok(())
    }

    /// Validate an order against this book and normalise it for insertion
    fn prepare_order(&self, mut order: Order) -> OrderBookResult<Order> {
        order.validate()?;
        self.symbol().validate_order(&order)?;
        order.validate_available()?;
        if self.contains(order.id) {
            return Err(OrderBookError::DuplicateOrder);
        }
        if order.linked_order_id.is_some() {
            return Err(OrderBookError::InvalidOrderId);
        }

        order.slippage = order.slippage.min(self.symbol().price_limits.max);
        if order.is_market() {
            order.time_in_force = if order.is_fok() || order.is_aon() {
                TimeInForce::Fok
            } else {
                TimeInForce::Ioc
            };
        }
        Ok(order)
    }

    fn prepare_pair(&self, first: Order, second: Order) -> OrderBookResult<(Order, Order)> {
        if first.side != second.side {
            return Err(OrderBookError::InvalidOrderSide);
        }
        if first.id == second.id {
            return Err(OrderBookError::DuplicateOrder);
        }
        Ok((self.prepare_order(first)?, self.prepare_order(second)?))
    }

    /// Dispatch a validated order to the insert routine of its type
    fn insert_order(&mut self, ctx: &MatchContext<'_>, order: Order) {
        match order.order_type {
            OrderType::Limit => self.add_limit(ctx, order),
            OrderType::Market => self.add_market(ctx, order),
            _ => self.add_stop(ctx, order),
        }
    }

    /// Insert the first leg of a linked pair, then the second one unless the
    /// first has already traded or fired
    fn insert_pair(&mut self, ctx: &MatchContext<'_>, first: Order, mut second: Order) {
        let (first_id, second_id) = (first.id, second.id);
        self.insert_order(ctx, first);

        let first_intact = self
            .order(first_id)
            .is_some_and(|o| o.linked_order_id == Some(second_id) && o.executed_quantity.is_zero());

        if first_intact {
            self.insert_order(ctx, second);
            return;
        }

        if let Some(node) = self.key_of(first_id).and_then(|key| self.orders.get_mut(key)) {
            node.order.linked_order_id = None;
        }
        second.linked_order_id = None;
        ctx.handler.on_add_order(self, &second);
        ctx.handler.on_delete_order(self, &second);
    }

    pub(crate) fn add_limit(&mut self, ctx: &MatchContext<'_>, mut order: Order) {
        ctx.handler.on_add_order(self, &order);
        if self.is_matching(ctx.matching) {
            self.match_aggressor(ctx, &mut order);
        }
        self.rest_or_discard(ctx, order);
    }

    fn add_market(&mut self, ctx: &MatchContext<'_>, mut order: Order) {
        ctx.handler.on_add_order(self, &order);
        if self.is_matching(ctx.matching) {
            self.execute_market(ctx, &mut order);
        }
        ctx.handler.on_delete_order(self, &order);
    }

    fn add_stop(&mut self, ctx: &MatchContext<'_>, mut order: Order) {
        if order.is_trailing() {
            order.take_profit = false;
            if let Some(reference) = self.trailing_reference(order.side) {
                let new_stop = trailing_stop_price(&order, reference);
                move_trailing_stop(&mut order, new_stop);
            }
        } else if order.linked_order_id.is_none() {
            order.take_profit = self
                .stop_reference(order.side)
                .is_some_and(|reference| is_take_profit(order.side, order.stop_price, reference));
        }

        ctx.handler.on_add_order(self, &order);

        if self.is_matching(ctx.matching) && self.is_triggered(&order) {
            self.activate_order(ctx, order);
            return;
        }

        if let Some(ladder) = Ladder::for_order(&order) {
            let update = self.link_order(order, ladder);
            self.emit_level(ctx, &update);
        }
    }

    /// Remove an order after its linked sibling
    fn delete_with_sibling(&mut self, ctx: &MatchContext<'_>, key: usize) {
        let linked = self.order_at(key).and_then(|o| o.linked_order_id);
        self.delete_linked(ctx, linked);

        if let Some((order, update)) = self.unlink_order(key) {
            self.emit_level(ctx, &update);
            ctx.handler.on_delete_order(self, &order);
        }
    }

    /// Common validation of modify, mitigate and replace
    fn amendable(&self, id: OrderId, new_price: Price, new_quantity: Quantity) -> OrderBookResult<usize> {
        let key = self.key_of(id).ok_or(OrderBookError::OrderNotFound)?;
        if !self.order_at(key).is_some_and(Order::is_limit) {
            return Err(OrderBookError::InvalidOrderType);
        }
        if new_price.is_zero() || new_price.is_max() {
            return Err(OrderBookError::InvalidPrice);
        }
        if new_quantity.is_zero() {
            return Err(OrderBookError::InvalidQuantity);
        }
        if !self.symbol().price_limits.contains(new_price) {
            return Err(OrderBookError::PriceOutOfRange);
        }
        if !self.symbol().lot_limits.contains(new_quantity) {
            return Err(OrderBookError::QuantityOutOfRange);
        }
        Ok(key)
    }

    fn check_amend_available(&self, key: usize, new_price: Price, rest: Quantity) -> OrderBookResult<()> {
        let Some(order) = self.order_at(key) else {
            return Err(OrderBookError::OrderNotFound);
        };
        if order.available.is_max() {
            return Ok(());
        }
        let required = match order.side {
            Side::Buy => new_price * rest,
            Side::Sell => rest,
        };
        if order.available < required {
            return Err(OrderBookError::InsufficientAvailable);
        }
        Ok(())
    }

    /// Pull an order out of its level, amend it and run it through matching again
    fn reprice(&mut self, ctx: &MatchContext<'_>, key: usize, price: Price, quantity: Quantity, rest: Quantity) {
        let Some((mut order, update)) = self.unlink_order(key) else {
            return;
        };
        self.emit_level(ctx, &update);

        order.price = price;
        order.quantity = quantity;
        order.rest_quantity = rest;
        ctx.handler.on_update_order(self, &order);

        if self.is_matching(ctx.matching) {
            self.match_aggressor(ctx, &mut order);
        }
        self.rest_or_discard(ctx, order);
    }
}
