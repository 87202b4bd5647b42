use crate::orderbook::error::{OrderBookError, OrderBookResult};
use crate::utils::fixed_point::FixedPoint;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type OrderId = u64;
pub type SymbolId = u32;
pub type Price = FixedPoint;
pub type Quantity = FixedPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopLimit,
    TrailingStop,
    TrailingStopLimit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::Stop => "STOP",
            OrderType::StopLimit => "STOP-LIMIT",
            OrderType::TrailingStop => "TRAILING-STOP",
            OrderType::TrailingStopLimit => "TRAILING-STOP-LIMIT",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-Till-Cancelled
    Gtc,
    /// Immediate-Or-Cancel
    Ioc,
    /// Fill-Or-Kill
    Fok,
    /// All-Or-None
    Aon,
}

/// Reference price used to trigger stop orders of a book
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopPriceMode {
    /// Best market price on the contra side
    #[default]
    Market,
    /// Externally published mark price
    Mark,
    /// Externally published index price
    Index,
}

/// Inclusive `{min, max, step}` bounds for prices or lot sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub min: FixedPoint,
    pub max: FixedPoint,
    pub step: FixedPoint,
}

impl Limits {
    pub fn new(min: FixedPoint, max: FixedPoint, step: FixedPoint) -> Self {
        Self { min, max, step }
    }

    pub fn validate(&self) -> bool {
        self.min < self.max && !self.step.is_zero() && self.min >= self.step
    }

    /// True when `value` lies inside the bounds on a step boundary
    pub fn contains(&self, value: FixedPoint) -> bool {
        value >= self.min && value <= self.max && value.is_multiple_of(self.step)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub price_limits: Limits,
    pub lot_limits: Limits,
}

impl Symbol {
    pub fn new(id: SymbolId, name: impl Into<String>, price_limits: Limits, lot_limits: Limits) -> Self {
        Self {
            id,
            name: name.into(),
            price_limits,
            lot_limits,
        }
    }

    pub fn validate(&self) -> OrderBookResult<()> {
        if self.name.is_empty() || !self.price_limits.validate() || !self.lot_limits.validate() {
            return Err(OrderBookError::InvalidSymbol);
        }
        Ok(())
    }

    /// Check an order against the price and lot limits of this symbol
    pub fn validate_order(&self, order: &Order) -> OrderBookResult<()> {
        if order.symbol_id != self.id {
            return Err(OrderBookError::InvalidSymbol);
        }

        if order.has_limit_price() && !self.price_limits.contains(order.price) {
            return Err(OrderBookError::PriceOutOfRange);
        }

        if order.has_stop_price() && !self.price_limits.contains(order.stop_price) {
            return Err(OrderBookError::PriceOutOfRange);
        }

        if !order.quantity.is_zero() && !self.lot_limits.contains(order.quantity) {
            return Err(OrderBookError::QuantityOutOfRange);
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol_id: SymbolId,
    pub order_type: OrderType,
    pub side: Side,
    pub time_in_force: TimeInForce,
    pub price: Price,
    pub stop_price: Price,
    pub quantity: Quantity,
    /// Notional size for market orders sized by quote amount
    pub quote_quantity: Quantity,
    /// Zero hides the order, `MAX` shows it fully
    pub max_visible: Quantity,
    /// Distance from the top of book a market order may walk, `MAX` disables the bound
    pub slippage: Price,
    pub trailing_distance: Price,
    pub trailing_step: Price,
    /// Locked budget: quote for buys, base for sells. `MAX` is unrestricted.
    pub available: Quantity,
    pub rest_quantity: Quantity,
    pub executed_quantity: Quantity,
    pub executed_quote_quantity: Quantity,
    pub take_profit: bool,
    pub linked_order_id: Option<OrderId>,
}

impl Order {
    fn base(id: OrderId, symbol_id: SymbolId, order_type: OrderType, side: Side, quantity: Quantity) -> Self {
        Self {
            id,
            symbol_id,
            order_type,
            side,
            time_in_force: TimeInForce::Gtc,
            price: Price::ZERO,
            stop_price: Price::ZERO,
            quantity,
            quote_quantity: Quantity::ZERO,
            max_visible: Quantity::MAX,
            slippage: Price::MAX,
            trailing_distance: Price::ZERO,
            trailing_step: Price::ZERO,
            available: Quantity::MAX,
            rest_quantity: quantity,
            executed_quantity: Quantity::ZERO,
            executed_quote_quantity: Quantity::ZERO,
            take_profit: false,
            linked_order_id: None,
        }
    }

    pub fn limit(id: OrderId, symbol_id: SymbolId, side: Side, price: Price, quantity: Quantity) -> Self {
        Self {
            price,
            ..Self::base(id, symbol_id, OrderType::Limit, side, quantity)
        }
    }

    pub fn market(id: OrderId, symbol_id: SymbolId, side: Side, quantity: Quantity) -> Self {
        Self {
            time_in_force: TimeInForce::Ioc,
            ..Self::base(id, symbol_id, OrderType::Market, side, quantity)
        }
    }

    /// Market order sized by notional instead of base quantity
    pub fn market_quote(id: OrderId, symbol_id: SymbolId, side: Side, quote_quantity: Quantity) -> Self {
        Self {
            quote_quantity,
            ..Self::market(id, symbol_id, side, Quantity::ZERO)
        }
    }

    pub fn stop(id: OrderId, symbol_id: SymbolId, side: Side, stop_price: Price, quantity: Quantity) -> Self {
        Self {
            stop_price,
            ..Self::base(id, symbol_id, OrderType::Stop, side, quantity)
        }
    }

    pub fn stop_limit(
        id: OrderId,
        symbol_id: SymbolId,
        side: Side,
        stop_price: Price,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        Self {
            stop_price,
            price,
            ..Self::base(id, symbol_id, OrderType::StopLimit, side, quantity)
        }
    }

    pub fn trailing_stop(
        id: OrderId,
        symbol_id: SymbolId,
        side: Side,
        stop_price: Price,
        quantity: Quantity,
        trailing_distance: Price,
        trailing_step: Price,
    ) -> Self {
        Self {
            stop_price,
            trailing_distance,
            trailing_step,
            ..Self::base(id, symbol_id, OrderType::TrailingStop, side, quantity)
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn trailing_stop_limit(
        id: OrderId,
        symbol_id: SymbolId,
        side: Side,
        stop_price: Price,
        price: Price,
        quantity: Quantity,
        trailing_distance: Price,
        trailing_step: Price,
    ) -> Self {
        Self {
            stop_price,
            price,
            trailing_distance,
            trailing_step,
            ..Self::base(id, symbol_id, OrderType::TrailingStopLimit, side, quantity)
        }
    }

    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }

    pub fn with_max_visible(mut self, max_visible: Quantity) -> Self {
        self.max_visible = max_visible;
        self
    }

    pub fn with_slippage(mut self, slippage: Price) -> Self {
        self.slippage = slippage;
        self
    }

    pub fn with_available(mut self, available: Quantity) -> Self {
        self.available = available;
        self
    }

    pub fn with_take_profit(mut self, take_profit: bool) -> Self {
        self.take_profit = take_profit;
        self
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.side == Side::Sell
    }

    pub fn is_limit(&self) -> bool {
        self.order_type == OrderType::Limit
    }

    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }

    pub fn is_stop(&self) -> bool {
        self.order_type == OrderType::Stop
    }

    pub fn is_stop_limit(&self) -> bool {
        self.order_type == OrderType::StopLimit
    }

    pub fn is_trailing_stop(&self) -> bool {
        self.order_type == OrderType::TrailingStop
    }

    pub fn is_trailing_stop_limit(&self) -> bool {
        self.order_type == OrderType::TrailingStopLimit
    }

    /// Any of the four stop flavours
    pub fn is_stop_family(&self) -> bool {
        matches!(
            self.order_type,
            OrderType::Stop | OrderType::StopLimit | OrderType::TrailingStop | OrderType::TrailingStopLimit
        )
    }

    pub fn is_trailing(&self) -> bool {
        matches!(self.order_type, OrderType::TrailingStop | OrderType::TrailingStopLimit)
    }

    pub fn has_limit_price(&self) -> bool {
        matches!(
            self.order_type,
            OrderType::Limit | OrderType::StopLimit | OrderType::TrailingStopLimit
        )
    }

    pub fn has_stop_price(&self) -> bool {
        self.is_stop_family()
    }

    pub fn is_gtc(&self) -> bool {
        self.time_in_force == TimeInForce::Gtc
    }

    pub fn is_ioc(&self) -> bool {
        self.time_in_force == TimeInForce::Ioc
    }

    pub fn is_fok(&self) -> bool {
        self.time_in_force == TimeInForce::Fok
    }

    pub fn is_aon(&self) -> bool {
        self.time_in_force == TimeInForce::Aon
    }

    /// An order is executed once nothing is left to fill
    pub fn is_executed(&self) -> bool {
        self.rest_quantity.is_zero()
    }

    pub fn visible_quantity(&self) -> Quantity {
        self.rest_quantity.min(self.max_visible)
    }

    pub fn hidden_quantity(&self) -> Quantity {
        self.rest_quantity - self.visible_quantity()
    }

    pub fn is_hidden(&self) -> bool {
        self.max_visible.is_zero()
    }

    pub fn is_iceberg(&self) -> bool {
        !self.max_visible.is_zero() && self.max_visible < self.quantity
    }

    /// Rest quantity that the locked budget can still pay for at `price`,
    /// rounded down to the lot step.
    pub fn capped_quantity(&self, price: Price, lot_step: Quantity) -> Quantity {
        if self.available.is_max() {
            return self.rest_quantity;
        }
        match self.side {
            Side::Buy => match self.available.checked_div(price) {
                Some(affordable) => self.rest_quantity.min(affordable.floor_to(lot_step)),
                None => self.rest_quantity,
            },
            Side::Sell => self.rest_quantity.min(self.available),
        }
    }

    /// Book an execution of `quantity` for `quote` notional against the counters
    /// and the locked budget.
    pub fn fill(&mut self, quantity: Quantity, quote: Quantity) {
        self.fill_with_debit(quantity, quote, quote);
    }

    /// Like `fill`, but a buy is debited `debit_quote` instead of the traded notional
    pub fn fill_with_debit(&mut self, quantity: Quantity, quote: Quantity, debit_quote: Quantity) {
        debug_assert!(quantity <= self.rest_quantity, "overfill of order {}", self.id);
        let quantity = quantity.min(self.rest_quantity);
        self.executed_quantity += quantity;
        self.executed_quote_quantity += quote;
        self.rest_quantity -= quantity;
        self.debit(match self.side {
            Side::Buy => debit_quote,
            Side::Sell => quantity,
        });
    }

    /// Remove `amount` from the locked budget, never below zero
    pub fn debit(&mut self, amount: Quantity) {
        if !self.available.is_max() {
            self.available -= amount.min(self.available);
        }
    }

    /// Sanity checks that do not depend on the symbol or the book
    pub fn validate(&self) -> OrderBookResult<()> {
        if self.id == 0 {
            return Err(OrderBookError::InvalidOrderId);
        }

        if !self.executed_quantity.is_zero() || self.rest_quantity != self.quantity {
            return Err(OrderBookError::InvalidQuantity);
        }

        match self.order_type {
            OrderType::Market => {
                if self.quantity.is_zero() && self.quote_quantity.is_zero() {
                    return Err(OrderBookError::InvalidQuantity);
                }
                if !self.quantity.is_zero() && !self.quote_quantity.is_zero() {
                    return Err(OrderBookError::InvalidQuantity);
                }
            }
            _ => {
                if self.quantity.is_zero() {
                    return Err(OrderBookError::InvalidQuantity);
                }
                if !self.quote_quantity.is_zero() {
                    return Err(OrderBookError::InvalidQuantity);
                }
            }
        }

        if self.has_limit_price() && (self.price.is_zero() || self.price.is_max()) {
            return Err(OrderBookError::InvalidPrice);
        }

        if self.has_stop_price() && (self.stop_price.is_zero() || self.stop_price.is_max()) {
            return Err(OrderBookError::InvalidStopPrice);
        }

        if self.is_trailing() && (self.trailing_distance.is_zero() || self.trailing_step > self.trailing_distance) {
            return Err(OrderBookError::InvalidTrailing);
        }

        Ok(())
    }

    /// Check that the locked budget covers the order at its own price
    pub fn validate_available(&self) -> OrderBookResult<()> {
        if self.available.is_max() {
            return Ok(());
        }
        let required = match self.side {
            Side::Buy if self.has_limit_price() => self.price * self.quantity,
            Side::Sell => self.quantity,
            // Unpriced buys only need some budget to start with
            Side::Buy => Quantity::ZERO,
        };
        if self.available.is_zero() || self.available < required {
            return Err(OrderBookError::InsufficientAvailable);
        }
        Ok(())
    }
}

/// Depth snapshot of one price level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevelInfo {
    pub price: Price,
    pub volume: Quantity,
    pub visible: Quantity,
    pub order_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol_id: SymbolId,
    pub sequence: u64,
    pub bids: Vec<PriceLevelInfo>,
    pub asks: Vec<PriceLevelInfo>,
    pub last_bid_price: Price,
    pub last_ask_price: Price,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> FixedPoint {
        s.parse().unwrap()
    }

    fn symbol() -> Symbol {
        Symbol::new(
            1,
            "BTC-USD",
            Limits::new(fp("0.01"), fp("100000"), fp("0.01")),
            Limits::new(fp("0.001"), fp("1000"), fp("0.001")),
        )
    }

    #[test]
    fn test_order_creation() {
        let order = Order::limit(1, 1, Side::Buy, fp("150"), fp("100"));

        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.price, fp("150"));
        assert_eq!(order.quantity, fp("100"));
        assert_eq!(order.rest_quantity, fp("100"));
        assert!(order.is_gtc());
        assert!(order.available.is_max());
        assert_eq!(order.visible_quantity(), fp("100"));
        assert!(order.validate().is_ok());
    }

    #[test]
    fn test_order_fill() {
        let mut order = Order::limit(1, 1, Side::Buy, fp("10"), fp("100")).with_available(fp("1000"));

        order.fill(fp("30"), fp("300"));
        assert_eq!(order.executed_quantity, fp("30"));
        assert_eq!(order.rest_quantity, fp("70"));
        assert_eq!(order.available, fp("700"));

        order.fill(fp("70"), fp("700"));
        assert!(order.is_executed());
        assert!(order.available.is_zero());
    }

    #[test]
    fn test_visibility() {
        let iceberg = Order::limit(1, 1, Side::Sell, fp("10"), fp("100")).with_max_visible(fp("10"));
        assert!(iceberg.is_iceberg());
        assert_eq!(iceberg.visible_quantity(), fp("10"));
        assert_eq!(iceberg.hidden_quantity(), fp("90"));

        let hidden = Order::limit(2, 1, Side::Sell, fp("10"), fp("100")).with_max_visible(Quantity::ZERO);
        assert!(hidden.is_hidden());
        assert!(hidden.visible_quantity().is_zero());
    }

    #[test]
    fn test_capped_quantity() {
        let buy = Order::limit(1, 1, Side::Buy, fp("30"), fp("10")).with_available(fp("100"));
        assert_eq!(buy.capped_quantity(fp("30"), fp("1")), fp("3"));
        assert_eq!(buy.capped_quantity(fp("30"), fp("0.001")), fp("3.333"));

        let sell = Order::limit(2, 1, Side::Sell, fp("30"), fp("10")).with_available(fp("4"));
        assert_eq!(sell.capped_quantity(fp("30"), fp("1")), fp("4"));

        let unrestricted = Order::limit(3, 1, Side::Buy, fp("30"), fp("10"));
        assert_eq!(unrestricted.capped_quantity(fp("30"), fp("1")), fp("10"));
    }

    #[test]
    fn test_order_validation() {
        assert_eq!(
            Order::limit(0, 1, Side::Buy, fp("1"), fp("1")).validate(),
            Err(OrderBookError::InvalidOrderId)
        );
        assert_eq!(
            Order::limit(1, 1, Side::Buy, fp("1"), Quantity::ZERO).validate(),
            Err(OrderBookError::InvalidQuantity)
        );
        assert_eq!(
            Order::limit(1, 1, Side::Buy, Price::ZERO, fp("1")).validate(),
            Err(OrderBookError::InvalidPrice)
        );
        assert_eq!(
            Order::stop(1, 1, Side::Buy, Price::ZERO, fp("1")).validate(),
            Err(OrderBookError::InvalidStopPrice)
        );
        assert_eq!(
            Order::trailing_stop(1, 1, Side::Sell, fp("10"), fp("1"), Price::ZERO, Price::ZERO).validate(),
            Err(OrderBookError::InvalidTrailing)
        );
        assert!(Order::market_quote(1, 1, Side::Buy, fp("100")).validate().is_ok());
    }

    #[test]
    fn test_available_validation() {
        let buy = Order::limit(1, 1, Side::Buy, fp("10"), fp("5")).with_available(fp("49"));
        assert_eq!(buy.validate_available(), Err(OrderBookError::InsufficientAvailable));

        let buy = Order::limit(1, 1, Side::Buy, fp("10"), fp("5")).with_available(fp("50"));
        assert!(buy.validate_available().is_ok());

        let sell = Order::market(2, 1, Side::Sell, fp("5")).with_available(fp("4"));
        assert_eq!(sell.validate_available(), Err(OrderBookError::InsufficientAvailable));
    }

    #[test]
    fn test_symbol_limits() {
        let symbol = symbol();
        assert!(symbol.validate().is_ok());

        let order = Order::limit(1, 1, Side::Buy, fp("10.005"), fp("1"));
        assert_eq!(symbol.validate_order(&order), Err(OrderBookError::PriceOutOfRange));

        let order = Order::limit(1, 1, Side::Buy, fp("10"), fp("5000"));
        assert_eq!(symbol.validate_order(&order), Err(OrderBookError::QuantityOutOfRange));

        let order = Order::limit(1, 2, Side::Buy, fp("10"), fp("1"));
        assert_eq!(symbol.validate_order(&order), Err(OrderBookError::InvalidSymbol));

        let bad = Symbol::new(2, "BAD", Limits::new(fp("1"), fp("1"), fp("1")), symbol.lot_limits);
        assert_eq!(bad.validate(), Err(OrderBookError::InvalidSymbol));
    }

    #[test]
    fn test_order_serialization() {
        let order = Order::stop_limit(7, 1, Side::Sell, fp("95"), fp("94.5"), fp("2"));
        let json = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order, back);
    }
}
