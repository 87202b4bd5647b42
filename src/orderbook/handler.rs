//! Observer interface through which the engine reports every state change.
//!
//! All callbacks are invoked synchronously from inside the operation that
//! caused them, on the thread that owns the book. Execution callbacks fire
//! before the order counters are touched, so the `Order` passed in still
//! shows the pre-execution state.

use crate::orderbook::book::OrderBook;
use crate::orderbook::error::OrderBookError;
use crate::orderbook::price_level::PriceLevelUpdate;
use crate::orderbook::types::{Order, OrderId, Price, Quantity, SymbolId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[allow(unused_variables)]
pub trait MarketHandler: Send + Sync {
    fn on_add_order_book(&self, book: &OrderBook) {}
    fn on_update_order_book(&self, book: &OrderBook, top: bool) {}
    fn on_delete_order_book(&self, book: &OrderBook) {}

    fn on_add_price_level(&self, book: &OrderBook, update: &PriceLevelUpdate) {}
    fn on_update_price_level(&self, book: &OrderBook, update: &PriceLevelUpdate) {}
    fn on_delete_price_level(&self, book: &OrderBook, update: &PriceLevelUpdate) {}

    fn on_add_order(&self, book: &OrderBook, order: &Order) {}
    fn on_update_order(&self, book: &OrderBook, order: &Order) {}
    fn on_delete_order(&self, book: &OrderBook, order: &Order) {}

    fn on_execute_order(&self, book: &OrderBook, order: &Order, price: Price, quantity: Quantity, quote: Quantity) {}

    fn on_execute_trade(
        &self,
        book: &OrderBook,
        maker: &Order,
        taker: &Order,
        price: Price,
        quantity: Quantity,
        quote: Quantity,
    ) {
    }

    fn on_error(&self, book: &OrderBook, error: &OrderBookError) {}
}

/// Handler that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl MarketHandler for NoopHandler {}

/// Owned copy of one callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketEvent {
    OrderBookAdded {
        symbol_id: SymbolId,
    },
    OrderBookUpdated {
        symbol_id: SymbolId,
        top: bool,
    },
    OrderBookDeleted {
        symbol_id: SymbolId,
    },
    PriceLevelAdded {
        symbol_id: SymbolId,
        update: PriceLevelUpdate,
    },
    PriceLevelUpdated {
        symbol_id: SymbolId,
        update: PriceLevelUpdate,
    },
    PriceLevelDeleted {
        symbol_id: SymbolId,
        update: PriceLevelUpdate,
    },
    OrderAdded {
        order: Order,
    },
    OrderUpdated {
        order: Order,
    },
    OrderDeleted {
        order: Order,
    },
    OrderExecuted {
        order: Order,
        price: Price,
        quantity: Quantity,
        quote: Quantity,
    },
    Trade {
        maker: Order,
        taker: Order,
        price: Price,
        quantity: Quantity,
        quote: Quantity,
    },
    Error {
        symbol_id: SymbolId,
        error: OrderBookError,
    },
}

/// Recording test double: keeps every callback as a `MarketEvent`
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<MarketEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MarketEvent> {
        self.events.lock().clone()
    }

    /// Drain recorded events
    pub fn take(&self) -> Vec<MarketEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Every (maker id, taker id, price, quantity) trade in order
    pub fn trades(&self) -> Vec<(OrderId, OrderId, Price, Quantity)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                MarketEvent::Trade {
                    maker,
                    taker,
                    price,
                    quantity,
                    ..
                } => Some((maker.id, taker.id, *price, *quantity)),
                _ => None,
            })
            .collect()
    }

    /// Every (order id, price, quantity) execution in order
    pub fn executions(&self) -> Vec<(OrderId, Price, Quantity)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                MarketEvent::OrderExecuted {
                    order, price, quantity, ..
                } => Some((order.id, *price, *quantity)),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_orders(&self) -> Vec<OrderId> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                MarketEvent::OrderDeleted { order } => Some(order.id),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<OrderBookError> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                MarketEvent::Error { error, .. } => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: MarketEvent) {
        self.events.lock().push(event);
    }
}

impl MarketHandler for RecordingHandler {
    fn on_add_order_book(&self, book: &OrderBook) {
        self.push(MarketEvent::OrderBookAdded {
            symbol_id: book.symbol().id,
        });
    }

    fn on_update_order_book(&self, book: &OrderBook, top: bool) {
        self.push(MarketEvent::OrderBookUpdated {
            symbol_id: book.symbol().id,
            top,
        });
    }

    fn on_delete_order_book(&self, book: &OrderBook) {
        self.push(MarketEvent::OrderBookDeleted {
            symbol_id: book.symbol().id,
        });
    }

    fn on_add_price_level(&self, book: &OrderBook, update: &PriceLevelUpdate) {
        self.push(MarketEvent::PriceLevelAdded {
            symbol_id: book.symbol().id,
            update: update.clone(),
        });
    }

    fn on_update_price_level(&self, book: &OrderBook, update: &PriceLevelUpdate) {
        self.push(MarketEvent::PriceLevelUpdated {
            symbol_id: book.symbol().id,
            update: update.clone(),
        });
    }

    fn on_delete_price_level(&self, book: &OrderBook, update: &PriceLevelUpdate) {
        self.push(MarketEvent::PriceLevelDeleted {
            symbol_id: book.symbol().id,
            update: update.clone(),
        });
    }

    fn on_add_order(&self, _book: &OrderBook, order: &Order) {
        self.push(MarketEvent::OrderAdded { order: order.clone() });
    }

    fn on_update_order(&self, _book: &OrderBook, order: &Order) {
        self.push(MarketEvent::OrderUpdated { order: order.clone() });
    }

    fn on_delete_order(&self, _book: &OrderBook, order: &Order) {
        self.push(MarketEvent::OrderDeleted { order: order.clone() });
    }

    fn on_execute_order(&self, _book: &OrderBook, order: &Order, price: Price, quantity: Quantity, quote: Quantity) {
        self.push(MarketEvent::OrderExecuted {
            order: order.clone(),
            price,
            quantity,
            quote,
        });
    }

    fn on_execute_trade(
        &self,
        _book: &OrderBook,
        maker: &Order,
        taker: &Order,
        price: Price,
        quantity: Quantity,
        quote: Quantity,
    ) {
        self.push(MarketEvent::Trade {
            maker: maker.clone(),
            taker: taker.clone(),
            price,
            quantity,
            quote,
        });
    }

    fn on_error(&self, book: &OrderBook, error: &OrderBookError) {
        self.push(MarketEvent::Error {
            symbol_id: book.symbol().id,
            error: error.clone(),
        });
    }
}

/// Per-call view of the engine settings handed to book operations
pub struct MatchContext<'a> {
    pub handler: &'a dyn MarketHandler,
    /// Global automatic matching flag
    pub matching: bool,
    /// Manual execution by price debits the order's own price
    pub debit_at_order_price: bool,
}

impl<'a> MatchContext<'a> {
    pub fn new(handler: &'a dyn MarketHandler, matching: bool) -> Self {
        Self {
            handler,
            matching,
            debit_at_order_price: false,
        }
    }
}
