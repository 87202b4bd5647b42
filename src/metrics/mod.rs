use metrics::{counter, describe_counter, describe_gauge, gauge};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::orderbook::book::OrderBook;
use crate::orderbook::error::OrderBookError;
use crate::orderbook::handler::MarketHandler;
use crate::orderbook::price_level::PriceLevelUpdate;
use crate::orderbook::types::{Order, Price, Quantity};

/// Point-in-time copy of the engine activity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub books_added: u64,
    pub books_deleted: u64,
    pub orders_added: u64,
    pub orders_updated: u64,
    pub orders_deleted: u64,
    pub executions: u64,
    pub trades: u64,
    pub level_updates: u64,
    pub errors: u64,
}

/// Handler decorator that counts every callback and publishes the counts
/// through the `metrics` facade before forwarding to the inner handler
#[derive(Debug)]
pub struct MetricsHandler<H> {
    inner: H,
    books_added: AtomicU64,
    books_deleted: AtomicU64,
    orders_added: AtomicU64,
    orders_updated: AtomicU64,
    orders_deleted: AtomicU64,
    executions: AtomicU64,
    trades: AtomicU64,
    level_updates: AtomicU64,
    errors: AtomicU64,
}

impl<H: MarketHandler> MetricsHandler<H> {
    pub fn new(inner: H) -> Self {
        // Register metric descriptions
        describe_counter!("matching_orders_total", "Order callbacks by kind");
        describe_counter!("matching_trades_total", "Number of trades executed");
        describe_counter!("matching_level_updates_total", "Price level updates published");
        describe_counter!("matching_errors_total", "Errors reported by book workers");
        describe_gauge!("matching_books_current", "Number of live order books");
        describe_gauge!("matching_book_orders", "Orders resting in a book");

        Self {
            inner,
            books_added: AtomicU64::new(0),
            books_deleted: AtomicU64::new(0),
            orders_added: AtomicU64::new(0),
            orders_updated: AtomicU64::new(0),
            orders_deleted: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            trades: AtomicU64::new(0),
            level_updates: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            books_added: self.books_added.load(Ordering::Relaxed),
            books_deleted: self.books_deleted.load(Ordering::Relaxed),
            orders_added: self.orders_added.load(Ordering::Relaxed),
            orders_updated: self.orders_updated.load(Ordering::Relaxed),
            orders_deleted: self.orders_deleted.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            trades: self.trades.load(Ordering::Relaxed),
            level_updates: self.level_updates.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn record_books(&self) {
        let live = self
            .books_added
            .load(Ordering::Relaxed)
            .saturating_sub(self.books_deleted.load(Ordering::Relaxed));
        gauge!("matching_books_current").set(live as f64);
    }

    fn record_level(&self, book: &OrderBook) {
        self.level_updates.fetch_add(1, Ordering::Relaxed);
        counter!("matching_level_updates_total").increment(1);
        gauge!("matching_book_orders", "symbol" => book.symbol().name.clone()).set(book.total_orders() as f64);
    }
}

impl<H: MarketHandler> MarketHandler for MetricsHandler<H> {
    fn on_add_order_book(&self, book: &OrderBook) {
        self.books_added.fetch_add(1, Ordering::Relaxed);
        self.record_books();
        self.inner.on_add_order_book(book);
    }

    fn on_update_order_book(&self, book: &OrderBook, top: bool) {
        self.inner.on_update_order_book(book, top);
    }

    fn on_delete_order_book(&self, book: &OrderBook) {
        self.books_deleted.fetch_add(1, Ordering::Relaxed);
        self.record_books();
        self.inner.on_delete_order_book(book);
    }

    fn on_add_price_level(&self, book: &OrderBook, update: &PriceLevelUpdate) {
        self.record_level(book);
        self.inner.on_add_price_level(book, update);
    }

    fn on_update_price_level(&self, book: &OrderBook, update: &PriceLevelUpdate) {
        self.record_level(book);
        self.inner.on_update_price_level(book, update);
    }

    fn on_delete_price_level(&self, book: &OrderBook, update: &PriceLevelUpdate) {
        self.record_level(book);
        self.inner.on_delete_price_level(book, update);
    }

    fn on_add_order(&self, book: &OrderBook, order: &Order) {
        self.orders_added.fetch_add(1, Ordering::Relaxed);
        counter!("matching_orders_total", "operation" => "add").increment(1);
        self.inner.on_add_order(book, order);
    }

    fn on_update_order(&self, book: &OrderBook, order: &Order) {
        self.orders_updated.fetch_add(1, Ordering::Relaxed);
        counter!("matching_orders_total", "operation" => "update").increment(1);
        self.inner.on_update_order(book, order);
    }

    fn on_delete_order(&self, book: &OrderBook, order: &Order) {
        self.orders_deleted.fetch_add(1, Ordering::Relaxed);
        counter!("matching_orders_total", "operation" => "delete").increment(1);
        self.inner.on_delete_order(book, order);
    }

    fn on_execute_order(&self, book: &OrderBook, order: &Order, price: Price, quantity: Quantity, quote: Quantity) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        counter!("matching_orders_total", "operation" => "execute").increment(1);
        self.inner.on_execute_order(book, order, price, quantity, quote);
    }

    fn on_execute_trade(
        &self,
        book: &OrderBook,
        maker: &Order,
        taker: &Order,
        price: Price,
        quantity: Quantity,
        quote: Quantity,
    ) {
        self.trades.fetch_add(1, Ordering::Relaxed);
        counter!("matching_trades_total").increment(1);
        self.inner.on_execute_trade(book, maker, taker, price, quantity, quote);
    }

    fn on_error(&self, book: &OrderBook, error: &OrderBookError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!("matching_errors_total").increment(1);
        self.inner.on_error(book, error);
    }
}
