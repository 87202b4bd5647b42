//! Matching engine: owns every order book and routes operations to them.
//!
//! Books live in a dense table indexed by symbol id. In single-threaded mode
//! an operation runs on the caller's thread and its error is returned
//! directly. In actor-per-book mode the operation is queued on the book's
//! mailbox and the call returns once it is enqueued; errors raised later by
//! the worker reach the handler through `on_error`.

pub mod command;
pub mod config;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::bounded;
use tracing::{debug, info, warn};

use crate::orderbook::book::{OrderBook, SharedPrices};
use crate::orderbook::error::{OrderBookError, OrderBookResult};
use crate::orderbook::handler::{MarketHandler, MatchContext};
use crate::orderbook::types::{Order, OrderId, Price, Quantity, StopPriceMode, Symbol, SymbolId};

pub use command::Command;
pub use config::{ConfigError, EngineConfig, EngineMode};
use worker::BookWorker;

/// Engine-wide flags read by every operation
#[derive(Debug)]
pub(crate) struct EngineSettings {
    matching: AtomicBool,
    debit_at_order_price: bool,
}

impl EngineSettings {
    pub(crate) fn context<'a>(&self, handler: &'a dyn MarketHandler) -> MatchContext<'a> {
        MatchContext {
            handler,
            matching: self.matching.load(Ordering::Acquire),
            debit_at_order_price: self.debit_at_order_price,
        }
    }
}

enum Runner {
    Local(Box<OrderBook>),
    Actor(BookWorker),
}

struct BookSlot {
    prices: Arc<SharedPrices>,
    runner: Runner,
}

pub struct MatchingEngine {
    handler: Arc<dyn MarketHandler>,
    books: Vec<Option<BookSlot>>,
    book_count: usize,
    settings: Arc<EngineSettings>,
    mode: EngineMode,
    mailbox_capacity: usize,
    shutdown: bool,
}

impl MatchingEngine {
    /// Create an engine and the books listed in `config`
    pub fn new(config: EngineConfig, handler: Arc<dyn MarketHandler>) -> OrderBookResult<Self> {
        info!(mode = ?config.mode, matching = config.matching_enabled, "Creating matching engine");

        let mut engine = Self {
            handler,
            books: Vec::new(),
            book_count: 0,
            settings: Arc::new(EngineSettings {
                matching: AtomicBool::new(config.matching_enabled),
                debit_at_order_price: config.debit_at_order_price,
            }),
            mode: config.mode,
            mailbox_capacity: config.mailbox_capacity.max(1),
            shutdown: false,
        };
        engine.books.resize_with(config.initial_book_capacity.max(1), || None);

        for symbol in config.symbols {
            engine.add_order_book(symbol)?;
        }
        Ok(engine)
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn handler(&self) -> &Arc<dyn MarketHandler> {
        &self.handler
    }

    /// Number of live order books
    pub fn order_book_count(&self) -> usize {
        self.book_count
    }

    pub fn contains_order_book(&self, symbol_id: SymbolId) -> bool {
        self.slot(symbol_id).is_some()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn is_matching_enabled(&self) -> bool {
        self.settings.matching.load(Ordering::Acquire)
    }

    /// Turn automatic matching on and run one pass over every book
    pub fn enable_matching(&mut self) -> OrderBookResult<()> {
        self.ensure_running()?;
        info!("Enabling automatic matching");
        self.settings.matching.store(true, Ordering::Release);

        for symbol_id in self.symbol_ids() {
            self.perform(symbol_id, |book, ctx| {
                book.run_matching(ctx);
                Ok(())
            })?;
        }
        Ok(())
    }

    pub fn disable_matching(&mut self) -> OrderBookResult<()> {
        self.ensure_running()?;
        info!("Disabling automatic matching");
        self.settings.matching.store(false, Ordering::Release);
        Ok(())
    }

    /// Create the book of a new symbol
    pub fn add_order_book(&mut self, symbol: Symbol) -> OrderBookResult<()> {
        self.ensure_running()?;
        symbol.validate()?;
        if self.slot(symbol.id).is_some() {
            return Err(OrderBookError::DuplicateSymbol);
        }

        let index = symbol.id as usize;
        if index >= self.books.len() {
            let mut len = self.books.len().max(1);
            while len <= index {
                len *= 2;
            }
            self.books.resize_with(len, || None);
        }

        let book = OrderBook::new(symbol);
        self.handler.on_add_order_book(&book);
        let prices = book.shared_prices();

        let runner = match self.mode {
            EngineMode::SingleThreaded => Runner::Local(Box::new(book)),
            EngineMode::ActorPerBook => Runner::Actor(BookWorker::spawn(
                book,
                Arc::clone(&self.handler),
                Arc::clone(&self.settings),
                self.mailbox_capacity,
            )?),
        };
        self.books[index] = Some(BookSlot { prices, runner });
        self.book_count += 1;
        Ok(())
    }

    /// Replace name and limits of an existing symbol
    pub fn update_order_book(&mut self, symbol: Symbol) -> OrderBookResult<()> {
        symbol.validate()?;
        self.perform(symbol.id, move |book, ctx| {
            info!(symbol_id = symbol.id, name = %symbol.name, "Updating order book");
            book.set_symbol(symbol);
            ctx.handler.on_update_order_book(book, false);
            Ok(())
        })
    }

    /// Remove a book, draining its mailbox first in actor mode
    pub fn delete_order_book(&mut self, symbol_id: SymbolId) -> OrderBookResult<()> {
        self.ensure_running()?;
        let slot = self
            .books
            .get_mut(symbol_id as usize)
            .and_then(Option::take)
            .ok_or(OrderBookError::SymbolNotFound)?;
        self.book_count -= 1;

        let book = Self::release(slot, true)?;
        info!(symbol_id, orders = book.total_orders(), "Deleting order book");
        self.handler.on_delete_order_book(&book);
        Ok(())
    }

    pub fn add_order(&mut self, order: Order) -> OrderBookResult<()> {
        self.perform(order.symbol_id, move |book, ctx| book.add_order(ctx, order))
    }

    pub fn add_orders_pair(&mut self, stop: Order, limit: Order) -> OrderBookResult<()> {
        if stop.symbol_id != limit.symbol_id {
            return Err(OrderBookError::InvalidSymbol);
        }
        self.perform(stop.symbol_id, move |book, ctx| book.add_orders_pair(ctx, stop, limit))
    }

    pub fn add_tpsl(&mut self, take_profit: Order, stop_loss: Order) -> OrderBookResult<()> {
        if take_profit.symbol_id != stop_loss.symbol_id {
            return Err(OrderBookError::InvalidSymbol);
        }
        self.perform(take_profit.symbol_id, move |book, ctx| {
            book.add_tpsl(ctx, take_profit, stop_loss)
        })
    }

    pub fn add_tpsl_market(&mut self, take_profit: Order, stop_loss: Order) -> OrderBookResult<()> {
        if take_profit.symbol_id != stop_loss.symbol_id {
            return Err(OrderBookError::InvalidSymbol);
        }
        self.perform(take_profit.symbol_id, move |book, ctx| {
            book.add_tpsl_market(ctx, take_profit, stop_loss)
        })
    }

    pub fn reduce_order(&mut self, symbol_id: SymbolId, id: OrderId, quantity: Quantity) -> OrderBookResult<()> {
        self.perform(symbol_id, move |book, ctx| book.reduce_order(ctx, id, quantity))
    }

    pub fn modify_order(
        &mut self,
        symbol_id: SymbolId,
        id: OrderId,
        new_price: Price,
        new_quantity: Quantity,
    ) -> OrderBookResult<()> {
        self.perform(symbol_id, move |book, ctx| {
            book.modify_order(ctx, id, new_price, new_quantity)
        })
    }

    pub fn mitigate_order(
        &mut self,
        symbol_id: SymbolId,
        id: OrderId,
        new_price: Price,
        new_quantity: Quantity,
    ) -> OrderBookResult<()> {
        self.perform(symbol_id, move |book, ctx| {
            book.mitigate_order(ctx, id, new_price, new_quantity)
        })
    }

    pub fn replace_order(
        &mut self,
        symbol_id: SymbolId,
        id: OrderId,
        new_id: OrderId,
        new_price: Price,
        new_quantity: Quantity,
    ) -> OrderBookResult<()> {
        self.perform(symbol_id, move |book, ctx| {
            book.replace_order(ctx, id, new_id, new_price, new_quantity)
        })
    }

    pub fn delete_order(&mut self, symbol_id: SymbolId, id: OrderId) -> OrderBookResult<()> {
        self.perform(symbol_id, move |book, ctx| book.delete_order(ctx, id))
    }

    /// Manually execute an order; only allowed while automatic matching is off
    pub fn execute_order(&mut self, symbol_id: SymbolId, id: OrderId, quantity: Quantity) -> OrderBookResult<()> {
        if self.is_matching_enabled() {
            return Err(OrderBookError::MatchingEnabled);
        }
        self.perform(symbol_id, move |book, ctx| book.execute_order(ctx, id, quantity))
    }

    pub fn execute_order_by_price(
        &mut self,
        symbol_id: SymbolId,
        id: OrderId,
        price: Price,
        quantity: Quantity,
    ) -> OrderBookResult<()> {
        if self.is_matching_enabled() {
            return Err(OrderBookError::MatchingEnabled);
        }
        self.perform(symbol_id, move |book, ctx| {
            book.execute_order_by_price(ctx, id, price, quantity)
        })
    }

    /// Publish a mark price. With `force` a matching pass runs even when
    /// automatic matching is off.
    pub fn set_mark_price(&mut self, symbol_id: SymbolId, price: Price, force: bool) -> OrderBookResult<()> {
        self.ensure_running()?;
        self.slot(symbol_id).ok_or(OrderBookError::SymbolNotFound)?.prices.set_mark(price);
        self.perform(symbol_id, move |book, ctx| {
            book.on_reference_price_changed(ctx, force);
            Ok(())
        })
    }

    /// Publish an index price, see `set_mark_price`
    pub fn set_index_price(&mut self, symbol_id: SymbolId, price: Price, force: bool) -> OrderBookResult<()> {
        self.ensure_running()?;
        self.slot(symbol_id).ok_or(OrderBookError::SymbolNotFound)?.prices.set_index(price);
        self.perform(symbol_id, move |book, ctx| {
            book.on_reference_price_changed(ctx, force);
            Ok(())
        })
    }

    pub fn mark_price(&self, symbol_id: SymbolId) -> OrderBookResult<Price> {
        Ok(self.slot(symbol_id).ok_or(OrderBookError::SymbolNotFound)?.prices.mark())
    }

    pub fn index_price(&self, symbol_id: SymbolId) -> OrderBookResult<Price> {
        Ok(self.slot(symbol_id).ok_or(OrderBookError::SymbolNotFound)?.prices.index())
    }

    pub fn set_stop_price_mode(&mut self, symbol_id: SymbolId, mode: StopPriceMode) -> OrderBookResult<()> {
        self.perform(symbol_id, move |book, ctx| {
            book.set_stop_price_mode(mode);
            book.on_reference_price_changed(ctx, false);
            Ok(())
        })
    }

    /// Override automatic matching for one book; `None` follows the global flag
    pub fn set_book_matching(&mut self, symbol_id: SymbolId, matching: Option<bool>) -> OrderBookResult<()> {
        self.perform(symbol_id, move |book, ctx| {
            book.set_matching_override(matching);
            book.on_reference_price_changed(ctx, false);
            Ok(())
        })
    }

    /// Run one matching pass regardless of the matching flags
    pub fn match_order_book(&mut self, symbol_id: SymbolId) -> OrderBookResult<()> {
        self.perform(symbol_id, |book, ctx| {
            book.run_matching(ctx);
            Ok(())
        })
    }

    /// Run a read-only closure against a book. In actor mode the closure is
    /// queued behind every pending operation of that book.
    pub fn inspect<F, R>(&self, symbol_id: SymbolId, f: F) -> OrderBookResult<R>
    where
        F: FnOnce(&OrderBook) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_running()?;
        let slot = self.slot(symbol_id).ok_or(OrderBookError::SymbolNotFound)?;

        match &slot.runner {
            Runner::Local(book) => Ok(f(&**book)),
            Runner::Actor(worker) => {
                let (reply, response) = bounded(1);
                worker.send(Box::new(move |book, _ctx| {
                    let _ = reply.send(f(&*book));
                }))?;
                response.recv().map_err(|_| OrderBookError::EngineShutdown)
            }
        }
    }

    /// Route one command to the matching operation
    pub fn apply(&mut self, command: Command) -> OrderBookResult<()> {
        debug!("Applying command: {:?}", command);

        match command {
            Command::AddOrderBook { symbol } => self.add_order_book(symbol),
            Command::UpdateOrderBook { symbol } => self.update_order_book(symbol),
            Command::DeleteOrderBook { symbol_id } => self.delete_order_book(symbol_id),
            Command::EnableMatching => self.enable_matching(),
            Command::DisableMatching => self.disable_matching(),
            Command::AddOrder { order } => self.add_order(order),
            Command::AddOrdersPair { stop, limit } => self.add_orders_pair(stop, limit),
            Command::AddTpsl { take_profit, stop_loss } => self.add_tpsl(take_profit, stop_loss),
            Command::AddTpslMarket { take_profit, stop_loss } => self.add_tpsl_market(take_profit, stop_loss),
            Command::ReduceOrder {
                symbol_id,
                order_id,
                quantity,
            } => self.reduce_order(symbol_id, order_id, quantity),
            Command::ModifyOrder {
                symbol_id,
                order_id,
                price,
                quantity,
            } => self.modify_order(symbol_id, order_id, price, quantity),
            Command::MitigateOrder {
                symbol_id,
                order_id,
                price,
                quantity,
            } => self.mitigate_order(symbol_id, order_id, price, quantity),
            Command::ReplaceOrder {
                symbol_id,
                order_id,
                new_order_id,
                price,
                quantity,
            } => self.replace_order(symbol_id, order_id, new_order_id, price, quantity),
            Command::DeleteOrder { symbol_id, order_id } => self.delete_order(symbol_id, order_id),
            Command::ExecuteOrder {
                symbol_id,
                order_id,
                quantity,
            } => self.execute_order(symbol_id, order_id, quantity),
            Command::ExecuteOrderByPrice {
                symbol_id,
                order_id,
                price,
                quantity,
            } => self.execute_order_by_price(symbol_id, order_id, price, quantity),
            Command::SetMarkPrice { symbol_id, price, force } => self.set_mark_price(symbol_id, price, force),
            Command::SetIndexPrice { symbol_id, price, force } => self.set_index_price(symbol_id, price, force),
            Command::SetStopPriceMode { symbol_id, mode } => self.set_stop_price_mode(symbol_id, mode),
            Command::MatchOrderBook { symbol_id } => self.match_order_book(symbol_id),
        }
    }

    /// Apply commands in order, collecting one result per command
    pub fn apply_batch<I>(&mut self, commands: I) -> Vec<OrderBookResult<()>>
    where
        I: IntoIterator<Item = Command>,
    {
        commands.into_iter().map(|command| self.apply(command)).collect()
    }

    /// Stop accepting operations and release every book.
    ///
    /// A graceful shutdown lets each worker drain its mailbox; a forced one
    /// abandons queued operations. Later calls are no-ops.
    pub fn shutdown(&mut self, graceful: bool) -> OrderBookResult<()> {
        if self.shutdown {
            return Ok(());
        }
        info!(graceful, books = self.book_count, "Shutting down matching engine");
        self.shutdown = true;

        let mut result = Ok(());
        for slot in self.books.iter_mut().filter_map(Option::take) {
            match Self::release(slot, graceful) {
                Ok(book) => self.handler.on_delete_order_book(&book),
                Err(error) => {
                    warn!(%error, "Failed to stop book worker");
                    result = Err(error);
                }
            }
        }
        self.book_count = 0;
        result
    }

    fn ensure_running(&self) -> OrderBookResult<()> {
        if self.shutdown {
            return Err(OrderBookError::EngineShutdown);
        }
        Ok(())
    }

    fn slot(&self, symbol_id: SymbolId) -> Option<&BookSlot> {
        self.books.get(symbol_id as usize).and_then(Option::as_ref)
    }

    fn symbol_ids(&self) -> Vec<SymbolId> {
        self.books
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| index as SymbolId)
            .collect()
    }

    /// Single entry point of every book-scoped operation
    fn perform<F>(&mut self, symbol_id: SymbolId, op: F) -> OrderBookResult<()>
    where
        F: FnOnce(&mut OrderBook, &MatchContext<'_>) -> OrderBookResult<()> + Send + 'static,
    {
        self.ensure_running()?;
        let slot = self
            .books
            .get_mut(symbol_id as usize)
            .and_then(Option::as_mut)
            .ok_or(OrderBookError::SymbolNotFound)?;

        match &mut slot.runner {
            Runner::Local(book) => {
                let ctx = self.settings.context(self.handler.as_ref());
                op(&mut **book, &ctx)
            }
            Runner::Actor(worker) => worker.send(Box::new(move |book, ctx| {
                if let Err(error) = op(book, ctx) {
                    warn!(symbol_id = book.symbol().id, %error, "Book operation failed");
                    ctx.handler.on_error(book, &error);
                }
            })),
        }
    }

    fn release(slot: BookSlot, graceful: bool) -> OrderBookResult<OrderBook> {
        match slot.runner {
            Runner::Local(book) => Ok(*book),
            Runner::Actor(mut worker) => worker.stop(graceful),
        }
    }
}

impl Drop for MatchingEngine {
    fn drop(&mut self) {
        let _ = self.shutdown(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::handler::{MarketEvent, RecordingHandler};
    use crate::orderbook::types::{Limits, Side};
    use crate::utils::fixed_point::FixedPoint;

    fn fp(s: &str) -> FixedPoint {
        s.parse().unwrap()
    }

    fn create_symbol(id: SymbolId) -> Symbol {
        Symbol::new(
            id,
            format!("SYM{}", id),
            Limits::new(fp("0.01"), fp("100000"), fp("0.01")),
            Limits::new(fp("0.1"), fp("100000"), fp("0.1")),
        )
    }

    fn create_engine(config: EngineConfig) -> (MatchingEngine, Arc<RecordingHandler>) {
        let handler = Arc::new(RecordingHandler::new());
        let engine = MatchingEngine::new(config, handler.clone()).unwrap();
        (engine, handler)
    }

    #[test]
    fn test_book_table_grows() {
        let (mut engine, handler) = create_engine(EngineConfig::default());
        engine.add_order_book(create_symbol(1)).unwrap();
        engine.add_order_book(create_symbol(40)).unwrap();

        assert_eq!(engine.order_book_count(), 2);
        assert!(engine.contains_order_book(40));
        assert_eq!(engine.add_order_book(create_symbol(40)), Err(OrderBookError::DuplicateSymbol));
        assert_eq!(
            handler
                .events()
                .iter()
                .filter(|e| matches!(e, MarketEvent::OrderBookAdded { .. }))
                .count(),
            2
        );

        engine.delete_order_book(1).unwrap();
        assert!(!engine.contains_order_book(1));
        assert_eq!(engine.delete_order_book(1), Err(OrderBookError::SymbolNotFound));
    }

    #[test]
    fn test_unknown_symbol() {
        let (mut engine, _) = create_engine(EngineConfig::default());
        let order = Order::limit(1, 9, Side::Buy, fp("10"), fp("1"));
        assert_eq!(engine.add_order(order), Err(OrderBookError::SymbolNotFound));
    }

    #[test]
    fn test_single_threaded_errors_are_returned() {
        let (mut engine, handler) = create_engine(EngineConfig::default().with_symbol(create_symbol(1)));
        assert_eq!(engine.delete_order(1, 42), Err(OrderBookError::OrderNotFound));
        assert!(handler.errors().is_empty());
    }

    #[test]
    fn test_manual_execution_gate() {
        let (mut engine, _) = create_engine(EngineConfig::default().with_symbol(create_symbol(1)));
        engine.add_order(Order::limit(1, 1, Side::Buy, fp("10"), fp("2"))).unwrap();
        assert_eq!(engine.execute_order(1, 1, fp("1")), Err(OrderBookError::MatchingEnabled));

        engine.disable_matching().unwrap();
        engine.execute_order(1, 1, fp("1")).unwrap();
        let rest = engine.inspect(1, |book| book.order(1).map(|o| o.rest_quantity)).unwrap();
        assert_eq!(rest, Some(fp("1")));
    }

    #[test]
    fn test_enable_matching_runs_pass() {
        let config = EngineConfig::default().with_matching(false).with_symbol(create_symbol(1));
        let (mut engine, handler) = create_engine(config);

        engine.add_order(Order::limit(1, 1, Side::Buy, fp("10"), fp("2"))).unwrap();
        engine.add_order(Order::limit(2, 1, Side::Sell, fp("9"), fp("2"))).unwrap();
        assert!(handler.trades().is_empty());

        engine.enable_matching().unwrap();
        assert_eq!(handler.trades(), vec![(1, 2, fp("10"), fp("2"))]);
    }

    #[test]
    fn test_book_matching_override() {
        let config = EngineConfig::default().with_matching(false).with_symbol(create_symbol(1));
        let (mut engine, handler) = create_engine(config);

        engine.set_book_matching(1, Some(true)).unwrap();
        engine.add_order(Order::limit(1, 1, Side::Buy, fp("10"), fp("2"))).unwrap();
        engine.add_order(Order::limit(2, 1, Side::Sell, fp("10"), fp("2"))).unwrap();
        assert_eq!(handler.trades().len(), 1);
    }

    #[test]
    fn test_actor_mode_roundtrip() {
        let config = EngineConfig::actor_per_book().with_symbol(create_symbol(1));
        let (mut engine, handler) = create_engine(config);

        engine.add_order(Order::limit(1, 1, Side::Buy, fp("10"), fp("2"))).unwrap();
        engine.add_order(Order::limit(2, 1, Side::Sell, fp("10"), fp("1"))).unwrap();
        engine.delete_order(1, 77).unwrap();

        let rest = engine.inspect(1, |book| book.order(1).map(|o| o.rest_quantity)).unwrap();
        assert_eq!(rest, Some(fp("1")));
        assert_eq!(handler.trades().len(), 1);
        assert_eq!(handler.errors(), vec![OrderBookError::OrderNotFound]);
    }

    #[test]
    fn test_shutdown_rejects_operations() {
        let config = EngineConfig::actor_per_book().with_symbol(create_symbol(1));
        let (mut engine, handler) = create_engine(config);

        engine.add_order(Order::limit(1, 1, Side::Buy, fp("10"), fp("2"))).unwrap();
        engine.shutdown(true).unwrap();

        assert!(engine.is_shutdown());
        assert_eq!(
            engine.add_order(Order::limit(2, 1, Side::Buy, fp("10"), fp("2"))),
            Err(OrderBookError::EngineShutdown)
        );
        assert_eq!(engine.inspect(1, |book| book.total_orders()), Err(OrderBookError::EngineShutdown));
        assert!(handler
            .events()
            .iter()
            .any(|e| matches!(e, MarketEvent::OrderBookDeleted { symbol_id: 1 })));
        assert!(engine.shutdown(false).is_ok());
    }

    #[test]
    fn test_apply_commands() {
        let (mut engine, handler) = create_engine(EngineConfig::default());
        let results = engine.apply_batch(vec![
            Command::AddOrderBook {
                symbol: create_symbol(2),
            },
            Command::AddOrder {
                order: Order::limit(1, 2, Side::Sell, fp("5"), fp("1")),
            },
            Command::AddOrder {
                order: Order::limit(2, 2, Side::Buy, fp("5"), fp("1")),
            },
            Command::DeleteOrder {
                symbol_id: 2,
                order_id: 1,
            },
        ]);

        assert!(results[..3].iter().all(Result::is_ok));
        assert_eq!(results[3], Err(OrderBookError::OrderNotFound));
        assert_eq!(handler.trades(), vec![(1, 2, fp("5"), fp("1"))]);
    }

    #[test]
    fn test_mark_price_is_shared() {
        let config = EngineConfig::actor_per_book().with_symbol(create_symbol(1));
        let (mut engine, _) = create_engine(config);

        engine.set_mark_price(1, fp("12.5"), false).unwrap();
        assert_eq!(engine.mark_price(1).unwrap(), fp("12.5"));
        assert_eq!(engine.inspect(1, |book| book.mark_price()).unwrap(), fp("12.5"));
    }
}
