//! Order Matching Core
//!
//! A deterministic single-venue matching engine: one price-ordered order book
//! per symbol, price-time priority, and exact fixed-point arithmetic.
//!
//! # Features
//!
//! - **Price-Time Priority**: FIFO queues within every price level
//! - **Order Types**: Limit, Market, Stop, Stop-Limit, Trailing Stop and Trailing Stop-Limit
//! - **Time In Force**: GTC, IOC, FOK and AON, including atomic fill chains
//! - **Linked Orders**: OCO pairs and take-profit / stop-loss pairs
//! - **Two Scheduling Modes**: on the caller's thread, or one worker thread per book
//! - **Observer Interface**: every book, level, order and trade change is reported to a `MarketHandler`
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use matching_core::engine::{EngineConfig, MatchingEngine};
//! use matching_core::orderbook::{Limits, NoopHandler, Order, Side, Symbol};
//! use matching_core::FixedPoint;
//!
//! let tick: FixedPoint = "0.01".parse()?;
//! let limits = Limits::new(tick, FixedPoint::from_int(100_000), tick);
//! let mut engine = MatchingEngine::new(EngineConfig::default(), Arc::new(NoopHandler))?;
//! engine.add_order_book(Symbol::new(1, "AAPL", limits, limits))?;
//!
//! // Add a limit order
//! engine.add_order(Order::limit(1, 1, Side::Buy, "150.25".parse()?, FixedPoint::from_int(100)))?;
//!
//! // Check best bid/ask
//! let best_bid = engine.inspect(1, |book| book.best_bid())?;
//! assert_eq!(best_bid, Some("150.25".parse::<FixedPoint>()?));
//!
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! Each order book keeps six price ladders (bids, asks, buy stops, sell stops,
//! trailing buy stops, trailing sell stops):
//!
//! 1. **Price Levels**: `BTreeMap<Price, PriceLevel>` with a cached best price per ladder
//! 2. **Order Queues**: orders live in a `Slab` arena and are chained into their level's FIFO by slot index
//!
//! This design optimizes for:
//! - O(1) order lookup and cancellation
//! - O(log n) level lookup
//! - Slot reuse instead of per-order allocation

pub mod engine;
pub mod metrics;
pub mod orderbook;
pub mod utils;

// Re-export commonly used types
pub use engine::{Command, EngineConfig, EngineMode, MatchingEngine};
pub use orderbook::{
    error::{OrderBookError, OrderBookResult},
    handler::{MarketHandler, NoopHandler, RecordingHandler},
    types::{Order, OrderId, OrderType, Price, Quantity, Side, Symbol, SymbolId, TimeInForce},
    OrderBook,
};
pub use utils::fixed_point::FixedPoint;

pub use metrics::MetricsHandler;
