//! Core order book implementation module
//!
//! This module contains the per-symbol book, its price ladders and the
//! matching and order lifecycle algorithms that run on it.

pub mod book;
pub mod error;
pub mod handler;
pub mod matching;
pub mod operations;
pub mod price_level;
pub mod types;

// Re-export main types for convenience
pub use book::{OrderBook, OrderBookStats, SharedPrices};
pub use error::{ErrorKind, OrderBookError, OrderBookResult};
pub use handler::{MarketEvent, MarketHandler, MatchContext, NoopHandler, RecordingHandler};
pub use price_level::{Ladder, PriceLadder, PriceLevel, PriceLevelUpdate, UpdateKind};
pub use types::{
    BookSnapshot, Limits, Order, OrderId, OrderType, Price, PriceLevelInfo, Quantity, Side, StopPriceMode, Symbol,
    SymbolId, TimeInForce,
};
