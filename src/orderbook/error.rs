use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum OrderBookError {
    /// No order book is registered for the symbol
    #[error("Symbol not found")]
    SymbolNotFound,

    /// An order book already exists for the symbol id
    #[error("Symbol already exists")]
    DuplicateSymbol,

    /// Symbol limits are malformed or the order names another symbol
    #[error("Invalid symbol")]
    InvalidSymbol,

    /// Order not found in the book
    #[error("Order not found")]
    OrderNotFound,

    /// Order id already exists in the book
    #[error("Order already exists")]
    DuplicateOrder,

    #[error("Price level not found")]
    PriceLevelNotFound,

    #[error("Invalid order id")]
    InvalidOrderId,

    /// Invalid order type for the operation
    #[error("Invalid order type")]
    InvalidOrderType,

    /// Linked legs must trade on the same side
    #[error("Invalid order side")]
    InvalidOrderSide,

    /// Invalid quantity (e.g., zero or inconsistent counters)
    #[error("Invalid quantity")]
    InvalidQuantity,

    /// Invalid price (e.g., zero or the sentinel)
    #[error("Invalid price")]
    InvalidPrice,

    #[error("Invalid stop price")]
    InvalidStopPrice,

    #[error("Invalid trailing distance or step")]
    InvalidTrailing,

    /// Price is outside the symbol price limits
    #[error("Price outside allowed range")]
    PriceOutOfRange,

    /// Quantity is outside the symbol lot limits
    #[error("Quantity outside allowed range")]
    QuantityOutOfRange,

    /// Locked budget does not cover the order
    #[error("Insufficient available quantity")]
    InsufficientAvailable,

    /// Manual execution requires automatic matching to be disabled
    #[error("Automatic matching is enabled")]
    MatchingEnabled,

    /// Linked legs are priced on the wrong side of each other or of the reference price
    #[error("Invalid linked order prices")]
    InvalidLinkedPrices,

    /// The engine no longer accepts commands
    #[error("Engine is shut down")]
    EngineShutdown,

    /// System error
    #[error("System error: {0}")]
    SystemError(String),
}

/// Coarse error classes callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Duplicate,
    InvalidParameter,
    PolicyViolation,
    Unavailable,
}

impl OrderBookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderBookError::SymbolNotFound
            | OrderBookError::OrderNotFound
            | OrderBookError::PriceLevelNotFound => ErrorKind::NotFound,
            OrderBookError::DuplicateSymbol | OrderBookError::DuplicateOrder => ErrorKind::Duplicate,
            OrderBookError::InvalidSymbol
            | OrderBookError::InvalidOrderId
            | OrderBookError::InvalidOrderType
            | OrderBookError::InvalidOrderSide
            | OrderBookError::InvalidQuantity
            | OrderBookError::InvalidPrice
            | OrderBookError::InvalidStopPrice
            | OrderBookError::InvalidTrailing
            | OrderBookError::PriceOutOfRange
            | OrderBookError::QuantityOutOfRange => ErrorKind::InvalidParameter,
            OrderBookError::InsufficientAvailable
            | OrderBookError::MatchingEnabled
            | OrderBookError::InvalidLinkedPrices => ErrorKind::PolicyViolation,
            OrderBookError::EngineShutdown | OrderBookError::SystemError(_) => ErrorKind::Unavailable,
        }
    }
}

/// Result type for order book operations
pub type OrderBookResult<T> = Result<T, OrderBookError>;
