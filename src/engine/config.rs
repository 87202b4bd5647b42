use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orderbook::types::Symbol;

/// How order book operations are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Every operation runs on the caller's thread
    #[default]
    SingleThreaded,
    /// Each book is owned by a dedicated worker draining a bounded mailbox
    ActorPerBook,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Engine settings, loadable from JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: EngineMode,
    pub matching_enabled: bool,
    pub mailbox_capacity: usize,
    pub initial_book_capacity: usize,
    /// Manual execution by price debits at the order's own price
    pub debit_at_order_price: bool,
    /// Books created together with the engine
    pub symbols: Vec<Symbol>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::SingleThreaded,
            matching_enabled: true,
            mailbox_capacity: 1024,
            initial_book_capacity: 16,
            debit_at_order_price: false,
            symbols: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn single_threaded() -> Self {
        Self::default()
    }

    pub fn actor_per_book() -> Self {
        Self {
            mode: EngineMode::ActorPerBook,
            ..Self::default()
        }
    }

    pub fn with_matching(mut self, enabled: bool) -> Self {
        self.matching_enabled = enabled;
        self
    }

    pub fn with_symbol(mut self, symbol: Symbol) -> Self {
        self.symbols.push(symbol);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid("mailbox_capacity must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for symbol in &self.symbols {
            if symbol.validate().is_err() {
                return Err(ConfigError::Invalid(format!("symbol {} has invalid limits", symbol.id)));
            }
            if !seen.insert(symbol.id) {
                return Err(ConfigError::Invalid(format!("symbol {} configured twice", symbol.id)));
            }
        }
        Ok(())
    }
}
