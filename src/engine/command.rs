use serde::{Deserialize, Serialize};

use crate::orderbook::types::{Order, OrderId, Price, Quantity, StopPriceMode, Symbol, SymbolId};

/// One engine command, as produced by an order-entry gateway or a feed decoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    AddOrderBook {
        symbol: Symbol,
    },
    UpdateOrderBook {
        symbol: Symbol,
    },
    DeleteOrderBook {
        symbol_id: SymbolId,
    },
    EnableMatching,
    DisableMatching,
    AddOrder {
        order: Order,
    },
    AddOrdersPair {
        stop: Order,
        limit: Order,
    },
    AddTpsl {
        take_profit: Order,
        stop_loss: Order,
    },
    AddTpslMarket {
        take_profit: Order,
        stop_loss: Order,
    },
    ReduceOrder {
        symbol_id: SymbolId,
        order_id: OrderId,
        quantity: Quantity,
    },
    ModifyOrder {
        symbol_id: SymbolId,
        order_id: OrderId,
        price: Price,
        quantity: Quantity,
    },
    MitigateOrder {
        symbol_id: SymbolId,
        order_id: OrderId,
        price: Price,
        quantity: Quantity,
    },
    ReplaceOrder {
        symbol_id: SymbolId,
        order_id: OrderId,
        new_order_id: OrderId,
        price: Price,
        quantity: Quantity,
    },
    DeleteOrder {
        symbol_id: SymbolId,
        order_id: OrderId,
    },
    ExecuteOrder {
        symbol_id: SymbolId,
        order_id: OrderId,
        quantity: Quantity,
    },
    ExecuteOrderByPrice {
        symbol_id: SymbolId,
        order_id: OrderId,
        price: Price,
        quantity: Quantity,
    },
    SetMarkPrice {
        symbol_id: SymbolId,
        price: Price,
        #[serde(default)]
        force: bool,
    },
    SetIndexPrice {
        symbol_id: SymbolId,
        price: Price,
        #[serde(default)]
        force: bool,
    },
    SetStopPriceMode {
        symbol_id: SymbolId,
        mode: StopPriceMode,
    },
    MatchOrderBook {
        symbol_id: SymbolId,
    },
}

impl Command {
    /// Symbol the command is routed to, `None` for engine-wide commands
    pub fn symbol_id(&self) -> Option<SymbolId> {
        match self {
            Command::AddOrderBook { symbol } | Command::UpdateOrderBook { symbol } => Some(symbol.id),
            Command::AddOrder { order } => Some(order.symbol_id),
            Command::AddOrdersPair { stop: first, .. }
            | Command::AddTpsl { take_profit: first, .. }
            | Command::AddTpslMarket { take_profit: first, .. } => Some(first.symbol_id),
            Command::EnableMatching | Command::DisableMatching => None,
            Command::DeleteOrderBook { symbol_id }
            | Command::ReduceOrder { symbol_id, .. }
            | Command::ModifyOrder { symbol_id, .. }
            | Command::MitigateOrder { symbol_id, .. }
            | Command::ReplaceOrder { symbol_id, .. }
            | Command::DeleteOrder { symbol_id, .. }
            | Command::ExecuteOrder { symbol_id, .. }
            | Command::ExecuteOrderByPrice { symbol_id, .. }
            | Command::SetMarkPrice { symbol_id, .. }
            | Command::SetIndexPrice { symbol_id, .. }
            | Command::SetStopPriceMode { symbol_id, .. }
            | Command::MatchOrderBook { symbol_id } => Some(*symbol_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::types::Side;
    use crate::utils::fixed_point::FixedPoint;

    #[test]
    fn test_command_json() {
        let json = r#"{"type": "reduce_order", "symbol_id": 2, "order_id": 7, "quantity": "1.5"}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        assert_eq!(
            command,
            Command::ReduceOrder {
                symbol_id: 2,
                order_id: 7,
                quantity: "1.5".parse().unwrap(),
            }
        );
        assert_eq!(command.symbol_id(), Some(2));

        let command: Command = serde_json::from_str(r#"{"type": "set_mark_price", "symbol_id": 1, "price": "10"}"#).unwrap();
        assert!(matches!(command, Command::SetMarkPrice { force: false, .. }));
    }

    #[test]
    fn test_command_symbol_routing() {
        let order = Order::limit(1, 5, Side::Buy, FixedPoint::from_int(10), FixedPoint::from_int(1));
        assert_eq!(Command::AddOrder { order }.symbol_id(), Some(5));
        assert_eq!(Command::EnableMatching.symbol_id(), None);
    }
}
