use std::sync::Arc;

use matching_core::engine::{Command, EngineConfig, EngineMode, MatchingEngine};
use matching_core::orderbook::{
    Limits, MarketEvent, Order, OrderBookError, RecordingHandler, Side, StopPriceMode, Symbol, SymbolId,
};
use matching_core::{FixedPoint, MetricsHandler};

fn fp(s: &str) -> FixedPoint {
    s.parse().unwrap()
}

fn create_symbol(id: SymbolId) -> Symbol {
    Symbol::new(
        id,
        format!("SYM-{}", id),
        Limits::new(fp("0.01"), fp("100000"), fp("0.01")),
        Limits::new(fp("0.1"), fp("100000"), fp("0.1")),
    )
}

fn create_engine(config: EngineConfig) -> (MatchingEngine, Arc<RecordingHandler>) {
    let handler = Arc::new(RecordingHandler::new());
    let engine = MatchingEngine::new(config, handler.clone()).unwrap();
    (engine, handler)
}

fn run_scenario(engine: &mut MatchingEngine) {
    engine.add_order(Order::limit(1, 1, Side::Buy, fp("10"), fp("1"))).unwrap();
    engine.add_order(Order::limit(2, 1, Side::Buy, fp("20"), fp("1"))).unwrap();
    engine.add_order(Order::limit(3, 1, Side::Sell, fp("30"), fp("1"))).unwrap();
    engine.add_order(Order::limit(4, 1, Side::Sell, fp("40"), fp("1"))).unwrap();
    engine.add_order(Order::market(5, 1, Side::Buy, fp("1.5"))).unwrap();
    engine.reduce_order(1, 2, fp("0.5")).unwrap();
}

#[test]
fn test_modes_produce_identical_events() {
    let (mut local, local_events) = create_engine(EngineConfig::single_threaded().with_symbol(create_symbol(1)));
    let (mut actor, actor_events) = create_engine(EngineConfig::actor_per_book().with_symbol(create_symbol(1)));
    assert_eq!(actor.mode(), EngineMode::ActorPerBook);

    run_scenario(&mut local);
    run_scenario(&mut actor);
    actor.shutdown(true).unwrap();
    local.shutdown(true).unwrap();

    assert_eq!(local_events.events(), actor_events.events());
    assert_eq!(actor_events.trades().len(), 2);
}

#[test]
fn test_actor_mode_reports_errors_through_handler() {
    let (mut engine, handler) = create_engine(EngineConfig::actor_per_book().with_symbol(create_symbol(1)));

    engine.add_order(Order::limit(1, 1, Side::Buy, fp("10"), fp("1"))).unwrap();
    engine.add_order(Order::limit(1, 1, Side::Buy, fp("11"), fp("1"))).unwrap();
    engine.reduce_order(1, 99, fp("1")).unwrap();

    let orders = engine.inspect(1, |book| book.total_orders()).unwrap();
    assert_eq!(orders, 1);
    assert_eq!(
        handler.errors(),
        vec![OrderBookError::DuplicateOrder, OrderBookError::OrderNotFound]
    );
}

#[test]
fn test_actor_books_are_independent() {
    let config = EngineConfig::actor_per_book()
        .with_symbol(create_symbol(1))
        .with_symbol(create_symbol(2));
    let (mut engine, handler) = create_engine(config);

    for id in 1..=50u64 {
        let side = if id % 2 == 0 { Side::Buy } else { Side::Sell };
        engine.add_order(Order::limit(id, 1, side, fp("10"), fp("1"))).unwrap();
        engine.add_order(Order::limit(id, 2, Side::Buy, fp("10"), fp("1"))).unwrap();
    }

    assert_eq!(engine.inspect(1, |book| book.total_orders()).unwrap(), 0);
    assert_eq!(engine.inspect(2, |book| book.total_orders()).unwrap(), 50);
    assert_eq!(handler.trades().len(), 25);
}

#[test]
fn test_graceful_shutdown_drains_mailbox() {
    let (mut engine, handler) = create_engine(EngineConfig::actor_per_book().with_symbol(create_symbol(1)));

    for id in 1..=100u64 {
        engine.add_order(Order::limit(id, 1, Side::Buy, fp("10"), fp("1"))).unwrap();
    }
    engine.shutdown(true).unwrap();

    let added = handler
        .events()
        .iter()
        .filter(|event| matches!(event, MarketEvent::OrderAdded { .. }))
        .count();
    assert_eq!(added, 100);
    assert_eq!(engine.order_book_count(), 0);
}

#[test]
fn test_operations_after_shutdown_are_rejected() {
    let (mut engine, _) = create_engine(EngineConfig::actor_per_book().with_symbol(create_symbol(1)));
    engine.shutdown(false).unwrap();

    assert_eq!(
        engine.add_order(Order::limit(1, 1, Side::Buy, fp("10"), fp("1"))),
        Err(OrderBookError::EngineShutdown)
    );
    assert_eq!(engine.delete_order(1, 1), Err(OrderBookError::EngineShutdown));
    assert_eq!(engine.add_order_book(create_symbol(2)), Err(OrderBookError::EngineShutdown));
    assert_eq!(engine.enable_matching(), Err(OrderBookError::EngineShutdown));
    assert_eq!(
        engine.apply(Command::MatchOrderBook { symbol_id: 1 }),
        Err(OrderBookError::EngineShutdown)
    );
}

#[test]
fn test_forced_mark_price_pass_with_matching_disabled() {
    let config = EngineConfig::single_threaded()
        .with_matching(false)
        .with_symbol(create_symbol(1));
    let (mut engine, handler) = create_engine(config);

    engine.set_stop_price_mode(1, StopPriceMode::Mark).unwrap();
    engine.add_order(Order::limit(1, 1, Side::Sell, fp("50"), fp("1"))).unwrap();
    engine.add_order(Order::stop(2, 1, Side::Buy, fp("45"), fp("1"))).unwrap();

    engine.set_mark_price(1, fp("46"), false).unwrap();
    assert!(handler.trades().is_empty());

    engine.set_mark_price(1, fp("46"), true).unwrap();
    assert_eq!(handler.trades(), vec![(1, 2, fp("50"), fp("1"))]);
}

#[test]
fn test_index_price_mode() {
    let (mut engine, handler) = create_engine(EngineConfig::default().with_symbol(create_symbol(1)));

    engine.set_stop_price_mode(1, StopPriceMode::Index).unwrap();
    engine.add_order(Order::limit(1, 1, Side::Buy, fp("50"), fp("1"))).unwrap();
    engine.add_order(Order::stop(2, 1, Side::Sell, fp("55"), fp("1"))).unwrap();
    assert!(handler.trades().is_empty());

    engine.set_index_price(1, fp("54"), false).unwrap();
    assert_eq!(engine.index_price(1).unwrap(), fp("54"));
    assert_eq!(handler.trades(), vec![(1, 2, fp("50"), fp("1"))]);
}

#[test]
fn test_execute_by_price_debit_modes() {
    for (debit_at_order_price, expected) in [(false, "200"), (true, "150")] {
        let config = EngineConfig {
            matching_enabled: false,
            debit_at_order_price,
            ..EngineConfig::default().with_symbol(create_symbol(1))
        };
        let (mut engine, _) = create_engine(config);

        let order = Order::limit(1, 1, Side::Buy, fp("30"), fp("10")).with_available(fp("300"));
        engine.add_order(order).unwrap();
        engine.execute_order_by_price(1, 1, fp("20"), fp("5")).unwrap();

        let available = engine.inspect(1, |book| book.order(1).map(|o| o.available)).unwrap();
        assert_eq!(available, Some(fp(expected)));
    }
}

#[test]
fn test_update_order_book_replaces_limits() {
    let (mut engine, handler) = create_engine(EngineConfig::default().with_symbol(create_symbol(1)));

    let mut symbol = create_symbol(1);
    symbol.name = "RENAMED".to_string();
    symbol.lot_limits = Limits::new(fp("1"), fp("100"), fp("1"));
    engine.update_order_book(symbol).unwrap();

    assert_eq!(engine.inspect(1, |book| book.symbol().name.clone()).unwrap(), "RENAMED");
    assert_eq!(
        engine.add_order(Order::limit(1, 1, Side::Buy, fp("10"), fp("0.5"))),
        Err(OrderBookError::QuantityOutOfRange)
    );
    assert!(handler
        .events()
        .iter()
        .any(|event| matches!(event, MarketEvent::OrderBookUpdated { symbol_id: 1, top: false })));
}

#[test]
fn test_commands_from_json() {
    let (mut engine, handler) = create_engine(EngineConfig::default().with_symbol(create_symbol(1)));
    engine.add_order(Order::limit(7, 1, Side::Sell, fp("12"), fp("3"))).unwrap();

    let json = r#"[
        {"type": "reduce_order", "symbol_id": 1, "order_id": 7, "quantity": "1"},
        {"type": "modify_order", "symbol_id": 1, "order_id": 7, "price": "11.5", "quantity": "2"},
        {"type": "delete_order", "symbol_id": 1, "order_id": 8}
    ]"#;
    let commands: Vec<Command> = serde_json::from_str(json).unwrap();
    let results = engine.apply_batch(commands);

    assert_eq!(results, vec![Ok(()), Ok(()), Err(OrderBookError::OrderNotFound)]);
    let order = engine.inspect(1, |book| book.order(7).cloned()).unwrap().unwrap();
    assert_eq!(order.price, fp("11.5"));
    assert_eq!(order.rest_quantity, fp("2"));
    assert!(handler.errors().is_empty());
}

#[test]
fn test_metrics_handler_in_engine() {
    let handler = Arc::new(MetricsHandler::new(RecordingHandler::new()));
    let mut engine = MatchingEngine::new(EngineConfig::default(), handler.clone()).unwrap();

    engine.add_order_book(create_symbol(3)).unwrap();
    engine.add_order(Order::limit(1, 3, Side::Buy, fp("10"), fp("1"))).unwrap();
    engine.add_order(Order::limit(2, 3, Side::Sell, fp("10"), fp("1"))).unwrap();
    engine.delete_order_book(3).unwrap();

    let snapshot = handler.snapshot();
    assert_eq!(snapshot.books_added, 1);
    assert_eq!(snapshot.books_deleted, 1);
    assert_eq!(snapshot.trades, 1);
    assert_eq!(snapshot.orders_added, 2);
}
