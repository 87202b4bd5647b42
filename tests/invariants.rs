use std::collections::HashMap;

use matching_core::orderbook::{
    Ladder, Limits, MarketEvent, MatchContext, Order, OrderBook, OrderId, RecordingHandler, Side, Symbol, TimeInForce,
};
use matching_core::FixedPoint;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Limit {
        side: bool,
        price: u64,
        quantity: u64,
        tif: u8,
        budget: Option<u64>,
    },
    Market {
        side: bool,
        quantity: u64,
    },
    Stop {
        side: bool,
        stop: u64,
        quantity: u64,
    },
    Pair {
        side: bool,
        offset: u64,
        quantity: u64,
    },
    Reduce {
        pick: usize,
        quantity: u64,
    },
    Modify {
        pick: usize,
        price: u64,
        quantity: u64,
    },
    Delete {
        pick: usize,
    },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (any::<bool>(), 90u64..110, 1u64..20, 0u8..3, proptest::option::of(0u64..50)).prop_map(
            |(side, price, quantity, tif, budget)| Op::Limit {
                side,
                price,
                quantity,
                tif,
                budget
            }
        ),
        1 => (any::<bool>(), 1u64..30).prop_map(|(side, quantity)| Op::Market { side, quantity }),
        1 => (any::<bool>(), 90u64..110, 1u64..10).prop_map(|(side, stop, quantity)| Op::Stop {
            side,
            stop,
            quantity
        }),
        1 => (any::<bool>(), 1u64..8, 1u64..10).prop_map(|(side, offset, quantity)| Op::Pair {
            side,
            offset,
            quantity
        }),
        1 => (any::<usize>(), 1u64..10).prop_map(|(pick, quantity)| Op::Reduce { pick, quantity }),
        1 => (any::<usize>(), 90u64..110, 1u64..20).prop_map(|(pick, price, quantity)| Op::Modify {
            pick,
            price,
            quantity
        }),
        1 => any::<usize>().prop_map(|pick| Op::Delete { pick }),
    ]
}

fn units(value: u64) -> FixedPoint {
    FixedPoint::from_int(value)
}

fn create_book() -> OrderBook {
    let limits = Limits::new(units(1), units(100_000), units(1));
    OrderBook::new(Symbol::new(1, "FUZZ", limits, limits))
}

fn side_of(buy: bool) -> Side {
    if buy {
        Side::Buy
    } else {
        Side::Sell
    }
}

fn pick_id(book: &OrderBook, pick: usize) -> Option<OrderId> {
    let mut ids: Vec<OrderId> = book.orders().map(|order| order.id).collect();
    if ids.is_empty() {
        return None;
    }
    ids.sort_unstable();
    Some(ids[pick % ids.len()])
}

fn check_book(book: &OrderBook) {
    if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
        assert!(bid < ask, "crossed book: bid {} ask {}", bid, ask);
    }

    for order in book.orders() {
        assert_eq!(
            order.executed_quantity + order.rest_quantity,
            order.quantity,
            "order {} quantities diverged",
            order.id
        );
        assert!(!order.rest_quantity.is_zero(), "executed order {} still resting", order.id);
    }

    for ladder in Ladder::ALL {
        let mut count = 0;
        for level in book.ladder(ladder).iter() {
            let orders = book.orders_at(ladder, level.price);
            let volume: FixedPoint = orders.iter().map(|order| order.rest_quantity).sum();
            let visible: FixedPoint = orders.iter().map(|order| order.visible_quantity()).sum();
            assert_eq!(level.volume, volume);
            assert_eq!(level.visible, visible);
            assert_eq!(level.order_count, orders.len());
            count += orders.len();
        }
        assert_eq!(count, book.orders().filter(|o| book.ladder_of(o.id) == Some(ladder)).count());
    }
}

fn check_budgets(handler: &RecordingHandler, locked: &HashMap<OrderId, FixedPoint>) {
    for event in handler.events() {
        let order = match event {
            MarketEvent::OrderUpdated { order } | MarketEvent::OrderDeleted { order } => order,
            _ => continue,
        };
        let Some(&budget) = locked.get(&order.id) else {
            continue;
        };
        let spent = match order.side {
            Side::Buy => order.executed_quote_quantity,
            Side::Sell => order.executed_quantity,
        };
        assert!(spent <= budget, "order {} spent {} of {}", order.id, spent, budget);
        assert_eq!(order.available, budget - spent);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_book_invariants_hold(ops in proptest::collection::vec(op_strategy(), 1..120)) {
        let handler = RecordingHandler::new();
        let ctx = MatchContext::new(&handler, true);
        let mut book = create_book();
        let mut locked = HashMap::new();
        let mut next_id: OrderId = 1;

        for op in ops {
            match op {
                Op::Limit { side, price, quantity, tif, budget } => {
                    let tif = [TimeInForce::Gtc, TimeInForce::Ioc, TimeInForce::Fok][tif as usize];
                    let mut order = Order::limit(next_id, 1, side_of(side), units(price), units(quantity))
                        .with_time_in_force(tif);
                    if let Some(extra) = budget {
                        let amount = if side { units(price * quantity + extra) } else { units(quantity + extra) };
                        order = order.with_available(amount);
                        locked.insert(next_id, amount);
                    }
                    let _ = book.add_order(&ctx, order);
                }
                Op::Market { side, quantity } => {
                    let _ = book.add_order(&ctx, Order::market(next_id, 1, side_of(side), units(quantity)));
                }
                Op::Stop { side, stop, quantity } => {
                    let _ = book.add_order(&ctx, Order::stop(next_id, 1, side_of(side), units(stop), units(quantity)));
                }
                Op::Pair { side, offset, quantity } => {
                    let Some(reference) = book.best_bid().or(book.best_ask()) else {
                        continue;
                    };
                    let reference = reference.integer_part() as u64;
                    let (stop, limit) = if side {
                        (reference + offset, reference.saturating_sub(offset).max(1))
                    } else {
                        (reference.saturating_sub(offset).max(1), reference + offset)
                    };
                    let side = side_of(side);
                    let _ = book.add_orders_pair(
                        &ctx,
                        Order::stop(next_id, 1, side, units(stop), units(quantity)),
                        Order::limit(next_id + 1, 1, side, units(limit), units(quantity)),
                    );
                    next_id += 1;
                }
                Op::Reduce { pick, quantity } => {
                    if let Some(id) = pick_id(&book, pick) {
                        let _ = book.reduce_order(&ctx, id, units(quantity));
                    }
                }
                Op::Modify { pick, price, quantity } => {
                    if let Some(id) = pick_id(&book, pick) {
                        let _ = book.modify_order(&ctx, id, units(price), units(quantity));
                    }
                }
                Op::Delete { pick } => {
                    if let Some(id) = pick_id(&book, pick) {
                        prop_assert!(book.delete_order(&ctx, id).is_ok());
                        prop_assert!(!book.contains(id));
                    }
                }
            }
            next_id += 1;
            check_book(&book);
        }

        // Every trade moves the same quantity on both sides
        let executions = handler.executions();
        let traded: FixedPoint = handler.trades().iter().map(|trade| trade.3).sum();
        let executed: FixedPoint = executions.iter().map(|execution| execution.2).sum();
        prop_assert_eq!(executed, traded + traded);

        check_budgets(&handler, &locked);
    }
}
