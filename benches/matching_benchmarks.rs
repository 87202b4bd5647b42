use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use matching_core::orderbook::{Limits, MatchContext, NoopHandler, Order, OrderBook, Side, Symbol};
use matching_core::FixedPoint;

fn create_book() -> OrderBook {
    let limits = Limits::new(FixedPoint::from_int(1), FixedPoint::from_int(1_000_000), FixedPoint::from_int(1));
    OrderBook::new(Symbol::new(1, "BENCH", limits, limits))
}

fn populate(book: &mut OrderBook, ctx: &MatchContext<'_>, depth: u64) {
    for i in 0..depth {
        let bid = Order::limit(i * 2 + 1, 1, Side::Buy, FixedPoint::from_int(10_000 - i % 100), FixedPoint::from_int(10));
        let ask = Order::limit(i * 2 + 2, 1, Side::Sell, FixedPoint::from_int(10_001 + i % 100), FixedPoint::from_int(10));
        let _ = book.add_order(ctx, bid);
        let _ = book.add_order(ctx, ask);
    }
}

fn bench_add_cancel(c: &mut Criterion) {
    let handler = NoopHandler;
    let ctx = MatchContext::new(&handler, true);

    let mut group = c.benchmark_group("add_cancel");
    for depth in [100u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut book = create_book();
            populate(&mut book, &ctx, depth);
            let id = depth * 2 + 1;
            b.iter(|| {
                let order = Order::limit(id, 1, Side::Buy, FixedPoint::from_int(9_950), FixedPoint::from_int(5));
                let _ = book.add_order(&ctx, black_box(order));
                let _ = book.delete_order(&ctx, black_box(id));
            });
        });
    }
    group.finish();
}

fn bench_match(c: &mut Criterion) {
    let handler = NoopHandler;
    let ctx = MatchContext::new(&handler, true);

    c.bench_function("market_sweep", |b| {
        b.iter_batched(
            || {
                let mut book = create_book();
                populate(&mut book, &ctx, 1_000);
                book
            },
            |mut book| {
                let order = Order::market(1_000_000, 1, Side::Buy, FixedPoint::from_int(2_500));
                let _ = book.add_order(&ctx, black_box(order));
                book
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_add_cancel, bench_match);
criterion_main!(benches);
