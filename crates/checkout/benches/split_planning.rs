use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use atelier_checkout::{
    CheckoutSession, DisplaySnapshot, NewSessionItem, SessionAddress, SplitContext, SplitMode,
    plan_split,
};
use atelier_core::{
    CheckoutSessionId, ItemRef, MaterialId, Provider, SessionItemId, SupplierId, UserId,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

fn session_with(items: usize, providers: usize) -> CheckoutSession {
    let now = Utc::now();
    let suppliers: Vec<SupplierId> = (0..providers).map(|_| SupplierId::new()).collect();
    let mut session = CheckoutSession::open(
        CheckoutSessionId::new(),
        UserId::new(),
        SessionAddress::default(),
        30,
        now,
    );
    for i in 0..items {
        let item = NewSessionItem {
            item: ItemRef::Material(MaterialId::new()),
            quantity: (i % 5 + 1) as u32,
            unit_price: Decimal::new(1999, 2),
            provider: Provider::Supplier(suppliers[i % providers]),
            display: DisplaySnapshot::default(),
        };
        session.stage(SessionItemId::new(), item, now).unwrap();
    }
    session
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_split");

    for (items, providers) in [(10, 2), (100, 10), (1_000, 50)] {
        let session = session_with(items, providers);
        let shopper = session.shopper_id();
        group.throughput(Throughput::Elements(items as u64));
        group.bench_with_input(
            BenchmarkId::new("all", format!("{items}x{providers}")),
            &session,
            |b, session| {
                b.iter(|| {
                    let mut s = session.clone();
                    let ctx = SplitContext {
                        shopper_id: shopper,
                        requested_address: None,
                        fallback_address: "bench",
                        group_hold: Duration::minutes(30),
                        now: Utc::now(),
                    };
                    black_box(plan_split(&mut s, &SplitMode::All, &ctx))
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_split);
criterion_main!(benches);
