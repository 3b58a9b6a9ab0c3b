use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use stockledger_core::{LocationId, ProductId, TenantId, WarehouseId};
use stockledger_infra::{InMemoryStockJournal, InMemoryStockLevelStore, StockConfig, StockService};
use stockledger_inventory::{
    Location, LocationUsage, Lot, NewMove, Product, QuantFilter, QuantKey, Tracking, Warehouse,
    WarehouseConfig,
};

struct Seeded {
    wh: Warehouse,
    product: ProductId,
    stock: LocationId,
    customer: LocationId,
}

/// A warehouse holding `lots` lots of one product, ten units each, with
/// distinct incoming dates.
fn seeded_warehouse(lots: usize) -> anyhow::Result<Seeded> {
    let mut wh = Warehouse::new(WarehouseId::new(), WarehouseConfig::default())?;
    let stock = wh.register_location(Location::new("WH/Stock", LocationUsage::Internal))?;
    let customer = wh.register_location(Location::new("Customers", LocationUsage::Customer))?;
    let product = wh.register_product(Product::new("Bench item", Tracking::Lot))?;
    let start = Utc::now() - Duration::days(lots as i64);
    for i in 0..lots {
        let lot = wh.register_lot(Lot::new(format!("LOT-{i:05}"), product))?;
        let key = QuantKey::new(product, stock).with_lot(lot);
        wh.update_quantity(&key, Decimal::from(10), Some(start + Duration::days(i as i64)))?;
    }
    wh.drain_events();
    Ok(Seeded {
        wh,
        product,
        stock,
        customer,
    })
}

/// A warehouse with `moves` completed receipts behind it.
fn warehouse_with_history(moves: usize) -> anyhow::Result<(Warehouse, ProductId, LocationId)> {
    let mut wh = Warehouse::new(WarehouseId::new(), WarehouseConfig::default())?;
    let stock = wh.register_location(Location::new("WH/Stock", LocationUsage::Internal))?;
    let supplier = wh.register_location(Location::new("Vendors", LocationUsage::Supplier))?;
    let product = wh.register_product(Product::new("Bench item", Tracking::None))?;
    for _ in 0..moves {
        let mv = wh.create_move(NewMove::new(product, supplier, stock, Decimal::ONE))?;
        wh.assign_move(mv)?;
        wh.set_quantity_done(mv, Decimal::ONE)?;
        wh.complete_move(mv)?;
    }
    wh.drain_events();
    Ok((wh, product, stock))
}

fn bench_reserve_across_quants(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_across_quants");

    for lots in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(lots as u64));
        group.bench_with_input(BenchmarkId::new("reserve_half", lots), &lots, |b, &lots| {
            let seeded = seeded_warehouse(lots).unwrap();
            let filter = QuantFilter::any(seeded.product, seeded.stock);
            let qty = Decimal::from(lots as i64 * 5);
            b.iter(|| {
                let mut wh = seeded.wh.clone();
                black_box(wh.reserve(&filter, black_box(qty)).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_move_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("move_assignment");

    for lots in [10usize, 100] {
        group.bench_with_input(BenchmarkId::new("assign_move", lots), &lots, |b, &lots| {
            let seeded = seeded_warehouse(lots).unwrap();
            let demand = Decimal::from(lots as i64 * 10);
            b.iter(|| {
                let mut wh = seeded.wh.clone();
                let mv = wh
                    .create_move(NewMove::new(seeded.product, seeded.stock, seeded.customer, demand))
                    .unwrap();
                black_box(wh.assign_move(mv).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_service_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("service_pipeline");

    group.bench_function("update_quantity_journaled", |b| {
        let svc = StockService::new(
            TenantId::new(),
            WarehouseId::new(),
            &StockConfig::default(),
            InMemoryStockJournal::new(),
            InMemoryStockLevelStore::new(),
        )
        .unwrap();
        let stock = svc
            .register_location(Location::new("WH/Stock", LocationUsage::Internal))
            .unwrap();
        let product = svc
            .register_product(Product::new("Bench item", Tracking::None))
            .unwrap();
        let key = QuantKey::new(product, stock);

        b.iter(|| {
            svc.update_quantity(key, black_box(Decimal::ONE), None)
                .unwrap();
        });
    });

    for history in [100usize, 5000] {
        group.bench_with_input(
            BenchmarkId::new("update_quantity_with_history", history),
            &history,
            |b, &history| {
                let (wh, product, stock) = warehouse_with_history(history).unwrap();
                let svc = StockService::with_warehouse(
                    TenantId::new(),
                    wh,
                    InMemoryStockJournal::new(),
                    InMemoryStockLevelStore::new(),
                );
                let key = QuantKey::new(product, stock);

                b.iter(|| {
                    svc.update_quantity(key, black_box(Decimal::ONE), None)
                        .unwrap();
                });
            },
        );
    }

    group.bench_function("rebuild_projection_1000", |b| {
        let svc = StockService::new(
            TenantId::new(),
            WarehouseId::new(),
            &StockConfig::default(),
            InMemoryStockJournal::new(),
            InMemoryStockLevelStore::new(),
        )
        .unwrap();
        let stock = svc
            .register_location(Location::new("WH/Stock", LocationUsage::Internal))
            .unwrap();
        let product = svc
            .register_product(Product::new("Bench item", Tracking::None))
            .unwrap();
        for _ in 0..1000 {
            svc.update_quantity(QuantKey::new(product, stock), Decimal::ONE, None)
                .unwrap();
        }

        b.iter(|| svc.rebuild_projection().unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_reserve_across_quants,
    bench_move_assignment,
    bench_service_pipeline
);
criterion_main!(benches);
