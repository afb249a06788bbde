//! Concurrency properties of the reservation and placement paths.
//!
//! These run against the in-memory script store, which shares the
//! production scripts' atomicity contract: one operation, one atomic
//! step. Every property here is about final counts, never about which
//! caller wins.

#![allow(clippy::unwrap_used)] // Test code can use unwrap

use chrono::Duration;
use flashmart_core::clock::Clock;
use flashmart_core::ids::{BuyerId, ProductId};
use flashmart_core::ledger::{ReservationCoordinator, StockLedger};
use flashmart_core::money::Money;
use flashmart_core::reservation::Reservation;
use flashmart_saga::{OrderPlacementSaga, ReservationService, SagaEnvironment};
use flashmart_testing::mocks::{
    test_clock, CapturingPublisher, InMemoryOrderStore, InMemoryReservationArchive,
    InMemoryScriptStore, InMemoryWallet,
};
use proptest::prelude::*;
use std::sync::Arc;

fn product() -> ProductId {
    ProductId::new("sku-hot")
}

fn service(store: &InMemoryScriptStore, wallet: &InMemoryWallet) -> ReservationService {
    ReservationService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(wallet.clone()),
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(InMemoryReservationArchive::new()),
        Arc::new(test_clock()),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fifty_callers_against_ten_units() {
    let store = InMemoryScriptStore::new();
    store.set_stock(&product(), 10).await.unwrap();
    store.set_price(&product(), Money::from_cents(100)).await.unwrap();
    let wallet = InMemoryWallet::new();
    let service = Arc::new(service(&store, &wallet));

    let mut handles = Vec::new();
    for i in 0..50 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let buyer = BuyerId::new(format!("buyer-{i}"));
            service.reserve(&product(), &buyer, 1).await
        }));
    }

    let mut holds = Vec::new();
    let mut rejections = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(hold) => holds.push(hold),
            Err(_) => rejections += 1,
        }
    }

    assert_eq!(holds.len(), 10);
    assert_eq!(rejections, 40);
    assert_eq!(store.quantity(&product()), Some(0));

    // Distinct ids, each releasable exactly once, back to full stock.
    let mut ids: Vec<_> = holds.iter().map(|h| h.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 10);

    for hold in &holds {
        service.release(hold).await.unwrap();
        assert!(service.release(hold).await.is_err());
    }
    assert_eq!(store.quantity(&product()), Some(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_placements_never_oversell() {
    let store = InMemoryScriptStore::new();
    store.set_stock(&product(), 10).await.unwrap();
    store.set_price(&product(), Money::from_cents(100)).await.unwrap();

    let mut wallet = InMemoryWallet::new();
    for i in 0..30 {
        wallet = wallet.with_balance(
            BuyerId::new(format!("buyer-{i}")),
            Money::from_cents(10_000),
        );
    }
    let orders = InMemoryOrderStore::new();
    let saga = Arc::new(OrderPlacementSaga::new(SagaEnvironment {
        ledger: Arc::new(store.clone()),
        wallet: Arc::new(wallet.clone()),
        orders: Arc::new(orders.clone()),
        publisher: Arc::new(CapturingPublisher::new()),
        clock: Arc::new(test_clock()),
        audit_topic: "flashmart-events".to_string(),
    }));

    let mut handles = Vec::new();
    for i in 0..30 {
        let saga = Arc::clone(&saga);
        handles.push(tokio::spawn(async move {
            let buyer = BuyerId::new(format!("buyer-{i}"));
            saga.place_order(&buyer, &product(), 1).await
        }));
    }

    let mut sold = 0u32;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            sold += 1;
        }
    }

    assert_eq!(sold, 10);
    assert_eq!(store.quantity(&product()), Some(0));
}

#[tokio::test]
async fn failed_placement_leaves_balance_exact() {
    // Decrement failure after debit: drain the stock between the
    // buyer's check and their decrement by racing two full-stock
    // requests. Exactly one wins; the loser ends with their original
    // balance whether they lost at the check or after the debit.
    let store = InMemoryScriptStore::new();
    store.set_stock(&product(), 2).await.unwrap();
    store.set_price(&product(), Money::from_cents(300)).await.unwrap();

    let a = BuyerId::new("buyer-a");
    let b = BuyerId::new("buyer-b");
    let wallet = InMemoryWallet::new()
        .with_balance(a.clone(), Money::from_cents(1000))
        .with_balance(b.clone(), Money::from_cents(1000));
    let saga = Arc::new(OrderPlacementSaga::new(SagaEnvironment {
        ledger: Arc::new(store.clone()),
        wallet: Arc::new(wallet.clone()),
        orders: Arc::new(InMemoryOrderStore::new()),
        publisher: Arc::new(CapturingPublisher::new()),
        clock: Arc::new(test_clock()),
        audit_topic: "flashmart-events".to_string(),
    }));

    let product = product();
    let (ra, rb) = tokio::join!(
        saga.place_order(&a, &product, 2),
        saga.place_order(&b, &product, 2),
    );
    assert!(ra.is_ok() != rb.is_ok());

    let (winner, loser) = if ra.is_ok() { (&a, &b) } else { (&b, &a) };
    assert_eq!(wallet.balance(winner), Some(Money::from_cents(400)));
    assert_eq!(wallet.balance(loser), Some(Money::from_cents(1000)));
    assert_eq!(store.quantity(&product), Some(0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// For any initial quantity and any mix of concurrent holds, the
    /// units granted never exceed the initial quantity and the final
    /// count is exactly the initial minus the granted sum.
    #[test]
    fn no_oversell_under_randomized_concurrency(
        initial in 1u32..=100,
        requests in proptest::collection::vec(1u32..=3, 1..60),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let store = InMemoryScriptStore::new();
            store.set_stock(&product(), initial).await.unwrap();
            let coordinator = Arc::new(store.clone());

            let mut handles = Vec::new();
            for (i, qty) in requests.into_iter().enumerate() {
                let coordinator = Arc::clone(&coordinator);
                handles.push(tokio::spawn(async move {
                    let hold = Reservation::with_ttl(
                        product(),
                        BuyerId::new(format!("buyer-{i}")),
                        qty,
                        test_clock().now(),
                        Duration::seconds(60),
                    )
                    .unwrap();
                    coordinator.reserve(&hold).await.map(|_| qty)
                }));
            }

            let mut granted = 0u32;
            for handle in handles {
                if let Ok(qty) = handle.await.unwrap() {
                    granted += qty;
                }
            }

            prop_assert!(granted <= initial);
            prop_assert_eq!(store.quantity(&product()), Some(initial - granted));
            Ok(())
        })?;
    }
}
