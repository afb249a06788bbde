//! In-memory trait-seam implementations.
//!
//! Each mock serializes every operation through one mutex acquisition,
//! matching the "one script invocation is one atomic step" contract of
//! the production stores. A poisoned lock is recovered rather than
//! propagated; a mock panicking on a poisoned peer would mask the test
//! failure that poisoned it.

use chrono::{DateTime, Utc};
use flashmart_core::clock::Clock;
use flashmart_core::event::{DomainEvent, EnvelopeError, EventEnvelope};
use flashmart_core::ids::{BuyerId, OrderId, ProductId, ReservationId, TransactionId};
use flashmart_core::ledger::{LedgerError, ReservationCoordinator, StockLedger};
use flashmart_core::log::{EventLog, EventLogError, LogRecord, PartitionBounds};
use flashmart_core::money::Money;
use flashmart_core::order::Order;
use flashmart_core::publisher::{EventPublisher, PublishError};
use flashmart_core::recovery::{RecoveryCache, ReservationArchive};
use flashmart_core::reservation::{Reservation, ReservationStatus};
use flashmart_core::store::{OrderStore, OrderStoreError};
use flashmart_core::wallet::{Wallet, WalletError};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ready<T: Send + 'static>(value: T) -> Pin<Box<dyn Future<Output = T> + Send + 'static>> {
    Box::pin(async move { value })
}

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making tests reproducible.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Creates a fixed clock at the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Creates a default fixed clock for tests (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which should never
/// happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

#[derive(Default)]
struct ScriptState {
    quantities: HashMap<ProductId, u32>,
    prices: HashMap<ProductId, i64>,
    sequences: HashMap<ProductId, u64>,
    reservations: HashMap<ReservationId, Reservation>,
    active: BTreeSet<ProductId>,
}

/// In-memory stand-in for the Redis script store.
///
/// Implements [`StockLedger`], [`ReservationCoordinator`] and
/// [`RecoveryCache`] with the same atomicity and error taxonomy as the
/// production scripts, including the "consumed records stay visible but
/// cannot be released" rule.
#[derive(Clone, Default)]
pub struct InMemoryScriptStore {
    state: Arc<Mutex<ScriptState>>,
}

impl InMemoryScriptStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current quantity, if the product has a stock entry.
    #[must_use]
    pub fn quantity(&self, product_id: &ProductId) -> Option<u32> {
        lock(&self.state).quantities.get(product_id).copied()
    }

    /// Returns the active product set, sorted.
    #[must_use]
    pub fn active_products(&self) -> Vec<ProductId> {
        lock(&self.state).active.iter().cloned().collect()
    }

    /// Returns the number of live reservation records.
    #[must_use]
    pub fn reservation_count(&self) -> usize {
        lock(&self.state).reservations.len()
    }
}

impl StockLedger for InMemoryScriptStore {
    fn decrease_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u64, LedgerError>> + Send + '_>> {
        let mut state = lock(&self.state);
        let result = match state.quantities.get(product_id).copied() {
            None => Err(LedgerError::NotFound(product_id.clone())),
            Some(available) if available < quantity => Err(LedgerError::OutOfStock {
                product_id: product_id.clone(),
                requested: quantity,
                available,
            }),
            Some(available) => {
                state.quantities.insert(product_id.clone(), available - quantity);
                let seq = state.sequences.entry(product_id.clone()).or_insert(0);
                *seq += 1;
                Ok(*seq)
            }
        };
        drop(state);
        ready(result)
    }

    fn restore_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>> {
        let mut state = lock(&self.state);
        let result = match state.quantities.get(product_id).copied() {
            None => Err(LedgerError::NotFound(product_id.clone())),
            Some(available) => {
                let restored = available.saturating_add(quantity);
                state.quantities.insert(product_id.clone(), restored);
                Ok(restored)
            }
        };
        drop(state);
        ready(result)
    }

    fn get_stock(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>> {
        let result = lock(&self.state)
            .quantities
            .get(product_id)
            .copied()
            .ok_or(LedgerError::NotFound(product_id.clone()));
        ready(result)
    }

    fn set_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        lock(&self.state).quantities.insert(product_id.clone(), quantity);
        ready(Ok(()))
    }

    fn get_price(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<Money, LedgerError>> + Send + '_>> {
        let result = lock(&self.state)
            .prices
            .get(product_id)
            .copied()
            .map(Money::from_cents)
            .ok_or(LedgerError::NotFound(product_id.clone()));
        ready(result)
    }

    fn set_price(
        &self,
        product_id: &ProductId,
        price: Money,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        lock(&self.state).prices.insert(product_id.clone(), price.cents());
        ready(Ok(()))
    }

    fn remove_all(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut state = lock(&self.state);
        state.quantities.remove(product_id);
        state.prices.remove(product_id);
        state.sequences.remove(product_id);
        drop(state);
        ready(Ok(()))
    }
}

impl ReservationCoordinator for InMemoryScriptStore {
    fn reserve(
        &self,
        reservation: &Reservation,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>> {
        let mut state = lock(&self.state);
        let result = match state.quantities.get(&reservation.product_id).copied() {
            None => Err(LedgerError::NotFound(reservation.product_id.clone())),
            Some(available) if available < reservation.quantity => {
                Err(LedgerError::OutOfStock {
                    product_id: reservation.product_id.clone(),
                    requested: reservation.quantity,
                    available,
                })
            }
            Some(available) => {
                let remaining = available - reservation.quantity;
                state
                    .quantities
                    .insert(reservation.product_id.clone(), remaining);
                state
                    .reservations
                    .insert(reservation.id, reservation.clone());
                Ok(remaining)
            }
        };
        drop(state);
        ready(result)
    }

    fn release(
        &self,
        product_id: &ProductId,
        reservation_id: &ReservationId,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>> {
        let mut state = lock(&self.state);
        let held = state
            .reservations
            .get(reservation_id)
            .filter(|r| r.status == ReservationStatus::Active)
            .map(|r| r.quantity);
        let result = if let Some(quantity) = held {
            state.reservations.remove(reservation_id);
            let restored = state
                .quantities
                .get(product_id)
                .copied()
                .unwrap_or(0)
                .saturating_add(quantity);
            state.quantities.insert(product_id.clone(), restored);
            Ok(restored)
        } else {
            Err(LedgerError::ReservationNotFound(*reservation_id))
        };
        drop(state);
        ready(result)
    }

    fn consume(
        &self,
        reservation_id: &ReservationId,
        order_id: &OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut state = lock(&self.state);
        let result = match state.reservations.get_mut(reservation_id) {
            Some(record) if record.status == ReservationStatus::Active => {
                record.status = ReservationStatus::Consumed;
                record.order_id = Some(*order_id);
                Ok(())
            }
            _ => Err(LedgerError::ReservationNotFound(*reservation_id)),
        };
        drop(state);
        ready(result)
    }

    fn restore(
        &self,
        reservation: &Reservation,
        _ttl_secs: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        lock(&self.state)
            .reservations
            .insert(reservation.id, reservation.clone());
        ready(Ok(()))
    }

    fn get_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Reservation>, LedgerError>> + Send + '_>>
    {
        let result = lock(&self.state).reservations.get(reservation_id).cloned();
        ready(Ok(result))
    }
}

impl RecoveryCache for InMemoryScriptStore {
    fn load_active_products(
        &self,
        products: Vec<ProductId>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        lock(&self.state).active = products.into_iter().collect();
        ready(Ok(()))
    }

    fn mark_active(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        lock(&self.state).active.insert(product_id.clone());
        ready(Ok(()))
    }

    fn mark_inactive(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        lock(&self.state).active.remove(product_id);
        ready(Ok(()))
    }

    fn remove(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        lock(&self.state).active.remove(product_id);
        ready(Ok(()))
    }
}

#[derive(Default)]
struct WalletState {
    balances: HashMap<BuyerId, i64>,
    suspended: HashSet<BuyerId>,
    refunds_by_key: HashMap<String, TransactionId>,
    refund_log: Vec<(BuyerId, Money, String)>,
    next_txn: u64,
}

/// In-memory wallet with idempotent refunds.
#[derive(Clone, Default)]
pub struct InMemoryWallet {
    state: Arc<Mutex<WalletState>>,
}

impl InMemoryWallet {
    /// Creates an empty wallet service (every buyer unknown).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an account for `buyer_id` holding `balance`.
    #[must_use]
    pub fn with_balance(self, buyer_id: BuyerId, balance: Money) -> Self {
        lock(&self.state).balances.insert(buyer_id, balance.cents());
        self
    }

    /// Suspends an account: debits and refunds against it fail.
    pub fn suspend(&self, buyer_id: &BuyerId) {
        lock(&self.state).suspended.insert(buyer_id.clone());
    }

    /// Returns a buyer's balance, if the account exists.
    #[must_use]
    pub fn balance(&self, buyer_id: &BuyerId) -> Option<Money> {
        lock(&self.state)
            .balances
            .get(buyer_id)
            .copied()
            .map(Money::from_cents)
    }

    /// Returns every refund actually applied: `(buyer, amount, key)`.
    /// Idempotent replays do not appear twice.
    #[must_use]
    pub fn refunds(&self) -> Vec<(BuyerId, Money, String)> {
        lock(&self.state).refund_log.clone()
    }
}

impl Wallet for InMemoryWallet {
    fn debit(
        &self,
        buyer_id: &BuyerId,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = Result<TransactionId, WalletError>> + Send + '_>> {
        let mut state = lock(&self.state);
        let result = if state.suspended.contains(buyer_id) {
            Err(WalletError::AccountSuspended(buyer_id.clone()))
        } else {
            match state.balances.get(buyer_id).copied() {
                None => Err(WalletError::AccountNotFound(buyer_id.clone())),
                Some(available) if available < amount.cents() => {
                    Err(WalletError::InsufficientBalance {
                        required: amount,
                        available: Money::from_cents(available),
                    })
                }
                Some(available) => {
                    state
                        .balances
                        .insert(buyer_id.clone(), available - amount.cents());
                    state.next_txn += 1;
                    Ok(TransactionId::new(format!("txn-{}", state.next_txn)))
                }
            }
        };
        drop(state);
        ready(result)
    }

    fn refund(
        &self,
        buyer_id: &BuyerId,
        amount: Money,
        idempotency_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<TransactionId, WalletError>> + Send + '_>> {
        let mut state = lock(&self.state);
        let result = if let Some(existing) = state.refunds_by_key.get(idempotency_key) {
            Ok(existing.clone())
        } else if state.suspended.contains(buyer_id) {
            Err(WalletError::AccountSuspended(buyer_id.clone()))
        } else {
            match state.balances.get(buyer_id).copied() {
                None => Err(WalletError::AccountNotFound(buyer_id.clone())),
                Some(available) => {
                    state
                        .balances
                        .insert(buyer_id.clone(), available + amount.cents());
                    state.next_txn += 1;
                    let txn = TransactionId::new(format!("txn-{}", state.next_txn));
                    state
                        .refunds_by_key
                        .insert(idempotency_key.to_string(), txn.clone());
                    state.refund_log.push((
                        buyer_id.clone(),
                        amount,
                        idempotency_key.to_string(),
                    ));
                    Ok(txn)
                }
            }
        };
        drop(state);
        ready(result)
    }
}

/// Publisher that captures envelopes instead of sending them.
#[derive(Clone, Default)]
pub struct CapturingPublisher {
    published: Arc<Mutex<Vec<(String, EventEnvelope)>>>,
    failing: Arc<AtomicBool>,
}

impl CapturingPublisher {
    /// Creates a publisher that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When `failing` is set, every publish returns a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns everything published so far: `(topic, envelope)`.
    #[must_use]
    pub fn published(&self) -> Vec<(String, EventEnvelope)> {
        lock(&self.published).clone()
    }
}

impl EventPublisher for CapturingPublisher {
    fn publish(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>> {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(PublishError::Transport("captured publisher failing".to_string()))
        } else {
            lock(&self.published).push((topic.to_string(), envelope.clone()));
            Ok(())
        };
        ready(result)
    }
}

/// In-memory partitioned event log.
///
/// Topics are created lazily with a fixed partition count. Offsets
/// start at 0; there is no retention, so `first_offset` is always 0.
#[derive(Clone)]
pub struct InMemoryEventLog {
    topics: Arc<Mutex<HashMap<String, Vec<Vec<Vec<u8>>>>>>,
    partition_count: usize,
}

impl InMemoryEventLog {
    /// Creates a log whose topics all have `partition_count` partitions.
    #[must_use]
    pub fn with_partitions(partition_count: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            partition_count: partition_count.max(1),
        }
    }

    /// Appends raw bytes to a partition, returning the assigned offset.
    #[allow(clippy::missing_panics_doc)] // Partition index is clamped below
    #[allow(clippy::cast_possible_wrap)] // In-memory logs stay far below i64::MAX
    pub fn append(&self, topic: &str, partition: i32, payload: Vec<u8>) -> i64 {
        let mut topics = lock(&self.topics);
        let partitions = topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); self.partition_count]);
        let index = partition.unsigned_abs() as usize % partitions.len();
        partitions[index].push(payload);
        partitions[index].len() as i64 - 1
    }

    /// Serializes and appends an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Serialization`] if encoding fails.
    pub fn append_envelope(
        &self,
        topic: &str,
        partition: i32,
        envelope: &EventEnvelope,
    ) -> Result<i64, EnvelopeError> {
        Ok(self.append(topic, partition, envelope.to_bytes()?))
    }

    /// Convenience: wraps a domain event in an envelope and appends it.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Serialization`] if encoding fails.
    pub fn append_event(
        &self,
        topic: &str,
        partition: i32,
        event: DomainEvent,
    ) -> Result<i64, EnvelopeError> {
        let sent_at = event.occurred_at();
        self.append_envelope(topic, partition, &EventEnvelope::new(event, sent_at))
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::with_partitions(1)
    }
}

impl EventLog for InMemoryEventLog {
    fn partitions(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PartitionBounds>, EventLogError>> + Send + '_>>
    {
        let topics = lock(&self.topics);
        let result = topics.get(topic).map_or_else(
            || Err(EventLogError::TopicNotFound(topic.to_string())),
            |partitions| {
                #[allow(clippy::cast_possible_wrap)] // In-memory logs stay small
                Ok(partitions
                    .iter()
                    .enumerate()
                    .map(|(i, records)| PartitionBounds {
                        partition: i as i32,
                        first_offset: 0,
                        last_offset: records.len() as i64,
                    })
                    .collect())
            },
        );
        drop(topics);
        ready(result)
    }

    fn read(
        &self,
        topic: &str,
        partition: i32,
        from: i64,
        to: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogRecord>, EventLogError>> + Send + '_>> {
        let topics = lock(&self.topics);
        let result = topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition.unsigned_abs() as usize))
            .map_or_else(
                || Err(EventLogError::TopicNotFound(topic.to_string())),
                |records| {
                    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
                    let start = from.max(0).min(records.len() as i64) as usize;
                    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
                    let end = to.max(0).min(records.len() as i64) as usize;
                    #[allow(clippy::cast_possible_wrap)]
                    Ok(records[start.min(end)..end]
                        .iter()
                        .enumerate()
                        .map(|(i, payload)| LogRecord {
                            partition,
                            offset: (start + i) as i64,
                            payload: payload.clone(),
                        })
                        .collect())
                },
            );
        drop(topics);
        ready(result)
    }
}

#[derive(Default)]
struct OrderStoreState {
    orders: HashMap<OrderId, Order>,
    events: Vec<DomainEvent>,
}

/// In-memory order store capturing saved orders and outboxed events.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<Mutex<OrderStoreState>>,
}

impl InMemoryOrderStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the saved copy of an order.
    #[must_use]
    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        lock(&self.state).orders.get(order_id).cloned()
    }

    /// Returns every event enqueued through `save`, in save order.
    #[must_use]
    pub fn outboxed_events(&self) -> Vec<DomainEvent> {
        lock(&self.state).events.clone()
    }
}

impl OrderStore for InMemoryOrderStore {
    fn save(
        &self,
        order: Order,
        events: Vec<DomainEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OrderStoreError>> + Send + '_>> {
        let mut state = lock(&self.state);
        state.orders.insert(order.id, order);
        state.events.extend(events);
        drop(state);
        ready(Ok(()))
    }

    fn load(
        &self,
        order_id: &OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<Order, OrderStoreError>> + Send + '_>> {
        let result = lock(&self.state)
            .orders
            .get(order_id)
            .cloned()
            .ok_or(OrderStoreError::NotFound(*order_id));
        ready(result)
    }
}

/// In-memory reservation archive.
#[derive(Clone, Default)]
pub struct InMemoryReservationArchive {
    reservations: Arc<Mutex<Vec<Reservation>>>,
}

impl InMemoryReservationArchive {
    /// Creates an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a durable reservation copy.
    pub fn push(&self, reservation: Reservation) {
        lock(&self.reservations).push(reservation);
    }

    /// Returns every archived reservation, in insertion order.
    #[must_use]
    pub fn archived(&self) -> Vec<Reservation> {
        lock(&self.reservations).clone()
    }
}

impl ReservationArchive for InMemoryReservationArchive {
    fn record(
        &self,
        reservation: &Reservation,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut reservations = lock(&self.reservations);
        if let Some(existing) = reservations.iter_mut().find(|r| r.id == reservation.id) {
            *existing = reservation.clone();
        } else {
            reservations.push(reservation.clone());
        }
        drop(reservations);
        ready(Ok(()))
    }

    fn update_status(
        &self,
        reservation_id: &ReservationId,
        status: ReservationStatus,
        order_id: Option<OrderId>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut reservations = lock(&self.reservations);
        let result = match reservations.iter_mut().find(|r| r.id == *reservation_id) {
            Some(existing) => {
                existing.status = status;
                if order_id.is_some() {
                    existing.order_id = order_id;
                }
                Ok(())
            }
            None => Err(LedgerError::ReservationNotFound(*reservation_id)),
        };
        drop(reservations);
        ready(result)
    }

    fn load_live_reservations(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Reservation>, LedgerError>> + Send + '_>> {
        let now = Utc::now();
        let result = lock(&self.reservations)
            .iter()
            .filter(|r| r.status == ReservationStatus::Active && r.expires_at > now)
            .cloned()
            .collect();
        ready(Ok(result))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_deterministic() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[tokio::test]
    async fn script_store_matches_ledger_semantics() {
        let store = InMemoryScriptStore::new();
        let product = ProductId::new("sku-1");

        assert_eq!(
            store.decrease_stock(&product, 1).await.unwrap_err(),
            LedgerError::NotFound(product.clone())
        );

        store.set_stock(&product, 2).await.unwrap();
        assert_eq!(store.decrease_stock(&product, 1).await.unwrap(), 1);
        assert_eq!(store.decrease_stock(&product, 1).await.unwrap(), 2);
        assert!(matches!(
            store.decrease_stock(&product, 1).await.unwrap_err(),
            LedgerError::OutOfStock { available: 0, .. }
        ));
    }

    #[tokio::test]
    async fn wallet_refund_is_idempotent_on_key() {
        let buyer = BuyerId::new("buyer-1");
        let wallet = InMemoryWallet::new().with_balance(buyer.clone(), Money::from_cents(100));

        wallet.debit(&buyer, Money::from_cents(60)).await.unwrap();
        wallet
            .refund(&buyer, Money::from_cents(60), "refund:order-1")
            .await
            .unwrap();
        wallet
            .refund(&buyer, Money::from_cents(60), "refund:order-1")
            .await
            .unwrap();

        assert_eq!(wallet.balance(&buyer), Some(Money::from_cents(100)));
        assert_eq!(wallet.refunds().len(), 1);
    }

    #[tokio::test]
    async fn event_log_reads_bounded_ranges() {
        let log = InMemoryEventLog::with_partitions(2);
        let event = DomainEvent::StockSet {
            product_id: ProductId::new("sku-1"),
            quantity: 1,
            occurred_at: Utc::now(),
        };
        for _ in 0..3 {
            log.append_event("t", 0, event.clone()).unwrap();
        }
        log.append_event("t", 1, event).unwrap();

        let bounds = log.partitions("t").await.unwrap();
        assert_eq!(bounds.len(), 2);
        assert_eq!(bounds[0].last_offset, 3);
        assert_eq!(bounds[1].last_offset, 1);

        let records = log.read("t", 0, 1, 3).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 1);
    }
}
