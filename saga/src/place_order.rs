//! The order placement saga.
//!
//! One saga instance drives one order through an explicit state
//! machine. States carry everything accumulated so far, so the
//! transition loop in [`OrderPlacementSaga::place_order`] is a plain
//! `match` per step and the compensation rule for each failure point
//! sits next to the step that needs it.

use flashmart_core::clock::Clock;
use flashmart_core::event::EventEnvelope;
use flashmart_core::ids::{BuyerId, OrderId, ProductId, TransactionId};
use flashmart_core::ledger::{LedgerError, StockLedger};
use flashmart_core::money::Money;
use flashmart_core::order::{Order, OrderError};
use flashmart_core::publisher::EventPublisher;
use flashmart_core::store::{OrderStore, OrderStoreError};
use flashmart_core::validation::{
    validate_buyer_id, validate_product_id, validate_quantity, ValidationError,
};
use flashmart_core::wallet::{Wallet, WalletError};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced to the caller of `place_order`.
#[derive(Error, Debug)]
pub enum PlaceOrderError {
    /// Request input failed boundary validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The product has no price entry; nothing was attempted.
    #[error("Stock price unavailable for {0}")]
    StockPriceUnavailable(ProductId),

    /// Fewer units remain than requested; nothing was mutated.
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        /// Units the buyer asked for.
        requested: u32,
        /// Units remaining at check time.
        available: u32,
    },

    /// The wallet debit failed; stock was never touched.
    #[error("Payment failed: {0}")]
    PaymentFailed(#[source] WalletError),

    /// The stock decrement failed after payment succeeded. The debit
    /// was compensated; `refunded` reports whether the refund landed
    /// (a false value means a fund mismatch was logged for operators).
    #[error("Stock settlement failed after payment (refunded: {refunded}): {source}")]
    SettlementFailed {
        /// The ledger failure that triggered compensation.
        #[source]
        source: LedgerError,
        /// Whether the compensating refund succeeded.
        refunded: bool,
    },

    /// The completed order could not be persisted. Stock and payment
    /// already settled; the order row is recoverable from logs.
    #[error("Order persistence failed: {0}")]
    Persistence(#[source] OrderStoreError),

    /// A read against the ledger failed for infrastructure reasons.
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(#[source] LedgerError),

    /// An order state transition failed mid-saga. Unreachable when the
    /// aggregate's transition rules hold; surfaced rather than
    /// swallowed so a rule change cannot corrupt an order silently.
    #[error("Order transition failed: {0}")]
    Internal(#[source] OrderError),
}

/// Receipt returned to the buyer on success.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceOrderReceipt {
    /// The persisted order.
    pub order_id: OrderId,
    /// Amount debited.
    pub total_price: Money,
    /// The ledger's settlement sequence for the decrement.
    pub settlement_seq: u64,
}

/// Saga progress, one variant per step.
///
/// Public so tests can drive and inspect individual transitions.
#[derive(Clone, Debug)]
pub enum SagaState {
    /// Looking up the unit price. No side effects yet.
    PriceLookup,
    /// Checking available quantity. No side effects yet.
    StockCheck {
        /// Unit price found in the ledger.
        unit_price: Money,
    },
    /// Debiting the wallet.
    PaymentDebit {
        /// Unit price found in the ledger.
        unit_price: Money,
    },
    /// Decrementing stock; the debit behind `transaction_id` is the
    /// state that compensation must unwind from here on.
    StockDecrement {
        /// Unit price found in the ledger.
        unit_price: Money,
        /// The settled wallet debit.
        transaction_id: TransactionId,
    },
    /// Terminal: order complete.
    Completed {
        /// The ledger's settlement sequence.
        settlement_seq: u64,
    },
}

/// Collaborators the saga drives.
///
/// Everything is behind `Arc<dyn _>` so one environment can be shared
/// across concurrent saga instances and swapped for in-memory doubles
/// in tests.
#[derive(Clone)]
pub struct SagaEnvironment {
    /// Atomic stock ledger.
    pub ledger: Arc<dyn StockLedger>,
    /// Buyer wallets.
    pub wallet: Arc<dyn Wallet>,
    /// Outbox-backed order persistence.
    pub orders: Arc<dyn OrderStore>,
    /// Audit event publisher (fire-and-forget path).
    pub publisher: Arc<dyn EventPublisher>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Topic the audit envelope is published to.
    pub audit_topic: String,
}

/// Drives one order placement through the saga.
pub struct OrderPlacementSaga {
    env: SagaEnvironment,
}

impl OrderPlacementSaga {
    /// Creates a saga over the given environment.
    #[must_use]
    pub const fn new(env: SagaEnvironment) -> Self {
        Self { env }
    }

    /// Places an order: price lookup, stock check, wallet debit, atomic
    /// stock decrement, transactional persistence, detached audit
    /// publish.
    ///
    /// Concurrent calls for the same product are safe: the decrement is
    /// one atomic ledger step, so over-subscription resolves to exactly
    /// one winner per unit of stock. Calls are *not* ordered relative
    /// to each other.
    ///
    /// # Errors
    ///
    /// See [`PlaceOrderError`]; every variant documents which side
    /// effects (if any) had already happened.
    pub async fn place_order(
        &self,
        buyer_id: &BuyerId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<PlaceOrderReceipt, PlaceOrderError> {
        validate_buyer_id(buyer_id.as_str())?;
        validate_product_id(product_id.as_str())?;
        validate_quantity(quantity)?;

        let mut order: Option<Order> = None;
        let mut state = SagaState::PriceLookup;

        loop {
            state = match state {
                SagaState::PriceLookup => {
                    let unit_price =
                        self.env.ledger.get_price(product_id).await.map_err(|e| match e {
                            LedgerError::NotFound(id) => {
                                PlaceOrderError::StockPriceUnavailable(id)
                            }
                            other => PlaceOrderError::LedgerUnavailable(other),
                        })?;
                    SagaState::StockCheck { unit_price }
                }

                SagaState::StockCheck { unit_price } => {
                    // Early rejection only; the authoritative check is
                    // the atomic decrement below.
                    let available =
                        self.env.ledger.get_stock(product_id).await.map_err(|e| match e {
                            LedgerError::NotFound(_) => PlaceOrderError::InsufficientStock {
                                requested: quantity,
                                available: 0,
                            },
                            other => PlaceOrderError::LedgerUnavailable(other),
                        })?;
                    if available < quantity {
                        return Err(PlaceOrderError::InsufficientStock {
                            requested: quantity,
                            available,
                        });
                    }
                    SagaState::PaymentDebit { unit_price }
                }

                SagaState::PaymentDebit { unit_price } => {
                    let placed = Order::place(
                        buyer_id.clone(),
                        product_id.clone(),
                        quantity,
                        unit_price,
                        self.env.clock.now(),
                    );
                    let total = placed.total_price;
                    order = Some(placed);

                    let transaction_id = self
                        .env
                        .wallet
                        .debit(buyer_id, total)
                        .await
                        .map_err(PlaceOrderError::PaymentFailed)?;
                    SagaState::StockDecrement { unit_price, transaction_id }
                }

                SagaState::StockDecrement { unit_price: _, transaction_id } => {
                    // Invariant: `order` was set in PaymentDebit.
                    let Some(mut placed) = order.take() else {
                        return Err(PlaceOrderError::LedgerUnavailable(
                            LedgerError::Transport("saga lost order state".to_string()),
                        ));
                    };
                    let now = self.env.clock.now();
                    placed
                        .settle_payment(transaction_id, now)
                        .map_err(PlaceOrderError::Internal)?;

                    match self.env.ledger.decrease_stock(product_id, quantity).await {
                        Ok(settlement_seq) => {
                            placed
                                .confirm_reservation(None, settlement_seq, now)
                                .map_err(PlaceOrderError::Internal)?;
                            order = Some(placed);
                            SagaState::Completed { settlement_seq }
                        }
                        Err(source) => {
                            // A refunded attempt leaves no trace: no
                            // order row, no outboxed event. Operators
                            // see the attempt in the log only.
                            let refunded = self.compensate_debit(&placed).await;
                            tracing::warn!(
                                buyer_id = %buyer_id,
                                product_id = %product_id,
                                quantity,
                                refunded,
                                "Stock settlement failed after debit, nothing persisted"
                            );
                            metrics::counter!("saga.place_order.compensated").increment(1);
                            return Err(PlaceOrderError::SettlementFailed { source, refunded });
                        }
                    }
                }

                SagaState::Completed { settlement_seq } => {
                    let Some(mut completed) = order.take() else {
                        return Err(PlaceOrderError::LedgerUnavailable(
                            LedgerError::Transport("saga lost order state".to_string()),
                        ));
                    };
                    let order_id = completed.id;
                    let total_price = completed.total_price;
                    let events = completed.take_events();
                    let audit_event = events.last().cloned();

                    self.env
                        .orders
                        .save(completed, events)
                        .await
                        .map_err(PlaceOrderError::Persistence)?;

                    // Audit publish is detached from the caller: it has
                    // no effect on the sale's correctness and must not
                    // add to buyer-visible latency.
                    if let Some(event) = audit_event {
                        let publisher = Arc::clone(&self.env.publisher);
                        let topic = self.env.audit_topic.clone();
                        let envelope = EventEnvelope::new(event, self.env.clock.now());
                        tokio::spawn(async move {
                            if let Err(e) = publisher.publish(&topic, &envelope).await {
                                tracing::warn!(
                                    topic = %topic,
                                    message_type = %envelope.message_type,
                                    error = %e,
                                    "Audit publish failed (sale unaffected)"
                                );
                            }
                        });
                    }

                    tracing::info!(
                        order_id = %order_id,
                        buyer_id = %buyer_id,
                        product_id = %product_id,
                        quantity,
                        total = %total_price,
                        settlement_seq,
                        "Order placed"
                    );
                    metrics::counter!("saga.place_order.completed").increment(1);
                    return Ok(PlaceOrderReceipt {
                        order_id,
                        total_price,
                        settlement_seq,
                    });
                }
            };
        }
    }

    /// Refunds the order's debit. Best effort: the refund carries an
    /// idempotency key derived from the order id, so operators can
    /// replay it safely if it failed here.
    async fn compensate_debit(&self, order: &Order) -> bool {
        let key = refund_key(order.id);

        match self
            .env
            .wallet
            .refund(&order.buyer_id, order.total_price, &key)
            .await
        {
            Ok(txn) => {
                tracing::info!(
                    order_id = %order.id,
                    refund_txn = %txn,
                    amount = %order.total_price,
                    "Debit compensated"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order.id,
                    buyer_id = %order.buyer_id,
                    amount = %order.total_price,
                    idempotency_key = %key,
                    error = %e,
                    "Compensating refund failed, funds unresolved"
                );
                metrics::counter!("saga.place_order.refund_failed").increment(1);
                false
            }
        }
    }
}

/// Idempotency key for the compensating refund of an order.
#[must_use]
pub fn refund_key(order_id: OrderId) -> String {
    format!("refund:{order_id}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use flashmart_core::order::OrderStatus;
    use flashmart_testing::mocks::{
        test_clock, CapturingPublisher, InMemoryOrderStore, InMemoryScriptStore, InMemoryWallet,
    };

    fn environment(
        store: &InMemoryScriptStore,
        wallet: &InMemoryWallet,
        orders: &InMemoryOrderStore,
        publisher: &CapturingPublisher,
    ) -> SagaEnvironment {
        SagaEnvironment {
            ledger: Arc::new(store.clone()),
            wallet: Arc::new(wallet.clone()),
            orders: Arc::new(orders.clone()),
            publisher: Arc::new(publisher.clone()),
            clock: Arc::new(test_clock()),
            audit_topic: "flashmart-events".to_string(),
        }
    }

    fn buyer() -> BuyerId {
        BuyerId::new("buyer-1")
    }

    fn product() -> ProductId {
        ProductId::new("sku-1")
    }

    async fn seeded_store(quantity: u32, price_cents: i64) -> InMemoryScriptStore {
        let store = InMemoryScriptStore::new();
        store.set_stock(&product(), quantity).await.unwrap();
        store
            .set_price(&product(), Money::from_cents(price_cents))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn happy_path_debits_decrements_and_persists() {
        let store = seeded_store(10, 500).await;
        let wallet = InMemoryWallet::new().with_balance(buyer(), Money::from_cents(5000));
        let orders = InMemoryOrderStore::new();
        let publisher = CapturingPublisher::new();
        let saga = OrderPlacementSaga::new(environment(&store, &wallet, &orders, &publisher));

        let receipt = saga.place_order(&buyer(), &product(), 3).await.unwrap();

        assert_eq!(receipt.total_price, Money::from_cents(1500));
        assert_eq!(store.quantity(&product()), Some(7));
        assert_eq!(wallet.balance(&buyer()), Some(Money::from_cents(3500)));

        let saved = orders.order(&receipt.order_id).unwrap();
        assert_eq!(saved.status, OrderStatus::Reserved);
        // placed + payment_settled + reserved all went through the outbox
        assert_eq!(orders.outboxed_events().len(), 3);
    }

    #[tokio::test]
    async fn missing_price_fails_with_no_side_effects() {
        let store = InMemoryScriptStore::new();
        store.set_stock(&product(), 10).await.unwrap();
        let wallet = InMemoryWallet::new().with_balance(buyer(), Money::from_cents(5000));
        let orders = InMemoryOrderStore::new();
        let publisher = CapturingPublisher::new();
        let saga = OrderPlacementSaga::new(environment(&store, &wallet, &orders, &publisher));

        let err = saga.place_order(&buyer(), &product(), 1).await.unwrap_err();
        assert!(matches!(err, PlaceOrderError::StockPriceUnavailable(_)));
        assert_eq!(wallet.balance(&buyer()), Some(Money::from_cents(5000)));
        assert_eq!(store.quantity(&product()), Some(10));
    }

    #[tokio::test]
    async fn insufficient_stock_fails_before_payment() {
        let store = seeded_store(2, 500).await;
        let wallet = InMemoryWallet::new().with_balance(buyer(), Money::from_cents(5000));
        let orders = InMemoryOrderStore::new();
        let publisher = CapturingPublisher::new();
        let saga = OrderPlacementSaga::new(environment(&store, &wallet, &orders, &publisher));

        let err = saga.place_order(&buyer(), &product(), 5).await.unwrap_err();
        assert!(matches!(
            err,
            PlaceOrderError::InsufficientStock { requested: 5, available: 2 }
        ));
        assert_eq!(wallet.balance(&buyer()), Some(Money::from_cents(5000)));
    }

    #[tokio::test]
    async fn payment_failure_leaves_stock_untouched() {
        let store = seeded_store(10, 500).await;
        let wallet = InMemoryWallet::new().with_balance(buyer(), Money::from_cents(100));
        let orders = InMemoryOrderStore::new();
        let publisher = CapturingPublisher::new();
        let saga = OrderPlacementSaga::new(environment(&store, &wallet, &orders, &publisher));

        let err = saga.place_order(&buyer(), &product(), 3).await.unwrap_err();
        assert!(matches!(
            err,
            PlaceOrderError::PaymentFailed(WalletError::InsufficientBalance { .. })
        ));
        assert_eq!(store.quantity(&product()), Some(10));
        assert_eq!(wallet.balance(&buyer()), Some(Money::from_cents(100)));
    }

    #[tokio::test]
    async fn decrement_failure_after_debit_refunds_the_buyer() {
        // Another buyer drains the stock between the check and the
        // decrement: simulate by a store whose quantity drops after the
        // initial read. Two sequential sagas against quantity 3 achieve
        // this: the first takes 3, the second sees 0 at check time...
        // so instead race at the decrement by pre-checking against a
        // different product state: seed 3, then place 3 twice
        // concurrently; exactly one wins.
        let store = seeded_store(3, 500).await;
        let wallet = InMemoryWallet::new().with_balance(buyer(), Money::from_cents(10_000));
        let orders = InMemoryOrderStore::new();
        let publisher = CapturingPublisher::new();
        let saga = Arc::new(OrderPlacementSaga::new(environment(
            &store, &wallet, &orders, &publisher,
        )));

        let buyer = buyer();
        let product = product();
        let (a, b) = tokio::join!(
            saga.place_order(&buyer, &product, 3),
            saga.place_order(&buyer, &product, 3),
        );
        let (wins, losses) =
            [a, b].into_iter().partition::<Vec<_>, _>(Result::is_ok);
        assert_eq!(wins.len(), 1);
        assert_eq!(losses.len(), 1);

        // Loser was either rejected at the check (no debit) or refunded
        // after the debit; both leave the balance whole minus one sale.
        assert_eq!(store.quantity(&product), Some(0));
        assert_eq!(wallet.balance(&buyer), Some(Money::from_cents(8500)));
    }

    /// Ledger double that passes the availability check and then fails
    /// the decrement, forcing the compensation path deterministically.
    #[derive(Clone)]
    struct VanishingStockLedger {
        inner: InMemoryScriptStore,
    }

    impl flashmart_core::ledger::StockLedger for VanishingStockLedger {
        fn decrease_stock(
            &self,
            product_id: &ProductId,
            quantity: u32,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<u64, LedgerError>> + Send + '_>,
        > {
            let product_id = product_id.clone();
            Box::pin(async move {
                Err(LedgerError::OutOfStock {
                    product_id,
                    requested: quantity,
                    available: 0,
                })
            })
        }

        fn restore_stock(
            &self,
            product_id: &ProductId,
            quantity: u32,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<u32, LedgerError>> + Send + '_>,
        > {
            self.inner.restore_stock(product_id, quantity)
        }

        fn get_stock(
            &self,
            product_id: &ProductId,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<u32, LedgerError>> + Send + '_>,
        > {
            self.inner.get_stock(product_id)
        }

        fn set_stock(
            &self,
            product_id: &ProductId,
            quantity: u32,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<(), LedgerError>> + Send + '_>,
        > {
            self.inner.set_stock(product_id, quantity)
        }

        fn get_price(
            &self,
            product_id: &ProductId,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Money, LedgerError>> + Send + '_>,
        > {
            self.inner.get_price(product_id)
        }

        fn set_price(
            &self,
            product_id: &ProductId,
            price: Money,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<(), LedgerError>> + Send + '_>,
        > {
            self.inner.set_price(product_id, price)
        }

        fn remove_all(
            &self,
            product_id: &ProductId,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<(), LedgerError>> + Send + '_>,
        > {
            self.inner.remove_all(product_id)
        }
    }

    #[tokio::test]
    async fn decrement_failure_refund_restores_exact_balance() {
        let inner = seeded_store(10, 500).await;
        let ledger = VanishingStockLedger { inner };
        let wallet = InMemoryWallet::new().with_balance(buyer(), Money::from_cents(5000));
        let orders = InMemoryOrderStore::new();
        let env = SagaEnvironment {
            ledger: Arc::new(ledger),
            wallet: Arc::new(wallet.clone()),
            orders: Arc::new(orders.clone()),
            publisher: Arc::new(CapturingPublisher::new()),
            clock: Arc::new(test_clock()),
            audit_topic: "flashmart-events".to_string(),
        };
        let saga = OrderPlacementSaga::new(env);

        let err = saga.place_order(&buyer(), &product(), 3).await.unwrap_err();
        assert!(matches!(
            err,
            PlaceOrderError::SettlementFailed { refunded: true, .. }
        ));

        // Compensation is exact and carries the order-scoped key.
        assert_eq!(wallet.balance(&buyer()), Some(Money::from_cents(5000)));
        let refunds = wallet.refunds();
        assert_eq!(refunds.len(), 1);
        assert!(refunds[0].2.starts_with("refund:"));

        // A refunded attempt leaves no trace: nothing persisted,
        // nothing outboxed for downstream consumers to see.
        assert!(orders.outboxed_events().is_empty());
    }

    #[tokio::test]
    async fn refund_carries_order_scoped_idempotency_key() {
        let order = Order::place(
            buyer(),
            product(),
            1,
            Money::from_cents(100),
            chrono::Utc::now(),
        );
        assert_eq!(refund_key(order.id), format!("refund:{}", order.id));
    }

    #[tokio::test]
    async fn invalid_quantity_is_rejected_at_the_boundary() {
        let store = seeded_store(100, 500).await;
        let wallet = InMemoryWallet::new().with_balance(buyer(), Money::from_cents(100_000));
        let orders = InMemoryOrderStore::new();
        let publisher = CapturingPublisher::new();
        let saga = OrderPlacementSaga::new(environment(&store, &wallet, &orders, &publisher));

        let err = saga.place_order(&buyer(), &product(), 11).await.unwrap_err();
        assert!(matches!(err, PlaceOrderError::Validation(_)));
        let err = saga.place_order(&buyer(), &product(), 0).await.unwrap_err();
        assert!(matches!(err, PlaceOrderError::Validation(_)));
    }
}
