//! Boundary service for the reservation lifecycle.
//!
//! [`ReservationService`] wraps the coordinator with input validation
//! and the clock, and adds the finalize path that converts a live hold
//! into a paid order. Stock for a hold is settled when the hold is
//! taken, so finalizing only has to debit the wallet and flip the
//! record to consumed.
//!
//! Every lifecycle step also mirrors the hold into the durable archive
//! best-effort: the cache record is authoritative for liveness, the
//! archive only exists so still-live holds survive a cache wipe.

use chrono::Duration;
use flashmart_core::clock::Clock;
use flashmart_core::ids::{BuyerId, OrderId, ProductId, ReservationId};
use flashmart_core::ledger::{LedgerError, ReservationCoordinator, StockLedger};
use flashmart_core::order::{Order, OrderError};
use flashmart_core::recovery::ReservationArchive;
use flashmart_core::reservation::{
    Reservation, ReservationError, ReservationStatus, DEFAULT_RESERVATION_TTL_SECS,
};
use flashmart_core::store::{OrderStore, OrderStoreError};
use flashmart_core::validation::{
    validate_buyer_id, validate_product_id, validate_quantity, ValidationError,
};
use flashmart_core::wallet::{Wallet, WalletError};
use std::sync::Arc;
use thiserror::Error;

use crate::place_order::refund_key;

/// Errors raised by the reservation lifecycle.
#[derive(Error, Debug)]
pub enum ReserveError {
    /// Request input failed boundary validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The reservation's own constraints were violated.
    #[error(transparent)]
    Reservation(#[from] ReservationError),

    /// The coordinator rejected or failed the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// No live hold with this id (missing, consumed or expired).
    #[error("No live reservation {0}")]
    HoldNotLive(ReservationId),

    /// The hold belongs to a different buyer.
    #[error("Reservation {0} is not held by this buyer")]
    NotHoldOwner(ReservationId),

    /// The wallet debit for finalization failed. The hold is still
    /// live and will self-release on expiry.
    #[error("Payment failed: {0}")]
    PaymentFailed(#[source] WalletError),

    /// The finalized order could not be persisted.
    #[error("Order persistence failed: {0}")]
    Persistence(#[source] OrderStoreError),

    /// An order state transition failed mid-finalize. Unreachable when
    /// the aggregate's transition rules hold; surfaced rather than
    /// swallowed so a rule change cannot corrupt an order silently.
    #[error("Order transition failed: {0}")]
    Internal(#[source] OrderError),
}

/// Validated entry point for taking, releasing and finalizing holds.
pub struct ReservationService {
    coordinator: Arc<dyn ReservationCoordinator>,
    ledger: Arc<dyn StockLedger>,
    wallet: Arc<dyn Wallet>,
    orders: Arc<dyn OrderStore>,
    archive: Arc<dyn ReservationArchive>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ReservationService {
    /// Creates a service with the default hold TTL.
    #[must_use]
    pub fn new(
        coordinator: Arc<dyn ReservationCoordinator>,
        ledger: Arc<dyn StockLedger>,
        wallet: Arc<dyn Wallet>,
        orders: Arc<dyn OrderStore>,
        archive: Arc<dyn ReservationArchive>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            coordinator,
            ledger,
            wallet,
            orders,
            archive,
            clock,
            ttl: Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
        }
    }

    /// Mirrors a hold's state into the durable archive. Best effort:
    /// the cache record with its TTL stays authoritative, so an
    /// archive failure is logged, never surfaced.
    async fn archive_record(&self, reservation: &Reservation) {
        if let Err(e) = self.archive.record(reservation).await {
            tracing::warn!(
                reservation_id = %reservation.id,
                error = %e,
                "Failed to archive reservation"
            );
        }
    }

    async fn archive_status(
        &self,
        reservation_id: &ReservationId,
        status: ReservationStatus,
        order_id: Option<OrderId>,
    ) {
        if let Err(e) = self.archive.update_status(reservation_id, status, order_id).await {
            tracing::warn!(
                reservation_id = %reservation_id,
                status = status.as_str(),
                error = %e,
                "Failed to archive reservation status"
            );
        }
    }

    /// Overrides the hold TTL for every reservation this service takes.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Takes a hold on `quantity` units of a product.
    ///
    /// Validates inputs, then atomically decrements stock and writes
    /// the hold record with its TTL. Returns the hold so the caller can
    /// release or finalize it later.
    ///
    /// # Errors
    ///
    /// [`ReserveError::Validation`] or [`ReserveError::Reservation`]
    /// for bad input; [`ReserveError::Ledger`] when the product is
    /// unknown, stock is insufficient, or the store is unreachable.
    pub async fn reserve(
        &self,
        product_id: &ProductId,
        buyer_id: &BuyerId,
        quantity: u32,
    ) -> Result<Reservation, ReserveError> {
        validate_product_id(product_id.as_str())?;
        validate_buyer_id(buyer_id.as_str())?;
        validate_quantity(quantity)?;

        let reservation = Reservation::with_ttl(
            product_id.clone(),
            buyer_id.clone(),
            quantity,
            self.clock.now(),
            self.ttl,
        )?;

        let remaining = self.coordinator.reserve(&reservation).await?;
        self.archive_record(&reservation).await;
        tracing::info!(
            reservation_id = %reservation.id,
            product_id = %product_id,
            buyer_id = %buyer_id,
            quantity,
            remaining,
            "Hold taken"
        );
        metrics::counter!("reservations.taken").increment(1);
        Ok(reservation)
    }

    /// Releases a live hold, restoring its stock.
    ///
    /// Exactly-once: a second release of the same id fails with
    /// [`ReserveError::Ledger`] carrying `ReservationNotFound`, and
    /// stock is not restored twice.
    ///
    /// # Errors
    ///
    /// [`ReserveError::Ledger`] when no live record exists or the store
    /// is unreachable.
    pub async fn release(&self, reservation: &Reservation) -> Result<u32, ReserveError> {
        let restored = self
            .coordinator
            .release(&reservation.product_id, &reservation.id)
            .await?;
        self.archive_status(&reservation.id, ReservationStatus::Released, None)
            .await;
        tracing::info!(
            reservation_id = %reservation.id,
            product_id = %reservation.product_id,
            restored,
            "Hold released"
        );
        metrics::counter!("reservations.released").increment(1);
        Ok(restored)
    }

    /// Current available quantity for a product, holds excluded.
    ///
    /// # Errors
    ///
    /// [`ReserveError::Ledger`] when the product has no stock entry or
    /// the store is unreachable.
    pub async fn get_stock(&self, product_id: &ProductId) -> Result<u32, ReserveError> {
        validate_product_id(product_id.as_str())?;
        Ok(self.ledger.get_stock(product_id).await?)
    }

    /// Converts a live hold into a paid order.
    ///
    /// Debits the buyer's wallet for the hold's quantity at the current
    /// price, then flips the record to consumed, which keeps the stock
    /// deduction and blocks any later release. The resulting order goes
    /// through the same transactional save as direct placements.
    ///
    /// Stock was settled when the hold was taken, so the order's
    /// settlement sequence is zero here.
    ///
    /// If the consume step fails after the debit (the hold expired
    /// between lookup and consume), the debit is refunded under an
    /// order-scoped idempotency key and nothing is persisted or
    /// outboxed — a refunded attempt leaves no trace downstream.
    ///
    /// # Errors
    ///
    /// [`ReserveError::HoldNotLive`] when no active, unexpired record
    /// exists; [`ReserveError::NotHoldOwner`] when `buyer_id` does not
    /// match the hold; [`ReserveError::PaymentFailed`] when the debit
    /// fails (the hold stays live); [`ReserveError::Persistence`] when
    /// the order save fails.
    pub async fn finalize(
        &self,
        reservation_id: &ReservationId,
        buyer_id: &BuyerId,
    ) -> Result<OrderId, ReserveError> {
        validate_buyer_id(buyer_id.as_str())?;
        let now = self.clock.now();

        let reservation = self
            .coordinator
            .get_reservation(reservation_id)
            .await?
            .ok_or(ReserveError::HoldNotLive(*reservation_id))?;
        if reservation.status != ReservationStatus::Active || reservation.is_expired(now) {
            return Err(ReserveError::HoldNotLive(*reservation_id));
        }
        if reservation.buyer_id != *buyer_id {
            return Err(ReserveError::NotHoldOwner(*reservation_id));
        }

        let unit_price = self.ledger.get_price(&reservation.product_id).await?;
        let mut order = Order::place(
            buyer_id.clone(),
            reservation.product_id.clone(),
            reservation.quantity,
            unit_price,
            now,
        );

        let transaction_id = self
            .wallet
            .debit(buyer_id, order.total_price)
            .await
            .map_err(ReserveError::PaymentFailed)?;
        order
            .settle_payment(transaction_id, now)
            .map_err(ReserveError::Internal)?;

        if let Err(consume_err) = self.coordinator.consume(reservation_id, &order.id).await {
            let key = refund_key(order.id);
            match self.wallet.refund(buyer_id, order.total_price, &key).await {
                Ok(_) => {
                    tracing::warn!(
                        reservation_id = %reservation_id,
                        buyer_id = %buyer_id,
                        amount = %order.total_price,
                        "Hold died before consume, debit refunded, nothing persisted"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        buyer_id = %buyer_id,
                        idempotency_key = %key,
                        error = %e,
                        "Compensating refund failed, funds unresolved"
                    );
                }
            }
            return Err(match consume_err {
                LedgerError::ReservationNotFound(id) => ReserveError::HoldNotLive(id),
                other => ReserveError::Ledger(other),
            });
        }

        self.archive_status(reservation_id, ReservationStatus::Consumed, Some(order.id))
            .await;
        order
            .confirm_reservation(Some(*reservation_id), 0, now)
            .map_err(ReserveError::Internal)?;
        let order_id = order.id;
        let events = order.take_events();
        self.orders
            .save(order, events)
            .await
            .map_err(ReserveError::Persistence)?;

        tracing::info!(
            order_id = %order_id,
            reservation_id = %reservation_id,
            buyer_id = %buyer_id,
            "Hold finalized into order"
        );
        metrics::counter!("reservations.finalized").increment(1);
        Ok(order_id)
    }
}
