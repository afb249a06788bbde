//! Trait seams for the atomic stock ledger and reservation coordinator.
//!
//! Implementations live in `flashmart-redis`, where every mutating
//! operation is a single server-side Lua script invocation. The traits
//! only promise that each call is one atomic step; they do not promise
//! anything across calls, which is why the saga in `flashmart-saga`
//! compensates instead of locking.

use crate::ids::{OrderId, ProductId, ReservationId};
use crate::money::Money;
use crate::reservation::Reservation;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by ledger and coordinator operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The product has no stock entry in the cache.
    #[error("Product not found in stock cache: {0}")]
    NotFound(ProductId),

    /// Fewer units remain than the caller asked for.
    #[error("Out of stock for {product_id}: requested {requested}, available {available}")]
    OutOfStock {
        /// Product identifier.
        product_id: ProductId,
        /// Units the caller asked for.
        requested: u32,
        /// Units actually remaining.
        available: u32,
    },

    /// No live reservation record exists under the given id.
    ///
    /// Raised both for ids that never existed and for holds whose TTL
    /// already elapsed; the two are indistinguishable once the record
    /// is gone, and both mean the hold cannot be used.
    #[error("Reservation not found or expired: {0}")]
    ReservationNotFound(ReservationId),

    /// A cached record could not be encoded or decoded.
    #[error("Ledger serialization error: {0}")]
    Serialization(String),

    /// The cache was unreachable or the script invocation failed.
    #[error("Ledger transport error: {0}")]
    Transport(String),
}

/// Atomic per-product stock operations.
///
/// Every mutation is a compare-and-act step executed inside the store;
/// two concurrent `decrease_stock` calls for the last unit resolve to
/// exactly one success and one [`LedgerError::OutOfStock`].
pub trait StockLedger: Send + Sync {
    /// Atomically decrements stock by `quantity` if enough remains.
    ///
    /// Returns the settlement sequence number assigned to this
    /// decrement: a per-product counter incremented in the same atomic
    /// step, so sequence order is settlement order.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the product has no stock entry,
    /// [`LedgerError::OutOfStock`] if fewer than `quantity` units
    /// remain.
    fn decrease_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u64, LedgerError>> + Send + '_>>;

    /// Atomically adds `quantity` units back (compensation / restock).
    ///
    /// Returns the new quantity.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the product has no stock entry.
    fn restore_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>>;

    /// Reads the remaining stock for a product.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the product has no stock entry.
    fn get_stock(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>>;

    /// Sets a product's stock to an absolute quantity.
    fn set_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;

    /// Reads a product's unit price.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the product has no price entry.
    fn get_price(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<Money, LedgerError>> + Send + '_>>;

    /// Sets a product's unit price.
    fn set_price(
        &self,
        product_id: &ProductId,
        price: Money,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;

    /// Removes a product's stock, price and sequence entries.
    ///
    /// Idempotent: removing an absent product succeeds.
    fn remove_all(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;
}

/// Atomic reservation lifecycle operations.
///
/// Each operation couples the stock mutation and the reservation record
/// mutation in one script, so stock can never be decremented without a
/// matching live hold or vice versa.
pub trait ReservationCoordinator: Send + Sync {
    /// Takes a hold: decrements stock by the reservation's quantity and
    /// writes the reservation record with its TTL, atomically.
    ///
    /// Returns the product's new remaining quantity.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] / [`LedgerError::OutOfStock`] as for
    /// [`StockLedger::decrease_stock`]; the reservation record is not
    /// written on failure.
    fn reserve(
        &self,
        reservation: &Reservation,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>>;

    /// Releases a live hold: deletes the record and restores the
    /// quantity stored in it, atomically.
    ///
    /// The restored quantity comes from the record itself, never from
    /// the caller, so a stale caller cannot corrupt the counter.
    ///
    /// Returns the product's new remaining quantity.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ReservationNotFound`] if no live record exists
    /// (already consumed, released, or expired); stock is untouched in
    /// that case.
    fn release(
        &self,
        product_id: &ProductId,
        reservation_id: &ReservationId,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>>;

    /// Consumes a live hold into an order: marks the record consumed
    /// without restoring stock (the decrement from [`Self::reserve`]
    /// becomes permanent).
    ///
    /// The record keeps its remaining TTL rather than being deleted, so
    /// a racing release after consumption still finds a record and
    /// fails on its status instead of double-restoring stock.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ReservationNotFound`] if no live active record
    /// exists.
    fn consume(
        &self,
        reservation_id: &ReservationId,
        order_id: &OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;

    /// Rewrites a reservation record during cache recovery, restoring
    /// the remaining TTL. Does not touch stock.
    fn restore(
        &self,
        reservation: &Reservation,
        ttl_secs: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;

    /// Reads a reservation record, if one is still live.
    fn get_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Reservation>, LedgerError>> + Send + '_>>;
}
