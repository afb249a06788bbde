//! Trait seams and types for cache recovery.
//!
//! After a cache wipe the ledger's keys are gone; the recovery engine
//! in `flashmart-recovery` rebuilds them from the most recent snapshot
//! on the event log plus a replay of everything after it, then restores
//! live reservations from the durable archive.

use crate::ids::{OrderId, ProductId, ReservationId};
use crate::ledger::LedgerError;
use crate::reservation::{Reservation, ReservationStatus};
use std::future::Future;
use std::pin::Pin;

/// What to rebuild.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecoveryKind {
    /// Only re-materialize live reservation records (stock keys
    /// survived, e.g. after a partial eviction).
    Reservations,
    /// Rebuild the full product set and reservations (cold cache).
    Full,
}

/// Summary of a completed recovery run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Products re-marked active in the cache.
    pub products_restored: u64,
    /// Live reservations re-materialized.
    pub reservations_restored: u64,
    /// Log records replayed past the snapshot.
    pub records_replayed: u64,
    /// Records skipped because they could not be decoded.
    pub records_skipped: u64,
}

/// Active-product bookkeeping in the cache.
///
/// Tracks which products are currently sellable so reads can be served
/// from the cache alone. Implemented on the same store as the ledger.
pub trait RecoveryCache: Send + Sync {
    /// Replaces the active-product set with `products`.
    fn load_active_products(
        &self,
        products: Vec<ProductId>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;

    /// Marks one product active.
    fn mark_active(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;

    /// Marks one product inactive.
    fn mark_inactive(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;

    /// Removes one product from the set entirely.
    fn remove(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;
}

/// Durable record of reservations, outliving the cache.
///
/// The cache's TTL'd reservation records are the source of truth for
/// liveness, but they vanish with the cache. The archive (Postgres)
/// keeps enough to re-materialize holds that were still live at wipe
/// time.
pub trait ReservationArchive: Send + Sync {
    /// Writes (or rewrites) the durable copy of a reservation.
    ///
    /// Called right after the cache-side reserve succeeds. A failed
    /// write is tolerable: the hold still self-releases via its TTL,
    /// so callers log the failure instead of unwinding the hold.
    fn record(
        &self,
        reservation: &Reservation,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;

    /// Records a status transition for an archived reservation.
    ///
    /// `order_id` is set on the consumed transition and left alone
    /// otherwise.
    fn update_status(
        &self,
        reservation_id: &ReservationId,
        status: ReservationStatus,
        order_id: Option<OrderId>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>>;

    /// Returns all reservations whose status is active and whose
    /// expiry lies in the future.
    fn load_live_reservations(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Reservation>, LedgerError>> + Send + '_>>;
}
