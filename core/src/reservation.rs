//! Time-boxed stock reservations.
//!
//! A reservation holds units of a product for one buyer for a bounded
//! window. The hold is enforced by the script store: reserving decrements
//! visible stock atomically and writes a keyed record with a TTL, so an
//! abandoned reservation self-releases when the sweeper restores its
//! quantity.

use crate::ids::{BuyerId, OrderId, ProductId, ReservationId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on units a single reservation may hold.
///
/// Keeps one buyer from freezing a product's entire stock behind a
/// single hold.
pub const MAX_RESERVATION_QUANTITY: u32 = 10;

/// Default lifetime of a reservation before it self-releases.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 300;

/// Errors raised when constructing a reservation.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReservationError {
    /// Quantity was zero or above [`MAX_RESERVATION_QUANTITY`].
    #[error("Invalid reservation quantity {requested}: must be 1..={max}")]
    InvalidQuantity {
        /// Quantity the caller asked for.
        requested: u32,
        /// The allowed maximum.
        max: u32,
    },

    /// TTL was zero or negative.
    #[error("Invalid reservation TTL: {0} seconds")]
    InvalidTtl(i64),
}

/// Lifecycle state of a reservation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holding stock, waiting to be consumed or to expire.
    Active,
    /// Converted into an order; stock permanently gone.
    Consumed,
    /// Explicitly released by the buyer; stock returned.
    Released,
    /// TTL elapsed; stock returned by the sweeper.
    Expired,
}

impl ReservationStatus {
    /// Returns the string used on the wire and in cache records.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Consumed => "consumed",
            Self::Released => "released",
            Self::Expired => "expired",
        }
    }
}

/// A time-boxed hold on product stock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    /// Time-ordered reservation id.
    pub id: ReservationId,
    /// Product being held.
    pub product_id: ProductId,
    /// Buyer holding the stock.
    pub buyer_id: BuyerId,
    /// Units held.
    pub quantity: u32,
    /// Lifecycle state.
    pub status: ReservationStatus,
    /// Order the hold was consumed into, once consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    /// When the hold was taken.
    pub created_at: DateTime<Utc>,
    /// When the hold self-releases.
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a new active reservation with the default TTL.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidQuantity`] unless
    /// `1 <= quantity <= MAX_RESERVATION_QUANTITY`.
    pub fn new(
        product_id: ProductId,
        buyer_id: BuyerId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, ReservationError> {
        Self::with_ttl(
            product_id,
            buyer_id,
            quantity,
            now,
            Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
        )
    }

    /// Creates a new active reservation with an explicit TTL.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidQuantity`] for an out-of-range
    /// quantity and [`ReservationError::InvalidTtl`] for a non-positive
    /// TTL.
    pub fn with_ttl(
        product_id: ProductId,
        buyer_id: BuyerId,
        quantity: u32,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, ReservationError> {
        if quantity == 0 || quantity > MAX_RESERVATION_QUANTITY {
            return Err(ReservationError::InvalidQuantity {
                requested: quantity,
                max: MAX_RESERVATION_QUANTITY,
            });
        }
        if ttl <= Duration::zero() {
            return Err(ReservationError::InvalidTtl(ttl.num_seconds()));
        }
        Ok(Self {
            id: ReservationId::generate(),
            product_id,
            buyer_id,
            quantity,
            status: ReservationStatus::Active,
            order_id: None,
            created_at: now,
            expires_at: now + ttl,
        })
    }

    /// Returns `true` once the TTL window has elapsed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Seconds of hold remaining, clamped at zero.
    #[must_use]
    pub fn remaining_ttl_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Cache key under which the reservation record is stored.
    #[must_use]
    pub fn cache_key(&self) -> String {
        reservation_key(&self.id)
    }
}

/// Builds the cache key for a reservation id.
#[must_use]
pub fn reservation_key(id: &ReservationId) -> String {
    format!("reservation:{id}")
}
