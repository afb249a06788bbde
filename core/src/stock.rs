//! Stock records and the cache key scheme for the script store.
//!
//! Per-product state lives in three keys so the Lua scripts can address
//! them independently:
//!
//! - `stock:product:<id>` — remaining quantity (integer string)
//! - `stock:price:<id>` — unit price in cents (integer string)
//! - `stock:seq:<id>` — monotonic settlement sequence, `INCR`'d inside
//!   the settle script so every successful decrement gets a unique,
//!   ordered number

use crate::ids::ProductId;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key holding a product's remaining stock quantity.
#[must_use]
pub fn stock_key(product_id: &ProductId) -> String {
    format!("stock:product:{product_id}")
}

/// Key holding a product's unit price in cents.
#[must_use]
pub fn price_key(product_id: &ProductId) -> String {
    format!("stock:price:{product_id}")
}

/// Key holding a product's settlement sequence counter.
#[must_use]
pub fn sequence_key(product_id: &ProductId) -> String {
    format!("stock:seq:{product_id}")
}

/// A product's cached stock state, as read back from the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    /// Product identifier.
    pub product_id: ProductId,
    /// Remaining units.
    pub quantity: u32,
    /// Quantity the sale opened with; the baseline for the low-stock
    /// percentage.
    pub initial_quantity: u32,
    /// Unit price.
    pub price: Money,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// Creates a fresh stock record, with `quantity` as the baseline.
    #[must_use]
    pub const fn new(
        product_id: ProductId,
        quantity: u32,
        price: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            quantity,
            initial_quantity: quantity,
            price,
            updated_at: now,
        }
    }

    /// Returns `true` when no units remain.
    #[must_use]
    pub const fn is_sold_out(&self) -> bool {
        self.quantity == 0
    }

    /// Remaining stock as a percentage of the opening quantity,
    /// clamped to 100.
    ///
    /// A zero baseline reads as fully stocked rather than dividing by
    /// zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Quotient is below 100
    pub const fn remaining_percent(&self) -> u32 {
        if self.initial_quantity == 0 || self.quantity >= self.initial_quantity {
            return 100;
        }
        (self.quantity as u64 * 100 / self.initial_quantity as u64) as u32
    }

    /// Returns `true` once remaining stock falls below
    /// `threshold_percent` of the opening quantity.
    #[must_use]
    pub const fn is_low_stock(&self, threshold_percent: u32) -> bool {
        self.remaining_percent() < threshold_percent
    }
}
