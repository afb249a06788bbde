//! Money amounts in integer cents.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Money amount in cents (to avoid floating point issues).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Creates a new money amount from cents.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the value in cents.
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Multiplies a unit price by a quantity, saturating on overflow.
    ///
    /// Used exactly once per order, at creation time: the total price is
    /// computed here and never recomputed afterwards.
    #[must_use]
    pub const fn times(&self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(quantity as i64))
    }

    /// Returns the value in dollars (floating point, display only).
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // display only
    pub fn dollars(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.dollars())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn times_computes_total() {
        let unit = Money::from_cents(1250);
        assert_eq!(unit.times(3), Money::from_cents(3750));
    }

    #[test]
    fn times_saturates_instead_of_wrapping() {
        let unit = Money::from_cents(i64::MAX);
        assert_eq!(unit.times(2), Money::from_cents(i64::MAX));
    }

    #[test]
    fn display_formats_dollars() {
        assert_eq!(Money::from_cents(1999).to_string(), "$19.99");
    }
}
