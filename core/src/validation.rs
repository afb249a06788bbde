//! Boundary validation for raw request input.
//!
//! Ids arriving from the outside are plain strings; these helpers gate
//! them before they become typed ids and reach the cache key scheme,
//! where a stray `:` or control character would corrupt key layout.

use crate::reservation::MAX_RESERVATION_QUANTITY;
use thiserror::Error;

/// Maximum accepted length for raw id strings.
pub const MAX_ID_LENGTH: usize = 64;

/// Errors raised by input validation.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// The id was empty.
    #[error("{field} must not be empty")]
    Empty {
        /// Which input failed.
        field: &'static str,
    },

    /// The id was longer than [`MAX_ID_LENGTH`].
    #[error("{field} exceeds {max} characters")]
    TooLong {
        /// Which input failed.
        field: &'static str,
        /// The allowed maximum.
        max: usize,
    },

    /// The id contained a character outside `[A-Za-z0-9_-]`.
    #[error("{field} contains invalid character {found:?}")]
    InvalidCharacter {
        /// Which input failed.
        field: &'static str,
        /// First offending character.
        found: char,
    },

    /// Quantity was zero or above the per-request cap.
    #[error("quantity {requested} out of range 1..={max}")]
    QuantityOutOfRange {
        /// Quantity the caller asked for.
        requested: u32,
        /// The allowed maximum.
        max: u32,
    },

    /// Price in cents was negative.
    #[error("price must be non-negative, got {0}")]
    NegativePrice(i64),
}

fn validate_id(field: &'static str, raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if raw.len() > MAX_ID_LENGTH {
        return Err(ValidationError::TooLong { field, max: MAX_ID_LENGTH });
    }
    if let Some(found) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(ValidationError::InvalidCharacter { field, found });
    }
    Ok(())
}

/// Validates a raw product id.
///
/// # Errors
///
/// See [`ValidationError`].
pub fn validate_product_id(raw: &str) -> Result<(), ValidationError> {
    validate_id("product_id", raw)
}

/// Validates a raw buyer id.
///
/// # Errors
///
/// See [`ValidationError`].
pub fn validate_buyer_id(raw: &str) -> Result<(), ValidationError> {
    validate_id("buyer_id", raw)
}

/// Validates a requested quantity against the per-request cap.
///
/// # Errors
///
/// [`ValidationError::QuantityOutOfRange`] outside `1..=10`.
pub fn validate_quantity(requested: u32) -> Result<(), ValidationError> {
    if requested == 0 || requested > MAX_RESERVATION_QUANTITY {
        return Err(ValidationError::QuantityOutOfRange {
            requested,
            max: MAX_RESERVATION_QUANTITY,
        });
    }
    Ok(())
}

/// Validates a price in cents.
///
/// # Errors
///
/// [`ValidationError::NegativePrice`] for a negative value.
pub fn validate_price_cents(cents: i64) -> Result<(), ValidationError> {
    if cents < 0 {
        return Err(ValidationError::NegativePrice(cents));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_ids() {
        assert!(validate_product_id("sku-42_B").is_ok());
        assert!(validate_buyer_id("buyer-1").is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert_eq!(
            validate_product_id(""),
            Err(ValidationError::Empty { field: "product_id" })
        );
        let long = "x".repeat(MAX_ID_LENGTH + 1);
        assert_eq!(
            validate_buyer_id(&long),
            Err(ValidationError::TooLong { field: "buyer_id", max: MAX_ID_LENGTH })
        );
    }

    #[test]
    fn rejects_key_scheme_metacharacters() {
        assert_eq!(
            validate_product_id("sku:1"),
            Err(ValidationError::InvalidCharacter { field: "product_id", found: ':' })
        );
    }

    #[test]
    fn quantity_bounds() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(10).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(11).is_err());
    }

    #[test]
    fn price_must_be_non_negative() {
        assert!(validate_price_cents(0).is_ok());
        assert_eq!(validate_price_cents(-1), Err(ValidationError::NegativePrice(-1)));
    }
}
