//! Transport-level classification of domain errors.
//!
//! Outer surfaces (HTTP handlers, gRPC services) map every domain error
//! into one of a small set of status classes. The mapping lives here so
//! each surface does not invent its own, and so a new error variant
//! fails to compile until someone classifies it.

use crate::ledger::LedgerError;
use crate::order::OrderError;
use crate::reservation::ReservationError;
use crate::store::OrderStoreError;
use crate::validation::ValidationError;
use crate::wallet::WalletError;

/// Coarse status class for an error crossing the service boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// The request itself was malformed (HTTP 400).
    InvalidArgument,
    /// The referenced entity does not exist (HTTP 404).
    NotFound,
    /// The request was well-formed but state forbids it: out of stock,
    /// insufficient balance, expired hold (HTTP 409).
    FailedPrecondition,
    /// Infrastructure failure; safe to retry (HTTP 500).
    Internal,
}

impl ErrorCode {
    /// Returns the canonical lowercase name of the class.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::FailedPrecondition => "failed_precondition",
            Self::Internal => "internal",
        }
    }
}

impl From<&LedgerError> for ErrorCode {
    fn from(err: &LedgerError) -> Self {
        match err {
            LedgerError::NotFound(_) => Self::NotFound,
            LedgerError::OutOfStock { .. } | LedgerError::ReservationNotFound(_) => {
                Self::FailedPrecondition
            }
            LedgerError::Serialization(_) | LedgerError::Transport(_) => Self::Internal,
        }
    }
}

impl From<&WalletError> for ErrorCode {
    fn from(err: &WalletError) -> Self {
        match err {
            WalletError::InsufficientBalance { .. } | WalletError::AccountSuspended(_) => {
                Self::FailedPrecondition
            }
            WalletError::AccountNotFound(_) => Self::NotFound,
            WalletError::Transport(_) => Self::Internal,
        }
    }
}

impl From<&OrderStoreError> for ErrorCode {
    fn from(err: &OrderStoreError) -> Self {
        match err {
            OrderStoreError::NotFound(_) => Self::NotFound,
            OrderStoreError::Serialization(_) | OrderStoreError::Database(_) => Self::Internal,
        }
    }
}

impl From<&ValidationError> for ErrorCode {
    fn from(_: &ValidationError) -> Self {
        Self::InvalidArgument
    }
}

impl From<&ReservationError> for ErrorCode {
    fn from(_: &ReservationError) -> Self {
        Self::InvalidArgument
    }
}

impl From<&OrderError> for ErrorCode {
    fn from(_: &OrderError) -> Self {
        Self::FailedPrecondition
    }
}
