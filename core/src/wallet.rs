//! Trait seam for the external wallet (payment) collaborator.

use crate::ids::{BuyerId, TransactionId};
use crate::money::Money;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The buyer's balance cannot cover the debit.
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount the debit needed.
        required: Money,
        /// Amount actually available.
        available: Money,
    },

    /// No wallet account exists for the buyer.
    #[error("Wallet account not found: {0}")]
    AccountNotFound(BuyerId),

    /// The account exists but is suspended.
    #[error("Wallet account suspended: {0}")]
    AccountSuspended(BuyerId),

    /// The wallet service was unreachable or failed.
    #[error("Wallet transport error: {0}")]
    Transport(String),
}

/// Debit and refund operations against buyer wallets.
///
/// Refunds are idempotent on the caller-supplied key: retrying a refund
/// with the same key must not move money twice. The saga derives the
/// key from the order id, so its compensation path can be retried
/// safely after a crash.
pub trait Wallet: Send + Sync {
    /// Debits `amount` from the buyer's wallet.
    ///
    /// Returns the wallet's transaction id for the settled debit.
    ///
    /// # Errors
    ///
    /// [`WalletError::InsufficientBalance`] when the balance cannot
    /// cover the amount; account errors as documented on
    /// [`WalletError`].
    fn debit(
        &self,
        buyer_id: &BuyerId,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = Result<TransactionId, WalletError>> + Send + '_>>;

    /// Refunds `amount` to the buyer's wallet, idempotent on
    /// `idempotency_key`.
    ///
    /// A repeated call with the same key returns the original
    /// transaction id without moving money again.
    ///
    /// # Errors
    ///
    /// Account errors as documented on [`WalletError`]. A refund never
    /// fails for balance reasons.
    fn refund(
        &self,
        buyer_id: &BuyerId,
        amount: Money,
        idempotency_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<TransactionId, WalletError>> + Send + '_>>;
}
