//! # Flashmart Redis
//!
//! Script-store implementations of the stock ledger, the reservation
//! coordinator and the recovery cache, all on one Redis connection
//! manager.
//!
//! # Why Lua scripts
//!
//! Redis executes a script single-threaded and runs it to completion
//! before any other command. Every mutating operation here is therefore
//! one script invocation touching all the keys it needs, which is what
//! gives "exactly one winner per unit of stock" under arbitrary
//! concurrent callers without any application-side locking. No code in
//! this crate (or anywhere else) may read-modify-write these keys in
//! separate commands.
//!
//! # Key layout
//!
//! - `stock:product:<id>` — remaining quantity (integer)
//! - `stock:price:<id>` — unit price in cents (integer)
//! - `stock:seq:<id>` — settlement sequence counter (integer)
//! - `reservation:<id>` — JSON reservation record, TTL = remaining hold
//! - `product:active` — set of active product ids

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use flashmart_core::ledger::LedgerError;
use redis::aio::ConnectionManager;
use redis::Client;

pub mod coordinator;
pub mod ledger;
pub mod recovery_cache;

/// Set key holding the ids of currently active products.
pub const ACTIVE_PRODUCTS_KEY: &str = "product:active";

/// Shared Redis handle behind the ledger, coordinator and recovery
/// cache implementations.
///
/// Cloning is cheap: `ConnectionManager` multiplexes one connection and
/// reconnects on failure.
#[derive(Clone)]
pub struct RedisScriptStore {
    conn_manager: ConnectionManager,
}

impl RedisScriptStore {
    /// Connects to Redis at `redis_url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Transport`] if the client cannot be
    /// created or the connection manager fails to start.
    pub async fn connect(redis_url: &str) -> Result<Self, LedgerError> {
        let client = Client::open(redis_url).map_err(|e| {
            LedgerError::Transport(format!("Failed to create Redis client: {e}"))
        })?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            LedgerError::Transport(format!("Failed to create Redis connection manager: {e}"))
        })?;
        Ok(Self { conn_manager })
    }

    pub(crate) fn connection(&self) -> ConnectionManager {
        self.conn_manager.clone()
    }
}

pub(crate) fn transport_err(context: &str, e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Transport(format!("{context}: {e}"))
}
