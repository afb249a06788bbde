//! `PostgreSQL` persistence for the Flashmart marketplace core.
//!
//! This crate implements the durable side of the system on sqlx:
//!
//! - [`orders::PgOrderStore`] — the [`OrderStore`] seam: the order row
//!   and its outbox rows commit in one transaction
//! - [`outbox`] — the outbox table contract (`fetch_pending`,
//!   `mark_as_published`) behind the [`outbox::OutboxStore`] trait
//! - [`relay::OutboxRelay`] — the polling loop that drains pending
//!   outbox rows onto the event log
//! - [`reservations::PgReservationArchive`] — the durable reservation
//!   copy that outlives the cache, read back during recovery
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE orders (
//!     id               UUID PRIMARY KEY,
//!     buyer_id         TEXT NOT NULL,
//!     product_id       TEXT NOT NULL,
//!     quantity         INTEGER NOT NULL,
//!     total_price_cents BIGINT NOT NULL,
//!     status           TEXT NOT NULL,
//!     reservation_id   UUID,
//!     transaction_id   TEXT,
//!     created_at       TIMESTAMPTZ NOT NULL,
//!     updated_at       TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE outbox (
//!     id             BIGSERIAL PRIMARY KEY,
//!     aggregate_type TEXT NOT NULL,
//!     aggregate_id   TEXT NOT NULL,
//!     event_type     TEXT NOT NULL,
//!     payload        JSONB NOT NULL,
//!     occurred_at    TIMESTAMPTZ NOT NULL,
//!     status         TEXT NOT NULL DEFAULT 'pending',
//!     published_at   TIMESTAMPTZ
//! );
//! CREATE INDEX outbox_pending_idx ON outbox (id) WHERE status = 'pending';
//!
//! CREATE TABLE reservations (
//!     id         UUID PRIMARY KEY,
//!     product_id TEXT NOT NULL,
//!     buyer_id   TEXT NOT NULL,
//!     quantity   INTEGER NOT NULL,
//!     status     TEXT NOT NULL,
//!     order_id   UUID,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     expires_at TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX reservations_live_idx ON reservations (expires_at)
//!     WHERE status = 'active';
//! ```
//!
//! [`OrderStore`]: flashmart_core::store::OrderStore

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod orders;
pub mod outbox;
pub mod relay;
pub mod reservations;

pub use orders::PgOrderStore;
pub use outbox::{OutboxEntry, OutboxError, OutboxStatus, OutboxStore, PgOutboxStore};
pub use relay::{OutboxRelay, RelayConfig};
pub use reservations::PgReservationArchive;
