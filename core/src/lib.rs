//! # Flashmart Core
//!
//! Domain model and trait seams for a high-concurrency marketplace backend
//! where many buyers compete for limited inventory.
//!
//! This crate carries no I/O of its own. It defines:
//!
//! - The domain model: products, stock, reservations, the order aggregate
//!   and its domain events ([`order`], [`stock`], [`reservation`], [`event`])
//! - The trait seams that infrastructure crates implement:
//!   - [`ledger::StockLedger`] / [`ledger::ReservationCoordinator`] —
//!     atomic stock mutation (implemented on Redis Lua scripts in
//!     `flashmart-redis`)
//!   - [`wallet::Wallet`] — the external payment collaborator
//!   - [`publisher::EventPublisher`] / [`log::EventLog`] — the durable
//!     event log (implemented on rdkafka in `flashmart-redpanda`)
//!   - [`store::OrderStore`] — outbox-backed order persistence
//!     (implemented on sqlx/Postgres in `flashmart-postgres`)
//!   - [`recovery::RecoveryCache`] / [`recovery::ReservationArchive`] —
//!     the cache rebuild seams used by `flashmart-recovery`
//! - Boundary validation and the transport status classification
//!   ([`validation`], [`error::ErrorCode`])
//!
//! # Concurrency model
//!
//! There is no in-process locking around stock. Correctness under
//! arbitrary concurrent callers is delegated to the script store: every
//! mutating ledger/coordinator operation is one server-side script
//! invocation, and scripts execute single-threaded inside the store.
//! The traits here only promise that each call is a single atomic step.
//!
//! # Dyn Compatibility
//!
//! Trait methods return explicit `Pin<Box<dyn Future>>` instead of
//! `async fn` so providers can live behind `Arc<dyn StockLedger>` and
//! friends inside environment structs, and so spawned tasks can rely on
//! `Send` futures.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod event;
pub mod ids;
pub mod ledger;
pub mod log;
pub mod money;
pub mod order;
pub mod publisher;
pub mod recovery;
pub mod reservation;
pub mod stock;
pub mod store;
pub mod validation;
pub mod wallet;

pub use clock::{Clock, SystemClock};
pub use error::ErrorCode;
pub use event::{DomainEvent, EventEnvelope, SnapshotPayload};
pub use ids::{BuyerId, OrderId, ProductId, ReservationId, TransactionId};
pub use money::Money;
pub use order::{Order, OrderStatus};
pub use reservation::{MAX_RESERVATION_QUANTITY, Reservation, ReservationStatus};
