//! # Flashmart Saga
//!
//! Multi-store coordination for order placement, with compensation.
//!
//! The central workflow is [`place_order::OrderPlacementSaga`]:
//!
//! ```text
//! PriceLookup ─► StockCheck ─► PaymentDebit ─► StockDecrement ─► [async] EventPublish
//!                                   │                │
//!                                   │                └─ failure: refund the debit;
//!                                   │                   nothing is persisted
//!                                   └─ failure: nothing to unwind
//! ```
//!
//! The ordering is deliberate: payment failure is the common failure
//! mode and must happen before any stock mutation, so the only step
//! that ever needs unwinding is the stock decrement, and its
//! compensation is a single idempotent refund.
//!
//! [`reservations::ReservationService`] is the boundary surface for the
//! hold lifecycle: validated reserve / release / finalize-into-order.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod place_order;
pub mod reservations;

pub use place_order::{
    OrderPlacementSaga, PlaceOrderError, PlaceOrderReceipt, SagaEnvironment, SagaState,
};
pub use reservations::{ReservationService, ReserveError};
