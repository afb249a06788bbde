//! Trait seam for outbox-backed order persistence.

use crate::event::DomainEvent;
use crate::ids::OrderId;
use crate::order::Order;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by the order store.
#[derive(Error, Debug)]
pub enum OrderStoreError {
    /// No order row exists for the id.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// An event payload could not be encoded for the outbox.
    #[error("Order store serialization error: {0}")]
    Serialization(String),

    /// The database query failed.
    #[error("Order store database error: {0}")]
    Database(String),
}

/// Transactional persistence for orders and their outbox rows.
///
/// `save` writes the order row and one outbox row per event in a single
/// database transaction. Either everything commits or nothing does;
/// there is no window where the state changed but the events are
/// missing. A separate relay drains the outbox onto the event log.
pub trait OrderStore: Send + Sync {
    /// Upserts the order and enqueues `events` in one transaction.
    ///
    /// Takes the order by value: the caller drains pending events with
    /// [`Order::take_events`] first and hands both over together.
    ///
    /// # Errors
    ///
    /// [`OrderStoreError::Database`] on query failure; nothing is
    /// persisted in that case.
    fn save(
        &self,
        order: Order,
        events: Vec<DomainEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OrderStoreError>> + Send + '_>>;

    /// Loads an order by id.
    ///
    /// # Errors
    ///
    /// [`OrderStoreError::NotFound`] when no row exists.
    fn load(
        &self,
        order_id: &OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<Order, OrderStoreError>> + Send + '_>>;
}
