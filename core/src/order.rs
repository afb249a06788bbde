//! The order aggregate.
//!
//! Orders are event-sourcing-flavoured without being event-sourced:
//! state transitions mutate the aggregate in place and push the matching
//! [`DomainEvent`] into a pending buffer, which the order store drains
//! into the transactional outbox in the same database transaction as the
//! state row. Illegal transitions fail instead of silently overwriting
//! state.

use crate::event::DomainEvent;
use crate::ids::{BuyerId, OrderId, ProductId, ReservationId, TransactionId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by order state transitions.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OrderError {
    /// The requested transition is not legal from the current status.
    #[error("Invalid order transition: {from} -> {attempted}")]
    InvalidTransition {
        /// Status the order was in.
        from: OrderStatus,
        /// Transition that was attempted.
        attempted: &'static str,
    },
}

/// Lifecycle state of an order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created; nothing debited or decremented yet.
    Placed,
    /// Payment debited from the buyer's wallet.
    Paid,
    /// Stock settled; the order is complete.
    Reserved,
    /// Rolled back after a failure; any debit was refunded.
    Cancelled,
    /// Timed out before completing.
    Expired,
}

impl OrderStatus {
    /// Returns the string stored in the database status column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Placed => "placed",
            Self::Paid => "paid",
            Self::Reserved => "reserved",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parses a database status string.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized input on failure.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "placed" => Ok(Self::Placed),
            "paid" => Ok(Self::Paid),
            "reserved" => Ok(Self::Reserved),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order for a quantity of one product by one buyer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,
    /// Buyer who placed the order.
    pub buyer_id: BuyerId,
    /// Product bought.
    pub product_id: ProductId,
    /// Units bought.
    pub quantity: u32,
    /// Total price, captured once at placement.
    pub total_price: Money,
    /// Lifecycle state.
    pub status: OrderStatus,
    /// Reservation the order was built from, when there was one.
    pub reservation_id: Option<ReservationId>,
    /// Wallet transaction that paid for the order, once debited.
    pub transaction_id: Option<TransactionId>,
    /// When the order was placed.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
    /// Events produced by transitions, drained by the order store.
    #[serde(skip)]
    pending_events: Vec<DomainEvent>,
}

impl Order {
    /// Places a new order. The total price is `unit_price * quantity`,
    /// computed here and never recomputed.
    #[must_use]
    pub fn place(
        buyer_id: BuyerId,
        product_id: ProductId,
        quantity: u32,
        unit_price: Money,
        now: DateTime<Utc>,
    ) -> Self {
        let id = OrderId::generate();
        let total_price = unit_price.times(quantity);
        let mut order = Self {
            id,
            buyer_id: buyer_id.clone(),
            product_id: product_id.clone(),
            quantity,
            total_price,
            status: OrderStatus::Placed,
            reservation_id: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
            pending_events: Vec::new(),
        };
        order.pending_events.push(DomainEvent::OrderPlaced {
            order_id: id,
            buyer_id,
            product_id,
            quantity,
            total_price,
            occurred_at: now,
        });
        order
    }

    /// Rehydrates an order from its persisted fields, with an empty
    /// event buffer. Used by stores mapping database rows back into the
    /// aggregate.
    #[must_use]
    #[allow(clippy::too_many_arguments)] // One parameter per persisted column
    pub const fn rehydrate(
        id: OrderId,
        buyer_id: BuyerId,
        product_id: ProductId,
        quantity: u32,
        total_price: Money,
        status: OrderStatus,
        reservation_id: Option<ReservationId>,
        transaction_id: Option<TransactionId>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            buyer_id,
            product_id,
            quantity,
            total_price,
            status,
            reservation_id,
            transaction_id,
            created_at,
            updated_at,
            pending_events: Vec::new(),
        }
    }

    /// Records a successful wallet debit.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] unless the order is
    /// `Placed`.
    pub fn settle_payment(
        &mut self,
        transaction_id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.status != OrderStatus::Placed {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                attempted: "settle_payment",
            });
        }
        self.status = OrderStatus::Paid;
        self.transaction_id = Some(transaction_id.clone());
        self.updated_at = now;
        self.pending_events.push(DomainEvent::PaymentSettled {
            order_id: self.id,
            transaction_id,
            amount: self.total_price,
            occurred_at: now,
        });
        Ok(())
    }

    /// Records a successful stock settlement, completing the order.
    ///
    /// `settlement_seq` is the ledger's per-product sequence for this
    /// decrement; `reservation_id` is present when the order consumed an
    /// existing hold rather than open stock.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] unless the order is
    /// `Paid`.
    pub fn confirm_reservation(
        &mut self,
        reservation_id: Option<ReservationId>,
        settlement_seq: u64,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.status != OrderStatus::Paid {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                attempted: "confirm_reservation",
            });
        }
        self.status = OrderStatus::Reserved;
        self.reservation_id = reservation_id;
        self.updated_at = now;
        self.pending_events.push(DomainEvent::OrderReserved {
            order_id: self.id,
            reservation_id,
            product_id: self.product_id.clone(),
            quantity: self.quantity,
            settlement_seq,
            occurred_at: now,
        });
        Ok(())
    }

    /// Cancels the order after a failure (compensation path).
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] if the order already
    /// reached a terminal state.
    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Placed | OrderStatus::Paid => {
                self.status = OrderStatus::Cancelled;
                self.updated_at = now;
                self.pending_events.push(DomainEvent::OrderExpired {
                    order_id: self.id,
                    reason: reason.to_string(),
                    occurred_at: now,
                });
                Ok(())
            }
            _ => Err(OrderError::InvalidTransition {
                from: self.status,
                attempted: "cancel",
            }),
        }
    }

    /// Expires the order after its window elapsed without completion.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] if the order already
    /// reached a terminal state.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Placed | OrderStatus::Paid => {
                self.status = OrderStatus::Expired;
                self.updated_at = now;
                self.pending_events.push(DomainEvent::OrderExpired {
                    order_id: self.id,
                    reason: "order window elapsed".to_string(),
                    occurred_at: now,
                });
                Ok(())
            }
            _ => Err(OrderError::InvalidTransition {
                from: self.status,
                attempted: "expire",
            }),
        }
    }

    /// Drains the events produced since the last drain.
    ///
    /// The order store calls this exactly once per save, inside the
    /// transaction that writes both the order row and the outbox rows.
    #[must_use]
    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Returns `true` once the order can no longer transition.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Reserved | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    fn place_order() -> Order {
        Order::place(
            BuyerId::new("buyer-1"),
            ProductId::new("sku-1"),
            2,
            Money::from_cents(1500),
            Utc::now(),
        )
    }

    #[test]
    fn placing_captures_total_price_and_emits_event() {
        let mut order = place_order();
        assert_eq!(order.status, OrderStatus::Placed);
        assert_eq!(order.total_price, Money::from_cents(3000));

        let events = order.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            DomainEvent::OrderPlaced { total_price, quantity: 2, .. }
                if *total_price == Money::from_cents(3000)
        ));
        // Drained: a second take yields nothing.
        assert!(order.take_events().is_empty());
    }

    #[test]
    fn happy_path_places_pays_then_reserves() {
        let mut order = place_order();
        let now = Utc::now();

        order.settle_payment(TransactionId::new("txn-1"), now).unwrap();
        assert_eq!(order.status, OrderStatus::Paid);

        order.confirm_reservation(None, 7, now).unwrap();
        assert_eq!(order.status, OrderStatus::Reserved);
        assert!(order.is_terminal());

        let events = order.take_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[2],
            DomainEvent::OrderReserved { settlement_seq: 7, .. }
        ));
    }

    #[test]
    fn cannot_reserve_before_payment() {
        let mut order = place_order();
        let err = order.confirm_reservation(None, 1, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            OrderError::InvalidTransition {
                from: OrderStatus::Placed,
                attempted: "confirm_reservation",
            }
        );
    }

    #[test]
    fn cancel_after_payment_is_allowed() {
        let mut order = place_order();
        let now = Utc::now();
        order.settle_payment(TransactionId::new("txn-1"), now).unwrap();
        order.cancel("stock settlement failed", now).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn terminal_orders_reject_further_transitions() {
        let mut order = place_order();
        let now = Utc::now();
        order.settle_payment(TransactionId::new("txn-1"), now).unwrap();
        order.confirm_reservation(None, 1, now).unwrap();

        assert!(order.cancel("too late", now).is_err());
        assert!(order.expire(now).is_err());
    }

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            OrderStatus::Placed,
            OrderStatus::Paid,
            OrderStatus::Reserved,
            OrderStatus::Cancelled,
            OrderStatus::Expired,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(OrderStatus::parse("bogus").is_err());
    }
}
