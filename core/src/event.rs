//! Domain events and the wire envelope for the durable event log.
//!
//! Every message on the log is an [`EventEnvelope`] wrapping one of the
//! closed set of [`DomainEvent`] shapes. Envelopes are JSON on the wire:
//! the log doubles as the system of record for cache recovery, and a
//! human-inspectable format has paid for itself every time someone had
//! to read a partition during an incident.
//!
//! # Delivery semantics
//!
//! At-least-once. Consumers commit offsets only after successful local
//! application and must be idempotent; nothing in this module attempts
//! to deduplicate.
//!
//! # Snapshot events
//!
//! [`DomainEvent::ProductSnapshot`] is appended periodically and carries
//! the full active product set plus a **per-partition** offset map — the
//! consistent cut a multi-partition log needs. A single global offset
//! cannot describe such a cut; see `flashmart-recovery` for how the map
//! is used during replay.

use crate::ids::{BuyerId, OrderId, ProductId, ReservationId, TransactionId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Wire format version carried in every envelope.
pub const ENVELOPE_VERSION: u16 = 1;

/// Errors raised while encoding or decoding envelopes.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Failed to serialize an envelope to JSON.
    #[error("Failed to serialize envelope: {0}")]
    Serialization(String),

    /// Failed to deserialize an envelope from JSON.
    #[error("Failed to deserialize envelope: {0}")]
    Deserialization(String),
}

/// Payload of a periodic `product.snapshot` event.
///
/// Carries everything the recovery engine needs to rebuild the cache
/// without replaying the whole log: the complete active product set at
/// snapshot time, and for each partition the last offset whose effects
/// are already included in that set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    /// All products active at the moment the snapshot was taken.
    pub active_products: Vec<ProductId>,
    /// `partition -> last offset included in this snapshot`.
    ///
    /// Replay for partition `p` starts at `partition_offsets[p] + 1`.
    /// A partition missing from the map means the snapshot never saw it
    /// (for example, the partition count grew after the snapshot) and
    /// replay falls back to that partition's first offset.
    pub partition_offsets: BTreeMap<i32, i64>,
    /// When the snapshot was taken. The recovery engine picks the
    /// snapshot with the most recent value across all partitions.
    pub occurred_at: DateTime<Utc>,
}

/// The closed set of domain event shapes carried on the event log.
///
/// Tag strings are the stable wire names; variants must never be
/// renamed without a versioned migration of consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// An order was created (price captured, nothing debited yet).
    #[serde(rename = "order.placed")]
    OrderPlaced {
        /// Order identifier.
        order_id: OrderId,
        /// Buyer who placed the order.
        buyer_id: BuyerId,
        /// Product being bought.
        product_id: ProductId,
        /// Units requested.
        quantity: u32,
        /// Total price, computed once at creation.
        total_price: Money,
        /// When the order was placed.
        occurred_at: DateTime<Utc>,
    },

    /// Stock was settled for an order: payment debited and the ledger
    /// decremented. Carries the ledger's settlement sequence for
    /// ordering downstream consumers.
    #[serde(rename = "order.reserved")]
    OrderReserved {
        /// Order identifier.
        order_id: OrderId,
        /// Reservation backing the order, when one exists.
        reservation_id: Option<ReservationId>,
        /// Product bought.
        product_id: ProductId,
        /// Units settled.
        quantity: u32,
        /// Monotonic per-product settlement sequence from the ledger.
        settlement_seq: u64,
        /// When the settlement happened.
        occurred_at: DateTime<Utc>,
    },

    /// An order expired before payment was finalized.
    #[serde(rename = "order.expired")]
    OrderExpired {
        /// Order identifier.
        order_id: OrderId,
        /// Why the order expired.
        reason: String,
        /// When the expiry was recorded.
        occurred_at: DateTime<Utc>,
    },

    /// Payment for an order settled.
    #[serde(rename = "order.payment_settled")]
    PaymentSettled {
        /// Order identifier.
        order_id: OrderId,
        /// Wallet transaction that settled the payment.
        transaction_id: TransactionId,
        /// Amount debited.
        amount: Money,
        /// When payment settled.
        occurred_at: DateTime<Utc>,
    },

    /// Funds were added to a buyer's wallet.
    #[serde(rename = "wallet.fund_added")]
    FundAdded {
        /// Wallet owner.
        user_id: BuyerId,
        /// Amount added.
        amount: Money,
        /// When the funds landed.
        occurred_at: DateTime<Utc>,
    },

    /// Stock for a product was (re)set to an absolute quantity.
    #[serde(rename = "stock.set")]
    StockSet {
        /// Product identifier.
        product_id: ProductId,
        /// New absolute quantity.
        quantity: u32,
        /// When the stock was set.
        occurred_at: DateTime<Utc>,
    },

    /// A product became active (sellable). Incremental recovery event.
    #[serde(rename = "product.activated")]
    ProductActivated {
        /// Product identifier.
        product_id: ProductId,
        /// When the product was activated.
        occurred_at: DateTime<Utc>,
    },

    /// A product became inactive (hidden, sold out and closed, ...).
    /// Incremental recovery event.
    #[serde(rename = "product.deactivated")]
    ProductDeactivated {
        /// Product identifier.
        product_id: ProductId,
        /// When the product was deactivated.
        occurred_at: DateTime<Utc>,
    },

    /// A product was removed from the catalog. Incremental recovery
    /// event.
    #[serde(rename = "product.removed")]
    ProductRemoved {
        /// Product identifier.
        product_id: ProductId,
        /// When the product was removed.
        occurred_at: DateTime<Utc>,
    },

    /// Periodic full snapshot of the active product set, with the
    /// per-partition offsets it covers. Only the recovery engine reads
    /// these; regular consumers skip them.
    #[serde(rename = "product.snapshot")]
    ProductSnapshot(SnapshotPayload),
}

impl DomainEvent {
    /// Returns the stable wire name of this event.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::OrderPlaced { .. } => "order.placed",
            Self::OrderReserved { .. } => "order.reserved",
            Self::OrderExpired { .. } => "order.expired",
            Self::PaymentSettled { .. } => "order.payment_settled",
            Self::FundAdded { .. } => "wallet.fund_added",
            Self::StockSet { .. } => "stock.set",
            Self::ProductActivated { .. } => "product.activated",
            Self::ProductDeactivated { .. } => "product.deactivated",
            Self::ProductRemoved { .. } => "product.removed",
            Self::ProductSnapshot(_) => "product.snapshot",
        }
    }

    /// Returns the id of the aggregate this event belongs to.
    ///
    /// Used as the partitioning key on the log so that events for one
    /// aggregate land in one partition, in order.
    #[must_use]
    pub fn aggregate_id(&self) -> String {
        match self {
            Self::OrderPlaced { order_id, .. }
            | Self::OrderReserved { order_id, .. }
            | Self::OrderExpired { order_id, .. }
            | Self::PaymentSettled { order_id, .. } => order_id.to_string(),
            Self::FundAdded { user_id, .. } => user_id.to_string(),
            Self::StockSet { product_id, .. }
            | Self::ProductActivated { product_id, .. }
            | Self::ProductDeactivated { product_id, .. }
            | Self::ProductRemoved { product_id, .. } => product_id.to_string(),
            Self::ProductSnapshot(_) => "product.snapshot".to_string(),
        }
    }

    /// When the event occurred.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::OrderPlaced { occurred_at, .. }
            | Self::OrderReserved { occurred_at, .. }
            | Self::OrderExpired { occurred_at, .. }
            | Self::PaymentSettled { occurred_at, .. }
            | Self::FundAdded { occurred_at, .. }
            | Self::StockSet { occurred_at, .. }
            | Self::ProductActivated { occurred_at, .. }
            | Self::ProductDeactivated { occurred_at, .. }
            | Self::ProductRemoved { occurred_at, .. } => *occurred_at,
            Self::ProductSnapshot(payload) => payload.occurred_at,
        }
    }

    /// Returns `true` for the periodic snapshot event.
    #[must_use]
    pub const fn is_snapshot(&self) -> bool {
        matches!(self, Self::ProductSnapshot(_))
    }
}

/// Wire envelope for every message on the event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique message id, assigned at publish time.
    pub message_id: Uuid,
    /// Copy of the event's wire name, for routing without decoding.
    pub message_type: String,
    /// When the envelope was handed to the publisher.
    pub sent_at: DateTime<Utc>,
    /// Envelope schema version ([`ENVELOPE_VERSION`]).
    pub version: u16,
    /// The domain event itself.
    pub event: DomainEvent,
}

impl EventEnvelope {
    /// Wraps a domain event for publication.
    #[must_use]
    pub fn new(event: DomainEvent, sent_at: DateTime<Utc>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            message_type: event.event_type().to_string(),
            sent_at,
            version: ENVELOPE_VERSION,
            event,
        }
    }

    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Serialization(e.to_string()))
    }

    /// Deserializes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Deserialization`] if the bytes are not a
    /// valid envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let event = DomainEvent::StockSet {
            product_id: ProductId::new("sku-1"),
            quantity: 100,
            occurred_at: Utc::now(),
        };
        let envelope = EventEnvelope::new(event, Utc::now());

        let bytes = envelope.to_bytes().unwrap();
        let decoded = EventEnvelope::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.message_type, "stock.set");
        assert_eq!(decoded.version, ENVELOPE_VERSION);
    }

    #[test]
    fn event_wire_names_are_stable() {
        let event = DomainEvent::ProductActivated {
            product_id: ProductId::new("sku-1"),
            occurred_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "product.activated");
    }

    #[test]
    fn snapshot_offsets_survive_json() {
        let mut offsets = BTreeMap::new();
        offsets.insert(0, 50);
        offsets.insert(1, 30);
        let event = DomainEvent::ProductSnapshot(SnapshotPayload {
            active_products: vec![ProductId::new("a"), ProductId::new("b")],
            partition_offsets: offsets.clone(),
            occurred_at: Utc::now(),
        });

        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded: DomainEvent = serde_json::from_slice(&bytes).unwrap();
        match decoded {
            DomainEvent::ProductSnapshot(payload) => {
                assert_eq!(payload.partition_offsets, offsets);
                assert_eq!(payload.active_products.len(), 2);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn aggregate_id_partitions_by_owner() {
        let event = DomainEvent::FundAdded {
            user_id: BuyerId::new("buyer-7"),
            amount: Money::from_cents(500),
            occurred_at: Utc::now(),
        };
        assert_eq!(event.aggregate_id(), "buyer-7");
    }
}
