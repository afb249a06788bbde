//! Order persistence with transactional outbox enqueueing.

use chrono::{DateTime, Utc};
use flashmart_core::event::DomainEvent;
use flashmart_core::ids::{BuyerId, OrderId, ProductId, ReservationId, TransactionId};
use flashmart_core::money::Money;
use flashmart_core::order::{Order, OrderStatus};
use flashmart_core::store::{OrderStore, OrderStoreError};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// `PostgreSQL`-backed order store.
///
/// The whole point of this type is the transaction in `save`: the order
/// row and one outbox row per buffered event commit together or not at
/// all, which removes the dual-write hazard of "persist aggregate, then
/// publish event" where a crash between the two silently drops the
/// event.
///
/// # Example
///
/// ```no_run
/// use flashmart_postgres::PgOrderStore;
/// use flashmart_core::store::OrderStore;
/// use flashmart_core::ids::{BuyerId, ProductId};
/// use flashmart_core::money::Money;
/// use flashmart_core::order::Order;
/// use chrono::Utc;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let store = PgOrderStore::new(pool);
/// let mut order = Order::place(
///     BuyerId::new("buyer-1"),
///     ProductId::new("sku-1"),
///     2,
///     Money::from_cents(1500),
///     Utc::now(),
/// );
/// let events = order.take_events();
/// store.save(order, events).await?;
/// # Ok(())
/// # }
/// ```
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Creates an order store on the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order, OrderStoreError> {
        let db = |e: sqlx::Error| OrderStoreError::Database(e.to_string());

        let id: Uuid = row.try_get("id").map_err(db)?;
        let buyer_id: String = row.try_get("buyer_id").map_err(db)?;
        let product_id: String = row.try_get("product_id").map_err(db)?;
        let quantity: i32 = row.try_get("quantity").map_err(db)?;
        let total_price_cents: i64 = row.try_get("total_price_cents").map_err(db)?;
        let status: String = row.try_get("status").map_err(db)?;
        let reservation_id: Option<Uuid> = row.try_get("reservation_id").map_err(db)?;
        let transaction_id: Option<String> = row.try_get("transaction_id").map_err(db)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(db)?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(db)?;

        let status = OrderStatus::parse(&status).map_err(OrderStoreError::Serialization)?;

        #[allow(clippy::cast_sign_loss)] // Quantity column is constrained positive
        Ok(Order::rehydrate(
            OrderId::from_uuid(id),
            BuyerId::new(buyer_id),
            ProductId::new(product_id),
            quantity as u32,
            Money::from_cents(total_price_cents),
            status,
            reservation_id.map(ReservationId::from_uuid),
            transaction_id.map(TransactionId::new),
            created_at,
            updated_at,
        ))
    }
}

impl OrderStore for PgOrderStore {
    fn save(
        &self,
        order: Order,
        events: Vec<DomainEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OrderStoreError>> + Send + '_>> {
        Box::pin(async move {
            let db = |e: sqlx::Error| OrderStoreError::Database(e.to_string());

            let mut tx = self.pool.begin().await.map_err(db)?;

            #[allow(clippy::cast_possible_wrap)] // Quantity is capped well below i32::MAX
            sqlx::query(
                r"
                INSERT INTO orders (
                    id, buyer_id, product_id, quantity, total_price_cents,
                    status, reservation_id, transaction_id, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE SET
                    status = EXCLUDED.status,
                    reservation_id = EXCLUDED.reservation_id,
                    transaction_id = EXCLUDED.transaction_id,
                    updated_at = EXCLUDED.updated_at
                ",
            )
            .bind(order.id.as_uuid())
            .bind(order.buyer_id.as_str())
            .bind(order.product_id.as_str())
            .bind(order.quantity as i32)
            .bind(order.total_price.cents())
            .bind(order.status.as_str())
            .bind(order.reservation_id.map(|r| r.as_uuid()))
            .bind(order.transaction_id.as_ref().map(TransactionId::as_str))
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

            for event in &events {
                let payload = serde_json::to_value(event)
                    .map_err(|e| OrderStoreError::Serialization(e.to_string()))?;
                sqlx::query(
                    r"
                    INSERT INTO outbox (
                        aggregate_type, aggregate_id, event_type,
                        payload, occurred_at, status
                    ) VALUES ('order', $1, $2, $3, $4, 'pending')
                    ",
                )
                .bind(event.aggregate_id())
                .bind(event.event_type())
                .bind(payload)
                .bind(event.occurred_at())
                .execute(&mut *tx)
                .await
                .map_err(db)?;
            }

            tx.commit().await.map_err(db)?;

            tracing::info!(
                order_id = %order.id,
                status = %order.status,
                events = events.len(),
                "Order saved with outbox rows"
            );
            metrics::counter!("orders.saved").increment(1);
            Ok(())
        })
    }

    fn load(
        &self,
        order_id: &OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<Order, OrderStoreError>> + Send + '_>> {
        let order_id = *order_id;
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, buyer_id, product_id, quantity, total_price_cents,
                       status, reservation_id, transaction_id, created_at, updated_at
                FROM orders
                WHERE id = $1
                ",
            )
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| OrderStoreError::Database(e.to_string()))?;

            match row {
                Some(row) => Self::row_to_order(&row),
                None => Err(OrderStoreError::NotFound(order_id)),
            }
        })
    }
}
