//! Durable reservation archive.
//!
//! The cache holds the live, TTL'd copy of every reservation; this
//! table holds the durable copy that survives a cache wipe. The
//! recovery engine reads back whatever was still live and
//! re-materializes it (see `flashmart-recovery`).

use chrono::{DateTime, Utc};
use flashmart_core::ids::{BuyerId, OrderId, ProductId, ReservationId};
use flashmart_core::ledger::LedgerError;
use flashmart_core::recovery::ReservationArchive;
use flashmart_core::reservation::{Reservation, ReservationStatus};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// `PostgreSQL`-backed reservation archive.
pub struct PgReservationArchive {
    pool: PgPool,
}

impl PgReservationArchive {
    /// Creates an archive on the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_reservation(row: &sqlx::postgres::PgRow) -> Result<Reservation, LedgerError> {
        let db = |e: sqlx::Error| LedgerError::Transport(e.to_string());

        let id: Uuid = row.try_get("id").map_err(db)?;
        let product_id: String = row.try_get("product_id").map_err(db)?;
        let buyer_id: String = row.try_get("buyer_id").map_err(db)?;
        let quantity: i32 = row.try_get("quantity").map_err(db)?;
        let status: String = row.try_get("status").map_err(db)?;
        let order_id: Option<Uuid> = row.try_get("order_id").map_err(db)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(db)?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(db)?;

        let status = match status.as_str() {
            "active" => ReservationStatus::Active,
            "consumed" => ReservationStatus::Consumed,
            "released" => ReservationStatus::Released,
            "expired" => ReservationStatus::Expired,
            other => {
                return Err(LedgerError::Serialization(format!(
                    "unknown reservation status: {other}"
                )));
            }
        };

        #[allow(clippy::cast_sign_loss)] // Quantity column is constrained positive
        Ok(Reservation {
            id: ReservationId::from_uuid(id),
            product_id: ProductId::new(product_id),
            buyer_id: BuyerId::new(buyer_id),
            quantity: quantity as u32,
            status,
            order_id: order_id.map(OrderId::from_uuid),
            created_at,
            expires_at,
        })
    }
}

impl ReservationArchive for PgReservationArchive {
    fn record(
        &self,
        reservation: &Reservation,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let reservation = reservation.clone();
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Quantity is capped well below i32::MAX
            sqlx::query(
                r"
                INSERT INTO reservations (
                    id, product_id, buyer_id, quantity, status,
                    order_id, created_at, expires_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO UPDATE SET
                    status = EXCLUDED.status,
                    order_id = EXCLUDED.order_id
                ",
            )
            .bind(reservation.id.as_uuid())
            .bind(reservation.product_id.as_str())
            .bind(reservation.buyer_id.as_str())
            .bind(reservation.quantity as i32)
            .bind(reservation.status.as_str())
            .bind(reservation.order_id.map(|o| o.as_uuid()))
            .bind(reservation.created_at)
            .bind(reservation.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                LedgerError::Transport(format!("Failed to record reservation: {e}"))
            })?;
            Ok(())
        })
    }

    fn update_status(
        &self,
        reservation_id: &ReservationId,
        status: ReservationStatus,
        order_id: Option<OrderId>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let reservation_id = *reservation_id;
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE reservations
                SET status = $2, order_id = COALESCE($3, order_id)
                WHERE id = $1
                ",
            )
            .bind(reservation_id.as_uuid())
            .bind(status.as_str())
            .bind(order_id.map(|o| o.as_uuid()))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                LedgerError::Transport(format!("Failed to update reservation status: {e}"))
            })?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::ReservationNotFound(reservation_id));
            }
            Ok(())
        })
    }

    fn load_live_reservations(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Reservation>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, product_id, buyer_id, quantity, status,
                       order_id, created_at, expires_at
                FROM reservations
                WHERE status = 'active' AND expires_at > NOW()
                ORDER BY created_at ASC
                ",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                LedgerError::Transport(format!("Failed to load live reservations: {e}"))
            })?;

            let reservations: Result<Vec<_>, _> =
                rows.iter().map(Self::row_to_reservation).collect();
            let reservations = reservations?;

            tracing::info!(
                live = reservations.len(),
                "Live reservations loaded from archive"
            );
            Ok(reservations)
        })
    }
}
