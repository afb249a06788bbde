//! Reservation coordinator on Redis Lua scripts.
//!
//! Every lifecycle operation couples the stock counter and the JSON
//! reservation record in one script, so "stock left the pool" and "a
//! record exists proving why" are a single indivisible step. Script
//! reply protocol: `{code, value}` with `0` success, `-1` stock key
//! absent, `-2` insufficient stock, `-3` no live reservation record.

use crate::{transport_err, RedisScriptStore};
use flashmart_core::ids::{OrderId, ProductId, ReservationId};
use flashmart_core::ledger::{LedgerError, ReservationCoordinator};
use flashmart_core::reservation::{reservation_key, Reservation};
use flashmart_core::stock::stock_key;
use redis::AsyncCommands;
use std::future::Future;
use std::pin::Pin;

const CODE_OK: i64 = 0;
const CODE_NOT_FOUND: i64 = -1;
const CODE_INSUFFICIENT: i64 = -2;
const CODE_NO_RESERVATION: i64 = -3;

/// Decrements stock and writes the reservation record with its TTL.
///
/// KEYS: stock key, reservation key. ARGV: quantity, record JSON,
/// TTL seconds.
const RESERVE_SCRIPT: &str = r#"
    local current = redis.call('GET', KEYS[1])
    if current == false then
        return {-1, 0}
    end
    current = tonumber(current)
    local qty = tonumber(ARGV[1])
    if current < qty then
        return {-2, current}
    end
    redis.call('DECRBY', KEYS[1], qty)
    redis.call('SET', KEYS[2], ARGV[2], 'EX', tonumber(ARGV[3]))
    return {0, current - qty}
"#;

/// Deletes a live record and restores its stock.
///
/// The status check keeps a consumed record from being released: the
/// record survives consumption (with its TTL) exactly so this script
/// can tell "consumed" apart from "never existed" without restoring
/// stock for either. The restored quantity is read from the record,
/// not from the caller.
///
/// KEYS: stock key, reservation key.
const RELEASE_SCRIPT: &str = r#"
    local raw = redis.call('GET', KEYS[2])
    if raw == false then
        return {-3, 0}
    end
    local record = cjson.decode(raw)
    if record['status'] ~= 'active' then
        return {-3, 0}
    end
    redis.call('DEL', KEYS[2])
    local newq = redis.call('INCRBY', KEYS[1], tonumber(record['quantity']))
    return {0, newq}
"#;

/// Rewrites a live record to consumed, keeping its TTL and the stock
/// deduction.
///
/// KEYS: reservation key. ARGV: order id.
const CONSUME_SCRIPT: &str = r#"
    local raw = redis.call('GET', KEYS[1])
    if raw == false then
        return {-3, 0}
    end
    local record = cjson.decode(raw)
    if record['status'] ~= 'active' then
        return {-3, 0}
    end
    record['status'] = 'consumed'
    record['order_id'] = ARGV[1]
    local ttl = redis.call('TTL', KEYS[1])
    if ttl <= 0 then
        ttl = 1
    end
    redis.call('SET', KEYS[1], cjson.encode(record), 'EX', ttl)
    return {0, 0}
"#;

fn decode_pair(reply: &[i64], context: &str) -> Result<(i64, i64), LedgerError> {
    match reply {
        [code, value] => Ok((*code, *value)),
        other => Err(LedgerError::Transport(format!(
            "{context}: unexpected script reply {other:?}"
        ))),
    }
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
const fn as_u32(value: i64) -> u32 {
    if value < 0 { 0 } else { value as u32 }
}

impl ReservationCoordinator for RedisScriptStore {
    fn reserve(
        &self,
        reservation: &Reservation,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let reservation = reservation.clone();
        Box::pin(async move {
            let record = serde_json::to_string(&reservation)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?;
            // Full lifetime of the hold; EX 0 would be rejected.
            let ttl_secs = (reservation.expires_at - reservation.created_at)
                .num_seconds()
                .max(1);

            let reply: Vec<i64> = redis::Script::new(RESERVE_SCRIPT)
                .key(stock_key(&reservation.product_id))
                .key(reservation.cache_key())
                .arg(reservation.quantity)
                .arg(record)
                .arg(ttl_secs)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| transport_err("Failed to execute reserve", e))?;

            let (code, value) = decode_pair(&reply, "reserve")?;
            match code {
                CODE_OK => {
                    tracing::info!(
                        reservation_id = %reservation.id,
                        product_id = %reservation.product_id,
                        quantity = reservation.quantity,
                        new_quantity = value,
                        "Reservation taken"
                    );
                    Ok(as_u32(value))
                }
                CODE_NOT_FOUND => Err(LedgerError::NotFound(reservation.product_id)),
                CODE_INSUFFICIENT => Err(LedgerError::OutOfStock {
                    product_id: reservation.product_id,
                    requested: reservation.quantity,
                    available: as_u32(value),
                }),
                other => Err(LedgerError::Transport(format!(
                    "reserve: unknown script code {other}"
                ))),
            }
        })
    }

    fn release(
        &self,
        product_id: &ProductId,
        reservation_id: &ReservationId,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let product_id = product_id.clone();
        let reservation_id = *reservation_id;
        Box::pin(async move {
            let reply: Vec<i64> = redis::Script::new(RELEASE_SCRIPT)
                .key(stock_key(&product_id))
                .key(reservation_key(&reservation_id))
                .invoke_async(&mut conn)
                .await
                .map_err(|e| transport_err("Failed to execute release", e))?;

            let (code, value) = decode_pair(&reply, "release")?;
            match code {
                CODE_OK => {
                    tracing::info!(
                        reservation_id = %reservation_id,
                        product_id = %product_id,
                        new_quantity = value,
                        "Reservation released"
                    );
                    Ok(as_u32(value))
                }
                CODE_NO_RESERVATION => {
                    Err(LedgerError::ReservationNotFound(reservation_id))
                }
                other => Err(LedgerError::Transport(format!(
                    "release: unknown script code {other}"
                ))),
            }
        })
    }

    fn consume(
        &self,
        reservation_id: &ReservationId,
        order_id: &OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let reservation_id = *reservation_id;
        let order_id = *order_id;
        Box::pin(async move {
            let reply: Vec<i64> = redis::Script::new(CONSUME_SCRIPT)
                .key(reservation_key(&reservation_id))
                .arg(order_id.to_string())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| transport_err("Failed to execute consume", e))?;

            let (code, _) = decode_pair(&reply, "consume")?;
            match code {
                CODE_OK => {
                    tracing::info!(
                        reservation_id = %reservation_id,
                        order_id = %order_id,
                        "Reservation consumed"
                    );
                    Ok(())
                }
                CODE_NO_RESERVATION => {
                    Err(LedgerError::ReservationNotFound(reservation_id))
                }
                other => Err(LedgerError::Transport(format!(
                    "consume: unknown script code {other}"
                ))),
            }
        })
    }

    fn restore(
        &self,
        reservation: &Reservation,
        ttl_secs: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let reservation = reservation.clone();
        Box::pin(async move {
            let record = serde_json::to_string(&reservation)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?;
            let _: () = conn
                .set_ex(
                    reservation.cache_key(),
                    record,
                    ttl_secs.max(1).unsigned_abs(),
                )
                .await
                .map_err(|e| transport_err("Failed to restore reservation record", e))?;
            tracing::debug!(
                reservation_id = %reservation.id,
                ttl_secs,
                "Reservation record restored"
            );
            Ok(())
        })
    }

    fn get_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Reservation>, LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let reservation_id = *reservation_id;
        Box::pin(async move {
            let raw: Option<String> = conn
                .get(reservation_key(&reservation_id))
                .await
                .map_err(|e| transport_err("Failed to read reservation record", e))?;
            match raw {
                None => Ok(None),
                Some(json) => serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| LedgerError::Serialization(e.to_string())),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use chrono::Utc;
    use flashmart_core::ids::BuyerId;
    use flashmart_core::ledger::StockLedger;
    use flashmart_core::reservation::ReservationStatus;

    async fn store() -> RedisScriptStore {
        RedisScriptStore::connect("redis://127.0.0.1:6379")
            .await
            .unwrap()
    }

    fn unique_product() -> ProductId {
        ProductId::new(format!("test-coord-{}", uuid::Uuid::new_v4()))
    }

    fn reservation_for(product: &ProductId, quantity: u32) -> Reservation {
        Reservation::new(
            product.clone(),
            BuyerId::new("buyer-1"),
            quantity,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn reserve_couples_decrement_and_record() {
        let store = store().await;
        let product = unique_product();
        store.set_stock(&product, 5).await.unwrap();

        let reservation = reservation_for(&product, 2);
        let remaining = store.reserve(&reservation).await.unwrap();
        assert_eq!(remaining, 3);

        let loaded = store.get_reservation(&reservation.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ReservationStatus::Active);
        assert_eq!(loaded.quantity, 2);

        store.remove_all(&product).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn release_is_exactly_once() {
        let store = store().await;
        let product = unique_product();
        store.set_stock(&product, 5).await.unwrap();

        let reservation = reservation_for(&product, 2);
        store.reserve(&reservation).await.unwrap();

        let restored = store
            .release(&product, &reservation.id)
            .await
            .unwrap();
        assert_eq!(restored, 5);

        // Second release finds no record and must not touch stock.
        let err = store
            .release(&product, &reservation.id)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::ReservationNotFound(reservation.id));
        assert_eq!(store.get_stock(&product).await.unwrap(), 5);

        store.remove_all(&product).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn consume_keeps_deduction_and_blocks_release() {
        let store = store().await;
        let product = unique_product();
        store.set_stock(&product, 5).await.unwrap();

        let reservation = reservation_for(&product, 2);
        store.reserve(&reservation).await.unwrap();

        let order_id = OrderId::generate();
        store.consume(&reservation.id, &order_id).await.unwrap();

        // Stock stays deducted and the record now carries the order id.
        assert_eq!(store.get_stock(&product).await.unwrap(), 3);
        let loaded = store.get_reservation(&reservation.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ReservationStatus::Consumed);
        assert_eq!(loaded.order_id, Some(order_id));

        // A late release must fail instead of double-restoring.
        let err = store
            .release(&product, &reservation.id)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::ReservationNotFound(reservation.id));
        assert_eq!(store.get_stock(&product).await.unwrap(), 3);

        store.remove_all(&product).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn insufficient_stock_leaves_no_record() {
        let store = store().await;
        let product = unique_product();
        store.set_stock(&product, 1).await.unwrap();

        let reservation = reservation_for(&product, 2);
        let err = store.reserve(&reservation).await.unwrap_err();
        assert!(matches!(err, LedgerError::OutOfStock { available: 1, .. }));
        assert!(store.get_reservation(&reservation.id).await.unwrap().is_none());

        store.remove_all(&product).await.unwrap();
    }
}
