//! Atomic stock ledger on Redis Lua scripts.
//!
//! Both mutating scripts follow the same protocol: they return a
//! two-element array `{code, value}` where `code` is `0` on success,
//! `-1` when the stock key is absent and `-2` when fewer units remain
//! than requested (with the available count in `value`). The decrement
//! script also `INCR`s the per-product sequence key in the same atomic
//! step, so the sequence it returns orders settlements for that
//! product.

use crate::{transport_err, RedisScriptStore};
use flashmart_core::ids::ProductId;
use flashmart_core::ledger::{LedgerError, StockLedger};
use flashmart_core::money::Money;
use flashmart_core::stock::{price_key, sequence_key, stock_key};
use redis::AsyncCommands;
use std::future::Future;
use std::pin::Pin;

const CODE_OK: i64 = 0;
const CODE_NOT_FOUND: i64 = -1;
const CODE_INSUFFICIENT: i64 = -2;

/// Decrements stock if enough remains, bumping the settlement sequence.
///
/// KEYS: stock key, sequence key. ARGV: quantity.
const DECREASE_SCRIPT: &str = r#"
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
    local seq = redis.call('INCR', KEYS[2])
    return {0, seq}
"#;

/// Adds units back to an existing stock key.
///
/// KEYS: stock key. ARGV: quantity.
const RESTORE_SCRIPT: &str = r#"
    local current = redis.call('GET', KEYS[1])
    if current == false then
        return {-1, 0}
    end
    local newq = redis.call('INCRBY', KEYS[1], tonumber(ARGV[1]))
    return {0, newq}
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

impl StockLedger for RedisScriptStore {
    fn decrease_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u64, LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let product_id = product_id.clone();
        Box::pin(async move {
            let reply: Vec<i64> = redis::Script::new(DECREASE_SCRIPT)
                .key(stock_key(&product_id))
                .key(sequence_key(&product_id))
                .arg(quantity)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| transport_err("Failed to execute stock decrement", e))?;

            let (code, value) = decode_pair(&reply, "decrease_stock")?;
            match code {
                CODE_OK => {
                    let seq = value.unsigned_abs();
                    tracing::debug!(
                        product_id = %product_id,
                        quantity,
                        settlement_seq = seq,
                        "Stock decremented"
                    );
                    Ok(seq)
                }
                CODE_NOT_FOUND => Err(LedgerError::NotFound(product_id)),
                CODE_INSUFFICIENT => Err(LedgerError::OutOfStock {
                    product_id,
                    requested: quantity,
                    available: as_u32(value),
                }),
                other => Err(LedgerError::Transport(format!(
                    "decrease_stock: unknown script code {other}"
                ))),
            }
        })
    }

    fn restore_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let product_id = product_id.clone();
        Box::pin(async move {
            let reply: Vec<i64> = redis::Script::new(RESTORE_SCRIPT)
                .key(stock_key(&product_id))
                .arg(quantity)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| transport_err("Failed to execute stock restore", e))?;

            let (code, value) = decode_pair(&reply, "restore_stock")?;
            match code {
                CODE_OK => {
                    tracing::debug!(
                        product_id = %product_id,
                        quantity,
                        new_quantity = value,
                        "Stock restored"
                    );
                    Ok(as_u32(value))
                }
                CODE_NOT_FOUND => Err(LedgerError::NotFound(product_id)),
                other => Err(LedgerError::Transport(format!(
                    "restore_stock: unknown script code {other}"
                ))),
            }
        })
    }

    fn get_stock(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<u32, LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let product_id = product_id.clone();
        Box::pin(async move {
            let value: Option<u32> = conn
                .get(stock_key(&product_id))
                .await
                .map_err(|e| transport_err("Failed to read stock", e))?;
            value.ok_or(LedgerError::NotFound(product_id))
        })
    }

    fn set_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let product_id = product_id.clone();
        Box::pin(async move {
            let _: () = conn
                .set(stock_key(&product_id), quantity)
                .await
                .map_err(|e| transport_err("Failed to set stock", e))?;
            tracing::info!(product_id = %product_id, quantity, "Stock set");
            Ok(())
        })
    }

    fn get_price(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<Money, LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let product_id = product_id.clone();
        Box::pin(async move {
            let cents: Option<i64> = conn
                .get(price_key(&product_id))
                .await
                .map_err(|e| transport_err("Failed to read price", e))?;
            cents
                .map(Money::from_cents)
                .ok_or(LedgerError::NotFound(product_id))
        })
    }

    fn set_price(
        &self,
        product_id: &ProductId,
        price: Money,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let product_id = product_id.clone();
        Box::pin(async move {
            let _: () = conn
                .set(price_key(&product_id), price.cents())
                .await
                .map_err(|e| transport_err("Failed to set price", e))?;
            Ok(())
        })
    }

    fn remove_all(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let product_id = product_id.clone();
        Box::pin(async move {
            let _: () = conn
                .del(&[
                    stock_key(&product_id),
                    price_key(&product_id),
                    sequence_key(&product_id),
                ])
                .await
                .map_err(|e| transport_err("Failed to remove stock keys", e))?;
            tracing::info!(product_id = %product_id, "Stock keys removed");
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use flashmart_core::ledger::StockLedger;

    async fn store() -> RedisScriptStore {
        RedisScriptStore::connect("redis://127.0.0.1:6379")
            .await
            .unwrap()
    }

    fn unique_product() -> ProductId {
        ProductId::new(format!("test-ledger-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn decrement_succeeds_and_sequences_advance() {
        let store = store().await;
        let product = unique_product();
        store.set_stock(&product, 5).await.unwrap();

        let first = store.decrease_stock(&product, 2).await.unwrap();
        let second = store.decrease_stock(&product, 1).await.unwrap();
        assert!(second > first, "sequence must advance per settlement");
        assert_eq!(store.get_stock(&product).await.unwrap(), 2);

        store.remove_all(&product).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn insufficient_stock_mutates_nothing() {
        let store = store().await;
        let product = unique_product();
        store.set_stock(&product, 1).await.unwrap();

        let err = store.decrease_stock(&product, 2).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::OutOfStock {
                product_id: product.clone(),
                requested: 2,
                available: 1,
            }
        );
        assert_eq!(store.get_stock(&product).await.unwrap(), 1);

        store.remove_all(&product).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn missing_product_is_not_found() {
        let store = store().await;
        let product = unique_product();
        let err = store.decrease_stock(&product, 1).await.unwrap_err();
        assert_eq!(err, LedgerError::NotFound(product));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn restore_adds_back() {
        let store = store().await;
        let product = unique_product();
        store.set_stock(&product, 3).await.unwrap();
        store.decrease_stock(&product, 3).await.unwrap();
        assert_eq!(store.restore_stock(&product, 2).await.unwrap(), 2);
        store.remove_all(&product).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn price_roundtrip() {
        let store = store().await;
        let product = unique_product();
        store.set_price(&product, Money::from_cents(1999)).await.unwrap();
        assert_eq!(
            store.get_price(&product).await.unwrap(),
            Money::from_cents(1999)
        );
        store.remove_all(&product).await.unwrap();
    }
}
