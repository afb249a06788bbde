//! Active-product set maintenance for the recovery engine.
//!
//! The set under [`crate::ACTIVE_PRODUCTS_KEY`] is what serves "is this
//! product sellable" reads. The bulk load replaces the whole set in one
//! script so a crash mid-recovery never leaves a half-old, half-new
//! set.

use crate::{transport_err, RedisScriptStore, ACTIVE_PRODUCTS_KEY};
use flashmart_core::ids::ProductId;
use flashmart_core::ledger::LedgerError;
use flashmart_core::recovery::RecoveryCache;
use redis::AsyncCommands;
use std::future::Future;
use std::pin::Pin;

/// Replaces the active set with ARGV atomically.
const LOAD_SCRIPT: &str = r#"
    redis.call('DEL', KEYS[1])
    for i, id in ipairs(ARGV) do
        redis.call('SADD', KEYS[1], id)
    end
    return #ARGV
"#;

impl RecoveryCache for RedisScriptStore {
    fn load_active_products(
        &self,
        products: Vec<ProductId>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        Box::pin(async move {
            let script = redis::Script::new(LOAD_SCRIPT);
            let mut invocation = script.key(ACTIVE_PRODUCTS_KEY);
            for product in &products {
                invocation.arg(product.as_str());
            }
            let loaded: i64 = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(|e| transport_err("Failed to load active product set", e))?;
            tracing::info!(products = loaded, "Active product set replaced");
            Ok(())
        })
    }

    fn mark_active(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let product_id = product_id.clone();
        Box::pin(async move {
            let _: () = conn
                .sadd(ACTIVE_PRODUCTS_KEY, product_id.as_str())
                .await
                .map_err(|e| transport_err("Failed to mark product active", e))?;
            Ok(())
        })
    }

    fn mark_inactive(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let product_id = product_id.clone();
        Box::pin(async move {
            let _: () = conn
                .srem(ACTIVE_PRODUCTS_KEY, product_id.as_str())
                .await
                .map_err(|e| transport_err("Failed to mark product inactive", e))?;
            Ok(())
        })
    }

    fn remove(
        &self,
        product_id: &ProductId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        let mut conn = self.connection();
        let product_id = product_id.clone();
        Box::pin(async move {
            let _: () = conn
                .srem(ACTIVE_PRODUCTS_KEY, product_id.as_str())
                .await
                .map_err(|e| transport_err("Failed to remove product", e))?;
            Ok(())
        })
    }
}

impl RedisScriptStore {
    /// Reads the current active product ids. Used by health checks to
    /// decide whether a recovery run is needed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Transport`] if the read fails.
    pub async fn active_products(&self) -> Result<Vec<ProductId>, LedgerError> {
        let mut conn = self.connection();
        let members: Vec<String> = conn
            .smembers(ACTIVE_PRODUCTS_KEY)
            .await
            .map_err(|e| transport_err("Failed to read active product set", e))?;
        Ok(members.into_iter().map(ProductId::new).collect())
    }
}
