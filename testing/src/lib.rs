//! # Flashmart Testing
//!
//! In-memory implementations of every trait seam in `flashmart-core`,
//! plus a deterministic clock. The in-memory script store mirrors the
//! atomicity contract of the Redis scripts (one mutex acquisition per
//! operation), so saga and recovery logic can be exercised under real
//! concurrency without external services.
//!
//! ## Example
//!
//! ```
//! use flashmart_testing::mocks::InMemoryScriptStore;
//! use flashmart_core::ids::ProductId;
//! use flashmart_core::ledger::StockLedger;
//!
//! # async fn example() {
//! let store = InMemoryScriptStore::new();
//! store.set_stock(&ProductId::new("sku-1"), 10).await.unwrap();
//! let seq = store.decrease_stock(&ProductId::new("sku-1"), 3).await.unwrap();
//! assert_eq!(seq, 1);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod mocks;

pub use mocks::{
    test_clock, CapturingPublisher, FixedClock, InMemoryEventLog, InMemoryOrderStore,
    InMemoryReservationArchive, InMemoryScriptStore, InMemoryWallet,
};
