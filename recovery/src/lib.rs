//! # Flashmart Recovery
//!
//! Rebuilds the cache after a wipe from two durable sources: the
//! partitioned event log (active product set, via snapshot plus replay)
//! and the reservation archive (live holds, via re-materialization).
//!
//! The log has no global order across partitions, so a snapshot cannot
//! be "everything up to offset N". Instead each `product.snapshot`
//! event carries a per-partition offset map describing the consistent
//! cut it covers, and replay resumes each partition independently just
//! past its entry in that map. See [`engine::RecoveryEngine`] for the
//! full procedure.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;

pub use engine::{RecoveryEngine, RecoveryError};
