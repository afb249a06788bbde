//! Trait seam for bounded reads over the partitioned event log.
//!
//! The recovery engine is the only consumer of this trait: it needs to
//! enumerate partitions, capture their watermarks up front, and read
//! explicit offset ranges. Ordinary streaming consumption goes through
//! a consumer group, not through this seam.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by log reads.
#[derive(Error, Debug)]
pub enum EventLogError {
    /// The topic does not exist on the broker.
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// The broker was unreachable or the read failed.
    #[error("Event log transport error: {0}")]
    Transport(String),
}

/// Offset bounds of one partition at observation time.
///
/// `first_offset..last_offset` is a half-open range: `last_offset` is
/// the offset the *next* record would get, so an empty partition has
/// `first_offset == last_offset`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PartitionBounds {
    /// Partition number.
    pub partition: i32,
    /// Offset of the oldest retained record.
    pub first_offset: i64,
    /// One past the offset of the newest record.
    pub last_offset: i64,
}

impl PartitionBounds {
    /// Returns `true` when the partition holds no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.first_offset >= self.last_offset
    }
}

/// One raw record read from the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Partition the record came from.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Raw envelope bytes. Decoding is the caller's job; a record that
    /// fails to decode is the caller's to skip or fail on.
    pub payload: Vec<u8>,
}

/// Bounded, offset-addressed reads over a partitioned log.
pub trait EventLog: Send + Sync {
    /// Lists all partitions of `topic` with their current bounds.
    ///
    /// # Errors
    ///
    /// [`EventLogError::TopicNotFound`] for an unknown topic.
    fn partitions(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PartitionBounds>, EventLogError>> + Send + '_>>;

    /// Reads records of one partition in `[from, to)` offset order.
    ///
    /// Offsets below the partition's first retained offset are clamped
    /// up by the implementation; an empty range yields an empty vec.
    ///
    /// # Errors
    ///
    /// [`EventLogError::Transport`] if the read fails mid-range.
    fn read(
        &self,
        topic: &str,
        partition: i32,
        from: i64,
        to: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogRecord>, EventLogError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_partition_has_equal_bounds() {
        let bounds = PartitionBounds { partition: 0, first_offset: 5, last_offset: 5 };
        assert!(bounds.is_empty());
        let bounds = PartitionBounds { partition: 0, first_offset: 0, last_offset: 3 };
        assert!(!bounds.is_empty());
    }
}
