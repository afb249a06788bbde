//! Redpanda-backed durable event log for Flashmart.
//!
//! This crate implements the two log-facing trait seams from
//! `flashmart-core` on rdkafka:
//!
//! - [`EventPublisher`] — producer-side publishing of JSON envelopes,
//!   keyed by aggregate id so one aggregate's events land in one
//!   partition in order
//! - [`EventLog`] — the bounded read surface the recovery engine needs:
//!   partition enumeration, watermark discovery and explicit offset
//!   range reads
//!
//! # Why Redpanda?
//!
//! Kafka-compatible wire protocol (any Kafka-compatible broker works),
//! simpler to operate, self-hostable. Nothing here is
//! Redpanda-specific beyond the name.
//!
//! # Delivery semantics
//!
//! At-least-once. `publish` waits for broker acknowledgement; a timeout
//! after the broker accepted the record can still mean the record
//! landed, so downstream consumers deduplicate on `message_id`.
//! Ordering holds within a partition only; the recovery engine's
//! per-partition offset map exists precisely because there is no global
//! order.
//!
//! # Example
//!
//! ```no_run
//! use flashmart_redpanda::RedpandaEventLog;
//! use flashmart_core::publisher::EventPublisher;
//! use flashmart_core::event::{DomainEvent, EventEnvelope};
//! use flashmart_core::ids::ProductId;
//! use chrono::Utc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = RedpandaEventLog::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .build()?;
//!
//! let event = DomainEvent::StockSet {
//!     product_id: ProductId::new("sku-1"),
//!     quantity: 100,
//!     occurred_at: Utc::now(),
//! };
//! log.publish("flashmart-events", &EventEnvelope::new(event, Utc::now())).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use flashmart_core::event::EventEnvelope;
use flashmart_core::log::{EventLog, EventLogError, LogRecord, PartitionBounds};
use flashmart_core::publisher::{EventPublisher, PublishError};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Redpanda event log client: producer plus bounded-read surface.
///
/// The producer is created once at build time and shared. Readers are
/// created per call: recovery is rare and each range read wants a
/// consumer with no group state, assigned to exactly one partition.
pub struct RedpandaEventLog {
    /// Kafka producer for publishing envelopes.
    producer: FutureProducer,
    /// Broker addresses (for creating range-read consumers).
    brokers: String,
    /// Producer send timeout.
    timeout: Duration,
}

impl std::fmt::Debug for RedpandaEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaEventLog")
            .field("brokers", &self.brokers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedpandaEventLog {
    /// Creates an event log client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Transport`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, PublishError> {
        Self::builder().brokers(brokers).build()
    }

    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> RedpandaEventLogBuilder {
        RedpandaEventLogBuilder::default()
    }

    /// Returns the configured broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn range_consumer(&self) -> Result<BaseConsumer, EventLogError> {
        // A group id is required by the client but never used: the
        // consumer is assigned partitions explicitly and never commits.
        ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", "flashmart-range-reader")
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "true")
            .create()
            .map_err(|e| {
                EventLogError::Transport(format!("Failed to create range consumer: {e}"))
            })
    }
}

/// Builder for configuring a [`RedpandaEventLog`].
///
/// # Example
///
/// ```no_run
/// use flashmart_redpanda::RedpandaEventLog;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = RedpandaEventLog::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaEventLogBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaEventLogBuilder {
    /// Sets the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Sets the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "1". Anything feeding recovery should use "all"; losing
    /// an acked incremental event means the next snapshot is the only
    /// thing that heals the cache.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Sets the compression codec: "none", "gzip", "snappy", "lz4",
    /// "zstd". Default: "none".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Sets the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the [`RedpandaEventLog`].
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Transport`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventLog, PublishError> {
        let brokers = self
            .brokers
            .ok_or_else(|| PublishError::Transport("Brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            PublishError::Transport(format!("Failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            compression = self.compression.as_deref().unwrap_or("none"),
            "RedpandaEventLog created successfully"
        );

        Ok(RedpandaEventLog {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

impl EventPublisher for RedpandaEventLog {
    fn publish(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>> {
        // Clone data before moving into the async block
        let topic = topic.to_string();
        let envelope = envelope.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = envelope
                .to_bytes()
                .map_err(|e| PublishError::Serialization(e.to_string()))?;

            // Key by aggregate id: one aggregate's events stay in one
            // partition, in order.
            let key = envelope.event.aggregate_id();

            let record = FutureRecord::to(&topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        message_type = %envelope.message_type,
                        message_id = %envelope.message_id,
                        "Envelope published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        message_type = %envelope.message_type,
                        error = %kafka_error,
                        "Failed to publish envelope"
                    );
                    Err(PublishError::Transport(kafka_error.to_string()))
                }
            }
        })
    }
}

/// Timeout for each metadata / watermark / poll call during range reads.
const RANGE_READ_TIMEOUT: Duration = Duration::from_secs(10);

impl EventLog for RedpandaEventLog {
    fn partitions(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PartitionBounds>, EventLogError>> + Send + '_>>
    {
        let topic = topic.to_string();
        let consumer = self.range_consumer();

        Box::pin(async move {
            let consumer = consumer?;
            // rdkafka's metadata and watermark calls are blocking.
            tokio::task::spawn_blocking(move || {
                let metadata = consumer
                    .fetch_metadata(Some(&topic), RANGE_READ_TIMEOUT)
                    .map_err(|e| {
                        EventLogError::Transport(format!("Failed to fetch metadata: {e}"))
                    })?;

                let topic_metadata = metadata
                    .topics()
                    .iter()
                    .find(|t| t.name() == topic)
                    .filter(|t| !t.partitions().is_empty())
                    .ok_or_else(|| EventLogError::TopicNotFound(topic.clone()))?;

                let mut bounds = Vec::with_capacity(topic_metadata.partitions().len());
                for partition in topic_metadata.partitions() {
                    let (first_offset, last_offset) = consumer
                        .fetch_watermarks(&topic, partition.id(), RANGE_READ_TIMEOUT)
                        .map_err(|e| {
                            EventLogError::Transport(format!(
                                "Failed to fetch watermarks for partition {}: {e}",
                                partition.id()
                            ))
                        })?;
                    bounds.push(PartitionBounds {
                        partition: partition.id(),
                        first_offset,
                        last_offset,
                    });
                }
                bounds.sort_by_key(|b| b.partition);

                tracing::debug!(
                    topic = %topic,
                    partitions = bounds.len(),
                    "Partition bounds fetched"
                );
                Ok(bounds)
            })
            .await
            .map_err(|e| EventLogError::Transport(format!("Range read task failed: {e}")))?
        })
    }

    fn read(
        &self,
        topic: &str,
        partition: i32,
        from: i64,
        to: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LogRecord>, EventLogError>> + Send + '_>> {
        let topic = topic.to_string();
        let consumer = self.range_consumer();

        Box::pin(async move {
            if from >= to {
                return Ok(Vec::new());
            }
            let consumer = consumer?;

            tokio::task::spawn_blocking(move || {
                let mut assignment = TopicPartitionList::new();
                assignment
                    .add_partition_offset(&topic, partition, Offset::Offset(from))
                    .map_err(|e| {
                        EventLogError::Transport(format!("Failed to build assignment: {e}"))
                    })?;
                consumer.assign(&assignment).map_err(|e| {
                    EventLogError::Transport(format!("Failed to assign partition: {e}"))
                })?;

                let mut records = Vec::new();
                loop {
                    let Some(message) = consumer.poll(RANGE_READ_TIMEOUT) else {
                        return Err(EventLogError::Transport(format!(
                            "Timed out reading {topic}/{partition} from offset {from}"
                        )));
                    };
                    let message = match message {
                        Ok(m) => m,
                        Err(rdkafka::error::KafkaError::PartitionEOF(_)) => break,
                        Err(e) => {
                            return Err(EventLogError::Transport(format!(
                                "Failed to read {topic}/{partition}: {e}"
                            )));
                        }
                    };

                    if message.offset() >= to {
                        break;
                    }
                    records.push(LogRecord {
                        partition,
                        offset: message.offset(),
                        payload: message.payload().unwrap_or_default().to_vec(),
                    });
                    if message.offset() + 1 >= to {
                        break;
                    }
                }

                tracing::debug!(
                    topic = %topic,
                    partition,
                    from,
                    to,
                    records = records.len(),
                    "Range read complete"
                );
                Ok(records)
            })
            .await
            .map_err(|e| EventLogError::Transport(format!("Range read task failed: {e}")))?
        })
    }
}
