//! Polling relay that drains the outbox onto the event log.
//!
//! Deliberately decoupled from the aggregate-save transaction: the save
//! path only enqueues, and this loop owns publication. Delivery is
//! at-least-once — a crash between publish and `mark_as_published`
//! republishes the row on the next poll, which is why envelopes carry a
//! `message_id` for consumer-side deduplication.

use crate::outbox::{OutboxEntry, OutboxStore};
use flashmart_core::event::{DomainEvent, EventEnvelope};
use flashmart_core::publisher::EventPublisher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Relay loop configuration.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Topic pending events are published to.
    pub topic: String,
    /// Pause between polls when the outbox is drained.
    pub poll_interval: Duration,
    /// Maximum rows fetched per poll.
    pub batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            topic: "flashmart-events".to_string(),
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
        }
    }
}

/// Outbox polling relay.
///
/// # Example
///
/// ```no_run
/// use flashmart_postgres::{OutboxRelay, PgOutboxStore, RelayConfig};
/// use std::sync::Arc;
///
/// # async fn example(
/// #     pool: sqlx::PgPool,
/// #     publisher: Arc<dyn flashmart_core::publisher::EventPublisher>,
/// # ) {
/// let relay = OutboxRelay::new(
///     Arc::new(PgOutboxStore::new(pool)),
///     publisher,
///     RelayConfig::default(),
/// );
/// let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
/// tokio::spawn(async move { relay.run(shutdown_rx).await });
/// // ... later:
/// let _ = shutdown_tx.send(true);
/// # }
/// ```
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
}

impl OutboxRelay {
    /// Creates a relay over the given outbox store and publisher.
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: RelayConfig,
    ) -> Self {
        Self { store, publisher, config }
    }

    /// Runs the poll loop until the shutdown signal flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            topic = %self.config.topic,
            poll_interval_ms = self.config.poll_interval.as_millis(),
            batch_size = self.config.batch_size,
            "Outbox relay started"
        );

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.drain_once().await {
                        tracing::error!(error = %e, "Outbox drain failed, will retry");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Outbox relay stopped");
    }

    /// Drains one batch: fetch pending rows, publish each, mark the
    /// published ones.
    ///
    /// A publish failure stops the batch so row order within an
    /// aggregate is preserved; everything already published is still
    /// marked.
    ///
    /// # Errors
    ///
    /// Returns the store error if fetching or marking fails.
    pub async fn drain_once(&self) -> Result<usize, crate::outbox::OutboxError> {
        let pending = self.store.fetch_pending(self.config.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut published_ids = Vec::with_capacity(pending.len());
        for entry in &pending {
            match self.publish_entry(entry).await {
                Ok(()) => published_ids.push(entry.id),
                Err(e) => {
                    tracing::warn!(
                        outbox_id = entry.id,
                        event_type = %entry.event_type,
                        error = %e,
                        "Publish failed, stopping batch"
                    );
                    break;
                }
            }
        }

        let count = published_ids.len();
        self.store.mark_as_published(&published_ids).await?;
        if count > 0 {
            metrics::counter!("outbox.relay.published").increment(count as u64);
            tracing::debug!(published = count, "Outbox batch drained");
        }
        Ok(count)
    }

    async fn publish_entry(&self, entry: &OutboxEntry) -> Result<(), String> {
        let event: DomainEvent =
            serde_json::from_value(entry.payload.clone()).map_err(|e| e.to_string())?;
        let envelope = EventEnvelope::new(event, chrono::Utc::now());
        self.publisher
            .publish(&self.config.topic, &envelope)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::outbox::{OutboxError, OutboxStatus};
    use chrono::Utc;
    use flashmart_core::ids::ProductId;
    use flashmart_core::publisher::PublishError;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    struct MemoryOutbox {
        entries: Mutex<Vec<OutboxEntry>>,
    }

    impl MemoryOutbox {
        fn with_events(events: Vec<DomainEvent>) -> Self {
            let entries = events
                .into_iter()
                .enumerate()
                .map(|(i, event)| OutboxEntry {
                    id: i as i64 + 1,
                    aggregate_type: "order".to_string(),
                    aggregate_id: event.aggregate_id(),
                    event_type: event.event_type().to_string(),
                    payload: serde_json::to_value(&event).unwrap(),
                    occurred_at: Utc::now(),
                    status: OutboxStatus::Pending,
                    published_at: None,
                })
                .collect();
            Self { entries: Mutex::new(entries) }
        }

        fn pending_count(&self) -> usize {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.status == OutboxStatus::Pending)
                .count()
        }
    }

    impl OutboxStore for MemoryOutbox {
        fn fetch_pending(
            &self,
            limit: usize,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEntry>, OutboxError>> + Send + '_>>
        {
            let batch: Vec<OutboxEntry> = self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.status == OutboxStatus::Pending)
                .take(limit)
                .cloned()
                .collect();
            Box::pin(async move { Ok(batch) })
        }

        fn mark_as_published(
            &self,
            ids: &[i64],
        ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
            let mut entries = self.entries.lock().unwrap();
            for entry in entries.iter_mut() {
                if ids.contains(&entry.id) && entry.status == OutboxStatus::Pending {
                    entry.status = OutboxStatus::Published;
                    entry.published_at = Some(Utc::now());
                }
            }
            Box::pin(async move { Ok(()) })
        }
    }

    struct FlakyPublisher {
        fail_on: Mutex<Vec<String>>,
        published: Mutex<Vec<String>>,
    }

    impl FlakyPublisher {
        fn new(fail_on: Vec<&str>) -> Self {
            Self {
                fail_on: Mutex::new(fail_on.into_iter().map(String::from).collect()),
                published: Mutex::new(Vec::new()),
            }
        }
    }

    impl EventPublisher for FlakyPublisher {
        fn publish(
            &self,
            _topic: &str,
            envelope: &EventEnvelope,
        ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>> {
            let message_type = envelope.message_type.clone();
            let fails = self.fail_on.lock().unwrap().contains(&message_type);
            if !fails {
                self.published.lock().unwrap().push(message_type.clone());
            }
            Box::pin(async move {
                if fails {
                    Err(PublishError::Transport("broker down".to_string()))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn stock_set(id: &str) -> DomainEvent {
        DomainEvent::StockSet {
            product_id: ProductId::new(id),
            quantity: 1,
            occurred_at: Utc::now(),
        }
    }

    fn product_removed(id: &str) -> DomainEvent {
        DomainEvent::ProductRemoved {
            product_id: ProductId::new(id),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn drain_publishes_and_marks_in_order() {
        let outbox = Arc::new(MemoryOutbox::with_events(vec![
            stock_set("a"),
            product_removed("b"),
        ]));
        let publisher = Arc::new(FlakyPublisher::new(vec![]));
        let relay = OutboxRelay::new(
            outbox.clone(),
            publisher.clone(),
            RelayConfig::default(),
        );

        let drained = relay.drain_once().await.unwrap();
        assert_eq!(drained, 2);
        assert_eq!(outbox.pending_count(), 0);
        assert_eq!(
            *publisher.published.lock().unwrap(),
            vec!["stock.set".to_string(), "product.removed".to_string()]
        );
    }

    #[tokio::test]
    async fn publish_failure_stops_batch_but_keeps_progress() {
        let outbox = Arc::new(MemoryOutbox::with_events(vec![
            stock_set("a"),
            product_removed("b"),
            stock_set("c"),
        ]));
        // The middle event fails; the first is marked, the rest stay
        // pending for the next poll.
        let publisher = Arc::new(FlakyPublisher::new(vec!["product.removed"]));
        let relay = OutboxRelay::new(
            outbox.clone(),
            publisher.clone(),
            RelayConfig::default(),
        );

        let drained = relay.drain_once().await.unwrap();
        assert_eq!(drained, 1);
        assert_eq!(outbox.pending_count(), 2);
    }

    #[tokio::test]
    async fn empty_outbox_is_a_noop() {
        let outbox = Arc::new(MemoryOutbox::with_events(vec![]));
        let publisher = Arc::new(FlakyPublisher::new(vec![]));
        let relay = OutboxRelay::new(outbox, publisher, RelayConfig::default());
        assert_eq!(relay.drain_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let outbox = Arc::new(MemoryOutbox::with_events(vec![]));
        let publisher = Arc::new(FlakyPublisher::new(vec![]));
        let relay = OutboxRelay::new(outbox, publisher, RelayConfig::default());

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { relay.run(rx).await });
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
