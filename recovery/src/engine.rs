//! The recovery engine.

use chrono::Utc;
use flashmart_core::event::{DomainEvent, EventEnvelope, SnapshotPayload};
use flashmart_core::ledger::{LedgerError, ReservationCoordinator};
use flashmart_core::log::{EventLog, EventLogError, PartitionBounds};
use flashmart_core::recovery::{RecoveryCache, RecoveryKind, RecoveryReport, ReservationArchive};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a recovery run.
///
/// Individual undecodable log records are never an error; they are
/// counted in [`RecoveryReport::records_skipped`] and logged. Only
/// infrastructure failures abort a run.
#[derive(Error, Debug)]
pub enum RecoveryError {
    /// The event log could not be read.
    #[error("Event log unavailable: {0}")]
    Log(#[from] EventLogError),

    /// The cache could not be written.
    #[error("Cache unavailable: {0}")]
    Cache(#[from] LedgerError),
}

/// Rebuilds cache state from the event log and the reservation archive.
///
/// A full run is six steps:
///
/// 1. Enumerate the topic's partitions and capture their offset bounds.
///    Everything appended after this point is ignored; the run rebuilds
///    a consistent past, not a moving target.
/// 2. Scan every partition for `product.snapshot` events and keep the
///    one with the most recent `occurred_at` across all partitions.
/// 3. Bulk-load the snapshot's active product set into the cache.
/// 4. For each partition, replay from one past the snapshot's offset
///    for that partition (or from the partition's first offset, with a
///    warning, when the snapshot never saw it) up to the bound captured
///    in step 1, applying only the incremental product events.
/// 5. With no snapshot on the log at all, replay every partition from
///    its first offset against an empty set.
/// 6. Re-materialize live holds from the reservation archive with
///    their remaining TTLs.
///
/// Replay is idempotent: the incremental events are set operations, so
/// running recovery twice converges to the same cache state.
pub struct RecoveryEngine {
    log: Arc<dyn EventLog>,
    cache: Arc<dyn RecoveryCache>,
    coordinator: Arc<dyn ReservationCoordinator>,
    archive: Arc<dyn ReservationArchive>,
    topic: String,
}

impl RecoveryEngine {
    /// Creates an engine reading `topic` on the given log.
    pub fn new(
        log: Arc<dyn EventLog>,
        cache: Arc<dyn RecoveryCache>,
        coordinator: Arc<dyn ReservationCoordinator>,
        archive: Arc<dyn ReservationArchive>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            log,
            cache,
            coordinator,
            archive,
            topic: topic.into(),
        }
    }

    /// Runs a recovery of the requested kind and reports what was
    /// restored.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError`] when the log or the cache is
    /// unreachable. Undecodable records are skipped, not fatal.
    pub async fn recover(&self, kind: RecoveryKind) -> Result<RecoveryReport, RecoveryError> {
        let mut report = RecoveryReport::default();

        if kind == RecoveryKind::Full {
            self.rebuild_products(&mut report).await?;
        }
        self.restore_reservations(&mut report).await?;

        tracing::info!(
            kind = ?kind,
            products_restored = report.products_restored,
            reservations_restored = report.reservations_restored,
            records_replayed = report.records_replayed,
            records_skipped = report.records_skipped,
            "Recovery complete"
        );
        metrics::counter!("recovery.runs").increment(1);
        Ok(report)
    }

    /// Steps 1-5: snapshot lookup, bulk load, per-partition replay.
    async fn rebuild_products(&self, report: &mut RecoveryReport) -> Result<(), RecoveryError> {
        let bounds = self.log.partitions(&self.topic).await?;
        let snapshot = self.find_latest_snapshot(&bounds).await?;

        let active = match &snapshot {
            Some(payload) => payload.active_products.clone(),
            None => {
                tracing::warn!(
                    topic = %self.topic,
                    "No snapshot on the log, replaying every partition from the start"
                );
                Vec::new()
            }
        };
        report.products_restored = u64::try_from(active.len()).unwrap_or(u64::MAX);
        self.cache.load_active_products(active).await?;

        for partition in &bounds {
            if partition.is_empty() {
                continue;
            }
            let from = match &snapshot {
                Some(payload) => match payload.partition_offsets.get(&partition.partition) {
                    Some(covered) => covered + 1,
                    None => {
                        tracing::warn!(
                            partition = partition.partition,
                            "Partition missing from snapshot offsets, replaying from its first offset"
                        );
                        partition.first_offset
                    }
                },
                None => partition.first_offset,
            };
            if from >= partition.last_offset {
                continue;
            }
            self.replay_partition(partition, from, report).await?;
        }
        Ok(())
    }

    /// Scans every partition in full and returns the newest snapshot
    /// payload by `occurred_at`, if any exists.
    async fn find_latest_snapshot(
        &self,
        bounds: &[PartitionBounds],
    ) -> Result<Option<SnapshotPayload>, RecoveryError> {
        let mut latest: Option<SnapshotPayload> = None;
        for partition in bounds {
            if partition.is_empty() {
                continue;
            }
            let records = self
                .log
                .read(
                    &self.topic,
                    partition.partition,
                    partition.first_offset,
                    partition.last_offset,
                )
                .await?;
            for record in records {
                // Decode failures are counted during replay, not here;
                // a record is only "skipped" once.
                let Ok(envelope) = EventEnvelope::from_bytes(&record.payload) else {
                    continue;
                };
                if let DomainEvent::ProductSnapshot(payload) = envelope.event {
                    let newer = latest
                        .as_ref()
                        .is_none_or(|current| payload.occurred_at > current.occurred_at);
                    if newer {
                        latest = Some(payload);
                    }
                }
            }
        }
        if let Some(payload) = &latest {
            tracing::info!(
                products = payload.active_products.len(),
                offsets = ?payload.partition_offsets,
                occurred_at = %payload.occurred_at,
                "Recovering from snapshot"
            );
        }
        Ok(latest)
    }

    /// Step 4 for one partition: apply incremental product events in
    /// `[from, last_offset)`.
    async fn replay_partition(
        &self,
        partition: &PartitionBounds,
        from: i64,
        report: &mut RecoveryReport,
    ) -> Result<(), RecoveryError> {
        let records = self
            .log
            .read(&self.topic, partition.partition, from, partition.last_offset)
            .await?;
        for record in records {
            let envelope = match EventEnvelope::from_bytes(&record.payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Skipping undecodable log record"
                    );
                    report.records_skipped += 1;
                    continue;
                }
            };
            match envelope.event {
                DomainEvent::ProductActivated { product_id, .. } => {
                    self.cache.mark_active(&product_id).await?;
                    report.records_replayed += 1;
                }
                DomainEvent::ProductDeactivated { product_id, .. } => {
                    self.cache.mark_inactive(&product_id).await?;
                    report.records_replayed += 1;
                }
                DomainEvent::ProductRemoved { product_id, .. } => {
                    self.cache.remove(&product_id).await?;
                    report.records_replayed += 1;
                }
                // Older snapshots past the chosen one carry a stale
                // cut; applying one would roll the set backwards.
                DomainEvent::ProductSnapshot(_) => {}
                // Order and wallet traffic does not affect the active
                // product set.
                _ => {}
            }
        }
        Ok(())
    }

    /// Step 6: re-materialize live holds with their remaining TTLs.
    async fn restore_reservations(
        &self,
        report: &mut RecoveryReport,
    ) -> Result<(), RecoveryError> {
        let live = self.archive.load_live_reservations().await?;
        let now = Utc::now();
        for reservation in live {
            let ttl_secs = reservation.remaining_ttl_secs(now);
            if ttl_secs == 0 {
                // Expired between the archive read and now; the
                // sweeper owns returning its stock.
                continue;
            }
            self.coordinator.restore(&reservation, ttl_secs).await?;
            report.reservations_restored += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use flashmart_core::ids::{BuyerId, ProductId};
    use flashmart_core::reservation::Reservation;
    use flashmart_testing::mocks::{
        InMemoryEventLog, InMemoryReservationArchive, InMemoryScriptStore,
    };
    use std::collections::BTreeMap;

    const TOPIC: &str = "flashmart-events";

    fn product(name: &str) -> ProductId {
        ProductId::new(name)
    }

    fn activated(name: &str) -> DomainEvent {
        DomainEvent::ProductActivated {
            product_id: product(name),
            occurred_at: Utc::now(),
        }
    }

    fn deactivated(name: &str) -> DomainEvent {
        DomainEvent::ProductDeactivated {
            product_id: product(name),
            occurred_at: Utc::now(),
        }
    }

    fn removed(name: &str) -> DomainEvent {
        DomainEvent::ProductRemoved {
            product_id: product(name),
            occurred_at: Utc::now(),
        }
    }

    fn engine(
        log: &InMemoryEventLog,
        store: &InMemoryScriptStore,
        archive: &InMemoryReservationArchive,
    ) -> RecoveryEngine {
        RecoveryEngine::new(
            Arc::new(log.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(archive.clone()),
            TOPIC,
        )
    }

    #[tokio::test]
    async fn snapshot_plus_replay_matches_full_replay() {
        // Two logs with identical event streams; one also carries a
        // snapshot covering a prefix. Recovering from each must land on
        // the same active set.
        let with_snapshot = InMemoryEventLog::with_partitions(2);
        let without = InMemoryEventLog::with_partitions(2);

        let prefix: &[(i32, DomainEvent)] = &[
            (0, activated("a")),
            (0, activated("b")),
            (1, activated("c")),
            (0, deactivated("b")),
        ];
        let suffix: &[(i32, DomainEvent)] = &[
            (1, activated("d")),
            (0, removed("a")),
            (0, activated("e")),
            (1, deactivated("c")),
        ];

        let mut offsets = BTreeMap::new();
        for (partition, event) in prefix {
            let offset = with_snapshot.append_event(TOPIC, *partition, event.clone()).unwrap();
            offsets.insert(*partition, offset);
            without.append_event(TOPIC, *partition, event.clone()).unwrap();
        }
        let snapshot = DomainEvent::ProductSnapshot(SnapshotPayload {
            active_products: vec![product("a"), product("c")],
            partition_offsets: offsets,
            occurred_at: Utc::now(),
        });
        with_snapshot.append_event(TOPIC, 0, snapshot).unwrap();
        for (partition, event) in suffix {
            with_snapshot.append_event(TOPIC, *partition, event.clone()).unwrap();
            without.append_event(TOPIC, *partition, event.clone()).unwrap();
        }

        let snap_store = InMemoryScriptStore::new();
        let full_store = InMemoryScriptStore::new();
        let archive = InMemoryReservationArchive::new();

        let snap_report = engine(&with_snapshot, &snap_store, &archive)
            .recover(RecoveryKind::Full)
            .await
            .unwrap();
        engine(&without, &full_store, &archive)
            .recover(RecoveryKind::Full)
            .await
            .unwrap();

        let expected = vec![product("d"), product("e")];
        assert_eq!(snap_store.active_products(), expected);
        assert_eq!(full_store.active_products(), expected);

        assert_eq!(snap_report.products_restored, 2);
        // The four suffix events apply; the snapshot record inside the
        // replay range applies nothing.
        assert_eq!(snap_report.records_replayed, 4);
        assert_eq!(snap_report.records_skipped, 0);
    }

    #[tokio::test]
    async fn newest_snapshot_wins_across_partitions() {
        let log = InMemoryEventLog::with_partitions(2);
        let old = DomainEvent::ProductSnapshot(SnapshotPayload {
            active_products: vec![product("stale")],
            partition_offsets: BTreeMap::new(),
            occurred_at: Utc::now() - Duration::hours(1),
        });
        let new = DomainEvent::ProductSnapshot(SnapshotPayload {
            active_products: vec![product("fresh")],
            partition_offsets: BTreeMap::from([(0, 0), (1, 0)]),
            occurred_at: Utc::now(),
        });
        log.append_event(TOPIC, 0, old).unwrap();
        log.append_event(TOPIC, 1, new).unwrap();

        let store = InMemoryScriptStore::new();
        let archive = InMemoryReservationArchive::new();
        engine(&log, &store, &archive)
            .recover(RecoveryKind::Full)
            .await
            .unwrap();

        assert_eq!(store.active_products(), vec![product("fresh")]);
    }

    #[tokio::test]
    async fn partition_absent_from_snapshot_replays_from_its_start() {
        let log = InMemoryEventLog::with_partitions(2);
        // Snapshot only covers partition 0; partition 1 grew later.
        log.append_event(TOPIC, 0, activated("a")).unwrap();
        let snapshot = DomainEvent::ProductSnapshot(SnapshotPayload {
            active_products: vec![product("a")],
            partition_offsets: BTreeMap::from([(0, 0)]),
            occurred_at: Utc::now(),
        });
        log.append_event(TOPIC, 0, snapshot).unwrap();
        log.append_event(TOPIC, 1, activated("b")).unwrap();

        let store = InMemoryScriptStore::new();
        let archive = InMemoryReservationArchive::new();
        engine(&log, &store, &archive)
            .recover(RecoveryKind::Full)
            .await
            .unwrap();

        assert_eq!(store.active_products(), vec![product("a"), product("b")]);
    }

    #[tokio::test]
    async fn undecodable_records_are_counted_not_fatal() {
        let log = InMemoryEventLog::with_partitions(1);
        log.append_event(TOPIC, 0, activated("a")).unwrap();
        log.append(TOPIC, 0, b"not json at all".to_vec());
        log.append_event(TOPIC, 0, activated("b")).unwrap();

        let store = InMemoryScriptStore::new();
        let archive = InMemoryReservationArchive::new();
        let report = engine(&log, &store, &archive)
            .recover(RecoveryKind::Full)
            .await
            .unwrap();

        assert_eq!(store.active_products(), vec![product("a"), product("b")]);
        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.records_replayed, 2);
    }

    #[tokio::test]
    async fn reservations_kind_restores_holds_and_leaves_products_alone() {
        let log = InMemoryEventLog::with_partitions(1);
        log.append_event(TOPIC, 0, activated("never-applied")).unwrap();

        let store = InMemoryScriptStore::new();
        let archive = InMemoryReservationArchive::new();

        let now = Utc::now();
        let live = Reservation::with_ttl(
            product("p"),
            BuyerId::new("buyer-1"),
            2,
            now,
            Duration::seconds(120),
        )
        .unwrap();
        let mut dead = Reservation::with_ttl(
            product("p"),
            BuyerId::new("buyer-2"),
            1,
            now,
            Duration::seconds(120),
        )
        .unwrap();
        dead.expires_at = now - Duration::seconds(1);
        archive.push(live.clone());
        archive.push(dead);

        let report = engine(&log, &store, &archive)
            .recover(RecoveryKind::Reservations)
            .await
            .unwrap();

        assert_eq!(report.reservations_restored, 1);
        assert_eq!(report.products_restored, 0);
        assert!(store.active_products().is_empty());
        assert_eq!(store.reservation_count(), 1);
    }

    #[tokio::test]
    async fn missing_topic_is_a_log_error() {
        let log = InMemoryEventLog::with_partitions(1);
        let store = InMemoryScriptStore::new();
        let archive = InMemoryReservationArchive::new();

        let err = engine(&log, &store, &archive)
            .recover(RecoveryKind::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Log(_)));
    }
}
