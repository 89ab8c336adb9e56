//! Aggregator facade
//!
//! Owns the state store and the subscription hub behind a cloneable
//! handle. Batches are applied one at a time: every record of a batch is
//! merged, then subscribers are notified once, before the next batch starts.

use crate::error::HubResult;
use crate::hub::{Selector, Slice, Subscription, SubscriptionHub};
use crate::state::AggregateState;
use crate::store::{BatchOutcome, StateStore, StoreConfig};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use squadron_core::UpdateRecord;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Running aggregator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorStats {
    pub batches_processed: u64,
    pub records_applied: u64,
    pub records_created: u64,
    pub records_stale: u64,
    pub records_ignored: u64,
    pub notifications_sent: u64,
}

struct Inner {
    /// Held for the whole of a batch, notifications included
    store: Mutex<StateStore>,
    /// Orders publication and notification against new subscriptions.
    /// Reentrant so callbacks can subscribe from inside a notification.
    publish: ReentrantMutex<()>,
    published: RwLock<Arc<AggregateState>>,
    hub: Arc<SubscriptionHub>,
    stats: RwLock<AggregatorStats>,
}

/// Shared handle to the store and hub
#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

impl Aggregator {
    pub fn new(config: StoreConfig) -> Self {
        let store = StateStore::new(config);
        let published = store.snapshot();
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(store),
                publish: ReentrantMutex::new(()),
                published: RwLock::new(published),
                hub: Arc::new(SubscriptionHub::new()),
                stats: RwLock::new(AggregatorStats::default()),
            }),
        }
    }

    /// Apply records in order, then notify changed subscribers.
    ///
    /// Callbacks run on the calling thread while the batch lock is held;
    /// they may read snapshots and manage subscriptions but must not apply
    /// further batches.
    pub fn apply_batch(&self, records: &[UpdateRecord]) -> BatchOutcome {
        let mut store = self.inner.store.lock();
        let mut outcome = store.apply_batch(records);

        let mut fired = 0;
        // identical telemetry still refreshes the published timestamps
        if outcome.applied > 0 {
            let _publish = self.inner.publish.lock();
            let snapshot = store.snapshot();
            *self.inner.published.write() = Arc::clone(&snapshot);
            if outcome.has_changes() {
                fired = self.inner.hub.notify(&snapshot);
            }
            debug!(
                version = snapshot.version,
                changed = outcome.changed,
                notified = fired,
                "Batch applied"
            );
        }

        let mut stats = self.inner.stats.write();
        stats.batches_processed += 1;
        stats.records_applied += outcome.applied as u64;
        stats.records_created += outcome.created as u64;
        stats.records_stale += outcome.stale as u64;
        stats.records_ignored += outcome.ignored as u64;
        stats.notifications_sent += fired as u64;

        outcome.notified = fired;
        outcome
    }

    /// Current state; never blocks on an in-flight batch
    pub fn snapshot(&self) -> Arc<AggregateState> {
        Arc::clone(&self.inner.published.read())
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    /// Register a callback for changes to `selector`'s slice
    pub fn subscribe<F>(&self, selector: Selector, callback: F) -> HubResult<Subscription>
    where
        F: Fn(&Slice) + Send + Sync + 'static,
    {
        let _publish = self.inner.publish.lock();
        let baseline = self.snapshot();
        self.inner.hub.subscribe(selector, &baseline, callback)
    }

    /// Subscribe through a channel. The receiver yields the current slice
    /// first, then every change.
    pub fn subscribe_channel(
        &self,
        selector: Selector,
    ) -> HubResult<(Subscription, mpsc::UnboundedReceiver<Slice>)> {
        selector.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let _publish = self.inner.publish.lock();
        let baseline = self.snapshot();
        let _ = tx.send(selector.select(&baseline));
        let subscription = self.inner.hub.subscribe(selector, &baseline, move |slice| {
            let _ = tx.send(slice.clone());
        })?;

        Ok((subscription, rx))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.hub.subscriber_count()
    }

    pub fn config(&self) -> StoreConfig {
        *self.inner.store.lock().config()
    }

    pub fn stats(&self) -> AggregatorStats {
        self.inner.stats.read().clone()
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use squadron_core::{UnitId, UpdateFields};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fuel(id: &str, fuel: f64, secs: i64) -> UpdateRecord {
        let fields = UpdateFields {
            fuel: Some(fuel),
            ..Default::default()
        };
        UpdateRecord::unit(id, fields, Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
    }

    #[test]
    fn test_batch_notifies_once() {
        let aggregator = Aggregator::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = aggregator
            .subscribe(Selector::AllUnits, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let outcome =
            aggregator.apply_batch(&[fuel("1", 90.0, 0), fuel("2", 80.0, 0), fuel("1", 70.0, 1)]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.notified, 1);

        let stats = aggregator.stats();
        assert_eq!(stats.batches_processed, 1);
        assert_eq!(stats.records_applied, 3);
        assert_eq!(stats.records_created, 2);
        assert_eq!(stats.notifications_sent, 1);
    }

    #[test]
    fn test_unchanged_batch_does_not_notify() {
        let aggregator = Aggregator::default();
        aggregator.apply_batch(&[fuel("1", 90.0, 0)]);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = aggregator
            .subscribe("unit:1".parse().unwrap(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        aggregator.apply_batch(&[fuel("1", 90.0, 0)]);
        aggregator.apply_batch(&[fuel("2", 10.0, 0)]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        aggregator.apply_batch(&[fuel("1", 20.0, 2)]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_read_snapshot() {
        let aggregator = Aggregator::default();
        let seen = Arc::new(Mutex::new(None));
        let handle = aggregator.clone();
        let sink = Arc::clone(&seen);
        let _sub = aggregator
            .subscribe(Selector::AllUnits, move |_| {
                *sink.lock() = Some(handle.snapshot().version);
            })
            .unwrap();

        aggregator.apply_batch(&[fuel("1", 50.0, 0)]);
        assert_eq!(*seen.lock(), Some(aggregator.version()));
    }

    #[test]
    fn test_snapshot_reflects_latest_batch() {
        let aggregator = Aggregator::default();
        let before = aggregator.snapshot();
        aggregator.apply_batch(&[fuel("1", 150.0, 0)]);

        assert!(before.units.is_empty());
        let after = aggregator.snapshot();
        assert_eq!(after.unit(&UnitId::new("1")).unwrap().fuel, 100.0);
    }

    #[tokio::test]
    async fn test_subscribe_channel_yields_initial_then_changes() {
        let aggregator = Aggregator::default();
        let (subscription, mut rx) = aggregator.subscribe_channel(Selector::AllUnits).unwrap();

        assert_eq!(rx.recv().await, Some(Slice::Units(Vec::new())));

        aggregator.apply_batch(&[fuel("1", 60.0, 0)]);
        match rx.recv().await {
            Some(Slice::Units(units)) => assert_eq!(units.len(), 1),
            other => panic!("unexpected slice: {:?}", other),
        }

        assert!(subscription.unsubscribe());
        assert_eq!(aggregator.subscriber_count(), 0);
        // sender dropped with the subscriber
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_identical_updates_keep_unit_fresh() {
        let aggregator = Aggregator::default();
        let id = UnitId::new("1");
        aggregator.apply_batch(&[fuel("1", 50.0, 0)]);
        let first = aggregator.snapshot();

        std::thread::sleep(Duration::from_millis(30));
        let outcome = aggregator.apply_batch(&[fuel("1", 50.0, 5)]);
        assert_eq!(outcome.notified, 0);

        let latest = aggregator.snapshot();
        let before = first.unit(&id).unwrap();
        let after = latest.unit(&id).unwrap();
        assert!(before.is_stale(Duration::from_millis(20)));
        assert!(!after.is_stale(Duration::from_millis(20)));
        assert!(after.updated_at > before.updated_at);
        assert_eq!(
            after.observed_at,
            Some(Utc.timestamp_opt(1_700_000_005, 0).unwrap())
        );
        // content unchanged, so no new version
        assert_eq!(latest.version, first.version);
    }

    #[test]
    fn test_dropped_channel_subscription_closes_receiver() {
        let aggregator = Aggregator::default();
        let (subscription, mut rx) = aggregator.subscribe_channel(Selector::AllUnits).unwrap();
        assert_eq!(aggregator.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(aggregator.subscriber_count(), 0);

        aggregator.apply_batch(&[fuel("1", 60.0, 0)]);
        assert_eq!(rx.try_recv(), Ok(Slice::Units(Vec::new())));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_callback_can_subscribe_during_notification() {
        let aggregator = Aggregator::default();
        let nested = Arc::new(Mutex::new(Vec::new()));
        let handle = aggregator.clone();
        let sink = Arc::clone(&nested);
        let _sub = aggregator
            .subscribe(Selector::AllUnits, move |_| {
                if let Ok(sub) = handle.subscribe(Selector::Detections, |_| {}) {
                    sink.lock().push(sub);
                }
            })
            .unwrap();

        aggregator.apply_batch(&[fuel("1", 50.0, 0)]);
        assert_eq!(nested.lock().len(), 1);
        assert_eq!(aggregator.subscriber_count(), 2);
    }

    #[test]
    fn test_subscribe_racing_batches_ends_on_latest_slice() {
        let aggregator = Aggregator::default();
        let writer = {
            let aggregator = aggregator.clone();
            std::thread::spawn(move || {
                for step in 0..200 {
                    aggregator.apply_batch(&[fuel("1", f64::from(step) / 2.0, i64::from(step))]);
                }
            })
        };

        let mut streams = Vec::new();
        for _ in 0..256 {
            if writer.is_finished() {
                break;
            }
            streams.push(aggregator.subscribe_channel("unit:1".parse().unwrap()).unwrap());
        }
        writer.join().unwrap();
        streams.push(aggregator.subscribe_channel("unit:1".parse().unwrap()).unwrap());

        let expected = Selector::Unit(UnitId::new("1")).select(&aggregator.snapshot());
        for (_subscription, mut rx) in streams {
            let mut last = None;
            while let Ok(slice) = rx.try_recv() {
                last = Some(slice);
            }
            assert_eq!(last.as_ref(), Some(&expected));
        }
    }
}
