//! Live distribution of accepted samples.
//!
//! The hub keeps a registry of subscriber sinks. A new subscriber first gets
//! the most recent stored sample (or the sentinel when the store is empty),
//! then every sample published after that, in order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moodwatch_types::{Sample, SampleEvent};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::DeliveryError;
use crate::store::SampleStore;

/// A subscriber endpoint.
///
/// `deliver` must not block: it either queues the event or reports why it
/// couldn't. A failed delivery removes the sink from the hub.
pub trait Sink: Send + Sync {
    fn deliver(&self, event: &SampleEvent) -> Result<(), DeliveryError>;
}

/// Sink backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SampleEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SampleEvent>) -> Self {
        Self { tx }
    }

    /// A sink and the receiving end of its queue.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<SampleEvent>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self::new(tx), rx)
    }
}

impl Sink for ChannelSink {
    fn deliver(&self, event: &SampleEvent) -> Result<(), DeliveryError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Identifies a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Point-in-time hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Subscribers ever registered.
    pub subscribed: u64,
    /// Subscribers currently registered.
    pub active: u64,
    /// Events handed to sinks, including initial events.
    pub delivered: u64,
    /// Deliveries that failed and dropped their sink.
    pub failed: u64,
}

struct Subscriber {
    sink: Arc<dyn Sink>,
    /// Id of the sample sent as the initial event, if any.
    seen_through: Option<i64>,
}

/// Fan-out point between the ingestion loop and live subscribers.
pub struct Hub {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    store: Arc<dyn SampleStore>,
    clock: Arc<dyn Clock>,
    subscribed: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Hub {
    pub fn new(store: Arc<dyn SampleStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            store,
            clock,
            subscribed: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Register a sink, sending it the current value first.
    ///
    /// The initial event is delivered while the registry is write-locked, so
    /// no publish can slip in ahead of it. Reads the store; call from a
    /// blocking context.
    pub fn subscribe(&self, sink: Arc<dyn Sink>) -> Result<SubscriptionHandle, DeliveryError> {
        let mut subscribers = self.subscribers.write();

        let latest = match self.store.latest() {
            Ok(latest) => latest,
            Err(e) => {
                warn!(error = %e, "Could not read latest sample for new subscriber");
                None
            }
        };
        let initial = latest
            .as_ref()
            .map(Sample::event)
            .unwrap_or_else(|| SampleEvent::sentinel(self.clock.now()));

        if let Err(e) = sink.deliver(&initial) {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        subscribers.insert(
            id,
            Subscriber {
                sink,
                seen_through: latest.map(|s| s.id),
            },
        );
        self.subscribed.fetch_add(1, Ordering::Relaxed);
        debug!(subscriber = id, active = subscribers.len(), "Subscriber registered");

        Ok(SubscriptionHandle { id })
    }

    /// Remove a subscriber. Unknown or already removed handles are ignored.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if self.subscribers.write().remove(&handle.id).is_some() {
            debug!(subscriber = handle.id, "Subscriber removed");
        }
    }

    /// Deliver a sample to every registered sink.
    ///
    /// Sinks that fail are dropped. Returns how many sinks accepted it.
    pub fn publish(&self, sample: &Sample) -> usize {
        let event = sample.event();
        let mut dead = Vec::new();
        let mut accepted = 0;

        {
            let subscribers = self.subscribers.read();
            for (id, subscriber) in subscribers.iter() {
                // Already sent as this subscriber's initial event.
                if subscriber.seen_through.is_some_and(|seen| seen >= sample.id) {
                    continue;
                }
                match subscriber.sink.deliver(&event) {
                    Ok(()) => accepted += 1,
                    Err(e) => {
                        debug!(subscriber = id, error = %e, "Delivery failed");
                        dead.push(*id);
                    }
                }
            }
        }

        self.delivered.fetch_add(accepted as u64, Ordering::Relaxed);
        if !dead.is_empty() {
            self.failed.fetch_add(dead.len() as u64, Ordering::Relaxed);
            let mut subscribers = self.subscribers.write();
            for id in dead {
                subscribers.remove(&id);
            }
        }

        accepted
    }

    /// Drop every sink. Channel-backed subscribers see their queue close.
    pub fn close_all(&self) {
        let mut subscribers = self.subscribers.write();
        let count = subscribers.len();
        subscribers.clear();
        debug!(count, "Closed all subscribers");
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribed: self.subscribed.load(Ordering::Relaxed),
            active: self.subscriber_count() as u64,
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::SqliteStore;
    use chrono::{TimeZone, Utc};
    use moodwatch_types::{Status, SENTINEL_VALUE};
    use parking_lot::Mutex;

    /// Records every event it is given.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub events: Mutex<Vec<SampleEvent>>,
    }

    impl RecordingSink {
        pub fn values(&self) -> Vec<(f64, Status)> {
            self.events.lock().iter().map(|e| (e.value, e.status)).collect()
        }
    }

    impl Sink for RecordingSink {
        fn deliver(&self, event: &SampleEvent) -> Result<(), DeliveryError> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    /// Always refuses delivery.
    struct ClosedSink;

    impl Sink for ClosedSink {
        fn deliver(&self, _event: &SampleEvent) -> Result<(), DeliveryError> {
            Err(DeliveryError::Closed)
        }
    }

    fn setup() -> (Arc<ManualClock>, Arc<SqliteStore>, Hub) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(SqliteStore::open_in_memory(clock.clone()).unwrap());
        let hub = Hub::new(store.clone(), clock.clone());
        (clock, store, hub)
    }

    #[test]
    fn test_subscribe_to_empty_store_gets_sentinel() {
        let (clock, _store, hub) = setup();
        let recorder = Arc::new(RecordingSink::default());

        hub.subscribe(recorder.clone()).unwrap();

        let events = recorder.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], SampleEvent::sentinel(clock.now()));
        assert_eq!(events[0].value, SENTINEL_VALUE);
    }

    #[test]
    fn test_subscribe_gets_latest_then_published() {
        let (_clock, store, hub) = setup();
        store.append(50.0, Status::Same).unwrap();
        let recorder = Arc::new(RecordingSink::default());

        hub.subscribe(recorder.clone()).unwrap();
        let next = store.append(55.0, Status::Up).unwrap();
        assert_eq!(hub.publish(&next), 1);

        assert_eq!(
            recorder.values(),
            vec![(50.0, Status::Same), (55.0, Status::Up)]
        );
    }

    #[test]
    fn test_sample_sent_as_initial_is_not_repeated() {
        let (_clock, store, hub) = setup();
        let sample = store.append(50.0, Status::Same).unwrap();
        let recorder = Arc::new(RecordingSink::default());

        hub.subscribe(recorder.clone()).unwrap();
        assert_eq!(hub.publish(&sample), 0);

        assert_eq!(recorder.values(), vec![(50.0, Status::Same)]);
    }

    #[test]
    fn test_failing_sink_is_removed() {
        let (_clock, store, hub) = setup();
        let recorder = Arc::new(RecordingSink::default());
        let (sink, rx) = ChannelSink::channel(4);

        hub.subscribe(recorder.clone()).unwrap();
        hub.subscribe(Arc::new(sink)).unwrap();
        assert_eq!(hub.subscriber_count(), 2);

        drop(rx);
        let sample = store.append(51.0, Status::Same).unwrap();
        assert_eq!(hub.publish(&sample), 1);

        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(recorder.events.lock().len(), 2);
        assert_eq!(hub.stats().failed, 1);
    }

    #[test]
    fn test_rejecting_initial_event_does_not_register() {
        let (_clock, _store, hub) = setup();
        let result = hub.subscribe(Arc::new(ClosedSink));
        assert_eq!(result, Err(DeliveryError::Closed));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_full_channel_reports_full() {
        let (sink, _rx) = ChannelSink::channel(1);
        let event = SampleEvent::sentinel(Utc::now());
        assert!(sink.deliver(&event).is_ok());
        assert_eq!(sink.deliver(&event), Err(DeliveryError::Full));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let (_clock, store, hub) = setup();
        let recorder = Arc::new(RecordingSink::default());
        let handle = hub.subscribe(recorder.clone()).unwrap();

        hub.unsubscribe(&handle);
        hub.unsubscribe(&handle);

        let sample = store.append(60.0, Status::Same).unwrap();
        hub.publish(&sample);
        assert_eq!(recorder.events.lock().len(), 1);
    }

    #[test]
    fn test_close_all_closes_channels() {
        let (_clock, _store, hub) = setup();
        let (sink, mut rx) = ChannelSink::channel(4);
        hub.subscribe(Arc::new(sink)).unwrap();

        hub.close_all();

        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_stats() {
        let (_clock, store, hub) = setup();
        hub.subscribe(Arc::new(RecordingSink::default())).unwrap();
        hub.subscribe(Arc::new(RecordingSink::default())).unwrap();
        let sample = store.append(40.0, Status::Same).unwrap();
        hub.publish(&sample);

        assert_eq!(
            hub.stats(),
            HubStats {
                subscribed: 2,
                active: 2,
                delivered: 4,
                failed: 0,
            }
        );
    }
}
