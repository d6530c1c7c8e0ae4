//! End-to-end behavior of ingest, store, hub and query working together.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use moodwatch::clock::ManualClock;
use moodwatch::ingest::ChannelTicker;
use moodwatch::query::HistoryParams;
use moodwatch::store::{ListQuery, SortOrder, Window};
use moodwatch::{
    ChannelSink, CycleError, CycleOutcome, DeliveryError, Hub, IngestConfig, IngestLoop,
    QueryService, SampleStore, Sink, SqliteStore,
};
use moodwatch_adapters::{FetchError, ReplaySource};
use moodwatch_types::{SampleEvent, Status};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<SampleEvent>>,
}

impl Recorder {
    fn seen(&self) -> Vec<(f64, Status)> {
        self.events.lock().iter().map(|e| (e.value, e.status)).collect()
    }
}

impl Sink for Recorder {
    fn deliver(&self, event: &SampleEvent) -> Result<(), DeliveryError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

struct Pipeline {
    clock: Arc<ManualClock>,
    store: Arc<SqliteStore>,
    hub: Arc<Hub>,
}

impl Pipeline {
    fn open(path: &std::path::Path) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 0).unwrap(),
        ));
        let store = Arc::new(SqliteStore::open(path, clock.clone()).unwrap());
        let hub = Arc::new(Hub::new(store.clone(), clock.clone()));
        Self { clock, store, hub }
    }

    fn ingest(&self, source: ReplaySource) -> IngestLoop {
        IngestLoop::new(
            Arc::new(source),
            self.store.clone(),
            self.hub.clone(),
            IngestConfig::default(),
        )
    }

    fn stored(&self) -> Vec<(f64, Status)> {
        let (items, _) = self
            .store
            .list(&ListQuery {
                page_size: 1000,
                order: SortOrder::Asc,
                ..Default::default()
            })
            .unwrap();
        items.iter().map(|s| (s.value, s.status)).collect()
    }
}

#[tokio::test]
async fn failed_then_repeated_values_store_two_samples() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::open(&dir.path().join("mood.db"));
    let mut ingest = pipeline.ingest(ReplaySource::new(vec![
        Err(FetchError::Connection("reset".into())),
        Ok("50.0".into()),
        Ok("50.0".into()),
        Ok("55.0".into()),
    ]));

    assert!(matches!(
        ingest.run_cycle().await,
        Err(CycleError::Fetch(_))
    ));

    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    pipeline.hub.subscribe(first.clone()).unwrap();
    pipeline.hub.subscribe(second.clone()).unwrap();

    for _ in 0..3 {
        ingest.run_cycle().await.unwrap();
        pipeline.clock.advance(chrono::Duration::seconds(15));
    }

    assert_eq!(
        pipeline.stored(),
        vec![(50.0, Status::Same), (55.0, Status::Up)]
    );

    let expected = vec![
        (50.0, Status::Same), // sentinel
        (50.0, Status::Same),
        (55.0, Status::Up),
    ];
    assert_eq!(first.seen(), expected);
    assert_eq!(second.seen(), expected);
}

#[tokio::test]
async fn stored_series_never_repeats_a_value() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::open(&dir.path().join("mood.db"));
    let mut ingest = pipeline.ingest(ReplaySource::new(vec![
        Ok("41".into()),
        Ok("41".into()),
        Err(FetchError::Timeout),
        Ok("42".into()),
        Ok("oops".into()),
        Ok("42".into()),
        Ok("40".into()),
        Ok("40".into()),
        Ok("1,041.5".into()),
    ]));

    for _ in 0..9 {
        let _ = ingest.run_cycle().await;
        pipeline.clock.advance(chrono::Duration::seconds(15));
    }

    let stored = pipeline.stored();
    assert_eq!(
        stored,
        vec![
            (41.0, Status::Same),
            (42.0, Status::Up),
            (40.0, Status::Down),
            (1041.5, Status::Up),
        ]
    );
    assert!(stored.windows(2).all(|w| w[0].0 != w[1].0));
    assert_eq!(ingest.reference(), Some(1041.5));
}

#[tokio::test]
async fn restart_starts_a_fresh_reference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mood.db");

    {
        let pipeline = Pipeline::open(&path);
        let mut ingest = pipeline.ingest(ReplaySource::values(["48", "52"]));
        ingest.run_cycle().await.unwrap();
        ingest.run_cycle().await.unwrap();
    }

    let pipeline = Pipeline::open(&path);
    let mut ingest = pipeline.ingest(ReplaySource::values(["52"]));
    let outcome = ingest.run_cycle().await.unwrap();

    assert!(matches!(outcome, CycleOutcome::Accepted(ref s) if s.status == Status::Same));
    assert_eq!(pipeline.store.count(Window::all_time()).unwrap(), 3);
}

#[tokio::test]
async fn ticking_loop_feeds_subscribers_and_queries() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::open(&dir.path().join("mood.db"));
    let query = QueryService::new(pipeline.store.clone(), pipeline.clock.clone());

    let (sink, mut events) = ChannelSink::channel(8);
    pipeline.hub.subscribe(Arc::new(sink)).unwrap();
    assert_eq!(events.recv().await.unwrap().value, 50.0);

    let (tick, ticker) = ChannelTicker::channel();
    let handle = pipeline
        .ingest(ReplaySource::values(["60", "58.5"]))
        .start_with(ticker);

    for expected in [(60.0, Status::Same), (58.5, Status::Down)] {
        tick.send(()).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((event.value, event.status), expected);
    }
    handle.stop().await.unwrap();

    let page = query.history(&HistoryParams::default()).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items[0].value, 58.5);

    let stats = query.stats().unwrap();
    assert_eq!(stats.all_time.count, 2);
    assert_eq!(stats.all_time.max, 60.0);
    assert_eq!(stats.last_24h, 2);
}
