//! In-memory stand-ins for the backend, the positioning device and the IP
//! services, shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use toilet_radar::api::{
    BackendFuture, DeterministicParams, FetchError, InViewParams, NearestParams, ToiletBackend,
};
use toilet_radar::location::gps::{
    PositionError, PositionFuture, PositionOptions, PositionProvider, PositionWatch,
};
use toilet_radar::location::ip::{IpLookup, LookupFuture};
use toilet_radar::models::{Coordinate, NearestToilet, Toilet, Viewport};

pub fn coord(lat: f64, lng: f64) -> Coordinate {
    Coordinate::new(lat, lng).unwrap()
}

pub fn toilet(id: &str, lat: f64, lng: f64) -> Toilet {
    Toilet {
        id: id.to_string(),
        coordinate: coord(lat, lng),
        name: Some(format!("Toilet {}", id)),
        address: None,
        accessible: None,
        is_free: None,
        kind: None,
        status: None,
        open_hours: None,
        notes: None,
        city: None,
    }
}

pub fn viewport(lat: f64, lng: f64, zoom: u8) -> Viewport {
    Viewport::new(coord(lat, lng), zoom, 1280, 800)
}

/// One backend call as the fake saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Nearest(NearestParams),
    Deterministic(DeterministicParams),
    InView(InViewParams),
    Range(String, InViewParams),
}

/// A canned answer: wait `delay`, then succeed with rows or fail with a status.
#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub delay: Duration,
    pub result: Result<T, u16>,
}

impl<T> Reply<T> {
    pub fn ok(rows: T) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(rows),
        }
    }

    pub fn fail(status: u16) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(status),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Backend whose answers are queued per endpoint. An endpoint with nothing
/// queued answers immediately with no rows.
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    nearest: Mutex<VecDeque<Reply<Vec<NearestToilet>>>>,
    deterministic: Mutex<VecDeque<Reply<Vec<Toilet>>>>,
    in_view: Mutex<VecDeque<Reply<Vec<Toilet>>>>,
    tables: Mutex<HashMap<String, VecDeque<Reply<Vec<Toilet>>>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_nearest(&self, reply: Reply<Vec<NearestToilet>>) {
        self.nearest.lock().unwrap().push_back(reply);
    }

    pub fn queue_deterministic(&self, reply: Reply<Vec<Toilet>>) {
        self.deterministic.lock().unwrap().push_back(reply);
    }

    pub fn queue_in_view(&self, reply: Reply<Vec<Toilet>>) {
        self.in_view.lock().unwrap().push_back(reply);
    }

    pub fn queue_table(&self, table: &str, reply: Reply<Vec<Toilet>>) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn deterministic_calls(&self) -> Vec<DeterministicParams> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Deterministic(params) => Some(params),
                _ => None,
            })
            .collect()
    }

    fn answer<T: Send + 'static>(&self, call: Call, reply: Option<Reply<T>>, empty: T) -> BackendFuture<'_, T> {
        self.calls.lock().unwrap().push(call);
        let Reply { delay, result } = reply.unwrap_or_else(|| Reply::ok(empty));
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result.map_err(|status| FetchError::Backend {
                status,
                message: "scripted failure".to_string(),
            })
        })
    }
}

impl ToiletBackend for FakeBackend {
    fn find_nearest_toilets(&self, params: NearestParams) -> BackendFuture<'_, Vec<NearestToilet>> {
        let reply = self.nearest.lock().unwrap().pop_front();
        self.answer(Call::Nearest(params), reply, Vec::new())
    }

    fn toilets_deterministic(&self, params: DeterministicParams) -> BackendFuture<'_, Vec<Toilet>> {
        let reply = self.deterministic.lock().unwrap().pop_front();
        self.answer(Call::Deterministic(params), reply, Vec::new())
    }

    fn toilets_in_view(&self, params: InViewParams) -> BackendFuture<'_, Vec<Toilet>> {
        let reply = self.in_view.lock().unwrap().pop_front();
        self.answer(Call::InView(params), reply, Vec::new())
    }

    fn toilets_in_range(&self, table: String, params: InViewParams) -> BackendFuture<'_, Vec<Toilet>> {
        let reply = self
            .tables
            .lock()
            .unwrap()
            .get_mut(&table)
            .and_then(VecDeque::pop_front);
        self.answer(Call::Range(table, params), reply, Vec::new())
    }
}

pub type Reading = Result<Coordinate, PositionError>;

/// Positioning device driven by the test.
///
/// Each `watch_position` call takes the next receiver handed out by
/// [`add_watch`](FakeGps::add_watch); with none left the watch fails right
/// away. Single reads pop queued answers and time out when the queue is empty.
#[derive(Default)]
pub struct FakeGps {
    watches: Mutex<VecDeque<mpsc::Receiver<Reading>>>,
    reads: Mutex<VecDeque<(Duration, Reading)>>,
    watch_count: AtomicUsize,
    read_count: AtomicUsize,
}

impl FakeGps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Scripts the next watch; readings sent on the returned sender reach it.
    pub fn add_watch(&self) -> mpsc::Sender<Reading> {
        let (tx, rx) = mpsc::channel(16);
        self.watches.lock().unwrap().push_back(rx);
        tx
    }

    pub fn queue_read(&self, delay: Duration, reading: Reading) {
        self.reads.lock().unwrap().push_back((delay, reading));
    }

    pub fn watches_started(&self) -> usize {
        self.watch_count.load(Ordering::SeqCst)
    }

    pub fn reads_made(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }
}

impl PositionProvider for FakeGps {
    fn current_position(&self, _options: PositionOptions) -> PositionFuture<'_> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        let (delay, reading) = self
            .reads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((Duration::ZERO, Err(PositionError::Timeout)));
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            reading
        })
    }

    fn watch_position(&self, _options: PositionOptions) -> PositionWatch {
        self.watch_count.fetch_add(1, Ordering::SeqCst);
        match self.watches.lock().unwrap().pop_front() {
            Some(rx) => PositionWatch::new(rx),
            None => {
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.try_send(Err(PositionError::Unavailable));
                PositionWatch::new(rx)
            }
        }
    }
}

/// IP geolocation with queued answers; an empty queue resolves to nothing.
#[derive(Default)]
pub struct FakeIp {
    replies: Mutex<VecDeque<(Duration, Option<Coordinate>)>>,
    calls: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl FakeIp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue(&self, delay: Duration, coordinate: Option<Coordinate>) {
        self.replies.lock().unwrap().push_back((delay, coordinate));
    }

    pub fn lookups(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Lookups that saw their token fire before answering.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Lookups that ran until their scripted answer.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl IpLookup for FakeIp {
    fn locate(&self, cancel: CancellationToken) -> LookupFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, coordinate) = self.replies.lock().unwrap().pop_front().unwrap_or((Duration::ZERO, None));
        let cancelled = Arc::clone(&self.cancelled);
        let completed = Arc::clone(&self.completed);
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                    None
                }
                _ = tokio::time::sleep(delay) => {
                    completed.fetch_add(1, Ordering::SeqCst);
                    coordinate
                }
            }
        })
    }
}
