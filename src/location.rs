//! User location tracking for the toilet radar.
//!
//! The [`LocationManager`] keeps one best-effort [`LocationEstimate`] current
//! using three sources of decreasing quality: a continuous GPS watch, a
//! one-off IP lookup, and a fixed city-level default. While degraded it
//! periodically probes GPS and silently upgrades once a fix comes in.
//!
//! All decisions live in [`LocationState`], a plain reducer that turns
//! [`LocationEvent`]s into [`Effect`]s. The async driver started by
//! [`LocationManager::start`] only performs those effects and feeds the
//! results back as new events, one at a time.

pub mod gps;
pub mod ip;

use crate::config::LocationConfig;
use crate::models::{Coordinate, LocationEstimate, Source};
use gps::{PositionError, PositionOptions, PositionProvider};
use ip::IpLookup;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const FALLBACK_MESSAGE: &str =
    "Could not determine your location. Showing the default area instead.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the first GPS reading.
    Initial,
    GpsActive,
    /// GPS failed; running on IP or the default until a probe succeeds.
    Degraded,
}

/// An accepted change of the current estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationUpdate {
    pub estimate: LocationEstimate,
    /// Set when a periodic probe brought GPS back.
    pub upgraded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    WatchFix { watch: u64, coordinate: Coordinate },
    WatchFailed { watch: u64, error: PositionError },
    IpResolved { lookup: u64, coordinate: Option<Coordinate> },
    ProbeFix(Coordinate),
    ProbeFailed(PositionError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Publish(LocationUpdate),
    Warn(String),
    StartWatch(u64),
    StopWatch,
    LookupIp(u64),
    /// Abandons the pending IP lookup, if any.
    CancelLookup,
    StartProbe,
    StopProbe,
}

/// The location state machine.
///
/// Watches and IP lookups are numbered so that readings from a watch that was
/// already stopped, or an IP answer from a superseded lookup, are recognised
/// and dropped.
#[derive(Debug, Clone)]
pub struct LocationState {
    phase: Phase,
    current: Option<LocationEstimate>,
    fallback: Coordinate,
    watch_seq: u64,
    active_watch: Option<u64>,
    lookup_seq: u64,
}

impl LocationState {
    pub fn new(fallback: Coordinate) -> Self {
        Self {
            phase: Phase::Initial,
            current: None,
            fallback,
            watch_seq: 0,
            active_watch: None,
            lookup_seq: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current(&self) -> Option<LocationEstimate> {
        self.current
    }

    pub fn start(&mut self) -> Vec<Effect> {
        vec![self.begin_watch()]
    }

    pub fn apply(&mut self, event: LocationEvent) -> Vec<Effect> {
        match event {
            LocationEvent::WatchFix { watch, coordinate } => {
                if self.active_watch != Some(watch) {
                    debug!("Dropping fix from stopped watch #{}", watch);
                    return Vec::new();
                }
                self.phase = Phase::GpsActive;
                vec![self.publish(coordinate, Source::Gps, false)]
            }
            LocationEvent::WatchFailed { watch, error } => {
                if self.active_watch != Some(watch) {
                    return Vec::new();
                }
                warn!("GPS watch failed: {}. Falling back to IP geolocation.", error);
                self.phase = Phase::Degraded;
                self.active_watch = None;
                self.lookup_seq += 1;
                vec![
                    Effect::StopWatch,
                    Effect::LookupIp(self.lookup_seq),
                    Effect::StartProbe,
                ]
            }
            LocationEvent::IpResolved { lookup, coordinate } => {
                if lookup != self.lookup_seq || self.phase != Phase::Degraded {
                    debug!("Dropping stale IP lookup #{}", lookup);
                    return Vec::new();
                }
                match coordinate {
                    Some(coordinate) => vec![self.publish(coordinate, Source::Ip, false)],
                    None => {
                        warn!("All geolocation methods failed, using default location.");
                        vec![
                            self.publish(self.fallback, Source::Default, false),
                            Effect::Warn(FALLBACK_MESSAGE.to_string()),
                        ]
                    }
                }
            }
            LocationEvent::ProbeFix(coordinate) => {
                if self.phase != Phase::Degraded {
                    return Vec::new();
                }
                info!("GPS available again, upgrading location.");
                self.phase = Phase::GpsActive;
                vec![
                    Effect::StopProbe,
                    Effect::CancelLookup,
                    self.publish(coordinate, Source::Gps, true),
                    self.begin_watch(),
                ]
            }
            LocationEvent::ProbeFailed(error) => {
                debug!("GPS probe failed: {}", error);
                Vec::new()
            }
        }
    }

    fn begin_watch(&mut self) -> Effect {
        self.watch_seq += 1;
        self.active_watch = Some(self.watch_seq);
        Effect::StartWatch(self.watch_seq)
    }

    fn publish(&mut self, coordinate: Coordinate, source: Source, upgraded: bool) -> Effect {
        let estimate = LocationEstimate::new(coordinate, source);
        self.current = Some(estimate);
        Effect::Publish(LocationUpdate { estimate, upgraded })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocationSettings {
    pub fallback: Coordinate,
    pub probe_interval: Duration,
    pub gps_timeout: Duration,
    pub watch_timeout: Duration,
}

impl LocationSettings {
    pub fn from_config(config: &LocationConfig) -> Self {
        Self {
            fallback: config.default_anchor(),
            probe_interval: Duration::from_secs(config.probe_interval_seconds.max(1)),
            gps_timeout: Duration::from_millis(config.gps_timeout_ms),
            watch_timeout: Duration::from_millis(config.watch_timeout_ms),
        }
    }
}

pub struct LocationManager {
    gps: Arc<dyn PositionProvider>,
    ip: Arc<dyn IpLookup>,
    settings: LocationSettings,
}

impl LocationManager {
    pub fn new(gps: Arc<dyn PositionProvider>, ip: Arc<dyn IpLookup>, settings: LocationSettings) -> Self {
        Self { gps, ip, settings }
    }

    /// Begins acquisition on the current tokio runtime.
    ///
    /// `on_update` sees every accepted estimate. `on_error` receives an
    /// advisory message when both GPS and IP failed and the default location
    /// is in use. Both run on the manager's own task, so they should only hand
    /// the value off (e.g. into a channel).
    pub fn start<U, E>(self, on_update: U, on_error: E) -> LocationHandle
    where
        U: FnMut(LocationUpdate) + Send + 'static,
        E: FnMut(String) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(on_update, on_error, cancel.clone()));
        LocationHandle {
            cancel,
            task: Some(task),
        }
    }

    async fn run<U, E>(self, mut on_update: U, mut on_error: E, cancel: CancellationToken)
    where
        U: FnMut(LocationUpdate) + Send + 'static,
        E: FnMut(String) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = LocationState::new(self.settings.fallback);
        let mut watch: Option<TaskGuard> = None;
        let mut probe: Option<TaskGuard> = None;
        let mut lookup: Option<CancellationToken> = None;

        let mut effects = state.start();
        loop {
            for effect in effects.drain(..) {
                match effect {
                    Effect::Publish(update) => on_update(update),
                    Effect::Warn(message) => on_error(message),
                    Effect::StartWatch(id) => watch = Some(self.spawn_watch(id, tx.clone())),
                    Effect::StopWatch => watch = None,
                    Effect::LookupIp(id) => {
                        if let Some(previous) = lookup.take() {
                            previous.cancel();
                        }
                        let token = cancel.child_token();
                        self.spawn_lookup(id, tx.clone(), token.clone());
                        lookup = Some(token);
                    }
                    Effect::CancelLookup => {
                        if let Some(token) = lookup.take() {
                            debug!("Cancelling pending IP lookup");
                            token.cancel();
                        }
                    }
                    Effect::StartProbe => probe = Some(self.spawn_probe(tx.clone())),
                    Effect::StopProbe => probe = None,
                }
            }

            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            effects = state.apply(event);
        }

        drop(watch);
        drop(probe);
        info!("Location manager stopped.");
    }

    fn spawn_watch(&self, id: u64, tx: mpsc::UnboundedSender<LocationEvent>) -> TaskGuard {
        let gps = Arc::clone(&self.gps);
        let options = PositionOptions::fresh(self.settings.watch_timeout);
        TaskGuard(tokio::spawn(async move {
            let mut readings = gps.watch_position(options);
            while let Some(reading) = readings.next().await {
                let (event, failed) = match reading {
                    Ok(coordinate) => (LocationEvent::WatchFix { watch: id, coordinate }, false),
                    Err(error) => (LocationEvent::WatchFailed { watch: id, error }, true),
                };
                if tx.send(event).is_err() || failed {
                    return;
                }
            }
            // A watch that ends without reporting is as good as unavailable.
            let _ = tx.send(LocationEvent::WatchFailed {
                watch: id,
                error: PositionError::Unavailable,
            });
        }))
    }

    fn spawn_lookup(&self, id: u64, tx: mpsc::UnboundedSender<LocationEvent>, cancel: CancellationToken) {
        let ip = Arc::clone(&self.ip);
        tokio::spawn(async move {
            let coordinate = ip.locate(cancel.clone()).await;
            if !cancel.is_cancelled() {
                let _ = tx.send(LocationEvent::IpResolved { lookup: id, coordinate });
            }
        });
    }

    fn spawn_probe(&self, tx: mpsc::UnboundedSender<LocationEvent>) -> TaskGuard {
        let gps = Arc::clone(&self.gps);
        let period = self.settings.probe_interval;
        let options = PositionOptions::fresh(self.settings.gps_timeout);
        TaskGuard(tokio::spawn(async move {
            info!("Starting periodic GPS checks every {:?}", period);
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let event = match gps.current_position(options).await {
                    Ok(coordinate) => LocationEvent::ProbeFix(coordinate),
                    Err(error) => LocationEvent::ProbeFailed(error),
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
        }))
    }
}

/// Aborts the wrapped task when dropped.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Keeps location tracking alive. Cancelling (or dropping) it stops the GPS
/// watch, the periodic probe and any pending IP lookup.
pub struct LocationHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LocationHandle {
    /// Stops tracking. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels and waits for the manager task to release everything it holds.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LocationHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
