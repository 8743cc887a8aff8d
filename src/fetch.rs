//! Loading the toilets for the visible part of the map.
//!
//! [`run_chain`] tries three backend strategies in order and stops at the
//! first one that answers, even with an empty list. [`FetchController`] owns
//! the published toilet set: it debounces viewport and location changes,
//! cancels the request it is about to replace, and only lets the newest
//! request write its result.

use crate::api::{BackendFuture, DeterministicParams, FetchError, InViewParams, ToiletBackend};
use crate::config::BackendConfig;
use crate::models::{LocationEstimate, Toilet, Viewport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const EXHAUSTED_MESSAGE: &str = "Could not load toilets for this area. Showing the last known results.";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub debounce: Duration,
    pub request_timeout: Duration,
    pub zoom_threshold: u8,
    pub viewport_limit: u32,
    pub in_view_limit: u32,
    pub primary_table: String,
    pub legacy_table: String,
    pub refetch_distance_meters: f64,
}

impl FetchSettings {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            debounce: config.debounce(),
            request_timeout: config.request_timeout(),
            zoom_threshold: config.zoom_threshold,
            viewport_limit: config.viewport_limit,
            in_view_limit: config.in_view_limit,
            primary_table: config.primary_table.clone(),
            legacy_table: config.legacy_table.clone(),
            refetch_distance_meters: config.refetch_distance_meters,
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from_config(&BackendConfig::default())
    }
}

/// Which strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Deterministic,
    InView,
    PrimaryTable,
    LegacyTable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Loaded { toilets: Vec<Toilet>, tier: Tier },
    Exhausted(String),
    Cancelled,
}

async fn attempt<T>(
    cancel: &CancellationToken,
    timeout: Duration,
    call: BackendFuture<'_, T>,
) -> Result<T, FetchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = tokio::time::timeout(timeout, call) => {
            result.unwrap_or_else(|_| Err(FetchError::Timeout(timeout)))
        }
    }
}

/// Runs the fallback chain for one viewport.
///
/// Tier 1 is the server-side sampled query, tier 2 the bounding box RPC,
/// tier 3 a direct range read on the primary table and then the legacy one.
/// Cancellation ends the chain on the spot, without trying further tiers.
pub async fn run_chain(
    backend: &dyn ToiletBackend,
    viewport: &Viewport,
    location: Option<&LocationEstimate>,
    settings: &FetchSettings,
    cancel: &CancellationToken,
) -> ChainOutcome {
    let timeout = settings.request_timeout;

    let user = location.map(|l| l.coordinate);
    let params = DeterministicParams {
        p_center_lat: viewport.center.lat,
        p_center_lng: viewport.center.lng,
        p_user_lat: user.map(|c| c.lat),
        p_user_lng: user.map(|c| c.lng),
        p_is_zoomed_in: viewport.is_zoomed_in(settings.zoom_threshold),
        result_limit: settings.viewport_limit,
    };
    debug!("Tier 1: deterministic query around {}", viewport.center);
    match attempt(cancel, timeout, backend.toilets_deterministic(params)).await {
        Ok(toilets) => {
            return ChainOutcome::Loaded {
                toilets,
                tier: Tier::Deterministic,
            }
        }
        Err(FetchError::Cancelled) => return ChainOutcome::Cancelled,
        Err(e) => warn!("Deterministic query failed: {}. Trying bounding box.", e),
    }

    let in_view = InViewParams::from_bounds(&viewport.bounds(), settings.in_view_limit);
    debug!("Tier 2: bounding box query {:?}", in_view);
    match attempt(cancel, timeout, backend.toilets_in_view(in_view.clone())).await {
        Ok(toilets) => {
            return ChainOutcome::Loaded {
                toilets,
                tier: Tier::InView,
            }
        }
        Err(FetchError::Cancelled) => return ChainOutcome::Cancelled,
        Err(e) => warn!("Bounding box query failed: {}. Reading tables directly.", e),
    }

    let primary = match attempt(
        cancel,
        timeout,
        backend.toilets_in_range(settings.primary_table.clone(), in_view.clone()),
    )
    .await
    {
        Ok(toilets) if !toilets.is_empty() => {
            return ChainOutcome::Loaded {
                toilets,
                tier: Tier::PrimaryTable,
            }
        }
        Ok(toilets) => {
            debug!("No rows in {}, trying {}", settings.primary_table, settings.legacy_table);
            Some(toilets)
        }
        Err(FetchError::Cancelled) => return ChainOutcome::Cancelled,
        Err(e) => {
            warn!("Range read on {} failed: {}", settings.primary_table, e);
            None
        }
    };

    match attempt(
        cancel,
        timeout,
        backend.toilets_in_range(settings.legacy_table.clone(), in_view),
    )
    .await
    {
        Ok(toilets) => ChainOutcome::Loaded {
            toilets,
            tier: Tier::LegacyTable,
        },
        Err(FetchError::Cancelled) => ChainOutcome::Cancelled,
        Err(e) => {
            warn!("Range read on {} failed: {}", settings.legacy_table, e);
            match primary {
                // The primary table did answer, just with nothing in range.
                Some(toilets) => ChainOutcome::Loaded {
                    toilets,
                    tier: Tier::PrimaryTable,
                },
                None => {
                    error!("Every toilet query failed for viewport around {}", viewport.center);
                    ChainOutcome::Exhausted(EXHAUSTED_MESSAGE.to_string())
                }
            }
        }
    }
}

/// What consumers see of the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchSnapshot {
    pub toilets: Vec<Toilet>,
    pub loading: bool,
    pub error: Option<String>,
    /// Tier that produced `toilets`, `None` before the first load.
    pub tier: Option<Tier>,
    /// Number of fetches started so far.
    pub generation: u64,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Viewport(Viewport),
    Location(LocationEstimate),
    Refresh,
}

/// Owns the toilet set for one map view.
pub struct FetchController {
    triggers: mpsc::UnboundedSender<Trigger>,
    snapshot: watch::Receiver<FetchSnapshot>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FetchController {
    /// Starts the controller and schedules the initial load for `viewport`.
    pub fn spawn(backend: Arc<dyn ToiletBackend>, settings: FetchSettings, viewport: Viewport) -> Self {
        let (triggers, rx) = mpsc::unbounded_channel();
        let (state, snapshot) = watch::channel(FetchSnapshot::default());
        let cancel = CancellationToken::new();

        let worker = Worker {
            backend,
            settings,
            viewport,
            location: None,
            trigger_location: None,
            generation: 0,
            in_flight: None,
            state,
        };
        let task = tokio::spawn(worker.run(rx, cancel.clone()));

        Self {
            triggers,
            snapshot,
            cancel,
            task: Some(task),
        }
    }

    /// The map settled on a new center or zoom.
    pub fn viewport_changed(&self, viewport: Viewport) {
        let _ = self.triggers.send(Trigger::Viewport(viewport));
    }

    pub fn location_changed(&self, estimate: LocationEstimate) {
        let _ = self.triggers.send(Trigger::Location(estimate));
    }

    /// Reloads the current viewport.
    pub fn refresh(&self) {
        let _ = self.triggers.send(Trigger::Refresh);
    }

    pub fn current(&self) -> FetchSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchSnapshot> {
        self.snapshot.clone()
    }

    /// Cancels any in-flight request and stops the controller.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for FetchController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    backend: Arc<dyn ToiletBackend>,
    settings: FetchSettings,
    viewport: Viewport,
    location: Option<LocationEstimate>,
    /// Location as of the last location-triggered fetch.
    trigger_location: Option<LocationEstimate>,
    generation: u64,
    in_flight: Option<CancellationToken>,
    state: watch::Sender<FetchSnapshot>,
}

impl Worker {
    async fn run(mut self, mut triggers: mpsc::UnboundedReceiver<Trigger>, cancel: CancellationToken) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(u64, ChainOutcome)>();
        let debounce = tokio::time::sleep(self.settings.debounce);
        tokio::pin!(debounce);
        // The initial load goes through the same debounce as everything else.
        let mut pending = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => {
                        if self.accept(trigger) {
                            debounce.as_mut().reset(Instant::now() + self.settings.debounce);
                            pending = true;
                        }
                    }
                    None => break,
                },
                _ = &mut debounce, if pending => {
                    pending = false;
                    self.start_fetch(&done_tx, &cancel);
                }
                Some((generation, outcome)) = done_rx.recv() => self.finish(generation, outcome),
            }
        }

        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        debug!("Fetch controller stopped.");
    }

    /// Records the trigger and reports whether it warrants a fetch.
    fn accept(&mut self, trigger: Trigger) -> bool {
        match trigger {
            Trigger::Viewport(viewport) => {
                self.viewport = viewport;
                true
            }
            Trigger::Location(estimate) => {
                self.location = Some(estimate);
                let relevant = match self.trigger_location {
                    None => true,
                    Some(previous) => {
                        previous.source != estimate.source
                            || previous.coordinate.distance_to(&estimate.coordinate)
                                > self.settings.refetch_distance_meters
                    }
                };
                if relevant {
                    self.trigger_location = Some(estimate);
                }
                relevant
            }
            Trigger::Refresh => true,
        }
    }

    fn start_fetch(&mut self, done: &mpsc::UnboundedSender<(u64, ChainOutcome)>, cancel: &CancellationToken) {
        if let Some(previous) = self.in_flight.take() {
            debug!("Cancelling fetch #{}", self.generation);
            previous.cancel();
        }

        self.generation += 1;
        let generation = self.generation;
        let token = cancel.child_token();
        self.in_flight = Some(token.clone());
        self.state.send_modify(|s| {
            s.loading = true;
            s.generation = generation;
        });

        info!(
            "Fetch #{} for zoom {} around {}",
            generation, self.viewport.zoom, self.viewport.center
        );

        let backend = Arc::clone(&self.backend);
        let settings = self.settings.clone();
        let viewport = self.viewport;
        let location = self.location;
        let done = done.clone();
        tokio::spawn(async move {
            let outcome = run_chain(backend.as_ref(), &viewport, location.as_ref(), &settings, &token).await;
            if !token.is_cancelled() {
                let _ = done.send((generation, outcome));
            }
        });
    }

    fn finish(&mut self, generation: u64, outcome: ChainOutcome) {
        let current = self.in_flight.as_ref().is_some_and(|t| !t.is_cancelled());
        if generation != self.generation || !current {
            debug!("Discarding result of superseded fetch #{}", generation);
            return;
        }
        self.in_flight = None;

        match outcome {
            ChainOutcome::Loaded { toilets, tier } => {
                info!("Fetch #{} loaded {} toilets via {:?}", generation, toilets.len(), tier);
                self.state.send_modify(|s| {
                    s.toilets = toilets;
                    s.tier = Some(tier);
                    s.error = None;
                    s.loading = false;
                });
            }
            ChainOutcome::Exhausted(message) => {
                self.state.send_modify(|s| {
                    s.error = Some(message);
                    s.loading = false;
                });
            }
            ChainOutcome::Cancelled => {}
        }
    }
}
