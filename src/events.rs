//! Event types and the main event loop driver for the toilet radar.
//!
//! This module defines the [`Event`] enum (keyboard input, ticks, location
//! updates and results of background requests) and the [`EventHandler`],
//! which runs a background thread that polls crossterm for key events and
//! emits periodic [`Event::Tick`]s. Other tasks (the location manager's
//! callbacks, route and search requests) post into the same channel through
//! [`EventHandler::tx`].

use crate::geocoding::GeocodingResult;
use crate::location::LocationUpdate;
use crate::route::Route;
use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::error;

/// Events processed by the application event loop.
pub enum Event {
    /// Periodic tick used for UI refresh and expiring notices.
    Tick,
    /// User key press from the terminal.
    Input(KeyEvent),
    /// The location manager accepted a new estimate.
    Location(LocationUpdate),
    /// Location acquisition fell back to the default area.
    LocationWarning(String),
    /// Outcome of a "save me" request; the error is already user-facing text.
    Route(Result<Route, String>),
    /// Place search results for the query that was submitted.
    SearchResults(Vec<GeocodingResult>),
}

/// Multiplexes terminal input and ticks into a single event stream.
///
/// The sender ([`tx`](EventHandler::tx)) can be cloned and handed to other
/// tasks, while the receiver is consumed by [`next`](EventHandler::next) in
/// the main loop.
pub struct EventHandler {
    /// Sender for posting events from background tasks.
    pub tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
    /// Creates a new event handler and spawns the input/tick poller.
    ///
    /// crossterm's `poll` blocks, so the poller runs on the blocking pool. It
    /// stops once the receiving side is gone or the terminal stops answering.
    pub fn new(tick_rate_ms: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let event_tx = tx.clone();

        tokio::task::spawn_blocking(move || {
            let tick_rate = Duration::from_millis(tick_rate_ms);
            let mut last_tick = Instant::now();
            loop {
                let timeout = tick_rate
                    .checked_sub(last_tick.elapsed())
                    .unwrap_or(Duration::from_secs(0));

                match event::poll(timeout) {
                    Ok(true) => match event::read() {
                        Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                            if event_tx.send(Event::Input(key)).is_err() {
                                return;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("Terminal read failed: {}", e);
                            return;
                        }
                    },
                    Ok(false) => {}
                    Err(e) => {
                        error!("Terminal poll failed: {}", e);
                        return;
                    }
                }

                if last_tick.elapsed() >= tick_rate {
                    if event_tx.send(Event::Tick).is_err() {
                        return;
                    }
                    last_tick = Instant::now();
                }
            }
        });

        Self { tx, rx }
    }

    /// Receives the next event from the channel.
    ///
    /// Returns `None` when all senders have been dropped.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
