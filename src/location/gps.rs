//! Device position readings.
//!
//! [`PositionProvider`] mirrors the two modes a device geolocation API offers:
//! a one-shot read and a continuous watch. [`Gpsd`] reads fixes from a local
//! gpsd daemon over its JSON protocol; [`NoDevice`] is used when GPS is
//! turned off in the config.

use crate::models::Coordinate;
use serde::Deserialize;
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    Unavailable,
    #[error("timed out waiting for a position fix")]
    Timeout,
    #[error("geolocation not supported")]
    Unsupported,
}

/// Options for every position request.
///
/// `maximum_age` of zero means a cached fix must never be returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl PositionOptions {
    /// High accuracy, no caching, bounded by `timeout`.
    pub fn fresh(timeout: Duration) -> Self {
        Self {
            high_accuracy: true,
            timeout,
            maximum_age: Duration::ZERO,
        }
    }
}

pub type PositionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Coordinate, PositionError>> + Send + 'a>>;

/// A running continuous watch. Dropping it stops the underlying subscription.
pub struct PositionWatch {
    rx: mpsc::Receiver<Result<Coordinate, PositionError>>,
    task: Option<JoinHandle<()>>,
}

impl PositionWatch {
    pub fn new(rx: mpsc::Receiver<Result<Coordinate, PositionError>>) -> Self {
        Self { rx, task: None }
    }

    fn with_task(rx: mpsc::Receiver<Result<Coordinate, PositionError>>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Next reading, or `None` once the source has shut down.
    pub async fn next(&mut self) -> Option<Result<Coordinate, PositionError>> {
        self.rx.recv().await
    }
}

impl Drop for PositionWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub trait PositionProvider: Send + Sync + 'static {
    /// A single fresh fix.
    fn current_position(&self, options: PositionOptions) -> PositionFuture<'_>;

    /// Continuous fixes until the returned watch is dropped or reports an error.
    fn watch_position(&self, options: PositionOptions) -> PositionWatch;
}

/// Stand-in for hosts without a positioning device.
pub struct NoDevice;

impl PositionProvider for NoDevice {
    fn current_position(&self, _options: PositionOptions) -> PositionFuture<'_> {
        Box::pin(async { Err(PositionError::Unsupported) })
    }

    fn watch_position(&self, _options: PositionOptions) -> PositionWatch {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(Err(PositionError::Unsupported));
        PositionWatch::new(rx)
    }
}

/// Reads fixes from gpsd (<https://gpsd.io>).
///
/// gpsd always reports the best fix the receiver has, so `high_accuracy`
/// needs no translation. Every request opens its own connection and only
/// uses reports produced after it subscribed, which satisfies a zero
/// `maximum_age`.
pub struct Gpsd {
    address: String,
}

impl Gpsd {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl PositionProvider for Gpsd {
    fn current_position(&self, options: PositionOptions) -> PositionFuture<'_> {
        Box::pin(async move {
            let read = async {
                let mut reports = subscribe(&self.address).await?;
                next_fix(&mut reports).await
            };
            match tokio::time::timeout(options.timeout, read).await {
                Ok(result) => result,
                Err(_) => Err(PositionError::Timeout),
            }
        })
    }

    fn watch_position(&self, options: PositionOptions) -> PositionWatch {
        let (tx, rx) = mpsc::channel(8);
        let address = self.address.clone();

        let task = tokio::spawn(async move {
            info!("Starting gpsd watch on {}", address);
            let mut reports = match tokio::time::timeout(options.timeout, subscribe(&address)).await {
                Ok(Ok(reports)) => reports,
                Ok(Err(e)) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                Err(_) => {
                    let _ = tx.send(Err(PositionError::Timeout)).await;
                    return;
                }
            };

            loop {
                let reading = match tokio::time::timeout(options.timeout, next_fix(&mut reports)).await {
                    Ok(reading) => reading,
                    Err(_) => Err(PositionError::Timeout),
                };
                let failed = reading.is_err();
                if tx.send(reading).await.is_err() || failed {
                    break;
                }
            }
        });

        PositionWatch::with_task(rx, task)
    }
}

type Reports = Lines<BufReader<TcpStream>>;

async fn subscribe(address: &str) -> Result<Reports, PositionError> {
    let mut stream = TcpStream::connect(address).await.map_err(|e| {
        debug!("gpsd connect to {} failed: {}", address, e);
        match e.kind() {
            ErrorKind::PermissionDenied => PositionError::PermissionDenied,
            _ => PositionError::Unavailable,
        }
    })?;

    stream
        .write_all(WATCH_COMMAND)
        .await
        .map_err(|_| PositionError::Unavailable)?;

    Ok(BufReader::new(stream).lines())
}

async fn next_fix(reports: &mut Reports) -> Result<Coordinate, PositionError> {
    while let Some(line) = reports
        .next_line()
        .await
        .map_err(|_| PositionError::Unavailable)?
    {
        if let Some(coordinate) = parse_report(&line) {
            return Ok(coordinate);
        }
    }
    // gpsd closed the connection
    Err(PositionError::Unavailable)
}

#[derive(Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Extracts a position from a gpsd `TPV` report with at least a 2D fix.
pub fn parse_report(line: &str) -> Option<Coordinate> {
    let report: Report = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }
    Coordinate::new(report.lat?, report.lon?)
}
