//! Approximate location from the public IP address.
//!
//! Several free lookup services are tried in a fixed order. Every failure
//! (timeout, network error, non-success status, malformed body) moves on to
//! the next service, and running out of services is simply "no location".

use crate::models::Coordinate;
use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
enum LookupError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("status {0}")]
    Status(u16),
    #[error("no usable coordinates in response")]
    Malformed,
}

pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = Option<Coordinate>> + Send + 'a>>;

pub trait IpLookup: Send + Sync + 'static {
    /// Resolves the caller's approximate position, giving up early when `cancel` fires.
    fn locate(&self, cancel: CancellationToken) -> LookupFuture<'_>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpService {
    IpApiCo,
    IpGeolocationIo,
    IpInfo,
}

impl IpService {
    pub const ALL: [IpService; 3] = [IpService::IpApiCo, IpService::IpGeolocationIo, IpService::IpInfo];

    pub fn name(&self) -> &'static str {
        match self {
            IpService::IpApiCo => "ipapi.co",
            IpService::IpGeolocationIo => "ipgeolocation.io",
            IpService::IpInfo => "ipinfo.io",
        }
    }

    fn url(&self) -> &'static str {
        match self {
            IpService::IpApiCo => "https://ipapi.co/json/",
            IpService::IpGeolocationIo => "https://api.ipgeolocation.io/ipgeo?apiKey=",
            IpService::IpInfo => "https://ipinfo.io/json",
        }
    }

    /// Pulls a coordinate out of the service's JSON body.
    ///
    /// `0, 0` is what these services send when they could not place the
    /// address, so it counts as no answer.
    pub fn parse(&self, body: &Value) -> Option<Coordinate> {
        let coordinate = match self {
            IpService::IpApiCo => {
                if body.get("error").and_then(Value::as_bool).unwrap_or(false) {
                    return None;
                }
                Coordinate::new(number(body, "latitude")?, number(body, "longitude")?)
            }
            IpService::IpGeolocationIo => {
                Coordinate::new(number(body, "latitude")?, number(body, "longitude")?)
            }
            IpService::IpInfo => {
                let (lat, lng) = body.get("loc")?.as_str()?.split_once(',')?;
                Coordinate::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?)
            }
        }?;
        (coordinate.lat != 0.0 || coordinate.lng != 0.0).then_some(coordinate)
    }
}

/// Services disagree on whether coordinates are numbers or strings.
fn number(body: &Value, key: &str) -> Option<f64> {
    match body.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub struct IpLocator {
    client: Client,
    services: Vec<IpService>,
    timeout: Duration,
}

impl IpLocator {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            services: IpService::ALL.to_vec(),
            timeout,
        })
    }

    async fn query(&self, service: IpService) -> Result<Coordinate, LookupError> {
        let response = self.client.get(service.url()).send().await?;
        if !response.status().is_success() {
            return Err(LookupError::Status(response.status().as_u16()));
        }
        let body: Value = response.json().await?;
        service.parse(&body).ok_or(LookupError::Malformed)
    }
}

impl IpLookup for IpLocator {
    fn locate(&self, cancel: CancellationToken) -> LookupFuture<'_> {
        Box::pin(async move {
            for service in &self.services {
                let attempt = tokio::time::timeout(self.timeout, self.query(*service));
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("IP lookup cancelled");
                        return None;
                    }
                    outcome = attempt => outcome,
                };

                match outcome {
                    Ok(Ok(coordinate)) => {
                        info!("IP geolocation via {} - ({})", service.name(), coordinate);
                        return Some(coordinate);
                    }
                    Ok(Err(e)) => debug!("{} failed: {}", service.name(), e),
                    Err(_) => debug!("{} timed out after {:?}", service.name(), self.timeout),
                }
            }

            warn!("All IP geolocation services failed");
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ipapi_co_numbers() {
        let body = json!({"city": "Zurich", "latitude": 47.3667, "longitude": 8.55});
        let coord = IpService::IpApiCo.parse(&body).unwrap();
        assert_eq!(coord.lat, 47.3667);
        assert_eq!(coord.lng, 8.55);
    }

    #[test]
    fn ipapi_co_error_flag_wins() {
        let body = json!({"error": true, "reason": "RateLimited", "latitude": 1.0, "longitude": 2.0});
        assert!(IpService::IpApiCo.parse(&body).is_none());
    }

    #[test]
    fn ipgeolocation_strings() {
        let body = json!({"latitude": "46.94809", "longitude": "7.44744"});
        let coord = IpService::IpGeolocationIo.parse(&body).unwrap();
        assert_eq!(coord.lat, 46.94809);
    }

    #[test]
    fn ipinfo_loc_pair() {
        let body = json!({"loc": "47.3769,8.5417", "city": "Zürich"});
        let coord = IpService::IpInfo.parse(&body).unwrap();
        assert_eq!(coord.lng, 8.5417);

        assert!(IpService::IpInfo.parse(&json!({"loc": "47.3769"})).is_none());
        assert!(IpService::IpInfo.parse(&json!({"loc": "abc,def"})).is_none());
        assert!(IpService::IpInfo.parse(&json!({"loc": "147.0,8.0"})).is_none());
    }

    #[test]
    fn null_island_is_no_answer() {
        assert!(IpService::IpApiCo
            .parse(&json!({"latitude": 0.0, "longitude": 0.0}))
            .is_none());
        assert!(IpService::IpGeolocationIo
            .parse(&json!({"latitude": "0", "longitude": "0.0"}))
            .is_none());
        assert!(IpService::IpInfo.parse(&json!({"loc": "0,0"})).is_none());

        let equator = IpService::IpApiCo
            .parse(&json!({"latitude": 0.0, "longitude": 9.5}))
            .unwrap();
        assert_eq!(equator.lng, 9.5);
    }

    #[tokio::test]
    async fn cancelled_lookup_returns_none() {
        let locator = IpLocator::new(Duration::from_secs(5)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(locator.locate(cancel).await.is_none());
    }
}
