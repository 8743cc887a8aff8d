//! "Save me": walking directions through the nearest toilets.

use crate::api::{FetchError, NearestParams, ToiletBackend};
use crate::config::{BackendConfig, RouteConfig};
use crate::models::{Coordinate, NearestToilet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

const DIRECTIONS_URL: &str = "https://www.google.com/maps/dir/?api=1";

/// Builds a Google Maps walking link from `origin` through every destination.
///
/// All destinations but the last become waypoints, the last one is the final
/// stop. Returns `None` when there is nothing to route to or a coordinate is
/// unusable.
pub fn walking_route_url(origin: Coordinate, destinations: &[Coordinate]) -> Option<String> {
    let (last, stops) = destinations.split_last()?;
    if !origin.is_valid() || !last.is_valid() || stops.iter().any(|c| !c.is_valid()) {
        return None;
    }

    let mut url = format!("{}&origin={},{}", DIRECTIONS_URL, origin.lat, origin.lng);
    let _ = write!(url, "&destination={},{}", last.lat, last.lng);
    if !stops.is_empty() {
        let waypoints: Vec<String> = stops.iter().map(|c| format!("{},{}", c.lat, c.lng)).collect();
        let _ = write!(url, "&waypoints={}", waypoints.join("|"));
    }
    url.push_str("&travelmode=walking");
    Some(url)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub origin: Coordinate,
    /// Ascending by distance.
    pub stops: Vec<NearestToilet>,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Could not find nearby toilets. Please try again.")]
    Backend(#[source] FetchError),
    #[error("No toilets found within {0:.0}km.")]
    NothingNearby(f64),
}

pub struct RouteFinder {
    backend: Arc<dyn ToiletBackend>,
    radius_meters: f64,
    limit: u32,
    timeout: Duration,
}

impl RouteFinder {
    pub fn new(backend: Arc<dyn ToiletBackend>, route: &RouteConfig, backend_config: &BackendConfig) -> Self {
        Self {
            backend,
            radius_meters: route.radius_meters,
            limit: route.result_limit,
            timeout: backend_config.request_timeout(),
        }
    }

    pub async fn find(&self, origin: Coordinate) -> Result<Route, RouteError> {
        let params = NearestParams {
            user_lat: origin.lat,
            user_lng: origin.lng,
            radius_meters: self.radius_meters,
            result_limit: self.limit,
        };

        let stops = match tokio::time::timeout(self.timeout, self.backend.find_nearest_toilets(params)).await {
            Ok(Ok(stops)) => stops,
            Ok(Err(e)) => {
                error!("find_nearest_toilets failed: {}", e);
                return Err(RouteError::Backend(e));
            }
            Err(_) => {
                error!("find_nearest_toilets timed out");
                return Err(RouteError::Backend(FetchError::Timeout(self.timeout)));
            }
        };

        let coordinates: Vec<Coordinate> = stops.iter().map(|s| s.toilet.coordinate).collect();
        let url = walking_route_url(origin, &coordinates)
            .ok_or(RouteError::NothingNearby(self.radius_meters / 1000.0))?;

        info!("Route through {} toilets", stops.len());
        Ok(Route { origin, stops, url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(lat: f64, lng: f64) -> Coordinate {
        Coordinate::new(lat, lng).unwrap()
    }

    #[test]
    fn last_destination_is_final_stop() {
        let url = walking_route_url(coord(47.0, 8.0), &[coord(47.1, 8.1), coord(47.2, 8.2)]).unwrap();

        assert!(url.starts_with("https://www.google.com/maps/dir/?api=1"));
        assert!(url.contains("origin=47,8"));
        assert!(url.contains("destination=47.2,8.2"));
        assert!(url.contains("waypoints=47.1,8.1"));
        assert!(url.ends_with("travelmode=walking"));
    }

    #[test]
    fn single_destination_has_no_waypoints() {
        let url = walking_route_url(coord(47.0, 8.0), &[coord(47.5, 8.5)]).unwrap();
        assert!(url.contains("destination=47.5,8.5"));
        assert!(!url.contains("waypoints"));
    }

    #[test]
    fn waypoints_keep_order() {
        let url = walking_route_url(
            coord(47.0, 8.0),
            &[coord(47.1, 8.1), coord(47.2, 8.2), coord(47.3, 8.3)],
        )
        .unwrap();
        assert!(url.contains("waypoints=47.1,8.1|47.2,8.2"));
        assert!(url.contains("destination=47.3,8.3"));
    }

    #[test]
    fn nothing_to_route_to() {
        assert!(walking_route_url(coord(47.0, 8.0), &[]).is_none());
        let bad_origin = Coordinate { lat: f64::NAN, lng: 8.0 };
        assert!(walking_route_url(bad_origin, &[coord(47.1, 8.1)]).is_none());
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            RouteError::NothingNearby(20.0).to_string(),
            "No toilets found within 20km."
        );
    }
}
