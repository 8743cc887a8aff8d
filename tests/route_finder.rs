mod common;

use std::time::Duration;

use common::{coord, toilet, Call, FakeBackend, Reply};

use toilet_radar::api::NearestParams;
use toilet_radar::config::{BackendConfig, RouteConfig};
use toilet_radar::models::NearestToilet;
use toilet_radar::route::{RouteError, RouteFinder};

fn nearest(id: &str, lat: f64, lng: f64, distance: f64) -> NearestToilet {
    NearestToilet {
        toilet: toilet(id, lat, lng),
        distance,
    }
}

fn finder(backend: &std::sync::Arc<FakeBackend>) -> RouteFinder {
    RouteFinder::new(backend.clone(), &RouteConfig::default(), &BackendConfig::default())
}

#[tokio::test]
async fn routes_through_the_nearest_toilets() {
    let backend = FakeBackend::new();
    backend.queue_nearest(Reply::ok(vec![
        nearest("a", 47.1, 8.1, 120.0),
        nearest("b", 47.2, 8.2, 480.0),
    ]));

    let route = finder(&backend).find(coord(47.0, 8.0)).await.unwrap();

    assert_eq!(route.stops.len(), 2);
    assert_eq!(route.stops[0].toilet.id, "a");
    assert!(route.url.contains("origin=47,8"));
    assert!(route.url.contains("waypoints=47.1,8.1"));
    assert!(route.url.contains("destination=47.2,8.2"));
    assert_eq!(
        backend.calls(),
        vec![Call::Nearest(NearestParams {
            user_lat: 47.0,
            user_lng: 8.0,
            radius_meters: 20_000.0,
            result_limit: 3,
        })]
    );
}

#[tokio::test]
async fn nothing_within_range() {
    let backend = FakeBackend::new();
    backend.queue_nearest(Reply::ok(vec![]));

    let err = finder(&backend).find(coord(47.0, 8.0)).await.unwrap_err();

    assert!(matches!(err, RouteError::NothingNearby(_)));
    assert_eq!(err.to_string(), "No toilets found within 20km.");
}

#[tokio::test]
async fn backend_failure_is_reported_plainly() {
    let backend = FakeBackend::new();
    backend.queue_nearest(Reply::fail(500));

    let err = finder(&backend).find(coord(47.0, 8.0)).await.unwrap_err();

    assert!(matches!(err, RouteError::Backend(_)));
    assert_eq!(err.to_string(), "Could not find nearby toilets. Please try again.");
}

#[tokio::test(start_paused = true)]
async fn slow_backend_times_out() {
    let backend = FakeBackend::new();
    backend.queue_nearest(Reply::ok(vec![nearest("a", 47.1, 8.1, 120.0)]).after(Duration::from_secs(60)));

    let err = finder(&backend).find(coord(47.0, 8.0)).await.unwrap_err();

    assert!(matches!(err, RouteError::Backend(_)));
}
