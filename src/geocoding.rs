//! Place search for jumping the map somewhere else, backed by Nominatim.

use crate::models::Coordinate;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info};

const SEARCH_URL: &str = "https://nominatim.openstreetmap.org/search";
const USER_AGENT: &str = concat!("toilet-radar/", env!("CARGO_PKG_VERSION"));
const MAX_RESULTS: &str = "5";
pub const MIN_QUERY_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodingResult {
    pub coordinate: Coordinate,
    pub display_name: String,
    pub kind: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

#[derive(Deserialize)]
struct Place {
    lat: String,
    lon: String,
    display_name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    address: Option<Address>,
}

#[derive(Deserialize)]
struct Address {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

impl Place {
    fn into_result(self) -> Option<GeocodingResult> {
        let coordinate = Coordinate::new(self.lat.parse().ok()?, self.lon.parse().ok()?)?;
        let (city, state, country) = match self.address {
            Some(a) => (a.city.or(a.town).or(a.village), a.state, a.country),
            None => (None, None, None),
        };
        Some(GeocodingResult {
            coordinate,
            display_name: self.display_name,
            kind: self.kind,
            city,
            state,
            country,
        })
    }
}

pub struct Geocoder {
    client: Client,
    base_url: String,
}

impl Geocoder {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_base_url(SEARCH_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Free-text search. Failures are logged and come back as no results.
    pub async fn search(&self, query: &str) -> Vec<GeocodingResult> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return Vec::new();
        }

        info!("Searching for '{}'", query);
        let request = self.client.get(&self.base_url).query(&[
            ("format", "json"),
            ("addressdetails", "1"),
            ("limit", MAX_RESULTS),
            ("q", query),
        ]);

        let places: Vec<Place> = match request.send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => match response.json().await {
                Ok(places) => places,
                Err(e) => {
                    error!("Unreadable search response: {}", e);
                    return Vec::new();
                }
            },
            Err(e) => {
                error!("Search failed: {}", e);
                return Vec::new();
            }
        };

        let results = parse_places(places);
        info!("Found {} results", results.len());
        results
    }
}

fn parse_places(places: Vec<Place>) -> Vec<GeocodingResult> {
    places.into_iter().filter_map(Place::into_result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_nominatim_places() {
        let body = r#"[
            {"lat": "46.9480", "lon": "7.4474", "display_name": "Bern, Switzerland", "type": "city",
             "address": {"city": "Bern", "state": "Bern", "country": "Schweiz"}},
            {"lat": "47.05", "lon": "8.30", "display_name": "Luzern", "type": "town",
             "address": {"town": "Luzern", "country": "Schweiz"}},
            {"lat": "not a number", "lon": "8.0", "display_name": "broken"},
            {"lat": "91.5", "lon": "8.0", "display_name": "off the globe"}
        ]"#;
        let places: Vec<Place> = serde_json::from_str(body).unwrap();
        let results = parse_places(places);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].coordinate, Coordinate::new(46.948, 7.4474).unwrap());
        assert_eq!(results[0].city.as_deref(), Some("Bern"));
        assert_eq!(results[0].kind.as_deref(), Some("city"));
        assert_eq!(results[1].city.as_deref(), Some("Luzern"));
        assert_eq!(results[1].state, None);
    }

    #[tokio::test]
    async fn short_queries_are_not_sent() {
        // Unroutable address: any request would fail, but none should be made.
        let geocoder = Geocoder::with_base_url("http://127.0.0.1:9/search").unwrap();
        assert!(geocoder.search("   ").await.is_empty());
        assert!(geocoder.search("Zü").await.is_empty());
    }
}
