//! Backend access for toilet data.
//!
//! The backend is a hosted Postgres database with geospatial functions, reached
//! through its PostgREST HTTP interface. [`ToiletBackend`] is the seam the rest
//! of the crate programs against; [`SupabaseBackend`] is the HTTP
//! implementation. RPC parameter names are part of the backend contract and
//! must not be renamed.

use crate::config::BackendConfig;
use crate::models::{BoundingBox, NearestToilet, NearestToiletRow, Toilet, ToiletRow};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request cancelled")]
    Cancelled,
    #[error("unexpected response: {0}")]
    Decode(String),
}

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FetchError>> + Send + 'a>>;

/// Parameters of `find_nearest_toilets`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearestParams {
    pub user_lat: f64,
    pub user_lng: f64,
    pub radius_meters: f64,
    pub result_limit: u32,
}

/// Parameters of `get_toilets_deterministic_v3`. User fields are sent as `null`
/// when no location is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeterministicParams {
    pub p_center_lat: f64,
    pub p_center_lng: f64,
    pub p_user_lat: Option<f64>,
    pub p_user_lng: Option<f64>,
    pub p_is_zoomed_in: bool,
    pub result_limit: u32,
}

/// Parameters of `find_toilets_in_view` and of the direct range read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InViewParams {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
    pub max_results: u32,
}

impl InViewParams {
    pub fn from_bounds(bounds: &BoundingBox, max_results: u32) -> Self {
        Self {
            min_lat: bounds.south,
            min_lng: bounds.west,
            max_lat: bounds.north,
            max_lng: bounds.east,
            max_results,
        }
    }
}

/// The remote procedures and table reads the app consumes.
pub trait ToiletBackend: Send + Sync + 'static {
    /// Nearest toilets to a point, ascending by distance.
    fn find_nearest_toilets(&self, params: NearestParams) -> BackendFuture<'_, Vec<NearestToilet>>;

    /// Server-side sampled set for the visible region.
    fn toilets_deterministic(&self, params: DeterministicParams) -> BackendFuture<'_, Vec<Toilet>>;

    /// Toilets strictly inside a bounding box.
    fn toilets_in_view(&self, params: InViewParams) -> BackendFuture<'_, Vec<Toilet>>;

    /// Plain range filter on a table's `lat` / `lng` columns.
    fn toilets_in_range(&self, table: String, params: InViewParams) -> BackendFuture<'_, Vec<Toilet>>;
}

pub struct SupabaseBackend {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
        })
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    async fn rpc<P, R>(&self, function: &str, params: &P) -> Result<R, FetchError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!("rpc {}", function);
        let response = self
            .authorized(self.client.post(self.rpc_url(function)))
            .json(params)
            .send()
            .await?;
        decode(response).await
    }

    async fn select_range(&self, table: &str, params: &InViewParams) -> Result<Vec<ToiletRow>, FetchError> {
        debug!("range select on {}", table);
        let response = self
            .authorized(self.client.get(self.table_url(table)))
            .query(&range_query(params))
            .send()
            .await?;
        decode(response).await
    }
}

impl ToiletBackend for SupabaseBackend {
    fn find_nearest_toilets(&self, params: NearestParams) -> BackendFuture<'_, Vec<NearestToilet>> {
        Box::pin(async move {
            let rows: Vec<NearestToiletRow> = self.rpc("find_nearest_toilets", &params).await?;
            Ok(rows.into_iter().filter_map(NearestToiletRow::into_nearest).collect())
        })
    }

    fn toilets_deterministic(&self, params: DeterministicParams) -> BackendFuture<'_, Vec<Toilet>> {
        Box::pin(async move {
            let rows: Vec<ToiletRow> = self.rpc("get_toilets_deterministic_v3", &params).await?;
            Ok(into_toilets(rows))
        })
    }

    fn toilets_in_view(&self, params: InViewParams) -> BackendFuture<'_, Vec<Toilet>> {
        Box::pin(async move {
            let rows: Vec<ToiletRow> = self.rpc("find_toilets_in_view", &params).await?;
            Ok(into_toilets(rows))
        })
    }

    fn toilets_in_range(&self, table: String, params: InViewParams) -> BackendFuture<'_, Vec<Toilet>> {
        Box::pin(async move {
            let rows = self.select_range(&table, &params).await?;
            Ok(into_toilets(rows))
        })
    }
}

fn into_toilets(rows: Vec<ToiletRow>) -> Vec<Toilet> {
    rows.into_iter().filter_map(ToiletRow::into_toilet).collect()
}

/// PostgREST filters equivalent to
/// `lat BETWEEN min_lat AND max_lat AND lng BETWEEN min_lng AND max_lng LIMIT max_results`.
fn range_query(params: &InViewParams) -> Vec<(&'static str, String)> {
    vec![
        ("select", "*".to_string()),
        ("lat", format!("gte.{}", params.min_lat)),
        ("lat", format!("lte.{}", params.max_lat)),
        ("lng", format!("gte.{}", params.min_lng)),
        ("lng", format!("lte.{}", params.max_lng)),
        ("limit", params.max_results.to_string()),
    ]
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Backend {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }

    response
        .json::<R>()
        .await
        .map_err(|e| FetchError::Decode(e.to_string()))
}

/// PostgREST errors carry a JSON body with a `message` field.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deterministic_params_use_backend_names() {
        let params = DeterministicParams {
            p_center_lat: 47.37,
            p_center_lng: 8.54,
            p_user_lat: None,
            p_user_lng: None,
            p_is_zoomed_in: true,
            result_limit: 1000,
        };

        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({
                "p_center_lat": 47.37,
                "p_center_lng": 8.54,
                "p_user_lat": null,
                "p_user_lng": null,
                "p_is_zoomed_in": true,
                "result_limit": 1000
            })
        );
    }

    #[test]
    fn in_view_params_follow_bounds() {
        let bounds = BoundingBox {
            south: 47.0,
            west: 8.0,
            north: 47.5,
            east: 8.9,
        };
        let params = InViewParams::from_bounds(&bounds, 4000);
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({
                "min_lat": 47.0,
                "min_lng": 8.0,
                "max_lat": 47.5,
                "max_lng": 8.9,
                "max_results": 4000
            })
        );
    }

    #[test]
    fn range_query_brackets_both_axes() {
        let params = InViewParams {
            min_lat: 1.5,
            min_lng: 2.5,
            max_lat: 3.5,
            max_lng: 4.5,
            max_results: 10,
        };
        let query = range_query(&params);
        assert!(query.contains(&("lat", "gte.1.5".to_string())));
        assert!(query.contains(&("lat", "lte.3.5".to_string())));
        assert!(query.contains(&("lng", "gte.2.5".to_string())));
        assert!(query.contains(&("lng", "lte.4.5".to_string())));
        assert!(query.contains(&("limit", "10".to_string())));
    }

    #[test]
    fn urls_ignore_trailing_slash() {
        let config = BackendConfig {
            url: "https://db.example.com/".to_string(),
            ..BackendConfig::default()
        };
        let backend = SupabaseBackend::new(&config).unwrap();
        assert_eq!(
            backend.rpc_url("find_toilets_in_view"),
            "https://db.example.com/rest/v1/rpc/find_toilets_in_view"
        );
        assert_eq!(backend.table_url("toilets"), "https://db.example.com/rest/v1/toilets");
    }

    #[test]
    fn error_message_prefers_postgrest_message() {
        assert_eq!(
            error_message(r#"{"code":"P0001","message":"Invalid map center coordinates provided"}"#),
            "Invalid map center coordinates provided"
        );
        assert_eq!(error_message("  bad gateway \n"), "bad gateway");
    }
}
