use crate::models::Coordinate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::{info, warn};

const CONFIG_PATH: &str = "config.toml";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub location: LocationConfig,
    pub backend: BackendConfig,
    pub map: MapConfig,
    pub route: RouteConfig,
    pub ui: UiConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LocationConfig {
    pub gps_enabled: bool,
    pub gpsd_address: String,   // host:port of the local gpsd daemon
    pub default_lat: f64,       // City-level anchor used when GPS and IP both fail
    pub default_lon: f64,
    pub probe_interval_seconds: u64,
    pub gps_timeout_ms: u64,    // One-shot reads
    pub watch_timeout_ms: u64,  // Continuous watch, per fix
    pub ip_timeout_ms: u64,     // Per IP lookup endpoint
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            gps_enabled: true,
            gpsd_address: "127.0.0.1:2947".to_string(),
            default_lat: 47.3769,
            default_lon: 8.5417,
            probe_interval_seconds: 30,
            gps_timeout_ms: 8_000,
            watch_timeout_ms: 10_000,
            ip_timeout_ms: 5_000,
        }
    }
}

impl LocationConfig {
    pub fn default_anchor(&self) -> Coordinate {
        Coordinate::new(self.default_lat, self.default_lon).unwrap_or_else(|| {
            warn!(
                "Configured default location ({}, {}) is invalid, using Zurich.",
                self.default_lat, self.default_lon
            );
            Coordinate {
                lat: 47.3769,
                lng: 8.5417,
            }
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub request_timeout_ms: u64,
    pub debounce_ms: u64,
    pub zoom_threshold: u8,        // "Zoomed in" at or above this zoom
    pub viewport_limit: u32,       // Cap for the deterministic query
    pub in_view_limit: u32,        // Cap for the bounding box and range queries
    pub primary_table: String,
    pub legacy_table: String,
    pub refetch_distance_meters: f64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            request_timeout_ms: 10_000,
            debounce_ms: 500,
            zoom_threshold: 12,
            viewport_limit: 1000,
            in_view_limit: 4000,
            primary_table: "toilet_location".to_string(),
            legacy_table: "toilets".to_string(),
            refetch_distance_meters: 50.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub initial_zoom: u8,
    pub search_zoom: u8,
    pub viewport_width_px: u32,
    pub viewport_height_px: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            initial_zoom: 13,
            search_zoom: 14,
            viewport_width_px: 1280,
            viewport_height_px: 800,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RouteConfig {
    pub radius_meters: f64,
    pub result_limit: u32,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            radius_meters: 20_000.0,
            result_limit: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UiConfig {
    pub tick_rate_ms: u64,
    pub notice_seconds: u64, // How long the GPS upgrade notice stays up
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            tick_rate_ms: 150,
            notice_seconds: 4,
        }
    }
}

impl Config {
    /// Loads config.toml from the working directory.
    /// If it doesn't exist, creates a default one.
    pub fn load() -> Self {
        let mut config = match fs::read_to_string(CONFIG_PATH) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to parse {}: {}. Using defaults.", CONFIG_PATH, e);
                    Config::default()
                }
            },
            Err(_) => {
                let config = Config::default();
                config.write_default();
                info!("Loaded default configuration.");
                config
            }
        };

        config.apply_env_overrides();
        config
    }

    /// Save default config to disk for the user to edit later
    fn write_default(&self) {
        match toml::to_string_pretty(self) {
            Ok(toml_string) => {
                if fs::write(CONFIG_PATH, toml_string).is_err() {
                    warn!("Could not write default {} to disk.", CONFIG_PATH);
                }
            }
            Err(e) => warn!("Could not serialize default configuration: {}", e),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("TOILET_RADAR_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Ok(key) = std::env::var("TOILET_RADAR_ANON_KEY") {
            self.backend.anon_key = key;
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
