//! Toilet radar: find the nearest public toilet from the terminal.
//!
//! The two moving parts are the [`location::LocationManager`], which keeps a
//! best-effort user position from GPS, IP geolocation or a fixed default, and
//! the [`fetch::FetchController`], which loads the toilets for the visible
//! viewport through a chain of backend queries.

pub mod api;
pub mod app;
pub mod config;
pub mod events;
pub mod fetch;
pub mod geocoding;
pub mod location;
pub mod logging;
pub mod models;
pub mod route;
pub mod ui;
