use crate::config::Config;
use crate::fetch::{FetchSnapshot, Tier};
use crate::geocoding::{GeocodingResult, MIN_QUERY_LEN};
use crate::location::LocationUpdate;
use crate::models::{Coordinate, LocationEstimate, Source, Toilet, Viewport};
use crate::route::Route;
use chrono::{DateTime, Local};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::time::{Duration, Instant};

const MIN_ZOOM: u8 = 2;
const MAX_ZOOM: u8 = 19;
const PAN_STEP: f64 = 0.25;
pub const UPGRADE_NOTICE: &str = "GPS signal found. Location upgraded.";

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub enum ViewMode {
    #[default]
    Map,
    Search,
}

/// Work the main loop has to hand to a background component.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// The viewport settled somewhere new.
    Viewport(Viewport),
    Refresh,
    FindRoute(Coordinate),
    Search(String),
}

/// A transient message that disappears on its own.
#[derive(Debug, Clone)]
pub struct Notice {
    pub text: String,
    pub expires_at: Instant,
}

pub struct App {
    pub view_mode: ViewMode,
    pub viewport: Viewport,
    pub should_quit: bool,

    // Location
    pub location: Option<LocationEstimate>,
    pub location_updated: Option<DateTime<Local>>,
    pub location_warning: Option<String>,
    pub notice: Option<Notice>,
    centered_on_user: bool,

    // Toilets in view, nearest first
    pub toilets: Vec<Toilet>,
    pub selected_index: usize,
    pub loading: bool,
    pub fetch_error: Option<String>,
    pub tier: Option<Tier>,

    // "Save me"
    pub route: Option<Route>,
    pub route_message: Option<String>,
    pub route_pending: bool,

    // Place search
    pub search_input: String,
    pub search_results: Vec<GeocodingResult>,
    pub search_selected: usize,
    pub searching: bool,

    search_zoom: u8,
    notice_duration: Duration,
}

impl App {
    pub fn new(config: &Config) -> Self {
        let viewport = Viewport::new(
            config.location.default_anchor(),
            config.map.initial_zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            config.map.viewport_width_px,
            config.map.viewport_height_px,
        );

        Self {
            view_mode: ViewMode::Map,
            viewport,
            should_quit: false,
            location: None,
            location_updated: None,
            location_warning: None,
            notice: None,
            centered_on_user: false,
            toilets: Vec::new(),
            selected_index: 0,
            loading: false,
            fetch_error: None,
            tier: None,
            route: None,
            route_message: None,
            route_pending: false,
            search_input: String::new(),
            search_results: Vec::new(),
            search_selected: 0,
            searching: false,
            search_zoom: config.map.search_zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            notice_duration: Duration::from_secs(config.ui.notice_seconds),
        }
    }

    pub fn on_tick(&mut self, now: Instant) {
        if self.notice.as_ref().is_some_and(|n| now >= n.expires_at) {
            self.notice = None;
        }
    }

    /// Applies a location update; the first one also moves the map to the user.
    pub fn on_location(&mut self, update: LocationUpdate) -> Option<Action> {
        let estimate = update.estimate;
        self.location = Some(estimate);
        self.location_updated = Some(Local::now());
        if estimate.source != Source::Default {
            self.location_warning = None;
        }
        if update.upgraded {
            self.show_notice(UPGRADE_NOTICE);
        }
        self.sort_toilets();

        if self.centered_on_user {
            return None;
        }
        self.centered_on_user = true;
        self.move_viewport(self.viewport.with_center(estimate.coordinate))
    }

    pub fn on_location_warning(&mut self, message: String) {
        self.location_warning = Some(message);
    }

    pub fn on_fetch(&mut self, snapshot: FetchSnapshot) {
        self.loading = snapshot.loading;
        self.fetch_error = snapshot.error;
        self.tier = snapshot.tier;
        self.toilets = snapshot.toilets;
        self.sort_toilets();
        if self.selected_index >= self.toilets.len() {
            self.selected_index = 0;
        }
    }

    pub fn on_route(&mut self, result: Result<Route, String>) {
        self.route_pending = false;
        match result {
            Ok(route) => {
                self.route = Some(route);
                self.route_message = None;
            }
            Err(message) => {
                self.route = None;
                self.route_message = Some(message);
            }
        }
    }

    pub fn on_search_results(&mut self, results: Vec<GeocodingResult>) {
        self.searching = false;
        self.search_selected = 0;
        if results.is_empty() {
            self.show_notice("No places found.");
        }
        self.search_results = results;
    }

    pub fn selected_toilet(&self) -> Option<&Toilet> {
        self.toilets.get(self.selected_index)
    }

    /// Where list distances are measured from: the user if known, else the map center.
    pub fn reference_point(&self) -> Coordinate {
        self.location
            .map(|l| l.coordinate)
            .unwrap_or(self.viewport.center)
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Action> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return None;
        }

        match self.view_mode {
            ViewMode::Map => self.handle_map_key(key),
            ViewMode::Search => self.handle_search_key(key),
        }
    }

    fn handle_map_key(&mut self, key: KeyEvent) -> Option<Action> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
                None
            }
            KeyCode::Up => self.move_viewport(self.viewport.pan(0.0, PAN_STEP)),
            KeyCode::Down => self.move_viewport(self.viewport.pan(0.0, -PAN_STEP)),
            KeyCode::Left => self.move_viewport(self.viewport.pan(-PAN_STEP, 0.0)),
            KeyCode::Right => self.move_viewport(self.viewport.pan(PAN_STEP, 0.0)),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let zoom = (self.viewport.zoom + 1).min(MAX_ZOOM);
                self.move_viewport(self.viewport.with_zoom(zoom))
            }
            KeyCode::Char('-') => {
                let zoom = self.viewport.zoom.saturating_sub(1).max(MIN_ZOOM);
                self.move_viewport(self.viewport.with_zoom(zoom))
            }
            KeyCode::Char('j') => {
                if !self.toilets.is_empty() {
                    self.selected_index = (self.selected_index + 1) % self.toilets.len();
                }
                None
            }
            KeyCode::Char('k') => {
                if !self.toilets.is_empty() {
                    self.selected_index = self
                        .selected_index
                        .checked_sub(1)
                        .unwrap_or(self.toilets.len() - 1);
                }
                None
            }
            KeyCode::Char('c') => match self.location {
                Some(estimate) => self.move_viewport(self.viewport.with_center(estimate.coordinate)),
                None => {
                    self.show_notice("Location not known yet.");
                    None
                }
            },
            KeyCode::Char('s') => {
                if self.route_pending {
                    return None;
                }
                match self.location {
                    Some(estimate) => {
                        self.route_pending = true;
                        self.route = None;
                        self.route_message = None;
                        Some(Action::FindRoute(estimate.coordinate))
                    }
                    None => {
                        self.route_message = Some("Waiting for your location.".to_string());
                        None
                    }
                }
            }
            KeyCode::Char('r') => Some(Action::Refresh),
            KeyCode::Char('/') => {
                self.view_mode = ViewMode::Search;
                None
            }
            _ => None,
        }
    }

    fn handle_search_key(&mut self, key: KeyEvent) -> Option<Action> {
        match key.code {
            KeyCode::Esc => {
                self.close_search();
                None
            }
            KeyCode::Enter => {
                if let Some(result) = self.search_results.get(self.search_selected) {
                    let center = result.coordinate;
                    let viewport = self.viewport.with_center(center).with_zoom(self.search_zoom);
                    self.close_search();
                    return self.move_viewport(viewport);
                }
                let query = self.search_input.trim().to_string();
                if query.chars().count() < MIN_QUERY_LEN || self.searching {
                    return None;
                }
                self.searching = true;
                Some(Action::Search(query))
            }
            KeyCode::Up => {
                self.search_selected = self.search_selected.saturating_sub(1);
                None
            }
            KeyCode::Down => {
                if self.search_selected + 1 < self.search_results.len() {
                    self.search_selected += 1;
                }
                None
            }
            KeyCode::Backspace => {
                self.search_input.pop();
                self.search_results.clear();
                None
            }
            KeyCode::Char(c) => {
                self.search_input.push(c);
                self.search_results.clear();
                None
            }
            _ => None,
        }
    }

    fn close_search(&mut self) {
        self.view_mode = ViewMode::Map;
        self.search_input.clear();
        self.search_results.clear();
        self.search_selected = 0;
    }

    fn move_viewport(&mut self, viewport: Viewport) -> Option<Action> {
        if viewport == self.viewport {
            return None;
        }
        self.viewport = viewport;
        Some(Action::Viewport(viewport))
    }

    fn show_notice(&mut self, text: &str) {
        self.notice = Some(Notice {
            text: text.to_string(),
            expires_at: Instant::now() + self.notice_duration,
        });
    }

    fn sort_toilets(&mut self) {
        let origin = self.reference_point();
        self.toilets.sort_by(|a, b| {
            origin
                .distance_to(&a.coordinate)
                .total_cmp(&origin.distance_to(&b.coordinate))
        });
    }
}
