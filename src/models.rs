use serde::Deserialize;
use std::f64::consts::PI;
use std::fmt;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
const TILE_SIZE: f64 = 256.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// Builds a coordinate from untrusted input, rejecting NaN and out of range values.
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let coord = Self { lat, lng };
        coord.is_valid().then_some(coord)
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lng = (other.lng - self.lng).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_METERS * c
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.lat, self.lng)
    }
}

/// Where a location estimate came from, best first: GPS, then IP, then the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Default,
    Ip,
    Gps,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Source::Gps => "GPS",
            Source::Ip => "IP",
            Source::Default => "DEFAULT",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationEstimate {
    pub coordinate: Coordinate,
    pub source: Source,
}

impl LocationEstimate {
    pub fn new(coordinate: Coordinate, source: Source) -> Self {
        Self { coordinate, source }
    }
}

/// South/west/north/east edges of a map region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

/// The visible map region as reported by the map view once a pan or zoom settles.
///
/// The pixel extent is what turns a center and zoom into a bounding box; it
/// follows the usual 256 px Web Mercator tiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub center: Coordinate,
    pub zoom: u8,
    pub width_px: u32,
    pub height_px: u32,
}

impl Viewport {
    pub fn new(center: Coordinate, zoom: u8, width_px: u32, height_px: u32) -> Self {
        Self {
            center,
            zoom,
            width_px,
            height_px,
        }
    }

    pub fn is_zoomed_in(&self, threshold: u8) -> bool {
        self.zoom >= threshold
    }

    pub fn with_center(self, center: Coordinate) -> Self {
        Self { center, ..self }
    }

    pub fn with_zoom(self, zoom: u8) -> Self {
        Self { zoom, ..self }
    }

    pub fn bounds(&self) -> BoundingBox {
        let world = world_size(self.zoom);
        let (cx, cy) = project(&self.center, world);
        let half_w = f64::from(self.width_px) / 2.0;
        let half_h = f64::from(self.height_px) / 2.0;

        let (north, west) = unproject(cx - half_w, cy - half_h, world);
        let (south, east) = unproject(cx + half_w, cy + half_h, world);

        BoundingBox {
            south,
            west,
            north,
            east,
        }
    }

    /// Moves the center by a fraction of the visible extent (positive = north / east).
    pub fn pan(self, dx_fraction: f64, dy_fraction: f64) -> Self {
        let world = world_size(self.zoom);
        let (cx, cy) = project(&self.center, world);
        let x = cx + dx_fraction * f64::from(self.width_px);
        let y = cy - dy_fraction * f64::from(self.height_px);
        let (lat, lng) = unproject(x, y, world);
        Self {
            center: Coordinate { lat, lng },
            ..self
        }
    }
}

fn world_size(zoom: u8) -> f64 {
    TILE_SIZE * 2f64.powi(i32::from(zoom))
}

fn project(coord: &Coordinate, world: f64) -> (f64, f64) {
    let lat_rad = coord
        .lat
        .clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT)
        .to_radians();
    let x = (coord.lng + 180.0) / 360.0 * world;
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * world;
    (x, y)
}

fn unproject(x: f64, y: f64, world: f64) -> (f64, f64) {
    let y = y.clamp(0.0, world);
    let lng = (x / world * 360.0 - 180.0).clamp(-180.0, 180.0);
    let lat = (PI * (1.0 - 2.0 * y / world)).sinh().atan().to_degrees();
    (lat, lng)
}

/// A public toilet as exposed to the rest of the app.
#[derive(Debug, Clone, PartialEq)]
pub struct Toilet {
    pub id: String,
    pub coordinate: Coordinate,
    pub name: Option<String>,
    pub address: Option<String>,
    pub accessible: Option<bool>,
    pub is_free: Option<bool>,
    pub kind: Option<String>,
    pub status: Option<String>,
    pub open_hours: Option<String>,
    pub notes: Option<String>,
    pub city: Option<String>,
}

impl Toilet {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed Toilet")
    }
}

/// A row as the backend returns it. Every RPC returns a subset of these columns.
#[derive(Debug, Clone, Deserialize)]
pub struct ToiletRow {
    pub id: serde_json::Value,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub accessible: Option<bool>,
    #[serde(default)]
    pub is_free: Option<bool>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub open_hours: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl ToiletRow {
    /// Rows without a usable position cannot be placed on the map and are dropped.
    pub fn into_toilet(self) -> Option<Toilet> {
        let coordinate = Coordinate::new(self.lat?, self.lng?)?;
        let id = match self.id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => return None,
            other => other.to_string(),
        };

        Some(Toilet {
            id,
            coordinate,
            name: self.name,
            address: self.address,
            accessible: self.accessible,
            is_free: self.is_free,
            kind: self.kind,
            status: self.status,
            open_hours: self.open_hours,
            notes: self.notes,
            city: self.city,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearestToilet {
    pub toilet: Toilet,
    /// Meters from the requesting location.
    pub distance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NearestToiletRow {
    #[serde(flatten)]
    pub row: ToiletRow,
    pub distance: f64,
}

impl NearestToiletRow {
    pub fn into_nearest(self) -> Option<NearestToilet> {
        let distance = self.distance;
        self.row
            .into_toilet()
            .map(|toilet| NearestToilet { toilet, distance })
    }
}
