use serde::{Deserialize, Serialize};
use std::fmt;

// ** Coordinates **

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Graph identity of a coordinate: both components quantized to 1e-7 degrees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeKey(i64, i64);

const KEY_SCALE: f64 = 1e7;

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Location { latitude, longitude }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    pub fn key(&self) -> NodeKey {
        NodeKey(
            (self.latitude * KEY_SCALE).round() as i64,
            (self.longitude * KEY_SCALE).round() as i64,
        )
    }

    /// Great-circle distance in kilometers.
    pub fn distance_km(&self, other: &Location) -> f64 {
        let a = haversine_rs::point::Point { latitude: self.latitude, longitude: self.longitude };
        let b = haversine_rs::point::Point { latitude: other.latitude, longitude: other.longitude };
        haversine_rs::distance(a, b, haversine_rs::units::Unit::Meters) / 1000.0
    }
}

/// Haversine length of a polyline in kilometers.
pub fn path_length_km(points: &[Location]) -> f64 {
    points.windows(2).map(|w| w[0].distance_km(&w[1])).sum()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoundingCoordinates {
    pub north_latitude: f64,
    pub south_latitude: f64,
    pub east_longitude: f64,
    pub west_longitude: f64,
}

impl BoundingCoordinates {
    pub fn contains(&self, location: &Location) -> bool {
        location.latitude <= self.north_latitude
            && location.latitude >= self.south_latitude
            && location.longitude <= self.east_longitude
            && location.longitude >= self.west_longitude
    }
}

// ** Static dataset types **

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ForwardOnly,
    BackwardOnly,
    BothWays,
}

// A street or path, as found in the street dataset.
#[derive(Clone, Debug)]
pub struct WayFeature {
    pub geometry: Vec<Location>,
    pub way_type: String,
    pub direction: Direction,
    pub name: Option<String>,
    pub destination: Option<String>,
}

impl WayFeature {
    /// Label shown for this way in street-name lists.
    pub fn label(&self) -> Option<&str> {
        self.name.as_deref().or(self.destination.as_deref())
    }
}

#[derive(Clone, Debug)]
pub struct TransitLine {
    pub geometry: Vec<Location>,
    pub kind: String,
    pub name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TransitStop {
    pub location: Location,
    pub name: Option<String>,
}

// ** Modes **

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Walking,
    Cycling,
    Driving,
    #[serde(alias = "tram")]
    Transit,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Walking => "walking",
            Mode::Cycling => "cycling",
            Mode::Driving => "driving",
            Mode::Transit => "transit",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ** Route output **

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lng: f64,
}

impl From<Location> for RoutePoint {
    fn from(location: Location) -> Self {
        RoutePoint { lat: location.latitude, lng: location.longitude }
    }
}

impl From<RoutePoint> for Location {
    fn from(point: RoutePoint) -> Self {
        Location { latitude: point.lat, longitude: point.lng }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Segment {
    pub points: Vec<RoutePoint>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_stop: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_stop: Option<String>,
    /// Kilometers.
    pub distance: f64,
    /// Seconds.
    pub duration: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instruction {
    pub distance: f64,
    pub relative_direction: Option<String>,
    pub absolute_direction: Option<String>,
    pub street_name: Option<String>,
    pub mode: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteResult {
    pub route: Vec<RoutePoint>,
    pub segments: Vec<Segment>,
    pub distance: f64,
    pub duration: u64,
    #[serde(rename = "transport_mode")]
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Vec<Instruction>>,
}

/// Travel time in whole seconds at a nominal speed.
pub fn duration_secs(distance_km: f64, speed_kmh: f64) -> u64 {
    if speed_kmh <= 0.0 {
        return 0;
    }
    (distance_km / speed_kmh * 3600.0).round() as u64
}

#[test]
fn test_distance_km_known_pair() {
    // Grenoble station to Place Grenette, roughly 1.1 km apart.
    let station = Location::new(45.1914, 5.7146);
    let grenette = Location::new(45.1904, 5.7283);
    let d = station.distance_km(&grenette);
    assert!(d > 1.0 && d < 1.2, "got {}", d);
    assert_eq!(station.distance_km(&station), 0.0);
}

#[test]
fn test_key_merges_equal_points_only() {
    let a = Location::new(45.18, 5.72);
    let b = Location::new(45.18, 5.72);
    let c = Location::new(45.18, 5.7201);
    assert_eq!(a.key(), b.key());
    assert_ne!(a.key(), c.key());
}

#[test]
fn test_mode_parsing() {
    let mode: Mode = serde_json::from_str("\"tram\"").unwrap();
    assert_eq!(mode, Mode::Transit);
    let mode: Mode = serde_json::from_str("\"cycling\"").unwrap();
    assert_eq!(mode, Mode::Cycling);
    assert!(serde_json::from_str::<Mode>("\"boat\"").is_err());
    assert!(serde_json::from_str::<Mode>("\"car\"").is_err());
}

#[test]
fn test_duration_secs_rounds() {
    assert_eq!(duration_secs(1.0, 5.0), 720);
    assert_eq!(duration_secs(0.0, 5.0), 0);
    assert_eq!(duration_secs(1.2345, 5.0), (1.2345f64 / 5.0 * 3600.0).round() as u64);
}
