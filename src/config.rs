use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::types::{BoundingCoordinates, Mode};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModeProfile {
    pub speed_kmh: f64,
    /// Accepted `highway` values. Ignored for transit, which uses every transit line.
    #[serde(default)]
    pub way_types: Vec<String>,
}

impl ModeProfile {
    fn new(speed_kmh: f64, way_types: &[&str]) -> Self {
        ModeProfile {
            speed_kmh,
            way_types: way_types.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn allows(&self, way_type: &str) -> bool {
        self.way_types.iter().any(|t| t == way_type)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Profiles {
    pub walking: ModeProfile,
    pub cycling: ModeProfile,
    pub driving: ModeProfile,
    pub transit: ModeProfile,
}

impl Profiles {
    pub fn get(&self, mode: Mode) -> &ModeProfile {
        match mode {
            Mode::Walking => &self.walking,
            Mode::Cycling => &self.cycling,
            Mode::Driving => &self.driving,
            Mode::Transit => &self.transit,
        }
    }
}

impl Default for Profiles {
    fn default() -> Self {
        Profiles {
            walking: ModeProfile::new(5.0, &[
                "footway", "path", "pedestrian", "steps", "living_street", "residential",
                "service", "unclassified", "tertiary", "secondary", "primary", "track", "cycleway",
            ]),
            cycling: ModeProfile::new(15.0, &[
                "cycleway", "path", "living_street", "residential", "service",
                "unclassified", "tertiary", "secondary", "primary", "track",
            ]),
            driving: ModeProfile::new(40.0, &[
                "motorway", "motorway_link", "trunk", "trunk_link", "primary", "primary_link",
                "secondary", "secondary_link", "tertiary", "tertiary_link", "unclassified",
                "residential", "service", "living_street",
            ]),
            transit: ModeProfile::new(20.0, &[]),
        }
    }
}

/// Everything the router needs besides the dataset.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub planner_url: String,
    pub planner_mode: String,
    pub max_walk_distance_m: u32,
    pub num_itineraries: u32,
    pub planner_timeout_secs: u64,
    pub transit_attempts: u32,
    pub retry_delay_ms: u64,
    pub geocoder_url: String,
    pub geocoder_timeout_secs: u64,
    pub viewbox: BoundingCoordinates,
    pub candidate_count: usize,
    pub profiles: Profiles,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            planner_url: "https://data.mobilites-m.fr/api/".to_string(),
            planner_mode: "TRANSIT,WALK".to_string(),
            max_walk_distance_m: 200,
            num_itineraries: 3,
            planner_timeout_secs: 30,
            transit_attempts: 3,
            retry_delay_ms: 1000,
            geocoder_url: "https://nominatim.openstreetmap.org/search".to_string(),
            geocoder_timeout_secs: 10,
            // Grenoble metropolitan area
            viewbox: BoundingCoordinates {
                north_latitude: 45.25,
                south_latitude: 45.10,
                east_longitude: 5.85,
                west_longitude: 5.60,
            },
            candidate_count: 20,
            profiles: Profiles::default(),
        }
    }
}

impl RouterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn planner_timeout(&self) -> Duration {
        Duration::from_secs(self.planner_timeout_secs)
    }

    pub fn geocoder_timeout(&self) -> Duration {
        Duration::from_secs(self.geocoder_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[test]
fn test_partial_config_keeps_defaults() {
    let config = RouterConfig::from_json(r#"{"retry_delay_ms": 0, "profiles": {"walking": {"speed_kmh": 4.0}}}"#).unwrap();
    assert_eq!(config.retry_delay_ms, 0);
    assert_eq!(config.transit_attempts, 3);
    assert_eq!(config.profiles.walking.speed_kmh, 4.0);
    assert!(config.profiles.walking.way_types.is_empty());
    assert_eq!(config.profiles.driving.speed_kmh, 40.0);
    assert!(config.profiles.driving.allows("motorway"));
    assert!(!config.profiles.cycling.allows("motorway"));
}
