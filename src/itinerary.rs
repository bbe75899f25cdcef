use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::config::Profiles;
use crate::error::ItineraryError;
use crate::polyline;
use crate::types::{duration_secs, path_length_km, Instruction, Location, Mode, RoutePoint, RouteResult, Segment};

// ** Planner wire format (OpenTripPlanner `plan` response) **

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PlanResponse {
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub error: Option<JsonValue>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub itineraries: Vec<ExternalItinerary>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalItinerary {
    pub duration: Option<f64>,
    pub walk_distance: Option<f64>,
    pub legs: Option<Vec<Leg>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    pub mode: String,
    pub from: Place,
    pub to: Place,
    pub leg_geometry: Option<EncodedGeometry>,
    #[serde(default)]
    pub steps: Vec<Step>,
    pub route_short_name: Option<String>,
    pub route: Option<String>,
    pub route_id: Option<String>,
    pub headsign: Option<String>,
    /// Meters.
    pub distance: Option<f64>,
    /// Seconds.
    pub duration: Option<f64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Place {
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

impl Place {
    fn location(&self) -> Location {
        Location { latitude: self.lat, longitude: self.lon }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct EncodedGeometry {
    pub points: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub street_name: Option<String>,
    pub relative_direction: Option<String>,
    pub absolute_direction: Option<String>,
    pub distance: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl PlanResponse {
    /// The quickest itinerary of the plan, or why there is none.
    pub fn best_itinerary(self) -> Result<ExternalItinerary, ItineraryError> {
        if let Some(error) = self.error.filter(|e| !e.is_null()) {
            let message = error
                .get("msg")
                .or_else(|| error.get("message"))
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ItineraryError::Planner(message));
        }
        self.plan
            .map(|plan| plan.itineraries)
            .unwrap_or_default()
            .into_iter()
            .min_by(|a, b| {
                let a = a.duration.unwrap_or(f64::INFINITY);
                let b = b.duration.unwrap_or(f64::INFINITY);
                a.total_cmp(&b)
            })
            .ok_or(ItineraryError::Empty)
    }
}

fn is_walking(leg: &Leg) -> bool {
    leg.mode.eq_ignore_ascii_case("WALK")
}

fn leg_points(leg: &Leg, index: usize) -> Vec<Location> {
    let mut points = vec![leg.from.location()];
    if is_walking(leg) {
        points.extend(leg.steps.iter().filter_map(|step| match (step.lat, step.lon) {
            (Some(lat), Some(lon)) => Some(Location { latitude: lat, longitude: lon }),
            _ => None,
        }));
    } else if let Some(geometry) = &leg.leg_geometry {
        match polyline::decode(&geometry.points) {
            Ok(decoded) => points.extend(decoded),
            Err(err) => {
                log::warn!("Leg {} ({}): {}", index, leg.mode, err);
                points.extend(err.partial);
            }
        }
    }
    points.push(leg.to.location());
    points
}

fn push_deduplicated(route: &mut Vec<RoutePoint>, point: RoutePoint) {
    if route.last() != Some(&point) {
        route.push(point);
    }
}

/// Turns a planner itinerary into a transit `RouteResult`.
///
/// The route starts at `origin` and ends at `destination` even when the
/// planner snapped them to nearby places. A leg whose geometry fails to decode
/// keeps the points read before the fault.
pub fn translate_itinerary(
    itinerary: ExternalItinerary,
    origin: &Location,
    destination: &Location,
    profiles: &Profiles,
) -> Result<RouteResult, ItineraryError> {
    let duration = itinerary.duration.ok_or(ItineraryError::MissingDuration)?;
    let legs = itinerary.legs.filter(|legs| !legs.is_empty()).ok_or(ItineraryError::MissingLegs)?;

    let mut route = vec![RoutePoint::from(*origin)];
    let mut segments = Vec::with_capacity(legs.len());
    let mut instructions = Vec::new();

    for (index, leg) in legs.iter().enumerate() {
        let points = leg_points(leg, index);
        let walking = is_walking(leg);
        let kind = if walking { "walking".to_string() } else { leg.mode.to_lowercase() };

        let distance = match leg.distance {
            Some(meters) if meters >= 0.0 => meters / 1000.0,
            _ => path_length_km(&points),
        };
        let segment_duration = match leg.duration {
            Some(seconds) if seconds >= 0.0 => seconds.round() as u64,
            _ => {
                let speed = if walking { profiles.walking.speed_kmh } else { profiles.transit.speed_kmh };
                duration_secs(distance, speed)
            }
        };

        instructions.extend(leg.steps.iter().map(|step| Instruction {
            distance: step.distance.unwrap_or(0.0) / 1000.0,
            relative_direction: step.relative_direction.clone(),
            absolute_direction: step.absolute_direction.clone(),
            street_name: step.street_name.clone(),
            mode: kind.clone(),
        }));

        for point in &points {
            push_deduplicated(&mut route, RoutePoint::from(*point));
        }

        segments.push(Segment {
            points: points.into_iter().map(RoutePoint::from).collect(),
            line_name: if walking { None } else { leg.route_short_name.clone().or_else(|| leg.route.clone()) },
            route_id: if walking { None } else { leg.route_id.clone() },
            headsign: if walking { None } else { leg.headsign.clone() },
            from_stop: leg.from.name.clone(),
            to_stop: leg.to.name.clone(),
            kind,
            distance,
            duration: segment_duration,
        });
    }
    push_deduplicated(&mut route, RoutePoint::from(*destination));

    log::info!(
        "Transit itinerary: {} legs, {:.0} s, {:.0} m walking",
        segments.len(),
        duration,
        itinerary.walk_distance.unwrap_or(0.0)
    );

    Ok(RouteResult {
        route,
        distance: segments.iter().map(|s| s.distance).sum(),
        duration: duration.max(0.0).round() as u64,
        segments,
        mode: Mode::Transit,
        street_names: None,
        instructions: if instructions.is_empty() { None } else { Some(instructions) },
    })
}

#[cfg(test)]
pub(crate) const SAMPLE_PLAN: &str = r#"{
  "plan": {
    "itineraries": [
      {"duration": 2400.0, "walkDistance": 900.0, "legs": []},
      {
        "duration": 1260.0,
        "walkDistance": 310.5,
        "legs": [
          {
            "mode": "WALK",
            "from": {"name": "Origin", "lat": 45.1980908, "lon": 5.7384596},
            "to": {"name": "Chavant", "lat": 45.1876, "lon": 5.7329},
            "distance": 180.4,
            "duration": 150.0,
            "steps": [
              {"streetName": "Boulevard Maréchal Lyautey", "relativeDirection": "DEPART", "absoluteDirection": "SOUTH", "distance": 120.0, "lat": 45.1978, "lon": 5.7382},
              {"streetName": "Rue Sergent Bobillot", "relativeDirection": "RIGHT", "absoluteDirection": "WEST", "distance": 60.4}
            ]
          },
          {
            "mode": "TRAM",
            "from": {"name": "Chavant", "lat": 45.1876, "lon": 5.7329},
            "to": {"name": "Gares", "lat": 45.1914, "lon": 5.7146},
            "routeShortName": "A",
            "routeId": "SEM:A",
            "headsign": "Fontaine La Poya",
            "legGeometry": {"points": "_p~iF~ps|U_ulLnnqC"},
            "distance": 2100.0,
            "duration": 960.0
          },
          {
            "mode": "WALK",
            "from": {"name": "Gares", "lat": 45.1914, "lon": 5.7146},
            "to": {"name": "Destination", "lat": 45.1897742, "lon": 5.7155743},
            "distance": 130.1,
            "duration": 150.0
          }
        ]
      }
    ]
  }
}"#;

#[test]
fn test_best_itinerary_is_the_quickest() {
    let response: PlanResponse = serde_json::from_str(SAMPLE_PLAN).unwrap();
    let best = response.best_itinerary().unwrap();
    assert_eq!(best.duration, Some(1260.0));
    assert_eq!(best.legs.unwrap().len(), 3);
}

#[test]
fn test_planner_error_and_empty_plans() {
    let response: PlanResponse =
        serde_json::from_str(r#"{"error": {"id": 404, "msg": "PATH_NOT_FOUND"}}"#).unwrap();
    assert_eq!(response.best_itinerary().unwrap_err(), ItineraryError::Planner("PATH_NOT_FOUND".to_string()));

    let response: PlanResponse = serde_json::from_str(r#"{"plan": {"itineraries": []}}"#).unwrap();
    assert_eq!(response.best_itinerary().unwrap_err(), ItineraryError::Empty);

    let response: PlanResponse = serde_json::from_str("{}").unwrap();
    assert_eq!(response.best_itinerary().unwrap_err(), ItineraryError::Empty);
}

#[test]
fn test_translate_sample_itinerary() {
    let origin = Location::new(45.1980908, 5.7384596);
    let destination = Location::new(45.1897742, 5.7155743);
    let itinerary = serde_json::from_str::<PlanResponse>(SAMPLE_PLAN).unwrap().best_itinerary().unwrap();
    let result = translate_itinerary(itinerary, &origin, &destination, &Profiles::default()).unwrap();

    assert_eq!(result.mode, Mode::Transit);
    assert_eq!(result.duration, 1260);
    assert_eq!(result.route[0], RoutePoint::from(origin));
    assert_eq!(*result.route.last().unwrap(), RoutePoint::from(destination));
    assert!((result.distance - 2.4105).abs() < 1e-9);

    assert_eq!(result.segments.len(), 3);
    let walk = &result.segments[0];
    assert_eq!(walk.kind, "walking");
    // from + the one step carrying a position + to
    assert_eq!(walk.points.len(), 3);
    assert_eq!(walk.to_stop.as_deref(), Some("Chavant"));

    let tram = &result.segments[1];
    assert_eq!(tram.kind, "tram");
    assert_eq!(tram.line_name.as_deref(), Some("A"));
    assert_eq!(tram.route_id.as_deref(), Some("SEM:A"));
    assert_eq!(tram.headsign.as_deref(), Some("Fontaine La Poya"));
    assert_eq!(tram.points.len(), 4);
    assert_eq!(tram.duration, 960);
    assert!(result.segments.iter().all(|s| s.points.len() >= 2));

    let instructions = result.instructions.unwrap();
    assert_eq!(instructions.len(), 2);
    assert_eq!(instructions[1].relative_direction.as_deref(), Some("RIGHT"));
    assert!((instructions[0].distance - 0.12).abs() < 1e-9);
    assert_eq!(instructions[0].mode, "walking");
}

#[test]
fn test_bad_leg_geometry_does_not_abort() {
    let origin = Location::new(45.1980908, 5.7384596);
    let destination = Location::new(45.1897742, 5.7155743);
    let broken = SAMPLE_PLAN.replace("_p~iF~ps|U_ulLnnqC", "_p~iF~ps|U_ulL");
    let itinerary = serde_json::from_str::<PlanResponse>(&broken).unwrap().best_itinerary().unwrap();
    let result = translate_itinerary(itinerary, &origin, &destination, &Profiles::default()).unwrap();
    // the first decoded point survives between the two stops
    assert_eq!(result.segments[1].points.len(), 3);
    assert_eq!(result.segments.len(), 3);
}

#[test]
fn test_itinerary_without_legs_or_duration() {
    let origin = Location::new(45.0, 5.0);
    let profiles = Profiles::default();
    let no_legs = ExternalItinerary { duration: Some(100.0), ..Default::default() };
    assert_eq!(
        translate_itinerary(no_legs, &origin, &origin, &profiles).unwrap_err(),
        ItineraryError::MissingLegs
    );
    let no_duration = ExternalItinerary { legs: Some(Vec::new()), ..Default::default() };
    assert_eq!(
        translate_itinerary(no_duration, &origin, &origin, &profiles).unwrap_err(),
        ItineraryError::MissingDuration
    );
}
