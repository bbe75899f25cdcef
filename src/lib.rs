use wasm_bindgen::prelude::*;
use serde::Deserialize;
use log::Level;
use wasm_bindgen_futures::future_to_promise;
use wasm_bindgen_futures::js_sys;

use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use serde_json::{json, Map};
use std::sync::{Arc, OnceLock};

pub mod config;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod itinerary;
pub mod planner;
pub mod polyline;
pub mod resolver;
pub mod router;
pub mod search;
pub mod types;

pub use self::config::RouterConfig;
pub use self::dataset::Dataset;
pub use self::error::Error;
pub use self::router::{Endpoint, RouteRequest, Router};
pub use self::types::{Location, Mode, RouteResult};

static DATASET: OnceLock<Arc<Dataset>> = OnceLock::new();

#[derive(Deserialize)]
pub struct RouteParams {
    pub origin: Option<Endpoint>,
    pub destination: Option<Endpoint>,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub config: Option<RouterConfig>,
}

#[wasm_bindgen]
pub fn rust_init() {
    if console_log::init_with_level(Level::Info).is_err() {
        return;
    }
    log::info!("Logger initialized from library");
}

/// Loads the street network (and optionally the transit network) once.
#[wasm_bindgen]
pub fn load_dataset(streets: &str, transit: Option<String>) -> Result<(), JsValue> {
    if DATASET.get().is_some() {
        log::warn!("Dataset already loaded, ignoring");
        return Ok(());
    }
    let dataset = Dataset::from_geojson(streets, transit.as_deref())
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    let _ = DATASET.set(Arc::new(dataset));
    Ok(())
}

impl RouteResult {
    /// Renders the route as a feature collection: one line per segment.
    pub fn to_geojson(&self) -> GeoJson {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for point in &self.route {
            min_x = min_x.min(point.lng);
            min_y = min_y.min(point.lat);
            max_x = max_x.max(point.lng);
            max_y = max_y.max(point.lat);
        }

        let features = self
            .segments
            .iter()
            .map(|segment| {
                let line = segment.points.iter().map(|p| vec![p.lng, p.lat]).collect();
                let mut properties = Map::new();
                properties.insert("type".to_string(), json!(segment.kind));
                properties.insert("distance".to_string(), json!(segment.distance));
                properties.insert("duration".to_string(), json!(segment.duration));
                if let Some(line_name) = &segment.line_name {
                    properties.insert("line_name".to_string(), json!(line_name));
                }
                if let Some(headsign) = &segment.headsign {
                    properties.insert("headsign".to_string(), json!(headsign));
                }
                Feature {
                    geometry: Some(Geometry::new(Value::LineString(line))),
                    properties: Some(properties),
                    ..Default::default()
                }
            })
            .collect();

        let mut foreign_members = Map::new();
        foreign_members.insert("transport_mode".to_string(), json!(self.mode));
        foreign_members.insert("distance".to_string(), json!(self.distance));
        foreign_members.insert("duration".to_string(), json!(self.duration));

        GeoJson::FeatureCollection(FeatureCollection {
            bbox: if self.route.is_empty() { None } else { Some(vec![min_x, min_y, max_x, max_y]) },
            features,
            foreign_members: Some(foreign_members),
        })
    }
}

pub async fn compute_route_async(dataset: Arc<Dataset>, params_json: &str) -> Result<RouteResult, String> {
    let params: RouteParams = serde_json::from_str(params_json)
        .map_err(|e| e.to_string())?;
    let request = RouteRequest {
        origin: params.origin,
        destination: params.destination,
        mode: params.mode.unwrap_or(Mode::Walking),
    };
    let router = Router::with_http_clients(dataset, params.config.unwrap_or_default());
    router.route(&request).await.map_err(|e| e.to_string())
}

fn loaded_dataset() -> Result<Arc<Dataset>, JsValue> {
    DATASET
        .get()
        .cloned()
        .ok_or_else(|| JsValue::from_str("dataset not loaded, call load_dataset first"))
}

#[wasm_bindgen]
pub fn compute_route(params: String) -> js_sys::Promise {
    future_to_promise(async move {
        let dataset = loaded_dataset()?;
        match compute_route_async(dataset, &params).await {
            Ok(result) => serde_wasm_bindgen::to_value(&result).map_err(JsValue::from),
            Err(e) => Err(JsValue::from_str(&e)),
        }
    })
}

#[wasm_bindgen]
pub fn compute_route_geojson(params: String) -> js_sys::Promise {
    future_to_promise(async move {
        let dataset = loaded_dataset()?;
        match compute_route_async(dataset, &params).await {
            Ok(result) => {
                let geojson_str = result.to_geojson().to_string();
                log::info!("GeoJson created: {} bytes", geojson_str.len());
                Ok(JsValue::from_str(&geojson_str))
            }
            Err(e) => Err(JsValue::from_str(&e)),
        }
    })
}

#[cfg(test)]
#[tokio::test]
async fn test_compute_route_async_walking() {
    let dataset = Arc::new(graph::test_dataset());
    let params = r#"{"origin": {"lat": 45.0, "lng": 5.0}, "destination": {"lat": 45.0, "lng": 5.02}}"#;
    let result = compute_route_async(dataset, params).await.unwrap();
    assert_eq!(result.mode, Mode::Walking);
    assert_eq!(result.route.len(), 3);
}

#[cfg(test)]
#[tokio::test]
async fn test_compute_route_async_reports_errors() {
    let dataset = Arc::new(Dataset::default());
    let params = r#"{"origin": {"lat": 45.0, "lng": 5.0}, "destination": {"lat": 45.0, "lng": 5.02}, "mode": "driving"}"#;
    let err = compute_route_async(dataset.clone(), params).await.unwrap_err();
    assert!(err.contains("driving"), "{}", err);

    let err = compute_route_async(dataset, r#"{"destination": {"lat": 45.0, "lng": 5.02}}"#).await.unwrap_err();
    assert!(err.starts_with("Missing input"), "{}", err);
}

#[test]
fn test_route_geojson() {
    use crate::types::{RoutePoint, Segment};

    let points = vec![RoutePoint { lat: 45.0, lng: 5.0 }, RoutePoint { lat: 45.01, lng: 5.02 }];
    let result = RouteResult {
        route: points.clone(),
        segments: vec![Segment {
            points,
            kind: "tram".to_string(),
            line_name: Some("B".to_string()),
            route_id: None,
            headsign: None,
            from_stop: None,
            to_stop: None,
            distance: 1.8,
            duration: 420,
        }],
        distance: 1.8,
        duration: 420,
        mode: Mode::Transit,
        street_names: None,
        instructions: None,
    };
    let GeoJson::FeatureCollection(collection) = result.to_geojson() else {
        panic!("expected a feature collection");
    };
    assert_eq!(collection.bbox, Some(vec![5.0, 45.0, 5.02, 45.01]));
    assert_eq!(collection.features.len(), 1);
    let properties = collection.features[0].properties.as_ref().unwrap();
    assert_eq!(properties["type"], "tram");
    assert_eq!(properties["line_name"], "B");
    assert_eq!(collection.foreign_members.unwrap()["transport_mode"], "transit");
}
