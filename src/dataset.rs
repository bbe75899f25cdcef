use geo::{Coord, LineString, MultiLineString, Point};
use geojson::{Feature, FeatureCollection, GeoJson, Value};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{Direction, Location, TransitLine, TransitStop, WayFeature};

/// Static street and transit network, loaded once and shared read-only.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub ways: Vec<WayFeature>,
    pub transit_lines: Vec<TransitLine>,
    pub stops: Vec<TransitStop>,
}

impl Dataset {
    pub fn from_geojson(streets: &str, transit: Option<&str>) -> Result<Self> {
        let ways = parse_ways(read_collection(streets)?);
        let (transit_lines, stops) = match transit {
            Some(transit) => parse_transit(read_collection(transit)?),
            None => (Vec::new(), Vec::new()),
        };
        log::info!(
            "Dataset loaded: {} ways, {} transit lines, {} stops",
            ways.len(),
            transit_lines.len(),
            stops.len()
        );
        Ok(Dataset { ways, transit_lines, stops })
    }

    pub fn load(street_path: impl AsRef<Path>, transit_path: Option<&Path>) -> Result<Self> {
        let streets = std::fs::read_to_string(street_path)?;
        let transit = transit_path.map(std::fs::read_to_string).transpose()?;
        Self::from_geojson(&streets, transit.as_deref())
    }
}

fn read_collection(text: &str) -> Result<FeatureCollection> {
    match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        GeoJson::Feature(feature) => Ok(FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: None,
        }),
        GeoJson::Geometry(_) => Err(Error::InvalidData("expected a feature collection".into())),
    }
}

fn property<'a>(feature: &'a Feature, key: &str) -> Option<&'a JsonValue> {
    feature.properties.as_ref().and_then(|props| props.get(key))
}

fn string_property(feature: &Feature, key: &str) -> Option<String> {
    match property(feature, key)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn direction(feature: &Feature) -> Direction {
    let oneway = match property(feature, "oneway") {
        Some(JsonValue::String(s)) => s.as_str(),
        Some(JsonValue::Bool(true)) => "yes",
        Some(JsonValue::Number(n)) if n.as_i64() == Some(1) => "yes",
        Some(JsonValue::Number(n)) if n.as_i64() == Some(-1) => "-1",
        _ => "",
    };
    match oneway {
        "yes" | "true" | "1" => Direction::ForwardOnly,
        "-1" | "reverse" => Direction::BackwardOnly,
        "no" | "false" | "0" => Direction::BothWays,
        _ if string_property(feature, "junction").as_deref() == Some("roundabout") => Direction::ForwardOnly,
        _ => Direction::BothWays,
    }
}

fn to_locations(line: &LineString<f64>) -> Vec<Location> {
    line.coords()
        .map(|&Coord { x, y }| Location { latitude: y, longitude: x })
        .collect()
}

// A feature may carry a LineString or a MultiLineString; anything else is not a way.
fn polylines(feature: &Feature) -> Vec<Vec<Location>> {
    let Some(geometry) = &feature.geometry else {
        return Vec::new();
    };
    let lines: Vec<LineString<f64>> = match &geometry.value {
        Value::LineString(_) => LineString::try_from(geometry.value.clone()).into_iter().collect(),
        Value::MultiLineString(_) => MultiLineString::try_from(geometry.value.clone())
            .map(|multi| multi.0)
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    lines
        .iter()
        .map(to_locations)
        .filter(|points| points.len() >= 2)
        .collect()
}

fn parse_ways(collection: FeatureCollection) -> Vec<WayFeature> {
    let mut ways = Vec::new();
    let mut skipped = 0;
    for feature in &collection.features {
        let Some(way_type) = string_property(feature, "highway") else {
            skipped += 1;
            continue;
        };
        let direction = direction(feature);
        let name = string_property(feature, "name");
        let destination = string_property(feature, "destination");
        for geometry in polylines(feature) {
            ways.push(WayFeature {
                geometry,
                way_type: way_type.clone(),
                direction,
                name: name.clone(),
                destination: destination.clone(),
            });
        }
    }
    if skipped > 0 {
        log::debug!("Skipped {} features without a highway tag", skipped);
    }
    ways
}

fn parse_transit(collection: FeatureCollection) -> (Vec<TransitLine>, Vec<TransitStop>) {
    let mut lines = Vec::new();
    let mut stops = Vec::new();
    for feature in &collection.features {
        let name = string_property(feature, "name").or_else(|| string_property(feature, "ref"));
        let is_point = matches!(
            feature.geometry.as_ref().map(|g| &g.value),
            Some(Value::Point(_))
        );
        if is_point {
            if let Some(Ok(point)) = feature.geometry.as_ref().map(|g| Point::<f64>::try_from(g.value.clone())) {
                stops.push(TransitStop {
                    location: Location { latitude: point.y(), longitude: point.x() },
                    name,
                });
            }
            continue;
        }
        let kind = ["route", "type", "mode"]
            .iter()
            .find_map(|key| string_property(feature, key))
            .map(|k| k.to_lowercase())
            .unwrap_or_else(|| "transit".to_string());
        for geometry in polylines(feature) {
            lines.push(TransitLine { geometry, kind: kind.clone(), name: name.clone() });
        }
    }
    (lines, stops)
}

#[test]
fn test_parse_streets() {
    let streets = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {"highway": "residential", "name": "Rue Félix Poulat", "oneway": "yes"},
         "geometry": {"type": "LineString", "coordinates": [[5.72, 45.19], [5.73, 45.19]]}},
        {"type": "Feature", "properties": {"highway": "primary", "oneway": "-1", "destination": "Lyon"},
         "geometry": {"type": "MultiLineString", "coordinates": [[[5.70, 45.18], [5.71, 45.18]], [[5.71, 45.18], [5.72, 45.18]]]}},
        {"type": "Feature", "properties": {"highway": "tertiary", "junction": "roundabout"},
         "geometry": {"type": "LineString", "coordinates": [[5.74, 45.17], [5.75, 45.17]]}},
        {"type": "Feature", "properties": {"highway": "footway"},
         "geometry": {"type": "LineString", "coordinates": [[5.74, 45.17]]}},
        {"type": "Feature", "properties": {"building": "yes"},
         "geometry": {"type": "LineString", "coordinates": [[5.74, 45.17], [5.75, 45.18]]}}
    ]}"#;
    let dataset = Dataset::from_geojson(streets, None).unwrap();
    assert_eq!(dataset.ways.len(), 4);
    let first = &dataset.ways[0];
    assert_eq!(first.direction, Direction::ForwardOnly);
    assert_eq!(first.label(), Some("Rue Félix Poulat"));
    assert_eq!(first.geometry[0], Location::new(45.19, 5.72));
    assert_eq!(dataset.ways[1].direction, Direction::BackwardOnly);
    assert_eq!(dataset.ways[2].label(), Some("Lyon"));
    assert_eq!(dataset.ways[3].direction, Direction::ForwardOnly);
    assert!(dataset.transit_lines.is_empty());
}

#[test]
fn test_parse_transit() {
    let transit = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {"route": "Tram", "ref": "A"},
         "geometry": {"type": "LineString", "coordinates": [[5.70, 45.18], [5.71, 45.18], [5.72, 45.19]]}},
        {"type": "Feature", "properties": {"name": "Gares"},
         "geometry": {"type": "Point", "coordinates": [5.71, 45.18]}}
    ]}"#;
    let dataset = Dataset::from_geojson(r#"{"type": "FeatureCollection", "features": []}"#, Some(transit)).unwrap();
    assert_eq!(dataset.transit_lines.len(), 1);
    assert_eq!(dataset.transit_lines[0].kind, "tram");
    assert_eq!(dataset.transit_lines[0].name.as_deref(), Some("A"));
    assert_eq!(dataset.stops.len(), 1);
    assert_eq!(dataset.stops[0].name.as_deref(), Some("Gares"));
}

#[test]
fn test_rejects_bare_geometry() {
    let result = Dataset::from_geojson(r#"{"type": "Point", "coordinates": [5.7, 45.1]}"#, None);
    assert!(matches!(result, Err(Error::InvalidData(_))));
}
