use serde::Deserialize;
use std::sync::Arc;

use crate::config::RouterConfig;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::graph::{build_graph, Graph, NodeId};
use crate::itinerary::translate_itinerary;
use crate::planner::{with_retries, Geocoder, NominatimGeocoder, OtpPlanner, TransitPlanner};
use crate::resolver::resolve_endpoints;
use crate::search::{shortest_path, Path};
use crate::types::{duration_secs, Location, Mode, RoutePoint, RouteResult, Segment};

/// A route endpoint as given by the caller.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Coordinates { lat: f64, lng: f64 },
    Address(String),
}

impl From<Location> for Endpoint {
    fn from(location: Location) -> Self {
        Endpoint::Coordinates { lat: location.latitude, lng: location.longitude }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RouteRequest {
    pub origin: Option<Endpoint>,
    pub destination: Option<Endpoint>,
    #[serde(default = "default_mode")]
    pub mode: Mode,
}

fn default_mode() -> Mode {
    Mode::Walking
}

impl RouteRequest {
    pub fn new(origin: impl Into<Endpoint>, destination: impl Into<Endpoint>, mode: Mode) -> Self {
        RouteRequest {
            origin: Some(origin.into()),
            destination: Some(destination.into()),
            mode,
        }
    }
}

/// Computes routes over a shared, read-only dataset.
///
/// Every request builds its own graph; nothing is cached between requests.
pub struct Router<G, P> {
    dataset: Arc<Dataset>,
    config: RouterConfig,
    geocoder: G,
    planner: P,
}

impl Router<NominatimGeocoder, OtpPlanner> {
    pub fn with_http_clients(dataset: Arc<Dataset>, config: RouterConfig) -> Self {
        let geocoder = NominatimGeocoder::new(&config);
        let planner = OtpPlanner::new(&config);
        Router::new(dataset, config, geocoder, planner)
    }
}

impl<G: Geocoder, P: TransitPlanner> Router<G, P> {
    pub fn new(dataset: Arc<Dataset>, config: RouterConfig, geocoder: G, planner: P) -> Self {
        Router { dataset, config, geocoder, planner }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub async fn route(&self, request: &RouteRequest) -> Result<RouteResult> {
        log::debug!("RESOLVE_ENDPOINTS");
        let origin = self.resolve_endpoint(request.origin.as_ref(), "origin").await?;
        let destination = self.resolve_endpoint(request.destination.as_ref(), "destination").await?;

        let mut mode = request.mode;
        if mode == Mode::Transit {
            log::debug!("TRY_TRANSIT");
            if let Some(result) = self.try_transit(&origin, &destination).await {
                log::debug!("DONE");
                return Ok(result);
            }
            mode = Mode::Walking;
        }

        let result = self.route_on_network(&origin, &destination, mode);
        match &result {
            Ok(_) => log::debug!("DONE"),
            Err(err) => log::debug!("FAILED: {}", err),
        }
        result
    }

    async fn resolve_endpoint(&self, endpoint: Option<&Endpoint>, which: &str) -> Result<Location> {
        match endpoint {
            None => Err(Error::MissingInput(format!("{} is required", which))),
            Some(Endpoint::Coordinates { lat, lng }) => {
                let location = Location { latitude: *lat, longitude: *lng };
                if location.is_finite() {
                    Ok(location)
                } else {
                    Err(Error::MissingInput(format!("{} coordinates are not valid numbers", which)))
                }
            }
            Some(Endpoint::Address(address)) if address.trim().is_empty() => {
                Err(Error::MissingInput(format!("{} address is empty", which)))
            }
            Some(Endpoint::Address(address)) => self.geocoder.geocode(address.trim()).await,
        }
    }

    /// Asks the planner for an itinerary. `None` means transit is unavailable
    /// and the request continues on foot.
    async fn try_transit(&self, origin: &Location, destination: &Location) -> Option<RouteResult> {
        let response = with_retries(self.config.transit_attempts, self.config.retry_delay(), || {
            self.planner.plan(origin, destination)
        })
        .await;
        let itinerary = match response {
            Ok(response) => response.best_itinerary(),
            Err(err) => {
                log::warn!("Transit planner unavailable ({}), falling back to walking", err);
                return None;
            }
        };
        match itinerary.and_then(|it| translate_itinerary(it, origin, destination, &self.config.profiles)) {
            Ok(result) => Some(result),
            Err(err) => {
                log::warn!("Unusable transit itinerary ({}), falling back to walking", err);
                None
            }
        }
    }

    /// Routes over the street graph of `mode`.
    pub fn route_on_network(&self, origin: &Location, destination: &Location, mode: Mode) -> Result<RouteResult> {
        let profile = self.config.profiles.get(mode);

        log::debug!("BUILD_GRAPH ({})", mode);
        let graph = build_graph(&self.dataset, mode, profile);

        log::debug!("RESOLVE_NODES");
        let resolution = resolve_endpoints(&graph, origin, destination, self.config.candidate_count)?;
        let (start, end) = (resolution.start.node, resolution.end.node);

        log::debug!("SEARCH_PATH");
        let path = validated_path(&graph, shortest_path(&graph, start, end), start, end);

        log::debug!("ASSEMBLE");
        let mut street_names: Vec<String> = Vec::new();
        for pair in path.nodes.windows(2) {
            let label = graph.edge(pair[0], pair[1]).and_then(|edge| graph.label(edge));
            if let Some(label) = label {
                if street_names.last().map(String::as_str) != Some(label) {
                    street_names.push(label.to_string());
                }
            }
        }

        let mut route: Vec<RoutePoint> = Vec::with_capacity(path.nodes.len() + 2);
        let points = std::iter::once(*origin)
            .chain(path.nodes.iter().map(|&node| graph.location(node)))
            .chain(std::iter::once(*destination));
        for point in points.map(RoutePoint::from) {
            if route.last() != Some(&point) {
                route.push(point);
            }
        }
        if route.len() < 2 {
            route.push(RoutePoint::from(*destination));
        }

        let distance = resolution.start.offset_km + path.weight_km + resolution.end.offset_km;
        let duration = duration_secs(distance, profile.speed_kmh);
        log::info!("{} route: {} points, {:.3} km, {} s", mode, route.len(), distance, duration);

        Ok(RouteResult {
            segments: vec![Segment {
                points: route.clone(),
                kind: mode.to_string(),
                line_name: None,
                route_id: None,
                headsign: None,
                from_stop: None,
                to_stop: None,
                distance,
                duration,
            }],
            route,
            distance,
            duration,
            mode,
            street_names: if street_names.is_empty() { None } else { Some(street_names) },
            instructions: None,
        })
    }
}

/// Keeps a search result only if every hop is an edge of `graph`;
/// otherwise the route degrades to a direct line.
fn validated_path(graph: &Graph, path: Option<Path>, start: NodeId, end: NodeId) -> Path {
    match path {
        Some(path) if graph.is_connected_path(&path.nodes) => path,
        Some(_) => {
            log::warn!("Path {} -> {} uses missing edges, using a direct line", start, end);
            Path::direct(graph, start, end)
        }
        None => {
            log::info!("No {} path between {} and {}, using a direct line", graph.mode(), start, end);
            Path::direct(graph, start, end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlannerError;
    use crate::itinerary::{PlanResponse, SAMPLE_PLAN};
    use std::cell::Cell;
    use std::collections::HashMap;

    struct MapGeocoder(HashMap<&'static str, Location>);

    impl Geocoder for MapGeocoder {
        async fn geocode(&self, address: &str) -> Result<Location> {
            self.0
                .get(address)
                .copied()
                .ok_or_else(|| Error::AddressNotFound(address.to_string()))
        }
    }

    /// Replays canned planner outcomes, one per call.
    struct ScriptedPlanner {
        replies: Vec<std::result::Result<&'static str, PlannerError>>,
        calls: Cell<usize>,
    }

    impl ScriptedPlanner {
        fn new(replies: Vec<std::result::Result<&'static str, PlannerError>>) -> Self {
            ScriptedPlanner { replies, calls: Cell::new(0) }
        }
    }

    impl TransitPlanner for ScriptedPlanner {
        async fn plan(&self, _: &Location, _: &Location) -> std::result::Result<PlanResponse, PlannerError> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            match &self.replies[n.min(self.replies.len() - 1)] {
                Ok(body) => serde_json::from_str(body).map_err(|e| PlannerError::Decode(e.to_string())),
                Err(err) => Err(err.clone()),
            }
        }
    }

    fn router(planner: ScriptedPlanner) -> Router<MapGeocoder, ScriptedPlanner> {
        let mut addresses = HashMap::new();
        addresses.insert("Place Grenette", Location::new(45.0, 5.0));
        let config = RouterConfig { retry_delay_ms: 0, ..RouterConfig::default() };
        Router::new(
            Arc::new(crate::graph::test_dataset()),
            config,
            MapGeocoder(addresses),
            planner,
        )
    }

    fn assert_endpoints(result: &RouteResult, origin: Location, destination: Location) {
        assert_eq!(result.route[0], RoutePoint::from(origin));
        assert_eq!(*result.route.last().unwrap(), RoutePoint::from(destination));
        assert!(result.segments.iter().all(|s| s.points.len() >= 2));
    }

    #[tokio::test]
    async fn test_walking_route_keeps_literal_endpoints() {
        let router = router(ScriptedPlanner::new(vec![]));
        let origin = Location::new(44.9995, 4.9995);
        let destination = Location::new(45.0102, 5.0301);
        let result = router.route(&RouteRequest::new(origin, destination, Mode::Walking)).await.unwrap();

        assert_eq!(result.mode, Mode::Walking);
        assert_endpoints(&result, origin, destination);
        // origin, 5 street nodes, destination
        assert_eq!(result.route.len(), 7);
        assert_eq!(
            result.street_names,
            Some(vec!["Rue A".to_string(), "Cours B".to_string(), "Passage C".to_string()])
        );
        assert_eq!(result.duration, (result.distance / 5.0 * 3600.0).round() as u64);
        assert_eq!(result.segments[0].kind, "walking");
    }

    #[test]
    fn test_driving_respects_oneway_when_resolving() {
        let router = router(ScriptedPlanner::new(vec![]));
        let origin = Location::new(45.01, 5.02);
        let destination = Location::new(45.0, 5.02);
        // Nothing leaves the north end of Cours B by car, so the only
        // connected pair is that node with itself.
        let result = router.route_on_network(&origin, &destination, Mode::Driving).unwrap();
        assert_endpoints(&result, origin, destination);
        assert_eq!(result.mode, Mode::Driving);
        assert_eq!(result.route.len(), 2);
        assert!((result.distance - origin.distance_km(&destination)).abs() < 1e-9);
        assert!(result.street_names.is_none());
    }

    #[tokio::test]
    async fn test_addresses_are_geocoded() {
        let router = router(ScriptedPlanner::new(vec![]));
        let request = RouteRequest {
            origin: Some(Endpoint::Address("Place Grenette".to_string())),
            destination: Some(Endpoint::Coordinates { lat: 45.0, lng: 5.02 }),
            mode: Mode::Cycling,
        };
        let result = router.route(&request).await.unwrap();
        assert_endpoints(&result, Location::new(45.0, 5.0), Location::new(45.0, 5.02));
        assert_eq!(result.route.len(), 3);
        assert_eq!(result.duration, (result.distance / 15.0 * 3600.0).round() as u64);
    }

    #[tokio::test]
    async fn test_missing_and_unknown_endpoints() {
        let router = router(ScriptedPlanner::new(vec![]));
        let missing = RouteRequest { origin: None, destination: Some(Location::new(45.0, 5.0).into()), mode: Mode::Walking };
        assert!(matches!(router.route(&missing).await, Err(Error::MissingInput(_))));

        let blank = RouteRequest::new(Endpoint::Address("  ".to_string()), Location::new(45.0, 5.0), Mode::Walking);
        assert!(matches!(router.route(&blank).await, Err(Error::MissingInput(_))));

        let unknown = RouteRequest::new(Endpoint::Address("Atlantis".to_string()), Location::new(45.0, 5.0), Mode::Walking);
        assert!(matches!(router.route(&unknown).await, Err(Error::AddressNotFound(_))));
    }

    #[tokio::test]
    async fn test_transit_success_bypasses_graph() {
        let router = router(ScriptedPlanner::new(vec![Ok(SAMPLE_PLAN)]));
        let origin = Location::new(45.1980908, 5.7384596);
        let destination = Location::new(45.1897742, 5.7155743);
        let result = router.route(&RouteRequest::new(origin, destination, Mode::Transit)).await.unwrap();
        assert_eq!(result.mode, Mode::Transit);
        assert_eq!(result.segments.len(), 3);
        assert_endpoints(&result, origin, destination);
    }

    #[tokio::test]
    async fn test_unusable_transit_downgrades_to_walking() {
        let origin = Location::new(45.0, 5.0);
        let destination = Location::new(45.01, 5.03);
        let replies = [
            r#"{"error": {"id": 500, "msg": "SYSTEM_ERROR"}}"#,
            r#"{"plan": {"itineraries": [{"duration": 600.0}]}}"#,
            r#"{"plan": {"itineraries": [{"legs": []}]}}"#,
            r#"{}"#,
        ];
        for reply in replies {
            let router = router(ScriptedPlanner::new(vec![Ok(reply)]));
            let result = router.route(&RouteRequest::new(origin, destination, Mode::Transit)).await.unwrap();
            assert_eq!(result.mode, Mode::Walking, "reply {}", reply);
            assert_endpoints(&result, origin, destination);
        }
    }

    #[tokio::test]
    async fn test_transit_retries_server_errors() {
        let planner = ScriptedPlanner::new(vec![
            Err(PlannerError::ServerError(503)),
            Err(PlannerError::Timeout),
            Ok(SAMPLE_PLAN),
        ]);
        let router = router(planner);
        let request = RouteRequest::new(Location::new(45.19, 5.73), Location::new(45.18, 5.71), Mode::Transit);
        let result = router.route(&request).await.unwrap();
        assert_eq!(result.mode, Mode::Transit);
        assert_eq!(router.planner.calls.get(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_planner_is_not_retried() {
        let planner = ScriptedPlanner::new(vec![Err(PlannerError::Unreachable("dns".to_string())), Ok(SAMPLE_PLAN)]);
        let router = router(planner);
        let request = RouteRequest::new(Location::new(45.0, 5.0), Location::new(45.0, 5.02), Mode::Transit);
        let result = router.route(&request).await.unwrap();
        assert_eq!(result.mode, Mode::Walking);
        assert_eq!(router.planner.calls.get(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_downgrade() {
        let planner = ScriptedPlanner::new(vec![Err(PlannerError::ServerError(502))]);
        let router = router(planner);
        let request = RouteRequest::new(Location::new(45.0, 5.0), Location::new(45.0, 5.02), Mode::Transit);
        let result = router.route(&request).await.unwrap();
        assert_eq!(result.mode, Mode::Walking);
        assert_eq!(router.planner.calls.get(), 3);
    }

    #[test]
    fn test_disconnected_components_use_direct_line() {
        use crate::types::{Direction, WayFeature};

        let way = |a: (f64, f64), b: (f64, f64)| WayFeature {
            geometry: vec![Location::new(a.0, a.1), Location::new(b.0, b.1)],
            way_type: "footway".to_string(),
            direction: Direction::BothWays,
            name: None,
            destination: None,
        };
        let dataset = Dataset {
            ways: vec![way((45.0, 5.0), (45.0, 5.01)), way((45.1, 5.1), (45.1, 5.11))],
            ..Default::default()
        };
        // two candidates per side only ever see their own component
        let config = RouterConfig { candidate_count: 2, ..RouterConfig::default() };
        let router = Router::new(
            Arc::new(dataset),
            config,
            MapGeocoder(HashMap::new()),
            ScriptedPlanner::new(vec![]),
        );
        let origin = Location::new(45.0, 5.0);
        let destination = Location::new(45.1, 5.11);
        let result = router.route_on_network(&origin, &destination, Mode::Walking).unwrap();
        assert_eq!(result.route, vec![RoutePoint::from(origin), RoutePoint::from(destination)]);
        assert!((result.distance - origin.distance_km(&destination)).abs() < 1e-9);
        assert!(result.street_names.is_none());
    }

    #[test]
    fn test_empty_graph_is_reported() {
        let router = Router::new(
            Arc::new(Dataset::default()),
            RouterConfig::default(),
            MapGeocoder(HashMap::new()),
            ScriptedPlanner::new(vec![]),
        );
        let result = router.route_on_network(&Location::new(45.0, 5.0), &Location::new(45.1, 5.1), Mode::Driving);
        assert!(matches!(result, Err(Error::EmptyGraph(Mode::Driving))));
    }

    #[test]
    fn test_request_from_json() {
        let request: RouteRequest = serde_json::from_str(
            r#"{"origin": {"lat": 45.19, "lng": 5.72}, "destination": "Gare de Grenoble", "mode": "tram"}"#,
        )
        .unwrap();
        assert!(matches!(request.origin, Some(Endpoint::Coordinates { .. })));
        assert!(matches!(request.destination, Some(Endpoint::Address(_))));
        assert_eq!(request.mode, Mode::Transit);
    }

    #[test]
    fn test_path_with_missing_edge_becomes_direct_line() {
        let dataset = crate::graph::test_dataset();
        let config = RouterConfig::default();
        let graph = build_graph(&dataset, Mode::Walking, config.profiles.get(Mode::Walking));
        let node = |lat, lng| graph.node_at(&Location::new(lat, lng)).unwrap();
        let (a, b, c) = (node(45.0, 5.0), node(45.0, 5.01), node(45.0, 5.02));

        let found = Path { nodes: vec![a, b, c], weight_km: 1.5 };
        let kept = validated_path(&graph, Some(found.clone()), a, c);
        assert_eq!(kept.nodes, found.nodes);

        // a and c are only joined through b
        let stale = Path { nodes: vec![a, c, b], weight_km: 0.1 };
        let path = validated_path(&graph, Some(stale), a, b);
        assert_eq!(path.nodes, vec![a, b]);
        assert!((path.weight_km - graph.location(a).distance_km(&graph.location(b))).abs() < 1e-12);

        let path = validated_path(&graph, None, a, c);
        assert_eq!(path.nodes, vec![a, c]);
    }
}
