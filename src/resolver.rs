use rstar::primitives::GeomWithData;
use rstar::RTree;

use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::search::reachable_from;
use crate::types::Location;

type IndexedNode = GeomWithData<[f64; 2], NodeId>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub node: NodeId,
    pub offset_km: f64,
}

/// Graph nodes chosen for a query's origin and destination.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Resolution {
    pub start: Candidate,
    pub end: Candidate,
    /// False when no candidate pair was connected and the nearest nodes were used.
    pub connected: bool,
}

/// Spatial index over the nodes of one graph.
///
/// Points are stored in an equirectangular projection around the graph's mean
/// latitude so that Euclidean ordering tracks great-circle ordering at city scale.
pub struct NodeIndex {
    tree: RTree<IndexedNode>,
    lng_scale: f64,
}

impl NodeIndex {
    pub fn new(graph: &Graph) -> Self {
        let mean_lat = if graph.is_empty() {
            0.0
        } else {
            graph.locations().map(|(_, l)| l.latitude).sum::<f64>() / graph.node_count() as f64
        };
        let lng_scale = mean_lat.to_radians().cos();
        let points = graph
            .locations()
            .map(|(id, l)| GeomWithData::new(project(l, lng_scale), id))
            .collect();
        NodeIndex { tree: RTree::bulk_load(points), lng_scale }
    }

    /// Up to `k` nodes nearest to `point`, closest first.
    pub fn nearest(&self, graph: &Graph, point: &Location, k: usize) -> Vec<Candidate> {
        let query = project(point, self.lng_scale);
        let mut candidates: Vec<Candidate> = self
            .tree
            .nearest_neighbor_iter(&query)
            .take(k)
            .map(|n| Candidate {
                node: n.data,
                offset_km: point.distance_km(&graph.location(n.data)),
            })
            .collect();
        candidates.sort_by(|a, b| a.offset_km.total_cmp(&b.offset_km));
        candidates
    }
}

fn project(location: &Location, lng_scale: f64) -> [f64; 2] {
    [location.longitude * lng_scale, location.latitude]
}

pub fn nearest_candidates(graph: &Graph, point: &Location, k: usize) -> Result<Vec<Candidate>> {
    if graph.is_empty() {
        return Err(Error::EmptyGraph(graph.mode()));
    }
    Ok(NodeIndex::new(graph).nearest(graph, point, k.max(1)))
}

/// Picks start and end nodes that are connected to each other.
///
/// The `k` nearest nodes of each endpoint are paired origin-first, both in
/// ascending distance; the first pair with a path wins. When none of the
/// pairs is connected, the single nearest node on each side is used.
pub fn resolve_endpoints(graph: &Graph, origin: &Location, destination: &Location, k: usize) -> Result<Resolution> {
    if graph.is_empty() {
        return Err(Error::EmptyGraph(graph.mode()));
    }
    let index = NodeIndex::new(graph);
    let k = k.max(1);
    let origins = index.nearest(graph, origin, k);
    let destinations = index.nearest(graph, destination, k);

    for start in &origins {
        let reached = reachable_from(graph, start.node);
        if let Some(end) = destinations.iter().find(|d| reached[d.node]) {
            log::debug!(
                "Resolved nodes {} -> {} ({:.3} km / {:.3} km from query points)",
                start.node,
                end.node,
                start.offset_km,
                end.offset_km
            );
            return Ok(Resolution { start: *start, end: *end, connected: true });
        }
    }

    log::info!("No connected pair among {} x {} candidates, using nearest nodes", origins.len(), destinations.len());
    Ok(Resolution { start: origins[0], end: destinations[0], connected: false })
}

#[cfg(test)]
fn two_islands() -> Graph {
    use crate::config::Profiles;
    use crate::dataset::Dataset;
    use crate::graph::build_graph;
    use crate::types::{Direction, Mode, WayFeature};

    let way = |points: &[(f64, f64)]| WayFeature {
        geometry: points.iter().map(|&(lat, lng)| Location::new(lat, lng)).collect(),
        way_type: "footway".to_string(),
        direction: Direction::BothWays,
        name: None,
        destination: None,
    };
    let dataset = Dataset {
        ways: vec![
            // main network
            way(&[(45.0, 5.0), (45.0, 5.01), (45.0, 5.02), (45.0, 5.03)]),
            // isolated stub lying right next to the destination
            way(&[(45.0005, 5.0300), (45.0006, 5.0301)]),
        ],
        ..Default::default()
    };
    build_graph(&dataset, Mode::Walking, &Profiles::default().walking)
}

#[test]
fn test_nearest_candidates_are_sorted() {
    let graph = two_islands();
    let candidates = nearest_candidates(&graph, &Location::new(45.0, 5.012), 3).unwrap();
    assert_eq!(candidates.len(), 3);
    assert_eq!(graph.location(candidates[0].node), Location::new(45.0, 5.01));
    assert!(candidates.windows(2).all(|c| c[0].offset_km <= c[1].offset_km));
}

#[test]
fn test_prefers_connected_pair_over_nearest() {
    let graph = two_islands();
    let origin = Location::new(45.0, 5.0);
    let destination = Location::new(45.0006, 5.03015);
    let nearest = nearest_candidates(&graph, &destination, 1).unwrap()[0];
    assert_eq!(graph.location(nearest.node), Location::new(45.0006, 5.0301));

    let resolution = resolve_endpoints(&graph, &origin, &destination, 20).unwrap();
    assert!(resolution.connected);
    assert_eq!(graph.location(resolution.start.node), origin);
    assert_eq!(graph.location(resolution.end.node), Location::new(45.0, 5.03));
}

#[test]
fn test_falls_back_to_nearest_when_disconnected() {
    let graph = two_islands();
    let origin = Location::new(45.0, 5.0);
    let destination = Location::new(45.0006, 5.03015);
    // with a single candidate per side, the stub is the only choice
    let resolution = resolve_endpoints(&graph, &origin, &destination, 1).unwrap();
    assert!(!resolution.connected);
    assert_eq!(graph.location(resolution.end.node), Location::new(45.0006, 5.0301));
}

#[test]
fn test_empty_graph_is_an_error() {
    use crate::types::Mode;

    let graph = Graph::new(Mode::Cycling);
    let result = resolve_endpoints(&graph, &Location::new(45.0, 5.0), &Location::new(45.1, 5.1), 20);
    assert!(matches!(result, Err(Error::EmptyGraph(Mode::Cycling))));
}
