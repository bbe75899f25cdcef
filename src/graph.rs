use std::collections::HashMap;

use crate::config::ModeProfile;
use crate::dataset::Dataset;
use crate::types::{Direction, Location, Mode, NodeKey};

pub type NodeId = usize;

#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    pub target: NodeId,
    pub weight_km: f64,
    /// Index into `Graph::labels`.
    pub label: Option<usize>,
    pub directed: bool,
}

/// Weighted graph for a single mode, built per request.
#[derive(Debug)]
pub struct Graph {
    mode: Mode,
    nodes: Vec<Location>,
    index: HashMap<NodeKey, NodeId>,
    outgoing: Vec<Vec<Edge>>,
    incoming: Vec<Vec<Edge>>,
    labels: Vec<String>,
    label_index: HashMap<String, usize>,
}

impl Graph {
    pub fn new(mode: Mode) -> Self {
        Graph {
            mode,
            nodes: Vec::new(),
            index: HashMap::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            labels: Vec::new(),
            label_index: HashMap::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn location(&self, node: NodeId) -> Location {
        self.nodes[node]
    }

    pub fn locations(&self) -> impl Iterator<Item = (NodeId, &Location)> {
        self.nodes.iter().enumerate()
    }

    pub fn node_at(&self, location: &Location) -> Option<NodeId> {
        self.index.get(&location.key()).copied()
    }

    pub fn outgoing(&self, node: NodeId) -> &[Edge] {
        &self.outgoing[node]
    }

    pub fn incoming(&self, node: NodeId) -> &[Edge] {
        &self.incoming[node]
    }

    /// Cheapest edge from `from` to `to`, if any.
    pub fn edge(&self, from: NodeId, to: NodeId) -> Option<&Edge> {
        self.outgoing
            .get(from)?
            .iter()
            .filter(|e| e.target == to)
            .min_by(|a, b| a.weight_km.total_cmp(&b.weight_km))
    }

    pub fn label(&self, edge: &Edge) -> Option<&str> {
        edge.label.map(|i| self.labels[i].as_str())
    }

    /// True when every consecutive pair of `path` is joined by an edge.
    pub fn is_connected_path(&self, path: &[NodeId]) -> bool {
        path.windows(2).all(|pair| self.edge(pair[0], pair[1]).is_some())
    }

    fn add_node(&mut self, location: Location) -> NodeId {
        if let Some(&id) = self.index.get(&location.key()) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(location);
        self.index.insert(location.key(), id);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    fn intern_label(&mut self, label: Option<&str>) -> Option<usize> {
        let label = label?;
        if let Some(&i) = self.label_index.get(label) {
            return Some(i);
        }
        let i = self.labels.len();
        self.labels.push(label.to_string());
        self.label_index.insert(label.to_string(), i);
        Some(i)
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, weight_km: f64, label: Option<usize>, directed: bool) {
        let edge = Edge { target: to, weight_km, label, directed };
        self.incoming[to].push(Edge { target: from, ..edge.clone() });
        self.outgoing[from].push(edge);
    }

    fn add_polyline(&mut self, points: &[Location], direction: Direction, label: Option<&str>) {
        let label = self.intern_label(label);
        let directed = direction != Direction::BothWays;
        for pair in points.windows(2) {
            let start = self.add_node(pair[0]);
            let end = self.add_node(pair[1]);
            if start == end {
                continue;
            }
            let weight_km = pair[0].distance_km(&pair[1]);
            if direction != Direction::BackwardOnly {
                self.add_edge(start, end, weight_km, label, directed);
            }
            if direction != Direction::ForwardOnly {
                self.add_edge(end, start, weight_km, label, directed);
            }
        }
    }
}

/// Builds the graph of everything `mode` may travel on.
///
/// One-way restrictions only apply to driving; every other mode gets both
/// directions for each way. Transit uses every transit line of the dataset.
pub fn build_graph(dataset: &Dataset, mode: Mode, profile: &ModeProfile) -> Graph {
    let mut graph = Graph::new(mode);
    match mode {
        Mode::Transit => {
            for line in &dataset.transit_lines {
                graph.add_polyline(&line.geometry, Direction::BothWays, line.name.as_deref());
            }
        }
        _ => {
            for way in dataset.ways.iter().filter(|w| profile.allows(&w.way_type)) {
                let direction = if mode == Mode::Driving { way.direction } else { Direction::BothWays };
                graph.add_polyline(&way.geometry, direction, way.label());
            }
        }
    }
    log::info!(
        "Built {} graph: {} nodes, {} edges",
        mode,
        graph.node_count(),
        graph.edge_count()
    );
    graph
}

#[cfg(test)]
pub(crate) fn test_dataset() -> Dataset {
    use crate::types::{TransitLine, WayFeature};

    let way = |points: &[(f64, f64)], way_type: &str, direction: Direction, name: &str| WayFeature {
        geometry: points.iter().map(|&(lat, lng)| Location::new(lat, lng)).collect(),
        way_type: way_type.to_string(),
        direction,
        name: Some(name.to_string()),
        destination: None,
    };
    Dataset {
        ways: vec![
            way(&[(45.0, 5.0), (45.0, 5.01), (45.0, 5.02)], "residential", Direction::BothWays, "Rue A"),
            way(&[(45.0, 5.02), (45.01, 5.02)], "primary", Direction::ForwardOnly, "Cours B"),
            way(&[(45.01, 5.02), (45.01, 5.03)], "footway", Direction::BothWays, "Passage C"),
            way(&[(45.0, 5.0), (45.01, 5.0)], "motorway", Direction::BackwardOnly, "A48"),
        ],
        transit_lines: vec![TransitLine {
            geometry: vec![Location::new(45.0, 5.0), Location::new(45.02, 5.0)],
            kind: "tram".to_string(),
            name: Some("A".to_string()),
        }],
        stops: Vec::new(),
    }
}

#[test]
fn test_non_driving_edges_are_symmetric() {
    use crate::config::Profiles;

    let dataset = test_dataset();
    let profiles = Profiles::default();
    for mode in [Mode::Walking, Mode::Cycling, Mode::Transit] {
        let graph = build_graph(&dataset, mode, profiles.get(mode));
        assert!(!graph.is_empty(), "{} graph is empty", mode);
        for (node, _) in graph.locations() {
            for edge in graph.outgoing(node) {
                assert!(graph.edge(edge.target, node).is_some(), "{} edge has no reverse", mode);
            }
        }
    }
}

#[test]
fn test_driving_respects_oneway() {
    use crate::config::Profiles;

    let dataset = test_dataset();
    let graph = build_graph(&dataset, Mode::Driving, &Profiles::default().driving);
    let corner = graph.node_at(&Location::new(45.0, 5.02)).unwrap();
    let north = graph.node_at(&Location::new(45.01, 5.02)).unwrap();
    assert!(graph.edge(corner, north).is_some());
    assert!(graph.edge(north, corner).is_none());
    assert_eq!(graph.incoming(north).len(), 1);
    assert!(graph.incoming(north)[0].directed);

    // reverse override on the motorway
    let west = graph.node_at(&Location::new(45.0, 5.0)).unwrap();
    let motorway_end = graph.node_at(&Location::new(45.01, 5.0)).unwrap();
    assert!(graph.edge(motorway_end, west).is_some());
    assert!(graph.edge(west, motorway_end).is_none());

    // footways are not part of the driving network
    assert!(graph.node_at(&Location::new(45.01, 5.03)).is_none());
}

#[test]
fn test_shared_points_become_one_node() {
    use crate::config::Profiles;

    let dataset = test_dataset();
    let graph = build_graph(&dataset, Mode::Walking, &Profiles::default().walking);
    // Rue A and Cours B share (45.0, 5.02); Cours B and Passage C share (45.01, 5.02).
    assert_eq!(graph.node_count(), 5);
    let corner = graph.node_at(&Location::new(45.0, 5.02)).unwrap();
    assert_eq!(graph.outgoing(corner).len(), 2);
    let edge = graph.edge(corner, graph.node_at(&Location::new(45.01, 5.02)).unwrap()).unwrap();
    assert_eq!(graph.label(edge), Some("Cours B"));
    assert!((edge.weight_km - 1.112).abs() < 0.01);
}

#[test]
fn test_no_matching_ways_gives_empty_graph() {
    let dataset = test_dataset();
    let profile = ModeProfile { speed_kmh: 5.0, way_types: vec!["bridleway".to_string()] };
    let graph = build_graph(&dataset, Mode::Walking, &profile);
    assert!(graph.is_empty());
    assert_eq!(graph.edge_count(), 0);
}
