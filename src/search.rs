use priority_queue::PriorityQueue;

use std::cmp::{Ord, Ordering, PartialOrd, Reverse};
use std::collections::VecDeque;
use std::fmt;

use crate::graph::{Graph, NodeId};

#[derive(Clone, Copy)]
struct OrderedFloat(f64);

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedFloat {}

impl fmt::Debug for OrderedFloat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderedFloat({})", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Path {
    pub nodes: Vec<NodeId>,
    pub weight_km: f64,
}

impl Path {
    /// Straight connection between two nodes, weighted by their great-circle distance.
    pub fn direct(graph: &Graph, start: NodeId, end: NodeId) -> Self {
        let nodes = if start == end { vec![start] } else { vec![start, end] };
        Path {
            nodes,
            weight_km: graph.location(start).distance_km(&graph.location(end)),
        }
    }
}

/// Shortest path from `start` to `end` by cumulative edge weight.
///
/// Nodes are settled in non-decreasing distance order; equal distances are
/// settled in the order they were last relaxed.
pub fn shortest_path(graph: &Graph, start: NodeId, end: NodeId) -> Option<Path> {
    let mut distances = vec![f64::INFINITY; graph.node_count()];
    let mut previous: Vec<Option<NodeId>> = vec![None; graph.node_count()];
    let mut settled = vec![false; graph.node_count()];
    let mut sequence: u64 = 0;

    // PriorityQueue pops the highest priority first, hence the Reverse.
    let mut queue = PriorityQueue::new();
    distances[start] = 0.0;
    queue.push(start, Reverse((OrderedFloat(0.0), sequence)));

    while let Some((node, Reverse((OrderedFloat(distance), _)))) = queue.pop() {
        if settled[node] {
            continue;
        }
        settled[node] = true;
        if node == end {
            break;
        }
        for edge in graph.outgoing(node) {
            if settled[edge.target] {
                continue;
            }
            let candidate = distance + edge.weight_km;
            if candidate < distances[edge.target] {
                distances[edge.target] = candidate;
                previous[edge.target] = Some(node);
                sequence += 1;
                // Replaces any queued entry for the target; the candidate is always better.
                queue.push(edge.target, Reverse((OrderedFloat(candidate), sequence)));
            }
        }
    }

    if !settled[end] {
        log::debug!("No path from node {} to node {}", start, end);
        return None;
    }

    let mut nodes = vec![end];
    let mut current = end;
    while let Some(prev) = previous[current] {
        nodes.push(prev);
        current = prev;
    }
    nodes.reverse();
    Some(Path { nodes, weight_km: distances[end] })
}

/// Marks every node reachable from `start` following edge directions.
pub fn reachable_from(graph: &Graph, start: NodeId) -> Vec<bool> {
    let mut reached = vec![false; graph.node_count()];
    let mut pending = VecDeque::from([start]);
    reached[start] = true;
    while let Some(node) = pending.pop_front() {
        for edge in graph.outgoing(node) {
            if !reached[edge.target] {
                reached[edge.target] = true;
                pending.push_back(edge.target);
            }
        }
    }
    reached
}

#[test]
fn test_shortest_path_follows_streets() {
    use crate::config::Profiles;
    use crate::graph::{build_graph, test_dataset};
    use crate::types::{Location, Mode};

    let dataset = test_dataset();
    let graph = build_graph(&dataset, Mode::Walking, &Profiles::default().walking);
    let start = graph.node_at(&Location::new(45.0, 5.0)).unwrap();
    let end = graph.node_at(&Location::new(45.01, 5.03)).unwrap();
    let path = shortest_path(&graph, start, end).unwrap();
    assert_eq!(path.nodes.len(), 5);
    assert_eq!(path.nodes[0], start);
    assert_eq!(path.nodes[4], end);
    assert!(graph.is_connected_path(&path.nodes));
    let expected: f64 = path.nodes.windows(2).map(|p| graph.edge(p[0], p[1]).unwrap().weight_km).sum();
    assert!((path.weight_km - expected).abs() < 1e-9);
}

#[test]
fn test_oneway_blocks_reverse_traversal() {
    use crate::config::Profiles;
    use crate::graph::{build_graph, test_dataset};
    use crate::types::{Location, Mode};

    let dataset = test_dataset();
    let graph = build_graph(&dataset, Mode::Driving, &Profiles::default().driving);
    let corner = graph.node_at(&Location::new(45.0, 5.02)).unwrap();
    let north = graph.node_at(&Location::new(45.01, 5.02)).unwrap();
    assert!(shortest_path(&graph, corner, north).is_some());
    assert!(shortest_path(&graph, north, corner).is_none());
    assert!(!reachable_from(&graph, north)[corner]);
    assert!(reachable_from(&graph, corner)[north]);
}

#[test]
fn test_path_to_self_is_single_node() {
    use crate::config::Profiles;
    use crate::graph::{build_graph, test_dataset};
    use crate::types::Mode;

    let dataset = test_dataset();
    let graph = build_graph(&dataset, Mode::Walking, &Profiles::default().walking);
    let path = shortest_path(&graph, 2, 2).unwrap();
    assert_eq!(path.nodes, vec![2]);
    assert_eq!(path.weight_km, 0.0);
    assert_eq!(Path::direct(&graph, 2, 2).nodes, vec![2]);
}

#[test]
fn test_equal_cost_ties_are_deterministic() {
    use crate::dataset::Dataset;
    use crate::config::Profiles;
    use crate::graph::build_graph;
    use crate::types::{Direction, Location, Mode, WayFeature};

    // A square: two equally long routes between opposite corners.
    let way = |a: (f64, f64), b: (f64, f64)| WayFeature {
        geometry: vec![Location::new(a.0, a.1), Location::new(b.0, b.1)],
        way_type: "footway".to_string(),
        direction: Direction::BothWays,
        name: None,
        destination: None,
    };
    let dataset = Dataset {
        ways: vec![
            way((0.0, 0.0), (0.0, 0.01)),
            way((0.0, 0.01), (0.01, 0.01)),
            way((0.0, 0.0), (0.01, 0.0)),
            way((0.01, 0.0), (0.01, 0.01)),
        ],
        ..Default::default()
    };
    let graph = build_graph(&dataset, Mode::Walking, &Profiles::default().walking);
    let start = graph.node_at(&Location::new(0.0, 0.0)).unwrap();
    let end = graph.node_at(&Location::new(0.01, 0.01)).unwrap();
    let first = shortest_path(&graph, start, end).unwrap();
    for _ in 0..5 {
        assert_eq!(shortest_path(&graph, start, end).unwrap(), first);
    }
}
