use bevy::prelude::*;
use pathfinding::prelude::{astar, bfs_reach};
use serde::{Deserialize, Serialize};

/// Identifier of a planning-time graph node
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Settlement,
    Intersection,
    Waypoint,
}

/// Road class is a closed enum; every behavioral branch matches exhaustively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoadClass {
    Highway,
    Arterial,
    Local,
}

impl RoadClass {
    pub fn width_multiplier(self) -> f32 {
        match self {
            RoadClass::Highway => 2.0,
            RoadClass::Arterial => 1.4,
            RoadClass::Local => 1.0,
        }
    }

    pub fn capacity_hint(self) -> f32 {
        match self {
            RoadClass::Highway => 2000.0,
            RoadClass::Arterial => 800.0,
            RoadClass::Local => 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub position: Vec3,
    pub kind: NodeKind,
    pub importance: f32,
}

/// Fixed-point scaling for search costs.
///
/// The pathfinding crate wants `Ord` costs; scaling to integer milli-units
/// keeps A* and Kruskal deterministic across runs and platforms.
pub fn cost_millis(cost: f32) -> u64 {
    (cost.max(0.0) as f64 * 1000.0).round() as u64
}

/// Planning-time road graph: node arena plus weighted adjacency.
///
/// Nodes within the merge tolerance of an existing node collapse onto it, so
/// no two nodes ever occupy the same position within that radius.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoadGraph {
    nodes: Vec<Node>,
    adjacency: Vec<Vec<(NodeId, f32)>>,
    merge_radius: f32,
}

impl RoadGraph {
    pub fn new(merge_radius: f32) -> Self {
        Self {
            nodes: Vec::new(),
            adjacency: Vec::new(),
            merge_radius,
        }
    }

    /// Add a node, or return the existing node id when one already sits
    /// within the merge tolerance of `position`.
    pub fn add_node(&mut self, position: Vec3, kind: NodeKind, importance: f32) -> NodeId {
        if let Some(existing) = self.node_near(position) {
            return existing;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            position,
            kind,
            importance,
        });
        self.adjacency.push(Vec::new());
        id
    }

    /// Nearest existing node within the merge tolerance, if any
    pub fn node_near(&self, position: Vec3) -> Option<NodeId> {
        let r2 = self.merge_radius * self.merge_radius;
        self.nodes
            .iter()
            .filter(|n| n.position.distance_squared(position) <= r2)
            .min_by(|a, b| {
                a.position
                    .distance_squared(position)
                    .total_cmp(&b.position.distance_squared(position))
            })
            .map(|n| n.id)
    }

    /// Add an undirected edge with the given traversal cost
    pub fn add_edge(&mut self, a: NodeId, b: NodeId, cost: f32) {
        if a == b || self.node(a).is_none() || self.node(b).is_none() {
            return;
        }
        if !self.adjacency[a.0 as usize].iter().any(|(n, _)| *n == b) {
            self.adjacency[a.0 as usize].push((b, cost));
            self.adjacency[b.0 as usize].push((a, cost));
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn neighbors(&self, id: NodeId) -> &[(NodeId, f32)] {
        self.adjacency
            .get(id.0 as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Cost-weighted shortest path between two nodes.
    ///
    /// Heuristic is straight-line distance, admissible as long as edge costs
    /// are at least the spatial distance between their endpoints.
    pub fn shortest_path(&self, from: NodeId, to: NodeId) -> Option<(Vec<NodeId>, f32)> {
        let goal_pos = self.node(to)?.position;
        self.node(from)?;

        let result = astar(
            &from,
            |id| {
                self.neighbors(*id)
                    .iter()
                    .map(|(n, c)| (*n, cost_millis(*c)))
                    .collect::<Vec<_>>()
            },
            |id| {
                self.node(*id)
                    .map(|n| cost_millis(n.position.distance(goal_pos)))
                    .unwrap_or(u64::MAX)
            },
            |id| *id == to,
        );

        result.map(|(path, cost)| (path, cost as f32 / 1000.0))
    }

    /// All node ids reachable from `start` over existing edges
    pub fn reachable_from(&self, start: NodeId) -> Vec<NodeId> {
        if self.node(start).is_none() {
            return Vec::new();
        }
        bfs_reach(start, |id| {
            self.neighbors(*id).iter().map(|(n, _)| *n).collect::<Vec<_>>()
        })
        .collect()
    }

    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.reachable_from(a).contains(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_graph() -> (RoadGraph, NodeId, NodeId, NodeId) {
        let mut g = RoadGraph::new(1.0);
        let a = g.add_node(Vec3::new(0.0, 0.0, 0.0), NodeKind::Settlement, 1.0);
        let b = g.add_node(Vec3::new(100.0, 0.0, 0.0), NodeKind::Settlement, 1.0);
        let c = g.add_node(Vec3::new(0.0, 0.0, 100.0), NodeKind::Settlement, 1.0);
        g.add_edge(a, b, 100.0);
        g.add_edge(b, c, 150.0);
        g.add_edge(a, c, 100.0);
        (g, a, b, c)
    }

    #[test]
    fn test_node_merge_tolerance() {
        let mut g = RoadGraph::new(5.0);
        let a = g.add_node(Vec3::ZERO, NodeKind::Settlement, 1.0);
        let b = g.add_node(Vec3::new(2.0, 0.0, 2.0), NodeKind::Waypoint, 0.0);
        assert_eq!(a, b);
        assert_eq!(g.node_count(), 1);

        let c = g.add_node(Vec3::new(10.0, 0.0, 0.0), NodeKind::Settlement, 1.0);
        assert_ne!(a, c);
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn test_no_duplicate_edges_or_self_loops() {
        let mut g = RoadGraph::new(1.0);
        let a = g.add_node(Vec3::ZERO, NodeKind::Settlement, 1.0);
        let b = g.add_node(Vec3::new(10.0, 0.0, 0.0), NodeKind::Settlement, 1.0);
        g.add_edge(a, b, 10.0);
        g.add_edge(a, b, 10.0);
        g.add_edge(a, a, 1.0);
        assert_eq!(g.neighbors(a).len(), 1);
        assert_eq!(g.neighbors(b).len(), 1);
    }

    #[test]
    fn test_shortest_path_prefers_cheap_route() {
        let (g, a, b, c) = triangle_graph();
        // b -> c direct costs 150; b -> a -> c costs 200
        let (path, cost) = g.shortest_path(b, c).unwrap();
        assert_eq!(path, vec![b, c]);
        assert!((cost - 150.0).abs() < 0.01);

        let (path, cost) = g.shortest_path(a, b).unwrap();
        assert_eq!(path, vec![a, b]);
        assert!((cost - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_reachability() {
        let mut g = RoadGraph::new(1.0);
        let a = g.add_node(Vec3::ZERO, NodeKind::Settlement, 1.0);
        let b = g.add_node(Vec3::new(10.0, 0.0, 0.0), NodeKind::Settlement, 1.0);
        let island = g.add_node(Vec3::new(500.0, 0.0, 0.0), NodeKind::Settlement, 1.0);
        g.add_edge(a, b, 10.0);

        assert!(g.is_connected(a, b));
        assert!(!g.is_connected(a, island));
        assert_eq!(g.reachable_from(island), vec![island]);
    }

    #[test]
    fn test_road_class_is_exhaustive() {
        for class in [RoadClass::Highway, RoadClass::Arterial, RoadClass::Local] {
            assert!(class.width_multiplier() >= 1.0);
            assert!(class.capacity_hint() > 0.0);
        }
        assert!(RoadClass::Highway.width_multiplier() > RoadClass::Local.width_multiplier());
    }
}
