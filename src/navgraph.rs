use crate::graph::{Node, NodeId, cost_millis};
use crate::manager::{RoadSegment, SegmentId};
use bevy::prelude::*;
use pathfinding::prelude::{astar, bfs_reach};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NavNodeId(pub u32);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavNode {
    pub id: NavNodeId,
    pub position: Vec3,
}

/// One direction of travel along one road segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavEdge {
    pub from: NavNodeId,
    pub to: NavNodeId,
    pub segment: SegmentId,
    /// Always true in this pass: two-way roads emit one edge per direction
    pub directed: bool,
    pub length: f32,
    pub capacity_hint: f32,
}

/// Navigation graph consumed by agent movement.
///
/// Every segment is bidirectional, so each contributes exactly two directed
/// edges. Node ids are dense indices into the node arena.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavGraph {
    nodes: Vec<NavNode>,
    edges: Vec<NavEdge>,
    adjacency: Vec<Vec<usize>>,
}

impl NavGraph {
    /// Build the graph from final segments. Only planning nodes that a
    /// segment actually terminates at become navigation nodes.
    pub fn build(nodes: &[Node], segments: &[RoadSegment]) -> Self {
        let mut graph = NavGraph::default();
        let mut mapping: BTreeMap<NodeId, NavNodeId> = BTreeMap::new();

        let mut intern = |graph: &mut NavGraph, id: NodeId| -> Option<NavNodeId> {
            if let Some(nav) = mapping.get(&id) {
                return Some(*nav);
            }
            let node = nodes.iter().find(|n| n.id == id)?;
            let nav = NavNodeId(graph.nodes.len() as u32);
            graph.nodes.push(NavNode {
                id: nav,
                position: node.position,
            });
            graph.adjacency.push(Vec::new());
            mapping.insert(id, nav);
            Some(nav)
        };

        for segment in segments {
            let (Some(from), Some(to)) = (
                intern(&mut graph, segment.from),
                intern(&mut graph, segment.to),
            ) else {
                warn!(
                    "Segment {:?} references a node missing from the arena, skipping",
                    segment.id
                );
                continue;
            };
            if from == to {
                continue;
            }
            let length = polyline_length(&segment.polyline);
            let capacity_hint = segment.class.capacity_hint();
            for (a, b) in [(from, to), (to, from)] {
                let index = graph.edges.len();
                graph.edges.push(NavEdge {
                    from: a,
                    to: b,
                    segment: segment.id,
                    directed: true,
                    length,
                    capacity_hint,
                });
                graph.adjacency[a.0 as usize].push(index);
            }
        }

        info!(
            "Navigation graph: {} nodes, {} directed edges",
            graph.nodes.len(),
            graph.edges.len()
        );
        graph
    }

    pub fn node(&self, id: NavNodeId) -> Option<&NavNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn nodes(&self) -> &[NavNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[NavEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Outgoing edges of a node
    pub fn edges_from(&self, id: NavNodeId) -> impl Iterator<Item = &NavEdge> {
        self.adjacency
            .get(id.0 as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .map(|&i| &self.edges[i])
    }

    /// The nav node nearest to a world position, for snapping agents onto the
    /// network
    pub fn nearest_node(&self, position: Vec3) -> Option<NavNodeId> {
        self.nodes
            .iter()
            .min_by(|a, b| {
                a.position
                    .distance_squared(position)
                    .total_cmp(&b.position.distance_squared(position))
            })
            .map(|n| n.id)
    }

    /// Shortest route by road length. Returns the node sequence and total
    /// length in world units.
    pub fn route(&self, from: NavNodeId, to: NavNodeId) -> Option<(Vec<NavNodeId>, f32)> {
        let goal_pos = self.node(to)?.position;
        self.node(from)?;

        let result = astar(
            &from,
            |id| {
                self.edges_from(*id)
                    .map(|e| (e.to, cost_millis(e.length)))
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

    pub fn reachable_from(&self, start: NavNodeId) -> Vec<NavNodeId> {
        if self.node(start).is_none() {
            return Vec::new();
        }
        bfs_reach(start, |id| {
            self.edges_from(*id).map(|e| e.to).collect::<Vec<_>>()
        })
        .collect()
    }
}

fn polyline_length(points: &[Vec3]) -> f32 {
    points.windows(2).map(|w| w[0].distance(w[1])).sum()
}
