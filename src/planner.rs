use crate::config::RoadConfig;
use crate::errors::{RoadError, RoadResult};
use crate::graph::{NodeId, NodeKind, RoadClass, RoadGraph, cost_millis};
use crate::postprocess::road_class_for_demand;
use crate::terrain::TerrainQuery;
use bevy::prelude::*;
use pathfinding::prelude::kruskal;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use voronoice::{BoundingBox, Point, VoronoiBuilder};

/// Constraint-filter verdict for a planned connection.
///
/// `NoDirectRoute` edges stay in the plan so the pathfinder can attempt a
/// detour; they are never silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeStatus {
    Direct,
    NoDirectRoute,
}

/// A settlement pair the planner decided to connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub class: RoadClass,
    /// Importance product of the endpoints; edges are processed high-first
    pub priority: f32,
    /// Straight-line distance adjusted by the terrain difficulty multiplier
    pub cost_estimate: f32,
    /// Combined endpoint demand, reused for width assignment downstream
    pub demand: f32,
    pub status: EdgeStatus,
}

/// A settlement the planner could not connect; recorded, never fatal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningFailure {
    pub settlement: NodeId,
    pub reason: String,
}

/// Voronoi catchment of one settlement: its adjacent settlements in the
/// partition, used to bound the extra-edge search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catchment {
    pub settlement: NodeId,
    pub neighbors: Vec<NodeId>,
}

/// Target topology produced by one planning pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadPlan {
    pub edges: Vec<PlannedEdge>,
    pub failures: Vec<PlanningFailure>,
    pub catchments: Vec<Catchment>,
}

struct Candidate {
    a: usize,
    b: usize,
    weight: f32,
    status: EdgeStatus,
}

/// Decides which settlement pairs get roads: catchment partition, terrain
/// weighted candidate graph, MST, constraint filter, bounded extra edges.
pub struct MasterPlanner<'a> {
    config: &'a RoadConfig,
    rng: Pcg64,
}

impl<'a> MasterPlanner<'a> {
    pub fn new(config: &'a RoadConfig) -> Self {
        Self {
            config,
            rng: Pcg64::seed_from_u64(config.seed),
        }
    }

    /// Plan connections over the settlement nodes of `graph`.
    ///
    /// `demands` is parallel to `settlement_ids` and carries each
    /// settlement's population-weighted demand. Output edges are sorted by
    /// descending endpoint importance product so the pathfinder handles the
    /// most significant connections first.
    pub fn plan<T: TerrainQuery>(
        &mut self,
        graph: &RoadGraph,
        settlement_ids: &[NodeId],
        demands: &[f32],
        terrain: &T,
    ) -> RoadResult<RoadPlan> {
        if settlement_ids.is_empty() {
            return Err(RoadError::NoSettlements);
        }
        if settlement_ids.len() == 1 {
            return Ok(RoadPlan {
                edges: Vec::new(),
                failures: Vec::new(),
                catchments: vec![Catchment {
                    settlement: settlement_ids[0],
                    neighbors: Vec::new(),
                }],
            });
        }

        let catchments = self.partition_catchments(graph, settlement_ids)?;
        let candidates = self.candidate_graph(graph, settlement_ids, terrain);

        // MST over viable candidates guarantees near-minimal connectivity
        let mst_input: Vec<(u32, u32, u64)> = candidates
            .iter()
            .filter(|c| c.status == EdgeStatus::Direct)
            .map(|c| (c.a as u32, c.b as u32, cost_millis(c.weight)))
            .collect();
        let mst: Vec<(usize, usize)> = kruskal(&mst_input)
            .map(|(a, b, _)| (*a as usize, *b as usize))
            .collect();

        let mut selected: Vec<&Candidate> = Vec::new();
        for &(a, b) in &mst {
            if let Some(c) = candidates
                .iter()
                .find(|c| (c.a == a && c.b == b) || (c.a == b && c.b == a))
            {
                selected.push(c);
            }
        }

        let mut failures = self.reconnect_isolated(settlement_ids, &candidates, &mut selected);

        let extras =
            self.viable_extra_edges(graph, settlement_ids, &candidates, &selected, &catchments);
        selected.extend(extras);

        let mut edges: Vec<PlannedEdge> = selected
            .iter()
            .map(|c| self.to_planned_edge(graph, settlement_ids, demands, c))
            .collect();

        // Most significant connections first; id tie-break keeps runs identical
        edges.sort_by(|x, y| {
            y.priority
                .total_cmp(&x.priority)
                .then(x.from.cmp(&y.from))
                .then(x.to.cmp(&y.to))
        });

        for settlement in settlement_ids {
            let covered = edges
                .iter()
                .any(|e| e.from == *settlement || e.to == *settlement);
            if !covered && !failures.iter().any(|f| f.settlement == *settlement) {
                failures.push(PlanningFailure {
                    settlement: *settlement,
                    reason: "No viable candidate edge in catchment".to_string(),
                });
            }
        }

        info!(
            "Planned {} edges over {} settlements ({} failures)",
            edges.len(),
            settlement_ids.len(),
            failures.len()
        );

        Ok(RoadPlan {
            edges,
            failures,
            catchments,
        })
    }

    /// Nearest-settlement Voronoi partition; adjacency bounds later searches
    fn partition_catchments(
        &mut self,
        graph: &RoadGraph,
        settlement_ids: &[NodeId],
    ) -> RoadResult<Vec<Catchment>> {
        // voronoice needs at least three non-degenerate sites; below that the
        // partition is trivial and every settlement neighbors every other
        if settlement_ids.len() < 3 {
            return Ok(settlement_ids
                .iter()
                .map(|id| Catchment {
                    settlement: *id,
                    neighbors: settlement_ids.iter().copied().filter(|n| n != id).collect(),
                })
                .collect());
        }

        let positions: Vec<Vec3> = settlement_ids
            .iter()
            .filter_map(|id| graph.node(*id).map(|n| n.position))
            .collect();

        let (min_x, max_x) = positions
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p.x), hi.max(p.x)));
        let (min_z, max_z) = positions
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p.z), hi.max(p.z)));
        let span_x = (max_x - min_x).max(1.0);
        let span_z = (max_z - min_z).max(1.0);

        // Seeded jitter dodges degenerate collinear/duplicate site sets
        let jitter = span_x.min(span_z) * 1e-4;
        let sites: Vec<Point> = positions
            .iter()
            .map(|p| Point {
                x: (p.x + self.rng.gen_range(-jitter..jitter)) as f64,
                y: (p.z + self.rng.gen_range(-jitter..jitter)) as f64,
            })
            .collect();

        let bbox = BoundingBox::new(
            Point {
                x: ((min_x + max_x) / 2.0) as f64,
                y: ((min_z + max_z) / 2.0) as f64,
            },
            (span_x * 1.5) as f64,
            (span_z * 1.5) as f64,
        );

        let voronoi = VoronoiBuilder::default()
            .set_sites(sites)
            .set_bounding_box(bbox)
            .build()
            .ok_or(RoadError::PartitionFailed)?;

        let catchments = voronoi
            .iter_cells()
            .enumerate()
            .map(|(i, cell)| {
                let mut neighbors: Vec<NodeId> = cell
                    .iter_neighbors()
                    .filter(|n| *n < settlement_ids.len())
                    .map(|n| settlement_ids[n])
                    .collect();
                neighbors.sort();
                neighbors.dedup();
                Catchment {
                    settlement: settlement_ids[i],
                    neighbors,
                }
            })
            .collect();

        Ok(catchments)
    }

    /// Complete candidate graph; weight is chord distance times a terrain
    /// difficulty multiplier sampled along the line
    fn candidate_graph<T: TerrainQuery>(
        &self,
        graph: &RoadGraph,
        settlement_ids: &[NodeId],
        terrain: &T,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for a in 0..settlement_ids.len() {
            for b in (a + 1)..settlement_ids.len() {
                let (Some(na), Some(nb)) =
                    (graph.node(settlement_ids[a]), graph.node(settlement_ids[b]))
                else {
                    continue;
                };
                let distance = na.position.distance(nb.position);
                let (multiplier, blocked) =
                    self.chord_difficulty(terrain, na.position, nb.position);
                candidates.push(Candidate {
                    a,
                    b,
                    weight: distance * multiplier,
                    status: if blocked {
                        EdgeStatus::NoDirectRoute
                    } else {
                        EdgeStatus::Direct
                    },
                });
            }
        }
        candidates
    }

    /// Sample slope and water along the chord. Returns the difficulty
    /// multiplier and whether the crossing is blocked outright (mostly water
    /// with bridges disallowed).
    fn chord_difficulty<T: TerrainQuery>(&self, terrain: &T, from: Vec3, to: Vec3) -> (f32, bool) {
        let distance = from.distance(to);
        let samples = ((distance / (self.config.cell_size * 4.0)).ceil() as usize).clamp(8, 64);

        let mut slope_sum = 0.0;
        let mut water_hits = 0usize;
        let mut valid = 0usize;

        for i in 0..=samples {
            let t = i as f32 / samples as f32;
            let p = from.lerp(to, t);
            let Some(slope) = terrain.slope_deg_at(p.x, p.z) else {
                continue;
            };
            valid += 1;
            let ratio = (slope / self.config.max_slope_deg).clamp(0.0, 2.0);
            slope_sum += ratio * ratio;
            if terrain.is_water_at(p.x, p.z) {
                water_hits += 1;
            }
        }

        if valid == 0 {
            // Chord entirely outside terrain coverage: unroutable directly
            return (4.0, true);
        }

        let water_fraction = water_hits as f32 / valid as f32;
        let blocked = !self.config.allow_bridges && water_fraction > 0.5;

        let mut multiplier = 1.0 + slope_sum / valid as f32;
        if self.config.allow_bridges {
            multiplier += water_fraction * self.config.bridge_cost_multiplier * 0.25;
        } else {
            multiplier += water_fraction * 4.0;
        }
        (multiplier, blocked)
    }

    /// Settlements outside the spanning forest's main component get their
    /// least-bad blocked candidate back, marked for no-direct-route handling.
    fn reconnect_isolated<'c>(
        &self,
        settlement_ids: &[NodeId],
        candidates: &'c [Candidate],
        selected: &mut Vec<&'c Candidate>,
    ) -> Vec<PlanningFailure> {
        let mut failures = Vec::new();

        // Label propagation to a fixed point; settlement counts are tiny
        let mut component: Vec<usize> = (0..settlement_ids.len()).collect();
        let mut changed = true;
        while changed {
            changed = false;
            for c in selected.iter() {
                let lo = component[c.a].min(component[c.b]);
                if component[c.a] != lo || component[c.b] != lo {
                    component[c.a] = lo;
                    component[c.b] = lo;
                    changed = true;
                }
            }
        }

        let main = component[0];
        for i in 1..settlement_ids.len() {
            if component[i] == main {
                continue;
            }
            let fallback = candidates
                .iter()
                .filter(|c| (c.a == i || c.b == i) && c.status == EdgeStatus::NoDirectRoute)
                .min_by_key(|c| cost_millis(c.weight));
            match fallback {
                Some(c) => {
                    if !selected.iter().any(|s| std::ptr::eq(*s, c)) {
                        selected.push(c);
                    }
                }
                None => failures.push(PlanningFailure {
                    settlement: settlement_ids[i],
                    reason: "Isolated by terrain; no candidate edge".to_string(),
                }),
            }
        }
        failures
    }

    /// Cost optimizer: re-add up to `extra_edge_budget` non-MST edges whose
    /// direct cost beats the viability fraction of the existing network route,
    /// avoiding overly sparse star topologies. Only catchment-adjacent pairs
    /// are considered.
    fn viable_extra_edges<'c>(
        &self,
        graph: &RoadGraph,
        settlement_ids: &[NodeId],
        candidates: &'c [Candidate],
        selected: &[&'c Candidate],
        catchments: &[Catchment],
    ) -> Vec<&'c Candidate> {
        if self.config.extra_edge_budget == 0 {
            return Vec::new();
        }

        // Scratch graph holding the spanning edges chosen so far
        let mut scratch = RoadGraph::new(0.001);
        let ids: Vec<NodeId> = settlement_ids
            .iter()
            .filter_map(|id| graph.node(*id))
            .map(|n| scratch.add_node(n.position, NodeKind::Settlement, n.importance))
            .collect();
        for c in selected {
            scratch.add_edge(ids[c.a], ids[c.b], c.weight);
        }

        let is_adjacent = |a: NodeId, b: NodeId| {
            catchments
                .iter()
                .any(|c| c.settlement == a && c.neighbors.contains(&b))
        };

        let mut scored: Vec<(u64, &Candidate)> = candidates
            .iter()
            .filter(|c| c.status == EdgeStatus::Direct)
            .filter(|c| !selected.iter().any(|s| std::ptr::eq(*s, *c)))
            .filter(|c| is_adjacent(settlement_ids[c.a], settlement_ids[c.b]))
            .filter_map(|c| {
                let (_, route_cost) = scratch.shortest_path(ids[c.a], ids[c.b])?;
                let viable = c.weight < route_cost * self.config.extra_edge_viability;
                viable.then(|| (cost_millis(c.weight), c))
            })
            .collect();

        scored.sort_by_key(|(w, _)| *w);
        scored
            .into_iter()
            .take(self.config.extra_edge_budget as usize)
            .map(|(_, c)| c)
            .collect()
    }

    fn to_planned_edge(
        &self,
        graph: &RoadGraph,
        settlement_ids: &[NodeId],
        demands: &[f32],
        candidate: &Candidate,
    ) -> PlannedEdge {
        let from = settlement_ids[candidate.a];
        let to = settlement_ids[candidate.b];
        let (imp_a, imp_b) = (
            graph.node(from).map(|n| n.importance).unwrap_or(0.0),
            graph.node(to).map(|n| n.importance).unwrap_or(0.0),
        );
        let demand = demands.get(candidate.a).copied().unwrap_or(0.0)
            + demands.get(candidate.b).copied().unwrap_or(0.0);
        PlannedEdge {
            from,
            to,
            class: road_class_for_demand(demand, self.config),
            priority: imp_a * imp_b,
            cost_estimate: candidate.weight,
            demand,
            status: candidate.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::HeightField;

    fn settlement_graph(positions: &[(f32, f32)], importance: f32) -> (RoadGraph, Vec<NodeId>) {
        let mut graph = RoadGraph::new(6.0);
        let ids = positions
            .iter()
            .map(|(x, z)| graph.add_node(Vec3::new(*x, 0.0, *z), NodeKind::Settlement, importance))
            .collect();
        (graph, ids)
    }

    fn flat_terrain() -> HeightField {
        HeightField::flat(512, 512, 8.0, 0.0).unwrap()
    }

    fn uniform_demands(n: usize) -> Vec<f32> {
        vec![10_000.0; n]
    }

    #[test]
    fn test_equilateral_triangle_yields_path_graph() {
        // Three settlements on flat dry land, pairwise distance 1000:
        // the planner must emit exactly two edges totalling ~2000
        let side = 1000.0;
        let h = side * 3f32.sqrt() / 2.0;
        let (graph, ids) = settlement_graph(
            &[
                (-side / 2.0, -h / 3.0),
                (side / 2.0, -h / 3.0),
                (0.0, h * 2.0 / 3.0),
            ],
            1.0,
        );
        let terrain = flat_terrain();
        let config = RoadConfig::default();
        let mut planner = MasterPlanner::new(&config);

        let plan = planner
            .plan(&graph, &ids, &uniform_demands(ids.len()), &terrain)
            .unwrap();
        assert_eq!(plan.edges.len(), 2);
        assert!(plan.failures.is_empty());

        let total: f32 = plan.edges.iter().map(|e| e.cost_estimate).sum();
        assert!(
            (total - 2.0 * side).abs() < side * 0.05,
            "expected total ~{}, got {total}",
            2.0 * side
        );
    }

    #[test]
    fn test_plan_connects_all_settlements() {
        let (graph, ids) = settlement_graph(
            &[
                (-800.0, -800.0),
                (800.0, -700.0),
                (-750.0, 800.0),
                (700.0, 750.0),
                (0.0, 0.0),
            ],
            0.8,
        );
        let terrain = flat_terrain();
        let config = RoadConfig::default();
        let mut planner = MasterPlanner::new(&config);

        let plan = planner
            .plan(&graph, &ids, &uniform_demands(ids.len()), &terrain)
            .unwrap();
        assert!(plan.failures.is_empty());

        // Rebuild a graph from the planned edges and check full connectivity
        let mut check = graph.clone();
        for e in &plan.edges {
            check.add_edge(e.from, e.to, e.cost_estimate);
        }
        for id in &ids[1..] {
            assert!(check.is_connected(ids[0], *id));
        }
    }

    #[test]
    fn test_mst_optimality_on_line() {
        // Four collinear settlements: the unique MST is the chain, total 1200
        let (graph, ids) = settlement_graph(
            &[(-600.0, 0.0), (-200.0, 0.0), (200.0, 0.0), (600.0, 0.0)],
            1.0,
        );
        let terrain = flat_terrain();
        let config = RoadConfig {
            extra_edge_budget: 0,
            ..Default::default()
        };
        let mut planner = MasterPlanner::new(&config);

        let plan = planner
            .plan(&graph, &ids, &uniform_demands(ids.len()), &terrain)
            .unwrap();
        assert_eq!(plan.edges.len(), 3);
        let total: f32 = plan.edges.iter().map(|e| e.cost_estimate).sum();
        assert!(
            (total - 1200.0).abs() < 30.0,
            "chain should total ~1200, got {total}"
        );
    }

    #[test]
    fn test_edges_sorted_by_priority() {
        let mut graph = RoadGraph::new(6.0);
        let big = graph.add_node(Vec3::new(0.0, 0.0, 0.0), NodeKind::Settlement, 1.0);
        let mid = graph.add_node(Vec3::new(400.0, 0.0, 0.0), NodeKind::Settlement, 0.6);
        let small = graph.add_node(Vec3::new(800.0, 0.0, 0.0), NodeKind::Settlement, 0.1);
        let ids = vec![big, mid, small];
        let terrain = flat_terrain();
        let config = RoadConfig::default();
        let mut planner = MasterPlanner::new(&config);

        let plan = planner
            .plan(&graph, &ids, &uniform_demands(ids.len()), &terrain)
            .unwrap();
        for pair in plan.edges.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
        }
    }

    #[test]
    fn test_water_blocked_edge_marked_not_dropped() {
        let config = RoadConfig {
            allow_bridges: false,
            ..Default::default()
        };

        // Fully flooded map: the only connection surfaces as NoDirectRoute
        // instead of being dropped
        let flooded = HeightField::new(64, 64, vec![-10.0; 64 * 64], 8.0, 0.0).unwrap();
        let (graph, ids) = settlement_graph(&[(-150.0, 0.0), (150.0, 0.0)], 1.0);
        let mut planner = MasterPlanner::new(&config);
        let plan = planner
            .plan(&graph, &ids, &uniform_demands(ids.len()), &flooded)
            .unwrap();
        assert_eq!(plan.edges.len(), 1);
        assert_eq!(plan.edges[0].status, EdgeStatus::NoDirectRoute);
    }

    #[test]
    fn test_single_settlement_plans_nothing() {
        let (graph, ids) = settlement_graph(&[(0.0, 0.0)], 1.0);
        let terrain = flat_terrain();
        let config = RoadConfig::default();
        let mut planner = MasterPlanner::new(&config);
        let plan = planner
            .plan(&graph, &ids, &uniform_demands(1), &terrain)
            .unwrap();
        assert!(plan.edges.is_empty());
        assert!(plan.failures.is_empty());
    }

    #[test]
    fn test_no_settlements_is_an_error() {
        let (graph, _) = settlement_graph(&[], 1.0);
        let terrain = flat_terrain();
        let config = RoadConfig::default();
        let mut planner = MasterPlanner::new(&config);
        assert!(planner.plan(&graph, &[], &[], &terrain).is_err());
    }

    #[test]
    fn test_ring_gets_extra_edge() {
        // Eight settlements on a ring: the MST leaves one long gap; closing it
        // is far cheaper than the all-the-way-around route
        let n = 8;
        let radius = 900.0;
        let positions: Vec<(f32, f32)> = (0..n)
            .map(|i| {
                let angle = i as f32 / n as f32 * std::f32::consts::TAU;
                (angle.cos() * radius, angle.sin() * radius)
            })
            .collect();
        let (graph, ids) = settlement_graph(&positions, 1.0);
        let terrain = flat_terrain();
        let config = RoadConfig {
            extra_edge_budget: 2,
            extra_edge_viability: 0.35,
            ..Default::default()
        };
        let mut planner = MasterPlanner::new(&config);
        let plan = planner
            .plan(&graph, &ids, &uniform_demands(n), &terrain)
            .unwrap();

        // MST over n ring nodes has n-1 edges; the optimizer closes the ring
        assert!(plan.edges.len() >= n - 1);
        assert!(plan.edges.len() <= n + 1);
        assert!(plan.failures.is_empty());
    }

    #[test]
    fn test_catchments_cover_every_settlement() {
        let (graph, ids) = settlement_graph(
            &[
                (-500.0, -500.0),
                (500.0, -500.0),
                (500.0, 500.0),
                (-500.0, 500.0),
                (0.0, 0.0),
            ],
            1.0,
        );
        let terrain = flat_terrain();
        let config = RoadConfig::default();
        let mut planner = MasterPlanner::new(&config);
        let plan = planner
            .plan(&graph, &ids, &uniform_demands(ids.len()), &terrain)
            .unwrap();

        assert_eq!(plan.catchments.len(), ids.len());
        // The center settlement borders all four corners in the partition
        let center = plan
            .catchments
            .iter()
            .find(|c| c.settlement == ids[4])
            .unwrap();
        assert_eq!(center.neighbors.len(), 4);
    }
}
