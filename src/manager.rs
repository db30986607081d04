use crate::config::RoadConfig;
use crate::errors::{RoadError, RoadResult};
use crate::geometry::{GeometryGenerator, MeshArena};
use crate::graph::{NodeId, NodeKind, RoadClass, RoadGraph};
use crate::integration;
use crate::navgraph::NavGraph;
use crate::pathfinder::{Pathfinder, RouteOutcome};
use crate::planner::{MasterPlanner, PlanningFailure};
use crate::postprocess::{BridgeSpan, PathPostProcessor, ProcessedPath};
use crate::settlement::Settlement;
use crate::terrain::{HeightField, TerrainQuery};
use bevy::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SegmentId(pub u32);

/// One continuous stretch of road between two network nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadSegment {
    pub id: SegmentId,
    pub polyline: Vec<Vec3>,
    pub width: f32,
    pub class: RoadClass,
    pub bridge_spans: Vec<BridgeSpan>,
    pub ford_spans: Vec<(usize, usize)>,
    /// Terrain integration could not bring the ground flush with this road
    pub unclamped: bool,
    pub from: NodeId,
    pub to: NodeId,
    /// Index of the planned edge this segment was routed for
    pub source_edge: usize,
}

impl RoadSegment {
    pub fn length(&self) -> f32 {
        self.polyline
            .windows(2)
            .map(|w| w[0].distance(w[1]))
            .sum()
    }
}

/// The persistent road network: nodes and segments, everything needed to
/// rebuild meshes and the navigation graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadNetwork {
    pub nodes: Vec<crate::graph::Node>,
    pub segments: Vec<RoadSegment>,
    pub seed: u64,
}

impl RoadNetwork {
    pub fn save_to_file(&self, path: &Path) -> RoadResult<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| RoadError::CorruptedNetworkFile {
                reason: e.to_string(),
            })?;
        std::fs::write(path, bytes)?;
        info!("Saved road network to {}", path.display());
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> RoadResult<Self> {
        let bytes = std::fs::read(path)?;
        let (network, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).map_err(
                |e| RoadError::CorruptedNetworkFile {
                    reason: e.to_string(),
                },
            )?;
        Ok(network)
    }

    pub fn total_length(&self) -> f32 {
        self.segments.iter().map(RoadSegment::length).sum()
    }
}

/// Per-pass statistics and recorded degradations. Failures of individual
/// connections land here instead of aborting the pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationReport {
    pub planned_edges: usize,
    pub routed: usize,
    pub relaxed_routes: usize,
    pub no_route_edges: usize,
    pub degenerate_paths: usize,
    pub intersections_created: usize,
    pub bridge_count: usize,
    pub ford_count: usize,
    pub carved_samples: usize,
    pub unclamped_segments: usize,
    pub failures: Vec<PlanningFailure>,
}

/// Immutable result of one generation pass
pub struct GeneratedRoads {
    pub network: RoadNetwork,
    pub nav: NavGraph,
    pub meshes: MeshArena,
    /// Terrain clone with roads carved in; the input field is never mutated
    pub terrain: HeightField,
    pub report: GenerationReport,
}

/// Orchestrates the full pipeline: plan, route, post-process, resolve
/// intersections, carve terrain, mesh, and build the navigation graph.
///
/// Stages run in order with barriers between them; routing fans out across
/// worker threads. A later `generate` call bumps the epoch, and an older
/// in-flight pass notices at the next barrier and abandons its work.
pub struct RoadSystemManager {
    config: RoadConfig,
    epoch: AtomicU64,
}

impl RoadSystemManager {
    pub fn new(config: RoadConfig) -> RoadResult<Self> {
        let config = config.validated()?;
        Ok(Self {
            config,
            epoch: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &RoadConfig {
        &self.config
    }

    /// Run one full generation pass over the given terrain and settlements.
    pub fn generate(
        &self,
        terrain: &HeightField,
        settlements: &[Settlement],
    ) -> RoadResult<GeneratedRoads> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = GenerationReport::default();

        // Terrain coverage is the one precondition we cannot degrade around
        for s in settlements {
            if terrain.height_at(s.position.x, s.position.z).is_none() {
                return Err(RoadError::TerrainQueryUnavailable {
                    x: s.position.x,
                    z: s.position.z,
                });
            }
        }

        let mut graph = RoadGraph::new(self.config.intersection_merge_radius);
        let mut settlement_ids: Vec<NodeId> = Vec::new();
        let mut demands: Vec<f32> = Vec::new();
        for s in settlements {
            let id = graph.add_node(s.position, NodeKind::Settlement, s.importance);
            match settlement_ids.iter().position(|&existing| existing == id) {
                // Two settlements within the merge tolerance share a node
                Some(i) => demands[i] += s.demand(),
                None => {
                    settlement_ids.push(id);
                    demands.push(s.demand());
                }
            }
        }

        let mut planner = MasterPlanner::new(&self.config);
        let plan = planner.plan(&graph, &settlement_ids, &demands, terrain)?;
        report.planned_edges = plan.edges.len();
        report.failures = plan.failures.clone();
        self.check_epoch(epoch)?;

        // Fan routing out across workers; results are keyed by edge index so
        // collection order never affects the output
        let pathfinder = Pathfinder::new(terrain, &self.config);
        let mut outcomes: Vec<(usize, RouteOutcome)> = plan
            .edges
            .par_iter()
            .enumerate()
            .map(|(i, edge)| {
                let start = graph.node(edge.from).map(|n| n.position);
                let goal = graph.node(edge.to).map(|n| n.position);
                let outcome = match (start, goal) {
                    (Some(s), Some(g)) => pathfinder.find_route(s, g),
                    _ => RouteOutcome::NoRoute,
                };
                (i, outcome)
            })
            .collect();
        outcomes.sort_by_key(|(i, _)| *i);
        self.check_epoch(epoch)?;

        let processor = PathPostProcessor::new(&self.config);
        let mut segments: Vec<RoadSegment> = Vec::new();
        for (i, outcome) in outcomes {
            let edge = &plan.edges[i];
            match outcome {
                RouteOutcome::Found { path, relaxed } => {
                    report.routed += 1;
                    if relaxed {
                        report.relaxed_routes += 1;
                    }
                    let processed = processor.process(&path, edge.class, terrain);
                    if processed.degenerate {
                        report.degenerate_paths += 1;
                    }
                    segments.push(segment_from_processed(
                        SegmentId(segments.len() as u32),
                        processed,
                        edge.from,
                        edge.to,
                        i,
                    ));
                }
                RouteOutcome::NoRoute => {
                    report.no_route_edges += 1;
                    report.failures.push(PlanningFailure {
                        settlement: edge.from,
                        reason: format!(
                            "No traversable route between {:?} and {:?}",
                            edge.from, edge.to
                        ),
                    });
                }
            }
        }
        self.check_epoch(epoch)?;

        let (mut segments, intersections) =
            resolve_intersections(&mut graph, segments, self.config.intersection_merge_radius);
        report.intersections_created = intersections;
        report.bridge_count = segments.iter().map(|s| s.bridge_spans.len()).sum();
        report.ford_count = segments.iter().map(|s| s.ford_spans.len()).sum();

        let mut carved = terrain.clone();
        let integration_report = integration::integrate(&mut carved, &mut segments, &self.config);
        report.carved_samples = integration_report.carved_samples;
        report.unclamped_segments = integration_report.unclamped_segments.len();
        self.check_epoch(epoch)?;

        let meshes = GeometryGenerator::new(&self.config).build_arena(graph.nodes(), &segments);
        let nav = NavGraph::build(graph.nodes(), &segments);

        info!(
            "Road generation pass {}: {} segments, {} intersections, {} bridges, {} failures",
            epoch,
            segments.len(),
            report.intersections_created,
            report.bridge_count,
            report.failures.len()
        );

        Ok(GeneratedRoads {
            network: RoadNetwork {
                nodes: graph.nodes().to_vec(),
                segments,
                seed: self.config.seed,
            },
            nav,
            meshes,
            terrain: carved,
            report,
        })
    }

    /// Bump the epoch so any in-flight pass abandons at its next barrier,
    /// then run a fresh pass.
    pub fn regenerate(
        &self,
        terrain: &HeightField,
        settlements: &[Settlement],
    ) -> RoadResult<GeneratedRoads> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.generate(terrain, settlements)
    }

    fn check_epoch(&self, epoch: u64) -> RoadResult<()> {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Generation pass {} superseded, abandoning", epoch);
            return Err(RoadError::GenerationSuperseded);
        }
        Ok(())
    }
}

fn segment_from_processed(
    id: SegmentId,
    processed: ProcessedPath,
    from: NodeId,
    to: NodeId,
    source_edge: usize,
) -> RoadSegment {
    RoadSegment {
        id,
        polyline: processed.points.iter().map(|p| p.position).collect(),
        width: processed.width,
        class: processed.class,
        bridge_spans: processed.bridge_spans,
        ford_spans: processed.ford_spans,
        unclamped: false,
        from,
        to,
        source_edge,
    }
}

/// Find path crossings between segments that do not already share a node,
/// insert an intersection node at each crossing, and split both segments
/// there. Crossings on bridge decks are flyovers and stay unsplit.
///
/// Returns the final segments with dense ids, plus the number of
/// intersection nodes created.
fn resolve_intersections(
    graph: &mut RoadGraph,
    segments: Vec<RoadSegment>,
    merge_radius: f32,
) -> (Vec<RoadSegment>, usize) {
    let nodes_before = graph.node_count();
    let mut queue: VecDeque<RoadSegment> = segments.into();
    let mut done: Vec<RoadSegment> = Vec::new();

    'outer: while let Some(segment) = queue.pop_front() {
        for k in 0..done.len() {
            if shares_node(&segment, &done[k]) {
                continue;
            }
            if let Some((i, j, point)) = first_crossing(&segment, &done[k], merge_radius) {
                let node = graph.add_node(point, NodeKind::Intersection, 0.0);
                let node_pos = graph
                    .node(node)
                    .map(|n| n.position)
                    .unwrap_or(point);

                let other = done.remove(k);
                let (a, b) = split_segment(segment, i, node, node_pos);
                let (c, d) = split_segment(other, j, node, node_pos);
                queue.push_back(a);
                queue.push_back(b);
                queue.push_back(c);
                queue.push_back(d);
                continue 'outer;
            }
        }
        done.push(segment);
    }

    for (index, segment) in done.iter_mut().enumerate() {
        segment.id = SegmentId(index as u32);
    }
    (done, graph.node_count() - nodes_before)
}

fn shares_node(a: &RoadSegment, b: &RoadSegment) -> bool {
    a.from == b.from || a.from == b.to || a.to == b.from || a.to == b.to
}

/// First transversal crossing between two polylines in the xz plane.
///
/// Returns the sub-segment index in each polyline and the crossing point.
/// Crossings too close to either polyline's endpoints merge into the
/// existing node instead, and crossings on a bridge deck are skipped.
fn first_crossing(
    a: &RoadSegment,
    b: &RoadSegment,
    merge_radius: f32,
) -> Option<(usize, usize, Vec3)> {
    for i in 0..a.polyline.len().saturating_sub(1) {
        if on_bridge(a, i) {
            continue;
        }
        for j in 0..b.polyline.len().saturating_sub(1) {
            if on_bridge(b, j) {
                continue;
            }
            let Some((t, u)) = intersect_xz(
                a.polyline[i],
                a.polyline[i + 1],
                b.polyline[j],
                b.polyline[j + 1],
            ) else {
                continue;
            };

            let pa = a.polyline[i].lerp(a.polyline[i + 1], t);
            let pb = b.polyline[j].lerp(b.polyline[j + 1], u);
            let point = (pa + pb) / 2.0;

            // A crossing at a terminus is already a shared junction
            let ends = [
                a.polyline[0],
                a.polyline[a.polyline.len() - 1],
                b.polyline[0],
                b.polyline[b.polyline.len() - 1],
            ];
            let near_end = ends.iter().any(|end| end.distance(point) <= merge_radius);
            if near_end {
                continue;
            }
            return Some((i, j, point));
        }
    }
    None
}

fn on_bridge(segment: &RoadSegment, index: usize) -> bool {
    segment
        .bridge_spans
        .iter()
        .any(|span| span.contains(index) || span.contains(index + 1))
}

/// Parametric intersection of two xz line segments, endpoints excluded
fn intersect_xz(a1: Vec3, a2: Vec3, b1: Vec3, b2: Vec3) -> Option<(f32, f32)> {
    let r = Vec2::new(a2.x - a1.x, a2.z - a1.z);
    let s = Vec2::new(b2.x - b1.x, b2.z - b1.z);
    let denom = r.x * s.y - r.y * s.x;
    if denom.abs() < 1e-6 {
        return None;
    }
    let qp = Vec2::new(b1.x - a1.x, b1.z - a1.z);
    let t = (qp.x * s.y - qp.y * s.x) / denom;
    let u = (qp.x * r.y - qp.y * r.x) / denom;
    if (1e-4..=1.0 - 1e-4).contains(&t) && (1e-4..=1.0 - 1e-4).contains(&u) {
        Some((t, u))
    } else {
        None
    }
}

/// Split one segment at a crossing into two segments meeting at `node`.
/// Water spans are redistributed by index; crossings inside spans are
/// filtered out before splitting, so no span straddles the cut.
fn split_segment(
    segment: RoadSegment,
    index: usize,
    node: NodeId,
    node_pos: Vec3,
) -> (RoadSegment, RoadSegment) {
    let mut first_poly: Vec<Vec3> = segment.polyline[..=index].to_vec();
    first_poly.push(node_pos);
    let mut second_poly: Vec<Vec3> = vec![node_pos];
    second_poly.extend_from_slice(&segment.polyline[index + 1..]);

    let split_spans = |spans: &[BridgeSpan]| -> (Vec<BridgeSpan>, Vec<BridgeSpan>) {
        let mut first = Vec::new();
        let mut second = Vec::new();
        for span in spans {
            if span.end_index <= index {
                first.push(span.clone());
            } else if span.start_index > index {
                second.push(BridgeSpan {
                    start_index: span.start_index - index,
                    end_index: span.end_index - index,
                    deck_height: span.deck_height,
                });
            }
        }
        (first, second)
    };
    let (bridges_a, bridges_b) = split_spans(&segment.bridge_spans);

    let mut fords_a = Vec::new();
    let mut fords_b = Vec::new();
    for &(start, end) in &segment.ford_spans {
        if end <= index {
            fords_a.push((start, end));
        } else if start > index {
            fords_b.push((start - index, end - index));
        }
    }

    let first = RoadSegment {
        id: segment.id,
        polyline: first_poly,
        width: segment.width,
        class: segment.class,
        bridge_spans: bridges_a,
        ford_spans: fords_a,
        unclamped: false,
        from: segment.from,
        to: node,
        source_edge: segment.source_edge,
    };
    let second = RoadSegment {
        id: segment.id,
        polyline: second_poly,
        width: segment.width,
        class: segment.class,
        bridge_spans: bridges_b,
        ford_spans: fords_b,
        unclamped: false,
        from: node,
        to: segment.to,
        source_edge: segment.source_edge,
    };
    (first, second)
}
