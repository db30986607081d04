use crate::config::RoadConfig;
use crate::graph::{Node, NodeId};
use crate::manager::{RoadSegment, SegmentId};
use bevy::prelude::*;
use bevy::render::mesh::{Indices, PrimitiveTopology};
use bevy::render::render_asset::RenderAssetUsages;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Renderer-agnostic triangle mesh buffers.
///
/// The arena owns these; rendering converts to an engine mesh with
/// [`RoadMesh::to_mesh`] but never owns the buffers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoadMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl RoadMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Convert to an engine mesh for rendering attachment
    pub fn to_mesh(&self) -> Mesh {
        let mut mesh = Mesh::new(
            PrimitiveTopology::TriangleList,
            RenderAssetUsages::RENDER_WORLD | RenderAssetUsages::MAIN_WORLD,
        );
        mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, self.positions.clone());
        mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, self.normals.clone());
        mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, self.uvs.clone());
        mesh.insert_indices(Indices::U32(self.indices.clone()));
        mesh
    }
}

/// Road cross-section at one sample: the left and right edge vertices.
/// Junction patches reuse these exact positions so strips and patches can
/// never leave a seam.
#[derive(Debug, Clone, Copy)]
pub struct CrossSection {
    pub left: Vec3,
    pub right: Vec3,
}

/// All generated road geometry for one pass, keyed by segment id.
/// BTreeMap keeps iteration order deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshArena {
    segments: BTreeMap<SegmentId, RoadMesh>,
    junctions: BTreeMap<NodeId, RoadMesh>,
}

impl MeshArena {
    pub fn segment(&self, id: SegmentId) -> Option<&RoadMesh> {
        self.segments.get(&id)
    }

    pub fn junction(&self, id: NodeId) -> Option<&RoadMesh> {
        self.junctions.get(&id)
    }

    pub fn iter_segments(&self) -> impl Iterator<Item = (SegmentId, &RoadMesh)> {
        self.segments.iter().map(|(id, m)| (*id, m))
    }

    pub fn iter_junctions(&self) -> impl Iterator<Item = (NodeId, &RoadMesh)> {
        self.junctions.iter().map(|(id, m)| (*id, m))
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn junction_count(&self) -> usize {
        self.junctions.len()
    }
}

/// Extrudes processed paths into triangle-strip road meshes with adaptive
/// tessellation, shared-vertex junction patches, and bridge railings.
pub struct GeometryGenerator<'a> {
    config: &'a RoadConfig,
}

impl<'a> GeometryGenerator<'a> {
    pub fn new(config: &'a RoadConfig) -> Self {
        Self { config }
    }

    /// Build the full arena for a pass: one strip per segment, one fan patch
    /// per node where two or more strips meet.
    pub fn build_arena(&self, nodes: &[Node], segments: &[RoadSegment]) -> MeshArena {
        let mut arena = MeshArena::default();
        let mut terminals: BTreeMap<NodeId, Vec<(Vec3, CrossSection)>> = BTreeMap::new();

        for segment in segments {
            let (mesh, start_section, end_section) = self.build_segment_mesh(segment);
            if let Some(first) = segment.polyline.first() {
                terminals
                    .entry(segment.from)
                    .or_default()
                    .push((*first, start_section));
            }
            if let Some(last) = segment.polyline.last() {
                terminals
                    .entry(segment.to)
                    .or_default()
                    .push((*last, end_section));
            }
            arena.segments.insert(segment.id, mesh);
        }

        for node in nodes {
            let Some(ends) = terminals.get(&node.id) else {
                continue;
            };
            if ends.len() < 2 {
                continue;
            }
            let patch = self.build_junction_patch(node.position, ends);
            if !patch.is_empty() {
                arena.junctions.insert(node.id, patch);
            }
        }

        info!(
            "Generated {} segment meshes and {} junction patches",
            arena.segment_count(),
            arena.junction_count()
        );
        arena
    }

    /// One cross-section quad strip along the segment. Returns the mesh plus
    /// the exact first and last cross-sections for junction stitching.
    pub fn build_segment_mesh(&self, segment: &RoadSegment) -> (RoadMesh, CrossSection, CrossSection) {
        let samples = self.resample(segment);
        let half = segment.width / 2.0;

        let mut mesh = RoadMesh::default();
        let mut sections: Vec<CrossSection> = Vec::with_capacity(samples.len());
        let mut length_acc = 0.0;

        for (i, sample) in samples.iter().enumerate() {
            if i > 0 {
                length_acc += sample.position.distance(samples[i - 1].position);
            }
            let section = cross_section(sample.position, sample.direction, half);
            sections.push(section);

            mesh.positions.push(section.left.to_array());
            mesh.positions.push(section.right.to_array());
            let v = length_acc / segment.width.max(0.001);
            mesh.uvs.push([0.0, v]);
            mesh.uvs.push([1.0, v]);
        }

        // Two counter-clockwise triangles per quad, viewed from above
        for i in 0..samples.len().saturating_sub(1) {
            let base = (i * 2) as u32;
            mesh.indices
                .extend_from_slice(&[base, base + 2, base + 1, base + 1, base + 2, base + 3]);
        }

        compute_smooth_normals(&mut mesh);
        self.add_bridge_railings(&mut mesh, segment, &samples);

        let start = sections.first().copied().unwrap_or(CrossSection {
            left: Vec3::ZERO,
            right: Vec3::ZERO,
        });
        let end = sections.last().copied().unwrap_or(start);
        (mesh, start, end)
    }

    /// Adaptive tessellation: spacing tightens with local curvature, bounded
    /// by the configured min/max step.
    fn resample(&self, segment: &RoadSegment) -> Vec<StripSample> {
        let polyline = &segment.polyline;
        if polyline.len() < 2 {
            return Vec::new();
        }

        let mut samples: Vec<StripSample> = Vec::new();
        let mut last_emitted = polyline[0];
        samples.push(StripSample {
            position: polyline[0],
            direction: direction_xz(polyline[0], polyline[1]),
            source_index: 0,
        });

        for i in 0..polyline.len() - 1 {
            let a = polyline[i];
            let b = polyline[i + 1];
            let span = a.distance(b);
            if span < 1e-4 {
                continue;
            }

            let step = self.local_step(polyline, i);
            let subdivisions = (span / step).ceil().max(1.0) as usize;

            for s in 1..=subdivisions {
                let t = s as f32 / subdivisions as f32;
                let p = a.lerp(b, t);
                let is_last = i == polyline.len() - 2 && s == subdivisions;
                if !is_last && p.distance(last_emitted) < self.config.tess_min_step {
                    continue;
                }
                let dir = if is_last {
                    direction_xz(a, b)
                } else {
                    direction_xz(last_emitted, p)
                };
                samples.push(StripSample {
                    position: p,
                    direction: dir,
                    source_index: i + 1,
                });
                last_emitted = p;
            }
        }
        samples
    }

    /// Step size from the turn angle at the polyline vertex: tight curves get
    /// dense sampling, straights get sparse sampling.
    fn local_step(&self, polyline: &[Vec3], i: usize) -> f32 {
        let turn = if i > 0 && i + 1 < polyline.len() {
            let before = direction_xz(polyline[i - 1], polyline[i]);
            let after = direction_xz(polyline[i], polyline[i + 1]);
            before.dot(after).clamp(-1.0, 1.0).acos()
        } else {
            0.0
        };
        // Curvature of 30 degrees or more pins the step to its minimum
        let sharpness = (turn / 30f32.to_radians()).clamp(0.0, 1.0);
        self.config.tess_max_step
            + (self.config.tess_min_step - self.config.tess_max_step) * sharpness
    }

    /// Railings along bridge spans: a low vertical strip on each deck edge
    fn add_bridge_railings(
        &self,
        mesh: &mut RoadMesh,
        segment: &RoadSegment,
        samples: &[StripSample],
    ) {
        const RAIL_HEIGHT: f32 = 1.1;
        let half = segment.width / 2.0;

        for span in &segment.bridge_spans {
            let on_deck: Vec<&StripSample> = samples
                .iter()
                .filter(|s| (span.start_index..=span.end_index).contains(&s.source_index))
                .collect();
            if on_deck.len() < 2 {
                continue;
            }

            for side in [-1.0f32, 1.0] {
                let base_vertex = mesh.positions.len() as u32;
                for sample in &on_deck {
                    let perp = perpendicular_xz(sample.direction) * half * side;
                    let foot = sample.position + perp;
                    let top = foot + Vec3::Y * RAIL_HEIGHT;
                    mesh.positions.push(foot.to_array());
                    mesh.positions.push(top.to_array());
                    let inward = -perp.normalize_or_zero();
                    mesh.normals.push(inward.to_array());
                    mesh.normals.push(inward.to_array());
                    mesh.uvs.push([0.0, 0.0]);
                    mesh.uvs.push([0.0, 1.0]);
                }
                for i in 0..on_deck.len() - 1 {
                    let b = base_vertex + (i * 2) as u32;
                    if side > 0.0 {
                        mesh.indices.extend_from_slice(&[b, b + 2, b + 1, b + 1, b + 2, b + 3]);
                    } else {
                        mesh.indices.extend_from_slice(&[b, b + 1, b + 2, b + 1, b + 3, b + 2]);
                    }
                }
            }
        }
    }

    /// Fan patch over a junction. Boundary vertices are the exact terminal
    /// cross-section vertices of every incoming strip, sorted by angle around
    /// the node, with one center vertex at the node position.
    fn build_junction_patch(&self, center: Vec3, ends: &[(Vec3, CrossSection)]) -> RoadMesh {
        let mut boundary: Vec<Vec3> = Vec::with_capacity(ends.len() * 2);
        for (_, section) in ends {
            boundary.push(section.left);
            boundary.push(section.right);
        }

        // Average terminal height keeps the patch flush with the strips
        let y = ends.iter().map(|(p, _)| p.y).sum::<f32>() / ends.len() as f32;
        let center = Vec3::new(center.x, y, center.z);

        boundary.sort_by(|a, b| {
            let aa = (a.z - center.z).atan2(a.x - center.x);
            let ab = (b.z - center.z).atan2(b.x - center.x);
            aa.total_cmp(&ab)
        });

        let mut mesh = RoadMesh::default();
        mesh.positions.push(center.to_array());
        mesh.normals.push([0.0, 1.0, 0.0]);
        mesh.uvs.push([0.5, 0.5]);

        for v in &boundary {
            mesh.positions.push(v.to_array());
            mesh.normals.push([0.0, 1.0, 0.0]);
            mesh.uvs.push([0.0, 0.0]);
        }

        let n = boundary.len() as u32;
        for i in 0..n {
            let a = 1 + i;
            let b = 1 + (i + 1) % n;
            mesh.indices.extend_from_slice(&[0, b, a]);
        }
        mesh
    }
}

#[derive(Debug, Clone, Copy)]
struct StripSample {
    position: Vec3,
    direction: Vec3,
    source_index: usize,
}

fn direction_xz(from: Vec3, to: Vec3) -> Vec3 {
    let d = Vec3::new(to.x - from.x, 0.0, to.z - from.z);
    d.normalize_or(Vec3::X)
}

fn perpendicular_xz(direction: Vec3) -> Vec3 {
    Vec3::new(-direction.z, 0.0, direction.x)
}

/// Left/right road edge vertices at one sample
fn cross_section(position: Vec3, direction: Vec3, half_width: f32) -> CrossSection {
    let perp = perpendicular_xz(direction) * half_width;
    CrossSection {
        left: position - perp,
        right: position + perp,
    }
}

/// Accumulate face normals onto shared vertices, then normalize; matches the
/// up-facing winding used by the strip indices.
fn compute_smooth_normals(mesh: &mut RoadMesh) {
    mesh.normals = vec![[0.0, 1.0, 0.0]; mesh.positions.len()];
    let mut accumulated = vec![Vec3::ZERO; mesh.positions.len()];

    for tri in mesh.indices.chunks_exact(3) {
        let (i0, i1, i2) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        let v0 = Vec3::from(mesh.positions[i0]);
        let v1 = Vec3::from(mesh.positions[i1]);
        let v2 = Vec3::from(mesh.positions[i2]);
        let normal = (v2 - v0).cross(v1 - v0).normalize_or(Vec3::Y);
        accumulated[i0] += normal;
        accumulated[i1] += normal;
        accumulated[i2] += normal;
    }

    for (slot, acc) in mesh.normals.iter_mut().zip(accumulated) {
        let n = acc.normalize_or(Vec3::Y);
        *slot = n.to_array();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKind, RoadClass};
    use crate::manager::{RoadSegment, SegmentId};
    use crate::postprocess::BridgeSpan;

    fn straight_segment(id: u32, from_x: f32, to_x: f32, z: f32) -> RoadSegment {
        let n = 8;
        let polyline = (0..=n)
            .map(|i| {
                let t = i as f32 / n as f32;
                Vec3::new(from_x + (to_x - from_x) * t, 0.0, z)
            })
            .collect();
        RoadSegment {
            id: SegmentId(id),
            polyline,
            width: 4.0,
            class: RoadClass::Local,
            bridge_spans: Vec::new(),
            ford_spans: Vec::new(),
            unclamped: false,
            from: NodeId(0),
            to: NodeId(1),
            source_edge: 0,
        }
    }

    fn curved_segment(id: u32) -> RoadSegment {
        // Quarter circle of radius 60
        let n = 16;
        let polyline = (0..=n)
            .map(|i| {
                let angle = i as f32 / n as f32 * std::f32::consts::FRAC_PI_2;
                Vec3::new(angle.cos() * 60.0, 0.0, angle.sin() * 60.0)
            })
            .collect();
        RoadSegment {
            id: SegmentId(id),
            polyline,
            width: 4.0,
            class: RoadClass::Local,
            bridge_spans: Vec::new(),
            ford_spans: Vec::new(),
            unclamped: false,
            from: NodeId(0),
            to: NodeId(1),
            source_edge: 0,
        }
    }

    #[test]
    fn test_strip_mesh_shape() {
        let config = RoadConfig::default();
        let generator = GeometryGenerator::new(&config);
        let segment = straight_segment(0, -50.0, 50.0, 0.0);
        let (mesh, start, end) = generator.build_segment_mesh(&segment);

        assert!(mesh.vertex_count() >= 4);
        assert_eq!(mesh.vertex_count() % 2, 0);
        assert_eq!(mesh.indices.len() % 3, 0);
        assert!(mesh.triangle_count() >= 2);

        // Cross sections are width apart, perpendicular to +X travel
        assert!((start.left.distance(start.right) - segment.width).abs() < 1e-3);
        assert!((end.left.distance(end.right) - segment.width).abs() < 1e-3);
        assert!((start.left.z - -2.0).abs() < 1e-3 || (start.left.z - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_no_nan_vertices_or_normals() {
        let config = RoadConfig::default();
        let generator = GeometryGenerator::new(&config);
        let (mesh, _, _) = generator.build_segment_mesh(&curved_segment(0));
        for p in &mesh.positions {
            assert!(p.iter().all(|c| c.is_finite()));
        }
        for n in &mesh.normals {
            assert!(n.iter().all(|c| c.is_finite()));
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            assert!((len - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_curves_sample_denser_than_straights() {
        let config = RoadConfig::default();
        let generator = GeometryGenerator::new(&config);

        let straight = straight_segment(0, 0.0, 94.2, 0.0); // same length as arc
        let curved = curved_segment(1);
        let (straight_mesh, _, _) = generator.build_segment_mesh(&straight);
        let (curved_mesh, _, _) = generator.build_segment_mesh(&curved);

        assert!(
            curved_mesh.vertex_count() > straight_mesh.vertex_count(),
            "curve {} vs straight {}",
            curved_mesh.vertex_count(),
            straight_mesh.vertex_count()
        );
    }

    #[test]
    fn test_junction_patch_shares_strip_vertices() {
        let config = RoadConfig::default();
        let generator = GeometryGenerator::new(&config);

        // Two segments meeting at the origin
        let mut east = straight_segment(0, 100.0, 0.0, 0.0);
        east.from = NodeId(1);
        east.to = NodeId(0);
        let mut north = RoadSegment {
            polyline: (0..=8)
                .map(|i| Vec3::new(0.0, 0.0, i as f32 * 12.5))
                .collect(),
            ..straight_segment(1, 0.0, 0.0, 0.0)
        };
        north.from = NodeId(0);
        north.to = NodeId(2);

        let nodes = vec![
            Node {
                id: NodeId(0),
                position: Vec3::ZERO,
                kind: NodeKind::Intersection,
                importance: 0.0,
            },
            Node {
                id: NodeId(1),
                position: Vec3::new(100.0, 0.0, 0.0),
                kind: NodeKind::Settlement,
                importance: 1.0,
            },
            Node {
                id: NodeId(2),
                position: Vec3::new(0.0, 0.0, 100.0),
                kind: NodeKind::Settlement,
                importance: 1.0,
            },
        ];

        let arena = generator.build_arena(&nodes, &[east.clone(), north.clone()]);
        let patch = arena.junction(NodeId(0)).expect("junction patch exists");

        // The strips' terminal cross-section vertices appear verbatim in the
        // patch boundary, so there can be no seam
        let (_, _, east_end) = generator.build_segment_mesh(&east);
        let (_, north_start, _) = generator.build_segment_mesh(&north);
        for expected in [east_end.left, east_end.right, north_start.left, north_start.right] {
            assert!(
                patch
                    .positions
                    .iter()
                    .any(|p| Vec3::from(*p).distance(expected) < 1e-4),
                "terminal vertex {expected} missing from junction patch"
            );
        }
    }

    #[test]
    fn test_bridge_railings_added() {
        let config = RoadConfig::default();
        let generator = GeometryGenerator::new(&config);

        let mut plain = straight_segment(0, 0.0, 100.0, 0.0);
        let (plain_mesh, _, _) = generator.build_segment_mesh(&plain);

        plain.bridge_spans.push(BridgeSpan {
            start_index: 2,
            end_index: 6,
            deck_height: 3.0,
        });
        let (bridged_mesh, _, _) = generator.build_segment_mesh(&plain);
        assert!(bridged_mesh.vertex_count() > plain_mesh.vertex_count());
        // Railing tops rise above the deck
        assert!(
            bridged_mesh
                .positions
                .iter()
                .any(|p| p[1] > 1.0)
        );
    }

    #[test]
    fn test_arena_deterministic_iteration() {
        let config = RoadConfig::default();
        let generator = GeometryGenerator::new(&config);
        let segments = vec![
            straight_segment(2, 0.0, 50.0, 20.0),
            straight_segment(0, 0.0, 50.0, 0.0),
            straight_segment(1, 0.0, 50.0, 10.0),
        ];
        let arena = generator.build_arena(&[], &segments);
        let order: Vec<u32> = arena.iter_segments().map(|(id, _)| id.0).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_to_mesh_has_attributes() {
        let config = RoadConfig::default();
        let generator = GeometryGenerator::new(&config);
        let (road_mesh, _, _) = generator.build_segment_mesh(&straight_segment(0, 0.0, 40.0, 0.0));
        let mesh = road_mesh.to_mesh();
        assert!(mesh.attribute(Mesh::ATTRIBUTE_POSITION).is_some());
        assert!(mesh.attribute(Mesh::ATTRIBUTE_NORMAL).is_some());
        assert!(mesh.attribute(Mesh::ATTRIBUTE_UV_0).is_some());
        assert!(mesh.indices().is_some());
    }
}
