use crate::config::RoadConfig;
use crate::manager::{RoadSegment, SegmentId};
use crate::terrain::{HeightField, TerrainQuery};
use bevy::prelude::*;
use std::collections::BTreeMap;

/// Extra carve width beyond the road edge, in world units
const SHOULDER: f32 = 1.0;

/// Road surface sits this far above the carved ground
const SURFACE_LIFT: f32 = 0.05;

/// Outcome of terrain integration for one pass over all segments
#[derive(Debug, Clone, Default)]
pub struct IntegrationReport {
    pub carved_samples: usize,
    pub unclamped_segments: Vec<SegmentId>,
}

/// Deform the terrain under every segment so the ground meets the road bed,
/// then verify the clearance invariant and retry with a widened footprint
/// where interpolation still pokes through.
///
/// Bridge span interiors never touch the ground; their cells are left alone.
/// Segments that still violate clearance after `carve_max_passes` are marked
/// `unclamped` and reported rather than failing the pass.
pub fn integrate(
    field: &mut HeightField,
    segments: &mut [RoadSegment],
    config: &RoadConfig,
) -> IntegrationReport {
    let mut report = IntegrationReport::default();

    for segment in segments.iter_mut() {
        let mut clamped = false;
        for pass in 0..config.carve_max_passes {
            // Each retry widens the footprint to catch bilinear bleed from
            // steep uncarved neighbors
            let radius_scale = 1.0 + 0.5 * pass as f32;
            report.carved_samples += carve_segment(field, segment, radius_scale);
            if clearance_ok(field, segment, config.clearance_epsilon) {
                clamped = true;
                break;
            }
        }

        if !clamped && !clearance_ok(field, segment, config.clearance_epsilon) {
            warn!(
                "Segment {:?} still intersects terrain after {} carve passes",
                segment.id, config.carve_max_passes
            );
            segment.unclamped = true;
            report.unclamped_segments.push(segment.id);
        }
    }

    debug!(
        "Terrain integration carved {} samples, {} segments unclamped",
        report.carved_samples,
        report.unclamped_segments.len()
    );
    report
}

/// Clearance invariant: outside bridge interiors, the road bed is never below
/// the ground by more than epsilon. Checks polyline points and midpoints.
pub fn clearance_ok(field: &HeightField, segment: &RoadSegment, epsilon: f32) -> bool {
    let points = &segment.polyline;
    for i in 0..points.len() {
        if on_bridge_interior(segment, i) {
            continue;
        }
        if violates(field, points[i], epsilon) {
            return false;
        }
        if i + 1 < points.len() && !on_bridge_interior(segment, i + 1) {
            let mid = (points[i] + points[i + 1]) / 2.0;
            if violates(field, mid, epsilon) {
                return false;
            }
        }
    }
    true
}

fn violates(field: &HeightField, point: Vec3, epsilon: f32) -> bool {
    match field.height_at(point.x, point.z) {
        Some(ground) => ground - point.y > epsilon,
        None => false,
    }
}

/// Strict interior of any bridge span; the span's bank indices still carve so
/// abutments meet the ground.
fn on_bridge_interior(segment: &RoadSegment, index: usize) -> bool {
    segment
        .bridge_spans
        .iter()
        .any(|span| index > span.start_index && index < span.end_index)
}

/// One carve pass for one segment. Walks the polyline at half-cell steps and
/// pulls nearby grid cells toward the road bed with a distance falloff.
/// Returns the number of grid cells whose height changed.
fn carve_segment(field: &mut HeightField, segment: &RoadSegment, radius_scale: f32) -> usize {
    let half_width = segment.width / 2.0;
    let radius = (half_width + SHOULDER) * radius_scale;
    let step = (field.scale * 0.5).max(0.1);

    // Strongest influence per cell wins; BTreeMap keeps application order
    // independent of walk order.
    let mut influences: BTreeMap<(u32, u32), (f32, f32)> = BTreeMap::new();

    for i in 0..segment.polyline.len().saturating_sub(1) {
        if on_bridge_interior(segment, i) && on_bridge_interior(segment, i + 1) {
            continue;
        }
        let a = segment.polyline[i];
        let b = segment.polyline[i + 1];
        let span = a.distance(b);
        let samples = (span / step).ceil().max(1.0) as usize;

        for s in 0..=samples {
            let t = s as f32 / samples as f32;
            let p = a.lerp(b, t);
            stamp(field, &mut influences, p, half_width, radius);
        }
    }

    let mut carved = 0;
    for ((gx, gz), (target, weight)) in influences {
        if let Some(old) = field.height_at_grid(gx, gz) {
            let new = old + (target - old) * weight;
            if (new - old).abs() > 1e-4 {
                field.set_height_at_grid(gx, gz, new);
                carved += 1;
            }
        }
    }
    carved
}

/// Record the influence of one road-bed sample on every grid cell within the
/// footprint radius.
fn stamp(
    field: &HeightField,
    influences: &mut BTreeMap<(u32, u32), (f32, f32)>,
    point: Vec3,
    half_width: f32,
    radius: f32,
) {
    let target = point.y - SURFACE_LIFT;
    let (gx_min, gz_min) = field.world_to_grid(point.x - radius, point.z - radius);
    let (gx_max, gz_max) = field.world_to_grid(point.x + radius, point.z + radius);

    let gx_lo = gx_min.floor().max(0.0) as u32;
    let gz_lo = gz_min.floor().max(0.0) as u32;
    let gx_hi = (gx_max.ceil() as u32).min(field.width.saturating_sub(1));
    let gz_hi = (gz_max.ceil() as u32).min(field.height.saturating_sub(1));

    for gz in gz_lo..=gz_hi {
        for gx in gx_lo..=gx_hi {
            let (wx, wz) = field.grid_to_world(gx as f32, gz as f32);
            let dist = ((wx - point.x).powi(2) + (wz - point.z).powi(2)).sqrt();
            if dist > radius {
                continue;
            }
            let weight = if dist <= half_width {
                1.0
            } else {
                1.0 - (dist - half_width) / (radius - half_width).max(1e-3)
            };
            let entry = influences.entry((gx, gz)).or_insert((target, 0.0));
            if weight > entry.1 {
                *entry = (target, weight);
            }
        }
    }
}
