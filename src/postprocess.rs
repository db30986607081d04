use crate::config::RoadConfig;
use crate::graph::RoadClass;
use crate::pathfinder::{PathPoint, RoutePath};
use crate::terrain::TerrainQuery;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Contiguous run of path samples crossing water, rendered as an elevated
/// deck. Indices are inclusive and refer to the processed point list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSpan {
    pub start_index: usize,
    pub end_index: usize,
    pub deck_height: f32,
}

impl BridgeSpan {
    pub fn contains(&self, index: usize) -> bool {
        (self.start_index..=self.end_index).contains(&index)
    }
}

/// A route after smoothing, classification, and bridge detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedPath {
    pub points: Vec<PathPoint>,
    pub class: RoadClass,
    pub width: f32,
    pub bridge_spans: Vec<BridgeSpan>,
    /// Short water crossings treated as fords: ground is raised instead of
    /// building a deck. Inclusive index ranges.
    pub ford_spans: Vec<(usize, usize)>,
    pub degenerate: bool,
}

/// Road class from combined endpoint demand, using fixed breakpoints
pub fn road_class_for_demand(demand: f32, config: &RoadConfig) -> RoadClass {
    if demand >= config.highway_demand {
        RoadClass::Highway
    } else if demand < config.local_demand {
        RoadClass::Local
    } else {
        RoadClass::Arterial
    }
}

/// Smooths raw grid paths, assigns width by class, and detects bridge spans
pub struct PathPostProcessor<'a> {
    config: &'a RoadConfig,
}

impl<'a> PathPostProcessor<'a> {
    pub fn new(config: &'a RoadConfig) -> Self {
        Self { config }
    }

    pub fn process<T: TerrainQuery>(
        &self,
        route: &RoutePath,
        class: RoadClass,
        terrain: &T,
    ) -> ProcessedPath {
        let width = self.config.width * class.width_multiplier();

        let mut points = route.points.clone();
        if self.config.smooth {
            points = self.smooth(&points, terrain);
        }

        // A path that collapsed to near-zero length becomes a single straight
        // segment rather than crashing the mesh generator
        let length: f32 = points
            .windows(2)
            .map(|w| w[0].position.distance(w[1].position))
            .sum();
        let degenerate = length < self.config.cell_size || points.len() < 2;
        if degenerate {
            let first = route.points.first().cloned();
            let last = route.points.last().cloned();
            points = match (first, last) {
                (Some(a), Some(b)) => vec![a, b],
                _ => points,
            };
        }

        let (bridge_spans, ford_spans) = self.detect_water_spans(&points);
        for span in &bridge_spans {
            Self::apply_deck_curve(&mut points, span);
        }
        for &(start, end) in &ford_spans {
            Self::apply_ford(&mut points, start, end);
        }

        ProcessedPath {
            points,
            class,
            width,
            bridge_spans,
            ford_spans,
            degenerate,
        }
    }

    /// Moving-average smoothing of the interior points. Each pass averages a
    /// point with its neighbors, then clamps it back inside the lateral
    /// tolerance of the raw corridor and re-samples the ground beneath it.
    fn smooth<T: TerrainQuery>(&self, raw: &[PathPoint], terrain: &T) -> Vec<PathPoint> {
        let mut points = raw.to_vec();
        if points.len() < 3 {
            return points;
        }

        for _ in 0..self.config.smoothing_passes {
            let snapshot = points.clone();
            for i in 1..points.len() - 1 {
                let prev = snapshot[i - 1].position;
                let here = snapshot[i].position;
                let next = snapshot[i + 1].position;
                let averaged = (prev + here + next) / 3.0;

                let original = raw[i].position;
                let mut drift = averaged - original;
                drift.y = 0.0;
                let lateral = drift.length();
                let clamped = if lateral > self.config.lateral_tolerance {
                    original + drift * (self.config.lateral_tolerance / lateral)
                } else {
                    Vec3::new(averaged.x, original.y, averaged.z)
                };
                points[i].position = Vec3::new(clamped.x, points[i].position.y, clamped.z);
            }
        }

        for p in points.iter_mut() {
            if let Some(ground) = terrain.height_at(p.position.x, p.position.z) {
                p.ground_height = ground;
                p.position.y = ground;
            }
            if let Some(slope) = terrain.slope_deg_at(p.position.x, p.position.z) {
                p.slope_deg = slope;
            }
            p.water = terrain.is_water_at(p.position.x, p.position.z);
        }
        points
    }

    /// Maximal contiguous water runs become bridges when their world length
    /// reaches the ford threshold, fords otherwise.
    fn detect_water_spans(&self, points: &[PathPoint]) -> (Vec<BridgeSpan>, Vec<(usize, usize)>) {
        let mut bridges = Vec::new();
        let mut fords = Vec::new();

        let mut run_start: Option<usize> = None;
        for i in 0..=points.len() {
            let wet = i < points.len() && points[i].water;
            match (wet, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    let end = i - 1;
                    let span_length: f32 = points[start..=end]
                        .windows(2)
                        .map(|w| w[0].position.distance(w[1].position))
                        .sum();
                    if span_length >= self.config.ford_min_length {
                        bridges.push(BridgeSpan {
                            start_index: start,
                            end_index: end,
                            deck_height: Self::deck_height(points, start, end, self.config),
                        });
                    } else {
                        fords.push((start, end));
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
        (bridges, fords)
    }

    /// Deck rides above the higher bank by the configured clearance
    fn deck_height(points: &[PathPoint], start: usize, end: usize, config: &RoadConfig) -> f32 {
        let entry_bank = if start > 0 {
            points[start - 1].ground_height
        } else {
            points[start].ground_height
        };
        let exit_bank = if end + 1 < points.len() {
            points[end + 1].ground_height
        } else {
            points[end].ground_height
        };
        entry_bank.max(exit_bank) + config.bridge_deck_clearance
    }

    /// Height over a bridge span follows the deck curve, not the terrain:
    /// a gentle arch from bank to bank peaking at the deck height.
    fn apply_deck_curve(points: &mut [PathPoint], span: &BridgeSpan) {
        let entry_y = if span.start_index > 0 {
            points[span.start_index - 1].position.y
        } else {
            points[span.start_index].ground_height
        };
        let exit_y = if span.end_index + 1 < points.len() {
            points[span.end_index + 1].position.y
        } else {
            points[span.end_index].ground_height
        };

        let count = span.end_index - span.start_index + 1;
        for (k, i) in (span.start_index..=span.end_index).enumerate() {
            let t = (k + 1) as f32 / (count + 1) as f32;
            let base = entry_y * (1.0 - t) + exit_y * t;
            // Parabolic blend, zero at the banks, peak mid-span: approach
            // ramps rise smoothly from each bank onto the deck
            let arch = 4.0 * t * (1.0 - t);
            points[i].position.y = (base * (1.0 - arch) + span.deck_height * arch).max(base);
        }
    }

    /// Fords ride just above the nearer bank instead of getting a deck
    fn apply_ford(points: &mut [PathPoint], start: usize, end: usize) {
        let entry = if start > 0 {
            points[start - 1].ground_height
        } else {
            points[start].ground_height
        };
        let exit = if end + 1 < points.len() {
            points[end + 1].ground_height
        } else {
            points[end].ground_height
        };
        let surface = entry.min(exit) + 0.3;
        for p in points[start..=end].iter_mut() {
            p.position.y = p.position.y.max(surface);
        }
    }
}
