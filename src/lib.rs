pub mod config;
pub mod errors;
pub mod geometry;
pub mod graph;
pub mod integration;
pub mod manager;
pub mod navgraph;
pub mod pathfinder;
pub mod planner;
pub mod postprocess;
pub mod settlement;
pub mod terrain;

// Selective re-exports for external consumers

pub use config::RoadConfig;
pub use errors::{RoadError, RoadResult};
pub use manager::{GeneratedRoads, RoadNetwork, RoadSegment, RoadSystemManager, SegmentId};
pub use navgraph::{NavGraph, NavNodeId};
pub use settlement::{Settlement, SettlementProvider, scatter_settlements};
pub use terrain::{HeightField, TerrainQuery};
