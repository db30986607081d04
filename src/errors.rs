use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoadError {
    // Fatal: no valid road can be computed without height data
    #[error("Terrain query unavailable at ({x:.1}, {z:.1})")]
    TerrainQueryUnavailable { x: f32, z: f32 },

    #[error("Invalid terrain data: {reason}")]
    InvalidTerrainData { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Config file not found at path: {path}")]
    ConfigFileNotFound { path: PathBuf },

    #[error("Failed to read or write file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize config: {0}")]
    SerializationFailed(#[from] toml::ser::Error),

    #[error("Failed to deserialize config: {0}")]
    DeserializationFailed(#[from] toml::de::Error),

    #[error("No settlements provided to plan for")]
    NoSettlements,

    #[error("Failed to build Voronoi partition over settlement sites")]
    PartitionFailed,

    #[error("Corrupted network file: {reason}")]
    CorruptedNetworkFile { reason: String },

    // A newer generation request bumped the epoch while this pass ran
    #[error("Generation pass superseded by a newer request")]
    GenerationSuperseded,
}

/// Result type alias for all operations
pub type RoadResult<T> = Result<T, RoadError>;
