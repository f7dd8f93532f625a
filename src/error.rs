//! Error types for lifecycle operations.
//!
//! Runtime faults inside a physics step never surface as `Err`; they become
//! [`SimEvent`](crate::events::SimEvent)s. The enums here are returned by the
//! main-thread operations: spawning, configuration, savegames and the network
//! payload codec.

use thiserror::Error;

/// A definition failed validation before any actor state was built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("definition has no nodes")]
    NoNodes,
    #[error("node {node} has non-positive or non-finite mass {mass}")]
    BadMass { node: usize, mass: f32 },
    #[error("beam {beam} references node {node}, but only {count} nodes exist")]
    BeamNodeOutOfRange { beam: usize, node: usize, count: usize },
    #[error("beam {beam} connects node {node} to itself")]
    SelfBeam { beam: usize, node: usize },
    #[error("beam {beam} has zero rest length")]
    ZeroLength { beam: usize },
    #[error("beam {beam} rest length {rest} is outside ({min}, {max}]")]
    RestLengthOutOfBounds { beam: usize, rest: f32, min: f32, max: f32 },
    #[error("{what} {index} references node {node}, but only {count} nodes exist")]
    NodeOutOfRange { what: &'static str, index: usize, node: usize, count: usize },
    #[error("axle {axle} references wheel {wheel}, but only {count} wheels exist")]
    AxleWheelOutOfRange { axle: usize, wheel: usize, count: usize },
    #[error("axle {axle} declares no differential modes")]
    AxleWithoutModes { axle: usize },
    #[error("wheel {wheel} has {rim} rim nodes; at least 3 are required")]
    TooFewRimNodes { wheel: usize, rim: usize },
    #[error("wheel {wheel} has invalid radius {radius}")]
    BadWheelRadius { wheel: usize, radius: f32 },
    #[error("powertrain declares no forward gear")]
    NoForwardGear,
    #[error("powertrain max rpm {max} must exceed idle rpm {idle}")]
    BadRpmRange { idle: f32, max: f32 },
    #[error("torque curve is empty or not sorted by rpm ratio")]
    BadTorqueCurve,
    #[error("unknown section config '{0}'")]
    UnknownSectionConfig(String),
    #[error("{what} {index} uses node {node}, which section config '{config}' excludes")]
    ExcludedNode { what: &'static str, index: usize, node: usize, config: String },
}

/// Failure of a spawn request. The actor never reaches the simulated state
/// and no creation event is emitted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpawnError {
    #[error("invalid definition '{name}': {source}")]
    Invalid {
        name: String,
        #[source]
        source: ValidationError,
    },
    #[error("content '{0}' is not available")]
    ContentMissing(String),
    #[error("all {0} actor slots are in use")]
    NoFreeSlot(usize),
    #[error("no world is loaded")]
    NoWorld,
}

/// Failure to load or validate a [`SimConfig`](crate::config::SimConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure to write or restore a savegame.
#[derive(Debug, Error)]
pub enum SavegameError {
    #[error("savegame I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("savegame parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported savegame version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("terrain '{0}' could not be loaded")]
    Terrain(String),
    #[error("no world is loaded")]
    NoWorld,
    #[error("actor '{name}' could not be re-spawned: {source}")]
    Respawn {
        name: String,
        #[source]
        source: SpawnError,
    },
    #[error("saved state for '{name}' does not match its definition: {detail}")]
    Mismatch { name: String, detail: String },
}

/// Failure to encode or decode a network payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("unexpected packet kind {0:?}")]
    UnexpectedKind(crate::net::PacketKind),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool could not start: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

/// A worker task panicked; carries the panic message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("worker task panicked: {0}")]
pub struct TaskPanic(pub String);
