//! Events emitted by the core.
//!
//! Events are produced inside the simulation task, collected per actor, and
//! handed to the main thread at the frame boundary. The game context stores
//! them in a bevy `Events<SimEvent>` resource (double-buffered across two
//! frames), and every actor snapshot carries the events it fired that frame.

use crate::actor::{ActorId, ActorState};
use crate::couplings::CouplingId;
use crate::net::{PeerId, StreamId};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Event, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimEvent {
    ActorCreated { actor: ActorId },
    ActorRemoved { actor: ActorId },
    ActorStateChanged { actor: ActorId, from: ActorState, to: ActorState },
    EngineStarted { actor: ActorId },
    EngineDied { actor: ActorId },
    ShiftBegin { actor: ActorId, from: i32, to: i32 },
    ShiftEnd { actor: ActorId, gear: i32 },
    /// Manual shift attempted with the clutch engaged.
    GearSlide { actor: ActorId },
    BeamBroken { actor: ActorId, beam: usize },
    WheelContactChanged { actor: ActorId, wheel: usize, in_contact: bool },
    TruckLightsToggled { actor: ActorId, on: bool },
    AirPurge { actor: ActorId },
    /// Non-finite node state was clamped back to the previous position.
    NumericalWarning { actor: ActorId, nodes: usize },
    /// Two actors started touching.
    ActorContact { a: ActorId, b: ActorId },
    CouplingAttached { coupling: CouplingId, a: ActorId, b: ActorId },
    CouplingBroken { coupling: CouplingId },
    CouplingDetached { coupling: CouplingId },
    PlayerActorChanged { previous: Option<ActorId>, current: Option<ActorId> },
    DifferentialModeChanged { actor: ActorId, axle: usize },
    StreamMismatch { peer: PeerId, stream: StreamId },
    /// Text meant for the user (chat box, notifications).
    UserMessage { text: String },
    SpawnFailed { name: String, reason: String },
    StateSaved { path: String },
    StateLoaded { path: String },
    SaveFailed { path: String, reason: String },
    /// A worker task panicked; the frame's results for `phase` were dropped.
    TaskFailed { phase: String },
}

impl SimEvent {
    /// The actor an event is about, if any.
    pub fn actor(&self) -> Option<ActorId> {
        match *self {
            SimEvent::ActorCreated { actor }
            | SimEvent::ActorRemoved { actor }
            | SimEvent::ActorStateChanged { actor, .. }
            | SimEvent::EngineStarted { actor }
            | SimEvent::EngineDied { actor }
            | SimEvent::ShiftBegin { actor, .. }
            | SimEvent::ShiftEnd { actor, .. }
            | SimEvent::GearSlide { actor }
            | SimEvent::BeamBroken { actor, .. }
            | SimEvent::WheelContactChanged { actor, .. }
            | SimEvent::TruckLightsToggled { actor, .. }
            | SimEvent::AirPurge { actor }
            | SimEvent::NumericalWarning { actor, .. }
            | SimEvent::DifferentialModeChanged { actor, .. } => Some(actor),
            SimEvent::ActorContact { a, .. } => Some(a),
            _ => None,
        }
    }
}
