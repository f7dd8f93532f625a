//! Read-only per-frame view of the simulation.
//!
//! The manager composes a [`Snapshot`] at the end of every frame and
//! publishes it behind an `Arc`. Renderer, audio, scripts and the network
//! layer read it while the next frame simulates, so a reader always sees
//! one whole frame.

use crate::actor::{Actor, ActorId, ActorState};
use crate::definition::{DriveableKind, TransmissionMode};
use crate::events::SimEvent;
use crate::math::Aabb;
use crate::powertrain::PowertrainState;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Dashboard and audio values of a powertrain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gauges {
    pub rpm: f32,
    pub gear: i32,
    pub clutch: f32,
    pub throttle: f32,
    pub turbo_psi: f32,
    pub air_pressure: f32,
    pub running: bool,
    pub contact: bool,
    pub mode: TransmissionMode,
}

impl From<&PowertrainState> for Gauges {
    fn from(state: &PowertrainState) -> Self {
        Self {
            rpm: state.rpm,
            gear: state.gear,
            clutch: state.clutch,
            throttle: state.throttle,
            turbo_psi: state.turbo_psi(),
            air_pressure: state.air_pressure,
            running: state.running,
            contact: state.contact,
            mode: state.mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub id: ActorId,
    pub name: String,
    pub state: ActorState,
    pub driveable: DriveableKind,
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub aabb: Aabb,
    pub gauges: Option<Gauges>,
    /// Wheel spin (rad/s).
    pub wheel_spin: Vec<f32>,
    pub lights: bool,
    pub replaying: bool,
}

impl ActorSnapshot {
    pub fn capture(actor: &Actor) -> Self {
        Self {
            id: actor.id,
            name: actor.name.clone(),
            state: actor.state,
            driveable: actor.driveable,
            positions: actor.nodes.iter().map(|n| n.position).collect(),
            velocities: actor.nodes.iter().map(|n| n.velocity).collect(),
            aabb: actor.aabb,
            gauges: actor.powertrain.as_ref().map(|p| Gauges::from(p.gauges())),
            wheel_spin: actor.wheels.iter().map(|w| w.omega).collect(),
            lights: actor.lights,
            replaying: actor.replaying,
        }
    }

    pub fn center(&self) -> Vec3 {
        self.aabb.center()
    }
}

/// Complete frame view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub frame: u64,
    /// Simulated time (s).
    pub time: f64,
    pub player: Option<ActorId>,
    pub actors: Vec<ActorSnapshot>,
    /// Events fired during the frame, actor events and manager events alike.
    pub events: Vec<SimEvent>,
}

impl Snapshot {
    pub fn actor(&self, id: ActorId) -> Option<&ActorSnapshot> {
        self.actors.iter().find(|a| a.id == id)
    }

    /// Events fired by one actor.
    pub fn events_of(&self, id: ActorId) -> impl Iterator<Item = &SimEvent> {
        self.events.iter().filter(move |e| e.actor() == Some(id))
    }

    /// Actors whose state changed this frame.
    pub fn state_changes(&self) -> Vec<(ActorId, ActorState)> {
        self.events
            .iter()
            .filter_map(|e| match *e {
                SimEvent::ActorStateChanged { actor, to, .. } => Some((actor, to)),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
