//! Persisted simulation state.
//!
//! A savegame records the terrain identity and, per actor, the definition
//! name and section config plus everything that evolved since spawn: node
//! positions and velocities, beam damage, powertrain state, wheel spin,
//! differential modes and the couplings between actors. Loading re-spawns
//! every actor from its definition and then overwrites that evolved state.
//!
//! The format is JSON (`serde_json`); `f32` values round-trip exactly.

use crate::actor::{Actor, ActorState, ControlInput};
use crate::couplings::{CouplingKind, CouplingParams};
use crate::error::SavegameError;
use crate::powertrain::PowertrainState;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SAVEGAME_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavedNode {
    pub position: Vec3,
    pub velocity: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavedBeam {
    pub broken: bool,
    pub deformation: f32,
    pub rest_length: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedActor {
    pub name: String,
    pub section: Option<String>,
    pub state: ActorState,
    pub nodes: Vec<SavedNode>,
    pub beams: Vec<SavedBeam>,
    pub powertrain: Option<PowertrainState>,
    pub wheel_spin: Vec<f32>,
    pub axle_modes: Vec<usize>,
    pub hydro: f32,
    pub lights: bool,
    pub input: ControlInput,
}

/// Coupling endpoints as `(index into Savegame::actors, node)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCoupling {
    pub kind: CouplingKind,
    pub a: (usize, usize),
    pub b: (usize, usize),
    pub length: f32,
    pub params: CouplingParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Savegame {
    pub version: u32,
    pub terrain: String,
    pub sim_time: f64,
    /// Index into `actors` of the player actor.
    pub player: Option<usize>,
    pub actors: Vec<SavedActor>,
    pub couplings: Vec<SavedCoupling>,
}

impl SavedActor {
    pub fn capture(actor: &Actor) -> Self {
        let state = match actor.state {
            ActorState::Sleeping => ActorState::Sleeping,
            _ => ActorState::Simulated,
        };
        Self {
            name: actor.name.clone(),
            section: actor.section.clone(),
            state,
            nodes: actor
                .nodes
                .iter()
                .map(|n| SavedNode { position: n.position, velocity: n.velocity })
                .collect(),
            beams: actor
                .beams
                .iter()
                .map(|b| SavedBeam {
                    broken: b.broken,
                    deformation: b.deformation,
                    rest_length: b.rest_length,
                })
                .collect(),
            powertrain: actor.powertrain.as_ref().map(|p| p.gauges().clone()),
            wheel_spin: actor.wheels.iter().map(|w| w.omega).collect(),
            axle_modes: actor.axles.iter().map(|a| a.mode_index).collect(),
            hydro: actor.hydro,
            lights: actor.lights,
            input: actor.input.clone(),
        }
    }

    /// Overwrite a freshly spawned actor with the saved state.
    pub fn apply(&self, actor: &mut Actor) -> Result<(), SavegameError> {
        let mismatch = |detail: String| SavegameError::Mismatch { name: self.name.clone(), detail };
        if self.nodes.len() != actor.nodes.len() {
            let (saved, defined) = (self.nodes.len(), actor.nodes.len());
            return Err(mismatch(format!("{saved} saved nodes, definition has {defined}")));
        }
        if self.beams.len() != actor.beams.len() {
            let (saved, defined) = (self.beams.len(), actor.beams.len());
            return Err(mismatch(format!("{saved} saved beams, definition has {defined}")));
        }
        if self.wheel_spin.len() != actor.wheels.len() || self.axle_modes.len() != actor.axles.len()
        {
            return Err(mismatch("wheel or axle layout differs".into()));
        }
        if self.powertrain.is_some() != actor.powertrain.is_some() {
            return Err(mismatch("powertrain presence differs".into()));
        }

        for (node, saved) in actor.nodes.iter_mut().zip(&self.nodes) {
            node.position = saved.position;
            node.prev_position = saved.position;
            node.velocity = saved.velocity;
            node.force = Vec3::ZERO;
            node.external_force = Vec3::ZERO;
        }
        for (beam, saved) in actor.beams.iter_mut().zip(&self.beams) {
            beam.broken = saved.broken;
            beam.deformation = saved.deformation;
            beam.rest_length = saved.rest_length;
        }
        for (wheel, &omega) in actor.wheels.iter_mut().zip(&self.wheel_spin) {
            wheel.omega = omega;
        }
        for (axle, &mode) in actor.axles.iter_mut().zip(&self.axle_modes) {
            axle.mode_index = mode.min(axle.modes.len().saturating_sub(1));
        }
        if let (Some(pt), Some(state)) = (actor.powertrain.as_mut(), self.powertrain.as_ref()) {
            pt.restore(state.clone());
        }
        actor.hydro = self.hydro;
        actor.lights = self.lights;
        actor.input = self.input.clone();
        actor.state = self.state;
        actor.rebuild_contact_index();
        actor.update_bounds();
        actor.predicted_aabb = actor.aabb;
        Ok(())
    }
}

impl Savegame {
    pub fn new(terrain: impl Into<String>, sim_time: f64) -> Self {
        Self {
            version: SAVEGAME_VERSION,
            terrain: terrain.into(),
            sim_time,
            player: None,
            actors: Vec::new(),
            couplings: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, SavegameError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SavegameError> {
        let save: Savegame = serde_json::from_str(json)?;
        if save.version != SAVEGAME_VERSION {
            return Err(SavegameError::Version { found: save.version, expected: SAVEGAME_VERSION });
        }
        Ok(save)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), SavegameError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, SavegameError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorId;
    use crate::components::{Beam, Node};

    fn rod() -> Actor {
        let nodes = vec![Node::new(Vec3::ZERO, 1.0), Node::new(Vec3::X, 1.0)];
        Actor::new(ActorId(0), "rod", nodes, vec![Beam::new([0, 1], 1.0, 1.0, 0.0)])
    }

    #[test]
    fn test_capture_apply_restores_state() {
        let mut live = rod();
        live.nodes[0].position = Vec3::new(0.1, 0.2, 0.30000001);
        live.nodes[1].velocity = Vec3::new(-1.5, 0.0, 1e-7);
        live.beams[0].deformation = 0.01;
        live.lights = true;
        let saved = SavedActor::capture(&live);

        let json = serde_json::to_string(&saved).unwrap();
        let back: SavedActor = serde_json::from_str(&json).unwrap();
        let mut fresh = rod();
        back.apply(&mut fresh).unwrap();
        assert_eq!(fresh.nodes[0].position, live.nodes[0].position);
        assert_eq!(fresh.nodes[1].velocity, live.nodes[1].velocity);
        assert_eq!(fresh.beams[0].deformation, 0.01);
        assert!(fresh.lights);
    }

    #[test]
    fn test_layout_mismatch_rejected() {
        let saved = SavedActor::capture(&rod());
        let mut other = Actor::new(ActorId(1), "rod", vec![Node::new(Vec3::ZERO, 1.0)], vec![]);
        let err = saved.apply(&mut other).unwrap_err();
        assert!(matches!(err, SavegameError::Mismatch { .. }));
    }

    #[test]
    fn test_version_checked() {
        let mut save = Savegame::new("flat", 1.0);
        save.version = 99;
        let json = serde_json::to_string(&save).unwrap();
        let err = Savegame::from_json(&json);
        assert!(matches!(err, Err(SavegameError::Version { found: 99, .. })));
        assert!(matches!(Savegame::from_json("{"), Err(SavegameError::Json(_))));
    }

    #[test]
    fn test_file_roundtrip() {
        let mut save = Savegame::new("flat", 12.5);
        save.actors.push(SavedActor::capture(&rod()));
        let path = std::env::temp_dir().join(format!("beam_sim_save_{}.json", std::process::id()));
        save.write(&path).unwrap();
        let back = Savegame::read(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, save);
    }
}
