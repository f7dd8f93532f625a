//! Structural building blocks of a soft-body actor.
//!
//! Nodes, beams and cab triangles are pure data owned by exactly one
//! [`Actor`](crate::actor::Actor). All behaviour lives in the integrator,
//! the contact resolvers and the wheel/aero models that operate on them.

use glam::Vec3;
use serde::{Deserialize, Serialize};

// ============================================================================
// NODES
// ============================================================================

/// A point mass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Spawn-time position relative to the actor origin.
    pub rest_position: Vec3,
    pub position: Vec3,
    /// Position before the last integration (used by the NaN guard).
    pub prev_position: Vec3,
    pub velocity: Vec3,
    /// Forces accumulated during the current step.
    #[serde(skip)]
    pub force: Vec3,
    /// Forces from couplings and inter-actor contact, applied at the next
    /// integration and then cleared.
    #[serde(skip)]
    pub external_force: Vec3,
    pub mass: f32,
    /// Friction scale on top of the ground material.
    pub friction: f32,
    /// Participates in cab contact as a colliding point.
    pub contactable: bool,
    /// Index of the wheel this node belongs to.
    pub wheel: Option<usize>,
    pub bbox_group: Option<u16>,
    #[serde(skip)]
    pub ground_contact: bool,
    #[serde(skip)]
    pub actor_contact: bool,
    /// Normal reaction from the ground during the last step (N).
    #[serde(skip)]
    pub ground_load: f32,
}

impl Node {
    pub fn new(position: Vec3, mass: f32) -> Self {
        Self {
            rest_position: position,
            position,
            prev_position: position,
            velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            external_force: Vec3::ZERO,
            mass,
            friction: 1.0,
            contactable: true,
            wheel: None,
            bbox_group: None,
            ground_contact: false,
            actor_contact: false,
            ground_load: 0.0,
        }
    }

    #[inline]
    pub fn is_tyre(&self) -> bool {
        self.wheel.is_some()
    }
}

// ============================================================================
// BEAMS
// ============================================================================

/// Spring/damper curve for one direction of shock travel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShockCurve {
    pub spring: f32,
    pub damp: f32,
    pub spring_progression: f32,
    pub damp_progression: f32,
}

impl ShockCurve {
    pub fn linear(spring: f32, damp: f32) -> Self {
        Self { spring, damp, spring_progression: 0.0, damp_progression: 0.0 }
    }

    /// Force for a deflection `dx` (m) relative to `rest` and speed `v` (m/s).
    #[inline]
    pub fn force(&self, dx: f32, v: f32, rest: f32) -> f32 {
        let strain = (dx / rest).abs();
        let k = self.spring * (1.0 + self.spring_progression * strain);
        let c = self.damp * (1.0 + self.damp_progression * v.abs());
        k * dx + c * v
    }
}

/// Shock absorber travel limits and curves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shock {
    pub min_length: f32,
    pub max_length: f32,
    pub compression: ShockCurve,
    pub extension: ShockCurve,
}

/// Command-driven actuator state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandActuator {
    pub extend_key: u8,
    pub contract_key: u8,
    /// Travel per second as a fraction of the reference length.
    pub extend_speed: f32,
    pub contract_speed: f32,
    pub min_length: f32,
    pub max_length: f32,
}

/// Behaviour tag of a beam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BeamKind {
    Plain,
    Invisible,
    Support { break_length: f32 },
    Shock(Shock),
    Shock2(Shock),
    SteeringHydro { ratio: f32 },
    Command(CommandActuator),
}

/// Type tag without payload, for snapshots and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BeamType {
    Plain,
    SteeringHydro,
    CommandHydro,
    Shock,
    Shock2,
    Support,
    Invisible,
}

/// A one-dimensional spring-damper between two nodes of the same actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    pub nodes: [usize; 2],
    /// Reference length at spawn; hydros and commands modulate around it.
    pub reference_length: f32,
    /// Current rest length (changes with deformation and actuation).
    pub rest_length: f32,
    /// Length measured during the last step.
    #[serde(skip)]
    pub length: f32,
    pub spring: f32,
    pub damp: f32,
    /// Absolute deviation (m) beyond which plastic flow starts.
    pub yield_threshold: f32,
    /// Absolute deviation (m) at which the beam breaks.
    pub break_threshold: f32,
    pub broken: bool,
    /// Total plastic deformation (m).
    pub deformation: f32,
    pub kind: BeamKind,
    pub detacher_group: u32,
    /// Signed beam force during the last step (N, positive = tension).
    #[serde(skip)]
    pub stress: f32,
}

impl Beam {
    pub fn new(nodes: [usize; 2], rest_length: f32, spring: f32, damp: f32) -> Self {
        Self {
            nodes,
            reference_length: rest_length,
            rest_length,
            length: rest_length,
            spring,
            damp,
            yield_threshold: f32::INFINITY,
            break_threshold: f32::INFINITY,
            broken: false,
            deformation: 0.0,
            kind: BeamKind::Plain,
            detacher_group: 0,
            stress: 0.0,
        }
    }

    pub fn beam_type(&self) -> BeamType {
        match self.kind {
            BeamKind::Plain => BeamType::Plain,
            BeamKind::Invisible => BeamType::Invisible,
            BeamKind::Support { .. } => BeamType::Support,
            BeamKind::Shock(_) => BeamType::Shock,
            BeamKind::Shock2(_) => BeamType::Shock2,
            BeamKind::SteeringHydro { .. } => BeamType::SteeringHydro,
            BeamKind::Command(_) => BeamType::CommandHydro,
        }
    }

    /// Rest-length deviation of an intact beam stays under the break threshold.
    #[inline]
    pub fn within_limits(&self) -> bool {
        self.broken || (self.length - self.rest_length).abs() < self.break_threshold
    }
}

// ============================================================================
// CAB TRIANGLES
// ============================================================================

/// A triangle participating in contact (and optionally buoyancy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CabTriangle {
    pub nodes: [usize; 3],
    pub buoyant: bool,
}

impl CabTriangle {
    #[inline]
    pub fn contains_node(&self, node: usize) -> bool {
        self.nodes.contains(&node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shock_curve_progression() {
        let linear = ShockCurve::linear(1000.0, 100.0);
        assert_eq!(linear.force(0.1, 0.0, 1.0), 100.0);
        assert_eq!(linear.force(0.0, -1.0, 1.0), -100.0);

        let progressive = ShockCurve { spring_progression: 2.0, ..linear };
        // Stiffens with travel: 1000 * (1 + 2 * 0.1) * 0.1
        assert!((progressive.force(0.1, 0.0, 1.0) - 120.0).abs() < 1e-3);
    }

    #[test]
    fn test_beam_type_tags() {
        let mut beam = Beam::new([0, 1], 1.0, 1.0, 1.0);
        assert_eq!(beam.beam_type(), BeamType::Plain);
        beam.kind = BeamKind::SteeringHydro { ratio: 0.2 };
        assert_eq!(beam.beam_type(), BeamType::SteeringHydro);
    }

    #[test]
    fn test_within_limits() {
        let mut beam = Beam::new([0, 1], 1.0, 1.0, 1.0);
        beam.break_threshold = 0.1;
        beam.length = 1.05;
        assert!(beam.within_limits());
        beam.length = 1.2;
        assert!(!beam.within_limits());
        beam.broken = true;
        assert!(beam.within_limits());
    }
}
