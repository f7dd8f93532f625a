//! In-memory vehicle definitions.
//!
//! An [`ActorDef`] is what the external definition parser hands the core: a
//! fully parsed vehicle description with nodes, beams, wheels, axles, an
//! optional powertrain, aero/hydro surfaces and a list of section configs.
//! Definitions are plain serde data so the content layer may also keep them
//! as JSON. Nothing here touches live simulation state; [`crate::spawner`]
//! turns a validated definition into an [`Actor`](crate::actor::Actor).

use crate::error::ValidationError;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// High-level classification selecting which input adapter drives an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DriveableKind {
    #[default]
    NotDriveable,
    Truck,
    Airplane,
    Boat,
    Machine,
    Ai,
}

/// Default beam spring rate (N/m).
pub const DEFAULT_SPRING: f32 = 3.0e6;
/// Default beam damping (N·s/m).
pub const DEFAULT_DAMP: f32 = 6.0e3;
/// Default yield strain before plastic flow.
pub const DEFAULT_DEFORM: f32 = 0.04;
/// Default strain at which a beam breaks.
pub const DEFAULT_STRENGTH: f32 = 0.12;

fn default_spring() -> f32 {
    DEFAULT_SPRING
}
fn default_damp() -> f32 {
    DEFAULT_DAMP
}
fn default_deform() -> f32 {
    DEFAULT_DEFORM
}
fn default_strength() -> f32 {
    DEFAULT_STRENGTH
}
fn default_true() -> bool {
    true
}

/// A point mass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    /// Position relative to the actor origin.
    pub position: Vec3,
    pub mass: f32,
    /// Participates in cab contact as a colliding point.
    #[serde(default = "default_true")]
    pub contactable: bool,
    /// Friction scale applied on top of the ground material.
    #[serde(default)]
    pub friction: Option<f32>,
    /// Collision bounding-box group.
    #[serde(default)]
    pub bbox_group: Option<u16>,
    /// Section-config module this node belongs to (`None` = always present).
    #[serde(default)]
    pub module: Option<String>,
}

impl NodeDef {
    pub fn new(position: Vec3, mass: f32) -> Self {
        Self {
            position,
            mass,
            contactable: true,
            friction: None,
            bbox_group: None,
            module: None,
        }
    }
}

/// Progressive spring/damper curve for one travel direction of a shock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShockCurveDef {
    pub spring: f32,
    pub damp: f32,
    /// Stiffening per unit of relative travel.
    #[serde(default)]
    pub spring_progression: f32,
    /// Damping increase per m/s of travel speed.
    #[serde(default)]
    pub damp_progression: f32,
}

/// Extra behaviour attached to a beam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum BeamKindDef {
    #[default]
    Plain,
    Invisible,
    /// Pushes only; breaks when extended past `break_extension` (strain).
    Support { break_extension: f32 },
    /// Linear shock with hard stops outside `[1 - shorten, 1 + lengthen]`.
    Shock { shorten: f32, lengthen: f32 },
    /// Shock with separate compression/extension curves.
    Shock2 {
        compression: ShockCurveDef,
        extension: ShockCurveDef,
        shorten: f32,
        lengthen: f32,
    },
    /// Rest length follows the steering channel.
    SteeringHydro { ratio: f32 },
    /// Rest length driven by command keys.
    Command {
        extend_key: u8,
        contract_key: u8,
        /// Extension speed as a fraction of rest length per second.
        extend_speed: f32,
        contract_speed: f32,
        shorten: f32,
        lengthen: f32,
    },
}

impl BeamKindDef {
    /// Travel bounds as fractions of the geometric length, if the kind has any.
    pub fn travel_bounds(&self) -> Option<(f32, f32)> {
        match *self {
            BeamKindDef::Shock { shorten, lengthen }
            | BeamKindDef::Shock2 { shorten, lengthen, .. }
            | BeamKindDef::Command { shorten, lengthen, .. } => Some((shorten, lengthen)),
            _ => None,
        }
    }
}

/// A spring-damper between two nodes of the same actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamDef {
    pub nodes: [usize; 2],
    #[serde(default = "default_spring")]
    pub spring: f32,
    #[serde(default = "default_damp")]
    pub damp: f32,
    /// Yield strain before plastic deformation starts.
    #[serde(default = "default_deform")]
    pub deform: f32,
    /// Strain at which the beam breaks.
    #[serde(default = "default_strength")]
    pub strength: f32,
    #[serde(default)]
    pub kind: BeamKindDef,
    /// Overrides the geometric rest length.
    #[serde(default)]
    pub rest_length: Option<f32>,
    /// Breaking one beam of a non-zero group breaks the whole group.
    #[serde(default)]
    pub detacher_group: u32,
    #[serde(default)]
    pub module: Option<String>,
}

impl BeamDef {
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            nodes: [a, b],
            spring: DEFAULT_SPRING,
            damp: DEFAULT_DAMP,
            deform: DEFAULT_DEFORM,
            strength: DEFAULT_STRENGTH,
            kind: BeamKindDef::Plain,
            rest_length: None,
            detacher_group: 0,
            module: None,
        }
    }

    pub fn with_rates(mut self, spring: f32, damp: f32) -> Self {
        self.spring = spring;
        self.damp = damp;
        self
    }

    pub fn with_kind(mut self, kind: BeamKindDef) -> Self {
        self.kind = kind;
        self
    }

    pub fn unbreakable(mut self) -> Self {
        self.deform = f32::INFINITY;
        self.strength = f32::INFINITY;
        self
    }
}

/// A collision triangle. Node order defines the face normal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CabDef {
    pub nodes: [usize; 3],
    /// Produces buoyancy and water drag when submerged.
    #[serde(default)]
    pub buoyant: bool,
    #[serde(default)]
    pub module: Option<String>,
}

/// Tyre model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TyreDef {
    /// Longitudinal slip speed (m/s) at which full grip is reached.
    pub grip_slip_speed: f32,
    /// Lateral slip speed (m/s) at which full grip is reached.
    pub lateral_slip_speed: f32,
    /// Rolling resistance as a fraction of the normal load.
    pub rolling_resistance: f32,
    /// Friction multiplier on top of the ground material.
    pub grip: f32,
}

impl Default for TyreDef {
    fn default() -> Self {
        Self {
            grip_slip_speed: 0.6,
            lateral_slip_speed: 0.8,
            rolling_resistance: 0.012,
            grip: 1.0,
        }
    }
}

/// A rolling wheel assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WheelDef {
    /// Axis nodes; `axis[0] -> axis[1]` crossed with the up vector gives the
    /// forward rolling direction.
    pub axis: [usize; 2],
    pub rim: Vec<usize>,
    pub radius: f32,
    #[serde(default)]
    pub driven: bool,
    #[serde(default = "default_true")]
    pub braked: bool,
    #[serde(default)]
    pub steered: bool,
    /// Spin inertia (kg·m²); derived from rim masses when absent.
    #[serde(default)]
    pub inertia: Option<f32>,
    #[serde(default)]
    pub tyre: TyreDef,
    #[serde(default)]
    pub module: Option<String>,
}

/// Torque distribution mode of an axle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffMode {
    Open,
    Locked,
    Split,
    Viscous,
    TractionControl,
}

/// A pair of driven wheels coupled by a differential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxleDef {
    pub wheels: [usize; 2],
    /// Modes the user may cycle through; the first is active at spawn.
    pub modes: Vec<DiffMode>,
}

/// Engine family; selects defaults for clutch force, turbo and air brakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineKind {
    #[default]
    Truck,
    Car,
}

/// Gearbox operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransmissionMode {
    #[default]
    Automatic,
    SemiAuto,
    ManualSequential,
    ManualStick,
    ManualRanges,
}

impl TransmissionMode {
    pub fn is_manual(self) -> bool {
        matches!(
            self,
            TransmissionMode::ManualSequential
                | TransmissionMode::ManualStick
                | TransmissionMode::ManualRanges
        )
    }

    /// Next mode in the cycle used by the mode-toggle command.
    pub fn next(self) -> Self {
        match self {
            TransmissionMode::Automatic => TransmissionMode::SemiAuto,
            TransmissionMode::SemiAuto => TransmissionMode::ManualSequential,
            TransmissionMode::ManualSequential => TransmissionMode::ManualStick,
            TransmissionMode::ManualStick => TransmissionMode::ManualRanges,
            TransmissionMode::ManualRanges => TransmissionMode::Automatic,
        }
    }
}

/// Turbocharger tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurboDef {
    pub inertia: f32,
    /// Exhaust drive gain while under throttle.
    pub exhaust_gain: f32,
    /// Drive gain while coasting.
    pub baseline_gain: f32,
    pub max_rpm: f32,
    /// Extra engine torque at full boost.
    pub extra_torque: f32,
}

impl Default for TurboDef {
    fn default() -> Self {
        Self {
            inertia: 3.0e-6,
            exhaust_gain: 1.5,
            baseline_gain: 0.1,
            max_rpm: 200_000.0,
            extra_torque: 0.0,
        }
    }
}

/// Engine and transmission block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowertrainDef {
    #[serde(default)]
    pub kind: EngineKind,
    /// Peak engine torque.
    pub torque: f32,
    pub idle_rpm: f32,
    pub max_rpm: f32,
    #[serde(default)]
    pub stall_rpm: Option<f32>,
    pub diff_ratio: f32,
    /// `[reverse, neutral, first, second, ...]`, all positive.
    pub gear_ratios: Vec<f32>,
    #[serde(default)]
    pub clutch_force: Option<f32>,
    #[serde(default)]
    pub clutch_time: Option<f32>,
    #[serde(default)]
    pub shift_time: Option<f32>,
    #[serde(default)]
    pub post_shift_time: Option<f32>,
    #[serde(default)]
    pub inertia: Option<f32>,
    /// Engine braking torque (negative); defaults to `-torque / 5`.
    #[serde(default)]
    pub braking_torque: Option<f32>,
    /// `(rpm ratio, relative torque)` pairs, sorted by ratio.
    #[serde(default)]
    pub torque_curve: Vec<(f32, f32)>,
    #[serde(default)]
    pub turbo: Option<TurboDef>,
    /// Defaults to true for trucks.
    #[serde(default)]
    pub air_brakes: Option<bool>,
    #[serde(default)]
    pub transmission: TransmissionMode,
    #[serde(default)]
    pub max_idle_mixture: Option<f32>,
    #[serde(default)]
    pub min_idle_mixture: Option<f32>,
    /// Start with the engine running and first gear selected.
    #[serde(default)]
    pub start_running: bool,
}

impl PowertrainDef {
    pub fn forward_gears(&self) -> usize {
        self.gear_ratios.len().saturating_sub(2)
    }
}

/// Control surface wiring of a wing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum ControlSurface {
    #[default]
    None,
    /// Aileron; `sign` flips for the opposite wing.
    Aileron { sign: f32 },
    Elevator,
    Rudder,
    Flap,
}

/// A flat lifting surface spanned by four nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WingDef {
    /// Leading-left, leading-right, trailing-left, trailing-right.
    pub nodes: [usize; 4],
    #[serde(default)]
    pub control: ControlSurface,
    /// Maximum control deflection (degrees).
    #[serde(default)]
    pub max_deflection: f32,
    /// Lift slope per radian of angle of attack.
    #[serde(default = "default_lift_slope")]
    pub lift_slope: f32,
}

fn default_lift_slope() -> f32 {
    std::f32::consts::TAU
}

/// A propeller producing thrust along `back_node -> ref_node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropellerDef {
    pub ref_node: usize,
    pub back_node: usize,
    /// Shaft power at full throttle (W).
    pub power: f32,
    /// Seconds to spool from idle to full power.
    #[serde(default = "default_spool_time")]
    pub spool_time: f32,
}

fn default_spool_time() -> f32 {
    2.0
}

/// A marine screw propeller; thrust only while its node is submerged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrewpropDef {
    pub ref_node: usize,
    pub back_node: usize,
    pub up_node: usize,
    /// Full-throttle thrust (N).
    pub power: f32,
}

/// Cab collision settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionDef {
    /// Contact range for this actor's triangles; `None` uses the config default.
    pub range: Option<f32>,
    pub disable_self: bool,
    pub disable_inter: bool,
    /// Ground material applied to cab-cab contacts.
    pub submesh_material: String,
}

impl Default for CollisionDef {
    fn default() -> Self {
        Self {
            range: None,
            disable_self: false,
            disable_inter: false,
            submesh_material: "metal".to_string(),
        }
    }
}

/// Brake system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrakeDef {
    /// Brake torque per wheel at full pedal (N·m).
    pub force: f32,
    /// Parking brake torque per wheel (N·m).
    pub parking_force: f32,
    pub anti_lock: bool,
    pub traction_control: bool,
}

impl Default for BrakeDef {
    fn default() -> Self {
        Self {
            force: 6000.0,
            parking_force: 8000.0,
            anti_lock: false,
            traction_control: false,
        }
    }
}

/// Steering-hydro response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringDef {
    /// Steering channel travel per second (full lock = 1).
    pub speed: f32,
}

impl Default for SteeringDef {
    fn default() -> Self {
        Self { speed: 2.0 }
    }
}

/// A named variant enabling a set of modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionConfig {
    pub name: String,
    #[serde(default)]
    pub modules: Vec<String>,
}

/// Parsed, not yet validated vehicle description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorDef {
    pub name: String,
    #[serde(default)]
    pub driveable: DriveableKind,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub beams: Vec<BeamDef>,
    #[serde(default)]
    pub cab_triangles: Vec<CabDef>,
    #[serde(default)]
    pub wheels: Vec<WheelDef>,
    #[serde(default)]
    pub axles: Vec<AxleDef>,
    #[serde(default)]
    pub powertrain: Option<PowertrainDef>,
    #[serde(default)]
    pub wings: Vec<WingDef>,
    #[serde(default)]
    pub propellers: Vec<PropellerDef>,
    #[serde(default)]
    pub screwprops: Vec<ScrewpropDef>,
    #[serde(default)]
    pub section_configs: Vec<SectionConfig>,
    /// Named spawn box in the terrain that overrides the spawn position.
    #[serde(default)]
    pub spawn_box: Option<String>,
    #[serde(default)]
    pub collision: CollisionDef,
    #[serde(default)]
    pub brakes: BrakeDef,
    #[serde(default)]
    pub steering: SteeringDef,
    /// Skip per-node aerodynamic drag (aircraft handle it through wings).
    #[serde(default)]
    pub disable_drag: bool,
    /// Reference node for network-relative positions.
    #[serde(default)]
    pub ref_node: usize,
}

impl ActorDef {
    /// An empty, non-driveable definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driveable: DriveableKind::NotDriveable,
            nodes: Vec::new(),
            beams: Vec::new(),
            cab_triangles: Vec::new(),
            wheels: Vec::new(),
            axles: Vec::new(),
            powertrain: None,
            wings: Vec::new(),
            propellers: Vec::new(),
            screwprops: Vec::new(),
            section_configs: Vec::new(),
            spawn_box: None,
            collision: CollisionDef::default(),
            brakes: BrakeDef::default(),
            steering: SteeringDef::default(),
            disable_drag: false,
            ref_node: 0,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Build the definition variant for a section config.
    ///
    /// Elements without a module are always kept. With `None` the first
    /// declared config is used; a definition without configs keeps
    /// everything. Node indices are remapped after filtering.
    pub fn select_section(&self, config: Option<&str>) -> Result<ActorDef, ValidationError> {
        let selected = match (config, self.section_configs.first()) {
            (Some(name), _) => Some(
                self.section_configs
                    .iter()
                    .find(|c| c.name == name)
                    .ok_or_else(|| ValidationError::UnknownSectionConfig(name.to_string()))?,
            ),
            (None, first) => first,
        };
        let Some(selected) = selected else {
            return Ok(self.clone());
        };
        let enabled = |module: &Option<String>| match module {
            None => true,
            Some(m) => selected.modules.iter().any(|s| s == m),
        };

        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut out = self.clone();
        out.nodes.clear();
        for (i, node) in self.nodes.iter().enumerate() {
            if enabled(&node.module) {
                remap.insert(i, out.nodes.len());
                out.nodes.push(node.clone());
            }
        }
        let map = |what: &'static str, index: usize, node: usize| {
            remap.get(&node).copied().ok_or_else(|| ValidationError::ExcludedNode {
                what,
                index,
                node,
                config: selected.name.clone(),
            })
        };

        out.beams.clear();
        for (i, beam) in self.beams.iter().enumerate().filter(|(_, b)| enabled(&b.module)) {
            let mut beam = beam.clone();
            beam.nodes = [map("beam", i, beam.nodes[0])?, map("beam", i, beam.nodes[1])?];
            out.beams.push(beam);
        }
        out.cab_triangles.clear();
        for (i, cab) in self.cab_triangles.iter().enumerate().filter(|(_, c)| enabled(&c.module)) {
            let mut cab = cab.clone();
            for n in cab.nodes.iter_mut() {
                *n = map("cab triangle", i, *n)?;
            }
            out.cab_triangles.push(cab);
        }

        let mut wheel_remap: HashMap<usize, usize> = HashMap::new();
        out.wheels.clear();
        for (i, wheel) in self.wheels.iter().enumerate().filter(|(_, w)| enabled(&w.module)) {
            let mut wheel = wheel.clone();
            wheel.axis = [map("wheel", i, wheel.axis[0])?, map("wheel", i, wheel.axis[1])?];
            for n in wheel.rim.iter_mut() {
                *n = map("wheel", i, *n)?;
            }
            wheel_remap.insert(i, out.wheels.len());
            out.wheels.push(wheel);
        }
        // Axles whose wheels were dropped disappear with them.
        out.axles = self
            .axles
            .iter()
            .filter_map(|axle| {
                let a = wheel_remap.get(&axle.wheels[0])?;
                let b = wheel_remap.get(&axle.wheels[1])?;
                Some(AxleDef { wheels: [*a, *b], modes: axle.modes.clone() })
            })
            .collect();

        for (i, wing) in out.wings.iter_mut().enumerate() {
            for n in wing.nodes.iter_mut() {
                *n = map("wing", i, *n)?;
            }
        }
        for (i, prop) in out.propellers.iter_mut().enumerate() {
            prop.ref_node = map("propeller", i, prop.ref_node)?;
            prop.back_node = map("propeller", i, prop.back_node)?;
        }
        for (i, screw) in out.screwprops.iter_mut().enumerate() {
            screw.ref_node = map("screwprop", i, screw.ref_node)?;
            screw.back_node = map("screwprop", i, screw.back_node)?;
            screw.up_node = map("screwprop", i, screw.up_node)?;
        }
        out.ref_node = remap.get(&self.ref_node).copied().unwrap_or(0);
        Ok(out)
    }

    /// Check structural consistency. Runs before any state is built.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let count = self.nodes.len();
        if count == 0 {
            return Err(ValidationError::NoNodes);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if !(node.mass > 0.0 && node.mass.is_finite()) {
                return Err(ValidationError::BadMass { node: i, mass: node.mass });
            }
        }
        let check_node = |what: &'static str, index: usize, node: usize| {
            if node >= count {
                Err(ValidationError::NodeOutOfRange { what, index, node, count })
            } else {
                Ok(())
            }
        };

        for (i, beam) in self.beams.iter().enumerate() {
            for &n in &beam.nodes {
                if n >= count {
                    return Err(ValidationError::BeamNodeOutOfRange { beam: i, node: n, count });
                }
            }
            if beam.nodes[0] == beam.nodes[1] {
                return Err(ValidationError::SelfBeam { beam: i, node: beam.nodes[0] });
            }
            let geometric = self.nodes[beam.nodes[0]]
                .position
                .distance(self.nodes[beam.nodes[1]].position);
            let rest = beam.rest_length.unwrap_or(geometric);
            if !(rest > 0.0 && rest.is_finite()) {
                return Err(ValidationError::ZeroLength { beam: i });
            }
            if let Some((shorten, lengthen)) = beam.kind.travel_bounds() {
                let min = geometric * (1.0 - shorten);
                let max = geometric * (1.0 + lengthen);
                if !(rest > min && rest <= max) {
                    return Err(ValidationError::RestLengthOutOfBounds { beam: i, rest, min, max });
                }
            }
        }

        for (i, cab) in self.cab_triangles.iter().enumerate() {
            for &n in &cab.nodes {
                check_node("cab triangle", i, n)?;
            }
        }

        for (i, wheel) in self.wheels.iter().enumerate() {
            for &n in wheel.axis.iter().chain(wheel.rim.iter()) {
                check_node("wheel", i, n)?;
            }
            if wheel.rim.len() < 3 {
                return Err(ValidationError::TooFewRimNodes { wheel: i, rim: wheel.rim.len() });
            }
            if !(wheel.radius > 0.0 && wheel.radius.is_finite()) {
                return Err(ValidationError::BadWheelRadius { wheel: i, radius: wheel.radius });
            }
        }
        for (i, axle) in self.axles.iter().enumerate() {
            for &w in &axle.wheels {
                if w >= self.wheels.len() {
                    return Err(ValidationError::AxleWheelOutOfRange {
                        axle: i,
                        wheel: w,
                        count: self.wheels.len(),
                    });
                }
            }
            if axle.modes.is_empty() {
                return Err(ValidationError::AxleWithoutModes { axle: i });
            }
        }

        if let Some(pt) = &self.powertrain {
            if pt.forward_gears() == 0 {
                return Err(ValidationError::NoForwardGear);
            }
            if !(pt.max_rpm > pt.idle_rpm && pt.idle_rpm > 0.0) {
                return Err(ValidationError::BadRpmRange { idle: pt.idle_rpm, max: pt.max_rpm });
            }
            let sorted = pt.torque_curve.windows(2).all(|w| w[0].0 < w[1].0);
            if !sorted {
                return Err(ValidationError::BadTorqueCurve);
            }
        }

        for (i, wing) in self.wings.iter().enumerate() {
            for &n in &wing.nodes {
                check_node("wing", i, n)?;
            }
        }
        for (i, prop) in self.propellers.iter().enumerate() {
            check_node("propeller", i, prop.ref_node)?;
            check_node("propeller", i, prop.back_node)?;
        }
        for (i, screw) in self.screwprops.iter().enumerate() {
            check_node("screwprop", i, screw.ref_node)?;
            check_node("screwprop", i, screw.back_node)?;
            check_node("screwprop", i, screw.up_node)?;
        }
        Ok(())
    }

    /// Total mass of all nodes.
    pub fn total_mass(&self) -> f32 {
        self.nodes.iter().map(|n| n.mass).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_def() -> ActorDef {
        ActorDef {
            name: "rod".into(),
            driveable: DriveableKind::NotDriveable,
            nodes: vec![
                NodeDef::new(Vec3::ZERO, 10.0),
                NodeDef::new(Vec3::new(1.0, 0.0, 0.0), 10.0),
            ],
            beams: vec![BeamDef::new(0, 1)],
            cab_triangles: vec![],
            wheels: vec![],
            axles: vec![],
            powertrain: None,
            wings: vec![],
            propellers: vec![],
            screwprops: vec![],
            section_configs: vec![],
            spawn_box: None,
            collision: CollisionDef::default(),
            brakes: BrakeDef::default(),
            steering: SteeringDef::default(),
            disable_drag: false,
            ref_node: 0,
        }
    }

    #[test]
    fn test_valid_definition() {
        assert!(two_node_def().validate().is_ok());
    }

    #[test]
    fn test_self_beam_rejected() {
        let mut def = two_node_def();
        def.beams.push(BeamDef::new(1, 1));
        assert_eq!(def.validate(), Err(ValidationError::SelfBeam { beam: 1, node: 1 }));
    }

    #[test]
    fn test_beam_out_of_range_rejected() {
        let mut def = two_node_def();
        def.beams.push(BeamDef::new(0, 5));
        assert!(matches!(def.validate(), Err(ValidationError::BeamNodeOutOfRange { node: 5, .. })));
    }

    #[test]
    fn test_rest_length_outside_travel_bounds_rejected() {
        let mut def = two_node_def();
        let shock = BeamKindDef::Shock { shorten: 0.2, lengthen: 0.1 };

        // Exactly the extension limit is allowed.
        def.beams[0] = BeamDef::new(0, 1).with_kind(shock.clone());
        def.beams[0].rest_length = Some(1.1);
        assert!(def.validate().is_ok());

        // Past the extension limit.
        def.beams[0].rest_length = Some(1.2);
        assert!(matches!(def.validate(), Err(ValidationError::RestLengthOutOfBounds { .. })));

        // The compression limit itself is excluded.
        def.beams[0].rest_length = Some(0.8);
        assert!(matches!(def.validate(), Err(ValidationError::RestLengthOutOfBounds { .. })));
    }

    #[test]
    fn test_section_config_filters_and_remaps() {
        let mut def = two_node_def();
        def.nodes.push(NodeDef {
            module: Some("crane".into()),
            ..NodeDef::new(Vec3::new(0.0, 1.0, 0.0), 5.0)
        });
        def.nodes.push(NodeDef::new(Vec3::new(0.0, 0.0, 1.0), 5.0));
        def.beams.push(BeamDef { module: Some("crane".into()), ..BeamDef::new(0, 2) });
        def.beams.push(BeamDef::new(1, 3));
        def.section_configs = vec![
            SectionConfig { name: "plain".into(), modules: vec![] },
            SectionConfig { name: "with_crane".into(), modules: vec!["crane".into()] },
        ];

        let plain = def.select_section(None).unwrap();
        assert_eq!(plain.nodes.len(), 3);
        assert_eq!(plain.beams.len(), 2);
        assert_eq!(plain.beams[1].nodes, [1, 2]);
        assert!(plain.validate().is_ok());

        let crane = def.select_section(Some("with_crane")).unwrap();
        assert_eq!(crane.nodes.len(), 4);
        assert_eq!(crane.beams.len(), 3);

        assert_eq!(
            def.select_section(Some("missing")),
            Err(ValidationError::UnknownSectionConfig("missing".into()))
        );
    }

    #[test]
    fn test_json_roundtrip_with_defaults() {
        let json = r#"{
            "name": "json_rod",
            "nodes": [
                { "position": [0.0, 0.0, 0.0], "mass": 5.0 },
                { "position": [0.0, 2.0, 0.0], "mass": 5.0 }
            ],
            "beams": [ { "nodes": [0, 1] } ]
        }"#;
        let def = ActorDef::from_json_str(json).unwrap();
        assert_eq!(def.beams[0].spring, DEFAULT_SPRING);
        assert!(def.nodes[0].contactable);
        assert!(def.validate().is_ok());
    }
}
