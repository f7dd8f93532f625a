//! A live soft-body vehicle (C9).
//!
//! An [`Actor`] owns every piece of its mechanical state: nodes, beams, cab
//! triangles, wheels, axles, powertrain and aero/hydro surfaces. During a
//! step it is touched by exactly one worker task, which runs
//! [`Actor::step`]; everything that crosses actor boundaries (couplings,
//! inter-actor contact) lives in the manager and talks to actors through
//! `external_force`.

use crate::aero::{self, AeroControls, Propeller, Screwprop, Wing};
use crate::ai::AiDriver;
use crate::components::{Beam, CabTriangle, Node};
use crate::config::SimConfig;
use crate::contact::{self, ContactBody, PointContactIndex};
use crate::definition::{BrakeDef, DriveableKind, SteeringDef};
use crate::differential::{Axle, AxleInput};
use crate::events::SimEvent;
use crate::ground::{GroundModel, Terrain};
use crate::integrator;
use crate::math::Aabb;
use crate::net::{InterpolationBuffer, PeerId, StreamId};
use crate::powertrain::{DriveInputs, Powertrain, PowertrainEvent};
use crate::replay::ReplayBuffer;
use crate::wheels::{Wheel, WheelControls, MAX_STEER_ANGLE};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Number of command keys an actor listens to.
pub const COMMAND_KEYS: usize = 16;
/// Crank factor of actors without a powertrain.
const DEFAULT_CRANK_FACTOR: f32 = 1.0;
/// Crank factor of machines (cranes, diggers).
const MACHINE_CRANK_FACTOR: f32 = 2.0;

/// Slot index of an actor in the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u32);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Simulation state of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActorState {
    /// Construction failed or the owning peer reported a mismatch.
    #[default]
    Invalid,
    Simulated,
    Sleeping,
    /// Driven by received packets; never integrated locally.
    Networked,
}

/// Who drives the actor's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Ownership {
    #[default]
    Local,
    Remote { peer: PeerId, stream: StreamId },
}

/// Continuous driver inputs. The main thread writes these between frames;
/// discrete powertrain actions go through the powertrain command queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    pub throttle: f32,
    pub brake: f32,
    /// Steering in `[-1, 1]`, positive to the left.
    pub steering: f32,
    pub parking_brake: bool,
    /// Command key values in `[0, 1]`.
    pub commands: [f32; COMMAND_KEYS],
    pub aero: AeroControls,
}

impl Default for ControlInput {
    fn default() -> Self {
        Self {
            throttle: 0.0,
            brake: 0.0,
            steering: 0.0,
            parking_brake: false,
            commands: [0.0; COMMAND_KEYS],
            aero: AeroControls::default(),
        }
    }
}

impl ControlInput {
    /// Any input that should wake a sleeping actor.
    pub fn is_active(&self) -> bool {
        self.throttle > 0.0
            || self.brake > 0.0
            || self.steering != 0.0
            || self.commands.iter().any(|&c| c > 0.0)
            || self.aero.throttle > 0.0
    }
}

/// Read-only inputs shared by every actor during one step.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub config: &'a SimConfig,
    pub terrain: &'a dyn Terrain,
    /// Material for cab contacts when the terrain does not define the actor's one.
    pub fallback_material: &'a GroundModel,
    pub dt: f32,
}

pub struct Actor {
    pub id: ActorId,
    /// Definition name, used for savegames and network registration.
    pub name: String,
    pub section: Option<String>,
    pub driveable: DriveableKind,
    pub state: ActorState,
    pub ownership: Ownership,

    pub nodes: Vec<Node>,
    pub beams: Vec<Beam>,
    pub cabs: Vec<CabTriangle>,
    pub wheels: Vec<Wheel>,
    pub axles: Vec<Axle>,
    pub powertrain: Option<Powertrain>,
    pub wings: Vec<Wing>,
    pub propellers: Vec<Propeller>,
    pub screwprops: Vec<Screwprop>,
    pub brakes: BrakeDef,
    pub steering: SteeringDef,
    pub ref_node: usize,
    pub disable_drag: bool,

    pub collision_range: f32,
    pub disable_self_collision: bool,
    pub disable_inter_collision: bool,
    pub submesh_material: String,

    pub input: ControlInput,
    /// Steering-hydro channel, follows `input.steering`.
    pub hydro: f32,
    pub lights: bool,

    pub aabb: Aabb,
    /// `aabb` swept along the current motion, maintained by the sleep arbiter.
    pub predicted_aabb: Aabb,
    /// Boxes of the node groups tagged with a bbox group.
    pub group_aabbs: Vec<(u16, Aabb)>,
    /// Seconds spent below the sleep velocity threshold.
    pub sleep_timer: f32,
    /// Seconds since the actor fell asleep (network cadence).
    pub asleep_for: f32,
    /// Seconds since the last outgoing network update.
    pub net_timer: f32,
    pub net_buffer: Option<InterpolationBuffer>,
    pub replay: Option<ReplayBuffer>,
    pub replaying: bool,
    pub ai: Option<AiDriver>,

    pub index: PointContactIndex,
    /// Events fired since the last drain.
    pub events: Vec<SimEvent>,
    pub steps_simulated: u64,
    broken: Vec<usize>,
}

impl Actor {
    /// Assemble an actor from already-built parts. Use
    /// [`crate::spawner::build_actor`] to go from a definition.
    pub fn new(id: ActorId, name: impl Into<String>, nodes: Vec<Node>, beams: Vec<Beam>) -> Self {
        let mut actor = Self {
            id,
            name: name.into(),
            section: None,
            driveable: DriveableKind::NotDriveable,
            state: ActorState::Simulated,
            ownership: Ownership::Local,
            nodes,
            beams,
            cabs: Vec::new(),
            wheels: Vec::new(),
            axles: Vec::new(),
            powertrain: None,
            wings: Vec::new(),
            propellers: Vec::new(),
            screwprops: Vec::new(),
            brakes: BrakeDef::default(),
            steering: SteeringDef::default(),
            ref_node: 0,
            disable_drag: false,
            collision_range: 0.05,
            disable_self_collision: false,
            disable_inter_collision: false,
            submesh_material: "metal".into(),
            input: ControlInput::default(),
            hydro: 0.0,
            lights: false,
            aabb: Aabb::EMPTY,
            predicted_aabb: Aabb::EMPTY,
            group_aabbs: Vec::new(),
            sleep_timer: 0.0,
            asleep_for: 0.0,
            net_timer: 0.0,
            net_buffer: None,
            replay: None,
            replaying: false,
            ai: None,
            index: PointContactIndex::default(),
            events: Vec::new(),
            steps_simulated: 0,
            broken: Vec::new(),
        };
        actor.reset_contact_grid();
        actor.update_bounds();
        actor
    }

    #[inline]
    pub fn is_simulated(&self) -> bool {
        self.state == ActorState::Simulated
    }

    #[inline]
    pub fn is_networked(&self) -> bool {
        self.state == ActorState::Networked
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        self.ownership == Ownership::Local
    }

    /// Players and AI drivers are never put to sleep.
    pub fn never_sleeps(&self) -> bool {
        self.driveable == DriveableKind::Ai || self.ai.is_some()
    }

    pub fn total_mass(&self) -> f32 {
        self.nodes.iter().map(|n| n.mass).sum()
    }

    pub fn center_of_mass(&self) -> Vec3 {
        contact::inter::centroid(&self.nodes)
    }

    /// Mass-weighted mean velocity.
    pub fn velocity(&self) -> Vec3 {
        let mass = self.total_mass();
        if mass <= 0.0 {
            return Vec3::ZERO;
        }
        self.nodes.iter().map(|n| n.velocity * n.mass).sum::<Vec3>() / mass
    }

    pub fn max_node_speed(&self) -> f32 {
        integrator::max_speed(&self.nodes)
    }

    pub fn kinetic_energy(&self) -> f32 {
        self.nodes.iter().map(|n| 0.5 * n.mass * n.velocity.length_squared()).sum()
    }

    /// Forward axis in the horizontal plane, from the first wheel's axle or
    /// the spawn orientation.
    pub fn forward(&self) -> Vec3 {
        if let Some(wheel) = self.wheels.first() {
            let axis = self.nodes[wheel.axis[1]].position - self.nodes[wheel.axis[0]].position;
            if let Some(f) = axis.cross(Vec3::Y).try_normalize() {
                return f;
            }
        }
        Vec3::Z
    }

    pub fn reference_position(&self) -> Vec3 {
        self.nodes.get(self.ref_node).map(|n| n.position).unwrap_or(Vec3::ZERO)
    }

    /// Crank factor scaling hydro and command speeds.
    pub fn crank_factor(&self) -> f32 {
        if self.driveable == DriveableKind::Machine {
            return MACHINE_CRANK_FACTOR;
        }
        self.powertrain.as_ref().map_or(DEFAULT_CRANK_FACTOR, Powertrain::crank_factor)
    }

    /// Run one fixed step of the per-actor pipeline.
    pub fn step(&mut self, ctx: &StepContext<'_>) {
        let dt = ctx.dt;
        let config = ctx.config;

        integrator::begin_step(&mut self.nodes);
        for node in self.nodes.iter_mut() {
            node.actor_contact = false;
        }
        integrator::apply_gravity(&mut self.nodes, config.gravity);

        // Actuators
        let crank = self.crank_factor();
        let target = self.input.steering.clamp(-1.0, 1.0);
        let max_move = self.steering.speed * crank * dt;
        self.hydro += (target - self.hydro).clamp(-max_move, max_move);
        integrator::update_steering_hydros(&mut self.beams, self.hydro);
        let pump_work =
            integrator::update_commands(&mut self.beams, &self.input.commands, crank, dt);

        integrator::apply_beams(&mut self.nodes, &mut self.beams, &mut self.broken);

        self.apply_aero(ctx);
        self.drive_wheels(config, pump_work, dt);
        // Tyres read the ground state of the previous step.
        self.step_wheels(ctx.terrain, dt);

        if !self.disable_self_collision && !self.cabs.is_empty() {
            let model =
                ctx.terrain.material(&self.submesh_material).unwrap_or(ctx.fallback_material);
            let centroid = self.center_of_mass();
            let mut body = ContactBody {
                nodes: &mut self.nodes,
                triangles: &self.cabs,
                index: &self.index,
                range: self.collision_range,
                centroid,
            };
            contact::resolve_self(&mut body, model, dt);
        }

        integrator::apply_ground(&mut self.nodes, ctx.terrain, dt);
        let clamped = integrator::integrate(&mut self.nodes, dt, config.max_node_speed);
        if clamped > 0 {
            warn!(actor = self.id.0, nodes = clamped, "non-finite node state clamped");
            self.events.push(SimEvent::NumericalWarning { actor: self.id, nodes: clamped });
        }
        integrator::audit_beams(&self.nodes, &mut self.beams, &mut self.broken);
        for beam in self.broken.drain(..) {
            self.events.push(SimEvent::BeamBroken { actor: self.id, beam });
        }

        self.rebuild_contact_index();
        self.update_bounds();
        self.steps_simulated += 1;
    }

    fn apply_aero(&mut self, ctx: &StepContext<'_>) {
        let altitude = self.reference_position().y;
        let density = aero::air_density(altitude, ctx.config.air_density);
        if !self.disable_drag {
            aero::apply_node_drag(&mut self.nodes, ctx.config.node_drag, density);
        }
        for wing in &self.wings {
            wing.apply(&mut self.nodes, &self.input.aero, density);
        }
        let density_ratio = density / ctx.config.air_density.max(f32::EPSILON);
        for prop in self.propellers.iter_mut() {
            prop.apply(&mut self.nodes, self.input.aero.throttle, density_ratio, ctx.dt);
        }
        let water = ctx.terrain.water_level();
        if !self.screwprops.is_empty() {
            let throttle = self.input.throttle - self.input.brake;
            for screw in &self.screwprops {
                screw.apply(&mut self.nodes, throttle, self.input.steering, water);
            }
        }
        if let Some(level) = water {
            aero::apply_buoyancy(&mut self.nodes, &self.cabs, level, ctx.config.water_density);
        }
    }

    /// Powertrain and differentials: set every driven wheel's drive torque.
    fn drive_wheels(&mut self, config: &SimConfig, pump_work: f32, dt: f32) {
        let driven: Vec<usize> =
            (0..self.wheels.len()).filter(|&i| self.wheels[i].driven).collect();
        for wheel in self.wheels.iter_mut() {
            wheel.drive_torque = 0.0;
            wheel.steer_angle = if wheel.steered { self.hydro * MAX_STEER_ANGLE } else { 0.0 };
        }
        let Some(powertrain) = self.powertrain.as_mut() else {
            return;
        };

        let n = driven.len().max(1) as f32;
        let wheel_rpm = driven.iter().map(|&i| self.wheels[i].rpm()).sum::<f32>() / n;
        let wheel_inertia = driven.iter().map(|&i| self.wheels[i].inertia).sum::<f32>();
        let forward_speed = if driven.is_empty() {
            0.0
        } else {
            driven.iter().map(|&i| self.wheels[i].ground_speed).sum::<f32>() / n
        };
        let reference_radius = driven.first().map_or(0.5, |&i| self.wheels[i].radius);
        let speed = {
            let mass: f32 = self.nodes.iter().map(|n| n.mass).sum();
            let momentum: Vec3 = self.nodes.iter().map(|n| n.velocity * n.mass).sum();
            (momentum / mass.max(f32::EPSILON)).length()
        };

        powertrain.state().throttle_request = self.input.throttle.clamp(0.0, 1.0);
        let inputs = DriveInputs {
            wheel_rpm,
            wheel_inertia,
            brake: self.input.brake,
            forward_speed,
            speed,
            reference_radius,
            pump_work,
        };
        let torque = powertrain.step(config, &inputs, dt);
        for event in powertrain.drain_events() {
            self.events.push(map_powertrain_event(self.id, event));
        }
        if driven.is_empty() {
            return;
        }

        let per_wheel = torque / n;
        let mut assigned = vec![false; self.wheels.len()];
        for axle in self.axles.iter_mut() {
            let [a, b] = axle.wheels;
            let input = AxleInput {
                torque: per_wheel,
                omega: [self.wheels[a].omega, self.wheels[b].omega],
                inertia: [self.wheels[a].inertia, self.wheels[b].inertia],
                dt,
            };
            let [ta, tb] = axle.distribute(&input, &config.differential);
            self.wheels[a].drive_torque = ta;
            self.wheels[b].drive_torque = tb;
            assigned[a] = true;
            assigned[b] = true;
        }
        for &i in &driven {
            if !assigned[i] {
                self.wheels[i].drive_torque = per_wheel;
            }
        }
    }

    fn step_wheels(&mut self, terrain: &dyn Terrain, dt: f32) {
        let controls = WheelControls {
            brake: self.input.brake.clamp(0.0, 1.0),
            parking_brake: self.input.parking_brake,
            brakes: &self.brakes,
            dt,
        };
        for (index, wheel) in self.wheels.iter_mut().enumerate() {
            if let Some(in_contact) = wheel.step(&mut self.nodes, terrain, &controls) {
                self.events.push(SimEvent::WheelContactChanged {
                    actor: self.id,
                    wheel: index,
                    in_contact,
                });
            }
        }
    }

    /// Cycle the differential mode of an axle.
    pub fn toggle_axle_mode(&mut self, axle: usize) -> bool {
        let Some(a) = self.axles.get_mut(axle) else {
            return false;
        };
        a.toggle_mode();
        self.events.push(SimEvent::DifferentialModeChanged { actor: self.id, axle });
        true
    }

    pub fn toggle_lights(&mut self) {
        self.lights = !self.lights;
        self.events.push(SimEvent::TruckLightsToggled { actor: self.id, on: self.lights });
    }

    pub fn rebuild_contact_index(&mut self) {
        self.index.rebuild(&self.nodes);
    }

    /// Size the contact grid after the cab triangles changed.
    pub fn reset_contact_grid(&mut self) {
        let cell_size = if self.cabs.is_empty() {
            1.0
        } else {
            let tris: Vec<[usize; 3]> = self.cabs.iter().map(|c| c.nodes).collect();
            PointContactIndex::cell_size_for(&self.nodes, &tris)
        };
        self.index = PointContactIndex::new(cell_size);
        self.index.rebuild(&self.nodes);
    }

    /// Recompute the actor box and the per-group boxes.
    pub fn update_bounds(&mut self) {
        self.aabb = Aabb::from_points(self.nodes.iter().map(|n| n.position));
        for (_, b) in self.group_aabbs.iter_mut() {
            *b = Aabb::EMPTY;
        }
        for node in &self.nodes {
            let Some(group) = node.bbox_group else {
                continue;
            };
            match self.group_aabbs.iter_mut().find(|(g, _)| *g == group) {
                Some((_, b)) => b.extend(node.position),
                None => self.group_aabbs.push((group, Aabb::from_points([node.position]))),
            }
        }
    }

    /// Box used for inter-actor filtering: the actor box grown by the
    /// contact range.
    pub fn contact_aabb(&self) -> Aabb {
        self.aabb.expanded(self.collision_range)
    }

    /// Whether this actor's group boxes (or its whole box) overlap `other`.
    pub fn overlaps(&self, other: &Actor) -> bool {
        let a = self.contact_aabb();
        let b = other.contact_aabb();
        if !a.intersects(&b) {
            return false;
        }
        if self.group_aabbs.is_empty() || other.group_aabbs.is_empty() {
            return true;
        }
        self.group_aabbs.iter().any(|(_, ga)| {
            let ga = ga.expanded(self.collision_range);
            let reach = other.collision_range;
            other.group_aabbs.iter().any(|(_, gb)| ga.intersects(&gb.expanded(reach)))
        })
    }

    /// Borrowed view for the inter-actor resolver.
    pub fn contact_body(&mut self) -> ContactBody<'_> {
        let centroid = self.center_of_mass();
        ContactBody {
            nodes: &mut self.nodes,
            triangles: &self.cabs,
            index: &self.index,
            range: self.collision_range,
            centroid,
        }
    }

    /// Move every node by `offset` (teleport).
    pub fn translate(&mut self, offset: Vec3) {
        for node in self.nodes.iter_mut() {
            node.position += offset;
            node.prev_position += offset;
        }
        self.rebuild_contact_index();
        self.update_bounds();
    }

    /// Zero all motion, keep the shape.
    pub fn halt(&mut self) {
        for node in self.nodes.iter_mut() {
            node.velocity = Vec3::ZERO;
            node.force = Vec3::ZERO;
            node.external_force = Vec3::ZERO;
        }
        for wheel in self.wheels.iter_mut() {
            wheel.omega = 0.0;
        }
    }

    /// Publish double-buffered state for readers on the main thread.
    pub fn publish(&mut self) {
        if let Some(pt) = self.powertrain.as_mut() {
            pt.publish();
        }
    }

    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }
}

fn map_powertrain_event(actor: ActorId, event: PowertrainEvent) -> SimEvent {
    match event {
        PowertrainEvent::EngineStarted => SimEvent::EngineStarted { actor },
        PowertrainEvent::EngineDied => SimEvent::EngineDied { actor },
        PowertrainEvent::ShiftBegin { from, to } => SimEvent::ShiftBegin { actor, from, to },
        PowertrainEvent::ShiftEnd { gear } => SimEvent::ShiftEnd { actor, gear },
        PowertrainEvent::GearSlide => SimEvent::GearSlide { actor },
        PowertrainEvent::AirPurge => SimEvent::AirPurge { actor },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ground::FlatTerrain;

    fn rod(height: f32) -> Actor {
        let nodes = vec![
            Node::new(Vec3::new(0.0, height, 0.0), 10.0),
            Node::new(Vec3::new(1.0, height, 0.0), 10.0),
        ];
        let beams = vec![Beam::new([0, 1], 1.0, 1.0e5, 100.0)];
        Actor::new(ActorId(0), "rod", nodes, beams)
    }

    fn ctx<'a>(
        config: &'a SimConfig,
        terrain: &'a FlatTerrain,
        metal: &'a GroundModel,
    ) -> StepContext<'a> {
        StepContext { config, terrain, fallback_material: metal, dt: config.fixed_dt }
    }

    #[test]
    fn test_rod_settles_on_ground() {
        let config = SimConfig::default();
        let terrain = FlatTerrain::new("flat");
        let metal = GroundModel::metal();
        let mut actor = rod(0.5);
        for _ in 0..4000 {
            actor.step(&ctx(&config, &terrain, &metal));
        }
        assert!(actor.nodes.iter().all(|n| n.position.y > -0.02 && n.position.y < 0.05));
        assert!(actor.max_node_speed() < 0.1);
        assert_eq!(actor.steps_simulated, 4000);
        let events = actor.drain_events();
        assert!(events.iter().all(|e| !matches!(e, SimEvent::NumericalWarning { .. })));
    }

    #[test]
    fn test_external_force_is_applied_once() {
        let config = SimConfig { gravity: 0.0, ..Default::default() };
        let terrain = FlatTerrain::new("flat");
        let metal = GroundModel::metal();
        let mut actor = rod(5.0);
        actor.disable_drag = true;
        actor.nodes[0].external_force = Vec3::new(0.0, 0.0, 100.0);
        actor.nodes[1].external_force = Vec3::new(0.0, 0.0, 100.0);
        actor.step(&ctx(&config, &terrain, &metal));
        let v = actor.velocity().z;
        assert!((v - 100.0 / 10.0 * config.fixed_dt).abs() < 1e-6);
        actor.step(&ctx(&config, &terrain, &metal));
        assert!((actor.velocity().z - v).abs() < 1e-6);
    }

    #[test]
    fn test_nan_node_emits_warning() {
        let config = SimConfig::default();
        let terrain = FlatTerrain::new("flat");
        let metal = GroundModel::metal();
        let mut actor = rod(5.0);
        actor.nodes[0].velocity = Vec3::new(f32::INFINITY, 0.0, 0.0);
        actor.step(&ctx(&config, &terrain, &metal));
        let events = actor.drain_events();
        assert!(events.iter().any(|e| matches!(e, SimEvent::NumericalWarning { .. })));
        assert!(actor.nodes.iter().all(|n| n.position.is_finite()));
    }

    #[test]
    fn test_bounds_and_groups() {
        let mut actor = rod(1.0);
        actor.nodes[1].bbox_group = Some(4);
        actor.update_bounds();
        assert_eq!(actor.aabb.min, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(actor.aabb.max, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(actor.group_aabbs.len(), 1);
        assert_eq!(actor.group_aabbs[0].1.min, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_crank_factor_defaults() {
        let mut actor = rod(1.0);
        assert_eq!(actor.crank_factor(), 1.0);
        actor.driveable = DriveableKind::Machine;
        assert_eq!(actor.crank_factor(), 2.0);
    }
}
