//! Wheel assemblies (C6).
//!
//! A wheel is a ring of rim nodes around two axis nodes plus a separate spin
//! state `omega`. The nodes never rotate; rolling is represented by `omega`
//! alone and the tyre model turns the difference between surface speed and
//! ground speed into forces:
//!
//! - longitudinal: `mu * N * clamp(slip / grip_slip_speed)`,
//! - lateral: `-mu * N * clamp(v_lat / lateral_slip_speed)`,
//! - both limited by the friction circle `mu * N` and by what the step can
//!   integrate without reversing the slip.
//!
//! The resulting force is spread evenly over the rim nodes (zero net torque
//! on the ring); its reaction torque, drive torque, brakes and rolling
//! resistance integrate `omega`. Rim nodes are frictionless against the
//! ground so the tyre model is the only source of tangential grip.

use crate::components::Node;
use crate::definition::{BrakeDef, TyreDef, WheelDef};
use crate::ground::Terrain;
use crate::powertrain::RAD_PER_SEC_TO_RPM;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Steering lock of steered wheels (rad).
pub const MAX_STEER_ANGLE: f32 = 0.6;
/// Wheel slip (m/s) at which anti-lock releases the brake.
const ABS_SLIP: f32 = 1.5;
/// Wheel slip (m/s) at which traction control cuts drive torque.
const TC_SLIP: f32 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wheel {
    /// Axis nodes; the forward direction is `(axis[1] - axis[0]) x up`.
    pub axis: [usize; 2],
    pub rim: Vec<usize>,
    pub radius: f32,
    pub driven: bool,
    pub braked: bool,
    pub steered: bool,
    /// Spin inertia (kg·m²).
    pub inertia: f32,
    pub tyre: TyreDef,
    /// Spin (rad/s), positive when rolling forward.
    pub omega: f32,
    /// Drive torque for the coming step, set by the differential.
    #[serde(skip)]
    pub drive_torque: f32,
    /// Steering angle (rad) applied to the tyre force frame.
    #[serde(skip)]
    pub steer_angle: f32,
    pub in_contact: bool,
    /// Longitudinal tyre force during the last step (N).
    #[serde(skip)]
    pub long_force: f32,
    /// Forward speed of the hub (m/s).
    #[serde(skip)]
    pub ground_speed: f32,
}

/// Per-step inputs shared by all wheels of an actor.
#[derive(Debug, Clone, Copy)]
pub struct WheelControls<'a> {
    /// Brake input in `[0, 1]`.
    pub brake: f32,
    pub parking_brake: bool,
    pub brakes: &'a BrakeDef,
    pub dt: f32,
}

impl Wheel {
    pub fn from_def(def: &WheelDef, nodes: &[Node]) -> Self {
        let rim_mass: f32 = def.rim.iter().filter_map(|&i| nodes.get(i)).map(|n| n.mass).sum();
        let inertia = def
            .inertia
            .unwrap_or_else(|| (0.5 * rim_mass * def.radius * def.radius).max(0.1));
        Self {
            axis: def.axis,
            rim: def.rim.clone(),
            radius: def.radius,
            driven: def.driven,
            braked: def.braked,
            steered: def.steered,
            inertia,
            tyre: def.tyre,
            omega: 0.0,
            drive_torque: 0.0,
            steer_angle: 0.0,
            in_contact: false,
            long_force: 0.0,
            ground_speed: 0.0,
        }
    }

    /// Surface speed (m/s).
    #[inline]
    pub fn speed(&self) -> f32 {
        self.omega * self.radius
    }

    #[inline]
    pub fn rpm(&self) -> f32 {
        self.omega * RAD_PER_SEC_TO_RPM
    }

    pub fn center(&self, nodes: &[Node]) -> Vec3 {
        (nodes[self.axis[0]].position + nodes[self.axis[1]].position) * 0.5
    }

    /// Compute tyre forces, add them to the rim nodes and integrate spin.
    ///
    /// Load and contact come from the rim nodes' ground state, which the
    /// ground pass writes after the tyre forces. A wheel therefore grips one
    /// fixed step after its rim first touches the ground.
    ///
    /// Returns `Some(in_contact)` when the contact state changed.
    pub fn step(
        &mut self,
        nodes: &mut [Node],
        terrain: &dyn Terrain,
        controls: &WheelControls,
    ) -> Option<bool> {
        let dt = controls.dt;
        let p0 = nodes[self.axis[0]].position;
        let p1 = nodes[self.axis[1]].position;
        let center = (p0 + p1) * 0.5;
        let velocity = (nodes[self.axis[0]].velocity + nodes[self.axis[1]].velocity) * 0.5;
        let axis = (p1 - p0).normalize_or_zero();

        let load: f32 = self.rim.iter().map(|&i| nodes[i].ground_load).sum();
        let contact = load > 0.0 && self.rim.iter().any(|&i| nodes[i].ground_contact);
        let changed = (contact != self.in_contact).then_some(contact);
        self.in_contact = contact;

        let up = terrain.normal_at(center.x, center.z);
        let mut forward = axis.cross(up).normalize_or_zero();
        if self.steered && self.steer_angle != 0.0 {
            forward = Quat::from_axis_angle(up, self.steer_angle) * forward;
        }
        let lateral = up.cross(forward);
        self.ground_speed = velocity.dot(forward);

        let mut drive = if self.driven { self.drive_torque } else { 0.0 };
        let wheel_mass: f32 = self.rim.iter().map(|&i| nodes[i].mass).sum::<f32>().max(1.0);

        let mut force = Vec3::ZERO;
        let mut rolling = 0.0;
        self.long_force = 0.0;
        if contact && forward != Vec3::ZERO {
            let contact_point = center - up * self.radius;
            let model = terrain.ground_model_at(contact_point);
            let v_long = self.ground_speed;
            let v_lat = velocity.dot(lateral);
            let slip = self.speed() - v_long;
            let mu = model.tyre_friction(slip) * self.tyre.grip;
            let limit = mu * load;

            if controls.brakes.traction_control && slip > TC_SLIP && drive > 0.0 {
                drive *= 0.5;
            }

            let mut f_long = limit * (slip / self.tyre.grip_slip_speed).clamp(-1.0, 1.0);
            let mut f_lat = -limit * (v_lat / self.tyre.lateral_slip_speed).clamp(-1.0, 1.0);

            let total = (f_long * f_long + f_lat * f_lat).sqrt();
            if total > limit && total > 0.0 {
                let scale = limit / total;
                f_long *= scale;
                f_lat *= scale;
            }

            // Do not reverse the slip within one step.
            let compliance = self.radius * self.radius / self.inertia + 1.0 / wheel_mass;
            let long_cap = slip.abs() / (dt * compliance);
            f_long = f_long.clamp(-long_cap, long_cap);
            let lat_cap = v_lat.abs() * wheel_mass / dt;
            f_lat = f_lat.clamp(-lat_cap, lat_cap);

            self.long_force = f_long;
            force = forward * f_long + lateral * f_lat;

            rolling = (self.tyre.rolling_resistance + model.rolling) * load * self.radius;
        }

        self.omega += dt * (drive - self.long_force * self.radius) / self.inertia;

        let mut resist = rolling;
        if self.braked {
            let mut brake_torque = controls.brake * controls.brakes.force;
            if controls.parking_brake {
                brake_torque = brake_torque.max(controls.brakes.parking_force);
            }
            let locking =
                contact && self.omega.abs() * self.radius < (self.ground_speed.abs() - ABS_SLIP);
            let abs_active = controls.brakes.anti_lock && controls.brake > 0.0;
            if abs_active && locking && !controls.parking_brake {
                brake_torque = 0.0;
            }
            resist += brake_torque;
        }
        // Brakes and rolling resistance never reverse the spin.
        let delta = resist * dt / self.inertia;
        if self.omega.abs() <= delta {
            self.omega = 0.0;
        } else {
            self.omega -= delta * self.omega.signum();
        }

        if force != Vec3::ZERO && !self.rim.is_empty() {
            let share = force / self.rim.len() as f32;
            for &i in &self.rim {
                nodes[i].force += share;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ground::{FlatTerrain, GroundModel};

    /// A wheel with axis along +X resting on the ground, loaded with `load` N.
    fn wheel_on_ground(load: f32) -> (Wheel, Vec<Node>) {
        let radius = 0.4;
        let mut nodes = vec![
            Node::new(Vec3::new(-0.1, radius, 0.0), 20.0),
            Node::new(Vec3::new(0.1, radius, 0.0), 20.0),
        ];
        let mut rim = Vec::new();
        for k in 0..8 {
            let a = k as f32 / 8.0 * std::f32::consts::TAU;
            let mut n =
                Node::new(Vec3::new(0.0, radius + radius * a.cos(), radius * a.sin()), 10.0);
            n.wheel = Some(0);
            rim.push(nodes.len());
            nodes.push(n);
        }
        let bottom = rim[4];
        nodes[bottom].ground_contact = true;
        nodes[bottom].ground_load = load;
        let def = WheelDef {
            axis: [0, 1],
            rim,
            radius,
            driven: true,
            braked: true,
            steered: false,
            inertia: Some(2.0),
            tyre: TyreDef::default(),
            module: None,
        };
        (Wheel::from_def(&def, &nodes), nodes)
    }

    fn controls(brakes: &BrakeDef) -> WheelControls<'_> {
        WheelControls { brake: 0.0, parking_brake: false, brakes, dt: 0.0005 }
    }

    #[test]
    fn test_forward_is_plus_z() {
        let (mut wheel, mut nodes) = wheel_on_ground(2000.0);
        let terrain = FlatTerrain::new("flat");
        let brakes = BrakeDef::default();
        wheel.drive_torque = 500.0;
        let changed = wheel.step(&mut nodes, &terrain, &controls(&brakes));
        assert_eq!(changed, Some(true));
        assert!(wheel.omega > 0.0);
        // Spinning wheel pushes the rim forward
        wheel.step(&mut nodes, &terrain, &controls(&brakes));
        let total: Vec3 = wheel.rim.iter().map(|&i| nodes[i].force).sum();
        assert!(total.z > 0.0);
        assert!(total.x.abs() < 1e-3);
    }

    #[test]
    fn test_force_limited_by_friction_circle() {
        let (mut wheel, mut nodes) = wheel_on_ground(1000.0);
        let terrain = FlatTerrain::new("flat");
        let brakes = BrakeDef::default();
        wheel.omega = 50.0;
        for n in nodes.iter_mut() {
            n.velocity = Vec3::new(3.0, 0.0, 0.0);
        }
        wheel.step(&mut nodes, &terrain, &controls(&brakes));
        let total: Vec3 = wheel.rim.iter().map(|&i| nodes[i].force).sum();
        let mu = GroundModel::concrete().ms;
        assert!(total.length() <= mu * 1000.0 * 1.001);
        // Sideways motion is resisted
        assert!(total.x < 0.0);
    }

    #[test]
    fn test_contact_follows_ground_pass() {
        let (mut wheel, mut nodes) = wheel_on_ground(0.0);
        nodes.iter_mut().for_each(|n| n.ground_contact = false);
        let bottom = wheel.rim[4];
        nodes[bottom].position.y = -0.01;
        let terrain = FlatTerrain::new("flat");
        let brakes = BrakeDef::default();

        assert_eq!(wheel.step(&mut nodes, &terrain, &controls(&brakes)), None);
        assert!(!wheel.in_contact);

        nodes[bottom].force = Vec3::new(0.0, -200.0, 0.0);
        crate::integrator::apply_ground(&mut nodes, &terrain, 0.0005);
        assert!(nodes[bottom].ground_contact);
        assert!(nodes[bottom].ground_load > 0.0);
        assert_eq!(wheel.step(&mut nodes, &terrain, &controls(&brakes)), Some(true));
    }

    #[test]
    fn test_brake_never_reverses_spin() {
        let (mut wheel, mut nodes) = wheel_on_ground(0.0);
        nodes.iter_mut().for_each(|n| n.ground_contact = false);
        let terrain = FlatTerrain::new("flat");
        let brakes = BrakeDef::default();
        wheel.omega = 0.5;
        let c = WheelControls { brake: 1.0, ..controls(&brakes) };
        for _ in 0..100 {
            wheel.step(&mut nodes, &terrain, &c);
            assert!(wheel.omega >= 0.0);
        }
        assert_eq!(wheel.omega, 0.0);
    }

    #[test]
    fn test_ice_gives_less_traction() {
        let brakes = BrakeDef::default();
        let mut forces = Vec::new();
        for model in [GroundModel::asphalt(), GroundModel::ice()] {
            let (mut wheel, mut nodes) = wheel_on_ground(2000.0);
            let terrain = FlatTerrain::new("flat").with_base(model);
            wheel.omega = 20.0;
            wheel.step(&mut nodes, &terrain, &controls(&brakes));
            forces.push(wheel.long_force);
        }
        assert!(forces[1] < forces[0] * 0.5);
    }
}
