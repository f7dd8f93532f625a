//! Aerodynamic and hydrodynamic surfaces (C5).
//!
//! All models here add forces to nodes; none of them integrate anything
//! except the propeller spool state.

use crate::components::{CabTriangle, Node};
use crate::definition::{ControlSurface, PropellerDef, ScrewpropDef, WingDef};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

const GRAVITY: f32 = 9.81;
/// Lowest axial speed used for propeller thrust (m/s).
const PROP_MIN_SPEED: f32 = 10.0;
/// Screw propeller rudder throw (rad).
const SCREW_RUDDER: f32 = 0.5;
/// Drag coefficient of a submerged cab triangle moving along its normal.
const WATER_DRAG: f32 = 1.0;

/// ISA air density at `altitude` metres, scaled to the configured sea-level
/// density.
pub fn air_density(altitude: f32, sea_level: f32) -> f32 {
    let h = altitude.clamp(-500.0, 11_000.0);
    let temperature = 288.15 - 0.0065 * h;
    let pressure = 101_325.0 * (1.0 - 2.255_77e-5 * h).powf(5.255_88);
    let isa = pressure / (287.05 * temperature);
    isa * sea_level / 1.225
}

/// Control inputs consumed by the surfaces, each in `[-1, 1]` (flaps `[0, 1]`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AeroControls {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub flaps: f32,
    pub throttle: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wing {
    pub nodes: [usize; 4],
    pub control: ControlSurface,
    /// Maximum deflection (rad).
    pub max_deflection: f32,
    pub lift_slope: f32,
}

impl Wing {
    pub fn from_def(def: &WingDef) -> Self {
        Self {
            nodes: def.nodes,
            control: def.control,
            max_deflection: def.max_deflection.to_radians(),
            lift_slope: def.lift_slope,
        }
    }

    fn deflection(&self, controls: &AeroControls) -> f32 {
        let input = match self.control {
            ControlSurface::None => 0.0,
            ControlSurface::Aileron { sign } => controls.roll * sign,
            ControlSurface::Elevator => controls.pitch,
            ControlSurface::Rudder => controls.yaw,
            ControlSurface::Flap => controls.flaps,
        };
        input.clamp(-1.0, 1.0) * self.max_deflection
    }

    /// Flat-plate lift and drag.
    pub fn apply(&self, nodes: &mut [Node], controls: &AeroControls, density: f32) {
        let [ll, lr, tl, tr] = self.nodes.map(|i| nodes[i].position);
        let span = (lr - ll + tr - tl) * 0.5;
        let chord = (ll - tl + lr - tr) * 0.5;
        let area = span.cross(chord).length();
        let Some(normal) = chord.cross(span).try_normalize() else {
            return;
        };
        let velocity = self.nodes.iter().map(|&i| nodes[i].velocity).sum::<Vec3>() * 0.25;
        let wind = -velocity;
        let speed_sq = wind.length_squared();
        if speed_sq < 1e-4 || area <= 0.0 {
            return;
        }
        let wind_dir = wind / speed_sq.sqrt();
        let chord_dir = chord.normalize_or_zero();

        // Angle of attack between the oncoming flow and the chord.
        let alpha =
            wind_dir.dot(normal).atan2(-wind_dir.dot(chord_dir)) + self.deflection(controls);
        let cl = self.lift_slope * alpha.sin() * alpha.cos();
        let cd = 0.02 + 1.2 * alpha.sin() * alpha.sin();

        let mut lift_dir = wind_dir.cross(span).normalize_or_zero();
        if lift_dir.dot(normal) < 0.0 {
            lift_dir = -lift_dir;
        }
        let q = 0.5 * density * speed_sq * area;
        let force = (lift_dir * cl + wind_dir * cd) * q * 0.25;
        for &i in &self.nodes {
            nodes[i].force += force;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Propeller {
    pub ref_node: usize,
    pub back_node: usize,
    pub power: f32,
    pub spool_time: f32,
    /// Spool state in `[0, 1]`.
    pub spool: f32,
}

impl Propeller {
    pub fn from_def(def: &PropellerDef) -> Self {
        Self {
            ref_node: def.ref_node,
            back_node: def.back_node,
            power: def.power,
            spool_time: def.spool_time.max(0.01),
            spool: 0.0,
        }
    }

    pub fn apply(&mut self, nodes: &mut [Node], throttle: f32, density_ratio: f32, dt: f32) {
        let rate = dt / self.spool_time;
        self.spool += (throttle.clamp(0.0, 1.0) - self.spool).clamp(-rate, rate);
        let axis = nodes[self.ref_node].position - nodes[self.back_node].position;
        let Some(axis) = axis.try_normalize() else {
            return;
        };
        let axial = nodes[self.ref_node].velocity.dot(axis).max(PROP_MIN_SPEED);
        let thrust = self.spool * self.power * density_ratio / axial;
        let half = axis * thrust * 0.5;
        nodes[self.ref_node].force += half;
        nodes[self.back_node].force += half;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screwprop {
    pub ref_node: usize,
    pub back_node: usize,
    pub up_node: usize,
    pub power: f32,
}

impl Screwprop {
    pub fn from_def(def: &ScrewpropDef) -> Self {
        Self {
            ref_node: def.ref_node,
            back_node: def.back_node,
            up_node: def.up_node,
            power: def.power,
        }
    }

    pub fn apply(&self, nodes: &mut [Node], throttle: f32, rudder: f32, water_level: Option<f32>) {
        let Some(level) = water_level else {
            return;
        };
        let reference = nodes[self.ref_node].position;
        if reference.y > level {
            return;
        }
        let Some(axis) = (reference - nodes[self.back_node].position).try_normalize() else {
            return;
        };
        let up = (nodes[self.up_node].position - reference).normalize_or_zero();
        let direction = if up != Vec3::ZERO {
            Quat::from_axis_angle(up, -rudder.clamp(-1.0, 1.0) * SCREW_RUDDER) * axis
        } else {
            axis
        };
        nodes[self.ref_node].force += direction * throttle.clamp(-1.0, 1.0) * self.power;
    }
}

/// Pressure and drag on submerged buoyant cab triangles.
pub fn apply_buoyancy(nodes: &mut [Node], cabs: &[CabTriangle], water_level: f32, density: f32) {
    for cab in cabs.iter().filter(|c| c.buoyant) {
        let [a, b, c] = cab.nodes.map(|i| nodes[i].position);
        let centroid = (a + b + c) / 3.0;
        let depth = water_level - centroid.y;
        if depth <= 0.0 {
            continue;
        }
        let cross = (b - a).cross(c - a);
        let area = cross.length() * 0.5;
        let Some(normal) = cross.try_normalize() else {
            continue;
        };
        // Hydrostatic pressure pushes against the outward normal.
        let pressure = -normal * density * GRAVITY * depth * area;
        let velocity = cab.nodes.iter().map(|&i| nodes[i].velocity).sum::<Vec3>() / 3.0;
        let vn = velocity.dot(normal);
        let drag = if vn > 0.0 {
            -normal * 0.5 * density * WATER_DRAG * area * vn * vn
        } else {
            Vec3::ZERO
        };
        let share = (pressure + drag) / 3.0;
        for &i in &cab.nodes {
            nodes[i].force += share;
        }
    }
}

/// Quadratic air drag on every node.
pub fn apply_node_drag(nodes: &mut [Node], coefficient: f32, density: f32) {
    let k = 0.5 * density * coefficient;
    for node in nodes.iter_mut() {
        let speed = node.velocity.length();
        if speed > 0.0 {
            node.force -= node.velocity * (k * speed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_density_drops_with_altitude() {
        assert!((air_density(0.0, 1.225) - 1.225).abs() < 0.01);
        assert!(air_density(3000.0, 1.225) < 1.0);
    }

    fn wing_nodes(velocity: Vec3) -> Vec<Node> {
        let points = [
            Vec3::new(-2.0, 0.0, 0.5),
            Vec3::new(2.0, 0.0, 0.5),
            Vec3::new(-2.0, 0.0, -0.5),
            Vec3::new(2.0, 0.0, -0.5),
        ];
        points
            .iter()
            .map(|&p| {
                let mut n = Node::new(p, 10.0);
                n.velocity = velocity;
                n
            })
            .collect()
    }

    #[test]
    fn test_wing_lifts_with_positive_angle_of_attack() {
        let wing = Wing {
            nodes: [0, 1, 2, 3],
            control: ControlSurface::None,
            max_deflection: 0.0,
            lift_slope: std::f32::consts::TAU,
        };
        // Flying +Z and slightly descending: the flow meets the wing from below.
        let mut nodes = wing_nodes(Vec3::new(0.0, -3.0, 40.0));
        wing.apply(&mut nodes, &AeroControls::default(), 1.225);
        let total: Vec3 = nodes.iter().map(|n| n.force).sum();
        assert!(total.y > 0.0);
    }

    #[test]
    fn test_flap_deflection_adds_lift_and_drag() {
        let wing = Wing {
            nodes: [0, 1, 2, 3],
            control: ControlSurface::Flap,
            max_deflection: 0.2,
            lift_slope: std::f32::consts::TAU,
        };
        let mut clean = wing_nodes(Vec3::new(0.0, 0.0, 40.0));
        wing.apply(&mut clean, &AeroControls::default(), 1.225);
        let clean_total: Vec3 = clean.iter().map(|n| n.force).sum();
        assert!(clean_total.y.abs() < 1e-3);

        let mut flapped = wing_nodes(Vec3::new(0.0, 0.0, 40.0));
        let controls = AeroControls { flaps: 1.0, ..Default::default() };
        wing.apply(&mut flapped, &controls, 1.225);
        let total: Vec3 = flapped.iter().map(|n| n.force).sum();
        assert!(total.y > 0.0);
        assert!(total.z < clean_total.z);
    }

    #[test]
    fn test_buoyancy_pushes_up_submerged_floor() {
        // Floor triangle facing down (outward normal -Y).
        let mut nodes = vec![
            Node::new(Vec3::new(0.0, -1.0, 0.0), 1.0),
            Node::new(Vec3::new(0.0, -1.0, 1.0), 1.0),
            Node::new(Vec3::new(1.0, -1.0, 0.0), 1.0),
        ];
        let cab = CabTriangle { nodes: [0, 2, 1], buoyant: true };
        apply_buoyancy(&mut nodes, &[cab], 0.0, 1000.0);
        let total: Vec3 = nodes.iter().map(|n| n.force).sum();
        // 1000 * 9.81 * depth 1 * area 0.5
        assert!((total.y - 4905.0).abs() < 1.0);
    }

    #[test]
    fn test_propeller_spools_up() {
        let mut prop =
            Propeller { ref_node: 0, back_node: 1, power: 100_000.0, spool_time: 1.0, spool: 0.0 };
        let mut nodes = vec![Node::new(Vec3::new(0.0, 0.0, 1.0), 1.0), Node::new(Vec3::ZERO, 1.0)];
        prop.apply(&mut nodes, 1.0, 1.0, 0.5);
        assert!((prop.spool - 0.5).abs() < 1e-6);
        assert!(nodes[0].force.z > 0.0);
    }

    #[test]
    fn test_screwprop_needs_water() {
        let prop = Screwprop { ref_node: 0, back_node: 1, up_node: 2, power: 1000.0 };
        let mut nodes = vec![
            Node::new(Vec3::new(0.0, -0.5, 1.0), 1.0),
            Node::new(Vec3::new(0.0, -0.5, 0.0), 1.0),
            Node::new(Vec3::new(0.0, 0.5, 1.0), 1.0),
        ];
        prop.apply(&mut nodes, 1.0, 0.0, None);
        assert_eq!(nodes[0].force, Vec3::ZERO);
        prop.apply(&mut nodes, 1.0, 0.0, Some(0.0));
        assert!((nodes[0].force.z - 1000.0).abs() < 1e-3);
    }
}
