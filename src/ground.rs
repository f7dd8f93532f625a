//! Ground materials and the terrain interface.
//!
//! The core never owns terrain geometry. It consumes a read-only [`Terrain`]
//! (height field, static obstacles, water plane, spawn boxes) and a set of
//! named [`GroundModel`] materials. [`FlatTerrain`] is the built-in
//! implementation used by tests, demos and savegame round-trips.

use crate::math::Aabb;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Friction and fluid properties of one ground material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundModel {
    pub name: String,
    /// Adhesion velocity (m/s): below it static friction applies.
    pub va: f32,
    /// Static friction coefficient.
    pub ms: f32,
    /// Kinetic friction coefficient.
    pub mc: f32,
    /// Hydrodynamic friction (s/m).
    pub t2: f32,
    /// Stribeck velocity (m/s).
    pub vs: f32,
    /// Stribeck exponent.
    pub alpha: f32,
    /// Multiplier on the normal reaction used for friction.
    pub strength: f32,
    /// Rolling friction coefficient seen by tyres.
    pub rolling: f32,
    /// Fluid layer density (kg/m³); 0 for dry ground.
    pub fluid_density: f32,
    pub flow_consistency_index: f32,
    pub flow_behavior_index: f32,
    /// Depth (m) of solid ground below the surface; 0 means the surface is solid.
    pub solid_ground_level: f32,
    /// 1 = isotropic fluid drag.
    pub drag_anisotropy: f32,
}

impl Default for GroundModel {
    fn default() -> Self {
        Self::concrete()
    }
}

impl GroundModel {
    pub fn concrete() -> Self {
        Self {
            name: "concrete".into(),
            va: 3.0,
            ms: 1.0,
            mc: 0.95,
            t2: 0.01,
            vs: 1.0,
            alpha: 2.0,
            strength: 1.0,
            rolling: 0.01,
            fluid_density: 0.0,
            flow_consistency_index: 0.0,
            flow_behavior_index: 1.0,
            solid_ground_level: 0.0,
            drag_anisotropy: 1.0,
        }
    }

    pub fn asphalt() -> Self {
        Self { name: "asphalt".into(), ms: 1.05, mc: 0.9, ..Self::concrete() }
    }

    pub fn ice() -> Self {
        Self {
            name: "ice".into(),
            va: 0.5,
            ms: 0.1,
            mc: 0.07,
            t2: 0.0,
            vs: 0.5,
            rolling: 0.005,
            ..Self::concrete()
        }
    }

    pub fn gravel() -> Self {
        Self { name: "gravel".into(), ms: 0.75, mc: 0.65, rolling: 0.03, ..Self::concrete() }
    }

    pub fn mud() -> Self {
        Self {
            name: "mud".into(),
            ms: 0.6,
            mc: 0.45,
            rolling: 0.08,
            fluid_density: 1800.0,
            flow_consistency_index: 2000.0,
            flow_behavior_index: 0.5,
            solid_ground_level: 0.3,
            drag_anisotropy: 0.5,
            ..Self::concrete()
        }
    }

    /// Material used for cab-to-cab contacts.
    pub fn metal() -> Self {
        Self {
            name: "metal".into(),
            va: 1.0,
            ms: 0.5,
            mc: 0.4,
            t2: 0.0,
            vs: 1.0,
            rolling: 0.02,
            ..Self::concrete()
        }
    }

    /// Built-in materials by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "concrete" => Some(Self::concrete()),
            "asphalt" => Some(Self::asphalt()),
            "ice" => Some(Self::ice()),
            "gravel" => Some(Self::gravel()),
            "mud" => Some(Self::mud()),
            "metal" => Some(Self::metal()),
            _ => None,
        }
    }

    /// Friction coefficient a tyre sees at a given slip speed.
    pub fn tyre_friction(&self, slip_speed: f32) -> f32 {
        let slip = slip_speed.abs();
        if slip < self.va {
            self.ms
        } else {
            self.mc + (self.ms - self.mc) * (-(slip / self.vs).powf(self.alpha)).exp()
        }
    }
}

/// Inputs to the contact response of a single node.
#[derive(Debug, Clone, Copy)]
pub struct ContactInput {
    /// Node velocity (relative to the surface).
    pub velocity: Vec3,
    /// Force already accumulated on the node this step.
    pub force: Vec3,
    pub mass: f32,
    /// Unit surface normal pointing out of the surface.
    pub normal: Vec3,
    /// Depth below the surface (positive = inside).
    pub penetration: f32,
    pub dt: f32,
    /// Per-node friction scale.
    pub friction_scale: f32,
    /// Skip tangential friction (tyre-managed nodes).
    pub frictionless: bool,
}

/// Result of [`GroundModel::respond`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContactOutput {
    /// New total force on the node.
    pub force: Vec3,
    /// Normal reaction magnitude (N), 0 without solid contact.
    pub reaction: f32,
    /// Tangential slip speed.
    pub slip: f32,
    pub solid: bool,
}

impl GroundModel {
    /// Contact response for a node touching this material.
    ///
    /// Fluid layers add power-law drag and buoyancy; solid contact cancels
    /// the inward force and normal velocity (impact) and applies static or
    /// Stribeck friction on the tangential slip.
    pub fn respond(&self, input: ContactInput) -> ContactOutput {
        let ContactInput {
            velocity,
            mut force,
            mass,
            normal,
            penetration,
            dt,
            friction_scale,
            frictionless,
        } = input;
        let v_normal = velocity.dot(normal);

        if self.solid_ground_level != 0.0 && penetration >= 0.0 {
            let v_sq = velocity.length_squared();
            let m = self.flow_consistency_index * v_sq.powf((self.flow_behavior_index - 1.0) * 0.5);
            let mut drag = velocity * -m * 0.01;
            if self.drag_anisotropy < 1.0 && v_normal > 0.0 {
                let va_sq = self.va * self.va;
                let factor = if v_sq > va_sq { 1.0 } else { v_sq / va_sq };
                drag += normal * (v_normal * m * 0.01 * (1.0 - self.drag_anisotropy) * factor);
            }
            force += drag;

            let submerged = penetration.min(self.solid_ground_level);
            let mut buoyancy = self.fluid_density * submerged * 9.81 * 0.001;
            if self.flow_behavior_index < 1.0 && v_normal >= 0.0 {
                let f_normal = force.dot(normal);
                if f_normal < 0.0 && buoyancy > -f_normal {
                    buoyancy = -f_normal;
                }
            }
            force += normal * buoyancy;
        }

        if penetration < self.solid_ground_level {
            return ContactOutput { force, reaction: 0.0, slip: 0.0, solid: false };
        }

        let mut slip_dir = velocity - normal * v_normal;
        let slip = slip_dir.length();
        if slip > 1.0e-6 {
            slip_dir /= slip;
        } else {
            slip_dir = Vec3::ZERO;
        }

        let f_normal = force.dot(normal);
        let mut reaction = -f_normal;
        if v_normal < 0.0 {
            reaction -= v_normal * mass / dt;
        }
        let reaction = reaction.max(0.0);

        if frictionless {
            return ContactOutput { force: force + normal * reaction, reaction, slip, solid: true };
        }

        let g_reaction = reaction * self.strength * friction_scale;
        let ms_reaction = self.ms * g_reaction;
        let tangential = force - normal * f_normal;
        let sticking = slip < self.va
            && g_reaction > 0.0
            && tangential.length_squared() <= ms_reaction * ms_reaction;
        let force = if sticking {
            // Static friction, smoothed near zero slip.
            let ff = -ms_reaction * (1.0 - (-slip / self.va).exp());
            normal * (f_normal + reaction) + slip_dir * ff
        } else {
            let g = self.mc + (self.ms - self.mc) * (-(slip / self.vs).powf(self.alpha)).exp();
            let ff = -(g + (self.t2 * slip).min(5.0)) * g_reaction;
            force + normal * reaction + slip_dir * ff
        };
        ContactOutput { force, reaction, slip, solid: true }
    }
}

/// A point-versus-world contact.
#[derive(Debug, Clone, Copy)]
pub struct GroundHit<'a> {
    /// Unit normal pointing out of the surface.
    pub normal: Vec3,
    /// Depth below the surface (≥ 0).
    pub penetration: f32,
    pub model: &'a GroundModel,
}

/// Read-only terrain interface consumed by the core.
///
/// Implementations must be immutable for the duration of a frame.
pub trait Terrain: Send + Sync {
    /// Identity recorded in savegames.
    fn name(&self) -> &str;

    /// Terrain height at a horizontal position.
    fn height_at(&self, x: f32, z: f32) -> f32;

    /// Surface normal of the height field.
    fn normal_at(&self, _x: f32, _z: f32) -> Vec3 {
        Vec3::Y
    }

    /// Material of the height field at a position.
    fn ground_model_at(&self, pos: Vec3) -> &GroundModel;

    /// Material looked up by name (submesh materials, scripted overrides).
    fn material(&self, name: &str) -> Option<&GroundModel>;

    /// Water surface height, if the terrain has water.
    fn water_level(&self) -> Option<f32> {
        None
    }

    /// Static collision: a point inside a static object.
    fn static_contact(&self, _pos: Vec3) -> Option<GroundHit<'_>> {
        None
    }

    /// Named spawn box.
    fn spawn_box(&self, _name: &str) -> Option<Aabb> {
        None
    }

    /// Combined query: static objects first, then the height field.
    fn collide(&self, pos: Vec3) -> Option<GroundHit<'_>> {
        if let Some(hit) = self.static_contact(pos) {
            return Some(hit);
        }
        let h = self.height_at(pos.x, pos.z);
        if pos.y <= h {
            Some(GroundHit {
                normal: self.normal_at(pos.x, pos.z),
                penetration: h - pos.y,
                model: self.ground_model_at(pos),
            })
        } else {
            None
        }
    }
}

/// A rectangular area of the ground with its own material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundPatch {
    pub min_x: f32,
    pub min_z: f32,
    pub max_x: f32,
    pub max_z: f32,
    pub model: GroundModel,
}

/// A static box obstacle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticBox {
    pub bounds: Aabb,
    pub model: GroundModel,
}

/// Level terrain at a fixed height with optional material patches,
/// box obstacles, spawn boxes and a water plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatTerrain {
    pub name: String,
    pub height: f32,
    pub base: GroundModel,
    #[serde(default)]
    pub patches: Vec<GroundPatch>,
    #[serde(default)]
    pub obstacles: Vec<StaticBox>,
    #[serde(default)]
    pub spawn_boxes: Vec<(String, Aabb)>,
    #[serde(default)]
    pub water: Option<f32>,
    #[serde(default)]
    pub materials: Vec<GroundModel>,
}

impl FlatTerrain {
    pub fn new(name: impl Into<String>) -> Self {
        let materials = ["concrete", "asphalt", "ice", "gravel", "mud", "metal"]
            .iter()
            .filter_map(|n| GroundModel::builtin(n))
            .collect();
        Self {
            name: name.into(),
            height: 0.0,
            base: GroundModel::concrete(),
            patches: Vec::new(),
            obstacles: Vec::new(),
            spawn_boxes: Vec::new(),
            water: None,
            materials,
        }
    }

    pub fn with_base(mut self, base: GroundModel) -> Self {
        self.base = base;
        self
    }

    pub fn with_patch(
        mut self,
        min_x: f32,
        min_z: f32,
        max_x: f32,
        max_z: f32,
        model: GroundModel,
    ) -> Self {
        self.patches.push(GroundPatch { min_x, min_z, max_x, max_z, model });
        self
    }

    pub fn with_water(mut self, level: f32) -> Self {
        self.water = Some(level);
        self
    }

    pub fn with_obstacle(mut self, bounds: Aabb, model: GroundModel) -> Self {
        self.obstacles.push(StaticBox { bounds, model });
        self
    }

    pub fn with_spawn_box(mut self, name: impl Into<String>, bounds: Aabb) -> Self {
        self.spawn_boxes.push((name.into(), bounds));
        self
    }
}

impl Terrain for FlatTerrain {
    fn name(&self) -> &str {
        &self.name
    }

    fn height_at(&self, _x: f32, _z: f32) -> f32 {
        self.height
    }

    fn ground_model_at(&self, pos: Vec3) -> &GroundModel {
        // Later patches win.
        self.patches
            .iter()
            .rev()
            .find(|p| pos.x >= p.min_x && pos.x <= p.max_x && pos.z >= p.min_z && pos.z <= p.max_z)
            .map(|p| &p.model)
            .unwrap_or(&self.base)
    }

    fn material(&self, name: &str) -> Option<&GroundModel> {
        self.materials.iter().find(|m| m.name == name)
    }

    fn water_level(&self) -> Option<f32> {
        self.water
    }

    fn static_contact(&self, pos: Vec3) -> Option<GroundHit<'_>> {
        let obstacle = self.obstacles.iter().find(|o| o.bounds.contains(pos))?;
        let b = &obstacle.bounds;
        // Push out through the nearest face.
        let faces = [
            (pos.x - b.min.x, Vec3::NEG_X),
            (b.max.x - pos.x, Vec3::X),
            (pos.y - b.min.y, Vec3::NEG_Y),
            (b.max.y - pos.y, Vec3::Y),
            (pos.z - b.min.z, Vec3::NEG_Z),
            (b.max.z - pos.z, Vec3::Z),
        ];
        let (penetration, normal) = faces
            .into_iter()
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .unwrap_or((0.0, Vec3::Y));
        Some(GroundHit { normal, penetration, model: &obstacle.model })
    }

    fn spawn_box(&self, name: &str) -> Option<Aabb> {
        self.spawn_boxes.iter().find(|(n, _)| n == name).map(|(_, b)| *b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resting_input(force: Vec3, velocity: Vec3) -> ContactInput {
        ContactInput {
            velocity,
            force,
            mass: 10.0,
            normal: Vec3::Y,
            penetration: 0.0,
            dt: 0.0005,
            friction_scale: 1.0,
            frictionless: false,
        }
    }

    #[test]
    fn test_resting_node_reaction_cancels_gravity() {
        let gm = GroundModel::concrete();
        let out = gm.respond(resting_input(Vec3::new(0.0, -98.1, 0.0), Vec3::ZERO));
        assert!(out.solid);
        assert!((out.reaction - 98.1).abs() < 1e-3);
        assert!(out.force.length() < 1e-3);
    }

    #[test]
    fn test_impact_stops_normal_velocity() {
        let gm = GroundModel::concrete();
        let input = resting_input(Vec3::ZERO, Vec3::new(0.0, -2.0, 0.0));
        let out = gm.respond(input);
        let dv = out.force.y / input.mass * input.dt;
        assert!((dv - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_sliding_friction_opposes_motion() {
        let gm = GroundModel::concrete();
        let out = gm.respond(resting_input(Vec3::new(0.0, -98.1, 0.0), Vec3::new(5.0, 0.0, 0.0)));
        assert!(out.force.x < 0.0);
        // Kinetic friction bounded by static coefficient plus hydrodynamic term.
        assert!(out.force.x.abs() <= (gm.ms + 5.0) * 98.1);
    }

    #[test]
    fn test_ice_is_slippery() {
        let ice = GroundModel::ice();
        let concrete = GroundModel::concrete();
        let input = resting_input(Vec3::new(0.0, -98.1, 0.0), Vec3::new(2.0, 0.0, 0.0));
        assert!(ice.respond(input).force.x.abs() < concrete.respond(input).force.x.abs());
        assert!(ice.tyre_friction(3.0) < concrete.tyre_friction(3.0));
    }

    #[test]
    fn test_frictionless_contact_only_pushes_out() {
        let gm = GroundModel::concrete();
        let mut input = resting_input(Vec3::new(10.0, -98.1, 0.0), Vec3::new(3.0, 0.0, 0.0));
        input.frictionless = true;
        let out = gm.respond(input);
        assert_eq!(out.force.x, 10.0);
        assert!(out.force.y.abs() < 1e-3);
    }

    #[test]
    fn test_flat_terrain_patches_and_obstacles() {
        let terrain = FlatTerrain::new("test")
            .with_patch(-5.0, -5.0, 0.0, 5.0, GroundModel::ice())
            .with_obstacle(
                Aabb::new(Vec3::new(10.0, 0.0, -1.0), Vec3::new(12.0, 2.0, 1.0)),
                GroundModel::concrete(),
            );

        assert_eq!(terrain.ground_model_at(Vec3::new(-1.0, 0.0, 0.0)).name, "ice");
        assert_eq!(terrain.ground_model_at(Vec3::new(1.0, 0.0, 0.0)).name, "concrete");

        let hit = terrain.collide(Vec3::new(10.1, 1.0, 0.0)).unwrap();
        assert_eq!(hit.normal, Vec3::NEG_X);
        assert!((hit.penetration - 0.1).abs() < 1e-5);

        assert!(terrain.collide(Vec3::new(0.0, 0.5, 0.0)).is_none());
        let below = terrain.collide(Vec3::new(0.0, -0.2, 0.0)).unwrap();
        assert!((below.penetration - 0.2).abs() < 1e-6);
        assert!(terrain.material("metal").is_some());
    }
}
