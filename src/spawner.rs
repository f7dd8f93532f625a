//! Turning a validated [`ActorDef`] into a live [`Actor`].
//!
//! Spawning is all-or-nothing: the section config is selected and the
//! definition validated before a single node is built, so a failed spawn
//! leaves no partial state behind.

use crate::actor::{Actor, ActorId, ActorState};
use crate::ai::AiDriver;
use crate::aero::{Propeller, Screwprop, Wing};
use crate::components::{Beam, BeamKind, CabTriangle, CommandActuator, Node, Shock, ShockCurve};
use crate::config::SimConfig;
use crate::definition::{ActorDef, BeamDef, BeamKindDef, DriveableKind, ShockCurveDef};
use crate::differential::Axle;
use crate::error::SpawnError;
use crate::ground::Terrain;
use crate::powertrain::Powertrain;
use crate::replay::ReplayBuffer;
use crate::wheels::Wheel;
use glam::{Quat, Vec3};
use tracing::debug;

/// Where and how to place a new actor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Placement {
    pub fn at(position: Vec3) -> Self {
        Self { position, rotation: Quat::IDENTITY }
    }

    pub fn rotated(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

/// Build a simulated actor from `def`.
///
/// `section` picks a section config (`None` = the first declared one). A
/// definition naming a spawn box that the terrain knows is placed on the
/// floor of that box instead of at `placement.position`.
pub fn build_actor(
    id: ActorId,
    def: &ActorDef,
    section: Option<&str>,
    placement: Placement,
    config: &SimConfig,
    terrain: Option<&dyn Terrain>,
) -> Result<Actor, SpawnError> {
    let invalid = |source| SpawnError::Invalid { name: def.name.clone(), source };
    let def = def.select_section(section).map_err(invalid)?;
    def.validate().map_err(invalid)?;

    let rotation = placement.rotation;
    let origin = spawn_origin(&def, placement, terrain);

    let mut nodes: Vec<Node> = def
        .nodes
        .iter()
        .map(|nd| {
            let mut node = Node::new(origin + rotation * nd.position, nd.mass);
            node.rest_position = nd.position;
            node.friction = nd.friction.unwrap_or(1.0);
            node.contactable = nd.contactable;
            node.bbox_group = nd.bbox_group;
            node
        })
        .collect();
    for (w, wheel) in def.wheels.iter().enumerate() {
        for &i in &wheel.rim {
            nodes[i].wheel = Some(w);
        }
    }

    let beams = def.beams.iter().map(|bd| build_beam(bd, &nodes)).collect();

    let mut actor = Actor::new(id, def.name.clone(), nodes, beams);
    actor.section = section.map(str::to_string);
    actor.driveable = def.driveable;
    actor.state = ActorState::Simulated;
    actor.cabs = def
        .cab_triangles
        .iter()
        .map(|c| CabTriangle { nodes: c.nodes, buoyant: c.buoyant })
        .collect();
    actor.wheels = def.wheels.iter().map(|w| Wheel::from_def(w, &actor.nodes)).collect();
    actor.axles = def.axles.iter().map(Axle::from_def).collect();
    actor.powertrain = def.powertrain.as_ref().map(Powertrain::new);
    actor.wings = def.wings.iter().map(Wing::from_def).collect();
    actor.propellers = def.propellers.iter().map(Propeller::from_def).collect();
    actor.screwprops = def.screwprops.iter().map(Screwprop::from_def).collect();
    actor.brakes = def.brakes;
    actor.steering = def.steering;
    actor.ref_node = def.ref_node.min(actor.nodes.len() - 1);
    actor.disable_drag = def.disable_drag;

    actor.collision_range = def.collision.range.unwrap_or(config.collision_range);
    actor.disable_self_collision = def.collision.disable_self;
    actor.disable_inter_collision = def.collision.disable_inter;
    actor.submesh_material = def.collision.submesh_material.clone();

    if def.driveable == DriveableKind::Ai {
        actor.ai = Some(AiDriver::default());
    }
    if config.replay.enabled {
        actor.replay = Some(ReplayBuffer::new(config.replay.capacity, config.replay.interval));
    }

    actor.reset_contact_grid();
    actor.update_bounds();
    actor.predicted_aabb = actor.aabb;

    debug!(
        actor = id.0,
        name = %actor.name,
        nodes = actor.nodes.len(),
        beams = actor.beams.len(),
        wheels = actor.wheels.len(),
        "actor built"
    );
    Ok(actor)
}

/// Actor origin, honouring the definition's spawn box.
fn spawn_origin(def: &ActorDef, placement: Placement, terrain: Option<&dyn Terrain>) -> Vec3 {
    let Some(bounds) = def
        .spawn_box
        .as_deref()
        .zip(terrain)
        .and_then(|(name, terrain)| terrain.spawn_box(name))
    else {
        return placement.position;
    };
    let lowest = def
        .nodes
        .iter()
        .map(|n| (placement.rotation * n.position).y)
        .fold(f32::INFINITY, f32::min);
    let centre = bounds.center();
    Vec3::new(centre.x, bounds.min.y - lowest.min(0.0), centre.z)
}

fn build_beam(def: &BeamDef, nodes: &[Node]) -> Beam {
    let [a, b] = def.nodes;
    let geometric = nodes[a].position.distance(nodes[b].position);
    let rest = def.rest_length.unwrap_or(geometric);
    let mut beam = Beam::new(def.nodes, rest, def.spring, def.damp);
    beam.yield_threshold = def.deform * rest;
    beam.break_threshold = def.strength * rest;
    beam.detacher_group = def.detacher_group;

    beam.kind = match &def.kind {
        BeamKindDef::Plain => BeamKind::Plain,
        BeamKindDef::Invisible => BeamKind::Invisible,
        BeamKindDef::Support { break_extension } => {
            BeamKind::Support { break_length: rest * (1.0 + break_extension) }
        }
        BeamKindDef::Shock { shorten, lengthen } => BeamKind::Shock(Shock {
            min_length: geometric * (1.0 - shorten),
            max_length: geometric * (1.0 + lengthen),
            compression: ShockCurve::linear(def.spring, def.damp),
            extension: ShockCurve::linear(def.spring, def.damp),
        }),
        BeamKindDef::Shock2 { compression, extension, shorten, lengthen } => {
            BeamKind::Shock2(Shock {
                min_length: geometric * (1.0 - shorten),
                max_length: geometric * (1.0 + lengthen),
                compression: curve(compression),
                extension: curve(extension),
            })
        }
        BeamKindDef::SteeringHydro { ratio } => BeamKind::SteeringHydro { ratio: *ratio },
        BeamKindDef::Command {
            extend_key,
            contract_key,
            extend_speed,
            contract_speed,
            shorten,
            lengthen,
        } => {
            BeamKind::Command(CommandActuator {
                extend_key: *extend_key,
                contract_key: *contract_key,
                extend_speed: *extend_speed,
                contract_speed: *contract_speed,
                min_length: geometric * (1.0 - shorten),
                max_length: geometric * (1.0 + lengthen),
            })
        }
    };
    // Travel is limited by the bump stops, not by plastic flow.
    if matches!(beam.kind, BeamKind::Shock(_) | BeamKind::Shock2(_) | BeamKind::Command(_)) {
        beam.yield_threshold = f32::INFINITY;
        beam.break_threshold = f32::INFINITY;
    }
    beam
}

fn curve(def: &ShockCurveDef) -> ShockCurve {
    ShockCurve {
        spring: def.spring,
        damp: def.damp,
        spring_progression: def.spring_progression,
        damp_progression: def.damp_progression,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{NodeDef, SectionConfig};
    use crate::error::ValidationError;
    use crate::ground::FlatTerrain;
    use crate::math::Aabb;
    use crate::presets;

    fn triangle_def() -> ActorDef {
        let mut def = presets::crate_box();
        def.name = "tri".into();
        def
    }

    #[test]
    fn test_nodes_placed_and_rotated() {
        let def = triangle_def();
        let placement = Placement::at(Vec3::new(10.0, 0.0, 0.0))
            .rotated(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let actor =
            build_actor(ActorId(3), &def, None, placement, &SimConfig::default(), None).unwrap();
        assert_eq!(actor.id, ActorId(3));
        assert_eq!(actor.state, ActorState::Simulated);
        for (node, nd) in actor.nodes.iter().zip(&def.nodes) {
            let expected = Vec3::new(10.0, 0.0, 0.0) + placement.rotation * nd.position;
            assert!(node.position.distance(expected) < 1e-5);
            assert_eq!(node.rest_position, nd.position);
        }
        // Rest lengths are rotation invariant
        for (beam, bd) in actor.beams.iter().zip(&def.beams) {
            let geometric =
                def.nodes[bd.nodes[0]].position.distance(def.nodes[bd.nodes[1]].position);
            assert!((beam.rest_length - geometric).abs() < 1e-4);
        }
    }

    #[test]
    fn test_beam_thresholds_scale_with_length() {
        let nodes = vec![Node::new(Vec3::ZERO, 1.0), Node::new(Vec3::new(2.0, 0.0, 0.0), 1.0)];
        let beam = build_beam(&BeamDef::new(0, 1), &nodes);
        assert!((beam.yield_threshold - 0.08).abs() < 1e-6);
        assert!((beam.break_threshold - 0.24).abs() < 1e-6);

        let shock = build_beam(
            &BeamDef::new(0, 1).with_kind(BeamKindDef::Shock { shorten: 0.25, lengthen: 0.5 }),
            &nodes,
        );
        let BeamKind::Shock(s) = shock.kind else {
            panic!("expected a shock");
        };
        assert!((s.min_length - 1.5).abs() < 1e-6);
        assert!((s.max_length - 3.0).abs() < 1e-6);
        assert_eq!(shock.break_threshold, f32::INFINITY);

        let support = build_beam(
            &BeamDef::new(0, 1).with_kind(BeamKindDef::Support { break_extension: 0.1 }),
            &nodes,
        );
        assert_eq!(support.kind, BeamKind::Support { break_length: 2.2 });
    }

    #[test]
    fn test_invalid_definition_is_rejected() {
        let mut def = triangle_def();
        def.beams.push(BeamDef::new(0, 99));
        let config = SimConfig::default();
        let placement = Placement::default();
        let Err(err) = build_actor(ActorId(0), &def, None, placement, &config, None) else {
            panic!("out-of-range beam accepted");
        };
        assert!(matches!(
            err,
            SpawnError::Invalid { source: ValidationError::BeamNodeOutOfRange { .. }, .. }
        ));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let mut def = triangle_def();
        def.section_configs.push(SectionConfig { name: "base".into(), modules: vec![] });
        let config = SimConfig::default();
        let placement = Placement::default();
        let Err(err) = build_actor(ActorId(0), &def, Some("deluxe"), placement, &config, None)
        else {
            panic!("unknown section accepted");
        };
        assert!(matches!(
            err,
            SpawnError::Invalid { source: ValidationError::UnknownSectionConfig(_), .. }
        ));
    }

    #[test]
    fn test_spawn_box_overrides_position() {
        let mut def = triangle_def();
        def.spawn_box = Some("garage".into());
        let garage = Aabb::new(Vec3::new(40.0, 2.0, 40.0), Vec3::new(44.0, 5.0, 48.0));
        let terrain = FlatTerrain::new("flat").with_spawn_box("garage", garage);
        let actor = build_actor(
            ActorId(0),
            &def,
            None,
            Placement::at(Vec3::ZERO),
            &SimConfig::default(),
            Some(&terrain),
        )
        .unwrap();
        assert!((actor.aabb.min.y - 2.0).abs() < 1e-4);
        let centre = actor.aabb.center();
        assert!((centre.x - 42.0).abs() < 1.0);
        assert!((centre.z - 44.0).abs() < 1.0);
    }

    #[test]
    fn test_wheels_mark_rim_nodes_and_ai_gets_driver() {
        let mut def = presets::truck();
        def.driveable = DriveableKind::Ai;
        let actor =
            build_actor(ActorId(1), &def, None, Placement::default(), &SimConfig::default(), None)
                .unwrap();
        assert_eq!(actor.wheels.len(), def.wheels.len());
        for (w, wheel) in actor.wheels.iter().enumerate() {
            assert!(wheel.rim.iter().all(|&i| actor.nodes[i].wheel == Some(w)));
        }
        assert!(actor.ai.is_some());
        assert!(actor.powertrain.is_some());
        assert!(actor.never_sleeps());
    }

    #[test]
    fn test_collision_range_defaults_from_config() {
        let mut def = triangle_def();
        def.nodes.push(NodeDef::new(Vec3::new(0.0, 3.0, 0.0), 1.0));
        let config = SimConfig { collision_range: 0.08, ..Default::default() };
        let actor =
            build_actor(ActorId(0), &def, None, Placement::default(), &config, None).unwrap();
        assert_eq!(actor.collision_range, 0.08);
        def.collision.range = Some(0.2);
        let actor =
            build_actor(ActorId(0), &def, None, Placement::default(), &config, None).unwrap();
        assert_eq!(actor.collision_range, 0.2);
    }
}
