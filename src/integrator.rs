//! Fixed-step integration of nodes and beams (C3).
//!
//! The actor pipeline calls these kernels in order every step:
//!
//! 1. [`begin_step`] resets the accumulators and folds in last step's
//!    external forces (couplings, inter-actor contact),
//! 2. [`apply_gravity`], then actuators ([`update_steering_hydros`],
//!    [`update_commands`]) and [`apply_beams`],
//! 3. aero, wheels and self contact (other modules),
//! 4. [`apply_ground`], always the last force contributor,
//! 5. [`integrate`] (semi-implicit Euler with the NaN guard),
//! 6. [`audit_beams`], which breaks over-stretched beams so every intact
//!    beam ends the step inside its limits.

use crate::components::{Beam, BeamKind, Node};
use crate::ground::{ContactInput, Terrain};
use glam::Vec3;

/// A beam longer than this multiple of its rest length is treated as runaway.
pub const RUNAWAY_FACTOR: f32 = 100.0;
/// Fraction of the ground penetration removed per step.
const GROUND_PUSH_OUT: f32 = 0.1;

/// Zero the accumulators and move pending external forces into them.
pub fn begin_step(nodes: &mut [Node]) {
    for node in nodes.iter_mut() {
        node.force = node.external_force;
        node.external_force = Vec3::ZERO;
    }
}

pub fn apply_gravity(nodes: &mut [Node], gravity: f32) {
    for node in nodes.iter_mut() {
        node.force.y += node.mass * gravity;
    }
}

/// Drive steering-hydro rest lengths from the shared hydro channel.
pub fn update_steering_hydros(beams: &mut [Beam], hydro: f32) {
    for beam in beams.iter_mut().filter(|b| !b.broken) {
        if let BeamKind::SteeringHydro { ratio } = beam.kind {
            beam.rest_length = beam.reference_length * (1.0 - ratio * hydro);
        }
    }
}

/// Move command beams by their key values.
///
/// `keys[k]` is the value of command key `k` in `[0, 1]`. Returns the
/// hydraulic work (J) done against the beams this step.
pub fn update_commands(beams: &mut [Beam], keys: &[f32], crank_factor: f32, dt: f32) -> f32 {
    let key = |k: u8| keys.get(k as usize).copied().unwrap_or(0.0).clamp(0.0, 1.0);
    let mut work = 0.0;
    for beam in beams.iter_mut().filter(|b| !b.broken) {
        let BeamKind::Command(cmd) = beam.kind else {
            continue;
        };
        let rate =
            key(cmd.extend_key) * cmd.extend_speed - key(cmd.contract_key) * cmd.contract_speed;
        if rate == 0.0 {
            continue;
        }
        let before = beam.rest_length;
        let target = before + rate * beam.reference_length * crank_factor * dt;
        beam.rest_length = target.clamp(cmd.min_length, cmd.max_length);
        work += (beam.stress * (beam.rest_length - before)).abs();
    }
    work
}

/// Accumulate spring, damper and shock forces.
///
/// Beams whose deviation reaches the break threshold are broken here and
/// their indices appended to `broken`.
pub fn apply_beams(nodes: &mut [Node], beams: &mut [Beam], broken: &mut Vec<usize>) {
    for (index, beam) in beams.iter_mut().enumerate() {
        if beam.broken {
            continue;
        }
        let [i0, i1] = beam.nodes;
        let delta = nodes[i1].position - nodes[i0].position;
        let length = delta.length();
        beam.length = length;
        if length <= f32::EPSILON || !length.is_finite() {
            beam.stress = 0.0;
            continue;
        }
        let dir = delta / length;
        let speed = (nodes[i1].velocity - nodes[i0].velocity).dot(dir);
        let dx = length - beam.rest_length;

        let tension = match beam.kind {
            BeamKind::Shock(shock) | BeamKind::Shock2(shock) => {
                let curve = if dx < 0.0 { shock.compression } else { shock.extension };
                let mut f = curve.force(dx, speed, beam.rest_length);
                // Bump stops outside the travel range.
                if length < shock.min_length {
                    f += beam.spring * (length - shock.min_length);
                } else if length > shock.max_length {
                    f += beam.spring * (length - shock.max_length);
                }
                f
            }
            BeamKind::Support { break_length } => {
                if length > break_length {
                    beam.broken = true;
                    beam.stress = 0.0;
                    broken.push(index);
                    continue;
                }
                if dx > 0.0 {
                    0.0
                } else {
                    beam.spring * dx + beam.damp * speed
                }
            }
            _ => {
                if dx.abs() >= beam.break_threshold {
                    beam.broken = true;
                    beam.stress = 0.0;
                    broken.push(index);
                    continue;
                }
                if dx.abs() > beam.yield_threshold {
                    // Plastic flow: the rest length follows the overload.
                    let flow = dx - beam.yield_threshold.copysign(dx);
                    beam.rest_length += flow;
                    beam.deformation += flow.abs();
                    if beam.deformation >= beam.break_threshold {
                        beam.broken = true;
                        beam.stress = 0.0;
                        broken.push(index);
                        continue;
                    }
                }
                beam.spring * (length - beam.rest_length) + beam.damp * speed
            }
        };

        beam.stress = tension;
        let f = dir * tension;
        nodes[i0].force += f;
        nodes[i1].force -= f;
    }
}

/// Ground and static-object contact; call after every other force.
///
/// Tyre nodes get the normal reaction only: their grip comes from the
/// wheel model. Returns the number of nodes in solid contact.
pub fn apply_ground(nodes: &mut [Node], terrain: &dyn Terrain, dt: f32) -> usize {
    let mut touching = 0;
    for node in nodes.iter_mut() {
        node.ground_contact = false;
        node.ground_load = 0.0;
        let Some(hit) = terrain.collide(node.position) else {
            continue;
        };
        let out = hit.model.respond(ContactInput {
            velocity: node.velocity,
            force: node.force,
            mass: node.mass,
            normal: hit.normal,
            penetration: hit.penetration,
            dt,
            friction_scale: node.friction,
            frictionless: node.is_tyre(),
        });
        node.force = out.force;
        if out.solid {
            node.ground_contact = true;
            node.ground_load = out.reaction;
            node.position += hit.normal * (hit.penetration * GROUND_PUSH_OUT);
            touching += 1;
        }
    }
    touching
}

/// Semi-implicit Euler step with the numerical guard.
///
/// Nodes that end up non-finite or faster than `max_speed` are put back at
/// their previous position with zero velocity. Returns how many were.
pub fn integrate(nodes: &mut [Node], dt: f32, max_speed: f32) -> usize {
    let mut clamped = 0;
    for node in nodes.iter_mut() {
        let previous = node.position;
        node.velocity += node.force * (dt / node.mass);
        node.position += node.velocity * dt;
        let bad = !node.position.is_finite()
            || !node.velocity.is_finite()
            || node.velocity.length_squared() > max_speed * max_speed;
        if bad {
            node.position = if previous.is_finite() { previous } else { node.prev_position };
            node.velocity = Vec3::ZERO;
            clamped += 1;
        }
        node.prev_position = previous;
    }
    clamped
}

/// Re-measure intact beams after integration and break the ones outside
/// their limits or past the runaway length. `broken` holds every beam broken
/// so far this step, including those from [`apply_beams`]; each of them with
/// a non-zero detacher group takes the rest of its group with it.
pub fn audit_beams(nodes: &[Node], beams: &mut [Beam], broken: &mut Vec<usize>) {
    for (index, beam) in beams.iter_mut().enumerate() {
        if beam.broken {
            continue;
        }
        let [i0, i1] = beam.nodes;
        beam.length = nodes[i0].position.distance(nodes[i1].position);
        let over_limit = match beam.kind {
            BeamKind::Support { break_length } => beam.length > break_length,
            BeamKind::Shock(_) | BeamKind::Shock2(_) => false,
            _ => (beam.length - beam.rest_length).abs() >= beam.break_threshold,
        };
        let runaway = !beam.length.is_finite() || beam.length > RUNAWAY_FACTOR * beam.rest_length;
        if over_limit || runaway {
            beam.broken = true;
            beam.stress = 0.0;
            broken.push(index);
        }
    }
    break_detacher_groups(beams, broken);
}

fn break_detacher_groups(beams: &mut [Beam], broken: &mut Vec<usize>) {
    let groups: Vec<u32> = broken
        .iter()
        .map(|&i| beams[i].detacher_group)
        .filter(|&g| g != 0)
        .collect();
    if groups.is_empty() {
        return;
    }
    for (index, beam) in beams.iter_mut().enumerate() {
        if !beam.broken && groups.contains(&beam.detacher_group) {
            beam.broken = true;
            beam.stress = 0.0;
            broken.push(index);
        }
    }
}

/// Largest node speed (m/s).
pub fn max_speed(nodes: &[Node]) -> f32 {
    nodes.iter().map(|n| n.velocity.length_squared()).fold(0.0, f32::max).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{CommandActuator, Shock, ShockCurve};
    use crate::ground::{FlatTerrain, GroundModel};

    fn pair(gap: f32) -> (Vec<Node>, Vec<Beam>) {
        let nodes = vec![Node::new(Vec3::ZERO, 10.0), Node::new(Vec3::new(gap, 0.0, 0.0), 10.0)];
        let beam = Beam::new([0, 1], 1.0, 1.0e5, 0.0);
        (nodes, vec![beam])
    }

    #[test]
    fn test_stretched_beam_pulls_together() {
        let (mut nodes, mut beams) = pair(1.1);
        let mut broken = Vec::new();
        apply_beams(&mut nodes, &mut beams, &mut broken);
        assert!(nodes[0].force.x > 0.0);
        assert_eq!(nodes[0].force, -nodes[1].force);
        assert!((beams[0].stress - 1.0e4).abs() < 1.0);
    }

    #[test]
    fn test_beam_breaks_past_threshold() {
        let (mut nodes, mut beams) = pair(1.5);
        beams[0].break_threshold = 0.2;
        let mut broken = Vec::new();
        apply_beams(&mut nodes, &mut beams, &mut broken);
        assert_eq!(broken, vec![0]);
        assert!(beams[0].broken);
        assert_eq!(nodes[0].force, Vec3::ZERO);
    }

    #[test]
    fn test_plastic_flow_moves_rest_length() {
        let (mut nodes, mut beams) = pair(0.9);
        beams[0].yield_threshold = 0.05;
        beams[0].break_threshold = 0.5;
        let mut broken = Vec::new();
        apply_beams(&mut nodes, &mut beams, &mut broken);
        assert!((beams[0].rest_length - 0.95).abs() < 1e-5);
        assert!((beams[0].deformation - 0.05).abs() < 1e-5);
        assert!(broken.is_empty());
    }

    #[test]
    fn test_support_beam_only_pushes() {
        let (mut nodes, mut beams) = pair(1.2);
        beams[0].kind = BeamKind::Support { break_length: 1.5 };
        let mut broken = Vec::new();
        apply_beams(&mut nodes, &mut beams, &mut broken);
        assert_eq!(nodes[0].force, Vec3::ZERO);

        nodes[1].position.x = 0.8;
        apply_beams(&mut nodes, &mut beams, &mut broken);
        assert!(nodes[0].force.x < 0.0);
    }

    #[test]
    fn test_shock_bump_stop() {
        let (mut nodes, mut beams) = pair(0.5);
        let curve = ShockCurve::linear(1000.0, 0.0);
        beams[0].kind = BeamKind::Shock(Shock {
            min_length: 0.7,
            max_length: 1.3,
            compression: curve,
            extension: curve,
        });
        let mut broken = Vec::new();
        apply_beams(&mut nodes, &mut beams, &mut broken);
        // Curve (-500 N) plus bump stop (1e5 * -0.2)
        assert!((beams[0].stress + 20_500.0).abs() < 1.0);
    }

    #[test]
    fn test_command_beam_extends_with_key() {
        let (_, mut beams) = pair(1.0);
        beams[0].kind = BeamKind::Command(CommandActuator {
            extend_key: 1,
            contract_key: 2,
            extend_speed: 0.5,
            contract_speed: 0.5,
            min_length: 0.5,
            max_length: 1.2,
        });
        let keys = [0.0, 1.0, 0.0];
        for _ in 0..2000 {
            update_commands(&mut beams, &keys, 1.0, 0.0005);
        }
        assert!((beams[0].rest_length - 1.2).abs() < 1e-5);
    }

    #[test]
    fn test_steering_hydro_follows_channel() {
        let (_, mut beams) = pair(1.0);
        beams[0].kind = BeamKind::SteeringHydro { ratio: 0.2 };
        update_steering_hydros(&mut beams, 0.5);
        assert!((beams[0].rest_length - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_integrate_guard_restores_previous_position() {
        let mut nodes = vec![Node::new(Vec3::new(1.0, 2.0, 3.0), 1.0)];
        nodes[0].force = Vec3::new(f32::NAN, 0.0, 0.0);
        assert_eq!(integrate(&mut nodes, 0.0005, 1000.0), 1);
        assert_eq!(nodes[0].position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(nodes[0].velocity, Vec3::ZERO);
    }

    #[test]
    fn test_free_fall() {
        let mut nodes = vec![Node::new(Vec3::new(0.0, 10.0, 0.0), 1.0)];
        let dt = 0.0005;
        for _ in 0..2000 {
            begin_step(&mut nodes);
            apply_gravity(&mut nodes, -9.81);
            integrate(&mut nodes, dt, 1000.0);
        }
        assert!((nodes[0].velocity.y + 9.81).abs() < 1e-3);
        assert!((nodes[0].position.y - (10.0 - 0.5 * 9.81)).abs() < 0.01);
    }

    #[test]
    fn test_ground_stops_falling_node() {
        let terrain = FlatTerrain::new("flat");
        let mut nodes = vec![Node::new(Vec3::new(0.0, 0.05, 0.0), 1.0)];
        nodes[0].velocity = Vec3::new(0.0, -5.0, 0.0);
        let dt = 0.0005;
        for _ in 0..4000 {
            begin_step(&mut nodes);
            apply_gravity(&mut nodes, -9.81);
            apply_ground(&mut nodes, &terrain, dt);
            integrate(&mut nodes, dt, 1000.0);
        }
        assert!(nodes[0].position.y > -0.01);
        assert!(nodes[0].velocity.length() < 0.05);
        assert!(nodes[0].ground_contact);
        assert!((nodes[0].ground_load - 9.81).abs() < 0.5);
    }

    #[test]
    fn test_tyre_node_slides_without_friction() {
        let terrain = FlatTerrain::new("flat").with_base(GroundModel::concrete());
        let mut nodes = vec![Node::new(Vec3::new(0.0, -0.001, 0.0), 1.0)];
        nodes[0].wheel = Some(0);
        nodes[0].velocity = Vec3::new(3.0, 0.0, 0.0);
        apply_ground(&mut nodes, &terrain, 0.0005);
        assert_eq!(nodes[0].force.x, 0.0);
    }

    #[test]
    fn test_audit_breaks_runaway_and_detacher_group() {
        let nodes = vec![
            Node::new(Vec3::ZERO, 1.0),
            Node::new(Vec3::new(500.0, 0.0, 0.0), 1.0),
            Node::new(Vec3::new(0.0, 1.0, 0.0), 1.0),
        ];
        let mut beams = vec![Beam::new([0, 1], 1.0, 1.0, 0.0), Beam::new([0, 2], 1.0, 1.0, 0.0)];
        beams[0].detacher_group = 3;
        beams[1].detacher_group = 3;
        let mut broken = Vec::new();
        audit_beams(&nodes, &mut beams, &mut broken);
        assert_eq!(broken, vec![0, 1]);
    }

    #[test]
    fn test_strain_break_takes_detacher_group() {
        let mut nodes = vec![
            Node::new(Vec3::ZERO, 1.0),
            Node::new(Vec3::new(1.5, 0.0, 0.0), 1.0),
            Node::new(Vec3::new(0.0, 1.0, 0.0), 1.0),
        ];
        let mut beams =
            vec![Beam::new([0, 1], 1.0, 1.0e3, 0.0), Beam::new([0, 2], 1.0, 1.0e3, 0.0)];
        beams[0].break_threshold = 0.2;
        beams[0].detacher_group = 3;
        beams[1].detacher_group = 3;
        let mut broken = Vec::new();
        apply_beams(&mut nodes, &mut beams, &mut broken);
        assert_eq!(broken, vec![0]);
        assert!(!beams[1].broken);

        audit_beams(&nodes, &mut beams, &mut broken);
        assert!(beams[0].broken && beams[1].broken);
        assert_eq!(broken, vec![0, 1]);
    }
}
