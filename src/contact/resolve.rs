//! Node-versus-triangle contact response shared by the intra- and
//! inter-actor resolvers.
//!
//! The triangle is treated as a second body whose velocity and mass at the
//! contact point are barycentric blends of its three nodes. The relative
//! motion is handed to [`GroundModel::respond`] with the reduced mass, so
//! cab-to-cab contact uses exactly the same impact and friction law as
//! ground contact, only with the submesh material. The resulting change of
//! force is applied to the point and, with opposite sign and barycentric
//! weights, to the triangle nodes.

use crate::components::Node;
use crate::ground::{ContactInput, GroundModel};
use crate::math::TriangleLocal;
use glam::Vec3;

/// Rate (1/s) at which penetration is converted into separation speed.
const SEPARATION_RATE: f32 = 10.0;
/// Upper bound on the separation speed (m/s).
const MAX_SEPARATION_SPEED: f32 = 0.5;

/// Kinematic state of one side of a contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub velocity: Vec3,
    pub force: Vec3,
    pub mass: f32,
}

impl Body {
    #[inline]
    pub fn of(node: &Node, external: bool) -> Self {
        Self {
            velocity: node.velocity,
            force: if external { node.external_force } else { node.force },
            mass: node.mass,
        }
    }
}

/// A point inside the contact range of a triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub local: TriangleLocal,
    /// Unit normal from the triangle toward the point.
    pub normal: Vec3,
    /// Depth inside the contact range (m, > 0).
    pub penetration: f32,
}

/// Force changes produced by one contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Response {
    pub point: Vec3,
    pub triangle: [Vec3; 3],
}

/// Compute the response of `point` against `triangle` for `contact`.
///
/// Returns `None` when no reaction is needed (separating, frictionless) or
/// the masses are degenerate.
pub fn respond(
    point: Body,
    triangle: [Body; 3],
    contact: &Contact,
    model: &GroundModel,
    dt: f32,
    friction_scale: f32,
) -> Option<Response> {
    let w = [contact.local.alpha, contact.local.beta, contact.local.gamma];
    if point.mass <= 0.0 || triangle.iter().any(|b| b.mass <= 0.0) {
        return None;
    }
    // Mobility of the contact point when forces are spread by weight.
    let tri_mobility: f32 = (0..3).map(|i| w[i] * w[i] / triangle[i].mass).sum();
    if tri_mobility <= 0.0 {
        return None;
    }
    let tri_velocity: Vec3 = (0..3).map(|i| triangle[i].velocity * w[i]).sum();
    let tri_accel: Vec3 = (0..3).map(|i| triangle[i].force * (w[i] / triangle[i].mass)).sum();

    let reduced = 1.0 / (1.0 / point.mass + tri_mobility);
    let relative_force = (point.force / point.mass - tri_accel) * reduced;

    // Bias the normal velocity so the reaction also separates the bodies.
    let separation = (contact.penetration * SEPARATION_RATE).min(MAX_SEPARATION_SPEED);
    let relative_velocity = point.velocity - tri_velocity - contact.normal * separation;

    let out = model.respond(ContactInput {
        velocity: relative_velocity,
        force: relative_force,
        mass: reduced,
        normal: contact.normal,
        penetration: contact.penetration,
        dt,
        friction_scale,
        frictionless: false,
    });
    if !out.solid && out.force == relative_force {
        return None;
    }
    let delta = out.force - relative_force;
    if !delta.is_finite() || delta == Vec3::ZERO {
        return None;
    }
    Some(Response {
        point: delta,
        triangle: [-delta * w[0], -delta * w[1], -delta * w[2]],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(velocity: Vec3, mass: f32) -> Body {
        Body { velocity, force: Vec3::ZERO, mass }
    }

    fn centre_contact(penetration: f32) -> Contact {
        Contact {
            local: TriangleLocal {
                alpha: 1.0 / 3.0,
                beta: 1.0 / 3.0,
                gamma: 1.0 / 3.0,
                distance: 0.0,
            },
            normal: Vec3::Y,
            penetration,
        }
    }

    #[test]
    fn test_approaching_point_is_pushed_back() {
        let point = body(Vec3::new(0.0, -2.0, 0.0), 10.0);
        let tri = [body(Vec3::ZERO, 10.0); 3];
        let metal = GroundModel::metal();
        let r = respond(point, tri, &centre_contact(0.01), &metal, 0.0005, 1.0).unwrap();
        assert!(r.point.y > 0.0);
        // Equal and opposite
        let total: Vec3 = r.point + r.triangle.iter().copied().sum::<Vec3>();
        assert!(total.length() < 1e-2 * r.point.length());
    }

    #[test]
    fn test_reaction_stops_relative_approach() {
        let dt = 0.0005;
        let point = body(Vec3::new(0.0, -1.0, 0.0), 10.0);
        let tri = [body(Vec3::ZERO, 20.0); 3];
        let r = respond(point, tri, &centre_contact(1e-4), &GroundModel::metal(), dt, 1.0).unwrap();
        let v_point = point.velocity.y + r.point.y / 10.0 * dt;
        let v_tri = r.triangle[0].y / 20.0 * dt;
        assert!(v_point - v_tri >= -1e-4);
    }

    #[test]
    fn test_sliding_contact_has_friction() {
        let point = body(Vec3::new(3.0, -0.1, 0.0), 10.0);
        let tri = [body(Vec3::ZERO, 10.0); 3];
        let metal = GroundModel::metal();
        let r = respond(point, tri, &centre_contact(0.01), &metal, 0.0005, 1.0).unwrap();
        assert!(r.point.x < 0.0);
    }
}
