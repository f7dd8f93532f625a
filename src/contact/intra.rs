//! Self-collision of one actor (C7): its contactable nodes against its own
//! cab triangles.

use super::resolve::{respond, Body, Contact};
use super::{ContactBody, ContactStats};
use crate::ground::GroundModel;
use crate::math::{triangle_local, triangle_normal, Aabb};

/// Resolve the actor's nodes against its own triangles, adding the
/// responses to the per-step force accumulators.
pub fn resolve_self(body: &mut ContactBody<'_>, model: &GroundModel, dt: f32) -> ContactStats {
    let mut stats = ContactStats::default();
    let range = body.range;
    let mut candidates = Vec::new();

    for tri in body.triangles {
        let [ia, ib, ic] = tri.nodes;
        let (a, b, c) = (body.nodes[ia].position, body.nodes[ib].position, body.nodes[ic].position);
        let Some(face) = triangle_normal(a, b, c) else {
            continue;
        };
        let query = Aabb::from_points([a, b, c]).expanded(range);

        candidates.clear();
        body.index.for_each_in(&query, |e| {
            if !tri.contains_node(e.node) {
                candidates.push(e.node);
            }
        });

        for &p in &candidates {
            let node = &body.nodes[p];
            let Some(local) = triangle_local(node.position, a, b, c) else {
                continue;
            };
            if !local.inside() || local.distance.abs() >= range {
                continue;
            }
            stats.tested += 1;
            // Two-sided: push the point out on whichever side it is.
            let normal = if local.distance >= 0.0 { face } else { -face };
            let contact = Contact { local, normal, penetration: range - local.distance.abs() };

            let point = Body::of(node, false);
            let triangle = [
                Body::of(&body.nodes[ia], false),
                Body::of(&body.nodes[ib], false),
                Body::of(&body.nodes[ic], false),
            ];
            let Some(r) = respond(point, triangle, &contact, model, dt, node.friction) else {
                continue;
            };
            body.nodes[p].force += r.point;
            body.nodes[ia].force += r.triangle[0];
            body.nodes[ib].force += r.triangle[1];
            body.nodes[ic].force += r.triangle[2];
            stats.contacts += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{CabTriangle, Node};
    use crate::contact::PointContactIndex;
    use glam::Vec3;

    fn plate_and_point(point_y: f32, point_vy: f32) -> (Vec<Node>, Vec<CabTriangle>) {
        let mut nodes = vec![
            Node::new(Vec3::new(0.0, 0.0, 0.0), 50.0),
            Node::new(Vec3::new(2.0, 0.0, 0.0), 50.0),
            Node::new(Vec3::new(0.0, 0.0, 2.0), 50.0),
            Node::new(Vec3::new(0.5, point_y, 0.5), 10.0),
        ];
        nodes[3].velocity = Vec3::new(0.0, point_vy, 0.0);
        (nodes, vec![CabTriangle { nodes: [0, 2, 1], buoyant: false }])
    }

    fn run(nodes: &mut [Node], triangles: &[CabTriangle]) -> ContactStats {
        let mut index = PointContactIndex::new(1.0);
        index.rebuild(nodes);
        let mut body = ContactBody {
            nodes,
            triangles,
            index: &index,
            range: 0.05,
            centroid: Vec3::ZERO,
        };
        resolve_self(&mut body, &GroundModel::metal(), 0.0005)
    }

    #[test]
    fn test_point_near_own_triangle_is_repelled() {
        let (mut nodes, tris) = plate_and_point(0.02, -1.0);
        let stats = run(&mut nodes, &tris);
        assert_eq!(stats.contacts, 1);
        assert!(nodes[3].force.y > 0.0);
        let plate: f32 = nodes[..3].iter().map(|n| n.force.y).sum();
        assert!(plate < 0.0);
    }

    #[test]
    fn test_point_below_is_pushed_down() {
        let (mut nodes, tris) = plate_and_point(-0.02, 1.0);
        run(&mut nodes, &tris);
        assert!(nodes[3].force.y < 0.0);
    }

    #[test]
    fn test_far_point_and_incident_nodes_ignored() {
        let (mut nodes, tris) = plate_and_point(0.5, -1.0);
        let stats = run(&mut nodes, &tris);
        assert_eq!(stats.contacts, 0);
        assert!(nodes.iter().all(|n| n.force == Vec3::ZERO));
    }

    #[test]
    fn test_degenerate_triangle_skipped() {
        let (mut nodes, _) = plate_and_point(0.0, -1.0);
        nodes[2].position = Vec3::new(1.0, 0.0, 0.0);
        let tris = vec![CabTriangle { nodes: [0, 2, 1], buoyant: false }];
        let stats = run(&mut nodes, &tris);
        assert_eq!(stats.contacts, 0);
    }
}
