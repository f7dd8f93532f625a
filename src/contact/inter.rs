//! Contact between two different actors (C8).
//!
//! Every overlapping pair is resolved in both directions: A's triangles
//! against B's contactable nodes and the reverse. The responses go into the
//! nodes' `external_force`, which the next integration step applies, so
//! the per-actor kernels of that step already see the contact.
//!
//! Unlike self-contact, triangles here are one-sided: the normal is flipped
//! to point away from the owning actor's centroid, and a node counts as in
//! contact from `range` in front of the face down to a limited depth
//! behind it. A node that tunnelled deeper is left alone rather than
//! yanked through the body.

use super::resolve::{respond, Body, Contact};
use super::{ContactBody, ContactStats};
use crate::ground::GroundModel;
use crate::math::{triangle_local, triangle_normal, Aabb};
use glam::Vec3;

/// Depth behind a face (as a fraction of its longest edge) still resolved.
const DEPTH_FRACTION: f32 = 0.25;

/// Resolve contact between two actors whose bounding boxes overlap.
pub fn resolve_pair(
    a: &mut ContactBody<'_>,
    b: &mut ContactBody<'_>,
    model: &GroundModel,
    dt: f32,
) -> ContactStats {
    let mut stats = triangles_against_points(a, b, model, dt);
    stats += triangles_against_points(b, a, model, dt);
    stats
}

fn triangles_against_points(
    owner: &mut ContactBody<'_>,
    other: &mut ContactBody<'_>,
    model: &GroundModel,
    dt: f32,
) -> ContactStats {
    let mut stats = ContactStats::default();
    let range = owner.range;
    let mut candidates = Vec::new();

    for tri in owner.triangles {
        let [ia, ib, ic] = tri.nodes;
        let (a, b, c) =
            (owner.nodes[ia].position, owner.nodes[ib].position, owner.nodes[ic].position);
        let Some(mut normal) = triangle_normal(a, b, c) else {
            continue;
        };
        if (owner.centroid - a).dot(normal) > 0.0 {
            normal = -normal;
        }
        let longest = (a - b).length().max((b - c).length()).max((c - a).length());
        let max_depth = range.max(DEPTH_FRACTION * longest);
        let query = Aabb::from_points([a, b, c]).expanded(max_depth);

        candidates.clear();
        other.index.for_each_in(&query, |e| candidates.push(e.node));

        for &p in &candidates {
            let Some(local) = triangle_local(other.nodes[p].position, a, b, c) else {
                continue;
            };
            // `triangle_local` measures along the unflipped face normal.
            let distance = if normal.dot((b - a).cross(c - a)) >= 0.0 {
                local.distance
            } else {
                -local.distance
            };
            if !local.inside() || distance >= range || distance <= -max_depth {
                continue;
            }
            stats.tested += 1;
            let contact = Contact { local, normal, penetration: range - distance };
            let point = Body::of(&other.nodes[p], false);
            let triangle = [
                Body::of(&owner.nodes[ia], false),
                Body::of(&owner.nodes[ib], false),
                Body::of(&owner.nodes[ic], false),
            ];
            let friction = other.nodes[p].friction;
            let Some(r) = respond(point, triangle, &contact, model, dt, friction) else {
                continue;
            };
            other.nodes[p].external_force += r.point;
            other.nodes[p].actor_contact = true;
            for (k, &i) in tri.nodes.iter().enumerate() {
                owner.nodes[i].external_force += r.triangle[k];
                owner.nodes[i].actor_contact = true;
            }
            stats.contacts += 1;
        }
    }
    stats
}

/// Partition pairs into batches in which no actor appears twice, so every
/// batch can run in parallel without two tasks writing the same actor.
pub fn batches(pairs: &[(usize, usize)]) -> Vec<Vec<(usize, usize)>> {
    let mut remaining: Vec<(usize, usize)> = pairs.to_vec();
    let mut out = Vec::new();
    while !remaining.is_empty() {
        let mut used = std::collections::HashSet::new();
        let mut batch = Vec::new();
        remaining.retain(|&(a, b)| {
            if used.contains(&a) || used.contains(&b) {
                return true;
            }
            used.insert(a);
            used.insert(b);
            batch.push((a, b));
            false
        });
        out.push(batch);
    }
    out
}

/// Pairs of actors whose (expanded) boxes overlap.
pub fn overlapping_pairs(boxes: &[(usize, Aabb)], margin: f32) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (i, (a, box_a)) in boxes.iter().enumerate() {
        let grown = box_a.expanded(margin);
        for (b, box_b) in &boxes[i + 1..] {
            if grown.intersects(box_b) {
                pairs.push((*a, *b));
            }
        }
    }
    pairs
}

/// Mass-weighted centre of a node set.
pub fn centroid(nodes: &[crate::components::Node]) -> Vec3 {
    let (sum, mass) = nodes
        .iter()
        .fold((Vec3::ZERO, 0.0f32), |(s, m), n| (s + n.position * n.mass, m + n.mass));
    if mass > 0.0 {
        sum / mass
    } else {
        Vec3::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{CabTriangle, Node};
    use crate::contact::PointContactIndex;

    /// A horizontal plate at y = 0 whose owner sits below it, so its
    /// outward side is +Y.
    fn plate() -> (Vec<Node>, Vec<CabTriangle>) {
        let nodes = vec![
            Node::new(Vec3::new(-2.0, 0.0, -2.0), 100.0),
            Node::new(Vec3::new(2.0, 0.0, -2.0), 100.0),
            Node::new(Vec3::new(0.0, 0.0, 2.0), 100.0),
            Node::new(Vec3::new(0.0, -1.0, 0.0), 100.0),
        ];
        (nodes, vec![CabTriangle { nodes: [0, 1, 2], buoyant: false }])
    }

    fn run(a: &mut [Node], ta: &[CabTriangle], b: &mut [Node]) -> ContactStats {
        let mut ia = PointContactIndex::new(1.0);
        ia.rebuild(a);
        let mut ib = PointContactIndex::new(1.0);
        ib.rebuild(b);
        let ca = centroid(a);
        let cb = centroid(b);
        let mut body_a =
            ContactBody { nodes: a, triangles: ta, index: &ia, range: 0.05, centroid: ca };
        let mut body_b =
            ContactBody { nodes: b, triangles: &[], index: &ib, range: 0.05, centroid: cb };
        resolve_pair(&mut body_a, &mut body_b, &GroundModel::metal(), 0.0005)
    }

    #[test]
    fn test_falling_node_hits_other_actor() {
        let (mut a, ta) = plate();
        let mut b = vec![Node::new(Vec3::new(0.0, 0.03, 0.0), 20.0)];
        b[0].velocity = Vec3::new(0.0, -2.0, 0.0);
        let stats = run(&mut a, &ta, &mut b);
        assert_eq!(stats.contacts, 1);
        assert!(b[0].external_force.y > 0.0);
        assert!(b[0].actor_contact);
        assert!(a[..3].iter().all(|n| n.actor_contact));
        // Nothing is written into the per-step accumulators
        assert_eq!(b[0].force, Vec3::ZERO);
    }

    #[test]
    fn test_slightly_penetrated_node_pushed_outward() {
        let (mut a, ta) = plate();
        let mut b = vec![Node::new(Vec3::new(0.0, -0.1, 0.0), 20.0)];
        run(&mut a, &ta, &mut b);
        assert!(b[0].external_force.y > 0.0);
    }

    #[test]
    fn test_deep_node_ignored() {
        let (mut a, ta) = plate();
        let mut b = vec![Node::new(Vec3::new(0.0, -1.5, 0.0), 20.0)];
        let stats = run(&mut a, &ta, &mut b);
        assert_eq!(stats.contacts, 0);
    }

    #[test]
    fn test_batches_are_disjoint() {
        let pairs = [(0, 1), (1, 2), (2, 3), (0, 3), (4, 5)];
        let out = batches(&pairs);
        let total: usize = out.iter().map(Vec::len).sum();
        assert_eq!(total, pairs.len());
        for batch in &out {
            let mut seen = std::collections::HashSet::new();
            for &(a, b) in batch {
                assert!(seen.insert(a));
                assert!(seen.insert(b));
            }
        }
        assert_eq!(out[0], vec![(0, 1), (2, 3), (4, 5)]);
    }

    #[test]
    fn test_overlapping_pairs() {
        let boxes = [
            (0, Aabb::new(Vec3::ZERO, Vec3::ONE)),
            (3, Aabb::new(Vec3::splat(0.5), Vec3::splat(2.0))),
            (7, Aabb::new(Vec3::splat(10.0), Vec3::splat(11.0))),
        ];
        assert_eq!(overlapping_pairs(&boxes, 0.0), vec![(0, 3)]);
        assert_eq!(overlapping_pairs(&boxes, 9.0).len(), 3);
    }
}
