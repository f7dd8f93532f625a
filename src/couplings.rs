//! Couplings between nodes of different actors: tow hooks, ropes, ties and
//! slide nodes.
//!
//! Couplings are owned by the manager, never by either actor. Endpoints are
//! addressed by [`NodeRef`] (actor id plus node index) and every force goes
//! into the nodes' `external_force`, so the coupling phase can run serially
//! between the parallel per-actor phase and inter-actor contact.

use crate::actor::ActorId;
use crate::components::Node;
use crate::events::SimEvent;
use crate::math::closest_on_segment;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CouplingId(pub u32);

/// A node of a specific actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub actor: ActorId,
    pub node: usize,
}

impl NodeRef {
    pub fn new(actor: ActorId, node: usize) -> Self {
        Self { actor, node }
    }
}

/// Behaviour of a coupling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CouplingKind {
    /// Rigid two-way link at the length measured when attached.
    Hook,
    /// Pulls only; slack below its length.
    Rope,
    /// Pulls only and reels in toward `target_length` at `speed` m/s.
    Tie { target_length: f32, speed: f32 },
    /// The `a` node rides on the rail between `b` and `rail_end` (both on
    /// the same actor).
    SlideNode { rail_end: usize },
}

/// Spring parameters and limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CouplingParams {
    pub spring: f32,
    pub damp: f32,
    /// Force (N) at which the coupling snaps.
    pub break_force: f32,
}

impl Default for CouplingParams {
    fn default() -> Self {
        Self { spring: 1.0e6, damp: 1.0e4, break_force: 5.0e5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupling {
    pub id: CouplingId,
    pub kind: CouplingKind,
    pub a: NodeRef,
    pub b: NodeRef,
    /// Current rest length (ties shorten it over time).
    pub length: f32,
    pub params: CouplingParams,
    /// Force magnitude during the last resolve (N).
    #[serde(skip)]
    pub force: f32,
}

impl Coupling {
    /// Actors on both ends.
    pub fn actors(&self) -> [ActorId; 2] {
        [self.a.actor, self.b.actor]
    }

    pub fn involves(&self, actor: ActorId) -> bool {
        self.a.actor == actor || self.b.actor == actor
    }
}

/// Node storage the coupling phase reads and writes.
pub trait NodeAccess {
    fn node(&self, at: NodeRef) -> Option<&Node>;
    fn node_mut(&mut self, at: NodeRef) -> Option<&mut Node>;
}

/// All live couplings of the manager.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Couplings {
    next_id: u32,
    items: Vec<Coupling>,
}

impl Couplings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coupling> {
        self.items.iter()
    }

    pub fn get(&self, id: CouplingId) -> Option<&Coupling> {
        self.items.iter().find(|c| c.id == id)
    }

    /// Create a coupling. The rest length is the current distance between
    /// the endpoints (for slide nodes, the distance to the rail).
    pub fn attach(
        &mut self,
        nodes: &impl NodeAccess,
        kind: CouplingKind,
        a: NodeRef,
        b: NodeRef,
        params: CouplingParams,
        events: &mut Vec<SimEvent>,
    ) -> Option<CouplingId> {
        if a.actor == b.actor {
            return None;
        }
        let pa = nodes.node(a)?.position;
        let pb = nodes.node(b)?.position;
        let length = match kind {
            CouplingKind::SlideNode { rail_end } => {
                let end = nodes.node(NodeRef::new(b.actor, rail_end))?.position;
                closest_on_segment(pa, pb, end).0.distance(pa)
            }
            _ => pa.distance(pb),
        };
        let id = CouplingId(self.next_id);
        self.next_id += 1;
        self.items.push(Coupling { id, kind, a, b, length, params, force: 0.0 });
        debug!(coupling = id.0, a = a.actor.0, b = b.actor.0, ?kind, "coupling attached");
        events.push(SimEvent::CouplingAttached { coupling: id, a: a.actor, b: b.actor });
        Some(id)
    }

    /// Re-create a saved coupling with its stored length.
    pub fn restore(
        &mut self,
        kind: CouplingKind,
        a: NodeRef,
        b: NodeRef,
        length: f32,
        params: CouplingParams,
    ) -> CouplingId {
        let id = CouplingId(self.next_id);
        self.next_id += 1;
        self.items.push(Coupling { id, kind, a, b, length, params, force: 0.0 });
        id
    }

    pub fn detach(&mut self, id: CouplingId, events: &mut Vec<SimEvent>) -> bool {
        let before = self.items.len();
        self.items.retain(|c| c.id != id);
        let removed = self.items.len() != before;
        if removed {
            events.push(SimEvent::CouplingDetached { coupling: id });
        }
        removed
    }

    /// Drop every coupling touching `actor` (actor removal).
    pub fn remove_actor(&mut self, actor: ActorId, events: &mut Vec<SimEvent>) {
        self.items.retain(|c| {
            if c.involves(actor) {
                events.push(SimEvent::CouplingDetached { coupling: c.id });
                false
            } else {
                true
            }
        });
    }

    /// Actors coupled to `actor`.
    pub fn partners(&self, actor: ActorId) -> impl Iterator<Item = ActorId> + '_ {
        self.items.iter().filter(move |c| c.involves(actor)).map(move |c| {
            if c.a.actor == actor {
                c.b.actor
            } else {
                c.a.actor
            }
        })
    }

    /// Actors towed by `actor` through a hook it owns the `a` end of.
    pub fn towed_by(&self, actor: ActorId) -> impl Iterator<Item = ActorId> + '_ {
        self.items
            .iter()
            .filter(move |c| c.kind == CouplingKind::Hook && c.a.actor == actor)
            .map(|c| c.b.actor)
    }

    /// Apply every coupling force for one step. Couplings whose endpoints
    /// vanished are dropped; overloaded ones break.
    pub fn resolve(&mut self, nodes: &mut impl NodeAccess, dt: f32, events: &mut Vec<SimEvent>) {
        self.items.retain_mut(|c| {
            let Some(force) = coupling_force(c, &*nodes, dt) else {
                events.push(SimEvent::CouplingDetached { coupling: c.id });
                return false;
            };
            c.force = force.magnitude;
            if force.magnitude > c.params.break_force {
                debug!(coupling = c.id.0, force = force.magnitude, "coupling broke");
                events.push(SimEvent::CouplingBroken { coupling: c.id });
                return false;
            }
            apply(nodes, c.a, force.on_a);
            for (node, share) in force.on_b {
                apply(nodes, node, share);
            }
            true
        });
    }
}

struct CouplingForce {
    magnitude: f32,
    on_a: Vec3,
    on_b: [(NodeRef, Vec3); 2],
}

fn apply(nodes: &mut impl NodeAccess, at: NodeRef, force: Vec3) {
    if let Some(node) = nodes.node_mut(at) {
        node.external_force += force;
    }
}

fn coupling_force(c: &mut Coupling, nodes: &impl NodeAccess, dt: f32) -> Option<CouplingForce> {
    let a = nodes.node(c.a)?;
    let b = nodes.node(c.b)?;
    let (pa, va) = (a.position, a.velocity);

    // Other end: a node, or the closest point on a rail.
    let (pb, vb, weights, rail) = match c.kind {
        CouplingKind::SlideNode { rail_end } => {
            let end_ref = NodeRef::new(c.b.actor, rail_end);
            let end = nodes.node(end_ref)?;
            let (point, t) = closest_on_segment(pa, b.position, end.position);
            let velocity = b.velocity * (1.0 - t) + end.velocity * t;
            (point, velocity, [1.0 - t, t], end_ref)
        }
        _ => (b.position, b.velocity, [1.0, 0.0], c.b),
    };

    if let CouplingKind::Tie { target_length, speed } = c.kind {
        let step = speed * dt;
        c.length += (target_length - c.length).clamp(-step, step);
    }

    let delta = pb - pa;
    let distance = delta.length();
    let Some(dir) = delta.try_normalize() else {
        return Some(CouplingForce {
            magnitude: 0.0,
            on_a: Vec3::ZERO,
            on_b: [(c.b, Vec3::ZERO), (rail, Vec3::ZERO)],
        });
    };
    let stretch = distance - c.length;
    let closing = (vb - va).dot(dir);
    let mut magnitude = c.params.spring * stretch + c.params.damp * closing;
    let tension_only = matches!(c.kind, CouplingKind::Rope | CouplingKind::Tie { .. });
    if tension_only && (stretch <= 0.0 || magnitude < 0.0) {
        magnitude = 0.0;
    }
    // Positive magnitude pulls the ends together.
    let on_a = dir * magnitude;
    Some(CouplingForce {
        magnitude: magnitude.abs(),
        on_a,
        on_b: [(c.b, -on_a * weights[0]), (rail, -on_a * weights[1])],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Table(HashMap<ActorId, Vec<Node>>);

    impl NodeAccess for Table {
        fn node(&self, at: NodeRef) -> Option<&Node> {
            self.0.get(&at.actor)?.get(at.node)
        }
        fn node_mut(&mut self, at: NodeRef) -> Option<&mut Node> {
            self.0.get_mut(&at.actor)?.get_mut(at.node)
        }
    }

    fn two_actors(gap: f32) -> Table {
        let mut t = Table::default();
        t.0.insert(ActorId(0), vec![Node::new(Vec3::ZERO, 100.0)]);
        t.0.insert(
            ActorId(1),
            vec![
                Node::new(Vec3::new(0.0, 0.0, gap), 100.0),
                Node::new(Vec3::new(4.0, 0.0, gap), 100.0),
            ],
        );
        t
    }

    fn a() -> NodeRef {
        NodeRef::new(ActorId(0), 0)
    }
    fn b() -> NodeRef {
        NodeRef::new(ActorId(1), 0)
    }

    #[test]
    fn test_hook_pulls_both_ends_together() {
        let mut table = two_actors(2.0);
        let mut couplings = Couplings::new();
        let mut events = Vec::new();
        let id = couplings
            .attach(&table, CouplingKind::Hook, a(), b(), CouplingParams::default(), &mut events)
            .unwrap();
        let attached = SimEvent::CouplingAttached { coupling: id, a: ActorId(0), b: ActorId(1) };
        assert_eq!(events, vec![attached]);

        table.node_mut(b()).unwrap().position.z = 2.1;
        couplings.resolve(&mut table, 0.0005, &mut events);
        let fa = table.node(a()).unwrap().external_force;
        let fb = table.node(b()).unwrap().external_force;
        assert!(fa.z > 0.0);
        assert!((fa + fb).length() < 1e-3);
    }

    #[test]
    fn test_rope_is_slack_when_compressed() {
        let mut table = two_actors(2.0);
        let mut couplings = Couplings::new();
        let mut events = Vec::new();
        let params = CouplingParams::default();
        couplings.attach(&table, CouplingKind::Rope, a(), b(), params, &mut events);
        table.node_mut(b()).unwrap().position.z = 1.5;
        couplings.resolve(&mut table, 0.0005, &mut events);
        assert_eq!(table.node(a()).unwrap().external_force, Vec3::ZERO);
    }

    #[test]
    fn test_tie_reels_in() {
        let mut table = two_actors(3.0);
        let mut couplings = Couplings::new();
        let mut events = Vec::new();
        let kind = CouplingKind::Tie { target_length: 1.0, speed: 0.2 };
        let params = CouplingParams::default();
        let id = couplings.attach(&table, kind, a(), b(), params, &mut events).unwrap();
        for _ in 0..1000 {
            couplings.resolve(&mut table, 0.001, &mut events);
        }
        let length = couplings.get(id).unwrap().length;
        assert!((length - 2.8).abs() < 1e-3);
        assert!(table.node(a()).unwrap().external_force.z > 0.0);
    }

    #[test]
    fn test_overload_breaks_coupling() {
        let mut table = two_actors(2.0);
        let mut couplings = Couplings::new();
        let mut events = Vec::new();
        let params = CouplingParams { break_force: 1000.0, ..Default::default() };
        let id =
            couplings.attach(&table, CouplingKind::Hook, a(), b(), params, &mut events).unwrap();
        table.node_mut(b()).unwrap().position.z = 3.0;
        couplings.resolve(&mut table, 0.0005, &mut events);
        assert!(couplings.is_empty());
        assert!(events.contains(&SimEvent::CouplingBroken { coupling: id }));
    }

    #[test]
    fn test_slide_node_splits_reaction_over_rail() {
        let mut table = two_actors(2.0);
        table.node_mut(a()).unwrap().position = Vec3::new(1.0, 0.0, 2.5);
        let mut couplings = Couplings::new();
        let mut events = Vec::new();
        couplings.attach(
            &table,
            CouplingKind::SlideNode { rail_end: 1 },
            a(),
            b(),
            CouplingParams::default(),
            &mut events,
        );
        // Pull the slider away from the rail.
        table.node_mut(a()).unwrap().position = Vec3::new(1.0, 0.0, 2.6);
        couplings.resolve(&mut table, 0.0005, &mut events);
        let f0 = table.node(NodeRef::new(ActorId(1), 0)).unwrap().external_force;
        let f1 = table.node(NodeRef::new(ActorId(1), 1)).unwrap().external_force;
        assert!(f0.z > 0.0 && f1.z > 0.0);
        assert!(f0.z > f1.z);
    }

    #[test]
    fn test_removing_actor_drops_its_couplings() {
        let table = two_actors(2.0);
        let mut couplings = Couplings::new();
        let mut events = Vec::new();
        let params = CouplingParams::default();
        couplings.attach(&table, CouplingKind::Hook, a(), b(), params, &mut events);
        assert_eq!(couplings.partners(ActorId(0)).collect::<Vec<_>>(), vec![ActorId(1)]);
        assert_eq!(couplings.towed_by(ActorId(0)).collect::<Vec<_>>(), vec![ActorId(1)]);
        couplings.remove_actor(ActorId(1), &mut events);
        assert!(couplings.is_empty());
        assert!(matches!(events.last(), Some(SimEvent::CouplingDetached { .. })));
    }
}
