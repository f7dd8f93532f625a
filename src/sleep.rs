//! Sleep/wake arbitration for locally simulated actors (C10).
//!
//! An actor whose fastest node stays under `velocity_threshold` for
//! `time_threshold` seconds is put to sleep and skipped by the step kernel.
//! Each frame the arbiter walks outward from the player actor and from every
//! actor that is actually moving, waking sleepers whose predicted box touches
//! a simulated neighbour, and keeps coupled actors together.

use crate::actor::{Actor, ActorId, ActorState};
use crate::config::SleepTuning;
use crate::couplings::Couplings;
use crate::events::SimEvent;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SleepArbiter {
    /// Set by a force-wake request; nothing falls asleep until cleared.
    pub forced_awake: bool,
}

/// Wake a sleeping actor. Returns whether its state changed.
pub fn wake(actor: &mut Actor, events: &mut Vec<SimEvent>) -> bool {
    actor.sleep_timer = 0.0;
    if actor.state != ActorState::Sleeping {
        return false;
    }
    actor.state = ActorState::Simulated;
    actor.asleep_for = 0.0;
    debug!(actor = actor.id.0, "actor woke up");
    events.push(SimEvent::ActorStateChanged {
        actor: actor.id,
        from: ActorState::Sleeping,
        to: ActorState::Simulated,
    });
    true
}

fn fall_asleep(actor: &mut Actor, events: &mut Vec<SimEvent>) {
    actor.state = ActorState::Sleeping;
    actor.asleep_for = 0.0;
    debug!(actor = actor.id.0, "actor fell asleep");
    events.push(SimEvent::ActorStateChanged {
        actor: actor.id,
        from: ActorState::Simulated,
        to: ActorState::Sleeping,
    });
}

impl SleepArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance sleep timers by `dt` and apply every transition for this frame.
    pub fn update(
        &self,
        actors: &mut [&mut Actor],
        player: Option<ActorId>,
        couplings: &Couplings,
        tuning: &SleepTuning,
        dt: f32,
        events: &mut Vec<SimEvent>,
    ) {
        for actor in actors.iter_mut() {
            match actor.state {
                ActorState::Simulated => {
                    let sweep = actor.velocity() * tuning.prediction_time;
                    actor.predicted_aabb = actor.aabb.swept(sweep).expanded(actor.collision_range);
                    if self.forced_awake || actor.never_sleeps() || actor.replaying {
                        actor.sleep_timer = 0.0;
                        continue;
                    }
                    if actor.max_node_speed() > tuning.velocity_threshold {
                        actor.sleep_timer = 0.0;
                        continue;
                    }
                    actor.sleep_timer += dt;
                    if actor.sleep_timer >= tuning.time_threshold && Some(actor.id) != player {
                        fall_asleep(actor, events);
                    }
                }
                ActorState::Sleeping => {
                    actor.asleep_for += dt;
                    actor.predicted_aabb = actor.aabb.expanded(actor.collision_range);
                }
                ActorState::Networked | ActorState::Invalid => {}
            }
        }

        let index: HashMap<ActorId, usize> =
            actors.iter().enumerate().map(|(i, a)| (a.id, i)).collect();
        let mut visited = vec![false; actors.len()];
        let mut roots = Vec::new();
        if let Some(&p) = player.as_ref().and_then(|id| index.get(id)) {
            if actors[p].is_local() {
                wake(&mut *actors[p], events);
                actors[p].sleep_timer = 0.0;
                roots.push(p);
            }
        }
        roots.extend(
            (0..actors.len()).filter(|&i| actors[i].is_simulated() && actors[i].sleep_timer == 0.0),
        );
        for root in roots {
            self.activate_from(root, actors, &index, couplings, &mut visited, events);
        }
    }

    fn activate_from(
        &self,
        root: usize,
        actors: &mut [&mut Actor],
        index: &HashMap<ActorId, usize>,
        couplings: &Couplings,
        visited: &mut [bool],
        events: &mut Vec<SimEvent>,
    ) {
        let mut stack = vec![root];
        while let Some(j) = stack.pop() {
            if visited[j] || !actors[j].is_simulated() {
                continue;
            }
            visited[j] = true;
            let partners: Vec<usize> = couplings
                .partners(actors[j].id)
                .filter_map(|id| index.get(&id).copied())
                .collect();
            for t in 0..actors.len() {
                if t == j || visited[t] {
                    continue;
                }
                let coupled = partners.contains(&t);
                match actors[t].state {
                    ActorState::Simulated => {
                        let touching =
                            actors[t].contact_aabb().intersects(&actors[j].contact_aabb());
                        if coupled || touching {
                            actors[t].sleep_timer = 0.0;
                            stack.push(t);
                        }
                    }
                    ActorState::Sleeping => {
                        let near = actors[t].predicted_aabb.intersects(&actors[j].predicted_aabb);
                        if coupled || near {
                            wake(&mut *actors[t], events);
                            stack.push(t);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Wake every sleeping actor and keep them awake until
    /// [`SleepArbiter::allow_sleep`].
    pub fn wake_all(&mut self, actors: &mut [&mut Actor], events: &mut Vec<SimEvent>) {
        self.forced_awake = true;
        for actor in actors.iter_mut() {
            wake(actor, events);
        }
    }

    pub fn allow_sleep(&mut self) {
        self.forced_awake = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Beam, Node};
    use crate::couplings::{CouplingKind, CouplingParams, NodeAccess, NodeRef};
    use glam::Vec3;

    fn block(id: u32, x: f32) -> Actor {
        let nodes = vec![
            Node::new(Vec3::new(x, 0.0, 0.0), 10.0),
            Node::new(Vec3::new(x + 1.0, 0.0, 0.0), 10.0),
        ];
        let beams = vec![Beam::new([0, 1], 1.0, 1.0e5, 100.0)];
        Actor::new(ActorId(id), "block", nodes, beams)
    }

    struct Pair<'a>(&'a mut [Actor]);

    impl NodeAccess for Pair<'_> {
        fn node(&self, r: NodeRef) -> Option<&Node> {
            self.0.get(r.actor.0 as usize)?.nodes.get(r.node)
        }
        fn node_mut(&mut self, r: NodeRef) -> Option<&mut Node> {
            self.0.get_mut(r.actor.0 as usize)?.nodes.get_mut(r.node)
        }
    }

    fn run(
        arbiter: &SleepArbiter,
        actors: &mut [Actor],
        player: Option<ActorId>,
        couplings: &Couplings,
        dt: f32,
    ) -> Vec<SimEvent> {
        let mut events = Vec::new();
        let mut refs: Vec<&mut Actor> = actors.iter_mut().collect();
        arbiter.update(&mut refs, player, couplings, &SleepTuning::default(), dt, &mut events);
        events
    }

    #[test]
    fn test_resting_actor_sleeps_after_threshold() {
        let arbiter = SleepArbiter::new();
        let couplings = Couplings::new();
        let mut actors = vec![block(0, 0.0)];
        for _ in 0..9 {
            run(&arbiter, &mut actors, None, &couplings, 0.1);
        }
        assert_eq!(actors[0].state, ActorState::Simulated);
        let events = run(&arbiter, &mut actors, None, &couplings, 0.11);
        assert_eq!(actors[0].state, ActorState::Sleeping);
        assert!(events
            .iter()
            .any(|e| matches!(e, SimEvent::ActorStateChanged { to: ActorState::Sleeping, .. })));
    }

    #[test]
    fn test_player_and_ai_never_sleep() {
        let arbiter = SleepArbiter::new();
        let couplings = Couplings::new();
        let mut actors = vec![block(0, 0.0), block(1, 10.0)];
        actors[1].driveable = crate::definition::DriveableKind::Ai;
        for _ in 0..30 {
            run(&arbiter, &mut actors, Some(ActorId(0)), &couplings, 0.1);
        }
        assert!(actors.iter().all(|a| a.is_simulated()));
    }

    #[test]
    fn test_moving_actor_wakes_neighbour_pile() {
        let arbiter = SleepArbiter::new();
        let couplings = Couplings::new();
        let mut actors = vec![block(0, -5.0), block(1, 0.5), block(2, 1.45)];
        for a in actors.iter_mut() {
            a.state = ActorState::Sleeping;
            a.predicted_aabb = a.aabb;
        }
        // Actor 0 starts moving towards the pile.
        actors[0].state = ActorState::Simulated;
        for n in actors[0].nodes.iter_mut() {
            n.velocity = Vec3::new(10.0, 0.0, 0.0);
        }
        let events = run(&arbiter, &mut actors, None, &couplings, 0.01);
        assert!(actors[1].is_simulated());
        // Actor 2 only touches actor 1, reached through the recursion.
        assert!(actors[2].is_simulated());
        let woken = events
            .iter()
            .filter(|e| matches!(e, SimEvent::ActorStateChanged { to: ActorState::Simulated, .. }))
            .count();
        assert_eq!(woken, 2);
    }

    #[test]
    fn test_distant_sleeper_stays_asleep() {
        let arbiter = SleepArbiter::new();
        let couplings = Couplings::new();
        let mut actors = vec![block(0, 0.0), block(1, 50.0)];
        actors[1].state = ActorState::Sleeping;
        for n in actors[0].nodes.iter_mut() {
            n.velocity = Vec3::new(1.0, 0.0, 0.0);
        }
        run(&arbiter, &mut actors, None, &couplings, 0.01);
        assert_eq!(actors[1].state, ActorState::Sleeping);
        assert!(actors[1].asleep_for > 0.0);
    }

    #[test]
    fn test_coupled_actor_wakes_with_partner() {
        let arbiter = SleepArbiter::new();
        let mut couplings = Couplings::new();
        let mut actors = vec![block(0, 0.0), block(1, 100.0)];
        let mut events = Vec::new();
        let table = Pair(&mut actors);
        couplings
            .attach(
                &table,
                CouplingKind::Rope,
                NodeRef::new(ActorId(0), 1),
                NodeRef::new(ActorId(1), 0),
                CouplingParams::default(),
                &mut events,
            )
            .unwrap();
        actors[1].state = ActorState::Sleeping;
        for n in actors[0].nodes.iter_mut() {
            n.velocity = Vec3::new(1.0, 0.0, 0.0);
        }
        run(&arbiter, &mut actors, None, &couplings, 0.01);
        assert!(actors[1].is_simulated());
    }

    #[test]
    fn test_sleep_preserves_velocities_and_forced_wake() {
        let mut arbiter = SleepArbiter::new();
        let couplings = Couplings::new();
        let mut actors = vec![block(0, 0.0)];
        actors[0].nodes[0].velocity = Vec3::new(0.05, 0.0, 0.0);
        run(&arbiter, &mut actors, None, &couplings, 1.5);
        assert_eq!(actors[0].state, ActorState::Sleeping);

        let mut events = Vec::new();
        let mut refs: Vec<&mut Actor> = actors.iter_mut().collect();
        arbiter.wake_all(&mut refs, &mut events);
        assert_eq!(actors[0].state, ActorState::Simulated);
        assert_eq!(actors[0].nodes[0].velocity, Vec3::new(0.05, 0.0, 0.0));

        run(&arbiter, &mut actors, None, &couplings, 5.0);
        assert!(actors[0].is_simulated());
        arbiter.allow_sleep();
        run(&arbiter, &mut actors, None, &couplings, 1.5);
        assert_eq!(actors[0].state, ActorState::Sleeping);
    }
}
