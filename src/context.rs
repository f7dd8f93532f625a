//! Frame driver tying the actor manager to a `bevy_ecs` world.
//!
//! [`GameContext`] owns the [`ActorManager`], the [`MessageBus`] every
//! collaborator posts requests to, and an ECS [`World`] that mirrors the
//! latest frame for rendering, audio and scripting consumers:
//!
//! - one entity per live actor carrying [`ActorTag`] and [`ActorPose`],
//! - the [`LatestSnapshot`], [`FrameStats`], [`AppState`] and
//!   [`Outbox`] resources,
//! - the frame's [`SimEvent`]s in the `Events<SimEvent>` resource, readable
//!   with an `EventReader<SimEvent>`.
//!
//! ## Frame
//!
//! [`GameContext::frame`] drains the bus into the manager, advances the
//! simulation and then runs the mirror schedule once.

use crate::actor::{ActorId, ActorState};
use crate::bus::{Message, MessageBus};
use crate::config::SimConfig;
use crate::definition::DriveableKind;
use crate::error::PoolError;
use crate::events::SimEvent;
use crate::manager::{ActorManager, ContentProvider};
use crate::math::Aabb;
use crate::net::Packet;
use crate::snapshot::Snapshot;
use bevy_ecs::event::Events;
use bevy_ecs::prelude::*;
use glam::Vec3;
use std::collections::HashMap;
use std::sync::Arc;

/// Top-level application state.
#[derive(Resource, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    MainMenu,
    /// A world is loaded.
    Simulation,
}

/// The snapshot of the last completed frame.
#[derive(Resource, Debug, Clone, Default)]
pub struct LatestSnapshot(pub Arc<Snapshot>);

/// Packets produced by the last frame, waiting for the transport layer.
#[derive(Resource, Debug, Clone, Default)]
pub struct Outbox(pub Vec<Packet>);

#[derive(Resource, Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub frame: u64,
    /// Fixed steps simulated by the reported frame.
    pub steps: u32,
    pub sim_time: f64,
    pub actors: usize,
    /// Actors stepped by the kernel (not asleep, not networked).
    pub simulated: usize,
    pub events: usize,
}

/// Identity of the actor an entity mirrors.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct ActorTag {
    pub id: ActorId,
    pub name: String,
    pub driveable: DriveableKind,
}

/// Mirrored per-frame state of an actor.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct ActorPose {
    pub center: Vec3,
    pub aabb: Aabb,
    pub state: ActorState,
    pub lights: bool,
    pub replaying: bool,
    /// Current gear, for actors with a powertrain.
    pub gear: Option<i32>,
}

impl Default for ActorPose {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            aabb: Aabb::default(),
            state: ActorState::Simulated,
            lights: false,
            replaying: false,
            gear: None,
        }
    }
}

/// Marks the entity of the actor under player control.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct PlayerControlled;

/// Spawns entities for new actors and despawns those of removed ones.
pub fn actor_entity_sync_system(
    mut commands: Commands,
    snapshot: Res<LatestSnapshot>,
    query: Query<(Entity, &ActorTag)>,
) {
    let mut live: HashMap<ActorId, Entity> = HashMap::new();
    for (entity, tag) in query.iter() {
        if snapshot.0.actor(tag.id).is_some_and(|a| a.name == tag.name) {
            live.insert(tag.id, entity);
        } else {
            commands.entity(entity).despawn();
        }
    }
    for actor in &snapshot.0.actors {
        if !live.contains_key(&actor.id) {
            commands.spawn((
                ActorTag { id: actor.id, name: actor.name.clone(), driveable: actor.driveable },
                ActorPose::default(),
            ));
        }
    }
}

/// Copies the snapshot into every actor entity.
pub fn actor_pose_system(
    mut commands: Commands,
    snapshot: Res<LatestSnapshot>,
    mut query: Query<(Entity, &ActorTag, &mut ActorPose, Has<PlayerControlled>)>,
) {
    let player = snapshot.0.player;
    for (entity, tag, mut pose, is_player) in query.iter_mut() {
        let Some(actor) = snapshot.0.actor(tag.id) else {
            continue;
        };
        pose.center = actor.center();
        pose.aabb = actor.aabb;
        pose.state = actor.state;
        pose.lights = actor.lights;
        pose.replaying = actor.replaying;
        pose.gear = actor.gauges.map(|g| g.gear);

        match (player == Some(tag.id), is_player) {
            (true, false) => {
                commands.entity(entity).insert(PlayerControlled);
            }
            (false, true) => {
                commands.entity(entity).remove::<PlayerControlled>();
            }
            _ => {}
        }
    }
}

pub fn frame_stats_system(
    snapshot: Res<LatestSnapshot>,
    events: Res<Events<SimEvent>>,
    mut stats: ResMut<FrameStats>,
) {
    let snapshot = &snapshot.0;
    stats.frame = snapshot.frame;
    stats.sim_time = snapshot.time;
    stats.actors = snapshot.actors.len();
    stats.simulated = snapshot.actors.iter().filter(|a| a.state == ActorState::Simulated).count();
    stats.events = events.iter_current_update_events().count();
}

/// Owns the manager, the bus and the mirror world.
pub struct GameContext {
    manager: ActorManager,
    bus: MessageBus,
    world: World,
    schedule: Schedule,
}

impl GameContext {
    pub fn new(config: SimConfig, content: Arc<dyn ContentProvider>) -> Result<Self, PoolError> {
        let mut world = World::new();
        world.insert_resource(config.clone());
        world.insert_resource(AppState::default());
        world.insert_resource(LatestSnapshot::default());
        world.insert_resource(FrameStats::default());
        world.insert_resource(Outbox::default());
        world.init_resource::<Events<SimEvent>>();

        let mut schedule = Schedule::default();
        schedule.add_systems(
            (actor_entity_sync_system, actor_pose_system, frame_stats_system).chain(),
        );

        Ok(Self {
            manager: ActorManager::new(config, content)?,
            bus: MessageBus::new(),
            world,
            schedule,
        })
    }

    /// Handle for posting requests; clones share the queue.
    pub fn bus(&self) -> MessageBus {
        self.bus.clone()
    }

    pub fn post(&self, message: Message) {
        self.bus.post(message);
    }

    /// Run one rendered frame of `frame_dt` seconds and return its snapshot.
    pub fn frame(&mut self, frame_dt: f32) -> Arc<Snapshot> {
        self.manager.process_messages(&self.bus);
        let output = self.manager.update(frame_dt);
        let state = if self.manager.terrain_name().is_some() {
            AppState::Simulation
        } else {
            AppState::MainMenu
        };

        {
            let mut events = self.world.resource_mut::<Events<SimEvent>>();
            events.update();
            events.send_batch(output.events);
        }
        self.world.resource_mut::<FrameStats>().steps = output.steps;
        self.world.resource_mut::<Outbox>().0.extend(output.packets);
        *self.world.resource_mut::<AppState>() = state;
        *self.world.resource_mut::<SimConfig>() = self.manager.config().clone();
        self.world.insert_resource(LatestSnapshot(Arc::clone(&output.snapshot)));

        self.schedule.run(&mut self.world);
        output.snapshot
    }

    /// Packets queued for the transport layer since the last call.
    pub fn take_packets(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.world.resource_mut::<Outbox>().0)
    }

    /// Events of the last frame.
    pub fn events(&self) -> impl Iterator<Item = &SimEvent> {
        self.world.resource::<Events<SimEvent>>().iter_current_update_events()
    }

    pub fn stats(&self) -> FrameStats {
        *self.world.resource::<FrameStats>()
    }

    pub fn state(&self) -> AppState {
        *self.world.resource::<AppState>()
    }

    /// Entity mirroring `id`, once a frame has run since its spawn.
    pub fn entity_of(&mut self, id: ActorId) -> Option<Entity> {
        let mut query = self.world.query::<(Entity, &ActorTag)>();
        query.iter(&self.world).find(|(_, tag)| tag.id == id).map(|(entity, _)| entity)
    }

    /// Latest snapshot as JSON, for clients outside Rust.
    pub fn snapshot_json(&self) -> String {
        self.world.resource::<LatestSnapshot>().0.to_json().unwrap_or_else(|_| "{}".to_string())
    }

    pub fn manager(&self) -> &ActorManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ActorManager {
        &mut self.manager
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ControlInput;
    use crate::manager::InMemoryContent;
    use crate::spawner::Placement;

    fn context() -> GameContext {
        let config = SimConfig { worker_threads: 2, ..Default::default() };
        GameContext::new(config, Arc::new(InMemoryContent::with_presets())).unwrap()
    }

    fn spawn(name: &str, x: f32) -> Message {
        Message::SpawnLocal {
            name: name.into(),
            section: None,
            placement: Placement::at(Vec3::new(x, 0.0, 0.0)),
        }
    }

    #[test]
    fn test_entities_follow_actor_lifecycle() {
        let mut ctx = context();
        assert_eq!(ctx.state(), AppState::MainMenu);
        ctx.post(Message::LoadWorld { terrain: "flat".into() });
        ctx.post(spawn("truck", -10.0));
        ctx.post(spawn("crate", 10.0));
        ctx.frame(0.05);
        assert_eq!(ctx.state(), AppState::Simulation);
        assert_eq!(ctx.stats().actors, 2);
        assert_eq!(ctx.stats().steps, 100);
        let created = ctx.events().filter(|e| matches!(e, SimEvent::ActorCreated { .. })).count();
        assert_eq!(created, 2);

        let truck = ActorId(0);
        let entity = ctx.entity_of(truck).unwrap();
        let pose = ctx.world().get::<ActorPose>(entity).unwrap();
        assert!(pose.center.x < 0.0);
        assert!(pose.gear.is_some());

        ctx.post(Message::SetPlayerActor(Some(truck)));
        ctx.frame(0.05);
        assert!(ctx.world().get::<PlayerControlled>(entity).is_some());

        ctx.post(Message::RemoveActor(truck));
        ctx.frame(0.05);
        assert!(ctx.entity_of(truck).is_none());
        assert!(ctx.events().any(|e| *e == SimEvent::ActorRemoved { actor: truck }));
        let mut query = ctx.world_mut().query::<&ActorTag>();
        assert_eq!(query.iter(ctx.world()).count(), 1);
    }

    #[test]
    fn test_bus_requests_drive_the_frame() {
        let mut ctx = context();
        let bus = ctx.bus();
        std::thread::spawn(move || {
            bus.post(Message::LoadWorld { terrain: "flat".into() });
            bus.post(spawn("car", 0.0));
            bus.post(Message::Pause);
        })
        .join()
        .unwrap();
        ctx.frame(0.05);
        assert_eq!(ctx.stats().steps, 0);

        ctx.post(Message::Unpause);
        let input = ControlInput { throttle: 0.3, ..Default::default() };
        ctx.post(Message::SetInput { actor: ActorId(0), input });
        ctx.post(Message::NetworkConnect { local: crate::net::PeerId(4) });
        ctx.frame(0.05);
        assert_eq!(ctx.stats().steps, 100);
        let packets = ctx.take_packets();
        assert!(!packets.is_empty());
        assert!(ctx.take_packets().is_empty());
        assert!(ctx.snapshot_json().contains("\"car\""));

        ctx.post(Message::NetworkKick { reason: "idle".into() });
        ctx.frame(0.05);
        assert_eq!(ctx.state(), AppState::MainMenu);
        assert_eq!(ctx.stats().actors, 0);
    }
}
