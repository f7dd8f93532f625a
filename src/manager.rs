//! The actor manager (C11).
//!
//! [`ActorManager`] owns every live actor and drives the frame:
//!
//! 1. the caller drains the [`MessageBus`](crate::bus::MessageBus) into
//!    [`ActorManager::handle`], which runs spawn/remove/save/load/network
//!    requests on the main thread,
//! 2. [`ActorManager::update`] joins the previous simulation task, turns the
//!    frame delta into fixed steps, interpolates networked actors, runs AI
//!    drivers and replays, then
//! 3. hands the [`SimCore`] (slots, couplings, sleep arbiter) to the worker
//!    pool. Per step: all actor kernels in parallel, the coupling phase, then
//!    inter-actor contact in disjoint parallel batches.
//! 4. When the core comes back the frame is composed into a [`Snapshot`] and
//!    outgoing network packets.
//!
//! With `async_physics` the simulation task stays in flight across the frame
//! boundary and `update` returns the previous frame's output. Every
//! operation that needs actor state joins the task first, so at most one
//! simulation is ever in flight.

use crate::actor::{Actor, ActorId, ActorState, ControlInput, Ownership, StepContext};
use crate::ai::AiView;
use crate::clock::{step_seconds, FrameClock};
use crate::components::Node;
use crate::config::{NetTuning, SimConfig};
use crate::contact::{batches, overlapping_pairs, resolve_pair, ContactStats};
use crate::couplings::{CouplingId, CouplingKind, CouplingParams, Couplings, NodeAccess, NodeRef};
use crate::definition::{ActorDef, DriveableKind};
use crate::error::{CodecError, PoolError, SavegameError, SpawnError, TaskPanic};
use crate::events::SimEvent;
use crate::ground::{FlatTerrain, GroundModel, Terrain};
use crate::math::Aabb;
use crate::net::{
    ChatPayload, InterpolationBuffer, NetSnapshot, Packet, PacketHeader, PacketKind, PeerClock,
    PeerId, RegisterPayload, RegisterResultPayload, RemoteGauges, StateUpdatePayload, StreamId,
    REGISTER_MISMATCH, REGISTER_OK,
};
use crate::powertrain::PowertrainCommand;
use crate::presets::{self, PRESET_NAMES};
use crate::profiler::Profiler;
use crate::savegame::{SavedActor, SavedCoupling, Savegame};
use crate::sleep::{self, SleepArbiter};
use crate::snapshot::{ActorSnapshot, Snapshot};
use crate::spawner::{build_actor, Placement};
use crate::worker_pool::{TaskHandle, WorkerPool};
use crate::bus::{Message, MessageBus};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Source of actor definitions and terrains (the content layer).
pub trait ContentProvider: Send + Sync {
    fn definition(&self, name: &str) -> Option<ActorDef>;
    fn terrain(&self, name: &str) -> Option<Arc<dyn Terrain>>;
}

/// Content kept in memory, keyed by name.
#[derive(Default)]
pub struct InMemoryContent {
    definitions: HashMap<String, ActorDef>,
    terrains: HashMap<String, Arc<dyn Terrain>>,
}

impl InMemoryContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every procedural preset plus a flat world (`flat`) and open water
    /// over a deep floor (`sea`).
    pub fn with_presets() -> Self {
        let mut content = Self::new();
        for name in PRESET_NAMES {
            if let Some(def) = presets::by_name(name) {
                content.definitions.insert(def.name.clone(), def);
            }
        }
        let mut sea = FlatTerrain::new("sea").with_water(0.0);
        sea.height = -20.0;
        content.with_terrain(FlatTerrain::new("flat")).with_terrain(sea)
    }

    pub fn with_definition(mut self, def: ActorDef) -> Self {
        self.definitions.insert(def.name.clone(), def);
        self
    }

    pub fn with_terrain(mut self, terrain: impl Terrain + 'static) -> Self {
        self.terrains.insert(terrain.name().to_string(), Arc::new(terrain));
        self
    }
}

impl ContentProvider for InMemoryContent {
    fn definition(&self, name: &str) -> Option<ActorDef> {
        self.definitions.get(name).cloned()
    }

    fn terrain(&self, name: &str) -> Option<Arc<dyn Terrain>> {
        self.terrains.get(name).cloned()
    }
}

enum Slot {
    Free,
    Occupied(Box<Actor>),
    /// Removed; not handed out again until the slots are reclaimed.
    Vacated,
}

impl Slot {
    fn actor(&self) -> Option<&Actor> {
        match self {
            Slot::Occupied(actor) => Some(actor),
            _ => None,
        }
    }

    fn actor_mut(&mut self) -> Option<&mut Actor> {
        match self {
            Slot::Occupied(actor) => Some(actor.as_mut()),
            _ => None,
        }
    }
}

/// Actor slots indexed by [`ActorId`].
#[derive(Default)]
struct Slots {
    items: Vec<Slot>,
}

impl Slots {
    fn get(&self, id: ActorId) -> Option<&Actor> {
        self.items.get(id.0 as usize)?.actor()
    }

    fn get_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.items.get_mut(id.0 as usize)?.actor_mut()
    }

    fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.items.iter().filter_map(Slot::actor)
    }

    fn actors_mut(&mut self) -> impl Iterator<Item = &mut Actor> {
        self.items.iter_mut().filter_map(Slot::actor_mut)
    }

    fn indexed_mut(&mut self) -> impl Iterator<Item = (usize, &mut Actor)> {
        self.items.iter_mut().enumerate().filter_map(|(i, slot)| slot.actor_mut().map(|a| (i, a)))
    }

    fn ids(&self) -> Vec<ActorId> {
        self.actors().map(|a| a.id).collect()
    }

    /// Pick a slot for a new actor: a free one or a new one below `max`.
    /// Vacated slots stay out of reach until [`Slots::reclaim`].
    fn allocate(&mut self, max: usize) -> Option<ActorId> {
        if let Some(i) = self.items.iter().position(|s| matches!(s, Slot::Free)) {
            return Some(ActorId(i as u32));
        }
        if self.items.len() < max {
            self.items.push(Slot::Free);
            return Some(ActorId((self.items.len() - 1) as u32));
        }
        None
    }

    fn place(&mut self, actor: Actor) {
        if let Some(slot) = self.items.get_mut(actor.id.0 as usize) {
            *slot = Slot::Occupied(Box::new(actor));
        }
    }

    fn vacate(&mut self, id: ActorId) -> Option<Box<Actor>> {
        let slot = self.items.get_mut(id.0 as usize)?;
        if !matches!(slot, Slot::Occupied(_)) {
            return None;
        }
        match std::mem::replace(slot, Slot::Vacated) {
            Slot::Occupied(actor) => Some(actor),
            _ => None,
        }
    }

    fn reclaim(&mut self) {
        for slot in self.items.iter_mut() {
            if matches!(slot, Slot::Vacated) {
                *slot = Slot::Free;
            }
        }
        while matches!(self.items.last(), Some(Slot::Free)) {
            self.items.pop();
        }
    }
}

impl NodeAccess for Slots {
    fn node(&self, at: NodeRef) -> Option<&Node> {
        self.get(at.actor)?.nodes.get(at.node)
    }

    fn node_mut(&mut self, at: NodeRef) -> Option<&mut Node> {
        self.get_mut(at.actor)?.nodes.get_mut(at.node)
    }
}

/// Two actors whose boxes overlap, resolved by one worker.
struct PairContact<'a> {
    a: &'a mut Actor,
    b: &'a mut Actor,
    stats: ContactStats,
}

/// Networked actors take part in contact once they have received state.
fn takes_part_in_contact(actor: &Actor) -> bool {
    if actor.disable_inter_collision {
        return false;
    }
    match actor.state {
        ActorState::Simulated => true,
        ActorState::Networked => actor.net_buffer.as_ref().is_some_and(|b| !b.is_empty()),
        _ => false,
    }
}

/// Everything the simulation task needs. Moved into the task for the
/// duration of a frame and handed back when it is joined.
struct SimCore {
    config: SimConfig,
    terrain: Option<Arc<dyn Terrain>>,
    /// Contact material when the terrain does not define an actor's one.
    fallback_material: GroundModel,
    slots: Slots,
    couplings: Couplings,
    pool: Arc<WorkerPool>,
    sleep: SleepArbiter,
    sim_time: f64,
    events: Vec<SimEvent>,
    profiler: Option<Profiler>,
}

impl SimCore {
    fn new(config: SimConfig, pool: Arc<WorkerPool>) -> Self {
        Self {
            config,
            terrain: None,
            fallback_material: GroundModel::metal(),
            slots: Slots::default(),
            couplings: Couplings::new(),
            pool,
            sleep: SleepArbiter::new(),
            sim_time: 0.0,
            events: Vec::new(),
            profiler: cfg!(feature = "profile").then(Profiler::new),
        }
    }

    fn record(&mut self, phase: &'static str, started: Instant) {
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record(phase, started.elapsed());
        }
    }

    /// Main-thread housekeeping before the steps: network interpolation,
    /// replays, AI drivers, brake forwarding and wake-on-input.
    fn prepare_frame(&mut self, frame_time: f64) {
        let delay = f64::from(self.config.net.interpolation_delay);
        let render_time = self.sim_time + frame_time - delay;

        let forwarded: Vec<(ActorId, f32, bool)> = self
            .slots
            .actors()
            .filter(|a| a.is_local())
            .flat_map(|a| {
                let (brake, parking) = (a.input.brake, a.input.parking_brake);
                self.couplings.towed_by(a.id).map(move |t| (t, brake, parking))
            })
            .collect();

        for actor in self.slots.actors_mut() {
            match actor.state {
                ActorState::Networked => interpolate(actor, render_time),
                ActorState::Simulated | ActorState::Sleeping if actor.replaying => {
                    if let Some(replay) = actor.replay.as_ref() {
                        replay.apply(&mut actor.nodes, &mut actor.beams);
                    }
                    actor.rebuild_contact_index();
                    actor.update_bounds();
                }
                ActorState::Simulated if actor.is_local() => drive_ai(actor),
                _ => {}
            }
        }

        for (id, brake, parking_brake) in forwarded {
            if let Some(towed) = self.slots.get_mut(id) {
                towed.input.brake = brake;
                towed.input.parking_brake = parking_brake;
            }
        }

        for actor in self.slots.actors_mut() {
            if actor.state == ActorState::Sleeping && actor.input.is_active() {
                sleep::wake(actor, &mut self.events);
            }
        }
    }

    /// Run `steps` fixed steps and the end-of-frame phases. A panic is
    /// turned into a [`SimEvent::TaskFailed`].
    fn run_frame(&mut self, steps: u32, player: Option<ActorId>) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.simulate(steps, player)));
        if outcome.is_err() {
            error!(steps, "simulation frame panicked");
            self.events.push(SimEvent::TaskFailed { phase: "frame".into() });
        }
    }

    fn simulate(&mut self, steps: u32, player: Option<ActorId>) {
        let h = step_seconds(&self.config);
        let dt = self.config.fixed_dt;
        let mut touching = HashSet::new();

        if let Some(terrain) = self.terrain.clone() {
            for _ in 0..steps {
                let started = Instant::now();
                if let Err(panic) = self.step_actors(&*terrain, dt) {
                    error!(message = %panic.0, "actor step failed");
                    self.events.push(SimEvent::TaskFailed { phase: "actors".into() });
                    break;
                }
                self.record("actors", started);

                let started = Instant::now();
                self.couplings.resolve(&mut self.slots, dt, &mut self.events);
                self.record("couplings", started);

                let started = Instant::now();
                if let Err(panic) = self.resolve_contacts(&*terrain, dt, &mut touching) {
                    error!(message = %panic.0, "inter-actor contact failed");
                    self.events.push(SimEvent::TaskFailed { phase: "contacts".into() });
                    break;
                }
                self.record("contacts", started);

                self.sim_time += h;
            }
        }

        for actor in self.slots.actors_mut() {
            self.events.append(&mut actor.events);
        }

        let started = Instant::now();
        let frame_dt = (f64::from(steps) * h) as f32;
        let mut local: Vec<&mut Actor> = self.slots.actors_mut().filter(|a| a.is_local()).collect();
        self.sleep.update(
            &mut local,
            player,
            &self.couplings,
            &self.config.sleep,
            frame_dt,
            &mut self.events,
        );
        self.record("sleep", started);

        for actor in self.slots.actors_mut() {
            if !actor.is_simulated() || actor.replaying {
                for node in actor.nodes.iter_mut() {
                    node.external_force = glam::Vec3::ZERO;
                }
            }
            actor.publish();
        }
    }

    fn step_actors(&mut self, terrain: &dyn Terrain, dt: f32) -> Result<(), TaskPanic> {
        let ctx = StepContext {
            config: &self.config,
            terrain,
            fallback_material: &self.fallback_material,
            dt,
        };
        let mut batch: Vec<&mut Actor> =
            self.slots.actors_mut().filter(|a| a.is_simulated() && !a.replaying).collect();
        self.pool.parallelize(&mut batch, |actor| {
            actor.step(&ctx);
            if let Some(replay) = actor.replay.as_mut() {
                replay.record(dt, &actor.nodes, &actor.beams);
            }
        })
    }

    /// Inter-actor contact. Pairs are split into batches in which no actor
    /// appears twice; each batch runs in parallel.
    fn resolve_contacts(
        &mut self,
        terrain: &dyn Terrain,
        dt: f32,
        touching: &mut HashSet<(ActorId, ActorId)>,
    ) -> Result<(), TaskPanic> {
        let mut boxes: Vec<(usize, Aabb)> = Vec::new();
        let mut simulated = HashSet::new();
        for actor in self.slots.actors().filter(|a| takes_part_in_contact(a)) {
            boxes.push((actor.id.0 as usize, actor.contact_aabb()));
            if actor.is_simulated() {
                simulated.insert(actor.id.0 as usize);
            }
        }
        if boxes.len() < 2 {
            return Ok(());
        }
        let pairs: Vec<(usize, usize)> = overlapping_pairs(&boxes, 0.0)
            .into_iter()
            .filter(|(a, b)| simulated.contains(a) || simulated.contains(b))
            .collect();

        let fallback = &self.fallback_material;
        for batch in batches(&pairs) {
            let mut by_slot: HashMap<usize, &mut Actor> = self.slots.indexed_mut().collect();
            let mut work: Vec<PairContact<'_>> = batch
                .iter()
                .filter_map(|(i, j)| {
                    let a = by_slot.remove(i)?;
                    let b = by_slot.remove(j)?;
                    Some(PairContact { a, b, stats: ContactStats::default() })
                })
                .collect();
            self.pool.parallelize(&mut work, |pair| {
                if !pair.a.overlaps(&*pair.b) {
                    return;
                }
                let model = terrain.material(&pair.a.submesh_material).unwrap_or(fallback);
                pair.stats =
                    resolve_pair(&mut pair.a.contact_body(), &mut pair.b.contact_body(), model, dt);
            })?;
            for pair in &work {
                let key = (pair.a.id, pair.b.id);
                if pair.stats.contacts > 0 && touching.insert(key) {
                    self.events.push(SimEvent::ActorContact { a: key.0, b: key.1 });
                }
            }
        }
        Ok(())
    }

    /// State updates of local actors whose network timer elapsed.
    fn state_updates(
        &mut self,
        peer: PeerId,
        frame_dt: f32,
        net: &NetTuning,
        out: &mut Vec<Packet>,
    ) {
        let time = self.sim_time;
        for actor in self.slots.actors_mut().filter(|a| a.is_local()) {
            let interval = match actor.state {
                ActorState::Simulated => net.send_interval,
                ActorState::Sleeping if actor.asleep_for < net.sleeping_fast_window => {
                    net.send_interval
                }
                ActorState::Sleeping => net.sleeping_interval,
                _ => continue,
            };
            actor.net_timer += frame_dt;
            if actor.net_timer < interval {
                continue;
            }
            actor.net_timer = 0.0;
            let payload = state_update(actor, time);
            match Packet::new(peer, StreamId(actor.id.0), PacketKind::StateUpdate, &payload) {
                Ok(packet) => out.push(packet),
                Err(err) => warn!(actor = actor.id.0, %err, "state update not encoded"),
            }
        }
    }

    fn snapshot(&self, frame: u64, player: Option<ActorId>, events: Vec<SimEvent>) -> Snapshot {
        Snapshot {
            frame,
            time: self.sim_time,
            player,
            actors: self
                .slots
                .actors()
                .filter(|a| a.state != ActorState::Invalid)
                .map(ActorSnapshot::capture)
                .collect(),
            events,
        }
    }
}

fn state_update(actor: &Actor, time: f64) -> StateUpdatePayload {
    let reference = actor.reference_position();
    StateUpdatePayload {
        time,
        reference,
        nodes: actor.nodes.iter().map(|n| n.position - reference).collect(),
        gauges: actor.powertrain.as_ref().map(|p| {
            let g = p.gauges();
            RemoteGauges {
                rpm: g.rpm,
                throttle: g.throttle,
                clutch: g.clutch,
                gear: g.gear,
                running: g.running,
                contact: g.contact,
                mode: g.mode,
            }
        }),
        wheel_spin: actor.wheels.iter().map(|w| w.omega).collect(),
        lights: actor.lights,
    }
}

/// Drive a networked actor from its received snapshots.
fn interpolate(actor: &mut Actor, render_time: f64) {
    let Some(buffer) = actor.net_buffer.as_mut() else {
        return;
    };
    let Some(sample) = buffer.sample(render_time) else {
        return;
    };
    let latest = buffer.latest().map(|s| (s.gauges, s.wheel_spin.clone(), s.lights));
    buffer.prune_before(render_time);
    if sample.positions.len() != actor.nodes.len() {
        return;
    }
    let samples = sample.positions.iter().zip(&sample.velocities);
    for (node, (&position, &velocity)) in actor.nodes.iter_mut().zip(samples) {
        node.position = position;
        node.prev_position = position;
        node.velocity = velocity;
        node.force = glam::Vec3::ZERO;
    }
    if let Some((gauges, spin, lights)) = latest {
        if let (Some(pt), Some(g)) = (actor.powertrain.as_mut(), gauges) {
            pt.apply_remote(g.rpm, g.throttle, g.clutch, g.gear, g.running, g.contact, g.mode);
        }
        for (wheel, omega) in actor.wheels.iter_mut().zip(spin) {
            wheel.omega = omega;
        }
        if actor.lights != lights {
            actor.toggle_lights();
        }
    }
    actor.rebuild_contact_index();
    actor.update_bounds();
}

fn drive_ai(actor: &mut Actor) {
    let Some(mut ai) = actor.ai.take() else {
        return;
    };
    if ai.enabled {
        let view = AiView {
            position: actor.reference_position(),
            forward: actor.forward(),
            speed: actor.velocity().length(),
            engine_running: actor.powertrain.as_ref().is_some_and(|p| p.gauges().running),
            has_engine: actor.powertrain.is_some(),
            is_boat: actor.driveable == DriveableKind::Boat,
        };
        let command = ai.update(&view);
        actor.input.throttle = command.throttle;
        actor.input.brake = command.brake;
        actor.input.steering = command.steering;
        actor.input.parking_brake = command.parking_brake;
        if command.start_engine {
            if let Some(pt) = actor.powertrain.as_ref() {
                pt.push_command(PowertrainCommand::QuickStart);
            }
        }
        if command.toggle_lights {
            actor.toggle_lights();
        }
    }
    actor.ai = Some(ai);
}

fn register_packet(peer: PeerId, actor: &Actor, time: f64) -> Result<Packet, CodecError> {
    let payload =
        RegisterPayload { name: actor.name.clone(), section: actor.section.clone(), time };
    Packet::new(peer, StreamId(actor.id.0), PacketKind::Register, &payload)
}

/// Result of one [`ActorManager::update`].
#[derive(Debug, Clone)]
pub struct FrameOutput {
    /// Fixed steps the reported frame simulated.
    pub steps: u32,
    pub snapshot: Arc<Snapshot>,
    pub events: Vec<SimEvent>,
    /// Packets for the transport layer, in order.
    pub packets: Vec<Packet>,
}

pub struct ActorManager {
    core: Option<Box<SimCore>>,
    in_flight: Option<TaskHandle<Box<SimCore>>>,
    /// Steps of a joined frame whose output was not reported yet.
    unreported: Option<u32>,
    pool: Arc<WorkerPool>,
    config: SimConfig,
    content: Arc<dyn ContentProvider>,
    clock: FrameClock,
    paused: bool,
    frame: u64,
    player: Option<ActorId>,
    prev_player: Option<ActorId>,
    local_peer: Option<PeerId>,
    streams: HashMap<(PeerId, StreamId), ActorId>,
    peer_clocks: HashMap<PeerId, PeerClock>,
    /// Streams of each peer whose definition could not be loaded here.
    mismatches: HashMap<PeerId, HashSet<StreamId>>,
    outgoing: Vec<Packet>,
    snapshot: Arc<Snapshot>,
}

impl ActorManager {
    pub fn new(config: SimConfig, content: Arc<dyn ContentProvider>) -> Result<Self, PoolError> {
        let pool = Arc::new(WorkerPool::new(config.resolved_worker_threads())?);
        let core = SimCore::new(config.clone(), Arc::clone(&pool));
        Ok(Self {
            core: Some(Box::new(core)),
            in_flight: None,
            unreported: None,
            pool,
            config,
            content,
            clock: FrameClock::default(),
            paused: false,
            frame: 0,
            player: None,
            prev_player: None,
            local_peer: None,
            streams: HashMap::new(),
            peer_clocks: HashMap::new(),
            mismatches: HashMap::new(),
            outgoing: Vec::new(),
            snapshot: Arc::new(Snapshot::default()),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.threads()
    }

    /// Join the simulation task if one is in flight.
    pub fn sync(&mut self) {
        let Some(handle) = self.in_flight.take() else {
            return;
        };
        match handle.join() {
            Ok(core) => self.core = Some(core),
            Err(panic) => {
                error!(message = %panic.0, "simulation task lost; world state reset");
                let mut core = SimCore::new(self.config.clone(), Arc::clone(&self.pool));
                core.events.push(SimEvent::TaskFailed { phase: "frame".into() });
                self.core = Some(Box::new(core));
            }
        }
    }

    fn core_mut(&mut self) -> &mut SimCore {
        self.sync();
        let (config, pool) = (&self.config, &self.pool);
        self.core.get_or_insert_with(|| Box::new(SimCore::new(config.clone(), Arc::clone(pool))))
    }

    fn emit(&mut self, event: SimEvent) {
        self.core_mut().events.push(event);
    }

    /// Advance the simulation by one rendered frame of `frame_dt` seconds.
    pub fn update(&mut self, frame_dt: f32) -> FrameOutput {
        self.sync();
        let finished = self.unreported.take().map(|steps| self.complete_frame(steps));

        let steps = if self.paused { 0 } else { self.clock.advance(frame_dt, &self.config) };
        let frame_time = f64::from(steps) * step_seconds(&self.config);
        let player = self.player;
        self.core_mut().prepare_frame(frame_time);

        if self.config.async_physics {
            let mut core = match self.core.take() {
                Some(core) => core,
                None => Box::new(SimCore::new(self.config.clone(), Arc::clone(&self.pool))),
            };
            self.in_flight = Some(self.pool.run_task(move || {
                core.run_frame(steps, player);
                core
            }));
            self.unreported = Some(steps);
            finished.unwrap_or_else(|| FrameOutput {
                steps: 0,
                snapshot: Arc::clone(&self.snapshot),
                events: Vec::new(),
                packets: std::mem::take(&mut self.outgoing),
            })
        } else {
            self.core_mut().run_frame(steps, player);
            self.complete_frame(steps)
        }
    }

    fn complete_frame(&mut self, steps: u32) -> FrameOutput {
        let frame_dt = (f64::from(steps) * step_seconds(&self.config)) as f32;
        let local_peer = self.local_peer;
        let net = self.config.net.clone();
        self.frame += 1;
        let (frame, player) = (self.frame, self.player);

        let core = self.core_mut();
        let mut packets = Vec::new();
        if let Some(peer) = local_peer {
            core.state_updates(peer, frame_dt, &net, &mut packets);
        }
        let events = std::mem::take(&mut core.events);
        let snapshot = Arc::new(core.snapshot(frame, player, events.clone()));
        if let Some(profiler) = core.profiler.as_mut() {
            profiler.end_frame();
        }

        self.snapshot = Arc::clone(&snapshot);
        let mut out = std::mem::take(&mut self.outgoing);
        out.append(&mut packets);
        FrameOutput { steps, snapshot, events, packets: out }
    }

    /// Publish the current state without stepping (after a load).
    fn publish_now(&mut self) {
        let (frame, player) = (self.frame, self.player);
        let core = self.core_mut();
        self.snapshot = Arc::new(core.snapshot(frame, player, Vec::new()));
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Per-phase timings, when profiling is on.
    pub fn profiler(&mut self) -> Option<&Profiler> {
        self.core_mut().profiler.as_ref()
    }

    pub fn enable_profiling(&mut self) {
        let core = self.core_mut();
        core.profiler.get_or_insert_with(Profiler::new);
    }

    /// Read an actor. `None` while a simulation task is in flight.
    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.core.as_ref()?.slots.get(id)
    }

    /// Mutable access to an actor; joins the simulation task first.
    pub fn actor_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.core_mut().slots.get_mut(id)
    }

    pub fn actor_ids(&mut self) -> Vec<ActorId> {
        self.core_mut().slots.ids()
    }

    pub fn actor_count(&mut self) -> usize {
        self.core_mut().slots.actors().count()
    }

    pub fn couplings(&mut self) -> &Couplings {
        &self.core_mut().couplings
    }

    pub fn sim_time(&self) -> f64 {
        self.core.as_ref().map_or(self.snapshot.time, |c| c.sim_time)
    }

    pub fn terrain_name(&mut self) -> Option<String> {
        self.core_mut().terrain.as_ref().map(|t| t.name().to_string())
    }

    pub fn player(&self) -> Option<ActorId> {
        self.player
    }

    pub fn previous_player(&self) -> Option<ActorId> {
        self.prev_player
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn local_peer(&self) -> Option<PeerId> {
        self.local_peer
    }

    /// Streams of `peer` currently marked as mismatched.
    pub fn mismatched_streams(&self, peer: PeerId) -> usize {
        self.mismatches.get(&peer).map_or(0, HashSet::len)
    }

    /// Execute every message posted to `bus` so far.
    pub fn process_messages(&mut self, bus: &MessageBus) {
        for message in bus.drain() {
            self.handle(message);
        }
    }

    /// Execute one request on the main thread. Failures are reported as
    /// events.
    pub fn handle(&mut self, message: Message) {
        match message {
            Message::SpawnLocal { name, section, placement } => {
                let _ = self.spawn_by_name(&name, section.as_deref(), placement);
            }
            Message::SpawnNetworked { name, section, peer, stream } => {
                let _ = self.spawn_networked(&name, section.as_deref(), peer, stream);
            }
            Message::RemoveActor(id) => {
                self.remove_actor(id);
            }
            Message::ReclaimSlots => self.reclaim_slots(),
            Message::SetPlayerActor(id) => {
                self.set_player_actor(id);
            }
            Message::NextVehicle => {
                self.next_vehicle();
            }
            Message::PreviousVehicle => {
                self.previous_vehicle();
            }
            Message::ForceWakeAll => self.force_wake_all(),
            Message::AllowSleep => self.allow_sleep(),
            Message::Pause => self.pause(true),
            Message::Unpause => self.pause(false),
            Message::SetSimSpeed(speed) => self.set_sim_speed(speed),
            Message::SaveState { path } => {
                let _ = self.save_to(&path);
            }
            Message::LoadState { path } => {
                let _ = self.load_from(&path);
            }
            Message::LoadWorld { terrain } => {
                if let Err(err) = self.load_world(&terrain) {
                    warn!(%terrain, %err, "world not loaded");
                    let text = format!("could not load terrain '{terrain}'");
                    self.emit(SimEvent::UserMessage { text });
                }
            }
            Message::UnloadWorld => self.unload_world(),
            Message::SetInput { actor, input } => {
                self.set_input(actor, input);
            }
            Message::Powertrain { actor, command } => {
                self.powertrain_command(actor, command);
            }
            Message::ToggleLights(actor) => {
                self.toggle_lights(actor);
            }
            Message::ToggleAxleMode { actor, axle } => {
                self.toggle_axle_mode(actor, axle);
            }
            Message::Attach { kind, a, b, params } => {
                self.attach(kind, a, b, params);
            }
            Message::Detach(id) => {
                self.detach(id);
            }
            Message::StartReplay(actor) => {
                self.start_replay(actor);
            }
            Message::SeekReplay { actor, offset } => {
                self.seek_replay(actor, offset);
            }
            Message::StopReplay(actor) => {
                self.stop_replay(actor);
            }
            Message::NetworkConnect { local } => self.network_connect(local),
            Message::NetworkDisconnect { reason } => self.network_disconnect(&reason),
            Message::NetworkRecvError { reason } => self.network_recv_error(&reason),
            Message::NetworkKick { reason } => self.network_kick(&reason),
            Message::NetPacket(packet) => {
                if let Err(err) = self.receive_packet(&packet) {
                    warn!(peer = packet.header.source.0, %err, "packet dropped");
                }
            }
        }
    }

    // Lifecycle

    /// Spawn a locally simulated actor from `def`.
    pub fn spawn_local(
        &mut self,
        def: &ActorDef,
        section: Option<&str>,
        placement: Placement,
    ) -> Result<ActorId, SpawnError> {
        let result = self.try_spawn_local(def, section, placement);
        if let Err(err) = &result {
            warn!(name = %def.name, %err, "spawn failed");
            self.emit(SimEvent::SpawnFailed { name: def.name.clone(), reason: err.to_string() });
        }
        result
    }

    /// Spawn a preset or content definition by name.
    pub fn spawn_by_name(
        &mut self,
        name: &str,
        section: Option<&str>,
        placement: Placement,
    ) -> Result<ActorId, SpawnError> {
        match self.content.definition(name) {
            Some(def) => self.spawn_local(&def, section, placement),
            None => {
                let err = SpawnError::ContentMissing(name.to_string());
                warn!(name, %err, "spawn failed");
                self.emit(SimEvent::SpawnFailed {
                    name: name.to_string(),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn try_spawn_local(
        &mut self,
        def: &ActorDef,
        section: Option<&str>,
        placement: Placement,
    ) -> Result<ActorId, SpawnError> {
        let max = self.config.max_actors;
        let core = self.core_mut();
        let terrain = core.terrain.clone().ok_or(SpawnError::NoWorld)?;
        let id = core.slots.allocate(max).ok_or(SpawnError::NoFreeSlot(max))?;
        let actor = build_actor(id, def, section, placement, &core.config, Some(&*terrain))?;
        let time = core.sim_time;
        let register = self.local_peer.map(|peer| register_packet(peer, &actor, time));

        let core = self.core_mut();
        core.slots.place(actor);
        core.events.push(SimEvent::ActorCreated { actor: id });
        info!(actor = id.0, name = %def.name, "actor spawned");

        match register {
            Some(Ok(packet)) => self.outgoing.push(packet),
            Some(Err(err)) => warn!(actor = id.0, %err, "register packet not encoded"),
            None => {}
        }
        Ok(id)
    }

    /// Bind a remote stream to a new networked actor. When the definition
    /// is not available here the slot holds an invalid placeholder, the
    /// stream is recorded as mismatched and the peer is told so.
    pub fn spawn_networked(
        &mut self,
        name: &str,
        section: Option<&str>,
        peer: PeerId,
        stream: StreamId,
    ) -> Result<ActorId, SpawnError> {
        if let Some(&old) = self.streams.get(&(peer, stream)) {
            self.remove_actor(old);
        }
        let def = self.content.definition(name);
        let max = self.config.max_actors;
        let core = self.core_mut();
        let Some(id) = core.slots.allocate(max) else {
            warn!(peer = peer.0, stream = stream.0, "no slot for networked actor");
            self.reply_register(stream, REGISTER_MISMATCH);
            return Err(SpawnError::NoFreeSlot(max));
        };
        let built = match def {
            Some(def) => build_actor(
                id,
                &def,
                section,
                Placement::default(),
                &core.config,
                core.terrain.as_deref(),
            ),
            None => Err(SpawnError::ContentMissing(name.to_string())),
        };
        let ownership = Ownership::Remote { peer, stream };
        let status = match built {
            Ok(mut actor) => {
                actor.state = ActorState::Networked;
                actor.ownership = ownership;
                actor.ai = None;
                actor.replay = None;
                actor.net_buffer = Some(InterpolationBuffer::new(core.config.net.buffer_capacity));
                core.slots.place(actor);
                core.events.push(SimEvent::ActorCreated { actor: id });
                info!(
                    actor = id.0,
                    peer = peer.0,
                    stream = stream.0,
                    name,
                    "networked actor spawned"
                );
                REGISTER_OK
            }
            Err(err) => {
                warn!(peer = peer.0, stream = stream.0, name, %err, "networked actor mismatch");
                let mut placeholder = Actor::new(id, name, Vec::new(), Vec::new());
                placeholder.state = ActorState::Invalid;
                placeholder.ownership = ownership;
                core.slots.place(placeholder);
                core.events.push(SimEvent::StreamMismatch { peer, stream });
                REGISTER_MISMATCH
            }
        };
        self.streams.insert((peer, stream), id);
        if status == REGISTER_MISMATCH {
            self.mismatches.entry(peer).or_default().insert(stream);
        }
        self.reply_register(stream, status);
        Ok(id)
    }

    fn reply_register(&mut self, stream: StreamId, status: i32) {
        let Some(local) = self.local_peer else {
            return;
        };
        let payload = RegisterResultPayload { status };
        match Packet::new(local, stream, PacketKind::RegisterResult, &payload) {
            Ok(packet) => self.outgoing.push(packet),
            Err(err) => warn!(%err, "register result not encoded"),
        }
    }

    /// Destroy an actor. Local actors are unregistered from the session;
    /// a peer's clock offset is dropped with its last actor.
    pub fn remove_actor(&mut self, id: ActorId) -> bool {
        let core = self.core_mut();
        let Some(actor) = core.slots.vacate(id) else {
            return false;
        };
        core.couplings.remove_actor(id, &mut core.events);
        core.events.push(SimEvent::ActorRemoved { actor: id });
        info!(actor = id.0, name = %actor.name, "actor removed");

        match actor.ownership {
            Ownership::Local => {
                if let Some(peer) = self.local_peer {
                    self.outgoing.push(Packet::bare(peer, StreamId(id.0), PacketKind::Unregister));
                }
            }
            Ownership::Remote { peer, stream } => {
                self.streams.remove(&(peer, stream));
                if !self.streams.keys().any(|(p, _)| *p == peer) {
                    self.peer_clocks.remove(&peer);
                }
            }
        }

        if self.prev_player == Some(id) {
            self.prev_player = None;
        }
        if self.player == Some(id) {
            self.player = None;
            self.emit(SimEvent::PlayerActorChanged { previous: Some(id), current: None });
        }
        true
    }

    /// Remove every actor of `peer` and forget its mismatch records.
    pub fn remove_peer(&mut self, peer: PeerId) -> usize {
        let mut ids: Vec<ActorId> =
            self.streams.iter().filter(|((p, _), _)| *p == peer).map(|(_, &id)| id).collect();
        ids.sort();
        for &id in &ids {
            self.remove_actor(id);
        }
        self.mismatches.remove(&peer);
        self.peer_clocks.remove(&peer);
        info!(peer = peer.0, actors = ids.len(), "peer removed");
        ids.len()
    }

    /// Make the slots of removed actors available again.
    pub fn reclaim_slots(&mut self) {
        self.core_mut().slots.reclaim();
    }

    // Player and sleep

    /// Hand control to `id` (or nobody). Only local, live actors qualify.
    pub fn set_player_actor(&mut self, id: Option<ActorId>) -> bool {
        if let Some(id) = id {
            let eligible = self
                .core_mut()
                .slots
                .get(id)
                .is_some_and(|a| {
                    a.is_local() && matches!(a.state, ActorState::Simulated | ActorState::Sleeping)
                });
            if !eligible {
                return false;
            }
        }
        if id == self.player {
            return true;
        }
        let previous = self.player;
        self.prev_player = previous;
        self.player = id;
        let core = self.core_mut();
        if let Some(actor) = id.and_then(|id| core.slots.get_mut(id)) {
            sleep::wake(actor, &mut core.events);
        }
        core.events.push(SimEvent::PlayerActorChanged { previous, current: id });
        info!(
            previous = ?previous.map(|a| a.0),
            current = ?id.map(|a| a.0),
            "player actor changed"
        );
        true
    }

    pub fn next_vehicle(&mut self) -> Option<ActorId> {
        self.cycle_vehicle(true)
    }

    pub fn previous_vehicle(&mut self) -> Option<ActorId> {
        self.cycle_vehicle(false)
    }

    fn cycle_vehicle(&mut self, forward: bool) -> Option<ActorId> {
        let current = self.player;
        let candidates: Vec<ActorId> = self
            .core_mut()
            .slots
            .actors()
            .filter(|a| {
                a.is_local()
                    && a.driveable != DriveableKind::NotDriveable
                    && matches!(a.state, ActorState::Simulated | ActorState::Sleeping)
            })
            .map(|a| a.id)
            .collect();
        let n = candidates.len();
        if n == 0 {
            return None;
        }
        let next = match current.and_then(|c| candidates.iter().position(|&id| id == c)) {
            Some(i) if forward => candidates[(i + 1) % n],
            Some(i) => candidates[(i + n - 1) % n],
            None if forward => candidates[0],
            None => candidates[n - 1],
        };
        self.set_player_actor(Some(next));
        Some(next)
    }

    /// Wake every local actor and keep them awake until
    /// [`ActorManager::allow_sleep`].
    pub fn force_wake_all(&mut self) {
        let core = self.core_mut();
        let mut local: Vec<&mut Actor> = core.slots.actors_mut().filter(|a| a.is_local()).collect();
        core.sleep.wake_all(&mut local, &mut core.events);
    }

    pub fn allow_sleep(&mut self) {
        self.core_mut().sleep.allow_sleep();
    }

    pub fn pause(&mut self, paused: bool) {
        if self.paused != paused {
            info!(paused, "simulation pause toggled");
        }
        self.paused = paused;
    }

    pub fn set_sim_speed(&mut self, speed: f32) {
        self.config.sim_speed = speed.max(0.0);
    }

    // Per-actor control

    fn with_actor<R>(
        &mut self,
        id: ActorId,
        f: impl FnOnce(&mut Actor, &mut Vec<SimEvent>) -> R,
    ) -> Option<R> {
        let core = self.core_mut();
        let actor = core.slots.get_mut(id)?;
        Some(f(actor, &mut core.events))
    }

    /// Replace the driver inputs of a local actor. Active input wakes it.
    pub fn set_input(&mut self, id: ActorId, input: ControlInput) -> bool {
        self.with_actor(id, |actor, events| {
            if !actor.is_local() {
                return false;
            }
            actor.input = input;
            if actor.input.is_active() {
                sleep::wake(actor, events);
            }
            true
        })
        .unwrap_or(false)
    }

    pub fn powertrain_command(&mut self, id: ActorId, command: PowertrainCommand) -> bool {
        self.with_actor(id, |actor, events| {
            let Some(pt) = actor.powertrain.as_ref() else {
                return false;
            };
            pt.push_command(command);
            sleep::wake(actor, events);
            true
        })
        .unwrap_or(false)
    }

    pub fn toggle_lights(&mut self, id: ActorId) -> bool {
        self.with_actor(id, |actor, _| actor.toggle_lights()).is_some()
    }

    pub fn toggle_axle_mode(&mut self, id: ActorId, axle: usize) -> bool {
        self.with_actor(id, |actor, _| actor.toggle_axle_mode(axle)).unwrap_or(false)
    }

    // Couplings

    pub fn attach(
        &mut self,
        kind: CouplingKind,
        a: NodeRef,
        b: NodeRef,
        params: CouplingParams,
    ) -> Option<CouplingId> {
        let core = self.core_mut();
        let id = core.couplings.attach(&core.slots, kind, a, b, params, &mut core.events)?;
        for end in [a.actor, b.actor] {
            if let Some(actor) = core.slots.get_mut(end) {
                sleep::wake(actor, &mut core.events);
            }
        }
        Some(id)
    }

    pub fn detach(&mut self, id: CouplingId) -> bool {
        let core = self.core_mut();
        core.couplings.detach(id, &mut core.events)
    }

    // Replay

    /// Freeze a local actor on its newest recorded frame.
    pub fn start_replay(&mut self, id: ActorId) -> bool {
        self.with_actor(id, |actor, _| {
            if !actor.is_local() {
                return false;
            }
            let Some(replay) = actor.replay.as_mut() else {
                return false;
            };
            if replay.seek(0).is_none() {
                return false;
            }
            replay.apply(&mut actor.nodes, &mut actor.beams);
            actor.replaying = true;
            actor.update_bounds();
            debug!(actor = actor.id.0, "replay started");
            true
        })
        .unwrap_or(false)
    }

    /// Show the frame `offset` recordings back from the newest.
    pub fn seek_replay(&mut self, id: ActorId, offset: usize) -> bool {
        self.with_actor(id, |actor, _| {
            if !actor.replaying {
                return false;
            }
            let Some(replay) = actor.replay.as_mut() else {
                return false;
            };
            if replay.seek(offset).is_none() {
                return false;
            }
            replay.apply(&mut actor.nodes, &mut actor.beams);
            actor.update_bounds();
            true
        })
        .unwrap_or(false)
    }

    /// Leave replay mode, resuming from the newest recorded frame.
    pub fn stop_replay(&mut self, id: ActorId) -> bool {
        self.with_actor(id, |actor, events| {
            if !actor.replaying {
                return false;
            }
            if let Some(replay) = actor.replay.as_mut() {
                replay.seek(0);
                replay.apply(&mut actor.nodes, &mut actor.beams);
            }
            actor.replaying = false;
            actor.rebuild_contact_index();
            actor.update_bounds();
            sleep::wake(actor, events);
            debug!(actor = actor.id.0, "replay stopped");
            true
        })
        .unwrap_or(false)
    }

    // World

    /// Switch to the terrain `name`. A previously loaded world is unloaded
    /// first.
    pub fn load_world(&mut self, name: &str) -> Result<(), SpawnError> {
        let terrain = self
            .content
            .terrain(name)
            .ok_or_else(|| SpawnError::ContentMissing(name.to_string()))?;
        if self.core_mut().terrain.is_some() {
            self.unload_world();
        }
        self.core_mut().terrain = Some(terrain);
        self.clock.reset();
        info!(terrain = name, "world loaded");
        Ok(())
    }

    /// Remove every actor and coupling and drop the terrain.
    pub fn unload_world(&mut self) {
        for id in self.actor_ids() {
            self.remove_actor(id);
        }
        self.mismatches.clear();
        let core = self.core_mut();
        core.couplings = Couplings::new();
        core.slots.reclaim();
        core.terrain = None;
        self.player = None;
        self.prev_player = None;
        self.clock.reset();
        info!("world unloaded");
    }

    // Savegames

    /// Capture the terrain, every local actor and the couplings between them.
    pub fn save_state(&mut self) -> Result<Savegame, SavegameError> {
        let player = self.player;
        let core = self.core_mut();
        let terrain = core.terrain.as_ref().ok_or(SavegameError::NoWorld)?;
        let mut save = Savegame::new(terrain.name(), core.sim_time);
        let mut index = HashMap::new();
        for actor in core
            .slots
            .actors()
            .filter(|a| {
                a.is_local() && matches!(a.state, ActorState::Simulated | ActorState::Sleeping)
            })
        {
            index.insert(actor.id, save.actors.len());
            save.actors.push(SavedActor::capture(actor));
        }
        save.player = player.and_then(|id| index.get(&id).copied());
        save.couplings = core
            .couplings
            .iter()
            .filter_map(|c| {
                Some(SavedCoupling {
                    kind: c.kind,
                    a: (*index.get(&c.a.actor)?, c.a.node),
                    b: (*index.get(&c.b.actor)?, c.b.node),
                    length: c.length,
                    params: c.params,
                })
            })
            .collect();
        Ok(save)
    }

    pub fn save_to(&mut self, path: impl AsRef<Path>) -> Result<(), SavegameError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let result = self.save_state().and_then(|save| save.write(path));
        match &result {
            Ok(()) => {
                info!(path = %shown, "state saved");
                self.emit(SimEvent::StateSaved { path: shown });
            }
            Err(err) => {
                warn!(path = %shown, %err, "save failed");
                self.emit(SimEvent::SaveFailed { path: shown, reason: err.to_string() });
            }
        }
        result
    }

    /// Replace the local actors with the saved ones. The terrain is switched
    /// first when it differs; the restored state is published immediately.
    pub fn load_state(&mut self, save: &Savegame) -> Result<(), SavegameError> {
        if self.terrain_name().as_deref() != Some(save.terrain.as_str()) {
            self.load_world(&save.terrain)
                .map_err(|_| SavegameError::Terrain(save.terrain.clone()))?;
        }
        let local: Vec<ActorId> =
            self.core_mut().slots.actors().filter(|a| a.is_local()).map(|a| a.id).collect();
        for id in local {
            self.remove_actor(id);
        }

        let mut ids = Vec::with_capacity(save.actors.len());
        for saved in &save.actors {
            match self.respawn(saved) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    for id in ids {
                        self.remove_actor(id);
                    }
                    return Err(err);
                }
            }
        }

        let core = self.core_mut();
        for c in &save.couplings {
            let (Some(&a), Some(&b)) = (ids.get(c.a.0), ids.get(c.b.0)) else {
                continue;
            };
            let (a, b) = (NodeRef::new(a, c.a.1), NodeRef::new(b, c.b.1));
            core.couplings.restore(c.kind, a, b, c.length, c.params);
        }
        core.sim_time = save.sim_time;
        self.clock.reset();
        self.set_player_actor(save.player.and_then(|i| ids.get(i).copied()));
        self.publish_now();
        info!(actors = ids.len(), terrain = %save.terrain, "state loaded");
        Ok(())
    }

    fn respawn(&mut self, saved: &SavedActor) -> Result<ActorId, SavegameError> {
        let respawn_error = |source| SavegameError::Respawn { name: saved.name.clone(), source };
        let def = self
            .content
            .definition(&saved.name)
            .ok_or_else(|| respawn_error(SpawnError::ContentMissing(saved.name.clone())))?;
        let id = self
            .spawn_local(&def, saved.section.as_deref(), Placement::default())
            .map_err(respawn_error)?;
        let applied = match self.core_mut().slots.get_mut(id) {
            Some(actor) => saved.apply(actor),
            None => Ok(()),
        };
        if let Err(err) = applied {
            self.remove_actor(id);
            return Err(err);
        }
        Ok(id)
    }

    pub fn load_from(&mut self, path: impl AsRef<Path>) -> Result<(), SavegameError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let result = Savegame::read(path).and_then(|save| self.load_state(&save));
        match &result {
            Ok(()) => self.emit(SimEvent::StateLoaded { path: shown }),
            Err(err) => {
                warn!(path = %shown, %err, "load failed");
                let text = format!("could not load '{shown}': {err}");
                self.emit(SimEvent::UserMessage { text });
            }
        }
        result
    }

    // Network

    /// Join a session as `local`; every local actor is registered.
    pub fn network_connect(&mut self, local: PeerId) {
        self.local_peer = Some(local);
        let core = self.core_mut();
        let time = core.sim_time;
        let packets: Vec<Result<Packet, CodecError>> = core
            .slots
            .actors()
            .filter(|a| {
                a.is_local() && matches!(a.state, ActorState::Simulated | ActorState::Sleeping)
            })
            .map(|a| register_packet(local, a, time))
            .collect();
        for packet in packets {
            match packet {
                Ok(packet) => self.outgoing.push(packet),
                Err(err) => warn!(%err, "register packet not encoded"),
            }
        }
        info!(peer = local.0, "network connected");
    }

    pub fn network_disconnect(&mut self, reason: &str) {
        warn!(reason, "network disconnected");
        self.end_session(format!("network disconnected: {reason}"));
    }

    pub fn network_recv_error(&mut self, reason: &str) {
        warn!(reason, "network receive error");
        self.end_session(format!("network disconnected: receive error: {reason}"));
    }

    /// Kicked from the session; the world goes with it.
    pub fn network_kick(&mut self, reason: &str) {
        warn!(reason, "kicked from session");
        self.end_session(format!("kicked from session: {reason}"));
        self.unload_world();
    }

    fn end_session(&mut self, text: String) {
        let mut peers: Vec<PeerId> =
            self.streams.keys().map(|(p, _)| *p).chain(self.mismatches.keys().copied()).collect();
        peers.sort();
        peers.dedup();
        for peer in peers {
            self.remove_peer(peer);
        }
        self.mismatches.clear();
        self.peer_clocks.clear();
        self.local_peer = None;
        self.emit(SimEvent::UserMessage { text });
    }

    fn is_mismatched(&self, peer: PeerId, stream: StreamId) -> bool {
        self.mismatches.get(&peer).is_some_and(|s| s.contains(&stream))
    }

    /// Apply one received packet.
    pub fn receive_packet(&mut self, packet: &Packet) -> Result<(), CodecError> {
        let PacketHeader { source: peer, stream, kind } = packet.header;
        match kind {
            PacketKind::Register => {
                let payload: RegisterPayload = packet.payload(PacketKind::Register)?;
                let now = self.sim_time();
                self.peer_clocks
                    .entry(peer)
                    .or_insert_with(|| PeerClock::from_register(now, payload.time));
                let section = payload.section.as_deref();
                let _ = self.spawn_networked(&payload.name, section, peer, stream);
            }
            PacketKind::RegisterResult => {
                let payload: RegisterResultPayload = packet.payload(PacketKind::RegisterResult)?;
                debug!(
                    peer = peer.0,
                    stream = stream.0,
                    status = payload.status,
                    "register result"
                );
                if payload.status == REGISTER_MISMATCH {
                    self.emit(SimEvent::StreamMismatch { peer, stream });
                }
            }
            PacketKind::Unregister => {
                if let Some(&id) = self.streams.get(&(peer, stream)) {
                    self.remove_actor(id);
                }
                if let Some(streams) = self.mismatches.get_mut(&peer) {
                    streams.remove(&stream);
                }
            }
            PacketKind::StateUpdate => {
                if self.is_mismatched(peer, stream) {
                    return Ok(());
                }
                let Some(&id) = self.streams.get(&(peer, stream)) else {
                    debug!(peer = peer.0, stream = stream.0, "update for unknown stream");
                    return Ok(());
                };
                let payload: StateUpdatePayload = packet.payload(PacketKind::StateUpdate)?;
                let clock = self.peer_clocks.get(&peer).copied().unwrap_or_default();
                let snapshot = NetSnapshot::from_update(&payload, &clock);
                let capacity = self.config.net.buffer_capacity;
                let Some(actor) = self.core_mut().slots.get_mut(id) else {
                    return Ok(());
                };
                if actor.state != ActorState::Networked {
                    return Ok(());
                }
                if snapshot.positions.len() != actor.nodes.len() {
                    warn!(actor = id.0, "state update with wrong node count");
                    return Ok(());
                }
                actor
                    .net_buffer
                    .get_or_insert_with(|| InterpolationBuffer::new(capacity))
                    .push(snapshot);
            }
            PacketKind::Chat => {
                let payload: ChatPayload = packet.payload(PacketKind::Chat)?;
                self.emit(SimEvent::UserMessage { text: payload.text });
            }
            PacketKind::UserLeave => {
                self.remove_peer(peer);
            }
        }
        Ok(())
    }
}

impl Drop for ActorManager {
    fn drop(&mut self) {
        self.sync();
    }
}
