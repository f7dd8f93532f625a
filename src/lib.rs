//! Beam Sim - Actor Manager and Physics Engine
//!
//! Soft-body vehicle simulation: every actor is a graph of point masses
//! joined by spring-damper beams, with wheels, a powertrain, aerodynamic
//! surfaces and inter-actor couplings. The [`ActorManager`] owns all live
//! actors, advances them at a fixed sub-millisecond step on a worker pool,
//! resolves self and inter-actor contact, puts idle actors to sleep and
//! publishes a read-only [`Snapshot`] per frame.
//!
//! [`GameContext`] wraps the manager with a [`MessageBus`] and a `bevy_ecs`
//! world mirroring the latest frame.

pub mod actor;
pub mod aero;
pub mod ai;
pub mod bus;
pub mod clock;
pub mod components;
pub mod config;
pub mod contact;
pub mod context;
pub mod couplings;
pub mod definition;
pub mod differential;
pub mod error;
pub mod events;
pub mod ground;
pub mod integrator;
pub mod manager;
pub mod math;
pub mod net;
pub mod powertrain;
pub mod presets;
pub mod profiler;
pub mod replay;
pub mod savegame;
pub mod sleep;
pub mod snapshot;
pub mod spawner;
pub mod wheels;
pub mod worker_pool;

pub use actor::{Actor, ActorId, ActorState, ControlInput, Ownership};
pub use bus::{Message, MessageBus};
pub use config::SimConfig;
pub use context::{AppState, GameContext};
pub use couplings::{CouplingId, CouplingKind, CouplingParams, NodeRef};
pub use definition::{ActorDef, DriveableKind};
pub use error::{CodecError, ConfigError, PoolError, SavegameError, SpawnError, ValidationError};
pub use events::SimEvent;
pub use ground::{FlatTerrain, GroundModel, Terrain};
pub use manager::{ActorManager, ContentProvider, FrameOutput, InMemoryContent};
pub use net::{Packet, PacketKind, PeerId, StreamId};
pub use powertrain::PowertrainCommand;
pub use savegame::Savegame;
pub use snapshot::{ActorSnapshot, Snapshot};
pub use spawner::Placement;
