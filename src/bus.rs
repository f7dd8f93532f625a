//! High-level requests for the simulation (C12).
//!
//! Any thread may post a [`Message`]; the main thread drains the queue once
//! per frame, in posting order, before the physics steps run.

use crate::actor::{ActorId, ControlInput};
use crate::couplings::{CouplingId, CouplingKind, CouplingParams, NodeRef};
use crate::net::{Packet, PeerId, StreamId};
use crate::powertrain::PowertrainCommand;
use crate::spawner::Placement;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SpawnLocal { name: String, section: Option<String>, placement: Placement },
    /// Bind a remote stream to a new networked actor.
    SpawnNetworked { name: String, section: Option<String>, peer: PeerId, stream: StreamId },
    RemoveActor(ActorId),
    /// Make slots of removed actors available again.
    ReclaimSlots,
    SetPlayerActor(Option<ActorId>),
    NextVehicle,
    PreviousVehicle,
    ForceWakeAll,
    /// Allow actors to fall asleep again after [`Message::ForceWakeAll`].
    AllowSleep,
    Pause,
    Unpause,
    SetSimSpeed(f32),
    SaveState { path: PathBuf },
    LoadState { path: PathBuf },
    LoadWorld { terrain: String },
    UnloadWorld,
    SetInput { actor: ActorId, input: ControlInput },
    Powertrain { actor: ActorId, command: PowertrainCommand },
    ToggleLights(ActorId),
    ToggleAxleMode { actor: ActorId, axle: usize },
    Attach { kind: CouplingKind, a: NodeRef, b: NodeRef, params: CouplingParams },
    Detach(CouplingId),
    StartReplay(ActorId),
    SeekReplay { actor: ActorId, offset: usize },
    StopReplay(ActorId),
    NetworkConnect { local: PeerId },
    NetworkDisconnect { reason: String },
    NetworkRecvError { reason: String },
    NetworkKick { reason: String },
    NetPacket(Packet),
}

/// Mutex-protected FIFO of [`Message`]s. Clones share the queue.
#[derive(Debug, Clone, Default)]
pub struct MessageBus {
    queue: Arc<Mutex<VecDeque<Message>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, message: Message) {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(message);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take everything posted so far. Messages posted while the caller
    /// processes the batch land in the next one.
    pub fn drain(&self) -> Vec<Message> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_across_clones() {
        let bus = MessageBus::new();
        let poster = bus.clone();
        let handle = std::thread::spawn(move || {
            poster.post(Message::Pause);
            poster.post(Message::RemoveActor(ActorId(2)));
        });
        handle.join().unwrap();
        bus.post(Message::Unpause);
        assert_eq!(bus.len(), 3);
        assert_eq!(
            bus.drain(),
            vec![Message::Pause, Message::RemoveActor(ActorId(2)), Message::Unpause]
        );
        assert!(bus.is_empty());
    }
}
