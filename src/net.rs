//! Network stream packets, their codec and the interpolation buffer of
//! networked actors.
//!
//! Transport (framing, sessions) lives outside the core. The core consumes
//! and produces [`Packet`]s: a small header plus a bincode-encoded payload.
//!
//! ## Streams
//!
//! Every locally owned actor is one outgoing stream. A peer registers a
//! stream with [`RegisterPayload`]; the receiver answers with
//! [`RegisterResultPayload`] (`1` on success, `-1` when the definition is
//! not available locally) and from then on applies [`StateUpdatePayload`]s
//! to the networked actor bound to `(peer, stream)`.

use crate::definition::TransmissionMode;
use crate::error::CodecError;
use glam::Vec3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Register result: the stream was bound to a new actor.
pub const REGISTER_OK: i32 = 1;
/// Register result: the definition is missing locally.
pub const REGISTER_MISMATCH: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    Register,
    RegisterResult,
    Unregister,
    StateUpdate,
    Chat,
    UserLeave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub source: PeerId,
    pub stream: StreamId,
    pub kind: PacketKind,
}

/// A header with its still-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub name: String,
    pub section: Option<String>,
    /// Sender's simulation clock (s), used for the per-peer time offset.
    pub time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResultPayload {
    pub status: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub text: String,
}

/// Dashboard values carried with every state update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemoteGauges {
    pub rpm: f32,
    pub throttle: f32,
    pub clutch: f32,
    pub gear: i32,
    pub running: bool,
    pub contact: bool,
    pub mode: TransmissionMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdatePayload {
    /// Sender's simulation clock (s).
    pub time: f64,
    pub reference: Vec3,
    /// Node positions relative to `reference`.
    pub nodes: Vec<Vec3>,
    pub gauges: Option<RemoteGauges>,
    pub wheel_spin: Vec<f32>,
    pub lights: bool,
}

fn codec_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

impl Packet {
    /// Build a packet with an encoded payload.
    pub fn new<T: Serialize>(
        source: PeerId,
        stream: StreamId,
        kind: PacketKind,
        payload: &T,
    ) -> Result<Self, CodecError> {
        let payload = bincode::serde::encode_to_vec(payload, codec_config())?;
        Ok(Self { header: PacketHeader { source, stream, kind }, payload })
    }

    /// A packet without payload (unregister, user-leave).
    pub fn bare(source: PeerId, stream: StreamId, kind: PacketKind) -> Self {
        Self { header: PacketHeader { source, stream, kind }, payload: Vec::new() }
    }

    /// Decode the payload, checking the packet kind first.
    pub fn payload<T: DeserializeOwned>(&self, expected: PacketKind) -> Result<T, CodecError> {
        if self.header.kind != expected {
            return Err(CodecError::UnexpectedKind(self.header.kind));
        }
        let (value, _) = bincode::serde::decode_from_slice(&self.payload, codec_config())?;
        Ok(value)
    }

    /// Wire bytes of the whole packet.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serde::encode_to_vec(self, codec_config())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let (packet, _) = bincode::serde::decode_from_slice(bytes, codec_config())?;
        Ok(packet)
    }
}

/// Translates a peer's clock into ours.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PeerClock {
    /// `local - remote` at registration.
    pub offset: f64,
}

impl PeerClock {
    pub fn from_register(local_time: f64, remote_time: f64) -> Self {
        Self { offset: local_time - remote_time }
    }

    #[inline]
    pub fn to_local(&self, remote_time: f64) -> f64 {
        remote_time + self.offset
    }
}

/// A received state at local time `time`, in absolute positions.
#[derive(Debug, Clone, PartialEq)]
pub struct NetSnapshot {
    pub time: f64,
    pub positions: Vec<Vec3>,
    pub gauges: Option<RemoteGauges>,
    pub wheel_spin: Vec<f32>,
    pub lights: bool,
}

impl NetSnapshot {
    pub fn from_update(update: &StateUpdatePayload, clock: &PeerClock) -> Self {
        Self {
            time: clock.to_local(update.time),
            positions: update.nodes.iter().map(|&p| update.reference + p).collect(),
            gauges: update.gauges,
            wheel_spin: update.wheel_spin.clone(),
            lights: update.lights,
        }
    }
}

/// Interpolated node state.
#[derive(Debug, Clone, PartialEq)]
pub struct NetSample {
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
}

/// Small time-ordered buffer of received snapshots.
#[derive(Debug, Clone)]
pub struct InterpolationBuffer {
    capacity: usize,
    snapshots: VecDeque<NetSnapshot>,
}

impl InterpolationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(2), snapshots: VecDeque::with_capacity(capacity.max(2)) }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&NetSnapshot> {
        self.snapshots.back()
    }

    /// Insert keeping time order; stale duplicates are dropped.
    pub fn push(&mut self, snapshot: NetSnapshot) {
        if let Some(last) = self.snapshots.back() {
            if snapshot.time <= last.time {
                let pos = self.snapshots.partition_point(|s| s.time < snapshot.time);
                if self.snapshots.get(pos).is_some_and(|s| s.time == snapshot.time) {
                    return;
                }
                self.snapshots.insert(pos, snapshot);
                self.trim();
                return;
            }
        }
        self.snapshots.push_back(snapshot);
        self.trim();
    }

    fn trim(&mut self) {
        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    /// State at `time`, linear between the bracketing snapshots and held at
    /// either end of the buffer.
    pub fn sample(&self, time: f64) -> Option<NetSample> {
        let first = self.snapshots.front()?;
        let zero = || vec![Vec3::ZERO; first.positions.len()];
        if self.snapshots.len() == 1 || time <= first.time {
            return Some(NetSample { positions: first.positions.clone(), velocities: zero() });
        }
        let after = self.snapshots.partition_point(|s| s.time <= time);
        if after >= self.snapshots.len() {
            let last = self.snapshots.back()?;
            let velocities = vec![Vec3::ZERO; last.positions.len()];
            return Some(NetSample { positions: last.positions.clone(), velocities });
        }
        let (s0, s1) = (&self.snapshots[after - 1], &self.snapshots[after]);
        let span = s1.time - s0.time;
        let t = ((time - s0.time) / span) as f32;
        let inv_span = (1.0 / span) as f32;
        let (positions, velocities) = s0
            .positions
            .iter()
            .zip(&s1.positions)
            .map(|(&a, &b)| (a.lerp(b, t), (b - a) * inv_span))
            .unzip();
        Some(NetSample { positions, velocities })
    }

    /// Drop snapshots no longer needed to sample at `time`.
    pub fn prune_before(&mut self, time: f64) {
        while self.snapshots.len() > 2 && self.snapshots.get(1).is_some_and(|s| s.time <= time) {
            self.snapshots.pop_front();
        }
    }
}
