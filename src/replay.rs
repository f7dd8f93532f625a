//! Per-actor replay recorder.
//!
//! While simulated, an actor with a [`ReplayBuffer`] stores a frame (node
//! positions, velocities and the broken flags of its beams) every
//! `interval` seconds of simulated time into a fixed ring. Entering replay
//! mode freezes the actor; the selected frame is written back into its
//! nodes instead of integrating them.

use crate::components::{Beam, Node};
use glam::Vec3;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayFrame {
    /// Simulated time of the recording actor when the frame was taken.
    pub time: f64,
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub broken: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    capacity: usize,
    interval: f32,
    timer: f32,
    clock: f64,
    frames: VecDeque<ReplayFrame>,
    /// Frames back from the newest while replaying (0 = newest).
    position: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, interval: f32) -> Self {
        Self {
            capacity: capacity.max(1),
            interval: interval.max(0.0),
            timer: 0.0,
            clock: 0.0,
            frames: VecDeque::new(),
            position: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Called after every physics step of the owning actor.
    pub fn record(&mut self, dt: f32, nodes: &[Node], beams: &[Beam]) {
        self.clock += f64::from(dt);
        self.timer += dt;
        if self.timer < self.interval {
            return;
        }
        self.timer = 0.0;
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(ReplayFrame {
            time: self.clock,
            positions: nodes.iter().map(|n| n.position).collect(),
            velocities: nodes.iter().map(|n| n.velocity).collect(),
            broken: beams.iter().map(|b| b.broken).collect(),
        });
    }

    /// Select the frame `offset` steps back from the newest, clamped to the
    /// recorded range. Returns the frame now selected.
    pub fn seek(&mut self, offset: usize) -> Option<&ReplayFrame> {
        if self.frames.is_empty() {
            return None;
        }
        self.position = offset.min(self.frames.len() - 1);
        self.current()
    }

    pub fn current(&self) -> Option<&ReplayFrame> {
        let newest = self.frames.len().checked_sub(1)?;
        self.frames.get(newest - self.position.min(newest))
    }

    /// Write the selected frame into the actor's nodes and beams.
    pub fn apply(&self, nodes: &mut [Node], beams: &mut [Beam]) -> bool {
        let Some(frame) = self.current() else {
            return false;
        };
        if frame.positions.len() != nodes.len() {
            return false;
        }
        for (i, node) in nodes.iter_mut().enumerate() {
            node.position = frame.positions[i];
            node.prev_position = frame.positions[i];
            node.velocity = frame.velocities[i];
            node.force = Vec3::ZERO;
        }
        for (beam, &broken) in beams.iter_mut().zip(&frame.broken) {
            beam.broken = broken;
        }
        true
    }
}
