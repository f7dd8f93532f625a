//! Two-slot state buffer and swap queue shared between the main thread and
//! the simulation task.

use std::sync::{Arc, Mutex, PoisonError};

/// Two copies of a state struct. The simulation side writes one slot while
/// readers look at the other; [`DoubleBuffer::publish`] swaps the roles.
#[derive(Debug, Clone)]
pub struct DoubleBuffer<T> {
    slots: [T; 2],
    sim_index: usize,
}

impl<T: Clone> DoubleBuffer<T> {
    pub fn new(value: T) -> Self {
        Self { slots: [value.clone(), value], sim_index: 0 }
    }

    /// The slot the simulation writes, read-only.
    pub fn sim(&self) -> &T {
        &self.slots[self.sim_index]
    }

    /// The slot the simulation writes.
    pub fn sim_mut(&mut self) -> &mut T {
        &mut self.slots[self.sim_index]
    }

    /// The slot readers see.
    pub fn main(&self) -> &T {
        &self.slots[self.sim_index ^ 1]
    }

    /// Make the freshly written slot visible and continue writing into the
    /// other one, seeded with the same data.
    pub fn publish(&mut self) {
        self.sim_index ^= 1;
        let fresh = self.slots[self.sim_index ^ 1].clone();
        self.slots[self.sim_index] = fresh;
    }
}

/// A multi-producer command queue drained in bulk by the simulation.
///
/// Producers push into the front buffer under a short lock; the consumer
/// swaps the front buffer with its own (empty) back buffer and iterates
/// without holding the lock.
#[derive(Debug)]
pub struct SwapQueue<T> {
    front: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for SwapQueue<T> {
    fn clone(&self) -> Self {
        Self { front: Arc::clone(&self.front) }
    }
}

impl<T> Default for SwapQueue<T> {
    fn default() -> Self {
        Self { front: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl<T> SwapQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.front.lock().unwrap_or_else(PoisonError::into_inner).push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.front.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Swap the front buffer into `back`. `back` should be empty.
    pub fn swap_into(&self, back: &mut Vec<T>) {
        let mut front = self.front.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::swap(&mut *front, back);
    }
}
