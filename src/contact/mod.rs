//! Node-versus-cab-triangle contact: the per-actor point index (C2), the
//! self-contact resolver (C7) and the inter-actor resolver (C8).

pub mod inter;
pub mod intra;
pub mod point_index;
pub mod resolve;

pub use inter::{batches, overlapping_pairs, resolve_pair};
pub use intra::resolve_self;
pub use point_index::{PointContactIndex, PointEntry};

use crate::components::{CabTriangle, Node};
use glam::Vec3;
use std::ops::AddAssign;

/// Borrowed view of one actor for contact resolution.
pub struct ContactBody<'a> {
    pub nodes: &'a mut [Node],
    pub triangles: &'a [CabTriangle],
    pub index: &'a PointContactIndex,
    /// Contact range of this actor's triangles (m).
    pub range: f32,
    /// Mass centre, used to orient triangles outward.
    pub centroid: Vec3,
}

/// Counters for diagnostics and the profiler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactStats {
    /// Point-triangle pairs inside range.
    pub tested: usize,
    /// Pairs that produced a response.
    pub contacts: usize,
}

impl AddAssign for ContactStats {
    fn add_assign(&mut self, rhs: Self) {
        self.tested += rhs.tested;
        self.contacts += rhs.contacts;
    }
}
