//! Spatial partitioning of an actor's contactable nodes.
//!
//! Provides O(1) cell lookup and O(k) box queries where k is the number of
//! nodes in the overlapped cells. The index is rebuilt every step for every
//! simulated actor; rebuild cost is proportional to the node count.

use crate::components::Node;
use crate::math::Aabb;
use glam::Vec3;
use std::collections::HashMap;

/// Lower bound on the cell size, for actors with tiny or no triangles.
const MIN_CELL_SIZE: f32 = 0.25;

type Cell = (i32, i32, i32);

/// Entry in a grid cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointEntry {
    pub node: usize,
    pub position: Vec3,
}

/// Uniform hash grid over node positions.
#[derive(Debug, Clone)]
pub struct PointContactIndex {
    /// Cell edge in metres.
    pub cell_size: f32,
    cells: HashMap<Cell, Vec<PointEntry>>,
    count: usize,
}

impl Default for PointContactIndex {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl PointContactIndex {
    pub fn new(cell_size: f32) -> Self {
        Self { cell_size: cell_size.max(MIN_CELL_SIZE), cells: HashMap::new(), count: 0 }
    }

    /// Cell size of twice the longest edge among `triangles`.
    pub fn cell_size_for(nodes: &[Node], triangles: &[[usize; 3]]) -> f32 {
        let longest = triangles
            .iter()
            .flat_map(|t| {
                let [a, b, c] = t.map(|i| nodes[i].position);
                [(a - b).length(), (b - c).length(), (c - a).length()]
            })
            .fold(0.0f32, f32::max);
        (2.0 * longest).max(MIN_CELL_SIZE)
    }

    #[inline]
    fn cell_of(&self, p: Vec3) -> Cell {
        (
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
            (p.z / self.cell_size).floor() as i32,
        )
    }

    pub fn clear(&mut self) {
        // Keep the allocations of cells that stay populated.
        self.cells.values_mut().for_each(Vec::clear);
        self.count = 0;
    }

    pub fn insert(&mut self, node: usize, position: Vec3) {
        if !position.is_finite() {
            return;
        }
        let cell = self.cell_of(position);
        self.cells.entry(cell).or_default().push(PointEntry { node, position });
        self.count += 1;
    }

    /// Rebuild over the contactable nodes of an actor.
    pub fn rebuild(&mut self, nodes: &[Node]) {
        self.clear();
        if self.cells.len() > 4 * nodes.len().max(16) {
            // Nodes moved far: drop stale empty cells.
            self.cells.retain(|_, v| !v.is_empty());
        }
        for (i, node) in nodes.iter().enumerate() {
            if node.contactable {
                self.insert(i, node.position);
            }
        }
    }

    /// Visit every entry inside `query`.
    pub fn for_each_in(&self, query: &Aabb, mut f: impl FnMut(&PointEntry)) {
        if query.is_empty() || self.count == 0 {
            return;
        }
        let lo = self.cell_of(query.min);
        let hi = self.cell_of(query.max);
        for x in lo.0..=hi.0 {
            for y in lo.1..=hi.1 {
                for z in lo.2..=hi.2 {
                    let Some(entries) = self.cells.get(&(x, y, z)) else {
                        continue;
                    };
                    for entry in entries {
                        if query.contains(entry.position) {
                            f(entry);
                        }
                    }
                }
            }
        }
    }

    /// Entries inside `query`, mainly for diagnostics and tests.
    pub fn query(&self, query: &Aabb) -> Vec<PointEntry> {
        let mut out = Vec::new();
        self.for_each_in(query, |e| out.push(*e));
        out
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
