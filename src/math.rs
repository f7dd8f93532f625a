//! Small geometry helpers shared by the contact resolvers and the actor
//! bounding-volume bookkeeping.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// An inverted box that any `extend` call will replace.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all the given points.
    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        let mut aabb = Self::EMPTY;
        for p in points {
            aabb.extend(p);
        }
        aabb
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn extend(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn merge(&mut self, other: &Aabb) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Grow the box by `r` on every side.
    #[inline]
    pub fn expanded(&self, r: f32) -> Aabb {
        let e = Vec3::splat(r);
        Aabb::new(self.min - e, self.max + e)
    }

    /// Sweep the box along a displacement, keeping both ends.
    pub fn swept(&self, displacement: Vec3) -> Aabb {
        let mut out = *self;
        out.min = out.min.min(self.min + displacement);
        out.max = out.max.max(self.max + displacement);
        out
    }

    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        !(self.max.x < other.min.x
            || self.min.x > other.max.x
            || self.max.y < other.min.y
            || self.min.y > other.max.y
            || self.max.z < other.min.z
            || self.min.z > other.max.z)
    }

    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// A point expressed relative to a triangle: barycentric weights of the
/// projection onto the triangle plane plus the signed distance to that plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleLocal {
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
    pub distance: f32,
}

impl TriangleLocal {
    #[inline]
    pub fn inside(&self) -> bool {
        self.alpha >= 0.0 && self.beta >= 0.0 && self.gamma >= 0.0
    }
}

/// Unit normal of a triangle, or `None` for degenerate (zero-area) triangles.
#[inline]
pub fn triangle_normal(a: Vec3, b: Vec3, c: Vec3) -> Option<Vec3> {
    let n = (b - a).cross(c - a);
    let len = n.length();
    if len <= 1.0e-8 || !len.is_finite() {
        None
    } else {
        Some(n / len)
    }
}

/// Project `p` into the local frame of triangle `(a, b, c)`.
///
/// `alpha` weights vertex `a`, `beta` vertex `b`, `gamma` vertex `c`.
/// Returns `None` if the triangle is degenerate.
pub fn triangle_local(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<TriangleLocal> {
    let normal = triangle_normal(a, b, c)?;
    let distance = (p - a).dot(normal);
    let q = p - normal * distance;

    let v0 = b - a;
    let v1 = c - a;
    let v2 = q - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= f32::EPSILON {
        return None;
    }
    let beta = (d11 * d20 - d01 * d21) / denom;
    let gamma = (d00 * d21 - d01 * d20) / denom;
    Some(TriangleLocal {
        alpha: 1.0 - beta - gamma,
        beta,
        gamma,
        distance,
    })
}

/// Closest point to `p` on segment `a..b`, with its parameter in `[0, 1]`.
pub fn closest_on_segment(p: Vec3, a: Vec3, b: Vec3) -> (Vec3, f32) {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return (a, 0.0);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (a + ab * t, t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_intersection() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(0.5), Vec3::splat(2.0));
        let c = Aabb::new(Vec3::splat(3.0), Vec3::splat(4.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(!Aabb::EMPTY.intersects(&a));
    }

    #[test]
    fn test_aabb_from_points_and_sweep() {
        let aabb = Aabb::from_points([Vec3::new(1.0, 2.0, 3.0), Vec3::new(-1.0, 0.0, 5.0)]);
        assert_eq!(aabb.min, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 2.0, 5.0));

        let swept = aabb.swept(Vec3::new(0.0, 0.0, 10.0));
        assert_eq!(swept.min.z, 3.0);
        assert_eq!(swept.max.z, 15.0);
    }

    #[test]
    fn test_triangle_local_inside_and_distance() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(1.0, 0.0, 0.0);
        let c = Vec3::new(0.0, 1.0, 0.0);

        let local = triangle_local(Vec3::new(0.25, 0.25, 0.1), a, b, c).unwrap();
        assert!(local.inside());
        assert!((local.distance - 0.1).abs() < 1e-6);
        assert!((local.alpha + local.beta + local.gamma - 1.0).abs() < 1e-6);

        let outside = triangle_local(Vec3::new(2.0, 2.0, 0.0), a, b, c).unwrap();
        assert!(!outside.inside());
    }

    #[test]
    fn test_degenerate_triangle_is_rejected() {
        let p = Vec3::ONE;
        assert!(triangle_local(p, Vec3::ZERO, Vec3::X, Vec3::X * 2.0).is_none());
    }

    #[test]
    fn test_closest_on_segment_clamps() {
        let (q, t) = closest_on_segment(Vec3::new(5.0, 1.0, 0.0), Vec3::ZERO, Vec3::X * 2.0);
        assert_eq!(q, Vec3::X * 2.0);
        assert_eq!(t, 1.0);
    }
}
