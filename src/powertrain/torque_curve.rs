//! Piecewise-linear torque curve.
//!
//! Indexed by `rpm / (1.25 * max_rpm)`; values are relative torque in
//! `[0, 1]`. The table is read-only during simulation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorqueCurve {
    /// `(rpm ratio, relative torque)`, strictly increasing in ratio.
    points: Vec<(f32, f32)>,
}

impl Default for TorqueCurve {
    fn default() -> Self {
        Self {
            points: vec![
                (0.0, 0.0),
                (0.1, 0.45),
                (0.3, 0.8),
                (0.5, 0.95),
                (0.7, 1.0),
                (0.9, 0.8),
                (1.0, 0.6),
            ],
        }
    }
}

impl TorqueCurve {
    /// Build from user points; an empty list yields the default curve.
    pub fn from_points(points: &[(f32, f32)]) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        Self { points: points.to_vec() }
    }

    /// Relative torque at `ratio`, clamped to the table ends.
    pub fn sample(&self, ratio: f32) -> f32 {
        let Some(&(first_x, first_y)) = self.points.first() else {
            return 1.0;
        };
        if ratio <= first_x {
            return first_y;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if ratio <= x1 {
                let t = (ratio - x0) / (x1 - x0);
                return y0 + (y1 - y0) * t;
            }
        }
        self.points.last().map(|p| p.1).unwrap_or(1.0)
    }

    /// Ratio with the highest torque.
    pub fn peak_ratio(&self) -> f32 {
        self.points
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|p| p.0)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolates_between_points() {
        let curve = TorqueCurve::from_points(&[(0.0, 0.0), (1.0, 1.0)]);
        assert!((curve.sample(0.25) - 0.25).abs() < 1e-6);
        assert_eq!(curve.sample(-1.0), 0.0);
        assert_eq!(curve.sample(2.0), 1.0);
    }

    #[test]
    fn test_default_peak_at_seven_tenths() {
        let curve = TorqueCurve::default();
        assert_eq!(curve.peak_ratio(), 0.7);
        assert_eq!(curve.sample(0.7), 1.0);
        assert!(curve.sample(0.95) < 1.0);
    }
}
