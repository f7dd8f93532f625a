//! Frame time to fixed steps.
//!
//! A frame's wall-clock delta is capped at `max_frame_dt`, scaled by the
//! simulation speed and added to the remainder carried from the previous
//! frame; the integer number of whole fixed steps is taken and the rest
//! carried again. Accumulators run in `f64` so that the step total plus the
//! remainder keeps matching the frame total over long sessions.

use crate::config::SimConfig;

/// Guards against losing a step to rounding when the frame is an exact
/// multiple of the fixed step.
const STEP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameClock {
    /// Time carried to the next frame (s).
    pub remainder: f64,
    /// Sum of all (clamped, scaled) frame deltas.
    pub frame_time: f64,
    /// Sum of all fixed steps taken.
    pub step_time: f64,
    pub steps: u64,
}

/// The fixed step in `f64`. Steps given as a whole rate (1/2000 s) are
/// taken exactly rather than through their `f32` approximation.
pub fn step_seconds(config: &SimConfig) -> f64 {
    let rate = 1.0 / f64::from(config.fixed_dt);
    if (rate - rate.round()).abs() < 1e-3 {
        1.0 / rate.round()
    } else {
        f64::from(config.fixed_dt)
    }
}

impl FrameClock {
    /// Account for one frame and return the number of fixed steps to run.
    pub fn advance(&mut self, frame_dt: f32, config: &SimConfig) -> u32 {
        let h = step_seconds(config);
        let dt = f64::from(frame_dt.clamp(0.0, config.max_frame_dt))
            * f64::from(config.sim_speed.max(0.0));
        self.frame_time += dt;
        let total = self.remainder + dt;
        let steps = (total / h + STEP_EPSILON).floor().max(0.0);
        self.remainder = (total - steps * h).max(0.0);
        self.step_time += steps * h;
        self.steps += steps as u64;
        steps as u32
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_cap_gives_exact_steps() {
        let config = SimConfig::default();
        let mut clock = FrameClock::default();
        assert_eq!(clock.advance(1.0 / 20.0, &config), 100);
        assert!(clock.remainder.abs() < 1e-9);
        // Larger frames are clamped to the same step count.
        assert_eq!(clock.advance(0.5, &config), 100);
    }

    #[test]
    fn test_remainder_carries_between_frames() {
        let config = SimConfig::default();
        let mut clock = FrameClock::default();
        // 0.7 of a step per frame
        let dt = (step_seconds(&config) * 0.7) as f32;
        let steps: Vec<u32> = (0..4).map(|_| clock.advance(dt, &config)).collect();
        assert_eq!(steps, vec![0, 1, 1, 0]);
        assert!(clock.remainder < step_seconds(&config));
    }

    #[test]
    fn test_step_time_plus_remainder_matches_frames() {
        let config = SimConfig { sim_speed: 0.7, ..Default::default() };
        let mut clock = FrameClock::default();
        for i in 0..5000 {
            clock.advance(0.001 + (i % 17) as f32 * 0.0013, &config);
        }
        assert!((clock.step_time + clock.remainder - clock.frame_time).abs() < 1e-9);
        assert!((clock.step_time - clock.steps as f64 * step_seconds(&config)).abs() < 1e-9);
    }
}
