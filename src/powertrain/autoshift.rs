//! Automatic gear selection.
//!
//! The controller is sampled at a fixed interval (not every physics step) and
//! keeps short and long sliding windows of engine rpm, throttle and brake.
//! From their averages it estimates how aggressive the driver is and picks a
//! target gear. The thresholds come from [`AutoShiftCalibration`].

use super::engine::EngineSpec;
use super::gearbox::AutoSelector;
use crate::config::AutoShiftCalibration;
use std::collections::VecDeque;

/// Inputs for one controller sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftSample {
    pub rpm: f32,
    pub throttle: f32,
    /// Brake input as a fraction of full braking.
    pub brake: f32,
    pub gear: i32,
    /// Average rpm of the driven wheels.
    pub wheel_rpm: f32,
    /// Wheel rpm implied by the vehicle's forward speed.
    pub reference_wheel_rpm: f32,
    /// Speed magnitude minus forward speed (m/s); large while sliding.
    pub side_slip: f32,
    pub turbo_rpm: f32,
}

#[derive(Debug, Clone, Default)]
struct Window {
    rpm: VecDeque<f32>,
    throttle: VecDeque<f32>,
    brake: VecDeque<f32>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Averages {
    rpm_long: f32,
    throttle_short: f32,
    throttle_long: f32,
    brake_short: f32,
    brake_long: f32,
}

impl Window {
    fn push(&mut self, sample: &ShiftSample, long: usize) {
        self.rpm.push_front(sample.rpm);
        self.throttle.push_front(sample.throttle);
        self.brake.push_front(sample.brake);
        self.rpm.truncate(long);
        self.throttle.truncate(long);
        self.brake.truncate(long);
    }

    fn averages(&self, short: usize) -> Averages {
        fn mean<'a>(values: impl Iterator<Item = &'a f32>) -> f32 {
            let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 {
                0.0
            } else {
                sum / n as f32
            }
        }
        Averages {
            rpm_long: mean(self.rpm.iter()),
            throttle_short: mean(self.throttle.iter().take(short)),
            throttle_long: mean(self.throttle.iter()),
            brake_short: mean(self.brake.iter().take(short)),
            brake_long: mean(self.brake.iter()),
        }
    }
}

/// State of the automatic gearbox controller.
#[derive(Debug, Clone, Default)]
pub struct AutoShiftController {
    window: Window,
    /// Driver aggressiveness estimate in `[0, 1]`.
    pub behaviour: f32,
    upshift_delay: u32,
}

impl AutoShiftController {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Evaluate one sample. Returns the gear to shift to, if any.
    ///
    /// Only forward gears are handled; the caller skips the controller while
    /// a shift or post-shift is in progress.
    pub fn sample(
        &mut self,
        spec: &EngineSpec,
        cal: &AutoShiftCalibration,
        selector: AutoSelector,
        s: &ShiftSample,
    ) -> Option<i32> {
        if s.gear <= 0 {
            return None;
        }
        let top = match selector {
            AutoSelector::Two => spec.forward_gears().min(2),
            _ => spec.forward_gears(),
        };
        let range = spec.rpm_range();
        let half = range / 2.0;
        let third = range / 3.0;
        let ratio = |g: i32| spec.ratio(g);
        let power = |rpm: f32| spec.engine_power(rpm, s.turbo_rpm);

        // Redline and lugging checks act immediately.
        if (s.rpm > spec.max_rpm - cal.redline_margin_rpm && s.gear > 1)
            || s.wheel_rpm * ratio(s.gear) > spec.max_rpm - cal.redline_margin_rpm
        {
            if s.gear < top {
                return Some(s.gear + 1);
            }
        } else if s.gear > 1
            && s.reference_wheel_rpm * ratio(s.gear - 1) < spec.max_rpm
            && (s.rpm < spec.idle_rpm
                || (s.rpm < spec.idle_rpm + self.behaviour * half / 2.0
                    && power(s.wheel_rpm * ratio(s.gear - 1)) > power(s.wheel_rpm * ratio(s.gear))))
        {
            return Some(s.gear - 1);
        }

        self.window.push(s, cal.window_long);
        let avg = self.window.averages(cal.window_short);

        let sporty = avg.throttle_short > cal.band_full
            || avg.throttle_long > cal.band_full
            || avg.brake_short > cal.band_full
            || avg.brake_long > cal.band_full;
        let relaxed = s.throttle < 0.5
            && avg.throttle_short < 0.5
            && avg.throttle_long < 0.5
            && s.brake < 0.5
            && avg.brake_short < 0.5
            && avg.brake_long < 0.5;
        if sporty {
            self.behaviour = (self.behaviour + cal.behaviour_step).min(1.0);
        } else if relaxed {
            self.behaviour /= cal.behaviour_decay;
        }

        // Lower gear pulls harder at the wheels.
        let down_rpm = |g: i32| s.wheel_rpm * ratio(g - 1);
        let pulls_harder =
            |g: i32| power(down_rpm(g)) * ratio(g - 1) > power(s.wheel_rpm * ratio(g)) * ratio(g);

        let mut target = s.gear;
        if avg.throttle_short > cal.band_full && s.rpm < spec.max_rpm - third {
            while target > 1 && down_rpm(target) < spec.max_rpm - third && pulls_harder(target) {
                target -= 1;
            }
        } else if avg.throttle_short > cal.band_high
            && s.throttle < cal.band_full
            && s.throttle > avg.throttle_short + 0.1
            && s.rpm < spec.idle_rpm + half
        {
            if target > 1 && down_rpm(target) < spec.idle_rpm + half && pulls_harder(target) {
                target -= 1;
            }
        } else if avg.throttle_short > cal.band_mid
            && s.throttle < cal.band_full
            && s.throttle > avg.throttle_short + 0.1
            && s.rpm < spec.idle_rpm + half
        {
            if target > 1 && down_rpm(target) < spec.idle_rpm + third && pulls_harder(target) {
                target -= 1;
            }
        } else if s.gear < top
            && avg.brake_long < cal.band_low
            && s.throttle < (avg.throttle_long + 0.1).min(1.0)
            && s.rpm > avg.rpm_long - range / 20.0
        {
            let next_rpm = s.wheel_rpm * ratio(s.gear + 1);
            if avg.throttle_long < cal.band_high
                && avg.throttle_long > cal.band_mid
                && s.rpm > spec.idle_rpm + third
                && s.rpm < spec.max_rpm - third
            {
                if next_rpm > spec.idle_rpm + third {
                    target += 1;
                }
            } else if avg.throttle_long < cal.band_mid
                && avg.throttle_long > cal.band_low
                && s.rpm > spec.idle_rpm + third
            {
                if next_rpm > spec.idle_rpm + third / 2.0 {
                    target += 1;
                }
            } else if avg.throttle_long < cal.band_low
                && s.rpm > spec.idle_rpm + third / 2.0
                && s.rpm < spec.idle_rpm + half
                && next_rpm > spec.idle_rpm + third / 2.0
            {
                target += 1;
            }

            if target > s.gear {
                self.upshift_delay += 1;
                if self.upshift_delay as f32 <= cal.upshift_delay_samples * self.behaviour {
                    target = s.gear;
                }
            } else {
                self.upshift_delay = 0;
            }
        }

        let delta = (s.wheel_rpm * (ratio(target) - ratio(s.gear))).abs();
        let worth_it = (target < s.gear && delta > third * cal.downshift_min_fraction)
            || (target > s.gear && delta > third * cal.upshift_min_fraction);
        if worth_it && s.side_slip < 0.5 {
            Some(target)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{EngineKind, PowertrainDef, TransmissionMode};

    fn spec() -> EngineSpec {
        EngineSpec::from_def(&PowertrainDef {
            kind: EngineKind::Car,
            torque: 300.0,
            idle_rpm: 800.0,
            max_rpm: 6000.0,
            stall_rpm: None,
            diff_ratio: 3.5,
            gear_ratios: vec![3.0, 1.0, 3.6, 2.1, 1.4, 1.0, 0.8],
            clutch_force: None,
            clutch_time: None,
            shift_time: None,
            post_shift_time: None,
            inertia: Some(0.1),
            braking_torque: None,
            torque_curve: Vec::new(),
            turbo: None,
            air_brakes: None,
            transmission: TransmissionMode::Automatic,
            max_idle_mixture: None,
            min_idle_mixture: None,
            start_running: true,
        })
    }

    fn sample(gear: i32, rpm: f32, throttle: f32) -> ShiftSample {
        let s = spec();
        let wheel_rpm = rpm / s.ratio(gear);
        ShiftSample {
            rpm,
            throttle,
            brake: 0.0,
            gear,
            wheel_rpm,
            reference_wheel_rpm: wheel_rpm,
            side_slip: 0.0,
            turbo_rpm: 0.0,
        }
    }

    #[test]
    fn test_redline_upshifts_one_gear() {
        let spec = spec();
        let cal = AutoShiftCalibration::default();
        let mut ctl = AutoShiftController::default();
        let target = ctl.sample(&spec, &cal, AutoSelector::Drive, &sample(1, 5950.0, 1.0));
        assert_eq!(target, Some(2));
    }

    #[test]
    fn test_selector_two_caps_upshift() {
        let spec = spec();
        let cal = AutoShiftCalibration::default();
        let mut ctl = AutoShiftController::default();
        let target = ctl.sample(&spec, &cal, AutoSelector::Two, &sample(2, 5950.0, 1.0));
        assert_eq!(target, None);
    }

    #[test]
    fn test_midrange_full_throttle_holds_gear() {
        let spec = spec();
        let cal = AutoShiftCalibration::default();
        let mut ctl = AutoShiftController::default();
        for _ in 0..60 {
            assert_eq!(ctl.sample(&spec, &cal, AutoSelector::Drive, &sample(2, 4500.0, 1.0)), None);
        }
        // Sustained full throttle makes the controller sporty
        assert!(ctl.behaviour > 0.5);
    }

    #[test]
    fn test_neutral_and_reverse_ignored() {
        let spec = spec();
        let cal = AutoShiftCalibration::default();
        let mut ctl = AutoShiftController::default();
        assert_eq!(ctl.sample(&spec, &cal, AutoSelector::Drive, &sample(0, 3000.0, 1.0)), None);
    }
}
