//! Engine model: torque balance, mixtures, turbo and air compressor.
//!
//! ## Units
//!
//! Engine speed is in rpm and the "inertia" is the engine's rpm response
//! per unit torque (`rpm += dt * torque / inertia`). Gear ratios are stored
//! premultiplied by the differential ratio, with reverse negative, so
//! `engine_rpm / ratio` is directly comparable with wheel rpm.

use super::torque_curve::TorqueCurve;
use super::PowertrainState;
use crate::definition::{EngineKind, PowertrainDef, TransmissionMode, TurboDef};
use serde::{Deserialize, Serialize};

/// Air pressure (rpm·s) at which the compressor purges.
pub const AIR_PURGE_PRESSURE: f32 = 50_000.0;
/// Throttle above which the turbo is driven by exhaust.
const TURBO_THROTTLE_THRESHOLD: f32 = 0.06;
/// Rpm of the turbine per displayed psi.
pub const TURBO_RPM_PER_PSI: f32 = 10_000.0;
/// Lowest working rpm used for the crank factor.
const CRANK_BASE_RPM: f32 = 800.0;
/// Speed above which the starter no longer helps, relative to stall rpm.
const STARTER_CUTOFF: f32 = 1.5;

/// Engine and gearbox parameters after defaults were resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSpec {
    pub kind: EngineKind,
    /// Torque at full throttle on top of engine braking.
    pub torque: f32,
    /// Engine braking torque (negative).
    pub braking_torque: f32,
    pub idle_rpm: f32,
    pub max_rpm: f32,
    pub stall_rpm: f32,
    pub inertia: f32,
    /// `[reverse (negative), neutral, first, ...]`, times the diff ratio.
    pub gear_ratios: Vec<f32>,
    pub clutch_force: f32,
    pub clutch_time: f32,
    pub shift_time: f32,
    pub post_shift_time: f32,
    pub curve: TorqueCurve,
    pub turbo: Option<TurboDef>,
    pub air_brakes: bool,
    pub max_idle_mixture: f32,
    pub min_idle_mixture: f32,
    pub transmission: TransmissionMode,
    pub start_running: bool,
}

impl EngineSpec {
    pub fn from_def(def: &PowertrainDef) -> Self {
        let braking_torque = def.braking_torque.unwrap_or(-def.torque / 5.0);
        let mut gear_ratios: Vec<f32> =
            def.gear_ratios.iter().map(|r| r * def.diff_ratio).collect();
        if let Some(reverse) = gear_ratios.first_mut() {
            *reverse = -reverse.abs();
        }
        let clutch_force = def.clutch_force.unwrap_or(match def.kind {
            EngineKind::Truck => 10_000.0,
            EngineKind::Car => 5_000.0,
        });

        Self {
            kind: def.kind,
            torque: def.torque - braking_torque,
            braking_torque,
            idle_rpm: def.idle_rpm.abs(),
            max_rpm: def.max_rpm.abs(),
            stall_rpm: def.stall_rpm.unwrap_or(300.0),
            inertia: def.inertia.unwrap_or(10.0),
            gear_ratios,
            clutch_force,
            clutch_time: def.clutch_time.filter(|t| *t > 0.0).unwrap_or(0.2),
            shift_time: def.shift_time.filter(|t| *t > 0.0).unwrap_or(0.5),
            post_shift_time: def.post_shift_time.filter(|t| *t > 0.0).unwrap_or(0.2),
            curve: TorqueCurve::from_points(&def.torque_curve),
            turbo: def.turbo,
            air_brakes: def.air_brakes.unwrap_or(def.kind == EngineKind::Truck),
            max_idle_mixture: def.max_idle_mixture.unwrap_or(0.2),
            min_idle_mixture: def.min_idle_mixture.unwrap_or(0.0),
            transmission: def.transmission,
            start_running: def.start_running,
        }
    }

    #[inline]
    pub fn forward_gears(&self) -> i32 {
        self.gear_ratios.len().saturating_sub(2) as i32
    }

    /// Ratio of `gear` (-1 reverse, 0 neutral, 1.. forward).
    #[inline]
    pub fn ratio(&self, gear: i32) -> f32 {
        let index = (gear + 1).clamp(0, self.gear_ratios.len() as i32 - 1) as usize;
        self.gear_ratios.get(index).copied().unwrap_or(0.0)
    }

    pub fn rpm_range(&self) -> f32 {
        self.max_rpm - self.idle_rpm
    }

    /// Full-throttle torque at `rpm`, including turbo boost.
    pub fn engine_power(&self, rpm: f32, turbo_rpm: f32) -> f32 {
        let ratio = (rpm / (self.max_rpm * 1.25)).min(1.0);
        let boost = self
            .turbo
            .map(|t| t.extra_torque * (turbo_rpm / t.max_rpm))
            .unwrap_or(0.0);
        self.torque * self.curve.sample(ratio) + boost
    }

    /// Throttle needed to keep the engine turning below idle.
    pub fn idle_mixture(&self, rpm: f32, turbo_rpm: f32) -> f32 {
        if rpm >= self.idle_rpm {
            return 0.0;
        }
        let ratio = (rpm / (self.max_rpm * 1.25)).min(1.0);
        let power = self.engine_power(rpm, turbo_rpm);
        let hold = if power > 0.0 { -self.braking_torque * ratio / power } else { 0.0 };
        let mix = hold.max(0.06) * (1.0 + (self.idle_rpm - rpm) / 100.0);
        mix.max(self.min_idle_mixture).min(self.max_idle_mixture)
    }

    /// Normalised working-rpm fraction in `[0, 1]`.
    pub fn working_fraction(&self, rpm: f32) -> f32 {
        let span = self.max_rpm - CRANK_BASE_RPM;
        if span <= 0.0 {
            return 0.0;
        }
        ((rpm - CRANK_BASE_RPM) / span).clamp(0.0, 1.0)
    }

    /// Extra throttle while priming, fading out as the engine spins up.
    pub fn prime_mixture(&self, rpm: f32) -> f32 {
        let crank = 5.0 * self.working_fraction(rpm);
        if crank < 0.9 {
            1.0
        } else if crank < 1.0 {
            10.0 * (1.0 - crank)
        } else {
            0.0
        }
    }
}

/// Outcome of one engine torque integration.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(super) struct EngineStep {
    pub purged: bool,
    pub started: bool,
    pub died: bool,
}

/// Advance air pressure, turbo and engine speed by `dt`.
///
/// `acc` is the effective throttle after mixtures; `pump_work` the hydraulic
/// work (J) drawn by command beams this step.
pub(super) fn integrate(
    spec: &EngineSpec,
    state: &mut PowertrainState,
    acc: f32,
    pump_work: f32,
    dt: f32,
) -> EngineStep {
    let mut out = EngineStep::default();

    if spec.air_brakes {
        state.air_pressure += dt * state.rpm;
        if state.air_pressure > AIR_PURGE_PRESSURE {
            state.air_pressure = 0.0;
            out.purged = true;
        }
    }

    if let Some(turbo) = spec.turbo {
        let mut torque = -state.turbo_rpm / turbo.max_rpm;
        let drive = state.rpm / spec.max_rpm;
        if state.turbo_rpm <= turbo.max_rpm && state.running && acc > TURBO_THROTTLE_THRESHOLD {
            torque += turbo.exhaust_gain * acc * drive;
        } else {
            torque += turbo.baseline_gain * drive;
        }
        state.turbo_rpm = (state.turbo_rpm + dt * torque / turbo.inertia).max(0.0);
    }

    let mut total = if state.contact {
        spec.braking_torque * state.rpm / spec.max_rpm
    } else {
        10.0 * spec.braking_torque * state.rpm / spec.max_rpm
    };

    if state.rpm > 100.0 && pump_work > 0.0 {
        total -= 8.0 * pump_work / (state.rpm * 0.105 * dt);
    }

    let turning = state.rpm < spec.max_rpm * 1.25 && state.rpm > spec.stall_rpm;
    if state.running && state.contact && turning {
        total += spec.engine_power(state.rpm, state.turbo_rpm) * acc;
    }

    if state.running && state.rpm < spec.stall_rpm {
        state.running = false;
        out.died = true;
    }
    if state.contact && state.starter && state.rpm < spec.stall_rpm * STARTER_CUTOFF {
        total -= spec.braking_torque;
    }
    if !state.running && state.contact && state.rpm > spec.stall_rpm {
        state.running = true;
        out.started = true;
    }

    if state.gear != 0 {
        let ratio = spec.ratio(state.gear);
        if ratio != 0.0 {
            total -= state.clutch_torque / ratio;
        }
    }

    state.rpm = (state.rpm + dt * total / spec.inertia).max(0.0);
    out
}
