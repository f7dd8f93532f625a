//! Transmission state machine: shifting, clutch automation, auto selector,
//! gear ranges and the rev limiter.

use super::engine::EngineSpec;
use super::{PowertrainEvent, PowertrainState};
use crate::config::RevLimiterMode;
use crate::definition::TransmissionMode;
use serde::{Deserialize, Serialize};

/// Clutch engagement above which a manual shift grinds.
pub const GEAR_SLIDE_CLUTCH: f32 = 0.25;
/// Forward gears per range in `ManualRanges` mode.
pub const RANGE_GEARS: i32 = 6;
/// Wheel-side rpm against the gear direction that starts limiting the clutch.
const WRONG_WAY_RPM: f32 = 10.0;

/// Position of the automatic gear selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoSelector {
    Reverse,
    #[default]
    Neutral,
    Drive,
    Two,
    One,
    /// Selector inactive (any mode other than automatic).
    Manual,
}

impl AutoSelector {
    /// One notch towards reverse.
    pub fn up(self) -> Self {
        match self {
            AutoSelector::Reverse | AutoSelector::Neutral => AutoSelector::Reverse,
            AutoSelector::Drive => AutoSelector::Neutral,
            AutoSelector::Two => AutoSelector::Drive,
            AutoSelector::One => AutoSelector::Two,
            AutoSelector::Manual => AutoSelector::One,
        }
    }

    /// One notch towards first.
    pub fn down(self) -> Self {
        match self {
            AutoSelector::Reverse => AutoSelector::Neutral,
            AutoSelector::Neutral => AutoSelector::Drive,
            AutoSelector::Drive => AutoSelector::Two,
            AutoSelector::Two | AutoSelector::One => AutoSelector::One,
            AutoSelector::Manual => AutoSelector::Manual,
        }
    }

    pub fn is_driving(self) -> bool {
        matches!(self, AutoSelector::Drive | AutoSelector::Two)
    }
}

#[inline]
fn clutch_automated(mode: TransmissionMode) -> bool {
    matches!(mode, TransmissionMode::Automatic | TransmissionMode::SemiAuto)
}

/// Shift by `delta` gears. Automated modes start a timed shift; manual
/// modes change gear immediately unless the clutch is engaged.
pub(super) fn shift(
    spec: &EngineSpec,
    state: &mut PowertrainState,
    delta: i32,
    events: &mut Vec<PowertrainEvent>,
) {
    let target = state.gear + delta;
    if delta == 0 || target < -1 || target > spec.forward_gears() {
        return;
    }
    if clutch_automated(state.mode) {
        if state.shifting {
            return;
        }
        tracing::debug!(from = state.gear, to = target, "shift begin");
        state.shifting = true;
        state.shift_clock = 0.0;
        state.shift_from = state.gear;
        state.shift_target = Some(target);
        events.push(PowertrainEvent::ShiftBegin { from: state.gear, to: target });
    } else if state.clutch > GEAR_SLIDE_CLUTCH {
        events.push(PowertrainEvent::GearSlide);
    } else {
        events.push(PowertrainEvent::ShiftBegin { from: state.gear, to: target });
        state.gear = target;
        events.push(PowertrainEvent::ShiftEnd { gear: target });
    }
}

pub(super) fn shift_to(
    spec: &EngineSpec,
    state: &mut PowertrainState,
    gear: i32,
    events: &mut Vec<PowertrainEvent>,
) {
    let target = if state.mode == TransmissionMode::ManualRanges && gear > 0 {
        state.gear_range * RANGE_GEARS + gear.min(RANGE_GEARS)
    } else {
        gear
    };
    shift(spec, state, target - state.gear, events);
}

/// Switch the range in `ManualRanges` mode, keeping the slot of the current
/// forward gear.
pub(super) fn select_range(
    spec: &EngineSpec,
    state: &mut PowertrainState,
    range: i32,
    events: &mut Vec<PowertrainEvent>,
) {
    if state.mode != TransmissionMode::ManualRanges {
        return;
    }
    let max_range = ((spec.forward_gears() - 1).max(0)) / RANGE_GEARS;
    let range = range.clamp(0, max_range);
    if range == state.gear_range {
        return;
    }
    if state.gear > 0 {
        let slot = (state.gear - 1) % RANGE_GEARS + 1;
        let target = (range * RANGE_GEARS + slot).min(spec.forward_gears());
        let before = state.gear;
        shift(spec, state, target - state.gear, events);
        if state.gear == before {
            return;
        }
    }
    state.gear_range = range;
}

/// Re-evaluate the gear after the selector moved.
pub(super) fn apply_selector(spec: &EngineSpec, state: &mut PowertrainState) {
    match state.selector {
        AutoSelector::Manual => {}
        AutoSelector::Reverse => state.gear = -1,
        AutoSelector::Neutral => state.gear = 0,
        AutoSelector::One => state.gear = 1,
        AutoSelector::Drive | AutoSelector::Two => {
            let mut gear = 1;
            while gear < spec.forward_gears()
                && state.wheel_rpm > 0.0
                && state.wheel_rpm * spec.ratio(gear) > spec.max_rpm - 100.0
            {
                gear += 1;
            }
            if state.selector == AutoSelector::Two {
                gear = gear.min(2);
            }
            state.gear = gear;
        }
    }
}

pub(super) fn toggle_mode(state: &mut PowertrainState) {
    state.mode = state.mode.next();
    state.selector = if state.mode == TransmissionMode::Automatic {
        AutoSelector::Neutral
    } else {
        AutoSelector::Manual
    };
    if state.mode == TransmissionMode::ManualRanges {
        state.gear_range = 0;
        state.gear = 0;
    }
}

/// Advance a timed shift and run the automatic clutch.
pub(super) fn update(
    spec: &EngineSpec,
    state: &mut PowertrainState,
    acc: f32,
    dt: f32,
    events: &mut Vec<PowertrainEvent>,
) {
    if !clutch_automated(state.mode) {
        state.clutch = (1.0 - state.clutch_pedal).clamp(0.0, 1.0);
        return;
    }

    if state.shifting {
        state.shift_clock += dt;
        let half = spec.shift_time / 2.0;
        state.clutch = if state.shift_clock < half {
            1.0 - state.shift_clock / half
        } else {
            (state.shift_clock - half) / half
        }
        .clamp(0.0, 1.0);

        if state.shift_clock >= half {
            if let Some(target) = state.shift_target.take() {
                state.gear = target.clamp(-1, spec.forward_gears());
            }
        }
        if state.shift_clock >= spec.shift_time {
            tracing::debug!(gear = state.gear, "shift end");
            state.shifting = false;
            state.clutch = 1.0;
            state.post_shifting = true;
            state.post_shift_clock = 0.0;
            events.push(PowertrainEvent::ShiftEnd { gear: state.gear });
        }
    }

    if state.post_shifting {
        state.post_shift_clock += dt;
        if state.post_shift_clock > spec.post_shift_time {
            state.post_shifting = false;
        }
    }

    let lugging = state.rpm < spec.stall_rpm * 1.2;
    if state.shifting {
        if lugging {
            state.clutch = 0.0;
        }
    } else if state.post_shifting {
        state.clutch = if lugging && acc < 0.5 { 0.0 } else { 1.0 };
    } else if lugging && acc < 0.5 {
        state.clutch = 0.0;
    } else if state.gear.abs() == 1 {
        state.clutch = if state.rpm > spec.idle_rpm {
            ((state.rpm - spec.idle_rpm) / spec.rpm_range()).min(1.0)
        } else {
            0.0
        };
    } else {
        state.clutch = 1.0;
    }
}

/// Clutch engagement after the over-rev and wrong-way limits.
///
/// With [`RevLimiterMode::Latched`] the capped value is also written back to
/// the clutch state.
pub(super) fn limited_clutch(
    spec: &EngineSpec,
    state: &mut PowertrainState,
    mode: RevLimiterMode,
) -> f32 {
    if state.gear == 0 || !clutch_automated(state.mode) {
        return state.clutch;
    }
    let mut clutch = state.clutch;
    let gearbox_rpm = (state.wheel_rpm * spec.ratio(state.gear)).abs();
    let limit = spec.max_rpm * 1.25;
    if gearbox_rpm > limit {
        clutch = clutch.min(1.0 / (1.0 + (gearbox_rpm - limit) / 2.0));
    }
    let wrong_way = state.gear as f32 * state.wheel_rpm;
    if wrong_way < -WRONG_WAY_RPM {
        clutch = clutch.min(1.0 / (1.0 + (-WRONG_WAY_RPM - wrong_way).abs() / 2.0));
    }
    if mode == RevLimiterMode::Latched {
        state.clutch = clutch;
    }
    clutch
}
