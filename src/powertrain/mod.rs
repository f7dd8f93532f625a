//! Engine and transmission (C4).
//!
//! A [`Powertrain`] owns its resolved [`EngineSpec`], the live
//! [`PowertrainState`], the automatic gearbox controller and a command queue.
//! Each physics step:
//!
//! 1. queued [`PowertrainCommand`]s are applied,
//! 2. the engine torque balance is integrated ([`engine`]),
//! 3. the gearbox advances timed shifts and automates the clutch ([`gearbox`]),
//! 4. the auto-shift controller is sampled at its own interval ([`autoshift`]),
//! 5. the clutch couples engine and driven wheels and the resulting torque is
//!    handed to the differentials.
//!
//! ## Double buffering
//!
//! The state lives in a [`DoubleBuffer`]: steps write the simulation copy and
//! [`Powertrain::publish`] swaps it into the copy read by dashboards, audio
//! and snapshots at the frame boundary. Commands are pushed through a
//! [`SwapQueue`] whose handle can be cloned to the main thread and fed while
//! a simulation task is in flight.

pub mod autoshift;
pub mod buffer;
pub mod engine;
pub mod gearbox;
pub mod torque_curve;

pub use autoshift::{AutoShiftController, ShiftSample};
pub use buffer::{DoubleBuffer, SwapQueue};
pub use engine::EngineSpec;
pub use gearbox::AutoSelector;
pub use torque_curve::TorqueCurve;

use crate::config::SimConfig;
use crate::definition::{PowertrainDef, TransmissionMode};
use serde::{Deserialize, Serialize};

/// rad/s to rpm.
pub const RAD_PER_SEC_TO_RPM: f32 = 9.549_297;

/// Live engine and gearbox state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowertrainState {
    pub rpm: f32,
    /// Throttle requested by the driver or AI.
    pub throttle_request: f32,
    /// Throttle applied during the last step (after mixtures and shift cut).
    pub throttle: f32,
    pub clutch: f32,
    /// Clutch pedal position in manual modes (1 = fully pressed).
    pub clutch_pedal: f32,
    /// Wheel-side torque transmitted by the clutch.
    pub clutch_torque: f32,
    pub gear: i32,
    pub gear_range: i32,
    pub mode: TransmissionMode,
    pub selector: AutoSelector,
    /// Ignition.
    pub contact: bool,
    pub running: bool,
    pub starter: bool,
    pub prime: bool,
    pub turbo_rpm: f32,
    pub air_pressure: f32,
    pub shifting: bool,
    pub shift_clock: f32,
    pub shift_from: i32,
    /// Gear engaged at the midpoint of the current shift.
    pub shift_target: Option<i32>,
    pub post_shifting: bool,
    pub post_shift_clock: f32,
    /// Average rpm of the driven wheels.
    pub wheel_rpm: f32,
}

impl PowertrainState {
    pub fn new(spec: &EngineSpec) -> Self {
        Self {
            rpm: 0.0,
            throttle_request: 0.0,
            throttle: 0.0,
            clutch: 0.0,
            clutch_pedal: 0.0,
            clutch_torque: 0.0,
            gear: 0,
            gear_range: 0,
            mode: spec.transmission,
            selector: if spec.transmission == TransmissionMode::Automatic {
                AutoSelector::Neutral
            } else {
                AutoSelector::Manual
            },
            contact: false,
            running: false,
            starter: false,
            prime: false,
            turbo_rpm: 0.0,
            air_pressure: 0.0,
            shifting: false,
            shift_clock: 0.0,
            shift_from: 0,
            shift_target: None,
            post_shifting: false,
            post_shift_clock: 0.0,
            wheel_rpm: 0.0,
        }
    }

    /// Boost pressure shown on the dashboard.
    pub fn turbo_psi(&self) -> f32 {
        self.turbo_rpm / engine::TURBO_RPM_PER_PSI
    }
}

/// Driver/AI requests applied at the start of the next step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PowertrainCommand {
    Throttle(f32),
    /// Clutch pedal in manual modes.
    ClutchPedal(f32),
    ToggleIgnition,
    Starter(bool),
    TogglePrime,
    ShiftUp,
    ShiftDown,
    ShiftNeutral,
    ShiftTo(i32),
    SelectRange(i32),
    ToggleMode,
    /// Move the automatic selector directly (AI auto-shift control).
    SetSelector(AutoSelector),
    QuickStart,
    Stop,
}

/// Things the powertrain reports back to its actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowertrainEvent {
    EngineStarted,
    EngineDied,
    ShiftBegin { from: i32, to: i32 },
    ShiftEnd { gear: i32 },
    GearSlide,
    AirPurge,
}

/// Per-step coupling data gathered from the actor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveInputs {
    /// Average spin of the driven wheels (rpm).
    pub wheel_rpm: f32,
    /// Sum of the driven wheels' spin inertia (kg·m²).
    pub wheel_inertia: f32,
    /// Brake input in `[0, 1]`.
    pub brake: f32,
    /// Speed along the vehicle's forward axis (m/s).
    pub forward_speed: f32,
    /// Speed magnitude (m/s).
    pub speed: f32,
    /// Radius of the reference wheel (m).
    pub reference_radius: f32,
    /// Hydraulic work (J) done by command beams this step.
    pub pump_work: f32,
}

#[derive(Debug, Clone)]
pub struct Powertrain {
    pub spec: EngineSpec,
    state: DoubleBuffer<PowertrainState>,
    autoshift: AutoShiftController,
    sample_clock: f32,
    commands: SwapQueue<PowertrainCommand>,
    scratch: Vec<PowertrainCommand>,
    events: Vec<PowertrainEvent>,
}

impl Powertrain {
    pub fn new(def: &PowertrainDef) -> Self {
        let spec = EngineSpec::from_def(def);
        let mut state = PowertrainState::new(&spec);
        if spec.start_running {
            quick_start(&spec, &mut state);
        }
        Self {
            spec,
            state: DoubleBuffer::new(state),
            autoshift: AutoShiftController::default(),
            sample_clock: 0.0,
            commands: SwapQueue::new(),
            scratch: Vec::new(),
            events: Vec::new(),
        }
    }

    /// State being written by the simulation.
    pub fn state(&mut self) -> &mut PowertrainState {
        self.state.sim_mut()
    }

    /// State as of the last publish.
    pub fn gauges(&self) -> &PowertrainState {
        self.state.main()
    }

    /// Handle for enqueueing commands from another thread.
    pub fn command_queue(&self) -> SwapQueue<PowertrainCommand> {
        self.commands.clone()
    }

    pub fn push_command(&self, command: PowertrainCommand) {
        self.commands.push(command);
    }

    pub fn publish(&mut self) {
        self.state.publish();
    }

    /// Replace both buffers (savegame restore, network force-settings).
    pub fn restore(&mut self, state: PowertrainState) {
        self.state = DoubleBuffer::new(state);
        self.autoshift.reset();
        self.sample_clock = 0.0;
    }

    pub fn drain_events(&mut self) -> std::vec::Drain<'_, PowertrainEvent> {
        self.events.drain(..)
    }

    /// Steering-hydro speed multiplier, 1 at low rpm up to 5 at max rpm.
    /// Follows the simulation copy, so it is current within the step.
    pub fn crank_factor(&self) -> f32 {
        let rpm = self.state.sim().rpm;
        1.0 + 4.0 * self.spec.working_fraction(rpm)
    }

    /// Current engine rpm in the simulation copy.
    pub fn rpm(&self) -> f32 {
        self.state.sim().rpm
    }

    /// Apply queued commands.
    pub fn apply_commands(&mut self) {
        if self.commands.is_empty() {
            return;
        }
        let mut scratch = std::mem::take(&mut self.scratch);
        self.commands.swap_into(&mut scratch);
        for command in scratch.drain(..) {
            self.apply(command);
        }
        self.scratch = scratch;
    }

    pub fn apply(&mut self, command: PowertrainCommand) {
        let spec = &self.spec;
        let state = self.state.sim_mut();
        let events = &mut self.events;
        match command {
            PowertrainCommand::Throttle(value) => state.throttle_request = value.clamp(0.0, 1.0),
            PowertrainCommand::ClutchPedal(value) => state.clutch_pedal = value.clamp(0.0, 1.0),
            PowertrainCommand::ToggleIgnition => state.contact = !state.contact,
            PowertrainCommand::Starter(on) => state.starter = on,
            PowertrainCommand::TogglePrime => state.prime = !state.prime,
            PowertrainCommand::ShiftUp | PowertrainCommand::ShiftDown => {
                let up = command == PowertrainCommand::ShiftUp;
                if state.mode == TransmissionMode::Automatic {
                    state.selector = if up { state.selector.up() } else { state.selector.down() };
                    gearbox::apply_selector(spec, state);
                } else {
                    gearbox::shift(spec, state, if up { 1 } else { -1 }, events);
                }
            }
            PowertrainCommand::ShiftNeutral => gearbox::shift_to(spec, state, 0, events),
            PowertrainCommand::ShiftTo(gear) => gearbox::shift_to(spec, state, gear, events),
            PowertrainCommand::SelectRange(range) => {
                gearbox::select_range(spec, state, range, events)
            }
            PowertrainCommand::ToggleMode => gearbox::toggle_mode(state),
            PowertrainCommand::SetSelector(selector) => {
                if state.mode == TransmissionMode::Automatic {
                    state.selector = selector;
                    gearbox::apply_selector(spec, state);
                }
            }
            PowertrainCommand::QuickStart => quick_start(spec, state),
            PowertrainCommand::Stop => stop(state),
        }
    }

    /// Advance one step and return the wheel-side drive torque.
    pub fn step(&mut self, config: &SimConfig, inputs: &DriveInputs, dt: f32) -> f32 {
        self.apply_commands();

        let spec = &self.spec;
        let state = self.state.sim_mut();
        let events = &mut self.events;
        state.wheel_rpm = inputs.wheel_rpm;

        let automated =
            matches!(state.mode, TransmissionMode::Automatic | TransmissionMode::SemiAuto);
        let request = if automated && state.shifting { 0.0 } else { state.throttle_request };
        let mut acc = request.max(spec.idle_mixture(state.rpm, state.turbo_rpm));
        if state.prime {
            acc = acc.max(spec.prime_mixture(state.rpm));
        }
        state.throttle = acc;

        let out = engine::integrate(spec, state, acc, inputs.pump_work, dt);
        if out.purged {
            events.push(PowertrainEvent::AirPurge);
        }
        if out.died {
            tracing::debug!(rpm = state.rpm, "engine died");
            events.push(PowertrainEvent::EngineDied);
        }
        if out.started {
            events.push(PowertrainEvent::EngineStarted);
        }

        gearbox::update(spec, state, acc, dt, events);

        self.sample_clock += dt;
        if self.sample_clock >= config.autoshift.sample_interval {
            self.sample_clock -= config.autoshift.sample_interval;
            if state.mode == TransmissionMode::Automatic
                && state.selector.is_driving()
                && !state.shifting
                && !state.post_shifting
            {
                let reference_wheel_rpm = if inputs.reference_radius > 0.0 {
                    inputs.forward_speed / inputs.reference_radius * RAD_PER_SEC_TO_RPM
                } else {
                    inputs.wheel_rpm
                };
                let sample = ShiftSample {
                    rpm: state.rpm,
                    throttle: acc,
                    brake: inputs.brake,
                    gear: state.gear,
                    wheel_rpm: inputs.wheel_rpm,
                    reference_wheel_rpm,
                    side_slip: inputs.speed - inputs.forward_speed.abs(),
                    turbo_rpm: state.turbo_rpm,
                };
                let target =
                    self.autoshift.sample(spec, &config.autoshift, state.selector, &sample);
                if let Some(target) = target {
                    gearbox::shift(spec, state, target - state.gear, events);
                }
            }
        }

        let clutch = gearbox::limited_clutch(spec, state, config.rev_limiter);
        state.clutch_torque = if state.gear == 0 {
            0.0
        } else {
            let ratio = spec.ratio(state.gear);
            let slip = state.rpm / ratio - inputs.wheel_rpm;
            let mut torque = slip * clutch * spec.clutch_force;
            if inputs.wheel_inertia > 0.0 && spec.inertia > 0.0 {
                // Never transmit more than it takes to equalise both sides in one step.
                let compliance = dt
                    * (RAD_PER_SEC_TO_RPM / inputs.wheel_inertia
                        + 1.0 / (ratio * ratio * spec.inertia));
                let cap = slip.abs() / compliance;
                torque = torque.clamp(-cap, cap);
            }
            if torque.is_finite() {
                torque
            } else {
                0.0
            }
        };
        state.clutch_torque
    }

    /// Copy gauges received from the owning peer.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_remote(
        &mut self,
        rpm: f32,
        throttle: f32,
        clutch: f32,
        gear: i32,
        running: bool,
        contact: bool,
        mode: TransmissionMode,
    ) {
        let gear = gear.clamp(-1, self.spec.forward_gears());
        let state = self.state.sim_mut();
        state.rpm = rpm;
        state.throttle = throttle;
        state.clutch = clutch.clamp(0.0, 1.0);
        state.gear = gear;
        state.running = running;
        state.contact = contact;
        state.mode = mode;
    }
}

fn quick_start(spec: &EngineSpec, state: &mut PowertrainState) {
    match state.mode {
        TransmissionMode::Automatic => {
            state.gear = 1;
            state.selector = AutoSelector::Drive;
        }
        TransmissionMode::SemiAuto => {
            state.gear = 1;
            state.selector = AutoSelector::Manual;
        }
        _ => {
            state.gear = 0;
            state.selector = AutoSelector::Manual;
        }
    }
    state.clutch = 0.0;
    state.rpm = spec.idle_rpm;
    state.clutch_torque = 0.0;
    state.turbo_rpm = 0.0;
    state.air_pressure = 0.0;
    state.running = true;
    state.contact = true;
    state.throttle_request = 0.0;
}

fn stop(state: &mut PowertrainState) {
    state.gear = 0;
    state.clutch = 0.0;
    state.selector = if state.mode == TransmissionMode::Automatic {
        AutoSelector::Neutral
    } else {
        AutoSelector::Manual
    };
    state.rpm = 0.0;
    state.running = false;
    state.contact = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::EngineKind;

    fn def(mode: TransmissionMode) -> PowertrainDef {
        PowertrainDef {
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
            transmission: mode,
            max_idle_mixture: None,
            min_idle_mixture: None,
            start_running: false,
        }
    }

    #[test]
    fn test_quick_start() {
        let mut pt = Powertrain::new(&def(TransmissionMode::Automatic));
        pt.apply(PowertrainCommand::QuickStart);
        let state = pt.state();
        assert_eq!(state.gear, 1);
        assert_eq!(state.selector, AutoSelector::Drive);
        assert_eq!(state.rpm, 800.0);
        assert!(state.running && state.contact);
    }

    #[test]
    fn test_crank_factor_range() {
        let mut pt = Powertrain::new(&def(TransmissionMode::Automatic));
        pt.state().rpm = 0.0;
        pt.publish();
        assert_eq!(pt.crank_factor(), 1.0);
        pt.state().rpm = 6000.0;
        pt.publish();
        assert_eq!(pt.crank_factor(), 5.0);
    }

    #[test]
    fn test_crank_factor_tracks_unpublished_rpm() {
        let mut pt = Powertrain::new(&def(TransmissionMode::Automatic));
        pt.state().rpm = 0.0;
        pt.publish();
        pt.state().rpm = 6000.0;
        assert_eq!(pt.crank_factor(), 5.0);
        assert_eq!(pt.rpm(), 6000.0);
    }

    #[test]
    fn test_gear_and_clutch_stay_in_range() {
        let config = SimConfig::default();
        let mut pt = Powertrain::new(&def(TransmissionMode::Automatic));
        pt.apply(PowertrainCommand::QuickStart);
        pt.apply(PowertrainCommand::Throttle(1.0));
        let inputs =
            DriveInputs { wheel_inertia: 4.0, reference_radius: 0.3, ..Default::default() };
        for i in 0..4000 {
            if i % 500 == 0 {
                pt.push_command(PowertrainCommand::ShiftUp);
            }
            pt.step(&config, &inputs, config.fixed_dt);
            let s = pt.state();
            assert!(s.gear >= -1 && s.gear <= 5);
            assert!((0.0..=1.0).contains(&s.clutch));
            assert!(s.rpm.is_finite());
        }
    }

    #[test]
    fn test_clutch_torque_does_not_overshoot() {
        let config = SimConfig::default();
        let mut pt = Powertrain::new(&def(TransmissionMode::ManualStick));
        pt.apply(PowertrainCommand::QuickStart);
        pt.apply(PowertrainCommand::ClutchPedal(1.0));
        pt.step(&config, &DriveInputs::default(), config.fixed_dt);
        pt.apply(PowertrainCommand::ShiftTo(1));
        assert_eq!(pt.state().gear, 1);
        pt.apply(PowertrainCommand::ClutchPedal(0.0));
        pt.state().rpm = 3000.0;

        let wheel_inertia = 2.0;
        let inputs = DriveInputs { wheel_inertia, ..Default::default() };
        let torque = pt.step(&config, &inputs, config.fixed_dt);
        let ratio = pt.spec.ratio(1);
        let rpm = pt.state().rpm;
        // Applying the torque to the wheels must not push them past the engine.
        let wheel_rpm = torque * config.fixed_dt / wheel_inertia * RAD_PER_SEC_TO_RPM;
        assert!(torque > 0.0);
        assert!(wheel_rpm <= rpm / ratio + 1.0);
    }

    #[test]
    fn test_starter_brings_engine_to_life() {
        let config = SimConfig::default();
        let mut pt = Powertrain::new(&def(TransmissionMode::Automatic));
        pt.apply(PowertrainCommand::ToggleIgnition);
        pt.apply(PowertrainCommand::Starter(true));
        let mut started = false;
        for _ in 0..4000 {
            pt.step(&config, &DriveInputs::default(), config.fixed_dt);
            started |= pt.drain_events().any(|e| e == PowertrainEvent::EngineStarted);
        }
        assert!(started);
        assert!(pt.state().running);
    }

    #[test]
    fn test_shifting_below_stall_in_manual_engages_linearly() {
        let config = SimConfig::default();
        let mut pt = Powertrain::new(&def(TransmissionMode::ManualSequential));
        pt.apply(PowertrainCommand::ClutchPedal(1.0));
        pt.step(&config, &DriveInputs::default(), config.fixed_dt);
        pt.apply(PowertrainCommand::ShiftUp);
        assert_eq!(pt.state().gear, 1);

        let inputs = DriveInputs { wheel_inertia: 2.0, ..Default::default() };
        for i in 0..=10 {
            let pedal = 1.0 - i as f32 / 10.0;
            pt.apply(PowertrainCommand::ClutchPedal(pedal));
            pt.step(&config, &inputs, config.fixed_dt);
            assert!((pt.state().clutch - (1.0 - pedal)).abs() < 1e-6);
        }
        assert!(!pt.drain_events().any(|e| e == PowertrainEvent::EngineDied));
    }
}
