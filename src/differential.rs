//! Axle differentials: split the drive torque between two wheels.
//!
//! `T_in` is the torque offered to *each* wheel of the axle (the powertrain
//! output divided by the number of driven wheels), so a split axle hands both
//! wheels `T_in` and an open axle redistributes `2 * T_in`.

use crate::config::{DifferentialTuning, TractionControlMode, ViscousMode};
use crate::definition::{AxleDef, DiffMode};
use serde::{Deserialize, Serialize};

/// Per-step inputs of one axle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxleInput {
    /// Torque per wheel.
    pub torque: f32,
    /// Spin of both wheels (rad/s).
    pub omega: [f32; 2],
    /// Spin inertia of both wheels (kg·m²).
    pub inertia: [f32; 2],
    pub dt: f32,
}

/// Runtime axle: the two wheels, the modes it may cycle through and the
/// accumulated torsion of the locked mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axle {
    pub wheels: [usize; 2],
    pub modes: Vec<DiffMode>,
    pub mode_index: usize,
    /// Relative rotation (rad) accumulated while locked.
    pub torsion: f32,
}

impl Axle {
    pub fn from_def(def: &AxleDef) -> Self {
        let modes = if def.modes.is_empty() { vec![DiffMode::Open] } else { def.modes.clone() };
        Self { wheels: def.wheels, modes, mode_index: 0, torsion: 0.0 }
    }

    pub fn mode(&self) -> DiffMode {
        self.modes.get(self.mode_index).copied().unwrap_or(DiffMode::Open)
    }

    /// Cycle to the next declared mode.
    pub fn toggle_mode(&mut self) -> DiffMode {
        self.mode_index = (self.mode_index + 1) % self.modes.len().max(1);
        self.torsion = 0.0;
        self.mode()
    }

    /// Torque delivered to each wheel.
    pub fn distribute(&mut self, input: &AxleInput, tuning: &DifferentialTuning) -> [f32; 2] {
        match self.mode() {
            DiffMode::Open => open(input, tuning),
            DiffMode::Locked => self.locked(input, tuning),
            DiffMode::Split => split(input),
            DiffMode::Viscous => match tuning.viscous_mode {
                ViscousMode::SameAsSplit => split(input),
                ViscousMode::Damped => {
                    let [a, b] = split(input);
                    let coupling = coupling_torque(0.0, tuning.viscous_coupling, 0.0, input);
                    [a - coupling, b + coupling]
                }
            },
            DiffMode::TractionControl => match tuning.traction_control_mode {
                TractionControlMode::SameAsSplit => split(input),
                TractionControlMode::CapSpinningSide => {
                    let [mut a, mut b] = split(input);
                    let [wa, wb] = input.omega;
                    if (wa - wb).abs() > tuning.traction_control_threshold {
                        if wa.abs() > wb.abs() {
                            a *= 0.5;
                        } else {
                            b *= 0.5;
                        }
                    }
                    [a, b]
                }
            },
        }
    }

    fn locked(&mut self, input: &AxleInput, tuning: &DifferentialTuning) -> [f32; 2] {
        let [wa, wb] = input.omega;
        self.torsion += (wa - wb) * input.dt;
        let tau = coupling_torque(
            tuning.locked_torsion_rate,
            tuning.locked_torsion_damping,
            self.torsion,
            input,
        );
        [input.torque - tau, input.torque + tau]
    }
}

fn split(input: &AxleInput) -> [f32; 2] {
    [input.torque, input.torque]
}

fn open(input: &AxleInput, tuning: &DifferentialTuning) -> [f32; 2] {
    let [wa, wb] = input.omega;
    let sum = wa.abs() + wb.abs();
    if sum <= f32::EPSILON {
        return split(input);
    }
    let blend = (sum / tuning.open_blend_speed.max(f32::EPSILON)).min(1.0);
    let share = |w: f32| (1.0 - blend) + blend * 2.0 * w.abs() / sum;
    [input.torque * share(wa), input.torque * share(wb)]
}

/// Spring-damper torque between the two wheels, with rates clamped to what
/// the step size can integrate without blowing up.
fn coupling_torque(rate: f32, damping: f32, angle: f32, input: &AxleInput) -> f32 {
    let [ia, ib] = input.inertia;
    if ia <= 0.0 || ib <= 0.0 {
        return 0.0;
    }
    let mobility = 1.0 / ia + 1.0 / ib;
    let h = input.dt;
    let k = rate.min(1.0 / (h * h * mobility));
    let c = damping.min(1.0 / (h * mobility));
    k * angle + c * (input.omega[0] - input.omega[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(torque: f32, omega: [f32; 2]) -> AxleInput {
        AxleInput { torque, omega, inertia: [1.0, 1.0], dt: 0.0005 }
    }

    fn axle(mode: DiffMode) -> Axle {
        Axle::from_def(&AxleDef { wheels: [0, 1], modes: vec![mode] })
    }

    #[test]
    fn test_open_splits_evenly_at_rest() {
        let tuning = DifferentialTuning::default();
        let out = axle(DiffMode::Open).distribute(&input(100.0, [0.0, 0.0]), &tuning);
        assert_eq!(out, [100.0, 100.0]);
    }

    #[test]
    fn test_open_favours_faster_wheel_at_speed() {
        let tuning = DifferentialTuning::default();
        let out = axle(DiffMode::Open).distribute(&input(100.0, [30.0, 10.0]), &tuning);
        assert!((out[0] - 150.0).abs() < 1e-3);
        assert!((out[1] - 50.0).abs() < 1e-3);
        // Total is conserved
        assert!((out[0] + out[1] - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_split_and_default_viscous_tc_match() {
        let tuning = DifferentialTuning::default();
        let i = input(80.0, [20.0, 5.0]);
        let split = axle(DiffMode::Split).distribute(&i, &tuning);
        assert_eq!(split, [80.0, 80.0]);
        assert_eq!(axle(DiffMode::Viscous).distribute(&i, &tuning), split);
        assert_eq!(axle(DiffMode::TractionControl).distribute(&i, &tuning), split);
    }

    #[test]
    fn test_traction_control_caps_spinning_side() {
        let tuning = DifferentialTuning {
            traction_control_mode: TractionControlMode::CapSpinningSide,
            ..Default::default()
        };
        let out = axle(DiffMode::TractionControl).distribute(&input(80.0, [20.0, 5.0]), &tuning);
        assert_eq!(out, [40.0, 80.0]);
    }

    #[test]
    fn test_locked_resists_relative_spin() {
        let tuning = DifferentialTuning::default();
        let mut a = axle(DiffMode::Locked);
        let mut omega = [10.0f32, 0.0];
        for _ in 0..2000 {
            let out = a.distribute(&input(0.0, omega), &tuning);
            omega[0] += out[0] * 0.0005;
            omega[1] += out[1] * 0.0005;
        }
        assert!((omega[0] - omega[1]).abs() < 0.5);
        // Momentum is shared, not created
        assert!((omega[0] + omega[1] - 10.0).abs() < 1e-2);
    }

    #[test]
    fn test_toggle_cycles_declared_modes() {
        let def = AxleDef { wheels: [0, 1], modes: vec![DiffMode::Open, DiffMode::Locked] };
        let mut a = Axle::from_def(&def);
        assert_eq!(a.toggle_mode(), DiffMode::Locked);
        assert_eq!(a.toggle_mode(), DiffMode::Open);
    }
}
