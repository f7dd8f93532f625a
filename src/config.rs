//! Simulation configuration and calibration tables.
//!
//! Everything here is plain data: it is inserted into the game context as a
//! resource, cloned into the actor manager, and read-only during a frame.
//! All structs use `#[serde(default)]` so partial JSON files are accepted.

use crate::error::ConfigError;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the actor manager and physics engine.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Fixed physics step in seconds.
    pub fixed_dt: f32,
    /// Upper bound applied to the incoming frame delta before stepping.
    pub max_frame_dt: f32,
    /// Simulation speed multiplier applied after the frame cap.
    pub sim_speed: f32,
    /// Gravity along the world Y axis (m/s², negative is down).
    pub gravity: f32,
    /// Number of actor slots.
    pub max_actors: usize,
    /// Worker threads for the pool; 0 picks `max(1, cores - 1)`.
    pub worker_threads: usize,
    /// Leave the simulation task running across the frame boundary.
    /// When false the task is joined before `update` returns.
    pub async_physics: bool,
    /// Node speed (m/s) above which a node is treated as numerically broken.
    pub max_node_speed: f32,
    /// Default aerodynamic drag coefficient applied per node.
    pub node_drag: f32,
    /// Default collision range for cab triangles (m).
    pub collision_range: f32,
    /// Air density at sea level (kg/m³).
    pub air_density: f32,
    /// Water density (kg/m³).
    pub water_density: f32,
    pub sleep: SleepTuning,
    pub net: NetTuning,
    pub differential: DifferentialTuning,
    pub autoshift: AutoShiftCalibration,
    pub rev_limiter: RevLimiterMode,
    pub replay: ReplayTuning,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 2000.0,     // 2 kHz
            max_frame_dt: 1.0 / 20.0,   // no more than 100 steps per frame
            sim_speed: 1.0,
            gravity: -9.81,
            max_actors: 256,
            worker_threads: 0,
            async_physics: false,
            max_node_speed: 1000.0,
            node_drag: 0.05,
            collision_range: 0.05,
            air_density: 1.225,
            water_density: 1000.0,
            sleep: SleepTuning::default(),
            net: NetTuning::default(),
            differential: DifferentialTuning::default(),
            autoshift: AutoShiftCalibration::default(),
            rev_limiter: RevLimiterMode::default(),
            replay: ReplayTuning::default(),
        }
    }
}

impl SimConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            return Err(ConfigError::Invalid("fixed_dt must be positive".into()));
        }
        if self.max_frame_dt < self.fixed_dt {
            return Err(ConfigError::Invalid(
                "max_frame_dt must be at least one fixed step".into(),
            ));
        }
        if self.max_actors == 0 {
            return Err(ConfigError::Invalid("max_actors must be non-zero".into()));
        }
        let windows = &self.autoshift;
        if windows.window_short == 0 || windows.window_long < windows.window_short {
            return Err(ConfigError::Invalid(
                "autoshift windows must satisfy 0 < short <= long".into(),
            ));
        }
        Ok(())
    }

    /// Worker thread count after resolving the "auto" setting.
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.saturating_sub(1).max(1)
    }
}

/// Sleep arbiter thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepTuning {
    /// Max node speed (m/s) considered "at rest".
    pub velocity_threshold: f32,
    /// Seconds an actor must stay at rest before it is put to sleep.
    pub time_threshold: f32,
    /// Extra time (s) of motion used to predict a sleeper's bounding box.
    pub prediction_time: f32,
}

impl Default for SleepTuning {
    fn default() -> Self {
        Self {
            velocity_threshold: 0.1,
            time_threshold: 1.0,
            prediction_time: 0.5,
        }
    }
}

/// Network stream cadence and interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetTuning {
    /// Minimum seconds between state updates of a simulated actor.
    pub send_interval: f32,
    /// A sleeping actor keeps the fast cadence for this long after falling asleep.
    pub sleeping_fast_window: f32,
    /// Cadence (s) for sleeping actors after the fast window.
    pub sleeping_interval: f32,
    /// Render delay (s) behind the newest received update.
    pub interpolation_delay: f32,
    /// Received snapshots kept per networked actor.
    pub buffer_capacity: usize,
}

impl Default for NetTuning {
    fn default() -> Self {
        Self {
            send_interval: 0.0,
            sleeping_fast_window: 10.0,
            sleeping_interval: 5.0,
            interpolation_delay: 0.1,
            buffer_capacity: 16,
        }
    }
}

/// How a "viscous" differential distributes torque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViscousMode {
    /// Dispatch exactly like `split`.
    #[default]
    SameAsSplit,
    /// Transfer torque proportional to the speed difference.
    Damped,
}

/// How a "traction-control" differential distributes torque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TractionControlMode {
    /// Dispatch exactly like `split`.
    #[default]
    SameAsSplit,
    /// Halve the torque of the faster wheel once the speed gap exceeds the threshold.
    CapSpinningSide,
}

/// Differential calibration shared by all axles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialTuning {
    /// Summed wheel speed (rad/s) below which `open` blends toward 50/50.
    pub open_blend_speed: f32,
    /// Torsion spring of a locked axle (N·m/rad).
    pub locked_torsion_rate: f32,
    /// Torsion damping of a locked axle (N·m·s/rad).
    pub locked_torsion_damping: f32,
    pub viscous_mode: ViscousMode,
    /// Torque transferred per rad/s of speed difference in `Damped` mode.
    pub viscous_coupling: f32,
    pub traction_control_mode: TractionControlMode,
    /// Speed difference (rad/s) that triggers the traction-control cap.
    pub traction_control_threshold: f32,
}

impl Default for DifferentialTuning {
    fn default() -> Self {
        Self {
            open_blend_speed: 10.0,
            locked_torsion_rate: 1.0e6,
            locked_torsion_damping: 1.0e4,
            viscous_mode: ViscousMode::default(),
            viscous_coupling: 1.0e4,
            traction_control_mode: TractionControlMode::default(),
            traction_control_threshold: 5.0,
        }
    }
}

/// Decision table constants of the automatic gearbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoShiftCalibration {
    /// Seconds between controller samples.
    pub sample_interval: f32,
    /// Short sliding window length (samples).
    pub window_short: usize,
    /// Long sliding window length (samples).
    pub window_long: usize,
    /// Throttle band that counts as "full" demand.
    pub band_full: f32,
    /// Upper edge of the moderate band.
    pub band_high: f32,
    /// Upper edge of the light band.
    pub band_mid: f32,
    /// Upper edge of the coasting band.
    pub band_low: f32,
    /// Increment of the aggressiveness estimate per sporty sample.
    pub behaviour_step: f32,
    /// Divisor applied to the aggressiveness estimate per relaxed sample.
    pub behaviour_decay: f32,
    /// Upshift delay in samples at full aggressiveness.
    pub upshift_delay_samples: f32,
    /// Rpm below max at which the gearbox always shifts up.
    pub redline_margin_rpm: f32,
    /// Minimum rpm change for a downshift, as a fraction of a third of the rpm range.
    pub downshift_min_fraction: f32,
    /// Minimum rpm change for an upshift, as a fraction of a third of the rpm range.
    pub upshift_min_fraction: f32,
}

impl Default for AutoShiftCalibration {
    fn default() -> Self {
        Self {
            sample_interval: 0.02,
            window_short: 50,
            window_long: 200,
            band_full: 0.8,
            band_high: 0.6,
            band_mid: 0.4,
            band_low: 0.2,
            behaviour_step: 0.01,
            behaviour_decay: 1.01,
            upshift_delay_samples: 100.0,
            redline_margin_rpm: 100.0,
            downshift_min_fraction: 1.0 / 6.0,
            upshift_min_fraction: 1.0 / 3.0,
        }
    }
}

/// Rev limiter behaviour once over-revving stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RevLimiterMode {
    /// The cap applies to the clutch used in the current step only and
    /// re-opens as soon as the condition clears.
    #[default]
    PerStep,
    /// The capped value is written back into the clutch state and stays
    /// until something else raises it (manual pedal, auto-clutch logic).
    Latched,
}

/// Replay recorder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayTuning {
    pub enabled: bool,
    /// Recorded frames kept per actor.
    pub capacity: usize,
    /// Seconds of simulated time between recorded frames.
    pub interval: f32,
}

impl Default for ReplayTuning {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 400,
            interval: 0.05,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.fixed_dt - 0.0005).abs() < 1e-9);
        assert!(config.resolved_worker_threads() >= 1);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{ "max_actors": 8, "sleep": { "time_threshold": 2.5 } }"#;
        let config = SimConfig::from_json_str(json).unwrap();
        assert_eq!(config.max_actors, 8);
        assert_eq!(config.sleep.time_threshold, 2.5);
        assert_eq!(config.sleep.velocity_threshold, SleepTuning::default().velocity_threshold);
        assert_eq!(config.autoshift, AutoShiftCalibration::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = SimConfig::from_json_str(r#"{ "fixed_dt": 0.0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SimConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_open_question_settings_roundtrip() {
        let mut config = SimConfig::default();
        config.differential.traction_control_mode = TractionControlMode::CapSpinningSide;
        config.rev_limiter = RevLimiterMode::Latched;
        let json = serde_json::to_string(&config).unwrap();
        let back = SimConfig::from_json_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
