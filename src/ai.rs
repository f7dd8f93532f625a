//! Waypoint-following driver for AI-kind actors.
//!
//! Each frame the manager hands the driver a small [`AiView`] of its actor
//! and copies the returned [`AiCommand`] into the actor's controls. Steering
//! is proportional to the lateral component of the direction to the current
//! waypoint; throttle and brake hold a target speed that drops ahead of
//! sharp turns.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Horizontal distance at which a road vehicle reaches a waypoint (m).
const ROAD_TOLERANCE: f32 = 5.0;
/// Boats are given more room.
const BOAT_TOLERANCE: f32 = 50.0;
/// Speed band around the target in which the driver coasts (km/h).
const SPEED_BAND: f32 = 1.0;
/// Speed floor and ceiling applied ahead of turns (km/h).
const TURN_SPEED_MAX: f32 = 50.0;
const TURN_SPEED_MIN: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaypointEvent {
    ToggleLights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub position: Vec3,
    /// New target speed from here on (km/h).
    pub speed: Option<f32>,
    /// New throttle ceiling from here on.
    pub power: Option<f32>,
    pub event: Option<WaypointEvent>,
}

impl Waypoint {
    pub fn at(position: Vec3) -> Self {
        Self { position, speed: None, power: None, event: None }
    }
}

/// What the driver sees of its actor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AiView {
    pub position: Vec3,
    /// Horizontal forward direction.
    pub forward: Vec3,
    /// Ground speed (m/s).
    pub speed: f32,
    pub engine_running: bool,
    pub has_engine: bool,
    pub is_boat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AiCommand {
    pub throttle: f32,
    pub brake: f32,
    pub steering: f32,
    pub parking_brake: bool,
    pub start_engine: bool,
    pub toggle_lights: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDriver {
    pub enabled: bool,
    pub waypoints: Vec<Waypoint>,
    pub current: usize,
    /// Target speed set by the waypoints (km/h).
    pub cruise_speed: f32,
    pub power: f32,
    pub finished: bool,
    /// Target after turn slowdown (km/h).
    target_speed: f32,
}

impl Default for AiDriver {
    fn default() -> Self {
        Self {
            enabled: true,
            waypoints: Vec::new(),
            current: 0,
            cruise_speed: TURN_SPEED_MAX,
            power: 0.8,
            finished: false,
            target_speed: TURN_SPEED_MAX,
        }
    }
}

fn flat(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

impl AiDriver {
    pub fn with_waypoints(waypoints: Vec<Waypoint>) -> Self {
        Self { waypoints, ..Self::default() }
    }

    pub fn add_waypoint(&mut self, waypoint: Waypoint) {
        self.waypoints.push(waypoint);
        self.finished = false;
    }

    pub fn target(&self) -> Option<&Waypoint> {
        self.waypoints.get(self.current)
    }

    /// Angle (rad) of the turn at the current waypoint, 0 on a straight.
    fn turn_angle(&self) -> f32 {
        let (Some(prev), Some(cur), Some(next)) = (
            self.current.checked_sub(1).and_then(|i| self.waypoints.get(i)),
            self.waypoints.get(self.current),
            self.waypoints.get(self.current + 1),
        ) else {
            return 0.0;
        };
        let d1 = flat(cur.position - prev.position);
        let d2 = flat(next.position - cur.position);
        if d1.length_squared() < 1e-6 || d2.length_squared() < 1e-6 {
            return 0.0;
        }
        d1.angle_between(d2)
    }

    fn reach(&mut self, command: &mut AiCommand) {
        let Some(wp) = self.waypoints.get(self.current) else {
            return;
        };
        if let Some(speed) = wp.speed {
            self.cruise_speed = speed;
        }
        if let Some(power) = wp.power {
            self.power = power;
        }
        if wp.event == Some(WaypointEvent::ToggleLights) {
            command.toggle_lights = true;
        }
        self.current += 1;
        if self.current >= self.waypoints.len() {
            self.finished = true;
        }
    }

    /// Decide the controls for this frame.
    pub fn update(&mut self, view: &AiView) -> AiCommand {
        let mut command = AiCommand::default();
        if !self.enabled || self.finished || self.waypoints.is_empty() {
            command.parking_brake = self.finished && view.has_engine;
            command.brake = if command.parking_brake { 1.0 } else { 0.0 };
            return command;
        }

        let tolerance = if view.is_boat { BOAT_TOLERANCE } else { ROAD_TOLERANCE };
        let here = flat(view.position);
        if let Some(wp) = self.target() {
            if flat(wp.position).distance(here) < tolerance {
                self.reach(&mut command);
                if self.finished {
                    command.parking_brake = view.has_engine;
                    command.brake = 1.0;
                    return command;
                }
            }
        }
        let Some(wp) = self.target() else {
            return command;
        };
        let to_target = flat(wp.position) - here;
        let distance = to_target.length();

        let forward = flat(view.forward).try_normalize().unwrap_or(Vec3::Z);
        let left = Vec3::Y.cross(forward);
        let dir = to_target.try_normalize().unwrap_or(forward);
        let mut yaw = dir.dot(left);
        if dir.dot(forward) < 0.0 {
            yaw = if yaw >= 0.0 { 1.0 } else { -1.0 };
        }
        command.steering = yaw.clamp(-1.0, 1.0);

        if !view.has_engine {
            command.throttle = self.power;
            return command;
        }
        command.start_engine = !view.engine_running;

        let kmh = view.speed * 3.6;
        let angle = self.turn_angle();
        self.target_speed = if angle > 0.0 && distance < kmh {
            let t = ((angle.to_degrees() - 10.0) / 170.0) * 1.4;
            let ceiling = self.cruise_speed.min(TURN_SPEED_MAX);
            ((1.0 - t) * TURN_SPEED_MAX + t * TURN_SPEED_MIN).clamp(TURN_SPEED_MIN, ceiling)
        } else {
            self.cruise_speed
        };

        let sharp = yaw.abs() >= 0.5;
        if kmh < self.target_speed - SPEED_BAND {
            command.throttle =
                if sharp { self.power / 3.0 } else { (self.power - angle * 0.1).max(0.0) };
        } else if kmh > self.target_speed + SPEED_BAND {
            command.brake = if sharp { 0.5 } else { 1.0 / 3.0 };
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(position: Vec3, forward: Vec3, speed: f32) -> AiView {
        AiView { position, forward, speed, engine_running: true, has_engine: true, is_boat: false }
    }

    #[test]
    fn test_steers_towards_waypoint() {
        let mut ai = AiDriver::with_waypoints(vec![Waypoint::at(Vec3::new(20.0, 0.0, 20.0))]);
        // Facing +z, target ahead and to +x, which is the left side.
        let cmd = ai.update(&view(Vec3::ZERO, Vec3::Z, 0.0));
        assert!(cmd.steering > 0.5);
        assert!(cmd.throttle > 0.0);
        assert_eq!(cmd.brake, 0.0);

        let mut ai = AiDriver::with_waypoints(vec![Waypoint::at(Vec3::new(-20.0, 0.0, 20.0))]);
        assert!(ai.update(&view(Vec3::ZERO, Vec3::Z, 0.0)).steering < -0.5);
    }

    #[test]
    fn test_target_behind_gives_full_lock() {
        let mut ai = AiDriver::with_waypoints(vec![Waypoint::at(Vec3::new(1.0, 0.0, -30.0))]);
        let cmd = ai.update(&view(Vec3::ZERO, Vec3::Z, 0.0));
        assert_eq!(cmd.steering, 1.0);
    }

    #[test]
    fn test_brakes_above_target_speed() {
        let mut ai = AiDriver::with_waypoints(vec![
            Waypoint { speed: Some(20.0), ..Waypoint::at(Vec3::new(0.0, 0.0, 2.0)) },
            Waypoint::at(Vec3::new(0.0, 0.0, 500.0)),
        ]);
        let cmd = ai.update(&view(Vec3::ZERO, Vec3::Z, 15.0));
        assert_eq!(ai.current, 1);
        assert_eq!(ai.cruise_speed, 20.0);
        assert!(cmd.brake > 0.0);
        assert_eq!(cmd.throttle, 0.0);
    }

    #[test]
    fn test_last_waypoint_parks() {
        let mut ai = AiDriver::with_waypoints(vec![Waypoint {
            event: Some(WaypointEvent::ToggleLights),
            ..Waypoint::at(Vec3::new(0.0, 0.0, 3.0))
        }]);
        let cmd = ai.update(&view(Vec3::ZERO, Vec3::Z, 2.0));
        assert!(ai.finished);
        assert!(cmd.toggle_lights);
        assert!(cmd.parking_brake);
        let again = ai.update(&view(Vec3::ZERO, Vec3::Z, 0.0));
        assert!(again.parking_brake);
        assert!(!again.toggle_lights);
    }

    #[test]
    fn test_starts_stopped_engine() {
        let mut ai = AiDriver::with_waypoints(vec![Waypoint::at(Vec3::new(0.0, 0.0, 100.0))]);
        let mut v = view(Vec3::ZERO, Vec3::Z, 0.0);
        v.engine_running = false;
        assert!(ai.update(&v).start_engine);
    }
}
