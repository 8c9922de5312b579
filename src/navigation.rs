use nalgebra as na;
use serde::Deserialize;
use std::f32::consts::PI;
use std::fmt;

use crate::commander::Velocity;

/// Robot position and heading in the localization engine's map frame.
#[derive(Debug, Clone, Copy)]
pub struct Pose {
    position: na::Point2<f32>,
    heading: f32,
}

impl Pose {
    pub fn new((x, y): (f32, f32), heading: f32) -> Self {
        Self {
            position: na::Point2::new(x, y),
            heading,
        }
    }

    pub fn from_na(position: na::Point2<f32>, heading: f32) -> Self {
        Self { position, heading }
    }

    pub fn position(&self) -> &na::Point2<f32> {
        &self.position
    }

    pub fn heading(&self) -> f32 {
        self.heading
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}, {}] -> {}",
            self.position.x,
            self.position.y,
            self.heading.to_degrees()
        )
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct NavigationConfig {
    /// heading error below which the rotate phase hands over, radians
    pub angle_tolerance: f32,
    /// distance below which the goal counts as reached, meters
    pub distance_tolerance: f32,
    pub rotation_gains: PidGains,
    pub translation_gains: PidGains,
    pub max_angular_speed: f32,
    pub max_linear_speed: f32,
}

#[derive(Debug, Default)]
struct PidChannel {
    last_error: f32,
    cumulative_error: f32,
}

impl PidChannel {
    fn update(&mut self, error: f32, gains: &PidGains) -> f32 {
        let output = gains.kp * error
            + gains.ki * self.cumulative_error
            + gains.kd * (error - self.last_error);
        self.cumulative_error += error;
        self.last_error = error;
        output
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Two-phase feedback controller driving the robot to a destination point.
///
/// Re-evaluated on every localization update. Rotates in place until the
/// bearing error is inside the angular tolerance, then drives straight, then
/// stops. Accumulators are reset when the destination changes and when goal
/// navigation is re-entered.
#[derive(Debug)]
pub struct GoalController {
    config: NavigationConfig,
    destination: Option<na::Point2<f32>>,
    rotation: PidChannel,
    translation: PidChannel,
}

impl GoalController {
    pub fn new(config: NavigationConfig) -> Self {
        Self {
            config,
            destination: None,
            rotation: PidChannel::default(),
            translation: PidChannel::default(),
        }
    }

    pub fn set_destination(&mut self, destination: Option<na::Point2<f32>>) {
        self.destination = destination;
        self.reset();
    }

    pub fn destination(&self) -> Option<&na::Point2<f32>> {
        self.destination.as_ref()
    }

    pub fn reset(&mut self) {
        self.rotation.reset();
        self.translation.reset();
    }

    /// Velocity command for the latest pose.
    ///
    /// A missing pose or destination always resolves to a stop, never to
    /// acting on a stale or default position.
    pub fn drive_towards(&mut self, pose: Option<&Pose>) -> Velocity {
        let (Some(pose), Some(destination)) = (pose, self.destination) else {
            return Velocity::stopped();
        };

        let to_target = destination - *pose.position();
        let relative_distance = to_target.magnitude();
        // converged, leave the accumulators alone until the destination changes
        if relative_distance <= self.config.distance_tolerance {
            return Velocity::stopped();
        }

        let bearing = to_target.y.atan2(to_target.x);
        let relative_angle = normalize_angle(bearing - pose.heading());

        if relative_angle.abs() > self.config.angle_tolerance {
            let angular = self
                .rotation
                .update(relative_angle, &self.config.rotation_gains)
                .clamp(-self.config.max_angular_speed, self.config.max_angular_speed);
            Velocity::rotate(angular)
        } else {
            let linear = self
                .translation
                .update(relative_distance, &self.config.translation_gains)
                .clamp(-self.config.max_linear_speed, self.config.max_linear_speed);
            Velocity::forward(linear)
        }
    }
}

/// Wrap an angle into (-pi, pi] so the controller always takes the shorter
/// rotation direction.
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(2.0 * PI);
    if wrapped > PI {
        wrapped - 2.0 * PI
    } else {
        wrapped
    }
}
