use serde::Deserialize;

use crate::commander::Velocity;
use crate::marker::TargetEstimate;

/// Discrete docking situation, recomputed from scratch every camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentState {
    Lost,
    AlignRight,
    AlignLeft,
    Forward,
    Backward,
    Aligned,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DockingConfig {
    /// lateral tolerance around the image center in pixels
    pub alignment_tolerance: f32,
    /// extra pixels between entering and leaving the lateral band
    #[serde(default)]
    pub alignment_hysteresis: f32,
    /// docking distance in meters
    pub target_distance: f32,
    /// acceptable band around the docking distance in meters
    pub distance_tolerance: f32,
    /// extra meters between entering and leaving the distance band
    #[serde(default)]
    pub distance_hysteresis: f32,
    /// rotation speed while aligning in radians per second
    pub rotation_speed: f32,
    /// drive speed while approaching in meters per second
    pub drive_speed: f32,
}

/// Classify the current frame into exactly one state.
///
/// Branches are evaluated in fixed priority order: lost, lateral alignment,
/// distance, aligned. The previous state only widens or tightens the band it
/// occupies so a measurement sitting on a boundary does not chatter between
/// two states on successive frames.
pub fn classify(
    previous: AlignmentState,
    estimate: Option<&TargetEstimate>,
    config: &DockingConfig,
) -> AlignmentState {
    use AlignmentState::*;

    let Some(estimate) = estimate else {
        return Lost;
    };

    let lateral_band = if matches!(previous, AlignRight | AlignLeft) {
        config.alignment_tolerance - config.alignment_hysteresis
    } else {
        config.alignment_tolerance + config.alignment_hysteresis
    };
    if estimate.lateral_offset > lateral_band {
        return AlignRight;
    }
    if estimate.lateral_offset < -lateral_band {
        return AlignLeft;
    }

    let distance_band = if matches!(previous, Forward | Backward) {
        config.distance_tolerance - config.distance_hysteresis
    } else {
        config.distance_tolerance + config.distance_hysteresis
    };
    if estimate.distance > config.target_distance + distance_band {
        Forward
    } else if estimate.distance < config.target_distance - distance_band {
        Backward
    } else {
        Aligned
    }
}

/// Fixed state to command table. Positive offset means the marker sits right
/// of center, so the robot turns clockwise to face it.
pub fn command_for(state: AlignmentState, config: &DockingConfig) -> Velocity {
    match state {
        AlignmentState::Lost | AlignmentState::Aligned => Velocity::stopped(),
        AlignmentState::AlignRight => Velocity::rotate(-config.rotation_speed),
        AlignmentState::AlignLeft => Velocity::rotate(config.rotation_speed),
        AlignmentState::Forward => Velocity::forward(config.drive_speed),
        AlignmentState::Backward => Velocity::forward(-config.drive_speed),
    }
}
