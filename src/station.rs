use anyhow::Result;
use chrono::{DateTime, Utc};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alignment::{self, AlignmentState, DockingConfig};
use crate::commander::{CommandEmitter, Velocity};
use crate::configuration::AppConfig;
use crate::localisation::LocalisationManager;
use crate::marker::{self, MarkerCalibration, QuadDetection};
use crate::navigation::{GoalController, Pose};

/// Which controller's output reaches the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Manual,
    VisualServo,
    GoalNav,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ManualConfig {
    /// meters per second while a drive key is held
    pub linear_speed: f32,
    /// radians per second while a turn key is held
    pub angular_speed: f32,
}

/// Per frame marker detection result published by the vision pipeline.
/// `corners` is absent when the frame contained no marker.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MarkerDetectionMessage {
    pub image_width: f32,
    pub image_height: f32,
    pub corners: Option<Vec<na::Point2<f32>>>,
}

impl MarkerDetectionMessage {
    pub fn quad(&self) -> Option<QuadDetection> {
        let corners = self.corners.as_deref()?;
        let corners: [na::Point2<f32>; 4] = corners.try_into().ok()?;
        Some(QuadDetection {
            corners,
            image_width: self.image_width,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
}

/// Level triggered teleoperation input: one message on press, one on release.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KeyInputMessage {
    pub key: Key,
    pub pressed: bool,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct DestinationMessage {
    pub x: f32,
    pub y: f32,
}

/// Every external input, delivered through one queue and processed to
/// completion one at a time.
#[derive(Debug)]
pub enum StationEvent {
    MarkerDetection(MarkerDetectionMessage),
    PoseUpdate(Pose),
    ModeSwitch(Mode),
    Destination(Option<na::Point2<f32>>),
    KeyInput(KeyInputMessage),
    Tick,
}

/// Owns every piece of mutable control state and the only command emitter.
pub struct StationController {
    mode: Mode,
    alignment_state: AlignmentState,
    calibration: MarkerCalibration,
    docking: DockingConfig,
    manual: ManualConfig,
    localisation: LocalisationManager,
    goal: GoalController,
    emitter: CommandEmitter,
    stale_pose_reported: bool,
}

impl StationController {
    pub fn new(config: &AppConfig, emitter: CommandEmitter) -> Self {
        Self {
            mode: Mode::Manual,
            alignment_state: AlignmentState::Lost,
            calibration: config.marker.clone(),
            docking: config.docking.clone(),
            manual: config.manual.clone(),
            localisation: LocalisationManager::new(config.scan.pose_timeout()),
            goal: GoalController::new(config.navigation.clone()),
            emitter,
            stale_pose_reported: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn alignment_state(&self) -> AlignmentState {
        self.alignment_state
    }

    pub async fn handle_event(&mut self, event: StationEvent) -> Result<()> {
        match event {
            StationEvent::MarkerDetection(message) => self.handle_detection(message).await,
            StationEvent::PoseUpdate(pose) => self.handle_pose(pose).await,
            StationEvent::ModeSwitch(mode) => self.switch_mode(mode).await,
            StationEvent::Destination(destination) => self.set_destination(destination).await,
            StationEvent::KeyInput(input) => self.handle_key(input).await,
            StationEvent::Tick => self.tick().await,
        }
    }

    async fn handle_detection(&mut self, message: MarkerDetectionMessage) -> Result<()> {
        let estimate = message.quad().and_then(|quad| {
            match marker::estimate(&quad, &self.calibration) {
                Ok(estimate) => Some(estimate),
                Err(error) => {
                    // treated exactly like no detection
                    debug!("Dropping detection: {error}");
                    None
                }
            }
        });

        let state = alignment::classify(self.alignment_state, estimate.as_ref(), &self.docking);
        if state != self.alignment_state {
            debug!(?state, "Alignment state changed");
        }
        self.alignment_state = state;

        if self.mode == Mode::VisualServo {
            self.emitter.emit_for_alignment(state, &self.docking).await?;
        }
        Ok(())
    }

    async fn handle_pose(&mut self, pose: Pose) -> Result<()> {
        self.localisation.update_pose(pose);
        self.stale_pose_reported = false;
        if self.mode == Mode::GoalNav {
            let pose = self.localisation.latest_pose();
            let velocity = self.goal.drive_towards(pose.as_ref());
            self.emitter.emit(&velocity).await?;
        }
        Ok(())
    }

    /// Switching modes stops the robot exactly once so no stale command from
    /// the previous mode keeps acting.
    async fn switch_mode(&mut self, mode: Mode) -> Result<()> {
        if mode == self.mode {
            return Ok(());
        }
        info!(?mode, "Switching mode");
        self.mode = mode;
        self.emitter.reset_edge_memory();
        if mode == Mode::GoalNav {
            self.goal.reset();
        }
        self.emitter.emit_stop().await?;
        Ok(())
    }

    async fn set_destination(&mut self, destination: Option<na::Point2<f32>>) -> Result<()> {
        match destination {
            Some(point) => info!("New destination [{}, {}]", point.x, point.y),
            None => info!("Destination cleared"),
        }
        self.goal.set_destination(destination);
        Ok(())
    }

    async fn handle_key(&mut self, input: KeyInputMessage) -> Result<()> {
        if self.mode != Mode::Manual {
            return Ok(());
        }
        let velocity = if input.pressed {
            match input.key {
                Key::Up => Velocity::forward(self.manual.linear_speed),
                Key::Down => Velocity::forward(-self.manual.linear_speed),
                Key::Left => Velocity::rotate(self.manual.angular_speed),
                Key::Right => Velocity::rotate(-self.manual.angular_speed),
            }
        } else {
            // explicit zero on release, the control is "as long as held"
            match input.key {
                Key::Up | Key::Down => Velocity::forward(0.0),
                Key::Left | Key::Right => Velocity::rotate(0.0),
            }
        };
        self.emitter.emit(&velocity).await
    }

    /// Fixed rate housekeeping. Forces a stop when goal navigation is active
    /// but the pose stream has gone stale.
    async fn tick(&mut self) -> Result<()> {
        if self.mode == Mode::GoalNav
            && self.goal.destination().is_some()
            && self.localisation.latest_pose().is_none()
            && !self.stale_pose_reported
        {
            warn!("Pose stale, stopping");
            self.stale_pose_reported = true;
            self.emitter.emit_stop().await?;
        }
        Ok(())
    }
}
