use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zenoh::{prelude::r#async::*, Session};

use crate::alignment::{self, AlignmentState, DockingConfig};
use crate::error::ErrorWrapper;

/// Desired body velocity. Linear in meters per second, angular in radians
/// per second with counterclockwise positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub linear: f32,
    pub angular: f32,
}

impl Velocity {
    pub fn stopped() -> Self {
        Self {
            linear: 0.0,
            angular: 0.0,
        }
    }

    pub fn forward(linear: f32) -> Self {
        Self {
            linear,
            angular: 0.0,
        }
    }

    pub fn rotate(angular: f32) -> Self {
        Self {
            linear: 0.0,
            angular,
        }
    }
}

/// Wire encoding of velocity commands. The receiving firmware expects exactly
/// one of these per deployment.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandEncoding {
    /// two JSON messages per emission: `["Forward", linear]`, `["Rotate", angular]`
    #[default]
    TaggedPairs,
    /// one CDR encoded twist per emission
    Twist,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

impl From<Velocity> for Twist {
    fn from(velocity: Velocity) -> Self {
        Twist {
            linear: Vector3 {
                x: velocity.linear as f64,
                ..Vector3::default()
            },
            angular: Vector3 {
                z: velocity.angular as f64,
                ..Vector3::default()
            },
        }
    }
}

impl From<&Twist> for Velocity {
    fn from(twist: &Twist) -> Self {
        Velocity {
            linear: twist.linear.x as f32,
            angular: twist.angular.z as f32,
        }
    }
}

pub fn encode_tagged(velocity: &Velocity) -> Result<(Vec<u8>, Vec<u8>)> {
    let forward = serde_json::to_vec(&("Forward", velocity.linear))?;
    let rotate = serde_json::to_vec(&("Rotate", velocity.angular))?;
    Ok((forward, rotate))
}

/// Apply one half of the tagged pair encoding onto a twist, mirroring the
/// robot firmware's listener.
pub fn apply_tagged(twist: &mut Twist, payload: &[u8]) -> Result<()> {
    let (tag, value): (String, f64) = serde_json::from_slice(payload)?;
    match tag.as_str() {
        "Forward" => twist.linear.x = value,
        "Rotate" => twist.angular.z = value,
        other => anyhow::bail!("unrecognized command tag {other:?}"),
    }
    Ok(())
}

pub fn encode_twist(velocity: &Velocity) -> Result<Vec<u8>> {
    Ok(cdr::serialize::<_, _, cdr::CdrLe>(
        &Twist::from(*velocity),
        cdr::Infinite,
    )?)
}

pub fn decode_twist(payload: &[u8]) -> Result<Twist> {
    Ok(cdr::deserialize(payload)?)
}

#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()>;
}

pub struct ZenohCommandSink {
    session: Arc<Session>,
    topic: String,
}

impl ZenohCommandSink {
    pub fn new(session: Arc<Session>, topic: String) -> Self {
        Self { session, topic }
    }
}

#[async_trait]
impl CommandSink for ZenohCommandSink {
    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        // fire and forget, no acknowledgment and no retry
        self.session
            .put(self.topic.as_str(), payload)
            .res_async()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        Ok(())
    }
}

/// The only component that publishes velocity commands.
///
/// State driven docking commands are edge triggered so the transport is not
/// saturated with duplicates. Continuous controllers emit through [`emit`]
/// directly since their magnitude changes on every update.
///
/// [`emit`]: CommandEmitter::emit
pub struct CommandEmitter {
    sink: Box<dyn CommandSink>,
    encoding: CommandEncoding,
    last_alignment: Option<AlignmentState>,
}

impl CommandEmitter {
    pub fn new(sink: Box<dyn CommandSink>, encoding: CommandEncoding) -> Self {
        Self {
            sink,
            encoding,
            last_alignment: None,
        }
    }

    pub async fn emit(&mut self, velocity: &Velocity) -> Result<()> {
        match self.encoding {
            CommandEncoding::TaggedPairs => {
                let (forward, rotate) = encode_tagged(velocity)?;
                self.sink.send(forward).await?;
                self.sink.send(rotate).await?;
            }
            CommandEncoding::Twist => {
                self.sink.send(encode_twist(velocity)?).await?;
            }
        }
        Ok(())
    }

    pub async fn emit_stop(&mut self) -> Result<()> {
        self.emit(&Velocity::stopped()).await
    }

    /// Publish the command for a docking state only when the state differs
    /// from the previously published one.
    pub async fn emit_for_alignment(
        &mut self,
        state: AlignmentState,
        config: &DockingConfig,
    ) -> Result<()> {
        if self.last_alignment == Some(state) {
            return Ok(());
        }
        self.last_alignment = Some(state);
        self.emit(&alignment::command_for(state, config)).await
    }

    /// Forget the previously published docking state so the next one is
    /// always published. Called on mode switches.
    pub fn reset_edge_memory(&mut self) {
        self.last_alignment = None;
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every payload instead of publishing it.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RecordingSink {
        pub fn payloads(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }

        /// Decode the recorded tagged pair stream the way the firmware does.
        pub fn decoded_tagged(&self) -> Vec<Twist> {
            let mut twist = Twist::default();
            self.payloads()
                .iter()
                .map(|payload| {
                    apply_tagged(&mut twist, payload).unwrap();
                    twist
                })
                .collect()
        }
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use approx::assert_relative_eq;

    fn docking_config() -> DockingConfig {
        DockingConfig {
            alignment_tolerance: 50.0,
            alignment_hysteresis: 0.0,
            target_distance: 0.3,
            distance_tolerance: 0.05,
            distance_hysteresis: 0.0,
            rotation_speed: 1.0,
            drive_speed: 0.2,
        }
    }

    #[test]
    fn tagged_and_twist_encodings_are_equivalent() {
        let velocity = Velocity {
            linear: 0.2,
            angular: -0.7,
        };

        let mut from_tagged = Twist::default();
        let (forward, rotate) = encode_tagged(&velocity).unwrap();
        apply_tagged(&mut from_tagged, &forward).unwrap();
        apply_tagged(&mut from_tagged, &rotate).unwrap();

        let from_twist = decode_twist(&encode_twist(&velocity).unwrap()).unwrap();

        let tagged_velocity = Velocity::from(&from_tagged);
        let twist_velocity = Velocity::from(&from_twist);
        assert_relative_eq!(tagged_velocity.linear, twist_velocity.linear);
        assert_relative_eq!(tagged_velocity.angular, twist_velocity.angular);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut twist = Twist::default();
        let payload = serde_json::to_vec(&("Strafe", 1.0)).unwrap();
        assert!(apply_tagged(&mut twist, &payload).is_err());
    }

    #[tokio::test]
    async fn tagged_emission_sends_two_messages() {
        let sink = RecordingSink::default();
        let mut emitter =
            CommandEmitter::new(Box::new(sink.clone()), CommandEncoding::TaggedPairs);
        emitter.emit(&Velocity::forward(0.2)).await.unwrap();

        let decoded = sink.decoded_tagged();
        assert_eq!(decoded.len(), 2);
        assert_relative_eq!(decoded[1].linear.x, 0.2, max_relative = 0.0001);
        assert_relative_eq!(decoded[1].angular.z, 0.0);
    }

    #[tokio::test]
    async fn twist_emission_sends_one_message() {
        let sink = RecordingSink::default();
        let mut emitter = CommandEmitter::new(Box::new(sink.clone()), CommandEncoding::Twist);
        emitter.emit(&Velocity::rotate(-0.5)).await.unwrap();

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 1);
        let twist = decode_twist(&payloads[0]).unwrap();
        assert_relative_eq!(twist.angular.z, -0.5, max_relative = 0.0001);
    }

    #[tokio::test]
    async fn alignment_emission_is_edge_triggered() {
        let sink = RecordingSink::default();
        let mut emitter = CommandEmitter::new(Box::new(sink.clone()), CommandEncoding::Twist);
        let config = docking_config();

        emitter
            .emit_for_alignment(AlignmentState::Forward, &config)
            .await
            .unwrap();
        emitter
            .emit_for_alignment(AlignmentState::Forward, &config)
            .await
            .unwrap();
        assert_eq!(sink.payloads().len(), 1);

        emitter
            .emit_for_alignment(AlignmentState::Aligned, &config)
            .await
            .unwrap();
        assert_eq!(sink.payloads().len(), 2);
    }

    #[tokio::test]
    async fn edge_memory_reset_forces_next_publish() {
        let sink = RecordingSink::default();
        let mut emitter = CommandEmitter::new(Box::new(sink.clone()), CommandEncoding::Twist);
        let config = docking_config();

        emitter
            .emit_for_alignment(AlignmentState::Forward, &config)
            .await
            .unwrap();
        emitter.reset_edge_memory();
        emitter
            .emit_for_alignment(AlignmentState::Forward, &config)
            .await
            .unwrap();
        assert_eq!(sink.payloads().len(), 2);
    }
}
