use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::navigation::Pose;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Time {
    pub sec: u32,
    pub nsec: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Header {
    pub stamp: Time,
    pub frame_id: String,
}

/// ROS shaped laser scan, CDR encoded on the wire.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LaserScan {
    pub header: Header,
    pub angle_min: f32,
    pub angle_max: f32,
    pub angle_increment: f32,
    pub time_increment: f32,
    pub scan_time: f32,
    pub range_min: f32,
    pub range_max: f32,
    pub ranges: Vec<f32>,
    pub intensities: Vec<f32>,
}

impl LaserScan {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(cdr::deserialize(payload)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(cdr::serialize::<_, _, cdr::CdrLe>(self, cdr::Infinite)?)
    }

    /// Replace the range of every beam whose intensity falls below the trust
    /// threshold with a large synthetic range, so spurious near field
    /// reflections do not corrupt the localization engine's estimate.
    pub fn gate_by_intensity(&mut self, config: &ScanConfig) {
        for (range, intensity) in self.ranges.iter_mut().zip(&self.intensities) {
            if *intensity < config.intensity_threshold {
                *range = config.synthetic_range;
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ScanConfig {
    /// beams below this intensity are not trusted
    pub intensity_threshold: f32,
    /// range in meters substituted for untrusted beams
    pub synthetic_range: f32,
    /// seconds without a pose update before goal navigation stops
    pub pose_timeout: f32,
}

impl ScanConfig {
    pub fn pose_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.pose_timeout)
    }
}

/// Pose published by the external localization engine.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct PoseUpdate {
    pub x: f32,
    pub y: f32,
    pub heading: f32,
}

impl From<PoseUpdate> for Pose {
    fn from(update: PoseUpdate) -> Self {
        Pose::new((update.x, update.y), update.heading)
    }
}

/// Last value wins cache over the engine's pose stream.
///
/// Each update replaces the previous pose outright, there is no filtering on
/// this side of the interface. A pose older than the timeout is reported as
/// absent so the goal controller stops instead of acting on stale data.
pub struct LocalisationManager {
    last_pose: Option<Pose>,
    last_update_time: Instant,
    timeout: Duration,
}

impl LocalisationManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_pose: None,
            last_update_time: Instant::now(),
            timeout,
        }
    }

    pub fn update_pose(&mut self, pose: Pose) {
        self.last_pose = Some(pose);
        self.last_update_time = Instant::now();
    }

    pub fn latest_pose(&self) -> Option<Pose> {
        if self.last_update_time.elapsed() > self.timeout {
            return None;
        }
        self.last_pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scan(ranges: Vec<f32>, intensities: Vec<f32>) -> LaserScan {
        LaserScan {
            header: Header {
                stamp: Time { sec: 0, nsec: 0 },
                frame_id: "laser".to_string(),
            },
            angle_min: 0.0,
            angle_max: 6.28,
            angle_increment: 0.0175,
            time_increment: 0.0,
            scan_time: 0.1,
            range_min: 0.12,
            range_max: 3.5,
            ranges,
            intensities,
        }
    }

    fn scan_config() -> ScanConfig {
        ScanConfig {
            intensity_threshold: 10.0,
            synthetic_range: 4.0,
            pose_timeout: 2.0,
        }
    }

    #[test]
    fn untrusted_beams_get_synthetic_range() {
        let mut scan = scan(vec![0.5, 1.0, 2.0], vec![3.0, 15.0, 9.9]);
        scan.gate_by_intensity(&scan_config());
        assert_relative_eq!(scan.ranges[0], 4.0);
        assert_relative_eq!(scan.ranges[1], 1.0);
        assert_relative_eq!(scan.ranges[2], 4.0);
    }

    #[test]
    fn scan_round_trips_through_cdr() {
        let scan = scan(vec![0.5, 1.0], vec![12.0, 20.0]);
        let decoded = LaserScan::decode(&scan.encode().unwrap()).unwrap();
        assert_eq!(decoded.ranges, scan.ranges);
        assert_eq!(decoded.header.frame_id, "laser");
    }

    #[test]
    fn no_pose_before_first_update() {
        let manager = LocalisationManager::new(Duration::from_secs(2));
        assert!(manager.latest_pose().is_none());
    }

    #[test]
    fn update_replaces_previous_pose() {
        let mut manager = LocalisationManager::new(Duration::from_secs(2));
        manager.update_pose(Pose::new((1.0, 1.0), 0.0));
        manager.update_pose(Pose::new((2.0, -1.0), 0.5));
        let pose = manager.latest_pose().unwrap();
        assert_relative_eq!(pose.position().x, 2.0);
        assert_relative_eq!(pose.heading(), 0.5);
    }

    #[test]
    fn stale_pose_is_absent() {
        let mut manager = LocalisationManager::new(Duration::from_millis(1));
        manager.update_pose(Pose::new((1.0, 1.0), 0.0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(manager.latest_pose().is_none());
    }
}
