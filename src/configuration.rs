use config::Config;
use serde::Deserialize;
use std::{path::PathBuf, str};
use tracing::*;

use crate::{
    alignment::DockingConfig, commander::CommandEncoding, error::ErrorWrapper,
    localisation::ScanConfig, marker::MarkerCalibration, navigation::NavigationConfig,
    station::ManualConfig,
};

static DEFAULT_SETTINGS: &str = include_str!("../config/settings.yaml");

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub marker: MarkerCalibration,
    pub docking: DockingConfig,
    pub navigation: NavigationConfig,
    pub scan: ScanConfig,
    pub manual: ManualConfig,
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub zenoh: StationZenohConfig,
}

impl AppConfig {
    pub fn load_config(config: &Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = if let Some(config) = config {
            info!("Using configuration from {:?}", config);
            Config::builder()
                .add_source(config::Environment::with_prefix("APP"))
                .add_source(config::File::with_name(
                    config
                        .to_str()
                        .ok_or_else(|| anyhow::anyhow!("Failed to convert path"))?,
                ))
                .build()?
        } else {
            info!("Using configuration from config/settings.yaml");
            Config::builder()
                .add_source(config::Environment::with_prefix("APP"))
                .add_source(config::File::with_name("config/settings"))
                .build()?
        };

        Ok(settings.try_deserialize()?)
    }

    /// The settings file compiled into the binary, used as a baseline in tests.
    pub fn included_defaults() -> anyhow::Result<Self> {
        let settings = Config::builder()
            .add_source(config::File::from_str(
                DEFAULT_SETTINGS,
                config::FileFormat::Yaml,
            ))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CommandConfig {
    #[serde(default)]
    pub encoding: CommandEncoding,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TopicConfig {
    pub marker: String,
    pub scan: String,
    pub scan_filtered: String,
    pub pose: String,
    pub cmd_vel: String,
    pub mode: String,
    pub destination: String,
    pub input: String,
    pub debug: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            marker: "turtle/marker".to_owned(),
            scan: "turtle/lidar".to_owned(),
            scan_filtered: "turtle/lidar_filtered".to_owned(),
            pose: "turtle/pose".to_owned(),
            cmd_vel: "turtle/cmd_vel".to_owned(),
            mode: "turtle/mode".to_owned(),
            destination: "turtle/destination".to_owned(),
            input: "turtle/input".to_owned(),
            debug: "turtle/debug_message".to_owned(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct StationZenohConfig {
    #[serde(default)]
    pub connect: Vec<zenoh_config::EndPoint>,
    #[serde(default)]
    pub listen: Vec<zenoh_config::EndPoint>,
    #[serde(default)]
    pub config_path: Option<String>,
}

impl StationZenohConfig {
    pub fn get_zenoh_config(&self) -> anyhow::Result<zenoh::config::Config> {
        let mut config = if let Some(conf_file) = &self.config_path {
            zenoh::config::Config::from_file(conf_file).map_err(ErrorWrapper::ZenohError)?
        } else {
            zenoh::config::Config::default()
        };
        if !self.connect.is_empty() {
            config.connect.endpoints.clone_from(&self.connect);
        }
        if !self.listen.is_empty() {
            config.listen.endpoints.clone_from(&self.listen);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn included_settings_parse() {
        let config = AppConfig::included_defaults().unwrap();
        assert_eq!(config.topics.cmd_vel, "turtle/cmd_vel");
        assert_eq!(config.command.encoding, CommandEncoding::TaggedPairs);
    }
}
