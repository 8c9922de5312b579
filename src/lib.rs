#![doc = include_str!("../README.md")]
pub mod alignment;
pub mod commander;
pub mod configuration;
pub mod error;
pub mod localisation;
pub mod logging;
pub mod marker;
pub mod navigation;
pub mod station;
