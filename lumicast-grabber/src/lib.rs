//! # lumicast-grabber: desktop grabber for Hyperion
//!
//! Console program that captures one monitor, downscales it and streams
//! it to one or more Hyperion servers until stopped.
//!
//! - **config**: the TOML file and its mapping onto a `PipelineConfig`
//! - **service**: the `capture-worker` thread and its handle

pub mod config;
pub mod service;
