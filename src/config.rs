// src/config.rs
use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use serde::Deserialize;
use crate::session::{BlockParameters, RetryPolicy};
/// Engine settings, read from a JSON file. Missing keys keep their defaults.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub glide: usize,
    pub average_window: usize,
    pub calibration_seconds: u64,
    pub poll_interval_ms: u64,
    pub connect_retry_ms: u64,
    /// `None` keeps retrying until cancelled.
    pub connect_attempts: Option<u32>,
    pub header_poll_ms: u64,
    pub playback_block_interval_ms: u64,
}
impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 1972,
            glide: 1,
            average_window: 20,
            calibration_seconds: 60,
            poll_interval_ms: 5,
            connect_retry_ms: 500,
            connect_attempts: None,
            header_poll_ms: 100,
            playback_block_interval_ms: 1000,
        }
    }
}
impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        // 提前校验，避免引擎启动后才报错
        config
            .block_parameters()
            .with_context(|| format!("invalid block parameters in {}", path.display()))?;
        Ok(config)
    }
    /// Parameters for the default block size; the block size follows the
    /// stream's sample rate once a header arrives.
    pub fn block_parameters(&self) -> Result<BlockParameters, crate::error::EngineError> {
        BlockParameters::default()
            .with_glide(self.glide)?
            .with_average_window(self.average_window)
    }
    pub fn retry_policy(&self) -> RetryPolicy {
        let interval = Duration::from_millis(self.connect_retry_ms);
        let header_poll = Duration::from_millis(self.header_poll_ms);
        match self.connect_attempts {
            Some(attempts) => RetryPolicy::bounded(attempts, interval, header_poll),
            None => RetryPolicy::unbounded(interval, header_poll),
        }
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn playback_block_interval(&self) -> Duration {
        Duration::from_millis(self.playback_block_interval_ms)
    }
}
