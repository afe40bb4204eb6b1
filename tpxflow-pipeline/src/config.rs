//! Pipeline configuration.

use crate::error::{PipelineError, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use tpxflow_algorithms::CentroidConfig;
use tpxflow_tpx::{DetectorConfig, WindowConfig};

/// Sampler batching parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Flush once the buffered bytes exceed this size.
    pub flush_bytes: usize,
    /// Flush a non-empty buffer after this long without a flush (ms).
    pub flush_timeout_ms: u64,
    /// Socket read timeout (ms).
    pub read_timeout_ms: u64,
    /// Largest datagram accepted.
    pub recv_buffer_bytes: usize,
    /// Flush before publishing a clock value that advanced by more than this
    /// many seconds since the last such flush.
    #[serde(alias = "replay_interval_s")]
    pub clock_flush_interval_s: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            flush_bytes: 16_384,
            flush_timeout_ms: 50,
            read_timeout_ms: 10,
            recv_buffer_bytes: 16_384,
            clock_flush_interval_s: 0.05,
        }
    }
}

impl SamplerConfig {
    /// Flush timeout as a duration.
    #[must_use]
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Read timeout as a duration (never zero).
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

/// Full acquisition configuration. Every section is optional in JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each inter-stage channel.
    pub channel_capacity: usize,
    /// Workers in the centroid stage.
    pub centroid_workers: usize,
    /// Whether centroid output carries the source events.
    pub forward_events: bool,
    /// Take the reference clock from inline clock words inside the window
    /// stage. Only meaningful when the input still carries them; the
    /// samplers strip clock words and turn this off.
    pub inline_clock: bool,
    /// How long `stop` waits to deliver a sentinel (ms).
    pub shutdown_timeout_ms: u64,
    /// Detector geometry.
    pub detector: DetectorConfig,
    /// Event windowing.
    pub window: WindowConfig,
    /// Centroiding.
    pub centroid: CentroidConfig,
    /// Sampler batching.
    pub sampler: SamplerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            centroid_workers: 2,
            forward_events: true,
            inline_clock: false,
            shutdown_timeout_ms: 10_000,
            detector: DetectorConfig::default(),
            window: WindowConfig::default(),
            centroid: CentroidConfig::default(),
            sampler: SamplerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Set the centroid worker count.
    #[must_use]
    pub fn with_centroid_workers(mut self, workers: usize) -> Self {
        self.centroid_workers = workers;
        self
    }

    /// Set the channel capacity.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Enable inline clock tracking.
    #[must_use]
    pub fn with_inline_clock(mut self, inline_clock: bool) -> Self {
        self.inline_clock = inline_clock;
        self
    }

    /// Turns off inline clock tracking for input whose clock words were
    /// already consumed by a sampler.
    #[must_use]
    pub fn for_sampler_input(mut self) -> Self {
        if self.inline_clock {
            warn!("inline_clock ignored: the sampler consumes clock words and publishes the reference clock");
            self.inline_clock = false;
        }
        self
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string. Missing fields use defaults.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or a value is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    ///
    /// # Errors
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(PipelineError::Config("channel_capacity must be at least 1".into()));
        }
        if self.centroid_workers == 0 {
            return Err(PipelineError::Config("centroid_workers must be at least 1".into()));
        }
        self.detector.validate()?;
        self.window.validate()?;
        self.centroid.validate()?;
        Ok(())
    }

    /// Shutdown timeout as a duration.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tpxflow_tpx::Orientation;

    #[test]
    fn test_empty_json_is_default() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_nested_partial_sections() {
        let config = PipelineConfig::from_json(
            r#"{
                "centroid_workers": 4,
                "detector": { "orientation": "left" },
                "window": { "event_window": [0.0, 0.001] },
                "centroid": { "epsilon": 3.0 },
                "sampler": { "flush_timeout_ms": 200 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.centroid_workers, 4);
        assert_eq!(config.detector.orientation, Orientation::Left);
        assert_eq!(config.window.min_triggers, 4);
        assert!((config.centroid.trigger_scale() - 3000.0).abs() < 1e-9);
        assert_eq!(config.sampler.flush_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PipelineConfig::from_json(r#"{ "centroid_workers": 0 }"#).is_err());
        assert!(PipelineConfig::from_json(r#"{ "window": { "event_window": [1.0, 0.0] } }"#).is_err());
        assert!(PipelineConfig::from_json(r#"{ "centroid": { "chunk_size": 0 } }"#).is_err());
        assert!(PipelineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_sampler_input_disables_inline_clock() {
        let config = PipelineConfig::from_json(r#"{ "inline_clock": true }"#).unwrap();
        assert!(config.inline_clock);
        let config = config.for_sampler_input();
        assert!(!config.inline_clock);
        assert_eq!(
            PipelineConfig::default().for_sampler_input(),
            PipelineConfig::default()
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "channel_capacity": 8 }}"#).unwrap();
        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.channel_capacity, 8);
    }
}
