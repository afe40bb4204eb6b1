//! tpxflow-tpx: TPX3 word decoding, clock correction and event windowing.
//!
//! # Key Components
//!
//! - [`Tpx3Packet`] - Raw word classification with bit field extraction
//! - [`Decoder`] - Pure decode of a word buffer against one reference clock
//! - [`ReplayClock`] - Reference clock reconstruction for recorded streams
//! - [`EventWindower`] - Buckets hits into trigger intervals across batches
//! - [`PacketProcessor`] - Decoder and windower combined for one stream
//!
//! # Processing Pipeline
//!
//! 1. **Decode**: classify words, extract pixels/triggers, quadrant-correct
//!    their coarse clocks against the batch's reference clock
//! 2. **Window**: append to running buffers, bucket ready pixels by trigger,
//!    emit time-of-flight events and carry the open interval forward

pub mod clock;
pub mod decoder;
mod error;
pub mod packet;
pub mod processor;
pub mod timing;
pub mod window;

pub use clock::{ClockUpdate, ReplayClock};
pub use decoder::{DecodeStats, Decoder};
pub use error::{Error, Result};
pub use packet::{PacketKind, PixelFields, Tpx3Packet};
pub use processor::PacketProcessor;
pub use timing::correct_global_time;
pub use window::{EventWindower, WindowConfig, WindowStats};

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Addresses per chip side; decoded columns and rows run from 0 to 255.
pub const CHIP_PIXELS: u16 = 256;

/// Orientation of the chip relative to the camera image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Columns map to x, rows to y.
    #[default]
    Up,
    /// Rotated a quarter turn counter-clockwise.
    Left,
    /// Rotated half a turn.
    Down,
    /// Rotated a quarter turn clockwise.
    Right,
}

/// Detector geometry used when turning chip addresses into image pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Chip orientation.
    pub orientation: Orientation,
    /// Offset added to (x, y) after orientation.
    pub position_offset: (u16, u16),
    /// Chip size in pixels (default: 256).
    pub chip_size: u16,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            orientation: Orientation::Up,
            position_offset: (0, 0),
            chip_size: CHIP_PIXELS,
        }
    }
}

impl DetectorConfig {
    /// Sets the orientation.
    #[must_use]
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Sets the position offset.
    #[must_use]
    pub fn with_position_offset(mut self, x: u16, y: u16) -> Self {
        self.position_offset = (x, y);
        self
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string. Missing fields use defaults.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the geometry is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the chip covers every decodable address and that every
    /// oriented pixel plus offset fits in `u16`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the problem.
    pub fn validate(&self) -> Result<()> {
        if self.chip_size < CHIP_PIXELS {
            return Err(Error::Config(format!(
                "chip_size must be at least {CHIP_PIXELS}, got {}",
                self.chip_size
            )));
        }
        let max = u32::from(self.chip_size) - 1;
        let (ox, oy) = self.position_offset;
        if u32::from(ox) + max > u32::from(u16::MAX) || u32::from(oy) + max > u32::from(u16::MAX)
        {
            return Err(Error::Config(format!(
                "position offset ({ox}, {oy}) pushes pixels out of range for chip size {}",
                self.chip_size
            )));
        }
        Ok(())
    }

    /// Map chip (column, row) to image (x, y).
    #[inline]
    #[must_use]
    pub fn map_pixel(&self, col: u16, row: u16) -> (u16, u16) {
        let last = self.chip_size.saturating_sub(1);
        let (x, y) = match self.orientation {
            Orientation::Up => (col, row),
            Orientation::Left => (row, last.saturating_sub(col)),
            Orientation::Down => (last.saturating_sub(col), last.saturating_sub(row)),
            Orientation::Right => (last.saturating_sub(row), col),
        };
        (
            x.saturating_add(self.position_offset.0),
            y.saturating_add(self.position_offset.1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.orientation, Orientation::Up);
        assert_eq!(config.chip_size, 256);
        assert_eq!(config.map_pixel(5, 10), (5, 10));
    }

    #[test]
    fn test_orientations() {
        let base = DetectorConfig::default();
        assert_eq!(
            base.clone().with_orientation(Orientation::Left).map_pixel(5, 10),
            (10, 250)
        );
        assert_eq!(
            base.clone().with_orientation(Orientation::Down).map_pixel(5, 10),
            (250, 245)
        );
        assert_eq!(
            base.with_orientation(Orientation::Right).map_pixel(5, 10),
            (245, 5)
        );
    }

    #[test]
    fn test_offset() {
        let config = DetectorConfig::default().with_position_offset(256, 0);
        assert_eq!(config.map_pixel(0, 7), (256, 7));
    }

    #[test]
    fn test_json_partial_config() {
        let config = DetectorConfig::from_json(r#"{ "orientation": "down" }"#)
            .expect("Should parse partial config");
        assert_eq!(config.orientation, Orientation::Down);
        assert_eq!(config.chip_size, 256);
        assert_eq!(config.position_offset, (0, 0));
    }

    #[test]
    fn test_json_empty() {
        let config = DetectorConfig::from_json("{}").expect("Should parse minimal config");
        assert_eq!(config, DetectorConfig::default());
    }

    #[test]
    fn test_small_chip_rejected() {
        let err = DetectorConfig::from_json(r#"{ "chip_size": 128 }"#)
            .unwrap_err()
            .to_string();
        assert!(err.contains("at least 256"), "unexpected error: {err}");
        assert!(DetectorConfig::from_json(r#"{ "chip_size": 512 }"#).is_ok());
    }

    #[test]
    fn test_edge_addresses_are_not_folded() {
        let config = DetectorConfig::default();
        assert_eq!(config.map_pixel(255, 0), (255, 0));
        assert_eq!(config.map_pixel(254, 0), (254, 0));
        let left = config.with_orientation(Orientation::Left);
        assert_eq!(left.map_pixel(255, 3), (3, 0));
    }

    #[test]
    fn test_invalid_offset_rejected() {
        let result = DetectorConfig::from_json(r#"{ "position_offset": [65535, 0] }"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("out of range"), "unexpected error: {err}");
    }
}
