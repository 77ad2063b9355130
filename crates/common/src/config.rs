//! Session configuration and per-port buffer requirements.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::VideoCodec;
use crate::error::{DecodeResult, DecoderError};
use crate::types::MAX_BUFFERS_PER_PORT;

/// Buffer pool settings for one port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Number of buffer slots (also the minimum the client must populate).
    pub buffer_count: usize,
    /// Size in bytes of each buffer.
    pub buffer_size: usize,
    /// Required alignment of buffer sizes, power of two.
    pub alignment: usize,
}

impl PortConfig {
    pub fn new(buffer_count: usize, buffer_size: usize) -> Self {
        Self {
            buffer_count,
            buffer_size,
            alignment: 1,
        }
    }
}

/// Buffer requirements reported by the device for a port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRequirements {
    pub min_count: usize,
    pub buffer_size: usize,
}

/// Top-level session configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub codec: VideoCodec,
    pub input: PortConfig,
    pub output: PortConfig,
    /// Client submits arbitrary byte chunks; the frame assembler rebuilds access units.
    pub byte_stream: bool,
    /// Width of the big-endian NAL length prefix (1..=4).
    pub nal_length_size: u8,
    /// Capacity of each of the three message queues.
    pub queue_capacity: usize,
    /// Upper bound on waiting for in-flight codec-config buffers before a flush.
    pub codec_config_drain_timeout_ms: u64,
    /// Restamp output frames with the smallest outstanding input timestamp.
    pub reorder_timestamps: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            input: PortConfig {
                buffer_count: 4,
                buffer_size: 1024 * 1024,
                alignment: 4096,
            },
            output: PortConfig {
                buffer_count: 8,
                buffer_size: 3 * 1024 * 1024,
                alignment: 4096,
            },
            byte_stream: false,
            nal_length_size: 4,
            queue_capacity: 128,
            codec_config_drain_timeout_ms: 5000,
            reorder_timestamps: false,
        }
    }
}

impl SessionConfig {
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            codec,
            ..Default::default()
        }
    }

    pub fn codec_config_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.codec_config_drain_timeout_ms)
    }

    /// Check every field against its legal range.
    pub fn validate(&self) -> DecodeResult<()> {
        for (name, port) in [("input", &self.input), ("output", &self.output)] {
            if port.buffer_count == 0 || port.buffer_count > MAX_BUFFERS_PER_PORT {
                return Err(DecoderError::bad_parameter(format!(
                    "{name} buffer_count {} outside 1..={MAX_BUFFERS_PER_PORT}",
                    port.buffer_count
                )));
            }
            if port.buffer_size == 0 {
                return Err(DecoderError::bad_parameter(format!(
                    "{name} buffer_size must be > 0"
                )));
            }
            if !port.alignment.is_power_of_two() {
                return Err(DecoderError::bad_parameter(format!(
                    "{name} alignment {} is not a power of two",
                    port.alignment
                )));
            }
        }
        if !(1..=4).contains(&self.nal_length_size) {
            return Err(DecoderError::bad_parameter(format!(
                "nal_length_size {} outside 1..=4",
                self.nal_length_size
            )));
        }
        let needed = 2 * self.input.buffer_count.max(self.output.buffer_count);
        if self.queue_capacity < needed {
            return Err(DecoderError::bad_parameter(format!(
                "queue_capacity {} below {needed} (twice the largest buffer count)",
                self.queue_capacity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let cfg = SessionConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.codec_config_drain_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_zero_buffers() {
        let mut cfg = SessionConfig::default();
        cfg.input.buffer_count = 0;
        assert!(matches!(cfg.validate(), Err(DecoderError::BadParameter(_))));
    }

    #[test]
    fn rejects_too_many_buffers() {
        let mut cfg = SessionConfig::default();
        cfg.output.buffer_count = MAX_BUFFERS_PER_PORT + 1;
        cfg.queue_capacity = 1024;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_alignment() {
        let mut cfg = SessionConfig::default();
        cfg.output.alignment = 3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_nal_length() {
        let mut cfg = SessionConfig::new(VideoCodec::H265);
        cfg.nal_length_size = 0;
        assert!(cfg.validate().is_err());
        cfg.nal_length_size = 5;
        assert!(cfg.validate().is_err());
        cfg.nal_length_size = 2;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_small_queue() {
        let cfg = SessionConfig {
            queue_capacity: 15,
            ..Default::default()
        };
        // Output has 8 buffers, so at least 16 entries are required.
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = SessionConfig {
            codec: VideoCodec::Vc1,
            byte_stream: true,
            codec_config_drain_timeout_ms: 250,
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let restored: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, cfg);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{"codec":"H265","byte_stream":true}"#).unwrap();
        assert_eq!(cfg.codec, VideoCodec::H265);
        assert!(cfg.byte_stream);
        assert_eq!(cfg.queue_capacity, 128);
    }
}
