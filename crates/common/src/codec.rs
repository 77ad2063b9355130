//! Video codec identifiers accepted by the session.

use serde::{Deserialize, Serialize};

/// Video codec identifier.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Mpeg2,
    Mpeg4,
    /// VC-1 simple/main profile carried in the RCV container.
    Vc1,
    /// VC-1 advanced profile elementary stream (start-code delimited).
    Vc1Advanced,
}

impl VideoCodec {
    /// Human readable codec name (for display/logging).
    pub fn display_name(self) -> &'static str {
        match self {
            Self::H264 => "H.264/AVC",
            Self::H265 => "H.265/HEVC",
            Self::Mpeg2 => "MPEG-2",
            Self::Mpeg4 => "MPEG-4 Part 2",
            Self::Vc1 => "VC-1 (RCV)",
            Self::Vc1Advanced => "VC-1 Advanced",
        }
    }

    /// Whether the bitstream is a sequence of NAL units.
    pub fn is_nal_based(self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }
}
