//! `vdec-framer`: Access-unit reassembly from raw elementary-stream bytes.
//!
//! In byte-stream mode the client hands over arbitrary chunks; the decoder
//! device wants exactly one coded picture per buffer. The assemblers here
//! bridge the two:
//!
//! - **`NalAssembler`**: length-prefixed H.264 / HEVC, rewritten to Annex-B
//! - **`StartCodeAssembler`**: MPEG-2, MPEG-4 Part 2, VC-1 Advanced
//! - **`RcvAssembler`**: VC-1 simple/main in the RCV container

pub mod assembler;
pub mod error;
pub mod length_prefixed;
pub mod nal;
pub mod rcv;
pub mod start_code;

pub use assembler::{AccessUnit, AssemblerState, FrameAssembler, SourceChunk};
pub use error::FramingError;
pub use length_prefixed::NalAssembler;
pub use nal::NalVariant;
pub use rcv::{RcvAssembler, RcvSequenceHeader};
pub use start_code::{StartCodeAssembler, StartCodeFamily};

use vdec_common::VideoCodec;

/// How a codec's bitstream is split into access units.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FramingMode {
    LengthPrefixed { variant: NalVariant, length_size: u8 },
    StartCode(StartCodeFamily),
    Rcv,
}

impl FramingMode {
    pub fn for_codec(codec: VideoCodec, nal_length_size: u8) -> Self {
        match codec {
            VideoCodec::H264 => Self::LengthPrefixed {
                variant: NalVariant::Avc,
                length_size: nal_length_size,
            },
            VideoCodec::H265 => Self::LengthPrefixed {
                variant: NalVariant::Hevc,
                length_size: nal_length_size,
            },
            VideoCodec::Mpeg2 => Self::StartCode(StartCodeFamily::Mpeg2),
            VideoCodec::Mpeg4 => Self::StartCode(StartCodeFamily::Mpeg4),
            VideoCodec::Vc1Advanced => Self::StartCode(StartCodeFamily::Vc1Advanced),
            VideoCodec::Vc1 => Self::Rcv,
        }
    }
}

/// Build the assembler for `mode`, emitting units of at most `capacity` bytes.
pub fn create_assembler(mode: FramingMode, capacity: usize) -> Box<dyn FrameAssembler> {
    match mode {
        FramingMode::LengthPrefixed {
            variant,
            length_size,
        } => Box::new(NalAssembler::new(variant, length_size, capacity)),
        FramingMode::StartCode(family) => Box::new(StartCodeAssembler::new(family, capacity)),
        FramingMode::Rcv => Box::new(RcvAssembler::new(capacity)),
    }
}
