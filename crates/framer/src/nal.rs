//! NAL unit classification for H.264 and HEVC, and length-prefix helpers.
//!
//! The assembler only needs three questions answered per unit: does it carry
//! picture data, does it begin a new access unit, and is it a parameter set.

use byteorder::{BigEndian, ByteOrder};

/// NAL unit type for H.264.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum H264NalType {
    Slice,
    SliceA,
    SliceB,
    SliceC,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    EndSeq,
    EndStream,
    FillerData,
    SpsExt,
    Prefix,
    SubsetSps,
    Other(u8),
}

impl From<u8> for H264NalType {
    fn from(val: u8) -> Self {
        match val & 0x1F {
            1 => Self::Slice,
            2 => Self::SliceA,
            3 => Self::SliceB,
            4 => Self::SliceC,
            5 => Self::Idr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndSeq,
            11 => Self::EndStream,
            12 => Self::FillerData,
            13 => Self::SpsExt,
            14 => Self::Prefix,
            15 => Self::SubsetSps,
            other => Self::Other(other),
        }
    }
}

impl H264NalType {
    pub fn is_slice(self) -> bool {
        matches!(
            self,
            Self::Slice | Self::SliceA | Self::SliceB | Self::SliceC | Self::Idr
        )
    }
}

/// NAL unit type for HEVC (6-bit `nal_unit_type`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HevcNalType(pub u8);

impl HevcNalType {
    pub const VPS: u8 = 32;
    pub const SPS: u8 = 33;
    pub const PPS: u8 = 34;
    pub const AUD: u8 = 35;
    pub const EOS: u8 = 36;
    pub const EOB: u8 = 37;
    pub const FD: u8 = 38;
    pub const PREFIX_SEI: u8 = 39;
    pub const SUFFIX_SEI: u8 = 40;

    pub fn from_header(first_byte: u8) -> Self {
        Self((first_byte >> 1) & 0x3F)
    }

    pub fn is_vcl(self) -> bool {
        self.0 < 32
    }

    /// Intra random access point (BLA, IDR, CRA and reserved IRAP types).
    pub fn is_irap(self) -> bool {
        (16..=23).contains(&self.0)
    }

    pub fn is_parameter_set(self) -> bool {
        matches!(self.0, Self::VPS | Self::SPS | Self::PPS)
    }
}

/// Annex-B start code (4 bytes).
pub const ANNEXB_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Which NAL syntax a length-prefixed stream uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NalVariant {
    /// Classic H.264 (1-byte header).
    Avc,
    /// HEVC (2-byte header).
    Hevc,
}

/// What the assembler needs to know about one NAL unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NalInfo {
    /// Unit carries slice data of a coded picture.
    pub carries_picture: bool,
    /// Unit begins a new access unit if the current one already has a picture.
    pub starts_access_unit: bool,
    pub is_parameter_set: bool,
    /// Unit is an IDR / IRAP slice.
    pub is_sync: bool,
}

impl NalVariant {
    /// Classify a NAL unit (header included, no prefix).
    pub fn classify(self, nal: &[u8]) -> NalInfo {
        match self {
            Self::Avc => classify_avc(nal),
            Self::Hevc => classify_hevc(nal),
        }
    }
}

fn classify_avc(nal: &[u8]) -> NalInfo {
    let Some(&header) = nal.first() else {
        return NalInfo::default_other();
    };
    let nal_type = H264NalType::from(header);
    if nal_type.is_slice() {
        // first_mb_in_slice is ue(v): a leading 1 bit encodes zero.
        let first_mb_zero = nal.get(1).is_some_and(|b| b & 0x80 != 0);
        return NalInfo {
            carries_picture: true,
            starts_access_unit: first_mb_zero,
            is_parameter_set: false,
            is_sync: nal_type == H264NalType::Idr,
        };
    }
    let raw = header & 0x1F;
    NalInfo {
        carries_picture: false,
        starts_access_unit: matches!(raw, 6..=9 | 14..=18),
        is_parameter_set: matches!(
            nal_type,
            H264NalType::Sps | H264NalType::Pps | H264NalType::SpsExt | H264NalType::SubsetSps
        ),
        is_sync: false,
    }
}

fn classify_hevc(nal: &[u8]) -> NalInfo {
    let Some(&header) = nal.first() else {
        return NalInfo::default_other();
    };
    let nal_type = HevcNalType::from_header(header);
    if nal_type.is_vcl() {
        // first_slice_segment_in_pic_flag is the first bit after the 2-byte header.
        let first_slice = nal.get(2).is_some_and(|b| b & 0x80 != 0);
        return NalInfo {
            carries_picture: true,
            starts_access_unit: first_slice,
            is_parameter_set: false,
            is_sync: nal_type.is_irap(),
        };
    }
    NalInfo {
        carries_picture: false,
        starts_access_unit: matches!(nal_type.0, 32..=35 | 39 | 41..=44 | 48..=55),
        is_parameter_set: nal_type.is_parameter_set(),
        is_sync: false,
    }
}

impl NalInfo {
    fn default_other() -> Self {
        Self {
            carries_picture: false,
            starts_access_unit: false,
            is_parameter_set: false,
            is_sync: false,
        }
    }
}

/// Read a variable-length NAL unit size (1 to 4 bytes, big-endian).
///
/// Returns `None` if `data` is shorter than `length_size`.
pub fn read_nal_length(data: &[u8], length_size: usize) -> Option<usize> {
    if !(1..=4).contains(&length_size) || data.len() < length_size {
        return None;
    }
    Some(BigEndian::read_uint(&data[..length_size], length_size) as usize)
}

/// Convert length-prefixed NAL units to Annex-B format.
///
/// Stops at the first truncated unit; the bytes consumed so far are returned.
pub fn length_prefixed_to_annexb(data: &[u8], length_size: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + 64);
    let mut offset = 0;

    while let Some(nal_len) = read_nal_length(&data[offset..], length_size) {
        offset += length_size;
        let Some(nal) = data.get(offset..offset + nal_len) else {
            break;
        };
        output.extend_from_slice(&ANNEXB_START_CODE);
        output.extend_from_slice(nal);
        offset += nal_len;
    }

    output
}

/// Extract the H.264 NAL unit type from the first byte of NAL data.
pub fn nal_unit_type(nal_first_byte: u8) -> H264NalType {
    H264NalType::from(nal_first_byte)
}
