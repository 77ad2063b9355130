//! VC-1 simple/main profile in the RCV container.
//!
//! ```text
//! sequence layer (36 bytes, little-endian)
//!   0  num_frames:24 | 0xC5      4  len(STRUCT_C) = 4    8  STRUCT_C
//!  12  height                    16  width               20  0x0000000C
//!  24  STRUCT_B (12 bytes)
//! frame layer (repeated)
//!   0  frame_size:24 | key:1<<31   4  timestamp (ms)      8  frame data
//! ```
//!
//! Frames are self-delimiting, so no look-ahead is ever held.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};
use vdec_common::{BufferFlags, Timestamp};

use crate::assembler::{AccessUnit, AssemblerState, FrameAssembler, SourceChunk, Stamp};
use crate::error::FramingError;

pub const SEQUENCE_LAYER_LEN: usize = 36;
const FRAME_HEADER_LEN: usize = 8;
const KEY_FRAME_BIT: u32 = 1 << 31;
const FRAME_SIZE_MASK: u32 = 0x00FF_FFFF;

/// Parsed RCV sequence layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RcvSequenceHeader {
    pub frame_count: u32,
    pub struct_c: [u8; 4],
    pub width: u32,
    pub height: u32,
}

impl RcvSequenceHeader {
    pub fn parse(data: &[u8]) -> Result<Self, FramingError> {
        if data.len() < SEQUENCE_LAYER_LEN {
            return Err(FramingError::InvalidSequenceHeader(format!(
                "need {SEQUENCE_LAYER_LEN} bytes, got {}",
                data.len()
            )));
        }
        if data[3] != 0xC5 {
            return Err(FramingError::InvalidSequenceHeader(format!(
                "bad marker byte {:#04x}",
                data[3]
            )));
        }
        let struct_c_len = LittleEndian::read_u32(&data[4..8]);
        if struct_c_len != 4 {
            return Err(FramingError::InvalidSequenceHeader(format!(
                "STRUCT_C length {struct_c_len}"
            )));
        }
        let struct_b_marker = LittleEndian::read_u32(&data[20..24]);
        if struct_b_marker != 0x0C {
            return Err(FramingError::InvalidSequenceHeader(format!(
                "STRUCT_B marker {struct_b_marker:#x}"
            )));
        }

        let mut struct_c = [0u8; 4];
        struct_c.copy_from_slice(&data[8..12]);
        Ok(Self {
            frame_count: LittleEndian::read_u24(&data[0..3]),
            struct_c,
            height: LittleEndian::read_u32(&data[12..16]),
            width: LittleEndian::read_u32(&data[16..20]),
        })
    }
}

enum Stage {
    SequenceLayer,
    FrameHeader,
    FrameBody {
        remaining: usize,
        timestamp: Timestamp,
        key: bool,
    },
}

/// Assembler for RCV-wrapped VC-1.
pub struct RcvAssembler {
    capacity: usize,
    stage: Stage,
    /// Header bytes or frame data collected so far.
    buf: Vec<u8>,
    /// Flags of the buffer the current record started in.
    stamp: Option<Stamp>,
    sequence: Option<RcvSequenceHeader>,
}

impl RcvAssembler {
    /// # Panics
    ///
    /// Panics if `capacity` cannot hold the sequence layer.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity >= SEQUENCE_LAYER_LEN,
            "capacity must hold the RCV sequence layer"
        );
        Self {
            capacity,
            stage: Stage::SequenceLayer,
            buf: Vec::with_capacity(SEQUENCE_LAYER_LEN),
            stamp: None,
            sequence: None,
        }
    }

    /// Sequence layer, once the first 36 bytes have been seen.
    pub fn sequence(&self) -> Option<&RcvSequenceHeader> {
        self.sequence.as_ref()
    }

    fn fill(&mut self, want: usize, data: &[u8], pos: &mut usize) -> bool {
        let take = (want - self.buf.len()).min(data.len() - *pos);
        self.buf.extend_from_slice(&data[*pos..*pos + take]);
        *pos += take;
        self.buf.len() == want
    }

    fn emit_frame(&mut self, timestamp: Timestamp, key: bool, out: &mut Vec<AccessUnit>) {
        let stamp = self.stamp.take();
        let mut flags = stamp.map_or(BufferFlags::NONE, |s| s.flags) | BufferFlags::END_OF_FRAME;
        if key {
            flags |= BufferFlags::SYNC_FRAME;
        }
        out.push(AccessUnit {
            data: std::mem::take(&mut self.buf),
            timestamp,
            flags,
        });
    }
}

impl FrameAssembler for RcvAssembler {
    fn push(&mut self, src: &SourceChunk<'_>) -> Result<Vec<AccessUnit>, FramingError> {
        let stamp = Stamp::from_source(src);
        let mut out = Vec::new();
        let data = src.data;
        let mut pos = 0;

        while pos < data.len() {
            self.stamp.get_or_insert(stamp);
            match self.stage {
                Stage::SequenceLayer => {
                    if self.fill(SEQUENCE_LAYER_LEN, data, &mut pos) {
                        let header = RcvSequenceHeader::parse(&self.buf)?;
                        debug!(
                            width = header.width,
                            height = header.height,
                            frames = header.frame_count,
                            "RCV sequence layer"
                        );
                        self.sequence = Some(header);
                        let timestamp = self.stamp.map_or(src.timestamp, |s| s.timestamp);
                        let mut au = AccessUnit {
                            data: std::mem::take(&mut self.buf),
                            timestamp,
                            flags: BufferFlags::CODEC_CONFIG | BufferFlags::END_OF_FRAME,
                        };
                        if let Some(s) = self.stamp.take() {
                            au.flags |= s.flags;
                        }
                        out.push(au);
                        self.stage = Stage::FrameHeader;
                    }
                }
                Stage::FrameHeader => {
                    if self.fill(FRAME_HEADER_LEN, data, &mut pos) {
                        let word = LittleEndian::read_u32(&self.buf[0..4]);
                        let millis = LittleEndian::read_u32(&self.buf[4..8]);
                        let size = (word & FRAME_SIZE_MASK) as usize;
                        let key = word & KEY_FRAME_BIT != 0;
                        self.buf.clear();
                        if size > self.capacity {
                            return Err(FramingError::DestinationOverflow {
                                needed: size,
                                capacity: self.capacity,
                            });
                        }
                        let timestamp = Timestamp::from_millis(i64::from(millis));
                        if size == 0 {
                            self.stamp = None;
                        } else {
                            self.buf.reserve(size);
                            self.stage = Stage::FrameBody {
                                remaining: size,
                                timestamp,
                                key,
                            };
                        }
                    }
                }
                Stage::FrameBody {
                    remaining,
                    timestamp,
                    key,
                } => {
                    let take = remaining.min(data.len() - pos);
                    self.buf.extend_from_slice(&data[pos..pos + take]);
                    pos += take;
                    if take == remaining {
                        self.emit_frame(timestamp, key, &mut out);
                        self.stage = Stage::FrameHeader;
                    } else {
                        self.stage = Stage::FrameBody {
                            remaining: remaining - take,
                            timestamp,
                            key,
                        };
                    }
                }
            }
        }

        if src.is_eos() {
            if let Stage::FrameBody {
                remaining,
                timestamp,
                key,
            } = self.stage
            {
                warn!(missing = remaining, "stream ended inside an RCV frame");
                self.emit_frame(timestamp, key, &mut out);
                self.stage = Stage::FrameHeader;
            } else if !self.buf.is_empty() {
                warn!(bytes = self.buf.len(), "dropping truncated RCV header");
                self.buf.clear();
            }
            self.stamp = None;

            // A frame completed by this very buffer carries the marker itself.
            match out.last_mut() {
                Some(last) if !src.data.is_empty() => last.flags |= BufferFlags::EOS,
                _ => out.push(AccessUnit::end_of_stream(src.timestamp, stamp.flags)),
            }
        }
        Ok(out)
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.stamp = None;
        if self.sequence.is_some() {
            self.stage = Stage::FrameHeader;
        } else {
            self.stage = Stage::SequenceLayer;
        }
    }

    fn state(&self) -> AssemblerState {
        if self.buf.is_empty() && !matches!(self.stage, Stage::FrameBody { .. }) {
            AssemblerState::Empty
        } else {
            AssemblerState::AccumulatingAccessUnit
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for RcvAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcvAssembler")
            .field("sequence", &self.sequence)
            .field("state", &self.state())
            .field("capacity", &self.capacity)
            .finish()
    }
}
