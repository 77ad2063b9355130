//! Frame assembler contract and the access-unit builder shared by all framings.
//!
//! ```text
//!            unit                      unit starts new AU
//!  Empty ──────────► Accumulating ─────────────────────────► HoldingLookahead
//!    ▲                 │    ▲  unit continues AU                  │
//!    │                 │    └─────────────────────────────────────┘
//!    │                 │                  next unit (held unit seeds the AU)
//!    └─────────────────┴──────── end of stream (coalesce + emit once)
//! ```

use std::fmt;

use vdec_common::{BufferFlags, Timestamp};

use crate::error::FramingError;

/// One client buffer presented to an assembler.
#[derive(Copy, Clone, Debug)]
pub struct SourceChunk<'a> {
    pub data: &'a [u8],
    pub timestamp: Timestamp,
    pub flags: BufferFlags,
}

impl<'a> SourceChunk<'a> {
    pub fn new(data: &'a [u8], timestamp: Timestamp, flags: BufferFlags) -> Self {
        Self {
            data,
            timestamp,
            flags,
        }
    }

    pub fn is_eos(&self) -> bool {
        self.flags.contains(BufferFlags::EOS)
    }
}

/// A complete access unit ready for submission to the device.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Vec<u8>,
    pub timestamp: Timestamp,
    pub flags: BufferFlags,
}

impl AccessUnit {
    /// An empty unit that only carries the end-of-stream marker.
    pub fn end_of_stream(timestamp: Timestamp, flags: BufferFlags) -> Self {
        Self {
            data: Vec::new(),
            timestamp,
            flags: flags | BufferFlags::EOS,
        }
    }

    pub fn is_eos(&self) -> bool {
        self.flags.contains(BufferFlags::EOS)
    }
}

impl fmt::Debug for AccessUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessUnit")
            .field("len", &self.data.len())
            .field("timestamp", &self.timestamp)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Observable assembler state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssemblerState {
    /// Nothing buffered.
    Empty,
    /// Bytes of an unfinished access unit are buffered.
    AccumulatingAccessUnit,
    /// An access unit was just emitted; the data that revealed its end is
    /// held as the start of the next one, with its own timestamp.
    HoldingLookahead,
}

/// Rebuilds complete access units from arbitrary byte chunks.
pub trait FrameAssembler: Send {
    /// Consume one source buffer completely and return the access units it completed.
    ///
    /// A source flagged EOS flushes all residual state into exactly one final unit.
    fn push(&mut self, src: &SourceChunk<'_>) -> Result<Vec<AccessUnit>, FramingError>;

    /// Drop all buffered state (used on input flush).
    fn reset(&mut self);

    fn state(&self) -> AssemblerState;

    /// Maximum size of an emitted access unit.
    fn capacity(&self) -> usize;
}

/// Timestamp and flags a unit inherits from the buffer it started in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Stamp {
    pub timestamp: Timestamp,
    pub flags: BufferFlags,
}

impl Stamp {
    /// Per-buffer markers are recomputed for each access unit; everything else carries over.
    pub fn from_source(src: &SourceChunk<'_>) -> Self {
        Self {
            timestamp: src.timestamp,
            flags: src.flags.without(
                BufferFlags::EOS | BufferFlags::END_OF_FRAME | BufferFlags::SYNC_FRAME,
            ),
        }
    }
}

/// What a unit contributes to its access unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum UnitRole {
    Picture { sync: bool },
    Config,
    /// Header that makes the following picture a random access point.
    EntryPoint,
    Other,
}

/// One complete syntax unit (NAL unit or start-code delimited unit).
#[derive(Clone, Debug)]
pub(crate) struct Unit {
    /// Bytes written ahead of `bytes` in the destination.
    pub prefix: &'static [u8],
    pub bytes: Vec<u8>,
    pub stamp: Stamp,
    pub role: UnitRole,
    /// Unit begins a new access unit if the current one already has a picture.
    pub starts_access_unit: bool,
}

#[derive(Default)]
enum Stage {
    #[default]
    Empty,
    Accumulating,
    HoldingLookahead(Unit),
}

/// Access-unit state machine over a sequence of complete units.
///
/// Framings differ only in how they split bytes into [`Unit`]s; the
/// boundary, look-ahead and end-of-stream handling live here.
pub(crate) struct AuSequencer {
    builder: AuBuilder,
    stage: Stage,
}

impl AuSequencer {
    pub fn new(capacity: usize) -> Self {
        Self {
            builder: AuBuilder::new(capacity),
            stage: Stage::Empty,
        }
    }

    pub fn capacity(&self) -> usize {
        self.builder.capacity()
    }

    pub fn state(&self) -> AssemblerState {
        match self.stage {
            Stage::Empty => AssemblerState::Empty,
            Stage::Accumulating => AssemblerState::AccumulatingAccessUnit,
            Stage::HoldingLookahead(_) => AssemblerState::HoldingLookahead,
        }
    }

    fn append(&mut self, unit: &Unit) -> Result<(), FramingError> {
        self.builder
            .append(unit.prefix, &unit.bytes, unit.stamp, unit.role)
    }

    /// Feed one complete unit, pushing any access unit it closes onto `out`.
    pub fn push_unit(&mut self, unit: Unit, out: &mut Vec<AccessUnit>) -> Result<(), FramingError> {
        match std::mem::take(&mut self.stage) {
            Stage::Empty => {
                self.append(&unit)?;
                self.stage = Stage::Accumulating;
            }
            Stage::Accumulating if self.builder.has_picture() && unit.starts_access_unit => {
                let au = self.builder.finish(BufferFlags::NONE);
                tracing::debug!(len = au.data.len(), ts = %au.timestamp, "access unit complete");
                out.push(au);
                self.stage = Stage::HoldingLookahead(unit);
            }
            Stage::Accumulating => {
                self.append(&unit)?;
                self.stage = Stage::Accumulating;
            }
            Stage::HoldingLookahead(held) => {
                self.append(&held)?;
                self.stage = Stage::Accumulating;
                self.push_unit(unit, out)?;
            }
        }
        Ok(())
    }

    /// Coalesce the held unit and everything already accumulated into exactly
    /// one final unit carrying EOS.
    pub fn end_of_stream(&mut self, eos: Stamp, out: &mut Vec<AccessUnit>) -> Result<(), FramingError> {
        if let Stage::HoldingLookahead(held) = std::mem::take(&mut self.stage) {
            self.append(&held)?;
        }
        let au = if self.builder.is_empty() {
            AccessUnit::end_of_stream(eos.timestamp, eos.flags)
        } else {
            self.builder.finish(eos.flags | BufferFlags::EOS)
        };
        tracing::debug!(len = au.data.len(), ts = %au.timestamp, "end of stream unit");
        out.push(au);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.builder.clear();
        self.stage = Stage::Empty;
    }
}

/// Destination buffer being filled with one access unit.
pub(crate) struct AuBuilder {
    data: Vec<u8>,
    capacity: usize,
    first_ts: Option<Timestamp>,
    picture_ts: Option<Timestamp>,
    flags: BufferFlags,
    has_picture: bool,
    has_config: bool,
}

impl AuBuilder {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
            first_ts: None,
            picture_ts: None,
            flags: BufferFlags::NONE,
            has_picture: false,
            has_config: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.first_ts.is_none()
    }

    pub fn has_picture(&self) -> bool {
        self.has_picture
    }

    /// Append `prefix` + `body` as one unit.
    pub fn append(
        &mut self,
        prefix: &[u8],
        body: &[u8],
        stamp: Stamp,
        role: UnitRole,
    ) -> Result<(), FramingError> {
        let needed = self.data.len() + prefix.len() + body.len();
        if needed > self.capacity {
            return Err(FramingError::DestinationOverflow {
                needed,
                capacity: self.capacity,
            });
        }
        self.data.extend_from_slice(prefix);
        self.data.extend_from_slice(body);
        self.first_ts.get_or_insert(stamp.timestamp);
        self.flags |= stamp.flags;
        match role {
            UnitRole::Picture { sync } => {
                self.has_picture = true;
                self.picture_ts.get_or_insert(stamp.timestamp);
                if sync {
                    self.flags |= BufferFlags::SYNC_FRAME;
                }
            }
            UnitRole::Config => self.has_config = true,
            UnitRole::EntryPoint => {
                self.has_config = true;
                self.flags |= BufferFlags::SYNC_FRAME;
            }
            UnitRole::Other => {}
        }
        Ok(())
    }

    /// Close the access unit, OR-ing in `extra` flags, and reset for the next one.
    pub fn finish(&mut self, extra: BufferFlags) -> AccessUnit {
        let timestamp = self
            .picture_ts
            .or(self.first_ts)
            .unwrap_or(Timestamp::ZERO);
        let mut flags = self.flags | extra | BufferFlags::END_OF_FRAME;
        if !self.has_picture && self.has_config {
            flags |= BufferFlags::CODEC_CONFIG;
        }
        let data = std::mem::take(&mut self.data);
        self.clear();
        AccessUnit {
            data,
            timestamp,
            flags,
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.first_ts = None;
        self.picture_ts = None;
        self.flags = BufferFlags::NONE;
        self.has_picture = false;
        self.has_config = false;
    }
}
