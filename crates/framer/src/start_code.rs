//! Access-unit assembly for start-code delimited elementary streams.
//!
//! MPEG-2 video, MPEG-4 Part 2 and VC-1 Advanced all mark syntax units with
//! the three-byte prefix `00 00 01` followed by a code byte. A unit ends
//! where the next prefix begins, so bytes are kept until then; a prefix
//! straddling two buffers is found on the next push.

use tracing::warn;

use crate::assembler::{
    AccessUnit, AssemblerState, AuSequencer, FrameAssembler, SourceChunk, Stamp, Unit, UnitRole,
};
use crate::error::FramingError;

const PREFIX: [u8; 3] = [0x00, 0x00, 0x01];

/// Start-code syntax of the stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StartCodeFamily {
    Mpeg2,
    Mpeg4,
    Vc1Advanced,
}

impl StartCodeFamily {
    /// Role and access-unit boundary of a unit, from its bytes (prefix included).
    fn classify(self, unit: &[u8]) -> (UnitRole, bool) {
        let Some(&code) = unit.get(3).filter(|_| unit.starts_with(&PREFIX)) else {
            return (UnitRole::Other, false);
        };
        match self {
            Self::Mpeg2 => match code {
                // picture_coding_type follows the 10-bit temporal_reference.
                0x00 => {
                    let coding_type = unit.get(5).map(|b| (b >> 3) & 0x07);
                    (
                        UnitRole::Picture {
                            sync: coding_type == Some(1),
                        },
                        true,
                    )
                }
                0xB3 => (UnitRole::Config, true),
                0xB8 => (UnitRole::Other, true),
                _ => (UnitRole::Other, false),
            },
            Self::Mpeg4 => match code {
                // vop_coding_type is the first two bits after the code.
                0xB6 => {
                    let coding_type = unit.get(4).map(|b| b >> 6);
                    (
                        UnitRole::Picture {
                            sync: coding_type == Some(0),
                        },
                        true,
                    )
                }
                0x00..=0x2F | 0xB0 | 0xB5 => (UnitRole::Config, true),
                0xB3 => (UnitRole::Other, true),
                _ => (UnitRole::Other, false),
            },
            Self::Vc1Advanced => match code {
                0x0D => (UnitRole::Picture { sync: false }, true),
                0x0E => (UnitRole::EntryPoint, true),
                0x0F => (UnitRole::Config, true),
                _ => (UnitRole::Other, false),
            },
        }
    }
}

/// Assembler for start-code delimited streams.
pub struct StartCodeAssembler {
    family: StartCodeFamily,
    sequencer: AuSequencer,
    /// Unread bytes; the unit being read starts at `start`.
    pending: Vec<u8>,
    /// Read cursor into `pending`. Consumed bytes are dropped once per push.
    start: usize,
    /// Offset into `pending` where each buffered push began, with its stamp.
    marks: Vec<(usize, Stamp)>,
    /// Positions before this have been searched for a prefix.
    scan_pos: usize,
}

impl StartCodeAssembler {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(family: StartCodeFamily, capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            family,
            sequencer: AuSequencer::new(capacity),
            pending: Vec::new(),
            start: 0,
            marks: Vec::new(),
            scan_pos: 1,
        }
    }

    pub fn family(&self) -> StartCodeFamily {
        self.family
    }

    /// Find the next prefix whose code byte is already buffered.
    fn next_prefix(&self) -> Option<usize> {
        let from = self.scan_pos.max(self.start + 1);
        if self.pending.len() < from + 4 {
            return None;
        }
        self.pending[from..]
            .windows(4)
            .position(|w| w[..3] == PREFIX)
            .map(|p| p + from)
    }

    /// Stamp of the push that supplied the byte at `pos`.
    fn stamp_at(&self, pos: usize) -> Option<Stamp> {
        self.marks
            .iter()
            .take_while(|(offset, _)| *offset <= pos)
            .last()
            .map(|(_, stamp)| *stamp)
    }

    /// Cut the unit ending at `at`; the prefix at `at` starts the next one.
    fn take_unit(&mut self, at: usize, fallback: Stamp) -> Unit {
        let stamp = self.stamp_at(self.start).unwrap_or(fallback);
        let bytes = self.pending[self.start..at].to_vec();
        self.start = at;
        self.scan_pos = at + PREFIX.len();
        self.unit(bytes, stamp)
    }

    /// Drop consumed bytes and rebase the marks on the new front.
    fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        let at = self.start;
        let front = self.stamp_at(at);
        self.pending.drain(..at);
        self.marks.retain(|(offset, _)| *offset > at);
        for (offset, _) in &mut self.marks {
            *offset -= at;
        }
        if let Some(stamp) = front {
            self.marks.insert(0, (0, stamp));
        }
        self.start = 0;
    }

    fn unit(&self, bytes: Vec<u8>, stamp: Stamp) -> Unit {
        let (role, starts_access_unit) = self.family.classify(&bytes);
        Unit {
            prefix: &[],
            bytes,
            stamp,
            role,
            starts_access_unit,
        }
    }
}

impl FrameAssembler for StartCodeAssembler {
    fn push(&mut self, src: &SourceChunk<'_>) -> Result<Vec<AccessUnit>, FramingError> {
        let stamp = Stamp::from_source(src);
        let mut out = Vec::new();

        if !src.data.is_empty() {
            self.marks.push((self.pending.len(), stamp));
            self.pending.extend_from_slice(src.data);
        }

        while let Some(at) = self.next_prefix() {
            let unit = self.take_unit(at, stamp);
            self.sequencer.push_unit(unit, &mut out)?;
        }
        self.compact();
        self.scan_pos = self.pending.len().saturating_sub(3).max(1);

        if self.pending.len() > self.sequencer.capacity() {
            return Err(FramingError::DestinationOverflow {
                needed: self.pending.len(),
                capacity: self.sequencer.capacity(),
            });
        }

        if src.is_eos() {
            if !self.pending.is_empty() {
                if self.pending.len() < 4 {
                    warn!(bytes = self.pending.len(), "stream ended inside a start code");
                }
                let unit_stamp = self.stamp_at(0).unwrap_or(stamp);
                let bytes = std::mem::take(&mut self.pending);
                let unit = self.unit(bytes, unit_stamp);
                self.sequencer.push_unit(unit, &mut out)?;
            }
            self.marks.clear();
            self.scan_pos = 1;
            self.sequencer.end_of_stream(stamp, &mut out)?;
        }
        Ok(out)
    }

    fn reset(&mut self) {
        self.sequencer.reset();
        self.pending.clear();
        self.start = 0;
        self.marks.clear();
        self.scan_pos = 1;
    }

    fn state(&self) -> AssemblerState {
        match self.sequencer.state() {
            AssemblerState::Empty if !self.pending.is_empty() => {
                AssemblerState::AccumulatingAccessUnit
            }
            other => other,
        }
    }

    fn capacity(&self) -> usize {
        self.sequencer.capacity()
    }
}

impl std::fmt::Debug for StartCodeAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartCodeAssembler")
            .field("family", &self.family)
            .field("state", &self.state())
            .field("pending", &self.pending.len())
            .finish()
    }
}
