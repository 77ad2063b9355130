//! Access-unit assembly for length-prefixed NAL streams (H.264 and HEVC).
//!
//! Units are parsed one at a time, across buffer boundaries, and written to
//! the destination with Annex-B start codes. A unit's end is known from its
//! length prefix, but an access unit's end is only known once the first unit
//! of the *next* access unit has been seen. That unit is held as look-ahead
//! until the following push or the end of the stream.

use tracing::warn;

use crate::assembler::{
    AccessUnit, AssemblerState, AuSequencer, FrameAssembler, SourceChunk, Stamp, Unit, UnitRole,
};
use crate::error::FramingError;
use crate::nal::{read_nal_length, NalInfo, NalVariant, ANNEXB_START_CODE};

/// Splits a byte stream into length-prefixed units.
struct UnitParser {
    length_size: usize,
    max_unit: usize,
    prefix: Vec<u8>,
    body: Vec<u8>,
    remaining: usize,
    in_body: bool,
    stamp: Option<Stamp>,
}

impl UnitParser {
    fn new(length_size: usize, max_unit: usize) -> Self {
        Self {
            length_size,
            max_unit,
            prefix: Vec::with_capacity(4),
            body: Vec::new(),
            remaining: 0,
            in_body: false,
            stamp: None,
        }
    }

    /// Consume all of `data`, returning the units it completed.
    fn feed(&mut self, data: &[u8], stamp: Stamp) -> Result<Vec<(Vec<u8>, Stamp)>, FramingError> {
        let mut units = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            let unit_stamp = *self.stamp.get_or_insert(stamp);
            let rest = &data[pos..];

            if !self.in_body {
                let take = (self.length_size - self.prefix.len()).min(rest.len());
                self.prefix.extend_from_slice(&rest[..take]);
                pos += take;
                if let Some(len) = read_nal_length(&self.prefix, self.length_size) {
                    self.prefix.clear();
                    let needed = len.saturating_add(ANNEXB_START_CODE.len());
                    if needed > self.max_unit {
                        return Err(FramingError::DestinationOverflow {
                            needed,
                            capacity: self.max_unit,
                        });
                    }
                    if len == 0 {
                        self.stamp = None;
                    } else {
                        self.remaining = len;
                        self.in_body = true;
                        self.body.reserve(len);
                    }
                }
            } else {
                let take = self.remaining.min(rest.len());
                self.body.extend_from_slice(&rest[..take]);
                self.remaining -= take;
                pos += take;
                if self.remaining == 0 {
                    self.in_body = false;
                    self.stamp = None;
                    units.push((std::mem::take(&mut self.body), unit_stamp));
                }
            }
        }

        Ok(units)
    }

    fn has_partial(&self) -> bool {
        !self.prefix.is_empty() || self.in_body
    }

    /// Hand out an incomplete unit body (end of stream). A partial prefix is dropped.
    fn take_partial(&mut self) -> Option<(Vec<u8>, Stamp)> {
        let dropped_prefix = self.prefix.len();
        self.prefix.clear();
        let stamp = self.stamp.take();
        if !self.in_body {
            if dropped_prefix > 0 {
                warn!(bytes = dropped_prefix, "dropping truncated NAL length prefix");
            }
            return None;
        }
        self.in_body = false;
        warn!(
            have = self.body.len(),
            missing = self.remaining,
            "stream ended inside a NAL unit"
        );
        self.remaining = 0;
        stamp.map(|s| (std::mem::take(&mut self.body), s))
    }

    fn reset(&mut self) {
        self.prefix.clear();
        self.body.clear();
        self.remaining = 0;
        self.in_body = false;
        self.stamp = None;
    }
}

fn role_of(info: NalInfo) -> UnitRole {
    if info.carries_picture {
        UnitRole::Picture { sync: info.is_sync }
    } else if info.is_parameter_set {
        UnitRole::Config
    } else {
        UnitRole::Other
    }
}

/// Assembler for length-prefixed H.264 / HEVC.
pub struct NalAssembler {
    variant: NalVariant,
    parser: UnitParser,
    sequencer: AuSequencer,
}

impl NalAssembler {
    /// # Panics
    ///
    /// Panics if `length_size` is not within 1..=4 or `capacity` is zero.
    pub fn new(variant: NalVariant, length_size: u8, capacity: usize) -> Self {
        assert!(
            (1..=4).contains(&length_size),
            "length_size must be within 1..=4"
        );
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            variant,
            parser: UnitParser::new(length_size as usize, capacity),
            sequencer: AuSequencer::new(capacity),
        }
    }

    pub fn variant(&self) -> NalVariant {
        self.variant
    }

    fn unit(&self, bytes: Vec<u8>, stamp: Stamp) -> Unit {
        let info = self.variant.classify(&bytes);
        Unit {
            prefix: &ANNEXB_START_CODE,
            bytes,
            stamp,
            role: role_of(info),
            starts_access_unit: info.starts_access_unit,
        }
    }
}

impl FrameAssembler for NalAssembler {
    fn push(&mut self, src: &SourceChunk<'_>) -> Result<Vec<AccessUnit>, FramingError> {
        let stamp = Stamp::from_source(src);
        let mut out = Vec::new();

        for (bytes, unit_stamp) in self.parser.feed(src.data, stamp)? {
            let unit = self.unit(bytes, unit_stamp);
            self.sequencer.push_unit(unit, &mut out)?;
        }

        if src.is_eos() {
            if let Some((bytes, unit_stamp)) = self.parser.take_partial() {
                let unit = self.unit(bytes, unit_stamp);
                self.sequencer.push_unit(unit, &mut out)?;
            }
            self.sequencer.end_of_stream(stamp, &mut out)?;
        }
        Ok(out)
    }

    fn reset(&mut self) {
        self.parser.reset();
        self.sequencer.reset();
    }

    fn state(&self) -> AssemblerState {
        match self.sequencer.state() {
            AssemblerState::Empty if self.parser.has_partial() => {
                AssemblerState::AccumulatingAccessUnit
            }
            other => other,
        }
    }

    fn capacity(&self) -> usize {
        self.sequencer.capacity()
    }
}

impl std::fmt::Debug for NalAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NalAssembler")
            .field("variant", &self.variant)
            .field("state", &self.state())
            .field("capacity", &self.capacity())
            .finish()
    }
}
