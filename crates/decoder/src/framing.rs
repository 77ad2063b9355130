//! Byte-stream input pipeline.
//!
//! When the client hands over arbitrary elementary-stream bytes, its input
//! buffers are only *sources*. Access units come out of the frame assembler
//! into a backlog and are copied into destination buffers that the session
//! owns, one per input slot.
//!
//! ```text
//!   client source ──► FrameAssembler ──► backlog ──► destination ──► device
//!        │                                              ▲               │
//!        └─ held until backlog is empty                 └── recycled ◄──┘
//! ```
//!
//! Holding sources until the backlog drains ties backlog memory to the
//! client's buffer count.

use std::collections::VecDeque;

use tracing::{debug, warn};

use vdec_common::{BufferHeader, PortIndex};
use vdec_framer::{
    create_assembler, AccessUnit, FrameAssembler, FramingError, FramingMode, SourceChunk,
};

pub struct ByteStreamInput {
    mode: FramingMode,
    assembler: Box<dyn FrameAssembler>,
    backlog: VecDeque<AccessUnit>,
    /// Client sources not yet returned.
    held: Vec<BufferHeader>,
    /// Destinations ready to be filled.
    free: Vec<BufferHeader>,
    /// Destinations created so far; they are created on first use.
    created: usize,
    count: usize,
    size: usize,
}

impl ByteStreamInput {
    /// # Panics
    ///
    /// Panics if `count` or `size` is zero.
    pub fn new(mode: FramingMode, count: usize, size: usize) -> Self {
        assert!(count > 0, "destination count must be > 0");
        assert!(size > 0, "destination size must be > 0");
        Self {
            mode,
            assembler: create_assembler(mode, size),
            backlog: VecDeque::new(),
            held: Vec::new(),
            free: Vec::new(),
            created: 0,
            count,
            size,
        }
    }

    /// Change the destination pool shape. Only legal while no destination is
    /// outstanding; ready destinations are discarded.
    pub fn resize(&mut self, count: usize, size: usize) {
        debug_assert_eq!(self.free.len(), self.created, "destinations outstanding");
        self.free.clear();
        self.created = 0;
        self.count = count.max(1);
        if size != self.size {
            self.size = size.max(1);
            self.assembler = create_assembler(self.mode, self.size);
        }
    }

    /// Feed one client source. The source is held until [`release_sources`](Self::release_sources).
    pub fn push_source(&mut self, source: BufferHeader) -> Result<(), FramingError> {
        let chunk = SourceChunk::new(source.payload(), source.timestamp, source.flags);
        let result = self.assembler.push(&chunk);
        self.held.push(source);
        let units = result?;
        debug!(units = units.len(), backlog = self.backlog.len(), "source framed");
        self.backlog.extend(units);
        Ok(())
    }

    /// The next filled destination to submit, if the backlog and the pool allow.
    pub fn next_submission(&mut self) -> Option<BufferHeader> {
        loop {
            if self.backlog.is_empty() {
                return None;
            }
            let mut dest = self.take_destination()?;
            let unit = self.backlog.pop_front()?;
            if !dest.fill_from(&unit.data) {
                warn!(
                    len = unit.data.len(),
                    capacity = dest.capacity(),
                    "access unit dropped: destination too small"
                );
                self.recycle(dest);
                continue;
            }
            dest.timestamp = unit.timestamp;
            dest.flags = unit.flags;
            return Some(dest);
        }
    }

    fn take_destination(&mut self) -> Option<BufferHeader> {
        if let Some(dest) = self.free.pop() {
            return Some(dest);
        }
        if self.created < self.count {
            let dest = BufferHeader::new(PortIndex::Input, self.created, vec![0; self.size]);
            self.created += 1;
            return Some(dest);
        }
        None
    }

    /// Put a destination back in the pool.
    pub fn recycle(&mut self, mut dest: BufferHeader) {
        dest.clear_payload();
        dest.flags = Default::default();
        self.free.push(dest);
    }

    /// Held sources with zero length, once the backlog is empty.
    pub fn release_sources(&mut self) -> Vec<BufferHeader> {
        if !self.backlog.is_empty() {
            return Vec::new();
        }
        self.take_held()
    }

    /// Discard framing state and the backlog; return every held source.
    pub fn reset(&mut self) -> Vec<BufferHeader> {
        self.assembler.reset();
        self.backlog.clear();
        self.take_held()
    }

    fn take_held(&mut self) -> Vec<BufferHeader> {
        let mut held = std::mem::take(&mut self.held);
        for source in &mut held {
            source.clear_payload();
        }
        held
    }
}

impl std::fmt::Debug for ByteStreamInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStreamInput")
            .field("state", &self.assembler.state())
            .field("backlog", &self.backlog.len())
            .field("held", &self.held.len())
            .field("free", &self.free.len())
            .field("created", &self.created)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdec_common::{BufferFlags, Timestamp};
    use vdec_framer::NalVariant;

    const AVC4: FramingMode = FramingMode::LengthPrefixed {
        variant: NalVariant::Avc,
        length_size: 4,
    };

    /// One length-prefixed IDR slice starting a new picture.
    fn idr() -> Vec<u8> {
        vec![0, 0, 0, 3, 0x65, 0x88, 0x80]
    }

    fn source(index: usize, bytes: &[u8], ts: i64, flags: BufferFlags) -> BufferHeader {
        let mut h = BufferHeader::new(PortIndex::Input, index, vec![0; 64]);
        h.fill_from(bytes);
        h.timestamp = Timestamp(ts);
        h.flags = flags;
        h
    }

    #[test]
    fn units_flow_into_destinations() {
        let mut bs = ByteStreamInput::new(AVC4, 2, 256);
        bs.push_source(source(0, &idr(), 0, BufferFlags::NONE)).unwrap();
        bs.push_source(source(1, &idr(), 33, BufferFlags::NONE)).unwrap();
        // The second picture revealed the end of the first.
        assert_eq!(bs.backlog.len(), 1);
        assert_eq!(bs.held.len(), 2);

        let dest = bs.next_submission().unwrap();
        assert_eq!(dest.payload(), &[0, 0, 0, 1, 0x65, 0x88, 0x80]);
        assert_eq!(dest.timestamp, Timestamp(0));
        assert!(dest.flags.contains(BufferFlags::SYNC_FRAME));
        assert!(bs.next_submission().is_none());

        let released = bs.release_sources();
        assert_eq!(released.len(), 2);
        assert!(released.iter().all(|s| s.filled_len == 0));
    }

    #[test]
    fn sources_held_while_backlog_waits_for_a_destination() {
        let mut bs = ByteStreamInput::new(AVC4, 1, 256);
        bs.push_source(source(0, &idr(), 0, BufferFlags::NONE)).unwrap();
        bs.push_source(source(1, &idr(), 33, BufferFlags::NONE)).unwrap();
        bs.push_source(source(2, &[], 66, BufferFlags::EOS)).unwrap();
        assert_eq!(bs.backlog.len(), 2);

        let first = bs.next_submission().unwrap();
        assert!(bs.next_submission().is_none(), "pool has one destination");
        assert!(bs.release_sources().is_empty());

        bs.recycle(first);
        let last = bs.next_submission().unwrap();
        assert!(last.flags.contains(BufferFlags::EOS));
        assert_eq!(last.timestamp, Timestamp(33));
        assert_eq!(bs.release_sources().len(), 3);
    }

    #[test]
    fn reset_returns_held_sources() {
        let mut bs = ByteStreamInput::new(AVC4, 2, 256);
        bs.push_source(source(0, &idr(), 0, BufferFlags::NONE)).unwrap();
        let returned = bs.reset();
        assert_eq!(returned.len(), 1);
        assert_eq!(returned[0].index, 0);
        assert_eq!(bs.backlog.len(), 0);
        assert_eq!(bs.held.len(), 0);
    }

    #[test]
    fn framing_error_still_holds_source() {
        let mut bs = ByteStreamInput::new(AVC4, 1, 8);
        // Declares a 200-byte unit into an 8-byte destination.
        let err = bs.push_source(source(0, &[0, 0, 0, 200, 0x65], 0, BufferFlags::NONE));
        assert!(matches!(err, Err(FramingError::DestinationOverflow { .. })));
        assert_eq!(bs.held.len(), 1);
    }
}
