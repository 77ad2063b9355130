//! Buffer header: one slot's metadata plus its backing memory.
//!
//! Ownership of the header *is* ownership of the slot. The client holds it
//! between callbacks, the component holds it while queued, and the device
//! holds it while decoding. Each hand-over is a move, so client and device
//! can never touch the same memory at once.

use crate::types::{BufferFlags, PortIndex, Timestamp};

/// A single input or output buffer slot.
pub struct BufferHeader {
    /// Port the slot belongs to.
    pub port: PortIndex,
    /// Slot index in the port's arena.
    pub index: usize,
    /// Backing memory. Its length is the slot's capacity.
    pub data: Vec<u8>,
    /// Start of valid payload within `data`.
    pub offset: usize,
    /// Number of valid payload bytes starting at `offset`.
    pub filled_len: usize,
    pub timestamp: Timestamp,
    pub flags: BufferFlags,
}

impl BufferHeader {
    pub fn new(port: PortIndex, index: usize, data: Vec<u8>) -> Self {
        Self {
            port,
            index,
            data,
            offset: 0,
            filled_len: 0,
            timestamp: Timestamp::ZERO,
            flags: BufferFlags::NONE,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The valid payload bytes, or an empty slice if the range is inconsistent.
    pub fn payload(&self) -> &[u8] {
        self.data
            .get(self.offset..self.offset.saturating_add(self.filled_len))
            .unwrap_or(&[])
    }

    /// Whether `offset + filled_len` fits in the backing memory.
    pub fn is_range_valid(&self) -> bool {
        self.offset
            .checked_add(self.filled_len)
            .is_some_and(|end| end <= self.data.len())
    }

    /// Copy `bytes` into the buffer as its whole payload.
    ///
    /// Returns `false` (and leaves the buffer untouched) if they do not fit.
    pub fn fill_from(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.data.len() {
            return false;
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.offset = 0;
        self.filled_len = bytes.len();
        true
    }

    /// Mark the payload consumed/empty, as done for every returned-on-flush buffer.
    pub fn clear_payload(&mut self) {
        self.offset = 0;
        self.filled_len = 0;
    }
}

impl std::fmt::Debug for BufferHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHeader")
            .field("port", &self.port)
            .field("index", &self.index)
            .field("capacity", &self.data.len())
            .field("offset", &self.offset)
            .field("filled_len", &self.filled_len)
            .field("timestamp", &self.timestamp)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_respects_offset() {
        let mut buf = BufferHeader::new(PortIndex::Input, 0, vec![1, 2, 3, 4, 5]);
        buf.offset = 1;
        buf.filled_len = 3;
        assert_eq!(buf.payload(), &[2, 3, 4]);
        assert!(buf.is_range_valid());
    }

    #[test]
    fn inconsistent_range_yields_empty_payload() {
        let mut buf = BufferHeader::new(PortIndex::Input, 0, vec![0; 4]);
        buf.offset = 3;
        buf.filled_len = 2;
        assert!(!buf.is_range_valid());
        assert!(buf.payload().is_empty());

        buf.offset = usize::MAX;
        assert!(!buf.is_range_valid());
    }

    #[test]
    fn fill_from_checks_capacity() {
        let mut buf = BufferHeader::new(PortIndex::Input, 2, vec![0; 4]);
        assert!(buf.fill_from(&[9, 8, 7]));
        assert_eq!(buf.payload(), &[9, 8, 7]);
        assert!(!buf.fill_from(&[0; 5]));
        assert_eq!(buf.filled_len, 3);
    }

    #[test]
    fn debug_omits_payload_bytes() {
        let buf = BufferHeader::new(PortIndex::Output, 1, vec![0; 1024]);
        let dbg = format!("{buf:?}");
        assert!(dbg.contains("capacity: 1024"));
        assert!(!dbg.contains("[0, 0"));
    }
}
