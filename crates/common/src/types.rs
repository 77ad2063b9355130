//! Core types with newtype pattern for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign, Sub};

/// Maximum number of buffer slots on one port (slot bitmasks are 64 bits wide).
pub const MAX_BUFFERS_PER_PORT: usize = 64;

/// One direction of the component's data interface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PortIndex {
    /// Compressed bitstream flowing into the device.
    Input,
    /// Decoded pictures flowing back to the client.
    Output,
}

impl PortIndex {
    pub const ALL: [PortIndex; 2] = [PortIndex::Input, PortIndex::Output];

    /// Array index for per-port tables.
    pub fn as_usize(self) -> usize {
        match self {
            Self::Input => 0,
            Self::Output => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

impl fmt::Display for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Target of a flush / enable / disable command.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortSelector {
    Port(PortIndex),
    All,
}

impl PortSelector {
    pub const INPUT: Self = Self::Port(PortIndex::Input);
    pub const OUTPUT: Self = Self::Port(PortIndex::Output);

    /// The ports this selector addresses, input first.
    pub fn ports(self) -> &'static [PortIndex] {
        match self {
            Self::Port(PortIndex::Input) => &[PortIndex::Input],
            Self::Port(PortIndex::Output) => &[PortIndex::Output],
            Self::All => &PortIndex::ALL,
        }
    }

    pub fn contains(self, port: PortIndex) -> bool {
        match self {
            Self::Port(p) => p == port,
            Self::All => true,
        }
    }
}

impl From<PortIndex> for PortSelector {
    fn from(port: PortIndex) -> Self {
        Self::Port(port)
    }
}

impl fmt::Display for PortSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port(p) => write!(f, "{p}"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Component lifecycle state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    /// Created, no resources committed.
    #[default]
    Loaded,
    /// Buffers populated, device started, not streaming.
    Idle,
    /// Streaming.
    Executing,
    /// Streaming suspended; buffer callbacks are held back.
    Pause,
    /// Terminal error state. Absorbing.
    Invalid,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "Loaded",
            Self::Idle => "Idle",
            Self::Executing => "Executing",
            Self::Pause => "Pause",
            Self::Invalid => "Invalid",
        };
        f.write_str(name)
    }
}

/// Presentation timestamp in microseconds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub fn from_micros(us: i64) -> Self {
        Self(us)
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(1000))
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }
}

impl Sub for Timestamp {
    type Output = i64;
    fn sub(self, rhs: Self) -> i64 {
        self.0 - rhs.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Per-buffer flag set.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: Self = Self(0);
    /// Last buffer of the stream.
    pub const EOS: Self = Self(1 << 0);
    /// Buffer ends a complete frame.
    pub const END_OF_FRAME: Self = Self(1 << 4);
    /// Buffer starts at a random access point.
    pub const SYNC_FRAME: Self = Self(1 << 5);
    /// Payload is known to be damaged.
    pub const DATA_CORRUPT: Self = Self(1 << 3);
    /// Payload is codec configuration (parameter sets, sequence header).
    pub const CODEC_CONFIG: Self = Self(1 << 7);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Copy of `self` without the bits in `other`.
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for BufferFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(BufferFlags, &str); 5] = [
            (BufferFlags::EOS, "EOS"),
            (BufferFlags::DATA_CORRUPT, "DATA_CORRUPT"),
            (BufferFlags::END_OF_FRAME, "END_OF_FRAME"),
            (BufferFlags::SYNC_FRAME, "SYNC_FRAME"),
            (BufferFlags::CODEC_CONFIG, "CODEC_CONFIG"),
        ];
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        let unknown = self.0 & !NAMES.iter().fold(0, |acc, (flag, _)| acc | flag.0);
        if unknown != 0 {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{unknown:#x}")?;
        }
        Ok(())
    }
}
