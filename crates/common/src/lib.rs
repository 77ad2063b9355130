//! `vdec-common`: Shared types, commands, and errors for the vdec session core.
//!
//! This crate is the foundation that the framer and decoder crates depend on.
//! It defines:
//!
//! - **Types**: `PortIndex`, `PortSelector`, `ComponentState`, `Timestamp`, `BufferFlags`
//! - **Buffers**: `BufferHeader` (slot metadata plus backing memory, moved on every hand-over)
//! - **Events**: `Command`, `CommandDone`, `Event`, `ReconfigReason`
//! - **Codecs**: `VideoCodec`
//! - **Errors**: `DecoderError`, `DeviceError`, `Rejected` (thiserror-based)
//! - **Config**: `SessionConfig`, `PortConfig`, `PortRequirements`

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod types;

// Re-export commonly used items at crate root
pub use buffer::BufferHeader;
pub use codec::VideoCodec;
pub use config::{PortConfig, PortRequirements, SessionConfig};
pub use error::{DecodeResult, DecoderError, DeviceError, ErrorKind, Rejected};
pub use event::{Command, CommandDone, Event, ReconfigReason};
pub use types::{
    BufferFlags, ComponentState, PortIndex, PortSelector, Timestamp, MAX_BUFFERS_PER_PORT,
};
