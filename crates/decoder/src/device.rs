//! Decode device seam.
//!
//! The hardware codec is reachable only through a submit/complete protocol:
//! calls on [`DecodeDevice`] submit work, and the device reports back
//! asynchronously by sending [`DeviceCompletion`] records on a
//! `crossbeam::channel` whose receiver is handed to the session.
//!
//! ```text
//!   dispatch thread ──queue_input/queue_output/flush──► device
//!                                                          │
//!   listener thread ◄──────── DeviceCompletion ────────────┘
//! ```

use vdec_common::{
    BufferHeader, DeviceError, PortIndex, PortRequirements, PortSelector, ReconfigReason, Rejected,
};

/// Control and submission calls into the hardware codec.
///
/// Every call is made with the session's core lock held, from either the
/// dispatch thread or the client thread, never concurrently.
pub trait DecodeDevice: Send {
    /// Acquire device resources (Loaded → Idle).
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Release device resources (Idle → Loaded).
    fn stop(&mut self) -> Result<(), DeviceError>;

    fn stream_on(&mut self, port: PortIndex) -> Result<(), DeviceError>;

    fn stream_off(&mut self, port: PortIndex) -> Result<(), DeviceError>;

    /// Submit one input access unit. On failure the buffer comes back.
    fn queue_input(&mut self, buffer: BufferHeader) -> Result<(), Rejected<DeviceError>>;

    /// Submit one output buffer to be filled.
    fn queue_output(&mut self, buffer: BufferHeader) -> Result<(), Rejected<DeviceError>>;

    /// Return every buffer held on `scope`, then report `FlushDone(scope)`.
    fn flush(&mut self, scope: PortSelector) -> Result<(), DeviceError>;

    /// Buffer requirements for `port`, if the device imposes any.
    fn requirements(&self, _port: PortIndex) -> Option<PortRequirements> {
        None
    }

    /// Hand back every buffer still held, without completions. Used on teardown.
    fn reclaim(&mut self) -> Vec<BufferHeader>;
}

/// An asynchronous record from the device.
#[derive(Debug)]
pub enum DeviceCompletion {
    InputDone(BufferHeader),
    OutputDone(BufferHeader),
    SettingsChanged {
        reason: ReconfigReason,
        requirements: PortRequirements,
    },
    FlushDone(PortSelector),
    HardwareError(String),
    Overload,
    UnsupportedStream(String),
}
