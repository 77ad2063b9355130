//! `vdec-decoder`: decode session core.
//!
//! Sits between a client that speaks in commands, buffers and callbacks and
//! a hardware codec reachable only through an asynchronous submit/complete
//! protocol.
//!
//! # Architecture
//!
//! ```text
//!   client ──► DecoderSession ──► MessageBus ◄── listener ◄── DeviceCompletion
//!                  │                  │
//!                  └──► core lock ◄── dispatch ──► DecoderCallbacks
//!                        Component ──► DecodeDevice
//! ```
//!
//! ## Module Overview
//!
//! - [`session`]: `DecoderSession` client API and `DecoderCallbacks`
//! - [`component`]: state machine, flush, port enable/disable, buffer routing
//! - [`queue`]: the three prioritised message FIFOs
//! - [`listener`]: device completion listener thread
//! - `pump`: dispatch thread
//! - [`tracker`]: slot population, ownership and pending counters
//! - [`framing`]: byte-stream input pipeline over `vdec-framer`
//! - [`device`]: the `DecodeDevice` seam
//! - [`port`], [`gate`], [`signal`], [`timestamp`]: supporting types
//!
//! ## Usage
//!
//! ```ignore
//! use vdec_common::{Command, ComponentState, PortIndex, SessionConfig, VideoCodec};
//! use vdec_decoder::DecoderSession;
//!
//! let (tx, rx) = crossbeam::channel::unbounded();
//! let device = MyDevice::new(tx);
//! let session = DecoderSession::new(
//!     SessionConfig::new(VideoCodec::H264),
//!     Box::new(device),
//!     rx,
//!     callbacks,
//! )?;
//!
//! session.send_command(Command::StateSet(ComponentState::Idle))?;
//! for _ in 0..session.port_definition(PortIndex::Input).actual_count {
//!     inputs.push(session.allocate_buffer(PortIndex::Input)?);
//! }
//! // ... output buffers, then StateSet(Executing) and empty_this_buffer/fill_this_buffer.
//! ```

pub mod component;
pub mod device;
pub mod framing;
pub mod gate;
pub mod listener;
pub mod port;
mod pump;
pub mod queue;
pub mod session;
pub mod signal;
pub mod timestamp;
pub mod tracker;

pub use component::{Component, Notification, Outbox, PendingFlags};
pub use device::{DecodeDevice, DeviceCompletion};
pub use port::{BufferMode, PortDefinition};
pub use session::{DecoderCallbacks, DecoderSession};
