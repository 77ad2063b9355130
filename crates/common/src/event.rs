//! Client commands and the events delivered back through callbacks.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::types::{BufferFlags, ComponentState, PortIndex, PortSelector};

/// A command accepted by `send_command`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Request a state transition.
    StateSet(ComponentState),
    /// Return every in-flight buffer on the selected ports.
    Flush(PortSelector),
    PortDisable(PortSelector),
    PortEnable(PortSelector),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateSet(_) => "state_set",
            Self::Flush(_) => "flush",
            Self::PortDisable(_) => "port_disable",
            Self::PortEnable(_) => "port_enable",
        }
    }
}

/// Completion of a command. Port commands on `All` complete once per port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandDone {
    StateSet(ComponentState),
    Flush(PortIndex),
    PortDisable(PortIndex),
    PortEnable(PortIndex),
}

/// Why the device asked for new output port settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReconfigReason {
    /// The stream needs more (or larger) output buffers than are allocated.
    InsufficientBuffers,
    /// The picture size changed within the current buffer requirements.
    Resolution,
    /// Bit depth or colour space changed.
    BitDepthColorspace,
}

impl ReconfigReason {
    /// Whether the client must reallocate the output port.
    pub fn requires_reallocation(self) -> bool {
        !matches!(self, Self::Resolution)
    }
}

/// Event notification delivered to the client.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    CommandComplete(CommandDone),
    Error(ErrorKind),
    PortSettingsChanged {
        port: PortIndex,
        reason: ReconfigReason,
    },
    /// A buffer carrying `flags` (EOS) has been returned on `port`.
    BufferFlag { port: PortIndex, flags: BufferFlags },
}
