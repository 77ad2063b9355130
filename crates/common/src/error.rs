//! Central error types for the session core (thiserror-based).

use std::fmt;

use thiserror::Error;

use crate::buffer::BufferHeader;
use crate::types::ComponentState;

/// Error category carried by `Event::Error`.
///
/// `DecoderError` holds the context string; the client-visible event only
/// needs the category.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadParameter,
    IncorrectStateOperation,
    InsufficientResources,
    UnsupportedSetting,
    StreamCorrupt,
    HardwareError,
    InvalidState,
    SameState,
    IncorrectStateTransition,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Session error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecoderError {
    /// Malformed call: unknown slot, bad length, port in the wrong mode.
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    /// The call is not legal in the current state.
    #[error("Operation '{operation}' not allowed in state {state}")]
    IncorrectStateOperation {
        operation: &'static str,
        state: ComponentState,
    },

    /// Allocation or device resources exhausted (includes device overload).
    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    /// The device rejected a configuration or stream.
    #[error("Unsupported setting: {0}")]
    UnsupportedSetting(String),

    /// The frame assembler cannot make progress on the input bytes.
    #[error("Stream corrupt: {0}")]
    StreamCorrupt(String),

    /// Fatal device fault.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// The component is latched in the Invalid state.
    #[error("Component is in the Invalid state")]
    InvalidState,

    /// A state transition to the current state was requested.
    #[error("Already in state {0}")]
    SameState(ComponentState),

    /// A state transition outside the legal table was requested.
    #[error("Illegal state transition {from} -> {to}")]
    IncorrectStateTransition {
        from: ComponentState,
        to: ComponentState,
    },
}

impl DecoderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadParameter(_) => ErrorKind::BadParameter,
            Self::IncorrectStateOperation { .. } => ErrorKind::IncorrectStateOperation,
            Self::InsufficientResources(_) => ErrorKind::InsufficientResources,
            Self::UnsupportedSetting(_) => ErrorKind::UnsupportedSetting,
            Self::StreamCorrupt(_) => ErrorKind::StreamCorrupt,
            Self::Hardware(_) => ErrorKind::HardwareError,
            Self::InvalidState => ErrorKind::InvalidState,
            Self::SameState(_) => ErrorKind::SameState,
            Self::IncorrectStateTransition { .. } => ErrorKind::IncorrectStateTransition,
        }
    }

    /// Fatal errors latch the component into `Invalid`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StreamCorrupt(_) | Self::Hardware(_))
    }

    pub fn bad_parameter(msg: impl Into<String>) -> Self {
        Self::BadParameter(msg.into())
    }
}

/// Failure reported by a device call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device rejected request: {0}")]
    Rejected(String),

    #[error("Device overloaded")]
    Overload,

    #[error("Device does not support: {0}")]
    Unsupported(String),

    #[error("Device fault: {0}")]
    Fault(String),
}

impl From<DeviceError> for DecoderError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Rejected(msg) => Self::BadParameter(msg),
            DeviceError::Overload => Self::InsufficientResources("device overloaded".into()),
            DeviceError::Unsupported(msg) => Self::UnsupportedSetting(msg),
            DeviceError::Fault(msg) => Self::Hardware(msg),
        }
    }
}

/// A buffer handed back to its sender because the call that carried it failed.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct Rejected<E: std::error::Error + 'static> {
    #[source]
    pub error: E,
    pub buffer: BufferHeader,
}

impl<E: std::error::Error + 'static> Rejected<E> {
    pub fn new(error: E, buffer: BufferHeader) -> Self {
        Self { error, buffer }
    }

    pub fn into_parts(self) -> (E, BufferHeader) {
        (self.error, self.buffer)
    }
}

/// Convenience Result type for session operations.
pub type DecodeResult<T> = Result<T, DecoderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PortIndex;

    #[test]
    fn fatal_classification() {
        assert!(DecoderError::Hardware("bus".into()).is_fatal());
        assert!(DecoderError::StreamCorrupt("overflow".into()).is_fatal());
        assert!(!DecoderError::InsufficientResources("busy".into()).is_fatal());
        assert!(!DecoderError::InvalidState.is_fatal());
    }

    #[test]
    fn kinds_match_variants() {
        assert_eq!(
            DecoderError::SameState(ComponentState::Idle).kind(),
            ErrorKind::SameState
        );
        assert_eq!(
            DecoderError::IncorrectStateTransition {
                from: ComponentState::Loaded,
                to: ComponentState::Executing,
            }
            .kind(),
            ErrorKind::IncorrectStateTransition
        );
        assert_eq!(DecoderError::Hardware("x".into()).kind(), ErrorKind::HardwareError);
    }

    #[test]
    fn device_error_mapping() {
        assert_eq!(
            DecoderError::from(DeviceError::Overload).kind(),
            ErrorKind::InsufficientResources
        );
        assert_eq!(
            DecoderError::from(DeviceError::Fault("dma".into())).kind(),
            ErrorKind::HardwareError
        );
        assert_eq!(
            DecoderError::from(DeviceError::Unsupported("10-bit".into())).kind(),
            ErrorKind::UnsupportedSetting
        );
    }

    #[test]
    fn error_display() {
        let err = DecoderError::IncorrectStateTransition {
            from: ComponentState::Loaded,
            to: ComponentState::Executing,
        };
        assert_eq!(err.to_string(), "Illegal state transition Loaded -> Executing");

        let err = DecoderError::IncorrectStateOperation {
            operation: "empty_this_buffer",
            state: ComponentState::Loaded,
        };
        assert!(err.to_string().contains("empty_this_buffer"));
    }

    #[test]
    fn rejected_returns_buffer() {
        let buffer = BufferHeader::new(PortIndex::Input, 3, vec![0u8; 16]);
        let rejected = Rejected::new(DecoderError::InvalidState, buffer);
        assert_eq!(rejected.to_string(), "Component is in the Invalid state");
        let (err, buffer) = rejected.into_parts();
        assert_eq!(err, DecoderError::InvalidState);
        assert_eq!(buffer.index, 3);
    }
}
