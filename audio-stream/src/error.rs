use crate::negotiate::NegotiationError;
use crate::{Direction, State};
use std::error;
use std::fmt;
use thiserror::Error;

/// A status code reported by the platform audio subsystem.
///
/// For ALSA this is a negative error number, for CoreAudio an `OSStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(i32);

impl Status {
    /// Construct a status from a raw platform code.
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    /// The raw platform code.
    pub const fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0)
    }
}

impl error::Error for Status {}

/// A lifecycle operation on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Acquiring and configuring the device.
    Open,
    /// Starting callbacks.
    Start,
    /// Stopping callbacks.
    Stop,
    /// Releasing the device.
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Open => write!(f, "open"),
            Operation::Start => write!(f, "start"),
            Operation::Stop => write!(f, "stop"),
            Operation::Close => write!(f, "close"),
        }
    }
}

/// Errors surfaced to the thread controlling a stream.
#[derive(Debug, Error)]
pub enum Error {
    /// The device could not satisfy the requested configuration.
    #[error("negotiation failed: {0}")]
    Negotiation(
        #[from]
        #[source]
        NegotiationError,
    ),
    /// The operation is not valid in the current lifecycle state.
    #[error("cannot {operation} a stream in state `{state}`")]
    State {
        /// The operation which was attempted.
        operation: Operation,
        /// The state the stream was in.
        state: State,
    },
    /// The platform failed to perform a lifecycle operation.
    #[error("device error during {operation}: status {status}")]
    Device {
        /// The operation which failed.
        operation: Operation,
        /// The status reported by the platform.
        status: Status,
    },
    /// The handler passed when configuring a stream doesn't serve its
    /// direction.
    #[error("handler cannot serve a stream in the {direction} direction")]
    HandlerMismatch {
        /// The direction of the stream.
        direction: Direction,
    },
    /// The timing offset is not available until both directions of a duplex
    /// session have produced their first callback.
    #[error("timing offset is not available yet")]
    NotAvailable,
}

/// The re-exported error type.
pub type Result<T, E = Error> = ::std::result::Result<T, E>;
