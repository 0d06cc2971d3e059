//! Error taxonomy for the reader library.
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias
//! over [`Error`]. Transport, framing, device-reported, parsing and caller
//! misuse failures are kept as separate kinds so callers can match on the
//! one they care about instead of parsing strings.

use std::fmt;

/// Category of a device-reported fault code (response status byte != 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCategory {
    /// Unrecoverable device error; the connection should be torn down.
    Fatal,
    /// Malformed or out-of-sequence protocol usage.
    Protocol,
    /// Fault specific to the tag population (e.g. no tag found).
    Tag,
    /// Antenna, RF front-end, or other hardware fault.
    Hardware,
    /// The device doesn't implement the requested capability.
    Unsupported,
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultCategory::Fatal => "FATAL",
            FaultCategory::Protocol => "PROTOCOL",
            FaultCategory::Tag => "TAG",
            FaultCategory::Hardware => "HARDWARE",
            FaultCategory::Unsupported => "UNSUPPORTED",
        };
        f.write_str(s)
    }
}

/// The unified error type for this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Transport-level failure: the byte channel itself misbehaved.
    #[error("transport timed out")]
    Timeout,

    /// The transport was closed (by us or by the peer) and can't be used.
    #[error("transport closed")]
    Closed,

    /// Underlying I/O error from the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A decoded frame's CRC did not match.
    #[error("CRC mismatch in response frame")]
    CrcMismatch,

    /// A frame could not be located or its header was inconsistent.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The device reported a non-zero status byte.
    #[error("reader fault 0x{code:04x} ({category})")]
    CodeFault {
        /// 16-bit fault code as reported by the device.
        code: u16,
        /// Coarse category the code maps to.
        category: FaultCategory,
    },

    /// A response payload didn't have the shape a given opcode promises.
    #[error("failed to parse response: {0}")]
    ParseFault(String),

    /// Caller asked for a parameter that doesn't exist (or was removed
    /// after a failed capability probe).
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// Caller tried to set a parameter that's read-only.
    #[error("parameter is read-only: {0}")]
    ReadOnly(String),

    /// Caller passed a value of the wrong shape for a parameter.
    #[error("type mismatch for parameter {0}")]
    TypeMismatch(String),

    /// Caller passed an otherwise-invalid argument (out of range, etc).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The reader URI couldn't be parsed or named an unknown scheme.
    #[error("invalid reader URI: {0}")]
    InvalidUri(String),

    /// Requested capability isn't implemented by the selected variant.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Cooperative cancellation signal. Internal only; never surfaced
    /// across the public API boundary.
    #[error("interrupted")]
    Interrupted,
}

impl Error {
    /// True if this error should mark the owning handle as disconnected.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Error::Closed | Error::Io(_))
    }

    /// Build a [`FaultCategory::Unsupported`] [`Error::CodeFault`] for a given code.
    pub fn unsupported_code(code: u16) -> Self {
        Error::CodeFault {
            code,
            category: FaultCategory::Unsupported,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Error {
        Error::ParseFault(format!("poisoned lock: {e}"))
    }
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
