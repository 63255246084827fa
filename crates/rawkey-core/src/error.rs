//! Error taxonomy for capture sessions.
//!
//! Every variant identifies the stage that failed.  [`CaptureError::status_code`]
//! gives each one a distinct nonzero integer for the status-code interface
//! (`0` is reserved for success).

use thiserror::Error;

use crate::event::copy_nul_terminated;
use crate::xi::XiVersion;

/// Status code returned by status-code style entry points on success.
pub const STATUS_OK: i32 = 0;

/// Error type for capture session operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The display/input server could not be reached.
    #[error("cannot connect to display server: {0}")]
    ConnectionFailure(String),

    /// The raw-input extension is not present (e.g. running under Wayland).
    #[error("XInput extension unavailable: {0}")]
    ExtensionUnavailable(String),

    /// The extension is present but no compatible protocol version exists.
    #[error("XInput version negotiation failed: requested {requested}, server offers {offered}")]
    VersionNegotiationFailure {
        requested: XiVersion,
        offered: XiVersion,
    },

    /// Registering interest in raw key events failed.
    #[error("failed to select raw key events: {0}")]
    EventSelectionFailure(String),

    /// The subscription mask buffer could not be allocated.
    #[error("failed to allocate event mask of {0} bytes")]
    AllocationFailure(usize),

    /// An operation requiring an open session was invoked while closed.
    #[error("capture session is not open")]
    NotOpen,

    /// The underlying connection terminated while waiting for an event.
    #[error("display connection lost")]
    ConnectionLost,
}

impl CaptureError {
    /// Distinct nonzero status code for this error.
    pub fn status_code(&self) -> i32 {
        match self {
            CaptureError::ConnectionFailure(_) => 1,
            CaptureError::ExtensionUnavailable(_) => 2,
            CaptureError::VersionNegotiationFailure { .. } => 3,
            CaptureError::EventSelectionFailure(_) => 4,
            CaptureError::AllocationFailure(_) => 5,
            CaptureError::NotOpen => 6,
            CaptureError::ConnectionLost => 7,
        }
    }

    /// `true` for errors that end the current session.
    ///
    /// Both kinds surfaced by `next` are fatal; the caller must `open` again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::NotOpen | CaptureError::ConnectionLost)
    }

    /// Writes the human-readable message into `buf`, truncated and
    /// NUL-terminated within its bounds.
    ///
    /// Returns the number of message bytes written (excluding the terminator).
    /// An empty buffer is left untouched.
    pub fn write_diagnostic(&self, buf: &mut [u8]) -> usize {
        copy_nul_terminated(&self.to_string(), buf)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
