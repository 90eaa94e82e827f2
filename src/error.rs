//! Error types for the RemCon32 driver.
//!
//! This module defines the primary error type, `SemError`, for the whole crate.
//! Using the `thiserror` crate, it keeps the failure taxonomy of the console link
//! in one place so callers can match on what actually went wrong:
//!
//! - **`Channel`**: the byte channel itself failed (write error, read error, read
//!   timeout, port closed). Fatal to the exchange in flight; never retried here.
//! - **`ProtocolViolation`**: the console answered, but not with one of the two
//!   recognised ack/data shapes. Carries the command and both raw lines.
//! - **`Remcon`**: the console reported a numbered failure (`* <code>`), decoded
//!   through the static table in [`crate::remcon::codes`].
//! - **`ValueDecode`**: a success payload that should have parsed as a number or
//!   tuple did not. Points at a framing or firmware mismatch, not a documented code.
//! - **`InvalidArgument`**: a free-text argument (detector name) would not fit
//!   on one ASCII request line. Raised before anything is written.
//! - **`MotionTimeout`**: the stage poll loop gave up waiting. The stage may still
//!   be moving; the last polled pose is attached.
//! - **`Config`** / **`Configuration`**: loading or validating `RemconConfig`.
//!
//! By using `#[from]`, `SemError` can be created from the underlying error types,
//! so the `?` operator works across module boundaries.

use crate::stage::StagePose;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SemResult<T> = std::result::Result<T, SemError>;

/// Transport-level failures of the byte channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The port could not be opened.
    #[error("failed to open serial port '{port}': {source}")]
    Open {
        /// Port path as configured.
        port: String,
        /// Underlying error from the serial backend.
        #[source]
        source: std::io::Error,
    },

    /// Writing the request line failed.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Reading a response line failed.
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    /// No complete line arrived within the per-read timeout.
    #[error("no response line within {0:?}")]
    Timeout(Duration),

    /// The channel reached end-of-file or was closed by the client.
    #[error("channel closed")]
    Closed,
}

/// Primary error type for the SEM remote-control link.
#[derive(Error, Debug)]
pub enum SemError {
    /// Transport-level failure. See [`ChannelError`].
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The console replied in neither the success nor the numbered-failure shape.
    #[error("Protocol violation for '{command}': ack {ack:?}, data {data:?}")]
    ProtocolViolation {
        /// Request line as sent, without terminator.
        command: String,
        /// Raw first response line.
        ack: String,
        /// Raw second response line.
        data: String,
    },

    /// Numbered failure reported by the console.
    #[error("remcon error {code} {message}")]
    Remcon {
        /// Code from the `* <code>` data line.
        code: i32,
        /// Table text, or the unmapped placeholder.
        message: &'static str,
    },

    /// A success payload could not be decoded into the expected type.
    #[error("Could not decode response to '{command}' ({reason}): {payload:?}")]
    ValueDecode {
        /// Request line as sent, without terminator.
        command: String,
        /// Payload that failed to decode.
        payload: String,
        /// What the decoder expected.
        reason: String,
    },

    /// The stage did not report settled before the wait bound elapsed.
    #[error("Stage still moving after {elapsed:?}")]
    MotionTimeout {
        /// Time spent polling.
        elapsed: Duration,
        /// Pose from the final poll after giving up.
        pose: StagePose,
    },

    /// A request argument cannot be encoded as one ASCII line. Nothing was sent.
    #[error("Invalid argument for '{verb}': {reason}")]
    InvalidArgument {
        /// Wire verb of the rejected request.
        verb: &'static str,
        /// What was wrong with the argument.
        reason: String,
    },

    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl SemError {
    /// Numbered console error code, if this is a `Remcon` error.
    pub fn remcon_code(&self) -> Option<i32> {
        match self {
            SemError::Remcon { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for failures of the byte channel itself.
    pub fn is_channel(&self) -> bool {
        matches!(self, SemError::Channel(_))
    }

    pub(crate) fn decode(
        command: impl Into<String>,
        payload: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SemError::ValueDecode {
            command: command.into(),
            payload: payload.into(),
            reason: reason.into(),
        }
    }
}
