//! Crate-wide error type.
//!
//! Mirrors the shape of the upload manager's failure semantics: every
//! protocol layer bottoms out in one of these variants, which the manager
//! surfaces to the caller without any automatic fallback to another
//! strategy.

use miette::Diagnostic;
use thiserror::Error;

use crate::board::BoardId;

/// Errors produced while parsing firmware artifacts, dispatching a
/// strategy, or driving a board through its flashing protocol.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    /// The firmware artifact could not be parsed, or is too large for the
    /// target's flash.
    #[error("invalid firmware artifact: {0}")]
    InvalidArtifact(String),

    /// No strategy is registered for the given board id.
    #[error("unsupported board: '{0}'")]
    BoardUnsupported(BoardId),

    /// The prepare phase completed, but the board did not come up in
    /// bootloader mode.
    #[error("reset failed: board did not enter bootloader mode ({0})")]
    ResetFailed(String),

    /// The board re-enumerated under a different USB identity; the caller
    /// must acquire a new port handle and retry via `flash_to_bootloader`.
    #[error("board re-enumerated into its bootloader; acquire a new port and retry")]
    BootloaderPortNeeded,

    /// Sync/version handshake could not be established within its retry
    /// budget.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A read, write, open, or close surfaced an unrecoverable transport
    /// error.
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// The device replied, but with an unexpected byte sequence.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A specific operation exceeded its bound.
    #[error("timeout waiting for '{operation}' ({elapsed_ms}ms)")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error(transparent)]
    SerialPort(#[from] serialport::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
