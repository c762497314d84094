//! Bridge error types.

use thiserror::Error;
use turnstile_core::RegistryError;

/// Errors raised while serving a debugger.
#[derive(Debug, Error)]
pub enum DapError {
    /// Socket or pipe failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing-level failure while reading a message.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer sent something that is not a protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Request arguments did not match the command's schema.
    #[error("invalid arguments for '{command}': {message}")]
    InvalidArguments {
        /// The command whose arguments were rejected.
        command: String,
        /// Deserializer diagnostic.
        message: String,
    },

    /// The bridge only serves requests.
    #[error("{0} messages are not handled by the bridge")]
    NotImplemented(String),

    /// A handle or thread id no longer resolves.
    #[error("stale reference: {0}")]
    NotFound(#[from] RegistryError),

    /// A frame has not been reported for the thread yet.
    #[error("thread {0} has no reported frame")]
    NoFrame(u32),

    /// `evaluate` was sent without a `frameId`.
    #[error("evaluate requires a frameId")]
    MissingFrame,

    /// Expression produced no value in the frame's scope.
    #[error("could not evaluate '{0}'")]
    Evaluate(String),

    /// Data-model failure (unparseable literal, read-only target, ...).
    #[error("data error: {0}")]
    Data(String),

    /// The debugger channel went away while sending.
    #[error("debugger connection closed")]
    Disconnected,
}
