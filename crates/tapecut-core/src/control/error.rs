//! Control facade error types

use thiserror::Error;

/// Errors returned by the control facade
///
/// Nothing here crosses the audio-thread boundary; a failed call means no
/// command was enqueued.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Voice index outside 1-6
    #[error("voice index out of range: {0}")]
    VoiceOutOfRange(usize),

    /// Buffer index outside 1-2
    #[error("buffer index out of range: {0}")]
    BufferOutOfRange(usize),

    /// A duration or position that must be non-negative was negative
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Too many buffer reads in flight; poll events and retry
    #[error("no buffer read slot available")]
    Capacity,

    /// The engine side of the channel has been dropped
    #[error("engine is not running")]
    NotReady,
}

/// Result type for control operations
pub type ControlResult<T> = Result<T, ControlError>;
