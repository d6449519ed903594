//! Error handling module for the timing wheel.

use thiserror::Error;

/// Custom error type for wheel operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// The wheel was constructed with an invalid slot count or interval.
    #[error("Invalid wheel configuration: {0}")]
    Configuration(String),

    /// A task was scheduled with an unusable delay.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on a stopped wheel.
    #[error("Operation attempted on a stopped wheel.")]
    WheelStopped,

    /// The driver could not be spawned because no tokio runtime is running.
    #[error("No tokio runtime available to drive the wheel.")]
    NoRuntime,

    /// Callback execution failed.
    #[error("Callback execution failed: {0}")]
    CallbackError(String),

    /// Callback panicked while executing.
    #[error("Callback panicked: {0}")]
    CallbackPanicked(String),
}
