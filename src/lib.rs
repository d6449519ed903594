//! # wheel-timer
//! A single-level timing wheel for one-shot delayed callbacks, driven by tokio.
//!
//! Tasks are parked in one of a fixed number of slots together with the
//! revolution of the wheel on which they become due, so a single level can
//! hold delays spanning many sweeps.

pub mod config;
pub mod errors;
pub mod fault;
mod slot;
pub mod task;
pub mod wheel;

pub use config::WheelConfig;
pub use errors::TimerError;
pub use fault::{FaultSink, LogFaultSink};
pub use task::{ErrorHandler, TaskCallback, TaskId};
pub use wheel::{TimingWheel, WheelState, WheelStatistics};
