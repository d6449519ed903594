//! Process-level reporting for callback failures nobody else handled.

#[cfg(feature = "logging")]
use log::error;

use crate::errors::TimerError;
use crate::task::TaskId;

/// Destination for failures of tasks scheduled without an error handler.
pub trait FaultSink: Send + Sync {
    fn report(&self, task: TaskId, error: &TimerError);
}

/// Default sink: writes failures to the `log` facade at error level.
///
/// Failures are dropped when the `logging` feature is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFaultSink;

impl FaultSink for LogFaultSink {
    #[allow(unused_variables)]
    fn report(&self, task: TaskId, error: &TimerError) {
        #[cfg(feature = "logging")]
        error!("Unhandled failure in {}: {}", task, error);
    }
}

impl<F> FaultSink for F
where
    F: Fn(TaskId, &TimerError) + Send + Sync,
{
    fn report(&self, task: TaskId, error: &TimerError) {
        (self)(task, error)
    }
}
