use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::TimerError;

/// Opaque handle identifying a scheduled task.
///
/// Handles are unique per wheel and never reused. They are lookup keys only;
/// holding one does not keep the task alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        TaskId(raw)
    }

    /// Returns the raw numeric value of the handle.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A trait for task callbacks.
#[async_trait]
pub trait TaskCallback: Send + Sync {
    /// The function to execute when the task becomes due.
    async fn execute(&self) -> Result<(), TimerError>;
}

#[async_trait]
impl<F> TaskCallback for F
where
    F: Fn() -> Result<(), TimerError> + Send + Sync,
{
    async fn execute(&self) -> Result<(), TimerError> {
        (self)()
    }
}

/// Receives the failure of a task's callback together with the task's handle.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: &TimerError, task: TaskId);
}

impl<F> ErrorHandler for F
where
    F: Fn(&TimerError, TaskId) + Send + Sync,
{
    fn handle(&self, error: &TimerError, task: TaskId) {
        (self)(error, task)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Pending,
    Canceled,
}

/// A task parked in a slot until the driver reaches it.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) target_revolution: u64,
    pub(crate) callback: Arc<dyn TaskCallback>,
    pub(crate) error_handler: Option<Arc<dyn ErrorHandler>>,
    pub(crate) state: TaskState,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        target_revolution: u64,
        callback: Arc<dyn TaskCallback>,
        error_handler: Option<Arc<dyn ErrorHandler>>,
    ) -> Self {
        Task {
            id,
            target_revolution,
            callback,
            error_handler,
            state: TaskState::Pending,
        }
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.state == TaskState::Canceled
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("target_revolution", &self.target_revolution)
            .field("has_error_handler", &self.error_handler.is_some())
            .field("state", &self.state)
            .finish()
    }
}
