use crate::task::{Task, TaskId, TaskState};

/// Outcome of sweeping one slot at a given revolution.
#[derive(Debug, Default)]
pub(crate) struct Sweep {
    /// Tasks whose revolution has come up, in insertion order.
    pub(crate) due: Vec<Task>,
    /// Canceled tasks dropped without running.
    pub(crate) discarded: Vec<TaskId>,
}

/// One position on the wheel.
#[derive(Debug)]
pub(crate) struct Slot {
    index: usize,
    tasks: Vec<Task>,
}

impl Slot {
    pub(crate) fn new(index: usize) -> Self {
        Slot {
            index,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Flags the task as canceled. Returns `false` if it is not here or
    /// already canceled.
    pub(crate) fn cancel(&mut self, id: TaskId) -> bool {
        match self.tasks.iter_mut().find(|task| task.id == id) {
            Some(task) if task.state == TaskState::Pending => {
                task.state = TaskState::Canceled;
                true
            }
            _ => false,
        }
    }

    /// Removes canceled tasks and tasks due at `revolution`, leaving the rest
    /// for a later sweep.
    pub(crate) fn sweep(&mut self, revolution: u64) -> Sweep {
        let mut sweep = Sweep::default();
        let tasks = std::mem::take(&mut self.tasks);
        for task in tasks {
            if task.is_canceled() {
                sweep.discarded.push(task.id);
            } else if task.target_revolution <= revolution {
                sweep.due.push(task);
            } else {
                self.tasks.push(task);
            }
        }
        sweep
    }
}
