//! Parallel runtime error types.

use std::fmt::{Display, Formatter};

use crate::pool::PoolState;

pub type Result<T> = std::result::Result<T, Error>;

/// A panic caught at a task boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFault {
    /// The name the task was submitted with.
    pub task: String,
    /// The panic payload, if it was a string.
    pub message: String,
}

impl Display for TaskFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "task `{}` panicked: {}", self.task, self.message)
    }
}

impl TaskFault {
    pub(crate) fn from_panic(task: impl Into<String>, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            task: task.into(),
            message,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid range [{start}, {end}) with step {step}")]
    InvalidRange { start: i64, end: i64, step: i64 },
    #[error("chunk and block sizes must be nonzero")]
    ZeroChunk,
    #[error("a thread pool needs at least one worker thread")]
    ZeroThreads,
    #[error("task rejected: thread pool is {state:?}")]
    Rejected { state: PoolState },
    #[error("execution aborted")]
    Aborted,
    #[error("{} task(s) faulted, first: {}", .0.len(), .0.first().map(|f| f.to_string()).unwrap_or_default())]
    TaskFaults(Vec<TaskFault>),
    #[error("pipeline is disconnected")]
    Disconnected,
    #[error("failed to spawn worker thread")]
    Spawn(#[from] std::io::Error),
}
