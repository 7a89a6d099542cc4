use crate::error::TaskError;
use crate::state::State;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// What a task callback may return. Plain `()` for infallible work, or a
/// `Result` whose error gets reported instead of propagated.
///
/// Panics are caught as well, but only where unwinding exists. On
/// `wasm32-unknown-unknown` (the browser host) a panic aborts the module, so
/// browser tasks should report failures through `Err`.
pub trait TaskOutcome {
    fn into_result(self) -> Result<(), TaskError>;
}

impl TaskOutcome for () {
    fn into_result(self) -> Result<(), TaskError> {
        Ok(())
    }
}

impl<E: fmt::Display> TaskOutcome for Result<(), E> {
    fn into_result(self) -> Result<(), TaskError> {
        self.map_err(|err| TaskError::Failed(err.to_string()))
    }
}

/// Per-task options for `push_task_with`/`unshift_task_with`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaskOptions {
    /// Idle time (ms) that must remain before this task is started. `None`
    /// falls back to the queue default.
    pub min_task_time: Option<f64>,
}

impl TaskOptions {
    pub fn min_task_time(ms: f64) -> Self {
        Self {
            min_task_time: Some(ms),
        }
    }

    /// Floors at 0; NaN counts as 0.
    pub(crate) fn resolve(&self, default_min_task_time: f64) -> f64 {
        self.min_task_time
            .unwrap_or(default_min_task_time)
            .max(0.0)
    }
}

type TaskCallback = Box<dyn FnOnce(&State) -> Result<(), TaskError>>;

pub(crate) struct TaskRecord {
    callback: TaskCallback,
    pub state: State,
    pub min_task_time: f64,
}

impl TaskRecord {
    pub fn new<F, R>(task: F, state: State, min_task_time: f64) -> Self
    where
        F: FnOnce(&State) -> R + 'static,
        R: TaskOutcome + 'static,
    {
        Self {
            callback: Box::new(move |state: &State| task(state).into_result()),
            state,
            min_task_time,
        }
    }

    /// Invokes the callback, turning both returned errors and panics into a `TaskError`.
    /// Panics are only caught on targets that unwind.
    pub fn run(self) -> Result<(), TaskError> {
        let TaskRecord {
            callback, state, ..
        } = self;
        match catch_unwind(AssertUnwindSafe(move || callback(&state))) {
            Ok(result) => result,
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
