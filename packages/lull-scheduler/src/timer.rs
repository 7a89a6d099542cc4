use crate::Task;

/// Opaque handle to a pending macrotask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// The host's macrotask primitive (`setTimeout` in a browser).
pub trait Timers {
    fn set_timeout(&self, task: Task, delay_ms: f64) -> TimerId;

    /// Clearing a timer that already fired or was already cleared is a no-op.
    fn clear_timeout(&self, id: TimerId);
}
