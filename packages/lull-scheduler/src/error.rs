use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("host offers no microtask primitive (native queue, promise jobs or mutation observer)")]
    NoMicrotaskPrimitive,
    #[error("host primitive `{primitive}` failed: {message}")]
    Host {
        primitive: &'static str,
        message: String,
    },
}
