use lull_scheduler::SchedulerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse JSON queue configuration")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse TOML queue configuration")]
    Toml(#[from] toml::de::Error),

    #[error("host cannot provide scheduling channels")]
    Scheduler(#[from] SchedulerError),

    #[error("idle queue used after destroy()")]
    Destroyed,
}

/// Why a single task failed. Only ever reported, never returned to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}
