pub mod config;
pub mod error;
pub mod queue;
pub mod state;
pub mod task;

pub use config::QueueConfig;
pub use error::{QueueError, TaskError};
pub use queue::IdleQueue;
pub use state::State;
pub use task::{TaskOptions, TaskOutcome};

pub use lull_scheduler::{HostServices, VisibilityState};
