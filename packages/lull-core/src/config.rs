use crate::error::QueueError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_TASK_TIME: f64 = 0.0;
pub const DEFAULT_MAX_TASKS_PER_ITERATION: usize = 100;

/// Construction options for an [`IdleQueue`](crate::IdleQueue).
///
/// Unknown keys are rejected. The camelCase aliases accept configuration
/// written for the JavaScript flavour of this queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Listen for the surface being hidden or torn down and flush
    /// synchronously when it happens.
    #[serde(alias = "ensureTasksRun")]
    pub ensure_tasks_run: bool,

    /// Idle time (ms) a task needs by default before it is started.
    #[serde(alias = "defaultMinTaskTime")]
    pub default_min_task_time: f64,

    /// Upper bound on tasks started in one deadline-bounded pass. Forced
    /// drains ignore it.
    #[serde(alias = "maxTasksPerIteration")]
    pub max_tasks_per_iteration: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ensure_tasks_run: false,
            default_min_task_time: DEFAULT_MIN_TASK_TIME,
            max_tasks_per_iteration: DEFAULT_MAX_TASKS_PER_ITERATION,
        }
    }
}

impl QueueConfig {
    pub fn with_ensure_tasks_run(mut self, ensure_tasks_run: bool) -> Self {
        self.ensure_tasks_run = ensure_tasks_run;
        self
    }

    pub fn with_default_min_task_time(mut self, ms: f64) -> Self {
        self.default_min_task_time = ms;
        self
    }

    pub fn with_max_tasks_per_iteration(mut self, max: usize) -> Self {
        self.max_tasks_per_iteration = max;
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if !self.default_min_task_time.is_finite() || self.default_min_task_time < 0.0 {
            return Err(QueueError::InvalidConfig(format!(
                "default_min_task_time must be a finite number >= 0, got {}",
                self.default_min_task_time
            )));
        }
        if self.max_tasks_per_iteration == 0 {
            return Err(QueueError::InvalidConfig(
                "max_tasks_per_iteration must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(source: &str) -> Result<Self, QueueError> {
        let config: QueueConfig = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, QueueError> {
        let config: QueueConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }
}
