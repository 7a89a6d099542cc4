use lull_scheduler::{Clock, EnvironmentProbe, VisibilityState};
use serde::{Deserialize, Serialize};

/// What the world looked like when a task was queued.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub time: f64,
    pub visibility_state: VisibilityState,
}

impl State {
    pub fn capture(clock: &dyn Clock, probe: &dyn EnvironmentProbe) -> Self {
        Self {
            time: clock.now(),
            visibility_state: probe.current_visibility(),
        }
    }
}
