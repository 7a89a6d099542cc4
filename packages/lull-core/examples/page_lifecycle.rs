//! Simulates a page that queues analytics work, loses visibility and unloads.
//!
//! Scheduling decisions are logged at debug level.

use lull_core::{IdleQueue, QueueConfig, State};
use lull_scheduler::{LocalHost, VisibilityState};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let host = LocalHost::new();
    let config = QueueConfig::from_toml_str("ensure_tasks_run = true\nmax_tasks_per_iteration = 2\n")?;
    let queue = IdleQueue::from_host(config, host.clone())?;

    for i in 0..5 {
        queue.push_task(move |state: &State| {
            tracing::info!(
                "sending beacon {} (queued at {:.2}ms while {})",
                i,
                state.time,
                state.visibility_state
            );
        })?;
    }

    // One idle period only gets through part of the queue.
    host.run_idle_period(16.0);
    tracing::info!("{} tasks still pending after the first idle period", queue.pending_len());

    // The tab goes to the background: everything left is flushed right away.
    host.set_visibility_state(VisibilityState::Hidden);

    queue.push_task(|_: &State| tracing::info!("late beacon, delivered at the next microtask"))?;
    host.shutdown();

    queue.destroy();
    Ok(())
}
