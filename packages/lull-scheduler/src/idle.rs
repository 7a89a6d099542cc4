use crate::clock::Clock;
use crate::timer::{TimerId, Timers};
use std::rc::Rc;

/// Budget handed out by the shim when the host has no idle-callback facility.
pub const SHIM_IDLE_BUDGET_MS: f64 = 50.0;

/// How much of the current idle period remains. Advisory only: nothing is preempted.
pub trait Deadline {
    /// Remaining time in milliseconds, never negative.
    fn time_remaining(&self) -> f64;

    fn did_timeout(&self) -> bool;
}

pub type IdleCallback = Box<dyn FnOnce(&dyn Deadline)>;

/// Opaque handle for a pending idle callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdleHandle(pub u64);

/// "Run this when the host is idle", with a deadline describing the idle period.
pub trait IdleScheduler {
    fn request_idle_callback(&self, callback: IdleCallback) -> IdleHandle;

    /// Idempotent: cancelling a fired or already cancelled handle does nothing.
    fn cancel_idle_callback(&self, handle: IdleHandle);
}

/// Deadline produced by [`IdleCallbackShim`]. Decays linearly from
/// [`SHIM_IDLE_BUDGET_MS`] starting at registration time.
pub struct ShimDeadline {
    clock: Rc<dyn Clock>,
    init_time: f64,
}

impl ShimDeadline {
    pub fn new(clock: Rc<dyn Clock>, init_time: f64) -> Self {
        Self { clock, init_time }
    }
}

impl Deadline for ShimDeadline {
    fn time_remaining(&self) -> f64 {
        (SHIM_IDLE_BUDGET_MS - (self.clock.now() - self.init_time)).max(0.0)
    }

    fn did_timeout(&self) -> bool {
        false
    }
}

/// Approximates `requestIdleCallback` with a zero-delay macrotask.
pub struct IdleCallbackShim {
    clock: Rc<dyn Clock>,
    timers: Rc<dyn Timers>,
}

impl IdleCallbackShim {
    pub fn new(clock: Rc<dyn Clock>, timers: Rc<dyn Timers>) -> Self {
        Self { clock, timers }
    }
}

impl IdleScheduler for IdleCallbackShim {
    fn request_idle_callback(&self, callback: IdleCallback) -> IdleHandle {
        let deadline = ShimDeadline::new(self.clock.clone(), self.clock.now());
        let id = self.timers.set_timeout(Box::new(move || callback(&deadline)), 0.0);
        IdleHandle(id.0)
    }

    fn cancel_idle_callback(&self, handle: IdleHandle) {
        self.timers.clear_timeout(TimerId(handle.0));
    }
}
