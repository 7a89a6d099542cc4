pub mod clock;
pub mod env;
pub mod error;
pub mod host;
pub mod idle;
pub mod lifecycle;
pub mod local;
pub mod microtask;
pub mod timer;

/// A unit of host work: a macrotask, a microtask, or a listener body.
/// Everything in Lull is single-threaded, so tasks are neither `Send` nor `Sync`.
pub type Task = Box<dyn FnOnce()>;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use env::{EnvironmentProbe, HostProfile, VisibilityState};
pub use error::SchedulerError;
pub use host::{Host, HostServices};
pub use idle::{Deadline, IdleCallback, IdleCallbackShim, IdleHandle, IdleScheduler, ShimDeadline};
pub use lifecycle::{LifecycleEvent, LifecycleEvents, ListenerId};
pub use local::{LocalDeadline, LocalHost, LocalHostOptions};
pub use microtask::{
    MicrotaskBackend, MicrotaskPrimitive, MicrotaskScheduler, MicrotaskSources, MutationTrigger,
};
pub use timer::{TimerId, Timers};
