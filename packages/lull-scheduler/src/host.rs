use crate::clock::Clock;
use crate::env::EnvironmentProbe;
use crate::error::SchedulerError;
use crate::idle::{IdleCallbackShim, IdleScheduler};
use crate::lifecycle::LifecycleEvents;
use crate::microtask::{MicrotaskScheduler, MicrotaskSources};
use crate::timer::Timers;
use std::rc::Rc;

/// Everything a runtime (a browser window, the in-process `LocalHost`, ...)
/// has to provide for idle scheduling to work on top of it.
pub trait Host: Clock + EnvironmentProbe + Timers + LifecycleEvents + MicrotaskSources {
    /// The host's own idle-callback facility, if it has one.
    fn native_idle_scheduler(&self) -> Option<Rc<dyn IdleScheduler>>;
}

/// The capabilities the idle queue consumes, with both scheduling channels
/// resolved once so call sites never branch on what the host supports.
///
/// A host without any microtask primitive still yields services; the
/// failure only surfaces through [`HostServices::microtasks`], for consumers
/// that actually need the channel.
#[derive(Clone)]
pub struct HostServices {
    pub clock: Rc<dyn Clock>,
    pub probe: Rc<dyn EnvironmentProbe>,
    pub idle: Rc<dyn IdleScheduler>,
    pub lifecycle: Rc<dyn LifecycleEvents>,
    microtasks: Result<MicrotaskScheduler, SchedulerError>,
}

impl HostServices {
    pub fn new<H: Host + 'static>(host: Rc<H>) -> Self {
        let clock: Rc<dyn Clock> = host.clone();
        let idle: Rc<dyn IdleScheduler> = match host.native_idle_scheduler() {
            Some(native) => native,
            None => {
                tracing::debug!("Host has no idle callbacks, using the timer shim");
                let timers: Rc<dyn Timers> = host.clone();
                Rc::new(IdleCallbackShim::new(clock.clone(), timers))
            }
        };
        let microtasks = MicrotaskScheduler::select(&*host);
        if let Err(err) = &microtasks {
            tracing::debug!("No microtask channel: {}", err);
        }

        Self {
            clock,
            probe: host.clone(),
            idle,
            lifecycle: host,
            microtasks,
        }
    }

    pub fn microtasks(&self) -> Result<&MicrotaskScheduler, SchedulerError> {
        self.microtasks.as_ref().map_err(Clone::clone)
    }
}
