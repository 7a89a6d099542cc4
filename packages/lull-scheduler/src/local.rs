use crate::Task;
use crate::clock::{Clock, MonotonicClock};
use crate::error::SchedulerError;
use crate::env::{EnvironmentProbe, HostProfile, VisibilityState};
use crate::host::Host;
use crate::idle::{Deadline, IdleCallback, IdleHandle, IdleScheduler};
use crate::lifecycle::{LifecycleEvent, LifecycleEvents, ListenerId};
use crate::microtask::{MicrotaskPrimitive, MicrotaskSources, MutationTrigger};
use crate::timer::{TimerId, Timers};

use serde::{Deserialize, Serialize};
use slotmap::{Key, KeyData, SlotMap, new_key_type};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

new_key_type! {
    struct TimerKey;
    struct IdleKey;
    struct ListenerKey;
}

/// Which capabilities a `LocalHost` pretends to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalHostOptions {
    pub profile: HostProfile,
    pub visibility: VisibilityState,
    pub native_idle_callback: bool,
    pub native_microtasks: bool,
    pub promise_jobs: bool,
    pub mutation_observer: bool,
}

impl Default for LocalHostOptions {
    fn default() -> Self {
        Self {
            profile: HostProfile::DOCUMENT,
            visibility: VisibilityState::Visible,
            native_idle_callback: true,
            native_microtasks: true,
            promise_jobs: true,
            mutation_observer: true,
        }
    }
}

struct PendingTimer {
    due: f64,
    seq: u64,
    task: Task,
}

struct PendingIdle {
    seq: u64,
    callback: IdleCallback,
}

struct Listener {
    event: LifecycleEvent,
    callback: Rc<dyn Fn()>,
}

#[derive(Default)]
struct ObservedNode {
    data: String,
    observer: Option<Rc<dyn Fn()>>,
    notification_queued: bool,
}

/// Deadline for an idle period of `LocalHost`, ending at a fixed clock time.
pub struct LocalDeadline {
    clock: Rc<dyn Clock>,
    end: f64,
}

impl Deadline for LocalDeadline {
    fn time_remaining(&self) -> f64 {
        (self.end - self.clock.now()).max(0.0)
    }

    fn did_timeout(&self) -> bool {
        false
    }
}

/// A single-threaded, in-process event loop with a macrotask queue, a
/// microtask queue, idle periods and page-lifecycle signals.
///
/// Native applications drive it explicitly (`tick`, `run_idle_period`, ...);
/// nothing runs unless asked to.
pub struct LocalHost {
    this: Weak<LocalHost>,
    clock: Rc<dyn Clock>,
    options: LocalHostOptions,
    visibility: Cell<VisibilityState>,
    seq: Cell<u64>,
    timers: RefCell<SlotMap<TimerKey, PendingTimer>>,
    idle_callbacks: RefCell<SlotMap<IdleKey, PendingIdle>>,
    microtasks: RefCell<VecDeque<Task>>,
    listeners: RefCell<SlotMap<ListenerKey, Listener>>,
}

impl LocalHost {
    pub fn new() -> Rc<Self> {
        Self::with_options(LocalHostOptions::default())
    }

    pub fn with_options(options: LocalHostOptions) -> Rc<Self> {
        Self::with_clock(options, Rc::new(MonotonicClock::new()))
    }

    pub fn with_clock(options: LocalHostOptions, clock: Rc<dyn Clock>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            clock,
            options,
            visibility: Cell::new(options.visibility),
            seq: Cell::new(0),
            timers: RefCell::new(SlotMap::with_key()),
            idle_callbacks: RefCell::new(SlotMap::with_key()),
            microtasks: RefCell::new(VecDeque::new()),
            listeners: RefCell::new(SlotMap::with_key()),
        })
    }

    pub fn options(&self) -> &LocalHostOptions {
        &self.options
    }

    fn next_seq(&self) -> u64 {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        seq
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn pending_idle_callbacks(&self) -> usize {
        self.idle_callbacks.borrow().len()
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.borrow().len()
    }

    /// Microtask checkpoint: runs microtasks, including ones queued while
    /// draining, until the queue is empty.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.microtasks.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Runs the earliest due macrotask, followed by a microtask checkpoint.
    /// Returns whether a macrotask ran.
    pub fn tick(&self) -> bool {
        self.run_microtasks();

        let now = self.clock.now();
        let next = {
            let mut timers = self.timers.borrow_mut();
            let key = timers
                .iter()
                .filter(|(_, t)| t.due <= now)
                .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.seq.cmp(&b.seq)))
                .map(|(key, _)| key);
            key.and_then(|key| timers.remove(key))
        };

        match next {
            Some(timer) => {
                (timer.task)();
                self.run_microtasks();
                true
            }
            None => false,
        }
    }

    /// Ticks until no macrotask is due. Returns how many macrotasks ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.tick() {
            ran += 1;
        }
        ran
    }

    /// Starts an idle period of `budget_ms`, measured on the host clock.
    pub fn run_idle_period(&self, budget_ms: f64) -> usize {
        let deadline = LocalDeadline {
            clock: self.clock.clone(),
            end: self.clock.now() + budget_ms.max(0.0),
        };
        self.run_idle_period_with(&deadline)
    }

    /// Starts an idle period described by `deadline`. Only callbacks requested
    /// before the period began are invoked; anything requested from inside
    /// waits for the next period.
    pub fn run_idle_period_with(&self, deadline: &dyn Deadline) -> usize {
        self.run_microtasks();

        let mut keys: Vec<(u64, IdleKey)> = self
            .idle_callbacks
            .borrow()
            .iter()
            .map(|(key, pending)| (pending.seq, key))
            .collect();
        keys.sort_unstable_by_key(|(seq, _)| *seq);

        let mut ran = 0;
        for (_, key) in keys {
            let pending = self.idle_callbacks.borrow_mut().remove(key);
            if let Some(pending) = pending {
                (pending.callback)(deadline);
                self.run_microtasks();
                ran += 1;
            }
        }
        ran
    }

    /// Changes the foreground visibility, firing `VisibilityChange` listeners
    /// and a microtask checkpoint when the state actually changes.
    pub fn set_visibility_state(&self, state: VisibilityState) {
        if self.visibility.replace(state) == state {
            return;
        }
        tracing::debug!("LocalHost visibility -> {}", state);
        self.dispatch(LifecycleEvent::VisibilityChange);
        self.run_microtasks();
    }

    /// Fires every listener registered for `event`.
    pub fn dispatch(&self, event: LifecycleEvent) {
        let callbacks: SmallVec<[Rc<dyn Fn()>; 4]> = self
            .listeners
            .borrow()
            .values()
            .filter(|l| l.event == event)
            .map(|l| l.callback.clone())
            .collect();

        for callback in callbacks {
            callback();
        }
    }

    /// Tears the environment down the way a page unload does: the surface is
    /// hidden, shutdown listeners fire, the last microtask checkpoint runs,
    /// and every pending macrotask and idle callback is discarded.
    pub fn shutdown(&self) {
        tracing::info!("LocalHost shutting down");
        self.set_visibility_state(VisibilityState::Hidden);
        self.dispatch(LifecycleEvent::ShutdownImminent);
        self.run_microtasks();

        self.visibility.set(VisibilityState::Unloaded);
        let dropped_timers = std::mem::take(&mut *self.timers.borrow_mut());
        let dropped_idle = std::mem::take(&mut *self.idle_callbacks.borrow_mut());
        tracing::debug!(
            "Discarded {} timers and {} idle callbacks at shutdown",
            dropped_timers.len(),
            dropped_idle.len()
        );
    }
}

impl Clock for LocalHost {
    fn now(&self) -> f64 {
        self.clock.now()
    }
}

impl EnvironmentProbe for LocalHost {
    fn profile(&self) -> HostProfile {
        self.options.profile
    }

    fn visibility_state(&self) -> VisibilityState {
        self.visibility.get()
    }
}

impl Timers for LocalHost {
    fn set_timeout(&self, task: Task, delay_ms: f64) -> TimerId {
        let delay = if delay_ms.is_finite() { delay_ms.max(0.0) } else { 0.0 };
        let timer = PendingTimer {
            due: self.clock.now() + delay,
            seq: self.next_seq(),
            task,
        };
        let key = self.timers.borrow_mut().insert(timer);
        TimerId(key.data().as_ffi())
    }

    fn clear_timeout(&self, id: TimerId) {
        let key = TimerKey::from(KeyData::from_ffi(id.0));
        // Drop the task outside the borrow; it may own handles that call back in.
        let removed = self.timers.borrow_mut().remove(key);
        drop(removed);
    }
}

impl IdleScheduler for LocalHost {
    fn request_idle_callback(&self, callback: IdleCallback) -> IdleHandle {
        let pending = PendingIdle {
            seq: self.next_seq(),
            callback,
        };
        let key = self.idle_callbacks.borrow_mut().insert(pending);
        IdleHandle(key.data().as_ffi())
    }

    fn cancel_idle_callback(&self, handle: IdleHandle) {
        let key = IdleKey::from(KeyData::from_ffi(handle.0));
        let removed = self.idle_callbacks.borrow_mut().remove(key);
        drop(removed);
    }
}

impl LifecycleEvents for LocalHost {
    fn add_listener(&self, event: LifecycleEvent, listener: Rc<dyn Fn()>) -> ListenerId {
        let key = self.listeners.borrow_mut().insert(Listener {
            event,
            callback: listener,
        });
        ListenerId(key.data().as_ffi())
    }

    fn remove_listener(&self, id: ListenerId) {
        let key = ListenerKey::from(KeyData::from_ffi(id.0));
        let removed = self.listeners.borrow_mut().remove(key);
        drop(removed);
    }
}

impl MicrotaskPrimitive for LocalHost {
    fn enqueue(&self, task: Task) {
        self.microtasks.borrow_mut().push_back(task);
    }
}

/// A detached text node. Every mutation trigger the host hands out is a
/// separate node with its own observer.
struct LocalTextNode {
    this: Weak<LocalTextNode>,
    host: Weak<LocalHost>,
    state: RefCell<ObservedNode>,
}

impl MutationTrigger for LocalTextNode {
    fn observe(&self, on_mutation: Box<dyn Fn()>) -> Result<(), SchedulerError> {
        self.state.borrow_mut().observer = Some(Rc::from(on_mutation));
        Ok(())
    }

    fn mutate(&self, data: &str) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        let notify = {
            let mut state = self.state.borrow_mut();
            if state.data == data {
                return;
            }
            state.data.clear();
            state.data.push_str(data);
            // Records coalesce: one notification per checkpoint.
            if state.observer.is_some() && !state.notification_queued {
                state.notification_queued = true;
                true
            } else {
                false
            }
        };

        if notify {
            let node = self.this.clone();
            host.enqueue(Box::new(move || {
                let Some(node) = node.upgrade() else {
                    return;
                };
                let observer = {
                    let mut state = node.state.borrow_mut();
                    state.notification_queued = false;
                    state.observer.clone()
                };
                if let Some(observer) = observer {
                    observer();
                }
            }));
        }
    }
}

impl MicrotaskSources for LocalHost {
    fn native_microtasks(&self) -> Option<Rc<dyn MicrotaskPrimitive>> {
        if !self.options.native_microtasks {
            return None;
        }
        self.this.upgrade().map(|host| host as Rc<dyn MicrotaskPrimitive>)
    }

    fn promise_jobs(&self) -> Option<Rc<dyn MicrotaskPrimitive>> {
        if !self.options.promise_jobs {
            return None;
        }
        // Promise reactions share the microtask queue.
        self.this.upgrade().map(|host| host as Rc<dyn MicrotaskPrimitive>)
    }

    fn mutation_trigger(&self) -> Option<Rc<dyn MutationTrigger>> {
        if !self.options.mutation_observer {
            return None;
        }
        let node = Rc::new_cyclic(|this: &Weak<LocalTextNode>| LocalTextNode {
            this: this.clone(),
            host: self.this.clone(),
            state: RefCell::new(ObservedNode::default()),
        });
        Some(node as Rc<dyn MutationTrigger>)
    }
}

impl Host for LocalHost {
    fn native_idle_scheduler(&self) -> Option<Rc<dyn IdleScheduler>> {
        if !self.options.native_idle_callback {
            return None;
        }
        self.this.upgrade().map(|host| host as Rc<dyn IdleScheduler>)
    }
}
