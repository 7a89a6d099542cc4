use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::state::State;
use crate::task::{TaskOptions, TaskOutcome, TaskRecord};

use lull_scheduler::{Deadline, Host, HostServices, IdleHandle, LifecycleEvent, ListenerId};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// The queue's single outstanding "run me later" registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduledRun {
    None,
    Idle(IdleHandle),
    /// Microtasks cannot be cancelled, so each one carries a generation and
    /// turns into a no-op once it no longer matches.
    Microtask(u64),
}

#[derive(Debug, Clone, Copy)]
enum Placement {
    Back,
    Front,
}

struct QueueInner {
    services: HostServices,
    config: QueueConfig,
    tasks: RefCell<VecDeque<TaskRecord>>,
    scheduled: Cell<ScheduledRun>,
    generation: Cell<u64>,
    draining: Cell<bool>,
    state: Cell<Option<State>>,
    destroyed: Cell<bool>,
    listeners: RefCell<Vec<ListenerId>>,
}

impl QueueInner {
    fn cancel_scheduled_run(&self) {
        if let ScheduledRun::Idle(handle) = self.scheduled.replace(ScheduledRun::None) {
            self.services.idle.cancel_idle_callback(handle);
        }
    }

    fn remove_listeners(&self) {
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for id in listeners {
            self.services.lifecycle.remove_listener(id);
        }
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        self.cancel_scheduled_run();
        self.remove_listeners();
    }
}

/// A queue of low-priority tasks that run while the host is idle, in order,
/// and that still get flushed before the host goes away when
/// `ensure_tasks_run` is set.
///
/// Cloning yields another handle to the same queue, so tasks can capture the
/// queue and push follow-up work.
#[derive(Clone)]
pub struct IdleQueue {
    inner: Rc<QueueInner>,
}

impl IdleQueue {
    pub fn new(config: QueueConfig, services: HostServices) -> Result<Self, QueueError> {
        config.validate()?;

        let install_listeners = config.ensure_tasks_run && services.probe.profile().has_document;
        if install_listeners {
            // Only this queue's hidden-surface path uses microtasks.
            services.microtasks()?;
        }
        let queue = IdleQueue {
            inner: Rc::new(QueueInner {
                services,
                config,
                tasks: RefCell::new(VecDeque::new()),
                scheduled: Cell::new(ScheduledRun::None),
                generation: Cell::new(0),
                draining: Cell::new(false),
                state: Cell::new(None),
                destroyed: Cell::new(false),
                listeners: RefCell::new(Vec::new()),
            }),
        };

        if install_listeners {
            queue.install_listeners();
        }

        tracing::debug!(
            "IdleQueue created (ensure_tasks_run: {}, default_min_task_time: {}ms)",
            queue.inner.config.ensure_tasks_run,
            queue.inner.config.default_min_task_time
        );
        Ok(queue)
    }

    /// Resolves the host's scheduling channels and builds a queue on top of them.
    ///
    /// Fails with [`QueueError::Scheduler`] only when the queue could need a
    /// microtask (`ensure_tasks_run` on a document host) and the host has none.
    pub fn from_host<H: Host + 'static>(config: QueueConfig, host: Rc<H>) -> Result<Self, QueueError> {
        Self::new(config, HostServices::new(host))
    }

    fn from_weak(weak: &Weak<QueueInner>) -> Option<Self> {
        weak.upgrade().map(|inner| IdleQueue { inner })
    }

    fn install_listeners(&self) {
        let lifecycle = self.inner.services.lifecycle.clone();

        let weak = Rc::downgrade(&self.inner);
        let on_visibility_change = Rc::new(move || {
            if let Some(queue) = IdleQueue::from_weak(&weak) {
                if queue.inner.services.probe.is_hidden() {
                    queue.flush("surface hidden");
                }
            }
        });

        let weak = Rc::downgrade(&self.inner);
        let on_shutdown = Rc::new(move || {
            if let Some(queue) = IdleQueue::from_weak(&weak) {
                queue.flush("shutdown imminent");
            }
        });

        let mut listeners = self.inner.listeners.borrow_mut();
        listeners.push(lifecycle.add_listener(LifecycleEvent::VisibilityChange, on_visibility_change));
        listeners.push(lifecycle.add_listener(LifecycleEvent::ShutdownImminent, on_shutdown));
    }

    fn flush(&self, reason: &str) {
        if self.inner.destroyed.get() {
            return;
        }
        tracing::debug!("Flushing {} idle tasks: {}", self.pending_len(), reason);
        self.run_tasks(None);
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Queues `task` behind everything already pending.
    pub fn push_task<F, R>(&self, task: F) -> Result<(), QueueError>
    where
        F: FnOnce(&State) -> R + 'static,
        R: TaskOutcome + 'static,
    {
        self.add_task(task, TaskOptions::default(), Placement::Back)
    }

    pub fn push_task_with<F, R>(&self, task: F, options: TaskOptions) -> Result<(), QueueError>
    where
        F: FnOnce(&State) -> R + 'static,
        R: TaskOutcome + 'static,
    {
        self.add_task(task, options, Placement::Back)
    }

    /// Queues `task` in front of everything pending. A task that is already
    /// running finishes first.
    pub fn unshift_task<F, R>(&self, task: F) -> Result<(), QueueError>
    where
        F: FnOnce(&State) -> R + 'static,
        R: TaskOutcome + 'static,
    {
        self.add_task(task, TaskOptions::default(), Placement::Front)
    }

    pub fn unshift_task_with<F, R>(&self, task: F, options: TaskOptions) -> Result<(), QueueError>
    where
        F: FnOnce(&State) -> R + 'static,
        R: TaskOutcome + 'static,
    {
        self.add_task(task, options, Placement::Front)
    }

    fn add_task<F, R>(&self, task: F, options: TaskOptions, placement: Placement) -> Result<(), QueueError>
    where
        F: FnOnce(&State) -> R + 'static,
        R: TaskOutcome + 'static,
    {
        let inner = &self.inner;
        if inner.destroyed.get() {
            tracing::warn!("Task added to an IdleQueue after destroy()");
            return Err(QueueError::Destroyed);
        }

        let state = State::capture(&*inner.services.clock, &*inner.services.probe);
        let min_task_time = options.resolve(inner.config.default_min_task_time);
        let record = TaskRecord::new(task, state, min_task_time);

        {
            let mut tasks = inner.tasks.borrow_mut();
            match placement {
                Placement::Back => tasks.push_back(record),
                Placement::Front => tasks.push_front(record),
            }
        }

        self.schedule_run();
        Ok(())
    }

    /// Runs every pending task synchronously, in order, ignoring idle budgets.
    pub fn run_tasks_immediately(&self) -> Result<(), QueueError> {
        if self.inner.destroyed.get() {
            tracing::warn!("run_tasks_immediately() called on a destroyed IdleQueue");
            return Err(QueueError::Destroyed);
        }
        self.run_tasks(None);
        Ok(())
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.inner.tasks.borrow().is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Snapshot of the task that is currently running, `None` between tasks.
    pub fn get_state(&self) -> Option<State> {
        self.inner.state.get()
    }

    /// Drops every pending task without running it and cancels the scheduled run.
    pub fn clear_pending_tasks(&self) {
        let dropped = std::mem::take(&mut *self.inner.tasks.borrow_mut());
        self.inner.cancel_scheduled_run();
        if !dropped.is_empty() {
            tracing::debug!("Cleared {} pending idle tasks", dropped.len());
        }
    }

    /// Clears the queue and unregisters lifecycle listeners. Further pushes
    /// fail with [`QueueError::Destroyed`]. Calling it twice is harmless.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        self.clear_pending_tasks();
        self.inner.remove_listeners();
        tracing::debug!("IdleQueue destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Makes sure a drain will happen: a microtask while the surface is hidden
    /// (idle callbacks may never fire again), otherwise one idle callback.
    fn schedule_run(&self) {
        let inner = &self.inner;
        let scheduled = inner.scheduled.get();

        let microtasks = if inner.config.ensure_tasks_run && inner.services.probe.is_hidden() {
            inner.services.microtasks().ok()
        } else {
            None
        };

        if let Some(microtasks) = microtasks {
            match scheduled {
                ScheduledRun::Microtask(_) => return,
                // Supersede an idle callback requested while still visible.
                ScheduledRun::Idle(_) => inner.cancel_scheduled_run(),
                ScheduledRun::None => {}
            }

            let generation = inner.generation.get().wrapping_add(1);
            inner.generation.set(generation);
            inner.scheduled.set(ScheduledRun::Microtask(generation));

            let weak = Rc::downgrade(inner);
            microtasks.schedule_microtask(Box::new(move || {
                let Some(queue) = IdleQueue::from_weak(&weak) else {
                    return;
                };
                if queue.inner.scheduled.get() == ScheduledRun::Microtask(generation) {
                    queue.run_tasks(None);
                }
            }));
            tracing::debug!("Scheduled idle queue drain as a microtask");
        } else if scheduled == ScheduledRun::None {
            let weak = Rc::downgrade(inner);
            let handle = inner
                .services
                .idle
                .request_idle_callback(Box::new(move |deadline: &dyn Deadline| {
                    if let Some(queue) = IdleQueue::from_weak(&weak) {
                        queue.run_tasks(Some(deadline));
                    }
                }));
            inner.scheduled.set(ScheduledRun::Idle(handle));
        }
    }

    /// The drain loop. With a deadline, stops as soon as the remaining idle
    /// time does not exceed the front task's `min_task_time` (later, cheaper
    /// tasks never jump ahead) or the per-pass cap is reached. Without one,
    /// runs until the queue is empty.
    fn run_tasks(&self, deadline: Option<&dyn Deadline>) {
        let inner = &self.inner;
        inner.cancel_scheduled_run();

        if inner.draining.replace(true) {
            // A task re-entered the queue; the outer drain keeps going.
            return;
        }

        let mut started = 0usize;
        loop {
            let record = {
                let mut tasks = inner.tasks.borrow_mut();
                let Some(front) = tasks.front() else {
                    break;
                };
                if let Some(deadline) = deadline {
                    if started >= inner.config.max_tasks_per_iteration
                        || deadline.time_remaining() <= front.min_task_time
                    {
                        break;
                    }
                }
                tasks.pop_front()
            };
            let Some(record) = record else {
                break;
            };
            started += 1;

            let state = record.state;
            inner.state.set(Some(state));
            let outcome = record.run();
            inner.state.set(None);

            if let Err(err) = outcome {
                tracing::error!(
                    queued_at = state.time,
                    visibility = %state.visibility_state,
                    "Error running IdleQueue task: {}",
                    err
                );
            }
        }

        inner.draining.set(false);

        if self.has_pending_tasks() && !inner.destroyed.get() {
            if deadline.is_some() {
                tracing::trace!(
                    "Yielding after {} tasks, {} still pending",
                    started,
                    self.pending_len()
                );
            }
            self.schedule_run();
        } else {
            // Tasks pushed mid-drain may have registered a run that has nothing left to do.
            inner.cancel_scheduled_run();
        }
    }
}
