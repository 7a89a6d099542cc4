use crate::Task;
use crate::error::SchedulerError;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Something that runs a task before the next macrotask but after the
/// currently executing code.
pub trait MicrotaskPrimitive {
    fn enqueue(&self, task: Task);
}

/// An inert observable structure (a text node in a browser) whose mutation
/// notifications are delivered at microtask timing.
pub trait MutationTrigger {
    /// Installs the observer. Called once, when the fallback is selected.
    fn observe(&self, on_mutation: Box<dyn Fn()>) -> Result<(), SchedulerError>;

    fn mutate(&self, data: &str);
}

/// The raw microtask primitives a host can offer. Each one is optional.
pub trait MicrotaskSources {
    fn native_microtasks(&self) -> Option<Rc<dyn MicrotaskPrimitive>>;

    /// Native promise resolution jobs. Hosts should return `None` for
    /// polyfilled promises, which do not guarantee microtask timing.
    fn promise_jobs(&self) -> Option<Rc<dyn MicrotaskPrimitive>>;

    fn mutation_trigger(&self) -> Option<Rc<dyn MutationTrigger>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrotaskBackend {
    Native,
    Promise,
    MutationObserver,
}

/// Buffers microtasks and flips the observed data so the observer fires once
/// per checkpoint, then runs everything that was buffered.
struct MutationObserverQueue {
    pending: Rc<RefCell<Vec<Task>>>,
    toggle: Cell<u32>,
    trigger: Rc<dyn MutationTrigger>,
}

impl MutationObserverQueue {
    fn new(trigger: Rc<dyn MutationTrigger>) -> Result<Self, SchedulerError> {
        let pending: Rc<RefCell<Vec<Task>>> = Rc::new(RefCell::new(Vec::new()));
        let drain = pending.clone();
        trigger.observe(Box::new(move || {
            // Take the batch first: tasks queued from inside the batch land in a
            // fresh buffer and trigger their own mutation.
            let batch = std::mem::take(&mut *drain.borrow_mut());
            for task in batch {
                task();
            }
        }))?;
        Ok(Self {
            pending,
            toggle: Cell::new(0),
            trigger,
        })
    }
}

impl MicrotaskPrimitive for MutationObserverQueue {
    fn enqueue(&self, task: Task) {
        self.pending.borrow_mut().push(task);
        let next = (self.toggle.get() + 1) % 2;
        self.toggle.set(next);
        self.trigger.mutate(if next == 1 { "1" } else { "0" });
    }
}

/// The microtask channel, bound to one primitive chosen once at startup.
#[derive(Clone)]
pub struct MicrotaskScheduler {
    backend: MicrotaskBackend,
    primitive: Rc<dyn MicrotaskPrimitive>,
}

impl MicrotaskScheduler {
    /// Picks the best primitive the host offers: native queue, then promise
    /// jobs, then the mutation-observer trick.
    pub fn select(sources: &dyn MicrotaskSources) -> Result<Self, SchedulerError> {
        let (backend, primitive) = if let Some(native) = sources.native_microtasks() {
            (MicrotaskBackend::Native, native)
        } else if let Some(promise) = sources.promise_jobs() {
            (MicrotaskBackend::Promise, promise)
        } else if let Some(trigger) = sources.mutation_trigger() {
            let queue: Rc<dyn MicrotaskPrimitive> = Rc::new(MutationObserverQueue::new(trigger)?);
            (MicrotaskBackend::MutationObserver, queue)
        } else {
            return Err(SchedulerError::NoMicrotaskPrimitive);
        };

        tracing::debug!("Microtask channel selected: {:?}", backend);
        Ok(Self { backend, primitive })
    }

    pub fn backend(&self) -> MicrotaskBackend {
        self.backend
    }

    pub fn schedule_microtask(&self, task: Task) {
        self.primitive.enqueue(task);
    }
}

impl fmt::Debug for MicrotaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskScheduler")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
