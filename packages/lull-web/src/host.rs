use crate::error::WebError;

use js_sys::{Function, Promise, Reflect};
use lull_scheduler::{
    Clock, Deadline, EnvironmentProbe, Host, HostProfile, IdleCallback, IdleHandle,
    IdleScheduler, LifecycleEvent, LifecycleEvents, ListenerId, MicrotaskPrimitive,
    MicrotaskSources, MutationTrigger, SchedulerError, ShimDeadline, Task, TimerId, Timers,
    VisibilityState,
};
use slotmap::{Key, KeyData, SlotMap, new_key_type};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{
    Document, IdleDeadline, MutationObserver, MutationObserverInit, Performance, Text, Window,
};

new_key_type! {
    struct ListenerKey;
}

struct RegisteredListener {
    event_type: &'static str,
    closure: Closure<dyn FnMut()>,
}

enum IdleRegistration {
    Native(u32),
    /// `requestIdleCallback` threw; the callback rides a zero-delay timer instead.
    Timer(TimerId),
}

struct PendingIdle {
    registration: IdleRegistration,
    callback: Option<IdleCallback>,
}

struct PendingTimer {
    js_handle: i32,
    task: Task,
}

struct BrowserDeadline(IdleDeadline);

impl Deadline for BrowserDeadline {
    fn time_remaining(&self) -> f64 {
        self.0.time_remaining().max(0.0)
    }

    fn did_timeout(&self) -> bool {
        self.0.did_timeout()
    }
}

/// Runs queued tasks one per JS callback. Used for both `queueMicrotask` and
/// promise reactions, which preserve FIFO order.
struct JsJobQueue {
    pending: Rc<RefCell<VecDeque<Task>>>,
}

impl JsJobQueue {
    fn new() -> Self {
        Self {
            pending: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    fn runner(&self) -> impl FnMut() + 'static {
        let pending = self.pending.clone();
        move || {
            let task = pending.borrow_mut().pop_front();
            if let Some(task) = task {
                task();
            }
        }
    }
}

struct NativeMicrotasks {
    jobs: JsJobQueue,
    queue_microtask: Function,
    window: Window,
    runner: Closure<dyn FnMut()>,
}

impl MicrotaskPrimitive for NativeMicrotasks {
    fn enqueue(&self, task: Task) {
        self.jobs.pending.borrow_mut().push_back(task);
        if let Err(err) = self.queue_microtask.call1(&self.window, self.runner.as_ref()) {
            tracing::error!("queueMicrotask failed: {:?}", err);
        }
    }
}

struct PromiseJobs {
    jobs: JsJobQueue,
    runner: Closure<dyn FnMut(JsValue)>,
}

impl MicrotaskPrimitive for PromiseJobs {
    fn enqueue(&self, task: Task) {
        self.jobs.pending.borrow_mut().push_back(task);
        // The chained promise only settles after the job; nothing awaits it.
        let _chained = Promise::resolve(&JsValue::UNDEFINED).then(&self.runner);
    }
}

/// An inert text node watched by a `MutationObserver` for `characterData`.
struct TextNodeTrigger {
    node: Text,
    observer: RefCell<Option<(MutationObserver, Closure<dyn FnMut(js_sys::Array, MutationObserver)>)>>,
}

impl MutationTrigger for TextNodeTrigger {
    fn observe(&self, on_mutation: Box<dyn Fn()>) -> Result<(), SchedulerError> {
        let closure = Closure::<dyn FnMut(js_sys::Array, MutationObserver)>::new(
            move |_records: js_sys::Array, _observer: MutationObserver| on_mutation(),
        );
        let observer = MutationObserver::new(closure.as_ref().unchecked_ref())
            .map_err(|err| host_error("MutationObserver", err))?;

        let init = MutationObserverInit::new();
        init.set_character_data(true);
        observer
            .observe_with_options(&self.node, &init)
            .map_err(|err| host_error("MutationObserver.observe", err))?;

        *self.observer.borrow_mut() = Some((observer, closure));
        Ok(())
    }

    fn mutate(&self, data: &str) {
        self.node.set_data(data);
    }
}

impl Drop for TextNodeTrigger {
    fn drop(&mut self) {
        if let Some((observer, _closure)) = self.observer.borrow_mut().take() {
            observer.disconnect();
        }
    }
}

/// `performance.now()`, or `Date.now()` where the Performance API is missing.
struct WindowClock {
    performance: Option<Performance>,
}

impl Clock for WindowClock {
    fn now(&self) -> f64 {
        match &self.performance {
            Some(performance) => performance.now(),
            None => js_sys::Date::now(),
        }
    }
}

/// The browser window as a Lull host.
pub struct WebHost {
    this: Weak<WebHost>,
    window: Window,
    document: Option<Document>,
    clock: Rc<WindowClock>,
    profile: HostProfile,
    supports_idle_callback: bool,
    next_id: Cell<u32>,
    timers: RefCell<HashMap<u32, PendingTimer>>,
    idle_callbacks: RefCell<HashMap<u32, PendingIdle>>,
    listeners: RefCell<SlotMap<ListenerKey, RegisteredListener>>,
    timer_dispatch: Closure<dyn FnMut(JsValue)>,
    idle_dispatch: Closure<dyn FnMut(JsValue, IdleDeadline)>,
}

fn host_error(primitive: &'static str, err: JsValue) -> SchedulerError {
    SchedulerError::Host {
        primitive,
        message: format!("{:?}", err),
    }
}

fn has_function(target: &JsValue, name: &str) -> bool {
    Reflect::get(target, &JsValue::from_str(name))
        .map(|value| value.is_function())
        .unwrap_or(false)
}

/// Safari exposes `window.safari.pushNotification`.
fn is_safari(window: &Window) -> bool {
    let Ok(safari) = Reflect::get(window, &JsValue::from_str("safari")) else {
        return false;
    };
    safari.is_object()
        && Reflect::has(&safari, &JsValue::from_str("pushNotification")).unwrap_or(false)
}

/// Polyfilled promises do not guarantee microtask timing.
fn has_native_promise() -> bool {
    Reflect::get(&js_sys::global(), &JsValue::from_str("Promise"))
        .ok()
        .and_then(|value| value.dyn_into::<Function>().ok())
        .is_some_and(|promise| String::from(promise.to_string()).contains("[native code]"))
}

fn key_from(value: &JsValue) -> Option<u32> {
    value.as_f64().map(|key| key as u32)
}

impl WebHost {
    pub fn new() -> Result<Rc<Self>, WebError> {
        let window = web_sys::window().ok_or(WebError::NoWindow)?;
        let document = window.document();
        let profile = HostProfile {
            has_document: document.is_some(),
            unreliable_lifecycle_events: is_safari(&window),
        };
        let supports_idle_callback = has_function(&window, "requestIdleCallback");

        tracing::debug!(
            "WebHost: safari={}, requestIdleCallback={}",
            profile.unreliable_lifecycle_events,
            supports_idle_callback
        );

        Ok(Rc::new_cyclic(|this: &Weak<WebHost>| {
            let timer_host = this.clone();
            let timer_dispatch = Closure::<dyn FnMut(JsValue)>::new(move |key: JsValue| {
                if let (Some(host), Some(key)) = (timer_host.upgrade(), key_from(&key)) {
                    host.fire_timer(key);
                }
            });

            let idle_host = this.clone();
            let idle_dispatch = Closure::<dyn FnMut(JsValue, IdleDeadline)>::new(
                move |key: JsValue, deadline: IdleDeadline| {
                    if let (Some(host), Some(key)) = (idle_host.upgrade(), key_from(&key)) {
                        host.fire_idle(key, deadline);
                    }
                },
            );

            Self {
                this: this.clone(),
                clock: Rc::new(WindowClock {
                    performance: window.performance(),
                }),
                window,
                document,
                profile,
                supports_idle_callback,
                next_id: Cell::new(0),
                timers: RefCell::new(HashMap::new()),
                idle_callbacks: RefCell::new(HashMap::new()),
                listeners: RefCell::new(SlotMap::with_key()),
                timer_dispatch,
                idle_dispatch,
            }
        }))
    }

    fn next_id(&self) -> u32 {
        let id = self.next_id.get().wrapping_add(1);
        self.next_id.set(id);
        id
    }

    fn fire_timer(&self, key: u32) {
        let pending = self.timers.borrow_mut().remove(&key);
        if let Some(pending) = pending {
            (pending.task)();
        }
    }

    fn fire_idle(&self, key: u32, deadline: IdleDeadline) {
        let callback = self
            .idle_callbacks
            .borrow_mut()
            .remove(&key)
            .and_then(|mut pending| pending.callback.take());
        if let Some(callback) = callback {
            callback(&BrowserDeadline(deadline));
        }
    }

    /// Falls back to a zero-delay timer with a shim deadline.
    fn request_idle_via_timer(&self, key: u32, callback: IdleCallback) -> IdleRegistration {
        let deadline = ShimDeadline::new(self.clock.clone(), self.clock.now());
        let this = self.this.clone();
        let timer = self.set_timeout(
            Box::new(move || {
                if let Some(host) = this.upgrade() {
                    let removed = host.idle_callbacks.borrow_mut().remove(&key);
                    drop(removed);
                }
                callback(&deadline);
            }),
            0.0,
        );
        IdleRegistration::Timer(timer)
    }

    fn event_type(&self, event: LifecycleEvent) -> &'static str {
        match event {
            LifecycleEvent::VisibilityChange => "visibilitychange",
            // `beforeunload` would cost other browsers bfcache eligibility.
            LifecycleEvent::ShutdownImminent if self.profile.unreliable_lifecycle_events => {
                "beforeunload"
            }
            LifecycleEvent::ShutdownImminent => "pagehide",
        }
    }
}

impl Drop for WebHost {
    // The dispatcher closures die with the host; nothing may call into them afterwards.
    fn drop(&mut self) {
        for (_, pending) in self.timers.get_mut().drain() {
            self.window.clear_timeout_with_handle(pending.js_handle);
        }
        for (_, pending) in self.idle_callbacks.get_mut().drain() {
            if let IdleRegistration::Native(handle) = pending.registration {
                self.window.cancel_idle_callback(handle);
            }
        }
        for (_, listener) in self.listeners.get_mut().drain() {
            let _ = self.window.remove_event_listener_with_callback_and_bool(
                listener.event_type,
                listener.closure.as_ref().unchecked_ref(),
                true,
            );
        }
    }
}

impl Clock for WebHost {
    fn now(&self) -> f64 {
        self.clock.now()
    }
}

impl EnvironmentProbe for WebHost {
    fn profile(&self) -> HostProfile {
        self.profile
    }

    fn visibility_state(&self) -> VisibilityState {
        // Read the raw string: web-sys only models "hidden" and "visible".
        self.document
            .as_ref()
            .and_then(|document| Reflect::get(document, &JsValue::from_str("visibilityState")).ok())
            .and_then(|raw| raw.as_string())
            .and_then(|raw| VisibilityState::parse(&raw))
            .unwrap_or(VisibilityState::Visible)
    }
}

impl Timers for WebHost {
    fn set_timeout(&self, task: Task, delay_ms: f64) -> TimerId {
        let key = self.next_id();
        let delay = if delay_ms.is_finite() { delay_ms.max(0.0) as i32 } else { 0 };
        match self.window.set_timeout_with_callback_and_timeout_and_arguments_1(
            self.timer_dispatch.as_ref().unchecked_ref(),
            delay,
            &JsValue::from(key),
        ) {
            Ok(js_handle) => {
                self.timers
                    .borrow_mut()
                    .insert(key, PendingTimer { js_handle, task });
            }
            Err(err) => tracing::error!("setTimeout failed: {:?}", err),
        }
        TimerId(u64::from(key))
    }

    fn clear_timeout(&self, id: TimerId) {
        let removed = self.timers.borrow_mut().remove(&(id.0 as u32));
        if let Some(pending) = removed {
            self.window.clear_timeout_with_handle(pending.js_handle);
        }
    }
}

impl IdleScheduler for WebHost {
    fn request_idle_callback(&self, callback: IdleCallback) -> IdleHandle {
        let key = self.next_id();
        let bound = self
            .idle_dispatch
            .as_ref()
            .unchecked_ref::<Function>()
            .bind1(&JsValue::NULL, &JsValue::from(key));

        let pending = match self.window.request_idle_callback(bound.unchecked_ref()) {
            Ok(handle) => PendingIdle {
                registration: IdleRegistration::Native(handle),
                callback: Some(callback),
            },
            Err(err) => {
                tracing::warn!("requestIdleCallback failed, using a timer: {:?}", err);
                PendingIdle {
                    registration: self.request_idle_via_timer(key, callback),
                    callback: None,
                }
            }
        };
        self.idle_callbacks.borrow_mut().insert(key, pending);
        IdleHandle(u64::from(key))
    }

    fn cancel_idle_callback(&self, handle: IdleHandle) {
        let removed = self.idle_callbacks.borrow_mut().remove(&(handle.0 as u32));
        match removed.map(|pending| pending.registration) {
            Some(IdleRegistration::Native(handle)) => self.window.cancel_idle_callback(handle),
            Some(IdleRegistration::Timer(timer)) => self.clear_timeout(timer),
            None => {}
        }
    }
}

impl LifecycleEvents for WebHost {
    fn add_listener(&self, event: LifecycleEvent, listener: Rc<dyn Fn()>) -> ListenerId {
        let event_type = self.event_type(event);
        let closure = Closure::<dyn FnMut()>::new(move || listener());
        if let Err(err) = self.window.add_event_listener_with_callback_and_bool(
            event_type,
            closure.as_ref().unchecked_ref(),
            true,
        ) {
            tracing::error!("addEventListener({}) failed: {:?}", event_type, err);
        }
        let key = self
            .listeners
            .borrow_mut()
            .insert(RegisteredListener { event_type, closure });
        ListenerId(key.data().as_ffi())
    }

    fn remove_listener(&self, id: ListenerId) {
        let key = ListenerKey::from(KeyData::from_ffi(id.0));
        let removed = self.listeners.borrow_mut().remove(key);
        if let Some(listener) = removed {
            let _ = self.window.remove_event_listener_with_callback_and_bool(
                listener.event_type,
                listener.closure.as_ref().unchecked_ref(),
                true,
            );
        }
    }
}

impl MicrotaskSources for WebHost {
    fn native_microtasks(&self) -> Option<Rc<dyn MicrotaskPrimitive>> {
        let queue_microtask = Reflect::get(&self.window, &JsValue::from_str("queueMicrotask"))
            .ok()?
            .dyn_into::<Function>()
            .ok()?;
        let jobs = JsJobQueue::new();
        let runner = Closure::<dyn FnMut()>::new(jobs.runner());
        Some(Rc::new(NativeMicrotasks {
            jobs,
            queue_microtask,
            window: self.window.clone(),
            runner,
        }))
    }

    fn promise_jobs(&self) -> Option<Rc<dyn MicrotaskPrimitive>> {
        if !has_native_promise() {
            return None;
        }
        let jobs = JsJobQueue::new();
        let mut run_one = jobs.runner();
        let runner = Closure::<dyn FnMut(JsValue)>::new(move |_: JsValue| run_one());
        Some(Rc::new(PromiseJobs { jobs, runner }))
    }

    fn mutation_trigger(&self) -> Option<Rc<dyn MutationTrigger>> {
        let document = self.document.as_ref()?;
        Some(Rc::new(TextNodeTrigger {
            node: document.create_text_node(""),
            observer: RefCell::new(None),
        }))
    }
}

impl Host for WebHost {
    fn native_idle_scheduler(&self) -> Option<Rc<dyn IdleScheduler>> {
        if !self.supports_idle_callback {
            return None;
        }
        self.this.upgrade().map(|host| host as Rc<dyn IdleScheduler>)
    }
}
