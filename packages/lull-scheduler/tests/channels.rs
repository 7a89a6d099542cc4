use lull_scheduler::*;
use std::cell::RefCell;
use std::rc::Rc;

fn manual_host(options: LocalHostOptions) -> (Rc<LocalHost>, Rc<ManualClock>) {
    let clock = Rc::new(ManualClock::new());
    let host = LocalHost::with_clock(options, clock.clone());
    (host, clock)
}

#[test]
fn test_microtask_selection_prefers_native() {
    let host = LocalHost::new();
    let scheduler = MicrotaskScheduler::select(&*host).unwrap();
    assert_eq!(scheduler.backend(), MicrotaskBackend::Native);

    let host = LocalHost::with_options(LocalHostOptions {
        native_microtasks: false,
        ..Default::default()
    });
    let scheduler = MicrotaskScheduler::select(&*host).unwrap();
    assert_eq!(scheduler.backend(), MicrotaskBackend::Promise);

    let host = LocalHost::with_options(LocalHostOptions {
        native_microtasks: false,
        promise_jobs: false,
        ..Default::default()
    });
    let scheduler = MicrotaskScheduler::select(&*host).unwrap();
    assert_eq!(scheduler.backend(), MicrotaskBackend::MutationObserver);
}

#[test]
fn test_microtask_selection_fails_without_primitives() {
    let host = LocalHost::with_options(LocalHostOptions {
        native_microtasks: false,
        promise_jobs: false,
        mutation_observer: false,
        ..Default::default()
    });
    let err = MicrotaskScheduler::select(&*host).unwrap_err();
    assert_eq!(err, SchedulerError::NoMicrotaskPrimitive);
}

#[test]
fn test_mutation_observer_fallback_runs_in_order_at_checkpoint() {
    let host = LocalHost::with_options(LocalHostOptions {
        native_microtasks: false,
        promise_jobs: false,
        ..Default::default()
    });
    let scheduler = MicrotaskScheduler::select(&*host).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));

    for i in 0..3 {
        let log = log.clone();
        scheduler.schedule_microtask(Box::new(move || log.borrow_mut().push(i)));
    }

    // Nothing runs synchronously.
    assert!(log.borrow().is_empty());

    host.run_microtasks();
    assert_eq!(*log.borrow(), vec![0, 1, 2]);
}

#[test]
fn test_mutation_observer_fallback_handles_nested_scheduling() {
    let host = LocalHost::with_options(LocalHostOptions {
        native_microtasks: false,
        promise_jobs: false,
        ..Default::default()
    });
    let scheduler = MicrotaskScheduler::select(&*host).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        let inner = scheduler.clone();
        scheduler.schedule_microtask(Box::new(move || {
            log.borrow_mut().push("outer");
            let log = log.clone();
            inner.schedule_microtask(Box::new(move || log.borrow_mut().push("inner")));
        }));
    }

    host.run_microtasks();
    assert_eq!(*log.borrow(), vec!["outer", "inner"]);
}

#[test]
fn test_shim_deadline_decays_from_fifty_ms() {
    let (host, clock) = manual_host(LocalHostOptions::default());
    let deadline = ShimDeadline::new(host.clone(), clock.now());

    assert_eq!(deadline.time_remaining(), 50.0);
    assert!(!deadline.did_timeout());

    clock.advance(20.0);
    assert_eq!(deadline.time_remaining(), 30.0);

    clock.advance(100.0);
    assert_eq!(deadline.time_remaining(), 0.0);
}

#[test]
fn test_shim_fires_on_next_macrotask_and_cancels() {
    let (host, clock) = manual_host(LocalHostOptions::default());
    let shim = IdleCallbackShim::new(clock.clone(), host.clone());
    let seen = Rc::new(RefCell::new(Vec::new()));

    let handle = {
        let seen = seen.clone();
        shim.request_idle_callback(Box::new(move |deadline: &dyn Deadline| {
            seen.borrow_mut().push(deadline.time_remaining());
        }))
    };
    {
        let seen = seen.clone();
        shim.request_idle_callback(Box::new(move |deadline: &dyn Deadline| {
            seen.borrow_mut().push(deadline.time_remaining());
        }));
    }
    shim.cancel_idle_callback(handle);
    // Idempotent.
    shim.cancel_idle_callback(handle);

    clock.advance(10.0);
    assert_eq!(host.run_until_idle(), 1);
    assert_eq!(*seen.borrow(), vec![40.0]);
}

#[test]
fn test_host_services_fall_back_to_shim() {
    let (host, _clock) = manual_host(LocalHostOptions {
        native_idle_callback: false,
        ..Default::default()
    });
    let services = HostServices::new(host.clone());
    let fired = Rc::new(RefCell::new(false));

    {
        let fired = fired.clone();
        services
            .idle
            .request_idle_callback(Box::new(move |_| *fired.borrow_mut() = true));
    }

    // The shim is a macrotask, not a native idle callback.
    assert_eq!(host.pending_idle_callbacks(), 0);
    assert_eq!(host.pending_timers(), 1);

    host.run_until_idle();
    assert!(*fired.borrow());
}

#[test]
fn test_timers_run_in_due_order() {
    let (host, clock) = manual_host(LocalHostOptions::default());
    let log = Rc::new(RefCell::new(Vec::new()));

    for (name, delay) in [("late", 10.0), ("first", 0.0), ("second", 0.0)] {
        let log = log.clone();
        host.set_timeout(Box::new(move || log.borrow_mut().push(name)), delay);
    }

    host.run_until_idle();
    assert_eq!(*log.borrow(), vec!["first", "second"]);

    clock.advance(10.0);
    host.run_until_idle();
    assert_eq!(*log.borrow(), vec!["first", "second", "late"]);
}

#[test]
fn test_idle_period_only_runs_callbacks_registered_before_it() {
    let (host, _clock) = manual_host(LocalHostOptions::default());
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        let inner_host = host.clone();
        host.request_idle_callback(Box::new(move |deadline: &dyn Deadline| {
            log.borrow_mut().push(deadline.time_remaining());
            let log = log.clone();
            inner_host.request_idle_callback(Box::new(move |deadline: &dyn Deadline| {
                log.borrow_mut().push(deadline.time_remaining());
            }));
        }));
    }

    assert_eq!(host.run_idle_period(12.0), 1);
    assert_eq!(*log.borrow(), vec![12.0]);
    assert_eq!(host.pending_idle_callbacks(), 1);

    assert_eq!(host.run_idle_period(3.0), 1);
    assert_eq!(*log.borrow(), vec![12.0, 3.0]);
}

#[test]
fn test_visibility_change_dispatches_listeners_once_per_change() {
    let host = LocalHost::new();
    let count = Rc::new(RefCell::new(0));

    let id = {
        let count = count.clone();
        host.add_listener(
            LifecycleEvent::VisibilityChange,
            Rc::new(move || *count.borrow_mut() += 1),
        )
    };

    host.set_visibility_state(VisibilityState::Hidden);
    host.set_visibility_state(VisibilityState::Hidden);
    assert_eq!(*count.borrow(), 1);

    host.remove_listener(id);
    host.set_visibility_state(VisibilityState::Visible);
    assert_eq!(*count.borrow(), 1);
}

#[test]
fn test_shutdown_discards_pending_macrotasks() {
    let host = LocalHost::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        host.set_timeout(Box::new(move || log.borrow_mut().push("timer")), 0.0);
    }
    {
        let log = log.clone();
        host.add_listener(
            LifecycleEvent::ShutdownImminent,
            Rc::new(move || log.borrow_mut().push("shutdown")),
        );
    }

    host.shutdown();
    assert_eq!(host.visibility_state(), VisibilityState::Unloaded);
    assert_eq!(host.pending_timers(), 0);
    assert!(!host.tick());
    assert_eq!(*log.borrow(), vec!["shutdown"]);
}

#[test]
fn test_headless_hosts_report_visible() {
    let host = LocalHost::with_options(LocalHostOptions {
        profile: HostProfile::HEADLESS,
        visibility: VisibilityState::Hidden,
        ..Default::default()
    });
    assert_eq!(host.current_visibility(), VisibilityState::Visible);
    assert!(!host.is_hidden());
}

#[test]
fn test_options_deserialize_with_defaults() {
    let options: LocalHostOptions =
        serde_json::from_str(r#"{ "visibility": "hidden", "native_idle_callback": false }"#)
            .unwrap();
    assert_eq!(options.visibility, VisibilityState::Hidden);
    assert!(!options.native_idle_callback);
    assert!(options.native_microtasks);
    assert_eq!(options.profile, HostProfile::DOCUMENT);
}

struct DetachedNode;

impl MutationTrigger for DetachedNode {
    fn observe(&self, _on_mutation: Box<dyn Fn()>) -> Result<(), SchedulerError> {
        Err(SchedulerError::Host {
            primitive: "MutationObserver",
            message: "node is not observable".to_string(),
        })
    }

    fn mutate(&self, _data: &str) {}
}

struct ObserverOnly;

impl MicrotaskSources for ObserverOnly {
    fn native_microtasks(&self) -> Option<Rc<dyn MicrotaskPrimitive>> {
        None
    }

    fn promise_jobs(&self) -> Option<Rc<dyn MicrotaskPrimitive>> {
        None
    }

    fn mutation_trigger(&self) -> Option<Rc<dyn MutationTrigger>> {
        Some(Rc::new(DetachedNode))
    }
}

#[test]
fn test_mutation_observer_install_failure_is_reported() {
    let err = MicrotaskScheduler::select(&ObserverOnly).unwrap_err();
    assert_eq!(
        err,
        SchedulerError::Host {
            primitive: "MutationObserver",
            message: "node is not observable".to_string(),
        }
    );
    assert!(err.to_string().contains("node is not observable"));
}

#[test]
fn test_each_mutation_fallback_observes_its_own_node() {
    let host = LocalHost::with_options(LocalHostOptions {
        native_microtasks: false,
        promise_jobs: false,
        ..Default::default()
    });
    let first = MicrotaskScheduler::select(&*host).unwrap();
    let second = MicrotaskScheduler::select(&*host).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));

    for (scheduler, name) in [(&first, "first"), (&second, "second"), (&first, "first again")] {
        let log = log.clone();
        scheduler.schedule_microtask(Box::new(move || log.borrow_mut().push(name)));
    }

    host.run_microtasks();
    assert_eq!(*log.borrow(), vec!["first", "first again", "second"]);
}

#[test]
fn test_visibility_state_parses_host_strings() {
    assert_eq!(VisibilityState::parse("hidden"), Some(VisibilityState::Hidden));
    assert_eq!(VisibilityState::parse("visible"), Some(VisibilityState::Visible));
    assert_eq!(VisibilityState::parse("prerender"), Some(VisibilityState::Prerender));
    assert_eq!(VisibilityState::parse("unloaded"), Some(VisibilityState::Unloaded));
    assert_eq!(VisibilityState::parse("minimized"), None);
}
