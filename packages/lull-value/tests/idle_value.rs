use lull_scheduler::{IdleScheduler, LocalHost, LocalHostOptions, ManualClock};
use lull_value::{IdleMap, IdleValue, ValueError};
use std::cell::Cell;
use std::rc::Rc;

fn host() -> Rc<LocalHost> {
    LocalHost::with_clock(LocalHostOptions::default(), Rc::new(ManualClock::new()))
}

fn idle(host: &Rc<LocalHost>) -> Rc<dyn IdleScheduler> {
    host.clone()
}

#[test]
fn test_value_initializes_when_idle() {
    let host = host();
    let calls = Rc::new(Cell::new(0));

    let value = {
        let calls = calls.clone();
        IdleValue::new(idle(&host), move || {
            calls.set(calls.get() + 1);
            42
        })
    };

    assert!(!value.is_initialized());
    assert_eq!(host.pending_idle_callbacks(), 1);

    host.run_idle_period(10.0);
    assert!(value.is_initialized());
    assert_eq!(*value.get_value().unwrap(), 42);
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_early_read_initializes_eagerly_and_cancels_idle_work() {
    let host = host();
    let calls = Rc::new(Cell::new(0));

    let value = {
        let calls = calls.clone();
        IdleValue::new(idle(&host), move || {
            calls.set(calls.get() + 1);
            String::from("config")
        })
    };

    assert_eq!(value.get_cloned().unwrap(), "config");
    assert_eq!(host.pending_idle_callbacks(), 0);

    host.run_idle_period(10.0);
    assert_eq!(*value.get_value().unwrap(), "config");
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_set_value_overrides_and_skips_init() {
    let host = host();
    let calls = Rc::new(Cell::new(0));

    let value = {
        let calls = calls.clone();
        IdleValue::new(idle(&host), move || {
            calls.set(calls.get() + 1);
            1
        })
    };

    value.set_value(7);
    host.run_idle_period(10.0);

    assert_eq!(*value.get_value().unwrap(), 7);
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_failed_idle_init_is_retried_on_read() {
    let host = host();
    let attempts = Rc::new(Cell::new(0));

    let value = {
        let attempts = attempts.clone();
        IdleValue::try_new(idle(&host), move || {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                anyhow::bail!("backend not ready");
            }
            Ok(vec![1, 2, 3])
        })
    };

    host.run_idle_period(10.0);
    assert!(!value.is_initialized());

    assert_eq!(*value.get_value().unwrap(), vec![1, 2, 3]);
    assert_eq!(attempts.get(), 2);
}

#[test]
fn test_read_error_surfaces_init_failure() {
    let host = host();
    let value: IdleValue<u32> =
        IdleValue::try_new(idle(&host), || Err(anyhow::anyhow!("disk unavailable")));

    let err = value.get_value().unwrap_err();
    assert!(matches!(err, ValueError::Init(_)));
    assert!(err.to_string().contains("disk unavailable"));
}

#[test]
fn test_dropping_value_cancels_idle_init() {
    let host = host();
    {
        let _value = IdleValue::new(idle(&host), || 5);
        assert_eq!(host.pending_idle_callbacks(), 1);
    }
    assert_eq!(host.pending_idle_callbacks(), 0);
}

#[test]
fn test_works_over_the_timer_shim() {
    let host = LocalHost::with_clock(
        LocalHostOptions {
            native_idle_callback: false,
            ..Default::default()
        },
        Rc::new(ManualClock::new()),
    );
    let services = lull_scheduler::HostServices::new(host.clone());

    let value = IdleValue::new(services.idle.clone(), || "lazy");
    host.run_until_idle();
    assert!(value.is_initialized());
}

#[test]
fn test_idle_map_defines_and_overrides() {
    let host = host();
    let mut map: IdleMap<&'static str, u64> = IdleMap::new(idle(&host));

    map.define_all([("width", (|| 640) as fn() -> u64), ("height", || 480)]);
    assert_eq!(map.len(), 2);
    assert!(!map.is_initialized(&"width"));

    assert_eq!(*map.get(&"height").unwrap().unwrap(), 480);
    assert!(map.is_initialized(&"height"));
    assert!(!map.is_initialized(&"width"));

    host.run_idle_period(10.0);
    assert!(map.is_initialized(&"width"));

    map.set("width", 1024);
    map.set("depth", 32);
    assert_eq!(*map.get(&"width").unwrap().unwrap(), 1024);
    assert_eq!(*map.get(&"depth").unwrap().unwrap(), 32);
    assert!(map.get(&"missing").is_none());
}

#[test]
fn test_idle_map_redefine_drops_old_entry() {
    let host = host();
    let mut map: IdleMap<u8, &'static str> = IdleMap::new(idle(&host));

    map.define(1, || "old");
    map.define(1, || "new");
    assert_eq!(host.pending_idle_callbacks(), 1);

    host.run_idle_period(10.0);
    assert_eq!(*map.get(&1).unwrap().unwrap(), "new");

    assert!(map.remove(&1));
    assert!(map.is_empty());
}
