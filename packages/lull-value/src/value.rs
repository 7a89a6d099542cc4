use crate::error::ValueError;
use lull_scheduler::{Deadline, IdleHandle, IdleScheduler};
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Initializer<T> = Box<dyn FnMut() -> anyhow::Result<T>>;

struct ValueInner<T> {
    idle: Rc<dyn IdleScheduler>,
    init: RefCell<Option<Initializer<T>>>,
    value: RefCell<Option<T>>,
    handle: Cell<Option<IdleHandle>>,
}

impl<T> ValueInner<T> {
    fn cancel_idle_init(&self) {
        if let Some(handle) = self.handle.take() {
            self.idle.cancel_idle_callback(handle);
        }
    }

    fn is_initialized(&self) -> bool {
        self.value.borrow().is_some()
    }

    fn initialize(&self) -> Result<(), ValueError> {
        if self.is_initialized() {
            return Ok(());
        }

        // Taken out for the call so a read from inside the initializer
        // fails instead of hitting a borrow conflict.
        let Some(mut init) = self.init.borrow_mut().take() else {
            return Err(ValueError::Uninitialized);
        };

        match init() {
            Ok(value) => {
                *self.value.borrow_mut() = Some(value);
                Ok(())
            }
            Err(err) => {
                // Keep the initializer so the next read can retry.
                *self.init.borrow_mut() = Some(init);
                Err(ValueError::Init(err))
            }
        }
    }
}

impl<T> Drop for ValueInner<T> {
    fn drop(&mut self) {
        self.cancel_idle_init();
    }
}

/// A value that is computed during the next idle period, or right away when
/// it is read before that happens.
pub struct IdleValue<T: 'static> {
    inner: Rc<ValueInner<T>>,
}

impl<T: 'static> IdleValue<T> {
    pub fn new<F>(idle: Rc<dyn IdleScheduler>, init: F) -> Self
    where
        F: FnOnce() -> T + 'static,
    {
        let mut init = Some(init);
        Self::try_new(idle, move || match init.take() {
            Some(init) => Ok(init()),
            None => Err(anyhow::anyhow!("initializer already consumed")),
        })
    }

    /// Like [`IdleValue::new`], for initializers that can fail. A failed idle
    /// initialization is logged and retried on first read.
    pub fn try_new<F>(idle: Rc<dyn IdleScheduler>, init: F) -> Self
    where
        F: FnMut() -> anyhow::Result<T> + 'static,
    {
        let inner = Rc::new(ValueInner {
            idle,
            init: RefCell::new(Some(Box::new(init) as Initializer<T>)),
            value: RefCell::new(None),
            handle: Cell::new(None),
        });

        let weak: Weak<ValueInner<T>> = Rc::downgrade(&inner);
        let handle = inner
            .idle
            .request_idle_callback(Box::new(move |_: &dyn Deadline| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.handle.set(None);
                if let Err(err) = inner.initialize() {
                    tracing::error!("Error initializing idle value: {}", err);
                }
            }));
        inner.handle.set(Some(handle));

        Self { inner }
    }

    /// An already initialized value; nothing is scheduled.
    pub fn with_value(idle: Rc<dyn IdleScheduler>, value: T) -> Self {
        Self {
            inner: Rc::new(ValueInner {
                idle,
                init: RefCell::new(None),
                value: RefCell::new(Some(value)),
                handle: Cell::new(None),
            }),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    /// Returns the value, computing it now (and cancelling the idle
    /// initialization) if the idle period has not come yet.
    pub fn get_value(&self) -> Result<Ref<'_, T>, ValueError> {
        if !self.inner.is_initialized() {
            self.inner.cancel_idle_init();
            self.inner.initialize()?;
        }
        Ref::filter_map(self.inner.value.borrow(), Option::as_ref)
            .map_err(|_| ValueError::Uninitialized)
    }

    /// Overrides the value. A pending idle initialization will not run.
    pub fn set_value(&self, value: T) {
        self.inner.cancel_idle_init();
        *self.inner.value.borrow_mut() = Some(value);
        let init = self.inner.init.borrow_mut().take();
        drop(init);
    }
}

impl<T: Clone + 'static> IdleValue<T> {
    pub fn get_cloned(&self) -> Result<T, ValueError> {
        self.get_value().map(|value| value.clone())
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for IdleValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleValue")
            .field("value", &self.inner.value.borrow())
            .finish_non_exhaustive()
    }
}
