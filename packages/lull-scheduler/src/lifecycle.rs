use std::rc::Rc;

/// Host signals the idle queue can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The foreground surface changed visibility (`visibilitychange`).
    VisibilityChange,
    /// The environment is about to go away (`pagehide`/`beforeunload`).
    ShutdownImminent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub trait LifecycleEvents {
    fn add_listener(&self, event: LifecycleEvent, listener: Rc<dyn Fn()>) -> ListenerId;

    /// Removing an unknown or already removed listener is a no-op.
    fn remove_listener(&self, id: ListenerId);
}
