pub mod error;
pub mod host;

pub use error::WebError;
pub use host::WebHost;

use lull_core::{IdleQueue, QueueConfig};

/// Routes Rust panics to the browser console. Safe to call more than once.
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Builds an idle queue over the current window.
pub fn idle_queue(config: QueueConfig) -> Result<IdleQueue, WebError> {
    set_panic_hook();
    let host = WebHost::new()?;
    Ok(IdleQueue::from_host(config, host)?)
}
