use lull_core::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebError {
    #[error("no global `window` exists")]
    NoWindow,
    #[error(transparent)]
    Queue(#[from] QueueError),
}
