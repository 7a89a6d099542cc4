use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("failed to initialize idle value: {0}")]
    Init(anyhow::Error),

    /// The initializer is running (a read from inside it) or was already consumed.
    #[error("idle value has no value and no initializer available")]
    Uninitialized,
}
