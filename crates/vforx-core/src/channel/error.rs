use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel capacity of {0} exhausted")]
    CapacityExhausted(usize),
    /// The only channel was reset to `OFF` instead of being removed.
    #[error("the last channel cannot be removed; it was switched off")]
    LastChannel { selected: usize },
    #[error("no channel with index {0}")]
    NoSuchChannel(usize),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error("engine error: {0:#}")]
    Engine(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("unknown parameter `{0}`")]
    Unknown(String),
    #[error("parameter `{param}` expects {expected}")]
    TypeMismatch {
        param: &'static str,
        expected: &'static str,
    },
    #[error("parameter `{param}` out of range: {detail}")]
    OutOfRange { param: &'static str, detail: String },
    #[error("channel {0} is locked")]
    Locked(usize),
    #[error("no channel with index {0}")]
    NoSuchChannel(usize),
}
