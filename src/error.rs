use thiserror::Error;

/// Errors surfaced by the public session API.
///
/// Everything here is recoverable: the session stays usable after any of
/// these, and resource-exhaustion variants (`PoolExhausted`, `QueueFull`)
/// are expected to clear once in-flight traffic drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(&'static str),
    #[error("message exceeds the maximum application length")]
    MessageTooLarge,
    #[error("message is empty")]
    EmptyMessage,
    #[error("input slice exceeds the link mtu")]
    SliceTooLarge,
    #[error("memory pool exhausted")]
    PoolExhausted,
    #[error("event queue full")]
    QueueFull,
    #[error("session is not established")]
    NotEstablished,
    #[error("session is stopped")]
    Stopped,
    #[error("session is not in the stopped state")]
    AlreadyOpen,
    #[error("link output failed")]
    OutputFailed,
    #[error("platform adapter failure: {0}")]
    Port(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
