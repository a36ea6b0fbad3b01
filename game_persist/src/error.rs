use thiserror::Error;

use crate::gateway::{Command, RemoteError};

#[derive(Debug, Error)]
pub enum Error {
    /// There is no local client identity yet.
    #[error("not connected")]
    NotConnected,
    /// The entity has no resolvable network identity or ownership.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("remote rejected: {0}")]
    RemoteRejected(RemoteError),
    /// The remote dropped the request without responding.
    #[error("disconnected")]
    Disconnected,
    #[error("unexpected reply to {}", .0.as_str())]
    UnexpectedReply(Command),
    #[error("failed to decode stored message: {0}")]
    Decode(#[from] serde_json::Error),
}
