//! Persistence gateway
//!
//! Every remote operation is a single request on a reliable request/response channel which
//! completes with either "ok" or "error". The gateway never retries, a still dirty entity is
//! picked up again by the next debounce or resync cycle.

use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use serde::{Deserialize, Serialize};

use crate::entity::NetworkId;
use crate::error::Error;
use crate::message::StorableMessage;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    ListEntityStates,
    SaveEntityState,
    DeleteEntityState,
    DeleteEntityStatesForRootNid,
}

impl Command {
    /// Returns the name of the command on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ListEntityStates => "list_entity_states",
            Self::SaveEntityState => "save_entity_state",
            Self::DeleteEntityState => "delete_entity_state",
            Self::DeleteEntityStatesForRootNid => "delete_entity_states_for_root_nid",
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveEntityPayload {
    pub root_nid: NetworkId,
    pub nid: NetworkId,
    pub message: StorableMessage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteEntityPayload {
    pub nid: NetworkId,
    pub message: StorableMessage,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    None,
    Save(SaveEntityPayload),
    Delete(DeleteEntityPayload),
}

impl Payload {
    pub fn nid(&self) -> Option<&NetworkId> {
        match self {
            Self::None => None,
            Self::Save(payload) => Some(&payload.nid),
            Self::Delete(payload) => Some(&payload.nid),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub nid: NetworkId,
    /// A serialized [`StorableMessage`].
    pub blob: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStateList {
    pub data: Vec<EntityState>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Ok,
    EntityStates(EntityStateList),
}

impl Reply {
    pub fn into_entity_states(self) -> Option<EntityStateList> {
        match self {
            Self::EntityStates(list) => Some(list),
            Self::Ok => None,
        }
    }
}

/// An error reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct RemoteError {
    pub reason: String,
}

impl RemoteError {
    pub fn new<T>(reason: T) -> Self
    where
        T: Into<String>,
    {
        Self {
            reason: reason.into(),
        }
    }
}

pub type Response = Result<Reply, RemoteError>;

/// A request sent to the remote store.
///
/// Resolves once the backend acknowledged or rejected it. Dropping the `Request` does not retract
/// the remote operation.
#[derive(Debug)]
pub struct Request {
    rx: oneshot::Receiver<Response>,
}

impl Request {
    /// Creates a new pending request and the [`Responder`] completing it.
    pub fn new() -> (Responder, Self) {
        let (tx, rx) = oneshot::channel();
        (Responder { tx }, Self { rx })
    }

    /// Creates a request that is already completed.
    pub fn ready(response: Response) -> Self {
        let (responder, request) = Self::new();
        responder.respond(response);
        request
    }
}

impl Future for Request {
    type Output = Result<Reply, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(Ok(reply))) => Poll::Ready(Ok(reply)),
            Poll::Ready(Ok(Err(err))) => Poll::Ready(Err(Error::RemoteRejected(err))),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::Disconnected)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Response>,
}

impl Responder {
    pub fn respond(self, response: Response) {
        // The caller may no longer be interested in the result.
        let _ = self.tx.send(response);
    }
}

/// The transport to the remote store.
pub trait Channel {
    fn push(&mut self, command: Command, payload: Payload) -> Request;
}

impl<C> Channel for &mut C
where
    C: Channel + ?Sized,
{
    fn push(&mut self, command: Command, payload: Payload) -> Request {
        (**self).push(command, payload)
    }
}

/// The result of a tracked operation.
///
/// Completes after the tick that observed the completion of all underlying requests.
#[derive(Debug)]
pub struct Pending<T> {
    pub(crate) rx: oneshot::Receiver<Result<T, Error>>,
}

impl<T> Future for Pending<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::Disconnected)),
            Poll::Pending => Poll::Pending,
        }
    }
}
