//! Remote store backends
//!
//! [`MemoryStore`] keeps records in process and answers requests immediately. [`RemoteChannel`]
//! forwards requests to a backend task, see [`serve`].

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::entity::NetworkId;
use crate::gateway::{
    Channel, Command, EntityState, EntityStateList, Payload, RemoteError, Reply, Request,
    Responder, Response,
};
use crate::message::StorableMessage;

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub root_nid: NetworkId,
    pub message: StorableMessage,
}

/// A request received by a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub command: Command,
    pub nid: Option<NetworkId>,
}

#[derive(Debug, Default)]
struct Inner {
    records: IndexMap<NetworkId, Record>,
    calls: Vec<Call>,
    reject: usize,
}

/// An in-memory remote store.
///
/// Clones share the same records.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, command: Command, payload: Payload) -> Response {
        let mut inner = self.inner.lock();

        inner.calls.push(Call {
            command,
            nid: payload.nid().cloned(),
        });

        if inner.reject != 0 {
            inner.reject -= 1;
            return Err(RemoteError::new("rejected"));
        }

        match (command, payload) {
            (Command::SaveEntityState, Payload::Save(payload)) => {
                inner.records.insert(
                    payload.nid,
                    Record {
                        root_nid: payload.root_nid,
                        message: payload.message,
                    },
                );
                Ok(Reply::Ok)
            }
            (Command::DeleteEntityState, Payload::Delete(payload)) => {
                inner.records.shift_remove(&payload.nid);
                Ok(Reply::Ok)
            }
            (Command::DeleteEntityStatesForRootNid, Payload::Delete(payload)) => {
                inner
                    .records
                    .retain(|_, record| record.root_nid != payload.nid);
                Ok(Reply::Ok)
            }
            (Command::ListEntityStates, Payload::None) => {
                let mut data = Vec::with_capacity(inner.records.len());
                for (nid, record) in &inner.records {
                    let blob = serde_json::to_string(&record.message)
                        .map_err(|err| RemoteError::new(err.to_string()))?;
                    data.push(EntityState {
                        nid: nid.clone(),
                        blob,
                    });
                }

                Ok(Reply::EntityStates(EntityStateList { data }))
            }
            (command, _) => Err(RemoteError::new(format!("invalid payload for {}", command))),
        }
    }

    /// Rejects the next `count` requests.
    pub fn reject_next(&self, count: usize) {
        self.inner.lock().reject = count;
    }

    pub fn get(&self, nid: &NetworkId) -> Option<Record> {
        self.inner.lock().records.get(nid).cloned()
    }

    pub fn records(&self) -> Vec<(NetworkId, Record)> {
        let inner = self.inner.lock();
        inner
            .records
            .iter()
            .map(|(nid, record)| (nid.clone(), record.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all requests received so far.
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }
}

impl Channel for MemoryStore {
    fn push(&mut self, command: Command, payload: Payload) -> Request {
        Request::ready(self.handle(command, payload))
    }
}

#[derive(Debug)]
pub struct Envelope {
    pub command: Command,
    pub payload: Payload,
    pub responder: Responder,
}

/// A [`Channel`] forwarding requests to a backend task.
#[derive(Clone, Debug)]
pub struct RemoteChannel {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl RemoteChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Channel for RemoteChannel {
    fn push(&mut self, command: Command, payload: Payload) -> Request {
        let (responder, request) = Request::new();

        // If the backend is gone the responder is dropped with the envelope and the
        // request resolves as disconnected.
        let _ = self.tx.send(Envelope {
            command,
            payload,
            responder,
        });

        request
    }
}

/// Answers requests from `rx` using `store` until all senders are dropped.
pub async fn serve(mut rx: mpsc::UnboundedReceiver<Envelope>, store: MemoryStore) {
    while let Some(envelope) = rx.recv().await {
        let response = store.handle(envelope.command, envelope.payload);

        if let Err(err) = &response {
            tracing::debug!("rejected {}: {}", envelope.command, err);
        }

        envelope.responder.respond(response);
    }
}
