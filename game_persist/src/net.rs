//! Network session state
//!
//! The ownership protocol itself lives elsewhere. Persistence only needs to know who we are, how
//! an entity came into existence, and where to queue messages loaded from the store.

use ahash::HashSet;

use crate::entity::{ClientId, Entity, HubId};
use crate::message::StorableMessage;

pub trait Network {
    /// Returns the identity of the local peer, or `None` while disconnected.
    fn local_client_id(&self) -> Option<&ClientId>;

    /// Returns the room the session is currently joined to.
    fn hub_id(&self) -> Option<&HubId>;

    /// Returns `true` if the entity was spawned over the network as part of a hierarchy.
    fn is_network_instantiated(&self, entity: Entity) -> bool;

    fn is_pinned(&self, entity: Entity) -> bool;

    /// Queues a message to be applied by the network receive path.
    fn push_pending_message(&mut self, message: StorableMessage);
}

#[derive(Clone, Debug, Default)]
pub struct Session {
    local_client_id: Option<ClientId>,
    hub_id: Option<HubId>,
    network_instantiated: HashSet<Entity>,
    pinned: HashSet<Entity>,
    pending_messages: Vec<StorableMessage>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, id: ClientId) {
        self.local_client_id = Some(id);
    }

    /// Switches the session to `hub`.
    ///
    /// Messages queued for the previous room are dropped.
    pub fn join(&mut self, hub: HubId) {
        self.hub_id = Some(hub);
        self.pending_messages.clear();
    }

    pub fn disconnect(&mut self) {
        self.local_client_id = None;
        self.pending_messages.clear();
    }

    pub fn set_network_instantiated(&mut self, entity: Entity, value: bool) {
        if value {
            self.network_instantiated.insert(entity);
        } else {
            self.network_instantiated.remove(&entity);
        }
    }

    pub fn set_pinned(&mut self, entity: Entity, value: bool) {
        if value {
            self.pinned.insert(entity);
        } else {
            self.pinned.remove(&entity);
        }
    }

    pub fn pending_messages(&self) -> &[StorableMessage] {
        &self.pending_messages
    }

    pub fn drain_pending_messages(&mut self) -> Vec<StorableMessage> {
        std::mem::take(&mut self.pending_messages)
    }
}

impl Network for Session {
    fn local_client_id(&self) -> Option<&ClientId> {
        self.local_client_id.as_ref()
    }

    fn hub_id(&self) -> Option<&HubId> {
        self.hub_id.as_ref()
    }

    fn is_network_instantiated(&self, entity: Entity) -> bool {
        self.network_instantiated.contains(&entity)
    }

    fn is_pinned(&self, entity: Entity) -> bool {
        self.pinned.contains(&entity)
    }

    fn push_pending_message(&mut self, message: StorableMessage) {
        self.pending_messages.push(message);
    }
}
