//! Storable messages
//!
//! A [`StorableMessage`] is the durable record format persisted per entity. It is distinct from
//! the transient network traffic which can also contain non-storable updates, like cursor
//! telemetry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{ClientId, NetworkId};

/// Storable component values of an entity, keyed by component name.
pub type ComponentData = BTreeMap<String, serde_json::Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorableMessage {
    pub version: u32,
    #[serde(
        rename = "fromClientId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub from_client_id: Option<ClientId>,
    pub creates: Vec<CreateMessage>,
    pub updates: Vec<StorableUpdate>,
    pub deletes: Vec<NetworkId>,
}

impl StorableMessage {
    pub const VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            from_client_id: None,
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Returns `true` if no network id appears in more than one of the three sequences.
    pub fn is_disjoint(&self) -> bool {
        let in_creates = |nid: &NetworkId| self.creates.iter().any(|c| c.nid == *nid);

        !self.updates.iter().any(|u| in_creates(&u.nid))
            && !self
                .deletes
                .iter()
                .any(|nid| in_creates(nid) || self.updates.iter().any(|u| u.nid == *nid))
    }

    /// Rewrites the provenance of this message to `identity`.
    pub fn reattribute(&mut self, identity: &ClientId) {
        self.from_client_id = Some(identity.clone());

        for update in &mut self.updates {
            update.owner = identity.clone();
        }
    }
}

impl Default for StorableMessage {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateMessage {
    pub nid: NetworkId,
    pub prefab: String,
    pub creator: ClientId,
    #[serde(default)]
    pub data: ComponentData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorableUpdate {
    pub nid: NetworkId,
    #[serde(rename = "lastOwnerTime")]
    pub last_owner_time: u64,
    pub owner: ClientId,
    pub creator: ClientId,
    #[serde(default)]
    pub data: ComponentData,
}

/// Cursor and pointer telemetry of a peer.
///
/// These updates are only meaningful while the peer is connected and must never be persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorBufferUpdate {
    pub nid: NetworkId,
    pub owner: ClientId,
    #[serde(rename = "componentIds")]
    pub component_ids: Vec<u32>,
    pub data: Vec<u8>,
}

/// An update received over the network that could not be applied yet.
#[derive(Clone, Debug, PartialEq)]
pub enum BufferedUpdate {
    Storable(StorableUpdate),
    CursorBuffer(CursorBufferUpdate),
}

impl BufferedUpdate {
    pub fn nid(&self) -> &NetworkId {
        match self {
            Self::Storable(update) => &update.nid,
            Self::CursorBuffer(update) => &update.nid,
        }
    }

    pub fn as_storable(&self) -> Option<&StorableUpdate> {
        match self {
            Self::Storable(update) => Some(update),
            Self::CursorBuffer(_) => None,
        }
    }

    #[inline]
    pub fn is_cursor_buffer(&self) -> bool {
        matches!(self, Self::CursorBuffer(_))
    }
}

impl From<StorableUpdate> for BufferedUpdate {
    fn from(value: StorableUpdate) -> Self {
        Self::Storable(value)
    }
}

impl From<CursorBufferUpdate> for BufferedUpdate {
    fn from(value: CursorBufferUpdate) -> Self {
        Self::CursorBuffer(value)
    }
}
