//! Entity and network identities

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use slotmap::{DefaultKey, Key, KeyData};

/// A node in the scene graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(pub(crate) DefaultKey);

impl Entity {
    #[inline]
    pub fn from_raw(bits: u64) -> Self {
        Self(KeyData::from_ffi(bits).into())
    }

    #[inline]
    pub fn into_raw(self) -> u64 {
        self.0.data().as_ffi()
    }
}

/// The globally unique identity of a networked entity.
///
/// Ids are hierarchical: every descendant of a hierarchy root carries the root id followed by a
/// `.` separated suffix, e.g. `r1.c1` for a child of `r1`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new<T>(id: T) -> Self
    where
        T: Into<String>,
    {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the id of the hierarchy root this id belongs to.
    pub fn root(&self) -> NetworkId {
        match self.0.split_once('.') {
            Some((root, _)) => Self(root.to_owned()),
            None => self.clone(),
        }
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        !self.0.contains('.')
    }

    /// Returns `true` if `self` is `root` or any of its descendants.
    ///
    /// Only whole segments match: `r10` is not within `r1`.
    pub fn is_within(&self, root: &NetworkId) -> bool {
        match self.0.strip_prefix(root.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

impl Display for NetworkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<&str> for NetworkId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The identity of a peer (or the backend) authoring state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    const SERVER: &'static str = "reticulum";

    pub fn new<T>(id: T) -> Self
    where
        T: Into<String>,
    {
        Self(id.into())
    }

    /// The identity of the backend.
    ///
    /// Records loaded from the store are attributed to this identity since no connected peer
    /// authored them.
    pub fn server() -> Self {
        Self(Self::SERVER.to_owned())
    }

    #[inline]
    pub fn is_server(&self) -> bool {
        self.0 == Self::SERVER
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The identity of the room a session is joined to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HubId(String);

impl HubId {
    pub fn new<T>(id: T) -> Self
    where
        T: Into<String>,
    {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for HubId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<&str> for HubId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Network state attached to a networked entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Networked {
    pub id: NetworkId,
    /// The peer that last wrote authoritative state.
    pub creator: ClientId,
    /// The peer that currently holds write authority.
    pub owner: ClientId,
    pub last_owner_time: u64,
}

impl Networked {
    pub fn new(id: NetworkId, creator: ClientId) -> Self {
        Self {
            id,
            owner: creator.clone(),
            creator,
            last_owner_time: 0,
        }
    }
}
