//! Scene graph access
//!
//! The persistence systems only need a narrow view of the scene: marker components, network
//! state and a depth-first walk over a hierarchy. [`Scene`] describes that view, [`World`] is a
//! plain in-memory implementation.

use ahash::HashMap;
use slotmap::{DefaultKey, SlotMap};

use crate::entity::{Entity, Networked};
use crate::message::ComponentData;

/// Boolean components relevant for persistence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Marker {
    /// The local peer holds write authority.
    Owned,
    /// The entity is attached to an active manipulation.
    Constraint,
    /// The entity state survives in the remote store.
    Persistable,
    /// A storage-relevant value changed.
    EntityStateDirty,
}

impl Marker {
    const fn bit(self) -> u8 {
        match self {
            Self::Owned => 1 << 0,
            Self::Constraint => 1 << 1,
            Self::Persistable => 1 << 2,
            Self::EntityStateDirty => 1 << 3,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MarkerSet(u8);

impl MarkerSet {
    #[inline]
    pub const fn contains(self, marker: Marker) -> bool {
        self.0 & marker.bit() != 0
    }

    #[inline]
    pub fn insert(&mut self, marker: Marker) {
        self.0 |= marker.bit();
    }

    #[inline]
    pub fn remove(&mut self, marker: Marker) {
        self.0 &= !marker.bit();
    }

    pub fn contains_all(self, markers: &[Marker]) -> bool {
        markers.iter().all(|marker| self.contains(*marker))
    }
}

/// The storable state of an entity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub prefab: String,
    pub data: ComponentData,
}

pub trait Scene {
    fn exists(&self, entity: Entity) -> bool;

    fn has(&self, entity: Entity, marker: Marker) -> bool;

    fn insert(&mut self, entity: Entity, marker: Marker);

    fn remove(&mut self, entity: Entity, marker: Marker);

    /// Returns all entities carrying every marker in `markers`.
    fn query(&self, markers: &[Marker]) -> Vec<Entity>;

    fn networked(&self, entity: Entity) -> Option<&Networked>;

    fn networked_mut(&mut self, entity: Entity) -> Option<&mut Networked>;

    /// Returns `entity` followed by all its descendants in depth-first order.
    fn self_with_descendants(&self, entity: Entity) -> Vec<Entity>;

    fn snapshot(&self, entity: Entity) -> Option<Snapshot>;

    /// Returns the root of the scene graph, which is never persisted on its own.
    fn scene_root(&self) -> Option<Entity>;
}

#[derive(Clone, Debug, Default)]
struct Node {
    markers: MarkerSet,
    networked: Option<Networked>,
    snapshot: Snapshot,
}

#[derive(Clone, Debug, Default)]
pub struct World {
    nodes: SlotMap<DefaultKey, Node>,
    children: HashMap<Entity, Vec<Entity>>,
    parents: HashMap<Entity, Entity>,
    root: Option<Entity>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, parent: Option<Entity>) -> Entity {
        let entity = Entity(self.nodes.insert(Node::default()));

        if let Some(parent) = parent {
            debug_assert!(self.nodes.contains_key(parent.0));

            self.parents.insert(entity, parent);
            self.children.entry(parent).or_default().push(entity);
        }

        entity
    }

    /// Spawns a networked entity.
    pub fn spawn_networked(&mut self, parent: Option<Entity>, networked: Networked) -> Entity {
        let entity = self.spawn(parent);
        self.nodes[entity.0].networked = Some(networked);
        entity
    }

    /// Removes `entity` and all its descendants.
    pub fn despawn(&mut self, entity: Entity) {
        self.nodes.remove(entity.0);

        if self.root == Some(entity) {
            self.root = None;
        }

        if let Some(parent) = self.parents.remove(&entity) {
            if let Some(children) = self.children.get_mut(&parent) {
                children.retain(|id| *id != entity);
            }
        }

        if let Some(children) = self.children.remove(&entity) {
            for child in children {
                self.despawn(child);
            }
        }
    }

    pub fn set_scene_root(&mut self, entity: Entity) {
        self.root = Some(entity);
    }

    pub fn set_networked(&mut self, entity: Entity, networked: Networked) {
        if let Some(node) = self.nodes.get_mut(entity.0) {
            node.networked = Some(networked);
        }
    }

    pub fn set_prefab(&mut self, entity: Entity, prefab: &str) {
        if let Some(node) = self.nodes.get_mut(entity.0) {
            node.snapshot.prefab = prefab.to_owned();
        }
    }

    /// Writes a storable component value.
    ///
    /// This does not mark the entity dirty by itself.
    pub fn set_data(&mut self, entity: Entity, key: &str, value: serde_json::Value) {
        if let Some(node) = self.nodes.get_mut(entity.0) {
            node.snapshot.data.insert(key.to_owned(), value);
        }
    }

    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.parents.get(&entity).copied()
    }

    pub fn children(&self, entity: Entity) -> Option<impl Iterator<Item = Entity> + '_> {
        self.children.get(&entity).map(|vec| vec.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Scene for World {
    fn exists(&self, entity: Entity) -> bool {
        self.nodes.contains_key(entity.0)
    }

    fn has(&self, entity: Entity, marker: Marker) -> bool {
        self.nodes
            .get(entity.0)
            .is_some_and(|node| node.markers.contains(marker))
    }

    fn insert(&mut self, entity: Entity, marker: Marker) {
        if let Some(node) = self.nodes.get_mut(entity.0) {
            node.markers.insert(marker);
        }
    }

    fn remove(&mut self, entity: Entity, marker: Marker) {
        if let Some(node) = self.nodes.get_mut(entity.0) {
            node.markers.remove(marker);
        }
    }

    fn query(&self, markers: &[Marker]) -> Vec<Entity> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.markers.contains_all(markers))
            .map(|(key, _)| Entity(key))
            .collect()
    }

    fn networked(&self, entity: Entity) -> Option<&Networked> {
        self.nodes.get(entity.0)?.networked.as_ref()
    }

    fn networked_mut(&mut self, entity: Entity) -> Option<&mut Networked> {
        self.nodes.get_mut(entity.0)?.networked.as_mut()
    }

    fn self_with_descendants(&self, entity: Entity) -> Vec<Entity> {
        let mut entities = Vec::new();
        if !self.exists(entity) {
            return entities;
        }

        let mut stack = vec![entity];
        while let Some(entity) = stack.pop() {
            entities.push(entity);

            if let Some(children) = self.children.get(&entity) {
                // Reversed so the first child is visited first.
                stack.extend(children.iter().rev().copied());
            }
        }

        entities
    }

    fn snapshot(&self, entity: Entity) -> Option<Snapshot> {
        self.nodes.get(entity.0).map(|node| node.snapshot.clone())
    }

    fn scene_root(&self) -> Option<Entity> {
        self.root
    }
}

#[cfg(test)]
mod tests {
    use super::{Marker, Scene, World};

    #[test]
    fn world_self_with_descendants_depth_first() {
        let mut world = World::new();

        let root = world.spawn(None);
        let a = world.spawn(Some(root));
        let a0 = world.spawn(Some(a));
        let b = world.spawn(Some(root));
        let a1 = world.spawn(Some(a));

        assert_eq!(world.self_with_descendants(root), [root, a, a0, a1, b]);
        assert_eq!(world.self_with_descendants(a), [a, a0, a1]);
    }

    #[test]
    fn world_despawn_recursive() {
        let mut world = World::new();

        let root = world.spawn(None);
        let child = world.spawn(Some(root));
        let grandchild = world.spawn(Some(child));
        let sibling = world.spawn(Some(root));

        world.despawn(child);

        assert!(world.exists(root));
        assert!(world.exists(sibling));
        assert!(!world.exists(child));
        assert!(!world.exists(grandchild));
        assert_eq!(world.self_with_descendants(root), [root, sibling]);
        assert!(world.self_with_descendants(child).is_empty());
    }

    #[test]
    fn world_query_markers() {
        let mut world = World::new();

        let a = world.spawn(None);
        let b = world.spawn(None);

        world.insert(a, Marker::Owned);
        world.insert(a, Marker::Constraint);
        world.insert(b, Marker::Owned);

        assert_eq!(world.query(&[Marker::Owned, Marker::Constraint]), [a]);
        assert_eq!(world.query(&[Marker::Owned]).len(), 2);

        world.remove(a, Marker::Constraint);
        assert!(world.query(&[Marker::Constraint]).is_empty());
        assert!(!world.has(a, Marker::Constraint));
    }
}
