//! Payload construction
//!
//! Every entity of a hierarchy is saved as its own record so that any single record can later be
//! updated or deleted without touching its siblings.

use crate::backlog::{PendingUpdates, Watermark};
use crate::entity::{ClientId, Entity, NetworkId};
use crate::error::Error;
use crate::gateway::{DeleteEntityPayload, SaveEntityPayload};
use crate::message::{CreateMessage, StorableMessage, StorableUpdate};
use crate::ownership::{stamp_creator, take_ownership};
use crate::world::Scene;

fn network_id<S>(scene: &S, entity: Entity) -> Result<NetworkId, Error>
where
    S: Scene + ?Sized,
{
    scene
        .networked(entity)
        .map(|networked| networked.id.clone())
        .ok_or_else(|| Error::InvalidState(format!("{:?} has no network id", entity)))
}

/// Builds the storable message for a single entity.
///
/// The hierarchy root is written as a create, every other entity as an update. No network id
/// appears twice in the message.
pub fn message_for_storage<S>(
    scene: &S,
    entity: Entity,
    root_nid: &NetworkId,
) -> Result<StorableMessage, Error>
where
    S: Scene + ?Sized,
{
    let networked = scene
        .networked(entity)
        .ok_or_else(|| Error::InvalidState(format!("{:?} has no network id", entity)))?;
    let snapshot = scene.snapshot(entity).unwrap_or_default();

    let mut message = StorableMessage::new();
    if networked.id == *root_nid {
        message.creates.push(CreateMessage {
            nid: networked.id.clone(),
            prefab: snapshot.prefab,
            creator: networked.creator.clone(),
            data: snapshot.data,
        });
    } else {
        message.updates.push(StorableUpdate {
            nid: networked.id.clone(),
            last_owner_time: networked.last_owner_time,
            owner: networked.owner.clone(),
            creator: networked.creator.clone(),
            data: snapshot.data,
        });
    }

    Ok(message)
}

pub fn save_payload<S>(
    scene: &S,
    entity: Entity,
    root_nid: &NetworkId,
) -> Result<SaveEntityPayload, Error>
where
    S: Scene + ?Sized,
{
    Ok(SaveEntityPayload {
        root_nid: root_nid.clone(),
        nid: network_id(scene, entity)?,
        message: message_for_storage(scene, entity, root_nid)?,
    })
}

pub fn delete_payload<S>(scene: &S, entity: Entity) -> Result<DeleteEntityPayload, Error>
where
    S: Scene + ?Sized,
{
    let nid = network_id(scene, entity)?;
    let message = message_for_storage(scene, entity, &nid.root())?;

    Ok(DeleteEntityPayload { nid, message })
}

#[derive(Clone, Debug)]
pub struct HierarchySave {
    pub payloads: Vec<SaveEntityPayload>,
    /// The buffered updates merged into `payloads`.
    pub watermark: Watermark,
}

/// Builds one save payload per networked entity in the hierarchy of `root`.
///
/// Takes ownership of every networked entity and stamps the backend as its creator.
/// Buffered storable updates within the hierarchy are appended to the payload of their network
/// id, creating a payload if the entity can't be resolved locally.
pub fn save_hierarchy<S>(
    scene: &mut S,
    root: Entity,
    local: &ClientId,
    pending: &PendingUpdates,
) -> Result<HierarchySave, Error>
where
    S: Scene + ?Sized,
{
    let root_nid = network_id(scene, root)?;
    take_ownership(scene, root, local)?;
    stamp_creator(scene, root, &ClientId::server())?;

    let mut payloads = Vec::new();
    for entity in scene.self_with_descendants(root) {
        if scene.networked(entity).is_none() {
            continue;
        }

        take_ownership(scene, entity, local)?;
        stamp_creator(scene, entity, &ClientId::server())?;
        payloads.push(save_payload(scene, entity, &root_nid)?);
    }

    for update in pending.storable_within(&root_nid) {
        let index = match payloads.iter().position(|p| p.nid == update.nid) {
            Some(index) => index,
            None => {
                payloads.push(SaveEntityPayload {
                    root_nid: root_nid.clone(),
                    nid: update.nid.clone(),
                    message: StorableMessage::new(),
                });
                payloads.len() - 1
            }
        };

        payloads[index].message.updates.push(update.clone());
    }

    Ok(HierarchySave {
        payloads,
        watermark: pending.watermark(&root_nid),
    })
}

#[derive(Clone, Debug)]
pub struct HierarchyDelete {
    /// The payload for the bulk delete of all records stored under the root.
    pub root: DeleteEntityPayload,
    pub descendants: Vec<DeleteEntityPayload>,
    /// The buffered updates merged into `descendants`.
    pub watermark: Watermark,
}

/// Builds the delete payloads for the hierarchy of `root`.
///
/// The root and every networked descendant are stamped with the local peer as creator. Buffered
/// updates are only merged into payloads of descendants that resolved locally; records of
/// unresolved descendants are reclaimed by the bulk delete.
pub fn delete_hierarchy<S>(
    scene: &mut S,
    root: Entity,
    local: &ClientId,
    pending: &PendingUpdates,
) -> Result<HierarchyDelete, Error>
where
    S: Scene + ?Sized,
{
    take_ownership(scene, root, local)?;
    stamp_creator(scene, root, local)?;

    let root_payload = delete_payload(scene, root)?;

    let mut descendants = Vec::new();
    for entity in scene.self_with_descendants(root) {
        if entity == root || scene.networked(entity).is_none() {
            continue;
        }

        take_ownership(scene, entity, local)?;
        stamp_creator(scene, entity, local)?;
        descendants.push(delete_payload(scene, entity)?);
    }

    for update in pending.storable_within(&root_payload.nid) {
        if let Some(payload) = descendants.iter_mut().find(|p| p.nid == update.nid) {
            payload.message.updates.push(update.clone());
        }
    }

    let watermark = pending.watermark_where(|nid| descendants.iter().any(|p| p.nid == *nid));

    Ok(HierarchyDelete {
        root: root_payload,
        descendants,
        watermark,
    })
}
