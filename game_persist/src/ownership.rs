//! Ownership coordination
//!
//! Taking ownership only establishes local intent. Whether the claim holds is decided by the
//! network ownership protocol, but the change is visible to every local consumer immediately.

use crate::entity::{ClientId, Entity};
use crate::error::Error;
use crate::world::{Marker, Scene};

/// Grants the local peer write authority over `entity`.
///
/// Calling this on an entity that is already owned by `local` has no effect.
pub fn take_ownership<S>(scene: &mut S, entity: Entity, local: &ClientId) -> Result<(), Error>
where
    S: Scene + ?Sized,
{
    let owned = scene.has(entity, Marker::Owned);

    let Some(networked) = scene.networked_mut(entity) else {
        return Err(Error::InvalidState(format!(
            "cannot take ownership of {:?}: entity is not networked",
            entity
        )));
    };

    if !owned || networked.owner != *local {
        networked.owner = local.clone();
        networked.last_owner_time += 1;
    }

    scene.insert(entity, Marker::Owned);
    Ok(())
}

/// Stamps the authoritative creator of `entity`.
///
/// Must follow [`take_ownership`], otherwise a racing peer may still consider itself the owner.
pub fn stamp_creator<S>(scene: &mut S, entity: Entity, creator: &ClientId) -> Result<(), Error>
where
    S: Scene + ?Sized,
{
    match scene.networked_mut(entity) {
        Some(networked) => {
            networked.creator = creator.clone();
            Ok(())
        }
        None => Err(Error::InvalidState(format!(
            "cannot stamp creator of {:?}: entity is not networked",
            entity
        ))),
    }
}
