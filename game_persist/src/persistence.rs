//! Entity state persistence
//!
//! [`Persistence`] owns all per-session state: debounce jobs, buffered updates and requests that
//! are still in flight. It is driven by [`Persistence::update`] once per tick and dropped (or
//! [`reset`]) on disconnect.
//!
//! [`reset`]: Persistence::reset

use std::task::{Context, Poll};
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::{try_join_all, BoxFuture};
use futures::task::noop_waker_ref;
use futures::FutureExt;

use crate::backlog::{PendingUpdates, Watermark};
use crate::config::{Config, ConfigError};
use crate::entity::{ClientId, Entity, NetworkId};
use crate::error::Error;
use crate::gateway::{Channel, Command, Payload, Pending, Reply, Request};
use crate::net::Network;
use crate::ownership::{stamp_creator, take_ownership};
use crate::payload::{self, HierarchyDelete, HierarchySave};
use crate::scheduler::{Debouncer, JobState, QueryExits};
use crate::time::Interval;
use crate::world::{Marker, Scene};

#[derive(Debug)]
pub struct Persistence {
    config: Config,
    debouncer: Debouncer,
    constraints: QueryExits,
    resync: Interval,
    pending: PendingUpdates,
    in_flight: Vec<InFlight>,
}

impl Persistence {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            debouncer: Debouncer::new(config.save_delay(), config.max_save_delay()),
            constraints: QueryExits::new(),
            resync: Interval::new(config.resync_interval()),
            pending: PendingUpdates::new(),
            in_flight: Vec::new(),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Updates received for entities that could not be resolved yet.
    #[inline]
    pub fn pending_updates(&self) -> &PendingUpdates {
        &self.pending
    }

    #[inline]
    pub fn pending_updates_mut(&mut self) -> &mut PendingUpdates {
        &mut self.pending
    }

    pub fn job_state(&self, entity: Entity) -> JobState {
        match self.debouncer.state(entity) {
            JobState::Clean if self.in_flight.iter().any(|op| op.is_save_of(entity)) => {
                JobState::Saving
            }
            state => state,
        }
    }

    /// Returns the number of operations whose completion was not observed yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Drops all session state.
    ///
    /// Requests that were already sent are not retracted. Callers waiting on a [`Pending`]
    /// result receive [`Error::Disconnected`].
    pub fn reset(&mut self) {
        self.debouncer.clear();
        self.constraints.clear();
        self.resync.reset();
        self.pending.clear();
        self.in_flight.clear();
    }

    /// Flags a storage-relevant change of `entity`.
    pub fn mark_dirty<S>(scene: &mut S, entity: Entity)
    where
        S: Scene + ?Sized,
    {
        scene.insert(entity, Marker::EntityStateDirty);
    }

    /// Runs one scheduler pass.
    ///
    /// Does nothing while the network has no local client id. Failures are isolated per entity
    /// and only logged.
    pub fn update<S, N, C>(&mut self, scene: &mut S, network: &N, channel: &mut C, now: Instant)
    where
        S: Scene + ?Sized,
        N: Network + ?Sized,
        C: Channel + ?Sized,
    {
        let Some(local) = network.local_client_id().cloned() else {
            return;
        };

        let _span = tracing::trace_span!("persistence").entered();

        self.poll_in_flight();

        for entity in self
            .constraints
            .update(scene.query(&[Marker::Constraint, Marker::Owned]))
        {
            if scene.exists(entity)
                && scene.has(entity, Marker::Owned)
                && !scene.has(entity, Marker::Constraint)
            {
                scene.insert(entity, Marker::EntityStateDirty);
            }
        }

        for entity in self
            .debouncer
            .retain(|entity| scene.exists(entity) && scene.has(entity, Marker::Owned))
        {
            tracing::debug!("cancelled pending save of {:?}: ownership lost", entity);
        }

        for entity in scene.query(&[Marker::EntityStateDirty, Marker::Owned]) {
            if is_persistable(scene, network, entity) {
                let previous = self.debouncer.trigger(entity, now);
                tracing::trace!("debounce save of {:?} (was {:?})", entity, previous);
            }

            scene.remove(entity, Marker::EntityStateDirty);
        }

        for entity in self.debouncer.advance(now) {
            // The entity may have been unpinned while the job was waiting.
            if !is_persistable(scene, network, entity) {
                tracing::debug!("dropped pending save of {:?}: not persistable", entity);
                continue;
            }

            self.flush(scene, network, channel, &local, entity);
        }

        if self.resync.is_ready(now) {
            self.resync(scene, network, channel, &local);
        }
    }

    fn resync<S, N, C>(&mut self, scene: &mut S, network: &N, channel: &mut C, local: &ClientId)
    where
        S: Scene + ?Sized,
        N: Network + ?Sized,
        C: Channel + ?Sized,
    {
        let scene_root = scene.scene_root();

        for entity in scene.query(&[Marker::Owned]) {
            if Some(entity) == scene_root
                || scene.networked(entity).is_none()
                || !is_persistable(scene, network, entity)
            {
                continue;
            }

            // Covers both a waiting job and a save that is still in flight.
            if self.config.resync_skips_pending && self.job_state(entity) != JobState::Clean {
                continue;
            }

            self.flush(scene, network, channel, local, entity);
        }
    }

    fn flush<S, N, C>(
        &mut self,
        scene: &mut S,
        network: &N,
        channel: &mut C,
        local: &ClientId,
        entity: Entity,
    ) where
        S: Scene + ?Sized,
        N: Network + ?Sized,
        C: Channel + ?Sized,
    {
        match push_save(scene, network, channel, local, entity) {
            Ok((nid, request)) => self.in_flight.push(InFlight::Save {
                entity,
                nid,
                request,
            }),
            Err(err) => tracing::warn!("failed to save {:?}: {}", entity, err),
        }
    }

    fn poll_in_flight(&mut self) {
        let mut cx = Context::from_waker(noop_waker_ref());
        let pending = &mut self.pending;

        self.in_flight
            .retain_mut(|op| op.poll(&mut cx, pending).is_pending());
    }

    /// Saves the state of a single entity.
    pub fn save_entity_state<S, N, C>(
        &mut self,
        scene: &mut S,
        network: &N,
        channel: &mut C,
        entity: Entity,
    ) -> Result<Request, Error>
    where
        S: Scene + ?Sized,
        N: Network + ?Sized,
        C: Channel + ?Sized,
    {
        let local = network.local_client_id().ok_or(Error::NotConnected)?.clone();
        push_save(scene, network, channel, &local, entity).map(|(_, request)| request)
    }

    /// Saves every networked entity in the hierarchy of `root` as an independent record.
    ///
    /// Buffered updates merged into the payloads are consumed once all saves are acknowledged.
    pub fn save_entity_state_hierarchy<S, N, C>(
        &mut self,
        scene: &mut S,
        network: &N,
        channel: &mut C,
        root: Entity,
    ) -> Result<Pending<Vec<Reply>>, Error>
    where
        S: Scene + ?Sized,
        N: Network + ?Sized,
        C: Channel + ?Sized,
    {
        let local = network.local_client_id().ok_or(Error::NotConnected)?.clone();

        let HierarchySave {
            payloads,
            watermark,
        } = payload::save_hierarchy(scene, root, &local, &self.pending)?;

        tracing::debug!("saving entity state hierarchy of {:?}: {} records", root, payloads.len());

        let requests = payloads
            .into_iter()
            .map(|payload| channel.push(Command::SaveEntityState, Payload::Save(payload)))
            .collect();

        Ok(self.track(requests, watermark))
    }

    /// Deletes the saved state of a single entity.
    pub fn delete_entity_state<S, N, C>(
        &mut self,
        scene: &mut S,
        network: &N,
        channel: &mut C,
        entity: Entity,
    ) -> Result<Request, Error>
    where
        S: Scene + ?Sized,
        N: Network + ?Sized,
        C: Channel + ?Sized,
    {
        let local = network.local_client_id().ok_or(Error::NotConnected)?.clone();

        take_ownership(scene, entity, &local)?;
        if network.is_network_instantiated(entity) {
            stamp_creator(scene, entity, &local)?;
        }

        let payload = payload::delete_payload(scene, entity)?;
        tracing::debug!("deleting entity state {}", payload.nid);

        Ok(channel.push(Command::DeleteEntityState, Payload::Delete(payload)))
    }

    /// Deletes all saved state of the hierarchy of `root`.
    ///
    /// The bulk delete for the root and the deletes of every descendant are issued together
    /// without any ordering between them.
    pub fn delete_entity_state_hierarchy<S, N, C>(
        &mut self,
        scene: &mut S,
        network: &N,
        channel: &mut C,
        root: Entity,
    ) -> Result<Pending<Vec<Reply>>, Error>
    where
        S: Scene + ?Sized,
        N: Network + ?Sized,
        C: Channel + ?Sized,
    {
        let local = network.local_client_id().ok_or(Error::NotConnected)?.clone();

        let HierarchyDelete {
            root: root_payload,
            descendants,
            watermark,
        } = payload::delete_hierarchy(scene, root, &local, &self.pending)?;

        tracing::debug!(
            "deleting entity state hierarchy {}: {} descendants",
            root_payload.nid,
            descendants.len()
        );

        let mut requests = Vec::with_capacity(descendants.len() + 1);
        requests.push(channel.push(
            Command::DeleteEntityStatesForRootNid,
            Payload::Delete(root_payload),
        ));
        requests.extend(
            descendants
                .into_iter()
                .map(|payload| channel.push(Command::DeleteEntityState, Payload::Delete(payload))),
        );

        Ok(self.track(requests, watermark))
    }

    pub fn list_entity_states<C>(&self, channel: &mut C) -> Request
    where
        C: Channel + ?Sized,
    {
        channel.push(Command::ListEntityStates, Payload::None)
    }

    fn track(&mut self, requests: Vec<Request>, watermark: Watermark) -> Pending<Vec<Reply>> {
        let (tx, rx) = oneshot::channel();

        self.in_flight.push(InFlight::Operation(Operation {
            future: try_join_all(requests).boxed(),
            watermark,
            tx: Some(tx),
        }));

        Pending { rx }
    }
}

fn is_persistable<S, N>(scene: &S, network: &N, entity: Entity) -> bool
where
    S: Scene + ?Sized,
    N: Network + ?Sized,
{
    scene.has(entity, Marker::Persistable) || network.is_pinned(entity)
}

fn push_save<S, N, C>(
    scene: &mut S,
    network: &N,
    channel: &mut C,
    local: &ClientId,
    entity: Entity,
) -> Result<(NetworkId, Request), Error>
where
    S: Scene + ?Sized,
    N: Network + ?Sized,
    C: Channel + ?Sized,
{
    take_ownership(scene, entity, local)?;
    if network.is_network_instantiated(entity) {
        stamp_creator(scene, entity, &ClientId::server())?;
    }

    let root_nid = scene
        .networked(entity)
        .map(|networked| networked.id.root())
        .ok_or_else(|| Error::InvalidState(format!("{:?} has no network id", entity)))?;

    let payload = payload::save_payload(scene, entity, &root_nid)?;
    let nid = payload.nid.clone();
    tracing::debug!("saving entity state {}", nid);

    Ok((nid, channel.push(Command::SaveEntityState, Payload::Save(payload))))
}

enum InFlight {
    /// A save issued by the scheduler. Only the outcome is logged.
    Save {
        entity: Entity,
        nid: NetworkId,
        request: Request,
    },
    Operation(Operation),
}

struct Operation {
    future: BoxFuture<'static, Result<Vec<Reply>, Error>>,
    watermark: Watermark,
    tx: Option<oneshot::Sender<Result<Vec<Reply>, Error>>>,
}

impl InFlight {
    fn is_save_of(&self, entity: Entity) -> bool {
        matches!(self, Self::Save { entity: e, .. } if *e == entity)
    }

    fn poll(&mut self, cx: &mut Context<'_>, pending: &mut PendingUpdates) -> Poll<()> {
        match self {
            Self::Save { nid, request, .. } => match request.poll_unpin(cx) {
                Poll::Ready(Ok(_)) => {
                    tracing::trace!("saved entity state {}", nid);
                    Poll::Ready(())
                }
                Poll::Ready(Err(err)) => {
                    tracing::warn!("failed to save entity state {}: {}", nid, err);
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
            Self::Operation(op) => match op.future.poll_unpin(cx) {
                Poll::Ready(res) => {
                    if res.is_ok() {
                        let count = pending.consume(&op.watermark);
                        if count != 0 {
                            tracing::debug!("consumed {} buffered updates", count);
                        }
                    }

                    if let Some(tx) = op.tx.take() {
                        let _ = tx.send(res);
                    }

                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl std::fmt::Debug for InFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Save { entity, nid, .. } => f
                .debug_struct("Save")
                .field("entity", entity)
                .field("nid", nid)
                .finish_non_exhaustive(),
            Self::Operation(op) => f
                .debug_struct("Operation")
                .field("watermark", &op.watermark)
                .finish_non_exhaustive(),
        }
    }
}
