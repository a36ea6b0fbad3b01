//! Pending updates
//!
//! Peers may send updates for entities that can't be resolved locally yet, e.g. because their
//! media is still loading or failed to load. Those updates are still valid state and are buffered
//! here until the entity resolves, or until a save of its hierarchy consumes them.

use indexmap::IndexMap;

use crate::entity::NetworkId;
use crate::message::{BufferedUpdate, StorableUpdate};

#[derive(Clone, Debug)]
struct Entry {
    seq: u64,
    update: BufferedUpdate,
}

#[derive(Clone, Debug, Default)]
pub struct PendingUpdates {
    entities: IndexMap<NetworkId, Vec<Entry>>,
    next_seq: u64,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T>(&mut self, update: T)
    where
        T: Into<BufferedUpdate>,
    {
        let update = update.into();
        let seq = self.next_seq;
        self.next_seq += 1;

        self.entities
            .entry(update.nid().clone())
            .or_default()
            .push(Entry { seq, update });
    }

    /// Removes all updates for `nid`, e.g. once the entity resolved and they can be applied.
    pub fn remove(&mut self, nid: &NetworkId) -> Option<Vec<BufferedUpdate>> {
        self.entities
            .shift_remove(nid)
            .map(|entries| entries.into_iter().map(|e| e.update).collect())
    }

    pub fn get(&self, nid: &NetworkId) -> impl Iterator<Item = &BufferedUpdate> + '_ {
        self.entities
            .get(nid)
            .into_iter()
            .flat_map(|entries| entries.iter().map(|e| &e.update))
    }

    /// Returns the number of buffered updates.
    pub fn len(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    /// Returns all storable updates within the hierarchy of `root` in arrival order per entity.
    ///
    /// Cursor telemetry is skipped.
    pub fn storable_within<'a>(
        &'a self,
        root: &'a NetworkId,
    ) -> impl Iterator<Item = &'a StorableUpdate> + 'a {
        self.entities
            .iter()
            .filter(move |(nid, _)| nid.is_within(root))
            .flat_map(|(_, entries)| entries.iter())
            .filter_map(|entry| entry.update.as_storable())
    }

    /// Records the storable updates currently buffered within the hierarchy of `root`.
    ///
    /// Passing the [`Watermark`] to [`consume`] later removes exactly those updates, even if
    /// more updates arrived in between.
    ///
    /// [`consume`]: Self::consume
    pub fn watermark(&self, root: &NetworkId) -> Watermark {
        self.watermark_where(|nid| nid.is_within(root))
    }

    pub(crate) fn watermark_where<F>(&self, mut f: F) -> Watermark
    where
        F: FnMut(&NetworkId) -> bool,
    {
        let entries = self
            .entities
            .iter()
            .filter(|(nid, _)| f(nid))
            .filter_map(|(nid, entries)| {
                entries
                    .iter()
                    .filter(|e| !e.update.is_cursor_buffer())
                    .map(|e| e.seq)
                    .max()
                    .map(|seq| (nid.clone(), seq))
            })
            .collect();

        Watermark { entries }
    }

    /// Removes the storable updates recorded by `watermark`.
    pub fn consume(&mut self, watermark: &Watermark) -> usize {
        let mut count = 0;

        for (nid, seq) in &watermark.entries {
            let Some(entries) = self.entities.get_mut(nid) else {
                continue;
            };

            let len = entries.len();
            entries.retain(|e| e.update.is_cursor_buffer() || e.seq > *seq);
            count += len - entries.len();

            if entries.is_empty() {
                self.entities.shift_remove(nid);
            }
        }

        count
    }
}

/// A set of buffered updates merged into an outgoing operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Watermark {
    entries: Vec<(NetworkId, u64)>,
}

impl Watermark {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
