//! Save scheduling
//!
//! Every dirty entity gets at most one debounce job. A job waits for a quiet period of
//! `save_delay` after the last change, but never longer than `max_save_delay` after the first
//! one, so an entity that keeps changing is still saved regularly.

use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};

use crate::entity::Entity;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum JobState {
    Clean,
    PendingDebounce,
    /// The save was issued and its acknowledgement was not observed yet.
    Saving,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DebounceJob {
    /// Earliest time of the save, moved on every change.
    pub deadline: Instant,
    /// Latest time of the save, fixed when the job starts.
    pub ceiling: Instant,
}

impl DebounceJob {
    #[inline]
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.deadline || now >= self.ceiling
    }
}

#[derive(Clone, Debug)]
pub struct Debouncer {
    jobs: IndexMap<Entity, DebounceJob>,
    save_delay: Duration,
    max_save_delay: Duration,
}

impl Debouncer {
    pub fn new(save_delay: Duration, max_save_delay: Duration) -> Self {
        debug_assert!(save_delay < max_save_delay);

        Self {
            jobs: IndexMap::new(),
            save_delay,
            max_save_delay,
        }
    }

    /// Starts a job for `entity` or extends the deadline of the running one.
    ///
    /// Returns the state of the entity before the call.
    pub fn trigger(&mut self, entity: Entity, now: Instant) -> JobState {
        let deadline = now + self.save_delay;

        match self.jobs.get_mut(&entity) {
            Some(job) => {
                job.deadline = deadline;
                JobState::PendingDebounce
            }
            None => {
                self.jobs.insert(
                    entity,
                    DebounceJob {
                        deadline,
                        ceiling: now + self.max_save_delay,
                    },
                );
                JobState::Clean
            }
        }
    }

    pub fn cancel(&mut self, entity: Entity) -> bool {
        self.jobs.shift_remove(&entity).is_some()
    }

    /// Cancels all jobs for which `f` returns `false`, returning the cancelled entities.
    pub fn retain<F>(&mut self, mut f: F) -> Vec<Entity>
    where
        F: FnMut(Entity) -> bool,
    {
        let mut cancelled = Vec::new();
        self.jobs.retain(|entity, _| {
            let keep = f(*entity);
            if !keep {
                cancelled.push(*entity);
            }
            keep
        });
        cancelled
    }

    /// Advances every job by one tick.
    ///
    /// Jobs that are due are removed and returned in the order they were started. Every returned
    /// entity must be saved exactly once.
    pub fn advance(&mut self, now: Instant) -> Vec<Entity> {
        let mut due = Vec::new();
        self.jobs.retain(|entity, job| {
            if job.is_due(now) {
                due.push(*entity);
                false
            } else {
                true
            }
        });
        due
    }

    pub fn state(&self, entity: Entity) -> JobState {
        if self.jobs.contains_key(&entity) {
            JobState::PendingDebounce
        } else {
            JobState::Clean
        }
    }

    pub fn get(&self, entity: Entity) -> Option<&DebounceJob> {
        self.jobs.get(&entity)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }
}

/// Reports entities leaving a query between two ticks.
#[derive(Clone, Debug, Default)]
pub struct QueryExits {
    previous: IndexSet<Entity>,
}

impl QueryExits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the tracked query result with `current` and returns all entities that were
    /// present in the previous result but not in `current`.
    pub fn update<I>(&mut self, current: I) -> Vec<Entity>
    where
        I: IntoIterator<Item = Entity>,
    {
        let current: IndexSet<Entity> = current.into_iter().collect();
        let exits = self.previous.difference(&current).copied().collect();
        self.previous = current;
        exits
    }

    pub fn clear(&mut self) {
        self.previous.clear();
    }
}
