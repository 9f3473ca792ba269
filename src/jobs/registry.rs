//! In-memory job registry.

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

use super::types::{JobId, JobRecord, JobState, JobStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("unknown job {0}")]
    Unknown(JobId),
    #[error("job {id} is already {state}")]
    Terminal { id: JobId, state: JobState },
    #[error("job {id} cannot move from {from} to {to}")]
    Illegal { id: JobId, from: JobState, to: JobState },
}

/// Concurrent map from job id to its current record.
///
/// Writers to the same id are serialized by the map's shard lock; records are
/// replaced whole, so readers never see half an update. Every applied change
/// is published on a broadcast channel.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: DashMap<JobId, JobRecord>,
    changes: broadcast::Sender<JobRecord>,
}

impl JobRegistry {
    pub fn new(event_buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(event_buffer.max(1));
        Self {
            jobs: DashMap::new(),
            changes,
        }
    }

    pub fn put(&self, record: JobRecord) {
        self.jobs.insert(record.id, record.clone());
        self.publish(record);
    }

    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.get(id).map(|r| r.value().clone())
    }

    /// Replaces an existing record unconditionally. Returns `false` for an
    /// unknown id. State-machine moves should go through [`transition`].
    ///
    /// [`transition`]: JobRegistry::transition
    pub fn update(&self, record: JobRecord) -> bool {
        match self.jobs.get_mut(&record.id) {
            Some(mut slot) => {
                *slot = record.clone();
                self.publish(record);
                true
            }
            None => false,
        }
    }

    /// Moves a job to `next` if the state machine allows it.
    ///
    /// The check, the write and the publish happen under the same lock, so of
    /// two racing terminal writes exactly one is applied and subscribers see
    /// a job's changes in the order they were made.
    pub fn transition(&self, id: &JobId, next: JobStatus) -> Result<JobRecord, TransitionError> {
        let mut slot = self.jobs.get_mut(id).ok_or(TransitionError::Unknown(*id))?;
        let from = slot.state();
        let to = next.state();
        if from.is_terminal() {
            return Err(TransitionError::Terminal { id: *id, state: from });
        }
        if !from.can_transition_to(to) {
            return Err(TransitionError::Illegal { id: *id, from, to });
        }
        let updated = slot.with_status(next);
        *slot = updated.clone();
        self.publish(updated.clone());
        Ok(updated)
    }

    pub fn remove(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.remove(id).map(|(_, r)| r)
    }

    /// Snapshot of all records, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut all: Vec<JobRecord> = self.jobs.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobRecord> {
        self.changes.subscribe()
    }

    fn publish(&self, record: JobRecord) {
        // No subscribers is fine.
        let _ = self.changes.send(record);
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}
