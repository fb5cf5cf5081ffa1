use crate::job::lifecycle::JobState;
use crate::record::JobRecord;
use crate::types::{Key, Timestamp};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct JobEntry {
    pub key: Key,
    pub state: JobState,
    pub record: JobRecord,
    /// When the job last became activatable; orders activation FIFO.
    pub activatable_since: Timestamp,
}

/// Jobs with secondary indexes for activation, deadlines and backoff.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobStore {
    jobs: BTreeMap<Key, JobEntry>,
    /// (job type, activatable since, key)
    activatable: BTreeSet<(String, Timestamp, Key)>,
    deadlines: BTreeSet<(Timestamp, Key)>,
    backoffs: BTreeSet<(Timestamp, Key)>,
}

impl JobStore {
    pub fn get(&self, key: Key) -> Option<&JobEntry> {
        self.jobs.get(&key)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Activatable jobs of `job_type`, oldest eligible first, ties by key.
    pub fn activatable_of<'a>(&'a self, job_type: &'a str) -> impl Iterator<Item = &'a JobEntry> + 'a {
        self.activatable
            .range((job_type.to_string(), Timestamp::MIN, Key::MIN)..)
            .take_while(move |(t, _, _)| t == job_type)
            .filter_map(|(_, _, key)| self.jobs.get(key))
    }

    /// Activated jobs whose deadline is at or before `now`.
    pub fn deadlines_until(&self, now: Timestamp) -> Vec<Key> {
        self.deadlines
            .iter()
            .take_while(|(deadline, _)| *deadline <= now)
            .map(|(_, key)| *key)
            .collect()
    }

    /// Failed jobs whose retry backoff has elapsed at `now`.
    pub fn backoffs_until(&self, now: Timestamp) -> Vec<Key> {
        self.backoffs
            .iter()
            .take_while(|(due, _)| *due <= now)
            .map(|(_, key)| *key)
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    pub fn next_backoff(&self) -> Option<Timestamp> {
        self.backoffs.first().map(|(due, _)| *due)
    }

    /// Inserts or replaces a job and rebuilds its index entries.
    pub(crate) fn put(&mut self, entry: JobEntry) {
        self.unindex(entry.key);
        match entry.state {
            JobState::Activatable => {
                self.activatable.insert((
                    entry.record.job_type.clone(),
                    entry.activatable_since,
                    entry.key,
                ));
            }
            JobState::Activated => {
                self.deadlines.insert((entry.record.deadline, entry.key));
            }
            JobState::Failed if entry.record.retries > 0 && entry.record.recurring_time >= 0 => {
                self.backoffs.insert((entry.record.recurring_time, entry.key));
            }
            JobState::Failed | JobState::ErrorThrown => {}
        }
        self.jobs.insert(entry.key, entry);
    }

    pub(crate) fn remove(&mut self, key: Key) -> Option<JobEntry> {
        self.unindex(key);
        self.jobs.remove(&key)
    }

    fn unindex(&mut self, key: Key) {
        if let Some(existing) = self.jobs.get(&key) {
            self.activatable.remove(&(
                existing.record.job_type.clone(),
                existing.activatable_since,
                key,
            ));
            self.deadlines.remove(&(existing.record.deadline, key));
            self.backoffs.remove(&(existing.record.recurring_time, key));
        }
    }
}
