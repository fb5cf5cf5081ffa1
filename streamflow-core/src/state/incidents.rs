use crate::record::IncidentRecord;
use crate::types::{Key, NO_KEY};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentStore {
    incidents: BTreeMap<Key, IncidentRecord>,
    by_element: BTreeMap<Key, BTreeSet<Key>>,
    by_job: BTreeMap<Key, Key>,
}

impl IncidentStore {
    pub fn get(&self, key: Key) -> Option<&IncidentRecord> {
        self.incidents.get(&key)
    }

    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    pub fn of_element(&self, element_instance_key: Key) -> Vec<Key> {
        self.by_element
            .get(&element_instance_key)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn of_job(&self, job_key: Key) -> Option<Key> {
        self.by_job.get(&job_key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &IncidentRecord)> {
        self.incidents.iter()
    }

    pub(crate) fn put(&mut self, key: Key, incident: IncidentRecord) {
        self.remove(key);
        if incident.job_key != NO_KEY {
            self.by_job.insert(incident.job_key, key);
        }
        if incident.element_instance_key != NO_KEY {
            self.by_element
                .entry(incident.element_instance_key)
                .or_default()
                .insert(key);
        }
        self.incidents.insert(key, incident);
    }

    pub(crate) fn remove(&mut self, key: Key) -> Option<IncidentRecord> {
        let incident = self.incidents.remove(&key)?;
        self.by_job.remove(&incident.job_key);
        if let Some(keys) = self.by_element.get_mut(&incident.element_instance_key) {
            keys.remove(&key);
        }
        Some(incident)
    }
}
