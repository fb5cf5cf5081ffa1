use crate::record::TimerRecord;
use crate::types::{Key, Timestamp, NO_KEY};
use std::collections::{BTreeMap, BTreeSet};

/// Pending timers, indexed by due date, element instance and (for start
/// events) process definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerStore {
    timers: BTreeMap<Key, TimerRecord>,
    due: BTreeSet<(Timestamp, Key)>,
    by_element: BTreeMap<Key, BTreeSet<Key>>,
    start_timers: BTreeMap<Key, BTreeSet<Key>>,
}

impl TimerStore {
    pub fn get(&self, key: Key) -> Option<&TimerRecord> {
        self.timers.get(&key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Timers due at or before `now`, in due-date order.
    pub fn due_until(&self, now: Timestamp) -> Vec<Key> {
        self.due
            .iter()
            .take_while(|(due, _)| *due <= now)
            .map(|(_, key)| *key)
            .collect()
    }

    pub fn next_due(&self) -> Option<Timestamp> {
        self.due.first().map(|(due, _)| *due)
    }

    pub fn of_element(&self, element_instance_key: Key) -> Vec<(Key, &TimerRecord)> {
        self.by_element
            .get(&element_instance_key)
            .into_iter()
            .flatten()
            .filter_map(|key| self.timers.get(key).map(|timer| (*key, timer)))
            .collect()
    }

    pub fn start_timers_of(&self, process_definition_key: Key) -> Vec<(Key, &TimerRecord)> {
        self.start_timers
            .get(&process_definition_key)
            .into_iter()
            .flatten()
            .filter_map(|key| self.timers.get(key).map(|timer| (*key, timer)))
            .collect()
    }

    pub(crate) fn put(&mut self, key: Key, timer: TimerRecord) {
        self.remove(key);
        self.due.insert((timer.due_date, key));
        if timer.element_instance_key == NO_KEY {
            self.start_timers
                .entry(timer.process_definition_key)
                .or_default()
                .insert(key);
        } else {
            self.by_element
                .entry(timer.element_instance_key)
                .or_default()
                .insert(key);
        }
        self.timers.insert(key, timer);
    }

    pub(crate) fn remove(&mut self, key: Key) -> Option<TimerRecord> {
        let timer = self.timers.remove(&key)?;
        self.due.remove(&(timer.due_date, key));
        let index = if timer.element_instance_key == NO_KEY {
            self.start_timers.get_mut(&timer.process_definition_key)
        } else {
            self.by_element.get_mut(&timer.element_instance_key)
        };
        if let Some(keys) = index {
            keys.remove(&key);
        }
        Some(timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_timers_in_due_date_order() {
        let mut store = TimerStore::default();
        for (key, due) in [(1, 300), (2, 100), (3, 200)] {
            store.put(
                key,
                TimerRecord {
                    element_instance_key: 9,
                    due_date: due,
                    ..Default::default()
                },
            );
        }
        assert_eq!(store.due_until(250), vec![2, 3]);
        assert_eq!(store.of_element(9).len(), 3);
        store.remove(2);
        assert_eq!(store.due_until(250), vec![3]);
    }

    #[test]
    fn start_timers_are_indexed_by_definition() {
        let mut store = TimerStore::default();
        store.put(
            5,
            TimerRecord {
                process_definition_key: 42,
                due_date: 10,
                ..Default::default()
            },
        );
        assert_eq!(store.start_timers_of(42).len(), 1);
        assert!(store.of_element(NO_KEY).is_empty());
    }
}
