use crate::bpmn::lifecycle::ElementState;
use crate::record::ProcessInstanceRecord;
use crate::types::{Key, NO_KEY};
use std::collections::{BTreeMap, BTreeSet};

/// Runtime occurrence of one BPMN element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementInstance {
    pub key: Key,
    pub state: ElementState,
    pub value: ProcessInstanceRecord,
    /// Children that are neither completed nor terminated.
    pub active_children: u32,
    /// Sequence-flow tokens waiting inside this scope, by target element id
    /// and flow id.
    pub taken_flows: BTreeMap<String, BTreeMap<String, u32>>,
    pub job_key: Key,
    /// Root of the process instance created by this call activity.
    pub called_child_key: Key,
    /// Execution listener jobs of this element that have completed.
    pub completed_listeners: u32,
    /// Task listener jobs completed since the user task's job was last
    /// created.
    pub completed_task_listeners: u32,
    /// Ad-hoc sub-process asked to complete once its children are done.
    pub completion_requested: bool,
}

impl ElementInstance {
    pub fn new(key: Key, value: ProcessInstanceRecord) -> Self {
        Self {
            key,
            state: ElementState::Activating,
            value,
            active_children: 0,
            taken_flows: BTreeMap::new(),
            job_key: NO_KEY,
            called_child_key: NO_KEY,
            completed_listeners: 0,
            completed_task_listeners: 0,
            completion_requested: false,
        }
    }

    pub fn element_id(&self) -> &str {
        &self.value.element_id
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn pending_tokens(&self) -> u32 {
        self.taken_flows.values().flat_map(|flows| flows.values()).sum()
    }

    pub fn tokens_for(&self, target_id: &str) -> Option<&BTreeMap<String, u32>> {
        self.taken_flows.get(target_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementInstanceStore {
    instances: BTreeMap<Key, ElementInstance>,
    children: BTreeMap<Key, BTreeSet<Key>>,
    /// Process instances that completed or terminated since the last
    /// eviction.
    finished: Vec<Key>,
}

impl ElementInstanceStore {
    pub fn get(&self, key: Key) -> Option<&ElementInstance> {
        self.instances.get(&key)
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut ElementInstance> {
        self.instances.get_mut(&key)
    }

    pub(crate) fn insert(&mut self, instance: ElementInstance) {
        let scope = instance.value.flow_scope_key;
        if scope != NO_KEY {
            self.children.entry(scope).or_default().insert(instance.key);
        }
        self.instances.insert(instance.key, instance);
    }

    pub(crate) fn mark_finished(&mut self, root_key: Key) {
        self.finished.push(root_key);
    }

    /// Drops finished process instances with every element below them.
    /// Returns the number of removed rows.
    pub(crate) fn evict_finished(&mut self) -> usize {
        let mut removed = 0;
        for root in std::mem::take(&mut self.finished) {
            let mut queue = vec![root];
            while let Some(key) = queue.pop() {
                if self.instances.remove(&key).is_some() {
                    removed += 1;
                }
                if let Some(children) = self.children.remove(&key) {
                    queue.extend(children);
                }
            }
        }
        removed
    }

    /// All children of a scope in key order, including finished ones.
    pub fn children(&self, scope_key: Key) -> impl Iterator<Item = &ElementInstance> {
        self.children
            .get(&scope_key)
            .into_iter()
            .flat_map(|keys| keys.iter())
            .filter_map(|key| self.instances.get(key))
    }

    pub fn active_children(&self, scope_key: Key) -> Vec<&ElementInstance> {
        self.children(scope_key).filter(|child| child.is_active()).collect()
    }

    /// Active element instances of one process instance below its root,
    /// parents before children.
    pub fn active_descendants(&self, root_key: Key) -> Vec<&ElementInstance> {
        let mut out = Vec::new();
        let mut queue = vec![root_key];
        while let Some(scope) = queue.pop() {
            for child in self.active_children(scope) {
                out.push(child);
                queue.push(child.key);
            }
        }
        out.sort_by_key(|instance| instance.key);
        out
    }

    pub fn active_instances_of(&self, process_instance_key: Key, element_id: &str) -> Vec<&ElementInstance> {
        self.active_descendants(process_instance_key)
            .into_iter()
            .filter(|instance| instance.element_id() == element_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(key: Key, scope: Key, element_id: &str) -> ElementInstance {
        ElementInstance::new(
            key,
            ProcessInstanceRecord {
                element_id: element_id.to_string(),
                flow_scope_key: scope,
                process_instance_key: 1,
                ..Default::default()
            },
        )
    }

    #[test]
    fn descendants_skip_finished_instances() {
        let mut store = ElementInstanceStore::default();
        store.insert(instance(1, NO_KEY, "process"));
        store.insert(instance(2, 1, "sub"));
        store.insert(instance(3, 2, "task"));
        store.insert(instance(4, 1, "done"));
        if let Some(done) = store.get_mut(4) {
            done.state = ElementState::Completed;
        }

        let keys: Vec<Key> = store.active_descendants(1).iter().map(|i| i.key).collect();
        assert_eq!(keys, vec![2, 3]);
        assert_eq!(store.active_instances_of(1, "task").len(), 1);
        assert_eq!(store.children(1).count(), 2);
    }

    #[test]
    fn eviction_drops_whole_finished_instances() {
        let mut store = ElementInstanceStore::default();
        store.insert(instance(1, NO_KEY, "process"));
        store.insert(instance(2, 1, "sub"));
        store.insert(instance(3, 2, "task"));
        store.insert(instance(10, NO_KEY, "other"));
        assert_eq!(store.evict_finished(), 0);

        store.mark_finished(1);
        assert_eq!(store.evict_finished(), 3);
        assert!(store.get(3).is_none());
        assert_eq!(store.children(1).count(), 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.evict_finished(), 0);
    }

    #[test]
    fn counts_pending_tokens() {
        let mut scope = instance(1, NO_KEY, "process");
        scope
            .taken_flows
            .entry("join".to_string())
            .or_default()
            .insert("a-join".to_string(), 2);
        assert_eq!(scope.pending_tokens(), 2);
        assert!(scope.tokens_for("join").is_some());
    }
}
