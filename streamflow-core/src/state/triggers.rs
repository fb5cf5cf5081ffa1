use crate::record::Variables;
use crate::types::Key;
use std::collections::BTreeMap;

/// An event waiting to be consumed by an element instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTrigger {
    pub key: Key,
    pub target_element_id: String,
    pub variables: Variables,
    pub interrupting: bool,
}

/// Pending triggers per consuming element instance, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTriggerStore {
    triggers: BTreeMap<Key, Vec<EventTrigger>>,
}

impl EventTriggerStore {
    pub fn peek(&self, scope_key: Key) -> Option<&EventTrigger> {
        self.triggers.get(&scope_key).and_then(|t| t.first())
    }

    pub fn has_interrupting(&self, scope_key: Key) -> bool {
        self.triggers
            .get(&scope_key)
            .is_some_and(|t| t.iter().any(|trigger| trigger.interrupting))
    }

    pub fn interrupting(&self, scope_key: Key) -> Option<&EventTrigger> {
        self.triggers
            .get(&scope_key)
            .and_then(|t| t.iter().find(|trigger| trigger.interrupting))
    }

    pub fn has_any(&self, scope_key: Key) -> bool {
        self.triggers.get(&scope_key).is_some_and(|t| !t.is_empty())
    }

    pub(crate) fn push(&mut self, scope_key: Key, trigger: EventTrigger) {
        self.triggers.entry(scope_key).or_default().push(trigger);
    }

    pub(crate) fn remove(&mut self, scope_key: Key, trigger_key: Key) {
        if let Some(pending) = self.triggers.get_mut(&scope_key) {
            pending.retain(|trigger| trigger.key != trigger_key);
            if pending.is_empty() {
                self.triggers.remove(&scope_key);
            }
        }
    }

    pub(crate) fn clear(&mut self, scope_key: Key) {
        self.triggers.remove(&scope_key);
    }
}
