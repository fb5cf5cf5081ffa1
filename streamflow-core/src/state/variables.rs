use crate::types::Key;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredVariable {
    pub key: Key,
    pub value: Value,
}

/// Variables by scope (element instance key) and name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableStore {
    by_scope: BTreeMap<Key, BTreeMap<String, StoredVariable>>,
}

impl VariableStore {
    pub fn get(&self, scope_key: Key, name: &str) -> Option<&StoredVariable> {
        self.by_scope.get(&scope_key).and_then(|vars| vars.get(name))
    }

    pub fn scope(&self, scope_key: Key) -> impl Iterator<Item = (&String, &StoredVariable)> {
        self.by_scope.get(&scope_key).into_iter().flat_map(|vars| vars.iter())
    }

    pub(crate) fn set(&mut self, scope_key: Key, name: String, key: Key, value: Value) {
        self.by_scope
            .entry(scope_key)
            .or_default()
            .insert(name, StoredVariable { key, value });
    }

    pub(crate) fn remove_scope(&mut self, scope_key: Key) {
        self.by_scope.remove(&scope_key);
    }
}
