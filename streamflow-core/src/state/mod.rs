//! Partition state.
//!
//! Everything a partition knows is derived from its log: event appliers are
//! the only code that mutates these stores, both during live processing and
//! during replay. All maps are ordered so that iteration, and therefore
//! processing, is deterministic.

mod appliers;
mod cluster_variables;
mod deployments;
mod elements;
mod identity;
mod incidents;
mod jobs;
mod messages;
mod signals;
mod timers;
mod triggers;
mod variables;

pub use appliers::EventAppliers;
pub use cluster_variables::ClusterVariableStore;
pub use deployments::{DeployedDecision, DeployedForm, DeployedProcess, DeploymentStore};
pub use elements::{ElementInstance, ElementInstanceStore};
pub use identity::{GroupEntry, IdentityStore, Member, TenantEntry};
pub use incidents::IncidentStore;
pub use jobs::{JobEntry, JobStore};
pub use messages::{
    MessageStartSubscriptionStore, MessageStore, MessageSubscriptionStore,
    ProcessMessageSubscriptionStore,
};
pub use signals::SignalSubscriptionStore;
pub use timers::TimerStore;
pub use triggers::{EventTrigger, EventTriggerStore};
pub use variables::{StoredVariable, VariableStore};

use crate::model::{ElementDef, ProcessModel, VariableScope};
use crate::record::Variables;
use crate::types::{Key, KeyGenerator, PartitionId, NO_KEY};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingState {
    pub keys: KeyGenerator,
    pub elements: ElementInstanceStore,
    pub variables: VariableStore,
    pub jobs: JobStore,
    pub timers: TimerStore,
    pub incidents: IncidentStore,
    pub deployments: DeploymentStore,
    pub signals: SignalSubscriptionStore,
    pub messages: MessageStore,
    pub message_subscriptions: MessageSubscriptionStore,
    pub process_message_subscriptions: ProcessMessageSubscriptionStore,
    pub message_start_subscriptions: MessageStartSubscriptionStore,
    pub triggers: EventTriggerStore,
    pub cluster_variables: ClusterVariableStore,
    pub identity: IdentityStore,
}

impl ProcessingState {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            keys: KeyGenerator::new(partition_id),
            elements: ElementInstanceStore::default(),
            variables: VariableStore::default(),
            jobs: JobStore::default(),
            timers: TimerStore::default(),
            incidents: IncidentStore::default(),
            deployments: DeploymentStore::default(),
            signals: SignalSubscriptionStore::default(),
            messages: MessageStore::default(),
            message_subscriptions: MessageSubscriptionStore::default(),
            process_message_subscriptions: ProcessMessageSubscriptionStore::default(),
            message_start_subscriptions: MessageStartSubscriptionStore::default(),
            triggers: EventTriggerStore::default(),
            cluster_variables: ClusterVariableStore::default(),
            identity: IdentityStore::default(),
        }
    }

    pub fn process_model(&self, process_definition_key: Key) -> Option<&Arc<ProcessModel>> {
        self.deployments
            .process(process_definition_key)
            .map(|process| &process.model)
    }

    /// Definition of the element an instance runs.
    pub fn element_def(&self, instance: &ElementInstance) -> Option<&ElementDef> {
        self.process_model(instance.value.process_definition_key)
            .and_then(|model| model.element(&instance.value.element_id))
    }

    /// `scope_key` followed by its enclosing flow scopes up to the process
    /// instance. Never crosses into a calling process instance.
    pub fn scope_chain(&self, scope_key: Key) -> Vec<Key> {
        let mut chain = Vec::new();
        let mut current = scope_key;
        while current != NO_KEY {
            chain.push(current);
            current = match self.elements.get(current) {
                Some(instance) => instance.value.flow_scope_key,
                None => NO_KEY,
            };
        }
        chain
    }

    /// Nearest definition of `name` visible from `scope_key`.
    pub fn find_variable(&self, scope_key: Key, name: &str) -> Option<(Key, &StoredVariable)> {
        self.scope_chain(scope_key)
            .into_iter()
            .find_map(|scope| self.variables.get(scope, name).map(|var| (scope, var)))
    }

    /// All variables visible from `scope_key`; inner scopes shadow outer ones.
    pub fn visible_variables(&self, scope_key: Key) -> Variables {
        let mut out = Variables::new();
        for scope in self.scope_chain(scope_key).into_iter().rev() {
            for (name, var) in self.variables.scope(scope) {
                out.insert(name.clone(), var.value.clone());
            }
        }
        out
    }

    pub fn local_variables(&self, scope_key: Key) -> Variables {
        self.variables
            .scope(scope_key)
            .map(|(name, var)| (name.clone(), var.value.clone()))
            .collect()
    }

    pub fn scope(&self, scope_key: Key) -> ScopeView<'_> {
        ScopeView {
            state: self,
            scope_key,
        }
    }
}

/// Read-only variable view used by expression evaluation.
pub struct ScopeView<'a> {
    state: &'a ProcessingState,
    scope_key: Key,
}

impl VariableScope for ScopeView<'_> {
    fn variable(&self, name: &str) -> Option<Value> {
        self.state
            .find_variable(self.scope_key, name)
            .map(|(_, var)| var.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ProcessInstanceRecord;
    use serde_json::json;

    fn scoped(key: Key, scope: Key) -> ElementInstance {
        ElementInstance::new(
            key,
            ProcessInstanceRecord {
                flow_scope_key: scope,
                process_instance_key: 1,
                ..Default::default()
            },
        )
    }

    #[test]
    fn inner_scopes_shadow_outer_ones() {
        let mut state = ProcessingState::new(1);
        state.elements.insert(scoped(1, NO_KEY));
        state.elements.insert(scoped(2, 1));
        state.variables.set(1, "x".to_string(), 10, json!(1));
        state.variables.set(1, "y".to_string(), 11, json!("outer"));
        state.variables.set(2, "y".to_string(), 12, json!("inner"));

        assert_eq!(state.scope_chain(2), vec![2, 1]);
        let visible = state.visible_variables(2);
        assert_eq!(visible.get("x"), Some(&json!(1)));
        assert_eq!(visible.get("y"), Some(&json!("inner")));
        assert_eq!(state.find_variable(2, "x").map(|(scope, _)| scope), Some(1));
        assert_eq!(state.scope(1).variable("y"), Some(json!("outer")));
        assert!(state.local_variables(2).contains_key("y"));
        assert!(!state.local_variables(2).contains_key("x"));
    }
}
