use crate::record::{ClusterVariableRecord, ClusterVariableScope};
use std::collections::BTreeMap;

/// Global variables are stored under an empty tenant id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterVariableStore {
    variables: BTreeMap<(ClusterVariableScope, String, String), ClusterVariableRecord>,
}

impl ClusterVariableStore {
    fn id(record: &ClusterVariableRecord) -> (ClusterVariableScope, String, String) {
        let tenant = match record.scope {
            ClusterVariableScope::Global => String::new(),
            ClusterVariableScope::Tenant => record.tenant_id.clone(),
        };
        (record.scope, tenant, record.name.clone())
    }

    /// Looks up the variable identified by the scope, tenant and name of `record`.
    pub fn get(&self, record: &ClusterVariableRecord) -> Option<&ClusterVariableRecord> {
        self.variables.get(&Self::id(record))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub(crate) fn put(&mut self, record: ClusterVariableRecord) {
        self.variables.insert(Self::id(&record), record);
    }

    pub(crate) fn remove(&mut self, record: &ClusterVariableRecord) {
        self.variables.remove(&Self::id(record));
    }
}
