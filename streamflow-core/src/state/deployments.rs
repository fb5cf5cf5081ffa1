use crate::model::{DecisionModel, FormModel, ProcessModel};
use crate::types::Key;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct DeployedProcess {
    pub key: Key,
    pub bpmn_process_id: String,
    pub version: i32,
    pub tenant_id: String,
    pub resource_name: String,
    pub resource: String,
    pub checksum: String,
    pub model: Arc<ProcessModel>,
    /// Deleted definitions stay readable for instances still running them.
    pub deleted: bool,
}

// The model is derived from `resource`, so comparing it adds nothing.
impl PartialEq for DeployedProcess {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.bpmn_process_id == other.bpmn_process_id
            && self.version == other.version
            && self.tenant_id == other.tenant_id
            && self.resource_name == other.resource_name
            && self.checksum == other.checksum
            && self.deleted == other.deleted
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployedDecision {
    pub key: Key,
    pub decision_id: String,
    pub decision_name: String,
    pub version: i32,
    pub tenant_id: String,
    pub resource_name: String,
    pub resource: String,
    pub checksum: String,
    pub model: Arc<DecisionModel>,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployedForm {
    pub key: Key,
    pub form_id: String,
    pub version: i32,
    pub tenant_id: String,
    pub resource_name: String,
    pub resource: String,
    pub checksum: String,
    pub model: FormModel,
    pub deleted: bool,
}

/// Live versions per `(tenant, id)` plus the highest version ever issued,
/// so that versions are never reused after a deletion.
#[derive(Debug, Clone, Default, PartialEq)]
struct VersionIndex {
    live: BTreeMap<(String, String), BTreeMap<i32, Key>>,
    highest: BTreeMap<(String, String), i32>,
}

impl VersionIndex {
    fn id(tenant_id: &str, id: &str) -> (String, String) {
        (tenant_id.to_string(), id.to_string())
    }

    fn latest(&self, tenant_id: &str, id: &str) -> Option<Key> {
        self.live
            .get(&Self::id(tenant_id, id))
            .and_then(|versions| versions.values().next_back().copied())
    }

    fn version(&self, tenant_id: &str, id: &str, version: i32) -> Option<Key> {
        self.live
            .get(&Self::id(tenant_id, id))
            .and_then(|versions| versions.get(&version).copied())
    }

    fn next_version(&self, tenant_id: &str, id: &str) -> i32 {
        self.highest.get(&Self::id(tenant_id, id)).copied().unwrap_or(0) + 1
    }

    fn insert(&mut self, tenant_id: &str, id: &str, version: i32, key: Key) {
        let name = Self::id(tenant_id, id);
        self.live.entry(name.clone()).or_default().insert(version, key);
        let highest = self.highest.entry(name).or_insert(0);
        *highest = (*highest).max(version);
    }

    fn remove(&mut self, tenant_id: &str, id: &str, version: i32) {
        if let Some(versions) = self.live.get_mut(&Self::id(tenant_id, id)) {
            versions.remove(&version);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentStore {
    deployments: BTreeSet<Key>,
    processes: BTreeMap<Key, DeployedProcess>,
    process_versions: VersionIndex,
    decisions: BTreeMap<Key, DeployedDecision>,
    decision_versions: VersionIndex,
    forms: BTreeMap<Key, DeployedForm>,
    form_versions: VersionIndex,
}

impl DeploymentStore {
    // ── Deployments ──

    pub fn has_deployment(&self, key: Key) -> bool {
        self.deployments.contains(&key)
    }

    pub(crate) fn put_deployment(&mut self, key: Key) {
        self.deployments.insert(key);
    }

    // ── Processes ──

    pub fn process(&self, key: Key) -> Option<&DeployedProcess> {
        self.processes.get(&key)
    }

    pub fn latest_process(&self, tenant_id: &str, bpmn_process_id: &str) -> Option<&DeployedProcess> {
        self.process_versions
            .latest(tenant_id, bpmn_process_id)
            .and_then(|key| self.processes.get(&key))
    }

    pub fn process_version(
        &self,
        tenant_id: &str,
        bpmn_process_id: &str,
        version: i32,
    ) -> Option<&DeployedProcess> {
        self.process_versions
            .version(tenant_id, bpmn_process_id, version)
            .and_then(|key| self.processes.get(&key))
    }

    pub fn next_process_version(&self, tenant_id: &str, bpmn_process_id: &str) -> i32 {
        self.process_versions.next_version(tenant_id, bpmn_process_id)
    }

    pub(crate) fn put_process(&mut self, process: DeployedProcess) {
        self.process_versions
            .insert(&process.tenant_id, &process.bpmn_process_id, process.version, process.key);
        self.processes.insert(process.key, process);
    }

    pub(crate) fn delete_process(&mut self, key: Key) {
        if let Some(process) = self.processes.get_mut(&key) {
            process.deleted = true;
            self.process_versions
                .remove(&process.tenant_id, &process.bpmn_process_id, process.version);
        }
    }

    // ── Decisions ──

    pub fn decision(&self, key: Key) -> Option<&DeployedDecision> {
        self.decisions.get(&key)
    }

    pub fn latest_decision(&self, tenant_id: &str, decision_id: &str) -> Option<&DeployedDecision> {
        self.decision_versions
            .latest(tenant_id, decision_id)
            .and_then(|key| self.decisions.get(&key))
    }

    pub fn next_decision_version(&self, tenant_id: &str, decision_id: &str) -> i32 {
        self.decision_versions.next_version(tenant_id, decision_id)
    }

    pub(crate) fn put_decision(&mut self, decision: DeployedDecision) {
        self.decision_versions
            .insert(&decision.tenant_id, &decision.decision_id, decision.version, decision.key);
        self.decisions.insert(decision.key, decision);
    }

    pub(crate) fn delete_decision(&mut self, key: Key) {
        if let Some(decision) = self.decisions.get_mut(&key) {
            decision.deleted = true;
            self.decision_versions
                .remove(&decision.tenant_id, &decision.decision_id, decision.version);
        }
    }

    // ── Forms ──

    pub fn form(&self, key: Key) -> Option<&DeployedForm> {
        self.forms.get(&key)
    }

    pub fn latest_form(&self, tenant_id: &str, form_id: &str) -> Option<&DeployedForm> {
        self.form_versions
            .latest(tenant_id, form_id)
            .and_then(|key| self.forms.get(&key))
    }

    pub fn next_form_version(&self, tenant_id: &str, form_id: &str) -> i32 {
        self.form_versions.next_version(tenant_id, form_id)
    }

    pub(crate) fn put_form(&mut self, form: DeployedForm) {
        self.form_versions
            .insert(&form.tenant_id, &form.form_id, form.version, form.key);
        self.forms.insert(form.key, form);
    }

    pub(crate) fn delete_form(&mut self, key: Key) {
        if let Some(form) = self.forms.get_mut(&key) {
            form.deleted = true;
            self.form_versions.remove(&form.tenant_id, &form.form_id, form.version);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_not_reused_after_deletion() {
        let mut index = VersionIndex::default();
        index.insert("t", "order", 1, 10);
        index.insert("t", "order", 2, 20);
        assert_eq!(index.latest("t", "order"), Some(20));
        index.remove("t", "order", 2);
        assert_eq!(index.latest("t", "order"), Some(10));
        assert_eq!(index.next_version("t", "order"), 3);
        assert_eq!(index.latest("other", "order"), None);
    }
}
