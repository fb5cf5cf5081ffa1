use crate::record::SignalSubscriptionRecord;
use crate::types::Key;
use std::collections::BTreeMap;

/// Subscriptions are identified by subscriber (element instance key, or
/// process definition key for start events) and catch event id.
type SubscriptionId = (Key, String);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalSubscriptionStore {
    by_name: BTreeMap<(String, String), BTreeMap<SubscriptionId, SignalSubscriptionRecord>>,
}

impl SignalSubscriptionStore {
    fn subscriber(record: &SignalSubscriptionRecord) -> Key {
        if record.catch_event_instance_key >= 0 {
            record.catch_event_instance_key
        } else {
            record.process_definition_key
        }
    }

    /// Subscriptions to `signal_name` within one tenant, in subscriber order.
    pub fn subscriptions(&self, tenant_id: &str, signal_name: &str) -> Vec<&SignalSubscriptionRecord> {
        self.by_name
            .get(&(tenant_id.to_string(), signal_name.to_string()))
            .map(|subs| subs.values().collect())
            .unwrap_or_default()
    }

    pub fn of_element(&self, element_instance_key: Key) -> Vec<&SignalSubscriptionRecord> {
        self.by_name
            .values()
            .flat_map(|subs| subs.values())
            .filter(|sub| sub.catch_event_instance_key == element_instance_key)
            .collect()
    }

    pub fn of_process_definition(&self, process_definition_key: Key) -> Vec<&SignalSubscriptionRecord> {
        self.by_name
            .values()
            .flat_map(|subs| subs.values())
            .filter(|sub| sub.catch_event_instance_key < 0 && sub.process_definition_key == process_definition_key)
            .collect()
    }

    pub(crate) fn put(&mut self, record: SignalSubscriptionRecord) {
        let id = (Self::subscriber(&record), record.catch_event_id.clone());
        self.by_name
            .entry((record.tenant_id.clone(), record.signal_name.clone()))
            .or_default()
            .insert(id, record);
    }

    pub(crate) fn remove(&mut self, record: &SignalSubscriptionRecord) {
        let name = (record.tenant_id.clone(), record.signal_name.clone());
        if let Some(subs) = self.by_name.get_mut(&name) {
            subs.remove(&(Self::subscriber(record), record.catch_event_id.clone()));
            if subs.is_empty() {
                self.by_name.remove(&name);
            }
        }
    }
}
