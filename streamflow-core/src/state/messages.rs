use crate::record::{
    MessageRecord, MessageStartEventSubscriptionRecord, MessageSubscriptionRecord,
    ProcessMessageSubscriptionRecord,
};
use crate::types::{Key, Timestamp};
use std::collections::{BTreeMap, BTreeSet};

/// Tenant, message name and correlation key.
type Address = (String, String, String);

fn address(tenant_id: &str, name: &str, correlation_key: &str) -> Address {
    (tenant_id.to_string(), name.to_string(), correlation_key.to_string())
}

/// Messages buffered until their deadline, plus the bookkeeping that keeps a
/// message from correlating twice into the same process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageStore {
    messages: BTreeMap<Key, MessageRecord>,
    by_address: BTreeMap<Address, BTreeSet<Key>>,
    deadlines: BTreeSet<(Timestamp, Key)>,
    /// (message key, bpmn process id) pairs that already correlated.
    correlated: BTreeSet<(Key, String)>,
    /// Instances started by a message, by (tenant, bpmn process id,
    /// correlation key). Blocks a second start until the first finishes.
    start_locks: BTreeMap<(String, String, String), Key>,
    locked_by: BTreeMap<Key, (String, String, String)>,
}

impl MessageStore {
    pub fn get(&self, key: Key) -> Option<&MessageRecord> {
        self.messages.get(&key)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Buffered messages for an address, oldest first.
    pub fn buffered(&self, tenant_id: &str, name: &str, correlation_key: &str) -> Vec<(Key, &MessageRecord)> {
        self.by_address
            .get(&address(tenant_id, name, correlation_key))
            .into_iter()
            .flatten()
            .filter_map(|key| self.messages.get(key).map(|message| (*key, message)))
            .collect()
    }

    /// Every buffered message of a tenant, oldest first.
    pub fn buffered_in(&self, tenant_id: &str) -> Vec<(Key, &MessageRecord)> {
        self.messages
            .iter()
            .filter(|(_, message)| message.tenant_id == tenant_id)
            .map(|(key, message)| (*key, message))
            .collect()
    }

    pub fn has_message_id(&self, tenant_id: &str, name: &str, correlation_key: &str, message_id: &str) -> bool {
        !message_id.is_empty()
            && self
                .buffered(tenant_id, name, correlation_key)
                .iter()
                .any(|(_, message)| message.message_id == message_id)
    }

    pub fn expired_until(&self, now: Timestamp) -> Vec<Key> {
        self.deadlines
            .iter()
            .take_while(|(deadline, _)| *deadline <= now)
            .map(|(_, key)| *key)
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    pub fn is_correlated(&self, message_key: Key, bpmn_process_id: &str) -> bool {
        self.correlated.contains(&(message_key, bpmn_process_id.to_string()))
    }

    pub fn start_lock(&self, tenant_id: &str, bpmn_process_id: &str, correlation_key: &str) -> Option<Key> {
        self.start_locks
            .get(&address(tenant_id, bpmn_process_id, correlation_key))
            .copied()
    }

    pub(crate) fn put(&mut self, key: Key, message: MessageRecord) {
        self.by_address
            .entry(address(&message.tenant_id, &message.name, &message.correlation_key))
            .or_default()
            .insert(key);
        self.deadlines.insert((message.deadline, key));
        self.messages.insert(key, message);
    }

    pub(crate) fn remove(&mut self, key: Key) {
        let Some(message) = self.messages.remove(&key) else {
            return;
        };
        let at = address(&message.tenant_id, &message.name, &message.correlation_key);
        if let Some(keys) = self.by_address.get_mut(&at) {
            keys.remove(&key);
            if keys.is_empty() {
                self.by_address.remove(&at);
            }
        }
        self.deadlines.remove(&(message.deadline, key));
        self.correlated.retain(|(message_key, _)| *message_key != key);
    }

    pub(crate) fn mark_correlated(&mut self, message_key: Key, bpmn_process_id: &str) {
        // messages published with a zero TTL are never buffered
        if self.messages.contains_key(&message_key) {
            self.correlated.insert((message_key, bpmn_process_id.to_string()));
        }
    }

    pub(crate) fn lock_start(&mut self, tenant_id: &str, bpmn_process_id: &str, correlation_key: &str, instance: Key) {
        if correlation_key.is_empty() {
            return;
        }
        let at = address(tenant_id, bpmn_process_id, correlation_key);
        self.start_locks.insert(at.clone(), instance);
        self.locked_by.insert(instance, at);
    }

    pub(crate) fn release_start(&mut self, instance: Key) {
        if let Some(at) = self.locked_by.remove(&instance) {
            self.start_locks.remove(&at);
        }
    }
}

/// Catch event subscriptions on the partition owning the correlation key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSubscriptionStore {
    by_address: BTreeMap<Address, BTreeMap<(Key, String), MessageSubscriptionRecord>>,
}

impl MessageSubscriptionStore {
    /// Open subscriptions for an address, in element instance order.
    pub fn subscriptions(&self, tenant_id: &str, name: &str, correlation_key: &str) -> Vec<&MessageSubscriptionRecord> {
        self.by_address
            .get(&address(tenant_id, name, correlation_key))
            .map(|subs| subs.values().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, subscription: &MessageSubscriptionRecord) -> Option<&MessageSubscriptionRecord> {
        self.by_address
            .get(&address(
                &subscription.tenant_id,
                &subscription.message_name,
                &subscription.correlation_key,
            ))
            .and_then(|subs| subs.get(&(subscription.element_instance_key, subscription.element_id.clone())))
    }

    pub fn len(&self) -> usize {
        self.by_address.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub(crate) fn put(&mut self, subscription: MessageSubscriptionRecord) {
        self.by_address
            .entry(address(
                &subscription.tenant_id,
                &subscription.message_name,
                &subscription.correlation_key,
            ))
            .or_default()
            .insert(
                (subscription.element_instance_key, subscription.element_id.clone()),
                subscription,
            );
    }

    pub(crate) fn remove(&mut self, subscription: &MessageSubscriptionRecord) {
        let at = address(
            &subscription.tenant_id,
            &subscription.message_name,
            &subscription.correlation_key,
        );
        if let Some(subs) = self.by_address.get_mut(&at) {
            subs.remove(&(subscription.element_instance_key, subscription.element_id.clone()));
            if subs.is_empty() {
                self.by_address.remove(&at);
            }
        }
    }
}

/// Catch event subscriptions on the partition of the waiting element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessMessageSubscriptionStore {
    subscriptions: BTreeMap<(Key, String), ProcessMessageSubscriptionRecord>,
}

impl ProcessMessageSubscriptionStore {
    pub fn get(&self, element_instance_key: Key, element_id: &str) -> Option<&ProcessMessageSubscriptionRecord> {
        self.subscriptions.get(&(element_instance_key, element_id.to_string()))
    }

    pub fn of_element(&self, element_instance_key: Key) -> Vec<&ProcessMessageSubscriptionRecord> {
        self.subscriptions
            .range((element_instance_key, String::new())..)
            .take_while(|((owner, _), _)| *owner == element_instance_key)
            .map(|(_, subscription)| subscription)
            .collect()
    }

    pub fn of_process_instance(&self, process_instance_key: Key) -> Vec<&ProcessMessageSubscriptionRecord> {
        self.subscriptions
            .values()
            .filter(|subscription| subscription.process_instance_key == process_instance_key)
            .collect()
    }

    pub(crate) fn put(&mut self, subscription: ProcessMessageSubscriptionRecord) {
        self.subscriptions.insert(
            (subscription.element_instance_key, subscription.element_id.clone()),
            subscription,
        );
    }

    pub(crate) fn remove(&mut self, element_instance_key: Key, element_id: &str) {
        self.subscriptions.remove(&(element_instance_key, element_id.to_string()));
    }
}

/// Message start events of the latest process versions, by tenant and
/// message name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageStartSubscriptionStore {
    by_name: BTreeMap<(String, String), BTreeMap<(Key, String), MessageStartEventSubscriptionRecord>>,
}

impl MessageStartSubscriptionStore {
    pub fn subscriptions(&self, tenant_id: &str, message_name: &str) -> Vec<&MessageStartEventSubscriptionRecord> {
        self.by_name
            .get(&(tenant_id.to_string(), message_name.to_string()))
            .map(|subs| subs.values().collect())
            .unwrap_or_default()
    }

    pub fn of_process_definition(&self, process_definition_key: Key) -> Vec<&MessageStartEventSubscriptionRecord> {
        self.by_name
            .values()
            .flat_map(|subs| subs.values())
            .filter(|sub| sub.process_definition_key == process_definition_key)
            .collect()
    }

    pub(crate) fn put(&mut self, subscription: MessageStartEventSubscriptionRecord) {
        self.by_name
            .entry((subscription.tenant_id.clone(), subscription.message_name.clone()))
            .or_default()
            .insert(
                (subscription.process_definition_key, subscription.start_event_id.clone()),
                subscription,
            );
    }

    pub(crate) fn remove(&mut self, subscription: &MessageStartEventSubscriptionRecord) {
        let name = (subscription.tenant_id.clone(), subscription.message_name.clone());
        if let Some(subs) = self.by_name.get_mut(&name) {
            subs.remove(&(subscription.process_definition_key, subscription.start_event_id.clone()));
            if subs.is_empty() {
                self.by_name.remove(&name);
            }
        }
    }
}
