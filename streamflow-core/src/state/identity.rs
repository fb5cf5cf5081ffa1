use crate::record::{AuthorizationOwnerType, AuthorizationRecord, EntityType, MappingRuleRecord, UserRecord};
use crate::auth::ResourceType;
use crate::types::Key;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

pub type Member = (EntityType, String);

#[derive(Debug, Clone, PartialEq)]
pub struct TenantEntry {
    pub key: Key,
    pub tenant_id: String,
    pub name: String,
    pub members: BTreeSet<Member>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupEntry {
    pub key: Key,
    pub group_id: String,
    pub name: String,
    pub members: BTreeSet<Member>,
}

/// Tenants, users, groups, mapping rules and authorizations.
///
/// `version` is stamped from a process-wide counter on every applied
/// identity event, so two diverging copies never share a version. Caches
/// compare it to decide whether their entries are still valid. It is not
/// part of equality.
#[derive(Debug, Clone, Default)]
pub struct IdentityStore {
    version: u64,
    tenants: BTreeMap<String, TenantEntry>,
    users: BTreeMap<String, (Key, UserRecord)>,
    groups: BTreeMap<String, GroupEntry>,
    mapping_rules: BTreeMap<String, (Key, MappingRuleRecord)>,
    authorizations: BTreeMap<Key, AuthorizationRecord>,
}

impl PartialEq for IdentityStore {
    fn eq(&self, other: &Self) -> bool {
        self.tenants == other.tenants
            && self.users == other.users
            && self.groups == other.groups
            && self.mapping_rules == other.mapping_rules
            && self.authorizations == other.authorizations
    }
}

impl IdentityStore {
    fn touch(&mut self) {
        self.version = NEXT_VERSION.fetch_add(1, Ordering::Relaxed);
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    // ── Lookups ──

    pub fn tenant(&self, tenant_id: &str) -> Option<&TenantEntry> {
        self.tenants.get(tenant_id)
    }

    pub fn user(&self, username: &str) -> Option<&UserRecord> {
        self.users.get(username).map(|(_, user)| user)
    }

    pub fn group(&self, group_id: &str) -> Option<&GroupEntry> {
        self.groups.get(group_id)
    }

    pub fn mapping_rule(&self, mapping_rule_id: &str) -> Option<&MappingRuleRecord> {
        self.mapping_rules.get(mapping_rule_id).map(|(_, rule)| rule)
    }

    pub fn authorization(&self, key: Key) -> Option<&AuthorizationRecord> {
        self.authorizations.get(&key)
    }

    /// Whether an entity of the given type is known. Clients are not
    /// managed and always exist.
    pub fn entity_exists(&self, entity_type: EntityType, entity_id: &str) -> bool {
        match entity_type {
            EntityType::User => self.users.contains_key(entity_id),
            EntityType::Group => self.groups.contains_key(entity_id),
            EntityType::MappingRule => self.mapping_rules.contains_key(entity_id),
            EntityType::Client => true,
            EntityType::Unspecified => false,
        }
    }

    pub fn tenants_of(&self, member: &Member) -> impl Iterator<Item = &str> {
        let member = member.clone();
        self.tenants
            .values()
            .filter(move |tenant| tenant.members.contains(&member))
            .map(|tenant| tenant.tenant_id.as_str())
    }

    pub fn groups_of(&self, member: &Member) -> impl Iterator<Item = &str> {
        let member = member.clone();
        self.groups
            .values()
            .filter(move |group| group.members.contains(&member))
            .map(|group| group.group_id.as_str())
    }

    pub fn mapping_rules_matching<'a>(
        &'a self,
        claims: &'a BTreeMap<String, String>,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.mapping_rules
            .values()
            .filter(move |(_, rule)| claims.get(&rule.claim_name) == Some(&rule.claim_value))
            .map(|(_, rule)| rule.mapping_rule_id.as_str())
    }

    pub fn authorizations_of<'a>(
        &'a self,
        owner_type: AuthorizationOwnerType,
        owner_id: &'a str,
    ) -> impl Iterator<Item = &'a AuthorizationRecord> + 'a {
        self.authorizations
            .values()
            .filter(move |auth| auth.owner_type == owner_type && auth.owner_id == owner_id)
    }

    pub fn find_authorization<'a>(
        &'a self,
        owner_type: AuthorizationOwnerType,
        owner_id: &'a str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Option<&'a AuthorizationRecord> {
        self.authorizations_of(owner_type, owner_id)
            .find(|auth| auth.resource_type == resource_type && auth.resource_id == resource_id)
    }

    // ── Mutations (event appliers only) ──

    pub(crate) fn put_tenant(&mut self, key: Key, tenant_id: &str, name: &str) {
        self.tenants.insert(
            tenant_id.to_string(),
            TenantEntry {
                key,
                tenant_id: tenant_id.to_string(),
                name: name.to_string(),
                members: BTreeSet::new(),
            },
        );
        self.touch();
    }

    pub(crate) fn add_tenant_member(&mut self, tenant_id: &str, member: Member) {
        if let Some(tenant) = self.tenants.get_mut(tenant_id) {
            tenant.members.insert(member);
        }
        self.touch();
    }

    pub(crate) fn remove_tenant_member(&mut self, tenant_id: &str, member: &Member) {
        if let Some(tenant) = self.tenants.get_mut(tenant_id) {
            tenant.members.remove(member);
        }
        self.touch();
    }

    pub(crate) fn put_user(&mut self, key: Key, user: UserRecord) {
        self.users.insert(user.username.clone(), (key, user));
        self.touch();
    }

    pub(crate) fn put_group(&mut self, key: Key, group_id: &str, name: &str) {
        self.groups.insert(
            group_id.to_string(),
            GroupEntry {
                key,
                group_id: group_id.to_string(),
                name: name.to_string(),
                members: BTreeSet::new(),
            },
        );
        self.touch();
    }

    pub(crate) fn add_group_member(&mut self, group_id: &str, member: Member) {
        if let Some(group) = self.groups.get_mut(group_id) {
            group.members.insert(member);
        }
        self.touch();
    }

    pub(crate) fn put_mapping_rule(&mut self, key: Key, rule: MappingRuleRecord) {
        self.mapping_rules.insert(rule.mapping_rule_id.clone(), (key, rule));
        self.touch();
    }

    pub(crate) fn put_authorization(&mut self, key: Key, authorization: AuthorizationRecord) {
        self.authorizations.insert(key, authorization);
        self.touch();
    }

    pub(crate) fn remove_authorization(&mut self, key: Key) {
        self.authorizations.remove(&key);
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_change_bumps_the_version() {
        let mut store = IdentityStore::default();
        store.put_tenant(1, "foo", "Foo");
        let created = store.version();
        let mut diverged = store.clone();
        store.add_tenant_member("foo", (EntityType::User, "demo".to_string()));
        diverged.put_user(2, UserRecord::default());
        assert!(store.version() > created);
        assert_ne!(store.version(), diverged.version());
        let tenants: Vec<&str> = store
            .tenants_of(&(EntityType::User, "demo".to_string()))
            .collect();
        assert_eq!(tenants, vec!["foo"]);
    }

    #[test]
    fn mapping_rules_match_claims() {
        let mut store = IdentityStore::default();
        store.put_mapping_rule(
            1,
            MappingRuleRecord {
                mapping_rule_id: "ops".to_string(),
                claim_name: "role".to_string(),
                claim_value: "ops".to_string(),
                ..Default::default()
            },
        );
        let claims = BTreeMap::from([("role".to_string(), "ops".to_string())]);
        assert_eq!(store.mapping_rules_matching(&claims).collect::<Vec<_>>(), vec!["ops"]);
        let other = BTreeMap::from([("role".to_string(), "dev".to_string())]);
        assert_eq!(store.mapping_rules_matching(&other).count(), 0);
    }
}
