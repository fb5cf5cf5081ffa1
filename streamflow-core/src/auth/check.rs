use super::{AuthorizationContext, AuthorizationRequest, AuthorizedTenants, PermissionGrant, Principal};
use crate::error::Rejection;
use crate::record::{AuthorizationOwnerType, EntityType};
use crate::state::IdentityStore;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Tenants and grants a principal holds through the identity state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPrincipal {
    pub tenants: BTreeSet<String>,
    pub permissions: Vec<PermissionGrant>,
}

type CacheKey = (Principal, BTreeMap<String, String>);

const MAX_CACHED_PRINCIPALS: usize = 1024;

/// Resolutions computed against one identity version. Moving to another
/// version drops every entry.
#[derive(Debug, Default)]
struct ResolutionCache {
    version: u64,
    entries: HashMap<CacheKey, Arc<ResolvedPrincipal>>,
}

/// Decides whether a command's principal may perform an operation.
///
/// Resolution walks the identity state (memberships, groups, mapping
/// rules) and is cached per principal until the identity state changes.
#[derive(Debug, Default)]
pub struct AuthorizationCheck {
    multi_tenancy: bool,
    authorizations: bool,
    cache: RwLock<ResolutionCache>,
}

impl AuthorizationCheck {
    pub fn new(multi_tenancy: bool, authorizations: bool) -> Self {
        Self {
            multi_tenancy,
            authorizations,
            cache: RwLock::new(ResolutionCache::default()),
        }
    }

    pub fn multi_tenancy_enabled(&self) -> bool {
        self.multi_tenancy
    }

    pub fn resolve(&self, identity: &IdentityStore, context: &AuthorizationContext) -> Arc<ResolvedPrincipal> {
        let key = (context.principal.clone(), context.claims.clone());
        let version = identity.version();
        {
            let cache = self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            if cache.version == version {
                if let Some(resolved) = cache.entries.get(&key) {
                    return resolved.clone();
                }
            }
        }

        let resolved = Arc::new(resolve_from_identity(identity, context));
        debug!(
            principal = ?context.principal,
            tenants = resolved.tenants.len(),
            grants = resolved.permissions.len(),
            "resolved principal"
        );
        let mut cache = self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if cache.version != version || cache.entries.len() >= MAX_CACHED_PRINCIPALS {
            cache.entries.clear();
            cache.version = version;
        }
        cache.entries.insert(key, resolved.clone());
        resolved
    }

    #[cfg(test)]
    fn cached_principals(&self) -> usize {
        self.cache.read().map(|cache| cache.entries.len()).unwrap_or(0)
    }

    pub fn authorized_tenants(&self, identity: &IdentityStore, context: &AuthorizationContext) -> AuthorizedTenants {
        if !self.multi_tenancy || context.principal.bypasses_checks() {
            return AuthorizedTenants::All;
        }
        let mut tenants = self.resolve(identity, context).tenants.clone();
        tenants.extend(context.authorized_tenant_ids.iter().cloned());
        AuthorizedTenants::Some(tenants)
    }

    /// Permission check only; tenant access is not considered.
    pub fn is_authorized(
        &self,
        identity: &IdentityStore,
        context: &AuthorizationContext,
        request: &AuthorizationRequest,
    ) -> bool {
        if !self.authorizations || context.principal.bypasses_checks() {
            return true;
        }
        context.permissions.iter().any(|grant| grant.grants(request))
            || self
                .resolve(identity, context)
                .permissions
                .iter()
                .any(|grant| grant.grants(request))
    }

    pub fn check(
        &self,
        identity: &IdentityStore,
        context: &AuthorizationContext,
        request: &AuthorizationRequest,
    ) -> Result<(), Rejection> {
        if context.principal.bypasses_checks() {
            return Ok(());
        }
        if self.multi_tenancy {
            if let Some(tenant_id) = &request.tenant_id {
                if !self.authorized_tenants(identity, context).contains(tenant_id) {
                    return Err(match &request.not_found_reason {
                        Some(reason) => Rejection::not_found(reason.clone()),
                        None => Rejection::unauthorized(request.tenant_denied_reason(tenant_id)),
                    });
                }
            }
        }
        if !self.is_authorized(identity, context, request) {
            return Err(Rejection::unauthorized(request.permission_denied_reason()));
        }
        Ok(())
    }
}

fn resolve_from_identity(identity: &IdentityStore, context: &AuthorizationContext) -> ResolvedPrincipal {
    let own = match &context.principal {
        Principal::User(username) => Some((EntityType::User, username.clone())),
        Principal::Client(client_id) => Some((EntityType::Client, client_id.clone())),
        Principal::Internal | Principal::Anonymous => None,
    };

    let mut members: BTreeSet<(EntityType, String)> = BTreeSet::new();
    if let Some(own) = own {
        members.insert(own);
    }
    for rule in identity.mapping_rules_matching(&context.claims) {
        members.insert((EntityType::MappingRule, rule.to_string()));
    }
    let groups: Vec<(EntityType, String)> = members
        .iter()
        .flat_map(|member| identity.groups_of(member))
        .map(|group| (EntityType::Group, group.to_string()))
        .collect();
    members.extend(groups);

    let mut resolved = ResolvedPrincipal::default();
    for member in &members {
        resolved
            .tenants
            .extend(identity.tenants_of(member).map(str::to_string));
        let Some(owner_type) = owner_type_of(member.0) else {
            continue;
        };
        for authorization in identity.authorizations_of(owner_type, &member.1) {
            for permission in &authorization.permission_types {
                resolved.permissions.push(PermissionGrant {
                    resource_type: authorization.resource_type,
                    permission: *permission,
                    resource_ids: BTreeSet::from([authorization.resource_id.clone()]),
                });
            }
        }
    }
    resolved
}

fn owner_type_of(entity_type: EntityType) -> Option<AuthorizationOwnerType> {
    match entity_type {
        EntityType::User => Some(AuthorizationOwnerType::User),
        EntityType::Client => Some(AuthorizationOwnerType::Client),
        EntityType::Group => Some(AuthorizationOwnerType::Group),
        EntityType::MappingRule => Some(AuthorizationOwnerType::MappingRule),
        EntityType::Unspecified => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{PermissionType, ResourceType};
    use crate::record::{AuthorizationRecord, MappingRuleRecord, RejectionType};

    fn identity() -> IdentityStore {
        let mut identity = IdentityStore::default();
        identity.put_tenant(1, "foo", "Foo");
        identity.add_tenant_member("foo", (EntityType::User, "demo".to_string()));
        identity.put_group(2, "ops", "Ops");
        identity.add_group_member("ops", (EntityType::MappingRule, "engineers".to_string()));
        identity.put_mapping_rule(
            3,
            MappingRuleRecord {
                mapping_rule_id: "engineers".to_string(),
                claim_name: "department".to_string(),
                claim_value: "engineering".to_string(),
                ..Default::default()
            },
        );
        identity.put_tenant(4, "bar", "Bar");
        identity.add_tenant_member("bar", (EntityType::Group, "ops".to_string()));
        identity.put_authorization(
            5,
            AuthorizationRecord {
                authorization_key: 5,
                owner_id: "ops".to_string(),
                owner_type: AuthorizationOwnerType::Group,
                resource_type: ResourceType::ProcessDefinition,
                resource_id: "order".to_string(),
                permission_types: BTreeSet::from([PermissionType::CreateProcessInstance]),
            },
        );
        identity
    }

    fn create_order(tenant: &str) -> AuthorizationRequest {
        AuthorizationRequest::new(ResourceType::ProcessDefinition, PermissionType::CreateProcessInstance)
            .tenant(tenant)
            .resource_id("order")
    }

    #[test]
    fn tenants_come_from_direct_and_group_membership() {
        let check = AuthorizationCheck::new(true, true);
        let identity = identity();
        let context = AuthorizationContext::user("demo").with_claim("department", "engineering");
        let resolved = check.resolve(&identity, &context);
        assert_eq!(
            resolved.tenants,
            BTreeSet::from(["bar".to_string(), "foo".to_string()])
        );
        assert!(check.check(&identity, &context, &create_order("bar")).is_ok());
    }

    #[test]
    fn hidden_tenant_reports_not_found() {
        let check = AuthorizationCheck::new(true, false);
        let identity = identity();
        let context = AuthorizationContext::user("demo");
        let rejection = check
            .check(&identity, &context, &create_order("bar").not_found("no such process"))
            .unwrap_err();
        assert_eq!(rejection.rejection_type, RejectionType::NotFound);
        assert_eq!(rejection.reason, "no such process");

        let rejection = check.check(&identity, &context, &create_order("bar")).unwrap_err();
        assert_eq!(rejection.rejection_type, RejectionType::Unauthorized);
    }

    #[test]
    fn missing_permission_is_unauthorized() {
        let check = AuthorizationCheck::new(false, true);
        let identity = identity();
        let rejection = check
            .check(&identity, &AuthorizationContext::user("demo"), &create_order("foo"))
            .unwrap_err();
        assert_eq!(rejection.rejection_type, RejectionType::Unauthorized);
        assert!(rejection.reason.starts_with("Insufficient permissions"));

        let carried = AuthorizationContext::user("demo").with_permission(PermissionGrant::all(
            ResourceType::ProcessDefinition,
            PermissionType::CreateProcessInstance,
        ));
        assert!(check.check(&identity, &carried, &create_order("foo")).is_ok());
    }

    #[test]
    fn internal_commands_bypass_every_check() {
        let check = AuthorizationCheck::new(true, true);
        assert!(check
            .check(&identity(), &AuthorizationContext::default(), &create_order("nowhere"))
            .is_ok());
    }

    #[test]
    fn anonymous_callers_hold_only_what_they_carry() {
        let check = AuthorizationCheck::new(true, true);
        let identity = identity();
        let anonymous = AuthorizationContext::anonymous().with_tenants(["foo"]);
        let rejection = check.check(&identity, &anonymous, &create_order("bar")).unwrap_err();
        assert_eq!(rejection.rejection_type, RejectionType::Unauthorized);

        let rejection = check.check(&identity, &anonymous, &create_order("foo")).unwrap_err();
        assert!(rejection.reason.starts_with("Insufficient permissions"));

        let granted = anonymous.with_permission(PermissionGrant::all(
            ResourceType::ProcessDefinition,
            PermissionType::CreateProcessInstance,
        ));
        assert!(check.check(&identity, &granted, &create_order("foo")).is_ok());
    }

    #[test]
    fn stale_resolutions_are_dropped_on_a_new_identity_version() {
        let check = AuthorizationCheck::new(true, false);
        let mut identity = identity();
        check.resolve(&identity, &AuthorizationContext::user("demo"));
        check.resolve(&identity, &AuthorizationContext::client("worker"));
        assert_eq!(check.cached_principals(), 2);

        identity.put_tenant(9, "baz", "Baz");
        check.resolve(&identity, &AuthorizationContext::user("demo"));
        assert_eq!(check.cached_principals(), 1);

        for n in 0..MAX_CACHED_PRINCIPALS + 10 {
            check.resolve(&identity, &AuthorizationContext::user(format!("user-{n}")));
        }
        assert!(check.cached_principals() <= MAX_CACHED_PRINCIPALS);
    }

    #[test]
    fn cache_is_invalidated_by_identity_changes() {
        let check = AuthorizationCheck::new(true, false);
        let mut identity = identity();
        let context = AuthorizationContext::client("worker");
        assert_eq!(
            check.authorized_tenants(&identity, &context),
            AuthorizedTenants::Some(BTreeSet::new())
        );
        identity.add_tenant_member("foo", (EntityType::Client, "worker".to_string()));
        assert!(check.authorized_tenants(&identity, &context).contains("foo"));
    }
}
