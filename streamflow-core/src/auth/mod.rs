//! Authorization gate: principals, permissions and tenant access.

mod check;

pub use check::{AuthorizationCheck, ResolvedPrincipal};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Wildcard resource id granting a permission on every resource of a type.
pub const WILDCARD: &str = "*";

/// Who issued a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Principal {
    /// Commands written by the engine itself (follow-ups, scheduler, distribution).
    #[default]
    Internal,
    /// Unauthenticated callers; limited to the tenants and grants the
    /// command carries.
    Anonymous,
    User(String),
    Client(String),
}

impl Principal {
    pub fn bypasses_checks(&self) -> bool {
        matches!(self, Principal::Internal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    #[default]
    Unspecified,
    ProcessDefinition,
    DecisionDefinition,
    Resource,
    ClusterVariable,
    Tenant,
    User,
    Group,
    MappingRule,
    Authorization,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Unspecified => "UNSPECIFIED",
            ResourceType::ProcessDefinition => "PROCESS_DEFINITION",
            ResourceType::DecisionDefinition => "DECISION_DEFINITION",
            ResourceType::Resource => "RESOURCE",
            ResourceType::ClusterVariable => "CLUSTER_VARIABLE",
            ResourceType::Tenant => "TENANT",
            ResourceType::User => "USER",
            ResourceType::Group => "GROUP",
            ResourceType::MappingRule => "MAPPING_RULE",
            ResourceType::Authorization => "AUTHORIZATION",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionType {
    Create,
    Read,
    Update,
    Delete,
    CreateProcessInstance,
    ReadProcessInstance,
    UpdateProcessInstance,
    DeleteProcessInstance,
    CreateDecisionInstance,
    DeleteProcess,
    DeleteDrd,
    DeleteForm,
}

impl PermissionType {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionType::Create => "CREATE",
            PermissionType::Read => "READ",
            PermissionType::Update => "UPDATE",
            PermissionType::Delete => "DELETE",
            PermissionType::CreateProcessInstance => "CREATE_PROCESS_INSTANCE",
            PermissionType::ReadProcessInstance => "READ_PROCESS_INSTANCE",
            PermissionType::UpdateProcessInstance => "UPDATE_PROCESS_INSTANCE",
            PermissionType::DeleteProcessInstance => "DELETE_PROCESS_INSTANCE",
            PermissionType::CreateDecisionInstance => "CREATE_DECISION_INSTANCE",
            PermissionType::DeleteProcess => "DELETE_PROCESS",
            PermissionType::DeleteDrd => "DELETE_DRD",
            PermissionType::DeleteForm => "DELETE_FORM",
        }
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission held by the principal on a set of resource ids (`*` for all).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub resource_type: ResourceType,
    pub permission: PermissionType,
    pub resource_ids: BTreeSet<String>,
}

impl PermissionGrant {
    pub fn all(resource_type: ResourceType, permission: PermissionType) -> Self {
        Self {
            resource_type,
            permission,
            resource_ids: BTreeSet::from([WILDCARD.to_string()]),
        }
    }

    pub fn grants(&self, request: &AuthorizationRequest) -> bool {
        self.resource_type == request.resource_type
            && self.permission == request.permission
            && (self.resource_ids.contains(WILDCARD)
                || request
                    .resource_ids
                    .iter()
                    .any(|id| self.resource_ids.contains(id)))
    }
}

/// Authentication data attached to every inbound command by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthorizationContext {
    pub principal: Principal,
    pub authorized_tenant_ids: Vec<String>,
    pub claims: BTreeMap<String, String>,
    pub permissions: Vec<PermissionGrant>,
}

impl AuthorizationContext {
    pub fn anonymous() -> Self {
        Self {
            principal: Principal::Anonymous,
            ..Default::default()
        }
    }

    pub fn user(username: impl Into<String>) -> Self {
        Self {
            principal: Principal::User(username.into()),
            ..Default::default()
        }
    }

    pub fn client(client_id: impl Into<String>) -> Self {
        Self {
            principal: Principal::Client(client_id.into()),
            ..Default::default()
        }
    }

    pub fn with_tenants<I, S>(mut self, tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorized_tenant_ids = tenants.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }

    pub fn with_permission(mut self, grant: PermissionGrant) -> Self {
        self.permissions.push(grant);
        self
    }
}

/// Tenants a principal may act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizedTenants {
    All,
    Some(BTreeSet<String>),
}

impl AuthorizedTenants {
    pub fn contains(&self, tenant_id: &str) -> bool {
        match self {
            AuthorizedTenants::All => true,
            AuthorizedTenants::Some(tenants) => tenants.contains(tenant_id),
        }
    }

    /// Formats the set the way rejection reasons print tenant lists: `[a, b]`.
    pub fn describe(&self) -> String {
        match self {
            AuthorizedTenants::All => "[*]".to_string(),
            AuthorizedTenants::Some(tenants) => format_list(tenants),
        }
    }
}

pub(crate) fn format_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
    format!("[{}]", joined.join(", "))
}

/// One access decision requested by a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub resource_type: ResourceType,
    pub permission: PermissionType,
    pub tenant_id: Option<String>,
    pub resource_ids: BTreeSet<String>,
    /// When set, a tenant mismatch is reported as `NOT_FOUND` with this
    /// reason so that the resource's existence is not revealed.
    pub not_found_reason: Option<String>,
}

impl AuthorizationRequest {
    pub fn new(resource_type: ResourceType, permission: PermissionType) -> Self {
        Self {
            resource_type,
            permission,
            tenant_id: None,
            resource_ids: BTreeSet::new(),
            not_found_reason: None,
        }
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_ids.insert(resource_id.into());
        self
    }

    pub fn not_found(mut self, reason: impl Into<String>) -> Self {
        self.not_found_reason = Some(reason.into());
        self
    }

    pub(crate) fn permission_denied_reason(&self) -> String {
        let mut ids = vec![WILDCARD.to_string()];
        ids.extend(self.resource_ids.iter().cloned());
        format!(
            "Insufficient permissions to perform operation '{}' on resource '{}', required resource identifiers are one of '{}'",
            self.permission,
            self.resource_type,
            format_list(ids)
        )
    }

    pub(crate) fn tenant_denied_reason(&self, tenant_id: &str) -> String {
        format!(
            "Expected to perform operation '{}' on resource '{}', but user is not assigned to tenant '{}'",
            self.permission, self.resource_type, tenant_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_grant_covers_every_resource() {
        let grant = PermissionGrant::all(
            ResourceType::ProcessDefinition,
            PermissionType::CreateProcessInstance,
        );
        let request = AuthorizationRequest::new(
            ResourceType::ProcessDefinition,
            PermissionType::CreateProcessInstance,
        )
        .resource_id("order");
        assert!(grant.grants(&request));

        let other = AuthorizationRequest::new(
            ResourceType::DecisionDefinition,
            PermissionType::CreateDecisionInstance,
        );
        assert!(!grant.grants(&other));
    }

    #[test]
    fn permission_reason_lists_wildcard_first() {
        let request =
            AuthorizationRequest::new(ResourceType::ProcessDefinition, PermissionType::UpdateProcessInstance)
                .resource_id("order");
        assert_eq!(
            request.permission_denied_reason(),
            "Insufficient permissions to perform operation 'UPDATE_PROCESS_INSTANCE' on resource 'PROCESS_DEFINITION', required resource identifiers are one of '[*, order]'"
        );
    }

    #[test]
    fn principal_serializes_with_kind_tag() {
        let json = serde_json::to_value(Principal::User("demo".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "USER", "id": "demo"}));
        let back: Principal = serde_json::from_value(serde_json::json!({"kind": "INTERNAL"})).unwrap();
        assert_eq!(back, Principal::Internal);
    }
}
