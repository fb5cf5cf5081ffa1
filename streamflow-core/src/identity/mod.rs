//! Tenants, users, groups, mapping rules and authorizations.
//!
//! Identity commands are processed on the partition that receives them and
//! the resulting changes are distributed to every other partition, so each
//! partition can check authorizations locally.

use crate::auth::{AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{CommandProcessor, ProcessingContext, ProcessorRegistry};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use crate::types::Key;
use std::sync::Arc;
use tracing::debug;

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register(
        &[TenantIntent::Create, TenantIntent::AddEntity, TenantIntent::RemoveEntity],
        Arc::new(TenantProcessor),
    );
    registry.register(&[UserIntent::Create], Arc::new(UserProcessor));
    registry.register(&[GroupIntent::Create, GroupIntent::AddEntity], Arc::new(GroupProcessor));
    registry.register(&[MappingRuleIntent::Create], Arc::new(MappingRuleProcessor));
    registry.register(
        &[AuthorizationIntent::Create, AuthorizationIntent::Delete],
        Arc::new(AuthorizationProcessor),
    );
}

/// Writes the event for an accepted command. Commands received from another
/// partition reuse its key; the others are distributed under that key.
fn commit<V>(
    ctx: &mut ProcessingContext<'_>,
    command: &Record,
    key: Key,
    event: impl Into<Intent>,
    value: V,
) -> Result<(), ProcessingError>
where
    V: Into<RecordValue> + Clone,
{
    let key = if command.distributed { command.key } else { key };
    ctx.append_event(key, event, value.clone())?;
    ctx.respond_with_last();
    if !command.distributed {
        let value: RecordValue = value.into();
        for partition_id in ctx.other_partitions() {
            ctx.distribute(
                partition_id,
                Record::command(command.intent, value.clone()).with_key(key),
            );
        }
    }
    Ok(())
}

fn require(what: &str, value: &str, operation: &str) -> Result<(), ProcessingError> {
    if value.trim().is_empty() {
        return Err(Rejection::invalid_argument(format!(
            "Expected to {operation} with a non-empty {what}, but it was empty"
        ))
        .into());
    }
    Ok(())
}

fn unexpected(command: &Record) -> ProcessingError {
    ProcessingError::unexpected(format!("No identity processor for {}", command.intent))
}

struct TenantProcessor;

impl CommandProcessor for TenantProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let tenant = ctx.value::<TenantRecord>()?;
        let Intent::Tenant(intent) = command.intent else {
            return Err(unexpected(command));
        };
        let tenant_id = &tenant.tenant_id;
        let existing = ctx.state.identity.tenant(tenant_id).cloned();
        let member = (tenant.entity_type, tenant.entity_id.clone());

        if command.distributed {
            let applies = match intent {
                TenantIntent::Create => existing.is_none(),
                TenantIntent::AddEntity => existing.as_ref().is_some_and(|t| !t.members.contains(&member)),
                TenantIntent::RemoveEntity => existing.as_ref().is_some_and(|t| t.members.contains(&member)),
                _ => false,
            };
            if !applies {
                return Ok(());
            }
        }

        match intent {
            TenantIntent::Create => {
                if !command.distributed {
                    require("tenant id", tenant_id, "create tenant")?;
                    ctx.authorize(&AuthorizationRequest::new(ResourceType::Tenant, PermissionType::Create))?;
                    if existing.is_some() {
                        return Err(Rejection::already_exists(format!(
                            "Expected to create tenant with ID '{tenant_id}', but a tenant with this ID already exists"
                        ))
                        .into());
                    }
                }
                let key = ctx.next_key();
                debug!(tenant = %tenant_id, "tenant created");
                commit(ctx, command, key, TenantIntent::Created, tenant.clone())
            }
            TenantIntent::AddEntity | TenantIntent::RemoveEntity => {
                let adding = intent == TenantIntent::AddEntity;
                let (operation, event) = if adding {
                    ("add entity to", TenantIntent::EntityAdded)
                } else {
                    ("remove entity from", TenantIntent::EntityRemoved)
                };
                let entity_id = &tenant.entity_id;
                let Some(existing) = existing else {
                    return Err(Rejection::not_found(format!(
                        "Expected to {operation} tenant with ID '{tenant_id}', but no tenant with this ID exists"
                    ))
                    .into());
                };
                if !command.distributed {
                    ctx.authorize(
                        &AuthorizationRequest::new(ResourceType::Tenant, PermissionType::Update)
                            .resource_id(tenant_id.clone()),
                    )?;
                    if adding && !ctx.state.identity.entity_exists(tenant.entity_type, entity_id) {
                        return Err(Rejection::not_found(format!(
                            "Expected to add entity with ID '{entity_id}' to tenant with ID '{tenant_id}', but the entity does not exist"
                        ))
                        .into());
                    }
                    let is_member = existing.members.contains(&member);
                    if adding && is_member {
                        return Err(Rejection::already_exists(format!(
                            "Expected to add entity with ID '{entity_id}' to tenant with ID '{tenant_id}', but the entity is already assigned to this tenant"
                        ))
                        .into());
                    }
                    if !adding && !is_member {
                        return Err(Rejection::not_found(format!(
                            "Expected to remove entity with ID '{entity_id}' from tenant with ID '{tenant_id}', but the entity is not assigned to this tenant"
                        ))
                        .into());
                    }
                }
                let value = TenantRecord {
                    name: existing.name.clone(),
                    ..tenant.clone()
                };
                commit(ctx, command, existing.key, event, value)
            }
            _ => Err(unexpected(command)),
        }
    }
}

struct UserProcessor;

impl CommandProcessor for UserProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let user = ctx.value::<UserRecord>()?;
        let exists = ctx.state.identity.user(&user.username).is_some();
        if command.distributed {
            if exists {
                return Ok(());
            }
        } else {
            require("username", &user.username, "create user")?;
            ctx.authorize(&AuthorizationRequest::new(ResourceType::User, PermissionType::Create))?;
            if exists {
                return Err(Rejection::already_exists(format!(
                    "Expected to create user with username '{}', but a user with this username already exists",
                    user.username
                ))
                .into());
            }
        }
        let key = ctx.next_key();
        commit(ctx, command, key, UserIntent::Created, user.clone())
    }
}

struct GroupProcessor;

impl CommandProcessor for GroupProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let group = ctx.value::<GroupRecord>()?;
        let Intent::Group(intent) = command.intent else {
            return Err(unexpected(command));
        };
        let group_id = &group.group_id;
        let existing = ctx.state.identity.group(group_id).cloned();
        let member = (group.entity_type, group.entity_id.clone());

        match intent {
            GroupIntent::Create => {
                if command.distributed {
                    if existing.is_some() {
                        return Ok(());
                    }
                } else {
                    require("group id", group_id, "create group")?;
                    ctx.authorize(&AuthorizationRequest::new(ResourceType::Group, PermissionType::Create))?;
                    if existing.is_some() {
                        return Err(Rejection::already_exists(format!(
                            "Expected to create group with ID '{group_id}', but a group with this ID already exists"
                        ))
                        .into());
                    }
                }
                let key = ctx.next_key();
                commit(ctx, command, key, GroupIntent::Created, group.clone())
            }
            GroupIntent::AddEntity => {
                let entity_id = &group.entity_id;
                let Some(existing) = existing else {
                    if command.distributed {
                        return Ok(());
                    }
                    return Err(Rejection::not_found(format!(
                        "Expected to add entity to group with ID '{group_id}', but no group with this ID exists"
                    ))
                    .into());
                };
                let is_member = existing.members.contains(&member);
                if command.distributed {
                    if is_member {
                        return Ok(());
                    }
                } else {
                    ctx.authorize(
                        &AuthorizationRequest::new(ResourceType::Group, PermissionType::Update)
                            .resource_id(group_id.clone()),
                    )?;
                    if !ctx.state.identity.entity_exists(group.entity_type, entity_id) {
                        return Err(Rejection::not_found(format!(
                            "Expected to add entity with ID '{entity_id}' to group with ID '{group_id}', but the entity does not exist"
                        ))
                        .into());
                    }
                    if is_member {
                        return Err(Rejection::already_exists(format!(
                            "Expected to add entity with ID '{entity_id}' to group with ID '{group_id}', but the entity is already assigned to this group"
                        ))
                        .into());
                    }
                }
                let value = GroupRecord {
                    name: existing.name.clone(),
                    ..group.clone()
                };
                commit(ctx, command, existing.key, GroupIntent::EntityAdded, value)
            }
            _ => Err(unexpected(command)),
        }
    }
}

struct MappingRuleProcessor;

impl CommandProcessor for MappingRuleProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let rule = ctx.value::<MappingRuleRecord>()?;
        let exists = ctx.state.identity.mapping_rule(&rule.mapping_rule_id).is_some();
        if command.distributed {
            if exists {
                return Ok(());
            }
        } else {
            require("mapping rule id", &rule.mapping_rule_id, "create mapping rule")?;
            require("claim name", &rule.claim_name, "create mapping rule")?;
            ctx.authorize(&AuthorizationRequest::new(ResourceType::MappingRule, PermissionType::Create))?;
            if exists {
                return Err(Rejection::already_exists(format!(
                    "Expected to create mapping rule with ID '{}', but a mapping rule with this ID already exists",
                    rule.mapping_rule_id
                ))
                .into());
            }
        }
        let key = ctx.next_key();
        commit(ctx, command, key, MappingRuleIntent::Created, rule.clone())
    }
}

fn owner_entity(owner_type: AuthorizationOwnerType) -> EntityType {
    match owner_type {
        AuthorizationOwnerType::User => EntityType::User,
        AuthorizationOwnerType::Client => EntityType::Client,
        AuthorizationOwnerType::Group => EntityType::Group,
        AuthorizationOwnerType::MappingRule => EntityType::MappingRule,
        AuthorizationOwnerType::Unspecified => EntityType::Unspecified,
    }
}

/// `AUTHORIZATION:CREATE` grants permissions on one resource id (or `*`) to
/// an owner; `AUTHORIZATION:DELETE` revokes a grant by its key.
struct AuthorizationProcessor;

impl CommandProcessor for AuthorizationProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let authorization = ctx.value::<AuthorizationRecord>()?;
        match command.intent {
            Intent::Authorization(AuthorizationIntent::Create) => create_authorization(command, ctx, authorization),
            Intent::Authorization(AuthorizationIntent::Delete) => delete_authorization(command, ctx, authorization),
            _ => Err(unexpected(command)),
        }
    }
}

fn create_authorization(
    command: &Record,
    ctx: &mut ProcessingContext<'_>,
    authorization: &AuthorizationRecord,
) -> Result<(), ProcessingError> {
    let existing = ctx
        .state
        .identity
        .find_authorization(
            authorization.owner_type,
            &authorization.owner_id,
            authorization.resource_type,
            &authorization.resource_id,
        )
        .is_some();
    if command.distributed {
        if ctx.state.identity.authorization(command.key).is_some() {
            return Ok(());
        }
    } else {
        require("owner id", &authorization.owner_id, "create authorization")?;
        if authorization.owner_type == AuthorizationOwnerType::Unspecified {
            return Err(Rejection::invalid_argument(
                "Expected to create authorization with an owner type, but none given",
            )
            .into());
        }
        if authorization.permission_types.is_empty() {
            return Err(Rejection::invalid_argument(
                "Expected to create authorization with at least one permission, but none given",
            )
            .into());
        }
        ctx.authorize(&AuthorizationRequest::new(ResourceType::Authorization, PermissionType::Create))?;
        let owner = owner_entity(authorization.owner_type);
        if !ctx.state.identity.entity_exists(owner, &authorization.owner_id) {
            return Err(Rejection::not_found(format!(
                "Expected to create authorization for owner '{}', but no owner with this ID exists",
                authorization.owner_id
            ))
            .into());
        }
        if existing {
            return Err(Rejection::already_exists(format!(
                "Expected to create authorization for owner '{}' for resource identifier '{}', but an authorization for this resource identifier already exists",
                authorization.owner_id, authorization.resource_id
            ))
            .into());
        }
    }
    let key = ctx.next_key();
    let key = if command.distributed { command.key } else { key };
    let stored = AuthorizationRecord {
        authorization_key: key,
        ..authorization.clone()
    };
    debug!(
        owner = %stored.owner_id,
        resource_type = %stored.resource_type,
        resource = %stored.resource_id,
        "authorization created"
    );
    commit(ctx, command, key, AuthorizationIntent::Created, stored)
}

fn delete_authorization(
    command: &Record,
    ctx: &mut ProcessingContext<'_>,
    authorization: &AuthorizationRecord,
) -> Result<(), ProcessingError> {
    let key = if command.key > 0 { command.key } else { authorization.authorization_key };
    let Some(stored) = ctx.state.identity.authorization(key).cloned() else {
        if command.distributed {
            return Ok(());
        }
        return Err(Rejection::not_found(format!(
            "Expected to delete authorization with key {key}, but an authorization with this key does not exist"
        ))
        .into());
    };
    if !command.distributed {
        ctx.authorize(&AuthorizationRequest::new(ResourceType::Authorization, PermissionType::Delete))?;
    }
    commit(ctx, command, key, AuthorizationIntent::Deleted, stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::ProcessingEnv;
    use crate::model::SimpleExpressionLanguage;
    use crate::state::ProcessingState;
    use std::collections::BTreeSet;

    fn env() -> ProcessingEnv {
        ProcessingEnv::new(1, EngineConfig::default(), Arc::new(SimpleExpressionLanguage))
    }

    fn run(
        processor: &dyn CommandProcessor,
        state: &mut ProcessingState,
        command: &Record,
    ) -> Result<(), ProcessingError> {
        let env = env();
        let mut ctx = ProcessingContext::new(state, &env, command);
        processor.process(command, &mut ctx)
    }

    fn rejection_type(result: Result<(), ProcessingError>) -> RejectionType {
        match result {
            Err(ProcessingError::Rejected(rejection)) => rejection.rejection_type,
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    fn tenant(intent: TenantIntent, entity: &str) -> Record {
        Record::command(
            intent,
            TenantRecord {
                tenant_id: "acme".to_string(),
                name: "Acme".to_string(),
                entity_id: entity.to_string(),
                entity_type: EntityType::User,
            },
        )
    }

    #[test]
    fn tenant_ids_are_unique() {
        let mut state = ProcessingState::new(1);
        run(&TenantProcessor, &mut state, &tenant(TenantIntent::Create, "")).unwrap();
        assert!(state.identity.tenant("acme").is_some());
        let again = run(&TenantProcessor, &mut state, &tenant(TenantIntent::Create, ""));
        assert_eq!(rejection_type(again), RejectionType::AlreadyExists);
    }

    #[test]
    fn members_must_exist_before_joining_a_tenant() {
        let mut state = ProcessingState::new(1);
        let missing_tenant = run(&TenantProcessor, &mut state, &tenant(TenantIntent::AddEntity, "jo"));
        assert_eq!(rejection_type(missing_tenant), RejectionType::NotFound);

        run(&TenantProcessor, &mut state, &tenant(TenantIntent::Create, "")).unwrap();
        let missing_user = run(&TenantProcessor, &mut state, &tenant(TenantIntent::AddEntity, "jo"));
        assert_eq!(rejection_type(missing_user), RejectionType::NotFound);

        let user = Record::command(
            UserIntent::Create,
            UserRecord {
                username: "jo".to_string(),
                ..Default::default()
            },
        );
        run(&UserProcessor, &mut state, &user).unwrap();
        run(&TenantProcessor, &mut state, &tenant(TenantIntent::AddEntity, "jo")).unwrap();
        let member = (EntityType::User, "jo".to_string());
        assert_eq!(state.identity.tenants_of(&member).collect::<Vec<_>>(), vec!["acme"]);

        run(&TenantProcessor, &mut state, &tenant(TenantIntent::RemoveEntity, "jo")).unwrap();
        assert_eq!(state.identity.tenants_of(&member).count(), 0);
        let not_member = run(&TenantProcessor, &mut state, &tenant(TenantIntent::RemoveEntity, "jo"));
        assert_eq!(rejection_type(not_member), RejectionType::NotFound);
    }

    #[test]
    fn authorizations_are_deleted_by_key() {
        let mut state = ProcessingState::new(1);
        let user = Record::command(
            UserIntent::Create,
            UserRecord {
                username: "jo".to_string(),
                ..Default::default()
            },
        );
        run(&UserProcessor, &mut state, &user).unwrap();
        let create = Record::command(
            AuthorizationIntent::Create,
            AuthorizationRecord {
                owner_id: "jo".to_string(),
                owner_type: AuthorizationOwnerType::User,
                resource_type: ResourceType::ProcessDefinition,
                resource_id: "*".to_string(),
                permission_types: BTreeSet::from([PermissionType::CreateProcessInstance]),
                ..Default::default()
            },
        );
        run(&AuthorizationProcessor, &mut state, &create).unwrap();
        let key = state
            .identity
            .find_authorization(AuthorizationOwnerType::User, "jo", ResourceType::ProcessDefinition, "*")
            .map(|auth| auth.authorization_key)
            .unwrap();

        let delete = Record::command(AuthorizationIntent::Delete, AuthorizationRecord::default()).with_key(key);
        run(&AuthorizationProcessor, &mut state, &delete).unwrap();
        assert!(state.identity.authorization(key).is_none());
        let again = run(&AuthorizationProcessor, &mut state, &delete);
        assert_eq!(rejection_type(again), RejectionType::NotFound);
    }

    #[test]
    fn distributed_creation_is_applied_once() {
        let mut state = ProcessingState::new(2);
        let mut command = tenant(TenantIntent::Create, "").with_key(crate::types::encode_key(1, 5));
        command.distributed = true;
        run(&TenantProcessor, &mut state, &command).unwrap();
        run(&TenantProcessor, &mut state, &command).unwrap();
        assert_eq!(
            state.identity.tenant("acme").map(|t| t.key),
            Some(crate::types::encode_key(1, 5))
        );
    }
}
