//! Cluster variables: named values shared by all process instances, either
//! globally or per tenant. Changes are made on one partition and
//! distributed to the others.

use crate::auth::{AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{CommandProcessor, ProcessingContext, ProcessorRegistry};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use std::sync::Arc;
use tracing::debug;

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register(
        &[
            ClusterVariableIntent::Create,
            ClusterVariableIntent::Update,
            ClusterVariableIntent::Delete,
        ],
        Arc::new(ClusterVariableProcessor),
    );
}

fn scope_name(scope: ClusterVariableScope) -> &'static str {
    match scope {
        ClusterVariableScope::Global => "GLOBAL",
        ClusterVariableScope::Tenant => "TENANT",
    }
}

struct ClusterVariableProcessor;

impl CommandProcessor for ClusterVariableProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let variable = ctx.value::<ClusterVariableRecord>()?;
        let Intent::ClusterVariable(intent) = command.intent else {
            return Err(ProcessingError::unexpected(format!(
                "Expected a cluster variable command, but got {}",
                command.intent
            )));
        };
        let (operation, event, permission) = match intent {
            ClusterVariableIntent::Create => ("create", ClusterVariableIntent::Created, PermissionType::Create),
            ClusterVariableIntent::Update => ("update", ClusterVariableIntent::Updated, PermissionType::Update),
            ClusterVariableIntent::Delete => ("delete", ClusterVariableIntent::Deleted, PermissionType::Delete),
            other => {
                return Err(ProcessingError::unexpected(format!(
                    "Expected a cluster variable command, but got {other}"
                )))
            }
        };
        let exists = ctx.state.cluster_variables.get(variable).is_some();

        if command.distributed {
            // Replays of a change already made elsewhere are idempotent.
            let applies = match intent {
                ClusterVariableIntent::Create => !exists,
                _ => exists || intent == ClusterVariableIntent::Update,
            };
            if applies {
                ctx.append_event(command.key, event, variable.clone())?;
            }
            return Ok(());
        }

        let name = &variable.name;
        let scope = scope_name(variable.scope);
        if name.trim().is_empty() {
            return Err(Rejection::invalid_argument(format!(
                "Expected to {operation} cluster variable with a name, but the name is empty"
            ))
            .into());
        }
        if variable.scope == ClusterVariableScope::Tenant && !ctx.is_visible(&variable.tenant_id) {
            return Err(Rejection::unauthorized(format!(
                "Expected to {operation} cluster variable '{name}' for tenant '{}', but user is not authorized for this tenant",
                variable.tenant_id
            ))
            .into());
        }
        let not_found = format!(
            "Expected to {operation} cluster variable with name '{name}' in scope '{scope}', but no such variable exists"
        );
        let mut request = AuthorizationRequest::new(ResourceType::ClusterVariable, permission).resource_id(name.clone());
        if variable.scope == ClusterVariableScope::Tenant {
            request = request.tenant(variable.tenant_id.clone());
        }
        if intent != ClusterVariableIntent::Create {
            request = request.not_found(not_found.clone());
        }
        ctx.authorize(&request)?;

        match (intent, exists) {
            (ClusterVariableIntent::Create, true) => {
                return Err(Rejection::already_exists(format!(
                    "Expected to create cluster variable with name '{name}' in scope '{scope}', but a variable with this name already exists"
                ))
                .into())
            }
            (ClusterVariableIntent::Update | ClusterVariableIntent::Delete, false) => {
                return Err(Rejection::not_found(not_found).into())
            }
            _ => {}
        }

        let mut stored = variable.clone();
        if intent == ClusterVariableIntent::Delete {
            if let Some(current) = ctx.state.cluster_variables.get(variable) {
                stored.value = current.value.clone();
            }
        }
        let key = ctx.next_key();
        ctx.append_event(key, event, stored.clone())?;
        debug!(name = %name, scope, operation, "cluster variable changed");
        for partition_id in ctx.other_partitions() {
            ctx.distribute(
                partition_id,
                Record::command(intent, stored.clone()).with_key(key),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::ProcessingEnv;
    use crate::model::SimpleExpressionLanguage;
    use crate::state::ProcessingState;

    fn tenant_variable(tenant: &str) -> ClusterVariableRecord {
        ClusterVariableRecord {
            name: "V".to_string(),
            value: serde_json::json!(1),
            scope: ClusterVariableScope::Tenant,
            tenant_id: tenant.to_string(),
        }
    }

    fn run(state: &mut ProcessingState, env: &ProcessingEnv, command: &Record) -> Result<(), ProcessingError> {
        let mut ctx = ProcessingContext::new(state, env, command);
        ClusterVariableProcessor.process(command, &mut ctx)
    }

    #[test]
    fn names_are_unique_per_tenant() {
        let mut state = ProcessingState::new(1);
        let env = ProcessingEnv::new(1, EngineConfig::default(), Arc::new(SimpleExpressionLanguage));

        let create_a = Record::command(ClusterVariableIntent::Create, tenant_variable("A"));
        run(&mut state, &env, &create_a).unwrap();
        let again = run(&mut state, &env, &create_a).unwrap_err();
        let ProcessingError::Rejected(rejection) = again else {
            panic!("expected a rejection");
        };
        assert_eq!(rejection.rejection_type, RejectionType::AlreadyExists);

        let create_b = Record::command(ClusterVariableIntent::Create, tenant_variable("B"));
        run(&mut state, &env, &create_b).unwrap();
        assert_eq!(state.cluster_variables.len(), 2);
    }

    #[test]
    fn deleting_a_missing_variable_is_not_found() {
        let mut state = ProcessingState::new(1);
        let env = ProcessingEnv::new(1, EngineConfig::default(), Arc::new(SimpleExpressionLanguage));
        let delete = Record::command(ClusterVariableIntent::Delete, tenant_variable("A"));
        let err = run(&mut state, &env, &delete).unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::Rejected(Rejection {
                rejection_type: RejectionType::NotFound,
                ..
            })
        ));
    }
}
