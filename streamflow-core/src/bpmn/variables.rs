use super::behavior::{propagate_variables, set_local_variables};
use crate::auth::{AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;

/// `VARIABLE_DOCUMENT:UPDATE`: merges a document into an element scope,
/// either locally or into the nearest scope defining each variable.
pub(super) struct UpdateVariableDocumentProcessor;

impl CommandProcessor for UpdateVariableDocumentProcessor {
    fn process(&self, _command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let document = ctx.value::<VariableDocumentRecord>()?;
        let scope_key = document.scope_key;
        let not_found = format!(
            "Expected to update variables for element with key '{scope_key}', but no such element was found"
        );
        let Some(scope) = ctx.state.elements.get(scope_key).filter(|scope| scope.is_active()).cloned() else {
            return Err(Rejection::not_found(not_found).into());
        };
        ctx.authorize(
            &AuthorizationRequest::new(ResourceType::ProcessDefinition, PermissionType::UpdateProcessInstance)
                .tenant(scope.value.tenant_id.clone())
                .resource_id(scope.value.bpmn_process_id.clone())
                .not_found(not_found),
        )?;

        let mut updated = document.clone();
        updated.tenant_id = scope.value.tenant_id.clone();
        let key = ctx.next_key();
        ctx.append_event(key, VariableDocumentIntent::Updated, updated)?;
        match document.update_semantics {
            VariableDocumentUpdateSemantic::Local => set_local_variables(ctx, scope_key, &document.variables),
            VariableDocumentUpdateSemantic::Propagate => {
                propagate_variables(ctx, scope_key, &document.variables)
            }
        }
    }
}
