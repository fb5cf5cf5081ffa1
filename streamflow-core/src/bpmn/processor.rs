use super::behavior::{
    activate_element, complete_element, consume_trigger, continue_activation, continue_completion,
    propagate_variables, set_local_variables, terminate_element, Activation,
};
use super::lifecycle::ElementState;
use crate::auth::{AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use crate::types::NO_KEY;

/// Element lifecycle commands and process instance cancellation.
pub(super) struct ProcessInstanceProcessor;

impl CommandProcessor for ProcessInstanceProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let value = ctx.value::<ProcessInstanceRecord>()?;
        match command.intent {
            Intent::ProcessInstance(ProcessInstanceIntent::ActivateElement) => activate_element(
                ctx,
                Activation {
                    key: command.key,
                    value: value.clone(),
                    start_children: true,
                    variables: Variables::new(),
                },
            ),
            Intent::ProcessInstance(ProcessInstanceIntent::CompleteElement) => {
                complete_element(ctx, command.key, None)
            }
            Intent::ProcessInstance(ProcessInstanceIntent::TerminateElement) => {
                terminate_element(ctx, command.key, true)
            }
            Intent::ProcessInstance(ProcessInstanceIntent::CompleteExecutionListener) => {
                complete_execution_listener(ctx, command.key)
            }
            Intent::ProcessInstance(ProcessInstanceIntent::Cancel) => cancel(ctx, command.key),
            other => Err(ProcessingError::unexpected(format!(
                "Expected a process instance command, but got {other}"
            ))),
        }
    }
}

/// Continues an element after one of its execution listener jobs completed.
/// Start listener variables become local variables of the element; end
/// listener variables are propagated.
fn complete_execution_listener(ctx: &mut ProcessingContext<'_>, key: i64) -> Result<(), ProcessingError> {
    let Some(instance) = ctx.state.elements.get(key).cloned() else {
        return Ok(());
    };
    let trigger = ctx.state.triggers.peek(key).cloned();
    if let Some(trigger) = &trigger {
        consume_trigger(ctx, &instance.value, key, trigger)?;
    }
    let variables = trigger.map(|t| t.variables).unwrap_or_default();
    match instance.state {
        ElementState::Activating => {
            set_local_variables(ctx, key, &variables)?;
            continue_activation(ctx, key, true)
        }
        ElementState::Completing => {
            propagate_variables(ctx, key, &variables)?;
            continue_completion(ctx, key, None)
        }
        _ => Ok(()),
    }
}

fn cancel(ctx: &mut ProcessingContext<'_>, key: i64) -> Result<(), ProcessingError> {
    let not_found = || {
        Rejection::not_found(format!(
            "Expected to cancel a process instance with key '{key}', but no such process instance was found"
        ))
    };
    let Some(instance) = ctx.state.elements.get(key).cloned() else {
        return Err(not_found().into());
    };
    if instance.value.bpmn_element_type != BpmnElementType::Process || !instance.is_active() {
        return Err(not_found().into());
    }
    ctx.authorize(
        &AuthorizationRequest::new(ResourceType::ProcessDefinition, PermissionType::UpdateProcessInstance)
            .tenant(instance.value.tenant_id.clone())
            .resource_id(instance.value.bpmn_process_id.clone())
            .not_found(not_found().reason),
    )?;
    if instance.value.parent_process_instance_key != NO_KEY {
        return Err(Rejection::invalid_state(format!(
            "Expected to cancel a process instance with key '{key}', but it is created by a parent process instance. Cancel the root process instance '{}' instead.",
            instance.value.root_process_instance_key
        ))
        .into());
    }
    if instance.state == ElementState::Terminating {
        return Err(not_found().into());
    }
    terminate_element(ctx, key, true)
}
