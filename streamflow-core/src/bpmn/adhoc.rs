//! Ad-hoc sub-processes: inner elements run only when asked for, either by
//! the `active_elements` expression on entry or by an instruction.

use super::behavior::{
    activate_element, child_record, complete_element, delete_tokens, instance, model_of,
    raise_incident, terminate_element, write_activated, Activation, ElementRef, Outcome,
};
use super::lifecycle::ElementState;
use crate::auth::{format_list, AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{Failure, ProcessingError, Rejection};
use crate::model::{ElementDef, ProcessModel};
use crate::record::*;
use crate::types::Key;
use tracing::debug;

/// Elements of the ad-hoc scope that can be started on their own: direct
/// children without incoming flows that are not boundary events.
fn activatable<'m>(model: &'m ProcessModel, scope: &'m ElementDef, element_id: &str) -> Option<&'m ElementDef> {
    model
        .children_of(scope)
        .find(|child| child.id == element_id)
        .filter(|child| child.incoming.is_empty() && child.attached_to.is_none())
}

pub(super) fn on_activate(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    let expression = el.element.ad_hoc.as_ref().and_then(|ad_hoc| ad_hoc.active_elements.clone());
    let element_ids = match expression {
        Some(expression) => {
            let scope = ctx.state.scope(el.key);
            ctx.expressions()
                .evaluate_string_list(&expression, &scope)
                .map_err(|err| Failure::new(ErrorType::ExtractValueError, err.to_string()))?
        }
        None => Vec::new(),
    };
    let unknown: Vec<&String> = element_ids
        .iter()
        .filter(|id| activatable(el.model, el.element, id).is_none())
        .collect();
    if !unknown.is_empty() {
        return Err(Failure::new(
            ErrorType::ExtractValueError,
            format!(
                "Failed to activate ad-hoc elements. No BPMN elements found with ids: {}.",
                format_list(unknown)
            ),
        )
        .into());
    }

    write_activated(ctx, el, Vec::new())?;
    for element_id in element_ids {
        activate_inner(ctx, el, &element_id, Variables::new())?;
    }
    Ok(())
}

fn activate_inner(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>, element_id: &str, variables: Variables) -> Outcome {
    let Some(element) = activatable(el.model, el.element, element_id) else {
        return Ok(());
    };
    let scope = instance(ctx, el.key)?;
    let key = ctx.next_key();
    activate_element(
        ctx,
        Activation {
            key,
            value: child_record(&scope.value, el.key, key, element),
            start_children: true,
            variables,
        },
    )
}

/// Called whenever an inner element completed or terminated.
///
/// Without a completion condition the scope completes once nothing is left
/// to do. With one, it completes when the condition holds, terminating the
/// remaining inner instances if configured to. A completion requested by an
/// instruction waits for the inner instances to end.
pub(crate) fn check_completion(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    let current = instance(ctx, el.key)?;
    if current.state != ElementState::Activated {
        return Ok(());
    }
    let idle = current.active_children == 0 && current.pending_tokens() == 0;
    if current.completion_requested {
        return if idle { complete_element(ctx, el.key, None) } else { Ok(()) };
    }

    let Some(ad_hoc) = &el.element.ad_hoc else {
        return if idle { complete_element(ctx, el.key, None) } else { Ok(()) };
    };
    let Some(condition) = &ad_hoc.completion_condition else {
        return if idle { complete_element(ctx, el.key, None) } else { Ok(()) };
    };

    let fulfilled = {
        let scope = ctx.state.scope(el.key);
        ctx.expressions().evaluate_boolean(condition, &scope)
    };
    match fulfilled {
        Err(err) => raise_incident(ctx, el.key, Failure::new(ErrorType::ConditionError, err.to_string())),
        Ok(false) => Ok(()),
        Ok(true) if idle => complete_element(ctx, el.key, None),
        Ok(true) if ad_hoc.cancel_remaining_instances => {
            cancel_inner(ctx, el.key)?;
            complete_element(ctx, el.key, None)
        }
        Ok(true) => {
            debug!(key = el.key, "completion condition met, wait for inner elements");
            Ok(())
        }
    }
}

fn cancel_inner(ctx: &mut ProcessingContext<'_>, key: Key) -> Outcome {
    delete_tokens(ctx, key)?;
    let children: Vec<Key> = ctx
        .state
        .elements
        .active_children(key)
        .iter()
        .map(|child| child.key)
        .collect();
    for child in children {
        terminate_element(ctx, child, false)?;
    }
    Ok(())
}

/// `AD_HOC_SUB_PROCESS_INSTRUCTION:ACTIVATE` and `...:COMPLETE`.
pub(super) struct AdHocInstructionProcessor;

impl CommandProcessor for AdHocInstructionProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let instruction = ctx.value::<AdHocSubProcessInstructionRecord>()?;
        let key = instruction.ad_hoc_sub_process_instance_key;
        let completing = command.intent == Intent::AdHocSubProcessInstruction(AdHocSubProcessInstructionIntent::Complete);
        let operation = if completing { "complete" } else { "activate activities for" };

        let not_found = Rejection::not_found(format!(
            "Expected to {operation} ad-hoc sub-process with key '{key}', but no such ad-hoc sub-process was found"
        ));
        let Some(scope) = ctx.state.elements.get(key).cloned() else {
            return Err(not_found.into());
        };
        if scope.value.bpmn_element_type != BpmnElementType::AdHocSubProcess {
            return Err(not_found.into());
        }
        ctx.authorize(
            &AuthorizationRequest::new(ResourceType::ProcessDefinition, PermissionType::UpdateProcessInstance)
                .tenant(scope.value.tenant_id.clone())
                .resource_id(scope.value.bpmn_process_id.clone())
                .not_found(not_found.reason.clone()),
        )?;
        if scope.state != ElementState::Activated {
            return Err(Rejection::invalid_state(format!(
                "Expected to {operation} ad-hoc sub-process with key '{key}', but it is not active"
            ))
            .into());
        }

        let model = model_of(ctx, scope.value.process_definition_key)?;
        let element = super::behavior::element_def(&model, scope.element_id())?;
        let el = ElementRef {
            key,
            value: scope.value.clone(),
            model: &model,
            element,
        };

        let mut written = instruction.clone();
        written.tenant_id = scope.value.tenant_id.clone();
        if completing {
            ctx.append_event(key, AdHocSubProcessInstructionIntent::Completed, written)?;
            if instruction.cancel_remaining_instances {
                cancel_inner(ctx, key)?;
            }
            return check_completion(ctx, &el);
        }

        let missing: Vec<&str> = instruction
            .activate_elements
            .iter()
            .map(|activate| activate.element_id.as_str())
            .filter(|id| activatable(&model, element, id).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Rejection::not_found(format!(
                "Expected to activate activities for ad-hoc sub-process with key '{key}', but the given elements {} do not exist.",
                format_list(missing)
            ))
            .into());
        }
        ctx.append_event(key, AdHocSubProcessInstructionIntent::Activated, written)?;
        for activate in &instruction.activate_elements {
            activate_inner(ctx, &el, &activate.element_id, activate.variables.clone())?;
        }
        Ok(())
    }
}
