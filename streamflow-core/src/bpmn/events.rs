//! Routing of caught events (timers, signals, errors) to the element
//! instances waiting for them.

use super::behavior::{
    activate_element, child_record, element_def, instance, model_of, root_record,
    terminate_element, write_trigger, Activation, Outcome,
};
use super::lifecycle::ElementState;
use crate::engine::ProcessingContext;
use crate::error::ProcessingError;
use crate::record::*;
use crate::state::DeployedProcess;
use crate::types::{Key, NO_KEY};
use tracing::debug;

/// Where a thrown error is caught.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ErrorCatch {
    pub host_key: Key,
    pub boundary_id: String,
}

/// Finds the innermost active element with an error boundary catching
/// `code`, starting at `from` and walking up flow scopes and into calling
/// process instances. A boundary with a matching code wins over a
/// catch-all boundary of the same host.
pub(crate) fn find_error_catch(
    ctx: &ProcessingContext<'_>,
    from: Key,
    code: &str,
) -> Result<Option<ErrorCatch>, ProcessingError> {
    let mut current = from;
    while current != NO_KEY {
        let Some(candidate) = ctx.state.elements.get(current) else {
            break;
        };
        if matches!(candidate.state, ElementState::Activating | ElementState::Activated) {
            let model = model_of(ctx, candidate.value.process_definition_key)?;
            let host = element_def(&model, candidate.element_id())?;
            // boundaries of a multi-instance activity belong to its body
            let inner = host.multi_instance.is_some()
                && candidate.value.bpmn_element_type != BpmnElementType::MultiInstanceBody;
            let boundaries: &[String] = if inner { &[] } else { &host.boundary_events };
            let mut catch_all = None;
            for boundary_id in boundaries {
                let boundary = element_def(&model, boundary_id)?;
                if boundary.event_type != BpmnEventType::Error {
                    continue;
                }
                match boundary.error_code.as_deref() {
                    Some(caught) if caught == code => {
                        return Ok(Some(ErrorCatch {
                            host_key: current,
                            boundary_id: boundary_id.clone(),
                        }))
                    }
                    None if catch_all.is_none() => catch_all = Some(boundary_id.clone()),
                    _ => {}
                }
            }
            if let Some(boundary_id) = catch_all {
                return Ok(Some(ErrorCatch {
                    host_key: current,
                    boundary_id,
                }));
            }
        }
        current = if candidate.value.flow_scope_key != NO_KEY {
            candidate.value.flow_scope_key
        } else {
            candidate.value.parent_element_instance_key
        };
    }
    Ok(None)
}

/// Delivers a timer or signal to the element instance that subscribed to
/// it. `target_id` is the catch event; the owner is the catch event itself,
/// the event-based gateway in front of it, or the host of a boundary event.
pub(crate) fn trigger_catch_event(
    ctx: &mut ProcessingContext<'_>,
    owner_key: Key,
    target_id: &str,
    variables: Variables,
) -> Outcome {
    let owner = instance(ctx, owner_key)?;
    if owner.state != ElementState::Activated {
        debug!(owner_key, target_id, state = %owner.state, "event owner is not active, skip trigger");
        return Ok(());
    }
    let model = model_of(ctx, owner.value.process_definition_key)?;
    let owner_def = element_def(&model, owner.element_id())?;
    let target = element_def(&model, target_id)?;

    if owner_def.element_type == BpmnElementType::EventBasedGateway || target.id == owner_def.id {
        write_trigger(ctx, &owner.value, owner_key, target_id, variables, false)?;
        ctx.append_command(owner_key, ProcessInstanceIntent::CompleteElement, owner.value);
        return Ok(());
    }

    if target.interrupting {
        if ctx.state.triggers.has_interrupting(owner_key) {
            return Ok(());
        }
        write_trigger(ctx, &owner.value, owner_key, target_id, variables, true)?;
        return terminate_element(ctx, owner_key, true);
    }

    let scope = instance(ctx, owner.value.flow_scope_key)?;
    let boundary_key = ctx.next_key();
    write_trigger(ctx, &owner.value, boundary_key, target_id, variables, false)?;
    activate_element(
        ctx,
        Activation {
            key: boundary_key,
            value: child_record(&scope.value, scope.key, boundary_key, target),
            start_children: false,
            variables: Variables::new(),
        },
    )
}

/// Starts a new instance of `process` at the start event `start_id`, which
/// consumes `variables` as its trigger. Returns the process instance key.
pub(crate) fn start_process_at_event(
    ctx: &mut ProcessingContext<'_>,
    process: &DeployedProcess,
    start_id: &str,
    variables: Variables,
) -> Result<Key, ProcessingError> {
    let start = element_def(&process.model, start_id)?;
    let process_instance_key = ctx.next_key();
    activate_element(
        ctx,
        Activation {
            key: process_instance_key,
            value: root_record(process, process_instance_key),
            start_children: false,
            variables: Variables::new(),
        },
    )?;
    let root = instance(ctx, process_instance_key)?;
    let start_key = ctx.next_key();
    write_trigger(ctx, &root.value, start_key, start_id, variables, false)?;
    ctx.append_command(
        start_key,
        ProcessInstanceIntent::ActivateElement,
        child_record(&root.value, process_instance_key, start_key, start),
    );
    Ok(process_instance_key)
}
