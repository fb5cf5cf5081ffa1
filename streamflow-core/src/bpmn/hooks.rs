//! Per element type behavior plugged into the generic lifecycle.

use super::behavior::{
    activate_element, activate_start_event, called_root_record, complete_element, create_job,
    delete_tokens, evaluate_retries, instance, subscription_for, take_flow_to, take_flows,
    terminate_element, write_activated, write_trigger, Activation, ElementRef, JobSpec, Outcome,
};
use super::events::find_error_catch;
use super::FORM_KEY_HEADER;
use crate::engine::ProcessingContext;
use crate::error::{Failure, ProcessingError};
use crate::record::*;
use crate::types::NO_KEY;

/// Element specific part of the activation. Fallible preparation happens
/// before `ELEMENT_ACTIVATED` is written.
pub(super) fn on_activate(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>, start_children: bool) -> Outcome {
    use BpmnElementType as T;
    match el.element_type() {
        T::Process | T::SubProcess => {
            write_activated(ctx, el, Vec::new())?;
            if start_children {
                activate_start_event(ctx, el)?;
            }
            Ok(())
        }
        T::AdHocSubProcess => super::adhoc::on_activate(ctx, el),
        T::MultiInstanceBody => super::multi_instance::activate_body(ctx, el),
        T::StartEvent | T::BoundaryEvent | T::ParallelGateway => {
            write_activated(ctx, el, Vec::new())?;
            complete_element(ctx, el.key, None)
        }
        T::EndEvent => match el.element.event_type {
            BpmnEventType::Terminate => activate_terminate_end_event(ctx, el),
            BpmnEventType::Error => activate_error_end_event(ctx, el),
            _ => {
                write_activated(ctx, el, Vec::new())?;
                complete_element(ctx, el.key, None)
            }
        },
        T::ServiceTask => activate_job_worker_task(ctx, el),
        T::UserTask => super::task_listener::activate_user_task(ctx, el),
        T::BusinessRuleTask => {
            if el.element.decision_id.is_some() {
                activate_decision_task(ctx, el)
            } else {
                activate_job_worker_task(ctx, el)
            }
        }
        T::CallActivity => activate_call_activity(ctx, el),
        T::ExclusiveGateway | T::InclusiveGateway => {
            let flows = choose_flows(ctx, el)?;
            write_activated(ctx, el, Vec::new())?;
            complete_element(ctx, el.key, Some(flows))
        }
        T::EventBasedGateway => {
            let mut subscriptions = Vec::new();
            for flow in el.model.outgoing(el.element) {
                let target = super::behavior::element_def(el.model, &flow.target)?;
                if let Some(subscription) = subscription_for(ctx, el.key, target)? {
                    subscriptions.push(subscription);
                }
            }
            write_activated(ctx, el, subscriptions)
        }
        T::IntermediateCatchEvent | T::ReceiveTask => {
            if ctx.state.triggers.has_any(el.key) {
                write_activated(ctx, el, Vec::new())?;
                return complete_element(ctx, el.key, None);
            }
            let subscription = subscription_for(ctx, el.key, el.element)?.ok_or_else(|| {
                ProcessingError::unexpected(format!(
                    "Expected catch event '{}' to define a timer, signal or message, but none found",
                    el.element.id
                ))
            })?;
            write_activated(ctx, el, vec![subscription])
        }
        T::SequenceFlow | T::Unspecified => Err(ProcessingError::unexpected(format!(
            "Expected to activate a BPMN element, but '{}' has type {}",
            el.element.id,
            el.element_type().as_str()
        ))),
    }
}

/// Runs after output mappings and end listeners, before `ELEMENT_COMPLETED`.
pub(super) fn on_completing(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    if el.element_type() == BpmnElementType::Process && el.value.parent_element_instance_key != NO_KEY {
        let caller = instance(ctx, el.value.parent_element_instance_key)?;
        let variables = ctx.state.local_variables(el.key);
        write_trigger(ctx, &caller.value, caller.key, &caller.value.element_id, variables, false)?;
    }
    Ok(())
}

/// Runs after `ELEMENT_COMPLETED`: continues the token flow.
/// Inner instances of a multi-instance activity leave the flow to their body.
pub(super) fn on_complete(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>, chosen_flows: Option<Vec<String>>) -> Outcome {
    if el.is_inner_instance() {
        return Ok(());
    }
    match el.element_type() {
        BpmnElementType::Process => {
            if el.value.parent_element_instance_key != NO_KEY {
                let caller = instance(ctx, el.value.parent_element_instance_key)?;
                ctx.append_command(caller.key, ProcessInstanceIntent::CompleteElement, caller.value);
                return Ok(());
            }
            crate::message::correlate_buffered_starts(ctx, &el.value)
        }
        BpmnElementType::EventBasedGateway => {
            let Some(trigger) = ctx.state.triggers.peek(el.key).cloned() else {
                return Err(ProcessingError::unexpected(format!(
                    "Expected event-based gateway '{}' to be completed by an event, but none found",
                    el.element.id
                )));
            };
            super::behavior::consume_trigger(ctx, &el.value, el.key, &trigger)?;
            let flow = el
                .model
                .outgoing(el.element)
                .into_iter()
                .find(|flow| flow.target == trigger.target_element_id)
                .map(|flow| flow.id.clone())
                .ok_or_else(|| {
                    ProcessingError::unexpected(format!(
                        "Expected a sequence flow from '{}' to '{}', but not found",
                        el.element.id, trigger.target_element_id
                    ))
                })?;
            let target_key = ctx.next_key();
            let scope = instance(ctx, el.scope_key())?;
            write_trigger(ctx, &scope.value, target_key, &trigger.target_element_id, trigger.variables, false)?;
            take_flow_to(ctx, el, &flow, target_key)
        }
        _ => {
            let flows = chosen_flows.unwrap_or_else(|| el.element.outgoing.clone());
            take_flows(ctx, el, &flows)
        }
    }
}

/// Runs between `ELEMENT_TERMINATING` and `ELEMENT_TERMINATED`.
pub(super) fn on_terminate(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    if el.element_type().is_container() {
        delete_tokens(ctx, el.key)?;
        let children: Vec<_> = ctx
            .state
            .elements
            .active_children(el.key)
            .iter()
            .map(|child| child.key)
            .collect();
        for child in children {
            terminate_element(ctx, child, false)?;
        }
    }
    if el.element_type() == BpmnElementType::CallActivity {
        let called = instance(ctx, el.key)?.called_child_key;
        if called != NO_KEY {
            terminate_element(ctx, called, false)?;
        }
    }
    Ok(())
}

// ── Tasks ──

fn activate_job_worker_task(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    let spec = job_spec(ctx, el)?;
    write_activated(ctx, el, Vec::new())?;
    create_job(ctx, el, spec)
}

/// The job of a job worker task or user task. Fails with an incident when
/// the retries do not evaluate or the linked form is not deployed.
pub(super) fn job_spec(ctx: &ProcessingContext<'_>, el: &ElementRef<'_>) -> Result<JobSpec, ProcessingError> {
    let Some(job) = &el.element.job else {
        return Err(ProcessingError::unexpected(format!(
            "Expected task '{}' to define a job type, but none found",
            el.element.id
        )));
    };
    let retries = evaluate_retries(ctx, el.key, &job.retries)?;
    let mut headers = job.headers.clone();
    if let Some(form_id) = &el.element.form_id {
        let form = ctx
            .state
            .deployments
            .latest_form(&el.value.tenant_id, form_id)
            .ok_or_else(|| {
                Failure::new(
                    ErrorType::FormNotFound,
                    format!(
                        "Expected to find a form with id '{form_id}', but no form with this id is found, at least a form with this id should be available. To resolve the Incident please deploy a form with the same id"
                    ),
                )
            })?;
        headers.insert(FORM_KEY_HEADER.to_string(), form.key.to_string());
    }
    Ok(JobSpec {
        job_type: job.job_type.clone(),
        retries,
        headers,
        tags: job.tags.clone(),
        kind: JobKind::BpmnElement,
        listener_event_type: JobListenerEventType::Unspecified,
    })
}

fn activate_decision_task(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    let decision_id = el.element.decision_id.clone().unwrap_or_default();
    let Some(decision) = ctx
        .state
        .deployments
        .latest_decision(&el.value.tenant_id, &decision_id)
        .cloned()
    else {
        return Err(Failure::new(
            ErrorType::CalledDecisionError,
            format!("Expected to evaluate decision '{decision_id}', but no decision found for id '{decision_id}'"),
        )
        .into());
    };

    let result = {
        let scope = ctx.state.scope(el.key);
        decision.model.evaluate(ctx.expressions(), &scope)
    };
    let mut evaluation = DecisionEvaluationRecord {
        decision_id: decision.decision_id.clone(),
        decision_key: decision.key,
        decision_version: decision.version,
        decision_name: decision.decision_name.clone(),
        process_instance_key: el.value.process_instance_key,
        element_instance_key: el.key,
        tenant_id: el.value.tenant_id.clone(),
        ..Default::default()
    };
    let result = match result {
        Ok(result) => result,
        Err(message) => {
            evaluation.failed_decision_id = decision.decision_id.clone();
            evaluation.evaluation_failure_message = message.clone();
            let key = ctx.next_key();
            ctx.append_event(key, DecisionEvaluationIntent::Failed, evaluation)?;
            return Err(Failure::new(ErrorType::DecisionEvaluationError, message).into());
        }
    };

    write_activated(ctx, el, Vec::new())?;
    evaluation.decision_output = result.output.clone();
    let key = ctx.next_key();
    ctx.append_event(key, DecisionEvaluationIntent::Evaluated, evaluation)?;

    let mut variables = Variables::new();
    if let Some(name) = &el.element.result_variable {
        variables.insert(name.clone(), result.value);
    }
    write_trigger(ctx, &el.value, el.key, &el.element.id, variables, false)?;
    complete_element(ctx, el.key, None)
}

fn activate_call_activity(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    let process_id = el.element.called_process_id.clone().unwrap_or_default();
    let Some(process) = ctx
        .state
        .deployments
        .latest_process(&el.value.tenant_id, &process_id)
        .cloned()
    else {
        return Err(Failure::new(
            ErrorType::CalledElementError,
            format!("Expected process with BPMN process id '{process_id}' to be deployed, but not found."),
        )
        .into());
    };
    write_activated(ctx, el, Vec::new())?;
    let child_key = ctx.next_key();
    let variables = ctx.state.visible_variables(el.key);
    activate_element(
        ctx,
        Activation {
            key: child_key,
            value: called_root_record(&process, child_key, el),
            start_children: true,
            variables,
        },
    )
}

// ── Gateways ──

/// Outgoing flows of an exclusive (first match) or inclusive (all matches)
/// gateway. Flows without a condition always match; the default flow is
/// taken only when nothing else matched.
fn choose_flows(ctx: &ProcessingContext<'_>, el: &ElementRef<'_>) -> Result<Vec<String>, Failure> {
    let outgoing = el.model.outgoing(el.element);
    if outgoing.is_empty() {
        return Ok(Vec::new());
    }
    let exclusive = el.element_type() == BpmnElementType::ExclusiveGateway;
    let scope = ctx.state.scope(el.key);
    let mut chosen = Vec::new();
    let mut default = None;
    for flow in outgoing {
        if flow.is_default {
            default = Some(flow.id.clone());
            continue;
        }
        let matched = match &flow.condition {
            None => true,
            Some(condition) => ctx
                .expressions()
                .evaluate_boolean(condition, &scope)
                .map_err(|err| Failure::new(ErrorType::ConditionError, err.to_string()))?,
        };
        if matched {
            chosen.push(flow.id.clone());
            if exclusive {
                break;
            }
        }
    }
    if chosen.is_empty() {
        match default {
            Some(flow) => chosen.push(flow),
            None => {
                return Err(Failure::new(
                    ErrorType::ConditionError,
                    "Expected at least one condition to evaluate to true, or to have a default flow",
                ))
            }
        }
    }
    Ok(chosen)
}

// ── End events ──

fn activate_terminate_end_event(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    write_activated(ctx, el, Vec::new())?;
    let scope_key = el.scope_key();
    delete_tokens(ctx, scope_key)?;
    let siblings: Vec<_> = ctx
        .state
        .elements
        .active_children(scope_key)
        .iter()
        .map(|child| child.key)
        .filter(|key| *key != el.key)
        .collect();
    for sibling in siblings {
        terminate_element(ctx, sibling, false)?;
    }
    complete_element(ctx, el.key, None)
}

fn activate_error_end_event(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    let code = el.element.error_code.clone().unwrap_or_default();
    let Some(catch) = find_error_catch(ctx, el.key, &code)? else {
        return Err(Failure::new(
            ErrorType::UnhandledErrorEvent,
            format!(
                "Expected to throw an error event with the code '{code}', but it was not caught. No error events are available in the scope."
            ),
        )
        .into());
    };
    write_activated(ctx, el, Vec::new())?;
    let variables = Variables::new();
    let host = instance(ctx, catch.host_key)?;
    write_trigger(ctx, &host.value, catch.host_key, &catch.boundary_id, variables, true)?;
    terminate_element(ctx, catch.host_key, true)
}
