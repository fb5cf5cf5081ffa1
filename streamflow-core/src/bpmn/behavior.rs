//! Element behavior shared by all processors: activation, completion and
//! termination of element instances, token flow, variables, incidents and
//! event subscriptions.
//!
//! Every step writes events through the [`ProcessingContext`], which applies
//! them to the staged state immediately, so each step reads the effects of
//! the previous one.

use super::hooks;
use super::lifecycle::{next_state, ElementState, LifecycleEffect};
use crate::engine::ProcessingContext;
use crate::error::{Failure, ProcessingError};
use crate::model::{
    ElementDef, ExecutionListener, ExpressionLanguage, Layered, ListenerEvent, Mapping,
    ProcessModel, TimerDefinition, TimerKind, VariableScope,
};
use crate::record::*;
use crate::state::{DeployedProcess, ElementInstance, EventTrigger};
use crate::timer::schedule::TimerSchedule;
use crate::types::{Key, Timestamp, NO_KEY};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

pub(crate) type Outcome = Result<(), ProcessingError>;

// ── Lookups ──

pub(crate) fn model_of(ctx: &ProcessingContext<'_>, process_definition_key: Key) -> Result<Arc<ProcessModel>, ProcessingError> {
    ctx.state.process_model(process_definition_key).cloned().ok_or_else(|| {
        ProcessingError::unexpected(format!(
            "Expected process definition with key '{process_definition_key}' to be deployed, but not found"
        ))
    })
}

pub(crate) fn element_def<'m>(model: &'m ProcessModel, element_id: &str) -> Result<&'m ElementDef, ProcessingError> {
    model.element(element_id).ok_or_else(|| {
        ProcessingError::unexpected(format!(
            "Expected element with id '{element_id}' in process '{}', but not found",
            model.id
        ))
    })
}

pub(crate) fn instance(ctx: &ProcessingContext<'_>, key: Key) -> Result<ElementInstance, ProcessingError> {
    ctx.state.elements.get(key).cloned().ok_or_else(|| {
        ProcessingError::unexpected(format!("Expected element instance with key '{key}' to exist, but not found"))
    })
}

/// An element instance together with its definition.
pub(crate) struct ElementRef<'m> {
    pub key: Key,
    pub value: ProcessInstanceRecord,
    pub model: &'m ProcessModel,
    pub element: &'m ElementDef,
}

impl ElementRef<'_> {
    pub fn scope_key(&self) -> Key {
        self.value.flow_scope_key
    }

    /// The element's type, or `MULTI_INSTANCE_BODY` for the body wrapping a
    /// multi-instance activity.
    pub fn element_type(&self) -> BpmnElementType {
        if self.value.bpmn_element_type == BpmnElementType::MultiInstanceBody {
            BpmnElementType::MultiInstanceBody
        } else {
            self.element.element_type
        }
    }

    /// One iteration of a multi-instance activity.
    pub fn is_inner_instance(&self) -> bool {
        self.element.multi_instance.is_some() && self.value.bpmn_element_type != BpmnElementType::MultiInstanceBody
    }
}

// ── Record builders ──

/// Root element record of a new process instance.
pub(crate) fn root_record(process: &DeployedProcess, process_instance_key: Key) -> ProcessInstanceRecord {
    ProcessInstanceRecord {
        bpmn_process_id: process.bpmn_process_id.clone(),
        version: process.version,
        process_definition_key: process.key,
        process_instance_key,
        element_id: process.bpmn_process_id.clone(),
        flow_scope_key: NO_KEY,
        bpmn_element_type: BpmnElementType::Process,
        bpmn_event_type: BpmnEventType::Unspecified,
        parent_process_instance_key: NO_KEY,
        parent_element_instance_key: NO_KEY,
        root_process_instance_key: process_instance_key,
        element_instance_path: vec![vec![process_instance_key]],
        process_definition_path: vec![process.key],
        calling_element_path: Vec::new(),
        tenant_id: process.tenant_id.clone(),
    }
}

/// Root record of a process instance started by the call activity `caller`.
pub(crate) fn called_root_record(
    process: &DeployedProcess,
    process_instance_key: Key,
    caller: &ElementRef<'_>,
) -> ProcessInstanceRecord {
    let mut value = root_record(process, process_instance_key);
    value.parent_process_instance_key = caller.value.process_instance_key;
    value.parent_element_instance_key = caller.key;
    value.root_process_instance_key = caller.value.root_process_instance_key;
    value.element_instance_path = caller.value.element_instance_path.clone();
    value.element_instance_path.push(vec![process_instance_key]);
    value.process_definition_path = caller.value.process_definition_path.clone();
    value.process_definition_path.push(process.key);
    value.calling_element_path = caller.value.calling_element_path.clone();
    let index = caller
        .model
        .elements
        .keys()
        .position(|id| id == &caller.element.id)
        .unwrap_or_default();
    value.calling_element_path.push(index as i32);
    value
}

/// Record of an element instance `key` inside the scope `scope_key`. A
/// multi-instance activity is entered through its body; inside the body the
/// record is an inner instance of the activity itself.
pub(crate) fn child_record(
    scope: &ProcessInstanceRecord,
    scope_key: Key,
    key: Key,
    element: &ElementDef,
) -> ProcessInstanceRecord {
    let mut path = scope.element_instance_path.clone();
    match path.last_mut() {
        Some(last) => last.push(key),
        None => path.push(vec![key]),
    }
    let inside_body =
        scope.bpmn_element_type == BpmnElementType::MultiInstanceBody && scope.element_id == element.id;
    let element_type = if element.multi_instance.is_some() && !inside_body {
        BpmnElementType::MultiInstanceBody
    } else {
        element.element_type
    };
    ProcessInstanceRecord {
        element_id: element.id.clone(),
        flow_scope_key: scope_key,
        bpmn_element_type: element_type,
        bpmn_event_type: element.event_type,
        element_instance_path: path,
        ..scope.clone()
    }
}

fn flow_record(scope: &ProcessInstanceRecord, scope_key: Key, flow_id: &str) -> ProcessInstanceRecord {
    ProcessInstanceRecord {
        element_id: flow_id.to_string(),
        flow_scope_key: scope_key,
        bpmn_element_type: BpmnElementType::SequenceFlow,
        bpmn_event_type: BpmnEventType::Unspecified,
        ..scope.clone()
    }
}

fn process_event(value: &ProcessInstanceRecord, scope_key: Key, target: &str, variables: Variables, interrupting: bool) -> ProcessEventRecord {
    ProcessEventRecord {
        scope_key,
        target_element_id: target.to_string(),
        variables,
        process_definition_key: value.process_definition_key,
        process_instance_key: value.process_instance_key,
        interrupting,
        tenant_id: value.tenant_id.clone(),
    }
}

// ── Activation ──

/// Inputs of an element activation.
pub(crate) struct Activation {
    pub key: Key,
    pub value: ProcessInstanceRecord,
    /// Whether containers start their none start event.
    pub start_children: bool,
    /// Written as local variables of the new instance.
    pub variables: Variables,
}

/// Activates an element instance.
///
/// Activation is dropped when the flow scope is no longer active, and for
/// joining gateways whose tokens were already consumed by another
/// activation. An instance stuck in `ACTIVATING` behind an incident is
/// re-attempted.
pub(crate) fn activate_element(ctx: &mut ProcessingContext<'_>, activation: Activation) -> Outcome {
    let Activation {
        key,
        value,
        start_children,
        variables,
    } = activation;

    let scope = if value.flow_scope_key == NO_KEY {
        None
    } else {
        match ctx.state.elements.get(value.flow_scope_key) {
            Some(scope) if scope.state == ElementState::Activated => Some(scope),
            _ => {
                debug!(key, element_id = %value.element_id, "flow scope is not active, skip activation");
                return Ok(());
            }
        }
    };

    match ctx.state.elements.get(key).map(|instance| instance.state) {
        None => {
            let model = model_of(ctx, value.process_definition_key)?;
            let element = element_def(&model, &value.element_id)?;
            if is_join(element) && scope.and_then(|s| s.tokens_for(&element.id)).is_none() {
                debug!(key, element_id = %element.id, "join already activated, skip activation");
                return Ok(());
            }
            ctx.append_event(key, ProcessInstanceIntent::ElementActivating, value)?;
            set_local_variables(ctx, key, &variables)?;
        }
        Some(ElementState::Activating) => {}
        Some(_) => return Ok(()),
    }
    continue_activation(ctx, key, start_children)
}

/// Writes `ELEMENT_ACTIVATING` and the local variables of a new instance
/// now, and leaves the rest of the activation to a follow-up command. The
/// instance counts as an active child of its scope from here on.
pub(crate) fn begin_activation(
    ctx: &mut ProcessingContext<'_>,
    key: Key,
    value: ProcessInstanceRecord,
    variables: &Variables,
) -> Outcome {
    ctx.append_event(key, ProcessInstanceIntent::ElementActivating, value.clone())?;
    set_local_variables(ctx, key, variables)?;
    ctx.append_command(key, ProcessInstanceIntent::ActivateElement, value);
    Ok(())
}

/// Runs the activation of an instance in `ACTIVATING`: input mappings,
/// start execution listeners and the element's own behavior. Failures
/// become incidents on the instance.
pub(crate) fn continue_activation(ctx: &mut ProcessingContext<'_>, key: Key, start_children: bool) -> Outcome {
    match run_activation(ctx, key, start_children) {
        Err(ProcessingError::Incident(failure)) => raise_incident(ctx, key, failure),
        other => other,
    }
}

fn run_activation(ctx: &mut ProcessingContext<'_>, key: Key, start_children: bool) -> Outcome {
    let instance = instance(ctx, key)?;
    let model = model_of(ctx, instance.value.process_definition_key)?;
    let element = element_def(&model, &instance.value.element_id)?;
    let el = ElementRef {
        key,
        value: instance.value,
        model: &model,
        element,
    };
    if el.element_type() == BpmnElementType::MultiInstanceBody {
        return hooks::on_activate(ctx, &el, start_children);
    }

    if instance.completed_listeners == 0 && !element.inputs.is_empty() {
        let inputs = {
            let scope = ctx.state.scope(key);
            evaluate_mappings(ctx.expressions(), &element.inputs, &scope)?
        };
        set_local_variables(ctx, key, &inputs)?;
    }

    let start_listeners: Vec<&ExecutionListener> = element.listeners_for(ListenerEvent::Start).collect();
    if let Some(listener) = start_listeners.get(instance.completed_listeners as usize) {
        return create_listener_job(ctx, &el, listener, JobListenerEventType::Start);
    }

    hooks::on_activate(ctx, &el, start_children)
}

/// Writes `ELEMENT_ACTIVATED` followed by the subscriptions of the element:
/// its boundary events and `extra`. Boundary definitions are evaluated
/// before the transition so that a failure leaves the element activating.
/// Boundary events of a multi-instance activity belong to its body.
pub(crate) fn write_activated(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>, extra: Vec<EventSubscription>) -> Outcome {
    let (_, effects) = next_state(Some(ElementState::Activating), ProcessInstanceIntent::ElementActivated)
        .map_err(|err| ProcessingError::unexpected(err.to_string()))?;
    let mut subscriptions = Vec::new();
    if effects.contains(&LifecycleEffect::SubscribeBoundaryEvents) && !el.is_inner_instance() {
        for boundary_id in &el.element.boundary_events {
            let boundary = element_def(el.model, boundary_id)?;
            if let Some(subscription) = subscription_for(ctx, el.key, boundary)? {
                subscriptions.push(subscription);
            }
        }
    }
    subscriptions.extend(extra);

    ctx.append_event(el.key, ProcessInstanceIntent::ElementActivated, el.value.clone())?;
    for subscription in subscriptions {
        subscribe(ctx, &el.value, el.key, subscription)?;
    }
    Ok(())
}

// ── Completion ──

/// Completes an activated element, or re-attempts the completion of one
/// stuck in `COMPLETING`.
pub(crate) fn complete_element(ctx: &mut ProcessingContext<'_>, key: Key, chosen_flows: Option<Vec<String>>) -> Outcome {
    let Some(instance) = ctx.state.elements.get(key).cloned() else {
        return Ok(());
    };
    match instance.state {
        ElementState::Activated => {
            let (_, effects) = next_state(Some(instance.state), ProcessInstanceIntent::ElementCompleting)
                .map_err(|err| ProcessingError::unexpected(err.to_string()))?;
            ctx.append_event(key, ProcessInstanceIntent::ElementCompleting, instance.value)?;
            apply_effects(ctx, key, effects)?;
        }
        ElementState::Completing => {}
        _ => return Ok(()),
    }
    continue_completion(ctx, key, chosen_flows)
}

pub(crate) fn continue_completion(ctx: &mut ProcessingContext<'_>, key: Key, chosen_flows: Option<Vec<String>>) -> Outcome {
    match run_completion(ctx, key, chosen_flows) {
        Err(ProcessingError::Incident(failure)) => raise_incident(ctx, key, failure),
        other => other,
    }
}

fn run_completion(ctx: &mut ProcessingContext<'_>, key: Key, chosen_flows: Option<Vec<String>>) -> Outcome {
    let instance = instance(ctx, key)?;
    let model = model_of(ctx, instance.value.process_definition_key)?;
    let element = element_def(&model, &instance.value.element_id)?;
    let el = ElementRef {
        key,
        value: instance.value,
        model: &model,
        element,
    };
    if el.element_type() == BpmnElementType::MultiInstanceBody {
        super::multi_instance::on_body_completing(ctx, &el)?;
        ctx.append_event(key, ProcessInstanceIntent::ElementCompleted, el.value.clone())?;
        hooks::on_complete(ctx, &el, chosen_flows)?;
        return notify_flow_scope(ctx, &el.value);
    }

    let start_listeners = element.listeners_for(ListenerEvent::Start).count() as u32;
    if instance.completed_listeners <= start_listeners && element.element_type != BpmnElementType::EventBasedGateway {
        if el.is_inner_instance() {
            super::multi_instance::collect_output(ctx, &el)?;
        }
        apply_outputs(ctx, &el)?;
    }

    let end_listeners: Vec<&ExecutionListener> = element.listeners_for(ListenerEvent::End).collect();
    let completed_end = instance.completed_listeners.saturating_sub(start_listeners) as usize;
    if let Some(listener) = end_listeners.get(completed_end) {
        return create_listener_job(ctx, &el, listener, JobListenerEventType::End);
    }

    hooks::on_completing(ctx, &el)?;
    ctx.append_event(key, ProcessInstanceIntent::ElementCompleted, el.value.clone())?;
    hooks::on_complete(ctx, &el, chosen_flows)?;
    notify_flow_scope(ctx, &el.value)
}

/// Consumes the element's own trigger and merges its variables: through
/// the output mappings into the flow scope, or propagated from the element
/// when there are none.
fn apply_outputs(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    let trigger = ctx.state.triggers.peek(el.key).cloned();
    let trigger_variables = trigger.as_ref().map(|t| t.variables.clone()).unwrap_or_default();

    if el.element.outputs.is_empty() {
        if let Some(trigger) = &trigger {
            consume_trigger(ctx, &el.value, el.key, trigger)?;
        }
        return propagate_variables(ctx, el.key, &trigger_variables);
    }

    let outputs = {
        let scope = ctx.state.scope(el.key);
        let layered = Layered {
            top: &trigger_variables,
            below: &scope,
        };
        evaluate_mappings(ctx.expressions(), &el.element.outputs, &layered)?
    };
    if let Some(trigger) = &trigger {
        consume_trigger(ctx, &el.value, el.key, trigger)?;
    }
    propagate_variables(ctx, el.scope_key(), &outputs)
}

pub(crate) fn consume_trigger(
    ctx: &mut ProcessingContext<'_>,
    value: &ProcessInstanceRecord,
    scope_key: Key,
    trigger: &EventTrigger,
) -> Outcome {
    ctx.append_event(
        trigger.key,
        ProcessEventIntent::Triggered,
        process_event(
            value,
            scope_key,
            &trigger.target_element_id,
            trigger.variables.clone(),
            trigger.interrupting,
        ),
    )
}

/// Records an event for `scope_key` to consume. Returns the trigger key.
pub(crate) fn write_trigger(
    ctx: &mut ProcessingContext<'_>,
    value: &ProcessInstanceRecord,
    scope_key: Key,
    target_element_id: &str,
    variables: Variables,
    interrupting: bool,
) -> Result<Key, ProcessingError> {
    let key = ctx.next_key();
    ctx.append_event(
        key,
        ProcessEventIntent::Triggering,
        process_event(value, scope_key, target_element_id, variables, interrupting),
    )?;
    Ok(key)
}

// ── Termination ──

/// Terminates an element instance and everything below it. With
/// `notify_parent` the flow scope may complete afterwards; an interrupting
/// trigger pending on the instance activates its boundary event.
pub(crate) fn terminate_element(ctx: &mut ProcessingContext<'_>, key: Key, notify_parent: bool) -> Outcome {
    let Some(target) = ctx.state.elements.get(key).cloned() else {
        return Ok(());
    };
    if target.state.is_terminal() || target.state == ElementState::Terminating {
        return Ok(());
    }
    let (_, effects) = next_state(Some(target.state), ProcessInstanceIntent::ElementTerminating)
        .map_err(|err| ProcessingError::unexpected(err.to_string()))?;
    ctx.append_event(key, ProcessInstanceIntent::ElementTerminating, target.value.clone())?;
    apply_effects(ctx, key, effects)?;

    let model = model_of(ctx, target.value.process_definition_key)?;
    let element = element_def(&model, &target.value.element_id)?;
    let el = ElementRef {
        key,
        value: target.value,
        model: &model,
        element,
    };
    hooks::on_terminate(ctx, &el)?;

    let interrupting = ctx.state.triggers.interrupting(key).cloned();
    ctx.append_event(key, ProcessInstanceIntent::ElementTerminated, el.value.clone())?;

    if let Some(trigger) = interrupting {
        consume_trigger(ctx, &el.value, key, &trigger)?;
        let boundary = element_def(&model, &trigger.target_element_id)?;
        let scope = instance(ctx, el.scope_key())?.value;
        let boundary_key = ctx.next_key();
        write_trigger(ctx, &el.value, boundary_key, &boundary.id, trigger.variables.clone(), false)?;
        activate_element(
            ctx,
            Activation {
                key: boundary_key,
                value: child_record(&scope, el.scope_key(), boundary_key, boundary),
                start_children: false,
                variables: Variables::new(),
            },
        )?;
    }

    if el.value.flow_scope_key == NO_KEY {
        crate::message::correlate_buffered_starts(ctx, &el.value)?;
    }
    if notify_parent {
        notify_flow_scope(ctx, &el.value)?;
    }
    Ok(())
}

fn apply_effects(ctx: &mut ProcessingContext<'_>, key: Key, effects: &[LifecycleEffect]) -> Outcome {
    for effect in effects {
        match effect {
            LifecycleEffect::UnsubscribeEvents => unsubscribe(ctx, key)?,
            LifecycleEffect::CancelJob => cancel_job(ctx, key)?,
            LifecycleEffect::ResolveIncidents => resolve_incidents(ctx, key)?,
            LifecycleEffect::SubscribeBoundaryEvents => {}
        }
    }
    Ok(())
}

fn cancel_job(ctx: &mut ProcessingContext<'_>, key: Key) -> Outcome {
    let job_key = instance(ctx, key)?.job_key;
    if let Some(job) = ctx.state.jobs.get(job_key).map(|entry| entry.record.clone()) {
        ctx.append_event(job_key, JobIntent::Canceled, job)?;
    }
    Ok(())
}

pub(crate) fn resolve_incidents(ctx: &mut ProcessingContext<'_>, key: Key) -> Outcome {
    for incident_key in ctx.state.incidents.of_element(key) {
        if let Some(incident) = ctx.state.incidents.get(incident_key).cloned() {
            ctx.append_event(incident_key, IncidentIntent::Resolved, incident)?;
        }
    }
    Ok(())
}

/// Removes the pending tokens of a scope.
pub(crate) fn delete_tokens(ctx: &mut ProcessingContext<'_>, scope_key: Key) -> Outcome {
    let scope = instance(ctx, scope_key)?;
    for flows in scope.taken_flows.values() {
        for (flow_id, count) in flows {
            for _ in 0..*count {
                let key = ctx.next_key();
                ctx.append_event(
                    key,
                    ProcessInstanceIntent::SequenceFlowDeleted,
                    flow_record(&scope.value, scope_key, flow_id),
                )?;
            }
        }
    }
    Ok(())
}

// ── Flow scope notification ──

/// Called after a child of `child.flow_scope_key` completed or terminated.
pub(crate) fn notify_flow_scope(ctx: &mut ProcessingContext<'_>, child: &ProcessInstanceRecord) -> Outcome {
    let scope_key = child.flow_scope_key;
    let Some(scope) = ctx.state.elements.get(scope_key).cloned() else {
        return Ok(());
    };
    if scope.state != ElementState::Activated {
        return Ok(());
    }
    let model = model_of(ctx, scope.value.process_definition_key)?;
    let element = element_def(&model, &scope.value.element_id)?;
    let el = ElementRef {
        key: scope_key,
        value: scope.value,
        model: &model,
        element,
    };
    match el.element_type() {
        BpmnElementType::MultiInstanceBody => return super::multi_instance::check_body(ctx, &el),
        BpmnElementType::AdHocSubProcess => return super::adhoc::check_completion(ctx, &el),
        _ => {}
    }

    activate_satisfied_joins(ctx, &el)?;
    let scope = instance(ctx, scope_key)?;
    if scope.active_children == 0 && scope.pending_tokens() == 0 {
        complete_element(ctx, scope_key, None)?;
    }
    Ok(())
}

// ── Sequence flows ──

fn is_join(element: &ElementDef) -> bool {
    matches!(
        element.element_type,
        BpmnElementType::ParallelGateway | BpmnElementType::InclusiveGateway
    ) && element.incoming.len() > 1
}

/// A parallel join needs a token on every incoming flow. An inclusive join
/// needs a token on at least one, and for every flow without a token no
/// active element or pending token of the scope may still reach its source.
fn join_satisfied(ctx: &ProcessingContext<'_>, scope: &ElementInstance, model: &ProcessModel, join: &ElementDef) -> bool {
    let Some(tokens) = scope.tokens_for(&join.id) else {
        return false;
    };
    if join.element_type == BpmnElementType::ParallelGateway {
        return join.incoming.iter().all(|flow| tokens.contains_key(flow));
    }
    let active = ctx.state.elements.active_children(scope.key);
    join.incoming
        .iter()
        .filter(|flow| !tokens.contains_key(*flow))
        .filter_map(|flow| model.flow(flow))
        .all(|flow| {
            let reachable_by_child = active
                .iter()
                .any(|child| model.can_reach(child.element_id(), &flow.source));
            let reachable_by_token = scope
                .taken_flows
                .keys()
                .any(|target| target != &join.id && model.can_reach(target, &flow.source));
            !reachable_by_child && !reachable_by_token
        })
}

/// Takes the given outgoing flows of a completed element and activates
/// their targets. All flows are taken before any join is evaluated.
pub(crate) fn take_flows(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>, flow_ids: &[String]) -> Outcome {
    let scope_key = el.scope_key();
    let scope_value = instance(ctx, scope_key)?.value;

    let mut targets = Vec::with_capacity(flow_ids.len());
    for flow_id in flow_ids {
        let flow = el.model.flow(flow_id).ok_or_else(|| {
            ProcessingError::unexpected(format!("Expected sequence flow with id '{flow_id}', but not found"))
        })?;
        let key = ctx.next_key();
        ctx.append_event(
            key,
            ProcessInstanceIntent::SequenceFlowTaken,
            flow_record(&scope_value, scope_key, flow_id),
        )?;
        targets.push(flow.target.clone());
    }

    let mut joins = BTreeSet::new();
    for target_id in targets {
        let target = element_def(el.model, &target_id)?;
        if is_join(target) {
            if !joins.insert(target_id) {
                continue;
            }
            let scope = instance(ctx, scope_key)?;
            if !join_satisfied(ctx, &scope, el.model, target) {
                continue;
            }
        }
        let key = ctx.next_key();
        ctx.append_command(
            key,
            ProcessInstanceIntent::ActivateElement,
            child_record(&scope_value, scope_key, key, target),
        );
    }
    Ok(())
}

/// Takes one flow whose target is activated with a pre-allocated key.
pub(crate) fn take_flow_to(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>, flow_id: &str, target_key: Key) -> Outcome {
    let scope_key = el.scope_key();
    let scope_value = instance(ctx, scope_key)?.value;
    let flow = el.model.flow(flow_id).ok_or_else(|| {
        ProcessingError::unexpected(format!("Expected sequence flow with id '{flow_id}', but not found"))
    })?;
    let target = element_def(el.model, &flow.target)?;
    let key = ctx.next_key();
    ctx.append_event(
        key,
        ProcessInstanceIntent::SequenceFlowTaken,
        flow_record(&scope_value, scope_key, flow_id),
    )?;
    ctx.append_command(
        target_key,
        ProcessInstanceIntent::ActivateElement,
        child_record(&scope_value, scope_key, target_key, target),
    );
    Ok(())
}

/// Inclusive joins of a scope may become satisfied when a path dies out.
fn activate_satisfied_joins(ctx: &mut ProcessingContext<'_>, scope: &ElementRef<'_>) -> Outcome {
    let instance = instance(ctx, scope.key)?;
    let satisfied: Vec<&ElementDef> = instance
        .taken_flows
        .keys()
        .filter_map(|target| scope.model.element(target))
        .filter(|target| target.element_type == BpmnElementType::InclusiveGateway && is_join(target))
        .filter(|target| join_satisfied(ctx, &instance, scope.model, target))
        .collect();
    for join in satisfied {
        let key = ctx.next_key();
        ctx.append_command(
            key,
            ProcessInstanceIntent::ActivateElement,
            child_record(&instance.value, scope.key, key, join),
        );
    }
    Ok(())
}

/// Activates the none start event of a process or sub-process.
pub(crate) fn activate_start_event(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    let Some(start) = el.model.none_start_event(&el.element.id) else {
        return Err(ProcessingError::unexpected(format!(
            "Expected '{}' to have a none start event, but not found",
            el.element.id
        )));
    };
    let key = ctx.next_key();
    ctx.append_command(
        key,
        ProcessInstanceIntent::ActivateElement,
        child_record(&el.value, el.key, key, start),
    );
    Ok(())
}

// ── Variables ──

pub(crate) fn evaluate_mappings(
    expressions: &dyn ExpressionLanguage,
    mappings: &[Mapping],
    scope: &dyn VariableScope,
) -> Result<Variables, Failure> {
    let mut out = Variables::new();
    for mapping in mappings {
        let value = expressions
            .evaluate(&mapping.source, scope)
            .map_err(|err| Failure::new(ErrorType::IoMappingError, err.to_string()))?;
        out.insert(mapping.target.clone(), value);
    }
    Ok(out)
}

/// Creates or updates one variable of `scope_key`. Writes nothing when the
/// value is unchanged.
pub(crate) fn set_variable(ctx: &mut ProcessingContext<'_>, scope_key: Key, name: &str, value: Value) -> Outcome {
    let owner = instance(ctx, scope_key)?.value;
    let record = VariableRecord {
        name: name.to_string(),
        value: value.clone(),
        scope_key,
        process_instance_key: owner.process_instance_key,
        process_definition_key: owner.process_definition_key,
        bpmn_process_id: owner.bpmn_process_id,
        tenant_id: owner.tenant_id,
    };
    match ctx.state.variables.get(scope_key, name) {
        Some(existing) if existing.value == value => Ok(()),
        Some(existing) => {
            let key = existing.key;
            ctx.append_event(key, VariableIntent::Updated, record)
        }
        None => {
            let key = ctx.next_key();
            ctx.append_event(key, VariableIntent::Created, record)
        }
    }
}

pub(crate) fn set_local_variables(ctx: &mut ProcessingContext<'_>, scope_key: Key, variables: &Variables) -> Outcome {
    for (name, value) in variables {
        set_variable(ctx, scope_key, name, value.clone())?;
    }
    Ok(())
}

/// Each variable updates its nearest definition visible from `scope_key`,
/// or is created in the process instance scope.
pub(crate) fn propagate_variables(ctx: &mut ProcessingContext<'_>, scope_key: Key, variables: &Variables) -> Outcome {
    if variables.is_empty() {
        return Ok(());
    }
    let chain = ctx.state.scope_chain(scope_key);
    let Some(&root) = chain.last() else {
        return Ok(());
    };
    for (name, value) in variables {
        let target = ctx
            .state
            .find_variable(scope_key, name)
            .map(|(scope, _)| scope)
            .unwrap_or(root);
        set_variable(ctx, target, name, value.clone())?;
    }
    Ok(())
}

// ── Incidents ──

pub(crate) fn raise_incident(ctx: &mut ProcessingContext<'_>, key: Key, failure: Failure) -> Outcome {
    let value = instance(ctx, key)?.value;
    debug!(key, element_id = %value.element_id, error_type = ?failure.error_type, "raise incident: {}", failure.message);
    let incident = IncidentRecord {
        error_type: failure.error_type,
        error_message: failure.message,
        bpmn_process_id: value.bpmn_process_id,
        process_definition_key: value.process_definition_key,
        process_instance_key: value.process_instance_key,
        element_id: value.element_id,
        element_instance_key: key,
        job_key: NO_KEY,
        variable_scope_key: if failure.variable_scope_key == NO_KEY {
            key
        } else {
            failure.variable_scope_key
        },
        tenant_id: value.tenant_id,
    };
    let incident_key = ctx.next_key();
    ctx.append_event(incident_key, IncidentIntent::Created, incident)
}

pub(crate) fn raise_job_incident(
    ctx: &mut ProcessingContext<'_>,
    job_key: Key,
    job: &JobRecord,
    error_type: ErrorType,
    message: String,
) -> Outcome {
    let incident = IncidentRecord {
        error_type,
        error_message: message,
        bpmn_process_id: job.bpmn_process_id.clone(),
        process_definition_key: job.process_definition_key,
        process_instance_key: job.process_instance_key,
        element_id: job.element_id.clone(),
        element_instance_key: job.element_instance_key,
        job_key,
        variable_scope_key: job.element_instance_key,
        tenant_id: job.tenant_id.clone(),
    };
    let incident_key = ctx.next_key();
    ctx.append_event(incident_key, IncidentIntent::Created, incident)
}

// ── Jobs ──

/// Job to create for an element.
pub(crate) struct JobSpec {
    pub job_type: String,
    pub retries: i32,
    pub headers: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
    pub kind: JobKind,
    pub listener_event_type: JobListenerEventType,
}

pub(crate) fn create_job(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>, spec: JobSpec) -> Outcome {
    let job = JobRecord {
        job_type: spec.job_type,
        retries: spec.retries,
        custom_headers: spec.headers,
        tags: spec.tags,
        process_instance_key: el.value.process_instance_key,
        element_instance_key: el.key,
        element_id: el.element.id.clone(),
        bpmn_process_id: el.value.bpmn_process_id.clone(),
        process_definition_key: el.value.process_definition_key,
        process_definition_version: el.value.version,
        job_kind: spec.kind,
        listener_event_type: spec.listener_event_type,
        tenant_id: el.value.tenant_id.clone(),
        ..Default::default()
    };
    let key = ctx.next_key();
    ctx.append_event(key, JobIntent::Created, job)
}

pub(crate) fn evaluate_retries(ctx: &ProcessingContext<'_>, key: Key, expression: &str) -> Result<i32, Failure> {
    let scope = ctx.state.scope(key);
    ctx.expressions()
        .evaluate_integer(expression, &scope)
        .map(|retries| retries.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
        .map_err(|err| Failure::new(ErrorType::ExtractValueError, err.to_string()))
}

fn create_listener_job(
    ctx: &mut ProcessingContext<'_>,
    el: &ElementRef<'_>,
    listener: &ExecutionListener,
    event: JobListenerEventType,
) -> Outcome {
    let retries = evaluate_retries(ctx, el.key, &listener.retries)?;
    create_job(
        ctx,
        el,
        JobSpec {
            job_type: listener.job_type.clone(),
            retries,
            headers: BTreeMap::new(),
            tags: BTreeSet::new(),
            kind: JobKind::ExecutionListener,
            listener_event_type: event,
        },
    )
}

// ── Event subscriptions ──

/// A catch event an element instance waits for.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EventSubscription {
    Timer {
        target: String,
        due_date: Timestamp,
        repetitions: i32,
    },
    Signal {
        target: String,
        name: String,
    },
    Message {
        target: String,
        name: String,
        correlation_key: String,
        interrupting: bool,
    },
}

pub(crate) fn evaluate_timer(
    expressions: &dyn ExpressionLanguage,
    definition: &TimerDefinition,
    scope: &dyn VariableScope,
) -> Result<TimerSchedule, Failure> {
    let text = expressions
        .evaluate_string(&definition.expression, scope)
        .map_err(|err| Failure::new(ErrorType::ExtractValueError, err.to_string()))?;
    let schedule = match definition.kind {
        TimerKind::Duration => TimerSchedule::duration(&text),
        TimerKind::Cycle => TimerSchedule::cycle(&text),
        TimerKind::Date => TimerSchedule::date(&text),
    };
    schedule.map_err(|err| Failure::new(ErrorType::ExtractValueError, err.to_string()))
}

/// Subscription for the catch event `catch`, evaluated in `scope_key`.
/// Error events subscribe nothing; they are found when an error is thrown.
pub(crate) fn subscription_for(
    ctx: &ProcessingContext<'_>,
    scope_key: Key,
    catch: &ElementDef,
) -> Result<Option<EventSubscription>, ProcessingError> {
    match catch.event_type {
        BpmnEventType::Timer => {
            let Some(definition) = &catch.timer else {
                return Ok(None);
            };
            let scope = ctx.state.scope(scope_key);
            let schedule = evaluate_timer(ctx.expressions(), definition, &scope)?;
            Ok(Some(EventSubscription::Timer {
                target: catch.id.clone(),
                due_date: schedule.first_due_date(ctx.now()),
                repetitions: schedule.repetitions(),
            }))
        }
        BpmnEventType::Signal => Ok(catch.signal_name.as_ref().map(|name| EventSubscription::Signal {
            target: catch.id.clone(),
            name: name.clone(),
        })),
        BpmnEventType::Message => {
            let Some(message) = &catch.message else {
                return Ok(None);
            };
            let scope = ctx.state.scope(scope_key);
            let name = ctx
                .expressions()
                .evaluate_string(&message.name, &scope)
                .map_err(|err| Failure::new(ErrorType::ExtractValueError, err.to_string()))?;
            let correlation_key = match &message.correlation_key {
                Some(expression) => evaluate_correlation_key(ctx.expressions(), expression, &scope)?,
                None => String::new(),
            };
            Ok(Some(EventSubscription::Message {
                target: catch.id.clone(),
                name,
                correlation_key,
                interrupting: catch.interrupting,
            }))
        }
        _ => Ok(None),
    }
}

/// Correlation keys are strings or numbers; numbers are used in their
/// decimal form.
pub(crate) fn evaluate_correlation_key(
    expressions: &dyn ExpressionLanguage,
    expression: &str,
    scope: &dyn VariableScope,
) -> Result<String, Failure> {
    let value = expressions
        .evaluate(expression, scope)
        .map_err(|err| Failure::new(ErrorType::ExtractValueError, err.to_string()))?;
    match value {
        Value::String(key) => Ok(key),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(Failure::new(
            ErrorType::ExtractValueError,
            format!(
                "Failed to extract the correlation key for '{expression}': The value must be either a string or a number, but was '{}'.",
                crate::model::expression::type_name(&other)
            ),
        )),
    }
}

/// Opens a subscription owned by the element instance `owner`.
pub(crate) fn subscribe(
    ctx: &mut ProcessingContext<'_>,
    value: &ProcessInstanceRecord,
    owner: Key,
    subscription: EventSubscription,
) -> Outcome {
    let key = ctx.next_key();
    match subscription {
        EventSubscription::Timer {
            target,
            due_date,
            repetitions,
        } => ctx.append_event(
            key,
            TimerIntent::Created,
            TimerRecord {
                element_instance_key: owner,
                process_instance_key: value.process_instance_key,
                process_definition_key: value.process_definition_key,
                due_date,
                target_element_id: target,
                repetitions,
                tenant_id: value.tenant_id.clone(),
            },
        ),
        EventSubscription::Signal { target, name } => ctx.append_event(
            key,
            SignalSubscriptionIntent::Created,
            SignalSubscriptionRecord {
                signal_name: name,
                process_definition_key: value.process_definition_key,
                bpmn_process_id: value.bpmn_process_id.clone(),
                catch_event_id: target,
                catch_event_instance_key: owner,
                tenant_id: value.tenant_id.clone(),
            },
        ),
        EventSubscription::Message {
            target,
            name,
            correlation_key: _,
            interrupting: _,
        } if owner == NO_KEY => ctx.append_event(
            key,
            MessageStartEventSubscriptionIntent::Created,
            MessageStartEventSubscriptionRecord {
                process_definition_key: value.process_definition_key,
                bpmn_process_id: value.bpmn_process_id.clone(),
                start_event_id: target,
                message_name: name,
                tenant_id: value.tenant_id.clone(),
                ..Default::default()
            },
        ),
        EventSubscription::Message {
            target,
            name,
            correlation_key,
            interrupting,
        } => crate::message::open_subscription(
            ctx,
            key,
            ProcessMessageSubscriptionRecord {
                process_instance_key: value.process_instance_key,
                element_instance_key: owner,
                element_id: target,
                bpmn_process_id: value.bpmn_process_id.clone(),
                message_name: name,
                correlation_key,
                interrupting,
                tenant_id: value.tenant_id.clone(),
                ..Default::default()
            },
        ),
    }
}

pub(crate) fn unsubscribe(ctx: &mut ProcessingContext<'_>, owner: Key) -> Outcome {
    let timers: Vec<(Key, TimerRecord)> = ctx
        .state
        .timers
        .of_element(owner)
        .into_iter()
        .map(|(key, timer)| (key, timer.clone()))
        .collect();
    for (key, timer) in timers {
        ctx.append_event(key, TimerIntent::Canceled, timer)?;
    }
    let signals: Vec<SignalSubscriptionRecord> =
        ctx.state.signals.of_element(owner).into_iter().cloned().collect();
    for subscription in signals {
        let key = ctx.next_key();
        ctx.append_event(key, SignalSubscriptionIntent::Deleted, subscription)?;
    }
    crate::message::close_subscriptions(ctx, owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mapping, SimpleExpressionLanguage};
    use serde_json::json;

    fn scope_record() -> ProcessInstanceRecord {
        ProcessInstanceRecord {
            bpmn_process_id: "order".to_string(),
            process_definition_key: 10,
            process_instance_key: 1,
            element_id: "order".to_string(),
            bpmn_element_type: BpmnElementType::Process,
            root_process_instance_key: 1,
            element_instance_path: vec![vec![1]],
            process_definition_path: vec![10],
            ..Default::default()
        }
    }

    #[test]
    fn child_records_extend_the_instance_path() {
        let task = ElementDef::new("task", BpmnElementType::ServiceTask);
        let child = child_record(&scope_record(), 1, 5, &task);
        assert_eq!(child.element_instance_path, vec![vec![1, 5]]);
        assert_eq!(child.flow_scope_key, 1);
        assert_eq!(child.process_definition_key, 10);
        assert_eq!(child.bpmn_element_type, BpmnElementType::ServiceTask);

        let grandchild = child_record(&child, 5, 7, &task);
        assert_eq!(grandchild.element_instance_path, vec![vec![1, 5, 7]]);
    }

    #[test]
    fn multi_instance_activities_are_entered_through_their_body() {
        let mut task = ElementDef::new("task", BpmnElementType::ServiceTask);
        task.multi_instance = Some(crate::model::MultiInstanceDefinition {
            sequential: false,
            input_collection: "=items".to_string(),
            input_element: None,
            output_collection: None,
            output_element: None,
            completion_condition: None,
        });
        let body = child_record(&scope_record(), 1, 5, &task);
        assert_eq!(body.bpmn_element_type, BpmnElementType::MultiInstanceBody);
        let inner = child_record(&body, 5, 6, &task);
        assert_eq!(inner.bpmn_element_type, BpmnElementType::ServiceTask);
        assert_eq!(inner.element_instance_path, vec![vec![1, 5, 6]]);
    }

    #[test]
    fn correlation_keys_are_strings_or_numbers() {
        let vars = json!({"order": 42, "name": "o-1", "flag": true});
        let scope = vars.as_object().unwrap();
        let language = SimpleExpressionLanguage;
        assert_eq!(evaluate_correlation_key(&language, "=order", scope).unwrap(), "42");
        assert_eq!(evaluate_correlation_key(&language, "=name", scope).unwrap(), "o-1");
        let failure = evaluate_correlation_key(&language, "=flag", scope).unwrap_err();
        assert_eq!(failure.error_type, ErrorType::ExtractValueError);
        assert!(failure.message.contains("BOOLEAN"));
    }

    #[test]
    fn sequence_flows_share_the_scope_path() {
        let flow = flow_record(&scope_record(), 1, "start-task");
        assert_eq!(flow.element_id, "start-task");
        assert_eq!(flow.bpmn_element_type, BpmnElementType::SequenceFlow);
        assert_eq!(flow.element_instance_path, vec![vec![1]]);
    }

    #[test]
    fn mapping_failures_are_io_mapping_incidents() {
        let vars = json!({"order": {"total": 12}});
        let scope = vars.as_object().unwrap();
        let mappings = vec![Mapping {
            source: "=order.total".to_string(),
            target: "amount".to_string(),
        }];
        let out = evaluate_mappings(&SimpleExpressionLanguage, &mappings, scope).unwrap();
        assert_eq!(out.get("amount"), Some(&json!(12)));

        let broken = vec![Mapping {
            source: "=order.".to_string(),
            target: "amount".to_string(),
        }];
        let failure = evaluate_mappings(&SimpleExpressionLanguage, &broken, scope).unwrap_err();
        assert_eq!(failure.error_type, ErrorType::IoMappingError);
    }

    #[test]
    fn timer_definitions_are_evaluated_before_parsing() {
        let vars = json!({"wait": "PT5S"});
        let scope = vars.as_object().unwrap();
        let definition = TimerDefinition {
            kind: TimerKind::Duration,
            expression: "=wait".to_string(),
        };
        let schedule = evaluate_timer(&SimpleExpressionLanguage, &definition, scope).unwrap();
        assert_eq!(schedule.first_due_date(1_000), 6_000);

        let bad = TimerDefinition {
            kind: TimerKind::Cycle,
            expression: "every now and then".to_string(),
        };
        let failure = evaluate_timer(&SimpleExpressionLanguage, &bad, scope).unwrap_err();
        assert_eq!(failure.error_type, ErrorType::ExtractValueError);
    }
}
