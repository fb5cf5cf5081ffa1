//! Process instance migration: moves a running instance onto another
//! process definition, element by element, following mapping instructions.

use super::behavior::{element_def, model_of, subscribe, subscription_for, EventSubscription, Outcome};
use super::lifecycle::ElementState;
use crate::auth::{format_list, AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::model::ProcessModel;
use crate::record::*;
use crate::state::{DeployedProcess, ElementInstance};
use crate::types::Key;
use std::collections::{BTreeMap, BTreeSet};

pub(super) struct MigrateProcessInstanceProcessor;

impl CommandProcessor for MigrateProcessInstanceProcessor {
    fn process(&self, _command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let migration = ctx.value::<ProcessInstanceMigrationRecord>()?;
        let process_instance_key = migration.process_instance_key;
        let not_found = format!(
            "Expected to migrate process instance but no process instance found with key '{process_instance_key}'"
        );
        let Some(root) = ctx
            .state
            .elements
            .get(process_instance_key)
            .filter(|root| root.value.bpmn_element_type == BpmnElementType::Process && root.is_active())
            .cloned()
        else {
            return Err(Rejection::not_found(not_found).into());
        };
        ctx.authorize(
            &AuthorizationRequest::new(ResourceType::ProcessDefinition, PermissionType::UpdateProcessInstance)
                .tenant(root.value.tenant_id.clone())
                .resource_id(root.value.bpmn_process_id.clone())
                .not_found(not_found),
        )?;

        let target_key = migration.target_process_definition_key;
        let Some(target) = ctx
            .state
            .deployments
            .process(target_key)
            .filter(|process| !process.deleted)
            .cloned()
        else {
            return Err(Rejection::not_found(format!(
                "Expected to migrate process instance to process definition but no process definition found with key '{target_key}'"
            ))
            .into());
        };
        if target.tenant_id != root.value.tenant_id {
            return Err(Rejection::invalid_state(format!(
                "Expected to migrate process instance '{process_instance_key}' to a process definition of the same tenant '{}', but the target process definition belongs to tenant '{}'.",
                root.value.tenant_id, target.tenant_id
            ))
            .into());
        }

        let source = model_of(ctx, root.value.process_definition_key)?;
        let mappings = validate(ctx, &root, &source, &target, &migration.mapping_instructions)?;

        let mut instances: Vec<ElementInstance> = vec![root.clone()];
        instances.extend(
            ctx.state
                .elements
                .active_descendants(root.key)
                .into_iter()
                .cloned(),
        );
        for element in &instances {
            let target_element_id = if element.key == root.key {
                target.bpmn_process_id.clone()
            } else {
                mappings.get(element.element_id()).cloned().unwrap_or_default()
            };
            migrate_element(ctx, element, &target, &target_element_id, &mappings)?;
        }

        let mut migrated = migration.clone();
        migrated.tenant_id = root.value.tenant_id.clone();
        ctx.append_event(process_instance_key, ProcessInstanceMigrationIntent::Migrated, migrated)?;
        ctx.respond_with_last();
        Ok(())
    }
}

/// Checks the mapping instructions against both models and the running
/// instance. Returns the mapping from source to target element id.
fn validate(
    ctx: &ProcessingContext<'_>,
    root: &ElementInstance,
    source: &ProcessModel,
    target: &DeployedProcess,
    instructions: &[MappingInstruction],
) -> Result<BTreeMap<String, String>, Rejection> {
    let pi = root.key;
    let mut mappings = BTreeMap::new();
    let mut duplicates = BTreeSet::new();
    for instruction in instructions {
        if source.element(&instruction.source_element_id).is_none() {
            return Err(Rejection::invalid_argument(format!(
                "Expected to migrate process instance '{pi}' but mapping instructions contain a non-existing source element id '{}'. Elements provided in mapping instructions must exist in the source process definition.",
                instruction.source_element_id
            )));
        }
        if target.model.element(&instruction.target_element_id).is_none() {
            return Err(Rejection::invalid_argument(format!(
                "Expected to migrate process instance '{pi}' but mapping instructions contain a non-existing target element id '{}'. Elements provided in mapping instructions must exist in the target process definition.",
                instruction.target_element_id
            )));
        }
        if mappings
            .insert(instruction.source_element_id.clone(), instruction.target_element_id.clone())
            .is_some()
        {
            duplicates.insert(instruction.source_element_id.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(Rejection::invalid_argument(format!(
            "Expected to migrate process instance '{pi}' but the mapping instructions contain duplicate source element ids '{}'.",
            format_list(duplicates)
        )));
    }

    let active = ctx.state.elements.active_descendants(root.key);
    if root.pending_tokens() > 0 || active.iter().any(|instance| instance.pending_tokens() > 0) {
        return Err(Rejection::invalid_state(format!(
            "Expected to migrate process instance '{pi}' but it has taken sequence flows that have not reached their target yet. Migrating such instances is not supported."
        )));
    }
    if let Some(subscription) = ctx.state.process_message_subscriptions.of_process_instance(root.key).first() {
        return Err(Rejection::invalid_state(format!(
            "Expected to migrate process instance '{pi}' but it waits for message '{}' at element with id '{}'. Migrating message subscriptions is not supported.",
            subscription.message_name, subscription.element_id
        )));
    }
    for instance in &active {
        let source_id = instance.element_id();
        let Some(target_id) = mappings.get(source_id) else {
            return Err(Rejection::invalid_state(format!(
                "Expected to migrate process instance '{pi}' but no mapping instruction defined for active element with id '{source_id}'. Elements cannot be migrated without a mapping."
            )));
        };
        let target_element = target.model.element(target_id).ok_or_else(|| {
            Rejection::invalid_argument(format!("Expected target element '{target_id}' to exist"))
        })?;
        if target_element.element_type != instance.value.bpmn_element_type {
            return Err(Rejection::invalid_state(format!(
                "Expected to migrate process instance '{pi}' but active element with id '{source_id}' and type '{}' is mapped to an element with id '{target_id}' and different type '{}'. Elements must be mapped to elements of the same type.",
                instance.value.bpmn_element_type.as_str(),
                target_element.element_type.as_str()
            )));
        }
        if matches!(instance.state, ElementState::Activating | ElementState::Completing | ElementState::Terminating) {
            return Err(Rejection::invalid_state(format!(
                "Expected to migrate process instance '{pi}' but active element with id '{source_id}' is in state '{}'. Only activated elements can be migrated.",
                instance.state
            )));
        }

        let expected_scope = match ctx.state.elements.get(instance.value.flow_scope_key) {
            Some(scope) if scope.key == root.key => target.bpmn_process_id.clone(),
            Some(scope) => mappings.get(scope.element_id()).cloned().unwrap_or_default(),
            None => String::new(),
        };
        let actual_scope = target_element.flow_scope.clone().unwrap_or_default();
        if expected_scope != actual_scope {
            return Err(Rejection::invalid_state(format!(
                "Expected to migrate process instance '{pi}' but the flow scope of active element with id '{source_id}' is changed. The flow scope of the active element is expected to be '{expected_scope}' but was '{actual_scope}'. The flow scope of an element cannot be changed during migration yet."
            )));
        }
    }
    Ok(mappings)
}

/// Moves one element instance and everything it owns (variables, job,
/// incidents, subscriptions) onto the target definition.
fn migrate_element(
    ctx: &mut ProcessingContext<'_>,
    element: &ElementInstance,
    target: &DeployedProcess,
    target_element_id: &str,
    mappings: &BTreeMap<String, String>,
) -> Outcome {
    let definition = element_def(&target.model, target_element_id)?;
    let mut value = element.value.clone();
    value.bpmn_process_id = target.bpmn_process_id.clone();
    value.version = target.version;
    value.process_definition_key = target.key;
    value.element_id = definition.id.clone();
    value.bpmn_event_type = definition.event_type;
    if let Some(last) = value.process_definition_path.last_mut() {
        *last = target.key;
    }
    ctx.append_event(element.key, ProcessInstanceIntent::ElementMigrated, value.clone())?;

    let variables: Vec<(Key, VariableRecord)> = ctx
        .state
        .variables
        .scope(element.key)
        .map(|(name, stored)| {
            (
                stored.key,
                VariableRecord {
                    name: name.clone(),
                    value: stored.value.clone(),
                    scope_key: element.key,
                    process_instance_key: value.process_instance_key,
                    process_definition_key: target.key,
                    bpmn_process_id: target.bpmn_process_id.clone(),
                    tenant_id: value.tenant_id.clone(),
                },
            )
        })
        .collect();
    for (key, variable) in variables {
        ctx.append_event(key, VariableIntent::Migrated, variable)?;
    }

    if let Some(entry) = ctx.state.jobs.get(element.job_key).cloned() {
        let mut job = entry.record;
        job.bpmn_process_id = target.bpmn_process_id.clone();
        job.process_definition_key = target.key;
        job.process_definition_version = target.version;
        job.element_id = definition.id.clone();
        ctx.append_event(entry.key, JobIntent::Migrated, job)?;
    }

    for incident_key in ctx.state.incidents.of_element(element.key) {
        if let Some(mut incident) = ctx.state.incidents.get(incident_key).cloned() {
            incident.bpmn_process_id = target.bpmn_process_id.clone();
            incident.process_definition_key = target.key;
            incident.element_id = definition.id.clone();
            ctx.append_event(incident_key, IncidentIntent::Migrated, incident)?;
        }
    }

    migrate_subscriptions(ctx, element, &value, target, mappings)
}

/// Subscriptions of mapped catch events move along; the others are
/// closed, and catch events new in the target are subscribed.
fn migrate_subscriptions(
    ctx: &mut ProcessingContext<'_>,
    element: &ElementInstance,
    value: &ProcessInstanceRecord,
    target: &DeployedProcess,
    mappings: &BTreeMap<String, String>,
) -> Outcome {
    let mut kept = BTreeSet::new();

    let timers: Vec<(Key, TimerRecord)> = ctx
        .state
        .timers
        .of_element(element.key)
        .into_iter()
        .map(|(key, timer)| (key, timer.clone()))
        .collect();
    for (key, mut timer) in timers {
        match mapped_catch_event(&target.model, mappings, &timer.target_element_id, value, BpmnEventType::Timer) {
            Some(target_id) => {
                kept.insert(target_id.clone());
                timer.target_element_id = target_id;
                timer.process_definition_key = target.key;
                ctx.append_event(key, TimerIntent::Migrated, timer)?;
            }
            None => ctx.append_event(key, TimerIntent::Canceled, timer)?,
        }
    }

    let signals: Vec<SignalSubscriptionRecord> =
        ctx.state.signals.of_element(element.key).into_iter().cloned().collect();
    for subscription in signals {
        let mapped = mapped_catch_event(
            &target.model,
            mappings,
            &subscription.catch_event_id,
            value,
            BpmnEventType::Signal,
        );
        let key = ctx.next_key();
        ctx.append_event(key, SignalSubscriptionIntent::Deleted, subscription.clone())?;
        if let Some(target_id) = mapped {
            kept.insert(target_id.clone());
            let migrated = SignalSubscriptionRecord {
                catch_event_id: target_id,
                process_definition_key: target.key,
                bpmn_process_id: target.bpmn_process_id.clone(),
                ..subscription
            };
            let key = ctx.next_key();
            ctx.append_event(key, SignalSubscriptionIntent::Migrated, migrated)?;
        }
    }

    if element.state != ElementState::Activated {
        return Ok(());
    }
    let definition = element_def(&target.model, &value.element_id)?;
    let mut fresh: Vec<EventSubscription> = Vec::new();
    for boundary_id in &definition.boundary_events {
        if kept.contains(boundary_id) {
            continue;
        }
        let boundary = element_def(&target.model, boundary_id)?;
        if let Some(subscription) = subscription_for(ctx, element.key, boundary)? {
            fresh.push(subscription);
        }
    }
    for subscription in fresh {
        subscribe(ctx, value, element.key, subscription)?;
    }
    Ok(())
}

/// Target of a subscribed catch event: the element itself for an
/// intermediate catch event, otherwise the mapped boundary event, which
/// must still be of the same kind and attached to the migrated element.
fn mapped_catch_event(
    target: &ProcessModel,
    mappings: &BTreeMap<String, String>,
    source_catch_id: &str,
    value: &ProcessInstanceRecord,
    event_type: BpmnEventType,
) -> Option<String> {
    if value.bpmn_element_type == BpmnElementType::IntermediateCatchEvent {
        return Some(value.element_id.clone());
    }
    let mapped = mappings.get(source_catch_id)?;
    let catch = target.element(mapped)?;
    let attached_here = catch.attached_to.as_deref() == Some(value.element_id.as_str());
    let follows_gateway = value.bpmn_element_type == BpmnElementType::EventBasedGateway;
    (catch.event_type == event_type && (attached_here || follows_gateway)).then(|| mapped.clone())
}
