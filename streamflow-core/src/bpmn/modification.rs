//! Process instance modification: activate elements anywhere in a running
//! instance and terminate element instances, in one command.

use super::behavior::{instance, model_of, set_local_variables, terminate_element, Outcome};
use super::creation::activate_with_ancestors;
use super::lifecycle::ElementState;
use crate::auth::{format_list, AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::model::ProcessModel;
use crate::record::*;
use crate::state::ElementInstance;
use crate::types::{Key, NO_KEY};
use std::collections::BTreeSet;

pub(super) struct ModifyProcessInstanceProcessor;

impl CommandProcessor for ModifyProcessInstanceProcessor {
    fn process(&self, _command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let modification = ctx.value::<ProcessInstanceModificationRecord>()?;
        let process_instance_key = modification.process_instance_key;
        let not_found = format!(
            "Expected to modify process instance but no process instance found with key '{process_instance_key}'"
        );
        let Some(root) = ctx
            .state
            .elements
            .get(process_instance_key)
            .filter(|root| root.value.bpmn_element_type == BpmnElementType::Process && root.state == ElementState::Activated)
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

        let model = model_of(ctx, root.value.process_definition_key)?;
        let plan = plan(ctx, &root, &model, modification)?;

        let mut activated = Vec::new();
        for activation in &plan.activations {
            if !activation.root_variables.is_empty() {
                set_local_variables(ctx, process_instance_key, &activation.root_variables)?;
            }
            let key = activate_with_ancestors(
                ctx,
                &model,
                activation.ancestor_key,
                &activation.element_id,
                activation.own_variables.clone(),
            )?;
            for (scope_id, variables) in &activation.scope_variables {
                if let Some(scope_key) = enclosing_instance(ctx, key, scope_id) {
                    set_local_variables(ctx, scope_key, variables)?;
                }
            }
            activated.push(key);
        }

        let mut affected_scopes = BTreeSet::new();
        for key in &plan.terminations {
            if let Some(target) = ctx.state.elements.get(*key).filter(|target| target.is_active()) {
                affected_scopes.insert(target.value.flow_scope_key);
                terminate_element(ctx, *key, false)?;
            }
        }
        for scope_key in affected_scopes {
            terminate_empty_scopes(ctx, scope_key)?;
        }

        let mut modified = modification.clone();
        modified.activated_element_instance_keys = activated;
        modified.tenant_id = root.value.tenant_id.clone();
        ctx.append_event(process_instance_key, ProcessInstanceModificationIntent::Modified, modified)?;
        ctx.respond_with_last();
        Ok(())
    }
}

struct PlannedActivation {
    element_id: String,
    ancestor_key: Key,
    own_variables: Variables,
    root_variables: Variables,
    scope_variables: Vec<(String, Variables)>,
}

struct Plan {
    activations: Vec<PlannedActivation>,
    terminations: Vec<Key>,
}

/// Validates the instructions against the model and the running instance
/// and resolves move instructions into activations and terminations.
fn plan(
    ctx: &ProcessingContext<'_>,
    root: &ElementInstance,
    model: &ProcessModel,
    modification: &ProcessInstanceModificationRecord,
) -> Result<Plan, Rejection> {
    let process_id = &root.value.bpmn_process_id;
    let reject = |what: &str, items: Vec<String>| {
        Rejection::invalid_argument(format!(
            "Expected to modify instance of process '{process_id}' but it contains one or more {what}: {}",
            format_list(items)
        ))
    };
    let active: Vec<&ElementInstance> = ctx.state.elements.active_descendants(root.key);

    let unknown: Vec<String> = modification
        .activate_instructions
        .iter()
        .map(|i| i.element_id.clone())
        .chain(modification.move_instructions.iter().map(|m| m.target_element_id.clone()))
        .filter(|id| !is_activatable(model, id))
        .collect();
    if !unknown.is_empty() {
        return Err(reject("activate instructions with an element that could not be found", unknown));
    }

    let unknown_variable_scopes: Vec<String> = modification
        .activate_instructions
        .iter()
        .flat_map(|i| i.variable_instructions.iter())
        .map(|v| v.element_id.clone())
        .filter(|id| !id.is_empty() && model.element(id).is_none())
        .collect();
    if !unknown_variable_scopes.is_empty() {
        return Err(reject(
            "variable instructions with an element that could not be found",
            unknown_variable_scopes,
        ));
    }

    let unknown_terminations: Vec<String> = modification
        .terminate_instructions
        .iter()
        .map(|t| t.element_instance_key)
        .filter(|key| !active.iter().any(|instance| instance.key == *key))
        .map(|key| key.to_string())
        .collect();
    if !unknown_terminations.is_empty() {
        return Err(reject(
            "terminate instructions with an element instance that could not be found",
            unknown_terminations,
        ));
    }

    let mut activations = Vec::new();
    for instruction in &modification.activate_instructions {
        let ancestor_key = ancestor_for(root, model, &active, &instruction.element_id, instruction.ancestor_scope_key)
            .map_err(|reason| Rejection::invalid_argument(format!(
                "Expected to modify instance of process '{process_id}' but it contains one or more activate instructions {reason}"
            )))?;
        let mut planned = PlannedActivation {
            element_id: instruction.element_id.clone(),
            ancestor_key,
            own_variables: Variables::new(),
            root_variables: Variables::new(),
            scope_variables: Vec::new(),
        };
        for variables in &instruction.variable_instructions {
            if variables.element_id.is_empty() || variables.element_id == root.value.element_id {
                planned.root_variables.extend(variables.variables.clone());
            } else if variables.element_id == instruction.element_id {
                planned.own_variables.extend(variables.variables.clone());
            } else {
                planned
                    .scope_variables
                    .push((variables.element_id.clone(), variables.variables.clone()));
            }
        }
        activations.push(planned);
    }

    let mut terminations: Vec<Key> = modification
        .terminate_instructions
        .iter()
        .map(|t| t.element_instance_key)
        .collect();
    for instruction in &modification.move_instructions {
        for source in active.iter().filter(|i| i.element_id() == instruction.source_element_id) {
            terminations.push(source.key);
            let scope_key = source.value.flow_scope_key;
            let scope_is_ancestor = ctx
                .state
                .elements
                .get(scope_key)
                .map(|scope| {
                    scope_key == root.key
                        || model
                            .ancestors(&instruction.target_element_id)
                            .iter()
                            .any(|a| a.id == scope.element_id())
                })
                .unwrap_or(false);
            activations.push(PlannedActivation {
                element_id: instruction.target_element_id.clone(),
                ancestor_key: if scope_is_ancestor { scope_key } else { root.key },
                own_variables: Variables::new(),
                root_variables: Variables::new(),
                scope_variables: Vec::new(),
            });
        }
    }

    Ok(Plan {
        activations,
        terminations,
    })
}

fn is_activatable(model: &ProcessModel, element_id: &str) -> bool {
    model.element(element_id).is_some_and(|element| {
        element.attached_to.is_none()
            && !matches!(
                element.element_type,
                BpmnElementType::Process | BpmnElementType::SequenceFlow
            )
    })
}

/// Instance under which the element is activated. Without an explicit
/// ancestor the flow scope of the element must not be ambiguous.
fn ancestor_for(
    root: &ElementInstance,
    model: &ProcessModel,
    active: &[&ElementInstance],
    element_id: &str,
    ancestor_scope_key: Key,
) -> Result<Key, String> {
    let ancestors = model.ancestors(element_id);
    if ancestor_scope_key <= 0 {
        if let Some(scope) = ancestors.first().filter(|scope| scope.element_type != BpmnElementType::Process) {
            let instances = active
                .iter()
                .filter(|instance| instance.element_id() == scope.id && instance.state == ElementState::Activated)
                .count();
            if instances > 1 {
                return Err(format!(
                    "for an element that has a flow scope with more than one active instance: '{element_id}'"
                ));
            }
        }
        return Ok(root.key);
    }
    if ancestor_scope_key == root.key {
        return Ok(root.key);
    }
    let Some(ancestor) = active
        .iter()
        .find(|instance| instance.key == ancestor_scope_key && instance.state == ElementState::Activated)
    else {
        return Err(format!(
            "with an ancestor scope key that does not exist, or is not in an active state: '{ancestor_scope_key}'"
        ));
    };
    if !ancestors.iter().any(|scope| scope.id == ancestor.element_id()) {
        return Err(format!(
            "with an ancestor scope key that is not an ancestor of the element to activate: '{ancestor_scope_key}'"
        ));
    }
    Ok(ancestor_scope_key)
}

fn enclosing_instance(ctx: &ProcessingContext<'_>, from: Key, element_id: &str) -> Option<Key> {
    ctx.state
        .scope_chain(from)
        .into_iter()
        .find(|key| {
            ctx.state
                .elements
                .get(*key)
                .is_some_and(|instance| instance.element_id() == element_id)
        })
}

/// Terminates flow scopes left without anything to do, up to and
/// including the process instance.
fn terminate_empty_scopes(ctx: &mut ProcessingContext<'_>, scope_key: Key) -> Outcome {
    let mut current = scope_key;
    while current != NO_KEY {
        let scope = instance(ctx, current)?;
        if scope.state != ElementState::Activated || scope.active_children > 0 || scope.pending_tokens() > 0 {
            break;
        }
        terminate_element(ctx, current, false)?;
        current = scope.value.flow_scope_key;
    }
    Ok(())
}
