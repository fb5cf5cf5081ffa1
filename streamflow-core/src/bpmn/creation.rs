use super::behavior::{
    activate_element, child_record, element_def, instance, root_record, Activation, Outcome,
};
use super::lifecycle::ElementState;
use crate::auth::{AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::model::ProcessModel;
use crate::record::*;
use crate::state::DeployedProcess;
use crate::types::Key;
use tracing::debug;

pub(super) struct CreateProcessInstanceProcessor;

impl CommandProcessor for CreateProcessInstanceProcessor {
    fn process(&self, _command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let request = ctx.value::<ProcessInstanceCreationRecord>()?;

        if !ctx.is_visible(&request.tenant_id) {
            return Err(Rejection::unauthorized(format!(
                "Expected to create instance of process with tenant identifier '{}', but user is not authorized for this tenant",
                request.tenant_id
            ))
            .into());
        }
        let process = find_process(ctx, request)?;
        ctx.authorize(
            &AuthorizationRequest::new(ResourceType::ProcessDefinition, PermissionType::CreateProcessInstance)
                .tenant(process.tenant_id.clone())
                .resource_id(process.bpmn_process_id.clone()),
        )?;
        validate_start_instructions(&process.model, &request.start_instructions)?;

        let process_instance_key = ctx.next_key();
        activate_element(
            ctx,
            Activation {
                key: process_instance_key,
                value: root_record(&process, process_instance_key),
                start_children: request.start_instructions.is_empty(),
                variables: request.variables.clone(),
            },
        )?;
        for instruction in &request.start_instructions {
            activate_with_ancestors(
                ctx,
                &process.model,
                process_instance_key,
                &instruction.element_id,
                Variables::new(),
            )?;
        }

        let created = ProcessInstanceCreationRecord {
            bpmn_process_id: process.bpmn_process_id.clone(),
            version: process.version,
            process_definition_key: process.key,
            variables: request.variables.clone(),
            start_instructions: request.start_instructions.clone(),
            process_instance_key,
            tenant_id: process.tenant_id.clone(),
        };
        ctx.append_event(process_instance_key, ProcessInstanceCreationIntent::Created, created)?;
        ctx.respond_with_last();
        Ok(())
    }
}

fn find_process(
    ctx: &ProcessingContext<'_>,
    request: &ProcessInstanceCreationRecord,
) -> Result<DeployedProcess, Rejection> {
    let deployments = &ctx.state.deployments;
    if request.process_definition_key > 0 {
        return deployments
            .process(request.process_definition_key)
            .filter(|process| !process.deleted && ctx.is_visible(&process.tenant_id))
            .cloned()
            .ok_or_else(|| {
                Rejection::not_found(format!(
                    "Expected to find process definition with key '{}', but none found",
                    request.process_definition_key
                ))
            });
    }
    if request.bpmn_process_id.is_empty() {
        return Err(Rejection::invalid_argument(
            "Expected at least a bpmnProcessId or a key greater than -1, but none given",
        ));
    }
    if request.version < 0 {
        deployments
            .latest_process(&request.tenant_id, &request.bpmn_process_id)
            .cloned()
            .ok_or_else(|| {
                Rejection::not_found(format!(
                    "Expected to find process definition with process ID '{}', but none found",
                    request.bpmn_process_id
                ))
            })
    } else {
        deployments
            .process_version(&request.tenant_id, &request.bpmn_process_id, request.version)
            .cloned()
            .ok_or_else(|| {
                Rejection::not_found(format!(
                    "Expected to find process definition with process ID '{}' and version '{}', but none found",
                    request.bpmn_process_id, request.version
                ))
            })
    }
}

fn validate_start_instructions(model: &ProcessModel, instructions: &[StartInstruction]) -> Result<(), Rejection> {
    for instruction in instructions {
        let Some(element) = model.element(&instruction.element_id) else {
            return Err(Rejection::invalid_argument(format!(
                "Expected to create instance of process with start instructions but no element found with id '{}'.",
                instruction.element_id
            )));
        };
        if element.attached_to.is_some() || element.element_type == BpmnElementType::Process {
            return Err(Rejection::invalid_argument(format!(
                "Expected to create instance of process with start instructions but the element with id '{}' cannot be used as a start element.",
                instruction.element_id
            )));
        }
    }
    Ok(())
}

/// Activates `element_id` below the instance `ancestor_key`, reusing the
/// active instance of every flow scope in between or creating it.
/// Returns the key of the new element instance.
pub(super) fn activate_with_ancestors(
    ctx: &mut ProcessingContext<'_>,
    model: &ProcessModel,
    ancestor_key: Key,
    element_id: &str,
    variables: Variables,
) -> Result<Key, ProcessingError> {
    let ancestor = instance(ctx, ancestor_key)?;
    let element = element_def(model, element_id)?;

    // Scopes between the ancestor and the element, outermost first.
    let mut scopes: Vec<&str> = model
        .ancestors(element_id)
        .into_iter()
        .map(|scope| scope.id.as_str())
        .take_while(|id| *id != ancestor.element_id())
        .collect();
    scopes.reverse();

    let mut scope_key = ancestor_key;
    for scope_id in scopes {
        scope_key = scope_instance(ctx, model, scope_key, scope_id)?;
    }

    let scope = instance(ctx, scope_key)?;
    let key = ctx.next_key();
    debug!(key, element_id, scope_key, "activate element on request");
    activate_element(
        ctx,
        Activation {
            key,
            value: child_record(&scope.value, scope_key, key, element),
            start_children: true,
            variables,
        },
    )?;
    Ok(key)
}

fn scope_instance(
    ctx: &mut ProcessingContext<'_>,
    model: &ProcessModel,
    parent_key: Key,
    scope_id: &str,
) -> Result<Key, ProcessingError> {
    let existing = ctx
        .state
        .elements
        .active_children(parent_key)
        .into_iter()
        .find(|child| child.element_id() == scope_id && child.state == ElementState::Activated)
        .map(|child| child.key);
    if let Some(key) = existing {
        return Ok(key);
    }
    let parent = instance(ctx, parent_key)?;
    let definition = element_def(model, scope_id)?;
    let key = ctx.next_key();
    activate(ctx, key, child_record(&parent.value, parent_key, key, definition))?;
    Ok(key)
}

fn activate(ctx: &mut ProcessingContext<'_>, key: Key, value: ProcessInstanceRecord) -> Outcome {
    activate_element(
        ctx,
        Activation {
            key,
            value,
            start_children: false,
            variables: Variables::new(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_resource, ParsedResource, SimpleExpressionLanguage};

    const WITH_BOUNDARY: &str = r#"
kind: process
id: order
nodes:
  - type: start_event
    id: start
  - type: service_task
    id: task
    job_type: payment
  - type: boundary_event
    id: timeout
    attached_to: task
    timer:
      duration: PT1M
  - type: end_event
    id: end
  - type: end_event
    id: timed_out
flows:
  - from: start
    to: task
  - from: task
    to: end
  - from: timeout
    to: timed_out
"#;

    fn model() -> ProcessModel {
        match parse_resource("order.yaml", WITH_BOUNDARY, &SimpleExpressionLanguage).unwrap() {
            ParsedResource::Process(model) => model,
            other => panic!("expected a process, got {other:?}"),
        }
    }

    #[test]
    fn start_instructions_must_name_activatable_elements() {
        let model = model();
        let ok = vec![StartInstruction {
            element_id: "task".into(),
        }];
        assert!(validate_start_instructions(&model, &ok).is_ok());

        let missing = vec![StartInstruction {
            element_id: "nope".into(),
        }];
        let rejection = validate_start_instructions(&model, &missing).unwrap_err();
        assert_eq!(rejection.rejection_type, RejectionType::InvalidArgument);
        assert!(rejection.reason.contains("no element found with id 'nope'"));

        let boundary = vec![StartInstruction {
            element_id: "timeout".into(),
        }];
        assert!(validate_start_instructions(&model, &boundary).is_err());
    }

    #[test]
    fn unknown_version_is_reported_with_the_version() {
        let request = ProcessInstanceCreationRecord {
            bpmn_process_id: "order".into(),
            version: 3,
            ..Default::default()
        };
        let mut state = crate::state::ProcessingState::new(1);
        let env = crate::engine::ProcessingEnv::new(
            1,
            crate::config::EngineConfig::default(),
            std::sync::Arc::new(crate::model::SimpleExpressionLanguage),
        );
        let command = Record::command(ProcessInstanceCreationIntent::Create, request.clone());
        let ctx = ProcessingContext::new(&mut state, &env, &command);
        let rejection = find_process(&ctx, &request).unwrap_err();
        assert_eq!(rejection.rejection_type, RejectionType::NotFound);
        assert_eq!(
            rejection.reason,
            "Expected to find process definition with process ID 'order' and version '3', but none found"
        );
    }
}
