//! Incident resolution. Resolving an incident re-attempts the step that
//! raised it: the job becomes activatable again, or the element continues
//! its activation or completion.

use crate::auth::{AuthorizationRequest, PermissionType, ResourceType};
use crate::bpmn::adhoc::check_completion;
use crate::bpmn::behavior::{continue_activation, continue_completion, element_def, model_of, ElementRef};
use crate::bpmn::lifecycle::ElementState;
use crate::bpmn::multi_instance::check_body;
use crate::engine::{CommandProcessor, ProcessingContext, ProcessorRegistry};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use crate::types::{Key, NO_KEY};
use std::sync::Arc;
use tracing::debug;

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register(&[IncidentIntent::Resolve], Arc::new(ResolveIncidentProcessor));
}

struct ResolveIncidentProcessor;

impl CommandProcessor for ResolveIncidentProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let key = command.key;
        let not_found = format!("Expected to resolve incident with key '{key}', but no such incident was found");
        let Some(incident) = ctx.state.incidents.get(key).cloned() else {
            return Err(Rejection::not_found(not_found).into());
        };
        ctx.authorize(
            &AuthorizationRequest::new(ResourceType::ProcessDefinition, PermissionType::UpdateProcessInstance)
                .tenant(incident.tenant_id.clone())
                .resource_id(incident.bpmn_process_id.clone())
                .not_found(not_found),
        )?;

        if incident.job_key != NO_KEY {
            let retries = ctx.state.jobs.get(incident.job_key).map(|job| job.record.retries);
            if retries.is_some_and(|retries| retries <= 0) {
                return Err(Rejection::invalid_state(format!(
                    "Expected to resolve incident with key '{key}', but job with key '{}' has no retries left",
                    incident.job_key
                ))
                .into());
            }
            ctx.append_event(key, IncidentIntent::Resolved, incident)?;
            return Ok(());
        }

        ctx.append_event(key, IncidentIntent::Resolved, incident.clone())?;
        debug!(incident = key, element = incident.element_instance_key, "incident resolved");
        retry_element(ctx, incident.element_instance_key)
    }
}

/// Continues an element from where it stopped when the incident was raised.
fn retry_element(ctx: &mut ProcessingContext<'_>, key: Key) -> Result<(), ProcessingError> {
    let Some(instance) = ctx.state.elements.get(key).cloned() else {
        return Ok(());
    };
    match instance.state {
        ElementState::Activating => continue_activation(ctx, key, true),
        ElementState::Completing => continue_completion(ctx, key, None),
        ElementState::Activated
            if matches!(
                instance.value.bpmn_element_type,
                BpmnElementType::AdHocSubProcess | BpmnElementType::MultiInstanceBody
            ) =>
        {
            let model = model_of(ctx, instance.value.process_definition_key)?;
            let element = element_def(&model, instance.element_id())?;
            let el = ElementRef {
                key,
                value: instance.value.clone(),
                model: &model,
                element,
            };
            if instance.value.bpmn_element_type == BpmnElementType::MultiInstanceBody {
                check_body(ctx, &el)
            } else {
                check_completion(ctx, &el)
            }
        }
        ElementState::Activated if instance.value.bpmn_element_type == BpmnElementType::UserTask => {
            crate::bpmn::task_listener::retry(ctx, key)
        }
        _ => Ok(()),
    }
}
