use super::{close_start_events, subscribe_start_events};
use crate::auth::{AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use crate::state::{DeployedDecision, DeployedForm, DeployedProcess};
use crate::types::Key;
use tracing::info;

enum Resource {
    Process(DeployedProcess),
    Decision(DeployedDecision),
    Form(DeployedForm),
}

impl Resource {
    fn tenant_id(&self) -> &str {
        match self {
            Resource::Process(p) => &p.tenant_id,
            Resource::Decision(d) => &d.tenant_id,
            Resource::Form(f) => &f.tenant_id,
        }
    }

    fn id(&self) -> &str {
        match self {
            Resource::Process(p) => &p.bpmn_process_id,
            Resource::Decision(d) => &d.decision_id,
            Resource::Form(f) => &f.form_id,
        }
    }

    fn permission(&self) -> PermissionType {
        match self {
            Resource::Process(_) => PermissionType::DeleteProcess,
            Resource::Decision(_) => PermissionType::DeleteDrd,
            Resource::Form(_) => PermissionType::DeleteForm,
        }
    }
}

/// `RESOURCE_DELETION:DELETE` of a process definition, decision or form by
/// key. Instances still running a deleted process keep its model. When the
/// latest process version goes, the start events of the version before it
/// take over.
pub(super) struct DeleteResourceProcessor;

impl CommandProcessor for DeleteResourceProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let request = ctx.value::<ResourceDeletionRecord>()?;
        let resource_key = request.resource_key;
        let not_found = format!("Expected to delete resource but no resource found with key `{resource_key}`");

        let Some(resource) = find_resource(ctx, resource_key) else {
            if command.distributed {
                return Ok(());
            }
            return Err(Rejection::not_found(not_found).into());
        };
        if !command.distributed {
            ctx.authorize(
                &AuthorizationRequest::new(ResourceType::Resource, resource.permission())
                    .tenant(resource.tenant_id().to_string())
                    .resource_id(resource.id().to_string())
                    .not_found(not_found),
            )?;
        }

        let deletion_key = if command.distributed { command.key } else { ctx.next_key() };
        let deletion = ResourceDeletionRecord {
            resource_key,
            tenant_id: resource.tenant_id().to_string(),
        };
        ctx.append_event(deletion_key, ResourceDeletionIntent::Deleting, deletion.clone())?;
        match &resource {
            Resource::Process(process) => delete_process(ctx, process, !command.distributed)?,
            Resource::Decision(decision) => ctx.append_event(
                decision.key,
                DecisionIntent::Deleted,
                DecisionRecord {
                    decision_id: decision.decision_id.clone(),
                    decision_name: decision.decision_name.clone(),
                    version: decision.version,
                    decision_key: decision.key,
                    resource_name: decision.resource_name.clone(),
                    resource: decision.resource.clone(),
                    checksum: decision.checksum.clone(),
                    tenant_id: decision.tenant_id.clone(),
                },
            )?,
            Resource::Form(form) => ctx.append_event(
                form.key,
                FormIntent::Deleted,
                FormRecord {
                    form_id: form.form_id.clone(),
                    version: form.version,
                    form_key: form.key,
                    resource_name: form.resource_name.clone(),
                    resource: form.resource.clone(),
                    checksum: form.checksum.clone(),
                    tenant_id: form.tenant_id.clone(),
                },
            )?,
        }
        ctx.append_event(deletion_key, ResourceDeletionIntent::Deleted, deletion.clone())?;
        ctx.respond_with_last();
        info!(resource = resource_key, id = %resource.id(), "resource deleted");

        if !command.distributed {
            for partition_id in ctx.other_partitions() {
                ctx.distribute(
                    partition_id,
                    Record::command(ResourceDeletionIntent::Delete, deletion.clone()).with_key(deletion_key),
                );
            }
        }
        Ok(())
    }
}

fn find_resource(ctx: &ProcessingContext<'_>, key: Key) -> Option<Resource> {
    let deployments = &ctx.state.deployments;
    let resource = if let Some(process) = deployments.process(key) {
        (!process.deleted).then(|| Resource::Process(process.clone()))
    } else if let Some(decision) = deployments.decision(key) {
        (!decision.deleted).then(|| Resource::Decision(decision.clone()))
    } else {
        deployments
            .form(key)
            .filter(|form| !form.deleted)
            .map(|form| Resource::Form(form.clone()))
    }?;
    ctx.is_visible(resource.tenant_id()).then_some(resource)
}

fn delete_process(ctx: &mut ProcessingContext<'_>, process: &DeployedProcess, with_timers: bool) -> Result<(), ProcessingError> {
    let was_latest = ctx
        .state
        .deployments
        .latest_process(&process.tenant_id, &process.bpmn_process_id)
        .is_some_and(|latest| latest.key == process.key);
    let record = ProcessRecord {
        bpmn_process_id: process.bpmn_process_id.clone(),
        version: process.version,
        process_definition_key: process.key,
        resource_name: process.resource_name.clone(),
        resource: process.resource.clone(),
        checksum: process.checksum.clone(),
        tenant_id: process.tenant_id.clone(),
    };
    ctx.append_event(process.key, ProcessIntent::Deleting, record.clone())?;
    close_start_events(ctx, process)?;
    ctx.append_event(process.key, ProcessIntent::Deleted, record)?;

    if was_latest {
        let previous = ctx
            .state
            .deployments
            .latest_process(&process.tenant_id, &process.bpmn_process_id)
            .cloned();
        if let Some(previous) = previous {
            subscribe_start_events(ctx, &previous, with_timers)?;
        }
    }
    Ok(())
}
