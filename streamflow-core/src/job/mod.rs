//! Jobs: units of work performed outside the engine by workers, and the
//! commands workers and the scheduler send about them.

mod batch;
pub mod lifecycle;
mod scheduled;
mod update;
mod worker;

use crate::auth::{AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{ProcessingContext, ProcessorRegistry};
use crate::error::Rejection;
use crate::record::{JobBatchIntent, JobIntent};
use crate::state::JobEntry;
use crate::types::Key;
use std::sync::Arc;

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register(&[JobBatchIntent::Activate], Arc::new(batch::ActivateJobBatchProcessor));
    registry.register(&[JobIntent::Complete], Arc::new(worker::CompleteJobProcessor));
    registry.register(&[JobIntent::Fail], Arc::new(worker::FailJobProcessor));
    registry.register(&[JobIntent::ThrowError], Arc::new(worker::ThrowErrorProcessor));
    registry.register(&[JobIntent::UpdateRetries], Arc::new(update::UpdateRetriesProcessor));
    registry.register(&[JobIntent::UpdateTimeout], Arc::new(update::UpdateTimeoutProcessor));
    registry.register_internal(&[JobIntent::TimeOut], Arc::new(scheduled::TimeOutProcessor));
    registry.register_internal(
        &[JobIntent::RecurAfterBackoff],
        Arc::new(scheduled::RecurAfterBackoffProcessor),
    );
}

/// Loads the job a command refers to. Jobs of tenants the principal cannot
/// see are reported as missing; `operation` completes the sentence
/// "Expected to {operation} job with key ...".
pub(crate) fn find_job(ctx: &ProcessingContext<'_>, key: Key, operation: &str) -> Result<JobEntry, Rejection> {
    let not_found = format!("Expected to {operation} job with key '{key}', but no such job was found");
    let Some(entry) = ctx.state.jobs.get(key).cloned() else {
        return Err(Rejection::not_found(not_found));
    };
    ctx.authorize(
        &AuthorizationRequest::new(ResourceType::ProcessDefinition, PermissionType::UpdateProcessInstance)
            .tenant(entry.record.tenant_id.clone())
            .resource_id(entry.record.bpmn_process_id.clone())
            .not_found(not_found),
    )?;
    Ok(entry)
}
