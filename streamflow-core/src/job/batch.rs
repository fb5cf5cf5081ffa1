//! Job activation: hands activatable jobs of one type to a worker.

use crate::auth::{format_list, AuthorizationRequest, PermissionType, ResourceType};
use crate::bpmn::behavior::raise_job_incident;
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use crate::types::{Key, DEFAULT_TENANT};
use tracing::debug;

/// `JOB_BATCH:ACTIVATE`. Jobs are taken oldest first, limited by the
/// requested amount and by the encoded size of the batch. The batch is
/// truncated when more jobs were available than fit.
pub(super) struct ActivateJobBatchProcessor;

impl CommandProcessor for ActivateJobBatchProcessor {
    fn process(&self, _command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let request = ctx.value::<JobBatchRecord>()?;
        validate(request)?;

        let tenants: Vec<String> = if request.tenant_ids.is_empty() {
            vec![DEFAULT_TENANT.to_string()]
        } else {
            request.tenant_ids.clone()
        };
        let authorized = ctx.authorized_tenants();
        if tenants.iter().any(|tenant| !authorized.contains(tenant)) {
            return Err(Rejection::unauthorized(format!(
                "Expected to activate job batch for tenants '{}', but user is not authorized. Authorized tenants are '{}'",
                format_list(&tenants),
                authorized.describe()
            ))
            .into());
        }

        let candidates: Vec<(Key, JobRecord)> = ctx
            .state
            .jobs
            .activatable_of(&request.job_type)
            .filter(|entry| tenants.contains(&entry.record.tenant_id))
            .filter(|entry| {
                ctx.is_authorized(
                    &AuthorizationRequest::new(ResourceType::ProcessDefinition, PermissionType::UpdateProcessInstance)
                        .tenant(entry.record.tenant_id.clone())
                        .resource_id(entry.record.bpmn_process_id.clone()),
                )
            })
            .map(|entry| (entry.key, entry.record.clone()))
            .collect();

        let max_jobs = usize::try_from(request.max_jobs_to_activate).unwrap_or(0);
        let max_bytes = ctx.config().max_job_batch_bytes;
        let deadline = ctx.now() + request.timeout;

        let mut batch = request.clone();
        batch.tenant_ids = tenants;
        batch.job_keys.clear();
        batch.jobs.clear();
        batch.truncated = false;
        let mut batch_bytes = 0usize;
        let mut too_large = Vec::new();

        for (key, mut job) in candidates {
            if batch.jobs.len() >= max_jobs {
                batch.truncated = true;
                break;
            }
            job.worker = request.worker.clone();
            job.timeout = request.timeout;
            job.deadline = deadline;
            job.variables = ctx.state.visible_variables(job.element_instance_key);
            let size = encoded_size(&job);
            if batch_bytes.saturating_add(size) > max_bytes {
                if batch.jobs.is_empty() {
                    too_large.push((key, job));
                    continue;
                }
                batch.truncated = true;
                break;
            }
            batch_bytes += size;
            batch.job_keys.push(key);
            batch.jobs.push(job);
        }

        for (key, job) in too_large {
            fail_too_large(ctx, key, job, max_bytes)?;
        }

        debug!(
            job_type = %batch.job_type,
            worker = %batch.worker,
            activated = batch.jobs.len(),
            truncated = batch.truncated,
            "activated job batch"
        );
        let key = ctx.next_key();
        ctx.append_event(key, JobBatchIntent::Activated, batch)?;
        ctx.respond_with_last();
        Ok(())
    }
}

fn validate(request: &JobBatchRecord) -> Result<(), Rejection> {
    let reject = |what: &str, actual: String| {
        Rejection::invalid_argument(format!("Expected to activate job batch with {what}, but it was {actual}"))
    };
    if request.job_type.is_empty() {
        return Err(reject("type to be present", "blank".to_string()));
    }
    if request.worker.is_empty() {
        return Err(reject("worker to be present", "blank".to_string()));
    }
    if request.timeout < 1 {
        return Err(reject("timeout to be greater than zero", format!("'{}'", request.timeout)));
    }
    if request.max_jobs_to_activate < 1 {
        return Err(reject(
            "max jobs to activate to be greater than zero",
            format!("'{}'", request.max_jobs_to_activate),
        ));
    }
    Ok(())
}

fn encoded_size(job: &JobRecord) -> usize {
    serde_json::to_vec(job).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
}

/// A job that alone exceeds the batch limit can never be activated; it is
/// failed without retries and an incident is raised for it.
fn fail_too_large(ctx: &mut ProcessingContext<'_>, key: Key, job: JobRecord, max_bytes: usize) -> Result<(), ProcessingError> {
    let Some(entry) = ctx.state.jobs.get(key).cloned() else {
        return Ok(());
    };
    let mut failed = entry.record;
    failed.retries = 0;
    failed.error_message = format!(
        "The job batch exceeds the maximum size of {max_bytes} bytes with variables {}",
        job.variables.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    ctx.append_event(key, JobIntent::Failed, failed.clone())?;
    raise_job_incident(
        ctx,
        key,
        &failed,
        ErrorType::MessageSizeExceeded,
        failed.error_message.clone(),
    )
}
