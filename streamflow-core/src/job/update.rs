use super::find_job;
use super::lifecycle::JobState;
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;

/// `JOB:UPDATE_RETRIES`. A failed job with retries again becomes
/// activatable once its incident is resolved.
pub(super) struct UpdateRetriesProcessor;

impl CommandProcessor for UpdateRetriesProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let retries = ctx.value::<JobRecord>()?.retries;
        let entry = find_job(ctx, command.key, "update retries of")?;
        if retries < 1 {
            return Err(Rejection::invalid_argument(format!(
                "Expected to update retries for job with key '{}' with a positive amount of retries, but the amount given was '{retries}'",
                entry.key
            ))
            .into());
        }
        let mut updated = entry.record.clone();
        updated.retries = retries;
        ctx.append_event(entry.key, JobIntent::RetriesUpdated, updated)?;
        Ok(())
    }
}

/// `JOB:UPDATE_TIMEOUT`: moves the deadline of an activated job to now
/// plus the new timeout.
pub(super) struct UpdateTimeoutProcessor;

impl CommandProcessor for UpdateTimeoutProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let timeout = ctx.value::<JobRecord>()?.timeout;
        let entry = find_job(ctx, command.key, "update")?;
        if entry.state != JobState::Activated {
            return Err(Rejection::invalid_state(format!(
                "Expected to update the timeout of job with key '{}', but it is not active",
                entry.key
            ))
            .into());
        }
        if timeout < 1 {
            return Err(Rejection::invalid_argument(format!(
                "Expected to update the timeout of job with key '{}' with a positive timeout, but the timeout given was '{timeout}'",
                entry.key
            ))
            .into());
        }
        let mut updated = entry.record.clone();
        updated.timeout = timeout;
        updated.deadline = ctx.now() + timeout;
        ctx.append_event(entry.key, JobIntent::TimeoutUpdated, updated)?;
        Ok(())
    }
}
