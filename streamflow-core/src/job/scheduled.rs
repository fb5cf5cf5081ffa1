//! Commands the partition's scheduler writes for jobs whose deadline or
//! retry backoff has passed.

use super::lifecycle::JobState;
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;

/// `JOB:TIME_OUT`: an activated job whose deadline passed becomes
/// activatable for other workers.
pub(super) struct TimeOutProcessor;

impl CommandProcessor for TimeOutProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let key = command.key;
        let Some(entry) = ctx.state.jobs.get(key).cloned() else {
            return Err(Rejection::not_found(format!(
                "Expected to time out job with key '{key}', but no such job was found"
            ))
            .into());
        };
        if entry.state != JobState::Activated || entry.record.deadline < 0 || entry.record.deadline > ctx.now() {
            return Err(Rejection::invalid_state(format!(
                "Expected to time out activated job with key '{key}', but it is in state '{}'",
                entry.state
            ))
            .into());
        }
        let mut timed_out = entry.record;
        timed_out.deadline = -1;
        timed_out.worker.clear();
        ctx.append_event(key, JobIntent::TimedOut, timed_out)?;
        Ok(())
    }
}

/// `JOB:RECUR_AFTER_BACKOFF`: a failed job with retries left becomes
/// activatable once its backoff elapsed.
pub(super) struct RecurAfterBackoffProcessor;

impl CommandProcessor for RecurAfterBackoffProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let key = command.key;
        let Some(entry) = ctx.state.jobs.get(key).cloned() else {
            return Err(Rejection::not_found(format!(
                "Expected to recur job with key '{key}' after backoff, but no such job was found"
            ))
            .into());
        };
        let due = entry.record.recurring_time >= 0 && entry.record.recurring_time <= ctx.now();
        if entry.state != JobState::Failed || entry.record.retries <= 0 || !due {
            return Err(Rejection::invalid_state(format!(
                "Expected to recur job with key '{key}' after backoff, but it is in state '{}'",
                entry.state
            ))
            .into());
        }
        let mut recurred = entry.record;
        recurred.recurring_time = -1;
        ctx.append_event(key, JobIntent::RecurredAfterBackoff, recurred)?;
        Ok(())
    }
}
