use super::find_job;
use super::lifecycle::JobState;
use crate::bpmn::behavior::{complete_element, raise_job_incident, terminate_element, write_trigger};
use crate::bpmn::events::find_error_catch;
use crate::bpmn::task_listener;
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use crate::state::JobEntry;
use crate::types::Key;
use tracing::debug;

fn expect_state(entry: &JobEntry, operation: &str, allowed: &[JobState]) -> Result<(), Rejection> {
    if allowed.contains(&entry.state) {
        return Ok(());
    }
    Err(Rejection::invalid_state(format!(
        "Expected to {operation} job with key '{}', but it is in state '{}'",
        entry.key, entry.state
    )))
}

/// While a job is activated and its deadline has not passed, only the
/// worker it was handed to may act on it. A command naming no worker is
/// accepted.
fn expect_assigned(ctx: &ProcessingContext<'_>, entry: &JobEntry, worker: &str, operation: &str) -> Result<(), Rejection> {
    let assigned = &entry.record.worker;
    if entry.state != JobState::Activated || worker.is_empty() || worker == assigned || entry.record.deadline <= ctx.now() {
        return Ok(());
    }
    Err(Rejection::invalid_state(format!(
        "Expected to {operation} job with key '{}' as worker '{worker}', but it is activated by worker '{assigned}'",
        entry.key
    )))
}

/// `JOB:COMPLETE`: the element waiting on the job continues with the
/// job's variables.
pub(super) struct CompleteJobProcessor;

impl CommandProcessor for CompleteJobProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let request = ctx.value::<JobRecord>()?;
        let variables = request.variables.clone();
        let entry = find_job(ctx, command.key, "complete")?;
        expect_state(&entry, "complete", &[JobState::Activatable, JobState::Activated])?;
        expect_assigned(ctx, &entry, &request.worker, "complete")?;

        if entry.record.job_kind == JobKind::TaskListener {
            expect_listener_result(&entry, &request)?;
        } else if request.result.denied {
            return Err(Rejection::invalid_argument(format!(
                "Expected to complete job with key '{}' with a denial, but only 'completing' task listener jobs can deny",
                entry.key
            ))
            .into());
        }

        let mut completed = entry.record.clone();
        completed.variables = variables.clone();
        completed.result = request.result.clone();
        ctx.append_event(entry.key, JobIntent::Completed, completed.clone())?;

        let element_key = entry.record.element_instance_key;
        let Some(element) = ctx.state.elements.get(element_key).filter(|e| e.is_active()).cloned() else {
            return Ok(());
        };
        if entry.record.job_kind == JobKind::TaskListener {
            return task_listener::listener_completed(ctx, &completed);
        }
        write_trigger(ctx, &element.value, element_key, &element.value.element_id, variables, false)?;
        match entry.record.job_kind {
            JobKind::ExecutionListener => {
                ctx.append_command(
                    element_key,
                    ProcessInstanceIntent::CompleteExecutionListener,
                    element.value,
                );
                Ok(())
            }
            _ if element.value.bpmn_element_type == BpmnElementType::UserTask => {
                task_listener::complete_user_task(ctx, element_key)
            }
            _ => complete_element(ctx, element_key, None),
        }
    }
}

fn expect_listener_result(entry: &JobEntry, request: &JobRecord) -> Result<(), Rejection> {
    if !request.variables.is_empty() {
        return Err(Rejection::invalid_argument(format!(
            "Expected to complete task listener job with key '{}', but Task Listener job completion with variables payload provided is not yet supported",
            entry.key
        )));
    }
    if request.result.denied && entry.record.listener_event_type != JobListenerEventType::Completing {
        return Err(Rejection::invalid_argument(format!(
            "Expected to complete task listener job with key '{}' with a denial, but only 'completing' listeners can deny the work on a user task",
            entry.key
        )));
    }
    Ok(())
}

/// `JOB:FAIL`: decrements retries as the worker says. Without retries left
/// an incident is raised; with a backoff the job waits before it can be
/// activated again.
pub(super) struct FailJobProcessor;

impl CommandProcessor for FailJobProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let request = ctx.value::<JobRecord>()?;
        let entry = find_job(ctx, command.key, "fail")?;
        expect_state(&entry, "fail", &[JobState::Activatable, JobState::Activated])?;
        expect_assigned(ctx, &entry, &request.worker, "fail")?;

        let mut failed = entry.record.clone();
        failed.retries = request.retries;
        failed.error_message = request.error_message.clone();
        failed.retry_backoff = request.retry_backoff;
        failed.variables = request.variables.clone();
        failed.deadline = -1;
        failed.recurring_time = if request.retries > 0 && request.retry_backoff > 0 {
            ctx.now() + request.retry_backoff
        } else {
            -1
        };
        ctx.append_event(entry.key, JobIntent::Failed, failed.clone())?;
        debug!(job = entry.key, retries = failed.retries, "job failed");

        if failed.retries <= 0 {
            let error_type = match failed.job_kind {
                JobKind::ExecutionListener => ErrorType::ExecutionListenerNoRetries,
                JobKind::TaskListener => ErrorType::TaskListenerNoRetries,
                _ => ErrorType::JobNoRetries,
            };
            let message = if failed.error_message.is_empty() {
                "No more retries left.".to_string()
            } else {
                failed.error_message.clone()
            };
            raise_job_incident(ctx, entry.key, &failed, error_type, message)?;
        }
        Ok(())
    }
}

/// `JOB:THROW_ERROR`: a business error from the worker. The nearest error
/// boundary catching the code interrupts its host; an uncaught error
/// becomes an incident on the job.
pub(super) struct ThrowErrorProcessor;

impl CommandProcessor for ThrowErrorProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let request = ctx.value::<JobRecord>()?;
        let entry = find_job(ctx, command.key, "throw an error for")?;
        expect_state(&entry, "throw an error for", &[JobState::Activatable, JobState::Activated])?;
        expect_assigned(ctx, &entry, &request.worker, "throw an error for")?;

        let mut thrown = entry.record.clone();
        thrown.error_code = request.error_code.clone();
        thrown.error_message = request.error_message.clone();
        thrown.variables = request.variables.clone();
        thrown.deadline = -1;
        ctx.append_event(entry.key, JobIntent::ErrorThrown, thrown.clone())?;

        match find_error_catch(ctx, thrown.element_instance_key, &thrown.error_code)? {
            Some(catch) => catch_error(ctx, catch.host_key, &catch.boundary_id, thrown.variables),
            None => raise_job_incident(
                ctx,
                entry.key,
                &thrown,
                ErrorType::UnhandledErrorEvent,
                format!(
                    "Expected to throw an error event with the code '{}' with message '{}', but it was not caught. No error events are available in the scope.",
                    thrown.error_code, thrown.error_message
                ),
            ),
        }
    }
}

fn catch_error(ctx: &mut ProcessingContext<'_>, host_key: Key, boundary_id: &str, variables: Variables) -> Result<(), ProcessingError> {
    let Some(host) = ctx.state.elements.get(host_key).cloned() else {
        return Ok(());
    };
    write_trigger(ctx, &host.value, host_key, boundary_id, variables, true)?;
    terminate_element(ctx, host_key, true)
}
