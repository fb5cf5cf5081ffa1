//! User task listeners.
//!
//! `creating` listeners run one after another once the user task is
//! activated, before its job is created. `completing` listeners run after
//! the user task's job completed; its variables wait as a trigger on the
//! task until the last listener completed. A `completing` listener may deny
//! the completion: the variables are dropped and the task gets a new job.

use super::behavior::{
    complete_element, consume_trigger, create_job, element_def, evaluate_retries, instance,
    model_of, raise_incident, write_activated, ElementRef, JobSpec, Outcome,
};
use super::hooks::job_spec;
use super::lifecycle::ElementState;
use crate::engine::ProcessingContext;
use crate::error::ProcessingError;
use crate::model::{TaskListener, TaskListenerEvent};
use crate::record::*;
use crate::types::{Key, NO_KEY};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub(super) fn activate_user_task(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    let spec = job_spec(ctx, el)?;
    write_activated(ctx, el, Vec::new())?;
    continue_creation(ctx, el, Some(spec))
}

fn create_listener_job(
    ctx: &mut ProcessingContext<'_>,
    el: &ElementRef<'_>,
    listener: &TaskListener,
    event: JobListenerEventType,
) -> Outcome {
    let retries = evaluate_retries(ctx, el.key, &listener.retries)?;
    create_job(
        ctx,
        el,
        JobSpec {
            job_type: listener.job_type.clone(),
            retries,
            headers: BTreeMap::new(),
            tags: BTreeSet::new(),
            kind: JobKind::TaskListener,
            listener_event_type: event,
        },
    )
}

/// Next `creating` listener, or the task's own job once all of them ran.
fn continue_creation(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>, spec: Option<JobSpec>) -> Outcome {
    let completed = instance(ctx, el.key)?.completed_task_listeners as usize;
    if let Some(listener) = el.element.task_listeners_for(TaskListenerEvent::Creating).nth(completed) {
        return create_listener_job(ctx, el, listener, JobListenerEventType::Creating);
    }
    let spec = match spec {
        Some(spec) => spec,
        None => job_spec(ctx, el)?,
    };
    create_job(ctx, el, spec)
}

/// Next `completing` listener, or the completion of the task.
fn continue_completing(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>) -> Outcome {
    let completed = instance(ctx, el.key)?.completed_task_listeners as usize;
    if let Some(listener) = el.element.task_listeners_for(TaskListenerEvent::Completing).nth(completed) {
        return create_listener_job(ctx, el, listener, JobListenerEventType::Completing);
    }
    complete_element(ctx, el.key, None)
}

fn deny_completion(ctx: &mut ProcessingContext<'_>, el: &ElementRef<'_>, reason: &str) -> Outcome {
    debug!(key = el.key, element_id = %el.element.id, reason, "task completion denied");
    if let Some(trigger) = ctx.state.triggers.peek(el.key).cloned() {
        consume_trigger(ctx, &el.value, el.key, &trigger)?;
    }
    let spec = job_spec(ctx, el)?;
    create_job(ctx, el, spec)
}

/// Runs `step` on the activated user task `key`. Failures become incidents
/// on the task.
fn with_task(
    ctx: &mut ProcessingContext<'_>,
    key: Key,
    step: impl FnOnce(&mut ProcessingContext<'_>, &ElementRef<'_>) -> Outcome,
) -> Outcome {
    let Some(task) = ctx.state.elements.get(key).filter(|e| e.state == ElementState::Activated).cloned() else {
        return Ok(());
    };
    let model = model_of(ctx, task.value.process_definition_key)?;
    let element = element_def(&model, task.element_id())?;
    let el = ElementRef {
        key,
        value: task.value,
        model: &model,
        element,
    };
    match step(ctx, &el) {
        Err(ProcessingError::Incident(failure)) => raise_incident(ctx, key, failure),
        other => other,
    }
}

/// The user task's own job completed; its variables are already waiting as
/// a trigger on the task.
pub(crate) fn complete_user_task(ctx: &mut ProcessingContext<'_>, key: Key) -> Outcome {
    with_task(ctx, key, continue_completing)
}

/// A task listener job completed.
pub(crate) fn listener_completed(ctx: &mut ProcessingContext<'_>, job: &JobRecord) -> Outcome {
    match job.listener_event_type {
        JobListenerEventType::Creating => with_task(ctx, job.element_instance_key, |ctx, el| {
            continue_creation(ctx, el, None)
        }),
        JobListenerEventType::Completing if job.result.denied => {
            with_task(ctx, job.element_instance_key, |ctx, el| {
                deny_completion(ctx, el, &job.result.denied_reason)
            })
        }
        JobListenerEventType::Completing => with_task(ctx, job.element_instance_key, continue_completing),
        _ => Ok(()),
    }
}

/// Continues a user task left without a job by an incident.
pub(crate) fn retry(ctx: &mut ProcessingContext<'_>, key: Key) -> Outcome {
    let job_key = ctx.state.elements.get(key).map(|task| task.job_key);
    if job_key != Some(NO_KEY) {
        return Ok(());
    }
    if ctx.state.triggers.has_any(key) {
        with_task(ctx, key, continue_completing)
    } else {
        with_task(ctx, key, |ctx, el| continue_creation(ctx, el, None))
    }
}
