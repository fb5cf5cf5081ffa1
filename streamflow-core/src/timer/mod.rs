//! Timers: due dates written by the scheduler as `TIMER:TRIGGER` commands.

pub mod schedule;

use crate::bpmn::behavior::{element_def, evaluate_timer, model_of};
use crate::bpmn::events::{start_process_at_event, trigger_catch_event};
use crate::bpmn::lifecycle::ElementState;
use crate::engine::{CommandProcessor, ProcessingContext, ProcessorRegistry};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use crate::types::NO_KEY;
use schedule::{remaining_after_trigger, should_reschedule};
use std::sync::Arc;
use tracing::debug;

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register_internal(&[TimerIntent::Trigger], Arc::new(TriggerTimerProcessor));
}

/// `TIMER:TRIGGER`. A start timer creates a process instance; any other
/// timer is delivered to the element instance that subscribed to it.
/// Cycles of start timers and non-interrupting boundary timers are
/// rescheduled under a new key.
struct TriggerTimerProcessor;

impl CommandProcessor for TriggerTimerProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let key = command.key;
        let Some(timer) = ctx.state.timers.get(key).cloned() else {
            return Err(Rejection::not_found(format!(
                "Expected to trigger timer with key '{key}', but no such timer was found"
            ))
            .into());
        };
        if timer.element_instance_key != NO_KEY {
            let owner_active = ctx
                .state
                .elements
                .get(timer.element_instance_key)
                .is_some_and(|owner| owner.state == ElementState::Activated);
            if !owner_active {
                return Err(Rejection::invalid_state(format!(
                    "Expected to trigger timer with key '{key}', but its element instance '{}' is not active",
                    timer.element_instance_key
                ))
                .into());
            }
        }

        ctx.append_event(key, TimerIntent::Triggered, timer.clone())?;
        debug!(timer = key, target = %timer.target_element_id, "timer triggered");

        let model = model_of(ctx, timer.process_definition_key)?;
        let target = element_def(&model, &timer.target_element_id)?;
        let repeats = target.element_type == BpmnElementType::StartEvent || !target.interrupting;

        if timer.element_instance_key == NO_KEY {
            let Some(process) = ctx
                .state
                .deployments
                .process(timer.process_definition_key)
                .filter(|process| !process.deleted)
                .cloned()
            else {
                return Ok(());
            };
            start_process_at_event(ctx, &process, &timer.target_element_id, Variables::new())?;
        } else {
            trigger_catch_event(ctx, timer.element_instance_key, &timer.target_element_id, Variables::new())?;
        }

        if repeats && should_reschedule(timer.repetitions) {
            let Some(definition) = target.timer.as_ref() else {
                return Ok(());
            };
            let still_subscribed = timer.element_instance_key == NO_KEY
                || ctx
                    .state
                    .elements
                    .get(timer.element_instance_key)
                    .is_some_and(|owner| owner.state == ElementState::Activated);
            if !still_subscribed {
                return Ok(());
            }
            // Expression failures only stop the cycle; the trigger itself succeeded.
            let schedule = {
                let scope = ctx.state.scope(timer.element_instance_key);
                evaluate_timer(ctx.expressions(), definition, &scope)
            };
            let Ok(schedule) = schedule else {
                return Ok(());
            };
            let next = TimerRecord {
                due_date: schedule.next_due_date(ctx.now()),
                repetitions: remaining_after_trigger(timer.repetitions),
                ..timer
            };
            let next_key = ctx.next_key();
            ctx.append_event(next_key, TimerIntent::Created, next)?;
        }
        Ok(())
    }
}
