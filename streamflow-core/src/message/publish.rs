use super::{correlate_subscription, correlate_to_start_events};
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use std::collections::BTreeSet;
use tracing::debug;

/// `MESSAGE:PUBLISH`. The message correlates right away to the open catch
/// event subscriptions of its name and correlation key, one per process, and
/// then to message start events. A message with a time to live stays
/// buffered for subscriptions opened later; one without expires at once.
pub(super) struct PublishMessageProcessor;

impl CommandProcessor for PublishMessageProcessor {
    fn process(&self, _command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let request = ctx.value::<MessageRecord>()?;
        if !ctx.is_visible(&request.tenant_id) {
            return Err(Rejection::unauthorized(format!(
                "Expected to publish message for tenant '{}', but user is not authorized. Authorized tenants are '{}'",
                request.tenant_id,
                ctx.authorized_tenants().describe()
            ))
            .into());
        }
        if ctx.state.messages.has_message_id(
            &request.tenant_id,
            &request.name,
            &request.correlation_key,
            &request.message_id,
        ) {
            return Err(Rejection::already_exists(format!(
                "Expected to publish a new message with id '{}', but a message with that id was already published",
                request.message_id
            ))
            .into());
        }

        let mut message = request.clone();
        message.deadline = ctx.now().saturating_add(message.time_to_live.max(0));
        let key = ctx.next_key();
        ctx.append_event(key, MessageIntent::Published, message.clone())?;

        let subscriptions: Vec<MessageSubscriptionRecord> = ctx
            .state
            .message_subscriptions
            .subscriptions(&message.tenant_id, &message.name, &message.correlation_key)
            .into_iter()
            .cloned()
            .collect();
        debug!(
            message = key,
            name = %message.name,
            correlation_key = %message.correlation_key,
            subscriptions = subscriptions.len(),
            "publish message"
        );
        let mut reached = BTreeSet::new();
        for subscription in subscriptions {
            if reached.contains(&subscription.bpmn_process_id) {
                continue;
            }
            correlate_subscription(ctx, key, &message, &subscription)?;
            reached.insert(subscription.bpmn_process_id);
        }
        correlate_to_start_events(ctx, key, &message, None, &mut reached)?;

        if message.time_to_live <= 0 {
            ctx.append_event(key, MessageIntent::Expired, message)?;
        }
        Ok(())
    }
}

/// `MESSAGE:EXPIRE`, written by the scheduler once a buffered message's
/// deadline passed.
pub(super) struct ExpireMessageProcessor;

impl CommandProcessor for ExpireMessageProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let key = command.key;
        let Some(message) = ctx.state.messages.get(key).cloned() else {
            return Err(Rejection::not_found(format!(
                "Expected to expire message with key '{key}', but no such message was found"
            ))
            .into());
        };
        ctx.append_event(key, MessageIntent::Expired, message)?;
        Ok(())
    }
}
