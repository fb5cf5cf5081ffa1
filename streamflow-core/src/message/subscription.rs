use super::correlate_subscription;
use crate::bpmn::events::trigger_catch_event;
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use tracing::debug;

/// `MESSAGE_SUBSCRIPTION:CREATE` on the partition of the correlation key.
/// The oldest buffered message that has not reached the subscription's
/// process yet correlates right away.
pub(super) struct CreateMessageSubscriptionProcessor;

impl CommandProcessor for CreateMessageSubscriptionProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let subscription = ctx.value::<MessageSubscriptionRecord>()?.clone();
        if ctx.state.message_subscriptions.get(&subscription).is_some() {
            return Ok(());
        }
        ctx.append_event(command.key, MessageSubscriptionIntent::Created, subscription.clone())?;

        let buffered = ctx
            .state
            .messages
            .buffered(
                &subscription.tenant_id,
                &subscription.message_name,
                &subscription.correlation_key,
            )
            .into_iter()
            .find(|(key, _)| !ctx.state.messages.is_correlated(*key, &subscription.bpmn_process_id))
            .map(|(key, message)| (key, message.clone()));
        if let Some((message_key, message)) = buffered {
            correlate_subscription(ctx, message_key, &message, &subscription)?;
        }
        Ok(())
    }
}

/// `MESSAGE_SUBSCRIPTION:DELETE`; a subscription already gone is ignored.
pub(super) struct DeleteMessageSubscriptionProcessor;

impl CommandProcessor for DeleteMessageSubscriptionProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let request = ctx.value::<MessageSubscriptionRecord>()?;
        let Some(subscription) = ctx.state.message_subscriptions.get(request).cloned() else {
            return Ok(());
        };
        ctx.append_event(command.key, MessageSubscriptionIntent::Deleted, subscription)?;
        Ok(())
    }
}

/// `PROCESS_MESSAGE_SUBSCRIPTION:CORRELATE` on the partition of the waiting
/// element: the catch event is triggered with the message's variables.
pub(super) struct CorrelateProcessMessageSubscriptionProcessor;

impl CommandProcessor for CorrelateProcessMessageSubscriptionProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let request = ctx.value::<ProcessMessageSubscriptionRecord>()?;
        let Some(open) = ctx
            .state
            .process_message_subscriptions
            .get(request.element_instance_key, &request.element_id)
            .cloned()
        else {
            return Err(Rejection::not_found(format!(
                "Expected to correlate subscription for element with key '{}' and message name '{}', but no such message subscription exists",
                request.element_instance_key, request.message_name
            ))
            .into());
        };

        let correlated = ProcessMessageSubscriptionRecord {
            message_key: request.message_key,
            variables: request.variables.clone(),
            ..open
        };
        ctx.append_event(command.key, ProcessMessageSubscriptionIntent::Correlated, correlated.clone())?;
        debug!(
            element = correlated.element_instance_key,
            element_id = %correlated.element_id,
            message = correlated.message_key,
            "message subscription correlated"
        );
        trigger_catch_event(
            ctx,
            correlated.element_instance_key,
            &correlated.element_id,
            correlated.variables,
        )
    }
}
