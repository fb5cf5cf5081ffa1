//! Messages: published to the partition owning their correlation key,
//! buffered until their time to live passes and correlated to catch events
//! and message start events.
//!
//! A catch event subscription lives twice: as a process message
//! subscription on the partition of the waiting element, and as a message
//! subscription on the partition of the correlation key. The two sides talk
//! through internal commands.

mod publish;
mod subscription;

use crate::bpmn::behavior::{model_of, Outcome};
use crate::bpmn::events::start_process_at_event;
use crate::engine::{ProcessingContext, ProcessorRegistry};
use crate::record::*;
use crate::types::{decode_partition_id, subscription_partition, Key, PartitionId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register(&[MessageIntent::Publish], Arc::new(publish::PublishMessageProcessor));
    registry.register_internal(&[MessageIntent::Expire], Arc::new(publish::ExpireMessageProcessor));
    registry.register_internal(
        &[MessageSubscriptionIntent::Create],
        Arc::new(subscription::CreateMessageSubscriptionProcessor),
    );
    registry.register_internal(
        &[MessageSubscriptionIntent::Delete],
        Arc::new(subscription::DeleteMessageSubscriptionProcessor),
    );
    registry.register_internal(
        &[ProcessMessageSubscriptionIntent::Correlate],
        Arc::new(subscription::CorrelateProcessMessageSubscriptionProcessor),
    );
}

/// Issues an internal command on `partition_id`: a follow-up command when it
/// is this partition, otherwise a distributed one.
fn send(
    ctx: &mut ProcessingContext<'_>,
    partition_id: PartitionId,
    key: Key,
    intent: impl Into<Intent>,
    value: impl Into<RecordValue>,
) {
    if partition_id == ctx.partition_id() {
        ctx.append_command(key, intent, value);
    } else {
        ctx.distribute(partition_id, Record::command(intent, value).with_key(key));
    }
}

fn message_side(subscription: &ProcessMessageSubscriptionRecord) -> MessageSubscriptionRecord {
    MessageSubscriptionRecord {
        process_instance_key: subscription.process_instance_key,
        element_instance_key: subscription.element_instance_key,
        element_id: subscription.element_id.clone(),
        bpmn_process_id: subscription.bpmn_process_id.clone(),
        message_name: subscription.message_name.clone(),
        correlation_key: subscription.correlation_key.clone(),
        interrupting: subscription.interrupting,
        message_key: subscription.message_key,
        variables: subscription.variables.clone(),
        tenant_id: subscription.tenant_id.clone(),
    }
}

fn process_side(subscription: &MessageSubscriptionRecord) -> ProcessMessageSubscriptionRecord {
    ProcessMessageSubscriptionRecord {
        process_instance_key: subscription.process_instance_key,
        element_instance_key: subscription.element_instance_key,
        element_id: subscription.element_id.clone(),
        bpmn_process_id: subscription.bpmn_process_id.clone(),
        message_name: subscription.message_name.clone(),
        correlation_key: subscription.correlation_key.clone(),
        interrupting: subscription.interrupting,
        message_key: subscription.message_key,
        variables: subscription.variables.clone(),
        tenant_id: subscription.tenant_id.clone(),
    }
}

/// Opens the catch event subscription `subscription` of a waiting element
/// and asks the partition of its correlation key to open the message side.
pub(crate) fn open_subscription(
    ctx: &mut ProcessingContext<'_>,
    key: Key,
    subscription: ProcessMessageSubscriptionRecord,
) -> Outcome {
    ctx.append_event(key, ProcessMessageSubscriptionIntent::Created, subscription.clone())?;
    let partition_id = subscription_partition(&subscription.correlation_key, ctx.config().partition_count);
    debug!(
        element = subscription.element_instance_key,
        message = %subscription.message_name,
        partition = partition_id,
        "open message subscription"
    );
    send(
        ctx,
        partition_id,
        key,
        MessageSubscriptionIntent::Create,
        message_side(&subscription),
    );
    Ok(())
}

/// Closes every message subscription owned by the element instance `owner`
/// on both sides.
pub(crate) fn close_subscriptions(ctx: &mut ProcessingContext<'_>, owner: Key) -> Outcome {
    let subscriptions: Vec<ProcessMessageSubscriptionRecord> = ctx
        .state
        .process_message_subscriptions
        .of_element(owner)
        .into_iter()
        .cloned()
        .collect();
    for subscription in subscriptions {
        let key = ctx.next_key();
        ctx.append_event(key, ProcessMessageSubscriptionIntent::Deleted, subscription.clone())?;
        let partition_id = subscription_partition(&subscription.correlation_key, ctx.config().partition_count);
        send(
            ctx,
            partition_id,
            key,
            MessageSubscriptionIntent::Delete,
            message_side(&subscription),
        );
    }
    Ok(())
}

/// Correlates the message `message_key` to an open message subscription and
/// forwards it to the partition of the waiting element.
fn correlate_subscription(
    ctx: &mut ProcessingContext<'_>,
    message_key: Key,
    message: &MessageRecord,
    subscription: &MessageSubscriptionRecord,
) -> Outcome {
    let mut correlated = subscription.clone();
    correlated.message_key = message_key;
    correlated.variables = message.variables.clone();
    let key = ctx.next_key();
    ctx.append_event(key, MessageSubscriptionIntent::Correlated, correlated.clone())?;
    debug!(
        message = message_key,
        element = correlated.element_instance_key,
        element_id = %correlated.element_id,
        "correlate message"
    );
    send(
        ctx,
        decode_partition_id(correlated.element_instance_key),
        key,
        ProcessMessageSubscriptionIntent::Correlate,
        process_side(&correlated),
    );
    Ok(())
}

/// Starts a process instance for every message start event subscribed to
/// `message`, at most one per process and none while an instance started
/// with the same correlation key is still running. `only` restricts the
/// starts to one bpmn process id; `skip` holds the processes the message
/// already reached and grows with each start.
fn correlate_to_start_events(
    ctx: &mut ProcessingContext<'_>,
    message_key: Key,
    message: &MessageRecord,
    only: Option<&str>,
    skip: &mut BTreeSet<String>,
) -> Outcome {
    let subscriptions: Vec<MessageStartEventSubscriptionRecord> = ctx
        .state
        .message_start_subscriptions
        .subscriptions(&message.tenant_id, &message.name)
        .into_iter()
        .filter(|sub| only.is_none_or(|id| id == sub.bpmn_process_id))
        .cloned()
        .collect();
    for subscription in subscriptions {
        let bpmn_process_id = subscription.bpmn_process_id.clone();
        if skip.contains(&bpmn_process_id) || ctx.state.messages.is_correlated(message_key, &bpmn_process_id) {
            continue;
        }
        if !message.correlation_key.is_empty()
            && ctx
                .state
                .messages
                .start_lock(&message.tenant_id, &bpmn_process_id, &message.correlation_key)
                .is_some()
        {
            debug!(message = message_key, process = %bpmn_process_id, "instance with correlation key still running");
            continue;
        }
        let Some(process) = ctx
            .state
            .deployments
            .process(subscription.process_definition_key)
            .filter(|process| !process.deleted)
            .cloned()
        else {
            continue;
        };
        let process_instance_key =
            start_process_at_event(ctx, &process, &subscription.start_event_id, message.variables.clone())?;
        let key = ctx.next_key();
        ctx.append_event(
            key,
            MessageStartEventSubscriptionIntent::Correlated,
            MessageStartEventSubscriptionRecord {
                message_key,
                process_instance_key,
                correlation_key: message.correlation_key.clone(),
                variables: message.variables.clone(),
                ..subscription
            },
        )?;
        skip.insert(bpmn_process_id);
    }
    Ok(())
}

/// Once an instance started by a message finished, buffered messages for
/// its process may start the next one.
pub(crate) fn correlate_buffered_starts(ctx: &mut ProcessingContext<'_>, root: &ProcessInstanceRecord) -> Outcome {
    let model = model_of(ctx, root.process_definition_key)?;
    if model.start_events(BpmnEventType::Message).is_empty() {
        return Ok(());
    }
    let buffered: Vec<(Key, MessageRecord)> = ctx
        .state
        .messages
        .buffered_in(&root.tenant_id)
        .into_iter()
        .map(|(key, message)| (key, message.clone()))
        .collect();
    for (message_key, message) in buffered {
        let mut skip = BTreeSet::new();
        correlate_to_start_events(ctx, message_key, &message, Some(&root.bpmn_process_id), &mut skip)?;
    }
    Ok(())
}
