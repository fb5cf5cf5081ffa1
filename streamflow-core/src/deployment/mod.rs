//! Deployments of process, decision and form resources, and their deletion.
//!
//! Resources are versioned per `(tenant, id)` on the partition that receives
//! the deployment and distributed as commands to every other partition,
//! which stores them under the same keys.

mod create;
mod delete;

use crate::bpmn::behavior::{root_record, subscribe, subscription_for};
use crate::engine::{ProcessingContext, ProcessorRegistry};
use crate::error::ProcessingError;
use crate::record::{
    BpmnEventType, DeploymentIntent, MessageStartEventSubscriptionIntent, MessageStartEventSubscriptionRecord,
    ResourceDeletionIntent, SignalSubscriptionIntent, SignalSubscriptionRecord, TimerIntent, TimerRecord,
};
use crate::state::DeployedProcess;
use crate::types::{Key, NO_KEY};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub(crate) fn register(registry: &mut ProcessorRegistry) {
    registry.register(&[DeploymentIntent::Create], Arc::new(create::CreateDeploymentProcessor));
    registry.register(&[ResourceDeletionIntent::Delete], Arc::new(delete::DeleteResourceProcessor));
}

/// SHA-256 of the resource text, hex encoded.
pub fn checksum(resource: &str) -> String {
    hex::encode(Sha256::digest(resource.as_bytes()))
}

/// Opens the start event subscriptions of a process definition: signal and
/// message subscriptions on every partition, timers only where `with_timers`.
pub(crate) fn subscribe_start_events(
    ctx: &mut ProcessingContext<'_>,
    process: &DeployedProcess,
    with_timers: bool,
) -> Result<(), ProcessingError> {
    let value = root_record(process, NO_KEY);
    let mut subscriptions = Vec::new();
    for event_type in [BpmnEventType::Timer, BpmnEventType::Signal, BpmnEventType::Message] {
        if event_type == BpmnEventType::Timer && !with_timers {
            continue;
        }
        for start in process.model.start_events(event_type) {
            if let Some(subscription) = subscription_for(ctx, NO_KEY, start)? {
                subscriptions.push(subscription);
            }
        }
    }
    for subscription in subscriptions {
        subscribe(ctx, &value, NO_KEY, subscription)?;
    }
    Ok(())
}

/// Closes the start timers and the signal and message start subscriptions
/// of a process definition.
pub(crate) fn close_start_events(ctx: &mut ProcessingContext<'_>, process: &DeployedProcess) -> Result<(), ProcessingError> {
    let timers: Vec<(Key, TimerRecord)> = ctx
        .state
        .timers
        .start_timers_of(process.key)
        .into_iter()
        .map(|(key, timer)| (key, timer.clone()))
        .collect();
    for (key, timer) in timers {
        ctx.append_event(key, TimerIntent::Canceled, timer)?;
    }
    let signals: Vec<SignalSubscriptionRecord> = ctx
        .state
        .signals
        .of_process_definition(process.key)
        .into_iter()
        .cloned()
        .collect();
    for subscription in signals {
        let key = ctx.next_key();
        ctx.append_event(key, SignalSubscriptionIntent::Deleted, subscription)?;
    }
    let messages: Vec<MessageStartEventSubscriptionRecord> = ctx
        .state
        .message_start_subscriptions
        .of_process_definition(process.key)
        .into_iter()
        .cloned()
        .collect();
    for subscription in messages {
        let key = ctx.next_key();
        ctx.append_event(key, MessageStartEventSubscriptionIntent::Deleted, subscription)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_hex_sha256() {
        assert_eq!(
            checksum(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(checksum("a"), checksum("b"));
    }
}
