use super::events::{start_process_at_event, trigger_catch_event};
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::record::*;
use crate::types::NO_KEY;
use tracing::debug;

/// `SIGNAL:BROADCAST`. The receiving partition forwards the broadcast to
/// every other partition with the same key; each partition triggers its
/// own subscriptions of the signal's tenant.
pub(super) struct BroadcastSignalProcessor;

impl CommandProcessor for BroadcastSignalProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let signal = ctx.value::<SignalRecord>()?;
        if !ctx.is_visible(&signal.tenant_id) {
            return Err(Rejection::unauthorized(format!(
                "Expected to broadcast signal for tenant '{}', but user is not authorized. Authorized tenants are '{}'",
                signal.tenant_id,
                ctx.authorized_tenants().describe()
            ))
            .into());
        }

        let key = if command.distributed && command.key != NO_KEY {
            command.key
        } else {
            ctx.next_key()
        };
        ctx.append_event(key, SignalIntent::Broadcasted, signal.clone())?;

        if !command.distributed {
            for partition_id in ctx.other_partitions() {
                let forwarded = Record::command(SignalIntent::Broadcast, signal.clone()).with_key(key);
                ctx.distribute(partition_id, forwarded);
            }
        }

        let subscriptions: Vec<SignalSubscriptionRecord> = ctx
            .state
            .signals
            .subscriptions(&signal.tenant_id, &signal.signal_name)
            .into_iter()
            .cloned()
            .collect();
        debug!(signal = %signal.signal_name, subscriptions = subscriptions.len(), "broadcast signal");

        for subscription in subscriptions {
            if subscription.catch_event_instance_key == NO_KEY {
                let Some(process) = ctx
                    .state
                    .deployments
                    .process(subscription.process_definition_key)
                    .filter(|process| !process.deleted)
                    .cloned()
                else {
                    continue;
                };
                start_process_at_event(ctx, &process, &subscription.catch_event_id, signal.variables.clone())?;
                continue;
            }
            let still_open = ctx
                .state
                .signals
                .of_element(subscription.catch_event_instance_key)
                .iter()
                .any(|open| open.catch_event_id == subscription.catch_event_id);
            if still_open {
                trigger_catch_event(
                    ctx,
                    subscription.catch_event_instance_key,
                    &subscription.catch_event_id,
                    signal.variables.clone(),
                )?;
            }
        }
        Ok(())
    }
}
