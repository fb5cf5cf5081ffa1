use super::{
    DeployedDecision, DeployedForm, DeployedProcess, ElementInstance, EventTrigger, JobEntry,
    ProcessingState,
};
use crate::bpmn::lifecycle::next_state;
use crate::error::EngineError;
use crate::job::lifecycle::{next_job_state, JobState, JobTransition};
use crate::model::{parse_resource, ExpressionLanguage, ParsedResource};
use crate::record::*;
use crate::types::{Key, NO_KEY};
use std::sync::Arc;

/// Applies events to the partition state. Used for live processing and for
/// replay; must never consult anything but the record and the state.
#[derive(Debug, Clone)]
pub struct EventAppliers {
    expressions: Arc<dyn ExpressionLanguage>,
}

fn typed<T: ValueVariant>(record: &Record) -> Result<&T, EngineError> {
    record.value_as::<T>().ok_or_else(|| {
        EngineError::CorruptState(format!(
            "{} {} carries a payload of another value type",
            record.value_type, record.intent
        ))
    })
}

fn corrupt(message: impl Into<String>) -> EngineError {
    EngineError::CorruptState(message.into())
}

impl EventAppliers {
    pub fn new(expressions: Arc<dyn ExpressionLanguage>) -> Self {
        Self { expressions }
    }

    pub fn apply(&self, state: &mut ProcessingState, record: &Record) -> Result<(), EngineError> {
        if !record.is_event() {
            return Ok(());
        }
        match record.intent {
            Intent::ProcessInstance(intent) => apply_process_instance(state, record, intent),
            Intent::ProcessEvent(intent) => apply_process_event(state, record, intent),
            Intent::Job(intent) => apply_job(state, record, intent),
            Intent::JobBatch(JobBatchIntent::Activated) => apply_job_batch(state, record),
            Intent::Timer(intent) => apply_timer(state, record, intent),
            Intent::Incident(intent) => apply_incident(state, record, intent),
            Intent::Variable(_) => {
                let variable = typed::<VariableRecord>(record)?;
                state.variables.set(
                    variable.scope_key,
                    variable.name.clone(),
                    record.key,
                    variable.value.clone(),
                );
                Ok(())
            }
            Intent::Deployment(DeploymentIntent::Created) => {
                state.deployments.put_deployment(record.key);
                Ok(())
            }
            Intent::Process(intent) => self.apply_process(state, record, intent),
            Intent::Decision(intent) => self.apply_decision(state, record, intent),
            Intent::Form(intent) => self.apply_form(state, record, intent),
            Intent::SignalSubscription(intent) => {
                let subscription = typed::<SignalSubscriptionRecord>(record)?;
                match intent {
                    SignalSubscriptionIntent::Created | SignalSubscriptionIntent::Migrated => {
                        state.signals.put(subscription.clone())
                    }
                    SignalSubscriptionIntent::Deleted => state.signals.remove(subscription),
                }
                Ok(())
            }
            Intent::Message(intent) => {
                let message = typed::<MessageRecord>(record)?;
                match intent {
                    MessageIntent::Published if message.time_to_live > 0 => {
                        state.messages.put(record.key, message.clone())
                    }
                    MessageIntent::Expired => state.messages.remove(record.key),
                    _ => {}
                }
                Ok(())
            }
            Intent::MessageSubscription(intent) => {
                let subscription = typed::<MessageSubscriptionRecord>(record)?;
                match intent {
                    MessageSubscriptionIntent::Created => state.message_subscriptions.put(subscription.clone()),
                    MessageSubscriptionIntent::Correlated => {
                        state
                            .messages
                            .mark_correlated(subscription.message_key, &subscription.bpmn_process_id);
                        if subscription.interrupting {
                            state.message_subscriptions.remove(subscription);
                        }
                    }
                    MessageSubscriptionIntent::Deleted => state.message_subscriptions.remove(subscription),
                    _ => {}
                }
                Ok(())
            }
            Intent::ProcessMessageSubscription(intent) => {
                let subscription = typed::<ProcessMessageSubscriptionRecord>(record)?;
                match intent {
                    ProcessMessageSubscriptionIntent::Created => {
                        state.process_message_subscriptions.put(subscription.clone())
                    }
                    ProcessMessageSubscriptionIntent::Correlated if subscription.interrupting => state
                        .process_message_subscriptions
                        .remove(subscription.element_instance_key, &subscription.element_id),
                    ProcessMessageSubscriptionIntent::Deleted => state
                        .process_message_subscriptions
                        .remove(subscription.element_instance_key, &subscription.element_id),
                    _ => {}
                }
                Ok(())
            }
            Intent::MessageStartEventSubscription(intent) => {
                let subscription = typed::<MessageStartEventSubscriptionRecord>(record)?;
                match intent {
                    MessageStartEventSubscriptionIntent::Created => {
                        state.message_start_subscriptions.put(subscription.clone())
                    }
                    MessageStartEventSubscriptionIntent::Correlated => {
                        state
                            .messages
                            .mark_correlated(subscription.message_key, &subscription.bpmn_process_id);
                        state.messages.lock_start(
                            &subscription.tenant_id,
                            &subscription.bpmn_process_id,
                            &subscription.correlation_key,
                            subscription.process_instance_key,
                        );
                    }
                    MessageStartEventSubscriptionIntent::Deleted => {
                        state.message_start_subscriptions.remove(subscription)
                    }
                }
                Ok(())
            }
            Intent::AdHocSubProcessInstruction(AdHocSubProcessInstructionIntent::Completed) => {
                let instruction = typed::<AdHocSubProcessInstructionRecord>(record)?;
                if let Some(instance) = state.elements.get_mut(instruction.ad_hoc_sub_process_instance_key) {
                    instance.completion_requested = true;
                }
                Ok(())
            }
            Intent::ClusterVariable(intent) => {
                let variable = typed::<ClusterVariableRecord>(record)?;
                match intent {
                    ClusterVariableIntent::Created | ClusterVariableIntent::Updated => {
                        state.cluster_variables.put(variable.clone())
                    }
                    ClusterVariableIntent::Deleted => state.cluster_variables.remove(variable),
                    _ => {}
                }
                Ok(())
            }
            Intent::Tenant(intent) => {
                let tenant = typed::<TenantRecord>(record)?;
                let member = (tenant.entity_type, tenant.entity_id.clone());
                match intent {
                    TenantIntent::Created => {
                        state.identity.put_tenant(record.key, &tenant.tenant_id, &tenant.name)
                    }
                    TenantIntent::EntityAdded => state.identity.add_tenant_member(&tenant.tenant_id, member),
                    TenantIntent::EntityRemoved => {
                        state.identity.remove_tenant_member(&tenant.tenant_id, &member)
                    }
                    _ => {}
                }
                Ok(())
            }
            Intent::User(UserIntent::Created) => {
                state.identity.put_user(record.key, typed::<UserRecord>(record)?.clone());
                Ok(())
            }
            Intent::Group(intent) => {
                let group = typed::<GroupRecord>(record)?;
                match intent {
                    GroupIntent::Created => state.identity.put_group(record.key, &group.group_id, &group.name),
                    GroupIntent::EntityAdded => state
                        .identity
                        .add_group_member(&group.group_id, (group.entity_type, group.entity_id.clone())),
                    _ => {}
                }
                Ok(())
            }
            Intent::MappingRule(MappingRuleIntent::Created) => {
                state
                    .identity
                    .put_mapping_rule(record.key, typed::<MappingRuleRecord>(record)?.clone());
                Ok(())
            }
            Intent::Authorization(intent) => {
                let authorization = typed::<AuthorizationRecord>(record)?;
                match intent {
                    AuthorizationIntent::Created => {
                        let mut stored = authorization.clone();
                        stored.authorization_key = record.key;
                        state.identity.put_authorization(record.key, stored);
                    }
                    AuthorizationIntent::Deleted => state.identity.remove_authorization(record.key),
                    _ => {}
                }
                Ok(())
            }
            // Events that only inform readers of the log.
            _ => Ok(()),
        }
    }

    fn parse(&self, resource_name: &str, resource: &str) -> Result<ParsedResource, EngineError> {
        parse_resource(resource_name, resource, self.expressions.as_ref())
            .map_err(|err| corrupt(format!("deployed resource no longer parses: {err}")))
    }

    fn apply_process(
        &self,
        state: &mut ProcessingState,
        record: &Record,
        intent: ProcessIntent,
    ) -> Result<(), EngineError> {
        let process = typed::<ProcessRecord>(record)?;
        match intent {
            ProcessIntent::Created => {
                let ParsedResource::Process(model) = self.parse(&process.resource_name, &process.resource)? else {
                    return Err(corrupt(format!("resource '{}' is not a process", process.resource_name)));
                };
                state.deployments.put_process(DeployedProcess {
                    key: process.process_definition_key,
                    bpmn_process_id: process.bpmn_process_id.clone(),
                    version: process.version,
                    tenant_id: process.tenant_id.clone(),
                    resource_name: process.resource_name.clone(),
                    resource: process.resource.clone(),
                    checksum: process.checksum.clone(),
                    model: Arc::new(model),
                    deleted: false,
                });
            }
            ProcessIntent::Deleted => state.deployments.delete_process(process.process_definition_key),
            ProcessIntent::Deleting => {}
        }
        Ok(())
    }

    fn apply_decision(
        &self,
        state: &mut ProcessingState,
        record: &Record,
        intent: DecisionIntent,
    ) -> Result<(), EngineError> {
        let decision = typed::<DecisionRecord>(record)?;
        match intent {
            DecisionIntent::Created => {
                let ParsedResource::Decision(model) = self.parse(&decision.resource_name, &decision.resource)? else {
                    return Err(corrupt(format!("resource '{}' is not a decision", decision.resource_name)));
                };
                state.deployments.put_decision(DeployedDecision {
                    key: decision.decision_key,
                    decision_id: decision.decision_id.clone(),
                    decision_name: decision.decision_name.clone(),
                    version: decision.version,
                    tenant_id: decision.tenant_id.clone(),
                    resource_name: decision.resource_name.clone(),
                    resource: decision.resource.clone(),
                    checksum: decision.checksum.clone(),
                    model: Arc::new(model),
                    deleted: false,
                });
            }
            DecisionIntent::Deleted => state.deployments.delete_decision(decision.decision_key),
        }
        Ok(())
    }

    fn apply_form(
        &self,
        state: &mut ProcessingState,
        record: &Record,
        intent: FormIntent,
    ) -> Result<(), EngineError> {
        let form = typed::<FormRecord>(record)?;
        match intent {
            FormIntent::Created => {
                let ParsedResource::Form(model) = self.parse(&form.resource_name, &form.resource)? else {
                    return Err(corrupt(format!("resource '{}' is not a form", form.resource_name)));
                };
                state.deployments.put_form(DeployedForm {
                    key: form.form_key,
                    form_id: form.form_id.clone(),
                    version: form.version,
                    tenant_id: form.tenant_id.clone(),
                    resource_name: form.resource_name.clone(),
                    resource: form.resource.clone(),
                    checksum: form.checksum.clone(),
                    model,
                    deleted: false,
                });
            }
            FormIntent::Deleted => state.deployments.delete_form(form.form_key),
        }
        Ok(())
    }
}

// ── Process instances ──

fn apply_process_instance(
    state: &mut ProcessingState,
    record: &Record,
    intent: ProcessInstanceIntent,
) -> Result<(), EngineError> {
    use ProcessInstanceIntent as I;
    let value = typed::<ProcessInstanceRecord>(record)?;
    match intent {
        I::ElementActivating => {
            if state.elements.get(record.key).is_some() {
                return Err(corrupt(format!("element instance {} activated twice", record.key)));
            }
            next_state(None, intent).map_err(|err| corrupt(err.to_string()))?;
            if let Some(scope) = state.elements.get_mut(value.flow_scope_key) {
                scope.active_children += 1;
                consume_token(scope, value);
            }
            if value.flow_scope_key == NO_KEY && value.parent_element_instance_key != NO_KEY {
                if let Some(caller) = state.elements.get_mut(value.parent_element_instance_key) {
                    caller.called_child_key = record.key;
                }
            }
            state.elements.insert(ElementInstance::new(record.key, value.clone()));
        }
        I::ElementActivated | I::ElementCompleting | I::ElementTerminating => {
            transition(state, record.key, intent)?;
        }
        I::ElementCompleted | I::ElementTerminated => {
            transition(state, record.key, intent)?;
            if let Some(instance) = state.elements.get_mut(record.key) {
                instance.taken_flows.clear();
            }
            if let Some(scope) = state.elements.get_mut(value.flow_scope_key) {
                scope.active_children = scope.active_children.saturating_sub(1);
            }
            state.variables.remove_scope(record.key);
            state.triggers.clear(record.key);
            if value.flow_scope_key == NO_KEY {
                state.elements.mark_finished(record.key);
                state.messages.release_start(record.key);
            }
        }
        I::SequenceFlowTaken | I::SequenceFlowDeleted => {
            let target = state
                .process_model(value.process_definition_key)
                .and_then(|model| model.flow(&value.element_id))
                .map(|flow| flow.target.clone())
                .ok_or_else(|| corrupt(format!("unknown sequence flow '{}'", value.element_id)))?;
            let scope = state
                .elements
                .get_mut(value.flow_scope_key)
                .ok_or_else(|| corrupt(format!("unknown flow scope {}", value.flow_scope_key)))?;
            let flows = scope.taken_flows.entry(target.clone()).or_default();
            let count = flows.entry(value.element_id.clone()).or_insert(0);
            if intent == I::SequenceFlowTaken {
                *count += 1;
            } else {
                *count = count.saturating_sub(1);
            }
            if *count == 0 {
                flows.remove(&value.element_id);
            }
            if flows.is_empty() {
                scope.taken_flows.remove(&target);
            }
        }
        I::ElementMigrated => {
            let instance = state
                .elements
                .get_mut(record.key)
                .ok_or_else(|| corrupt(format!("unknown element instance {}", record.key)))?;
            instance.value = value.clone();
        }
        // Commands never reach the appliers.
        I::Cancel
        | I::ActivateElement
        | I::CompleteElement
        | I::TerminateElement
        | I::CompleteExecutionListener => {}
    }
    Ok(())
}

fn transition(state: &mut ProcessingState, key: Key, intent: ProcessInstanceIntent) -> Result<(), EngineError> {
    let instance = state
        .elements
        .get_mut(key)
        .ok_or_else(|| corrupt(format!("unknown element instance {key}")))?;
    let (next, _) = next_state(Some(instance.state), intent).map_err(|err| corrupt(err.to_string()))?;
    instance.state = next;
    Ok(())
}

/// Joining gateways consume one token from every incoming flow that has
/// one; every other element consumes a single token.
fn consume_token(scope: &mut ElementInstance, value: &ProcessInstanceRecord) {
    let joins = matches!(
        value.bpmn_element_type,
        BpmnElementType::ParallelGateway | BpmnElementType::InclusiveGateway
    );
    let Some(flows) = scope.taken_flows.get_mut(&value.element_id) else {
        return;
    };
    if joins {
        for count in flows.values_mut() {
            *count -= 1;
        }
    } else if let Some(count) = flows.values_mut().find(|count| **count > 0) {
        *count -= 1;
    }
    flows.retain(|_, count| *count > 0);
    if flows.is_empty() {
        scope.taken_flows.remove(&value.element_id);
    }
}

fn apply_process_event(
    state: &mut ProcessingState,
    record: &Record,
    intent: ProcessEventIntent,
) -> Result<(), EngineError> {
    let event = typed::<ProcessEventRecord>(record)?;
    match intent {
        ProcessEventIntent::Triggering => state.triggers.push(
            event.scope_key,
            EventTrigger {
                key: record.key,
                target_element_id: event.target_element_id.clone(),
                variables: event.variables.clone(),
                interrupting: event.interrupting,
            },
        ),
        ProcessEventIntent::Triggered => state.triggers.remove(event.scope_key, record.key),
    }
    Ok(())
}

// ── Jobs ──

fn apply_job(state: &mut ProcessingState, record: &Record, intent: JobIntent) -> Result<(), EngineError> {
    let job = typed::<JobRecord>(record)?;
    let existing = state.jobs.get(record.key).cloned();
    let transition = next_job_state(existing.as_ref().map(|e| e.state), intent, job)
        .map_err(|err| corrupt(format!("job {}: {err}", record.key)))?;

    match transition {
        JobTransition::Removed => {
            state.jobs.remove(record.key);
            if let Some(instance) = state.elements.get_mut(job.element_instance_key) {
                if instance.job_key == record.key {
                    instance.job_key = NO_KEY;
                }
            }
            if intent == JobIntent::Completed {
                if let Some(instance) = state.elements.get_mut(job.element_instance_key) {
                    match job.job_kind {
                        JobKind::ExecutionListener => instance.completed_listeners += 1,
                        JobKind::TaskListener if !job.result.denied => instance.completed_task_listeners += 1,
                        _ => {}
                    }
                }
            }
        }
        JobTransition::To(next) => {
            let since = match &existing {
                Some(entry) if entry.state == JobState::Activatable && next == JobState::Activatable => {
                    entry.activatable_since
                }
                _ => record.timestamp,
            };
            if intent == JobIntent::Created {
                if let Some(instance) = state.elements.get_mut(job.element_instance_key) {
                    instance.job_key = record.key;
                    if job.job_kind == JobKind::BpmnElement {
                        instance.completed_task_listeners = 0;
                    }
                }
            }
            state.jobs.put(JobEntry {
                key: record.key,
                state: next,
                record: job.clone(),
                activatable_since: since,
            });
        }
    }
    Ok(())
}

fn apply_job_batch(state: &mut ProcessingState, record: &Record) -> Result<(), EngineError> {
    let batch = typed::<JobBatchRecord>(record)?;
    for (key, job) in batch.job_keys.iter().zip(batch.jobs.iter()) {
        let entry = state
            .jobs
            .get(*key)
            .cloned()
            .ok_or_else(|| corrupt(format!("activated unknown job {key}")))?;
        if entry.state != JobState::Activatable {
            return Err(corrupt(format!("activated job {key} in state {}", entry.state)));
        }
        state.jobs.put(JobEntry {
            state: JobState::Activated,
            record: job.clone(),
            ..entry
        });
    }
    Ok(())
}

// ── Timers & incidents ──

fn apply_timer(state: &mut ProcessingState, record: &Record, intent: TimerIntent) -> Result<(), EngineError> {
    let timer = typed::<TimerRecord>(record)?;
    match intent {
        TimerIntent::Created | TimerIntent::Migrated => state.timers.put(record.key, timer.clone()),
        TimerIntent::Triggered | TimerIntent::Canceled => {
            state.timers.remove(record.key);
        }
        TimerIntent::Trigger => {}
    }
    Ok(())
}

fn apply_incident(
    state: &mut ProcessingState,
    record: &Record,
    intent: IncidentIntent,
) -> Result<(), EngineError> {
    let incident = typed::<IncidentRecord>(record)?;
    match intent {
        IncidentIntent::Created | IncidentIntent::Migrated => {
            state.incidents.put(record.key, incident.clone())
        }
        IncidentIntent::Resolved => {
            state.incidents.remove(record.key);
            if let Some(entry) = state.jobs.get(incident.job_key).cloned() {
                if matches!(entry.state, JobState::Failed | JobState::ErrorThrown) {
                    let mut job = entry.record.clone();
                    job.recurring_time = -1;
                    state.jobs.put(JobEntry {
                        state: JobState::Activatable,
                        record: job,
                        activatable_since: record.timestamp,
                        ..entry
                    });
                }
            }
        }
        IncidentIntent::Resolve => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpmn::lifecycle::ElementState;
    use crate::model::fixtures::ONE_TASK;
    use crate::model::SimpleExpressionLanguage;

    fn appliers() -> EventAppliers {
        EventAppliers::new(Arc::new(SimpleExpressionLanguage))
    }

    fn deploy(state: &mut ProcessingState) {
        let record = Record::event(
            100,
            ProcessIntent::Created,
            ProcessRecord {
                bpmn_process_id: "order".to_string(),
                version: 1,
                process_definition_key: 100,
                resource_name: "order.yaml".to_string(),
                resource: ONE_TASK.to_string(),
                ..Default::default()
            },
        );
        appliers().apply(state, &record).unwrap();
    }

    fn element(key: Key, scope: Key, element_id: &str, element_type: BpmnElementType) -> Record {
        Record::event(
            key,
            ProcessInstanceIntent::ElementActivating,
            ProcessInstanceRecord {
                bpmn_process_id: "order".to_string(),
                process_definition_key: 100,
                process_instance_key: 1,
                element_id: element_id.to_string(),
                flow_scope_key: scope,
                bpmn_element_type: element_type,
                ..Default::default()
            },
        )
    }

    #[test]
    fn activation_consumes_the_taken_flow() {
        let mut state = ProcessingState::new(1);
        deploy(&mut state);
        let appliers = appliers();
        appliers
            .apply(&mut state, &element(1, NO_KEY, "order", BpmnElementType::Process))
            .unwrap();
        let flow = Record::event(
            2,
            ProcessInstanceIntent::SequenceFlowTaken,
            ProcessInstanceRecord {
                process_definition_key: 100,
                process_instance_key: 1,
                element_id: "start-task".to_string(),
                flow_scope_key: 1,
                bpmn_element_type: BpmnElementType::SequenceFlow,
                ..Default::default()
            },
        );
        appliers.apply(&mut state, &flow).unwrap();
        assert_eq!(state.elements.get(1).unwrap().pending_tokens(), 1);

        appliers
            .apply(&mut state, &element(3, 1, "task", BpmnElementType::ServiceTask))
            .unwrap();
        let scope = state.elements.get(1).unwrap();
        assert_eq!(scope.pending_tokens(), 0);
        assert_eq!(scope.active_children, 1);
    }

    #[test]
    fn completion_releases_the_scope_slot_and_variables() {
        let mut state = ProcessingState::new(1);
        deploy(&mut state);
        let appliers = appliers();
        appliers
            .apply(&mut state, &element(1, NO_KEY, "order", BpmnElementType::Process))
            .unwrap();
        appliers
            .apply(&mut state, &element(3, 1, "task", BpmnElementType::ServiceTask))
            .unwrap();
        state.variables.set(3, "local".to_string(), 9, serde_json::json!(1));

        for intent in [
            ProcessInstanceIntent::ElementActivated,
            ProcessInstanceIntent::ElementCompleting,
            ProcessInstanceIntent::ElementCompleted,
        ] {
            let mut record = element(3, 1, "task", BpmnElementType::ServiceTask);
            record.intent = intent.into();
            appliers.apply(&mut state, &record).unwrap();
        }
        assert_eq!(state.elements.get(1).unwrap().active_children, 0);
        assert_eq!(state.elements.get(3).unwrap().state, ElementState::Completed);
        assert!(state.variables.get(3, "local").is_none());
    }

    #[test]
    fn invalid_transition_is_corrupt_state() {
        let mut state = ProcessingState::new(1);
        deploy(&mut state);
        let mut record = element(3, NO_KEY, "order", BpmnElementType::Process);
        record.intent = ProcessInstanceIntent::ElementCompleted.into();
        assert!(matches!(
            appliers().apply(&mut state, &record),
            Err(EngineError::CorruptState(_))
        ));
    }

    #[test]
    fn resolving_a_job_incident_reactivates_the_job() {
        let mut state = ProcessingState::new(1);
        let appliers = appliers();
        let job = JobRecord {
            job_type: "payment".to_string(),
            retries: 0,
            ..Default::default()
        };
        appliers
            .apply(&mut state, &Record::event(5, JobIntent::Created, job.clone()))
            .unwrap();
        appliers
            .apply(&mut state, &Record::event(5, JobIntent::Failed, job.clone()))
            .unwrap();
        assert_eq!(state.jobs.get(5).unwrap().state, JobState::Failed);

        let incident = IncidentRecord {
            error_type: ErrorType::JobNoRetries,
            job_key: 5,
            ..Default::default()
        };
        appliers
            .apply(&mut state, &Record::event(6, IncidentIntent::Created, incident.clone()))
            .unwrap();
        let mut updated = job;
        updated.retries = 2;
        appliers
            .apply(&mut state, &Record::event(5, JobIntent::RetriesUpdated, updated))
            .unwrap();
        appliers
            .apply(&mut state, &Record::event(6, IncidentIntent::Resolved, incident))
            .unwrap();
        assert_eq!(state.jobs.get(5).unwrap().state, JobState::Activatable);
        assert_eq!(state.jobs.activatable_of("payment").count(), 1);
        assert!(state.incidents.is_empty());
    }

    #[test]
    fn message_correlation_and_start_locks() {
        let mut state = ProcessingState::new(1);
        let appliers = appliers();
        let message = MessageRecord {
            name: "paid".to_string(),
            correlation_key: "o-1".to_string(),
            time_to_live: 1_000,
            deadline: 1_000,
            ..Default::default()
        };
        appliers
            .apply(&mut state, &Record::event(7, MessageIntent::Published, message.clone()))
            .unwrap();
        assert_eq!(state.messages.buffered("<default>", "paid", "o-1").len(), 1);

        let start = MessageStartEventSubscriptionRecord {
            bpmn_process_id: "order".to_string(),
            message_name: "paid".to_string(),
            message_key: 7,
            process_instance_key: 20,
            correlation_key: "o-1".to_string(),
            ..Default::default()
        };
        appliers
            .apply(
                &mut state,
                &Record::event(8, MessageStartEventSubscriptionIntent::Correlated, start),
            )
            .unwrap();
        assert!(state.messages.is_correlated(7, "order"));
        assert_eq!(state.messages.start_lock("<default>", "order", "o-1"), Some(20));

        let mut root = element(20, NO_KEY, "order", BpmnElementType::Process);
        deploy(&mut state);
        appliers.apply(&mut state, &root).unwrap();
        for intent in [
            ProcessInstanceIntent::ElementActivated,
            ProcessInstanceIntent::ElementCompleting,
            ProcessInstanceIntent::ElementCompleted,
        ] {
            root.intent = intent.into();
            appliers.apply(&mut state, &root).unwrap();
        }
        assert_eq!(state.messages.start_lock("<default>", "order", "o-1"), None);

        appliers
            .apply(&mut state, &Record::event(7, MessageIntent::Expired, message))
            .unwrap();
        assert!(state.messages.is_empty());
    }
}
