#![allow(dead_code)]

use streamflow_core::record::*;
use streamflow_core::types::{Key, PartitionId};
use streamflow_core::{CommandResponse, EngineHarness};

pub const SERVICE_TASK: &str = r#"
kind: process
id: P
nodes:
  - type: start_event
    id: start
  - type: service_task
    id: task
    job_type: test
  - type: end_event
    id: end
flows:
  - from: start
    to: task
  - from: task
    to: end
"#;

pub const BOUNDARY_TIMER: &str = r#"
kind: process
id: timeout
nodes:
  - type: start_event
    id: start
  - type: service_task
    id: task
    job_type: slow
  - type: boundary_event
    id: too_slow
    attached_to: task
    timer:
      duration: PT1M
  - type: end_event
    id: done
  - type: end_event
    id: timed_out
flows:
  - from: start
    to: task
  - from: task
    to: done
  - from: too_slow
    to: timed_out
"#;

pub const CALLER: &str = r#"
kind: process
id: caller
nodes:
  - type: start_event
    id: start
  - type: call_activity
    id: call
    process_id: P
  - type: end_event
    id: end
flows:
  - from: start
    to: call
  - from: call
    to: end
"#;

pub fn respond(response: CommandResponse) -> Record {
    response
        .expect("engine failure")
        .expect("command produced no response")
}

pub fn expect_event(response: CommandResponse) -> Record {
    let record = respond(response);
    assert_eq!(
        record.record_type,
        RecordType::Event,
        "expected an event, got rejection {:?}: {}",
        record.rejection_type,
        record.rejection_reason
    );
    record
}

pub fn expect_rejection(response: CommandResponse, rejection_type: RejectionType) -> Record {
    let record = respond(response);
    assert_eq!(record.record_type, RecordType::Rejection);
    assert_eq!(record.rejection_type, Some(rejection_type), "{}", record.rejection_reason);
    record
}

pub fn process_instance_key(created: &Record) -> Key {
    created
        .value_as::<ProcessInstanceCreationRecord>()
        .map(|creation| creation.process_instance_key)
        .expect("process instance creation record")
}

pub fn job_keys(batch: &Record) -> Vec<Key> {
    batch
        .value_as::<JobBatchRecord>()
        .map(|batch| batch.job_keys.clone())
        .expect("job batch record")
}

/// Element ids that went through `intent`, in log order.
pub async fn elements_with(harness: &EngineHarness, partition_id: PartitionId, intent: ProcessInstanceIntent) -> Vec<String> {
    harness
        .records(partition_id)
        .await
        .expect("log readable")
        .iter()
        .filter(|record| record.is_event() && record.intent == Intent::ProcessInstance(intent))
        .filter_map(|record| record.value_as::<ProcessInstanceRecord>())
        .map(|value| value.element_id.clone())
        .collect()
}

pub async fn count_of(harness: &EngineHarness, partition_id: PartitionId, intent: Intent, record_type: RecordType) -> usize {
    harness
        .records(partition_id)
        .await
        .expect("log readable")
        .iter()
        .filter(|record| record.intent == intent && record.record_type == record_type)
        .count()
}

/// Values written for the variable `name`, in log order.
pub async fn variable_values(harness: &EngineHarness, partition_id: PartitionId, name: &str) -> Vec<serde_json::Value> {
    harness
        .records(partition_id)
        .await
        .expect("log readable")
        .iter()
        .filter(|record| {
            record.is_event()
                && matches!(
                    record.intent,
                    Intent::Variable(VariableIntent::Created) | Intent::Variable(VariableIntent::Updated)
                )
        })
        .filter_map(|record| record.value_as::<VariableRecord>())
        .filter(|variable| variable.name == name)
        .map(|variable| variable.value.clone())
        .collect()
}

/// Jobs created so far on the partition, by key.
pub async fn created_jobs(harness: &EngineHarness, partition_id: PartitionId) -> Vec<(Key, JobRecord)> {
    harness
        .records(partition_id)
        .await
        .expect("log readable")
        .iter()
        .filter(|record| record.is_event() && record.intent == Intent::Job(JobIntent::Created))
        .filter_map(|record| record.value_as::<JobRecord>().map(|job| (record.key, job.clone())))
        .collect()
}

pub fn vars(pairs: &[(&str, serde_json::Value)]) -> Variables {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// Key of the first instance of `element_id` that reached `intent`.
pub async fn element_key(harness: &EngineHarness, partition_id: PartitionId, element_id: &str, intent: ProcessInstanceIntent) -> Key {
    harness
        .records(partition_id)
        .await
        .expect("log readable")
        .iter()
        .filter(|record| record.is_event() && record.intent == Intent::ProcessInstance(intent))
        .find(|record| record.value_as::<ProcessInstanceRecord>().is_some_and(|value| value.element_id == element_id))
        .map(|record| record.key)
        .expect("element instance found")
}

pub fn cancel(process_instance_key: Key) -> Record {
    Record::command(ProcessInstanceIntent::Cancel, ProcessInstanceRecord::default()).with_key(process_instance_key)
}

pub fn migrate(process_instance_key: Key, target: Key, mappings: &[(&str, &str)]) -> Record {
    Record::command(
        ProcessInstanceMigrationIntent::Migrate,
        ProcessInstanceMigrationRecord {
            process_instance_key,
            target_process_definition_key: target,
            mapping_instructions: mappings
                .iter()
                .map(|(source, target)| MappingInstruction {
                    source_element_id: source.to_string(),
                    target_element_id: target.to_string(),
                })
                .collect(),
            ..Default::default()
        },
    )
    .with_key(process_instance_key)
}

/// Key of the first process deployed by a deployment response.
pub fn deployed_process_key(deployed: &Record) -> Key {
    deployed
        .value_as::<DeploymentRecord>()
        .and_then(|deployment| deployment.processes_metadata.first())
        .map(|process| process.process_definition_key)
        .expect("deployment record with a process")
}
