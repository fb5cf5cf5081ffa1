//! Typed record payloads. Every struct deserializes with defaults for
//! missing fields so that records written by older versions stay readable.

use super::{HasProcessInstance, HasTenant, ValueType};
use crate::auth::{PermissionType, ResourceType};
use crate::types::{Key, Timestamp, DEFAULT_TENANT, NO_KEY};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type Variables = serde_json::Map<String, serde_json::Value>;

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

// ─── Enumerations ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BpmnElementType {
    #[default]
    Unspecified,
    Process,
    SubProcess,
    AdHocSubProcess,
    StartEvent,
    IntermediateCatchEvent,
    BoundaryEvent,
    EndEvent,
    ServiceTask,
    UserTask,
    BusinessRuleTask,
    ExclusiveGateway,
    ParallelGateway,
    InclusiveGateway,
    EventBasedGateway,
    CallActivity,
    ReceiveTask,
    MultiInstanceBody,
    SequenceFlow,
}

impl BpmnElementType {
    pub fn as_str(self) -> &'static str {
        match self {
            BpmnElementType::Unspecified => "UNSPECIFIED",
            BpmnElementType::Process => "PROCESS",
            BpmnElementType::SubProcess => "SUB_PROCESS",
            BpmnElementType::AdHocSubProcess => "AD_HOC_SUB_PROCESS",
            BpmnElementType::StartEvent => "START_EVENT",
            BpmnElementType::IntermediateCatchEvent => "INTERMEDIATE_CATCH_EVENT",
            BpmnElementType::BoundaryEvent => "BOUNDARY_EVENT",
            BpmnElementType::EndEvent => "END_EVENT",
            BpmnElementType::ServiceTask => "SERVICE_TASK",
            BpmnElementType::UserTask => "USER_TASK",
            BpmnElementType::BusinessRuleTask => "BUSINESS_RULE_TASK",
            BpmnElementType::ExclusiveGateway => "EXCLUSIVE_GATEWAY",
            BpmnElementType::ParallelGateway => "PARALLEL_GATEWAY",
            BpmnElementType::InclusiveGateway => "INCLUSIVE_GATEWAY",
            BpmnElementType::EventBasedGateway => "EVENT_BASED_GATEWAY",
            BpmnElementType::CallActivity => "CALL_ACTIVITY",
            BpmnElementType::ReceiveTask => "RECEIVE_TASK",
            BpmnElementType::MultiInstanceBody => "MULTI_INSTANCE_BODY",
            BpmnElementType::SequenceFlow => "SEQUENCE_FLOW",
        }
    }

    /// Element types that own child element instances.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            BpmnElementType::Process
                | BpmnElementType::SubProcess
                | BpmnElementType::AdHocSubProcess
                | BpmnElementType::MultiInstanceBody
        )
    }

    /// Element types that may carry boundary events.
    pub fn is_activity(self) -> bool {
        matches!(
            self,
            BpmnElementType::SubProcess
                | BpmnElementType::AdHocSubProcess
                | BpmnElementType::ServiceTask
                | BpmnElementType::UserTask
                | BpmnElementType::BusinessRuleTask
                | BpmnElementType::CallActivity
                | BpmnElementType::ReceiveTask
                | BpmnElementType::MultiInstanceBody
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BpmnEventType {
    #[default]
    Unspecified,
    None,
    Timer,
    Signal,
    Message,
    Error,
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    #[default]
    BpmnElement,
    ExecutionListener,
    TaskListener,
    AdHocSubProcess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobListenerEventType {
    #[default]
    Unspecified,
    Start,
    End,
    Creating,
    Completing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    #[default]
    Unknown,
    IoMappingError,
    JobNoRetries,
    ExecutionListenerNoRetries,
    TaskListenerNoRetries,
    ConditionError,
    ExtractValueError,
    CalledElementError,
    UnhandledErrorEvent,
    MessageSizeExceeded,
    CalledDecisionError,
    DecisionEvaluationError,
    FormNotFound,
    ResourceNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableDocumentUpdateSemantic {
    #[default]
    Propagate,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterVariableScope {
    #[default]
    Global,
    Tenant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    #[default]
    Unspecified,
    User,
    Client,
    Group,
    MappingRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationOwnerType {
    #[default]
    Unspecified,
    User,
    Client,
    Group,
    MappingRule,
}

// ─── Process instance ───

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessInstanceRecord {
    pub bpmn_process_id: String,
    pub version: i32,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub element_id: String,
    pub flow_scope_key: Key,
    pub bpmn_element_type: BpmnElementType,
    pub bpmn_event_type: BpmnEventType,
    pub parent_process_instance_key: Key,
    pub parent_element_instance_key: Key,
    /// Only written by newer versions; older records decode to `-1`.
    pub root_process_instance_key: Key,
    pub element_instance_path: Vec<Vec<Key>>,
    pub process_definition_path: Vec<Key>,
    pub calling_element_path: Vec<i32>,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for ProcessInstanceRecord {
    fn default() -> Self {
        Self {
            bpmn_process_id: String::new(),
            version: -1,
            process_definition_key: NO_KEY,
            process_instance_key: NO_KEY,
            element_id: String::new(),
            flow_scope_key: NO_KEY,
            bpmn_element_type: BpmnElementType::Unspecified,
            bpmn_event_type: BpmnEventType::Unspecified,
            parent_process_instance_key: NO_KEY,
            parent_element_instance_key: NO_KEY,
            root_process_instance_key: NO_KEY,
            element_instance_path: Vec::new(),
            process_definition_path: Vec::new(),
            calling_element_path: Vec::new(),
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartInstruction {
    pub element_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessInstanceCreationRecord {
    pub bpmn_process_id: String,
    /// `-1` selects the latest version.
    pub version: i32,
    pub process_definition_key: Key,
    pub variables: Variables,
    pub start_instructions: Vec<StartInstruction>,
    pub process_instance_key: Key,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for ProcessInstanceCreationRecord {
    fn default() -> Self {
        Self {
            bpmn_process_id: String::new(),
            version: -1,
            process_definition_key: NO_KEY,
            variables: Variables::new(),
            start_instructions: Vec::new(),
            process_instance_key: NO_KEY,
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariableInstruction {
    /// Element whose scope receives the variables; empty for the process scope.
    pub element_id: String,
    pub variables: Variables,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivateInstruction {
    pub element_id: String,
    pub ancestor_scope_key: Key,
    pub variable_instructions: Vec<VariableInstruction>,
}

impl Default for ActivateInstruction {
    fn default() -> Self {
        Self {
            element_id: String::new(),
            ancestor_scope_key: NO_KEY,
            variable_instructions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminateInstruction {
    pub element_instance_key: Key,
}

impl Default for TerminateInstruction {
    fn default() -> Self {
        Self {
            element_instance_key: NO_KEY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MoveInstruction {
    pub source_element_id: String,
    pub target_element_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessInstanceModificationRecord {
    pub process_instance_key: Key,
    pub activate_instructions: Vec<ActivateInstruction>,
    pub terminate_instructions: Vec<TerminateInstruction>,
    pub move_instructions: Vec<MoveInstruction>,
    pub activated_element_instance_keys: Vec<Key>,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for ProcessInstanceModificationRecord {
    fn default() -> Self {
        Self {
            process_instance_key: NO_KEY,
            activate_instructions: Vec::new(),
            terminate_instructions: Vec::new(),
            move_instructions: Vec::new(),
            activated_element_instance_keys: Vec::new(),
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MappingInstruction {
    pub source_element_id: String,
    pub target_element_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessInstanceMigrationRecord {
    pub process_instance_key: Key,
    pub target_process_definition_key: Key,
    pub mapping_instructions: Vec<MappingInstruction>,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for ProcessInstanceMigrationRecord {
    fn default() -> Self {
        Self {
            process_instance_key: NO_KEY,
            target_process_definition_key: NO_KEY,
            mapping_instructions: Vec::new(),
            tenant_id: default_tenant(),
        }
    }
}

/// A trigger queued on an element instance (job result, timer, signal,
/// error) until the element consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessEventRecord {
    pub scope_key: Key,
    pub target_element_id: String,
    pub variables: Variables,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub interrupting: bool,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for ProcessEventRecord {
    fn default() -> Self {
        Self {
            scope_key: NO_KEY,
            target_element_id: String::new(),
            variables: Variables::new(),
            process_definition_key: NO_KEY,
            process_instance_key: NO_KEY,
            interrupting: false,
            tenant_id: default_tenant(),
        }
    }
}

// ─── Jobs ───

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobRecord {
    #[serde(rename = "type")]
    pub job_type: String,
    pub worker: String,
    pub retries: i32,
    pub retry_backoff: i64,
    pub recurring_time: Timestamp,
    pub deadline: Timestamp,
    pub timeout: i64,
    pub error_message: String,
    pub error_code: String,
    pub custom_headers: BTreeMap<String, String>,
    pub variables: Variables,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    pub element_id: String,
    pub bpmn_process_id: String,
    pub process_definition_key: Key,
    pub process_definition_version: i32,
    pub job_kind: JobKind,
    pub listener_event_type: JobListenerEventType,
    pub tags: BTreeSet<String>,
    /// Verdict of a task listener job.
    pub result: JobResult,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobResult {
    pub denied: bool,
    pub denied_reason: String,
}

impl Default for JobRecord {
    fn default() -> Self {
        Self {
            job_type: String::new(),
            worker: String::new(),
            retries: 0,
            retry_backoff: 0,
            recurring_time: -1,
            deadline: -1,
            timeout: -1,
            error_message: String::new(),
            error_code: String::new(),
            custom_headers: BTreeMap::new(),
            variables: Variables::new(),
            process_instance_key: NO_KEY,
            element_instance_key: NO_KEY,
            element_id: String::new(),
            bpmn_process_id: String::new(),
            process_definition_key: NO_KEY,
            process_definition_version: -1,
            job_kind: JobKind::BpmnElement,
            listener_event_type: JobListenerEventType::Unspecified,
            tags: BTreeSet::new(),
            result: JobResult::default(),
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobBatchRecord {
    #[serde(rename = "type")]
    pub job_type: String,
    pub worker: String,
    pub timeout: i64,
    pub max_jobs_to_activate: i32,
    pub tenant_ids: Vec<String>,
    pub job_keys: Vec<Key>,
    pub jobs: Vec<JobRecord>,
    pub truncated: bool,
}

impl Default for JobBatchRecord {
    fn default() -> Self {
        Self {
            job_type: String::new(),
            worker: String::new(),
            timeout: -1,
            max_jobs_to_activate: -1,
            tenant_ids: vec![default_tenant()],
            job_keys: Vec::new(),
            jobs: Vec::new(),
            truncated: false,
        }
    }
}

// ─── Timers & incidents ───

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerRecord {
    /// `-1` for timer start events.
    pub element_instance_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub due_date: Timestamp,
    pub target_element_id: String,
    /// Remaining repetitions, `-1` for an infinite cycle.
    pub repetitions: i32,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for TimerRecord {
    fn default() -> Self {
        Self {
            element_instance_key: NO_KEY,
            process_instance_key: NO_KEY,
            process_definition_key: NO_KEY,
            due_date: -1,
            target_element_id: String::new(),
            repetitions: 1,
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncidentRecord {
    pub error_type: ErrorType,
    pub error_message: String,
    pub bpmn_process_id: String,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub element_id: String,
    pub element_instance_key: Key,
    pub job_key: Key,
    pub variable_scope_key: Key,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for IncidentRecord {
    fn default() -> Self {
        Self {
            error_type: ErrorType::Unknown,
            error_message: String::new(),
            bpmn_process_id: String::new(),
            process_definition_key: NO_KEY,
            process_instance_key: NO_KEY,
            element_id: String::new(),
            element_instance_key: NO_KEY,
            job_key: NO_KEY,
            variable_scope_key: NO_KEY,
            tenant_id: default_tenant(),
        }
    }
}

// ─── Variables ───

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariableRecord {
    pub name: String,
    pub value: serde_json::Value,
    pub scope_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for VariableRecord {
    fn default() -> Self {
        Self {
            name: String::new(),
            value: serde_json::Value::Null,
            scope_key: NO_KEY,
            process_instance_key: NO_KEY,
            process_definition_key: NO_KEY,
            bpmn_process_id: String::new(),
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariableDocumentRecord {
    pub scope_key: Key,
    pub update_semantics: VariableDocumentUpdateSemantic,
    pub variables: Variables,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for VariableDocumentRecord {
    fn default() -> Self {
        Self {
            scope_key: NO_KEY,
            update_semantics: VariableDocumentUpdateSemantic::Propagate,
            variables: Variables::new(),
            tenant_id: default_tenant(),
        }
    }
}

// ─── Deployments & definitions ───

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentResource {
    pub resource_name: String,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessMetadata {
    pub bpmn_process_id: String,
    pub version: i32,
    pub process_definition_key: Key,
    pub resource_name: String,
    pub checksum: String,
    pub is_duplicate: bool,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for ProcessMetadata {
    fn default() -> Self {
        Self {
            bpmn_process_id: String::new(),
            version: -1,
            process_definition_key: NO_KEY,
            resource_name: String::new(),
            checksum: String::new(),
            is_duplicate: false,
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecisionMetadata {
    pub decision_id: String,
    pub decision_name: String,
    pub version: i32,
    pub decision_key: Key,
    pub resource_name: String,
    pub checksum: String,
    pub is_duplicate: bool,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for DecisionMetadata {
    fn default() -> Self {
        Self {
            decision_id: String::new(),
            decision_name: String::new(),
            version: -1,
            decision_key: NO_KEY,
            resource_name: String::new(),
            checksum: String::new(),
            is_duplicate: false,
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormMetadata {
    pub form_id: String,
    pub version: i32,
    pub form_key: Key,
    pub resource_name: String,
    pub checksum: String,
    pub is_duplicate: bool,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for FormMetadata {
    fn default() -> Self {
        Self {
            form_id: String::new(),
            version: -1,
            form_key: NO_KEY,
            resource_name: String::new(),
            checksum: String::new(),
            is_duplicate: false,
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentRecord {
    pub resources: Vec<DeploymentResource>,
    pub processes_metadata: Vec<ProcessMetadata>,
    pub decisions_metadata: Vec<DecisionMetadata>,
    pub forms_metadata: Vec<FormMetadata>,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for DeploymentRecord {
    fn default() -> Self {
        Self {
            resources: Vec::new(),
            processes_metadata: Vec::new(),
            decisions_metadata: Vec::new(),
            forms_metadata: Vec::new(),
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessRecord {
    pub bpmn_process_id: String,
    pub version: i32,
    pub process_definition_key: Key,
    pub resource_name: String,
    pub resource: String,
    pub checksum: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for ProcessRecord {
    fn default() -> Self {
        Self {
            bpmn_process_id: String::new(),
            version: -1,
            process_definition_key: NO_KEY,
            resource_name: String::new(),
            resource: String::new(),
            checksum: String::new(),
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub decision_name: String,
    pub version: i32,
    pub decision_key: Key,
    pub resource_name: String,
    pub resource: String,
    pub checksum: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for DecisionRecord {
    fn default() -> Self {
        Self {
            decision_id: String::new(),
            decision_name: String::new(),
            version: -1,
            decision_key: NO_KEY,
            resource_name: String::new(),
            resource: String::new(),
            checksum: String::new(),
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormRecord {
    pub form_id: String,
    pub version: i32,
    pub form_key: Key,
    pub resource_name: String,
    pub resource: String,
    pub checksum: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for FormRecord {
    fn default() -> Self {
        Self {
            form_id: String::new(),
            version: -1,
            form_key: NO_KEY,
            resource_name: String::new(),
            resource: String::new(),
            checksum: String::new(),
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecisionEvaluationRecord {
    pub decision_id: String,
    pub decision_key: Key,
    pub decision_version: i32,
    pub decision_name: String,
    pub variables: Variables,
    pub decision_output: serde_json::Value,
    pub failed_decision_id: String,
    pub evaluation_failure_message: String,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for DecisionEvaluationRecord {
    fn default() -> Self {
        Self {
            decision_id: String::new(),
            decision_key: NO_KEY,
            decision_version: -1,
            decision_name: String::new(),
            variables: Variables::new(),
            decision_output: serde_json::Value::Null,
            failed_decision_id: String::new(),
            evaluation_failure_message: String::new(),
            process_instance_key: NO_KEY,
            element_instance_key: NO_KEY,
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceDeletionRecord {
    pub resource_key: Key,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for ResourceDeletionRecord {
    fn default() -> Self {
        Self {
            resource_key: NO_KEY,
            tenant_id: default_tenant(),
        }
    }
}

// ─── Messages ───

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageRecord {
    pub name: String,
    pub correlation_key: String,
    /// Milliseconds the message stays buffered; `0` correlates only to
    /// subscriptions open at publication.
    pub time_to_live: i64,
    /// Optional publisher supplied id; unique among buffered messages of
    /// the same name and correlation key.
    pub message_id: String,
    pub variables: Variables,
    pub deadline: Timestamp,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for MessageRecord {
    fn default() -> Self {
        Self {
            name: String::new(),
            correlation_key: String::new(),
            time_to_live: 0,
            message_id: String::new(),
            variables: Variables::new(),
            deadline: -1,
            tenant_id: default_tenant(),
        }
    }
}

/// Message side of a catch event subscription, kept on the partition the
/// correlation key hashes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageSubscriptionRecord {
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    pub element_id: String,
    pub bpmn_process_id: String,
    pub message_name: String,
    pub correlation_key: String,
    pub interrupting: bool,
    pub message_key: Key,
    pub variables: Variables,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for MessageSubscriptionRecord {
    fn default() -> Self {
        Self {
            process_instance_key: NO_KEY,
            element_instance_key: NO_KEY,
            element_id: String::new(),
            bpmn_process_id: String::new(),
            message_name: String::new(),
            correlation_key: String::new(),
            interrupting: true,
            message_key: NO_KEY,
            variables: Variables::new(),
            tenant_id: default_tenant(),
        }
    }
}

/// Process instance side of a catch event subscription, kept with the
/// element instance that waits for the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessMessageSubscriptionRecord {
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    /// The catch event: boundary, intermediate catch event or receive task.
    pub element_id: String,
    pub bpmn_process_id: String,
    pub message_name: String,
    pub correlation_key: String,
    pub interrupting: bool,
    pub message_key: Key,
    pub variables: Variables,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for ProcessMessageSubscriptionRecord {
    fn default() -> Self {
        Self {
            process_instance_key: NO_KEY,
            element_instance_key: NO_KEY,
            element_id: String::new(),
            bpmn_process_id: String::new(),
            message_name: String::new(),
            correlation_key: String::new(),
            interrupting: true,
            message_key: NO_KEY,
            variables: Variables::new(),
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageStartEventSubscriptionRecord {
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    pub start_event_id: String,
    pub message_name: String,
    /// Set once correlated: the message and the instance it started.
    pub message_key: Key,
    pub process_instance_key: Key,
    pub correlation_key: String,
    pub variables: Variables,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for MessageStartEventSubscriptionRecord {
    fn default() -> Self {
        Self {
            process_definition_key: NO_KEY,
            bpmn_process_id: String::new(),
            start_event_id: String::new(),
            message_name: String::new(),
            message_key: NO_KEY,
            process_instance_key: NO_KEY,
            correlation_key: String::new(),
            variables: Variables::new(),
            tenant_id: default_tenant(),
        }
    }
}

// ─── Signals & ad-hoc instructions ───

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalRecord {
    pub signal_name: String,
    pub variables: Variables,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for SignalRecord {
    fn default() -> Self {
        Self {
            signal_name: String::new(),
            variables: Variables::new(),
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalSubscriptionRecord {
    pub signal_name: String,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    pub catch_event_id: String,
    /// `-1` for signal start events.
    pub catch_event_instance_key: Key,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for SignalSubscriptionRecord {
    fn default() -> Self {
        Self {
            signal_name: String::new(),
            process_definition_key: NO_KEY,
            bpmn_process_id: String::new(),
            catch_event_id: String::new(),
            catch_event_instance_key: NO_KEY,
            tenant_id: default_tenant(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdHocActivateElement {
    pub element_id: String,
    pub variables: Variables,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdHocSubProcessInstructionRecord {
    pub ad_hoc_sub_process_instance_key: Key,
    pub activate_elements: Vec<AdHocActivateElement>,
    pub cancel_remaining_instances: bool,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for AdHocSubProcessInstructionRecord {
    fn default() -> Self {
        Self {
            ad_hoc_sub_process_instance_key: NO_KEY,
            activate_elements: Vec::new(),
            cancel_remaining_instances: false,
            tenant_id: default_tenant(),
        }
    }
}

// ─── Cluster variables & identity ───

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterVariableRecord {
    pub name: String,
    pub value: serde_json::Value,
    pub scope: ClusterVariableScope,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

impl Default for ClusterVariableRecord {
    fn default() -> Self {
        Self {
            name: String::new(),
            value: serde_json::Value::Null,
            scope: ClusterVariableScope::Global,
            tenant_id: default_tenant(),
        }
    }
}

/// Managed tenant. `tenant_id` names the tenant being managed, not the owner
/// of the record: identity records always belong to the default tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantRecord {
    pub tenant_id: String,
    pub name: String,
    pub entity_id: String,
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserRecord {
    pub username: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupRecord {
    pub group_id: String,
    pub name: String,
    pub entity_id: String,
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MappingRuleRecord {
    pub mapping_rule_id: String,
    pub name: String,
    pub claim_name: String,
    pub claim_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthorizationRecord {
    pub authorization_key: Key,
    pub owner_id: String,
    pub owner_type: AuthorizationOwnerType,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub permission_types: BTreeSet<PermissionType>,
}

impl Default for AuthorizationRecord {
    fn default() -> Self {
        Self {
            authorization_key: NO_KEY,
            owner_id: String::new(),
            owner_type: AuthorizationOwnerType::Unspecified,
            resource_type: ResourceType::Unspecified,
            resource_id: String::new(),
            permission_types: BTreeSet::new(),
        }
    }
}

// ─── Capabilities ───

macro_rules! tenant_owned {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl HasTenant for $ty {
                fn tenant_id(&self) -> &str {
                    &self.tenant_id
                }
            }
        )+
    };
}

tenant_owned!(
    ProcessInstanceRecord,
    ProcessInstanceCreationRecord,
    ProcessInstanceModificationRecord,
    ProcessInstanceMigrationRecord,
    ProcessEventRecord,
    JobRecord,
    TimerRecord,
    IncidentRecord,
    VariableRecord,
    VariableDocumentRecord,
    DeploymentRecord,
    ProcessRecord,
    DecisionRecord,
    FormRecord,
    DecisionEvaluationRecord,
    ResourceDeletionRecord,
    SignalRecord,
    SignalSubscriptionRecord,
    AdHocSubProcessInstructionRecord,
    ClusterVariableRecord,
    MessageRecord,
    MessageSubscriptionRecord,
    ProcessMessageSubscriptionRecord,
    MessageStartEventSubscriptionRecord,
);

macro_rules! process_instance_bound {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl HasProcessInstance for $ty {
                fn process_instance_key(&self) -> Key {
                    self.process_instance_key
                }
            }
        )+
    };
}

process_instance_bound!(
    ProcessInstanceRecord,
    ProcessInstanceCreationRecord,
    ProcessInstanceModificationRecord,
    ProcessInstanceMigrationRecord,
    ProcessEventRecord,
    JobRecord,
    TimerRecord,
    IncidentRecord,
    VariableRecord,
    DecisionEvaluationRecord,
    MessageSubscriptionRecord,
    ProcessMessageSubscriptionRecord,
);

// ─── Union ───

macro_rules! record_values {
    ($($variant:ident($ty:ident)),+ $(,)?) => {
        /// Payload of a record; the variant always matches the record's value type.
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(untagged)]
        pub enum RecordValue {
            $($variant($ty),)+
        }

        impl RecordValue {
            pub fn value_type(&self) -> ValueType {
                match self {
                    $(RecordValue::$variant(_) => ValueType::$variant,)+
                }
            }

            /// Decodes a JSON payload of the given value type. Unknown fields
            /// are ignored, missing fields take their defaults.
            pub fn from_json(
                value_type: ValueType,
                json: serde_json::Value,
            ) -> Result<RecordValue, serde_json::Error> {
                Ok(match value_type {
                    $(ValueType::$variant => RecordValue::$variant(serde_json::from_value(json)?),)+
                })
            }

            pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
                serde_json::to_value(self)
            }
        }

        $(
            impl From<$ty> for RecordValue {
                fn from(value: $ty) -> Self {
                    RecordValue::$variant(value)
                }
            }

            impl ValueVariant for $ty {
                fn from_value(value: &RecordValue) -> Option<&Self> {
                    match value {
                        RecordValue::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn from_value_mut(value: &mut RecordValue) -> Option<&mut Self> {
                    match value {
                        RecordValue::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )+
    };
}

/// Typed access to one variant of [`RecordValue`].
pub trait ValueVariant: Sized {
    fn from_value(value: &RecordValue) -> Option<&Self>;
    fn from_value_mut(value: &mut RecordValue) -> Option<&mut Self>;
}

record_values!(
    ProcessInstance(ProcessInstanceRecord),
    ProcessInstanceCreation(ProcessInstanceCreationRecord),
    ProcessInstanceModification(ProcessInstanceModificationRecord),
    ProcessInstanceMigration(ProcessInstanceMigrationRecord),
    ProcessEvent(ProcessEventRecord),
    Job(JobRecord),
    JobBatch(JobBatchRecord),
    Timer(TimerRecord),
    Incident(IncidentRecord),
    Variable(VariableRecord),
    VariableDocument(VariableDocumentRecord),
    Deployment(DeploymentRecord),
    Process(ProcessRecord),
    Decision(DecisionRecord),
    Form(FormRecord),
    DecisionEvaluation(DecisionEvaluationRecord),
    ResourceDeletion(ResourceDeletionRecord),
    Signal(SignalRecord),
    SignalSubscription(SignalSubscriptionRecord),
    AdHocSubProcessInstruction(AdHocSubProcessInstructionRecord),
    ClusterVariable(ClusterVariableRecord),
    Tenant(TenantRecord),
    User(UserRecord),
    Group(GroupRecord),
    MappingRule(MappingRuleRecord),
    Authorization(AuthorizationRecord),
    Message(MessageRecord),
    MessageSubscription(MessageSubscriptionRecord),
    ProcessMessageSubscription(ProcessMessageSubscriptionRecord),
    MessageStartEventSubscription(MessageStartEventSubscriptionRecord),
);

impl RecordValue {
    /// Owning tenant of the payload. Identity payloads and job batches are
    /// not tenant owned and report the default tenant.
    pub fn tenant_id(&self) -> &str {
        match self {
            RecordValue::ProcessInstance(v) => v.tenant_id(),
            RecordValue::ProcessInstanceCreation(v) => v.tenant_id(),
            RecordValue::ProcessInstanceModification(v) => v.tenant_id(),
            RecordValue::ProcessInstanceMigration(v) => v.tenant_id(),
            RecordValue::ProcessEvent(v) => v.tenant_id(),
            RecordValue::Job(v) => v.tenant_id(),
            RecordValue::Timer(v) => v.tenant_id(),
            RecordValue::Incident(v) => v.tenant_id(),
            RecordValue::Variable(v) => v.tenant_id(),
            RecordValue::VariableDocument(v) => v.tenant_id(),
            RecordValue::Deployment(v) => v.tenant_id(),
            RecordValue::Process(v) => v.tenant_id(),
            RecordValue::Decision(v) => v.tenant_id(),
            RecordValue::Form(v) => v.tenant_id(),
            RecordValue::DecisionEvaluation(v) => v.tenant_id(),
            RecordValue::ResourceDeletion(v) => v.tenant_id(),
            RecordValue::Signal(v) => v.tenant_id(),
            RecordValue::SignalSubscription(v) => v.tenant_id(),
            RecordValue::AdHocSubProcessInstruction(v) => v.tenant_id(),
            RecordValue::ClusterVariable(v) => v.tenant_id(),
            RecordValue::Message(v) => v.tenant_id(),
            RecordValue::MessageSubscription(v) => v.tenant_id(),
            RecordValue::ProcessMessageSubscription(v) => v.tenant_id(),
            RecordValue::MessageStartEventSubscription(v) => v.tenant_id(),
            RecordValue::JobBatch(_)
            | RecordValue::Tenant(_)
            | RecordValue::User(_)
            | RecordValue::Group(_)
            | RecordValue::MappingRule(_)
            | RecordValue::Authorization(_) => DEFAULT_TENANT,
        }
    }

    pub fn process_instance_key(&self) -> Option<Key> {
        match self {
            RecordValue::ProcessInstance(v) => Some(v.process_instance_key()),
            RecordValue::ProcessInstanceCreation(v) => Some(v.process_instance_key()),
            RecordValue::ProcessInstanceModification(v) => Some(v.process_instance_key()),
            RecordValue::ProcessInstanceMigration(v) => Some(v.process_instance_key()),
            RecordValue::ProcessEvent(v) => Some(v.process_instance_key()),
            RecordValue::Job(v) => Some(v.process_instance_key()),
            RecordValue::Timer(v) => Some(v.process_instance_key()),
            RecordValue::Incident(v) => Some(v.process_instance_key()),
            RecordValue::Variable(v) => Some(v.process_instance_key()),
            RecordValue::DecisionEvaluation(v) => Some(v.process_instance_key()),
            RecordValue::MessageSubscription(v) => Some(v.process_instance_key()),
            RecordValue::ProcessMessageSubscription(v) => Some(v.process_instance_key()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn old_process_instance_records_decode_with_absent_root_key() {
        let old = json!({
            "bpmnProcessId": "order",
            "version": 1,
            "processDefinitionKey": 10,
            "processInstanceKey": 11,
            "elementId": "task",
            "flowScopeKey": 11,
            "bpmnElementType": "SERVICE_TASK",
            "tenantId": "foo"
        });
        let value = RecordValue::from_json(ValueType::ProcessInstance, old).unwrap();
        let RecordValue::ProcessInstance(record) = value else {
            panic!("wrong variant");
        };
        assert_eq!(record.root_process_instance_key, NO_KEY);
        assert!(record.element_instance_path.is_empty());
        assert_eq!(record.parent_element_instance_key, NO_KEY);
        assert_eq!(record.tenant_id, "foo");
    }

    #[test]
    fn new_process_instance_records_keep_root_key() {
        let new = json!({
            "bpmnProcessId": "order",
            "processInstanceKey": 11,
            "rootProcessInstanceKey": 7,
            "elementInstancePath": [[7, 9], [11]]
        });
        let value = RecordValue::from_json(ValueType::ProcessInstance, new).unwrap();
        let RecordValue::ProcessInstance(record) = value else {
            panic!("wrong variant");
        };
        assert_eq!(record.root_process_instance_key, 7);
        assert_eq!(record.element_instance_path, vec![vec![7, 9], vec![11]]);
        assert_eq!(record.tenant_id, DEFAULT_TENANT);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = json!({"type": "payment", "retries": 3, "someFutureField": {"x": 1}});
        let value = RecordValue::from_json(ValueType::Job, json).unwrap();
        let RecordValue::Job(job) = value else {
            panic!("wrong variant");
        };
        assert_eq!(job.job_type, "payment");
        assert_eq!(job.retries, 3);
        assert_eq!(job.deadline, -1);
    }

    #[test]
    fn identity_payloads_belong_to_default_tenant() {
        let value = RecordValue::from(TenantRecord {
            tenant_id: "foo".to_string(),
            ..Default::default()
        });
        assert_eq!(value.tenant_id(), DEFAULT_TENANT);
    }
}
