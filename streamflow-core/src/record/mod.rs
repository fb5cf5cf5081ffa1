//! The record envelope shared by commands, events and rejections.

pub mod codec;
pub mod intent;
pub mod value;

pub use intent::*;
pub use value::*;

use crate::auth::AuthorizationContext;
use crate::types::{Key, PartitionId, Position, Timestamp, DEFAULT_TENANT, NO_KEY};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Command,
    Event,
    Rejection,
}

impl RecordType {
    pub fn code(self) -> u8 {
        match self {
            RecordType::Command => 0,
            RecordType::Event => 1,
            RecordType::Rejection => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RecordType::Command),
            1 => Some(RecordType::Event),
            2 => Some(RecordType::Rejection),
            _ => None,
        }
    }
}

macro_rules! value_types {
    ($($variant:ident = $code:literal => $text:literal),+ $(,)?) => {
        /// Schema of a record's payload.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum ValueType {
            $($variant),+
        }

        impl ValueType {
            pub const ALL: &'static [ValueType] = &[$(ValueType::$variant),+];

            pub fn code(self) -> u8 {
                match self {
                    $(ValueType::$variant => $code),+
                }
            }

            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(ValueType::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $(ValueType::$variant => $text),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($text => Some(ValueType::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

value_types!(
    ProcessInstance = 1 => "PROCESS_INSTANCE",
    ProcessInstanceCreation = 2 => "PROCESS_INSTANCE_CREATION",
    ProcessInstanceModification = 3 => "PROCESS_INSTANCE_MODIFICATION",
    ProcessInstanceMigration = 4 => "PROCESS_INSTANCE_MIGRATION",
    ProcessEvent = 5 => "PROCESS_EVENT",
    Job = 6 => "JOB",
    JobBatch = 7 => "JOB_BATCH",
    Timer = 8 => "TIMER",
    Incident = 9 => "INCIDENT",
    Variable = 10 => "VARIABLE",
    VariableDocument = 11 => "VARIABLE_DOCUMENT",
    Deployment = 12 => "DEPLOYMENT",
    Process = 13 => "PROCESS",
    Decision = 14 => "DECISION",
    Form = 15 => "FORM",
    DecisionEvaluation = 16 => "DECISION_EVALUATION",
    ResourceDeletion = 17 => "RESOURCE_DELETION",
    Signal = 18 => "SIGNAL",
    SignalSubscription = 19 => "SIGNAL_SUBSCRIPTION",
    AdHocSubProcessInstruction = 20 => "AD_HOC_SUB_PROCESS_INSTRUCTION",
    ClusterVariable = 21 => "CLUSTER_VARIABLE",
    Tenant = 22 => "TENANT",
    User = 23 => "USER",
    Group = 24 => "GROUP",
    MappingRule = 25 => "MAPPING_RULE",
    Authorization = 26 => "AUTHORIZATION",
    Message = 27 => "MESSAGE",
    MessageSubscription = 28 => "MESSAGE_SUBSCRIPTION",
    ProcessMessageSubscription = 29 => "PROCESS_MESSAGE_SUBSCRIPTION",
    MessageStartEventSubscription = 30 => "MESSAGE_START_EVENT_SUBSCRIPTION",
);

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionType {
    NotFound,
    Unauthorized,
    AlreadyExists,
    InvalidArgument,
    InvalidState,
    ExceededBatchRecordSize,
    /// The processor failed unexpectedly; the command was rolled back.
    ProcessingError,
}

impl RejectionType {
    pub fn code(self) -> u8 {
        match self {
            RejectionType::NotFound => 1,
            RejectionType::Unauthorized => 2,
            RejectionType::AlreadyExists => 3,
            RejectionType::InvalidArgument => 4,
            RejectionType::InvalidState => 5,
            RejectionType::ExceededBatchRecordSize => 6,
            RejectionType::ProcessingError => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(RejectionType::NotFound),
            2 => Some(RejectionType::Unauthorized),
            3 => Some(RejectionType::AlreadyExists),
            4 => Some(RejectionType::InvalidArgument),
            5 => Some(RejectionType::InvalidState),
            6 => Some(RejectionType::ExceededBatchRecordSize),
            7 => Some(RejectionType::ProcessingError),
            _ => None,
        }
    }
}

/// Payload owned by exactly one tenant.
pub trait HasTenant {
    fn tenant_id(&self) -> &str;
}

/// Payload that belongs to a process instance (or `-1` when standalone).
pub trait HasProcessInstance {
    fn process_instance_key(&self) -> Key;
}

/// One command, event or rejection. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub position: Position,
    /// Position of the command that produced this record, `-1` for commands
    /// written from outside the partition.
    pub source_record_position: Position,
    pub key: Key,
    pub timestamp: Timestamp,
    pub partition_id: PartitionId,
    pub record_type: RecordType,
    pub value_type: ValueType,
    pub intent: Intent,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_type: Option<RejectionType>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rejection_reason: String,
    pub authorization: AuthorizationContext,
    /// Correlates a client command with its response, `-1` for none.
    pub request_id: i64,
    /// Set on commands forwarded from another partition.
    pub distributed: bool,
    pub value: RecordValue,
}

impl Record {
    fn new(record_type: RecordType, intent: Intent, value: RecordValue) -> Self {
        let tenant_id = value.tenant_id().to_string();
        Self {
            position: -1,
            source_record_position: -1,
            key: NO_KEY,
            timestamp: -1,
            partition_id: 0,
            record_type,
            value_type: value.value_type(),
            intent,
            tenant_id,
            rejection_type: None,
            rejection_reason: String::new(),
            authorization: AuthorizationContext::default(),
            request_id: -1,
            distributed: false,
            value,
        }
    }

    pub fn command(intent: impl Into<Intent>, value: impl Into<RecordValue>) -> Self {
        Self::new(RecordType::Command, intent.into(), value.into())
    }

    pub fn event(key: Key, intent: impl Into<Intent>, value: impl Into<RecordValue>) -> Self {
        Self::new(RecordType::Event, intent.into(), value.into()).with_key(key)
    }

    /// Rejection of `command`, echoing its key, intent and payload.
    pub fn rejection_of(command: &Record, rejection_type: RejectionType, reason: String) -> Self {
        Self {
            position: -1,
            source_record_position: command.position,
            record_type: RecordType::Rejection,
            rejection_type: Some(rejection_type),
            rejection_reason: reason,
            distributed: false,
            ..command.clone()
        }
    }

    pub fn with_key(mut self, key: Key) -> Self {
        self.key = key;
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn with_authorization(mut self, authorization: AuthorizationContext) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn with_request_id(mut self, request_id: i64) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn is_command(&self) -> bool {
        self.record_type == RecordType::Command
    }

    pub fn is_event(&self) -> bool {
        self.record_type == RecordType::Event
    }

    pub fn is_rejection(&self) -> bool {
        self.record_type == RecordType::Rejection
    }

    pub fn value_as<T: ValueVariant>(&self) -> Option<&T> {
        T::from_value(&self.value)
    }

    /// True for identity payloads which always live in the default tenant.
    pub fn is_default_tenant(&self) -> bool {
        self.tenant_id == DEFAULT_TENANT
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} {:?} {}:{} key={}",
            self.partition_id, self.position, self.record_type, self.value_type, self.intent, self.key
        )?;
        if let Some(rejection_type) = self.rejection_type {
            write!(f, " rejected {:?}: {}", rejection_type, self.rejection_reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_takes_tenant_from_payload() {
        let command = Record::command(
            JobIntent::Complete,
            JobRecord {
                tenant_id: "foo".to_string(),
                ..Default::default()
            },
        )
        .with_key(42);
        assert_eq!(command.tenant_id, "foo");
        assert_eq!(command.value_type, ValueType::Job);
        assert_eq!(command.key, 42);
        assert!(command.is_command());
        assert!(command.value_as::<JobRecord>().is_some());
        assert!(command.value_as::<TimerRecord>().is_none());
    }

    #[test]
    fn rejection_echoes_the_command() {
        let mut command = Record::command(TimerIntent::Trigger, TimerRecord::default()).with_key(7);
        command.position = 12;
        let rejection =
            Record::rejection_of(&command, RejectionType::NotFound, "gone".to_string());
        assert!(rejection.is_rejection());
        assert_eq!(rejection.key, 7);
        assert_eq!(rejection.source_record_position, 12);
        assert_eq!(rejection.intent, Intent::Timer(TimerIntent::Trigger));
        assert_eq!(rejection.rejection_reason, "gone");
    }

    #[test]
    fn value_type_codes_are_unique() {
        for value_type in ValueType::ALL {
            assert_eq!(ValueType::from_code(value_type.code()), Some(*value_type));
            assert_eq!(ValueType::from_name(value_type.as_str()), Some(*value_type));
        }
    }
}
