//! Per value type intents and the [`Intent`] union carried by every record.

use super::ValueType;
use serde::{Serialize, Serializer};
use std::fmt;

macro_rules! intent_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn code(self) -> u8 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

intent_enum!(ProcessInstanceIntent {
    Cancel = 0 => "CANCEL",
    SequenceFlowTaken = 1 => "SEQUENCE_FLOW_TAKEN",
    ElementActivating = 2 => "ELEMENT_ACTIVATING",
    ElementActivated = 3 => "ELEMENT_ACTIVATED",
    ElementCompleting = 4 => "ELEMENT_COMPLETING",
    ElementCompleted = 5 => "ELEMENT_COMPLETED",
    ElementTerminating = 6 => "ELEMENT_TERMINATING",
    ElementTerminated = 7 => "ELEMENT_TERMINATED",
    ActivateElement = 8 => "ACTIVATE_ELEMENT",
    CompleteElement = 9 => "COMPLETE_ELEMENT",
    TerminateElement = 10 => "TERMINATE_ELEMENT",
    SequenceFlowDeleted = 11 => "SEQUENCE_FLOW_DELETED",
    ElementMigrated = 12 => "ELEMENT_MIGRATED",
    CompleteExecutionListener = 13 => "COMPLETE_EXECUTION_LISTENER",
});

intent_enum!(ProcessInstanceCreationIntent {
    Create = 0 => "CREATE",
    Created = 1 => "CREATED",
});

intent_enum!(ProcessInstanceModificationIntent {
    Modify = 0 => "MODIFY",
    Modified = 1 => "MODIFIED",
});

intent_enum!(ProcessInstanceMigrationIntent {
    Migrate = 0 => "MIGRATE",
    Migrated = 1 => "MIGRATED",
});

intent_enum!(ProcessEventIntent {
    Triggering = 0 => "TRIGGERING",
    Triggered = 1 => "TRIGGERED",
});

intent_enum!(JobIntent {
    Created = 0 => "CREATED",
    Complete = 1 => "COMPLETE",
    Completed = 2 => "COMPLETED",
    TimeOut = 3 => "TIME_OUT",
    TimedOut = 4 => "TIMED_OUT",
    Fail = 5 => "FAIL",
    Failed = 6 => "FAILED",
    UpdateRetries = 7 => "UPDATE_RETRIES",
    RetriesUpdated = 8 => "RETRIES_UPDATED",
    Canceled = 10 => "CANCELED",
    ThrowError = 11 => "THROW_ERROR",
    ErrorThrown = 12 => "ERROR_THROWN",
    RecurAfterBackoff = 13 => "RECUR_AFTER_BACKOFF",
    RecurredAfterBackoff = 14 => "RECURRED_AFTER_BACKOFF",
    UpdateTimeout = 15 => "UPDATE_TIMEOUT",
    TimeoutUpdated = 16 => "TIMEOUT_UPDATED",
    Migrated = 17 => "MIGRATED",
});

intent_enum!(JobBatchIntent {
    Activate = 0 => "ACTIVATE",
    Activated = 1 => "ACTIVATED",
});

intent_enum!(TimerIntent {
    Created = 0 => "CREATED",
    Trigger = 1 => "TRIGGER",
    Triggered = 2 => "TRIGGERED",
    Canceled = 3 => "CANCELED",
    Migrated = 4 => "MIGRATED",
});

intent_enum!(IncidentIntent {
    Created = 0 => "CREATED",
    Resolve = 1 => "RESOLVE",
    Resolved = 2 => "RESOLVED",
    Migrated = 3 => "MIGRATED",
});

intent_enum!(VariableIntent {
    Created = 0 => "CREATED",
    Updated = 1 => "UPDATED",
    Migrated = 2 => "MIGRATED",
});

intent_enum!(VariableDocumentIntent {
    Update = 0 => "UPDATE",
    Updated = 1 => "UPDATED",
});

intent_enum!(DeploymentIntent {
    Create = 0 => "CREATE",
    Created = 1 => "CREATED",
});

intent_enum!(ProcessIntent {
    Created = 0 => "CREATED",
    Deleting = 1 => "DELETING",
    Deleted = 2 => "DELETED",
});

intent_enum!(DecisionIntent {
    Created = 0 => "CREATED",
    Deleted = 1 => "DELETED",
});

intent_enum!(FormIntent {
    Created = 0 => "CREATED",
    Deleted = 1 => "DELETED",
});

intent_enum!(DecisionEvaluationIntent {
    Evaluate = 0 => "EVALUATE",
    Evaluated = 1 => "EVALUATED",
    Failed = 2 => "FAILED",
});

intent_enum!(ResourceDeletionIntent {
    Delete = 0 => "DELETE",
    Deleting = 1 => "DELETING",
    Deleted = 2 => "DELETED",
});

intent_enum!(SignalIntent {
    Broadcast = 0 => "BROADCAST",
    Broadcasted = 1 => "BROADCASTED",
});

intent_enum!(SignalSubscriptionIntent {
    Created = 0 => "CREATED",
    Deleted = 1 => "DELETED",
    Migrated = 2 => "MIGRATED",
});

intent_enum!(AdHocSubProcessInstructionIntent {
    Activate = 0 => "ACTIVATE",
    Activated = 1 => "ACTIVATED",
    Complete = 2 => "COMPLETE",
    Completed = 3 => "COMPLETED",
});

intent_enum!(ClusterVariableIntent {
    Create = 0 => "CREATE",
    Created = 1 => "CREATED",
    Update = 2 => "UPDATE",
    Updated = 3 => "UPDATED",
    Delete = 4 => "DELETE",
    Deleted = 5 => "DELETED",
});

intent_enum!(TenantIntent {
    Create = 0 => "CREATE",
    Created = 1 => "CREATED",
    AddEntity = 2 => "ADD_ENTITY",
    EntityAdded = 3 => "ENTITY_ADDED",
    RemoveEntity = 4 => "REMOVE_ENTITY",
    EntityRemoved = 5 => "ENTITY_REMOVED",
});

intent_enum!(UserIntent {
    Create = 0 => "CREATE",
    Created = 1 => "CREATED",
});

intent_enum!(GroupIntent {
    Create = 0 => "CREATE",
    Created = 1 => "CREATED",
    AddEntity = 2 => "ADD_ENTITY",
    EntityAdded = 3 => "ENTITY_ADDED",
});

intent_enum!(MappingRuleIntent {
    Create = 0 => "CREATE",
    Created = 1 => "CREATED",
});

intent_enum!(AuthorizationIntent {
    Create = 0 => "CREATE",
    Created = 1 => "CREATED",
    Delete = 2 => "DELETE",
    Deleted = 3 => "DELETED",
});

intent_enum!(MessageIntent {
    Publish = 0 => "PUBLISH",
    Published = 1 => "PUBLISHED",
    Expire = 2 => "EXPIRE",
    Expired = 3 => "EXPIRED",
});

intent_enum!(MessageSubscriptionIntent {
    Create = 0 => "CREATE",
    Created = 1 => "CREATED",
    Correlated = 4 => "CORRELATED",
    Delete = 7 => "DELETE",
    Deleted = 8 => "DELETED",
});

intent_enum!(ProcessMessageSubscriptionIntent {
    Created = 2 => "CREATED",
    Correlate = 3 => "CORRELATE",
    Correlated = 4 => "CORRELATED",
    Deleted = 7 => "DELETED",
});

intent_enum!(MessageStartEventSubscriptionIntent {
    Created = 0 => "CREATED",
    Correlated = 1 => "CORRELATED",
    Deleted = 2 => "DELETED",
});

macro_rules! intent_union {
    ($($variant:ident($inner:ident)),+ $(,)?) => {
        /// The semantic action of a record, scoped to its value type.
        ///
        /// Intent codes this build does not know decode to
        /// [`Intent::Unknown`] so that logs written by newer versions stay
        /// readable.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Intent {
            $($variant($inner),)+
            Unknown { value_type: ValueType, code: u8 },
        }

        impl Intent {
            pub fn value_type(&self) -> ValueType {
                match self {
                    $(Intent::$variant(_) => ValueType::$variant,)+
                    Intent::Unknown { value_type, .. } => *value_type,
                }
            }

            pub fn code(&self) -> u8 {
                match self {
                    $(Intent::$variant(i) => i.code(),)+
                    Intent::Unknown { code, .. } => *code,
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Intent::$variant(i) => i.as_str(),)+
                    Intent::Unknown { .. } => "UNKNOWN",
                }
            }

            /// Never fails: unknown codes of a known value type are preserved.
            pub fn from_code(value_type: ValueType, code: u8) -> Intent {
                let known = match value_type {
                    $(ValueType::$variant => $inner::from_code(code).map(Intent::$variant),)+
                };
                known.unwrap_or(Intent::Unknown { value_type, code })
            }

            pub fn from_name(value_type: ValueType, name: &str) -> Option<Intent> {
                match value_type {
                    $(ValueType::$variant => $inner::from_name(name).map(Intent::$variant),)+
                }
            }
        }

        $(
            impl From<$inner> for Intent {
                fn from(intent: $inner) -> Self {
                    Intent::$variant(intent)
                }
            }
        )+
    };
}

intent_union!(
    ProcessInstance(ProcessInstanceIntent),
    ProcessInstanceCreation(ProcessInstanceCreationIntent),
    ProcessInstanceModification(ProcessInstanceModificationIntent),
    ProcessInstanceMigration(ProcessInstanceMigrationIntent),
    ProcessEvent(ProcessEventIntent),
    Job(JobIntent),
    JobBatch(JobBatchIntent),
    Timer(TimerIntent),
    Incident(IncidentIntent),
    Variable(VariableIntent),
    VariableDocument(VariableDocumentIntent),
    Deployment(DeploymentIntent),
    Process(ProcessIntent),
    Decision(DecisionIntent),
    Form(FormIntent),
    DecisionEvaluation(DecisionEvaluationIntent),
    ResourceDeletion(ResourceDeletionIntent),
    Signal(SignalIntent),
    SignalSubscription(SignalSubscriptionIntent),
    AdHocSubProcessInstruction(AdHocSubProcessInstructionIntent),
    ClusterVariable(ClusterVariableIntent),
    Tenant(TenantIntent),
    User(UserIntent),
    Group(GroupIntent),
    MappingRule(MappingRuleIntent),
    Authorization(AuthorizationIntent),
    Message(MessageIntent),
    MessageSubscription(MessageSubscriptionIntent),
    ProcessMessageSubscription(ProcessMessageSubscriptionIntent),
    MessageStartEventSubscription(MessageStartEventSubscriptionIntent),
);

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Unknown { code, .. } => write!(f, "UNKNOWN({code})"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl Serialize for Intent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_for_every_job_intent() {
        for intent in JobIntent::ALL {
            let decoded = Intent::from_code(ValueType::Job, intent.code());
            assert_eq!(decoded, Intent::Job(*intent));
        }
    }

    #[test]
    fn unknown_code_is_preserved() {
        let decoded = Intent::from_code(ValueType::Timer, 200);
        assert_eq!(
            decoded,
            Intent::Unknown {
                value_type: ValueType::Timer,
                code: 200
            }
        );
        assert_eq!(decoded.value_type(), ValueType::Timer);
        assert_eq!(decoded.to_string(), "UNKNOWN(200)");
    }

    #[test]
    fn names_are_scoped_by_value_type() {
        assert_eq!(
            Intent::from_name(ValueType::JobBatch, "ACTIVATE"),
            Some(Intent::JobBatch(JobBatchIntent::Activate))
        );
        assert_eq!(Intent::from_name(ValueType::JobBatch, "COMPLETE"), None);
    }
}
