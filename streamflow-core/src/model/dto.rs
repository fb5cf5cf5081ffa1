use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ── Helper defaults for serde ──

fn default_true() -> bool {
    true
}

fn default_retries() -> String {
    "3".to_string()
}

// ── Process ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDto {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub nodes: Vec<NodeDto>,
    #[serde(default)]
    pub flows: Vec<FlowDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDto {
    /// Defaults to `<from>-<to>`.
    #[serde(default)]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub default: bool,
}

impl FlowDto {
    pub fn flow_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.from, self.to))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerDto {
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub cycle: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDto {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerEventDto {
    Start,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionListenerDto {
    pub event_type: ListenerEventDto,
    pub job_type: String,
    #[serde(default = "default_retries")]
    pub retries: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDto {
    /// Absent on a boundary event: catch every error.
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDto {
    /// Static name or an `=` expression.
    pub name: String,
    /// Expression evaluated when the subscription opens. Not used on start
    /// events.
    #[serde(default)]
    pub correlation_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskListenerEventDto {
    Creating,
    Completing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListenerDto {
    pub event_type: TaskListenerEventDto,
    pub job_type: String,
    #[serde(default = "default_retries")]
    pub retries: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiInstanceDto {
    #[serde(default)]
    pub sequential: bool,
    pub input_collection: String,
    #[serde(default)]
    pub input_element: Option<String>,
    #[serde(default)]
    pub output_collection: Option<String>,
    #[serde(default)]
    pub output_element: Option<String>,
    #[serde(default)]
    pub completion_condition: Option<String>,
}

/// Fields shared by every activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityDto {
    #[serde(default)]
    pub inputs: Vec<MappingDto>,
    #[serde(default)]
    pub outputs: Vec<MappingDto>,
    #[serde(default)]
    pub execution_listeners: Vec<ExecutionListenerDto>,
    #[serde(default)]
    pub multi_instance: Option<MultiInstanceDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeDto {
    StartEvent {
        id: String,
        #[serde(default)]
        timer: Option<TimerDto>,
        #[serde(default)]
        signal: Option<String>,
        #[serde(default)]
        message: Option<MessageDto>,
        #[serde(default)]
        outputs: Vec<MappingDto>,
    },
    EndEvent {
        id: String,
        #[serde(default)]
        terminate: bool,
        #[serde(default)]
        error: Option<ErrorDto>,
    },
    ServiceTask {
        id: String,
        job_type: String,
        #[serde(default = "default_retries")]
        retries: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        tags: BTreeSet<String>,
        #[serde(flatten)]
        activity: ActivityDto,
    },
    UserTask {
        id: String,
        #[serde(default)]
        form_id: Option<String>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        task_listeners: Vec<TaskListenerDto>,
        #[serde(flatten)]
        activity: ActivityDto,
    },
    ReceiveTask {
        id: String,
        message: MessageDto,
        #[serde(flatten)]
        activity: ActivityDto,
    },
    BusinessRuleTask {
        id: String,
        #[serde(default)]
        decision_id: Option<String>,
        #[serde(default)]
        result_variable: Option<String>,
        #[serde(default)]
        job_type: Option<String>,
        #[serde(default = "default_retries")]
        retries: String,
        #[serde(flatten)]
        activity: ActivityDto,
    },
    ExclusiveGateway {
        id: String,
    },
    ParallelGateway {
        id: String,
    },
    InclusiveGateway {
        id: String,
    },
    EventBasedGateway {
        id: String,
    },
    IntermediateTimerCatch {
        id: String,
        timer: TimerDto,
        #[serde(default)]
        outputs: Vec<MappingDto>,
    },
    IntermediateSignalCatch {
        id: String,
        signal: String,
        #[serde(default)]
        outputs: Vec<MappingDto>,
    },
    IntermediateMessageCatch {
        id: String,
        message: MessageDto,
        #[serde(default)]
        outputs: Vec<MappingDto>,
    },
    BoundaryEvent {
        id: String,
        attached_to: String,
        #[serde(default = "default_true")]
        cancel_activity: bool,
        #[serde(default)]
        timer: Option<TimerDto>,
        #[serde(default)]
        signal: Option<String>,
        #[serde(default)]
        message: Option<MessageDto>,
        #[serde(default)]
        error: Option<ErrorDto>,
        #[serde(default)]
        outputs: Vec<MappingDto>,
    },
    SubProcess {
        id: String,
        nodes: Vec<NodeDto>,
        #[serde(default)]
        flows: Vec<FlowDto>,
        #[serde(flatten)]
        activity: ActivityDto,
    },
    AdHocSubProcess {
        id: String,
        nodes: Vec<NodeDto>,
        #[serde(default)]
        flows: Vec<FlowDto>,
        #[serde(default)]
        completion_condition: Option<String>,
        #[serde(default)]
        cancel_remaining_instances: bool,
        /// Expression yielding the ids of the elements to activate on entry.
        #[serde(default)]
        active_elements: Option<String>,
        #[serde(flatten)]
        activity: ActivityDto,
    },
    CallActivity {
        id: String,
        process_id: String,
        #[serde(flatten)]
        activity: ActivityDto,
    },
}

impl NodeDto {
    /// Returns the id regardless of variant.
    pub fn id(&self) -> &str {
        match self {
            NodeDto::StartEvent { id, .. }
            | NodeDto::EndEvent { id, .. }
            | NodeDto::ServiceTask { id, .. }
            | NodeDto::UserTask { id, .. }
            | NodeDto::ReceiveTask { id, .. }
            | NodeDto::BusinessRuleTask { id, .. }
            | NodeDto::ExclusiveGateway { id }
            | NodeDto::ParallelGateway { id }
            | NodeDto::InclusiveGateway { id }
            | NodeDto::EventBasedGateway { id }
            | NodeDto::IntermediateTimerCatch { id, .. }
            | NodeDto::IntermediateSignalCatch { id, .. }
            | NodeDto::IntermediateMessageCatch { id, .. }
            | NodeDto::BoundaryEvent { id, .. }
            | NodeDto::SubProcess { id, .. }
            | NodeDto::AdHocSubProcess { id, .. }
            | NodeDto::CallActivity { id, .. } => id,
        }
    }
}

// ── Decision ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionDto {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub inputs: Vec<String>,
    #[serde(default)]
    pub output: Option<String>,
    pub rules: Vec<RuleDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDto {
    /// One entry per input; `null` matches anything.
    pub when: Vec<serde_json::Value>,
    pub then: serde_json::Value,
}

// ── Form ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDto {
    pub id: String,
    #[serde(default)]
    pub schema: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_are_tagged_by_type() {
        let yaml = r#"
id: order
nodes:
  - type: start_event
    id: start
  - type: service_task
    id: charge
    job_type: payment
    inputs:
      - source: =order.total
        target: amount
  - type: boundary_event
    id: too_slow
    attached_to: charge
    timer:
      duration: PT1M
  - type: end_event
    id: end
flows:
  - from: start
    to: charge
  - from: charge
    to: end
"#;
        let dto: ProcessDto = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(dto.nodes.len(), 4);
        match &dto.nodes[1] {
            NodeDto::ServiceTask {
                job_type,
                retries,
                activity,
                ..
            } => {
                assert_eq!(job_type, "payment");
                assert_eq!(retries, "3");
                assert_eq!(activity.inputs[0].target, "amount");
            }
            other => panic!("Expected ServiceTask, got {:?}", other),
        }
        match &dto.nodes[2] {
            NodeDto::BoundaryEvent {
                cancel_activity,
                timer,
                ..
            } => {
                assert!(*cancel_activity);
                assert_eq!(timer.as_ref().unwrap().duration.as_deref(), Some("PT1M"));
            }
            other => panic!("Expected BoundaryEvent, got {:?}", other),
        }
        assert_eq!(dto.flows[0].flow_id(), "start-charge");
    }

    #[test]
    fn activities_carry_multi_instance_and_listeners() {
        let yaml = r#"
id: review
nodes:
  - type: start_event
    id: start
  - type: user_task
    id: approve
    task_listeners:
      - event_type: completing
        job_type: audit
    multi_instance:
      input_collection: =reviewers
      input_element: reviewer
  - type: receive_task
    id: wait
    message:
      name: approved
      correlation_key: =orderId
"#;
        let dto: ProcessDto = serde_yaml::from_str(yaml).unwrap();
        match &dto.nodes[1] {
            NodeDto::UserTask {
                task_listeners,
                activity,
                ..
            } => {
                assert_eq!(task_listeners[0].event_type, TaskListenerEventDto::Completing);
                assert_eq!(task_listeners[0].retries, "3");
                let mi = activity.multi_instance.as_ref().unwrap();
                assert!(!mi.sequential);
                assert_eq!(mi.input_element.as_deref(), Some("reviewer"));
            }
            other => panic!("Expected UserTask, got {:?}", other),
        }
        match &dto.nodes[2] {
            NodeDto::ReceiveTask { message, .. } => {
                assert_eq!(message.correlation_key.as_deref(), Some("=orderId"));
            }
            other => panic!("Expected ReceiveTask, got {:?}", other),
        }
    }

    #[test]
    fn unknown_node_type_fails() {
        let yaml = r#"
id: bad
nodes:
  - type: script_task
    id: s
"#;
        assert!(serde_yaml::from_str::<ProcessDto>(yaml).is_err());
    }
}
