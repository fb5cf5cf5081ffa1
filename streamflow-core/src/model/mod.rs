//! Deployable resources: processes, decisions and forms.
//!
//! Resources are YAML documents tagged with `kind`. Processes are validated
//! and flattened into a [`ProcessModel`] whose elements point at their flow
//! scope, so nested sub-processes need no recursion at runtime.

pub mod decision;
pub mod dto;
pub mod expression;
mod transform;
mod validate;

pub use decision::{DecisionModel, DecisionResult};
pub use expression::{
    EmptyScope, ExpressionError, ExpressionLanguage, Layered, SimpleExpressionLanguage,
    VariableScope,
};
pub use validate::ValidationError;

use crate::record::{BpmnElementType, BpmnEventType};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("'{resource}': {message}")]
    Parse { resource: String, message: String },
    #[error("'{resource}': unknown resource kind '{kind}'")]
    UnknownKind { resource: String, kind: String },
    #[error("'{resource}': {}", join_errors(.errors))]
    Invalid {
        resource: String,
        errors: Vec<ValidationError>,
    },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Duration,
    Cycle,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerDefinition {
    pub kind: TimerKind,
    /// Static ISO-8601 text or an `=` expression yielding it.
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionListener {
    pub event: ListenerEvent,
    pub job_type: String,
    pub retries: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskListenerEvent {
    Creating,
    Completing,
}

/// Job run around a user task's own job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskListener {
    pub event: TaskListenerEvent,
    pub job_type: String,
    pub retries: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDefinition {
    /// Static name or an `=` expression.
    pub name: String,
    /// Absent on message start events.
    pub correlation_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiInstanceDefinition {
    pub sequential: bool,
    pub input_collection: String,
    pub input_element: Option<String>,
    pub output_collection: Option<String>,
    pub output_element: Option<String>,
    pub completion_condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub job_type: String,
    pub retries: String,
    pub headers: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdHocDefinition {
    pub completion_condition: Option<String>,
    pub cancel_remaining_instances: bool,
    pub active_elements: Option<String>,
}

/// One flattened BPMN element. Only the fields relevant for the element's
/// type are populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDef {
    pub id: String,
    pub element_type: BpmnElementType,
    pub event_type: BpmnEventType,
    /// Enclosing container; `None` only for the process itself.
    pub flow_scope: Option<String>,
    pub incoming: Vec<String>,
    pub outgoing: Vec<String>,
    pub children: Vec<String>,
    pub boundary_events: Vec<String>,
    pub attached_to: Option<String>,
    pub interrupting: bool,
    pub timer: Option<TimerDefinition>,
    pub signal_name: Option<String>,
    pub message: Option<MessageDefinition>,
    /// Thrown code on error end events; caught code on error boundaries
    /// (`None` catches every error).
    pub error_code: Option<String>,
    pub job: Option<JobDefinition>,
    pub form_id: Option<String>,
    pub decision_id: Option<String>,
    pub result_variable: Option<String>,
    pub called_process_id: Option<String>,
    pub inputs: Vec<Mapping>,
    pub outputs: Vec<Mapping>,
    pub listeners: Vec<ExecutionListener>,
    pub task_listeners: Vec<TaskListener>,
    pub ad_hoc: Option<AdHocDefinition>,
    /// Set on activities that run once per collection item. The element
    /// then has a body instance wrapping its inner instances.
    pub multi_instance: Option<MultiInstanceDefinition>,
}

impl ElementDef {
    pub fn new(id: impl Into<String>, element_type: BpmnElementType) -> Self {
        Self {
            id: id.into(),
            element_type,
            event_type: BpmnEventType::Unspecified,
            flow_scope: None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            children: Vec::new(),
            boundary_events: Vec::new(),
            attached_to: None,
            interrupting: true,
            timer: None,
            signal_name: None,
            message: None,
            error_code: None,
            job: None,
            form_id: None,
            decision_id: None,
            result_variable: None,
            called_process_id: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            listeners: Vec::new(),
            task_listeners: Vec::new(),
            ad_hoc: None,
            multi_instance: None,
        }
    }

    pub fn listeners_for(&self, event: ListenerEvent) -> impl Iterator<Item = &ExecutionListener> {
        self.listeners.iter().filter(move |l| l.event == event)
    }

    pub fn task_listeners_for(&self, event: TaskListenerEvent) -> impl Iterator<Item = &TaskListener> {
        self.task_listeners.iter().filter(move |l| l.event == event)
    }

    /// Whether the element's message start events or catch events wait for a
    /// message.
    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDef {
    pub id: String,
    pub source: String,
    pub target: String,
    pub condition: Option<String>,
    pub is_default: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessModel {
    pub id: String,
    pub name: String,
    pub elements: BTreeMap<String, ElementDef>,
    pub flows: BTreeMap<String, FlowDef>,
    graph: DiGraph<String, String>,
    indices: HashMap<String, NodeIndex>,
}

impl ProcessModel {
    pub fn element(&self, id: &str) -> Option<&ElementDef> {
        self.elements.get(id)
    }

    pub fn flow(&self, id: &str) -> Option<&FlowDef> {
        self.flows.get(id)
    }

    pub fn root(&self) -> Option<&ElementDef> {
        self.elements.get(&self.id)
    }

    pub fn outgoing(&self, element: &ElementDef) -> Vec<&FlowDef> {
        element
            .outgoing
            .iter()
            .filter_map(|id| self.flows.get(id))
            .collect()
    }

    pub fn children_of<'a>(&'a self, scope: &'a ElementDef) -> impl Iterator<Item = &'a ElementDef> {
        scope.children.iter().filter_map(|id| self.elements.get(id))
    }

    /// The none start event of a process or sub-process.
    pub fn none_start_event(&self, scope_id: &str) -> Option<&ElementDef> {
        let scope = self.elements.get(scope_id)?;
        self.children_of(scope).find(|e| {
            e.element_type == BpmnElementType::StartEvent && e.event_type == BpmnEventType::None
        })
    }

    pub fn start_events(&self, event_type: BpmnEventType) -> Vec<&ElementDef> {
        match self.root() {
            Some(root) => self
                .children_of(root)
                .filter(|e| e.element_type == BpmnElementType::StartEvent && e.event_type == event_type)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether a token at `from` can eventually arrive at `to` inside the
    /// same scope. An element reaches itself.
    pub fn can_reach(&self, from: &str, to: &str) -> bool {
        match (self.indices.get(from), self.indices.get(to)) {
            (Some(a), Some(b)) => has_path_connecting(&self.graph, *a, *b, None),
            _ => false,
        }
    }

    /// Flow scopes of `element_id`, innermost first, ending with the process.
    pub fn ancestors(&self, element_id: &str) -> Vec<&ElementDef> {
        let mut out = Vec::new();
        let mut current = self.elements.get(element_id).and_then(|e| e.flow_scope.as_deref());
        while let Some(id) = current {
            match self.elements.get(id) {
                Some(scope) => {
                    out.push(scope);
                    current = scope.flow_scope.as_deref();
                }
                None => break,
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormModel {
    pub id: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum ParsedResource {
    Process(ProcessModel),
    Decision(DecisionModel),
    Form(FormModel),
}

impl ParsedResource {
    pub fn id(&self) -> &str {
        match self {
            ParsedResource::Process(p) => &p.id,
            ParsedResource::Decision(d) => &d.id,
            ParsedResource::Form(f) => &f.id,
        }
    }
}

/// Parses and validates one resource. Parsing is two-step: the `kind` tag
/// is read first, then the document is decoded into the matching shape.
pub fn parse_resource(
    resource_name: &str,
    text: &str,
    expressions: &dyn ExpressionLanguage,
) -> Result<ParsedResource, ModelError> {
    let parse_error = |message: String| ModelError::Parse {
        resource: resource_name.to_string(),
        message,
    };
    let document: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string()))?;
    let kind = document
        .get("kind")
        .and_then(serde_yaml::Value::as_str)
        .unwrap_or("process")
        .to_string();

    match kind.as_str() {
        "process" => {
            let dto: dto::ProcessDto =
                serde_yaml::from_value(document).map_err(|e| parse_error(e.to_string()))?;
            let errors = validate::validate_process(&dto, expressions);
            if !errors.is_empty() {
                return Err(ModelError::Invalid {
                    resource: resource_name.to_string(),
                    errors,
                });
            }
            Ok(ParsedResource::Process(transform::to_model(&dto)))
        }
        "decision" => {
            let dto: dto::DecisionDto =
                serde_yaml::from_value(document).map_err(|e| parse_error(e.to_string()))?;
            let errors = validate::validate_decision(&dto, expressions);
            if !errors.is_empty() {
                return Err(ModelError::Invalid {
                    resource: resource_name.to_string(),
                    errors,
                });
            }
            Ok(ParsedResource::Decision(DecisionModel::from_dto(dto)))
        }
        "form" => {
            let dto: dto::FormDto =
                serde_yaml::from_value(document).map_err(|e| parse_error(e.to_string()))?;
            Ok(ParsedResource::Form(FormModel {
                id: dto.id,
                schema: dto.schema,
            }))
        }
        other => Err(ModelError::UnknownKind {
            resource: resource_name.to_string(),
            kind: other.to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const ONE_TASK: &str = r#"
kind: process
id: order
nodes:
  - type: start_event
    id: start
  - type: service_task
    id: task
    job_type: payment
  - type: end_event
    id: end
flows:
  - from: start
    to: task
  - from: task
    to: end
"#;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ParsedResource, ModelError> {
        parse_resource("test.yaml", text, &SimpleExpressionLanguage)
    }

    #[test]
    fn flattens_a_process() {
        let ParsedResource::Process(model) = parse(fixtures::ONE_TASK).unwrap() else {
            panic!("expected a process");
        };
        assert_eq!(model.id, "order");
        let task = model.element("task").unwrap();
        assert_eq!(task.element_type, BpmnElementType::ServiceTask);
        assert_eq!(task.flow_scope.as_deref(), Some("order"));
        assert_eq!(task.incoming, vec!["start-task".to_string()]);
        assert_eq!(model.none_start_event("order").unwrap().id, "start");
        assert!(model.can_reach("start", "end"));
        assert!(!model.can_reach("end", "start"));
    }

    #[test]
    fn nested_scopes_know_their_ancestors() {
        let text = r#"
kind: process
id: nested
nodes:
  - type: start_event
    id: start
  - type: sub_process
    id: sub
    nodes:
      - type: start_event
        id: sub_start
      - type: user_task
        id: review
      - type: end_event
        id: sub_end
    flows:
      - from: sub_start
        to: review
      - from: review
        to: sub_end
  - type: end_event
    id: end
flows:
  - from: start
    to: sub
  - from: sub
    to: end
"#;
        let ParsedResource::Process(model) = parse(text).unwrap() else {
            panic!("expected a process");
        };
        let ancestors: Vec<&str> = model.ancestors("review").iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ancestors, vec!["sub", "nested"]);
        assert_eq!(model.none_start_event("sub").unwrap().id, "sub_start");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = parse("kind: script\nid: x\n").unwrap_err();
        assert!(matches!(err, ModelError::UnknownKind { .. }));
    }

    #[test]
    fn decisions_and_forms_parse() {
        let decision = r#"
kind: decision
id: discount
inputs: ["=tier"]
output: discount
rules:
  - when: ["gold"]
    then: 0.2
"#;
        assert_eq!(parse(decision).unwrap().id(), "discount");
        let form = "kind: form\nid: review-form\nschema:\n  fields: []\n";
        assert!(matches!(parse(form).unwrap(), ParsedResource::Form(_)));
    }
}
