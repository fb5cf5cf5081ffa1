use super::dto::*;
use super::expression::ExpressionLanguage;
use super::transform::timer_definition;
use super::TimerKind;
use crate::timer::schedule::TimerSchedule;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

fn error(errors: &mut Vec<ValidationError>, rule: &str, message: String) {
    errors.push(ValidationError {
        rule: rule.to_string(),
        message,
    });
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Process,
    SubProcess,
    AdHoc,
}

/// Validates a process DTO. Returns all errors found.
pub(super) fn validate_process(
    dto: &ProcessDto,
    expressions: &dyn ExpressionLanguage,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // V1: element and flow ids are unique across all scopes
    let mut seen = HashSet::new();
    if !seen.insert(dto.id.clone()) {
        error(&mut errors, "V1", format!("Duplicate id: {}", dto.id));
    }
    collect_ids(&dto.nodes, &dto.flows, &mut seen, &mut errors);

    validate_scope(
        ScopeKind::Process,
        &dto.id,
        &dto.nodes,
        &dto.flows,
        expressions,
        &mut errors,
    );
    errors
}

fn collect_ids(
    nodes: &[NodeDto],
    flows: &[FlowDto],
    seen: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    for node in nodes {
        if !seen.insert(node.id().to_string()) {
            error(errors, "V1", format!("Duplicate id: {}", node.id()));
        }
        if let NodeDto::SubProcess { nodes, flows, .. } | NodeDto::AdHocSubProcess { nodes, flows, .. } =
            node
        {
            collect_ids(nodes, flows, seen, errors);
        }
    }
    for flow in flows {
        if !seen.insert(flow.flow_id()) {
            error(errors, "V1", format!("Duplicate id: {}", flow.flow_id()));
        }
    }
}

fn validate_scope(
    kind: ScopeKind,
    scope_id: &str,
    nodes: &[NodeDto],
    flows: &[FlowDto],
    expressions: &dyn ExpressionLanguage,
    errors: &mut Vec<ValidationError>,
) {
    let node_map: HashMap<&str, &NodeDto> = nodes.iter().map(|n| (n.id(), n)).collect();

    // V2: flows connect nodes of the same scope
    for flow in flows {
        for (end, id) in [("from", &flow.from), ("to", &flow.to)] {
            if !node_map.contains_key(id.as_str()) {
                error(
                    errors,
                    "V2",
                    format!(
                        "Flow {} references unknown '{}' node '{}' in scope '{}'",
                        flow.flow_id(),
                        end,
                        id,
                        scope_id
                    ),
                );
            }
        }
        if let Some(condition) = &flow.condition {
            check_expression(expressions, condition, errors);
        }
    }

    // V3: start events
    let starts: Vec<&NodeDto> = nodes
        .iter()
        .filter(|n| matches!(n, NodeDto::StartEvent { .. }))
        .collect();
    match kind {
        ScopeKind::Process if starts.is_empty() => error(
            errors,
            "V3",
            format!("Process {scope_id} has no start event"),
        ),
        ScopeKind::SubProcess => {
            let none_starts = starts
                .iter()
                .filter(|n| {
                    matches!(
                        n,
                        NodeDto::StartEvent {
                            timer: None,
                            signal: None,
                            message: None,
                            ..
                        }
                    )
                })
                .count();
            if none_starts != 1 || starts.len() != 1 {
                error(
                    errors,
                    "V3",
                    format!("Sub-process {scope_id} must have exactly one none start event"),
                );
            }
        }
        ScopeKind::AdHoc if !starts.is_empty() => error(
            errors,
            "V3",
            format!("Ad-hoc sub-process {scope_id} must not contain start events"),
        ),
        _ => {}
    }

    let mut outgoing: HashMap<&str, Vec<&FlowDto>> = HashMap::new();
    let mut incoming: HashMap<&str, usize> = HashMap::new();
    for flow in flows {
        outgoing.entry(flow.from.as_str()).or_default().push(flow);
        *incoming.entry(flow.to.as_str()).or_default() += 1;
    }

    for node in nodes {
        let id = node.id();
        match node {
            // V4: boundary events attach to an activity of the same scope
            NodeDto::BoundaryEvent {
                attached_to,
                timer,
                signal,
                message,
                error: err,
                ..
            } => {
                let host_ok = node_map.get(attached_to.as_str()).is_some_and(|host| {
                    matches!(
                        host,
                        NodeDto::ServiceTask { .. }
                            | NodeDto::UserTask { .. }
                            | NodeDto::ReceiveTask { .. }
                            | NodeDto::BusinessRuleTask { .. }
                            | NodeDto::SubProcess { .. }
                            | NodeDto::AdHocSubProcess { .. }
                            | NodeDto::CallActivity { .. }
                    )
                });
                if !host_ok {
                    error(
                        errors,
                        "V4",
                        format!("Boundary event {id} must be attached to an activity, got '{attached_to}'"),
                    );
                }
                let definitions = usize::from(timer.is_some())
                    + usize::from(signal.is_some())
                    + usize::from(message.is_some())
                    + usize::from(err.is_some());
                if definitions != 1 {
                    error(
                        errors,
                        "V4",
                        format!("Boundary event {id} must define exactly one of timer, signal, message or error"),
                    );
                }
                if let Some(timer) = timer {
                    check_timer(id, timer, expressions, errors);
                }
                if let Some(message) = message {
                    check_catch_message(id, message, expressions, errors);
                }
            }
            NodeDto::StartEvent {
                timer,
                signal,
                message,
                ..
            } => {
                let definitions =
                    usize::from(timer.is_some()) + usize::from(signal.is_some()) + usize::from(message.is_some());
                if definitions > 1 {
                    error(
                        errors,
                        "V3",
                        format!("Start event {id} must define at most one of timer, signal or message"),
                    );
                }
                if let Some(timer) = timer {
                    check_timer(id, timer, expressions, errors);
                }
                if let Some(message) = message {
                    if kind != ScopeKind::Process {
                        error(
                            errors,
                            "V11",
                            format!("Message start event {id} must be placed in the process scope"),
                        );
                    }
                    check_expression(expressions, &message.name, errors);
                }
                // V10: start events have no incoming flows
                if incoming.get(id).copied().unwrap_or(0) > 0 {
                    error(errors, "V10", format!("Start event {id} must not have incoming flows"));
                }
            }
            NodeDto::EndEvent { .. } => {
                if outgoing.contains_key(id) {
                    error(errors, "V10", format!("End event {id} must not have outgoing flows"));
                }
            }
            NodeDto::IntermediateTimerCatch { timer, .. } => check_timer(id, timer, expressions, errors),
            NodeDto::IntermediateMessageCatch { message, .. } | NodeDto::ReceiveTask { message, .. } => {
                check_catch_message(id, message, expressions, errors)
            }
            // V8: event-based gateways are followed by catch events
            NodeDto::EventBasedGateway { .. } => {
                let targets = outgoing.get(id).cloned().unwrap_or_default();
                if targets.len() < 2 {
                    error(
                        errors,
                        "V8",
                        format!("Event-based gateway {id} must have at least two outgoing flows"),
                    );
                }
                for flow in targets {
                    let is_catch = node_map.get(flow.to.as_str()).is_some_and(|n| {
                        matches!(
                            n,
                            NodeDto::IntermediateTimerCatch { .. }
                                | NodeDto::IntermediateSignalCatch { .. }
                                | NodeDto::IntermediateMessageCatch { .. }
                        )
                    });
                    if !is_catch {
                        error(
                            errors,
                            "V8",
                            format!("Event-based gateway {id} must only lead to intermediate catch events, got '{}'", flow.to),
                        );
                    }
                }
            }
            // V9: at most one default flow
            NodeDto::ExclusiveGateway { .. } | NodeDto::InclusiveGateway { .. } => {
                let defaults = outgoing
                    .get(id)
                    .map(|flows| flows.iter().filter(|f| f.default).count())
                    .unwrap_or(0);
                if defaults > 1 {
                    error(errors, "V9", format!("Gateway {id} has {defaults} default flows"));
                }
            }
            NodeDto::SubProcess {
                nodes: inner,
                flows: inner_flows,
                ..
            } => validate_scope(ScopeKind::SubProcess, id, inner, inner_flows, expressions, errors),
            NodeDto::AdHocSubProcess {
                nodes: inner,
                flows: inner_flows,
                completion_condition,
                active_elements,
                ..
            } => {
                for expression in completion_condition.iter().chain(active_elements.iter()) {
                    check_expression(expressions, expression, errors);
                }
                validate_scope(ScopeKind::AdHoc, id, inner, inner_flows, expressions, errors);
            }
            _ => {}
        }
        for mapping in mappings_of(node) {
            check_expression(expressions, &mapping.source, errors);
        }
        if let Some(activity) = activity_of(node) {
            if let Some(multi_instance) = &activity.multi_instance {
                check_multi_instance(id, multi_instance, expressions, errors);
            }
        }
        if let NodeDto::UserTask { task_listeners, .. } = node {
            for listener in task_listeners {
                if listener.job_type.trim().is_empty() {
                    error(errors, "V13", format!("Task listener of {id} must define a job type"));
                }
                check_expression(expressions, &listener.retries, errors);
            }
        }
    }

    // V5: every node is reachable from an entry point of its scope
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for node in nodes {
        index.insert(node.id(), graph.add_node(node.id()));
    }
    for flow in flows {
        if let (Some(a), Some(b)) = (index.get(flow.from.as_str()), index.get(flow.to.as_str())) {
            graph.add_edge(*a, *b, ());
        }
    }
    for node in nodes {
        if let NodeDto::BoundaryEvent { id, attached_to, .. } = node {
            if let (Some(a), Some(b)) = (index.get(attached_to.as_str()), index.get(id.as_str())) {
                graph.add_edge(*a, *b, ());
            }
        }
    }
    let mut reached = HashSet::new();
    for node in nodes {
        let is_entry = match kind {
            ScopeKind::AdHoc => {
                incoming.get(node.id()).copied().unwrap_or(0) == 0
                    && !matches!(node, NodeDto::BoundaryEvent { .. })
            }
            _ => matches!(node, NodeDto::StartEvent { .. }),
        };
        if !is_entry {
            continue;
        }
        if let Some(start) = index.get(node.id()) {
            let mut dfs = Dfs::new(&graph, *start);
            while let Some(nx) = dfs.next(&graph) {
                reached.insert(graph[nx]);
            }
        }
    }
    for node in nodes {
        if !reached.contains(node.id()) {
            error(
                errors,
                "V5",
                format!("Node {} is not reachable from a start event", node.id()),
            );
        }
    }
}

fn activity_of(node: &NodeDto) -> Option<&ActivityDto> {
    match node {
        NodeDto::ServiceTask { activity, .. }
        | NodeDto::UserTask { activity, .. }
        | NodeDto::ReceiveTask { activity, .. }
        | NodeDto::BusinessRuleTask { activity, .. }
        | NodeDto::SubProcess { activity, .. }
        | NodeDto::AdHocSubProcess { activity, .. }
        | NodeDto::CallActivity { activity, .. } => Some(activity),
        _ => None,
    }
}

fn mappings_of(node: &NodeDto) -> Vec<&MappingDto> {
    if let Some(activity) = activity_of(node) {
        return activity.inputs.iter().chain(activity.outputs.iter()).collect();
    }
    match node {
        NodeDto::StartEvent { outputs, .. }
        | NodeDto::IntermediateTimerCatch { outputs, .. }
        | NodeDto::IntermediateSignalCatch { outputs, .. }
        | NodeDto::IntermediateMessageCatch { outputs, .. }
        | NodeDto::BoundaryEvent { outputs, .. } => outputs.iter().collect(),
        _ => Vec::new(),
    }
}

// V11: catching messages need a correlation key
fn check_catch_message(
    id: &str,
    message: &MessageDto,
    expressions: &dyn ExpressionLanguage,
    errors: &mut Vec<ValidationError>,
) {
    check_expression(expressions, &message.name, errors);
    match &message.correlation_key {
        Some(key) if !key.trim().is_empty() => check_expression(expressions, key, errors),
        _ => error(
            errors,
            "V11",
            format!("Message catch event {id} must define a correlation key"),
        ),
    }
}

// V12: multi-instance loop characteristics
fn check_multi_instance(
    id: &str,
    multi_instance: &MultiInstanceDto,
    expressions: &dyn ExpressionLanguage,
    errors: &mut Vec<ValidationError>,
) {
    if !multi_instance.input_collection.starts_with('=') {
        error(
            errors,
            "V12",
            format!("Multi-instance activity {id} must use an expression as input collection"),
        );
    }
    check_expression(expressions, &multi_instance.input_collection, errors);
    if multi_instance.output_collection.is_some() != multi_instance.output_element.is_some() {
        error(
            errors,
            "V12",
            format!("Multi-instance activity {id} must define both output collection and output element, or neither"),
        );
    }
    for expression in multi_instance
        .output_element
        .iter()
        .chain(multi_instance.completion_condition.iter())
    {
        check_expression(expressions, expression, errors);
    }
}

// V6: expressions parse
fn check_expression(
    expressions: &dyn ExpressionLanguage,
    expression: &str,
    errors: &mut Vec<ValidationError>,
) {
    if let Err(err) = expressions.validate(expression) {
        error(errors, "V6", err.to_string());
    }
}

// V7: static timer definitions are well formed
fn check_timer(
    id: &str,
    timer: &TimerDto,
    expressions: &dyn ExpressionLanguage,
    errors: &mut Vec<ValidationError>,
) {
    let Some(definition) = timer_definition(timer) else {
        error(errors, "V7", format!("Timer of {id} defines neither duration, cycle nor date"));
        return;
    };
    if definition.expression.starts_with('=') {
        check_expression(expressions, &definition.expression, errors);
        return;
    }
    let parsed = match definition.kind {
        TimerKind::Duration => TimerSchedule::duration(&definition.expression),
        TimerKind::Cycle => TimerSchedule::cycle(&definition.expression),
        TimerKind::Date => TimerSchedule::date(&definition.expression),
    };
    if let Err(err) = parsed {
        error(errors, "V7", format!("Timer of {id}: {err}"));
    }
}

pub(super) fn validate_decision(
    dto: &DecisionDto,
    expressions: &dyn ExpressionLanguage,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for input in &dto.inputs {
        check_expression(expressions, input, &mut errors);
    }
    for (index, rule) in dto.rules.iter().enumerate() {
        if rule.when.len() != dto.inputs.len() {
            error(
                &mut errors,
                "D1",
                format!(
                    "Rule {} of decision {} has {} entries but the table has {} inputs",
                    index + 1,
                    dto.id,
                    rule.when.len(),
                    dto.inputs.len()
                ),
            );
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SimpleExpressionLanguage;

    fn validate(yaml: &str) -> Vec<ValidationError> {
        let dto: ProcessDto = serde_yaml::from_str(yaml).unwrap();
        validate_process(&dto, &SimpleExpressionLanguage)
    }

    fn rules(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.rule.as_str()).collect()
    }

    #[test]
    fn minimal_process_is_valid() {
        let dto: ProcessDto = serde_yaml::from_str(crate::model::fixtures::ONE_TASK).unwrap();
        assert!(validate_process(&dto, &SimpleExpressionLanguage).is_empty());
    }

    #[test]
    fn duplicate_ids_and_dangling_flows() {
        let errors = validate(
            r#"
id: p
nodes:
  - type: start_event
    id: a
  - type: end_event
    id: a
flows:
  - from: a
    to: missing
"#,
        );
        assert!(rules(&errors).contains(&"V1"));
        assert!(rules(&errors).contains(&"V2"));
    }

    #[test]
    fn boundary_must_attach_to_activity() {
        let errors = validate(
            r#"
id: p
nodes:
  - type: start_event
    id: start
  - type: boundary_event
    id: b
    attached_to: start
    timer:
      duration: PT1M
flows: []
"#,
        );
        assert!(rules(&errors).contains(&"V4"));
    }

    #[test]
    fn unreachable_nodes_are_reported() {
        let errors = validate(
            r#"
id: p
nodes:
  - type: start_event
    id: start
  - type: end_event
    id: end
  - type: service_task
    id: island
    job_type: x
flows:
  - from: start
    to: end
"#,
        );
        assert_eq!(rules(&errors), vec!["V5"]);
    }

    #[test]
    fn catching_messages_need_a_correlation_key() {
        let errors = validate(
            r#"
id: p
nodes:
  - type: start_event
    id: start
    message:
      name: order-placed
  - type: intermediate_message_catch
    id: wait
    message:
      name: paid
  - type: end_event
    id: end
flows:
  - from: start
    to: wait
  - from: wait
    to: end
"#,
        );
        assert_eq!(rules(&errors), vec!["V11"]);
    }

    #[test]
    fn multi_instance_output_is_all_or_nothing() {
        let errors = validate(
            r#"
id: p
nodes:
  - type: start_event
    id: start
  - type: service_task
    id: task
    job_type: x
    multi_instance:
      input_collection: =items
      output_collection: results
  - type: end_event
    id: end
flows:
  - from: start
    to: task
  - from: task
    to: end
"#,
        );
        assert_eq!(rules(&errors), vec!["V12"]);
    }

    #[test]
    fn bad_timer_and_expression() {
        let errors = validate(
            r#"
id: p
nodes:
  - type: start_event
    id: start
    timer:
      duration: ten minutes
  - type: exclusive_gateway
    id: gw
  - type: end_event
    id: end
flows:
  - from: start
    to: gw
  - from: gw
    to: end
    condition: "=(x > 1"
"#,
        );
        assert!(rules(&errors).contains(&"V7"));
        assert!(rules(&errors).contains(&"V6"));
    }
}
