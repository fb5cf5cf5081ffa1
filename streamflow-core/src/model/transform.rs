use super::dto::*;
use super::*;
use crate::record::{BpmnElementType, BpmnEventType};

/// Converts a validated process DTO into a flattened [`ProcessModel`].
pub(super) fn to_model(dto: &ProcessDto) -> ProcessModel {
    let mut elements = BTreeMap::new();
    let mut flows = BTreeMap::new();

    let mut root = ElementDef::new(dto.id.clone(), BpmnElementType::Process);
    root.children = dto.nodes.iter().map(|n| n.id().to_string()).collect();
    elements.insert(dto.id.clone(), root);
    add_scope(&dto.id, &dto.nodes, &dto.flows, &mut elements, &mut flows);

    // host -> boundary links
    let boundaries: Vec<(String, String)> = elements
        .values()
        .filter_map(|e| e.attached_to.clone().map(|host| (host, e.id.clone())))
        .collect();
    for (host, boundary) in boundaries {
        if let Some(host) = elements.get_mut(&host) {
            host.boundary_events.push(boundary);
        }
    }

    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();
    for id in elements.keys() {
        indices.insert(id.clone(), graph.add_node(id.clone()));
    }
    for flow in flows.values() {
        if let (Some(a), Some(b)) = (indices.get(&flow.source), indices.get(&flow.target)) {
            graph.add_edge(*a, *b, flow.id.clone());
        }
    }
    for element in elements.values() {
        if let Some(host) = &element.attached_to {
            if let (Some(a), Some(b)) = (indices.get(host), indices.get(&element.id)) {
                graph.add_edge(*a, *b, format!("{host}~{}", element.id));
            }
        }
    }

    ProcessModel {
        id: dto.id.clone(),
        name: dto.name.clone().unwrap_or_else(|| dto.id.clone()),
        elements,
        flows,
        graph,
        indices,
    }
}

fn add_scope(
    scope_id: &str,
    nodes: &[NodeDto],
    flow_dtos: &[FlowDto],
    elements: &mut BTreeMap<String, ElementDef>,
    flows: &mut BTreeMap<String, FlowDef>,
) {
    for node in nodes {
        let mut element = convert_node(node);
        element.flow_scope = Some(scope_id.to_string());
        match node {
            NodeDto::SubProcess {
                id,
                nodes,
                flows: inner,
                ..
            }
            | NodeDto::AdHocSubProcess {
                id,
                nodes,
                flows: inner,
                ..
            } => {
                element.children = nodes.iter().map(|n| n.id().to_string()).collect();
                elements.insert(id.clone(), element);
                add_scope(id, nodes, inner, elements, flows);
            }
            _ => {
                elements.insert(element.id.clone(), element);
            }
        }
    }

    for flow in flow_dtos {
        let id = flow.flow_id();
        if let Some(source) = elements.get_mut(&flow.from) {
            source.outgoing.push(id.clone());
        }
        if let Some(target) = elements.get_mut(&flow.to) {
            target.incoming.push(id.clone());
        }
        flows.insert(
            id.clone(),
            FlowDef {
                id,
                source: flow.from.clone(),
                target: flow.to.clone(),
                condition: flow.condition.clone(),
                is_default: flow.default,
            },
        );
    }
}

pub(super) fn timer_definition(timer: &TimerDto) -> Option<TimerDefinition> {
    let (kind, expression) = if let Some(d) = &timer.duration {
        (TimerKind::Duration, d)
    } else if let Some(c) = &timer.cycle {
        (TimerKind::Cycle, c)
    } else {
        (TimerKind::Date, timer.date.as_ref()?)
    };
    Some(TimerDefinition {
        kind,
        expression: expression.clone(),
    })
}

fn mappings(dtos: &[MappingDto]) -> Vec<Mapping> {
    dtos.iter()
        .map(|m| Mapping {
            source: m.source.clone(),
            target: m.target.clone(),
        })
        .collect()
}

fn apply_activity(element: &mut ElementDef, activity: &ActivityDto) {
    element.inputs = mappings(&activity.inputs);
    element.outputs = mappings(&activity.outputs);
    element.listeners = activity
        .execution_listeners
        .iter()
        .map(|l| ExecutionListener {
            event: match l.event_type {
                ListenerEventDto::Start => ListenerEvent::Start,
                ListenerEventDto::End => ListenerEvent::End,
            },
            job_type: l.job_type.clone(),
            retries: l.retries.clone(),
        })
        .collect();
    element.multi_instance = activity.multi_instance.as_ref().map(|mi| MultiInstanceDefinition {
        sequential: mi.sequential,
        input_collection: mi.input_collection.clone(),
        input_element: mi.input_element.clone(),
        output_collection: mi.output_collection.clone(),
        output_element: mi.output_element.clone(),
        completion_condition: mi.completion_condition.clone(),
    });
}

fn message_definition(message: &MessageDto) -> MessageDefinition {
    MessageDefinition {
        name: message.name.clone(),
        correlation_key: message.correlation_key.clone(),
    }
}

fn event_type_of(
    timer: &Option<TimerDto>,
    signal: &Option<String>,
    message: &Option<MessageDto>,
    error: &Option<ErrorDto>,
) -> BpmnEventType {
    if timer.is_some() {
        BpmnEventType::Timer
    } else if signal.is_some() {
        BpmnEventType::Signal
    } else if message.is_some() {
        BpmnEventType::Message
    } else if error.is_some() {
        BpmnEventType::Error
    } else {
        BpmnEventType::None
    }
}

fn convert_node(node: &NodeDto) -> ElementDef {
    match node {
        NodeDto::StartEvent {
            id,
            timer,
            signal,
            message,
            outputs,
        } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::StartEvent);
            e.event_type = event_type_of(timer, signal, message, &None);
            e.timer = timer.as_ref().and_then(timer_definition);
            e.signal_name = signal.clone();
            e.message = message.as_ref().map(message_definition);
            e.outputs = mappings(outputs);
            e
        }
        NodeDto::EndEvent {
            id,
            terminate,
            error,
        } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::EndEvent);
            e.event_type = if *terminate {
                BpmnEventType::Terminate
            } else if error.is_some() {
                BpmnEventType::Error
            } else {
                BpmnEventType::None
            };
            e.error_code = error.as_ref().and_then(|err| err.code.clone());
            e
        }
        NodeDto::ServiceTask {
            id,
            job_type,
            retries,
            headers,
            tags,
            activity,
        } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::ServiceTask);
            e.job = Some(JobDefinition {
                job_type: job_type.clone(),
                retries: retries.clone(),
                headers: headers.clone(),
                tags: tags.clone(),
            });
            apply_activity(&mut e, activity);
            e
        }
        NodeDto::UserTask {
            id,
            form_id,
            headers,
            task_listeners,
            activity,
        } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::UserTask);
            e.form_id = form_id.clone();
            e.job = Some(JobDefinition {
                job_type: crate::bpmn::USER_TASK_JOB_TYPE.to_string(),
                retries: "1".to_string(),
                headers: headers.clone(),
                tags: BTreeSet::new(),
            });
            e.task_listeners = task_listeners
                .iter()
                .map(|l| TaskListener {
                    event: match l.event_type {
                        TaskListenerEventDto::Creating => TaskListenerEvent::Creating,
                        TaskListenerEventDto::Completing => TaskListenerEvent::Completing,
                    },
                    job_type: l.job_type.clone(),
                    retries: l.retries.clone(),
                })
                .collect();
            apply_activity(&mut e, activity);
            e
        }
        NodeDto::ReceiveTask {
            id,
            message,
            activity,
        } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::ReceiveTask);
            e.event_type = BpmnEventType::Message;
            e.message = Some(message_definition(message));
            apply_activity(&mut e, activity);
            e
        }
        NodeDto::BusinessRuleTask {
            id,
            decision_id,
            result_variable,
            job_type,
            retries,
            activity,
        } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::BusinessRuleTask);
            e.decision_id = decision_id.clone();
            e.result_variable = result_variable.clone();
            e.job = job_type.as_ref().map(|job_type| JobDefinition {
                job_type: job_type.clone(),
                retries: retries.clone(),
                headers: BTreeMap::new(),
                tags: BTreeSet::new(),
            });
            apply_activity(&mut e, activity);
            e
        }
        NodeDto::ExclusiveGateway { id } => ElementDef::new(id.clone(), BpmnElementType::ExclusiveGateway),
        NodeDto::ParallelGateway { id } => ElementDef::new(id.clone(), BpmnElementType::ParallelGateway),
        NodeDto::InclusiveGateway { id } => ElementDef::new(id.clone(), BpmnElementType::InclusiveGateway),
        NodeDto::EventBasedGateway { id } => {
            ElementDef::new(id.clone(), BpmnElementType::EventBasedGateway)
        }
        NodeDto::IntermediateTimerCatch { id, timer, outputs } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::IntermediateCatchEvent);
            e.event_type = BpmnEventType::Timer;
            e.timer = timer_definition(timer);
            e.outputs = mappings(outputs);
            e
        }
        NodeDto::IntermediateSignalCatch { id, signal, outputs } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::IntermediateCatchEvent);
            e.event_type = BpmnEventType::Signal;
            e.signal_name = Some(signal.clone());
            e.outputs = mappings(outputs);
            e
        }
        NodeDto::IntermediateMessageCatch { id, message, outputs } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::IntermediateCatchEvent);
            e.event_type = BpmnEventType::Message;
            e.message = Some(message_definition(message));
            e.outputs = mappings(outputs);
            e
        }
        NodeDto::BoundaryEvent {
            id,
            attached_to,
            cancel_activity,
            timer,
            signal,
            message,
            error,
            outputs,
        } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::BoundaryEvent);
            e.event_type = event_type_of(timer, signal, message, error);
            e.message = message.as_ref().map(message_definition);
            e.attached_to = Some(attached_to.clone());
            // error boundaries always interrupt
            e.interrupting = *cancel_activity || error.is_some();
            e.timer = timer.as_ref().and_then(timer_definition);
            e.signal_name = signal.clone();
            e.error_code = error.as_ref().and_then(|err| err.code.clone());
            e.outputs = mappings(outputs);
            e
        }
        NodeDto::SubProcess { id, activity, .. } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::SubProcess);
            apply_activity(&mut e, activity);
            e
        }
        NodeDto::AdHocSubProcess {
            id,
            completion_condition,
            cancel_remaining_instances,
            active_elements,
            activity,
            ..
        } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::AdHocSubProcess);
            e.ad_hoc = Some(AdHocDefinition {
                completion_condition: completion_condition.clone(),
                cancel_remaining_instances: *cancel_remaining_instances,
                active_elements: active_elements.clone(),
            });
            apply_activity(&mut e, activity);
            e
        }
        NodeDto::CallActivity {
            id,
            process_id,
            activity,
        } => {
            let mut e = ElementDef::new(id.clone(), BpmnElementType::CallActivity);
            e.called_process_id = Some(process_id.clone());
            apply_activity(&mut e, activity);
            e
        }
    }
}
