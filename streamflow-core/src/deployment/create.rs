use super::{checksum, close_start_events, subscribe_start_events};
use crate::auth::{AuthorizationRequest, PermissionType, ResourceType};
use crate::engine::{CommandProcessor, ProcessingContext};
use crate::error::{ProcessingError, Rejection};
use crate::model::{parse_resource, ParsedResource};
use crate::record::*;
use crate::types::Key;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// `DEPLOYMENT:CREATE`. On the receiving partition every resource is parsed
/// and versioned; a resource identical to the latest version of its id is a
/// duplicate and keeps that version. Distributed copies replay the
/// resulting metadata.
pub(super) struct CreateDeploymentProcessor;

impl CommandProcessor for CreateDeploymentProcessor {
    fn process(&self, command: &Record, ctx: &mut ProcessingContext<'_>) -> Result<(), ProcessingError> {
        let deployment = ctx.value::<DeploymentRecord>()?;
        if command.distributed {
            return store_distributed(ctx, command.key, deployment);
        }

        let tenant_id = deployment.tenant_id.clone();
        if !ctx.is_visible(&tenant_id) {
            return Err(Rejection::unauthorized(format!(
                "Expected to deploy new resources for tenant '{tenant_id}', but user is not authorized for this tenant"
            ))
            .into());
        }
        ctx.authorize(&AuthorizationRequest::new(ResourceType::Resource, PermissionType::Create).tenant(tenant_id.clone()))?;
        if deployment.resources.is_empty() {
            return Err(Rejection::invalid_argument("Expected to deploy at least one resource, but none given").into());
        }

        let parsed = parse_all(ctx, &deployment.resources)?;
        let deployment_key = ctx.next_key();
        let mut created = DeploymentRecord {
            resources: deployment.resources.clone(),
            tenant_id: tenant_id.clone(),
            ..Default::default()
        };

        for (resource, parsed) in deployment.resources.iter().zip(parsed) {
            let checksum = checksum(&resource.resource);
            match parsed {
                ParsedResource::Process(model) => {
                    let metadata = deploy_process(ctx, &tenant_id, resource, &model.id, checksum)?;
                    created.processes_metadata.push(metadata);
                }
                ParsedResource::Decision(model) => {
                    let latest = ctx.state.deployments.latest_decision(&tenant_id, &model.id).cloned();
                    let metadata = match latest.filter(|latest| latest.checksum == checksum) {
                        Some(latest) => DecisionMetadata {
                            decision_id: latest.decision_id,
                            decision_name: latest.decision_name,
                            version: latest.version,
                            decision_key: latest.key,
                            resource_name: resource.resource_name.clone(),
                            checksum,
                            is_duplicate: true,
                            tenant_id: tenant_id.clone(),
                        },
                        None => {
                            let key = ctx.next_key();
                            let version = ctx.state.deployments.next_decision_version(&tenant_id, &model.id);
                            ctx.append_event(
                                key,
                                DecisionIntent::Created,
                                DecisionRecord {
                                    decision_id: model.id.clone(),
                                    decision_name: model.name.clone(),
                                    version,
                                    decision_key: key,
                                    resource_name: resource.resource_name.clone(),
                                    resource: resource.resource.clone(),
                                    checksum: checksum.clone(),
                                    tenant_id: tenant_id.clone(),
                                },
                            )?;
                            DecisionMetadata {
                                decision_id: model.id.clone(),
                                decision_name: model.name.clone(),
                                version,
                                decision_key: key,
                                resource_name: resource.resource_name.clone(),
                                checksum,
                                is_duplicate: false,
                                tenant_id: tenant_id.clone(),
                            }
                        }
                    };
                    created.decisions_metadata.push(metadata);
                }
                ParsedResource::Form(model) => {
                    let latest = ctx.state.deployments.latest_form(&tenant_id, &model.id).cloned();
                    let metadata = match latest.filter(|latest| latest.checksum == checksum) {
                        Some(latest) => FormMetadata {
                            form_id: latest.form_id,
                            version: latest.version,
                            form_key: latest.key,
                            resource_name: resource.resource_name.clone(),
                            checksum,
                            is_duplicate: true,
                            tenant_id: tenant_id.clone(),
                        },
                        None => {
                            let key = ctx.next_key();
                            let version = ctx.state.deployments.next_form_version(&tenant_id, &model.id);
                            ctx.append_event(
                                key,
                                FormIntent::Created,
                                FormRecord {
                                    form_id: model.id.clone(),
                                    version,
                                    form_key: key,
                                    resource_name: resource.resource_name.clone(),
                                    resource: resource.resource.clone(),
                                    checksum: checksum.clone(),
                                    tenant_id: tenant_id.clone(),
                                },
                            )?;
                            FormMetadata {
                                form_id: model.id.clone(),
                                version,
                                form_key: key,
                                resource_name: resource.resource_name.clone(),
                                checksum,
                                is_duplicate: false,
                                tenant_id: tenant_id.clone(),
                            }
                        }
                    };
                    created.forms_metadata.push(metadata);
                }
            }
        }

        info!(
            deployment = deployment_key,
            tenant = %tenant_id,
            processes = created.processes_metadata.len(),
            decisions = created.decisions_metadata.len(),
            forms = created.forms_metadata.len(),
            "deployment created"
        );
        ctx.append_event(deployment_key, DeploymentIntent::Created, created.clone())?;
        ctx.respond_with_last();
        for partition_id in ctx.other_partitions() {
            ctx.distribute(
                partition_id,
                Record::command(DeploymentIntent::Create, created.clone()).with_key(deployment_key),
            );
        }
        Ok(())
    }
}

/// Parses every resource; all problems are reported in one rejection.
fn parse_all(ctx: &ProcessingContext<'_>, resources: &[DeploymentResource]) -> Result<Vec<ParsedResource>, Rejection> {
    let mut parsed = Vec::with_capacity(resources.len());
    let mut errors = Vec::new();
    for resource in resources {
        match parse_resource(&resource.resource_name, &resource.resource, ctx.expressions()) {
            Ok(resource) => parsed.push(resource),
            Err(err) => errors.push(err.to_string()),
        }
    }
    if !errors.is_empty() {
        return Err(Rejection::invalid_argument(format!(
            "Expected to deploy new resources, but encountered the following errors:\n{}",
            errors.join("\n")
        )));
    }

    check_unique_ids(resources, &parsed)?;
    Ok(parsed)
}

fn check_unique_ids(resources: &[DeploymentResource], parsed: &[ParsedResource]) -> Result<(), Rejection> {
    let mut seen: BTreeMap<(&'static str, &str), &str> = BTreeMap::new();
    for (resource, parsed) in resources.iter().zip(parsed) {
        let kind = match parsed {
            ParsedResource::Process(_) => "process",
            ParsedResource::Decision(_) => "decision",
            ParsedResource::Form(_) => "form",
        };
        if let Some(first) = seen.insert((kind, parsed.id()), &resource.resource_name) {
            return Err(Rejection::invalid_argument(format!(
                "Expected the {kind} ids to be unique within a deployment but found a duplicated id '{}' in the resources '{first}' and '{}'.",
                parsed.id(),
                resource.resource_name
            )));
        }
    }
    Ok(())
}

/// A new process version replaces the start events of the previous latest
/// version.
fn deploy_process(
    ctx: &mut ProcessingContext<'_>,
    tenant_id: &str,
    resource: &DeploymentResource,
    process_id: &str,
    checksum: String,
) -> Result<ProcessMetadata, ProcessingError> {
    let latest = ctx.state.deployments.latest_process(tenant_id, process_id).cloned();
    if let Some(latest) = latest.as_ref().filter(|latest| latest.checksum == checksum) {
        debug!(process = %process_id, version = latest.version, "duplicate process resource");
        return Ok(ProcessMetadata {
            bpmn_process_id: latest.bpmn_process_id.clone(),
            version: latest.version,
            process_definition_key: latest.key,
            resource_name: resource.resource_name.clone(),
            checksum,
            is_duplicate: true,
            tenant_id: tenant_id.to_string(),
        });
    }

    let key = ctx.next_key();
    let version = ctx.state.deployments.next_process_version(tenant_id, process_id);
    store_process(ctx, key, version, tenant_id, resource, process_id, &checksum)?;
    if let Some(previous) = &latest {
        close_start_events(ctx, previous)?;
    }
    if let Some(process) = ctx.state.deployments.process(key).cloned() {
        subscribe_start_events(ctx, &process, true)?;
    }
    Ok(ProcessMetadata {
        bpmn_process_id: process_id.to_string(),
        version,
        process_definition_key: key,
        resource_name: resource.resource_name.clone(),
        checksum,
        is_duplicate: false,
        tenant_id: tenant_id.to_string(),
    })
}

fn store_process(
    ctx: &mut ProcessingContext<'_>,
    key: Key,
    version: i32,
    tenant_id: &str,
    resource: &DeploymentResource,
    process_id: &str,
    checksum: &str,
) -> Result<(), ProcessingError> {
    ctx.append_event(
        key,
        ProcessIntent::Created,
        ProcessRecord {
            bpmn_process_id: process_id.to_string(),
            version,
            process_definition_key: key,
            resource_name: resource.resource_name.clone(),
            resource: resource.resource.clone(),
            checksum: checksum.to_string(),
            tenant_id: tenant_id.to_string(),
        },
    )
}

/// Stores a deployment made on another partition under its original keys
/// and versions. Start timers live on the deploying partition only.
fn store_distributed(ctx: &mut ProcessingContext<'_>, deployment_key: Key, deployment: &DeploymentRecord) -> Result<(), ProcessingError> {
    if ctx.state.deployments.has_deployment(deployment_key) {
        debug!(deployment = deployment_key, "distributed deployment already stored");
        return Ok(());
    }
    let resource_of = |name: &str| {
        deployment
            .resources
            .iter()
            .find(|resource| resource.resource_name == name)
            .cloned()
            .ok_or_else(|| ProcessingError::unexpected(format!("distributed deployment lacks resource '{name}'")))
    };

    for metadata in deployment.processes_metadata.iter().filter(|m| !m.is_duplicate) {
        let resource = resource_of(&metadata.resource_name)?;
        let previous = ctx
            .state
            .deployments
            .latest_process(&metadata.tenant_id, &metadata.bpmn_process_id)
            .cloned();
        store_process(
            ctx,
            metadata.process_definition_key,
            metadata.version,
            &metadata.tenant_id,
            &resource,
            &metadata.bpmn_process_id,
            &metadata.checksum,
        )?;
        if let Some(previous) = &previous {
            close_start_events(ctx, previous)?;
        }
        if let Some(process) = ctx.state.deployments.process(metadata.process_definition_key).cloned() {
            subscribe_start_events(ctx, &process, false)?;
        }
    }
    for metadata in deployment.decisions_metadata.iter().filter(|m| !m.is_duplicate) {
        let resource = resource_of(&metadata.resource_name)?;
        ctx.append_event(
            metadata.decision_key,
            DecisionIntent::Created,
            DecisionRecord {
                decision_id: metadata.decision_id.clone(),
                decision_name: metadata.decision_name.clone(),
                version: metadata.version,
                decision_key: metadata.decision_key,
                resource_name: resource.resource_name,
                resource: resource.resource,
                checksum: metadata.checksum.clone(),
                tenant_id: metadata.tenant_id.clone(),
            },
        )?;
    }
    for metadata in deployment.forms_metadata.iter().filter(|m| !m.is_duplicate) {
        let resource = resource_of(&metadata.resource_name)?;
        ctx.append_event(
            metadata.form_key,
            FormIntent::Created,
            FormRecord {
                form_id: metadata.form_id.clone(),
                version: metadata.version,
                form_key: metadata.form_key,
                resource_name: resource.resource_name,
                resource: resource.resource,
                checksum: metadata.checksum.clone(),
                tenant_id: metadata.tenant_id.clone(),
            },
        )?;
    }
    ctx.append_event(deployment_key, DeploymentIntent::Created, deployment.clone())?;
    ctx.respond_with_last();
    Ok(())
}
