//! Line-delimited JSON command interface.
//!
//! Every input line is one command:
//! `{"id": "...", "valueType": "JOB", "intent": "COMPLETE", "key": 2251799813685249, "value": {...}}`.
//! Every output line answers one of them, carrying the same `id` and
//! either the response `record` or an `error`. Answers are written in
//! completion order, not input order.
//!
//! A request without an `authorization` object acts as the anonymous
//! principal. The `INTERNAL` principal belongs to engine-issued commands
//! and is refused here.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::collections::BTreeMap;
use streamflow_core::auth::{AuthorizationContext, PermissionGrant, Principal};
use streamflow_core::record::{Intent, Record, RecordValue, ValueType};
use streamflow_core::types::{Key, PartitionId, NO_KEY};
use streamflow_core::Cluster;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub value_type: String,
    pub intent: String,
    #[serde(default = "no_key")]
    pub key: Key,
    /// Sends the command to this partition instead of routing it.
    #[serde(default)]
    pub partition_id: Option<PartitionId>,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub authorization: Option<GatewayAuthorization>,
}

/// Authentication data as a client supplies it. Unlike the engine's
/// context, a missing principal means anonymous.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayAuthorization {
    pub principal: Option<Principal>,
    pub authorized_tenant_ids: Vec<String>,
    pub claims: BTreeMap<String, String>,
    pub permissions: Vec<PermissionGrant>,
}

impl GatewayAuthorization {
    fn into_context(self) -> Result<AuthorizationContext> {
        let principal = self.principal.unwrap_or(Principal::Anonymous);
        if principal == Principal::Internal {
            bail!("principal INTERNAL is reserved for commands issued by the engine");
        }
        Ok(AuthorizationContext {
            principal,
            authorized_tenant_ids: self.authorized_tenant_ids,
            claims: self.claims,
            permissions: self.permissions,
        })
    }
}

fn no_key() -> Key {
    NO_KEY
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GatewayRequest {
    pub fn into_command(self) -> Result<Record> {
        let value_type =
            ValueType::from_name(&self.value_type).ok_or_else(|| anyhow!("unknown value type '{}'", self.value_type))?;
        let intent = Intent::from_name(value_type, &self.intent)
            .ok_or_else(|| anyhow!("unknown intent '{}' for value type {}", self.intent, self.value_type))?;
        let payload = if self.value.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.value
        };
        let value = RecordValue::from_json(value_type, payload)
            .with_context(|| format!("malformed {} value", self.value_type))?;
        let authorization = self.authorization.unwrap_or_default().into_context()?;
        Ok(Record::command(intent, value)
            .with_key(self.key)
            .with_authorization(authorization))
    }
}

/// Answers commands read from `input` until it is exhausted and every
/// pending command has been answered.
pub async fn serve<R, W>(cluster: Arc<Cluster>, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut pending: JoinSet<GatewayResponse> = JoinSet::new();
    let mut open = true;
    while open || !pending.is_empty() {
        tokio::select! {
            line = lines.next_line(), if open => match line.context("reading command")? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    let cluster = cluster.clone();
                    pending.spawn(async move { handle(&cluster, &line).await });
                }
                None => {
                    info!(pending = pending.len(), "input closed");
                    open = false;
                }
            },
            Some(done) = pending.join_next() => {
                let response = done.context("command task failed")?;
                write_line(&mut output, &response).await?;
            }
        }
    }
    output.flush().await?;
    Ok(())
}

async fn handle(cluster: &Cluster, line: &str) -> GatewayResponse {
    let request: GatewayRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "malformed request");
            return GatewayResponse {
                id: Uuid::now_v7().to_string(),
                record: None,
                error: Some(format!("malformed request: {err}")),
            };
        }
    };
    let id = request.id.clone().unwrap_or_else(|| Uuid::now_v7().to_string());
    let partition_id = request.partition_id;
    let outcome = match request.into_command() {
        Ok(command) => {
            debug!(%id, command = %command, "dispatch");
            let response = match partition_id {
                Some(partition_id) => cluster.send_to(partition_id, command).await,
                None => cluster.send(command).await,
            };
            response.map_err(anyhow::Error::from)
        }
        Err(err) => Err(err),
    };
    match outcome {
        Ok(record) => GatewayResponse {
            id,
            error: record.is_none().then(|| "command produced no response".to_string()),
            record,
        },
        Err(err) => {
            warn!(%id, error = %format!("{err:#}"), "command failed");
            GatewayResponse {
                id,
                record: None,
                error: Some(format!("{err:#}")),
            }
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, response: &GatewayResponse) -> Result<()> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    output.write_all(&line).await.context("writing response")?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamflow_core::{ControlledClock, EngineConfig};

    async fn answers(input: &str) -> Vec<serde_json::Value> {
        let cluster = Arc::new(
            Cluster::start(EngineConfig::default(), Arc::new(ControlledClock::new(0)))
                .await
                .unwrap(),
        );
        let mut output = Vec::new();
        serve(cluster.clone(), input.as_bytes(), &mut output).await.unwrap();
        let Ok(cluster) = Arc::try_unwrap(cluster) else {
            panic!("cluster still shared");
        };
        cluster.shutdown().await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn commands_are_answered_with_their_id() {
        let out = answers(
            r#"{"id":"a","valueType":"CLUSTER_VARIABLE","intent":"CREATE","value":{"name":"region","value":"eu"}}"#,
        )
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], "a");
        assert_eq!(out[0]["record"]["recordType"], "EVENT");
        assert_eq!(out[0]["record"]["value"]["name"], "region");
    }

    #[tokio::test]
    async fn bad_lines_get_an_error_and_do_not_stop_the_loop() {
        let input = [
            "not json",
            "",
            r#"{"id":"x","valueType":"NOPE","intent":"CREATE"}"#,
            r#"{"id":"y","valueType":"JOB","intent":"COMPLETE","key":42}"#,
        ]
        .join("\n");
        let out = answers(&input).await;
        assert_eq!(out.len(), 3);
        let by_id = |id: &str| out.iter().find(|answer| answer["id"] == id).cloned().unwrap();
        assert!(by_id("x")["error"].as_str().unwrap().contains("unknown value type"));
        assert_eq!(by_id("y")["record"]["recordType"], "REJECTION");
        assert_eq!(by_id("y")["record"]["rejectionType"], "NOT_FOUND");
    }

    #[test]
    fn requests_without_authorization_are_anonymous() {
        let request: GatewayRequest = serde_json::from_str(
            r#"{"valueType":"JOB","intent":"COMPLETE","key":1,"authorization":{"authorizedTenantIds":["foo"]}}"#,
        )
        .unwrap();
        let command = request.into_command().unwrap();
        assert_eq!(command.authorization.principal, Principal::Anonymous);
        assert_eq!(command.authorization.authorized_tenant_ids, vec!["foo".to_string()]);

        let request: GatewayRequest =
            serde_json::from_str(r#"{"valueType":"JOB","intent":"COMPLETE","key":1}"#).unwrap();
        assert_eq!(request.into_command().unwrap().authorization.principal, Principal::Anonymous);
    }

    #[tokio::test]
    async fn internal_principal_is_refused() {
        let out = answers(
            r#"{"id":"i","valueType":"JOB","intent":"COMPLETE","key":42,"authorization":{"principal":{"kind":"INTERNAL"}}}"#,
        )
        .await;
        assert_eq!(out.len(), 1);
        assert!(out[0]["record"].is_null());
        assert!(out[0]["error"].as_str().unwrap().contains("reserved"));
    }
}
