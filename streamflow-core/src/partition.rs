//! Partition runtime.
//!
//! Each partition is one tokio task owning a [`StreamProcessor`]. Requests
//! reach it through a bounded queue; a scheduler tick turns due timers, job
//! deadlines and job backoffs into commands. Commands for other partitions
//! leave through an outbox that the [`Cluster`] forwards in order.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::log::{MemoryLog, PartitionLog};
use crate::record::{Record, RecordValue, ValueType};
use crate::state::ProcessingState;
use crate::stream::{ProcessedCommand, StreamProcessor};
use crate::types::{decode_partition_id, subscription_partition, PartitionId, Position};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Answer to a client command: the response record, or `None` when the
/// command produced no records.
pub type CommandResponse = Result<Option<Record>, EngineError>;

pub enum PartitionRequest {
    Command {
        command: Record,
        respond_to: oneshot::Sender<CommandResponse>,
    },
    /// Command forwarded from another partition.
    Distributed(Record),
    /// Copy of the current state.
    Snapshot(oneshot::Sender<ProcessingState>),
}

type Outbox = mpsc::UnboundedSender<(PartitionId, Record)>;

pub struct Partition {
    processor: StreamProcessor,
    clock: Arc<dyn Clock>,
    requests: mpsc::Receiver<PartitionRequest>,
    outbox: Outbox,
    scheduler_interval: Duration,
}

impl Partition {
    pub async fn start(
        partition_id: PartitionId,
        config: EngineConfig,
        log: Arc<dyn PartitionLog>,
        clock: Arc<dyn Clock>,
        requests: mpsc::Receiver<PartitionRequest>,
        outbox: Outbox,
    ) -> Result<Self, EngineError> {
        let scheduler_interval = Duration::from_millis(config.scheduler_interval_ms.max(1));
        let processor = StreamProcessor::recover(Engine::new(partition_id, config), log).await?;
        Ok(Self {
            processor,
            clock,
            requests,
            outbox,
            scheduler_interval,
        })
    }

    pub fn partition_id(&self) -> PartitionId {
        self.processor.partition_id()
    }

    /// Runs until every request sender is dropped or a fatal error occurs.
    pub async fn run(mut self) -> Result<(), EngineError> {
        let partition_id = self.partition_id();
        let mut ticker = interval(self.scheduler_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(partition = partition_id, "partition started");

        // Commands appended before a restart but never processed.
        self.drain(None).await?;

        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else { break };
                    if let Err(err) = self.handle(request).await {
                        error!(partition = partition_id, error = %err, "partition failed");
                        return Err(err);
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.schedule_due().await {
                        error!(partition = partition_id, error = %err, "partition failed");
                        return Err(err);
                    }
                }
            }
        }
        info!(partition = partition_id, "partition stopped");
        Ok(())
    }

    async fn handle(&mut self, request: PartitionRequest) -> Result<(), EngineError> {
        match request {
            PartitionRequest::Command { command, respond_to } => {
                let now = self.clock.now();
                match self.processor.write_command(command, now).await {
                    Ok(position) => self.drain(Some((position, respond_to))).await,
                    Err(err) => {
                        let _ = respond_to.send(Err(EngineError::PartitionClosed(self.partition_id())));
                        Err(err)
                    }
                }
            }
            PartitionRequest::Distributed(command) => {
                let now = self.clock.now();
                self.processor.write_command(command, now).await?;
                self.drain(None).await
            }
            PartitionRequest::Snapshot(respond_to) => {
                let _ = respond_to.send(self.processor.state().clone());
                Ok(())
            }
        }
    }

    async fn schedule_due(&mut self) -> Result<(), EngineError> {
        let now = self.clock.now();
        let due = self.processor.engine().due_commands(now);
        if due.is_empty() {
            return Ok(());
        }
        debug!(partition = self.partition_id(), commands = due.len(), "scheduling due work");
        for command in due {
            self.processor.write_command(command, now).await?;
        }
        self.drain(None).await
    }

    /// Processes every pending command and answers the awaited one.
    async fn drain(&mut self, mut awaited: Option<(Position, oneshot::Sender<CommandResponse>)>) -> Result<(), EngineError> {
        loop {
            let processed = match self.processor.process_next().await {
                Ok(Some(processed)) => processed,
                Ok(None) => break,
                Err(err) => {
                    if let Some((_, respond_to)) = awaited.take() {
                        let _ = respond_to.send(Err(EngineError::PartitionClosed(self.partition_id())));
                    }
                    return Err(err);
                }
            };
            self.forward(&processed);
            if awaited.as_ref().is_some_and(|(position, _)| *position == processed.command.position) {
                if let Some((_, respond_to)) = awaited.take() {
                    let _ = respond_to.send(Ok(processed.response));
                }
            }
        }
        if let Some((_, respond_to)) = awaited {
            let _ = respond_to.send(Ok(None));
        }
        Ok(())
    }

    fn forward(&self, processed: &ProcessedCommand) {
        for (target, record) in &processed.distributions {
            if self.outbox.send((*target, record.clone())).is_err() {
                warn!(partition = self.partition_id(), to = *target, "outbox closed, dropping distribution");
            }
        }
    }
}

/// Value types managed on the deployment partition and distributed from there.
fn central_value_type(value_type: ValueType) -> bool {
    matches!(
        value_type,
        ValueType::Deployment
            | ValueType::ResourceDeletion
            | ValueType::ClusterVariable
            | ValueType::Signal
            | ValueType::Tenant
            | ValueType::User
            | ValueType::Group
            | ValueType::MappingRule
            | ValueType::Authorization
    )
}

/// Chooses the partition for a client command. Keyed commands go to the
/// partition encoded in the key; centrally managed resources go to the
/// deployment partition; messages go to the partition of their correlation
/// key; the rest are spread round-robin.
pub fn route(config: &EngineConfig, command: &Record, round_robin: usize) -> PartitionId {
    if central_value_type(command.value_type) {
        return config.deployment_partition;
    }
    if let RecordValue::Message(message) = &command.value {
        return subscription_partition(&message.correlation_key, config.partition_count);
    }
    if command.key > 0 {
        let partition_id = decode_partition_id(command.key);
        if (1..=config.partition_count).contains(&partition_id) {
            return partition_id;
        }
    }
    let count = config.partition_count.max(1) as usize;
    (round_robin % count) as PartitionId + 1
}

/// All partitions of one broker.
pub struct Cluster {
    config: EngineConfig,
    partitions: BTreeMap<PartitionId, mpsc::Sender<PartitionRequest>>,
    tasks: Vec<JoinHandle<Result<(), EngineError>>>,
    router: JoinHandle<()>,
    round_robin: AtomicUsize,
}

impl Cluster {
    /// Starts every partition over an in-memory log.
    pub async fn start(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        let logs = config
            .partition_ids()
            .map(|id| Arc::new(MemoryLog::new(id)) as Arc<dyn PartitionLog>)
            .collect();
        Self::start_with_logs(config, clock, logs).await
    }

    /// Starts one partition per log; the log's partition id names it.
    pub async fn start_with_logs(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        logs: Vec<Arc<dyn PartitionLog>>,
    ) -> Result<Self, EngineError> {
        let (outbox, mut outgoing) = mpsc::unbounded_channel::<(PartitionId, Record)>();
        let mut partitions = BTreeMap::new();
        let mut tasks = Vec::new();
        for log in logs {
            let partition_id = log.partition_id();
            let (sender, receiver) = mpsc::channel(config.request_queue_capacity.max(1));
            let partition = Partition::start(
                partition_id,
                config.clone(),
                log,
                clock.clone(),
                receiver,
                outbox.clone(),
            )
            .await?;
            partitions.insert(partition_id, sender);
            tasks.push(tokio::spawn(partition.run()));
        }
        drop(outbox);

        let targets = partitions.clone();
        let router = tokio::spawn(async move {
            while let Some((target, record)) = outgoing.recv().await {
                let Some(sender) = targets.get(&target) else {
                    warn!(partition = target, "distribution to unknown partition dropped");
                    continue;
                };
                if sender.send(PartitionRequest::Distributed(record)).await.is_err() {
                    warn!(partition = target, "partition closed, distribution dropped");
                }
            }
        });
        info!(partitions = partitions.len(), "cluster started");

        Ok(Self {
            config,
            partitions,
            tasks,
            router,
            round_robin: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn route(&self, command: &Record) -> PartitionId {
        let round_robin = self.round_robin.fetch_add(1, Ordering::Relaxed);
        route(&self.config, command, round_robin)
    }

    /// Sends a client command to its partition and waits for the answer.
    pub async fn send(&self, command: Record) -> CommandResponse {
        let partition_id = self.route(&command);
        self.send_to(partition_id, command).await
    }

    pub async fn send_to(&self, partition_id: PartitionId, command: Record) -> CommandResponse {
        let sender = self
            .partitions
            .get(&partition_id)
            .ok_or(EngineError::UnknownPartition(partition_id))?;
        let (respond_to, response) = oneshot::channel();
        sender
            .send(PartitionRequest::Command { command, respond_to })
            .await
            .map_err(|_| EngineError::PartitionClosed(partition_id))?;
        response.await.map_err(|_| EngineError::PartitionClosed(partition_id))?
    }

    pub async fn state(&self, partition_id: PartitionId) -> Result<ProcessingState, EngineError> {
        let sender = self
            .partitions
            .get(&partition_id)
            .ok_or(EngineError::UnknownPartition(partition_id))?;
        let (respond_to, state) = oneshot::channel();
        sender
            .send(PartitionRequest::Snapshot(respond_to))
            .await
            .map_err(|_| EngineError::PartitionClosed(partition_id))?;
        state.await.map_err(|_| EngineError::PartitionClosed(partition_id))
    }

    /// Closes the request queues and waits for every partition to stop.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        self.router.abort();
        let _ = self.router.await;
        drop(self.partitions);
        let mut first_error = None;
        for task in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join) => error!(error = %join, "partition task panicked"),
            }
        }
        info!("cluster stopped");
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ControlledClock;
    use crate::record::{ClusterVariableIntent, ClusterVariableRecord, JobIntent, JobRecord, RecordType};
    use crate::types::encode_key;

    fn config(partitions: u16) -> EngineConfig {
        EngineConfig {
            partition_count: partitions,
            scheduler_interval_ms: 10,
            ..Default::default()
        }
    }

    #[test]
    fn keyed_commands_go_to_their_partition() {
        let config = config(3);
        let complete = Record::command(JobIntent::Complete, JobRecord::default()).with_key(encode_key(2, 7));
        assert_eq!(route(&config, &complete, 0), 2);
        let variable = Record::command(ClusterVariableIntent::Create, ClusterVariableRecord::default());
        assert_eq!(route(&config, &variable, 5), 1);
        let unkeyed = Record::command(JobIntent::Complete, JobRecord::default());
        assert_eq!(route(&config, &unkeyed, 4), 2);
    }

    #[tokio::test]
    async fn cluster_variables_reach_every_partition() {
        let clock = Arc::new(ControlledClock::new(0));
        let cluster = Cluster::start(config(2), clock).await.unwrap();
        let response = cluster
            .send(Record::command(
                ClusterVariableIntent::Create,
                ClusterVariableRecord {
                    name: "region".to_string(),
                    value: serde_json::json!("eu"),
                    ..Default::default()
                },
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.record_type, RecordType::Event);

        let mut replicated = false;
        for _ in 0..100 {
            if cluster.state(2).await.unwrap().cluster_variables.len() == 1 {
                replicated = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(replicated);
        cluster.shutdown().await.unwrap();
    }
}
