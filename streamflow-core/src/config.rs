use crate::types::PartitionId;
use serde::{Deserialize, Serialize};

/// Engine settings shared by all partitions of a broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    pub partition_count: u16,
    /// Partition that owns deployments, identity and cluster variables and
    /// distributes them to the others.
    pub deployment_partition: PartitionId,
    /// Upper bound for the encoded size of all records produced by one command.
    pub max_batch_size_bytes: usize,
    /// Upper bound for the jobs returned by one job batch activation.
    pub max_job_batch_bytes: usize,
    pub multi_tenancy_enabled: bool,
    pub authorizations_enabled: bool,
    pub scheduler_interval_ms: u64,
    pub storage_retry_attempts: u32,
    pub storage_retry_backoff_ms: u64,
    pub request_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition_count: 1,
            deployment_partition: 1,
            max_batch_size_bytes: 4 * 1024 * 1024,
            max_job_batch_bytes: 4 * 1024 * 1024,
            multi_tenancy_enabled: false,
            authorizations_enabled: false,
            scheduler_interval_ms: 100,
            storage_retry_attempts: 5,
            storage_retry_backoff_ms: 50,
            request_queue_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> {
        1..=self.partition_count
    }
}
