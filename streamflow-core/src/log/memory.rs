use super::{LogError, PartitionLog};
use crate::record::codec;
use crate::record::Record;
use crate::types::{PartitionId, Position};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

/// In-memory partition log storing encoded records.
///
/// Every record goes through the codec on append and read, so the in-memory
/// log exercises the same byte format as a durable one.
pub struct MemoryLog {
    partition_id: PartitionId,
    entries: RwLock<Vec<Vec<u8>>>,
    failing_appends: AtomicU32,
}

impl MemoryLog {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            entries: RwLock::new(Vec::new()),
            failing_appends: AtomicU32::new(0),
        }
    }

    /// Makes the next `count` appends fail with a transient storage error.
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Decodes the whole log.
    pub async fn records(&self) -> Result<Vec<Record>, LogError> {
        self.read_batch(1, usize::MAX).await
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl PartitionLog for MemoryLog {
    fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    async fn append(&self, records: Vec<Record>) -> Result<Position, LogError> {
        let should_fail = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(LogError::Storage("injected append failure".to_string()));
        }

        let mut entries = self.entries.write().await;
        let first = entries.len() as Position + 1;
        let mut encoded = Vec::with_capacity(records.len());
        for (offset, mut record) in records.into_iter().enumerate() {
            let position = first + offset as Position;
            record.position = position;
            record.partition_id = self.partition_id;
            let bytes = codec::encode(&record)
                .map_err(|source| LogError::Codec { position, source })?;
            encoded.push(bytes);
        }
        entries.extend(encoded);
        Ok(first)
    }

    async fn read_batch(&self, from: Position, max: usize) -> Result<Vec<Record>, LogError> {
        let entries = self.entries.read().await;
        let start = (from.max(1) - 1) as usize;
        entries
            .iter()
            .enumerate()
            .skip(start)
            .take(max)
            .map(|(index, bytes)| {
                codec::decode(bytes).map_err(|source| LogError::Codec {
                    position: index as Position + 1,
                    source,
                })
            })
            .collect()
    }

    async fn last_position(&self) -> Result<Position, LogError> {
        Ok(self.entries.read().await.len() as Position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{JobIntent, JobRecord};

    #[tokio::test]
    async fn failed_append_leaves_no_trace() {
        let log = MemoryLog::new(2);
        log.fail_next_appends(1);
        let command = Record::command(JobIntent::Complete, JobRecord::default());
        assert!(matches!(
            log.append(vec![command.clone()]).await,
            Err(LogError::Storage(_))
        ));
        assert!(log.is_empty().await);

        let first = log.append(vec![command.clone(), command]).await.unwrap();
        assert_eq!(first, 1);
        let records = log.records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].position, 2);
        assert_eq!(records[1].partition_id, 2);
    }
}
