use serde::{Deserialize, Serialize};

/// Process-wide unique identifier of an entity (element instance, job, timer, ...).
pub type Key = i64;
/// Offset of a record in its partition log. The first record has position 1.
pub type Position = i64;
pub type PartitionId = u16;
/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Sentinel for "no key". Also used for fields that did not exist when old
/// records were written (e.g. the root process instance key).
pub const NO_KEY: Key = -1;

/// Tenant every record belongs to when multi-tenancy is disabled.
pub const DEFAULT_TENANT: &str = "<default>";

/// Number of low bits of a key reserved for the per-partition counter.
pub const KEY_COUNTER_BITS: u32 = 51;

pub fn encode_key(partition_id: PartitionId, counter: i64) -> Key {
    ((partition_id as i64) << KEY_COUNTER_BITS) + counter
}

pub fn decode_partition_id(key: Key) -> PartitionId {
    (key >> KEY_COUNTER_BITS) as PartitionId
}

/// Partition owning the messages and message subscriptions of a
/// correlation key. The hash is fixed so that every partition and every
/// broker version agrees on it.
pub fn subscription_partition(correlation_key: &str, partition_count: u16) -> PartitionId {
    let hash = correlation_key
        .as_bytes()
        .iter()
        .fold(0i32, |hash, byte| hash.wrapping_mul(31).wrapping_add(*byte as i8 as i32));
    let count = i32::from(partition_count.max(1));
    (hash % count).unsigned_abs() as PartitionId + 1
}

fn counter_of(key: Key) -> i64 {
    key & ((1i64 << KEY_COUNTER_BITS) - 1)
}

/// Monotonic key generator of one partition.
///
/// Part of the partition state: live processing advances it through
/// [`KeyGenerator::next_key`], replay restores it through
/// [`KeyGenerator::observe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyGenerator {
    partition_id: PartitionId,
    last_counter: i64,
}

impl KeyGenerator {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            last_counter: 0,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn next_key(&mut self) -> Key {
        self.last_counter += 1;
        encode_key(self.partition_id, self.last_counter)
    }

    /// Records that `key` has been issued. Keys of other partitions are ignored.
    pub fn observe(&mut self, key: Key) {
        if key <= 0 || decode_partition_id(key) != self.partition_id {
            return;
        }
        let counter = counter_of(key);
        if counter > self.last_counter {
            self.last_counter = counter;
        }
    }
}
