//! Monotonic id generation.
//!
//! [`SnowflakeIdGenerator`] packs milliseconds since a configurable epoch,
//! a node id, and a per-millisecond sequence into an `i64`. Node ids are
//! assigned explicitly by the operator; nothing here discovers them.

use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

/// Produces strictly increasing ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> i64;

    fn next_ids(&self, count: usize) -> Vec<i64> {
        (0..count).map(|_| self.next_id()).collect()
    }
}

const NODE_ID_BITS: u8 = 10;
const SEQUENCE_BITS: u8 = 12;
const MAX_NODE_ID: i64 = (1 << NODE_ID_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

/// Snowflake layout: 41 bits of milliseconds since the epoch, 10 bits of
/// node id, 12 bits of sequence.
#[derive(Debug)]
pub struct SnowflakeIdGenerator {
    node_id: i64,
    epoch_millis: i64,
    state: Mutex<SnowflakeState>,
}

#[derive(Debug)]
struct SnowflakeState {
    last_timestamp: i64,
    sequence: i64,
}

impl SnowflakeIdGenerator {
    /// Creates a generator for the given node, with the default epoch
    /// (2015-01-01T00:00:00Z). Node ids above 1023 are masked to 10 bits.
    #[must_use]
    pub fn new(node_id: u16) -> Self {
        let epoch = Utc
            .with_ymd_and_hms(2015, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::with_epoch(node_id, epoch)
    }

    #[must_use]
    pub fn with_epoch(node_id: u16, epoch: DateTime<Utc>) -> Self {
        Self {
            node_id: i64::from(node_id) & MAX_NODE_ID,
            epoch_millis: epoch.timestamp_millis(),
            state: Mutex::new(SnowflakeState {
                last_timestamp: -1,
                sequence: 0,
            }),
        }
    }

    fn current_millis(&self) -> i64 {
        Utc::now().timestamp_millis() - self.epoch_millis
    }
}

impl IdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> i64 {
        let mut state = self.state.lock().expect("id generator lock poisoned");

        // A clock that steps backwards is clamped to the last seen
        // timestamp so ids stay monotonic.
        let mut now = self.current_millis().max(state.last_timestamp);
        if now == state.last_timestamp {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond; spin to the next.
                while now <= state.last_timestamp {
                    std::hint::spin_loop();
                    now = self.current_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = now;

        (now << (NODE_ID_BITS + SEQUENCE_BITS)) | (self.node_id << SEQUENCE_BITS) | state.sequence
    }
}
