//! Event persistence abstraction: the stored data model and the
//! [`EventStore`] trait.
//!
//! Stores keep one versioned stream per aggregate. Versions are zero-based
//! stream positions; an empty stream is at version `-1`. Appends are
//! guarded by an optimistic version check, and a configurable threshold of
//! live events triggers the two-phase compaction handshake (see
//! [`SaveEventsOutcome::SnapshotRequired`]).

pub mod inmemory;

use chrono::{DateTime, Utc};
pub use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};

/// Identifies one aggregate stream and a version within it.
///
/// On save, `version` is the caller's baseline, the version the stream was
/// at when the aggregate was hydrated. On revert, it is the target version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateIdentity {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: i64,
}

/// Who caused an event, and when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationContext {
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// One stored event: kind tag, stream version, creation context, and the
/// codec-produced payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventWithContext {
    pub kind: String,
    /// Zero-based position in the stream. Assigned by the store on append;
    /// callers submit events with a placeholder.
    pub version: i64,
    pub context: CreationContext,
    pub data: Vec<u8>,
}

impl EventWithContext {
    /// A not-yet-persisted event. The store assigns the real version.
    #[must_use]
    pub fn new(kind: impl Into<String>, context: CreationContext, data: Vec<u8>) -> Self {
        Self {
            kind: kind.into(),
            version: 0,
            context,
            data,
        }
    }
}

/// A slice of one aggregate's stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Events {
    pub aggregate_id: String,
    /// Version of the last event in the stream, or the snapshot version when
    /// no events follow the snapshot.
    pub final_version: i64,
    pub events: Vec<EventWithContext>,
}

/// A compaction point: the aggregate's state at `version`, encoded by a
/// [`SnapshotMapper`](crate::aggregate::SnapshotMapper).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub version: i64,
    pub data: Vec<u8>,
}

/// Everything needed to rebuild one aggregate: its identity at the current
/// version, the live events after the snapshot, and the snapshot if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSourcedAggregate {
    pub identity: AggregateIdentity,
    pub events: Events,
    pub snapshot: Option<Snapshot>,
}

/// Per-save options. A snapshot offered here becomes the stream's new
/// compaction point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveOptions {
    pub snapshot: Option<Snapshot>,
}

impl SaveOptions {
    #[must_use]
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
        }
    }
}

/// Non-error outcomes of [`EventStore::save_events`].
///
/// Collisions and threshold breaches are expected protocol outcomes, not
/// store failures; only opaque transaction or communication problems use the
/// `Err` channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveEventsOutcome {
    /// The append was committed. Carries the submitted events with their
    /// store-assigned versions and the stream's persisted snapshot.
    Appended(EventSourcedAggregate),
    /// The caller's baseline is stale: the stream is at `expected_version`
    /// but the save was based on `actual_version`.
    Collision {
        expected_version: i64,
        actual_version: i64,
    },
    /// The live stream has reached the compaction threshold. Nothing was
    /// appended; the caller must rebuild state from the returned tail and
    /// snapshot, offer a fresh snapshot via [`SaveOptions`], and retry once.
    SnapshotRequired {
        current_events: Events,
        current_snapshot: Option<Snapshot>,
    },
}

/// Non-error outcomes of [`EventStore::revert_to_version`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RevertOutcome {
    /// Events above the target version were deleted, newest last.
    Reverted { removed: Vec<EventWithContext> },
    AggregateNotFound,
    /// The target version lies above the stream's current version.
    CannotRevertForward {
        available_version: i64,
        requested_version: i64,
    },
}

/// A versioned event store.
///
/// All operations are synchronous; implementations provide their own
/// locking. `save_events` must be atomic: on any non-`Appended` outcome the
/// stream is unchanged.
pub trait EventStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Appends a batch of events if `identity.version` matches the stream's
    /// current version, assigning contiguous versions from `current + 1`.
    fn save_events(
        &self,
        identity: &AggregateIdentity,
        events: NonEmpty<EventWithContext>,
        options: SaveOptions,
    ) -> Result<SaveEventsOutcome, Self::Error>;

    /// Loads one aggregate's identity, live events, and snapshot, or `None`
    /// for an unknown id.
    fn get_events(&self, aggregate_id: &str)
    -> Result<Option<EventSourcedAggregate>, Self::Error>;

    /// Loads a batch of aggregates. Unknown ids are skipped, not errors.
    fn get_events_batch(&self, ids: &[String]) -> Result<Vec<EventSourcedAggregate>, Self::Error>;

    /// Rewinds a stream to `identity.version`, deleting later events. A
    /// snapshot above the target version is discarded entirely; partial
    /// snapshot rollback is not supported.
    fn revert_to_version(&self, identity: &AggregateIdentity)
    -> Result<RevertOutcome, Self::Error>;
}
