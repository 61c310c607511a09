//! In-memory event store: the reference [`EventStore`] implementation and
//! the test double used by the repository tests.
//!
//! Thread-safe behind an `Arc<RwLock<_>>`; clones share the same streams.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use nonempty::NonEmpty;

use crate::store::{
    AggregateIdentity, EventSourcedAggregate, EventStore, EventWithContext, Events, RevertOutcome,
    SaveEventsOutcome, SaveOptions, Snapshot,
};

/// In-memory event store with a configurable compaction threshold.
///
/// `events_limit` is the number of live (post-snapshot) events a stream may
/// hold before a save without an offered snapshot is refused with
/// [`SaveEventsOutcome::SnapshotRequired`].
#[derive(Clone)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
    events_limit: usize,
}

struct Inner {
    identities: HashMap<String, AggregateIdentity>,
    /// Live tails: events after each stream's snapshot.
    streams: HashMap<String, Vec<EventWithContext>>,
    snapshots: HashMap<String, Snapshot>,
    stubbed_outcome: Option<SaveEventsOutcome>,
    fail_next_save: bool,
}

/// Error type for [`InMemoryEventStore`].
#[derive(Debug, thiserror::Error)]
pub enum InMemoryStoreError {
    #[error("simulated store failure")]
    Simulated,
}

impl InMemoryEventStore {
    #[must_use]
    pub fn new(events_limit: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                identities: HashMap::new(),
                streams: HashMap::new(),
                snapshots: HashMap::new(),
                stubbed_outcome: None,
                fail_next_save: false,
            })),
            events_limit,
        }
    }

    /// Makes the next `save_events` call return the given outcome without
    /// touching any stream. Test hook.
    pub fn pretend_next_save_returns(&self, outcome: SaveEventsOutcome) {
        let mut inner = self.inner.write().expect("in-memory store lock poisoned");
        inner.stubbed_outcome = Some(outcome);
    }

    /// Makes the next `save_events` call fail with an opaque store error.
    /// Test hook.
    pub fn pretend_next_save_fails(&self) {
        let mut inner = self.inner.write().expect("in-memory store lock poisoned");
        inner.fail_next_save = true;
    }
}

impl EventStore for InMemoryEventStore {
    type Error = InMemoryStoreError;

    fn save_events(
        &self,
        identity: &AggregateIdentity,
        events: NonEmpty<EventWithContext>,
        options: SaveOptions,
    ) -> Result<SaveEventsOutcome, Self::Error> {
        let mut inner = self.inner.write().expect("in-memory store lock poisoned");
        if inner.fail_next_save {
            inner.fail_next_save = false;
            return Err(InMemoryStoreError::Simulated);
        }
        if let Some(outcome) = inner.stubbed_outcome.take() {
            return Ok(outcome);
        }

        let aggregate_id = identity.aggregate_id.clone();
        let current_version = inner.identities.get(&aggregate_id).map_or(-1, |i| i.version);
        if identity.version != current_version {
            tracing::debug!(
                %aggregate_id,
                expected = current_version,
                actual = identity.version,
                "version mismatch, rejecting append"
            );
            return Ok(SaveEventsOutcome::Collision {
                expected_version: current_version,
                actual_version: identity.version,
            });
        }

        if options.snapshot.is_none() {
            let live = inner.streams.get(&aggregate_id).map_or(0, Vec::len);
            if live >= self.events_limit {
                tracing::debug!(
                    %aggregate_id,
                    live_events = live,
                    limit = self.events_limit,
                    "compaction threshold reached, refusing append"
                );
                return Ok(SaveEventsOutcome::SnapshotRequired {
                    current_events: Events {
                        aggregate_id: aggregate_id.clone(),
                        final_version: current_version,
                        events: inner.streams.get(&aggregate_id).cloned().unwrap_or_default(),
                    },
                    current_snapshot: inner.snapshots.get(&aggregate_id).cloned(),
                });
            }
        }

        if let Some(snapshot) = &options.snapshot {
            inner
                .streams
                .entry(aggregate_id.clone())
                .or_default()
                .retain(|event| event.version > snapshot.version);
            inner.snapshots.insert(aggregate_id.clone(), snapshot.clone());
        }

        let mut version = current_version;
        let mut appended = Vec::with_capacity(events.len());
        for mut event in events {
            version += 1;
            event.version = version;
            appended.push(event);
        }
        inner
            .streams
            .entry(aggregate_id.clone())
            .or_default()
            .extend(appended.iter().cloned());

        let new_identity = AggregateIdentity {
            aggregate_id: aggregate_id.clone(),
            aggregate_type: identity.aggregate_type.clone(),
            version,
        };
        inner
            .identities
            .insert(aggregate_id.clone(), new_identity.clone());
        let snapshot = inner.snapshots.get(&aggregate_id).cloned();
        drop(inner);

        tracing::debug!(
            %aggregate_id,
            final_version = version,
            events_appended = appended.len(),
            "events committed to stream"
        );
        Ok(SaveEventsOutcome::Appended(EventSourcedAggregate {
            identity: new_identity,
            events: Events {
                aggregate_id,
                final_version: version,
                events: appended,
            },
            snapshot,
        }))
    }

    fn get_events(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<EventSourcedAggregate>, Self::Error> {
        let inner = self.inner.read().expect("in-memory store lock poisoned");
        let Some(identity) = inner.identities.get(aggregate_id) else {
            return Ok(None);
        };
        let events = inner.streams.get(aggregate_id).cloned().unwrap_or_default();
        tracing::trace!(%aggregate_id, live_events = events.len(), "loaded stream");
        Ok(Some(EventSourcedAggregate {
            identity: identity.clone(),
            events: Events {
                aggregate_id: aggregate_id.to_string(),
                final_version: identity.version,
                events,
            },
            snapshot: inner.snapshots.get(aggregate_id).cloned(),
        }))
    }

    fn get_events_batch(&self, ids: &[String]) -> Result<Vec<EventSourcedAggregate>, Self::Error> {
        let mut aggregates = Vec::new();
        for id in ids {
            if let Some(aggregate) = self.get_events(id)? {
                aggregates.push(aggregate);
            }
        }
        Ok(aggregates)
    }

    fn revert_to_version(
        &self,
        identity: &AggregateIdentity,
    ) -> Result<RevertOutcome, Self::Error> {
        let mut inner = self.inner.write().expect("in-memory store lock poisoned");
        let aggregate_id = identity.aggregate_id.clone();
        let target = identity.version;

        let Some(current) = inner.identities.get(&aggregate_id).cloned() else {
            return Ok(RevertOutcome::AggregateNotFound);
        };
        if current.version < target {
            return Ok(RevertOutcome::CannotRevertForward {
                available_version: current.version,
                requested_version: target,
            });
        }

        // Partial snapshot rollback is unsupported: a snapshot above the
        // target is discarded along with the reverted events.
        if inner
            .snapshots
            .get(&aggregate_id)
            .is_some_and(|snapshot| snapshot.version > target)
        {
            inner.snapshots.remove(&aggregate_id);
        }

        let stream = inner.streams.entry(aggregate_id.clone()).or_default();
        let removed: Vec<_> = stream
            .iter()
            .filter(|event| event.version > target)
            .cloned()
            .collect();
        stream.retain(|event| event.version <= target);
        inner.identities.insert(
            aggregate_id.clone(),
            AggregateIdentity {
                version: target,
                ..current
            },
        );
        drop(inner);

        tracing::debug!(
            %aggregate_id,
            target_version = target,
            events_removed = removed.len(),
            "stream reverted"
        );
        Ok(RevertOutcome::Reverted { removed })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::CreationContext;

    fn event(kind: &str) -> EventWithContext {
        EventWithContext::new(
            kind,
            CreationContext {
                author: "tester".to_string(),
                timestamp: Utc::now(),
            },
            b"{}".to_vec(),
        )
    }

    fn identity(id: &str, version: i64) -> AggregateIdentity {
        AggregateIdentity {
            aggregate_id: id.to_string(),
            aggregate_type: "order".to_string(),
            version,
        }
    }

    fn appended(outcome: SaveEventsOutcome) -> EventSourcedAggregate {
        match outcome {
            SaveEventsOutcome::Appended(aggregate) => aggregate,
            other => panic!("expected Appended, got {other:?}"),
        }
    }

    #[test]
    fn appends_assign_contiguous_versions() {
        let store = InMemoryEventStore::new(100);
        let saved = appended(
            store
                .save_events(
                    &identity("order-1", -1),
                    NonEmpty::from((event("created"), vec![event("shipped")])),
                    SaveOptions::default(),
                )
                .unwrap(),
        );

        assert_eq!(saved.events.final_version, 1);
        assert_eq!(saved.identity.version, 1);
        let versions: Vec<_> = saved.events.events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![0, 1]);
    }

    #[test]
    fn stale_baseline_is_a_collision() {
        let store = InMemoryEventStore::new(100);
        store
            .save_events(
                &identity("order-1", -1),
                NonEmpty::singleton(event("created")),
                SaveOptions::default(),
            )
            .unwrap();

        let outcome = store
            .save_events(
                &identity("order-1", -1),
                NonEmpty::singleton(event("shipped")),
                SaveOptions::default(),
            )
            .unwrap();
        assert_eq!(
            outcome,
            SaveEventsOutcome::Collision {
                expected_version: 0,
                actual_version: -1,
            }
        );

        // The stream is unchanged.
        let stream = store.get_events("order-1").unwrap().unwrap();
        assert_eq!(stream.events.final_version, 0);
        assert_eq!(stream.events.events.len(), 1);
    }

    #[test]
    fn threshold_breach_refuses_the_append() {
        let store = InMemoryEventStore::new(1);
        store
            .save_events(
                &identity("order-1", -1),
                NonEmpty::singleton(event("created")),
                SaveOptions::default(),
            )
            .unwrap();

        let outcome = store
            .save_events(
                &identity("order-1", 0),
                NonEmpty::singleton(event("shipped")),
                SaveOptions::default(),
            )
            .unwrap();
        let SaveEventsOutcome::SnapshotRequired {
            current_events,
            current_snapshot,
        } = outcome
        else {
            panic!("expected SnapshotRequired, got {outcome:?}");
        };
        assert_eq!(current_events.final_version, 0);
        assert_eq!(current_events.events.len(), 1);
        assert!(current_snapshot.is_none());

        // Nothing was appended.
        let stream = store.get_events("order-1").unwrap().unwrap();
        assert_eq!(stream.events.events.len(), 1);
    }

    #[test]
    fn offered_snapshot_prunes_the_live_stream() {
        let store = InMemoryEventStore::new(1);
        store
            .save_events(
                &identity("order-1", -1),
                NonEmpty::singleton(event("created")),
                SaveOptions::default(),
            )
            .unwrap();

        let snapshot = Snapshot {
            version: 0,
            data: b"state".to_vec(),
        };
        let saved = appended(
            store
                .save_events(
                    &identity("order-1", 0),
                    NonEmpty::singleton(event("shipped")),
                    SaveOptions::with_snapshot(snapshot.clone()),
                )
                .unwrap(),
        );
        assert_eq!(saved.snapshot, Some(snapshot.clone()));

        let stream = store.get_events("order-1").unwrap().unwrap();
        assert_eq!(stream.snapshot, Some(snapshot));
        assert_eq!(stream.events.final_version, 1);
        // Only the post-snapshot event remains live.
        let versions: Vec<_> = stream.events.events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1]);
    }

    #[test]
    fn revert_removes_later_events() {
        let store = InMemoryEventStore::new(100);
        store
            .save_events(
                &identity("order-1", -1),
                NonEmpty::from((event("created"), vec![event("shipped"), event("closed")])),
                SaveOptions::default(),
            )
            .unwrap();

        let outcome = store.revert_to_version(&identity("order-1", 0)).unwrap();
        let RevertOutcome::Reverted { removed } = outcome else {
            panic!("expected Reverted, got {outcome:?}");
        };
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].version, 1);
        assert_eq!(removed[1].version, 2);

        let stream = store.get_events("order-1").unwrap().unwrap();
        assert_eq!(stream.identity.version, 0);
        assert_eq!(stream.events.events.len(), 1);
    }

    #[test]
    fn revert_below_snapshot_discards_it() {
        let store = InMemoryEventStore::new(100);
        store
            .save_events(
                &identity("order-1", -1),
                NonEmpty::from((event("created"), vec![event("shipped")])),
                SaveOptions::default(),
            )
            .unwrap();
        store
            .save_events(
                &identity("order-1", 1),
                NonEmpty::singleton(event("closed")),
                SaveOptions::with_snapshot(Snapshot {
                    version: 1,
                    data: b"state".to_vec(),
                }),
            )
            .unwrap();

        store.revert_to_version(&identity("order-1", 0)).unwrap();

        let stream = store.get_events("order-1").unwrap().unwrap();
        assert!(stream.snapshot.is_none());
        assert_eq!(stream.identity.version, 0);
    }

    #[test]
    fn cannot_revert_forward() {
        let store = InMemoryEventStore::new(100);
        store
            .save_events(
                &identity("order-1", -1),
                NonEmpty::singleton(event("created")),
                SaveOptions::default(),
            )
            .unwrap();

        let outcome = store.revert_to_version(&identity("order-1", 5)).unwrap();
        assert_eq!(
            outcome,
            RevertOutcome::CannotRevertForward {
                available_version: 0,
                requested_version: 5,
            }
        );
    }

    #[test]
    fn revert_of_unknown_aggregate_reports_not_found() {
        let store = InMemoryEventStore::new(100);
        let outcome = store.revert_to_version(&identity("missing", 0)).unwrap();
        assert_eq!(outcome, RevertOutcome::AggregateNotFound);
    }

    #[test]
    fn unknown_aggregate_loads_as_none() {
        let store = InMemoryEventStore::new(100);
        assert!(store.get_events("missing").unwrap().is_none());
    }

    #[test]
    fn batch_load_skips_unknown_ids() {
        let store = InMemoryEventStore::new(100);
        store
            .save_events(
                &identity("order-1", -1),
                NonEmpty::singleton(event("created")),
                SaveOptions::default(),
            )
            .unwrap();

        let loaded = store
            .get_events_batch(&["order-1".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].identity.aggregate_id, "order-1");
    }

    #[test]
    fn stubbed_outcome_is_returned_once() {
        let store = InMemoryEventStore::new(100);
        store.pretend_next_save_returns(SaveEventsOutcome::Collision {
            expected_version: 3,
            actual_version: 1,
        });

        let outcome = store
            .save_events(
                &identity("order-1", -1),
                NonEmpty::singleton(event("created")),
                SaveOptions::default(),
            )
            .unwrap();
        assert_eq!(
            outcome,
            SaveEventsOutcome::Collision {
                expected_version: 3,
                actual_version: 1,
            }
        );
        // Nothing was persisted, and the stub is spent.
        assert!(store.get_events("order-1").unwrap().is_none());
        let outcome = store
            .save_events(
                &identity("order-1", -1),
                NonEmpty::singleton(event("created")),
                SaveOptions::default(),
            )
            .unwrap();
        assert!(matches!(outcome, SaveEventsOutcome::Appended(_)));
    }

    #[test]
    fn simulated_failure_is_an_error() {
        let store = InMemoryEventStore::new(100);
        store.pretend_next_save_fails();
        let result = store.save_events(
            &identity("order-1", -1),
            NonEmpty::singleton(event("created")),
            SaveOptions::default(),
        );
        assert!(matches!(result, Err(InMemoryStoreError::Simulated)));
    }
}
