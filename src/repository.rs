//! Aggregate persistence: the save / hydrate protocol over an
//! [`EventStore`], a [`Codec`], and an [`EventPublisher`].
//!
//! `save` is commit-then-publish: events are appended under an optimistic
//! version check, published on success, and the append is reverted if
//! publishing fails. When the store refuses an append because the stream has
//! reached its compaction threshold, the repository rebuilds the current
//! state, offers a snapshot of it, and retries exactly once.

use std::collections::HashMap;

use nonempty::NonEmpty;
use uuid::Uuid;

use crate::{
    aggregate::{AggregateRoot, SnapshotMapper},
    codec::Codec,
    event::{EncodedEvent, EventSet},
    identity::Identity,
    publisher::{EventPublisher, PublishError},
    store::{
        AggregateIdentity, CreationContext, EventSourcedAggregate, EventStore, EventWithContext,
        RevertOutcome, SaveEventsOutcome, SaveOptions, Snapshot,
    },
};

/// Saves and hydrates event-sourced aggregates.
#[derive(Clone, Debug)]
pub struct AggregateRepository<S, C, P> {
    store: S,
    codec: C,
    publisher: P,
}

/// Error committing an aggregate's uncommitted events.
#[derive(Debug, thiserror::Error)]
pub enum CommitError<StoreError, CodecError>
where
    StoreError: std::error::Error + Send + Sync + 'static,
    CodecError: std::error::Error + Send + Sync + 'static,
{
    /// The stream moved since this aggregate was hydrated.
    #[error(
        "event collision on aggregate `{aggregate_id}`: stream is at version {current_version}, save was based on version {baseline_version}"
    )]
    Collision {
        aggregate_id: String,
        current_version: i64,
        baseline_version: i64,
    },
    /// The append succeeded but publishing failed; the append was reverted.
    #[error("failed to publish committed events for aggregate `{aggregate_id}`")]
    Publish {
        aggregate_id: String,
        #[source]
        source: PublishError,
    },
    #[error("codec error: {0}")]
    Codec(#[source] CodecError),
    /// The store demanded a snapshot again on the retry that offered one.
    #[error("aggregate `{aggregate_id}`: store demanded a snapshot immediately after compaction")]
    CompactionProtocol { aggregate_id: String },
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

/// Error rebuilding an aggregate from its stream.
#[derive(Debug, thiserror::Error)]
pub enum HydrationError<StoreError, CodecError>
where
    StoreError: std::error::Error + Send + Sync + 'static,
    CodecError: std::error::Error + Send + Sync + 'static,
{
    #[error("aggregate `{aggregate_id}` not found")]
    NotFound { aggregate_id: String },
    #[error("failed to decode history of aggregate `{aggregate_id}`: {source}")]
    Codec {
        aggregate_id: String,
        #[source]
        source: CodecError,
    },
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl<S, C, P> AggregateRepository<S, C, P>
where
    S: EventStore,
    C: Codec,
    P: EventPublisher,
{
    pub fn new(store: S, codec: C, publisher: P) -> Self {
        Self {
            store,
            codec,
            publisher,
        }
    }

    /// Commits the aggregate's uncommitted events and publishes them.
    ///
    /// Aggregates without an id are assigned a fresh one. An empty
    /// uncommitted buffer is a no-op. On success the buffer is cleared; on
    /// any error the aggregate keeps its uncommitted events so the caller
    /// can rehydrate and retry.
    #[tracing::instrument(skip_all, fields(aggregate_kind = A::KIND))]
    pub fn save<A: AggregateRoot>(
        &self,
        aggregate: &mut A,
        identity: &Identity,
    ) -> Result<(), CommitError<S::Error, C::Error>> {
        if aggregate.id().is_empty() {
            aggregate.changes_mut().set_id(Uuid::new_v4().to_string());
        }
        if aggregate.uncommitted_events().is_empty() {
            return Ok(());
        }

        let aggregate_id = aggregate.id().to_string();
        let baseline = aggregate.expected_version();
        let context = CreationContext {
            author: identity.id.clone(),
            timestamp: identity.time,
        };
        let mut encoded = Vec::with_capacity(aggregate.uncommitted_events().len());
        for event in aggregate.uncommitted_events() {
            let EncodedEvent { kind, data } =
                event.encode(&self.codec).map_err(CommitError::Codec)?;
            encoded.push(EventWithContext::new(kind, context.clone(), data));
        }
        let Some(batch) = NonEmpty::from_vec(encoded) else {
            return Ok(());
        };

        let request = AggregateIdentity {
            aggregate_id: aggregate_id.clone(),
            aggregate_type: A::KIND.to_string(),
            version: baseline,
        };
        let outcome = self
            .store
            .save_events(&request, batch.clone(), SaveOptions::default())
            .map_err(CommitError::Store)?;
        match outcome {
            SaveEventsOutcome::Appended(committed) => {
                self.finish_commit(aggregate, &committed, baseline)
            }
            SaveEventsOutcome::Collision {
                expected_version,
                actual_version,
            } => Err(CommitError::Collision {
                aggregate_id,
                current_version: expected_version,
                baseline_version: actual_version,
            }),
            SaveEventsOutcome::SnapshotRequired {
                current_events,
                current_snapshot,
            } => {
                tracing::debug!(
                    %aggregate_id,
                    stream_version = current_events.final_version,
                    "compaction demanded, offering a snapshot and retrying"
                );
                let current: A = self
                    .rebuild(
                        &aggregate_id,
                        current_events.final_version,
                        &current_events.events,
                        current_snapshot.as_ref(),
                    )
                    .map_err(CommitError::Codec)?;
                let snapshot = A::snapshot_mapper()
                    .to_snapshot(&current, &self.codec)
                    .map_err(CommitError::Codec)?;
                let retry = self
                    .store
                    .save_events(&request, batch, SaveOptions::with_snapshot(snapshot))
                    .map_err(CommitError::Store)?;
                match retry {
                    SaveEventsOutcome::Appended(committed) => {
                        self.finish_commit(aggregate, &committed, baseline)
                    }
                    SaveEventsOutcome::Collision {
                        expected_version,
                        actual_version,
                    } => Err(CommitError::Collision {
                        aggregate_id,
                        current_version: expected_version,
                        baseline_version: actual_version,
                    }),
                    SaveEventsOutcome::SnapshotRequired { .. } => {
                        Err(CommitError::CompactionProtocol { aggregate_id })
                    }
                }
            }
        }
    }

    /// Rebuilds one aggregate from its stream.
    #[tracing::instrument(skip(self), fields(aggregate_kind = A::KIND))]
    pub fn get_by_id<A: AggregateRoot>(
        &self,
        aggregate_id: &str,
    ) -> Result<A, HydrationError<S::Error, C::Error>> {
        let record = self
            .store
            .get_events(aggregate_id)
            .map_err(HydrationError::Store)?
            .ok_or_else(|| HydrationError::NotFound {
                aggregate_id: aggregate_id.to_string(),
            })?;
        self.hydrate(record)
    }

    /// Rebuilds a batch of aggregates, keyed by id. Unknown ids are absent
    /// from the result; an empty request never touches the store.
    pub fn get_by_ids<A: AggregateRoot>(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, A>, HydrationError<S::Error, C::Error>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let records = self
            .store
            .get_events_batch(ids)
            .map_err(HydrationError::Store)?;
        let mut aggregates = HashMap::with_capacity(records.len());
        for record in records {
            let id = record.identity.aggregate_id.clone();
            aggregates.insert(id, self.hydrate(record)?);
        }
        Ok(aggregates)
    }

    fn hydrate<A: AggregateRoot>(
        &self,
        record: EventSourcedAggregate,
    ) -> Result<A, HydrationError<S::Error, C::Error>> {
        let aggregate_id = record.identity.aggregate_id.clone();
        self.rebuild(
            &aggregate_id,
            record.identity.version,
            &record.events.events,
            record.snapshot.as_ref(),
        )
        .map_err(|source| HydrationError::Codec {
            aggregate_id,
            source,
        })
    }

    /// Restores state from the snapshot (if any) and replays the live tail.
    /// Events of kinds the codec does not support, or outside the
    /// aggregate's event set, are skipped.
    fn rebuild<A: AggregateRoot>(
        &self,
        aggregate_id: &str,
        baseline: i64,
        events: &[EventWithContext],
        snapshot: Option<&Snapshot>,
    ) -> Result<A, C::Error> {
        let mut aggregate = match snapshot {
            Some(snapshot) => A::snapshot_mapper().from_snapshot(snapshot, &self.codec)?,
            None => A::default(),
        };
        aggregate.changes_mut().set_id(aggregate_id);

        let mut history = Vec::with_capacity(events.len());
        for stored in events {
            if !self.codec.supports_kind(&stored.kind) {
                tracing::trace!(kind = %stored.kind, "codec does not support kind, skipping");
                continue;
            }
            match A::Event::decode(&stored.kind, &stored.data, &self.codec)? {
                Some(event) => history.push(event),
                None => {
                    tracing::trace!(kind = %stored.kind, "event outside this aggregate's set, skipping");
                }
            }
        }
        aggregate.build_from_history(history, baseline);
        Ok(aggregate)
    }

    fn finish_commit<A: AggregateRoot>(
        &self,
        aggregate: &mut A,
        committed: &EventSourcedAggregate,
        baseline: i64,
    ) -> Result<(), CommitError<S::Error, C::Error>> {
        if let Err(source) = self.publisher.publish(&committed.events.events) {
            let aggregate_id = committed.identity.aggregate_id.clone();
            tracing::debug!(%aggregate_id, "publish failed, reverting the append");
            let revert = AggregateIdentity {
                aggregate_id: aggregate_id.clone(),
                aggregate_type: committed.identity.aggregate_type.clone(),
                version: baseline,
            };
            match self.store.revert_to_version(&revert) {
                Ok(RevertOutcome::Reverted { .. }) => {}
                Ok(outcome) => {
                    tracing::error!(%aggregate_id, ?outcome, "compensating revert was refused");
                }
                Err(error) => {
                    tracing::error!(%aggregate_id, %error, "compensating revert failed");
                }
            }
            return Err(CommitError::Publish {
                aggregate_id,
                source,
            });
        }
        aggregate.commit_events();
        tracing::debug!(
            aggregate_id = %committed.identity.aggregate_id,
            version = committed.identity.version,
            events = committed.events.events.len(),
            "events committed and published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        aggregate::ChangeLog,
        codec::JsonCodec,
        event::{DomainEvent, encode_event},
        publisher::InMemoryEventPublisher,
        store::inmemory::InMemoryEventStore,
    };
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Noted {
        text: String,
    }

    impl DomainEvent for Noted {
        const KIND: &'static str = "noted";
    }

    #[derive(Debug, Clone, PartialEq)]
    enum NoteEvent {
        Noted(Noted),
    }

    impl EventSet for NoteEvent {
        const KINDS: &'static [&'static str] = &[Noted::KIND];

        fn encode<C: Codec>(&self, codec: &C) -> Result<EncodedEvent, C::Error> {
            match self {
                Self::Noted(event) => encode_event(event, codec),
            }
        }

        fn decode<C: Codec>(kind: &str, data: &[u8], codec: &C) -> Result<Option<Self>, C::Error> {
            match kind {
                Noted::KIND => Ok(Some(Self::Noted(codec.parse(data, kind)?))),
                _ => Ok(None),
            }
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Note {
        changes: ChangeLog<NoteEvent>,
        text: String,
    }

    impl AggregateRoot for Note {
        const KIND: &'static str = "note";
        type Event = NoteEvent;

        fn changes(&self) -> &ChangeLog<Self::Event> {
            &self.changes
        }

        fn changes_mut(&mut self) -> &mut ChangeLog<Self::Event> {
            &mut self.changes
        }

        fn apply(&mut self, event: &Self::Event) {
            match event {
                NoteEvent::Noted(e) => self.text = e.text.clone(),
            }
        }
    }

    fn repository() -> AggregateRepository<InMemoryEventStore, JsonCodec, Arc<InMemoryEventPublisher>>
    {
        AggregateRepository::new(
            InMemoryEventStore::new(100),
            JsonCodec::with_kinds(["note", "noted"]),
            Arc::new(InMemoryEventPublisher::new()),
        )
    }

    fn author() -> Identity {
        Identity::new("author-1", chrono::Utc::now())
    }

    #[test]
    fn save_assigns_a_fresh_id_when_missing() {
        let repository = repository();
        let mut note = Note::default();
        note.record(NoteEvent::Noted(Noted {
            text: "hello".to_string(),
        }));

        repository.save(&mut note, &author()).unwrap();
        assert!(!note.id().is_empty());
    }

    #[test]
    fn save_keeps_an_existing_id() {
        let repository = repository();
        let mut note = Note::default();
        note.changes_mut().set_id("note-1");
        note.record(NoteEvent::Noted(Noted {
            text: "hello".to_string(),
        }));

        repository.save(&mut note, &author()).unwrap();
        assert_eq!(note.id(), "note-1");
    }

    #[test]
    fn save_with_nothing_uncommitted_is_a_no_op() {
        let store = InMemoryEventStore::new(100);
        let repository = AggregateRepository::new(
            store.clone(),
            JsonCodec::with_kinds(["note", "noted"]),
            Arc::new(InMemoryEventPublisher::new()),
        );

        let mut note = Note::default();
        note.changes_mut().set_id("note-1");
        repository.save(&mut note, &author()).unwrap();
        assert!(store.get_events("note-1").unwrap().is_none());
    }

    #[test]
    fn missing_aggregate_is_not_found() {
        let repository = repository();
        let result: Result<Note, _> = repository.get_by_id("missing");
        assert!(matches!(
            result,
            Err(HydrationError::NotFound { aggregate_id }) if aggregate_id == "missing"
        ));
    }

    #[test]
    fn empty_batch_request_is_empty() {
        let repository = repository();
        let loaded: HashMap<String, Note> = repository.get_by_ids(&[]).unwrap();
        assert!(loaded.is_empty());
    }
}
