//! Command-side primitives: aggregate roots, their change logs, and snapshot
//! mapping.
//!
//! An [`AggregateRoot`] is rebuilt by replaying its event stream and mutated
//! by recording new events. The bookkeeping (identity, version, uncommitted
//! buffer) lives in a [`ChangeLog`] embedded in the aggregate's state, so
//! implementations only provide state, an event set, and an `apply` function.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{codec::Codec, event::EventSet, store::Snapshot};

/// Identity, version, and uncommitted-event bookkeeping for one aggregate.
///
/// A fresh change log is at version `-1`; the first recorded event moves it
/// to `0`. Versions are the zero-based positions of events in the stream.
/// The uncommitted buffer is never serialized: snapshots capture committed
/// state only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
pub struct ChangeLog<E> {
    id: String,
    version: i64,
    #[serde(skip)]
    uncommitted: Vec<E>,
}

impl<E> Default for ChangeLog<E> {
    fn default() -> Self {
        Self {
            id: String::new(),
            version: -1,
            uncommitted: Vec::new(),
        }
    }
}

impl<E> ChangeLog<E> {
    /// Creates a change log for a known aggregate id, at version `-1`.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Assigns the aggregate id. The repository calls this when persisting an
    /// aggregate created without one, and when hydrating.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Version of the last event applied to this aggregate, or `-1`.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Events recorded since the last commit, in recording order.
    #[must_use]
    pub fn uncommitted(&self) -> &[E] {
        &self.uncommitted
    }

    /// Advances the version and buffers a freshly recorded event.
    pub fn record(&mut self, event: E) {
        self.version += 1;
        self.uncommitted.push(event);
    }

    /// Resets the version to a hydration baseline. Replay must not buffer,
    /// so this never touches the uncommitted events.
    pub fn seed_version(&mut self, version: i64) {
        self.version = version;
    }

    /// Drops the uncommitted buffer after a successful commit.
    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
    }
}

/// An event-sourced aggregate root.
///
/// `Default` is the pre-first-event state; `Serialize`/`DeserializeOwned`
/// support the full-state snapshot mapper. Implementations wire up state,
/// a [`ChangeLog`], and event application:
///
/// ```
/// use eventum::aggregate::{AggregateRoot, ChangeLog};
/// use eventum::codec::Codec;
/// use eventum::event::{DomainEvent, EncodedEvent, EventSet, encode_event};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Deposited { amount: i64 }
///
/// impl DomainEvent for Deposited {
///     const KIND: &'static str = "deposited";
/// }
///
/// enum AccountEvent { Deposited(Deposited) }
///
/// impl EventSet for AccountEvent {
///     const KINDS: &'static [&'static str] = &[Deposited::KIND];
///     fn encode<C: Codec>(&self, codec: &C) -> Result<EncodedEvent, C::Error> {
///         match self {
///             Self::Deposited(e) => encode_event(e, codec),
///         }
///     }
///     fn decode<C: Codec>(kind: &str, data: &[u8], codec: &C) -> Result<Option<Self>, C::Error> {
///         match kind {
///             Deposited::KIND => Ok(Some(Self::Deposited(codec.parse(data, kind)?))),
///             _ => Ok(None),
///         }
///     }
/// }
///
/// #[derive(Default, serde::Serialize, serde::Deserialize)]
/// struct Account {
///     changes: ChangeLog<AccountEvent>,
///     balance: i64,
/// }
///
/// impl AggregateRoot for Account {
///     const KIND: &'static str = "account";
///     type Event = AccountEvent;
///     fn changes(&self) -> &ChangeLog<Self::Event> { &self.changes }
///     fn changes_mut(&mut self) -> &mut ChangeLog<Self::Event> { &mut self.changes }
///     fn apply(&mut self, event: &Self::Event) {
///         match event {
///             AccountEvent::Deposited(e) => self.balance += e.amount,
///         }
///     }
/// }
///
/// let mut account = Account::default();
/// account.record(AccountEvent::Deposited(Deposited { amount: 10 }));
/// assert_eq!(account.balance, 10);
/// assert_eq!(account.changes().version(), 0);
/// assert_eq!(account.expected_version(), -1);
/// ```
pub trait AggregateRoot: Default + Serialize + DeserializeOwned {
    /// Stable storage-level name for this aggregate type.
    const KIND: &'static str;

    /// The closed set of events this aggregate emits and replays.
    type Event: EventSet;

    fn changes(&self) -> &ChangeLog<Self::Event>;

    fn changes_mut(&mut self) -> &mut ChangeLog<Self::Event>;

    /// Applies an event to the aggregate's state. Must be side-effect free:
    /// it runs both on record and on replay.
    fn apply(&mut self, event: &Self::Event);

    fn id(&self) -> &str {
        self.changes().id()
    }

    /// The version this aggregate was hydrated at: the baseline the event
    /// store checks on commit. Recording events advances the change log's
    /// version but not the baseline.
    fn expected_version(&self) -> i64 {
        let changes = self.changes();
        changes.version() - changes.uncommitted().len() as i64
    }

    /// Records a new event: advances the version, applies it, and buffers it
    /// for the next save.
    fn record(&mut self, event: Self::Event) {
        self.apply(&event);
        self.changes_mut().record(event);
    }

    /// Replays committed history on top of the current state, then seeds the
    /// version to `baseline`. Replayed events are applied but never buffered.
    fn build_from_history<I>(&mut self, history: I, baseline: i64)
    where
        I: IntoIterator<Item = Self::Event>,
    {
        for event in history {
            self.apply(&event);
        }
        self.changes_mut().seed_version(baseline);
    }

    /// Events recorded since the last commit.
    fn uncommitted_events(&self) -> &[Self::Event] {
        self.changes().uncommitted()
    }

    /// Clears the uncommitted buffer after a successful commit.
    fn commit_events(&mut self) {
        self.changes_mut().mark_committed();
    }

    /// The snapshot mapper used when the store demands compaction. Defaults
    /// to [`FullStateSnapshot`]; override for custom snapshot shapes.
    #[must_use]
    fn snapshot_mapper() -> impl SnapshotMapper<Self> {
        FullStateSnapshot
    }
}

/// Maps an aggregate to and from its snapshot payload.
pub trait SnapshotMapper<A: AggregateRoot> {
    fn to_snapshot<C: Codec>(&self, aggregate: &A, codec: &C) -> Result<Snapshot, C::Error>;

    fn from_snapshot<C: Codec>(&self, snapshot: &Snapshot, codec: &C) -> Result<A, C::Error>;
}

/// Default mapper: serializes the aggregate's entire state.
///
/// Snapshot payloads are parsed under the aggregate's
/// [`KIND`](AggregateRoot::KIND), so codecs with a kind registry must have it
/// registered.
#[derive(Clone, Copy, Debug, Default)]
pub struct FullStateSnapshot;

impl<A: AggregateRoot> SnapshotMapper<A> for FullStateSnapshot {
    fn to_snapshot<C: Codec>(&self, aggregate: &A, codec: &C) -> Result<Snapshot, C::Error> {
        Ok(Snapshot {
            version: aggregate.expected_version(),
            data: codec.format(aggregate)?,
        })
    }

    fn from_snapshot<C: Codec>(&self, snapshot: &Snapshot, codec: &C) -> Result<A, C::Error> {
        let mut aggregate: A = codec.parse(&snapshot.data, A::KIND)?;
        aggregate.changes_mut().seed_version(snapshot.version);
        Ok(aggregate)
    }
}
