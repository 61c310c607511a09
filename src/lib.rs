//! Event-sourcing persistence and dispatch engine.
//!
//! Aggregates are rebuilt by replaying versioned event streams and mutated
//! by recording new events; commits are guarded by optimistic concurrency,
//! compacted through snapshots, and published to downstream consumers with
//! a compensating rollback when publishing fails.
//!
//! - [`aggregate`] - Aggregate roots, change logs, snapshot mapping
//! - [`event`] - Event marker traits and per-aggregate event sets
//! - [`codec`] - Serialization boundary (`Codec`, `JsonCodec`)
//! - [`store`] - Event persistence abstraction (`EventStore`)
//! - [`repository`] - Save/hydrate protocol (`AggregateRepository`)
//! - [`publisher`] - Committed-event publishing (`EventPublisher`)
//! - [`bus`] - Command routing, validation, interceptors
//! - [`identity`] - Caller identity stamped onto events
//! - [`idgen`] - Monotonic id generation
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use eventum::{
//!     codec::JsonCodec, publisher::InMemoryEventPublisher,
//!     repository::AggregateRepository, store::inmemory::InMemoryEventStore,
//! };
//!
//! let repository = AggregateRepository::new(
//!     InMemoryEventStore::new(100),
//!     JsonCodec::with_kinds(["invoice", "invoice-created"]),
//!     Arc::new(InMemoryEventPublisher::new()),
//! );
//! # let _ = repository;
//! ```

pub mod aggregate;
pub mod bus;
pub mod codec;
pub mod event;
pub mod idgen;
pub mod identity;
pub mod publisher;
pub mod repository;
pub mod store;

pub use aggregate::{AggregateRoot, ChangeLog, FullStateSnapshot, SnapshotMapper};
pub use codec::{Codec, JsonCodec};
pub use event::{DomainEvent, EncodedEvent, EventKind, EventSet};
pub use identity::{Identity, IdentityProvider};
pub use publisher::{EventPublisher, PublishError};
pub use repository::{AggregateRepository, CommitError, HydrationError};
pub use store::{
    AggregateIdentity, CreationContext, EventSourcedAggregate, EventStore, EventWithContext,
    Events, NonEmpty, RevertOutcome, SaveEventsOutcome, SaveOptions, Snapshot,
};
