//! Caller identity: who is saving, and at what time.

use chrono::{DateTime, Utc};

use crate::{
    aggregate::AggregateRoot,
    codec::Codec,
    publisher::EventPublisher,
    repository::{AggregateRepository, CommitError, HydrationError},
    store::EventStore,
};

/// The author and timestamp stamped onto committed events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub time: DateTime<Utc>,
}

impl Identity {
    #[must_use]
    pub fn new(id: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            time,
        }
    }
}

/// Supplies the identity of the current caller.
pub trait IdentityProvider: Send + Sync {
    fn get(&self) -> Identity;
}

/// Anonymous identity at the system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemIdentityProvider;

impl IdentityProvider for SystemIdentityProvider {
    fn get(&self) -> Identity {
        Identity::new("-1", Utc::now())
    }
}

/// An [`AggregateRepository`] paired with an [`IdentityProvider`], so call
/// sites need not thread identities through every save.
#[derive(Clone, Debug)]
pub struct AuthoredRepository<S, C, P, I> {
    repository: AggregateRepository<S, C, P>,
    identities: I,
}

impl<S, C, P, I> AuthoredRepository<S, C, P, I>
where
    S: EventStore,
    C: Codec,
    P: EventPublisher,
    I: IdentityProvider,
{
    pub fn new(repository: AggregateRepository<S, C, P>, identities: I) -> Self {
        Self {
            repository,
            identities,
        }
    }

    /// Saves under the provider's current identity.
    pub fn save<A: AggregateRoot>(
        &self,
        aggregate: &mut A,
    ) -> Result<(), CommitError<S::Error, C::Error>> {
        let identity = self.identities.get();
        self.repository.save(aggregate, &identity)
    }

    pub fn get_by_id<A: AggregateRoot>(
        &self,
        aggregate_id: &str,
    ) -> Result<A, HydrationError<S::Error, C::Error>> {
        self.repository.get_by_id(aggregate_id)
    }

    pub fn get_by_ids<A: AggregateRoot>(
        &self,
        ids: &[String],
    ) -> Result<std::collections::HashMap<String, A>, HydrationError<S::Error, C::Error>> {
        self.repository.get_by_ids(ids)
    }
}
