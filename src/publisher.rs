//! Publishing committed events to downstream consumers.
//!
//! The repository publishes after every successful commit; a publish failure
//! triggers a compensating revert of the append. [`InMemoryEventPublisher`]
//! is the test double; the bus-backed bridge lives in
//! [`bus::SyncEventPublisher`](crate::bus::SyncEventPublisher).

use std::sync::Mutex;

use crate::store::EventWithContext;

/// Opaque publish failure.
#[derive(Debug, thiserror::Error)]
#[error("event publishing failed: {source}")]
pub struct PublishError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl PublishError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Delivers a batch of freshly committed events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, events: &[EventWithContext]) -> Result<(), PublishError>;
}

impl<P: EventPublisher + ?Sized> EventPublisher for std::sync::Arc<P> {
    fn publish(&self, events: &[EventWithContext]) -> Result<(), PublishError> {
        (**self).publish(events)
    }
}

/// Records published events in memory. Test double.
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    inner: Mutex<PublisherInner>,
}

#[derive(Debug, Default)]
struct PublisherInner {
    published: Vec<EventWithContext>,
    fail_next_publish: bool,
}

impl InMemoryEventPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<EventWithContext> {
        let inner = self.inner.lock().expect("publisher lock poisoned");
        inner.published.clone()
    }

    /// Makes the next `publish` call fail without recording anything.
    /// Test hook.
    pub fn pretend_next_publish_fails(&self) {
        let mut inner = self.inner.lock().expect("publisher lock poisoned");
        inner.fail_next_publish = true;
    }
}

impl EventPublisher for InMemoryEventPublisher {
    fn publish(&self, events: &[EventWithContext]) -> Result<(), PublishError> {
        let mut inner = self.inner.lock().expect("publisher lock poisoned");
        if inner.fail_next_publish {
            inner.fail_next_publish = false;
            return Err(PublishError::new("simulated publish failure"));
        }
        inner.published.extend_from_slice(events);
        Ok(())
    }
}
