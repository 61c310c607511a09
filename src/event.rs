//! Event marker traits and the closed event set of an aggregate.

use serde::Serialize;

use crate::codec::Codec;

/// Marker trait for domain events.
///
/// The `KIND` constant is the stable, storage-level name of the event. It is
/// written alongside every payload and must never change once events of this
/// type have been persisted.
///
/// # Example
///
/// ```
/// use eventum::event::DomainEvent;
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct InvoiceCreated {
///     invoice_id: String,
/// }
///
/// impl DomainEvent for InvoiceCreated {
///     const KIND: &'static str = "invoice-created";
/// }
/// ```
pub trait DomainEvent {
    /// Stable storage-level name for this event type.
    const KIND: &'static str;
}

/// Object-safe access to an event's kind.
///
/// Blanket-implemented for all [`DomainEvent`] types.
pub trait EventKind {
    fn kind(&self) -> &'static str;
}

impl<T: DomainEvent> EventKind for T {
    fn kind(&self) -> &'static str {
        T::KIND
    }
}

/// An event with its kind tag, encoded to payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedEvent {
    pub kind: &'static str,
    pub data: Vec<u8>,
}

/// The closed set of events one aggregate type can emit and replay.
///
/// Implementations are sum types with one variant per [`DomainEvent`], and
/// dispatch encode/decode on the kind tag. Decoding a kind outside the set
/// yields `Ok(None)`, which replay treats as "skip this event": streams may
/// carry events this aggregate does not understand.
///
/// # Example
///
/// ```
/// use eventum::codec::Codec;
/// use eventum::event::{DomainEvent, EncodedEvent, EventSet};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Opened { owner: String }
///
/// impl DomainEvent for Opened {
///     const KIND: &'static str = "account-opened";
/// }
///
/// enum AccountEvent {
///     Opened(Opened),
/// }
///
/// impl EventSet for AccountEvent {
///     const KINDS: &'static [&'static str] = &[Opened::KIND];
///
///     fn encode<C: Codec>(&self, codec: &C) -> Result<EncodedEvent, C::Error> {
///         match self {
///             Self::Opened(event) => Ok(EncodedEvent {
///                 kind: Opened::KIND,
///                 data: codec.format(event)?,
///             }),
///         }
///     }
///
///     fn decode<C: Codec>(kind: &str, data: &[u8], codec: &C) -> Result<Option<Self>, C::Error> {
///         match kind {
///             Opened::KIND => Ok(Some(Self::Opened(codec.parse(data, kind)?))),
///             _ => Ok(None),
///         }
///     }
/// }
/// ```
pub trait EventSet: Sized {
    /// The kinds of every event in the set.
    const KINDS: &'static [&'static str];

    /// Encodes this event into its kind tag and payload bytes.
    fn encode<C: Codec>(&self, codec: &C) -> Result<EncodedEvent, C::Error>;

    /// Decodes an event of the given kind, or `Ok(None)` if the kind is not
    /// in this set.
    fn decode<C: Codec>(kind: &str, data: &[u8], codec: &C) -> Result<Option<Self>, C::Error>;
}

/// Encodes a serializable event under its `DomainEvent` kind.
///
/// Convenience for `EventSet::encode` implementations.
pub fn encode_event<E, C>(event: &E, codec: &C) -> Result<EncodedEvent, C::Error>
where
    E: DomainEvent + Serialize,
    C: Codec,
{
    Ok(EncodedEvent {
        kind: E::KIND,
        data: codec.format(event)?,
    })
}
