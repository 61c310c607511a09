//! Serialization boundary between domain types and stored payload bytes.
//!
//! A [`Codec`] turns domain values into the opaque byte payloads carried by
//! [`EventWithContext`](crate::store::EventWithContext) and
//! [`Snapshot`](crate::store::Snapshot), and back. Codecs also carry a
//! registry of the event kinds they understand, so replay can skip payloads
//! written by other services sharing the same stream.

use std::{collections::BTreeSet, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};

/// Converts domain values to and from stored payload bytes.
///
/// Implementations are cheaply cloneable; the repository and publishers hold
/// their own copies.
pub trait Codec: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether this codec knows how to parse payloads of the given kind.
    fn supports_kind(&self, kind: &str) -> bool;

    /// Serializes a value into payload bytes.
    fn format<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, Self::Error>;

    /// Deserializes payload bytes of a known kind.
    ///
    /// Parsing a kind for which [`supports_kind`](Codec::supports_kind)
    /// returns `false` is an error.
    fn parse<T: DeserializeOwned>(&self, data: &[u8], kind: &str) -> Result<T, Self::Error>;
}

/// JSON codec with an explicit registry of supported kinds.
///
/// # Example
///
/// ```
/// use eventum::codec::{Codec, JsonCodec};
///
/// let codec = JsonCodec::with_kinds(["invoice-created"]);
/// assert!(codec.supports_kind("invoice-created"));
/// assert!(!codec.supports_kind("order-shipped"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct JsonCodec {
    kinds: Arc<BTreeSet<String>>,
}

impl JsonCodec {
    /// Creates a codec supporting the given kinds.
    #[must_use]
    pub fn with_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: Arc::new(kinds.into_iter().map(Into::into).collect()),
        }
    }
}

/// Error type for [`JsonCodec`].
#[derive(Debug, thiserror::Error)]
pub enum JsonCodecError {
    #[error("unsupported payload kind `{0}`")]
    UnsupportedKind(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Codec for JsonCodec {
    type Error = JsonCodecError;

    fn supports_kind(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }

    fn format<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, Self::Error> {
        Ok(serde_json::to_vec(value)?)
    }

    fn parse<T: DeserializeOwned>(&self, data: &[u8], kind: &str) -> Result<T, Self::Error> {
        if !self.supports_kind(kind) {
            return Err(JsonCodecError::UnsupportedKind(kind.to_string()));
        }
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Payload {
        value: i32,
    }

    #[test]
    fn round_trips_registered_kind() {
        let codec = JsonCodec::with_kinds(["payload"]);
        let bytes = codec.format(&Payload { value: 7 }).unwrap();
        let parsed: Payload = codec.parse(&bytes, "payload").unwrap();
        assert_eq!(parsed, Payload { value: 7 });
    }

    #[test]
    fn parse_of_unregistered_kind_is_an_error() {
        let codec = JsonCodec::with_kinds(["payload"]);
        let bytes = codec.format(&Payload { value: 7 }).unwrap();
        let result: Result<Payload, _> = codec.parse(&bytes, "other");
        assert!(matches!(result, Err(JsonCodecError::UnsupportedKind(kind)) if kind == "other"));
    }

    #[test]
    fn empty_codec_supports_nothing() {
        let codec = JsonCodec::default();
        assert!(!codec.supports_kind("payload"));
    }
}
