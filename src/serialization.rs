//! Message serialization.
//!
//! A [`Serializer`] turns an [`Envelope`] into the body and headers that a
//! sender puts on the wire. The sender decides what to do with the headers;
//! the pub/sub sender publishes them as message attributes.

use std::{collections::BTreeMap, convert::Infallible, marker::PhantomData};

use bytes::Bytes;
use serde::Serialize;

use crate::{Envelope, transport::ToBytes};

/// Header carrying the body's content type.
pub const CONTENT_TYPE_HEADER: &str = "content-type";
/// Header carrying the message type name.
pub const TYPE_HEADER: &str = "type";

/// Serialized form of an envelope.
///
/// The body is always present. Headers are optional: `None` means the
/// serializer had nothing to say, which is different from an empty map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    /// Message payload.
    pub body: Bytes,
    /// Headers to publish alongside the payload.
    pub headers: Option<BTreeMap<String, String>>,
}

impl EncodedMessage {
    /// Encoded message without headers.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            headers: None,
        }
    }

    /// Attach headers, published as message attributes.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Turns envelopes into wire payloads.
pub trait Serializer<M> {
    /// Error raised when the envelope cannot be encoded.
    type Error: Into<tower::BoxError>;

    /// Encode the envelope's message into a body and optional headers.
    fn encode(&self, envelope: &Envelope<M>) -> Result<EncodedMessage, Self::Error>;
}

/// Serializer for messages that already are bytes.
///
/// The body is a copy of the message bytes; no headers are produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl<M: ToBytes> Serializer<M> for BytesSerializer {
    type Error = Infallible;

    fn encode(&self, envelope: &Envelope<M>) -> Result<EncodedMessage, Self::Error> {
        Ok(EncodedMessage::new(Bytes::copy_from_slice(
            envelope.message().to_bytes(),
        )))
    }
}

/// JSON serializer backed by `serde_json`.
///
/// Produces a `content-type: application/json` header, plus a `type` header
/// with the Rust type name of the message when enabled through
/// [`JsonSerializer::with_type_header`].
pub struct JsonSerializer<M> {
    type_header: bool,
    _message_marker: PhantomData<fn(&M)>,
}

impl<M> JsonSerializer<M> {
    /// JSON serializer without the `type` header.
    pub fn new() -> Self {
        Self {
            type_header: false,
            _message_marker: PhantomData,
        }
    }

    /// Add a `type` header naming the message type.
    pub fn with_type_header(mut self) -> Self {
        self.type_header = true;
        self
    }
}

impl<M> Default for JsonSerializer<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for JsonSerializer<M> {
    fn clone(&self) -> Self {
        Self {
            type_header: self.type_header,
            _message_marker: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for JsonSerializer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSerializer")
            .field("type_header", &self.type_header)
            .finish()
    }
}

impl<M: Serialize> Serializer<M> for JsonSerializer<M> {
    type Error = serde_json::Error;

    fn encode(&self, envelope: &Envelope<M>) -> Result<EncodedMessage, Self::Error> {
        let body = serde_json::to_vec(envelope.message())?;

        let mut headers = BTreeMap::new();
        headers.insert(CONTENT_TYPE_HEADER.to_owned(), "application/json".to_owned());
        if self.type_header {
            headers.insert(TYPE_HEADER.to_owned(), std::any::type_name::<M>().to_owned());
        }

        Ok(EncodedMessage::new(body).with_headers(headers))
    }
}
