use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    Envelope,
    config::TopicConfiguration,
    serialization::{EncodedMessage, Serializer},
    stamp::{AttributesStamp, OrderingKeyStamp, RedeliveryStamp},
    transport::{Sender, TransportError},
};

/// Largest message payload accepted by the broker, in bytes.
pub const MAX_DATA_BYTES: usize = 10_000_000;
/// Largest number of attributes on a single message.
pub const MAX_ATTRIBUTES: usize = 100;
/// Largest attribute key, in bytes.
pub const MAX_ATTRIBUTE_KEY_BYTES: usize = 256;
/// Largest attribute value, in bytes.
pub const MAX_ATTRIBUTE_VALUE_BYTES: usize = 1024;
/// Largest ordering key, in bytes.
pub const MAX_ORDERING_KEY_BYTES: usize = 1024;
/// Attribute key prefix reserved by the broker.
pub const RESERVED_ATTRIBUTE_PREFIX: &str = "goog";

/// Pub/Sub transport sender.
///
/// Publishes envelopes to a single topic through a [`PublishClient`].
///
/// ## Mapping
///
/// - `Serializer::encode(envelope).body` → message data
/// - `Serializer::encode(envelope).headers` + the last [`AttributesStamp`]
///   → message attributes (stamp values win on key collision)
/// - the last [`OrderingKeyStamp`] → message ordering key
/// - `TopicConfiguration::topic_name()` → destination topic
///
/// Envelopes carrying a [`RedeliveryStamp`] are handed back without being
/// published: the message was already published once, and redelivering
/// unacknowledged messages is the broker's job.
///
/// The sender keeps no state between calls. Clones share the client,
/// topic configuration and serializer.
pub struct PubsubSender<C, T, S> {
    client: Arc<C>,
    topic: Arc<T>,
    serializer: Arc<S>,
}

impl<C, T, S> PubsubSender<C, T, S> {
    /// Create a sender publishing to `topic` through `client`.
    pub fn new(client: C, topic: T, serializer: S) -> Self {
        Self {
            client: Arc::new(client),
            topic: Arc::new(topic),
            serializer: Arc::new(serializer),
        }
    }
}

impl<C, T, S> Clone for PubsubSender<C, T, S> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            topic: Arc::clone(&self.topic),
            serializer: Arc::clone(&self.serializer),
        }
    }
}

#[async_trait]
impl<M, C, T, S> Sender<M> for PubsubSender<C, T, S>
where
    M: Send + Sync + 'static,
    C: PublishClient + Send + Sync,
    T: TopicConfiguration + Send + Sync,
    S: Serializer<M> + Send + Sync,
{
    type Error = TransportError;

    /// Publish an envelope to the configured topic.
    ///
    /// Returns the envelope unchanged, whether it was published or skipped
    /// as a redelivery. Serializer and message validation failures are
    /// encoding errors; client failures are broker errors. Neither is
    /// retried.
    #[tracing::instrument(skip_all, fields(topic = self.topic.topic_name()))]
    async fn send(&self, envelope: Envelope<M>) -> Result<Envelope<M>, TransportError> {
        let EncodedMessage { body, headers } = self
            .serializer
            .encode(&envelope)
            .map_err(TransportError::encoding)?;

        let attributes = merge_attributes(headers, envelope.last::<AttributesStamp>());

        let builder = PubsubMessage::builder(body).map_err(TransportError::encoding)?;

        if envelope.last::<RedeliveryStamp>().is_some() {
            tracing::debug!("Redelivered envelope, leaving retries to the broker");
            return Ok(envelope);
        }

        let builder = match envelope.last::<OrderingKeyStamp>() {
            Some(stamp) => builder.ordering_key(stamp.ordering_key()),
            None => builder,
        };

        let builder = match attributes {
            Some(attributes) => builder.attributes(attributes),
            None => builder,
        };

        let message = builder.build().map_err(TransportError::encoding)?;

        self.client
            .publish(self.topic.topic_name(), message)
            .await
            .map_err(TransportError::broker)?;

        tracing::debug!("Message published");
        Ok(envelope)
    }
}

/// Merge stamp attributes over serializer headers.
///
/// Stays `None` when there is neither.
fn merge_attributes(
    headers: Option<BTreeMap<String, String>>,
    stamp: Option<&AttributesStamp>,
) -> Option<BTreeMap<String, String>> {
    let Some(stamp) = stamp else {
        return headers;
    };

    let mut merged = headers.unwrap_or_default();
    merged.extend(
        stamp
            .attributes()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    Some(merged)
}

/// Client performing the network publish.
///
/// Implementations are shared between concurrent sends and must be safe to
/// call through `&self`. Retries, timeouts and authentication are the
/// client's concern.
#[async_trait]
pub trait PublishClient {
    /// Backend-specific error type.
    type Error: Into<tower::BoxError>;

    /// Publish a single message to `topic`.
    async fn publish(&self, topic: &str, message: PubsubMessage) -> Result<(), Self::Error>;
}

/// Message handed to the broker.
///
/// Built with [`PubsubMessage::builder`]; immutable once built.
/// `attributes` is `None` when no attribute was set, which is not the same
/// as an empty map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubsubMessage {
    data: Bytes,
    attributes: Option<BTreeMap<String, String>>,
    ordering_key: Option<String>,
}

impl PubsubMessage {
    /// Start building a message with the given payload.
    ///
    /// Fails if the payload exceeds [`MAX_DATA_BYTES`].
    pub fn builder(data: impl Into<Bytes>) -> Result<PubsubMessageBuilder, MessageError> {
        let data = data.into();
        if data.len() > MAX_DATA_BYTES {
            return Err(MessageError::data_too_large(data.len()));
        }

        Ok(PubsubMessageBuilder {
            data,
            attributes: None,
            ordering_key: None,
        })
    }

    /// Message payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Message attributes, `None` when none were set.
    pub fn attributes(&self) -> Option<&BTreeMap<String, String>> {
        self.attributes.as_ref()
    }

    /// Ordering key, `None` when none was set.
    pub fn ordering_key(&self) -> Option<&str> {
        self.ordering_key.as_deref()
    }
}

/// Builder for [`PubsubMessage`].
///
/// Validation of attributes and ordering key happens in
/// [`build`](PubsubMessageBuilder::build).
#[derive(Debug)]
pub struct PubsubMessageBuilder {
    data: Bytes,
    attributes: Option<BTreeMap<String, String>>,
    ordering_key: Option<String>,
}

impl PubsubMessageBuilder {
    /// Set the message attributes, replacing any previously set.
    pub fn attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Set the ordering key, replacing any previously set.
    pub fn ordering_key(mut self, ordering_key: impl Into<String>) -> Self {
        self.ordering_key = Some(ordering_key.into());
        self
    }

    /// Validate and finalize the message.
    pub fn build(self) -> Result<PubsubMessage, MessageError> {
        let attribute_count = self.attributes.as_ref().map_or(0, BTreeMap::len);

        if self.data.is_empty() && attribute_count == 0 {
            return Err(MessageError::empty());
        }
        if attribute_count > MAX_ATTRIBUTES {
            return Err(MessageError::too_many_attributes(attribute_count));
        }

        for (key, value) in self.attributes.iter().flatten() {
            if key.is_empty() || key.len() > MAX_ATTRIBUTE_KEY_BYTES {
                return Err(MessageError::invalid_attribute_key(key));
            }
            if key.starts_with(RESERVED_ATTRIBUTE_PREFIX) {
                return Err(MessageError::reserved_attribute_key(key));
            }
            if value.len() > MAX_ATTRIBUTE_VALUE_BYTES {
                return Err(MessageError::attribute_value_too_large(key));
            }
        }

        // An empty ordering key is valid and publishes the message unordered.
        if let Some(key) = &self.ordering_key {
            if key.len() > MAX_ORDERING_KEY_BYTES {
                return Err(MessageError::ordering_key_too_large(key.len()));
            }
        }

        Ok(PubsubMessage {
            data: self.data,
            attributes: self.attributes,
            ordering_key: self.ordering_key,
        })
    }
}

/// Error returned when a message cannot be built.
#[derive(Debug)]
pub struct MessageError {
    kind: MessageErrorKind,
}

#[derive(Debug)]
enum MessageErrorKind {
    DataTooLarge(usize),
    Empty,
    TooManyAttributes(usize),
    InvalidAttributeKey(String),
    ReservedAttributeKey(String),
    AttributeValueTooLarge(String),
    OrderingKeyTooLarge(usize),
}

impl MessageError {
    fn data_too_large(size: usize) -> Self {
        Self {
            kind: MessageErrorKind::DataTooLarge(size),
        }
    }

    fn empty() -> Self {
        Self {
            kind: MessageErrorKind::Empty,
        }
    }

    fn too_many_attributes(count: usize) -> Self {
        Self {
            kind: MessageErrorKind::TooManyAttributes(count),
        }
    }

    fn invalid_attribute_key(key: &str) -> Self {
        Self {
            kind: MessageErrorKind::InvalidAttributeKey(key.to_owned()),
        }
    }

    fn reserved_attribute_key(key: &str) -> Self {
        Self {
            kind: MessageErrorKind::ReservedAttributeKey(key.to_owned()),
        }
    }

    fn attribute_value_too_large(key: &str) -> Self {
        Self {
            kind: MessageErrorKind::AttributeValueTooLarge(key.to_owned()),
        }
    }

    fn ordering_key_too_large(len: usize) -> Self {
        Self {
            kind: MessageErrorKind::OrderingKeyTooLarge(len),
        }
    }
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            MessageErrorKind::DataTooLarge(size) => {
                write!(f, "Message data of {size} bytes exceeds {MAX_DATA_BYTES} bytes")
            }
            MessageErrorKind::Empty => write!(f, "Message has neither data nor attributes"),
            MessageErrorKind::TooManyAttributes(count) => {
                write!(f, "Message has {count} attributes, at most {MAX_ATTRIBUTES} allowed")
            }
            MessageErrorKind::InvalidAttributeKey(key) => write!(
                f,
                "Attribute key {key:?} must be 1 to {MAX_ATTRIBUTE_KEY_BYTES} bytes long"
            ),
            MessageErrorKind::ReservedAttributeKey(key) => write!(
                f,
                "Attribute key {key:?} uses the reserved prefix {RESERVED_ATTRIBUTE_PREFIX:?}"
            ),
            MessageErrorKind::AttributeValueTooLarge(key) => write!(
                f,
                "Value of attribute {key:?} exceeds {MAX_ATTRIBUTE_VALUE_BYTES} bytes"
            ),
            MessageErrorKind::OrderingKeyTooLarge(len) => write!(
                f,
                "Ordering key of {len} bytes exceeds {MAX_ORDERING_KEY_BYTES} bytes"
            ),
        }
    }
}

impl std::error::Error for MessageError {}
