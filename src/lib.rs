#![doc = include_str!("../README.md")]

pub mod config;
pub mod envelope;
pub mod serialization;
pub mod stamp;
pub mod transport;

#[doc(inline)]
pub use envelope::{Envelope, Stamp};

#[doc(inline)]
pub use config::{ConfigError, PubsubConfig, TopicConfiguration};

#[doc(inline)]
pub use serialization::{BytesSerializer, EncodedMessage, JsonSerializer, Serializer};

#[doc(inline)]
pub use stamp::{AttributesStamp, OrderingKeyStamp, RedeliveryStamp};

#[doc(inline)]
pub use transport::{
    Sender, Transport, TransportError, TransportErrorKind,
    pubsub::{PublishClient, PubsubMessage, PubsubSender},
};
