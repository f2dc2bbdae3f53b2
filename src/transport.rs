//! Transport abstractions and sender backends.
//!
//! This module defines a Tower-compatible transport layer used to send
//! [`Envelope`]s to a message broker.
//!
//! The transport is built around Tower’s `Service` abstraction, enabling
//! middleware composition (timeouts, tracing, concurrency limits, etc.) while
//! keeping sender implementations backend-agnostic.
//!
//! ## Key components
//!
//! - [`Transport`]: Public-facing wrapper implementing `tower::Service`
//! - [`SenderService`]: Adapter from a [`Sender`] to a Tower service
//! - [`Sender`]: Trait implemented by concrete sender backends
//! - [`TransportError`]: Unified error type with tracing context
//!
//! ## Backends
//!
//! - [`pubsub::PubsubSender`]: publishes to a topic through a
//!   [`pubsub::PublishClient`]
//! - [`InMemory`]: a `PublishClient` recording messages, for tests
//! - `rest::PubsubRestClient` (feature `rest`): a `PublishClient` for the
//!   Pub/Sub REST API

mod inmemory;

pub mod pubsub;

#[cfg(feature = "rest")]
pub mod rest;

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use tower::Service;
use tracing_error::SpanTrace;

use crate::Envelope;

pub use inmemory::{InMemory, PublishedMessage};

/// Generic Tower-compatible transport wrapper.
///
/// `Transport` is the main entry point for sending envelopes. It wraps an
/// underlying Tower `Service` and:
///
/// - Normalizes errors into [`TransportError`]
/// - Supports Tower middleware via layers
/// - Provides a convenience [`send`](Transport::send) API
///
/// Typically constructed from a concrete [`Sender`] implementation.
#[derive(Clone)]
pub struct Transport<S> {
    service: S,
}

impl<D> Transport<SenderService<D>> {
    /// Create a new transport from a concrete sender backend.
    ///
    /// The sender will be wrapped in a [`SenderService`] to make it
    /// Tower-compatible.
    pub fn new(driver: D) -> Self {
        Self {
            service: SenderService::new(driver),
        }
    }
}

impl<S> Transport<S> {
    /// Apply a Tower layer to the transport.
    ///
    /// This enables composition with middleware such as timeouts,
    /// concurrency limits, or tracing.
    pub fn layer<L>(self, layer: L) -> Transport<L::Service>
    where
        L: tower::Layer<S>,
    {
        Transport {
            service: layer.layer(self.service),
        }
    }
}

/// Tower `Service` implementation for `Transport`.
///
/// Delegates readiness and request handling to the inner service while mapping
/// all errors into [`TransportError`].
impl<R, S> Service<R> for Transport<S>
where
    S: Service<R> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<tower::BoxError>,
    R: Send + 'static,
{
    type Response = S::Response;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service
            .poll_ready(cx)
            .map_err(|e| TransportError::from_boxed(e.into()))
    }

    fn call(&mut self, req: R) -> Self::Future {
        let mut service = self.service.clone();

        Box::pin(async move {
            service
                .call(req)
                .await
                .map_err(|e| TransportError::from_boxed(e.into()))
        })
    }
}

impl<S> Transport<S> {
    /// Send an [`Envelope`] through the transport.
    ///
    /// This is a convenience method for users that do not need direct access
    /// to the `tower::Service` API. Sender backends hand the envelope back on
    /// success so it can continue through the pipeline.
    pub async fn send<M>(&mut self, envelope: Envelope<M>) -> Result<S::Response, TransportError>
    where
        M: Send + 'static,
        S: Service<Envelope<M>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<tower::BoxError>,
    {
        let mut service = self.service.clone();
        std::future::poll_fn(|cx| service.poll_ready(cx))
            .await
            .map_err(|e| TransportError::from_boxed(e.into()))?;
        service
            .call(envelope)
            .await
            .map_err(|e| TransportError::from_boxed(e.into()))
    }
}

/// Error returned by transport operations.
///
/// Each error captures:
/// - The underlying error kind
/// - A tracing span backtrace for improved diagnostics
#[derive(Debug)]
pub struct TransportError {
    context: SpanTrace,
    kind: TransportErrorKind,
}

/// Transport errors kind.
#[derive(Debug)]
pub enum TransportErrorKind {
    /// The envelope could not be turned into a broker message. Nothing was
    /// published.
    Encoding(tower::BoxError),
    /// The broker, or a service in front of it, failed the publish.
    Broker(tower::BoxError),
}

impl TransportError {
    /// Create an encoding-related transport error.
    pub fn encoding(err: impl Into<tower::BoxError>) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: TransportErrorKind::Encoding(err.into()),
        }
    }

    /// Create a broker-related transport error.
    pub fn broker(err: impl Into<tower::BoxError>) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: TransportErrorKind::Broker(err.into()),
        }
    }

    /// Recover a `TransportError` raised by an inner service, or classify
    /// any other error as a broker error.
    fn from_boxed(err: tower::BoxError) -> Self {
        match err.downcast::<TransportError>() {
            Ok(err) => *err,
            Err(err) => Self::broker(err),
        }
    }

    /// Returns the kind of transport error.
    pub fn kind(&self) -> &TransportErrorKind {
        &self.kind
    }

    /// Whether the envelope failed to encode and nothing was published.
    pub fn is_encoding(&self) -> bool {
        matches!(self.kind, TransportErrorKind::Encoding(_))
    }

    /// Whether the broker, or a service in front of it, failed.
    pub fn is_broker(&self) -> bool {
        matches!(self.kind, TransportErrorKind::Broker(_))
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TransportErrorKind::Encoding(err) => writeln!(f, "Encoding error: {err}"),
            TransportErrorKind::Broker(err) => writeln!(f, "Broker error: {err}"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            TransportErrorKind::Encoding(err) => Some(err.as_ref()),
            TransportErrorKind::Broker(err) => Some(err.as_ref()),
        }
    }
}

/// Tower service adapter for a [`Sender`] backend.
///
/// This type bridges the [`Sender`] trait with Tower’s `Service` abstraction.
#[derive(Clone)]
pub struct SenderService<D> {
    sender: D,
}

impl<D> SenderService<D> {
    /// Create a new sender service from a backend.
    pub fn new(sender: D) -> Self {
        Self { sender }
    }
}

/// `tower::Service` implementation delegating to a [`Sender`].
impl<M, D> Service<Envelope<M>> for SenderService<D>
where
    M: Send + 'static,
    D: Sender<M> + Clone + Send + Sync + 'static,
{
    type Response = Envelope<M>;
    type Error = tower::BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Envelope<M>) -> Self::Future {
        let sender = self.sender.clone();
        Box::pin(async move { sender.send(req).await.map_err(Into::into) })
    }
}

/// Trait implemented by concrete sender backends.
///
/// A sender is responsible for delivering an [`Envelope`] to an external
/// system and handing the envelope back to the caller once it is done.
#[async_trait::async_trait]
pub trait Sender<M> {
    /// Backend-specific error type.
    type Error: Into<tower::BoxError>;

    /// Send an envelope using the underlying transport.
    async fn send(&self, envelope: Envelope<M>) -> Result<Envelope<M>, Self::Error>;
}

/// Trait for values that can be viewed as raw bytes.
///
/// This abstraction avoids unnecessary allocations when handling payloads.
pub trait ToBytes {
    /// Convert the value into a byte slice.
    fn to_bytes(&self) -> &[u8];
}

impl ToBytes for [u8] {
    fn to_bytes(&self) -> &[u8] {
        self
    }
}

impl ToBytes for str {
    fn to_bytes(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl ToBytes for Vec<u8> {
    fn to_bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

impl ToBytes for String {
    fn to_bytes(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl ToBytes for Bytes {
    fn to_bytes(&self) -> &[u8] {
        self
    }
}

impl<T: ToBytes + ?Sized> ToBytes for &T {
    fn to_bytes(&self) -> &[u8] {
        (*self).to_bytes()
    }
}

impl ToBytes for () {
    fn to_bytes(&self) -> &[u8] {
        &[]
    }
}

impl<const N: usize> ToBytes for [u8; N] {
    fn to_bytes(&self) -> &[u8] {
        self
    }
}

#[cfg(test)]
mod tests {
    use tower::util::MapRequestLayer;

    use super::*;
    use crate::{
        serialization::BytesSerializer, stamp::OrderingKeyStamp, transport::pubsub::PubsubSender,
    };

    #[tokio::test]
    async fn layers_run_before_the_sender() {
        let client = InMemory::default();
        let mut transport = Transport::new(PubsubSender::new(
            client.clone(),
            "orders",
            BytesSerializer,
        ))
        .layer(MapRequestLayer::new(|envelope: Envelope<&'static str>| {
            envelope.with(OrderingKeyStamp::new("tenant-1"))
        }));

        let envelope = transport.send(Envelope::new("hello")).await.unwrap();

        assert_eq!(
            envelope.last::<OrderingKeyStamp>().map(OrderingKeyStamp::ordering_key),
            Some("tenant-1")
        );
        let published = client.take_published().await;
        assert_eq!(published[0].message.ordering_key(), Some("tenant-1"));
    }

    #[test]
    fn boxed_transport_error_keeps_its_kind() {
        let boxed: tower::BoxError = Box::new(TransportError::encoding("bad payload"));

        assert!(TransportError::from_boxed(boxed).is_encoding());
    }

    #[test]
    fn foreign_errors_are_broker_errors() {
        let boxed: tower::BoxError = "connection reset".into();

        let err = TransportError::from_boxed(boxed);

        assert!(err.is_broker());
        assert!(err.to_string().starts_with("Broker error: connection reset"));
    }

    #[test]
    fn str_slices_are_bytes() {
        assert_eq!("abc".to_bytes(), b"abc");
        assert_eq!(().to_bytes(), b"");
        assert_eq!(Bytes::from_static(b"xy").to_bytes(), b"xy");
    }
}
