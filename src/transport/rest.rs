use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{
    config::PubsubConfig,
    transport::pubsub::{PublishClient, PubsubMessage},
};

/// Public Pub/Sub API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Pub/Sub REST publish client.
///
/// Publishes through the `projects.topics.publish` REST method, one message
/// per request.
///
/// ## Design
///
/// - The endpoint comes from [`PubsubConfig::endpoint`], falling back to
///   [`DEFAULT_ENDPOINT`]. Pointing it at the emulator is how local setups
///   work.
/// - Authentication is a static bearer token, if any. Refreshing tokens is
///   left to whoever builds the configuration.
/// - `reqwest::Client` pools connections and is cheap to clone, so the
///   client can be shared between concurrent sends.
#[derive(Clone)]
pub struct PubsubRestClient {
    http: reqwest::Client,
    endpoint: Url,
    project_id: String,
    bearer_token: Option<String>,
}

impl PubsubRestClient {
    /// Create a client from the configuration, with the configured timeout.
    ///
    /// Fails if the HTTP client cannot be built or the endpoint is not an
    /// absolute URL.
    pub fn new(config: &PubsubConfig) -> Result<Self, RestClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(RestClientError::http)?;

        Self::with_http_client(http, config)
    }

    /// Create a client reusing an existing `reqwest::Client`.
    ///
    /// Fails if the endpoint is not an absolute URL.
    pub fn with_http_client(
        http: reqwest::Client,
        config: &PubsubConfig,
    ) -> Result<Self, RestClientError> {
        let raw = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let endpoint = Url::parse(raw).map_err(|_| RestClientError::invalid_endpoint(raw))?;
        if endpoint.cannot_be_a_base() {
            return Err(RestClientError::invalid_endpoint(raw));
        }

        Ok(Self {
            http,
            endpoint,
            project_id: config.project_id.clone(),
            bearer_token: config.bearer_token.clone(),
        })
    }

    /// `{endpoint}/v1/projects/{project}/topics/{topic}:publish`, with the
    /// project and topic percent-encoded as path segments.
    fn publish_url(&self, topic: &str) -> Result<Url, RestClientError> {
        let method = format!("{topic}:publish");
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| RestClientError::invalid_endpoint(self.endpoint.as_str()))?
            .pop_if_empty()
            .extend(["v1", "projects", self.project_id.as_str(), "topics", method.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl PublishClient for PubsubRestClient {
    type Error = RestClientError;

    #[tracing::instrument(skip_all, fields(topic = %topic))]
    async fn publish(&self, topic: &str, message: PubsubMessage) -> Result<(), Self::Error> {
        let mut request = self
            .http
            .post(self.publish_url(topic)?)
            .json(&PublishRequest::new(&message));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(RestClientError::http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RestClientError::status(status.as_u16(), body));
        }

        let response: PublishResponse = response.json().await.map_err(RestClientError::http)?;
        tracing::debug!(message_ids = ?response.message_ids, "Message accepted by broker");

        Ok(())
    }
}

/// Body of a `topics.publish` request.
#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    messages: [WireMessage<'a>; 1],
}

impl<'a> PublishRequest<'a> {
    fn new(message: &'a PubsubMessage) -> Self {
        Self {
            messages: [WireMessage {
                data: STANDARD.encode(message.data()),
                attributes: message.attributes(),
                ordering_key: message.ordering_key(),
            }],
        }
    }
}

/// `PubsubMessage` as it goes over the wire. Unset fields are omitted.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage<'a> {
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ordering_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Error returned by [`PubsubRestClient`].
#[derive(Debug)]
pub struct RestClientError {
    kind: RestClientErrorKind,
}

/// REST client errors kind.
#[derive(Debug)]
pub enum RestClientErrorKind {
    /// The request could not be sent or its response could not be read.
    Http(reqwest::Error),
    /// The API answered with a non-success status.
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body, usually a JSON error document.
        body: String,
    },
    /// The configured endpoint cannot carry the publish path.
    InvalidEndpoint(String),
}

impl RestClientError {
    fn http(err: reqwest::Error) -> Self {
        Self {
            kind: RestClientErrorKind::Http(err),
        }
    }

    fn status(code: u16, body: String) -> Self {
        Self {
            kind: RestClientErrorKind::Status { code, body },
        }
    }

    fn invalid_endpoint(endpoint: &str) -> Self {
        Self {
            kind: RestClientErrorKind::InvalidEndpoint(endpoint.to_owned()),
        }
    }

    /// The reason the request failed.
    pub fn kind(&self) -> &RestClientErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for RestClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            RestClientErrorKind::Http(err) => write!(f, "HTTP error: {err}"),
            RestClientErrorKind::Status { code, body } => {
                write!(f, "Publish rejected with status {code}: {body}")
            }
            RestClientErrorKind::InvalidEndpoint(endpoint) => {
                write!(f, "Invalid Pub/Sub endpoint {endpoint:?}")
            }
        }
    }
}

impl std::error::Error for RestClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            RestClientErrorKind::Http(err) => Some(err),
            RestClientErrorKind::Status { .. } | RestClientErrorKind::InvalidEndpoint(_) => None,
        }
    }
}
