use std::sync::Arc;

use tokio::sync::Mutex;

use crate::transport::pubsub::{PublishClient, PubsubMessage};

/// In-memory publish client for testing or local pipelines.
///
/// This client stores published messages in a shared queue instead of
/// talking to a broker. It is useful for:
/// - Unit and integration testing
/// - Simulating message delivery without a real broker
/// - Debugging message flows
///
/// Clones share the same queue, so a test can keep one handle and give
/// another one to the sender.
#[derive(Clone, Default)]
pub struct InMemory {
    /// Shared message queue
    msg_queue: Arc<Mutex<Vec<PublishedMessage>>>,
}

/// A message recorded by [`InMemory`], together with its topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// The published message.
    pub message: PubsubMessage,
}

impl InMemory {
    /// Return all messages that have been "published" and clear the
    /// internal queue.
    ///
    /// Primarily intended for testing purposes.
    pub async fn take_published(&self) -> Vec<PublishedMessage> {
        let mut queue = self.msg_queue.lock().await;
        std::mem::take(&mut *queue)
    }

    /// Number of messages currently in the queue.
    pub async fn len(&self) -> usize {
        self.msg_queue.lock().await.len()
    }

    /// Whether no message is queued.
    pub async fn is_empty(&self) -> bool {
        self.msg_queue.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl PublishClient for InMemory {
    type Error = std::convert::Infallible;

    /// "Publish" a message by appending it to the in-memory queue.
    #[tracing::instrument(skip_all, fields(topic = %topic))]
    async fn publish(&self, topic: &str, message: PubsubMessage) -> Result<(), Self::Error> {
        tracing::info!(
            attributes = ?message.attributes(),
            ordering_key = ?message.ordering_key(),
            size = message.data().len(),
            "Message published to in-memory queue",
        );
        self.msg_queue.lock().await.push(PublishedMessage {
            topic: topic.to_owned(),
            message,
        });
        Ok(())
    }
}
