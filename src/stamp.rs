//! Stamps understood by the pub/sub sender.
//!
//! - [`AttributesStamp`]: broker attributes to attach to the published message
//! - [`OrderingKeyStamp`]: ordering key for the published message
//! - [`RedeliveryStamp`]: marks an envelope that is being dispatched again
//!   after a failed delivery
//!
//! When an envelope carries several stamps of the same kind, only the last
//! one is taken into account.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::envelope::Stamp;

/// Attributes attached to the published message.
///
/// Values override headers of the same name produced by the serializer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributesStamp {
    attributes: BTreeMap<String, String>,
}

impl AttributesStamp {
    /// Stamp carrying the given attributes.
    pub fn new(attributes: BTreeMap<String, String>) -> Self {
        Self { attributes }
    }

    /// Attributes to publish with the message.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

impl<K, V> FromIterator<(K, V)> for AttributesStamp
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            attributes: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Stamp for AttributesStamp {}

/// Ordering key of the published message.
///
/// Messages published to the same topic with the same ordering key are
/// delivered in publish order, relative to each other only. Ordering must be
/// enabled on the subscription for the broker to honor it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingKeyStamp {
    ordering_key: String,
}

impl OrderingKeyStamp {
    /// Stamp carrying the given ordering key.
    pub fn new(ordering_key: impl Into<String>) -> Self {
        Self {
            ordering_key: ordering_key.into(),
        }
    }

    /// The ordering key, which may be empty.
    pub fn ordering_key(&self) -> &str {
        &self.ordering_key
    }
}

impl Stamp for OrderingKeyStamp {}

/// Marks an envelope as a redelivery attempt.
///
/// Added by the dispatch pipeline when a message handler failed and the
/// envelope is routed back to its sender. The pub/sub sender does not
/// publish such envelopes: the broker redelivers unacknowledged messages
/// according to the subscription's retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeliveryStamp {
    retry_count: u32,
    redelivered_at: DateTime<Utc>,
}

impl RedeliveryStamp {
    /// Create a redelivery stamp dated now.
    pub fn new(retry_count: u32) -> Self {
        Self::at(retry_count, Utc::now())
    }

    /// Create a redelivery stamp with an explicit date.
    pub fn at(retry_count: u32, redelivered_at: DateTime<Utc>) -> Self {
        Self {
            retry_count,
            redelivered_at,
        }
    }

    /// Number of redeliveries so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// When the envelope was routed back for redelivery.
    pub fn redelivered_at(&self) -> DateTime<Utc> {
        self.redelivered_at
    }
}

impl Stamp for RedeliveryStamp {}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::Envelope;

    #[test]
    fn attributes_stamp_collects_pairs() {
        let stamp: AttributesStamp = [("lang", "en"), ("type", "order")].into_iter().collect();

        assert_eq!(stamp.attributes().get("lang").map(String::as_str), Some("en"));
        assert_eq!(stamp.attributes().len(), 2);
    }

    #[test]
    fn latest_attributes_stamp_wins() {
        let envelope = Envelope::new("x")
            .with(AttributesStamp::from_iter([("lang", "en")]))
            .with(AttributesStamp::from_iter([("lang", "de")]));

        let stamp = envelope.last::<AttributesStamp>().unwrap();
        assert_eq!(stamp.attributes()["lang"], "de");
    }

    #[test]
    fn redelivery_stamp_keeps_its_date() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let stamp = RedeliveryStamp::at(2, at);

        assert_eq!(stamp.retry_count(), 2);
        assert_eq!(stamp.redelivered_at(), at);
    }
}
