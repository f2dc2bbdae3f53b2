use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt::Debug,
    sync::Arc,
};

/// Message container handed through the delivery pipeline.
///
/// `Envelope` bundles a message payload together with the [`Stamp`]s that
/// upstream processing attached to it. It is transport-agnostic: a sender
/// reads the stamps it understands and ignores the rest.
///
/// ## Immutability
///
/// An envelope is never mutated in place. [`Envelope::with`] consumes the
/// envelope and returns a new one carrying the extra stamp; existing stamps
/// are shared, so adding a stamp does not copy the others.
///
/// ## Lookup
///
/// Stamps are grouped by their concrete type. [`Envelope::last`] returns the
/// most recently added stamp of a kind, which gives "last wins" semantics
/// when the same kind was applied more than once.
///
/// ## Example
///
/// ```rust
/// use pubsub_transport::{Envelope, stamp::OrderingKeyStamp};
///
/// let envelope = Envelope::new("hello")
///     .with(OrderingKeyStamp::new("user-1"))
///     .with(OrderingKeyStamp::new("user-2"));
///
/// let key = envelope.last::<OrderingKeyStamp>().unwrap();
/// assert_eq!(key.ordering_key(), "user-2");
/// ```
#[derive(Debug, Clone)]
pub struct Envelope<M> {
    message: M,
    stamps: Stamps,
}

impl<M> Envelope<M> {
    /// Wrap a message in an envelope without stamps.
    pub fn new(message: M) -> Self {
        Self {
            message,
            stamps: Stamps::default(),
        }
    }

    /// Return a new envelope with `stamp` appended.
    pub fn with<S: Stamp>(mut self, stamp: S) -> Self {
        self.stamps.push(stamp);
        self
    }

    /// Return a new envelope with every stamp of kind `S` removed.
    pub fn without_all<S: Stamp>(mut self) -> Self {
        self.stamps.remove_all::<S>();
        self
    }

    /// The wrapped message.
    pub fn message(&self) -> &M {
        &self.message
    }

    /// Unwrap the envelope, dropping its stamps.
    pub fn into_message(self) -> M {
        self.message
    }

    /// The stamps attached to this envelope.
    pub fn stamps(&self) -> &Stamps {
        &self.stamps
    }

    /// The most recently added stamp of kind `S`, if any.
    pub fn last<S: Stamp>(&self) -> Option<&S> {
        self.stamps.last::<S>()
    }

    /// Every stamp of kind `S`, oldest first.
    pub fn all<S: Stamp>(&self) -> impl Iterator<Item = &S> {
        self.stamps.all::<S>()
    }
}

/// Typed piece of metadata attached to an [`Envelope`].
///
/// Any `'static` value that is `Debug + Send + Sync` can be a stamp once it
/// opts in with an empty impl:
///
/// ```rust
/// use pubsub_transport::envelope::Stamp;
///
/// #[derive(Debug)]
/// struct TenantStamp(String);
///
/// impl Stamp for TenantStamp {}
/// ```
pub trait Stamp: Any + Debug + Send + Sync {}

/// Object-safe view over a stored stamp.
trait AnyStamp: Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<S: Stamp> AnyStamp for S {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Set of stamps keyed by kind.
///
/// Each kind keeps its stamps in insertion order, so the latest one is an
/// O(1) lookup. Stamps are reference counted and cloning the set is cheap.
#[derive(Debug, Clone, Default)]
pub struct Stamps {
    by_kind: HashMap<TypeId, Vec<Arc<dyn AnyStamp>>>,
}

impl Stamps {
    fn push<S: Stamp>(&mut self, stamp: S) {
        self.by_kind
            .entry(TypeId::of::<S>())
            .or_default()
            .push(Arc::new(stamp));
    }

    fn remove_all<S: Stamp>(&mut self) {
        self.by_kind.remove(&TypeId::of::<S>());
    }

    /// The most recently added stamp of kind `S`, if any.
    pub fn last<S: Stamp>(&self) -> Option<&S> {
        self.by_kind
            .get(&TypeId::of::<S>())?
            .last()?
            .as_any()
            .downcast_ref::<S>()
    }

    /// Every stamp of kind `S`, oldest first.
    pub fn all<S: Stamp>(&self) -> impl Iterator<Item = &S> {
        self.by_kind
            .get(&TypeId::of::<S>())
            .into_iter()
            .flatten()
            .filter_map(|stamp| stamp.as_any().downcast_ref::<S>())
    }

    /// Whether at least one stamp of kind `S` is present.
    pub fn contains<S: Stamp>(&self) -> bool {
        self.by_kind.contains_key(&TypeId::of::<S>())
    }

    /// Total number of stamps, across all kinds.
    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    /// Whether the envelope carries no stamp at all.
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Marker(u8);

    impl Stamp for Marker {}

    #[derive(Debug, PartialEq)]
    struct Other;

    impl Stamp for Other {}

    #[test]
    fn last_returns_most_recent_stamp_of_kind() {
        let envelope = Envelope::new(())
            .with(Marker(1))
            .with(Other)
            .with(Marker(2));

        assert_eq!(envelope.last::<Marker>(), Some(&Marker(2)));
        assert_eq!(envelope.last::<Other>(), Some(&Other));
        assert_eq!(envelope.stamps().len(), 3);
    }

    #[test]
    fn all_preserves_insertion_order() {
        let envelope = Envelope::new(()).with(Marker(1)).with(Marker(2));

        let markers: Vec<_> = envelope.all::<Marker>().collect();
        assert_eq!(markers, vec![&Marker(1), &Marker(2)]);
    }

    #[test]
    fn missing_kind_yields_none() {
        let envelope = Envelope::new("payload").with(Other);

        assert!(envelope.last::<Marker>().is_none());
        assert_eq!(envelope.all::<Marker>().count(), 0);
        assert!(!envelope.stamps().contains::<Marker>());
    }

    #[test]
    fn clones_share_stamps_but_diverge_on_with() {
        let original = Envelope::new("payload").with(Marker(1));
        let extended = original.clone().with(Marker(2));

        assert_eq!(original.last::<Marker>(), Some(&Marker(1)));
        assert_eq!(extended.last::<Marker>(), Some(&Marker(2)));
        assert_eq!(original.stamps().len(), 1);
    }

    #[test]
    fn without_all_drops_a_single_kind() {
        let envelope = Envelope::new(())
            .with(Marker(1))
            .with(Other)
            .without_all::<Marker>();

        assert!(envelope.last::<Marker>().is_none());
        assert!(envelope.stamps().contains::<Other>());
    }
}
