use crate::error::EventBusError;
use std::borrow::Cow;

/// Anything that can be published on an [`EventBus`](crate::EventBus).
///
/// The bus only needs the namespace; the rest of the value is shared untouched
/// with every matching handler as an `Arc<Self>`.
pub trait Event: Send + Sync + 'static {
    /// Dot-segmented topic of this event, e.g. `"order.created"`.
    ///
    /// `None` or an empty string makes the event unpublishable.
    fn namespace(&self) -> Option<&str>;
}

/// Static namespace declaration for a typed event.
///
/// Used by [`Target::of`](crate::Target::of) to resolve a type to the pattern
/// it subscribes to, without any runtime type inspection.
///
/// ```rust
/// use relay_event_bus::{EventNamespace, Target};
///
/// struct OrderCreated;
///
/// impl EventNamespace for OrderCreated {
///     const NAMESPACE: &'static str = "order.created";
/// }
///
/// assert_eq!(Target::of::<OrderCreated>().pattern(), "order.created");
/// ```
pub trait EventNamespace {
    const NAMESPACE: &'static str;
}

/// A ready-made event: an optional namespace plus an arbitrary payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Envelope<P> {
    namespace: Option<Cow<'static, str>>,
    payload: P,
}

impl<P> Envelope<P> {
    #[must_use]
    pub fn new(namespace: impl Into<Cow<'static, str>>, payload: P) -> Self {
        Self { namespace: Some(namespace.into()), payload }
    }

    /// An envelope without a namespace. Publishing it fails with
    /// [`EventBusError::MissingNamespace`].
    #[must_use]
    pub const fn unnamespaced(payload: P) -> Self {
        Self { namespace: None, payload }
    }

    #[must_use]
    pub const fn payload(&self) -> &P {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> P {
        self.payload
    }
}

impl<P: Send + Sync + 'static> Event for Envelope<P> {
    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

pub(crate) fn require_namespace<E: Event>(event: &E) -> Result<&str, EventBusError> {
    match event.namespace() {
        Some(ns) if !ns.is_empty() => Ok(ns),
        _ => Err(EventBusError::MissingNamespace {
            message: std::any::type_name::<E>().into(),
            context: Some("Events must carry a namespace to be published".into()),
        }),
    }
}
