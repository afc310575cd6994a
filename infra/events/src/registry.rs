use crate::error::EventBusError;
use crate::event::EventNamespace;
use crate::handler::Handler;
use crate::pattern::{Pattern, PatternSyntax};
use parking_lot::RwLock;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{trace, warn};

/// Identifier of a subscription. Monotonically increasing, never reused by a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
impl SubscriptionId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a subscriber registers against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A literal namespace or wildcard pattern.
    Pattern(Cow<'static, str>),
    /// The namespace declared by a typed event.
    Typed { namespace: &'static str, type_name: &'static str },
}

impl Target {
    /// Target resolved from the static namespace of `T`.
    #[must_use]
    pub fn of<T: EventNamespace>() -> Self {
        Self::Typed { namespace: T::NAMESPACE, type_name: std::any::type_name::<T>() }
    }

    /// Pattern string this target subscribes with.
    #[must_use]
    pub fn pattern(&self) -> &str {
        match self {
            Self::Pattern(raw) => raw,
            Self::Typed { namespace, .. } => namespace,
        }
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Self::Pattern(Cow::Owned(value.to_owned()))
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Self::Pattern(Cow::Owned(value))
    }
}

impl From<Cow<'static, str>> for Target {
    fn from(value: Cow<'static, str>) -> Self {
        Self::Pattern(value)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(raw) => f.write_str(raw),
            Self::Typed { namespace, type_name } => write!(f, "{namespace} ({type_name})"),
        }
    }
}

pub(crate) struct Subscription<E> {
    id: SubscriptionId,
    pattern: Pattern,
    handler: Box<dyn Handler<E>>,
    once: bool,
    claimed: AtomicBool,
}

impl<E> Subscription<E> {
    pub(crate) const fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) const fn is_once(&self) -> bool {
        self.once
    }

    pub(crate) fn handler(&self) -> &dyn Handler<E> {
        self.handler.as_ref()
    }

    /// Durable subscriptions are always available; a once-subscription only to
    /// the first caller.
    fn claim(&self) -> bool {
        !self.once || !self.claimed.swap(true, Ordering::AcqRel)
    }

    fn is_claimed(&self) -> bool {
        self.once && self.claimed.load(Ordering::Acquire)
    }
}

impl<E> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .field("once", &self.once)
            .field("claimed", &self.claimed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Owns every subscription of one bus, keyed (and therefore ordered) by id.
pub(crate) struct Registry<E> {
    entries: RwLock<BTreeMap<SubscriptionId, Arc<Subscription<E>>>>,
    next_id: AtomicU64,
    syntax: PatternSyntax,
    max_listeners: usize,
}

impl<E> Registry<E> {
    pub(crate) fn new(syntax: PatternSyntax, max_listeners: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
            syntax,
            max_listeners,
        }
    }

    pub(crate) const fn syntax(&self) -> &PatternSyntax {
        &self.syntax
    }

    pub(crate) const fn max_listeners(&self) -> usize {
        self.max_listeners
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Validates `target` and hands out an id without storing anything.
    pub(crate) fn reserve(&self, target: &Target) -> Result<SubscriptionId, EventBusError> {
        Pattern::parse(target.pattern(), &self.syntax)?;
        Ok(self.next_id())
    }

    pub(crate) fn register(
        &self,
        target: &Target,
        handler: Box<dyn Handler<E>>,
        once: bool,
    ) -> Result<SubscriptionId, EventBusError> {
        let pattern = Pattern::parse(target.pattern(), &self.syntax)?;
        let id = self.next_id();

        let mut entries = self.entries.write();
        if self.max_listeners > 0 {
            let listeners = 1 + entries.values().filter(|s| s.pattern == pattern).count();
            if listeners > self.max_listeners {
                warn!(
                    pattern = %pattern,
                    listeners,
                    limit = self.max_listeners,
                    "Listener limit exceeded, possible subscription leak"
                );
            }
        }

        trace!(subscription = %id, pattern = %pattern, once, "Subscription registered");
        entries.insert(
            id,
            Arc::new(Subscription { id, pattern, handler, once, claimed: AtomicBool::new(false) }),
        );
        Ok(id)
    }

    pub(crate) fn unregister(&self, id: SubscriptionId) -> bool {
        let removed = self.entries.write().remove(&id).is_some();
        if removed {
            trace!(subscription = %id, "Subscription removed");
        }
        removed
    }

    /// Subscriptions matching `namespace`, in registration order.
    ///
    /// Once-subscriptions are claimed here: whichever caller selects one first
    /// is the only one that ever will.
    pub(crate) fn matches_for(&self, namespace: &str) -> Vec<Arc<Subscription<E>>> {
        self.entries
            .read()
            .values()
            .filter(|s| s.pattern.matches(namespace) && s.claim())
            .cloned()
            .collect()
    }

    /// Ids that a publish to `namespace` would currently reach, without claiming anything.
    pub(crate) fn matching_ids(&self, namespace: &str) -> Vec<SubscriptionId> {
        self.entries
            .read()
            .values()
            .filter(|s| !s.is_claimed() && s.pattern.matches(namespace))
            .map(|s| s.id)
            .collect()
    }

    pub(crate) fn remove_all(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl<E> fmt::Debug for Registry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("subscriptions", &self.len())
            .field("syntax", &self.syntax)
            .field("max_listeners", &self.max_listeners)
            .finish_non_exhaustive()
    }
}
