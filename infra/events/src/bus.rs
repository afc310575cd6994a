use crate::builder::EventBusBuilder;
use crate::config::DEFAULT_MAX_LISTENERS;
use crate::error::EventBusError;
use crate::event::{Event, require_namespace};
use crate::handler::{ErrorSink, Handler, HandlerInvocationError, IntoHandlerResult, log_sink};
use crate::inflight::{InFlight, InvocationGuard};
use crate::pattern::PatternSyntax;
use crate::registry::{Registry, Subscription, SubscriptionId, Target};
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::{Future, ready};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, oneshot};
use tracing::{Instrument, debug, debug_span, info, trace, warn};

/// Lifecycle phase of an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusState {
    /// Accepting subscriptions and dispatching events.
    Open,
    /// `close` was requested; no new dispatch, waiting for in-flight handlers.
    Draining,
    /// Terminal.
    Closed,
}

struct Inner<E> {
    registry: Registry<E>,
    in_flight: Arc<InFlight>,
    state: Mutex<BusState>,
    on_error: ErrorSink,
    limiter: Option<Arc<Semaphore>>,
    close_timeout: Option<Duration>,
}

/// An in-process publish/subscribe bus with wildcard namespaces and a
/// drain-on-close shutdown.
///
/// Cloning is cheap; every clone shares the same registry and lifecycle.
pub struct EventBus<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("state", &*self.inner.state.lock())
            .field("registry", &self.inner.registry)
            .field("in_flight", &self.inner.in_flight.len())
            .field("permits", &self.inner.limiter.as_ref().map(|l| l.available_permits()))
            .field("close_timeout", &self.inner.close_timeout)
            .finish_non_exhaustive()
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventBus<E> {
    /// Creates an open bus with default settings: `.` delimiter, `**` deep
    /// wildcard, unbounded concurrency and failures logged through `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(PatternSyntax::default(), DEFAULT_MAX_LISTENERS, None, None, log_sink())
    }

    #[must_use]
    pub fn builder() -> EventBusBuilder<E> {
        EventBusBuilder::new()
    }

    pub(crate) fn from_parts(
        syntax: PatternSyntax,
        max_listeners: usize,
        max_concurrent_handlers: Option<usize>,
        close_timeout: Option<Duration>,
        on_error: ErrorSink,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Registry::new(syntax, max_listeners),
                in_flight: InFlight::new(),
                state: Mutex::new(BusState::Open),
                on_error,
                limiter: max_concurrent_handlers.map(|n| Arc::new(Semaphore::new(n))),
                close_timeout,
            }),
        }
    }

    /// Registers `handler` for every event whose namespace matches `target`.
    ///
    /// `target` is a pattern (`"order.created"`, `"order.*"`, `"order.**"`) or a
    /// typed [`Target::of`]. The handler receives the event as an `Arc<E>` and may
    /// complete with `()` or `Result<(), impl Into<BoxError>>`.
    ///
    /// On a draining or closed bus the handler is dropped at once and the
    /// returned id never matches anything.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidPattern`] if the pattern cannot be parsed.
    ///
    /// # Examples
    /// ```rust
    /// use relay_event_bus::{Envelope, EventBus};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), relay_event_bus::EventBusError> {
    /// let bus = EventBus::<Envelope<u64>>::new();
    /// bus.subscribe("order.*", |event: Arc<Envelope<u64>>| async move {
    ///     assert_eq!(*event.payload(), 7);
    /// })?;
    ///
    /// assert_eq!(bus.publish(Envelope::new("order.created", 7))?, 1);
    /// bus.close(None).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe<F, Fut>(
        &self,
        target: impl Into<Target>,
        handler: F,
    ) -> Result<SubscriptionId, EventBusError>
    where
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHandlerResult,
    {
        self.register(&target.into(), Box::new(handler), false)
    }

    /// Like [`subscribe`](Self::subscribe), but the handler runs for the first
    /// matching event only, even under concurrent publishes.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidPattern`] if the pattern cannot be parsed.
    pub fn subscribe_once<F, Fut>(
        &self,
        target: impl Into<Target>,
        handler: F,
    ) -> Result<SubscriptionId, EventBusError>
    where
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHandlerResult,
    {
        self.register(&target.into(), Box::new(handler), true)
    }

    fn register(
        &self,
        target: &Target,
        handler: Box<dyn Handler<E>>,
        once: bool,
    ) -> Result<SubscriptionId, EventBusError> {
        // Held across the insert so a concurrent `close` cannot miss the entry.
        let state = self.inner.state.lock();
        if *state != BusState::Open {
            let id = self.inner.registry.reserve(target)?;
            debug!(
                subscription = %id,
                %target,
                state = ?*state,
                "Subscription discarded: bus no longer dispatches"
            );
            return Ok(id);
        }
        self.inner.registry.register(target, handler, once)
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    ///
    /// Invocations that already started are not affected.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.registry.unregister(id)
    }

    /// Dispatches `event` to every matching subscription.
    ///
    /// Returns the number of handler invocations started. Handlers run as
    /// independent Tokio tasks; their errors and panics go to the error sink and
    /// never reach the publisher. Publishing on a draining or closed bus is a no-op.
    ///
    /// # Errors
    /// Returns [`EventBusError::MissingNamespace`] if the event carries no namespace,
    /// or [`EventBusError::RuntimeUnavailable`] if called outside a Tokio runtime.
    pub fn publish(&self, event: E) -> Result<usize, EventBusError> {
        self.publish_arc(Arc::new(event))
    }

    /// Dispatches an already shared event without re-wrapping.
    ///
    /// # Errors
    /// See [`publish`](Self::publish).
    pub fn publish_arc(&self, event: Arc<E>) -> Result<usize, EventBusError> {
        let namespace = require_namespace(&*event)?;

        // Invocations are recorded under the lifecycle lock, so `close` either
        // sees them in flight or they never start.
        let state = self.inner.state.lock();
        if *state != BusState::Open {
            debug!(namespace, state = ?*state, "Event dropped: bus is not accepting events");
            return Ok(0);
        }

        let runtime = Handle::try_current().map_err(|e| EventBusError::RuntimeUnavailable {
            message: e.to_string().into(),
            context: Some(format!("publishing '{namespace}'").into()),
        })?;

        let matched = self.inner.registry.matches_for(namespace);
        if matched.is_empty() {
            trace!(namespace, "Event dropped: no matching subscribers");
            return Ok(0);
        }

        let namespace: Arc<str> = Arc::from(namespace);
        for subscription in &matched {
            let guard = self.inner.in_flight.begin(subscription.id(), Arc::clone(&namespace));
            let retire = subscription
                .is_once()
                .then(|| OnceRetirement { inner: Arc::clone(&self.inner), id: subscription.id() });
            let span = debug_span!(
                "event_handler",
                namespace = %namespace,
                subscription = %subscription.id()
            );
            runtime.spawn(
                invoke(
                    Arc::clone(&self.inner),
                    Arc::clone(subscription),
                    Arc::clone(&event),
                    Arc::clone(&namespace),
                    retire,
                    guard,
                )
                .instrument(span),
            );
        }
        drop(state);

        trace!(namespace = %namespace, handlers = matched.len(), "Event dispatched");
        Ok(matched.len())
    }

    /// Stops dispatch and waits for every in-flight handler invocation.
    ///
    /// All subscriptions are removed immediately. With `timeout`, the wait gives
    /// up after the given duration; running handlers are never cancelled and keep
    /// reporting failures to the error sink. The bus is [`BusState::Closed`] once
    /// the wait ends, even if the returned future is dropped early.
    ///
    /// Calling `close` on a closed bus waits for whatever is still running.
    ///
    /// # Errors
    /// Returns [`EventBusError::DrainTimeout`] if handlers were still running when
    /// the timeout elapsed, or [`EventBusError::AlreadyClosing`] if another `close`
    /// is currently draining the bus.
    pub async fn close(&self, timeout: Option<Duration>) -> Result<(), EventBusError> {
        let opened = {
            let mut state = self.inner.state.lock();
            match *state {
                BusState::Open => {
                    *state = BusState::Draining;
                    true
                },
                BusState::Draining => {
                    return Err(EventBusError::AlreadyClosing {
                        message: "another close is still draining the bus".into(),
                        context: None,
                    });
                },
                BusState::Closed => false,
            }
        };

        let removed = self.inner.registry.remove_all();
        if !opened {
            return self.drain(timeout).await;
        }

        debug!(removed, in_flight = self.inner.in_flight.len(), "Event bus draining");
        let _closing = ClosingGuard { state: &self.inner.state };
        self.drain(timeout).await
    }

    /// [`close`](Self::close) with the timeout configured at construction.
    ///
    /// # Errors
    /// See [`close`](Self::close).
    pub async fn shutdown(&self) -> Result<(), EventBusError> {
        self.close(self.inner.close_timeout).await
    }

    async fn drain(&self, timeout: Option<Duration>) -> Result<(), EventBusError> {
        let in_flight = &self.inner.in_flight;

        let Some(limit) = timeout else {
            in_flight.drained().await;
            info!("Event bus closed");
            return Ok(());
        };

        if tokio::time::timeout(limit, in_flight.drained()).await.is_ok() {
            info!("Event bus closed");
            return Ok(());
        }

        let pending = in_flight.pending();
        if pending.is_empty() {
            info!("Event bus closed");
            return Ok(());
        }

        let namespaces = pending.iter().map(|(_, ns)| ns.as_ref()).collect::<Vec<_>>().join(", ");
        warn!(
            timeout = ?limit,
            pending = pending.len(),
            namespaces = %namespaces,
            "Event bus closed before all handlers finished"
        );
        Err(EventBusError::DrainTimeout {
            timeout: limit,
            pending: pending.len(),
            context: Some(format!("still handling: {namespaces}").into()),
        })
    }

    /// Resolves with the first event matching `target` for which `predicate`
    /// returns `true`. The temporary subscription is always removed afterwards.
    ///
    /// # Errors
    /// Returns [`EventBusError::WaitTimeout`] if nothing arrived within `timeout`,
    /// [`EventBusError::Closed`] if the bus closes first or is not open, and
    /// [`EventBusError::InvalidPattern`] for an unparsable pattern.
    ///
    /// # Examples
    /// ```rust
    /// use relay_event_bus::{Envelope, EventBus};
    /// use std::time::Duration;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), relay_event_bus::EventBusError> {
    /// let bus = EventBus::<Envelope<u32>>::new();
    /// let waiter = {
    ///     let bus = bus.clone();
    ///     tokio::spawn(async move {
    ///         bus.wait_for("job.*", Some(Duration::from_secs(1)), |e| *e.payload() == 2).await
    ///     })
    /// };
    /// tokio::task::yield_now().await;
    ///
    /// bus.publish(Envelope::new("job.done", 1))?;
    /// bus.publish(Envelope::new("job.done", 2))?;
    /// assert_eq!(*waiter.await.unwrap()?.payload(), 2);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn wait_for<P>(
        &self,
        target: impl Into<Target>,
        timeout: Option<Duration>,
        predicate: P,
    ) -> Result<Arc<E>, EventBusError>
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let target = target.into();
        let (tx, rx) = oneshot::channel::<Arc<E>>();
        let slot = Mutex::new(Some(tx));
        let id = self.subscribe(target.clone(), move |event: Arc<E>| {
            if predicate(&event)
                && let Some(tx) = slot.lock().take()
            {
                let _ = tx.send(event);
            }
            ready(())
        })?;
        let _unsubscribe = Unsubscribe { bus: self, id };

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
                EventBusError::WaitTimeout {
                    message: target.to_string().into(),
                    timeout: limit,
                    context: None,
                }
            })?,
            None => rx.await,
        };

        // The sender is dropped with the subscription: on close, or right away
        // when the bus was not open.
        received.map_err(|_| EventBusError::Closed {
            message: target.to_string().into(),
            context: Some("bus closed before a matching event arrived".into()),
        })
    }

    #[must_use]
    pub fn state(&self) -> BusState {
        *self.inner.state.lock()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == BusState::Open
    }

    /// Handler invocations started and not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.inner.registry.len()
    }

    /// Subscriptions a publish to `namespace` would reach right now, in
    /// registration order.
    #[must_use]
    pub fn subscribers_of(&self, namespace: &str) -> Vec<SubscriptionId> {
        self.inner.registry.matching_ids(namespace)
    }

    #[must_use]
    pub fn syntax(&self) -> &PatternSyntax {
        self.inner.registry.syntax()
    }

    /// Subscriptions per pattern above which a possible leak is logged. `0` means never.
    #[must_use]
    pub fn max_listeners(&self) -> usize {
        self.inner.registry.max_listeners()
    }

    /// Timeout applied by [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn close_timeout(&self) -> Option<Duration> {
        self.inner.close_timeout
    }
}

async fn invoke<E: Event>(
    inner: Arc<Inner<E>>,
    subscription: Arc<Subscription<E>>,
    event: Arc<E>,
    namespace: Arc<str>,
    retire: Option<OnceRetirement<E>>,
    guard: InvocationGuard,
) {
    let id = subscription.id();
    let permit = match &inner.limiter {
        Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
        None => None,
    };

    let outcome =
        AssertUnwindSafe(async { subscription.handler().call(event).await }).catch_unwind().await;
    drop(permit);
    drop(retire);

    let failure = match outcome {
        Ok(Ok(())) => {
            trace!("Handler completed");
            None
        },
        Ok(Err(source)) => Some(HandlerInvocationError::Failed {
            namespace: Arc::clone(&namespace),
            subscription: id,
            source,
        }),
        Err(payload) => {
            Some(HandlerInvocationError::from_panic(Arc::clone(&namespace), id, &*payload))
        },
    };

    if let Some(failure) = failure {
        let sink = &inner.on_error;
        if std::panic::catch_unwind(AssertUnwindSafe(|| sink(&failure, &*namespace))).is_err() {
            warn!(kind = failure.as_label(), "Error sink panicked while reporting a handler failure");
        }
    }

    // Released last: a drain also waits for failures to be reported.
    drop(guard);
}

/// Moves a draining bus to `Closed` however the drain ends.
struct ClosingGuard<'a> {
    state: &'a Mutex<BusState>,
}

impl Drop for ClosingGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = BusState::Closed;
        debug!("Event bus state: closed");
    }
}

/// Removes a claimed once-subscription, including when its task is dropped
/// before the handler ran to completion.
struct OnceRetirement<E> {
    inner: Arc<Inner<E>>,
    id: SubscriptionId,
}

impl<E> Drop for OnceRetirement<E> {
    fn drop(&mut self) {
        self.inner.registry.unregister(self.id);
    }
}

struct Unsubscribe<'a, E: Event> {
    bus: &'a EventBus<E>,
    id: SubscriptionId,
}

impl<E: Event> Drop for Unsubscribe<'_, E> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
